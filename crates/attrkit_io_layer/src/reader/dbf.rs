//! dBASE III attribute-table decoding.
//!
//! Used for stand-alone `.dbf` layers and as the attribute half of shapefiles.

use std::fs::{self, File};
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use encoding_rs::Encoding;

use crate::conf::C_EXT_CPG;
use crate::spec::{EnumLayerValue, LayerError, SpecFieldDescriptor, SpecReadOptions};
use crate::util::{
    FrameBuilder, decode_text, derive_companion_path, derive_encoding_from_label,
    derive_encoding_from_ldid,
};

const N_LEN_DBF_PREFIX: usize = 32;
const N_LEN_DBF_FIELD: usize = 32;
const N_DBF_HEADER_TERMINATOR: u8 = 0x0D;
const N_DBF_EOF_MARKER: u8 = 0x1A;
const N_DBF_DELETED_FLAG: u8 = b'*';

#[derive(Debug, Clone)]
pub(crate) struct SpecDbfField {
    pub(crate) name: String,
    kind: u8,
    n_len: usize,
    n_decimals: u8,
    n_offset: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct SpecDbfHeader {
    pub(crate) n_records: usize,
    n_len_record: usize,
    pub(crate) fields: Vec<SpecDbfField>,
    encoding: &'static Encoding,
}

/// One live (non-deleted) record with its physical record index.
#[derive(Debug, Clone)]
pub(crate) struct SpecDbfRecord {
    pub(crate) n_idx_record: usize,
    pub(crate) values: Vec<EnumLayerValue>,
}

/// Decoded table: header plus records in file order.
#[derive(Debug)]
pub(crate) struct SpecDbfTable {
    pub(crate) header: SpecDbfHeader,
    pub(crate) records: Vec<SpecDbfRecord>,
}

fn open_dbf(path: &Path) -> Result<BufReader<File>, LayerError> {
    let file = File::open(path).map_err(|e| LayerError::io(path, e))?;
    Ok(BufReader::new(file))
}

/// Resolve text encoding: `.cpg` label, then language-driver byte, then UTF-8.
fn resolve_encoding(path_dbf: &Path, n_ldid: u8) -> &'static Encoding {
    if let Some(path_cpg) = derive_companion_path(path_dbf, C_EXT_CPG)
        && let Ok(c_label) = fs::read_to_string(&path_cpg)
        && let Some(encoding) = derive_encoding_from_label(&c_label)
    {
        return encoding;
    }
    derive_encoding_from_ldid(n_ldid).unwrap_or(encoding_rs::UTF_8)
}

fn read_header(
    path: &Path,
    reader: &mut impl Read,
    if_relaxed: bool,
) -> Result<SpecDbfHeader, LayerError> {
    let mut v_prefix = [0u8; N_LEN_DBF_PREFIX];
    reader
        .read_exact(&mut v_prefix)
        .map_err(|e| LayerError::io(path, e))?;

    let n_records = u32::from_le_bytes([v_prefix[4], v_prefix[5], v_prefix[6], v_prefix[7]]) as usize;
    let n_len_header = u16::from_le_bytes([v_prefix[8], v_prefix[9]]) as usize;
    let n_len_record = u16::from_le_bytes([v_prefix[10], v_prefix[11]]) as usize;
    let n_ldid = v_prefix[29];

    if n_len_header < N_LEN_DBF_PREFIX + 1 {
        return Err(LayerError::malformed(
            "dBASE header",
            format!("header length {n_len_header} is too short"),
        ));
    }

    let mut v_descriptors = vec![0u8; n_len_header - N_LEN_DBF_PREFIX];
    reader
        .read_exact(&mut v_descriptors)
        .map_err(|e| LayerError::io(path, e))?;

    let encoding = resolve_encoding(path, n_ldid);

    let mut fields = Vec::new();
    let mut n_offset = 1usize;
    for v_field in v_descriptors.chunks(N_LEN_DBF_FIELD) {
        if v_field[0] == N_DBF_HEADER_TERMINATOR || v_field.len() < N_LEN_DBF_FIELD {
            break;
        }
        let n_len_name = v_field[..11].iter().position(|b| *b == 0).unwrap_or(11);
        let name = decode_text(&v_field[..n_len_name], encoding, if_relaxed)?
            .trim()
            .to_string();
        let n_len = v_field[16] as usize;
        fields.push(SpecDbfField {
            name,
            kind: v_field[11].to_ascii_uppercase(),
            n_len,
            n_decimals: v_field[17],
            n_offset,
        });
        n_offset += n_len;
    }

    if n_offset > n_len_record {
        return Err(LayerError::malformed(
            "dBASE header",
            format!("fields span {n_offset} bytes but records are {n_len_record} bytes"),
        ));
    }

    Ok(SpecDbfHeader {
        n_records,
        n_len_record,
        fields,
        encoding,
    })
}

fn decode_field(
    field: &SpecDbfField,
    v_raw: &[u8],
    encoding: &'static Encoding,
    if_relaxed: bool,
) -> Result<EnumLayerValue, LayerError> {
    match field.kind {
        b'C' => {
            let text = decode_text(v_raw, encoding, if_relaxed)?;
            let text = text.trim_end_matches([' ', '\0']);
            if text.is_empty() {
                Ok(EnumLayerValue::Null)
            } else {
                Ok(EnumLayerValue::Text(text.to_string()))
            }
        }
        b'N' | b'F' => {
            let text = String::from_utf8_lossy(v_raw);
            let text = text.trim_matches([' ', '\0']);
            if text.is_empty() || text.starts_with('*') {
                return Ok(EnumLayerValue::Null);
            }
            if field.n_decimals == 0
                && let Ok(val) = text.parse::<i64>()
            {
                return Ok(EnumLayerValue::Integer(val));
            }
            match text.parse::<f64>() {
                Ok(val) => Ok(EnumLayerValue::Float(val)),
                Err(_) if if_relaxed => Ok(EnumLayerValue::Null),
                Err(err) => Err(LayerError::malformed(
                    format!("numeric field {:?}", field.name),
                    format!("{text:?}: {err}"),
                )),
            }
        }
        b'L' => Ok(match v_raw.first() {
            Some(b'T' | b't' | b'Y' | b'y') => EnumLayerValue::Boolean(true),
            Some(b'F' | b'f' | b'N' | b'n') => EnumLayerValue::Boolean(false),
            _ => EnumLayerValue::Null,
        }),
        b'D' => {
            let text = String::from_utf8_lossy(v_raw);
            let text = text.trim();
            if text.is_empty() || text.chars().all(|chr| chr == '0') {
                return Ok(EnumLayerValue::Null);
            }
            if text.len() == 8 && text.chars().all(|chr| chr.is_ascii_digit()) {
                return Ok(EnumLayerValue::Text(format!(
                    "{}-{}-{}",
                    &text[..4],
                    &text[4..6],
                    &text[6..]
                )));
            }
            Ok(EnumLayerValue::Text(text.to_string()))
        }
        b'I' if v_raw.len() == 4 => Ok(EnumLayerValue::Integer(i64::from(i32::from_le_bytes([
            v_raw[0], v_raw[1], v_raw[2], v_raw[3],
        ])))),
        b'O' if v_raw.len() == 8 => {
            let mut v_bytes = [0u8; 8];
            v_bytes.copy_from_slice(v_raw);
            Ok(EnumLayerValue::Float(f64::from_le_bytes(v_bytes)))
        }
        b'M' | b'B' | b'G' | b'P' => Ok(EnumLayerValue::Null),
        _ => {
            let text = decode_text(v_raw, encoding, true)?;
            let text = text.trim();
            if text.is_empty() {
                Ok(EnumLayerValue::Null)
            } else {
                Ok(EnumLayerValue::Text(text.to_string()))
            }
        }
    }
}

/// Read the field list only.
pub(crate) fn read_dbf_fields(
    path: &Path,
    options: &SpecReadOptions,
) -> Result<Vec<SpecFieldDescriptor>, LayerError> {
    let mut reader = open_dbf(path)?;
    let header = read_header(path, &mut reader, options.if_relaxed)?;
    Ok(header
        .fields
        .iter()
        .map(|field| SpecFieldDescriptor::new(field.name.clone()))
        .collect())
}

/// Read header and up to `options.n_rows_max` live records.
///
/// Strict mode fails when the file ends before the declared record count.
pub(crate) fn read_dbf_table(
    path: &Path,
    options: &SpecReadOptions,
) -> Result<SpecDbfTable, LayerError> {
    let mut reader = open_dbf(path)?;
    let header = read_header(path, &mut reader, options.if_relaxed)?;

    let mut records = Vec::new();
    let mut v_record = vec![0u8; header.n_len_record];
    for n_idx_record in 0..header.n_records {
        if options.n_rows_max.is_some_and(|n_max| records.len() >= n_max) {
            break;
        }
        match reader.read_exact(&mut v_record) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::UnexpectedEof && options.if_relaxed => break,
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
                return Err(LayerError::malformed(
                    "dBASE records",
                    format!(
                        "file ends at record {n_idx_record} of {}",
                        header.n_records
                    ),
                ));
            }
            Err(err) => return Err(LayerError::io(path, err)),
        }

        if v_record[0] == N_DBF_EOF_MARKER {
            break;
        }
        if v_record[0] == N_DBF_DELETED_FLAG {
            continue;
        }

        let mut values = Vec::with_capacity(header.fields.len());
        for field in &header.fields {
            let v_raw = &v_record[field.n_offset..field.n_offset + field.n_len];
            values.push(decode_field(field, v_raw, header.encoding, options.if_relaxed)?);
        }
        records.push(SpecDbfRecord {
            n_idx_record,
            values,
        });
    }

    Ok(SpecDbfTable { header, records })
}

impl SpecDbfTable {
    /// Feed records into a frame builder; `extra` supplies additional per-record cells.
    pub(crate) fn into_frame_builder<F>(self, mut extra: F) -> FrameBuilder
    where
        F: FnMut(usize) -> Vec<(String, EnumLayerValue)>,
    {
        let l_names: Vec<String> = self
            .header
            .fields
            .iter()
            .map(|field| field.name.clone())
            .collect();
        let mut builder = FrameBuilder::with_columns(l_names.iter().cloned());
        for record in self.records {
            let mut l_row: Vec<(String, EnumLayerValue)> =
                l_names.iter().cloned().zip(record.values).collect();
            l_row.extend(extra(record.n_idx_record));
            builder.push_row(l_row);
        }
        builder
    }
}

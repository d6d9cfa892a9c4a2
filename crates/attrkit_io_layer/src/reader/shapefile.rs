//! ESRI shapefile driver: `.shp` geometry records joined to the `.dbf` table.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};

use crate::conf::{
    C_COLUMN_GEOMETRY, C_EXT_DBF, C_EXT_SHX, N_SHP_FILE_CODE, N_SHP_HEADER_LEN, N_SHP_VERSION,
};
use crate::reader::dbf::{read_dbf_fields, read_dbf_table};
use crate::spec::{EnumLayerValue, LayerError, SpecFieldDescriptor, SpecLayerFrame, SpecReadOptions};
use crate::util::{derive_companion_path, derive_field_descriptors};

const N_LEN_SHP_RECORD_HEADER: usize = 8;

fn derive_shape_type_name(n_shape_type: i32) -> Option<&'static str> {
    let c_name = match n_shape_type {
        0 => "Null",
        1 => "Point",
        3 => "PolyLine",
        5 => "Polygon",
        8 => "MultiPoint",
        11 => "PointZ",
        13 => "PolyLineZ",
        15 => "PolygonZ",
        18 => "MultiPointZ",
        21 => "PointM",
        23 => "PolyLineM",
        25 => "PolygonM",
        28 => "MultiPointM",
        31 => "MultiPatch",
        _ => return None,
    };
    Some(c_name)
}

fn derive_dbf_path(path_shp: &Path) -> Result<PathBuf, LayerError> {
    derive_companion_path(path_shp, C_EXT_DBF)
        .ok_or_else(|| LayerError::MissingCompanion(path_shp.with_extension(C_EXT_DBF)))
}

/// Strict mode insists on the spatial index companion.
fn ensure_index_companion(path_shp: &Path, options: &SpecReadOptions) -> Result<(), LayerError> {
    if options.if_relaxed {
        return Ok(());
    }
    derive_companion_path(path_shp, C_EXT_SHX)
        .map(|_| ())
        .ok_or_else(|| LayerError::MissingCompanion(path_shp.with_extension(C_EXT_SHX)))
}

fn read_main_header(path_shp: &Path, reader: &mut impl Read) -> Result<i32, LayerError> {
    let mut v_header = [0u8; N_SHP_HEADER_LEN];
    reader
        .read_exact(&mut v_header)
        .map_err(|e| LayerError::io(path_shp, e))?;

    let n_file_code = i32::from_be_bytes([v_header[0], v_header[1], v_header[2], v_header[3]]);
    if n_file_code != N_SHP_FILE_CODE {
        return Err(LayerError::malformed(
            "shapefile header",
            format!("file code {n_file_code}, expected {N_SHP_FILE_CODE}"),
        ));
    }
    let n_version = i32::from_le_bytes([v_header[28], v_header[29], v_header[30], v_header[31]]);
    if n_version != N_SHP_VERSION {
        return Err(LayerError::malformed(
            "shapefile header",
            format!("version {n_version}, expected {N_SHP_VERSION}"),
        ));
    }
    Ok(i32::from_le_bytes([
        v_header[32],
        v_header[33],
        v_header[34],
        v_header[35],
    ]))
}

/// Shape-type name of each record, in file order, up to `n_records_max`.
fn read_geometry_kinds(
    path_shp: &Path,
    n_records_max: Option<usize>,
    if_relaxed: bool,
) -> Result<Vec<Option<&'static str>>, LayerError> {
    let file = File::open(path_shp).map_err(|e| LayerError::io(path_shp, e))?;
    let mut reader = BufReader::new(file);
    read_main_header(path_shp, &mut reader)?;

    let mut l_kinds = Vec::new();
    let mut v_record_header = [0u8; N_LEN_SHP_RECORD_HEADER];
    loop {
        if n_records_max.is_some_and(|n_max| l_kinds.len() >= n_max) {
            break;
        }
        match reader.read_exact(&mut v_record_header) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => break,
            Err(err) => return Err(LayerError::io(path_shp, err)),
        }
        let n_len_content = i32::from_be_bytes([
            v_record_header[4],
            v_record_header[5],
            v_record_header[6],
            v_record_header[7],
        ]);
        let n_len_content = usize::try_from(n_len_content).unwrap_or(0) * 2;
        if n_len_content < 4 {
            if if_relaxed {
                break;
            }
            return Err(LayerError::malformed(
                "shapefile record",
                format!("record {} has content length {n_len_content}", l_kinds.len() + 1),
            ));
        }

        let mut v_content = vec![0u8; n_len_content];
        match reader.read_exact(&mut v_content) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::UnexpectedEof && if_relaxed => break,
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
                return Err(LayerError::malformed(
                    "shapefile record",
                    format!("record {} is truncated", l_kinds.len() + 1),
                ));
            }
            Err(err) => return Err(LayerError::io(path_shp, err)),
        }

        let n_shape_type = i32::from_le_bytes([v_content[0], v_content[1], v_content[2], v_content[3]]);
        match derive_shape_type_name(n_shape_type) {
            Some("Null") => l_kinds.push(None),
            Some(c_name) => l_kinds.push(Some(c_name)),
            None if if_relaxed => l_kinds.push(None),
            None => {
                return Err(LayerError::malformed(
                    "shapefile record",
                    format!("unknown shape type {n_shape_type}"),
                ));
            }
        }
    }
    Ok(l_kinds)
}

/// Attribute schema of a shapefile.
pub(crate) fn read_shapefile_schema(
    path_shp: &Path,
    options: &SpecReadOptions,
) -> Result<Vec<SpecFieldDescriptor>, LayerError> {
    ensure_index_companion(path_shp, options)?;
    if !options.if_skip_geometry {
        let file = File::open(path_shp).map_err(|e| LayerError::io(path_shp, e))?;
        let n_shape_type = read_main_header(path_shp, &mut BufReader::new(file))?;
        if derive_shape_type_name(n_shape_type).is_none() && !options.if_relaxed {
            return Err(LayerError::malformed(
                "shapefile header",
                format!("unknown shape type {n_shape_type}"),
            ));
        }
    }
    read_dbf_fields(&derive_dbf_path(path_shp)?, options)
}

/// Rows of a shapefile; geometry becomes a shape-type label column.
pub(crate) fn read_shapefile_rows(
    path_shp: &Path,
    options: &SpecReadOptions,
) -> Result<SpecLayerFrame, LayerError> {
    ensure_index_companion(path_shp, options)?;
    let table = read_dbf_table(&derive_dbf_path(path_shp)?, options)?;
    let fields_known: Vec<SpecFieldDescriptor> = table
        .header
        .fields
        .iter()
        .map(|field| SpecFieldDescriptor::new(field.name.clone()))
        .collect();

    let builder = if options.if_skip_geometry {
        table.into_frame_builder(|_| Vec::new())
    } else {
        let n_records_needed = options
            .n_rows_max
            .map(|_| table.records.last().map_or(0, |record| record.n_idx_record + 1));
        let l_kinds = read_geometry_kinds(path_shp, n_records_needed, options.if_relaxed)?;
        if options.n_rows_max.is_none()
            && !options.if_relaxed
            && l_kinds.len() != table.header.n_records
        {
            return Err(LayerError::malformed(
                "shapefile",
                format!(
                    "{} geometry records but {} attribute records",
                    l_kinds.len(),
                    table.header.n_records
                ),
            ));
        }
        table.into_frame_builder(|n_idx_record| {
            let value = l_kinds
                .get(n_idx_record)
                .copied()
                .flatten()
                .map_or(EnumLayerValue::Null, |c_kind| {
                    EnumLayerValue::Text(c_kind.to_string())
                });
            vec![(C_COLUMN_GEOMETRY.to_string(), value)]
        })
    };

    let frame = builder.finish()?;
    let fields = derive_field_descriptors(&frame, &fields_known);
    Ok(SpecLayerFrame { frame, fields })
}

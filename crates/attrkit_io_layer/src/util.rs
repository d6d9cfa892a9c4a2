//! Stateless helpers shared by the native drivers.

use std::borrow::Cow;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use encoding_rs::Encoding;
use polars::prelude::{Column, DataFrame, NamedFrom, PlSmallStr, Series};

use crate::conf::C_COLUMN_GEOMETRY;
use crate::spec::{EnumLayerValue, LayerError, SpecFieldDescriptor};

////////////////////////////////////////////////////////////////////////////////
// #region FrameAssembly

/// Row-wise accumulator that infers one dtype per column on `finish`.
///
/// Columns keep first-seen order; rows missing a column get `Null`.
#[derive(Debug, Default)]
pub(crate) struct FrameBuilder {
    l_names: Vec<String>,
    dict_idx_by_name: HashMap<String, usize>,
    l_columns: Vec<Vec<EnumLayerValue>>,
    n_rows: usize,
}

impl FrameBuilder {
    /// Builder with pre-declared columns, so empty tables keep their schema.
    pub(crate) fn with_columns<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut builder = Self::default();
        for name in names {
            builder.ensure_column(name.into());
        }
        builder
    }

    pub(crate) fn n_rows(&self) -> usize {
        self.n_rows
    }

    fn ensure_column(&mut self, name: String) -> usize {
        if let Some(n_idx) = self.dict_idx_by_name.get(&name) {
            return *n_idx;
        }
        let n_idx = self.l_names.len();
        self.dict_idx_by_name.insert(name.clone(), n_idx);
        self.l_names.push(name);
        self.l_columns.push(vec![EnumLayerValue::Null; self.n_rows]);
        n_idx
    }

    /// Append one row of `(column, value)` pairs. Later duplicates win.
    pub(crate) fn push_row<I>(&mut self, row: I)
    where
        I: IntoIterator<Item = (String, EnumLayerValue)>,
    {
        for (name, value) in row {
            let n_idx = self.ensure_column(name);
            let col = &mut self.l_columns[n_idx];
            if col.len() > self.n_rows {
                col[self.n_rows] = value;
            } else {
                col.push(value);
            }
        }
        self.n_rows += 1;
        for col in &mut self.l_columns {
            if col.len() < self.n_rows {
                col.push(EnumLayerValue::Null);
            }
        }
    }

    /// Materialize into a typed `DataFrame`.
    pub(crate) fn finish(self) -> Result<DataFrame, LayerError> {
        let l_columns: Vec<Column> = self
            .l_names
            .into_iter()
            .zip(self.l_columns)
            .map(|(name, values)| derive_typed_column(&name, values))
            .collect();
        Ok(DataFrame::new(l_columns)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnumInferredType {
    Empty,
    Boolean,
    Integer,
    Float,
    Text,
}

fn infer_column_type(values: &[EnumLayerValue]) -> EnumInferredType {
    let mut inferred = EnumInferredType::Empty;
    for value in values {
        let current = match value {
            EnumLayerValue::Null => continue,
            EnumLayerValue::Boolean(_) => EnumInferredType::Boolean,
            EnumLayerValue::Integer(_) => EnumInferredType::Integer,
            EnumLayerValue::Float(_) => EnumInferredType::Float,
            EnumLayerValue::Text(_) => return EnumInferredType::Text,
        };
        inferred = match (inferred, current) {
            (EnumInferredType::Empty, other) => other,
            (prev, other) if prev == other => prev,
            (EnumInferredType::Integer, EnumInferredType::Float)
            | (EnumInferredType::Float, EnumInferredType::Integer) => EnumInferredType::Float,
            _ => return EnumInferredType::Text,
        };
    }
    inferred
}

fn derive_typed_column(name: &str, values: Vec<EnumLayerValue>) -> Column {
    let name = PlSmallStr::from(name);
    let series = match infer_column_type(&values) {
        EnumInferredType::Boolean => Series::new(
            name,
            values
                .into_iter()
                .map(|value| match value {
                    EnumLayerValue::Boolean(val) => Some(val),
                    _ => None,
                })
                .collect::<Vec<Option<bool>>>(),
        ),
        EnumInferredType::Integer => Series::new(
            name,
            values
                .into_iter()
                .map(|value| match value {
                    EnumLayerValue::Integer(val) => Some(val),
                    _ => None,
                })
                .collect::<Vec<Option<i64>>>(),
        ),
        EnumInferredType::Float => Series::new(
            name,
            values
                .into_iter()
                .map(|value| match value {
                    EnumLayerValue::Integer(val) => Some(val as f64),
                    EnumLayerValue::Float(val) => Some(val),
                    _ => None,
                })
                .collect::<Vec<Option<f64>>>(),
        ),
        EnumInferredType::Empty | EnumInferredType::Text => Series::new(
            name,
            values
                .into_iter()
                .map(convert_value_to_text)
                .collect::<Vec<Option<String>>>(),
        ),
    };
    Column::from(series)
}

/// Render a decoded value as text; `Null` stays missing.
pub(crate) fn convert_value_to_text(value: EnumLayerValue) -> Option<String> {
    match value {
        EnumLayerValue::Null => None,
        EnumLayerValue::Text(val) => Some(val),
        EnumLayerValue::Integer(val) => Some(val.to_string()),
        EnumLayerValue::Float(val) => Some(val.to_string()),
        EnumLayerValue::Boolean(val) => Some(val.to_string()),
    }
}

/// Field descriptors for every non-geometry column of `frame`.
///
/// Metadata (alias, domain) is taken from `fields_known` when names match.
pub fn derive_field_descriptors(
    frame: &DataFrame,
    fields_known: &[SpecFieldDescriptor],
) -> Vec<SpecFieldDescriptor> {
    frame
        .get_column_names_str()
        .into_iter()
        .filter(|name| *name != C_COLUMN_GEOMETRY)
        .map(|name| {
            fields_known
                .iter()
                .find(|field| field.name == name)
                .cloned()
                .unwrap_or_else(|| SpecFieldDescriptor::new(name))
        })
        .collect()
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Paths

/// Locate a companion file next to `path` with extension `ext`.
///
/// Tries the lowercase then the uppercase extension; `None` when neither exists.
pub fn derive_companion_path(path: &Path, ext: &str) -> Option<PathBuf> {
    [ext.to_ascii_lowercase(), ext.to_ascii_uppercase()]
        .into_iter()
        .map(|c_ext| path.with_extension(c_ext))
        .find(|path_candidate| path_candidate.is_file())
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region TextDecoding

/// Map a code page label (`.cpg` content, `CP936`, `65001`, ...) to an encoding.
pub fn derive_encoding_from_label(label: &str) -> Option<&'static Encoding> {
    let c_label = label.trim().to_ascii_lowercase();
    if c_label.is_empty() {
        return None;
    }

    let c_digits = c_label
        .trim_start_matches("windows-")
        .trim_start_matches("cp")
        .trim_start_matches("ansi ")
        .trim();
    let encoding_code_page = match c_digits {
        "65001" => Some(encoding_rs::UTF_8),
        "936" => Some(encoding_rs::GBK),
        "54936" => Some(encoding_rs::GB18030),
        "950" => Some(encoding_rs::BIG5),
        "932" => Some(encoding_rs::SHIFT_JIS),
        "949" => Some(encoding_rs::EUC_KR),
        "1250" => Some(encoding_rs::WINDOWS_1250),
        "1251" => Some(encoding_rs::WINDOWS_1251),
        "1252" => Some(encoding_rs::WINDOWS_1252),
        "1253" => Some(encoding_rs::WINDOWS_1253),
        "1254" => Some(encoding_rs::WINDOWS_1254),
        "1255" => Some(encoding_rs::WINDOWS_1255),
        "1256" => Some(encoding_rs::WINDOWS_1256),
        "874" => Some(encoding_rs::WINDOWS_874),
        _ => None,
    };

    encoding_code_page.or_else(|| Encoding::for_label(c_label.as_bytes()))
}

/// Map a dBASE language-driver byte to an encoding.
pub fn derive_encoding_from_ldid(n_ldid: u8) -> Option<&'static Encoding> {
    match n_ldid {
        0x4D | 0x7A => Some(encoding_rs::GBK),
        0x4F | 0x78 => Some(encoding_rs::BIG5),
        0x4E | 0x79 => Some(encoding_rs::EUC_KR),
        0x13 | 0x7B => Some(encoding_rs::SHIFT_JIS),
        0x03 | 0x57 | 0x58 | 0x59 => Some(encoding_rs::WINDOWS_1252),
        0xC8 => Some(encoding_rs::WINDOWS_1250),
        0xC9 => Some(encoding_rs::WINDOWS_1251),
        _ => None,
    }
}

/// Decode bytes; strict mode refuses malformed sequences, relaxed mode replaces them.
pub fn decode_text<'a>(
    bytes: &'a [u8],
    encoding: &'static Encoding,
    if_relaxed: bool,
) -> Result<Cow<'a, str>, LayerError> {
    if if_relaxed {
        return Ok(encoding.decode_without_bom_handling(bytes).0);
    }
    encoding
        .decode_without_bom_handling_and_without_replacement(bytes)
        .ok_or_else(|| {
            LayerError::malformed(
                "text",
                format!("byte sequence is not valid {}", encoding.name()),
            )
        })
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

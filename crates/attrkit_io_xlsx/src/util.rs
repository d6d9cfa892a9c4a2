//! Stateless helper utilities used by the XLSX writer kernel.

use std::collections::{BTreeMap, BTreeSet};

use polars::prelude::AnyValue;

use crate::conf::{
    C_SHEET_NAME_DEFAULT, N_LEN_EXCEL_SHEET_NAME_MAX, N_LEN_EXCEL_STRING_MAX, TUP_EXCEL_ILLEGAL,
};
use crate::spec::{CellWriteError, EnumCellValue, WriteError};

////////////////////////////////////////////////////////////////////////////////
// #region CellValueConversion

/// Map a polars cell onto the writer's value model.
///
/// Text stays text; numbers and booleans keep their native type; other types
/// (dates, nested values) fall back to their display text.
pub fn derive_cell_value_from_any_value(value: AnyValue<'_>) -> EnumCellValue {
    match value {
        AnyValue::Null => EnumCellValue::None,
        AnyValue::String(val) => EnumCellValue::String(val.to_string()),
        AnyValue::StringOwned(val) => EnumCellValue::String(val.to_string()),
        AnyValue::Boolean(val) => EnumCellValue::Boolean(val),
        AnyValue::UInt8(val) => EnumCellValue::Number(val as f64),
        AnyValue::UInt16(val) => EnumCellValue::Number(val as f64),
        AnyValue::UInt32(val) => EnumCellValue::Number(val as f64),
        AnyValue::UInt64(val) => EnumCellValue::Number(val as f64),
        AnyValue::Int8(val) => EnumCellValue::Number(val as f64),
        AnyValue::Int16(val) => EnumCellValue::Number(val as f64),
        AnyValue::Int32(val) => EnumCellValue::Number(val as f64),
        AnyValue::Int64(val) => EnumCellValue::Number(val as f64),
        AnyValue::Float32(val) => EnumCellValue::Number(val as f64),
        AnyValue::Float64(val) => EnumCellValue::Number(val),
        _ => EnumCellValue::String(value.to_string()),
    }
}

/// Text form used to look a value up in a coded-value domain.
pub fn derive_domain_key(value: &EnumCellValue) -> Option<String> {
    match value {
        EnumCellValue::None => None,
        EnumCellValue::String(val) => Some(val.clone()),
        EnumCellValue::Number(val) if val.is_finite() && val.fract() == 0.0 => {
            Some((*val as i64).to_string())
        }
        EnumCellValue::Number(val) => Some(val.to_string()),
        EnumCellValue::Boolean(val) => Some(val.to_string()),
    }
}

/// Replace a coded value by its description; unmatched values pass through.
pub fn apply_domain(value: EnumCellValue, domain: &BTreeMap<String, String>) -> EnumCellValue {
    match derive_domain_key(&value).and_then(|key| domain.get(&key)) {
        Some(description) => EnumCellValue::String(description.clone()),
        None => value,
    }
}

/// Reject values the encoder cannot store.
pub fn validate_cell_value(value: &EnumCellValue) -> Result<(), CellWriteError> {
    match value {
        EnumCellValue::Number(val) if !val.is_finite() => Err(CellWriteError::NonFinite(*val)),
        EnumCellValue::String(val) => {
            let n_chars = val.chars().count();
            if n_chars > N_LEN_EXCEL_STRING_MAX {
                return Err(CellWriteError::TextTooLong { n_chars });
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ColumnUtils

/// Validate that `columns` has no duplicated names.
pub fn validate_unique_columns(columns: &[String]) -> Result<(), String> {
    if columns.len() == columns.iter().collect::<BTreeSet<_>>().len() {
        return Ok(());
    }

    let mut dict_pos: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (n_idx, c_name) in columns.iter().enumerate() {
        dict_pos.entry(c_name).or_default().push(n_idx);
    }

    let c_msg = dict_pos
        .iter()
        .filter(|(_, l_pos)| l_pos.len() > 1)
        .map(|(c_name, l_pos)| format!("{c_name:?} x{} at indices {:?}", l_pos.len(), l_pos))
        .collect::<Vec<_>>()
        .join("; ");

    Err(format!("Duplicate column names detected: {c_msg}"))
}

/// Display width for a column: `min(chars(header) * per_char, max)`.
pub fn derive_column_width(header_text: &str, width_per_char: f64, width_max: f64) -> f64 {
    f64::min(header_text.chars().count() as f64 * width_per_char, width_max)
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region RowChunking

/// Generate `(row_start, row_len)` chunks for `n_rows_total`.
pub fn generate_row_chunks(n_rows_total: usize, size_rows_chunk: usize) -> Vec<(usize, usize)> {
    let mut l_chunks = Vec::new();
    let mut n_row_cursor = 0;
    while n_row_cursor < n_rows_total {
        let n_rows_per_chunk = usize::min(size_rows_chunk, n_rows_total - n_row_cursor);
        l_chunks.push((n_row_cursor, n_rows_per_chunk));
        n_row_cursor += n_rows_per_chunk;
    }
    l_chunks
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region SheetNormalization

/// Replace invalid chars and trim to a valid Excel sheet name.
///
/// Blank names become [`C_SHEET_NAME_DEFAULT`].
pub fn sanitize_sheet_name(name: &str, replace_to: &str) -> String {
    let mut c_name = name.to_string();
    for c_illegal in TUP_EXCEL_ILLEGAL {
        c_name = c_name.replace(c_illegal, replace_to);
    }
    c_name = c_name.trim().to_string();
    if c_name.is_empty() {
        c_name = C_SHEET_NAME_DEFAULT.to_string();
    }

    c_name.chars().take(N_LEN_EXCEL_SHEET_NAME_MAX).collect()
}

pub(crate) fn cast_row_num(value: usize) -> Result<u32, WriteError> {
    u32::try_from(value).map_err(|_| WriteError::Encoder(format!("row index overflow: {value}")))
}

pub(crate) fn cast_col_num(value: usize) -> Result<u16, WriteError> {
    u16::try_from(value)
        .map_err(|_| WriteError::Encoder(format!("column index overflow: {value}")))
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_sheet_name_defaults_and_truncates() {
        assert_eq!(sanitize_sheet_name("   ", "_"), "Sheet1");
        assert_eq!(sanitize_sheet_name("a/b:c", "_"), "a_b_c");
        assert_eq!(sanitize_sheet_name(&"长".repeat(40), "_").chars().count(), 31);
    }

    #[test]
    fn test_generate_row_chunks_covers_all_rows() {
        assert!(generate_row_chunks(0, 1_000).is_empty());
        assert_eq!(
            generate_row_chunks(2_500, 1_000),
            vec![(0, 1_000), (1_000, 1_000), (2_000, 500)]
        );
    }

    #[test]
    fn test_column_width_scales_and_caps() {
        assert_eq!(derive_column_width("name", 1.5, 50.0), 6.0);
        assert_eq!(derive_column_width("名称", 1.5, 50.0), 3.0);
        assert_eq!(derive_column_width(&"x".repeat(60), 1.5, 50.0), 50.0);
    }

    #[test]
    fn test_domain_lookup_uses_integer_text_for_whole_numbers() {
        let dict_domain = BTreeMap::from([
            ("1".to_string(), "Residential".to_string()),
            ("H".to_string(), "Highway".to_string()),
        ]);
        assert_eq!(
            apply_domain(EnumCellValue::Number(1.0), &dict_domain),
            EnumCellValue::String("Residential".to_string())
        );
        assert_eq!(
            apply_domain(EnumCellValue::String("H".to_string()), &dict_domain),
            EnumCellValue::String("Highway".to_string())
        );
        assert_eq!(
            apply_domain(EnumCellValue::Number(2.5), &dict_domain),
            EnumCellValue::Number(2.5)
        );
        assert_eq!(apply_domain(EnumCellValue::None, &dict_domain), EnumCellValue::None);
    }

    #[test]
    fn test_validate_cell_value_rejects_unstorable_values() {
        assert!(validate_cell_value(&EnumCellValue::Number(f64::NAN)).is_err());
        assert!(validate_cell_value(&EnumCellValue::Number(f64::NEG_INFINITY)).is_err());
        assert_eq!(
            validate_cell_value(&EnumCellValue::String("é".repeat(N_LEN_EXCEL_STRING_MAX + 1))),
            Err(CellWriteError::TextTooLong {
                n_chars: N_LEN_EXCEL_STRING_MAX + 1
            })
        );
        assert!(validate_cell_value(&EnumCellValue::String("ok".to_string())).is_ok());
    }

    #[test]
    fn test_validate_unique_columns_reports_duplicates() {
        let l_cols = vec!["a".to_string(), "b".to_string(), "a".to_string()];
        let err = validate_unique_columns(&l_cols).unwrap_err();
        assert!(err.contains("\"a\" x2"));
    }
}

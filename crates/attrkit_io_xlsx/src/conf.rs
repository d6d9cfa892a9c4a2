//! XLSX constants and default preset factories.

use crate::spec::{SpecCellFormat, SpecXlsxWriteOptions};

/// Excel worksheet maximum row count (header included).
pub const N_NROWS_EXCEL_MAX: usize = 1_048_576;
/// Excel worksheet maximum column count.
pub const N_NCOLS_EXCEL_MAX: usize = 16_384;
/// Excel sheet name maximum length.
pub const N_LEN_EXCEL_SHEET_NAME_MAX: usize = 31;
/// Excel cell text maximum length in characters.
pub const N_LEN_EXCEL_STRING_MAX: usize = 32_767;
/// Characters not allowed in sheet names.
pub const TUP_EXCEL_ILLEGAL: [&str; 7] = ["*", ":", "?", "/", "\\", "[", "]"];

/// Sheet name used when the requested one is blank.
pub const C_SHEET_NAME_DEFAULT: &str = "Sheet1";
/// Rows converted and written per batch.
pub const N_ROWS_BATCH: usize = 1_000;
/// Column width units per header character.
pub const N_WIDTH_PER_CHAR: f64 = 1.5;
/// Column width cap.
pub const N_WIDTH_MAX: f64 = 50.0;

/// Header preset: bold, grey fill, thin border, centered both ways.
pub fn derive_default_header_format() -> SpecCellFormat {
    derive_base_cell_format().with_(SpecCellFormat {
        bold: Some(true),
        align: Some("center".to_string()),
        bg_color: Some("#D9D9D9".to_string()),
        ..Default::default()
    })
}

/// Data preset: thin border, left aligned, vertically centered.
pub fn derive_default_data_format() -> SpecCellFormat {
    derive_base_cell_format().with_(SpecCellFormat {
        align: Some("left".to_string()),
        ..Default::default()
    })
}

fn derive_base_cell_format() -> SpecCellFormat {
    SpecCellFormat {
        border: Some(1),
        valign: Some("vcenter".to_string()),
        ..Default::default()
    }
}

/// Build default write options.
pub fn derive_default_xlsx_write_options() -> SpecXlsxWriteOptions {
    SpecXlsxWriteOptions::default()
}

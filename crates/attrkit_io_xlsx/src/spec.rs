//! Shared XLSX specification models.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::conf::{
    N_ROWS_BATCH, N_WIDTH_MAX, N_WIDTH_PER_CHAR, derive_default_data_format,
    derive_default_header_format,
};

////////////////////////////////////////////////////////////////////////////////
// #region CellFormatSpecification

/// Cell format specification; `None` leaves the encoder default.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SpecCellFormat {
    /// Bold style.
    pub bold: Option<bool>,

    /// Horizontal alignment.
    pub align: Option<String>,
    /// Vertical alignment.
    pub valign: Option<String>,
    /// Border style for all sides.
    pub border: Option<i64>,

    /// Background fill color.
    pub bg_color: Option<String>,
}

impl SpecCellFormat {
    /// Return a new format by overlaying `patch` onto `self`.
    pub fn with_(&self, patch: SpecCellFormat) -> SpecCellFormat {
        self.merge(&patch)
    }

    /// Merge two formats with right-side non-`None` overwrite semantics.
    pub fn merge(&self, other: &SpecCellFormat) -> SpecCellFormat {
        SpecCellFormat {
            bold: other.bold.or(self.bold),
            align: other.align.clone().or_else(|| self.align.clone()),
            valign: other.valign.clone().or_else(|| self.valign.clone()),
            border: other.border.or(self.border),
            bg_color: other.bg_color.clone().or_else(|| self.bg_color.clone()),
        }
    }
}

/// Normalized cell value during conversion/write pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum EnumCellValue {
    /// Missing/blank value.
    None,
    /// Text value, written verbatim.
    String(String),
    /// Numeric value.
    Number(f64),
    /// Boolean value.
    Boolean(bool),
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region WriteOptions

/// Writer options controlling batching, sizing and formats.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecXlsxWriteOptions {
    /// Rows converted and written per batch; one progress event per batch.
    pub n_rows_batch: usize,
    /// Column width units per header character.
    pub width_per_char: f64,
    /// Column width cap.
    pub width_max: f64,
    /// Stream rows to disk instead of buffering the worksheet.
    pub if_constant_memory: bool,
    /// Header row format.
    pub fmt_header: SpecCellFormat,
    /// Data cell format.
    pub fmt_data: SpecCellFormat,
}

impl Default for SpecXlsxWriteOptions {
    fn default() -> Self {
        Self {
            n_rows_batch: N_ROWS_BATCH,
            width_per_char: N_WIDTH_PER_CHAR,
            width_max: N_WIDTH_MAX,
            if_constant_memory: true,
            fmt_header: derive_default_header_format(),
            fmt_data: derive_default_data_format(),
        }
    }
}

/// One output column: source column, header text and optional coded-value domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecSheetColumn {
    /// Source column name in the frame.
    pub name: String,
    /// Header cell text (name or alias).
    pub header_text: String,
    /// `code -> description` substitutions for data cells.
    pub domain: Option<BTreeMap<String, String>>,
}

impl SpecSheetColumn {
    /// Column whose header is its own name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            header_text: name.clone(),
            name,
            domain: None,
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ReportSpecification

/// Cumulative progress after one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecWriteProgress {
    /// Data rows written so far.
    pub n_rows_written: usize,
    /// Data rows in the table.
    pub n_rows_total: usize,
}

/// Per-write call report.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecWriteReport {
    /// Data rows written (header excluded).
    pub n_rows_written: usize,
    /// Cells that failed and were replaced by a blank placeholder.
    pub n_cells_recovered: usize,
    /// Non-fatal warnings.
    pub warnings: Vec<String>,
}

impl SpecWriteReport {
    /// Add a warning message.
    pub fn warn(&mut self, msg: impl AsRef<str>) {
        self.warnings.push(msg.as_ref().to_string());
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Errors

/// Failure of one data cell. Always absorbed by the writer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CellWriteError {
    #[error("cell value could not be read: {0}")]
    Read(String),

    #[error("non-finite number {0} cannot be stored")]
    NonFinite(f64),

    #[error("text of {n_chars} characters exceeds the cell limit")]
    TextTooLong { n_chars: usize },

    #[error("encoder rejected cell: {0}")]
    Encoder(String),
}

/// Spreadsheet write failure not recoverable at cell level.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WriteError {
    #[error("Invalid write options: {0}")]
    InvalidOptions(String),

    #[error("Invalid output columns: {0}")]
    InvalidColumns(String),

    #[error("Column not found in table: {0:?}")]
    ColumnNotFound(String),

    #[error("Excel limit exceeded: {n_found} {what} (max {n_max})")]
    ExcelLimit {
        what: &'static str,
        n_found: usize,
        n_max: usize,
    },

    #[error("Spreadsheet encoding failed: {0}")]
    Encoder(String),

    #[error("Failed to finalize workbook: {0}")]
    Close(String),
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

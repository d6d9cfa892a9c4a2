//! `attrkit_io_xlsx`:
//! Streaming single-sheet XLSX writer for attribute tables.
//!
//! - `conf`   : constants and default presets
//! - `spec`   : specs/models/options and error types
//! - `util`   : pure helper functions
//! - `sink`   : sheet encoder seam and its `rust_xlsxwriter` implementation
//! - `writer` : batched writer kernel
pub mod conf;
pub mod sink;
pub mod spec;
pub mod util;
pub mod writer;

pub use conf::{
    N_LEN_EXCEL_SHEET_NAME_MAX, N_NCOLS_EXCEL_MAX, N_NROWS_EXCEL_MAX, N_ROWS_BATCH,
    TUP_EXCEL_ILLEGAL, derive_default_xlsx_write_options,
};
pub use sink::{SheetSink, XlsxSheetSink};
pub use spec::{
    CellWriteError, EnumCellValue, SpecCellFormat, SpecSheetColumn, SpecWriteProgress,
    SpecWriteReport, SpecXlsxWriteOptions, WriteError,
};
pub use util::{derive_column_width, sanitize_sheet_name};
pub use writer::{write_spreadsheet, write_spreadsheet_with_sink};

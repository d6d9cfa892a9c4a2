//! Sheet encoder seam and its `rust_xlsxwriter` implementation.

use std::path::{Path, PathBuf};

use rust_xlsxwriter::{Format, FormatAlign, FormatBorder, Workbook, Worksheet, XlsxError};
use tracing::debug;

use crate::spec::{CellWriteError, SpecCellFormat, SpecXlsxWriteOptions, WriteError};

/// Single-sheet cell sink used by the streaming writer.
///
/// Rows arrive in ascending order. Data-cell methods fail per cell; header,
/// width and close failures are sheet-level.
pub trait SheetSink {
    /// Write header text at row 0.
    fn write_header_cell(&mut self, col: u16, text: &str) -> Result<(), WriteError>;
    fn write_string(&mut self, row: u32, col: u16, text: &str) -> Result<(), CellWriteError>;
    fn write_number(&mut self, row: u32, col: u16, value: f64) -> Result<(), CellWriteError>;
    fn write_boolean(&mut self, row: u32, col: u16, value: bool) -> Result<(), CellWriteError>;
    /// Styled empty cell.
    fn write_blank(&mut self, row: u32, col: u16) -> Result<(), CellWriteError>;
    fn set_column_width(&mut self, col: u16, width: f64) -> Result<(), WriteError>;
    /// Finalize the output. Must be safe to call more than once.
    fn close(&mut self) -> Result<(), WriteError>;
}

/// XLSX workbook with one worksheet, saved to `path_file_out` on close.
pub struct XlsxSheetSink {
    path_file_out: PathBuf,
    workbook: Workbook,
    fmt_header: Format,
    fmt_data: Format,
    if_closed: bool,
}

impl XlsxSheetSink {
    /// Create the workbook and its single named worksheet.
    ///
    /// Nothing touches `path_file_out` until [`SheetSink::close`].
    pub fn create(
        path_file_out: &Path,
        sheet_name: &str,
        options: &SpecXlsxWriteOptions,
    ) -> Result<Self, WriteError> {
        let mut workbook = Workbook::new();
        let worksheet = if options.if_constant_memory {
            workbook.add_worksheet_with_constant_memory()
        } else {
            workbook.add_worksheet()
        };
        worksheet
            .set_name(sheet_name)
            .map_err(|err| WriteError::Encoder(derive_xlsx_error_text(err)))?;

        Ok(Self {
            path_file_out: path_file_out.to_path_buf(),
            workbook,
            fmt_header: derive_rust_xlsx_format(&options.fmt_header),
            fmt_data: derive_rust_xlsx_format(&options.fmt_data),
            if_closed: false,
        })
    }

    fn worksheet(&mut self) -> Result<&mut Worksheet, XlsxError> {
        self.workbook.worksheet_from_index(0)
    }

    fn write_data_cell<F>(&mut self, write: F) -> Result<(), CellWriteError>
    where
        F: FnOnce(&mut Worksheet, &Format) -> Result<(), XlsxError>,
    {
        let Self {
            workbook, fmt_data, ..
        } = self;
        workbook
            .worksheet_from_index(0)
            .and_then(|worksheet| write(worksheet, fmt_data))
            .map_err(|err| CellWriteError::Encoder(derive_xlsx_error_text(err)))
    }
}

impl SheetSink for XlsxSheetSink {
    fn write_header_cell(&mut self, col: u16, text: &str) -> Result<(), WriteError> {
        let Self {
            workbook,
            fmt_header,
            ..
        } = self;
        workbook
            .worksheet_from_index(0)
            .and_then(|worksheet| {
                worksheet
                    .write_string_with_format(0, col, text, fmt_header)
                    .map(|_| ())
            })
            .map_err(|err| WriteError::Encoder(derive_xlsx_error_text(err)))
    }

    fn write_string(&mut self, row: u32, col: u16, text: &str) -> Result<(), CellWriteError> {
        self.write_data_cell(|worksheet, format| {
            worksheet
                .write_string_with_format(row, col, text, format)
                .map(|_| ())
        })
    }

    fn write_number(&mut self, row: u32, col: u16, value: f64) -> Result<(), CellWriteError> {
        self.write_data_cell(|worksheet, format| {
            worksheet
                .write_number_with_format(row, col, value, format)
                .map(|_| ())
        })
    }

    fn write_boolean(&mut self, row: u32, col: u16, value: bool) -> Result<(), CellWriteError> {
        self.write_data_cell(|worksheet, format| {
            worksheet
                .write_boolean_with_format(row, col, value, format)
                .map(|_| ())
        })
    }

    fn write_blank(&mut self, row: u32, col: u16) -> Result<(), CellWriteError> {
        self.write_data_cell(|worksheet, format| worksheet.write_blank(row, col, format).map(|_| ()))
    }

    fn set_column_width(&mut self, col: u16, width: f64) -> Result<(), WriteError> {
        self.worksheet()
            .and_then(|worksheet| worksheet.set_column_width(col, width).map(|_| ()))
            .map_err(|err| WriteError::Encoder(derive_xlsx_error_text(err)))
    }

    fn close(&mut self) -> Result<(), WriteError> {
        if self.if_closed {
            return Ok(());
        }
        self.if_closed = true;
        debug!(path = %self.path_file_out.display(), "saving workbook");
        self.workbook
            .save(&self.path_file_out)
            .map_err(|err| WriteError::Close(derive_xlsx_error_text(err)))
    }
}

pub(crate) fn derive_rust_xlsx_format(spec: &SpecCellFormat) -> Format {
    let mut format = Format::new();

    if spec.bold.unwrap_or(false) {
        format = format.set_bold();
    }

    if let Some(val) = &spec.align
        && let Some(align) = derive_format_align(val)
    {
        format = format.set_align(align);
    }
    if let Some(val) = &spec.valign
        && let Some(align) = derive_format_align(val)
    {
        format = format.set_align(align);
    }

    if let Some(val) = &spec.bg_color {
        format = format.set_background_color(val.as_str());
    }
    if let Some(val) = spec.border {
        format = format.set_border(derive_format_border(val));
    }

    format
}

fn derive_format_border(border: i64) -> FormatBorder {
    match border {
        1 => FormatBorder::Thin,
        2 => FormatBorder::Medium,
        3 => FormatBorder::Dashed,
        4 => FormatBorder::Dotted,
        5 => FormatBorder::Thick,
        6 => FormatBorder::Double,
        7 => FormatBorder::Hair,
        _ => FormatBorder::None,
    }
}

fn derive_format_align(align: &str) -> Option<FormatAlign> {
    let value = align.trim().to_ascii_lowercase();
    match value.as_str() {
        "general" => Some(FormatAlign::General),
        "left" => Some(FormatAlign::Left),
        "center" => Some(FormatAlign::Center),
        "right" => Some(FormatAlign::Right),
        "top" => Some(FormatAlign::Top),
        "bottom" => Some(FormatAlign::Bottom),
        "vcenter" | "vertical_center" => Some(FormatAlign::VerticalCenter),
        _ => None,
    }
}

pub(crate) fn derive_xlsx_error_text(err: XlsxError) -> String {
    format!("xlsx write error: {err}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conf::derive_default_xlsx_write_options;

    #[test]
    fn close_is_idempotent_and_creates_file_only_on_close() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("out.xlsx");
        let mut sink =
            XlsxSheetSink::create(&path, "Data", &derive_default_xlsx_write_options()).expect("sink");
        sink.write_header_cell(0, "名称").expect("header");
        sink.write_string(1, 0, "北京").expect("cell");
        assert!(!path.exists());

        sink.close().expect("close");
        assert!(path.exists());
        sink.close().expect("second close");
    }

    #[test]
    fn default_presets_map_to_header_and_data_formats() {
        let options = derive_default_xlsx_write_options();
        assert_eq!(
            derive_rust_xlsx_format(&options.fmt_header),
            Format::new()
                .set_bold()
                .set_align(FormatAlign::Center)
                .set_align(FormatAlign::VerticalCenter)
                .set_background_color("#D9D9D9")
                .set_border(FormatBorder::Thin)
        );
        assert_eq!(
            derive_rust_xlsx_format(&options.fmt_data),
            Format::new()
                .set_align(FormatAlign::Left)
                .set_align(FormatAlign::VerticalCenter)
                .set_border(FormatBorder::Thin)
        );
    }

    #[test]
    fn invalid_sheet_name_is_rejected() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let result = XlsxSheetSink::create(
            &tmp.path().join("x.xlsx"),
            "bad[name]",
            &derive_default_xlsx_write_options(),
        );
        assert!(matches!(result, Err(WriteError::Encoder(_))));
    }
}

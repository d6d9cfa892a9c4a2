//! Streaming spreadsheet writer: header row, batched data rows, column sizing.

use std::path::Path;

use polars::prelude::{Column, DataFrame};
use tracing::{debug, info, warn};

use crate::conf::{N_NCOLS_EXCEL_MAX, N_NROWS_EXCEL_MAX};
use crate::sink::{SheetSink, XlsxSheetSink};
use crate::spec::{
    CellWriteError, EnumCellValue, SpecSheetColumn, SpecWriteProgress, SpecWriteReport,
    SpecXlsxWriteOptions, WriteError,
};
use crate::util::{
    apply_domain, cast_col_num, cast_row_num, derive_cell_value_from_any_value,
    derive_column_width, generate_row_chunks, sanitize_sheet_name, validate_cell_value,
    validate_unique_columns,
};

/// Write `columns` of `df` to a single-sheet XLSX file at `path_file_out`.
///
/// Row 0 holds the styled header; data rows follow in batches of
/// `options.n_rows_batch`, with one `on_progress` call per batch. A cell that
/// cannot be written becomes a blank placeholder and is counted in the report.
/// The workbook is closed on every exit path; a close failure after an earlier
/// failure is logged and the earlier failure is returned.
///
/// # Errors
/// [`WriteError`] for invalid columns or options, Excel limits (checked before
/// the output is created), sheet-level encoder failures and close failures.
pub fn write_spreadsheet(
    df: &DataFrame,
    columns: &[SpecSheetColumn],
    sheet_name: &str,
    path_file_out: &Path,
    options: &SpecXlsxWriteOptions,
    on_progress: &mut dyn FnMut(SpecWriteProgress),
) -> Result<SpecWriteReport, WriteError> {
    let l_cols = validate_write_request(df, columns, options)?;
    let c_sheet_name = sanitize_sheet_name(sheet_name, "_");
    let mut sink = XlsxSheetSink::create(path_file_out, &c_sheet_name, options)?;
    let result = write_sheet_body(&mut sink, &l_cols, columns, options, on_progress);
    let report = close_after(&mut sink, result)?;
    info!(
        path = %path_file_out.display(),
        sheet = %c_sheet_name,
        n_rows = report.n_rows_written,
        n_cells_recovered = report.n_cells_recovered,
        "spreadsheet written"
    );
    Ok(report)
}

/// Same pipeline over any [`SheetSink`]; `sink` is closed before returning.
pub fn write_spreadsheet_with_sink<S: SheetSink + ?Sized>(
    sink: &mut S,
    df: &DataFrame,
    columns: &[SpecSheetColumn],
    options: &SpecXlsxWriteOptions,
    on_progress: &mut dyn FnMut(SpecWriteProgress),
) -> Result<SpecWriteReport, WriteError> {
    let result = validate_write_request(df, columns, options)
        .and_then(|l_cols| write_sheet_body(sink, &l_cols, columns, options, on_progress));
    close_after(sink, result)
}

/// Close `sink`; an earlier failure wins over a close failure.
fn close_after<S: SheetSink + ?Sized>(
    sink: &mut S,
    result: Result<SpecWriteReport, WriteError>,
) -> Result<SpecWriteReport, WriteError> {
    let result_close = sink.close();
    match (result, result_close) {
        (Ok(report), Ok(())) => Ok(report),
        (Ok(_), Err(err_close)) => Err(err_close),
        (Err(err), Err(err_close)) => {
            warn!(error = %err_close, "closing workbook after failure also failed");
            Err(err)
        }
        (Err(err), Ok(())) => Err(err),
    }
}

/// Resolve output columns and check limits before anything is created.
fn validate_write_request<'a>(
    df: &'a DataFrame,
    columns: &[SpecSheetColumn],
    options: &SpecXlsxWriteOptions,
) -> Result<Vec<&'a Column>, WriteError> {
    if options.n_rows_batch == 0 {
        return Err(WriteError::InvalidOptions(
            "n_rows_batch must be >= 1.".to_string(),
        ));
    }
    if columns.is_empty() {
        return Err(WriteError::InvalidColumns("no output columns".to_string()));
    }
    let l_names: Vec<String> = columns.iter().map(|column| column.name.clone()).collect();
    validate_unique_columns(&l_names).map_err(WriteError::InvalidColumns)?;

    if columns.len() > N_NCOLS_EXCEL_MAX {
        return Err(WriteError::ExcelLimit {
            what: "columns",
            n_found: columns.len(),
            n_max: N_NCOLS_EXCEL_MAX,
        });
    }
    if df.height() > N_NROWS_EXCEL_MAX - 1 {
        return Err(WriteError::ExcelLimit {
            what: "data rows",
            n_found: df.height(),
            n_max: N_NROWS_EXCEL_MAX - 1,
        });
    }

    columns
        .iter()
        .map(|column| {
            df.column(&column.name)
                .map_err(|_| WriteError::ColumnNotFound(column.name.clone()))
        })
        .collect()
}

fn write_sheet_body<S: SheetSink + ?Sized>(
    sink: &mut S,
    l_cols: &[&Column],
    columns: &[SpecSheetColumn],
    options: &SpecXlsxWriteOptions,
    on_progress: &mut dyn FnMut(SpecWriteProgress),
) -> Result<SpecWriteReport, WriteError> {
    let mut report = SpecWriteReport::default();

    for (n_idx_col, column) in columns.iter().enumerate() {
        sink.write_header_cell(cast_col_num(n_idx_col)?, &column.header_text)?;
    }

    let n_rows_total = l_cols.first().map_or(0, |col| col.len());
    for (n_row_start, n_rows_chunk_len) in generate_row_chunks(n_rows_total, options.n_rows_batch) {
        let l_batch: Vec<Column> = l_cols
            .iter()
            .map(|col| col.slice(n_row_start as i64, n_rows_chunk_len))
            .collect();

        for n_row_local in 0..n_rows_chunk_len {
            let n_row_out = cast_row_num(1 + n_row_start + n_row_local)?;
            for (n_idx_col, (col, column)) in l_batch.iter().zip(columns).enumerate() {
                let n_col_out = cast_col_num(n_idx_col)?;
                let result = derive_output_value(col, n_row_local, column)
                    .and_then(|value| write_cell(sink, n_row_out, n_col_out, &value));
                if let Err(err) = result {
                    debug!(row = n_row_out, col = n_col_out, error = %err, "cell write failed");
                    report.n_cells_recovered += 1;
                    if let Err(err_blank) = sink.write_blank(n_row_out, n_col_out) {
                        debug!(row = n_row_out, col = n_col_out, error = %err_blank, "placeholder write failed");
                    }
                }
            }
        }

        drop(l_batch);
        report.n_rows_written += n_rows_chunk_len;
        on_progress(SpecWriteProgress {
            n_rows_written: report.n_rows_written,
            n_rows_total,
        });
    }

    for (n_idx_col, column) in columns.iter().enumerate() {
        let n_width = derive_column_width(&column.header_text, options.width_per_char, options.width_max);
        if let Err(err) = sink.set_column_width(cast_col_num(n_idx_col)?, n_width) {
            warn!(column = %column.name, error = %err, "column width not applied");
            report.warn(format!("column width not applied for {:?}", column.name));
        }
    }

    if report.n_cells_recovered > 0 {
        warn!(
            n_cells = report.n_cells_recovered,
            "cells could not be written and were left empty"
        );
        report.warn(format!(
            "{} cells could not be written and were left empty",
            report.n_cells_recovered
        ));
    }

    Ok(report)
}

fn derive_output_value(
    col: &Column,
    n_row: usize,
    column: &SpecSheetColumn,
) -> Result<EnumCellValue, CellWriteError> {
    let value_raw = col
        .get(n_row)
        .map_err(|err| CellWriteError::Read(err.to_string()))?;
    let value = derive_cell_value_from_any_value(value_raw);
    Ok(match &column.domain {
        Some(dict_domain) => apply_domain(value, dict_domain),
        None => value,
    })
}

fn write_cell<S: SheetSink + ?Sized>(
    sink: &mut S,
    row: u32,
    col: u16,
    value: &EnumCellValue,
) -> Result<(), CellWriteError> {
    validate_cell_value(value)?;
    match value {
        EnumCellValue::None => sink.write_blank(row, col),
        EnumCellValue::String(val) => sink.write_string(row, col, val),
        EnumCellValue::Number(val) => sink.write_number(row, col, *val),
        EnumCellValue::Boolean(val) => sink.write_boolean(row, col, *val),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use calamine::{Data, Reader, Xlsx, open_workbook};
    use polars::prelude::Column;

    use super::*;
    use crate::conf::derive_default_xlsx_write_options;

    /// In-memory sink with optional failure injection.
    #[derive(Default)]
    struct MemorySink {
        l_header: Vec<String>,
        dict_cells: BTreeMap<(u32, u16), EnumCellValue>,
        dict_widths: BTreeMap<u16, f64>,
        cell_fail_at: Option<(u32, u16)>,
        if_fail_header: bool,
        if_fail_close: bool,
        n_close_calls: usize,
    }

    impl SheetSink for MemorySink {
        fn write_header_cell(&mut self, _col: u16, text: &str) -> Result<(), WriteError> {
            if self.if_fail_header {
                return Err(WriteError::Encoder("header rejected".to_string()));
            }
            self.l_header.push(text.to_string());
            Ok(())
        }

        fn write_string(&mut self, row: u32, col: u16, text: &str) -> Result<(), CellWriteError> {
            if self.cell_fail_at == Some((row, col)) {
                return Err(CellWriteError::Encoder("injected".to_string()));
            }
            self.dict_cells
                .insert((row, col), EnumCellValue::String(text.to_string()));
            Ok(())
        }

        fn write_number(&mut self, row: u32, col: u16, value: f64) -> Result<(), CellWriteError> {
            if self.cell_fail_at == Some((row, col)) {
                return Err(CellWriteError::Encoder("injected".to_string()));
            }
            self.dict_cells.insert((row, col), EnumCellValue::Number(value));
            Ok(())
        }

        fn write_boolean(&mut self, row: u32, col: u16, value: bool) -> Result<(), CellWriteError> {
            self.dict_cells.insert((row, col), EnumCellValue::Boolean(value));
            Ok(())
        }

        fn write_blank(&mut self, row: u32, col: u16) -> Result<(), CellWriteError> {
            self.dict_cells.insert((row, col), EnumCellValue::None);
            Ok(())
        }

        fn set_column_width(&mut self, col: u16, width: f64) -> Result<(), WriteError> {
            self.dict_widths.insert(col, width);
            Ok(())
        }

        fn close(&mut self) -> Result<(), WriteError> {
            self.n_close_calls += 1;
            if self.if_fail_close {
                return Err(WriteError::Close("disk full".to_string()));
            }
            Ok(())
        }
    }

    fn sample_frame(n_rows: usize) -> DataFrame {
        let l_ids: Vec<i64> = (0..n_rows as i64).collect();
        let l_names: Vec<String> = (0..n_rows).map(|n| format!("名称{n}")).collect();
        DataFrame::new(vec![
            Column::new("id".into(), l_ids),
            Column::new("name".into(), l_names),
        ])
        .expect("frame")
    }

    fn sample_columns() -> Vec<SpecSheetColumn> {
        vec![SpecSheetColumn::new("name"), SpecSheetColumn::new("id")]
    }

    #[test]
    fn progress_is_one_event_per_batch_and_monotonic() {
        for n_rows in [0usize, 1, 999, 1_000, 1_001, 2_500] {
            let mut sink = MemorySink::default();
            let mut l_events = Vec::new();
            let report = write_spreadsheet_with_sink(
                &mut sink,
                &sample_frame(n_rows),
                &sample_columns(),
                &derive_default_xlsx_write_options(),
                &mut |progress| l_events.push(progress),
            )
            .expect("write");

            assert_eq!(report.n_rows_written, n_rows);
            assert_eq!(l_events.len(), n_rows.div_ceil(1_000));
            assert!(
                l_events
                    .windows(2)
                    .all(|pair| pair[0].n_rows_written < pair[1].n_rows_written)
            );
            if let Some(last) = l_events.last() {
                assert_eq!(last.n_rows_written, n_rows);
                assert_eq!(last.n_rows_total, n_rows);
            }
            assert_eq!(sink.n_close_calls, 1);
        }
    }

    #[test]
    fn one_bad_cell_leaves_a_blank_and_the_rest_intact() {
        let mut sink = MemorySink {
            cell_fail_at: Some((2, 0)),
            ..Default::default()
        };
        let report = write_spreadsheet_with_sink(
            &mut sink,
            &sample_frame(3),
            &sample_columns(),
            &derive_default_xlsx_write_options(),
            &mut |_| {},
        )
        .expect("write");

        assert_eq!(report.n_cells_recovered, 1);
        assert_eq!(sink.dict_cells.get(&(2, 0)), Some(&EnumCellValue::None));
        assert_eq!(
            sink.dict_cells.get(&(1, 0)),
            Some(&EnumCellValue::String("名称0".to_string()))
        );
        assert_eq!(sink.dict_cells.get(&(3, 1)), Some(&EnumCellValue::Number(2.0)));
        assert_eq!(sink.dict_cells.len(), 6);
    }

    #[test]
    fn header_failure_still_closes_and_keeps_original_error() {
        let mut sink = MemorySink {
            if_fail_header: true,
            if_fail_close: true,
            ..Default::default()
        };
        let err = write_spreadsheet_with_sink(
            &mut sink,
            &sample_frame(2),
            &sample_columns(),
            &derive_default_xlsx_write_options(),
            &mut |_| {},
        )
        .unwrap_err();

        assert_eq!(err, WriteError::Encoder("header rejected".to_string()));
        assert_eq!(sink.n_close_calls, 1);
    }

    #[test]
    fn rejected_request_still_closes_the_sink_once() {
        let mut sink = MemorySink::default();
        let err = write_spreadsheet_with_sink(
            &mut sink,
            &sample_frame(2),
            &[SpecSheetColumn::new("name"), SpecSheetColumn::new("name")],
            &derive_default_xlsx_write_options(),
            &mut |_| {},
        )
        .unwrap_err();

        assert!(matches!(err, WriteError::InvalidColumns(_)));
        assert!(sink.l_header.is_empty());
        assert_eq!(sink.n_close_calls, 1);
    }

    #[test]
    fn close_failure_after_success_is_reported() {
        let mut sink = MemorySink {
            if_fail_close: true,
            ..Default::default()
        };
        let err = write_spreadsheet_with_sink(
            &mut sink,
            &sample_frame(1),
            &sample_columns(),
            &derive_default_xlsx_write_options(),
            &mut |_| {},
        )
        .unwrap_err();
        assert!(matches!(err, WriteError::Close(_)));
    }

    #[test]
    fn aliases_domains_and_widths_are_applied() {
        let df = DataFrame::new(vec![Column::new("kind".into(), vec![1i64, 2, 3])]).expect("frame");
        let columns = vec![SpecSheetColumn {
            name: "kind".to_string(),
            header_text: "Land use category".to_string(),
            domain: Some(BTreeMap::from([
                ("1".to_string(), "Residential".to_string()),
                ("2".to_string(), "Commercial".to_string()),
            ])),
        }];
        let mut sink = MemorySink::default();
        write_spreadsheet_with_sink(
            &mut sink,
            &df,
            &columns,
            &derive_default_xlsx_write_options(),
            &mut |_| {},
        )
        .expect("write");

        assert_eq!(sink.l_header, vec!["Land use category"]);
        assert_eq!(
            sink.dict_cells.get(&(1, 0)),
            Some(&EnumCellValue::String("Residential".to_string()))
        );
        assert_eq!(sink.dict_cells.get(&(3, 0)), Some(&EnumCellValue::Number(3.0)));
        assert_eq!(sink.dict_widths.get(&0), Some(&25.5));
    }

    #[test]
    fn missing_column_fails_before_output_exists() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("never.xlsx");
        let err = write_spreadsheet(
            &sample_frame(2),
            &[SpecSheetColumn::new("absent")],
            "Sheet1",
            &path,
            &derive_default_xlsx_write_options(),
            &mut |_| {},
        )
        .unwrap_err();

        assert_eq!(err, WriteError::ColumnNotFound("absent".to_string()));
        assert!(!path.exists());
    }

    #[test]
    fn xlsx_round_trip_preserves_text_numbers_and_row_count() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("out.xlsx");
        let n_rows = 2_345;
        let mut l_values: Vec<f64> = (0..n_rows).map(|n| n as f64 * 0.5).collect();
        l_values[10] = f64::NAN;
        let df = DataFrame::new(vec![
            Column::new(
                "name".into(),
                (0..n_rows).map(|n| format!("Zürich-東京-{n}")).collect::<Vec<_>>(),
            ),
            Column::new("value".into(), l_values),
            Column::new("flag".into(), (0..n_rows).map(|n| n % 2 == 0).collect::<Vec<_>>()),
        ])
        .expect("frame");
        let columns = vec![
            SpecSheetColumn::new("value"),
            SpecSheetColumn::new("name"),
            SpecSheetColumn::new("flag"),
        ];

        let mut n_events = 0usize;
        let report = write_spreadsheet(
            &df,
            &columns,
            "属性表",
            &path,
            &derive_default_xlsx_write_options(),
            &mut |_| n_events += 1,
        )
        .expect("write");
        assert_eq!(report.n_cells_recovered, 1);
        assert_eq!(n_events, 3);

        let mut workbook: Xlsx<_> = open_workbook(&path).expect("open");
        assert_eq!(workbook.sheet_names(), vec!["属性表".to_string()]);
        let range = workbook
            .worksheet_range_at(0)
            .expect("sheet")
            .expect("range");
        assert_eq!(range.height(), n_rows + 1);
        assert_eq!(range.get((0, 0)), Some(&Data::String("value".to_string())));
        assert_eq!(range.get((1, 1)), Some(&Data::String("Zürich-東京-0".to_string())));
        assert_eq!(range.get((2, 0)), Some(&Data::Float(0.5)));
        assert_eq!(range.get((1, 2)), Some(&Data::Bool(true)));
        assert_eq!(range.get((11, 0)), Some(&Data::Empty));
        assert_eq!(
            range.get((n_rows, 1)),
            Some(&Data::String(format!("Zürich-東京-{}", n_rows - 1)))
        );
    }

    #[test]
    fn rewriting_the_same_export_yields_identical_cells() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let df = sample_frame(50);
        let mut l_ranges = Vec::new();
        for c_name in ["a.xlsx", "b.xlsx"] {
            let path = tmp.path().join(c_name);
            write_spreadsheet(
                &df,
                &sample_columns(),
                "",
                &path,
                &derive_default_xlsx_write_options(),
                &mut |_| {},
            )
            .expect("write");
            let mut workbook: Xlsx<_> = open_workbook(&path).expect("open");
            assert_eq!(workbook.sheet_names(), vec!["Sheet1".to_string()]);
            let range = workbook
                .worksheet_range_at(0)
                .expect("sheet")
                .expect("range");
            l_ranges.push(range.rows().map(|row| row.to_vec()).collect::<Vec<_>>());
        }
        assert_eq!(l_ranges[0].len(), 51);
        assert_eq!(l_ranges[0], l_ranges[1]);
    }
}

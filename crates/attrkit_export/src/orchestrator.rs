//! Export orchestrator: load, validate and write on a background worker.

use std::path::{Path, PathBuf};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use attrkit_io_layer::{AttributeTable, LayerReader, NativeLayerReader, load_full_table};
use attrkit_io_xlsx::{
    SpecSheetColumn, SpecWriteReport, SpecXlsxWriteOptions, derive_default_xlsx_write_options,
    write_spreadsheet,
};
use tracing::{debug, error, info};

use crate::conf::C_WORKER_THREAD_NAME;
use crate::spec::{
    EnumExportEvent, EnumExportPhase, ExportError, SpecExportJob, SpecExportProgress,
};
use crate::validate::{normalize_output_path, validate_fields, validate_job_inputs};

////////////////////////////////////////////////////////////////////////////////
// #region Pipeline

/// Output columns for `l_fields`, with alias headers and domains per job flags.
pub fn derive_sheet_columns(
    table: &AttributeTable,
    l_fields: &[String],
    if_use_alias: bool,
    if_use_domain: bool,
) -> Vec<SpecSheetColumn> {
    l_fields
        .iter()
        .map(|name| match table.field(name) {
            Some(field) => SpecSheetColumn {
                name: name.clone(),
                header_text: field.header_text(if_use_alias).to_string(),
                domain: if if_use_domain {
                    field.domain.clone()
                } else {
                    None
                },
            },
            None => SpecSheetColumn::new(name.clone()),
        })
        .collect()
}

/// Run one export synchronously on the calling thread.
///
/// Events are emitted in order: phases, strategy status, one progress event per
/// written batch. Terminal events are left to the caller.
pub fn run_export(
    reader: &dyn LayerReader,
    job: &SpecExportJob,
    options: &SpecXlsxWriteOptions,
    on_event: &mut dyn FnMut(EnumExportEvent),
) -> Result<SpecWriteReport, ExportError> {
    on_event(EnumExportEvent::Phase(EnumExportPhase::Validating));
    validate_job_inputs(job)?;

    on_event(EnumExportEvent::Phase(EnumExportPhase::Loading));
    let table = load_full_table(reader, &job.source, &mut |c_status| {
        on_event(EnumExportEvent::Status(c_status.to_string()))
    })?;
    let l_fields = validate_fields(&table, &job.l_fields_selected)?;
    let columns = derive_sheet_columns(&table, &l_fields, job.if_use_alias, job.if_use_domain);
    debug!(fields = ?l_fields, "export columns resolved");

    on_event(EnumExportEvent::Phase(EnumExportPhase::Writing));
    let report = write_spreadsheet(
        table.frame(),
        &columns,
        &job.sheet_name,
        &job.path_file_out,
        options,
        &mut |progress| {
            on_event(EnumExportEvent::Progress(SpecExportProgress {
                n_rows_written: progress.n_rows_written,
                n_rows_total: progress.n_rows_total,
                phase: EnumExportPhase::Writing,
            }))
        },
    )?;
    Ok(report)
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Exporter

/// Stores `value` into the flag when dropped, unwinding included.
struct FlagOnDrop {
    flag: Arc<AtomicBool>,
    value: bool,
}

impl Drop for FlagOnDrop {
    fn drop(&mut self) {
        self.flag.store(self.value, Ordering::Release);
    }
}

/// Starts exports on a background thread, one at a time.
///
/// A second [`Exporter::start`] while an export is running fails with
/// [`ExportError::Busy`].
#[derive(Clone)]
pub struct Exporter {
    reader: Arc<dyn LayerReader>,
    options: SpecXlsxWriteOptions,
    busy: Arc<AtomicBool>,
}

impl Default for Exporter {
    fn default() -> Self {
        Self::new(Arc::new(NativeLayerReader))
    }
}

impl Exporter {
    pub fn new(reader: Arc<dyn LayerReader>) -> Self {
        Self {
            reader,
            options: derive_default_xlsx_write_options(),
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Validate `job` on the calling thread, then run it on a worker.
    ///
    /// # Errors
    /// [`ExportError::Validation`] when inputs are incomplete (nothing is
    /// created), [`ExportError::Busy`] when an export is already running and
    /// [`ExportError::Spawn`] when the worker thread cannot start.
    pub fn start(&self, job: SpecExportJob) -> Result<ExportHandle, ExportError> {
        let job = SpecExportJob {
            path_file_out: normalize_output_path(&job.path_file_out),
            ..job
        };
        validate_job_inputs(&job)?;

        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ExportError::Busy);
        }
        let guard_busy = FlagOnDrop {
            flag: Arc::clone(&self.busy),
            value: false,
        };
        let if_finished = Arc::new(AtomicBool::new(false));
        let guard_finished = FlagOnDrop {
            flag: Arc::clone(&if_finished),
            value: true,
        };

        let (tx, rx) = mpsc::channel();
        let path_file_out = job.path_file_out.clone();
        let reader = Arc::clone(&self.reader);
        let options = self.options.clone();
        info!(
            path_in = %job.source.path.display(),
            path_out = %job.path_file_out.display(),
            n_fields = job.l_fields_selected.len(),
            "export started"
        );

        let join_handle = thread::Builder::new()
            .name(C_WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                let _guard_finished = guard_finished;
                run_export_worker(reader.as_ref(), &job, &options, &tx, guard_busy)
            })
            .map_err(|err| ExportError::Spawn(err.to_string()))?;

        Ok(ExportHandle {
            path_file_out,
            rx: Mutex::new(rx),
            worker: Mutex::new(SpecWorkerSlot {
                join_handle: Some(join_handle),
                result: None,
            }),
            if_finished,
        })
    }
}

/// Run the export and always send exactly one terminal event.
fn run_export_worker(
    reader: &dyn LayerReader,
    job: &SpecExportJob,
    options: &SpecXlsxWriteOptions,
    tx: &Sender<EnumExportEvent>,
    guard_busy: FlagOnDrop,
) -> Result<SpecWriteReport, ExportError> {
    // A closed receiver only means nobody is listening any more.
    let mut emit = |event: EnumExportEvent| {
        let _ = tx.send(event);
    };
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        run_export(reader, job, options, &mut emit)
    }))
    .unwrap_or_else(|_| Err(ExportError::WorkerPanicked));
    drop(guard_busy);

    match &result {
        Ok(report) => {
            info!(
                path = %job.path_file_out.display(),
                n_rows = report.n_rows_written,
                "export succeeded"
            );
            emit(EnumExportEvent::Phase(EnumExportPhase::Done));
            emit(EnumExportEvent::Succeeded {
                path_file_out: job.path_file_out.clone(),
                report: report.clone(),
            });
        }
        Err(err) => {
            error!(error = %err, "export failed");
            emit(EnumExportEvent::Phase(EnumExportPhase::Failed));
            emit(EnumExportEvent::Failed { error: err.clone() });
        }
    }
    result
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ExportHandle

struct SpecWorkerSlot {
    join_handle: Option<JoinHandle<Result<SpecWriteReport, ExportError>>>,
    result: Option<Result<SpecWriteReport, ExportError>>,
}

/// Console-side end of a running export.
///
/// Event polling and joining use separate locks, so a thread blocked in
/// [`ExportHandle::join`] never stalls [`ExportHandle::poll_events`].
pub struct ExportHandle {
    path_file_out: PathBuf,
    rx: Mutex<Receiver<EnumExportEvent>>,
    worker: Mutex<SpecWorkerSlot>,
    if_finished: Arc<AtomicBool>,
}

impl ExportHandle {
    /// Normalized output path of this export.
    pub fn file_out(&self) -> &Path {
        &self.path_file_out
    }

    /// Drain pending events without blocking.
    pub fn poll_events(&self) -> Vec<EnumExportEvent> {
        self.rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_iter()
            .collect()
    }

    /// Whether the worker has sent its terminal event and exited its job.
    pub fn is_finished(&self) -> bool {
        self.if_finished.load(Ordering::Acquire)
    }

    /// Wait for the worker and return its result. Events stay pollable.
    pub fn join(&self) -> Result<SpecWriteReport, ExportError> {
        let mut slot = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(join_handle) = slot.join_handle.take() {
            let result = join_handle
                .join()
                .unwrap_or(Err(ExportError::WorkerPanicked));
            slot.result = Some(result);
        }
        slot.result.clone().unwrap_or(Err(ExportError::WorkerPanicked))
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::fs;
    use std::sync::Barrier;

    use attrkit_io_layer::{
        LayerError, SpecFieldDescriptor, SpecLayerFrame, SpecLayerSource, SpecReadOptions,
    };
    use calamine::{Data, Reader, Xlsx, open_workbook};
    use polars::prelude::{Column, DataFrame};

    use super::*;
    use crate::spec::ValidationError;

    const C_GEOJSON: &str = r#"{
  "type": "FeatureCollection",
  "features": [
    {"type": "Feature", "properties": {"a": 1, "b": "北京", "c": 1.5},
     "geometry": {"type": "Point", "coordinates": [116.4, 39.9]}},
    {"type": "Feature", "properties": {"a": 2, "b": "Zürich", "c": 2.5},
     "geometry": {"type": "Point", "coordinates": [8.5, 47.4]}}
  ]
}"#;

    fn write_geojson(dir: &Path) -> PathBuf {
        let path = dir.join("cities.geojson");
        fs::write(&path, C_GEOJSON).expect("write geojson");
        path
    }

    fn names(l: &[&str]) -> Vec<String> {
        l.iter().map(|c| c.to_string()).collect()
    }

    /// Reader serving a fixed frame; optionally blocks until released.
    struct FixedReader {
        layer: SpecLayerFrame,
        barrier: Option<Arc<Barrier>>,
    }

    impl LayerReader for FixedReader {
        fn read_schema(
            &self,
            _source: &SpecLayerSource,
            _options: &SpecReadOptions,
        ) -> Result<Vec<SpecFieldDescriptor>, LayerError> {
            Ok(self.layer.fields.clone())
        }

        fn read_rows(
            &self,
            _source: &SpecLayerSource,
            _options: &SpecReadOptions,
        ) -> Result<SpecLayerFrame, LayerError> {
            if let Some(barrier) = &self.barrier {
                barrier.wait();
            }
            Ok(self.layer.clone())
        }
    }

    fn coded_layer() -> SpecLayerFrame {
        let frame = DataFrame::new(vec![
            Column::new("kind".into(), vec!["H", "L", "X", "H"]),
            Column::new("len".into(), vec![1.0f64, 2.0, 3.0, 4.0]),
        ])
        .expect("frame");
        let mut field_kind = SpecFieldDescriptor::new("kind");
        field_kind.display_name = Some("Road kind".to_string());
        field_kind.domain = Some(BTreeMap::from([
            ("H".to_string(), "Highway".to_string()),
            ("L".to_string(), "Local".to_string()),
        ]));
        SpecLayerFrame {
            frame,
            fields: vec![field_kind, SpecFieldDescriptor::new("len")],
        }
    }

    fn read_back(path: &Path) -> calamine::Range<Data> {
        let mut workbook: Xlsx<_> = open_workbook(path).expect("open");
        workbook
            .worksheet_range_at(0)
            .expect("sheet")
            .expect("range")
    }

    #[test]
    fn geojson_export_follows_requested_column_order() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path_in = write_geojson(tmp.path());
        let path_out = tmp.path().join("out.xlsx");
        let job = SpecExportJob::new(&path_in, &path_out, names(&["c", "a", "b", "geometry"]));

        let handle = Exporter::default().start(job).expect("start");
        let report = handle.join().expect("export");
        assert_eq!(report.n_rows_written, 2);

        let range = read_back(&path_out);
        assert_eq!(range.height(), 3);
        assert_eq!(range.width(), 3);
        assert_eq!(range.get((0, 0)), Some(&Data::String("c".to_string())));
        assert_eq!(range.get((0, 1)), Some(&Data::String("a".to_string())));
        assert_eq!(range.get((0, 2)), Some(&Data::String("b".to_string())));
        assert_eq!(range.get((1, 2)), Some(&Data::String("北京".to_string())));
        assert_eq!(range.get((2, 0)), Some(&Data::Float(2.5)));

        let l_events = handle.poll_events();
        assert_eq!(
            l_events.first(),
            Some(&EnumExportEvent::Phase(EnumExportPhase::Validating))
        );
        assert!(l_events.iter().any(|event| matches!(event, EnumExportEvent::Status(_))));
        let l_progress: Vec<_> = l_events
            .iter()
            .filter_map(|event| match event {
                EnumExportEvent::Progress(progress) => Some(progress.n_rows_written),
                _ => None,
            })
            .collect();
        assert_eq!(l_progress, vec![2]);
        assert!(matches!(
            l_events.last(),
            Some(EnumExportEvent::Succeeded { path_file_out, .. }) if path_file_out == &path_out
        ));
    }

    #[test]
    fn empty_selection_is_rejected_before_any_file_exists() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path_in = write_geojson(tmp.path());
        let path_out = tmp.path().join("out.xlsx");
        let exporter = Exporter::default();

        let err = exporter
            .start(SpecExportJob::new(&path_in, &path_out, vec![]))
            .err()
            .expect("rejected");
        assert_eq!(err, ExportError::Validation(ValidationError::NoFieldsSelected));
        assert!(!path_out.exists());
        assert!(!exporter.is_busy());
    }

    #[test]
    fn unknown_fields_fail_on_the_worker_without_output() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path_in = write_geojson(tmp.path());
        let path_out = tmp.path().join("out.xlsx");
        let handle = Exporter::default()
            .start(SpecExportJob::new(&path_in, &path_out, names(&["zzz"])))
            .expect("start");

        let err = handle.join().unwrap_err();
        assert_eq!(
            err,
            ExportError::Validation(ValidationError::NoRequestedFieldsExist)
        );
        assert!(!path_out.exists());
        assert!(handle.poll_events().iter().any(|event| matches!(
            event,
            EnumExportEvent::Failed { error } if error == &err
        )));
    }

    #[test]
    fn unreadable_layer_reports_generic_load_failure() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path_in = tmp.path().join("broken.geojson");
        fs::write(&path_in, "{ not json").expect("write");
        let handle = Exporter::default()
            .start(SpecExportJob::new(&path_in, tmp.path().join("out"), names(&["a"])))
            .expect("start");

        let err = handle.join().unwrap_err();
        assert!(matches!(&err, ExportError::Load(load) if !load.attempts.is_empty()));
        assert_eq!(err.to_string(), "Failed to load layer: unable to read complete dataset");
    }

    #[test]
    fn second_start_while_running_is_busy() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let barrier = Arc::new(Barrier::new(2));
        let reader = FixedReader {
            layer: coded_layer(),
            barrier: Some(Arc::clone(&barrier)),
        };
        let exporter = Exporter::new(Arc::new(reader));
        let job = SpecExportJob::new("roads.geojson", tmp.path().join("a.xlsx"), names(&["kind"]));

        let handle = exporter.start(job.clone()).expect("start");
        assert!(exporter.is_busy());
        assert_eq!(exporter.start(job.clone()).err(), Some(ExportError::Busy));

        barrier.wait();
        handle.join().expect("export");
        assert!(!exporter.is_busy());
    }

    /// Reader that panics on every call.
    struct PanickingReader;

    impl LayerReader for PanickingReader {
        fn read_schema(
            &self,
            _source: &SpecLayerSource,
            _options: &SpecReadOptions,
        ) -> Result<Vec<SpecFieldDescriptor>, LayerError> {
            panic!("schema reader blew up");
        }

        fn read_rows(
            &self,
            _source: &SpecLayerSource,
            _options: &SpecReadOptions,
        ) -> Result<SpecLayerFrame, LayerError> {
            panic!("row reader blew up");
        }
    }

    #[test]
    fn reader_panic_ends_with_failed_event_and_frees_exporter() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path_out = tmp.path().join("roads.xlsx");
        let exporter = Exporter::new(Arc::new(PanickingReader));
        let handle = exporter
            .start(SpecExportJob::new("roads.geojson", &path_out, names(&["kind"])))
            .expect("start");

        assert_eq!(handle.join(), Err(ExportError::WorkerPanicked));
        assert!(handle.is_finished());
        assert!(!exporter.is_busy());
        assert!(!path_out.exists());

        let l_events = handle.poll_events();
        let n_events = l_events.len();
        assert!(n_events >= 2);
        assert_eq!(
            l_events[n_events - 2],
            EnumExportEvent::Phase(EnumExportPhase::Failed)
        );
        assert_eq!(
            l_events[n_events - 1],
            EnumExportEvent::Failed {
                error: ExportError::WorkerPanicked
            }
        );

        let handle = exporter
            .start(SpecExportJob::new("roads.geojson", &path_out, names(&["kind"])))
            .expect("restart after panic");
        assert_eq!(handle.join(), Err(ExportError::WorkerPanicked));
    }

    #[test]
    fn polling_is_not_blocked_by_a_waiting_join() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let barrier = Arc::new(Barrier::new(2));
        let reader = FixedReader {
            layer: coded_layer(),
            barrier: Some(Arc::clone(&barrier)),
        };
        let exporter = Exporter::new(Arc::new(reader));
        let handle = exporter
            .start(SpecExportJob::new(
                "roads.geojson",
                tmp.path().join("roads.xlsx"),
                names(&["kind"]),
            ))
            .expect("start");

        thread::scope(|scope| {
            let joiner = scope.spawn(|| handle.join());

            // The worker is parked on the barrier, so nothing can finish yet.
            let l_events = handle.poll_events();
            assert!(!handle.is_finished());
            assert!(
                !l_events
                    .iter()
                    .any(|event| matches!(event, EnumExportEvent::Succeeded { .. }))
            );

            barrier.wait();
            let report = joiner.join().expect("joiner thread").expect("export");
            assert_eq!(report.n_rows_written, 4);
        });

        assert!(handle.is_finished());
        assert_eq!(handle.join().map(|report| report.n_rows_written), Ok(4));
        assert!(
            handle
                .poll_events()
                .iter()
                .any(|event| matches!(event, EnumExportEvent::Succeeded { .. }))
        );
    }

    #[test]
    fn alias_and_domain_flags_drive_header_and_cells() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let reader = FixedReader {
            layer: coded_layer(),
            barrier: None,
        };
        let path_out = tmp.path().join("roads.xlsx");
        let job = SpecExportJob {
            if_use_alias: true,
            if_use_domain: true,
            sheet_name: "Roads".to_string(),
            ..SpecExportJob::new("roads.geojson", &path_out, names(&["kind", "len"]))
        };

        let report = run_export(&reader, &job, &derive_default_xlsx_write_options(), &mut |_| {})
            .expect("export");
        assert_eq!(report.n_cells_recovered, 0);

        let range = read_back(&path_out);
        assert_eq!(range.get((0, 0)), Some(&Data::String("Road kind".to_string())));
        assert_eq!(range.get((0, 1)), Some(&Data::String("len".to_string())));
        assert_eq!(range.get((1, 0)), Some(&Data::String("Highway".to_string())));
        assert_eq!(range.get((2, 0)), Some(&Data::String("Local".to_string())));
        assert_eq!(range.get((3, 0)), Some(&Data::String("X".to_string())));
        assert_eq!(range.get((4, 1)), Some(&Data::Float(4.0)));
    }

    #[test]
    fn flags_off_keep_names_and_codes() {
        let table = AttributeTable::from_layer_frame(coded_layer());
        let columns = derive_sheet_columns(&table, &names(&["kind"]), false, false);
        assert_eq!(columns, vec![SpecSheetColumn::new("kind")]);
    }
}

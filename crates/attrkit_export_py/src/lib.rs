use std::path::PathBuf;
use std::sync::Arc;

use attrkit_export::{
    EnumExportEvent, EnumExportPhase, ExportError, ExportHandle, Exporter, SpecExportJob,
    init_logging,
};
use attrkit_io_layer::{
    NativeLayerReader, SpecFieldDescriptor, SpecLayerSource, TUP_LAYER_EXTENSIONS, probe_schema,
};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;

const N_BRIDGE_ABI_VERSION: u64 = 1;
const C_BRIDGE_CONTRACT_VERSION: &str = "attrkit.export.xlsx.v1";
const C_BRIDGE_TRANSPORT: &str = "rust_native";

fn map_export_error(exception: ExportError) -> PyErr {
    match exception {
        ExportError::Validation(err) => PyValueError::new_err(err.to_string()),
        err => PyRuntimeError::new_err(err.to_string()),
    }
}

fn derive_phase_key(phase: EnumExportPhase) -> &'static str {
    match phase {
        EnumExportPhase::Probing => "probing",
        EnumExportPhase::Validating => "validating",
        EnumExportPhase::Loading => "loading",
        EnumExportPhase::Writing => "writing",
        EnumExportPhase::Done => "done",
        EnumExportPhase::Failed => "failed",
    }
}

fn create_field_dict<'py>(
    py: Python<'py>,
    field: &SpecFieldDescriptor,
) -> PyResult<Bound<'py, PyDict>> {
    let dict_field = PyDict::new(py);
    dict_field.set_item("name", &field.name)?;
    dict_field.set_item("display_name", field.display_name.as_deref())?;
    dict_field.set_item("domain", field.domain.clone())?;
    dict_field.set_item("selected", field.if_selected)?;
    Ok(dict_field)
}

fn create_event_dict<'py>(
    py: Python<'py>,
    event: &EnumExportEvent,
) -> PyResult<Bound<'py, PyDict>> {
    let dict_event = PyDict::new(py);
    match event {
        EnumExportEvent::Phase(phase) => {
            dict_event.set_item("kind", "phase")?;
            dict_event.set_item("phase", derive_phase_key(*phase))?;
            dict_event.set_item("label", phase.label())?;
        }
        EnumExportEvent::Status(c_status) => {
            dict_event.set_item("kind", "status")?;
            dict_event.set_item("message", c_status)?;
        }
        EnumExportEvent::Progress(progress) => {
            dict_event.set_item("kind", "progress")?;
            dict_event.set_item("phase", derive_phase_key(progress.phase))?;
            dict_event.set_item("n_rows_written", progress.n_rows_written)?;
            dict_event.set_item("n_rows_total", progress.n_rows_total)?;
            dict_event.set_item(
                "label",
                format!(
                    "Exporting... {}/{} rows",
                    progress.n_rows_written, progress.n_rows_total
                ),
            )?;
        }
        EnumExportEvent::Succeeded {
            path_file_out,
            report,
        } => {
            dict_event.set_item("kind", "succeeded")?;
            dict_event.set_item("file_out", path_file_out.to_string_lossy().to_string())?;
            dict_event.set_item("n_rows_written", report.n_rows_written)?;
            dict_event.set_item("n_cells_recovered", report.n_cells_recovered)?;
            dict_event.set_item("warnings", report.warnings.clone())?;
        }
        EnumExportEvent::Failed { error } => {
            dict_event.set_item("kind", "failed")?;
            dict_event.set_item("message", error.to_string())?;
        }
    }
    Ok(dict_event)
}

#[pyclass(name = "ExportHandle")]
struct PyExportHandle {
    #[pyo3(get)]
    file_out: String,
    inner: ExportHandle,
}

#[pymethods]
impl PyExportHandle {
    /// Drain pending events without blocking. Call from the console's event loop.
    fn poll_events<'py>(&self, py: Python<'py>) -> PyResult<Vec<Bound<'py, PyDict>>> {
        self.inner
            .poll_events()
            .iter()
            .map(|event| create_event_dict(py, event))
            .collect()
    }

    fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    /// Block until the export ends; returns the written row count.
    fn wait(&self, py: Python<'_>) -> PyResult<usize> {
        let handle = &self.inner;
        let report = py.allow_threads(|| handle.join()).map_err(map_export_error)?;
        Ok(report.n_rows_written)
    }
}

#[pyclass(name = "Exporter")]
struct PyExporter {
    inner: Exporter,
}

#[pymethods]
impl PyExporter {
    #[new]
    fn new() -> Self {
        Self {
            inner: Exporter::new(Arc::new(NativeLayerReader)),
        }
    }

    #[getter]
    fn busy(&self) -> bool {
        self.inner.is_busy()
    }

    #[pyo3(signature = (
        file_in,
        file_out,
        fields,
        sheet_name = "Sheet1",
        if_use_alias = false,
        if_use_domain = false
    ))]
    fn start(
        &self,
        file_in: String,
        file_out: String,
        fields: Vec<String>,
        sheet_name: &str,
        if_use_alias: bool,
        if_use_domain: bool,
    ) -> PyResult<PyExportHandle> {
        let job = SpecExportJob {
            sheet_name: sheet_name.to_string(),
            if_use_alias,
            if_use_domain,
            ..SpecExportJob::new(file_in, file_out, fields)
        };
        let handle = self.inner.start(job).map_err(map_export_error)?;
        Ok(PyExportHandle {
            file_out: handle.file_out().to_string_lossy().to_string(),
            inner: handle,
        })
    }
}

#[pyfunction(name = "probe_schema")]
fn probe_schema_py<'py>(py: Python<'py>, file_in: String) -> PyResult<Vec<Bound<'py, PyDict>>> {
    let source = SpecLayerSource::from_path(PathBuf::from(file_in));
    let l_fields = py
        .allow_threads(|| probe_schema(&NativeLayerReader, &source, &mut |_| {}))
        .map_err(|err| PyRuntimeError::new_err(err.to_string()))?;
    l_fields
        .iter()
        .map(|field| create_field_dict(py, field))
        .collect()
}

#[pyfunction]
fn supported_extensions() -> Vec<&'static str> {
    TUP_LAYER_EXTENSIONS.to_vec()
}

#[pymodule]
fn _attrkit_export_rs(module: &Bound<'_, PyModule>) -> PyResult<()> {
    init_logging();
    module.add_class::<PyExporter>()?;
    module.add_class::<PyExportHandle>()?;
    module.add_function(wrap_pyfunction!(probe_schema_py, module)?)?;
    module.add_function(wrap_pyfunction!(supported_extensions, module)?)?;
    module.add("__bridge_abi__", N_BRIDGE_ABI_VERSION)?;
    module.add("__bridge_contract__", C_BRIDGE_CONTRACT_VERSION)?;
    module.add("__bridge_transport__", C_BRIDGE_TRANSPORT)?;
    Ok(())
}

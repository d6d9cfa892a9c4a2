//! `attrkit_export`:
//! Layer attribute table to XLSX export pipeline.
//!
//! - `conf`         : constants and console labels
//! - `spec`         : job, event and error models
//! - `validate`     : job input checks and field selection
//! - `selection`    : console field checklist
//! - `orchestrator` : background export worker and its event channel
//! - `console`      : console-side status model and schema probing
pub mod conf;
pub mod console;
mod logging;
pub mod orchestrator;
pub mod selection;
pub mod spec;
pub mod validate;

pub use console::{ConsoleStatus, probe_fields_for_console};
pub use logging::init_logging;
pub use orchestrator::{ExportHandle, Exporter, derive_sheet_columns, run_export};
pub use selection::SpecFieldSelection;
pub use spec::{
    EnumExportEvent, EnumExportPhase, ExportError, SpecExportJob, SpecExportProgress,
    ValidationError,
};
pub use validate::{normalize_output_path, validate_fields, validate_job_inputs};

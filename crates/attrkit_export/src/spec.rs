//! Export job, progress event and error models.

use std::path::PathBuf;

use attrkit_io_layer::{LoadError, SchemaError, SpecLayerSource};
use attrkit_io_xlsx::{SpecWriteReport, WriteError};
use thiserror::Error;

use crate::conf::{
    C_SHEET_NAME_DEFAULT, C_STATUS_DONE, C_STATUS_FAILED, C_STATUS_LOADING, C_STATUS_PROBING,
    C_STATUS_VALIDATING, C_STATUS_WRITING,
};

////////////////////////////////////////////////////////////////////////////////
// #region ExportJob

/// Configuration for one export run, captured when export is triggered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecExportJob {
    /// Input layer.
    pub source: SpecLayerSource,
    /// Output workbook path.
    pub path_file_out: PathBuf,
    /// Worksheet name; blank means [`C_SHEET_NAME_DEFAULT`].
    pub sheet_name: String,
    /// Requested fields in output column order.
    pub l_fields_selected: Vec<String>,
    /// Write field aliases as header text when available.
    pub if_use_alias: bool,
    /// Write coded-value descriptions instead of codes when available.
    pub if_use_domain: bool,
}

impl SpecExportJob {
    pub fn new(
        path_layer: impl Into<PathBuf>,
        path_file_out: impl Into<PathBuf>,
        l_fields_selected: Vec<String>,
    ) -> Self {
        Self {
            source: SpecLayerSource::from_path(path_layer),
            path_file_out: path_file_out.into(),
            sheet_name: C_SHEET_NAME_DEFAULT.to_string(),
            l_fields_selected,
            if_use_alias: false,
            if_use_domain: false,
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Events

/// Phase of an export (or of a console-side probe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnumExportPhase {
    Probing,
    Validating,
    Loading,
    Writing,
    Done,
    Failed,
}

impl EnumExportPhase {
    /// Short console label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Probing => C_STATUS_PROBING,
            Self::Validating => C_STATUS_VALIDATING,
            Self::Loading => C_STATUS_LOADING,
            Self::Writing => C_STATUS_WRITING,
            Self::Done => C_STATUS_DONE,
            Self::Failed => C_STATUS_FAILED,
        }
    }
}

/// Progress snapshot sent after each written batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecExportProgress {
    /// Data rows written so far.
    pub n_rows_written: usize,
    /// Data rows in the table.
    pub n_rows_total: usize,
    /// Phase the snapshot belongs to.
    pub phase: EnumExportPhase,
}

/// Immutable message from the export worker to the console.
#[derive(Debug, Clone, PartialEq)]
pub enum EnumExportEvent {
    /// Entered a new phase.
    Phase(EnumExportPhase),
    /// Fallback strategy status text.
    Status(String),
    /// Batch written.
    Progress(SpecExportProgress),
    /// Workbook written and closed.
    Succeeded {
        path_file_out: PathBuf,
        report: SpecWriteReport,
    },
    /// Export aborted.
    Failed { error: ExportError },
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Errors

/// Job rejected before any heavy I/O.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("No input layer selected")]
    MissingInput,

    #[error("No output file selected")]
    MissingOutput,

    #[error("No fields selected")]
    NoFieldsSelected,

    #[error("Output directory does not exist: {}", .0.display())]
    OutputDirMissing(PathBuf),

    #[error("no requested fields exist in loaded data")]
    NoRequestedFieldsExist,
}

/// Any failure of an export run, as reported to the console.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExportError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error("An export is already running")]
    Busy,

    #[error("Export worker could not be started: {0}")]
    Spawn(String),

    #[error("Export worker terminated unexpectedly")]
    WorkerPanicked,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

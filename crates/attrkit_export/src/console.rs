//! Console-side status model, fed by export events on the console's own thread.

use std::path::{Path, PathBuf};

use attrkit_io_layer::{LayerReader, SpecLayerSource, probe_schema};
use tracing::{debug, info};

use crate::conf::{C_STATUS_IDLE, C_STATUS_PROBE_FAILED};
use crate::selection::SpecFieldSelection;
use crate::spec::{EnumExportEvent, EnumExportPhase, ExportError, SpecExportProgress};

/// Displayed status: the single source of truth for what the console shows.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsoleStatus {
    phase: Option<EnumExportPhase>,
    progress: Option<SpecExportProgress>,
    c_label: String,
    path_file_out_last: Option<PathBuf>,
    error_last: Option<String>,
}

impl Default for ConsoleStatus {
    fn default() -> Self {
        Self {
            phase: None,
            progress: None,
            c_label: C_STATUS_IDLE.to_string(),
            path_file_out_last: None,
            error_last: None,
        }
    }
}

impl ConsoleStatus {
    pub fn label(&self) -> &str {
        &self.c_label
    }

    pub fn phase(&self) -> Option<EnumExportPhase> {
        self.phase
    }

    pub fn progress(&self) -> Option<SpecExportProgress> {
        self.progress
    }

    /// Output of the last successful export.
    pub fn path_file_out_last(&self) -> Option<&Path> {
        self.path_file_out_last.as_deref()
    }

    /// Message of the last failure.
    pub fn error_last(&self) -> Option<&str> {
        self.error_last.as_deref()
    }

    pub fn is_running(&self) -> bool {
        self.phase.is_some_and(|phase| {
            matches!(
                phase,
                EnumExportPhase::Validating | EnumExportPhase::Loading | EnumExportPhase::Writing
            )
        })
    }

    pub fn apply(&mut self, event: &EnumExportEvent) {
        match event {
            EnumExportEvent::Phase(phase) => {
                self.phase = Some(*phase);
                if *phase == EnumExportPhase::Validating {
                    self.progress = None;
                    self.error_last = None;
                }
                self.c_label = phase.label().to_string();
            }
            EnumExportEvent::Status(c_status) => {
                debug!(status = %c_status, "export status");
            }
            EnumExportEvent::Progress(progress) => {
                self.progress = Some(*progress);
                self.c_label = format!(
                    "Exporting... {}/{} rows",
                    progress.n_rows_written, progress.n_rows_total
                );
            }
            EnumExportEvent::Succeeded { path_file_out, .. } => {
                self.phase = Some(EnumExportPhase::Done);
                self.path_file_out_last = Some(path_file_out.clone());
                self.c_label = EnumExportPhase::Done.label().to_string();
            }
            EnumExportEvent::Failed { error } => {
                self.phase = Some(EnumExportPhase::Failed);
                self.error_last = Some(error.to_string());
                self.c_label = EnumExportPhase::Failed.label().to_string();
            }
        }
    }

    pub fn apply_all<'a>(&mut self, events: impl IntoIterator<Item = &'a EnumExportEvent>) {
        events.into_iter().for_each(|event| self.apply(event));
    }
}

/// Probe `path_layer` on the console thread and build its field checklist.
///
/// Runs synchronously; probing reads at most one row per strategy.
pub fn probe_fields_for_console(
    reader: &dyn LayerReader,
    path_layer: &Path,
    status: &mut ConsoleStatus,
) -> Result<SpecFieldSelection, ExportError> {
    status.phase = Some(EnumExportPhase::Probing);
    status.c_label = EnumExportPhase::Probing.label().to_string();

    let source = SpecLayerSource::from_path(path_layer);
    match probe_schema(reader, &source, &mut |c_status| debug!(status = %c_status, "probe")) {
        Ok(l_fields) => {
            info!(path = %path_layer.display(), n_fields = l_fields.len(), "layer probed");
            status.phase = None;
            status.c_label = format!("Loaded layer, {} fields", l_fields.len());
            Ok(SpecFieldSelection::from_fields(l_fields))
        }
        Err(err) => {
            status.phase = Some(EnumExportPhase::Failed);
            status.c_label = C_STATUS_PROBE_FAILED.to_string();
            status.error_last = Some(err.to_string());
            Err(err.into())
        }
    }
}

//! Job input checks and field-selection validation.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use attrkit_io_layer::{AttributeTable, C_COLUMN_GEOMETRY};

use crate::conf::C_EXT_XLSX;
use crate::spec::{SpecExportJob, ValidationError};

/// Fail fast on a job that cannot run, before any file is read or created.
///
/// Checks run in order: input path, output path, selected fields, output
/// directory.
pub fn validate_job_inputs(job: &SpecExportJob) -> Result<(), ValidationError> {
    if is_blank_path(&job.source.path) {
        return Err(ValidationError::MissingInput);
    }
    if is_blank_path(&job.path_file_out) {
        return Err(ValidationError::MissingOutput);
    }
    if job.l_fields_selected.is_empty() {
        return Err(ValidationError::NoFieldsSelected);
    }
    if let Some(path_dir) = job.path_file_out.parent()
        && !path_dir.as_os_str().is_empty()
        && !path_dir.is_dir()
    {
        return Err(ValidationError::OutputDirMissing(path_dir.to_path_buf()));
    }
    Ok(())
}

/// Requested fields present in `table`, in request order.
///
/// Geometry and repeated names are dropped.
pub fn validate_fields(
    table: &AttributeTable,
    l_fields_requested: &[String],
) -> Result<Vec<String>, ValidationError> {
    let set_available: BTreeSet<&str> = table.column_names().into_iter().collect();
    let mut set_seen = BTreeSet::new();
    let l_fields: Vec<String> = l_fields_requested
        .iter()
        .filter(|name| name.as_str() != C_COLUMN_GEOMETRY)
        .filter(|name| set_available.contains(name.as_str()))
        .filter(|name| set_seen.insert(name.as_str()))
        .cloned()
        .collect();

    if l_fields.is_empty() {
        return Err(ValidationError::NoRequestedFieldsExist);
    }
    Ok(l_fields)
}

/// Append `.xlsx` to an output path that has no extension.
pub fn normalize_output_path(path: &Path) -> PathBuf {
    if is_blank_path(path) || path.extension().is_some() {
        return path.to_path_buf();
    }
    path.with_extension(C_EXT_XLSX)
}

fn is_blank_path(path: &Path) -> bool {
    path.to_string_lossy().trim().is_empty()
}

//! Export constants: output defaults, worker naming and console labels.

/// Extension appended to output paths that have none.
pub const C_EXT_XLSX: &str = "xlsx";
/// Default worksheet name.
pub const C_SHEET_NAME_DEFAULT: &str = "Sheet1";
/// Name of the background export thread.
pub const C_WORKER_THREAD_NAME: &str = "attrkit-export";

/// Filter used when `RUST_LOG` is unset.
pub const C_LOG_FILTER_DEFAULT: &str = "info";

pub const C_STATUS_IDLE: &str = "Ready";
pub const C_STATUS_PROBING: &str = "Reading layer...";
pub const C_STATUS_PROBE_FAILED: &str = "Failed to read layer";
pub const C_STATUS_VALIDATING: &str = "Checking export settings...";
pub const C_STATUS_LOADING: &str = "Reading data...";
pub const C_STATUS_WRITING: &str = "Exporting to Excel...";
pub const C_STATUS_DONE: &str = "Export complete";
pub const C_STATUS_FAILED: &str = "Export failed";

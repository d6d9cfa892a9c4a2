//! Layer source, field and read-option models plus error types.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use polars::prelude::{DataFrame, PolarsError};
use thiserror::Error;

use crate::conf::{C_EXT_DBF, C_EXT_SHP};

////////////////////////////////////////////////////////////////////////////////
// #region LayerSource

/// Vector-data format, inferred from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnumLayerFormat {
    /// ESRI shapefile (`.shp` main file with `.dbf` attributes).
    Shapefile,
    /// Stand-alone dBASE attribute table.
    Dbf,
    /// GeoPackage (SQLite container).
    GeoPackage,
    /// GeoJSON document.
    GeoJson,
    /// KML document.
    Kml,
    /// Anything else; no built-in driver handles it.
    Unknown,
}

impl EnumLayerFormat {
    /// Infer format from a path extension (case-insensitive).
    pub fn from_path(path: &Path) -> Self {
        let c_ext = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match c_ext.as_str() {
            C_EXT_SHP => Self::Shapefile,
            C_EXT_DBF => Self::Dbf,
            "gpkg" => Self::GeoPackage,
            "geojson" | "json" => Self::GeoJson,
            "kml" => Self::Kml,
            _ => Self::Unknown,
        }
    }

    /// Driver display name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Shapefile => "ESRI Shapefile",
            Self::Dbf => "dBASE",
            Self::GeoPackage => "GPKG",
            Self::GeoJson => "GeoJSON",
            Self::Kml => "KML",
            Self::Unknown => "unknown",
        }
    }

    /// Whether the format keeps attributes in a companion `.dbf` file.
    pub fn has_sidecar_table(self) -> bool {
        matches!(self, Self::Shapefile)
    }
}

impl fmt::Display for EnumLayerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Input vector-data file. Immutable once chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecLayerSource {
    /// Path to the main layer file.
    pub path: PathBuf,
    /// Format declared by the extension.
    pub format: EnumLayerFormat,
}

impl SpecLayerSource {
    /// Build a source, inferring the format from the extension.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let format = EnumLayerFormat::from_path(&path);
        Self { path, format }
    }

    /// Build a source with an explicit format.
    pub fn with_format(path: impl Into<PathBuf>, format: EnumLayerFormat) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ReadOptions

/// Explicit knobs passed to one reader call.
///
/// `if_relaxed` stands in for driver/environment hints: sibling-file discovery
/// is skipped and malformed input is tolerated where the format allows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpecReadOptions {
    /// Maximum rows to materialize; `None` reads the full table.
    pub n_rows_max: Option<usize>,
    /// Do not decode geometry.
    pub if_skip_geometry: bool,
    /// Relax driver strictness.
    pub if_relaxed: bool,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Fields

/// One attribute column of a layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecFieldDescriptor {
    /// Field name, unique within the layer.
    pub name: String,
    /// Optional alias shown instead of the name in alias mode.
    pub display_name: Option<String>,
    /// Optional coded-value domain (`code -> description`).
    pub domain: Option<BTreeMap<String, String>>,
    /// User-controlled selection flag.
    pub if_selected: bool,
}

impl SpecFieldDescriptor {
    /// Plain field with no alias or domain, selected by default.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            domain: None,
            if_selected: true,
        }
    }

    /// Header text for this field under the given alias mode.
    pub fn header_text(&self, if_use_alias: bool) -> &str {
        match (&self.display_name, if_use_alias) {
            (Some(alias), true) if !alias.trim().is_empty() => alias,
            _ => &self.name,
        }
    }
}

/// One decoded attribute cell.
#[derive(Debug, Clone, PartialEq)]
pub enum EnumLayerValue {
    /// Missing value.
    Null,
    /// Text value.
    Text(String),
    /// Integer value.
    Integer(i64),
    /// Floating-point value.
    Float(f64),
    /// Boolean value.
    Boolean(bool),
}

/// Raw reader output: decoded frame plus field metadata.
///
/// `frame` may still carry the geometry column; `fields` never does.
#[derive(Debug, Clone)]
pub struct SpecLayerFrame {
    /// Decoded rows.
    pub frame: DataFrame,
    /// Attribute field metadata in column order.
    pub fields: Vec<SpecFieldDescriptor>,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Strategies

/// Schema-probing strategies, cheapest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnumProbeStrategy {
    /// One row, geometry decoded.
    SingleRow,
    /// One row, geometry skipped.
    SingleRowSkipGeometry,
    /// Field metadata only, no rows.
    SchemaOnly,
    /// One row with relaxed driver strictness.
    RelaxedSingleRow,
    /// Field metadata from the companion `.dbf` only.
    SidecarSchema,
}

impl EnumProbeStrategy {
    /// Execution order.
    pub const ALL: [Self; 5] = [
        Self::SingleRow,
        Self::SingleRowSkipGeometry,
        Self::SchemaOnly,
        Self::RelaxedSingleRow,
        Self::SidecarSchema,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::SingleRow => "single row",
            Self::SingleRowSkipGeometry => "single row without geometry",
            Self::SchemaOnly => "schema metadata",
            Self::RelaxedSingleRow => "single row, relaxed driver",
            Self::SidecarSchema => "companion attribute file schema",
        }
    }
}

/// Full-table loading strategies, strictest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnumLoadStrategy {
    /// All rows, geometry decoded.
    Full,
    /// All rows, geometry skipped.
    FullSkipGeometry,
    /// All rows with relaxed driver strictness.
    FullRelaxed,
    /// All rows from the companion `.dbf` only.
    SidecarTable,
}

impl EnumLoadStrategy {
    /// Execution order.
    pub const ALL: [Self; 4] = [
        Self::Full,
        Self::FullSkipGeometry,
        Self::FullRelaxed,
        Self::SidecarTable,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Full => "full read",
            Self::FullSkipGeometry => "full read without geometry",
            Self::FullRelaxed => "full read, relaxed driver",
            Self::SidecarTable => "companion attribute file",
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Errors

/// Driver-level failure raised by one reader call.
#[derive(Error, Debug)]
pub enum LayerError {
    /// File could not be opened or read.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Content does not follow the format.
    #[error("Malformed {what}: {message}")]
    Malformed { what: String, message: String },

    /// No driver for this format.
    #[error("Unsupported layer format: {0}")]
    UnsupportedFormat(String),

    /// A required companion file is absent.
    #[error("Missing companion file: {}", .0.display())]
    MissingCompanion(PathBuf),

    /// Table assembly failed.
    #[error("Frame assembly failed: {0}")]
    Frame(#[from] PolarsError),

    /// GeoPackage access failed.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// GeoJSON parsing failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// KML parsing failed.
    #[error("XML error: {0}")]
    Xml(#[from] roxmltree::Error),
}

impl LayerError {
    /// Create an I/O error bound to a path.
    pub fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Create a malformed-content error.
    pub fn malformed(what: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Malformed {
            what: what.into(),
            message: message.into(),
        }
    }
}

/// One failed strategy attempt, kept for diagnostics only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecStrategyAttempt {
    /// Strategy label.
    pub strategy: &'static str,
    /// Low-level error text (never shown to the user).
    pub detail: String,
}

/// Every schema-probing strategy failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to read layer schema: {detail}")]
pub struct SchemaError {
    /// Generic user-facing detail.
    pub detail: String,
    /// Failed attempts in execution order.
    pub attempts: Vec<SpecStrategyAttempt>,
}

/// Every full-table loading strategy failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to load layer: {detail}")]
pub struct LoadError {
    /// Generic user-facing detail.
    pub detail: String,
    /// Failed attempts in execution order.
    pub attempts: Vec<SpecStrategyAttempt>,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

//! Layer-reading constants and default presets.

use crate::spec::SpecReadOptions;

/// Canonical name of the geometry column in every decoded layer frame.
pub const C_COLUMN_GEOMETRY: &str = "geometry";
/// Probe results taller than this are truncated to one representative row.
pub const N_ROWS_PROBE_GUARD: usize = 1_000;
/// Row count requested by single-row probe strategies.
pub const N_ROWS_PROBE: usize = 1;

/// Extensions offered by the console file picker (lowercase, no dot).
pub const TUP_LAYER_EXTENSIONS: [&str; 6] = ["shp", "gpkg", "geojson", "json", "kml", "dbf"];

/// Shapefile-family companion extensions.
pub const C_EXT_SHP: &str = "shp";
/// Shapefile index companion.
pub const C_EXT_SHX: &str = "shx";
/// Shapefile attribute companion.
pub const C_EXT_DBF: &str = "dbf";
/// Shapefile code page companion.
pub const C_EXT_CPG: &str = "cpg";

/// Shapefile main-file magic number (big-endian).
pub const N_SHP_FILE_CODE: i32 = 9994;
/// Shapefile main-file version (little-endian).
pub const N_SHP_VERSION: i32 = 1000;
/// Shapefile main-file header length in bytes.
pub const N_SHP_HEADER_LEN: usize = 100;

/// GeoPackage `application_id` values accepted in strict mode.
pub const TUP_GPKG_APPLICATION_IDS: [i64; 2] = [0x4750_4B47, 0x4750_3130];

/// Options for a full read with geometry decoding.
pub fn derive_full_read_options() -> SpecReadOptions {
    SpecReadOptions::default()
}

/// Options for a single-row probe read.
pub fn derive_probe_read_options() -> SpecReadOptions {
    SpecReadOptions {
        n_rows_max: Some(N_ROWS_PROBE),
        ..Default::default()
    }
}

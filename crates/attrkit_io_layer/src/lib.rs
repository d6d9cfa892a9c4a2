//! Vector-layer attribute access for attrkit.
//!
//! Native drivers (GeoJSON, shapefile, dBASE, KML, GeoPackage) sit behind the
//! [`LayerReader`] seam; [`probe_schema`] and [`load_full_table`] drive them
//! through ordered fallback strategies.

pub mod conf;
pub mod load;
pub mod probe;
pub mod reader;
pub mod spec;
mod strategy;
pub mod table;
pub mod util;

pub use conf::{C_COLUMN_GEOMETRY, N_ROWS_PROBE_GUARD, TUP_LAYER_EXTENSIONS};
pub use load::{C_LOAD_ERROR_DETAIL, load_full_table};
pub use probe::{C_SCHEMA_ERROR_DETAIL, probe_schema};
pub use reader::{LayerReader, NativeLayerReader};
pub use spec::{
    EnumLayerFormat, EnumLayerValue, EnumLoadStrategy, EnumProbeStrategy, LayerError, LoadError,
    SchemaError, SpecFieldDescriptor, SpecLayerFrame, SpecLayerSource, SpecReadOptions,
    SpecStrategyAttempt,
};
pub use strategy::StrategyTag;
pub use table::AttributeTable;

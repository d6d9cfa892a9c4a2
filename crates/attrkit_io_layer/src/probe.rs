//! Layer schema prober: field names with minimal I/O.

use tracing::warn;

use crate::conf::{C_EXT_DBF, N_ROWS_PROBE_GUARD, derive_probe_read_options};
use crate::reader::LayerReader;
use crate::spec::{
    EnumLayerFormat, EnumProbeStrategy, LayerError, SchemaError, SpecFieldDescriptor,
    SpecLayerFrame, SpecLayerSource, SpecReadOptions,
};
use crate::strategy::run_strategies;
use crate::util::{derive_companion_path, derive_field_descriptors};

/// Generic detail reported when every probe strategy failed.
pub const C_SCHEMA_ERROR_DETAIL: &str = "all strategies exhausted";

/// Companion attribute source for shapefile-family layers, if present on disk.
pub(crate) fn derive_sidecar_source(source: &SpecLayerSource) -> Option<SpecLayerSource> {
    if !source.format.has_sidecar_table() {
        return None;
    }
    derive_companion_path(&source.path, C_EXT_DBF)
        .map(|path| SpecLayerSource::with_format(path, EnumLayerFormat::Dbf))
}

/// Field names from a probe read, truncating runaway results first.
fn derive_probe_fields(layer: SpecLayerFrame) -> Vec<SpecFieldDescriptor> {
    let n_height = layer.frame.height();
    let frame = if n_height > N_ROWS_PROBE_GUARD {
        warn!(n_rows = n_height, "probe read ignored the row limit, truncating");
        layer.frame.head(Some(1))
    } else {
        layer.frame
    };
    derive_field_descriptors(&frame, &layer.fields)
}

fn run_probe_strategy(
    reader: &dyn LayerReader,
    source: &SpecLayerSource,
    strategy: EnumProbeStrategy,
) -> Result<Vec<SpecFieldDescriptor>, LayerError> {
    let options_probe = derive_probe_read_options();
    match strategy {
        EnumProbeStrategy::SingleRow => reader
            .read_rows(source, &options_probe)
            .map(derive_probe_fields),
        EnumProbeStrategy::SingleRowSkipGeometry => {
            let options = SpecReadOptions {
                if_skip_geometry: true,
                ..options_probe
            };
            reader.read_rows(source, &options).map(derive_probe_fields)
        }
        EnumProbeStrategy::SchemaOnly => {
            reader.read_schema(source, &SpecReadOptions::default())
        }
        EnumProbeStrategy::RelaxedSingleRow => {
            let options = SpecReadOptions {
                if_relaxed: true,
                ..options_probe
            };
            reader.read_rows(source, &options).map(derive_probe_fields)
        }
        EnumProbeStrategy::SidecarSchema => {
            let source_sidecar = derive_sidecar_source(source)
                .ok_or_else(|| LayerError::MissingCompanion(source.path.with_extension(C_EXT_DBF)))?;
            let options = SpecReadOptions {
                if_relaxed: true,
                ..Default::default()
            };
            reader.read_schema(&source_sidecar, &options)
        }
    }
}

/// Determine the attribute fields of `source`, geometry excluded.
///
/// Strategies run cheapest first (see [`EnumProbeStrategy::ALL`]). `on_status`
/// receives one `"trying: <label>"` message per attempted strategy.
///
/// # Errors
/// [`SchemaError`] with a generic detail when every strategy fails; the
/// per-strategy error text is kept in `attempts` and never in the message.
pub fn probe_schema(
    reader: &dyn LayerReader,
    source: &SpecLayerSource,
    on_status: &mut dyn FnMut(&str),
) -> Result<Vec<SpecFieldDescriptor>, SchemaError> {
    let result = run_strategies(
        &EnumProbeStrategy::ALL,
        on_status,
        |strategy| {
            strategy != EnumProbeStrategy::SidecarSchema || derive_sidecar_source(source).is_some()
        },
        |strategy| run_probe_strategy(reader, source, strategy),
    );
    match result {
        Ok((_, l_fields)) => Ok(l_fields),
        Err(l_attempts) => {
            warn!(
                path = %source.path.display(),
                n_attempts = l_attempts.len(),
                "schema probing failed"
            );
            Err(SchemaError {
                detail: C_SCHEMA_ERROR_DETAIL.to_string(),
                attempts: l_attempts,
            })
        }
    }
}

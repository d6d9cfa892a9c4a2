//! Full table loader: every row, same fallback philosophy as the prober.

use tracing::{info, warn};

use crate::conf::{C_EXT_DBF, derive_full_read_options};
use crate::probe::derive_sidecar_source;
use crate::reader::LayerReader;
use crate::spec::{
    EnumLoadStrategy, LayerError, LoadError, SpecLayerFrame, SpecLayerSource, SpecReadOptions,
};
use crate::strategy::run_strategies;
use crate::table::AttributeTable;

/// Generic detail reported when every load strategy failed.
pub const C_LOAD_ERROR_DETAIL: &str = "unable to read complete dataset";

fn run_load_strategy(
    reader: &dyn LayerReader,
    source: &SpecLayerSource,
    strategy: EnumLoadStrategy,
) -> Result<SpecLayerFrame, LayerError> {
    let options_full = derive_full_read_options();
    match strategy {
        EnumLoadStrategy::Full => reader.read_rows(source, &options_full),
        EnumLoadStrategy::FullSkipGeometry => reader.read_rows(
            source,
            &SpecReadOptions {
                if_skip_geometry: true,
                ..options_full
            },
        ),
        EnumLoadStrategy::FullRelaxed => reader.read_rows(
            source,
            &SpecReadOptions {
                if_relaxed: true,
                ..options_full
            },
        ),
        EnumLoadStrategy::SidecarTable => {
            let source_sidecar = derive_sidecar_source(source)
                .ok_or_else(|| LayerError::MissingCompanion(source.path.with_extension(C_EXT_DBF)))?;
            reader.read_rows(
                &source_sidecar,
                &SpecReadOptions {
                    if_relaxed: true,
                    ..options_full
                },
            )
        }
    }
}

/// Load the complete attribute table of `source`, geometry stripped.
///
/// # Errors
/// [`LoadError`] with a generic detail when every strategy fails.
pub fn load_full_table(
    reader: &dyn LayerReader,
    source: &SpecLayerSource,
    on_status: &mut dyn FnMut(&str),
) -> Result<AttributeTable, LoadError> {
    let result = run_strategies(
        &EnumLoadStrategy::ALL,
        on_status,
        |strategy| {
            strategy != EnumLoadStrategy::SidecarTable || derive_sidecar_source(source).is_some()
        },
        |strategy| run_load_strategy(reader, source, strategy),
    );
    match result {
        Ok((strategy, layer)) => {
            let table = AttributeTable::from_layer_frame(layer);
            info!(
                strategy = strategy.label(),
                n_rows = table.n_rows(),
                n_columns = table.fields().len(),
                "layer loaded"
            );
            Ok(table)
        }
        Err(l_attempts) => {
            warn!(
                path = %source.path.display(),
                n_attempts = l_attempts.len(),
                "full table load failed"
            );
            Err(LoadError {
                detail: C_LOAD_ERROR_DETAIL.to_string(),
                attempts: l_attempts,
            })
        }
    }
}

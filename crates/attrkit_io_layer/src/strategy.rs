//! Ordered fallback runner shared by the schema prober and the table loader.

use tracing::{debug, info};

use crate::spec::{EnumLoadStrategy, EnumProbeStrategy, LayerError, SpecStrategyAttempt};

/// A tagged strategy variant with a human-readable label.
pub trait StrategyTag: Copy {
    fn label(self) -> &'static str;
}

impl StrategyTag for EnumProbeStrategy {
    fn label(self) -> &'static str {
        EnumProbeStrategy::label(self)
    }
}

impl StrategyTag for EnumLoadStrategy {
    fn label(self) -> &'static str {
        EnumLoadStrategy::label(self)
    }
}

/// Run `strategies` in order and return the first success.
///
/// Strategies rejected by `is_applicable` (e.g. no companion file) are skipped
/// silently. Each remaining one reports `"trying: <label>"` through
/// `on_status` before running. Failures are kept as [`SpecStrategyAttempt`]s;
/// their text goes to debug logs only. Any error triggers the next strategy.
pub(crate) fn run_strategies<S, T, P, F>(
    strategies: &[S],
    on_status: &mut dyn FnMut(&str),
    is_applicable: P,
    mut attempt: F,
) -> Result<(S, T), Vec<SpecStrategyAttempt>>
where
    S: StrategyTag,
    P: Fn(S) -> bool,
    F: FnMut(S) -> Result<T, LayerError>,
{
    let mut l_attempts = Vec::new();
    for &strategy in strategies {
        let c_label = strategy.label();
        if !is_applicable(strategy) {
            debug!(strategy = c_label, "strategy not applicable");
            continue;
        }
        on_status(&format!("trying: {c_label}"));
        match attempt(strategy) {
            Ok(value) => {
                info!(strategy = c_label, n_failed = l_attempts.len(), "strategy succeeded");
                return Ok((strategy, value));
            }
            Err(err) => {
                debug!(strategy = c_label, error = %err, "strategy failed");
                l_attempts.push(SpecStrategyAttempt {
                    strategy: c_label,
                    detail: err.to_string(),
                });
            }
        }
    }
    Err(l_attempts)
}

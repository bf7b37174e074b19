//! Structured logging setup.
//!
//! Initializes a `tracing-subscriber` layer once at process start, reading
//! the filter from `RUST_LOG` (falling back to `info`) the way the rest of
//! the stack expects.

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the global `tracing` subscriber. Safe to call more than once;
/// later calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Logs a draw-path error per §7's propagation rule: these never abort the
/// caller, they reduce to "nothing drawn for this tile".
pub fn log_draw_path_error(context: &str, err: &crate::error::TileCacheError) {
    tracing::warn!(context, error = %err, "draw-path error, tile treated as absent");
}

// =============================================================================
// Telemetry — tracing subscriber setup
// =============================================================================

use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber, honouring `RUST_LOG` (default `info`).
///
/// Safe to call more than once: later calls are ignored, which lets tests
/// call it freely.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

//! Logging setup.
//!
//! Tracing with an env-filter; quiet by default so hook invocations never
//! pollute an editor's stdout. `KUZU_MEMORY_LOG` overrides the filter
//! (e.g. `kuzu_memory=debug`).

use std::sync::Once;

static INIT: Once = Once::new();

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "KUZU_MEMORY_LOG";

/// Initializes the global tracing subscriber once; later calls are no-ops.
///
/// Logs go to stderr. Defaults to `warn` so embedded use stays silent
/// unless asked.
pub fn init_logging() {
    INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;

        let filter = EnvFilter::try_from_env(LOG_ENV)
            .unwrap_or_else(|_| EnvFilter::new("kuzu_memory=warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .try_init();
    });
}

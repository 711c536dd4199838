use std::sync::Once;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Install a global test subscriber once per test binary.
///
/// Handler threads log through the global dispatcher, so a thread-local
/// default would miss them. Output goes through the test writer and only shows
/// for failing tests or with `--nocapture`.
pub fn init() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("test_server=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

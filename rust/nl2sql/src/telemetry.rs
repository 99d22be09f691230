use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter applied when `RUST_LOG` is unset. Request spans from `tower_http` stay visible so each
/// `/generate` call can be followed through the retry loop.
const DEFAULT_FILTER: &str = "info,tower_http=debug";

static INIT: OnceCell<()> = OnceCell::new();

pub fn init_tracing() {
    let _ = INIT.get_or_init(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
        fmt().with_env_filter(filter).with_target(false).init();
    });
}

/// Installs a test writer subscriber; safe to call from every test.
pub fn init_test_tracing() {
    let _ = INIT.get_or_init(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
        let _ = fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

use std::sync::Once;

use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_FILTER: &str = "info,tower_http=info";

static INIT: Once = Once::new();

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
/// Safe to call more than once; only the first call has an effect.
pub fn init_tracing() {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_FILTER.into());
    init_tracing_with(&env_filter);
}

pub fn init_tracing_with(filter: &str) {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_target(true)
            .with_level(true)
            .compact()
            .finish();

        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

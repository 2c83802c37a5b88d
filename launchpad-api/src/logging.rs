use std::env;
use tracing_subscriber::{prelude::*, registry, EnvFilter};

const DEFAULT_DIRECTIVES: &str = "launchpad_api=info,launchpad_orchestrator=info,tower_http=info";

/// Initializes the global tracing subscriber based on environment variables.
///
/// `RUST_LOG` wins over `LOG_LEVEL`. `LOG_FORMAT=json` switches to
/// one-object-per-line output.
pub fn init_subscriber() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| env::var("LOG_LEVEL").map(EnvFilter::new))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    let is_json = env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    let subscriber = registry().with(env_filter);
    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stdout);

    if is_json {
        subscriber.with(fmt_layer.json()).init();
    } else {
        subscriber.with(fmt_layer).init();
    }
}

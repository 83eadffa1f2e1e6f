use tracing_subscriber::EnvFilter;

const DEFAULT_DIRECTIVE: &str = "uwsgi_fleet_kernel=info";
const DEBUG_DIRECTIVE: &str = "uwsgi_fleet_kernel=debug";

/// `RUST_LOG` wins when set; otherwise info, or debug with `debug: true`.
pub fn env_filter(debug: bool) -> EnvFilter {
    let fallback = if debug { DEBUG_DIRECTIVE } else { DEFAULT_DIRECTIVE };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Install the global fmt subscriber. Safe to call twice; the second call is a no-op.
pub fn init_logging(debug: bool) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(debug))
        .with_target(false)
        .try_init();
}

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

fn rust_log_add_quiet_defaults(current: EnvFilter) -> EnvFilter {
    let main = match current.to_string().as_str() {
        "debug" => "debug",
        "trace" => "trace",
        _ => return current,
    };
    let logs = format!("{},{}", main, super::constants::RUST_LOG_QUIET_DEFAULTS);
    EnvFilter::try_new(logs).unwrap()
}

/// Initialise tracing with a pretty stdout subscriber.
/// The level defaults to `info` and can be overridden through `RUST_LOG`.
pub fn init_tracing(service_name: &str) {
    init_tracing_level(service_name, None);
}

/// Initialise tracing with an explicit default level.
pub fn init_tracing_level(service_name: &str, level: Option<&str>) {
    let level = level.unwrap_or("info");
    let filter = rust_log_add_quiet_defaults(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
    );

    Registry::default()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().pretty())
        .init();

    tracing::info!(service = service_name, "tracing initialised");
}

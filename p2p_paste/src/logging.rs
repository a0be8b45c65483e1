use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber.
///
/// `RUST_LOG` wins over `default_filter`. Safe to call more than once;
/// later calls are no-ops.
pub fn init_logging(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .ok();
}

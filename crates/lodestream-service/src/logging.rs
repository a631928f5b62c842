use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::util::SubscriberInitExt;

/// Initializes logging for the engine with the given env-filter directives.
///
/// Intended to be called once by the host application; embedders with their
/// own subscriber setup can skip this entirely.
pub fn init_logging(env_filter: &str) {
    tracing_subscriber::fmt()
        .with_timer(UtcTime::rfc_3339())
        .with_target(true)
        .with_env_filter(env_filter)
        .finish()
        .init();
}

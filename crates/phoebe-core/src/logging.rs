//! Logging integration for phoebe.
//!
//! Provides a helper for installing a [`tracing`]-based subscriber. The ORM
//! itself only *emits* events (every executed statement is logged at `debug`
//! level by the backends); installing a subscriber is the application's call.

/// Sets up the global tracing subscriber.
///
/// `filter` is an `EnvFilter` directive string (e.g. `"debug"`,
/// `"phoebe_db=debug,info"`). With `pretty = true` a human-readable format
/// is used; otherwise structured JSON output.
///
/// Installing a second subscriber is a no-op rather than an error, so tests
/// can call this freely.
pub fn setup_logging(filter: &str, pretty: bool) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));

    if pretty {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .pretty()
            .try_init()
            .ok();
    } else {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .try_init()
            .ok();
    }
}

/// Creates a tracing span covering one logical database operation.
///
/// # Examples
///
/// ```
/// let span = phoebe_core::logging::query_span("select");
/// let _guard = span.enter();
/// tracing::debug!("executing");
/// ```
pub fn query_span(operation: &str) -> tracing::Span {
    tracing::debug_span!("query", op = operation)
}

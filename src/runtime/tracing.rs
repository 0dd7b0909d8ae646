/// Initializes the tracing/logging infrastructure.
///
/// Structured logging via the `tracing` crate with environment-based
/// filtering: set `RUST_LOG` to control verbosity, e.g. `RUST_LOG=info` or
/// `RUST_LOG=io_broker=debug` for this crate alone.
///
/// # Example
///
/// ```ignore
/// setup_tracing();
/// tracing::info!("system starting");
/// ```
pub fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

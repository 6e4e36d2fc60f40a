/// Initialize stderr logging with JSON format.
///
/// Log level comes from `RUST_LOG` and defaults to `info`. Installing the
/// subscriber a second time is a no-op, so applications that already set up
/// `tracing` can call this freely.
pub fn init_logging() {
    let env_filter = tracing_subscriber::filter::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::filter::EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .json()
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

use tracing_subscriber::EnvFilter;

/// Routes container logs to the test output. Set `RUST_LOG=trellis=trace`
/// to see every provider call.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

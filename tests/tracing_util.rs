use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

/// Scoped test subscriber printing engine events through the test harness.
///
/// Honours `RUST_LOG`; defaults to `callweave=debug`.
pub struct TestTracing {
    _guard: tracing::subscriber::DefaultGuard,
}

impl TestTracing {
    pub fn init() -> Self {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("callweave=debug"));
        let subscriber = Registry::default()
            .with(filter)
            .with(fmt::layer().with_test_writer().with_target(true));
        let guard = tracing::subscriber::set_default(subscriber);
        Self { _guard: guard }
    }
}

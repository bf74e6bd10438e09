use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::time::ChronoLocal, layer::SubscriberExt, util::SubscriberInitExt,
    EnvFilter,
};

/// Progress lines carry wall-clock time with millisecond precision.
const TIME_FORMAT: &str = "%H:%M:%S%.3f";

/// Installs the global subscriber: `RUST_LOG` filtering (default `info`)
/// and a compact formatter writing to stderr through a non-blocking writer.
///
/// Keep the returned guard alive for the life of the program, dropping it
/// flushes and stops the writer thread.
pub fn init() -> WorkerGuard {
    let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stderr());
    let _ = tracing_subscriber::registry()
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_thread_names(true)
                .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
                .with_writer(non_blocking)
                .compact(),
        )
        .try_init();
    guard
}

/// Subscriber for tests: everything goes to the test harness writer so it
/// only shows for failing tests.
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}

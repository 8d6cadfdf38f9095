use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::AppConfig;

/// Initialises the global subscriber: ANSI stdout always, plus a
/// non-blocking JSON file layer when a log directory is configured. The
/// returned guard must live until shutdown or buffered lines are lost.
pub fn init_logging(config: &AppConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    let registry = tracing_subscriber::registry().with(filter);
    let stdout_layer = fmt::layer().with_target(false);

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "gateway.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let file_layer = fmt::layer()
                .json()
                .with_target(true)
                .with_writer(non_blocking)
                .with_ansi(false);
            registry.with(stdout_layer).with(file_layer).init();
            Some(guard)
        }
        None => {
            registry.with(stdout_layer).init();
            None
        }
    }
}

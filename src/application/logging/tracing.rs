use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::application::config::configuration::Configuration;

static LOGGER_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

pub fn tracing_subscribe(config: &Configuration) -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    _ = std::fs::create_dir_all(config.log_dir());
    let file_appender = tracing_appender::rolling::daily(config.log_dir(), "memograph.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    _ = LOGGER_GUARD.set(guard);
    let log_writer_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(log_writer_layer)
        .with(env_filter)
        .try_init()
        .is_ok()
}

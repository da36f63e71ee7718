use std::fs;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::Mode;

/// Initializes the logging system with both console and file output.
/// `RUST_LOG` takes precedence over the mode's default level.
pub fn init_logging(mode: Mode) {
    let _ = fs::create_dir_all("logs");

    let file_appender = tracing_appender::rolling::daily("logs", "scraper.log");
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer().json().with_writer(non_blocking_writer);
    let console_layer = fmt::layer().with_writer(std::io::stdout);

    let default_directive = match mode {
        Mode::Development => "show_scraper=debug",
        Mode::Production => "show_scraper=info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .init();

    // The guard flushes the file writer on drop; keep it for the life of the process.
    std::mem::forget(guard);
}

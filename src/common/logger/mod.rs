use std::{fs, path::Path};

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub mod formatter;
pub mod writer;

pub use formatter::*;
pub use writer::*;

use crate::configs::LoggingConfig;

/// Filter used when neither `RUST_LOG` nor `[logging]` says otherwise.
/// `hyper`/`reqwest` are chatty at debug; segment traffic is logged by us anyway.
const DEFAULT_DIRECTIVES: &str = "hyper=warn,reqwest=warn,rustls=warn";

fn filter_directives(config: Option<&LoggingConfig>) -> String {
    let level = config.and_then(|l| l.level.as_deref()).unwrap_or("info");
    match config.and_then(|l| l.filters.as_deref()) {
        Some(filters) if !filters.is_empty() => {
            format!("{},{},{}", level, DEFAULT_DIRECTIVES, filters)
        }
        _ => format!("{},{}", level, DEFAULT_DIRECTIVES),
    }
}

/// Install the global subscriber: coloured stdout plus an optional line-capped log file.
pub fn init(config: Option<&LoggingConfig>) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(config)));

    let stdout_layer = fmt::layer()
        .event_format(PlayerFormatter::new(true))
        .with_ansi(true);

    let file_layer = config.and_then(|l| l.file.as_ref()).map(|file_config| {
        if let Some(parent) = Path::new(&file_config.path).parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                eprintln!("Failed to create log directory: {}", e);
            }
        }

        fmt::layer()
            .with_writer(LineCappedWriter::new(
                file_config.path.clone(),
                file_config.max_lines,
            ))
            .event_format(PlayerFormatter::new(false))
            .with_ansi(false)
    });

    // A second init (tests, embedding apps) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init();
}

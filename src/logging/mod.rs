// Logging setup
//
// Human-readable logs go to stderr; stdout is reserved for command output
// (the replay driver prints render requests there). File logging, when
// enabled, writes JSON lines through a non-blocking rolling appender.
//
// Filter precedence: RUST_LOG > configured level > "info".

use crate::config::{LogRotation, LoggingConfig};
use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber
///
/// The returned guard must be kept alive for the whole program, or buffered
/// file logs are lost on exit.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directive(&config.level))
            .with_context(|| format!("invalid log level {:?}", config.level))?,
    };

    let (file_layer, guard) = if config.file_enabled {
        match std::fs::create_dir_all(&config.file_dir) {
            Ok(()) => {
                let appender = match config.file_rotation {
                    LogRotation::Hourly => {
                        tracing_appender::rolling::hourly(&config.file_dir, &config.file_prefix)
                    }
                    LogRotation::Daily => {
                        tracing_appender::rolling::daily(&config.file_dir, &config.file_prefix)
                    }
                    LogRotation::Never => {
                        tracing_appender::rolling::never(&config.file_dir, &config.file_prefix)
                    }
                };
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_ansi(false);
                (Some(layer), Some(guard))
            }
            Err(e) => {
                // Subscriber isn't up yet, so this can only go to stderr
                eprintln!(
                    "Warning: could not create log directory {}: {e}; file logging disabled",
                    config.file_dir.display()
                );
                (None, None)
            }
        }
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    Ok(guard)
}

/// Bare levels apply to this crate only; full directives pass through
fn default_directive(level: &str) -> String {
    let level = level.trim();
    if level.is_empty() {
        "tether=info".to_string()
    } else if level.contains('=') || level.contains(',') {
        level.to_string()
    } else {
        format!("tether={level}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_level_scoped_to_crate() {
        assert_eq!(default_directive("debug"), "tether=debug");
        assert_eq!(default_directive(" "), "tether=info");
    }

    #[test]
    fn test_full_directive_passes_through() {
        assert_eq!(default_directive("tether=trace,warn"), "tether=trace,warn");
    }

    #[test]
    fn test_default_directive_parses() {
        for level in ["info", "debug", "tether=trace,warn"] {
            assert!(EnvFilter::try_new(default_directive(level)).is_ok());
        }
    }
}

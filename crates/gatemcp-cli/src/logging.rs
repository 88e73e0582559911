//! Log subscriber setup.

use std::io;

use anyhow::Context;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::LogFormat;

/// Filter directive for a net verbosity, `0` being the default.
pub fn default_directive(verbosity: i8) -> &'static str {
    match verbosity {
        i8::MIN..=-2 => "error",
        -1 => "warn",
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Install the global subscriber writing to stderr.
///
/// `RUST_LOG` takes precedence over `verbosity`.
///
/// # Errors
///
/// If `RUST_LOG` is malformed or a subscriber is already installed.
pub fn init(verbosity: i8, format: LogFormat) -> anyhow::Result<()> {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.is_empty() => {
            EnvFilter::try_new(&directives).context("invalid RUST_LOG directives")?
        }
        _ => EnvFilter::new(default_directive(verbosity)),
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(io::stderr).with_target(true))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(io::stderr).with_target(true))
            .try_init(),
    };
    installed.context("failed to install log subscriber")
}

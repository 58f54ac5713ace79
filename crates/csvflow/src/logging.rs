//! Process-wide log setup.
//!
//! Library code logs through the `log` facade. [`init_logging`] bridges those
//! records into `tracing` and installs a formatting subscriber.

use std::str::FromStr;

use tracing_log::LogTracer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use crate::error::LoggingError;

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "csvflow=info";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

/// Installs the global subscriber. Fails if called twice in one process.
pub fn init_logging(format: LogFormat, default_filter: &str) -> Result<(), LoggingError> {
    LogTracer::init()?;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    match format {
        LogFormat::Json => {
            let fmt_layer = fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(true)
                .with_thread_names(true);
            let subscriber = Registry::default().with(env_filter).with(fmt_layer);
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogFormat::Pretty => {
            let fmt_layer = fmt::layer().with_target(true).with_thread_names(true);
            let subscriber = Registry::default().with(env_filter).with(fmt_layer);
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    Ok(())
}

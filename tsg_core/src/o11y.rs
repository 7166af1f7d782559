use crate::{Error, Result};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "pretty" | "text" => Some(Self::Pretty),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
    /// Filter used when `RUST_LOG` is not set.
    pub default_filter: String,
}

impl LogConfig {
    pub fn from_env() -> Result<Self> {
        let format = match std::env::var("TSG_LOG_FORMAT") {
            Ok(v) => LogFormat::parse(&v)
                .ok_or_else(|| Error::InvalidInput(format!("invalid TSG_LOG_FORMAT: {v}")))?,
            Err(_) => LogFormat::Json,
        };
        Ok(Self {
            format,
            default_filter: "info".to_string(),
        })
    }
}

pub fn init_global_from_env() -> Result<()> {
    init_global(LogConfig::from_env()?)
}

/// Install the global subscriber. Errors if one is already installed.
pub fn init_global(cfg: LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.default_filter.as_str()));

    let registry = tracing_subscriber::registry().with(filter);
    let res = match cfg.format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init(),
    };
    res.map_err(|e| Error::Conflict(format!("tracing already initialized: {e}")))
}

use std::time::Duration;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    /// `json` (any case) selects JSON lines; anything else is plain text.
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Text
        }
    }
}

/// Process-level settings for the worker binary.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    /// How long to wait for an in-flight scan after a shutdown signal.
    pub shutdown_timeout: Duration,
    pub log_format: LogFormat,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default  |
    /// |-------------------------|----------|
    /// | `DATABASE_URL`          | required |
    /// | `SHUTDOWN_TIMEOUT_SECS` | `30`     |
    /// | `LOG_FORMAT`            | `text`   |
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

        let shutdown_timeout_secs: u64 = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .map_err(|e| anyhow::anyhow!("SHUTDOWN_TIMEOUT_SECS must be a valid u64: {e}"))?;

        Ok(Self {
            database_url,
            shutdown_timeout: Duration::from_secs(shutdown_timeout_secs),
            log_format: log_format_from_env(),
        })
    }
}

/// Read `LOG_FORMAT` on its own so logging can start before the rest of the
/// configuration is validated.
pub fn log_format_from_env() -> LogFormat {
    LogFormat::parse(&std::env::var("LOG_FORMAT").unwrap_or_default())
}

// ⚙️ Runtime configuration from the environment (and an optional .env file)

use anyhow::{anyhow, Context, Result};
use std::env;
use std::path::PathBuf;

use crate::fields::AmountFormat;
use crate::ingest::ParseOptions;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub database_path: PathBuf,
    pub host: String,
    pub port: u16,
    /// Source tag for directory scans that don't name one
    pub default_source: String,
    /// Source tag for single-file uploads that don't name one
    pub upload_source: String,
    pub amount_format: AmountFormat,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_path: PathBuf::from("transactions.db"),
            host: "0.0.0.0".to_string(),
            port: 8082,
            default_source: "import".to_string(),
            upload_source: "nubank".to_string(),
            amount_format: AmountFormat::brazilian(),
        }
    }
}

impl Config {
    /// Load `.env` if present, then read the process environment
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(path) = lookup("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }
        if let Some(host) = lookup("HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("PORT") {
            config.port = port
                .trim()
                .parse::<u16>()
                .with_context(|| format!("Invalid PORT: {}", port))?;
        }
        if let Some(source) = lookup("DEFAULT_SOURCE") {
            config.default_source = source;
        }
        if let Some(source) = lookup("UPLOAD_SOURCE") {
            config.upload_source = source;
        }
        if let Some(format) = lookup("AMOUNT_FORMAT") {
            config.amount_format = format
                .parse::<AmountFormat>()
                .map_err(|e| anyhow!("Invalid AMOUNT_FORMAT: {}", e))?;
        }

        Ok(config)
    }

    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            amount_format: self.amount_format,
        }
    }
}

/// Install the global tracing subscriber. `RUST_LOG` wins over `default_filter`.
pub fn init_logging(default_filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .try_init();
}

//! Application configuration and logging initialization.
//!
//! Runtime settings come from the environment (loaded via `dotenvy` in
//! `main`): `NODE_ENV`, `LOG_LEVEL`, `LOG_FORMAT`, `DATABASE_URL`,
//! `API_KEY`, `API_SECRET`, `BASE_URL`, `RECV_WINDOW_MS`, `SYMBOLS`,
//! `DRY_RUN`. Pipeline tunables keep their defaults unless constructed
//! explicitly.

use std::str::FromStr;

use tracing_subscriber::{fmt, EnvFilter};

use crate::adapter::http::HttpExchangeConfig;
use crate::application::engine::{BreakoutConfig, ContinuationConfig, ReversalConfig};
use crate::application::execution::ExecutionConfig;
use crate::application::features::FeatureConfig;
use crate::application::ingest::IngestConfig;
use crate::application::position::PositionConfig;
use crate::application::regime::RegimeConfig;
use crate::application::risk::RiskConfig;
use crate::domain::Symbol;
use crate::error::{Error, Result};

/// Deployment environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NodeEnv {
    #[default]
    Development,
    Test,
    Production,
}

impl FromStr for NodeEnv {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "development" => Ok(Self::Development),
            "test" => Ok(Self::Test),
            "production" => Ok(Self::Production),
            other => Err(Error::Config(format!("unknown NODE_ENV: {other}"))),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

const LOG_LEVELS: [&str; 7] = ["fatal", "error", "warn", "info", "debug", "trace", "silent"];

#[derive(Debug, Clone)]
pub struct Config {
    pub node_env: NodeEnv,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub api_key: String,
    pub api_secret: String,
    pub base_url: String,
    pub recv_window_ms: i64,
    /// Symbols polled by the ingest loop.
    pub symbols: Vec<Symbol>,
    /// Paper exchange + in-memory stores instead of the live exchange.
    pub dry_run: bool,
    pub ingest: IngestConfig,
    pub features: FeatureConfig,
    pub regime: RegimeConfig,
    pub breakout: BreakoutConfig,
    pub continuation: ContinuationConfig,
    pub reversal: ReversalConfig,
    pub risk: RiskConfig,
    pub execution: ExecutionConfig,
    pub position: PositionConfig,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

impl Config {
    /// Load the recognized environment variables, falling back to
    /// defaults for everything else.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for unrecognized `NODE_ENV`,
    /// `LOG_LEVEL` or unparseable numeric values.
    pub fn from_env() -> Result<Self> {
        let node_env = env_var("NODE_ENV")
            .map(|v| v.parse())
            .transpose()?
            .unwrap_or_default();

        let log_level = env_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string());
        if !LOG_LEVELS.contains(&log_level.as_str()) {
            return Err(Error::Config(format!("unknown LOG_LEVEL: {log_level}")));
        }
        let log_format = match env_var("LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        let recv_window_ms = env_var("RECV_WINDOW_MS")
            .map(|v| {
                v.parse::<i64>()
                    .map_err(|_| Error::Config(format!("unparseable RECV_WINDOW_MS: {v}")))
            })
            .transpose()?
            .unwrap_or(5_000);

        let symbols = env_var("SYMBOLS")
            .unwrap_or_else(|| "BTCUSDT".to_string())
            .split(',')
            .map(|s| Symbol::new(s.trim()))
            .collect();

        let api_key = env_var("API_KEY").unwrap_or_default();
        let api_secret = env_var("API_SECRET").unwrap_or_default();
        // Without credentials the only safe mode is the paper exchange.
        let dry_run = match env_var("DRY_RUN").as_deref() {
            Some("false") | Some("0") => false,
            Some(_) => true,
            None => api_key.is_empty(),
        };

        Ok(Self {
            node_env,
            log_level,
            log_format,
            database_url: env_var("DATABASE_URL"),
            api_key,
            api_secret,
            base_url: env_var("BASE_URL")
                .unwrap_or_else(|| "https://api.mexc.com".to_string()),
            recv_window_ms,
            symbols,
            dry_run,
            ingest: IngestConfig::default(),
            features: FeatureConfig::default(),
            regime: RegimeConfig::default(),
            breakout: BreakoutConfig::default(),
            continuation: ContinuationConfig::default(),
            reversal: ReversalConfig::default(),
            risk: RiskConfig::default(),
            execution: ExecutionConfig::default(),
            position: PositionConfig::default(),
        })
    }

    /// Initialize the tracing subscriber from this configuration.
    pub fn init_logging(&self) {
        let directive = match self.log_level.as_str() {
            "fatal" => "error",
            "silent" => "off",
            other => other,
        };
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
        match self.log_format {
            LogFormat::Json => fmt().json().with_env_filter(filter).init(),
            LogFormat::Pretty => fmt().with_env_filter(filter).init(),
        }
    }

    /// Connection settings for the HTTP exchange adapter.
    #[must_use]
    pub fn http_exchange_config(&self) -> HttpExchangeConfig {
        HttpExchangeConfig {
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            api_secret: self.api_secret.clone(),
            recv_window_ms: self.recv_window_ms,
            ..HttpExchangeConfig::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_env: NodeEnv::Development,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            database_url: None,
            api_key: String::new(),
            api_secret: String::new(),
            base_url: "https://api.mexc.com".to_string(),
            recv_window_ms: 5_000,
            symbols: vec![Symbol::new("BTCUSDT")],
            dry_run: true,
            ingest: IngestConfig::default(),
            features: FeatureConfig::default(),
            regime: RegimeConfig::default(),
            breakout: BreakoutConfig::default(),
            continuation: ContinuationConfig::default(),
            reversal: ReversalConfig::default(),
            risk: RiskConfig::default(),
            execution: ExecutionConfig::default(),
            position: PositionConfig::default(),
        }
    }
}

//! Settings read from the environment (after `.env`) at startup.

use bigdecimal::BigDecimal;
use std::env;
use std::str::FromStr;

use crate::payments::providers::razorpay::RazorpayConfig;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    /// `None` when running against in-memory stores (`SKIP_EXTERNALS=true`)
    pub database: Option<DatabaseConfig>,
    pub logging: LoggingConfig,
    pub gateway: RazorpayConfig,
    pub settlement: SettlementConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Fare split and currency settings
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// Platform share of each fare, e.g. `0.10`
    pub commission_rate: BigDecimal,
    pub currency: String,
}

/// Parse `key` as `T`, falling back to `default` when unset.
fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        Err(_) => Ok(default),
    }
}

pub fn skip_externals() -> bool {
    env::var("SKIP_EXTERNALS")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenv::dotenv().ok();

        let database = if skip_externals() {
            None
        } else {
            Some(DatabaseConfig::from_env()?)
        };

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database,
            logging: LoggingConfig::from_env()?,
            gateway: RazorpayConfig::from_env(),
            settlement: SettlementConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        if let Some(database) = &self.database {
            database.validate()?;
        }
        self.logging.validate()?;
        self.settlement.validate()?;

        if !self.gateway.test_mode && !self.gateway.is_configured() {
            return Err(ConfigError::ValidationFailed(
                "RAZORPAY_KEY_ID and RAZORPAY_KEY_SECRET are required outside test mode"
                    .to_string(),
            ));
        }

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env_or("SERVER_PORT", 8000)?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match (self.host.is_empty(), self.port) {
            (true, _) => Err(ConfigError::InvalidValue("SERVER_HOST".to_string())),
            (_, 0) => Err(ConfigError::InvalidValue("SERVER_PORT".to_string())),
            _ => Ok(()),
        }
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: env_or("DB_MAX_CONNECTIONS", 20)?,
            min_connections: env_or("DB_MIN_CONNECTIONS", 5)?,
            connection_timeout: env_or("DB_CONNECTION_TIMEOUT", 30)?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }
        if self.max_connections == 0 || self.min_connections > self.max_connections {
            return Err(ConfigError::ValidationFailed(format!(
                "pool bounds {}..={} are not usable",
                self.min_connections, self.max_connections
            )));
        }
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            format: LogFormat::Plain,
        }
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT") {
                Ok(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.level
            .parse::<tracing::Level>()
            .map(|_| ())
            .map_err(|_| ConfigError::InvalidValue("LOG_LEVEL".to_string()))
    }
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            commission_rate: BigDecimal::new(10.into(), 2),
            currency: "INR".to_string(),
        }
    }
}

impl SettlementConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(SettlementConfig {
            commission_rate: env_or("PLATFORM_COMMISSION_RATE", defaults.commission_rate)?,
            currency: env::var("PAYMENT_CURRENCY").unwrap_or(defaults.currency),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.commission_rate < BigDecimal::from(0) || self.commission_rate >= BigDecimal::from(1) {
            return Err(ConfigError::ValidationFailed(
                "PLATFORM_COMMISSION_RATE must be in [0, 1)".to_string(),
            ));
        }

        if self.currency.len() != 3 {
            return Err(ConfigError::InvalidValue("PAYMENT_CURRENCY".to_string()));
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

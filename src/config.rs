//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use std::env;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
    pub idempotency: IdempotencyConfig,
    pub fraud: FraudConfig,
    pub webhook: WebhookConfig,
    pub provider: ProviderConfig,
    pub bus: BusConfig,
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

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub redis_url: String,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Idempotency gate configuration
#[derive(Debug, Clone)]
pub struct IdempotencyConfig {
    pub ttl_seconds: u64,
}

/// Fraud scoring configuration
#[derive(Debug, Clone)]
pub struct FraudConfig {
    pub enabled: bool,
    /// Scores at or above this threshold block admission
    pub score_threshold: String,
}

/// Webhook dispatcher configuration
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub retry_attempts: i32,
    pub retry_base_delay_ms: u64,
    pub poll_interval_secs: u64,
    pub batch_limit: i64,
    pub timeout_secs: u64,
}

/// Payment provider configuration
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub charge_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

/// Event bus configuration
#[derive(Debug, Clone)]
pub struct BusConfig {
    pub partitions: usize,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            cache: CacheConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            idempotency: IdempotencyConfig::from_env()?,
            fraud: FraudConfig::from_env()?,
            webhook: WebhookConfig::from_env()?,
            provider: ProviderConfig::from_env()?,
            bus: BusConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.database.validate()?;
        self.cache.validate()?;
        self.logging.validate()?;
        self.fraud.validate()?;
        self.webhook.validate()?;
        self.bus.validate()?;

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()))?,
            min_connections: env::var("DB_MIN_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MIN_CONNECTIONS".to_string()))?,
            connection_timeout: env::var("DB_CONNECTION_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_CONNECTION_TIMEOUT".to_string()))?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl CacheConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(CacheConfig {
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            max_connections: env::var("CACHE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("CACHE_MAX_CONNECTIONS".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.redis_url.starts_with("redis://") && !self.redis_url.starts_with("rediss://") {
            return Err(ConfigError::InvalidValue(
                "REDIS_URL must start with redis:// or rediss://".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl IdempotencyConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(IdempotencyConfig {
            ttl_seconds: env::var("IDEMPOTENCY_TTL_SECONDS")
                .unwrap_or_else(|_| "86400".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("IDEMPOTENCY_TTL_SECONDS".to_string()))?,
        })
    }
}

impl FraudConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(FraudConfig {
            enabled: env::var("FRAUD_ENABLED")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("FRAUD_ENABLED".to_string()))?,
            score_threshold: env::var("FRAUD_SCORE_THRESHOLD")
                .unwrap_or_else(|_| "0.70".to_string()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let threshold: f64 = self
            .score_threshold
            .parse()
            .map_err(|_| ConfigError::InvalidValue("FRAUD_SCORE_THRESHOLD".to_string()))?;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::InvalidValue(
                "FRAUD_SCORE_THRESHOLD must be within [0, 1]".to_string(),
            ));
        }

        Ok(())
    }
}

impl WebhookConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(WebhookConfig {
            retry_attempts: env::var("WEBHOOK_RETRY_ATTEMPTS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("WEBHOOK_RETRY_ATTEMPTS".to_string()))?,
            retry_base_delay_ms: env::var("WEBHOOK_RETRY_BASE_DELAY_MS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .map_err(|_| {
                    ConfigError::InvalidValue("WEBHOOK_RETRY_BASE_DELAY_MS".to_string())
                })?,
            poll_interval_secs: env::var("WEBHOOK_POLL_INTERVAL_SECS")
                .unwrap_or_else(|_| "1".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("WEBHOOK_POLL_INTERVAL_SECS".to_string()))?,
            batch_limit: env::var("WEBHOOK_BATCH_LIMIT")
                .unwrap_or_else(|_| "50".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("WEBHOOK_BATCH_LIMIT".to_string()))?,
            timeout_secs: env::var("WEBHOOK_TIMEOUT_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("WEBHOOK_TIMEOUT_SECS".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry_attempts <= 0 {
            return Err(ConfigError::InvalidValue(
                "WEBHOOK_RETRY_ATTEMPTS must be positive".to_string(),
            ));
        }

        // The poll period must not exceed the smallest retry delay, or due
        // webhooks sit idle past their schedule.
        if self.poll_interval_secs * 1000 > self.retry_base_delay_ms {
            return Err(ConfigError::InvalidValue(
                "WEBHOOK_POLL_INTERVAL_SECS must not exceed WEBHOOK_RETRY_BASE_DELAY_MS"
                    .to_string(),
            ));
        }

        Ok(())
    }
}

impl ProviderConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ProviderConfig {
            charge_url: env::var("PROVIDER_CHARGE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:9200/charges".to_string()),
            api_key: env::var("PROVIDER_API_KEY").ok(),
            timeout_secs: env::var("PROVIDER_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("PROVIDER_TIMEOUT_SECS".to_string()))?,
            max_retries: env::var("PROVIDER_MAX_RETRIES")
                .unwrap_or_else(|_| "0".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("PROVIDER_MAX_RETRIES".to_string()))?,
        })
    }
}

impl BusConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(BusConfig {
            partitions: env::var("BUS_PARTITIONS")
                .unwrap_or_else(|_| "4".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("BUS_PARTITIONS".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.partitions == 0 {
            return Err(ConfigError::InvalidValue(
                "BUS_PARTITIONS cannot be 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),
}

//! Shared configuration loader for MovieRec services
//!
//! Every setting is read from the environment, with the `MOVIEREC_` prefix taking
//! precedence over the unprefixed names older deployments used (`DATABASE_URL`,
//! `MODEL_PATH`, `MAX_CONTEXT_LENGTH`, ...). Override order:
//! defaults < .env < environment.
//!
//! # Example
//!
//! ```no_run
//! use movierec_core::config::{load_dotenv, ConfigLoader, DatabaseConfig, RecommenderConfig};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! load_dotenv();
//!
//! let db_config = DatabaseConfig::from_env()?;
//! let recommender_config = RecommenderConfig::from_env()?;
//!
//! db_config.validate()?;
//! recommender_config.validate()?;
//! # Ok(())
//! # }
//! ```

use crate::error::CoreError;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Configuration loader trait
///
/// Provides standardized methods for loading and validating configuration from
/// environment variables.
pub trait ConfigLoader: Sized {
    /// Load configuration from environment variables, falling back to defaults
    /// for anything unset.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if a variable is set but cannot be parsed.
    fn from_env() -> Result<Self, CoreError>;

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` naming the offending variable.
    fn validate(&self) -> Result<(), CoreError>;
}

/// PostgreSQL connection settings.
///
/// # Environment Variables
///
/// - `MOVIEREC_DATABASE_URL` / `DATABASE_URL` (required)
/// - `MOVIEREC_DATABASE_MAX_CONNECTIONS` (default: 20)
/// - `MOVIEREC_DATABASE_MIN_CONNECTIONS` (default: 2)
/// - `MOVIEREC_DATABASE_CONNECT_TIMEOUT` seconds (default: 30)
/// - `MOVIEREC_DATABASE_IDLE_TIMEOUT` seconds (default: 600)
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/movierec".to_string(),
            max_connections: 20,
            min_connections: 2,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

impl ConfigLoader for DatabaseConfig {
    fn from_env() -> Result<Self, CoreError> {
        let url = std::env::var("MOVIEREC_DATABASE_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .map_err(|_| {
                CoreError::config(
                    "DATABASE_URL or MOVIEREC_DATABASE_URL must be set",
                    "MOVIEREC_DATABASE_URL",
                )
            })?;

        let defaults = DatabaseConfig::default();
        let max_connections =
            parse_env_var("MOVIEREC_DATABASE_MAX_CONNECTIONS", defaults.max_connections)?;
        let min_connections =
            parse_env_var("MOVIEREC_DATABASE_MIN_CONNECTIONS", defaults.min_connections)?;
        let connect_timeout_secs = parse_env_var("MOVIEREC_DATABASE_CONNECT_TIMEOUT", 30u64)?;
        let idle_timeout_secs = parse_env_var("MOVIEREC_DATABASE_IDLE_TIMEOUT", 600u64)?;

        Ok(Self {
            url,
            max_connections,
            min_connections,
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            idle_timeout: Duration::from_secs(idle_timeout_secs),
        })
    }

    fn validate(&self) -> Result<(), CoreError> {
        Url::parse(&self.url).map_err(|e| {
            CoreError::config(format!("Invalid DATABASE_URL: {}", e), "MOVIEREC_DATABASE_URL")
        })?;

        if self.max_connections == 0 {
            return Err(CoreError::config(
                "max_connections must be greater than 0",
                "MOVIEREC_DATABASE_MAX_CONNECTIONS",
            ));
        }

        if self.min_connections > self.max_connections {
            return Err(CoreError::config(
                format!(
                    "min_connections ({}) cannot exceed max_connections ({})",
                    self.min_connections, self.max_connections
                ),
                "MOVIEREC_DATABASE_MIN_CONNECTIONS",
            ));
        }

        if self.connect_timeout.as_secs() == 0 {
            return Err(CoreError::config(
                "connect_timeout must be greater than 0 seconds",
                "MOVIEREC_DATABASE_CONNECT_TIMEOUT",
            ));
        }

        Ok(())
    }
}

/// HTTP service settings for the recommendation service binary.
///
/// - `MOVIEREC_SERVICE_HOST` / `HOST` (default: "0.0.0.0")
/// - `MOVIEREC_SERVICE_PORT` / `PORT` (default: 8082)
/// - `MOVIEREC_SERVICE_WORKERS` (default: available parallelism)
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8082,
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        }
    }
}

impl ConfigLoader for ServiceConfig {
    fn from_env() -> Result<Self, CoreError> {
        let defaults = ServiceConfig::default();

        let host = std::env::var("MOVIEREC_SERVICE_HOST")
            .or_else(|_| std::env::var("HOST"))
            .unwrap_or(defaults.host);
        let port = parse_env_var_or("MOVIEREC_SERVICE_PORT", "PORT", defaults.port)?;
        let workers = parse_env_var("MOVIEREC_SERVICE_WORKERS", defaults.workers)?;

        Ok(Self {
            host,
            port,
            workers,
        })
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.port == 0 {
            return Err(CoreError::config(
                "port must be greater than 0",
                "MOVIEREC_SERVICE_PORT",
            ));
        }
        if self.workers == 0 {
            return Err(CoreError::config(
                "workers must be greater than 0",
                "MOVIEREC_SERVICE_WORKERS",
            ));
        }
        Ok(())
    }
}

/// Sequential recommender settings shared by training and serving.
///
/// # Environment Variables
///
/// | Variable | Fallback | Default |
/// |----------|----------|---------|
/// | `MOVIEREC_MODEL_PATH` | `MODEL_PATH` | `./models_store/sequential_model.bin` |
/// | `MOVIEREC_MAX_CONTEXT_LENGTH` | `MAX_CONTEXT_LENGTH` | 10 |
/// | `MOVIEREC_MIN_SEQUENCE_LENGTH` | `MIN_SEQUENCE_LENGTH` | 3 |
/// | `MOVIEREC_EMBEDDING_DIM` | `EMBEDDING_DIM` | 32 |
/// | `MOVIEREC_MIN_RATING` | | 2.0 |
/// | `MOVIEREC_BATCH_SIZE` | | 4096 |
/// | `MOVIEREC_EPOCHS` | | 5 |
/// | `MOVIEREC_LEARNING_RATE` | | 0.005 |
/// | `MOVIEREC_TRAIN_FRACTION` | | 0.9 |
/// | `MOVIEREC_RETRIEVAL_K` | | 10 |
/// | `MOVIEREC_DEFAULT_COUNT` | | 10 |
/// | `MOVIEREC_MAX_COUNT` | | 50 |
/// | `MOVIEREC_SEED` | | unset (random) |
#[derive(Debug, Clone)]
pub struct RecommenderConfig {
    /// Where the trained model artifact lives; its mtime drives reloads
    pub model_path: PathBuf,
    pub max_context_length: usize,
    pub min_sequence_length: usize,
    pub embedding_dim: usize,
    /// Ratings strictly below this are dropped before training
    pub min_rating: f32,
    pub batch_size: usize,
    pub epochs: usize,
    pub learning_rate: f32,
    /// Fraction of shuffled examples used for fitting; the rest validates
    pub train_fraction: f32,
    /// Minimum number of candidates pulled from the nearest-neighbour search
    pub retrieval_k: usize,
    pub default_count: usize,
    pub max_count: usize,
    /// Fixed RNG seed for reproducible training runs
    pub seed: Option<u64>,
}

impl Default for RecommenderConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("./models_store/sequential_model.bin"),
            max_context_length: 10,
            min_sequence_length: 3,
            embedding_dim: 32,
            min_rating: 2.0,
            batch_size: 4096,
            epochs: 5,
            learning_rate: 0.005,
            train_fraction: 0.9,
            retrieval_k: 10,
            default_count: 10,
            max_count: 50,
            seed: None,
        }
    }
}

impl ConfigLoader for RecommenderConfig {
    fn from_env() -> Result<Self, CoreError> {
        let defaults = RecommenderConfig::default();

        let model_path = std::env::var("MOVIEREC_MODEL_PATH")
            .or_else(|_| std::env::var("MODEL_PATH"))
            .map(PathBuf::from)
            .unwrap_or(defaults.model_path);

        let seed = match std::env::var("MOVIEREC_SEED") {
            Ok(raw) => Some(raw.parse::<u64>().map_err(|e| {
                CoreError::config(format!("Failed to parse MOVIEREC_SEED: {}", e), "MOVIEREC_SEED")
            })?),
            Err(_) => None,
        };

        Ok(Self {
            model_path,
            max_context_length: parse_env_var_or(
                "MOVIEREC_MAX_CONTEXT_LENGTH",
                "MAX_CONTEXT_LENGTH",
                defaults.max_context_length,
            )?,
            min_sequence_length: parse_env_var_or(
                "MOVIEREC_MIN_SEQUENCE_LENGTH",
                "MIN_SEQUENCE_LENGTH",
                defaults.min_sequence_length,
            )?,
            embedding_dim: parse_env_var_or(
                "MOVIEREC_EMBEDDING_DIM",
                "EMBEDDING_DIM",
                defaults.embedding_dim,
            )?,
            min_rating: parse_env_var("MOVIEREC_MIN_RATING", defaults.min_rating)?,
            batch_size: parse_env_var("MOVIEREC_BATCH_SIZE", defaults.batch_size)?,
            epochs: parse_env_var("MOVIEREC_EPOCHS", defaults.epochs)?,
            learning_rate: parse_env_var("MOVIEREC_LEARNING_RATE", defaults.learning_rate)?,
            train_fraction: parse_env_var("MOVIEREC_TRAIN_FRACTION", defaults.train_fraction)?,
            retrieval_k: parse_env_var("MOVIEREC_RETRIEVAL_K", defaults.retrieval_k)?,
            default_count: parse_env_var("MOVIEREC_DEFAULT_COUNT", defaults.default_count)?,
            max_count: parse_env_var("MOVIEREC_MAX_COUNT", defaults.max_count)?,
            seed,
        })
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.model_path.as_os_str().is_empty() {
            return Err(CoreError::config("model_path must not be empty", "MOVIEREC_MODEL_PATH"));
        }
        if self.max_context_length == 0 {
            return Err(CoreError::config(
                "max_context_length must be greater than 0",
                "MOVIEREC_MAX_CONTEXT_LENGTH",
            ));
        }
        if self.min_sequence_length < 2 {
            return Err(CoreError::config(
                format!(
                    "min_sequence_length ({}) must be at least 2 to yield a training example",
                    self.min_sequence_length
                ),
                "MOVIEREC_MIN_SEQUENCE_LENGTH",
            ));
        }
        if self.embedding_dim == 0 {
            return Err(CoreError::config(
                "embedding_dim must be greater than 0",
                "MOVIEREC_EMBEDDING_DIM",
            ));
        }
        if self.batch_size == 0 {
            return Err(CoreError::config(
                "batch_size must be greater than 0",
                "MOVIEREC_BATCH_SIZE",
            ));
        }
        if self.epochs == 0 {
            return Err(CoreError::config("epochs must be greater than 0", "MOVIEREC_EPOCHS"));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(CoreError::config(
                format!("learning_rate ({}) must be a positive number", self.learning_rate),
                "MOVIEREC_LEARNING_RATE",
            ));
        }
        if !(self.train_fraction > 0.0 && self.train_fraction <= 1.0) {
            return Err(CoreError::config(
                format!("train_fraction ({}) must be in (0, 1]", self.train_fraction),
                "MOVIEREC_TRAIN_FRACTION",
            ));
        }
        if self.retrieval_k == 0 {
            return Err(CoreError::config(
                "retrieval_k must be greater than 0",
                "MOVIEREC_RETRIEVAL_K",
            ));
        }
        if self.default_count == 0 || self.default_count > self.max_count {
            return Err(CoreError::config(
                format!(
                    "default_count ({}) must be in 1..={}",
                    self.default_count, self.max_count
                ),
                "MOVIEREC_DEFAULT_COUNT",
            ));
        }
        Ok(())
    }
}

/// Parse an environment variable, returning `default` when it is unset.
///
/// # Errors
///
/// Returns a `ConfigurationError` if the value is set but cannot be parsed.
fn parse_env_var<T>(key: &str, default: T) -> Result<T, CoreError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    std::env::var(key)
        .ok()
        .map(|v| {
            v.parse::<T>()
                .map_err(|e| CoreError::config(format!("Failed to parse {}: {}", key, e), key))
        })
        .unwrap_or(Ok(default))
}

/// Like [`parse_env_var`], consulting `fallback` when `key` is unset.
fn parse_env_var_or<T>(key: &str, fallback: &str, default: T) -> Result<T, CoreError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if std::env::var(key).is_ok() {
        parse_env_var(key, default)
    } else {
        parse_env_var(fallback, default)
    }
}

/// Load .env file if present
///
/// Missing files are ignored; anything else is reported on stderr because the
/// logger is usually not installed yet at this point.
pub fn load_dotenv() {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn set_test_env(key: &str, value: &str) {
        env::set_var(key, value);
    }

    fn clear_test_env(key: &str) {
        env::remove_var(key);
    }

    #[test]
    fn test_database_config_default() {
        let config = DatabaseConfig::default();
        assert_eq!(config.max_connections, 20);
        assert_eq!(config.min_connections, 2);
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.idle_timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_database_config_validation_invalid_url() {
        let config = DatabaseConfig {
            url: "not-a-valid-url".to_string(),
            ..DatabaseConfig::default()
        };

        let result = config.validate();
        assert!(matches!(result, Err(CoreError::ConfigurationError { .. })));
    }

    #[test]
    fn test_database_config_validation_min_exceeds_max() {
        let config = DatabaseConfig {
            url: "postgresql://localhost/test".to_string(),
            min_connections: 30,
            max_connections: 20,
            ..DatabaseConfig::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_recommender_config_defaults_match_original_deployment() {
        let config = RecommenderConfig::default();
        assert_eq!(config.max_context_length, 10);
        assert_eq!(config.min_sequence_length, 3);
        assert_eq!(config.embedding_dim, 32);
        assert_eq!(config.batch_size, 4096);
        assert_eq!(config.epochs, 5);
        assert!((config.train_fraction - 0.9).abs() < f32::EPSILON);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_recommender_config_rejects_short_min_sequence() {
        let config = RecommenderConfig {
            min_sequence_length: 1,
            ..RecommenderConfig::default()
        };

        let err = config.validate().unwrap_err();
        assert_eq!(err.key(), Some("MOVIEREC_MIN_SEQUENCE_LENGTH"));
    }

    #[test]
    fn test_recommender_config_rejects_bad_train_fraction() {
        let config = RecommenderConfig {
            train_fraction: 1.5,
            ..RecommenderConfig::default()
        };
        assert!(config.validate().is_err());

        let config = RecommenderConfig {
            train_fraction: 0.0,
            ..RecommenderConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_service_config_validation_zero_port() {
        let config = ServiceConfig {
            port: 0,
            ..ServiceConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_env_var_with_default() {
        let result: u32 = parse_env_var("MOVIEREC_TEST_NON_EXISTENT_VAR", 42).unwrap();
        assert_eq!(result, 42);
    }

    #[test]
    fn test_parse_env_var_invalid_value() {
        set_test_env("MOVIEREC_TEST_INVALID_VAR", "not-a-number");
        let result: Result<u32, _> = parse_env_var("MOVIEREC_TEST_INVALID_VAR", 42);
        assert!(result.is_err());
        clear_test_env("MOVIEREC_TEST_INVALID_VAR");
    }

    #[test]
    fn test_parse_env_var_or_uses_fallback() {
        set_test_env("MOVIEREC_TEST_FALLBACK_ONLY", "7");
        let result: usize =
            parse_env_var_or("MOVIEREC_TEST_PRIMARY_UNSET", "MOVIEREC_TEST_FALLBACK_ONLY", 3)
                .unwrap();
        assert_eq!(result, 7);
        clear_test_env("MOVIEREC_TEST_FALLBACK_ONLY");
    }

    #[test]
    fn test_parse_env_var_or_prefers_primary() {
        set_test_env("MOVIEREC_TEST_PRIMARY_SET", "12");
        set_test_env("MOVIEREC_TEST_FALLBACK_SET", "7");
        let result: usize =
            parse_env_var_or("MOVIEREC_TEST_PRIMARY_SET", "MOVIEREC_TEST_FALLBACK_SET", 3)
                .unwrap();
        assert_eq!(result, 12);
        clear_test_env("MOVIEREC_TEST_PRIMARY_SET");
        clear_test_env("MOVIEREC_TEST_FALLBACK_SET");
    }
}

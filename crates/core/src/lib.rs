//! # MovieRec Core
//!
//! Shared building blocks for the MovieRec services.
//!
//! ## Modules
//!
//! - `config`: Configuration loading and validation
//! - `database`: Shared PostgreSQL connection pool
//! - `error`: Error type for configuration and database bootstrap
//! - `models`: Catalog and rating records
//! - `observability`: Structured logging setup

pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod observability;

pub use config::{load_dotenv, ConfigLoader, DatabaseConfig, RecommenderConfig, ServiceConfig};
pub use database::DatabasePool;
pub use error::CoreError;
pub use models::{ItemId, Movie, RatingEvent, UserId, PADDING_ITEM_ID};
pub use observability::{init_logging, LogConfig, LogFormat, ObservabilityError};

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

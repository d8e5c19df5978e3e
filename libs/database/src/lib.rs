//! Store connectors for the notification service.
//!
//! # Features
//!
//! - `mongodb` (default) - MongoDB client setup and health checks
//! - `config` - `core_config::FromEnv` support for `MongoConfig`
//!
//! ```ignore
//! use core_config::FromEnv;
//! use database::{common::RetryConfig, mongodb};
//!
//! let config = mongodb::MongoConfig::from_env()?;
//! let db = mongodb::connect_database_with_retry(&config, RetryConfig::default()).await?;
//! ```

pub mod common;

#[cfg(feature = "mongodb")]
pub mod mongodb;

//! Utilities shared by the store connectors

pub mod retry;

pub use retry::{RetryConfig, retry_with_backoff};

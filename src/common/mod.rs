//! Common utilities and types shared across minielect

pub mod config;
pub mod error;
pub mod paths;
pub mod utils;

pub use config::{Config, CoordinationConfig, ElectionConfig, RetryPolicy};
pub use error::{Error, Result};
pub use utils::{parse_duration, retry_with_backoff, with_timeout, CallPolicy};

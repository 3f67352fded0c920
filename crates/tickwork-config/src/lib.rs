//! # Tickwork Config
//!
//! TOML configuration for the Tickwork scheduler binary.

mod error;
mod loader;
mod schema;
mod validator;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::*;
pub use validator::{
    ConfigValidator, ValidationError, ValidationResult, ValidationWarning, MAX_JOB_EXPIRATION_DAYS,
};

//! Bindings Configuration System
//!
//! Provides configuration for the FFI boundary layer:
//! - Project configuration (bindings.toml)
//! - Global user configuration (~/.bindings/config.toml)
//! - Environment variable overrides (BINDINGS_*)
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded and merged in the following order (later overrides earlier):
//! 1. Global config (~/.bindings/config.toml)
//! 2. Project config (./bindings.toml)
//! 3. Environment variables (BINDINGS_*)
//! 4. Explicit options set by the caller
//!
//! # Example
//!
//! ```no_run
//! use bindings_config::ConfigLoader;
//! use std::path::Path;
//!
//! let mut loader = ConfigLoader::new();
//! let config = loader.load_from_directory(Path::new(".")).unwrap();
//! println!("encoding: {}", config.encoding());
//! ```

pub mod loader;
pub mod settings;

use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid TOML syntax in {file}: {error}")]
    TomlParseError {
        file: PathBuf,
        error: toml::de::Error,
    },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Home directory not found")]
    HomeNotFound,
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

// Re-export main types
pub use loader::{Config, ConfigLoader};
pub use settings::{
    BindingsConfig, BuffersConfig, LibraryConfig, LogLevel, LogSink, LoggingConfig,
    MarshalConfig, ReleasePolicy, TextEncoding,
};

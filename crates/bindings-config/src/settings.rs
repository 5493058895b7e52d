//! Configuration file schema (bindings.toml / ~/.bindings/config.toml)
//!
//! Both the project file and the global file share this schema. Every field
//! is optional so that a file only needs to mention what it overrides.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Contents of one configuration file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct BindingsConfig {
    /// Native library selection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library: Option<LibraryConfig>,

    /// String marshaling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marshal: Option<MarshalConfig>,

    /// Native buffer ownership
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buffers: Option<BuffersConfig>,

    /// Boundary event logging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

/// `[library]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct LibraryConfig {
    /// Library name or path to open
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Extra directories searched before the system library directories
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search_paths: Vec<PathBuf>,
}

/// `[marshal]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct MarshalConfig {
    /// Text encoding used for `char*` arguments and results
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<TextEncoding>,
}

/// `[buffers]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct BuffersConfig {
    /// What a second release of the same native buffer does
    #[serde(skip_serializing_if = "Option::is_none")]
    pub double_release: Option<ReleasePolicy>,
}

/// `[logging]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Where boundary events go
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sink: Option<LogSink>,

    /// Minimum severity that is recorded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<LogLevel>,
}

/// Text encoding for C strings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TextEncoding {
    /// UTF-8 (default)
    #[default]
    #[serde(rename = "utf-8", alias = "utf8")]
    Utf8,
    /// 7-bit ASCII; bytes above 0x7F are rejected
    #[serde(rename = "ascii")]
    Ascii,
    /// ISO-8859-1; every byte maps to one code point
    #[serde(rename = "latin-1", alias = "latin1")]
    Latin1,
}

impl TextEncoding {
    /// Canonical configuration name
    pub fn name(self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Ascii => "ascii",
            TextEncoding::Latin1 => "latin-1",
        }
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TextEncoding {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(TextEncoding::Utf8),
            "ascii" | "us-ascii" => Ok(TextEncoding::Ascii),
            "latin-1" | "latin1" | "iso-8859-1" => Ok(TextEncoding::Latin1),
            other => Err(ConfigError::InvalidValue {
                field: "marshal.encoding".to_string(),
                reason: format!("unknown encoding '{}'", other),
            }),
        }
    }
}

/// Behavior of a second release of the same native buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleasePolicy {
    /// Report `DoubleFree` (default)
    #[default]
    Error,
    /// Treat the second release as a no-op
    Ignore,
}

impl ReleasePolicy {
    /// Canonical configuration name
    pub fn name(self) -> &'static str {
        match self {
            ReleasePolicy::Error => "error",
            ReleasePolicy::Ignore => "ignore",
        }
    }
}

impl fmt::Display for ReleasePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ReleasePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(ReleasePolicy::Error),
            "ignore" => Ok(ReleasePolicy::Ignore),
            other => Err(ConfigError::InvalidValue {
                field: "buffers.double_release".to_string(),
                reason: format!("expected 'error' or 'ignore', got '{}'", other),
            }),
        }
    }
}

/// Destination of boundary events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSink {
    /// Drop every event (default)
    #[default]
    None,
    /// Colored lines on stderr
    Stderr,
    /// Keep events in memory
    Memory,
}

impl FromStr for LogSink {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(LogSink::None),
            "stderr" => Ok(LogSink::Stderr),
            "memory" => Ok(LogSink::Memory),
            other => Err(ConfigError::InvalidValue {
                field: "logging.sink".to_string(),
                reason: format!("unknown sink '{}'", other),
            }),
        }
    }
}

/// Minimum recorded severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Info,
    Warning,
    Error,
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(LogLevel::Info),
            "warning" | "warn" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other => Err(ConfigError::InvalidValue {
                field: "logging.level".to_string(),
                reason: format!("unknown level '{}'", other),
            }),
        }
    }
}

impl BindingsConfig {
    /// Load a configuration file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            file: path.to_path_buf(),
            error: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate values serde cannot check on its own
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(library) = &self.library {
            if let Some(path) = &library.path {
                if path.trim().is_empty() {
                    return Err(ConfigError::InvalidValue {
                        field: "library.path".to_string(),
                        reason: "must not be empty".to_string(),
                    });
                }
            }
            if library.search_paths.iter().any(|p| p.as_os_str().is_empty()) {
                return Err(ConfigError::InvalidValue {
                    field: "library.search_paths".to_string(),
                    reason: "entries must not be empty".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Library path, if set
    pub fn library_path(&self) -> Option<&str> {
        self.library.as_ref()?.path.as_deref()
    }

    /// Search paths (empty when unset)
    pub fn search_paths(&self) -> &[PathBuf] {
        self.library
            .as_ref()
            .map(|l| l.search_paths.as_slice())
            .unwrap_or(&[])
    }

    /// Encoding, if set
    pub fn encoding(&self) -> Option<TextEncoding> {
        self.marshal.as_ref()?.encoding
    }

    /// Release policy, if set
    pub fn double_release(&self) -> Option<ReleasePolicy> {
        self.buffers.as_ref()?.double_release
    }

    /// Log sink, if set
    pub fn log_sink(&self) -> Option<LogSink> {
        self.logging.as_ref()?.sink
    }

    /// Log level, if set
    pub fn log_level(&self) -> Option<LogLevel> {
        self.logging.as_ref()?.level
    }
}

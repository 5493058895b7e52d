//! Runtime options derived from configuration

use crate::ffi::events::{EventLogger, MemoryEventLogger, NullEventLogger, StderrEventLogger};
use bindings_config::{Config, LogSink, ReleasePolicy, TextEncoding};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Settings applied to handles, bindings and buffers
#[derive(Clone)]
pub struct BoundaryOptions {
    /// Library to open when none is named explicitly
    pub library: Option<String>,
    /// Directories searched before the current directory and system paths
    pub search_paths: Vec<PathBuf>,
    /// Text encoding for `char*` values
    pub encoding: TextEncoding,
    /// Behavior of a second release of the same native buffer
    pub release_policy: ReleasePolicy,
    /// Destination of boundary events
    pub logger: Arc<dyn EventLogger>,
}

impl BoundaryOptions {
    /// Options with every value taken from a loaded configuration
    pub fn from_config(config: &Config) -> Self {
        let logger: Arc<dyn EventLogger> = match config.log_sink() {
            LogSink::None => Arc::new(NullEventLogger),
            LogSink::Stderr => Arc::new(StderrEventLogger::new(config.log_level().into())),
            LogSink::Memory => Arc::new(MemoryEventLogger::with_min_severity(
                config.log_level().into(),
            )),
        };

        Self {
            library: config.library_path().map(str::to_string),
            search_paths: config.search_paths(),
            encoding: config.encoding(),
            release_policy: config.double_release(),
            logger,
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn EventLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_encoding(mut self, encoding: TextEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_release_policy(mut self, policy: ReleasePolicy) -> Self {
        self.release_policy = policy;
        self
    }
}

impl Default for BoundaryOptions {
    fn default() -> Self {
        Self {
            library: None,
            search_paths: Vec::new(),
            encoding: TextEncoding::default(),
            release_policy: ReleasePolicy::default(),
            logger: Arc::new(NullEventLogger),
        }
    }
}

impl fmt::Debug for BoundaryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundaryOptions")
            .field("library", &self.library)
            .field("search_paths", &self.search_paths)
            .field("encoding", &self.encoding)
            .field("release_policy", &self.release_policy)
            .finish_non_exhaustive()
    }
}

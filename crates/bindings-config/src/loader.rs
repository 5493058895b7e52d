//! Configuration Loader
//!
//! Handles loading and merging configuration from multiple sources with proper precedence.

use crate::settings::{
    BindingsConfig, BuffersConfig, LibraryConfig, LogLevel, LogSink, LoggingConfig,
    MarshalConfig, ReleasePolicy, TextEncoding,
};
use crate::{ConfigError, ConfigResult};
use std::env;
use std::path::{Path, PathBuf};

/// Name of the project configuration file
pub const PROJECT_FILE: &str = "bindings.toml";

/// Configuration loader
///
/// Loads configuration from multiple sources and merges them with proper precedence:
/// 1. Global config (~/.bindings/config.toml) - lowest priority
/// 2. Project config (./bindings.toml) - overrides global
/// 3. Environment variables (BINDINGS_*) - overrides project
/// 4. Explicit options - highest priority (handled by caller)
pub struct ConfigLoader {
    /// Cached global config path
    global_config_path: Option<PathBuf>,
}

/// Merged configuration result
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Project configuration, with environment overrides applied
    pub project: BindingsConfig,

    /// Global configuration
    pub global: BindingsConfig,

    /// Project root directory (where bindings.toml was found)
    pub project_root: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            global_config_path: None,
        }
    }

    /// Use an explicit global config file instead of ~/.bindings/config.toml
    pub fn with_global_config_path(path: impl Into<PathBuf>) -> Self {
        Self {
            global_config_path: Some(path.into()),
        }
    }

    /// Load configuration starting from the given directory
    ///
    /// Walks up the directory tree to find bindings.toml, then loads and merges
    /// global config if it exists.
    pub fn load_from_directory(&mut self, start_dir: &Path) -> ConfigResult<Config> {
        let (project_root, project_config) = self.find_project_config(start_dir)?;
        let global_config = self.load_global_config()?;
        let project_config = self.apply_env_overrides(project_config)?;

        Ok(Config {
            project: project_config,
            global: global_config,
            project_root,
        })
    }

    /// Load configuration from a specific project config file
    pub fn load_from_file(&mut self, config_path: &Path) -> ConfigResult<Config> {
        let project_config = BindingsConfig::load_from_file(config_path)?;
        let global_config = self.load_global_config()?;
        let project_config = self.apply_env_overrides(project_config)?;

        Ok(Config {
            project: project_config,
            global: global_config,
            project_root: config_path.parent().map(|p| p.to_path_buf()),
        })
    }

    /// Find project configuration by walking up directory tree
    fn find_project_config(
        &self,
        start_dir: &Path,
    ) -> ConfigResult<(Option<PathBuf>, BindingsConfig)> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(PROJECT_FILE);

            if config_path.exists() {
                let project_config = BindingsConfig::load_from_file(&config_path)?;
                return Ok((Some(current), project_config));
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => return Ok((None, BindingsConfig::default())),
            }
        }
    }

    /// Load global configuration; a missing file (or home directory) yields defaults
    fn load_global_config(&mut self) -> ConfigResult<BindingsConfig> {
        if self.global_config_path.is_none() {
            match Self::global_config_dir() {
                Ok(dir) => self.global_config_path = Some(dir.join("config.toml")),
                Err(ConfigError::HomeNotFound) => return Ok(BindingsConfig::default()),
                Err(e) => return Err(e),
            }
        }

        match &self.global_config_path {
            Some(path) if path.exists() => BindingsConfig::load_from_file(path),
            _ => Ok(BindingsConfig::default()),
        }
    }

    /// Apply environment variable overrides to project config
    ///
    /// Recognized variables: BINDINGS_LIBRARY, BINDINGS_ENCODING,
    /// BINDINGS_DOUBLE_RELEASE, BINDINGS_LOG, BINDINGS_LOG_LEVEL.
    fn apply_env_overrides(&self, mut config: BindingsConfig) -> ConfigResult<BindingsConfig> {
        if let Ok(library) = env::var("BINDINGS_LIBRARY") {
            config
                .library
                .get_or_insert_with(LibraryConfig::default)
                .path = Some(library);
        }

        if let Ok(encoding) = env::var("BINDINGS_ENCODING") {
            config
                .marshal
                .get_or_insert_with(MarshalConfig::default)
                .encoding = Some(encoding.parse()?);
        }

        if let Ok(policy) = env::var("BINDINGS_DOUBLE_RELEASE") {
            config
                .buffers
                .get_or_insert_with(BuffersConfig::default)
                .double_release = Some(policy.parse()?);
        }

        if let Ok(sink) = env::var("BINDINGS_LOG") {
            config
                .logging
                .get_or_insert_with(LoggingConfig::default)
                .sink = Some(sink.parse()?);
        }

        if let Ok(level) = env::var("BINDINGS_LOG_LEVEL") {
            config
                .logging
                .get_or_insert_with(LoggingConfig::default)
                .level = Some(level.parse()?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Get the global configuration directory (~/.bindings)
    pub fn global_config_dir() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".bindings"))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Library to open (project > global)
    pub fn library_path(&self) -> Option<&str> {
        self.project
            .library_path()
            .or_else(|| self.global.library_path())
    }

    /// Search paths, project entries first; relative project entries are
    /// resolved against the project root
    pub fn search_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self
            .project
            .search_paths()
            .iter()
            .map(|p| match &self.project_root {
                Some(root) if p.is_relative() => root.join(p),
                _ => p.clone(),
            })
            .collect();
        paths.extend(self.global.search_paths().iter().cloned());
        paths
    }

    /// Effective text encoding (project > global > utf-8)
    pub fn encoding(&self) -> TextEncoding {
        self.project
            .encoding()
            .or_else(|| self.global.encoding())
            .unwrap_or_default()
    }

    /// Effective double-release policy (project > global > error)
    pub fn double_release(&self) -> ReleasePolicy {
        self.project
            .double_release()
            .or_else(|| self.global.double_release())
            .unwrap_or_default()
    }

    /// Effective log sink (project > global > none)
    pub fn log_sink(&self) -> LogSink {
        self.project
            .log_sink()
            .or_else(|| self.global.log_sink())
            .unwrap_or_default()
    }

    /// Effective log level (project > global > info)
    pub fn log_level(&self) -> LogLevel {
        self.project
            .log_level()
            .or_else(|| self.global.log_level())
            .unwrap_or_default()
    }

    /// Get the project root directory
    pub fn project_root(&self) -> Option<&Path> {
        self.project_root.as_deref()
    }

    /// Check if a bindings.toml was found
    pub fn is_project(&self) -> bool {
        self.project_root.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    fn create_config_file(dir: &Path, content: &str) -> PathBuf {
        let config_path = dir.join(PROJECT_FILE);
        fs::write(&config_path, content).unwrap();
        config_path
    }

    fn isolated_loader(dir: &TempDir) -> ConfigLoader {
        ConfigLoader::with_global_config_path(dir.path().join("no-global.toml"))
    }

    #[test]
    #[serial]
    fn test_load_project_config() {
        let temp_dir = TempDir::new().unwrap();
        create_config_file(
            temp_dir.path(),
            r#"
[library]
path = "bindings_demo"
"#,
        );

        let mut loader = isolated_loader(&temp_dir);
        let config = loader.load_from_directory(temp_dir.path()).unwrap();

        assert_eq!(config.library_path(), Some("bindings_demo"));
        assert!(config.is_project());
    }

    #[test]
    #[serial]
    fn test_find_config_in_parent() {
        let temp_dir = TempDir::new().unwrap();
        create_config_file(temp_dir.path(), "[marshal]\nencoding = \"ascii\"\n");

        let sub_dir = temp_dir.path().join("subdir");
        fs::create_dir(&sub_dir).unwrap();

        let mut loader = isolated_loader(&temp_dir);
        let config = loader.load_from_directory(&sub_dir).unwrap();

        assert_eq!(config.encoding(), TextEncoding::Ascii);
        assert_eq!(config.project_root(), Some(temp_dir.path()));
    }

    #[test]
    #[serial]
    fn test_env_override_encoding() {
        let temp_dir = TempDir::new().unwrap();
        create_config_file(temp_dir.path(), "[marshal]\nencoding = \"utf-8\"\n");

        env::set_var("BINDINGS_ENCODING", "latin1");

        let mut loader = isolated_loader(&temp_dir);
        let config = loader.load_from_directory(temp_dir.path()).unwrap();

        assert_eq!(config.encoding(), TextEncoding::Latin1);

        env::remove_var("BINDINGS_ENCODING");
    }

    #[test]
    #[serial]
    fn test_env_override_invalid_value() {
        let temp_dir = TempDir::new().unwrap();

        env::set_var("BINDINGS_DOUBLE_RELEASE", "maybe");

        let mut loader = isolated_loader(&temp_dir);
        let result = loader.load_from_directory(temp_dir.path());

        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));

        env::remove_var("BINDINGS_DOUBLE_RELEASE");
    }

    #[test]
    fn test_defaults_without_any_file() {
        let config = Config::default();

        assert_eq!(config.library_path(), None);
        assert_eq!(config.encoding(), TextEncoding::Utf8);
        assert_eq!(config.double_release(), ReleasePolicy::Error);
        assert_eq!(config.log_sink(), LogSink::None);
        assert_eq!(config.log_level(), LogLevel::Info);
        assert!(!config.is_project());
    }

    #[test]
    fn test_relative_search_paths_resolved_against_root() {
        let config = Config {
            project: toml::from_str("[library]\nsearch_paths = [\"build\", \"/abs\"]\n").unwrap(),
            global: toml::from_str("[library]\nsearch_paths = [\"/global\"]\n").unwrap(),
            project_root: Some(PathBuf::from("/work/project")),
        };

        assert_eq!(
            config.search_paths(),
            vec![
                PathBuf::from("/work/project/build"),
                PathBuf::from("/abs"),
                PathBuf::from("/global"),
            ]
        );
    }
}

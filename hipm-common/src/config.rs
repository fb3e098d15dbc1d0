//! Configuration loading and data folder resolution
//!
//! Resolution priority for every setting:
//! 1. Explicit override (set by the caller)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing TOML file is not an error: a warning is logged and the
//! compiled defaults are used. A TOML file that exists but does not parse
//! is reported as `Error::Config`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "HIPM_CONFIG";
/// Environment variable overriding the data folder
pub const DATA_DIR_ENV_VAR: &str = "HIPM_DATA_DIR";
/// Environment variable overriding the log level
pub const LOG_LEVEL_ENV_VAR: &str = "HIPM_LOG_LEVEL";

/// Compiled-in defaults used when nothing else is configured
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub data_dir: PathBuf,
    pub log_level: String,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: "info".to_string(),
        }
    }
}

/// Logging section of the TOML file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Level or filter directive, e.g. `debug` or `hipm_engine=trace`
    pub level: Option<String>,
}

/// `[analysis]` section: measurement policy knobs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSection {
    /// Name of this configuration, echoed into every serialized record
    pub name: Option<String>,
    /// `ultrasound` or `xray`
    pub modality: Option<String>,
    pub graf_window_fraction: Option<f64>,
    pub aca_graf_weight: Option<f64>,
    pub aca_anterior_weight: Option<f64>,
    pub aca_posterior_weight: Option<f64>,
    pub max_femoral_head_asymmetry: Option<f64>,
    /// Drop implausible ultrasound frames before aggregation (default on)
    pub filter_bad_frames: Option<bool>,
}

/// `[batch]` section: orchestrator settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSection {
    /// Registered segmentation provider name
    pub provider: Option<String>,
    pub workers: Option<usize>,
    pub max_attempts: Option<u32>,
    pub job_timeout_secs: Option<u64>,
    pub input_extensions: Option<Vec<String>>,
    #[serde(default)]
    pub datasets: Vec<PathBuf>,
}

/// Parsed TOML configuration file. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub analysis: AnalysisSection,
    #[serde(default)]
    pub batch: BatchSection,
}

impl TomlConfig {
    /// Parse a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Parse TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }
}

/// Where the TOML configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// No config file located
    Defaults,
    /// A config file was named but does not exist
    Missing(PathBuf),
    File(PathBuf),
}

impl ConfigSource {
    pub fn log(&self) {
        match self {
            ConfigSource::Defaults => debug!("No config file located, using compiled defaults"),
            ConfigSource::Missing(path) => {
                warn!(path = %path.display(), "Config file not found, using compiled defaults")
            }
            ConfigSource::File(path) => info!(path = %path.display(), "Loaded config file"),
        }
    }
}

/// Resolves the config file, data folder and log level
#[derive(Debug, Clone, Default)]
pub struct ConfigResolver {
    config_file: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    log_level: Option<String>,
}

impl ConfigResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Explicit config file (highest priority)
    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Explicit data folder (highest priority)
    pub fn with_data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(path.into());
        self
    }

    /// Explicit log level (highest priority)
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = Some(level.into());
        self
    }

    /// Locate the config file, if any
    pub fn config_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_file {
            return Some(path.clone());
        }

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Some(PathBuf::from(path));
        }

        user_config_path().filter(|p| p.exists())
    }

    /// Load the TOML config, falling back to defaults when no file exists
    pub fn load_toml(&self) -> Result<TomlConfig> {
        let (config, source) = self.resolve_toml()?;
        source.log();
        Ok(config)
    }

    /// Load the TOML config without logging, reporting where it came from
    ///
    /// For callers that resolve configuration before a tracing subscriber
    /// exists: log the returned [`ConfigSource`] once one is installed.
    pub fn resolve_toml(&self) -> Result<(TomlConfig, ConfigSource)> {
        let Some(path) = self.config_path() else {
            return Ok((TomlConfig::default(), ConfigSource::Defaults));
        };

        if !path.exists() {
            return Ok((TomlConfig::default(), ConfigSource::Missing(path)));
        }

        let config = TomlConfig::load(&path)?;
        Ok((config, ConfigSource::File(path)))
    }

    /// Resolve the data folder
    pub fn data_dir(&self, toml: &TomlConfig) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }

        if let Ok(dir) = std::env::var(DATA_DIR_ENV_VAR) {
            return PathBuf::from(dir);
        }

        if let Some(dir) = &toml.data_dir {
            return dir.clone();
        }

        CompiledDefaults::for_current_platform().data_dir
    }

    /// Resolve the log level
    pub fn log_level(&self, toml: &TomlConfig) -> String {
        if let Some(level) = &self.log_level {
            return level.clone();
        }

        if let Ok(level) = std::env::var(LOG_LEVEL_ENV_VAR) {
            return level;
        }

        toml.logging
            .level
            .clone()
            .unwrap_or_else(|| CompiledDefaults::for_current_platform().log_level)
    }
}

/// `~/.config/hipm/config.toml` (platform equivalent)
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("hipm").join("config.toml"))
}

/// OS-dependent default data folder
fn default_data_dir() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/hipm
        dirs::data_local_dir()
            .map(|d| d.join("hipm"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/hipm"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("hipm"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/hipm"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("hipm"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\hipm"))
    } else {
        PathBuf::from("./hipm_data")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_toml() {
        let config = TomlConfig::parse("").unwrap();
        assert_eq!(config, TomlConfig::default());
        assert!(config.batch.datasets.is_empty());
    }

    #[test]
    fn test_parse_sections() {
        let config = TomlConfig::parse(
            r#"
            data_dir = "/srv/hips"

            [logging]
            level = "debug"

            [analysis]
            name = "reference"
            graf_window_fraction = 0.1

            [batch]
            workers = 8
            datasets = ["/data/a", "/data/b"]
            "#,
        )
        .unwrap();

        assert_eq!(config.data_dir, Some(PathBuf::from("/srv/hips")));
        assert_eq!(config.logging.level.as_deref(), Some("debug"));
        assert_eq!(config.analysis.name.as_deref(), Some("reference"));
        assert_eq!(config.analysis.graf_window_fraction, Some(0.1));
        assert_eq!(config.batch.workers, Some(8));
        assert_eq!(config.batch.datasets.len(), 2);
    }

    #[test]
    fn test_parse_invalid_toml_is_config_error() {
        let err = TomlConfig::parse("batch = [").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_explicit_overrides_win() {
        let toml = TomlConfig::parse("data_dir = \"/from/toml\"\n[logging]\nlevel = \"warn\"").unwrap();
        let resolver = ConfigResolver::new()
            .with_data_dir("/explicit")
            .with_log_level("trace");

        assert_eq!(resolver.data_dir(&toml), PathBuf::from("/explicit"));
        assert_eq!(resolver.log_level(&toml), "trace");
    }
}

//! Runtime configuration
//!
//! A TOML document with a `[logging]` and an `[abi]` section. Installed once
//! per process; everything that reads it before installation sees defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::{Lazy, OnceCell};
use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::errors::ConfigError;
use crate::logging::{LogConfig, LogFormat, LogOutput};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "CTI_CONFIG";

/// File names searched by `Config::discover`, in order
pub const CONFIG_FILE_NAMES: [&str; 2] = ["cti.toml", ".cti.toml"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub abi: AbiConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default = "default_format")]
    pub format: LogFormat,

    #[serde(default)]
    pub output: OutputKind,

    #[serde(default = "default_directory")]
    pub directory: String,

    #[serde(default = "default_prefix")]
    pub prefix: String,

    #[serde(default)]
    pub span_events: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

/// Boundary settings
///
/// Panics in a body are always caught at the boundary, so there is no
/// switch for it; unknown keys are rejected rather than ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AbiConfig {
    /// Registry tag accepted by the boundary entry points
    #[serde(default = "default_registry_tag")]
    pub registry_tag: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Stdout,
    #[default]
    Stderr,
    File,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            format: default_format(),
            output: OutputKind::default(),
            directory: default_directory(),
            prefix: default_prefix(),
            span_events: false,
            filter: None,
        }
    }
}

impl Default for AbiConfig {
    fn default() -> Self {
        Self {
            registry_tag: default_registry_tag(),
        }
    }
}

fn default_format() -> LogFormat { LogFormat::Compact }
fn default_directory() -> String { "logs".to_string() }
fn default_prefix() -> String { "cti".to_string() }
fn default_registry_tag() -> String { "PackedFunc".to_string() }

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Find the configuration file: `$CTI_CONFIG`, then `cti.toml` or
    /// `.cti.toml` in the current directory or a parent
    pub fn find() -> Option<PathBuf> {
        if let Some(path) = env::var_os(CONFIG_ENV) {
            let path = PathBuf::from(path);
            if path.is_file() {
                return Some(path);
            }
        }

        let mut current = env::current_dir().ok();
        while let Some(dir) = current {
            for name in CONFIG_FILE_NAMES {
                let candidate = dir.join(name);
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
            current = dir.parent().map(Path::to_path_buf);
        }

        None
    }

    /// Find and load the configuration, falling back to defaults
    ///
    /// An unreadable or malformed file is reported and skipped.
    pub fn discover() -> Self {
        match Self::find() {
            Some(path) => Self::load(&path).unwrap_or_else(|err| {
                tracing::warn!(path = %path.display(), error = %err, "ignoring config file");
                Self::default()
            }),
            None => Self::default(),
        }
    }

    /// Write the configuration as TOML
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        fs::write(path, self.to_toml()?).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Default configuration as a TOML document
    pub fn generate_default() -> String {
        r#"# Packed calling convention configuration

[logging]
# trace | debug | info | warn | error
level = "info"
# pretty | compact | json
format = "compact"
# stdout | stderr | file
output = "stderr"
# Used when output = "file"
directory = "logs"
prefix = "cti"
span_events = false
# Extra filter directives, e.g. "registry=debug,abi=trace"
# filter = ""

[abi]
registry_tag = "PackedFunc"
"#
        .to_string()
    }

    /// Logging section as a logger configuration
    pub fn log_config(&self) -> LogConfig {
        let logging = &self.logging;
        let output = match logging.output {
            OutputKind::Stdout => LogOutput::Stdout,
            OutputKind::Stderr => LogOutput::Stderr,
            OutputKind::File => LogOutput::File {
                directory: logging.directory.clone(),
                prefix: logging.prefix.clone(),
            },
        };

        LogConfig {
            level: logging.level.into(),
            format: logging.format,
            output,
            span_events: logging.span_events,
            filter: logging.filter.clone(),
        }
    }
}

static INSTALLED: OnceCell<Config> = OnceCell::new();
static DEFAULT: Lazy<Config> = Lazy::new(Config::default);

/// Install the process-wide configuration
///
/// Returns `false` (leaving the first one in place) if already installed.
pub fn install(config: Config) -> bool {
    INSTALLED.set(config).is_ok()
}

/// The installed configuration, or defaults before installation
pub fn current() -> &'static Config {
    INSTALLED.get().unwrap_or(&DEFAULT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(Config::parse("").unwrap(), Config::default());
    }

    #[test]
    fn test_parse_sections() {
        let config = Config::parse(
            r#"
            [logging]
            level = "debug"
            format = "json"
            output = "file"
            directory = "/tmp/cti-logs"

            [abi]
            registry_tag = "PackedFunc"
            "#,
        )
        .unwrap();

        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.prefix, "cti");
        assert_eq!(config.abi.registry_tag, "PackedFunc");

        let log = config.log_config();
        assert_eq!(log.level, Level::DEBUG);
        assert_eq!(
            log.output,
            LogOutput::File { directory: "/tmp/cti-logs".to_string(), prefix: "cti".to_string() }
        );
    }

    #[test]
    fn test_panic_switch_is_rejected() {
        assert!(matches!(
            Config::parse("[abi]\ncatch_panics = false\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_unknown_level_is_parse_error() {
        assert!(matches!(
            Config::parse("[logging]\nlevel = \"loud\"\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_generated_default_parses_to_default() {
        assert_eq!(Config::parse(&Config::generate_default()).unwrap(), Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cti.toml");

        let mut config = Config::default();
        config.logging.level = LogLevel::Warn;
        config.logging.filter = Some("abi=trace".to_string());
        config.abi.registry_tag = "Callables".to_string();
        config.save(&path).unwrap();

        assert_eq!(Config::load(&path).unwrap(), config);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}

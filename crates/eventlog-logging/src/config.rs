//! Logging configuration
//!
//! A [`LogConfig`] describes where store diagnostics go (console, rotated
//! files or both) and how verbose each target is. It deserializes from the
//! same JSON the store config lives in.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Subscriber settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Level applied to every target without an override; `RUST_LOG` wins
    pub default_level: String,
    pub console: ConsoleConfig,
    /// Rotated JSON-lines files; off when absent
    pub file: Option<FileConfig>,
    /// Extra fields on JSON output (console and file)
    #[serde(default)]
    pub json: JsonFields,
    /// Per-target levels, e.g. `eventlog_store::barrel = "trace"`
    #[serde(default)]
    pub targets: BTreeMap<String, String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_level: "info".to_string(),
            console: ConsoleConfig::default(),
            file: None,
            json: JsonFields::default(),
            targets: BTreeMap::new(),
        }
    }
}

impl LogConfig {
    /// Human-readable debug output on the terminal
    pub fn development() -> Self {
        Self {
            default_level: "debug".to_string(),
            console: ConsoleConfig {
                format: ConsoleFormat::Pretty,
                ansi: true,
                ..ConsoleConfig::default()
            },
            ..Self::default()
        }
    }

    /// Files only, kept for a month of daily rotations
    pub fn production(log_dir: PathBuf) -> Self {
        Self {
            console: ConsoleConfig {
                enabled: false,
                ..ConsoleConfig::default()
            },
            file: Some(FileConfig {
                directory: log_dir,
                max_files: Some(30),
                ..FileConfig::default()
            }),
            ..Self::default()
        }
    }

    /// Warnings and errors, captured per test by the harness
    pub fn testing() -> Self {
        Self {
            default_level: "warn".to_string(),
            console: ConsoleConfig {
                capture: true,
                ..ConsoleConfig::default()
            },
            json: JsonFields {
                span_context: false,
                source_location: false,
            },
            ..Self::default()
        }
    }

    /// Override the level for one target
    pub fn with_target(mut self, target: impl Into<String>, level: impl Into<String>) -> Self {
        self.targets.insert(target.into(), level.into());
        self
    }

    /// Filter directives in `EnvFilter` syntax
    pub fn directives(&self) -> String {
        let mut directives = self.default_level.clone();
        for (target, level) in &self.targets {
            directives.push(',');
            directives.push_str(target);
            directives.push('=');
            directives.push_str(level);
        }
        directives
    }
}

/// How console lines are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleFormat {
    /// One JSON object per line
    #[default]
    Json,
    /// Multi-line human-readable output
    Pretty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    pub enabled: bool,
    #[serde(default)]
    pub format: ConsoleFormat,
    /// Color escapes; only used by the pretty format
    #[serde(default)]
    pub ansi: bool,
    /// Stricter filter for the console alone, in `EnvFilter` syntax
    #[serde(default)]
    pub level: Option<String>,
    /// Write through the test harness so output is captured per test
    #[serde(default)]
    pub capture: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            format: ConsoleFormat::Json,
            ansi: false,
            level: None,
            capture: false,
        }
    }
}

/// Rotated log files under one directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    pub directory: PathBuf,
    /// File name prefix; `Never` rotation writes `<prefix>.log`
    pub prefix: String,
    pub rotation: RotationStrategy,
    /// Rotated files to keep; unbounded when absent
    pub max_files: Option<usize>,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./logs"),
            prefix: "eventlog".to_string(),
            rotation: RotationStrategy::Daily,
            max_files: Some(7),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RotationStrategy {
    #[default]
    Daily,
    Hourly,
    /// Single file, truncated on start
    Never,
}

/// Optional fields on JSON lines
///
/// Event fields are always flattened to the top level so `event_id` and
/// `count` can be queried directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonFields {
    /// The enclosing spans, e.g. `stop` around the final flush
    pub span_context: bool,
    /// Source file and line of the call site
    pub source_location: bool,
}

impl Default for JsonFields {
    fn default() -> Self {
        Self {
            span_context: true,
            source_location: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.default_level, "info");
        assert!(config.console.enabled);
        assert_eq!(config.console.format, ConsoleFormat::Json);
        assert!(config.file.is_none());
    }

    #[test]
    fn test_development_config() {
        let config = LogConfig::development();
        assert_eq!(config.default_level, "debug");
        assert_eq!(config.console.format, ConsoleFormat::Pretty);
        assert!(config.console.ansi);
    }

    #[test]
    fn test_production_config() {
        let config = LogConfig::production(PathBuf::from("/var/log/eventlog"));
        assert!(!config.console.enabled);
        let file = config.file.unwrap();
        assert_eq!(file.directory, PathBuf::from("/var/log/eventlog"));
        assert_eq!(file.prefix, "eventlog");
        assert_eq!(file.max_files, Some(30));
    }

    #[test]
    fn test_testing_config_is_quiet() {
        let config = LogConfig::testing();
        assert_eq!(config.default_level, "warn");
        assert!(config.console.capture);
        assert!(!config.json.span_context);
        assert!(!config.json.source_location);
    }

    #[test]
    fn test_directives() {
        let config = LogConfig::testing()
            .with_target("eventlog_store::store", "debug")
            .with_target("eventlog_store::barrel", "trace");
        assert_eq!(
            config.directives(),
            "warn,eventlog_store::barrel=trace,eventlog_store::store=debug"
        );
    }

    #[test]
    fn test_config_from_json() {
        let config: LogConfig = serde_json::from_str(
            r#"{
                "default_level": "info",
                "console": { "enabled": true, "format": "pretty" },
                "file": null,
                "json": { "span_context": false, "source_location": true },
                "targets": { "eventlog_store": "debug" }
            }"#,
        )
        .unwrap();
        assert_eq!(config.console.format, ConsoleFormat::Pretty);
        assert!(!config.console.ansi);
        assert!(!config.json.span_context);
        assert_eq!(config.directives(), "info,eventlog_store=debug");
    }

    #[test]
    fn test_minimal_json_uses_defaults() {
        let config: LogConfig = serde_json::from_str(
            r#"{ "default_level": "warn", "console": { "enabled": false }, "file": null }"#,
        )
        .unwrap();
        assert_eq!(config.json, JsonFields::default());
        assert!(config.targets.is_empty());
        assert_eq!(config.directives(), "warn");
    }
}

//! Startup configuration: a JSON file with environment overrides, validated before use.

use std::{env, fs, io::ErrorKind, path::PathBuf};

use serde::Deserialize;
use tracing::info;
use validator::Validate;

use crate::{dto::validation::validate_root_path, error::ObserverError};

/// Default location on disk where the observer looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/leaderboard.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "LEADERBOARD_CONFIG_PATH";
const ENDPOINT_ENV: &str = "LEADERBOARD_ENDPOINT";
const MAX_SIZE_ENV: &str = "LEADERBOARD_MAX_SIZE";
const ROOT_ENV: &str = "LEADERBOARD_ROOT";
const OUTPUT_ENV: &str = "LEADERBOARD_OUTPUT";

/// Root used when none is configured.
pub const DEFAULT_ROOT: &str = "/PlayerList";

/// How snapshots are written to the console.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Two labelled lists, as a human reads them.
    #[default]
    Text,
    /// One JSON document per snapshot.
    Json,
}

impl OutputFormat {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Validate)]
#[serde(default)]
/// Immutable runtime configuration.
pub struct AppConfig {
    /// Coordination service address, `host:port[,host:port...]`.
    #[validate(length(min = 1))]
    pub endpoint: String,
    /// Bound on both ranked projections.
    #[validate(range(min = 1))]
    pub max_size: usize,
    /// Namespace path holding one child per player.
    #[validate(custom(function = "validate_root_path"))]
    pub root_path: String,
    /// Console output format.
    pub output: OutputFormat,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            endpoint: "127.0.0.1:2181".into(),
            max_size: 10,
            root_path: DEFAULT_ROOT.into(),
            output: OutputFormat::Text,
        }
    }
}

impl AppConfig {
    /// Load the configuration from disk and the process environment.
    ///
    /// A missing file means built-in defaults. An unreadable or unparsable file, a bad
    /// override, or a value that fails validation is a startup error.
    pub fn load() -> Result<Self, ObserverError> {
        let path = resolve_config_path();
        let base = match fs::read_to_string(&path) {
            Ok(contents) => {
                let config = serde_json::from_str::<Self>(&contents).map_err(|err| {
                    ObserverError::Config(format!("failed to parse {}: {err}", path.display()))
                })?;
                info!(path = %path.display(), "loaded configuration file");
                config
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                return Err(ObserverError::Config(format!(
                    "failed to read {}: {err}",
                    path.display()
                )));
            }
        };

        let config = base.with_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides looked up by environment variable name.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ObserverError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup(ENDPOINT_ENV) {
            self.endpoint = endpoint;
        }
        if let Some(max_size) = lookup(MAX_SIZE_ENV) {
            self.max_size = max_size.trim().parse().map_err(|_| {
                ObserverError::Config(format!(
                    "{MAX_SIZE_ENV} must be a positive integer (got `{max_size}`)"
                ))
            })?;
        }
        if let Some(root) = lookup(ROOT_ENV) {
            self.root_path = root;
        }
        if let Some(output) = lookup(OUTPUT_ENV) {
            self.output = OutputFormat::parse(&output).ok_or_else(|| {
                ObserverError::Config(format!("{OUTPUT_ENV} must be `text` or `json`"))
            })?;
        }
        Ok(self)
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.root_path, "/PlayerList");
    }

    #[test]
    fn file_values_fill_missing_fields_with_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{ "endpoint": "zk1:2181,zk2:2181", "max_size": 3 }"#).unwrap();
        assert_eq!(config.endpoint, "zk1:2181,zk2:2181");
        assert_eq!(config.max_size, 3);
        assert_eq!(config.root_path, DEFAULT_ROOT);
        assert_eq!(config.output, OutputFormat::Text);
    }

    #[test]
    fn environment_overrides_file_values() {
        let config = AppConfig::default()
            .with_overrides(lookup(&[
                ("LEADERBOARD_ENDPOINT", "zk:2181"),
                ("LEADERBOARD_MAX_SIZE", " 5 "),
                ("LEADERBOARD_ROOT", "/games/board"),
                ("LEADERBOARD_OUTPUT", "JSON"),
            ]))
            .unwrap();

        assert_eq!(config.endpoint, "zk:2181");
        assert_eq!(config.max_size, 5);
        assert_eq!(config.root_path, "/games/board");
        assert_eq!(config.output, OutputFormat::Json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn malformed_override_is_rejected() {
        let err = AppConfig::default()
            .with_overrides(lookup(&[("LEADERBOARD_MAX_SIZE", "ten")]))
            .unwrap_err();
        assert!(matches!(err, ObserverError::Config(_)));
    }

    #[test]
    fn validation_rejects_zero_size_and_relative_root() {
        let zero = AppConfig {
            max_size: 0,
            ..AppConfig::default()
        };
        assert!(zero.validate().is_err());

        let relative = AppConfig {
            root_path: "PlayerList".into(),
            ..AppConfig::default()
        };
        assert!(relative.validate().is_err());
    }
}

//! Engine configuration loaded from `petrigate.toml`.
//!
//! Every field has a default, so a missing file or a partial file is
//! fine. `ANTHROPIC_API_KEY` takes precedence over the file's `api_key`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "petrigate.toml";

/// Engine settings shared by every subcommand.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Pause between scheduler ticks.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Reachability analysis gives up past this many markings.
    #[serde(default = "default_max_states")]
    pub max_states: usize,

    /// Upper bound for `run`/`inject` before giving up on quiescence.
    #[serde(default = "default_max_ticks")]
    pub max_ticks: usize,

    /// Root of the JSON file store.
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,

    /// Model asked to choose between enabled transitions when an API key
    /// is configured.
    #[serde(default = "default_decision_model")]
    pub decision_model: String,

    #[serde(default)]
    pub api_key: String,
}

fn default_tick_interval_ms() -> u64 {
    250
}

fn default_max_states() -> usize {
    crate::analysis::DEFAULT_MAX_STATES
}

fn default_max_ticks() -> usize {
    1000
}

fn default_store_dir() -> PathBuf {
    PathBuf::from(".petrigate")
}

fn default_decision_model() -> String {
    "claude-haiku-4-5-20251001".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            max_states: default_max_states(),
            max_ticks: default_max_ticks(),
            store_dir: default_store_dir(),
            decision_model: default_decision_model(),
            api_key: String::new(),
        }
    }
}

impl EngineConfig {
    /// Load `path`, or `petrigate.toml` in the working directory when no
    /// path is given. Only the implicit default file may be absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::from_file(path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env_key(std::env::var("ANTHROPIC_API_KEY").ok());
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("invalid config {}", path.display()))
    }

    fn apply_env_key(&mut self, key: Option<String>) {
        if let Some(key) = key.filter(|k| !k.is_empty()) {
            self.api_key = key;
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn has_api_key(&self) -> bool {
        !self.api_key.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_values() {
        let config = EngineConfig::default();
        assert_eq!(config.tick_interval_ms, 250);
        assert_eq!(config.max_states, 10_000);
        assert_eq!(config.max_ticks, 1000);
        assert_eq!(config.store_dir, PathBuf::from(".petrigate"));
        assert_eq!(config.decision_model, "claude-haiku-4-5-20251001");
        assert!(!config.has_api_key());
    }

    #[test]
    fn deserialize_partial_toml() {
        let config: EngineConfig = toml::from_str(
            r#"
            max_states = 500
            store_dir = "/var/lib/petrigate"
        "#,
        )
        .unwrap();
        assert_eq!(config.max_states, 500);
        assert_eq!(config.store_dir, PathBuf::from("/var/lib/petrigate"));
        assert_eq!(config.tick_interval(), Duration::from_millis(250));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<EngineConfig>("max_state = 5").is_err());
    }

    #[test]
    fn explicit_file_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_ticks = 7").unwrap();
        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.max_ticks, 7);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(EngineConfig::load(Some(&dir.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn env_key_overrides_file_key() {
        let mut config: EngineConfig = toml::from_str(r#"api_key = "from-file""#).unwrap();
        config.apply_env_key(Some(String::new()));
        assert_eq!(config.api_key, "from-file");
        config.apply_env_key(Some("from-env".into()));
        assert_eq!(config.api_key, "from-env");
        config.apply_env_key(None);
        assert_eq!(config.api_key, "from-env");
    }
}

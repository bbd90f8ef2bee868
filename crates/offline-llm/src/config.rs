//! Application configuration, persisted as JSON.

use std::path::{Path, PathBuf};

use llama_session::{ChatFormat, LoadOptions, SamplingConfig};
use serde::{Deserialize, Serialize};

/// Global configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model used when none is given on the command line.
    #[serde(default)]
    pub model: Option<PathBuf>,
    #[serde(default)]
    pub load: LoadOptions,
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Overrides detection from the model file name.
    #[serde(default)]
    pub chat_format: Option<ChatFormat>,
    /// Past messages replayed into each chat prompt.
    #[serde(default = "default_history_messages")]
    pub history_messages: usize,
    /// Where `models list` and `models rm` look; see [`AppConfig::models_dir`].
    #[serde(default)]
    pub models_dir: Option<PathBuf>,
}

fn default_system_prompt() -> String {
    "You are a helpful assistant. Keep answers short and clear.".into()
}
fn default_history_messages() -> usize {
    8
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model: None,
            load: LoadOptions::default(),
            sampling: SamplingConfig::default(),
            system_prompt: default_system_prompt(),
            chat_format: None,
            history_messages: default_history_messages(),
            models_dir: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unknown config key: {0}")]
    UnknownKey(String),

    #[error("Invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

fn parse<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.into(),
        value: value.into(),
        reason: e.to_string(),
    })
}

/// Parse a chat format name (`llama3`, `chat_ml`, `zephyr`, `mistral`).
pub fn parse_chat_format(value: &str) -> Result<ChatFormat, String> {
    serde_json::from_value(serde_json::Value::String(value.to_lowercase()))
        .map_err(|_| format!("expected one of llama3, chat_ml, zephyr, mistral; got '{value}'"))
}

impl AppConfig {
    /// Platform config directory: `~/.config/offline-llm/`
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("offline-llm")
    }

    pub fn config_file() -> PathBuf {
        Self::config_dir().join("config.json")
    }

    /// Model directory: the configured one, else `~/.local/share/offline-llm/models/`.
    pub fn models_dir(&self) -> PathBuf {
        self.models_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("offline-llm")
                .join("models")
        })
    }

    /// Load from disk, or return defaults if the file doesn't exist.
    pub fn load_or_default() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_file())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&data)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Persist to disk.
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_file())
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Update one setting from its `config set` key.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "model" => self.model = (!value.is_empty()).then(|| PathBuf::from(value)),
            "models_dir" => self.models_dir = (!value.is_empty()).then(|| PathBuf::from(value)),
            "system_prompt" => self.system_prompt = value.to_owned(),
            "chat_format" => {
                self.chat_format = if value.is_empty() || value == "auto" {
                    None
                } else {
                    Some(parse_chat_format(value).map_err(|reason| ConfigError::InvalidValue {
                        key: key.into(),
                        value: value.into(),
                        reason,
                    })?)
                }
            }
            "history_messages" => self.history_messages = parse(key, value)?,
            "context_length" => self.load.context_length = parse(key, value)?,
            "batch_width" => self.load.batch_width = parse(key, value)?,
            "thread_count" => self.load.thread_count = parse(key, value)?,
            "use_memory_map" => self.load.use_memory_map = parse(key, value)?,
            "use_memory_lock" => self.load.use_memory_lock = parse(key, value)?,
            "temperature" => self.sampling.temperature = parse(key, value)?,
            "top_k" => self.sampling.top_k = parse(key, value)?,
            "top_p" => self.sampling.top_p = parse(key, value)?,
            "max_tokens" => self.sampling.max_tokens = parse(key, value)?,
            "repeat_penalty" => self.sampling.repeat_penalty = parse(key, value)?,
            "penalty_last_n" => self.sampling.penalty_last_n = parse(key, value)?,
            "seed" => self.sampling.seed = parse(key, value)?,
            _ => return Err(ConfigError::UnknownKey(key.into())),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = AppConfig::load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(cfg, AppConfig::default());
        assert_eq!(cfg.load.context_length, 1024);
        assert_eq!(cfg.sampling.max_tokens, 256);
    }

    #[test]
    fn save_then_load_preserves_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut cfg = AppConfig::default();
        cfg.set("model", "/models/qwen2.5-0.5b.gguf").unwrap();
        cfg.set("temperature", "0.2").unwrap();
        cfg.set("context_length", "2048").unwrap();
        cfg.set("chat_format", "chat_ml").unwrap();
        cfg.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded, cfg);
        assert_eq!(loaded.chat_format, Some(ChatFormat::ChatMl));
    }

    #[test]
    fn partial_files_fill_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"load": {"contextLength": 512}, "sampling": {"top_k": 10}}"#).unwrap();

        let cfg = AppConfig::load_from(&path).unwrap();
        assert_eq!(cfg.load.context_length, 512);
        assert_eq!(cfg.load.batch_width, 64);
        assert!(cfg.load.use_memory_map);
        assert_eq!(cfg.sampling.top_k, 10);
        assert_eq!(cfg.sampling.seed, 1234);
        assert_eq!(cfg.system_prompt, default_system_prompt());
    }

    #[test]
    fn set_rejects_unknown_keys_and_bad_values() {
        let mut cfg = AppConfig::default();
        assert!(matches!(cfg.set("port", "8080"), Err(ConfigError::UnknownKey(_))));
        assert!(matches!(
            cfg.set("top_k", "many"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(cfg.set("chat_format", "alpaca").is_err());
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn empty_values_clear_optional_settings() {
        let mut cfg = AppConfig::default();
        cfg.set("model", "m.gguf").unwrap();
        cfg.set("chat_format", "zephyr").unwrap();
        cfg.set("model", "").unwrap();
        cfg.set("chat_format", "auto").unwrap();
        assert_eq!(cfg.model, None);
        assert_eq!(cfg.chat_format, None);
    }

    #[test]
    fn models_dir_prefers_the_configured_path() {
        let mut cfg = AppConfig::default();
        assert!(cfg.models_dir().ends_with("offline-llm/models"));
        cfg.set("models_dir", "/sdcard/models").unwrap();
        assert_eq!(cfg.models_dir(), PathBuf::from("/sdcard/models"));
    }
}

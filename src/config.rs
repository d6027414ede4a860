//! Configuration
//!
//! LLM settings resolve from host-provided per-user attributes first and a
//! local settings file second. The local file degrades to in-memory storage
//! when it cannot be written.

use crate::error::{AssistantError, Result};
use crate::llm::{LlmProvider, DEFAULT_MODEL};
use crate::platform::LookerConfig;
use crate::prompts::ExampleLibrary;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const ATTR_MODEL: &str = "llm_model";
pub const ATTR_API_KEY: &str = "api_key";
pub const SETTING_PROVIDER: &str = "llm_provider";

/// Per-user attributes supplied by the host.
pub trait AttributeSource: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;
}

/// Host attributes read from the process environment: `llm_model` is
/// `LLM_MODEL`, `api_key` is `LLM_API_KEY`.
#[derive(Debug, Default, Clone)]
pub struct EnvAttributes;

impl AttributeSource for EnvAttributes {
    fn get(&self, name: &str) -> Option<String> {
        let var = match name {
            ATTR_API_KEY => "LLM_API_KEY".to_string(),
            other => other.to_ascii_uppercase(),
        };
        std::env::var(var).ok().filter(|v| !v.trim().is_empty())
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryAttributes(HashMap<String, String>);

impl MemoryAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.0.insert(name.to_string(), value.to_string());
        self
    }
}

impl AttributeSource for MemoryAttributes {
    fn get(&self, name: &str) -> Option<String> {
        self.0.get(name).filter(|v| !v.trim().is_empty()).cloned()
    }
}

/// Local key/value settings persisted as a JSON object.
#[derive(Debug, Clone, Default)]
pub struct LocalSettings {
    path: Option<PathBuf>,
    values: BTreeMap<String, String>,
}

impl LocalSettings {
    /// `~/.explore-assistant/settings.json`, when a home directory is known.
    pub fn default_path() -> Option<PathBuf> {
        std::env::var_os("HOME").map(|home| {
            PathBuf::from(home)
                .join(".explore-assistant")
                .join("settings.json")
        })
    }

    /// Settings that live only in memory.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load from `path`. A missing file is an empty store; an unreadable or
    /// malformed one is logged and treated as empty.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!("Ignoring malformed settings file {}: {}", path.display(), e);
                BTreeMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!("Could not read settings file {}: {}", path.display(), e);
                BTreeMap::new()
            }
        };
        Self {
            path: Some(path),
            values,
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).filter(|v| !v.trim().is_empty()).cloned()
    }

    /// Set a value and persist it; falls back to memory if the file cannot be written.
    pub fn set(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
        self.persist();
    }

    pub fn remove(&mut self, key: &str) {
        self.values.remove(key);
        self.persist();
    }

    fn persist(&mut self) {
        if let Err(e) = self.save() {
            warn!("Settings file is not writable, keeping settings in memory: {}", e);
            self.path = None;
        }
    }

    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&self.values)?)?;
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// Provider, model and credential for the LLM gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmSettings {
    pub provider: LlmProvider,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl LlmSettings {
    /// model: host `llm_model`, then local `llm_model`, then the default.
    /// credential: host `api_key`, then local `<provider>_api_key`.
    pub fn resolve(host: &dyn AttributeSource, local: &LocalSettings) -> Self {
        let model = host
            .get(ATTR_MODEL)
            .or_else(|| local.get(ATTR_MODEL))
            .map(|m| m.trim().to_string())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let provider = LlmProvider::from_model(&model);

        let api_key = host
            .get(ATTR_API_KEY)
            .or_else(|| local.get(&credential_key(provider)));
        if api_key.is_none() {
            warn!(
                "No API key found for {}. Set the 'api_key' user attribute or {}",
                provider,
                credential_key(provider)
            );
        }
        info!("Using provider {} with model {}", provider, model);

        Self {
            provider,
            model,
            api_key,
        }
    }

    pub fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }
}

/// Local settings key holding a provider's credential.
pub fn credential_key(provider: LlmProvider) -> String {
    format!("{}_api_key", provider.as_str())
}

/// Everything the binary needs to assemble an assistant.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub llm: LlmSettings,
    pub looker: LookerConfig,
    pub examples: ExampleLibrary,
}

impl AppConfig {
    pub fn load(settings: &LocalSettings, examples_path: Option<&Path>) -> Result<Self> {
        let llm = LlmSettings::resolve(&EnvAttributes, settings);
        let looker = LookerConfig::from_env()?;
        let examples = match examples_path {
            Some(path) => ExampleLibrary::load(path).map_err(|e| {
                AssistantError::Config(format!(
                    "Could not load examples from {}: {}",
                    path.display(),
                    e
                ))
            })?,
            None => ExampleLibrary::default(),
        };
        Ok(Self {
            llm,
            looker,
            examples,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_without_any_configuration() {
        let settings = LlmSettings::resolve(&MemoryAttributes::new(), &LocalSettings::in_memory());
        assert_eq!(settings.model, "gemini-2.5-flash");
        assert_eq!(settings.provider, LlmProvider::Gemini);
        assert!(!settings.has_credential());
    }

    #[test]
    fn test_host_attributes_win_over_local_settings() {
        let host = MemoryAttributes::new()
            .with("llm_model", "gpt-4o")
            .with("api_key", "host-key");
        let mut local = LocalSettings::in_memory();
        local.set("llm_model", "gemini-1.5-pro");
        local.set("openai_api_key", "local-key");

        let settings = LlmSettings::resolve(&host, &local);
        assert_eq!(settings.model, "gpt-4o");
        assert_eq!(settings.provider, LlmProvider::OpenAi);
        assert_eq!(settings.api_key.as_deref(), Some("host-key"));
    }

    #[test]
    fn test_local_credential_is_keyed_by_provider() {
        let mut local = LocalSettings::in_memory();
        local.set("llm_model", "o1-mini");
        local.set("gemini_api_key", "wrong-provider");
        let settings = LlmSettings::resolve(&MemoryAttributes::new(), &local);
        assert_eq!(settings.provider, LlmProvider::OpenAi);
        assert!(settings.api_key.is_none());

        local.set("openai_api_key", "sk-local");
        let settings = LlmSettings::resolve(&MemoryAttributes::new(), &local);
        assert_eq!(settings.api_key.as_deref(), Some("sk-local"));
    }

    #[test]
    fn test_local_settings_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut settings = LocalSettings::load(&path);
        assert!(settings.get("llm_model").is_none());
        settings.set("llm_model", "gpt-4o");
        settings.set("openai_api_key", "sk-test");
        settings.remove("openai_api_key");

        let reloaded = LocalSettings::load(&path);
        assert_eq!(reloaded.get("llm_model").as_deref(), Some("gpt-4o"));
        assert!(reloaded.get("openai_api_key").is_none());
        assert_eq!(reloaded.path(), Some(path.as_path()));
    }

    #[test]
    fn test_malformed_settings_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(LocalSettings::load(&path).get("llm_model").is_none());
    }

    #[test]
    fn test_api_key_is_never_serialized() {
        let settings = LlmSettings {
            provider: LlmProvider::Gemini,
            model: "gemini-2.5-flash".to_string(),
            api_key: Some("secret".to_string()),
        };
        let json = serde_json::to_string(&settings).unwrap();
        assert!(!json.contains("secret"));
    }
}

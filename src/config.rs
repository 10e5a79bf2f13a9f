use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::registry::{DEFAULT_MODEL, DEFAULT_PROVIDER};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Provider selected at startup
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Model selected at startup
    #[serde(default = "default_model")]
    pub default_model: String,

    /// When true, image generation returns a synthetic reference without
    /// calling the provider
    #[serde(default = "default_true")]
    pub image_test_mode: bool,

    /// Inline API keys, keyed by provider id
    #[serde(default)]
    pub api_keys: HashMap<String, String>,

    /// Endpoint configuration, keyed by provider id
    #[serde(default = "default_endpoints")]
    pub endpoints: HashMap<String, ProviderEndpoint>,
}

/// Provider endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEndpoint {
    pub name: String,
    pub base_url: String,
    pub api_key_env: Option<String>,
}

fn default_provider() -> String {
    DEFAULT_PROVIDER.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_true() -> bool {
    true
}

fn default_endpoints() -> HashMap<String, ProviderEndpoint> {
    let mut endpoints = HashMap::new();
    endpoints.insert(
        "puter.js".to_string(),
        ProviderEndpoint {
            name: "Puter".to_string(),
            base_url: "https://api.puter.com".to_string(),
            api_key_env: Some("PUTER_API_KEY".to_string()),
        },
    );
    endpoints.insert(
        "openrouter".to_string(),
        ProviderEndpoint {
            name: "OpenRouter".to_string(),
            base_url: "https://openrouter.ai/api".to_string(),
            api_key_env: Some("OPENROUTER_API_KEY".to_string()),
        },
    );
    endpoints.insert(
        "google-ai-studio".to_string(),
        ProviderEndpoint {
            name: "Google AI Studio".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta/openai".to_string(),
            api_key_env: Some("GOOGLE_AI_API_KEY".to_string()),
        },
    );
    endpoints
}

impl Default for Config {
    fn default() -> Self {
        Config {
            default_provider: default_provider(),
            default_model: default_model(),
            api_keys: HashMap::new(),
            endpoints: default_endpoints(),
            image_test_mode: true,
        }
    }
}

impl Config {
    /// Load configuration from ~/.palaver/config.toml, falling back to the
    /// defaults when the file does not exist yet
    pub fn load() -> Result<Self> {
        let home = dirs::home_dir().context("Could not find home directory")?;
        let config_home = home.join(".palaver");
        fs::create_dir_all(&config_home).context("Failed to create .palaver directory")?;
        Self::load_from(&config_home.join("config.toml"))
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to the given path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// Default location of the config file
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not find home directory")?;
        Ok(home.join(".palaver").join("config.toml"))
    }

    /// Endpoint for a provider, if one is configured
    pub fn endpoint_for(&self, provider: &str) -> Option<&ProviderEndpoint> {
        self.endpoints.get(provider)
    }

    /// API key for a provider, from the config file or the environment
    pub fn api_key_for(&self, provider: &str) -> Option<String> {
        if let Some(key) = self.api_keys.get(provider) {
            return Some(key.clone());
        }
        let env = self.endpoint_for(provider)?.api_key_env.as_ref()?;
        std::env::var(env).ok()
    }
}

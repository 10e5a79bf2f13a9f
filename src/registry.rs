use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Built-in provider -> model table, in display order
const BUILTIN: &[(&str, &[&str])] = &[
    (
        "puter.js",
        &[
            "gpt-4o-mini",
            "gpt-4o",
            "claude-3-5-sonnet",
            "gemini-1.5-flash",
            "pixtral-large-latest",
        ],
    ),
    (
        "openrouter",
        &["openai/gpt-4", "anthropic/claude-3-opus", "mistral/mistral-large"],
    ),
    ("google-ai-studio", &["gemini-pro", "gemini-ultra", "palm-2"]),
];

static BUILTIN_MODELS: Lazy<HashMap<&'static str, &'static [&'static str]>> =
    Lazy::new(|| BUILTIN.iter().copied().collect());

pub const DEFAULT_PROVIDER: &str = "puter.js";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Registry of providers and models, with runtime custom additions
///
/// The built-in table is static; user-supplied providers and models live only
/// in memory for the life of the session. Custom adds are set-like on exact
/// string match.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    provider: String,
    model: String,
    custom_providers: Vec<String>,
    custom_models: HashMap<String, Vec<String>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::with_selection(DEFAULT_PROVIDER, DEFAULT_MODEL)
    }

    pub fn with_selection(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            custom_providers: Vec::new(),
            custom_models: HashMap::new(),
        }
    }

    /// Currently selected provider id
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Raw model selection, whether or not the current provider lists it
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Selected model, or None when the provider's non-empty model list does
    /// not contain the raw selection (a valid transient state after switching
    /// providers).
    pub fn selected_model(&self) -> Option<&str> {
        let available = self.available_models();
        if available.is_empty() || available.iter().any(|m| m == &self.model) {
            Some(&self.model)
        } else {
            None
        }
    }

    /// All known provider ids: built-in first, then custom in add order
    pub fn providers(&self) -> Vec<String> {
        BUILTIN
            .iter()
            .map(|(name, _)| (*name).to_string())
            .chain(self.custom_providers.iter().cloned())
            .collect()
    }

    /// Models offered by the selected provider
    ///
    /// Built-in models first, then custom models added for that provider.
    pub fn available_models(&self) -> Vec<String> {
        let mut models: Vec<String> = BUILTIN_MODELS
            .get(self.provider.as_str())
            .map(|list| list.iter().map(|m| (*m).to_string()).collect())
            .unwrap_or_default();
        if let Some(custom) = self.custom_models.get(&self.provider) {
            for model in custom {
                if !models.contains(model) {
                    models.push(model.clone());
                }
            }
        }
        models
    }

    /// Switch provider; the raw model selection is deliberately left alone
    pub fn set_provider(&mut self, provider: impl Into<String>) {
        self.provider = provider.into();
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
    }

    /// Add a user-defined provider; duplicate or blank names are no-ops.
    /// Returns whether the provider was added.
    pub fn add_custom_provider(&mut self, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() || self.custom_providers.iter().any(|p| p == name) {
            return false;
        }
        self.custom_providers.push(name.to_string());
        self.custom_models.entry(name.to_string()).or_default();
        true
    }

    /// Add a model under the selected provider and select it; duplicate or
    /// blank names are no-ops. Returns whether the model was added.
    pub fn add_custom_model(&mut self, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() || self.available_models().iter().any(|m| m == name) {
            return false;
        }
        self.custom_models
            .entry(self.provider.clone())
            .or_default()
            .push(name.to_string());
        self.model = name.to_string();
        true
    }

    pub fn custom_providers(&self) -> &[String] {
        &self.custom_providers
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

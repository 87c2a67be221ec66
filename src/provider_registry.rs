use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::config::LLMConfig;
use crate::errors::LLMError;
use crate::llm_providers::{DeepSeekProvider, LLMProvider, OpenAIProvider, ProviderOptions, SiliconFlowProvider};

/// Builds a provider client from an API key, an optional model and options
pub type ProviderConstructor =
    Arc<dyn Fn(String, Option<String>, ProviderOptions) -> Result<Box<dyn LLMProvider>, LLMError> + Send + Sync>;

/// Model catalogue of a provider
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProviderModels {
    pub models: Vec<String>,
    pub default: String,
    pub description: String,
}

impl ProviderModels {
    pub fn new(models: &[&str], default: &str, description: &str) -> Self {
        Self {
            models: models.iter().map(|m| m.to_string()).collect(),
            default: default.to_string(),
            description: description.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct ProviderEntry {
    constructor: ProviderConstructor,
    models: ProviderModels,
}

impl ProviderEntry {
    pub fn new<F>(constructor: F) -> Self
    where
        F: Fn(String, Option<String>, ProviderOptions) -> Result<Box<dyn LLMProvider>, LLMError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            constructor: Arc::new(constructor),
            models: ProviderModels::default(),
        }
    }

    pub fn with_models(mut self, models: ProviderModels) -> Self {
        self.models = models;
        self
    }

    pub fn models(&self) -> &ProviderModels {
        &self.models
    }
}

impl std::fmt::Debug for ProviderEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderEntry").field("models", &self.models).finish()
    }
}

/// String-keyed catalogue of provider constructors. Registration order is
/// the listing order.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    entries: HashMap<String, ProviderEntry>,
    order: Vec<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the OpenAI, DeepSeek and SiliconFlow providers
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        registry.register(
            OpenAIProvider::NAME,
            ProviderEntry::new(|key, model, options| {
                Ok(Box::new(OpenAIProvider::new(key, model, options)?) as Box<dyn LLMProvider>)
            })
            .with_models(ProviderModels::new(
                &["gpt-3.5-turbo", "gpt-4", "gpt-4-turbo-preview"],
                OpenAIProvider::DEFAULT_MODEL,
                "OpenAI GPT models",
            )),
        );

        registry.register(
            DeepSeekProvider::NAME,
            ProviderEntry::new(|key, model, options| {
                Ok(Box::new(DeepSeekProvider::new(key, model, options)?) as Box<dyn LLMProvider>)
            })
            .with_models(ProviderModels::new(
                &["deepseek-chat", "deepseek-coder"],
                DeepSeekProvider::DEFAULT_MODEL,
                "DeepSeek AI models",
            )),
        );

        registry.register(
            SiliconFlowProvider::NAME,
            ProviderEntry::new(|key, model, options| {
                Ok(Box::new(SiliconFlowProvider::new(key, model, options)?) as Box<dyn LLMProvider>)
            })
            .with_models(ProviderModels::new(
                &[
                    "deepseek-ai/DeepSeek-V3",
                    "Qwen/Qwen2.5-7B-Instruct",
                    "meta-llama/Llama-3.1-8B-Instruct",
                ],
                SiliconFlowProvider::DEFAULT_MODEL,
                "SiliconFlow hosted models",
            )),
        );

        registry
    }

    /// Add a provider, or replace an existing one in place
    pub fn register(&mut self, provider_id: &str, entry: ProviderEntry) {
        let id = provider_id.to_lowercase();
        if self.entries.insert(id.clone(), entry).is_none() {
            self.order.push(id);
        }
    }

    fn entry(&self, id: &str) -> Result<&ProviderEntry, LLMError> {
        self.entries.get(id).ok_or_else(|| {
            LLMError::Configuration(format!(
                "Unsupported provider: {}. Available providers: {}",
                id,
                self.order.join(", ")
            ))
        })
    }

    pub fn contains(&self, provider_id: &str) -> bool {
        self.entries.contains_key(&provider_id.to_lowercase())
    }

    /// Construct a client for `provider_id`. A missing model falls back to
    /// the provider's catalogue default.
    pub fn resolve(
        &self,
        provider_id: &str,
        api_key: &str,
        model: Option<String>,
        options: ProviderOptions,
    ) -> Result<Box<dyn LLMProvider>, LLMError> {
        let id = provider_id.to_lowercase();
        let entry = self.entry(&id)?;

        if api_key.trim().is_empty() {
            return Err(LLMError::Configuration(format!("API key required for provider: {}", id)));
        }

        let model = model
            .filter(|m| !m.trim().is_empty())
            .or_else(|| Some(entry.models.default.clone()).filter(|m| !m.is_empty()));

        debug!(provider = %id, model = ?model, "Resolving LLM provider");
        (entry.constructor)(api_key.to_string(), model, options)
    }

    /// Resolve using the API key, model and base URL configured for the
    /// provider, with the global LLM defaults applied.
    pub fn resolve_from_settings(
        &self,
        provider_id: &str,
        llm_config: &LLMConfig,
        model: Option<String>,
    ) -> Result<Box<dyn LLMProvider>, LLMError> {
        let id = provider_id.to_lowercase();
        self.entry(&id)?;
        let settings = llm_config.provider(&id).cloned().unwrap_or_default();

        let api_key = settings.api_key.ok_or_else(|| {
            LLMError::Configuration(format!(
                "No API key configured for provider: {}. Set {}_API_KEY",
                id,
                id.to_uppercase()
            ))
        })?;

        let options = ProviderOptions {
            base_url: settings.base_url,
            ..Self::default_options(llm_config)
        };

        self.resolve(&id, &api_key, model.or(settings.model), options)
    }

    /// Timeout, retry budget and sampling defaults from configuration
    pub fn default_options(llm_config: &LLMConfig) -> ProviderOptions {
        ProviderOptions {
            base_url: None,
            timeout: Some(llm_config.timeout),
            max_retries: Some(llm_config.max_retries),
            max_tokens: Some(llm_config.max_tokens),
            temperature: Some(llm_config.temperature),
        }
    }

    pub fn list_providers(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Model catalogue for `provider_id`; empty for unknown ids
    pub fn models_for(&self, provider_id: &str) -> ProviderModels {
        self.entries
            .get(&provider_id.to_lowercase())
            .map(|entry| entry.models.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderSettings;
    use std::time::Duration;

    #[test]
    fn test_default_listing_order() {
        let registry = ProviderRegistry::with_defaults();
        assert_eq!(registry.list_providers(), vec!["openai", "deepseek", "siliconflow"]);
    }

    #[test]
    fn test_resolve_uses_default_model() {
        let registry = ProviderRegistry::with_defaults();
        let provider = registry
            .resolve("deepseek", "sk-test", None, ProviderOptions::default())
            .unwrap();
        assert_eq!(provider.provider_name(), "deepseek");
        assert_eq!(provider.model_name(), "deepseek-chat");

        let provider = registry
            .resolve("SiliconFlow", "sk-test", Some("Qwen/Qwen2.5-7B-Instruct".to_string()), ProviderOptions::default())
            .unwrap();
        assert_eq!(provider.provider_name(), "siliconflow");
        assert_eq!(provider.model_name(), "Qwen/Qwen2.5-7B-Instruct");
    }

    #[test]
    fn test_resolve_unknown_provider() {
        let registry = ProviderRegistry::with_defaults();
        let result = registry.resolve("anthropic", "sk-test", None, ProviderOptions::default());
        match result {
            Err(LLMError::Configuration(message)) => assert!(message.contains("anthropic")),
            _ => panic!("expected configuration error"),
        }
    }

    #[test]
    fn test_resolve_requires_api_key() {
        let registry = ProviderRegistry::with_defaults();
        let result = registry.resolve("openai", "  ", None, ProviderOptions::default());
        assert!(matches!(result, Err(LLMError::Configuration(_))));
    }

    #[test]
    fn test_models_for() {
        let registry = ProviderRegistry::with_defaults();
        let models = registry.models_for("openai");
        assert_eq!(models.default, "gpt-3.5-turbo");
        assert_eq!(models.models.len(), 3);
        assert_eq!(models.description, "OpenAI GPT models");

        assert_eq!(registry.models_for("nope"), ProviderModels::default());
    }

    #[test]
    fn test_register_replaces_in_place() {
        let mut registry = ProviderRegistry::with_defaults();
        registry.register(
            "openai",
            ProviderEntry::new(|key, model, options| {
                Ok(Box::new(DeepSeekProvider::new(key, model, options)?) as Box<dyn LLMProvider>)
            })
            .with_models(ProviderModels::new(&["custom"], "custom", "Replaced")),
        );
        registry.register(
            "local",
            ProviderEntry::new(|key, model, options| {
                Ok(Box::new(OpenAIProvider::new(key, model, options)?) as Box<dyn LLMProvider>)
            }),
        );

        assert_eq!(registry.list_providers(), vec!["openai", "deepseek", "siliconflow", "local"]);
        assert_eq!(registry.models_for("openai").description, "Replaced");
        let provider = registry.resolve("openai", "key", None, ProviderOptions::default()).unwrap();
        assert_eq!(provider.model_name(), "custom");

        // No catalogue default: the constructor's own default applies
        let provider = registry.resolve("local", "key", None, ProviderOptions::default()).unwrap();
        assert_eq!(provider.model_name(), "gpt-3.5-turbo");
        assert!(registry.contains("LOCAL"));
    }

    #[test]
    fn test_resolve_from_settings() {
        let registry = ProviderRegistry::with_defaults();
        let mut llm_config = LLMConfig {
            timeout: Duration::from_secs(12),
            max_retries: 5,
            ..LLMConfig::default()
        };
        llm_config.providers.insert(
            "siliconflow".to_string(),
            ProviderSettings {
                api_key: Some("sf-key".to_string()),
                model: Some("meta-llama/Llama-3.1-8B-Instruct".to_string()),
                base_url: Some("http://localhost:9999/v1".to_string()),
            },
        );

        let provider = registry.resolve_from_settings("siliconflow", &llm_config, None).unwrap();
        let config = provider.config();
        assert_eq!(config.model, "meta-llama/Llama-3.1-8B-Instruct");
        assert_eq!(config.base_url, "http://localhost:9999/v1");
        assert_eq!(config.timeout, Duration::from_secs(12));
        assert_eq!(config.max_retries, 5);

        let provider = registry
            .resolve_from_settings("siliconflow", &llm_config, Some("Qwen/Qwen2.5-7B-Instruct".to_string()))
            .unwrap();
        assert_eq!(provider.model_name(), "Qwen/Qwen2.5-7B-Instruct");

        let missing = registry.resolve_from_settings("deepseek", &llm_config, None);
        assert!(matches!(missing, Err(LLMError::Configuration(_))));
    }
}

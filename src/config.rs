use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::env;
use std::time::Duration;
use tracing::{info, warn};

// Import logging macros
use crate::{log_system_event, log_validation};

/// Provider ids that get per-provider settings from the environment
pub const KNOWN_PROVIDERS: [&str; 3] = ["openai", "deepseek", "siliconflow"];

/// Complete application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub llm: LLMConfig,
    pub generation: GenerationConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

/// Database connection configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Credentials and overrides for a single upstream provider
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderSettings {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

/// Large Language Model service configuration
#[derive(Debug, Clone)]
pub struct LLMConfig {
    pub default_provider: String,
    pub providers: BTreeMap<String, ProviderSettings>,
    pub timeout: Duration,
    pub max_retries: u32,
    pub max_tokens: u32,
    pub temperature: f32,
    pub retry_all: bool,
}

/// Limits applied to text-to-cards generation requests
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub max_content_length: usize,
    pub max_cards_per_generation: usize,
}

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

/// Logging system configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub file_enabled: bool,
    pub console_enabled: bool,
    pub log_directory: String,
}

fn env_lookup(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn parse_or<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| anyhow!("Invalid {} value: '{}'", key, raw)),
        None => Ok(default),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load configuration from environment variables with sensible defaults
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(env_lookup)
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        log_system_event!(config, "Loading application configuration");

        let config = Config {
            database: DatabaseConfig::from_lookup(&lookup),
            llm: LLMConfig::from_lookup(&lookup)?,
            generation: GenerationConfig::from_lookup(&lookup)?,
            server: ServerConfig::from_lookup(&lookup)?,
            logging: LoggingConfig::from_lookup(&lookup)?,
        };

        log_system_event!(config, "Configuration loaded successfully");
        config.log_configuration_summary();

        Ok(config)
    }

    /// Log a summary of loaded configuration (without sensitive data)
    fn log_configuration_summary(&self) {
        let configured: Vec<&str> = self
            .llm
            .providers
            .iter()
            .filter(|(_, s)| s.api_key.is_some())
            .map(|(id, _)| id.as_str())
            .collect();

        info!(
            database_url_masked = %mask_sensitive_data(&self.database.url),
            default_provider = %self.llm.default_provider,
            configured_providers = ?configured,
            llm_timeout_secs = self.llm.timeout.as_secs(),
            llm_max_retries = self.llm.max_retries,
            server_address = %format!("{}:{}", self.server.host, self.server.port),
            log_level = %self.logging.level,
            "Configuration summary"
        );
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !self.database.url.starts_with("sqlite:") {
            return Err(anyhow!("DATABASE_URL must start with 'sqlite:'"));
        }

        if self.server.port == 0 {
            return Err(anyhow!("Server port must be greater than 0"));
        }

        if self.llm.timeout.is_zero() {
            return Err(anyhow!("LLM_TIMEOUT must be greater than 0"));
        }

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(anyhow!("LLM_TEMPERATURE must be between 0.0 and 2.0"));
        }

        if self.generation.max_cards_per_generation == 0 {
            return Err(anyhow!("MAX_CARDS_PER_GENERATION must be greater than 0"));
        }

        if self.llm.api_key_for(&self.llm.default_provider).is_none() {
            warn!(
                provider = %self.llm.default_provider,
                "No API key configured for the default LLM provider - generation requests will fail"
            );
        }

        log_validation!(success, "configuration", "Configuration validation completed successfully");
        Ok(())
    }
}

impl DatabaseConfig {
    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Self {
        let url = lookup("DATABASE_URL").unwrap_or_else(|| "sqlite:deepcard.db".to_string());
        DatabaseConfig { url }
    }
}

impl LLMConfig {
    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        let default_provider = lookup("DEFAULT_LLM_PROVIDER")
            .map(|p| p.trim().to_lowercase())
            .unwrap_or_else(|| "openai".to_string());

        let providers = KNOWN_PROVIDERS
            .iter()
            .map(|id| {
                let prefix = id.to_uppercase();
                let settings = ProviderSettings {
                    api_key: non_empty(lookup(&format!("{}_API_KEY", prefix))),
                    model: non_empty(lookup(&format!("{}_MODEL", prefix))),
                    base_url: non_empty(lookup(&format!("{}_BASE_URL", prefix))),
                };
                (id.to_string(), settings)
            })
            .collect();

        let timeout_secs: u64 = parse_or(lookup, "LLM_TIMEOUT", 30)?;

        Ok(LLMConfig {
            default_provider,
            providers,
            timeout: Duration::from_secs(timeout_secs),
            max_retries: parse_or(lookup, "LLM_MAX_RETRIES", 3)?,
            max_tokens: parse_or(lookup, "LLM_MAX_TOKENS", 1000)?,
            temperature: parse_or(lookup, "LLM_TEMPERATURE", 0.7)?,
            retry_all: parse_or(lookup, "LLM_RETRY_ALL", false)?,
        })
    }

    pub fn provider(&self, provider_id: &str) -> Option<&ProviderSettings> {
        self.providers.get(provider_id)
    }

    pub fn api_key_for(&self, provider_id: &str) -> Option<&str> {
        self.provider(provider_id).and_then(|s| s.api_key.as_deref())
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            default_provider: "openai".to_string(),
            providers: BTreeMap::new(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
            max_tokens: 1000,
            temperature: 0.7,
            retry_all: false,
        }
    }
}

impl GenerationConfig {
    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(GenerationConfig {
            max_content_length: parse_or(lookup, "MAX_CONTENT_LENGTH", 100_000)?,
            max_cards_per_generation: parse_or(lookup, "MAX_CARDS_PER_GENERATION", 20)?,
        })
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_content_length: 100_000,
            max_cards_per_generation: 20,
        }
    }
}

impl ServerConfig {
    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        let port_str = lookup("PORT").unwrap_or_else(|| "8000".to_string());

        let port = port_str
            .parse::<u16>()
            .map_err(|_| anyhow!("Invalid PORT value: '{}'. Must be a number between 1-65535", port_str))?;

        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());

        Ok(ServerConfig { port, host })
    }
}

impl LoggingConfig {
    /// Logging settings alone, so the subscriber can be installed before
    /// the rest of the configuration is loaded
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&env_lookup)
    }

    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        let level = lookup("RUST_LOG").unwrap_or_else(|| "info,deepcard=debug".to_string());

        Ok(LoggingConfig {
            level,
            file_enabled: parse_or(lookup, "LOG_FILE_ENABLED", true)?,
            console_enabled: parse_or(lookup, "LOG_CONSOLE_ENABLED", true)?,
            log_directory: lookup("LOG_DIRECTORY").unwrap_or_else(|| "logs".to_string()),
        })
    }
}

/// Mask sensitive data in configuration for safe logging
pub fn mask_sensitive_data(data: &str) -> String {
    let chars: Vec<char> = data.chars().collect();
    if chars.len() <= 8 {
        "*".repeat(chars.len())
    } else {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}***{}", head, tail)
    }
}

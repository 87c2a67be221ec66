use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::errors::LLMError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_MAX_TOKENS: u32 = 1000;
const DEFAULT_TEMPERATURE: f32 = 0.7;
const TEST_RESPONSE_PREVIEW_CHARS: usize = 100;
const ERROR_BODY_PREVIEW_CHARS: usize = 500;

/// Common message structure for chat-completion requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMMessage {
    pub role: String,
    pub content: String,
}

/// Resolved per-instance configuration of a provider client
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub provider_name: String,
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Optional provider settings supplied at construction time
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderOptions {
    pub base_url: Option<String>,
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// Per-call overrides; unset fields fall back to the instance defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Success,
    Error,
}

/// Outcome of a provider connectivity probe
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionTestResult {
    pub status: ConnectionStatus,
    pub provider: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub message: String,
}

impl ConnectionTestResult {
    pub fn is_success(&self) -> bool {
        self.status == ConnectionStatus::Success
    }
}

/// Uniform contract over upstream text-generation services
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Issue a single generation request. Never retries.
    async fn generate_text(&self, prompt: &str, overrides: &GenerationOverrides) -> Result<String, LLMError>;

    /// Stable lowercase provider id, e.g. `openai`
    fn provider_name(&self) -> &'static str;

    /// Human readable name used in probe prompts
    fn display_name(&self) -> &'static str;

    fn config(&self) -> &ProviderConfig;

    fn model_name(&self) -> &str {
        &self.config().model
    }

    /// Send a small fixed prompt and report the outcome. Never fails.
    async fn test_connection(&self) -> ConnectionTestResult {
        let probe = format!("Say 'Hello, {}!'", self.display_name());
        let provider = self.provider_name().to_string();
        let model = self.model_name().to_string();

        match self.generate_text(&probe, &GenerationOverrides::default()).await {
            Ok(response) => ConnectionTestResult {
                status: ConnectionStatus::Success,
                provider,
                model,
                test_response: Some(response.chars().take(TEST_RESPONSE_PREVIEW_CHARS).collect()),
                error: None,
                message: "Connection successful".to_string(),
            },
            Err(e) => ConnectionTestResult {
                status: ConnectionStatus::Error,
                provider,
                model,
                test_response: None,
                error: Some(e.to_string()),
                message: "Connection failed".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<LLMMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatCompletionChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionMessage {
    content: Option<String>,
}

/// Wire client shared by every OpenAI-compatible provider
#[derive(Debug, Clone)]
struct ChatCompletionsClient {
    client: Client,
    config: ProviderConfig,
}

impl ChatCompletionsClient {
    fn new(
        provider_name: &str,
        api_key: String,
        model: Option<String>,
        options: ProviderOptions,
        default_base_url: &str,
        default_model: &str,
    ) -> Result<Self, LLMError> {
        let config = ProviderConfig {
            provider_name: provider_name.to_string(),
            api_key,
            model: model
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| default_model.to_string()),
            base_url: options
                .base_url
                .unwrap_or_else(|| default_base_url.to_string())
                .trim_end_matches('/')
                .to_string(),
            timeout: options.timeout.unwrap_or(DEFAULT_TIMEOUT),
            max_retries: options.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            max_tokens: options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: options.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        };

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LLMError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    async fn complete(&self, prompt: &str, overrides: &GenerationOverrides) -> Result<String, LLMError> {
        let provider = self.config.provider_name.as_str();
        let model = overrides.model.as_deref().unwrap_or(&self.config.model);

        let request_body = ChatCompletionRequest {
            model,
            messages: vec![LLMMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens: overrides.max_tokens.unwrap_or(self.config.max_tokens),
            temperature: overrides.temperature.unwrap_or(self.config.temperature),
        };

        info!(
            provider = provider,
            model = %model,
            base_url = %self.config.base_url,
            prompt_length = prompt.len(),
            "Making LLM request"
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| LLMError::Connection {
                provider: provider.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .map(|t| t.chars().take(ERROR_BODY_PREVIEW_CHARS).collect::<String>())
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!(
                provider = provider,
                status = %status,
                error = %error_text,
                "LLM API request failed"
            );
            return Err(classify_status(provider, status, error_text));
        }

        let body = response.text().await.map_err(|e| LLMError::Connection {
            provider: provider.to_string(),
            message: e.to_string(),
        })?;

        let parsed: ChatCompletionResponse =
            serde_json::from_str(&body).map_err(|e| LLMError::InvalidResponse {
                provider: provider.to_string(),
                message: e.to_string(),
            })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LLMError::InvalidResponse {
                provider: provider.to_string(),
                message: "missing choices[0].message.content".to_string(),
            })?;

        debug!(
            provider = provider,
            response_length = content.len(),
            "Successfully received LLM response"
        );

        Ok(content)
    }
}

fn classify_status(provider: &str, status: StatusCode, message: String) -> LLMError {
    let provider = provider.to_string();
    match status {
        StatusCode::UNAUTHORIZED => LLMError::Unauthorized { provider, message },
        StatusCode::TOO_MANY_REQUESTS => LLMError::RateLimited { provider, message },
        _ => LLMError::Upstream {
            provider,
            status: status.as_u16(),
            message,
        },
    }
}

/// OpenAI provider implementation
#[derive(Debug, Clone)]
pub struct OpenAIProvider {
    inner: ChatCompletionsClient,
}

impl OpenAIProvider {
    pub const NAME: &'static str = "openai";
    pub const DEFAULT_BASE_URL: &'static str = "https://api.openai.com/v1";
    pub const DEFAULT_MODEL: &'static str = "gpt-3.5-turbo";

    pub fn new(api_key: String, model: Option<String>, options: ProviderOptions) -> Result<Self, LLMError> {
        let inner = ChatCompletionsClient::new(
            Self::NAME,
            api_key,
            model,
            options,
            Self::DEFAULT_BASE_URL,
            Self::DEFAULT_MODEL,
        )?;
        Ok(Self { inner })
    }
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    async fn generate_text(&self, prompt: &str, overrides: &GenerationOverrides) -> Result<String, LLMError> {
        self.inner.complete(prompt, overrides).await
    }

    fn provider_name(&self) -> &'static str {
        Self::NAME
    }

    fn display_name(&self) -> &'static str {
        "OpenAI"
    }

    fn config(&self) -> &ProviderConfig {
        &self.inner.config
    }
}

/// DeepSeek provider implementation
#[derive(Debug, Clone)]
pub struct DeepSeekProvider {
    inner: ChatCompletionsClient,
}

impl DeepSeekProvider {
    pub const NAME: &'static str = "deepseek";
    pub const DEFAULT_BASE_URL: &'static str = "https://api.deepseek.com/v1";
    pub const DEFAULT_MODEL: &'static str = "deepseek-chat";

    pub fn new(api_key: String, model: Option<String>, options: ProviderOptions) -> Result<Self, LLMError> {
        let inner = ChatCompletionsClient::new(
            Self::NAME,
            api_key,
            model,
            options,
            Self::DEFAULT_BASE_URL,
            Self::DEFAULT_MODEL,
        )?;
        Ok(Self { inner })
    }
}

#[async_trait]
impl LLMProvider for DeepSeekProvider {
    async fn generate_text(&self, prompt: &str, overrides: &GenerationOverrides) -> Result<String, LLMError> {
        self.inner.complete(prompt, overrides).await
    }

    fn provider_name(&self) -> &'static str {
        Self::NAME
    }

    fn display_name(&self) -> &'static str {
        "DeepSeek"
    }

    fn config(&self) -> &ProviderConfig {
        &self.inner.config
    }
}

/// SiliconFlow provider implementation
#[derive(Debug, Clone)]
pub struct SiliconFlowProvider {
    inner: ChatCompletionsClient,
}

impl SiliconFlowProvider {
    pub const NAME: &'static str = "siliconflow";
    pub const DEFAULT_BASE_URL: &'static str = "https://api.siliconflow.cn/v1";
    pub const DEFAULT_MODEL: &'static str = "deepseek-ai/DeepSeek-V3";

    pub fn new(api_key: String, model: Option<String>, options: ProviderOptions) -> Result<Self, LLMError> {
        let inner = ChatCompletionsClient::new(
            Self::NAME,
            api_key,
            model,
            options,
            Self::DEFAULT_BASE_URL,
            Self::DEFAULT_MODEL,
        )?;
        Ok(Self { inner })
    }
}

#[async_trait]
impl LLMProvider for SiliconFlowProvider {
    async fn generate_text(&self, prompt: &str, overrides: &GenerationOverrides) -> Result<String, LLMError> {
        self.inner.complete(prompt, overrides).await
    }

    fn provider_name(&self) -> &'static str {
        Self::NAME
    }

    fn display_name(&self) -> &'static str {
        "SiliconFlow"
    }

    fn config(&self) -> &ProviderConfig {
        &self.inner.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_defaults() {
        let openai = OpenAIProvider::new("sk-test".to_string(), None, ProviderOptions::default()).unwrap();
        assert_eq!(openai.provider_name(), "openai");
        assert_eq!(openai.config().base_url, "https://api.openai.com/v1");
        assert_eq!(openai.model_name(), "gpt-3.5-turbo");
        assert_eq!(openai.config().timeout, Duration::from_secs(30));
        assert_eq!(openai.config().max_retries, 3);
        assert_eq!(openai.config().max_tokens, 1000);

        let deepseek = DeepSeekProvider::new("key".to_string(), None, ProviderOptions::default()).unwrap();
        assert_eq!(deepseek.provider_name(), "deepseek");
        assert_eq!(deepseek.config().base_url, "https://api.deepseek.com/v1");
        assert_eq!(deepseek.model_name(), "deepseek-chat");

        let siliconflow = SiliconFlowProvider::new("key".to_string(), None, ProviderOptions::default()).unwrap();
        assert_eq!(siliconflow.provider_name(), "siliconflow");
        assert_eq!(siliconflow.config().base_url, "https://api.siliconflow.cn/v1");
        assert_eq!(siliconflow.model_name(), "deepseek-ai/DeepSeek-V3");
    }

    #[test]
    fn test_provider_options_override_defaults() {
        let options = ProviderOptions {
            base_url: Some("http://localhost:8080/v1/".to_string()),
            timeout: Some(Duration::from_secs(5)),
            max_retries: Some(1),
            max_tokens: Some(256),
            temperature: Some(0.2),
        };
        let provider = OpenAIProvider::new("key".to_string(), Some("gpt-4".to_string()), options).unwrap();
        let config = provider.config();

        assert_eq!(config.base_url, "http://localhost:8080/v1");
        assert_eq!(config.model, "gpt-4");
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.max_tokens, 256);
        assert_eq!(config.temperature, 0.2);
    }

    #[test]
    fn test_blank_model_uses_default() {
        let provider = DeepSeekProvider::new("key".to_string(), Some("  ".to_string()), ProviderOptions::default()).unwrap();
        assert_eq!(provider.model_name(), "deepseek-chat");
    }

    #[test]
    fn test_status_classification() {
        let err = classify_status("openai", StatusCode::UNAUTHORIZED, "bad key".to_string());
        assert!(matches!(err, LLMError::Unauthorized { .. }));

        let err = classify_status("openai", StatusCode::TOO_MANY_REQUESTS, "slow down".to_string());
        assert!(matches!(err, LLMError::RateLimited { .. }));

        let err = classify_status("openai", StatusCode::BAD_GATEWAY, "upstream".to_string());
        assert!(matches!(err, LLMError::Upstream { status: 502, .. }));
    }

    #[test]
    fn test_request_body_shape() {
        let body = ChatCompletionRequest {
            model: "gpt-4",
            messages: vec![LLMMessage {
                role: "user".to_string(),
                content: "hi".to_string(),
            }],
            max_tokens: 10,
            temperature: 0.5,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["model"], "gpt-4");
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["messages"][0]["content"], "hi");
        assert_eq!(value["max_tokens"], 10);
        assert_eq!(value["temperature"], 0.5);
    }
}

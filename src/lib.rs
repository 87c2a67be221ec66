pub mod api;
pub mod card_generator;
pub mod card_service;
pub mod config;
pub mod database;
pub mod errors;
pub mod generation_parser;
pub mod llm_providers;
pub mod logging;
pub mod models;
pub mod prompt_builder;
pub mod provider_registry;
pub mod repository;
pub mod retry;

pub use card_generator::CardGenerator;
pub use card_service::CardService;
pub use config::Config;
pub use database::Database;
pub use errors::*;
pub use generation_parser::{GenerationParser, ParsedBatch};
pub use llm_providers::{
    ConnectionTestResult, DeepSeekProvider, GenerationOverrides, LLMProvider, OpenAIProvider, ProviderConfig,
    ProviderOptions, SiliconFlowProvider,
};
pub use models::*;
pub use prompt_builder::build_generation_prompt;
pub use provider_registry::{ProviderEntry, ProviderModels, ProviderRegistry};
pub use repository::CardRepository;
pub use retry::{generate_with_retry, RetryPolicy};

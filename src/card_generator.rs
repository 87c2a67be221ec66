use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::config::LLMConfig;
use crate::errors::LLMError;
use crate::generation_parser::{GenerationParser, ParsedBatch};
use crate::llm_providers::{GenerationOverrides, LLMProvider};
use crate::models::{Card, CardType, GenerateCardsRequest, GenerateCardsResponse};
use crate::prompt_builder::build_generation_prompt;
use crate::provider_registry::ProviderRegistry;
use crate::repository::CardRepository;
use crate::retry::{generate_with_retry, RetryPolicy};
use crate::{log_llm_operation, log_service_success, log_service_warn};

/// Text-to-cards pipeline: provider resolution, prompt rendering,
/// retried generation, parsing and optional persistence.
#[derive(Clone)]
pub struct CardGenerator {
    registry: Arc<ProviderRegistry>,
    llm_config: Arc<LLMConfig>,
    repository: Arc<dyn CardRepository>,
    parser: GenerationParser,
}

impl CardGenerator {
    pub fn new(registry: Arc<ProviderRegistry>, llm_config: Arc<LLMConfig>, repository: Arc<dyn CardRepository>) -> Self {
        Self {
            registry,
            llm_config,
            repository,
            parser: GenerationParser::new(),
        }
    }

    pub fn retry_policy_for(&self, provider: &dyn LLMProvider) -> RetryPolicy {
        let policy = RetryPolicy::from_config(provider.config());
        if self.llm_config.retry_all {
            policy.retry_all()
        } else {
            policy
        }
    }

    /// Generate cards without persisting them
    pub async fn generate_cards_from_text(
        &self,
        text: &str,
        user_id: &str,
        card_type: CardType,
        provider_id: &str,
        max_cards: usize,
    ) -> Result<ParsedBatch, LLMError> {
        let start = Instant::now();
        let provider = self.registry.resolve_from_settings(provider_id, &self.llm_config, None)?;
        log_llm_operation!(
            start,
            "generate_cards",
            provider = provider.provider_name(),
            model = provider.model_name()
        );

        let prompt = build_generation_prompt(text, card_type, max_cards);
        let policy = self.retry_policy_for(provider.as_ref());
        let response = generate_with_retry(provider.as_ref(), &prompt, &GenerationOverrides::default(), &policy).await?;

        let batch = self.parser.parse_generated_cards(&response, user_id, card_type)?;

        log_llm_operation!(
            success,
            "generate_cards",
            provider = provider.provider_name(),
            duration_ms = start.elapsed().as_millis() as u64,
            card_count = batch.cards.len()
        );
        Ok(batch)
    }

    /// Run the pipeline for a request and, when `auto_save` is set, persist
    /// every card one after another. A card that fails to save is logged
    /// and left out; the rest of the batch is still saved.
    pub async fn generate_and_save(
        &self,
        user_id: &str,
        request: &GenerateCardsRequest,
    ) -> Result<GenerateCardsResponse, LLMError> {
        let start = Instant::now();
        let batch = self
            .generate_cards_from_text(&request.text, user_id, request.card_type, &request.provider, request.max_cards)
            .await?;

        let total_generated = batch.cards.len();
        if !request.auto_save {
            return Ok(GenerateCardsResponse {
                generated_cards: batch.cards,
                saved_cards: Vec::new(),
                total_generated,
                total_saved: 0,
                skipped: batch.skipped,
            });
        }

        let saved_cards = self.save_sequentially(batch.cards).await;

        log_service_success!(
            "card_generator",
            "generate_and_save",
            card_count = saved_cards.len(),
            duration_ms = start.elapsed().as_millis() as u64
        );

        Ok(GenerateCardsResponse {
            generated_cards: saved_cards.clone(),
            total_saved: saved_cards.len(),
            saved_cards,
            total_generated,
            skipped: batch.skipped,
        })
    }

    async fn save_sequentially(&self, cards: Vec<Card>) -> Vec<Card> {
        let mut saved = Vec::with_capacity(cards.len());
        for card in cards {
            match self.repository.create(&card).await {
                Ok(card) => saved.push(card),
                Err(e) => {
                    log_service_warn!(
                        "card_generator",
                        "auto_save",
                        format!("failed to save card '{}': {}", card.title(), e)
                    );
                }
            }
        }
        info!(saved = saved.len(), "Generated cards persisted");
        saved
    }
}

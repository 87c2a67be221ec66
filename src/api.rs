use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::{
    api_error,
    card_generator::CardGenerator,
    card_service::CardService,
    config::Config,
    errors::{classify_service_error, ApiError, ErrorContext, LLMError},
    llm_providers::{ConnectionTestResult, GenerationOverrides, LLMProvider, ProviderOptions},
    models::*,
    provider_registry::{ProviderModels, ProviderRegistry},
    repository::CardRepository,
    retry::generate_with_retry,
};

// Import logging macros
use crate::{log_api_start, log_api_success, log_api_warn, log_validation};

const DEFAULT_PAGE_LIMIT: i64 = 100;
const MAX_PAGE_LIMIT: i64 = 1000;
const MAX_CARDS_PER_REQUEST: usize = 20;

type ErrorResponse = (StatusCode, Json<ApiResponse<()>>);
type ApiResult<T> = Result<Json<ApiResponse<T>>, ErrorResponse>;

#[derive(Clone)]
pub struct AppState {
    pub card_service: CardService,
    pub card_generator: CardGenerator,
    pub registry: Arc<ProviderRegistry>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config, repository: Arc<dyn CardRepository>, registry: ProviderRegistry) -> Self {
        let registry = Arc::new(registry);
        let card_generator = CardGenerator::new(
            Arc::clone(&registry),
            Arc::new(config.llm.clone()),
            Arc::clone(&repository),
        );

        Self {
            card_service: CardService::new(repository),
            card_generator,
            registry,
            config: Arc::new(config),
        }
    }
}

#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

#[derive(Deserialize)]
pub struct UserParams {
    pub user_id: Option<String>,
}

#[derive(Deserialize)]
pub struct ListParams {
    pub user_id: Option<String>,
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct SearchParams {
    pub user_id: Option<String>,
    pub q: Option<String>,
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct TagParams {
    pub user_id: Option<String>,
    /// Comma separated
    pub tags: Option<String>,
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct TestConnectionRequest {
    pub provider: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
}

#[derive(Deserialize)]
pub struct GenerateTextRequest {
    pub provider: Option<String>,
    pub prompt: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Serialize)]
pub struct GenerateTextResponse {
    pub text: String,
    pub provider: String,
    pub model: String,
    pub prompt: String,
    pub parameters: GenerationOverrides,
}

#[derive(Serialize)]
pub struct ProvidersResponse {
    pub providers: Vec<String>,
    pub details: BTreeMap<String, ProviderModels>,
    pub default_provider: String,
}

fn require_user_id(user_id: Option<String>, operation: &str) -> Result<String, ErrorResponse> {
    match user_id.map(|u| u.trim().to_string()).filter(|u| !u.is_empty()) {
        Some(user_id) => Ok(user_id),
        None => {
            log_validation!(failure, operation, error = "missing user_id");
            Err(api_error!(validation, operation, "card", "user_id query parameter is required"))
        }
    }
}

fn page(skip: Option<i64>, limit: Option<i64>, operation: &str) -> Result<(i64, i64), ErrorResponse> {
    let skip = skip.unwrap_or(0);
    let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT);

    if skip < 0 {
        return Err(api_error!(validation, operation, "card", "skip must be 0 or greater"));
    }
    if !(1..=MAX_PAGE_LIMIT).contains(&limit) {
        return Err(api_error!(
            validation,
            operation,
            "card",
            format!("limit must be between 1 and {}", MAX_PAGE_LIMIT)
        ));
    }
    Ok((skip, limit))
}

fn service_error(operation: &str, error: anyhow::Error) -> ErrorResponse {
    classify_service_error(error).to_response_with_context(ErrorContext::new(operation, "card"))
}

pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "deepcard",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// Card endpoints
pub async fn create_card(
    State(state): State<AppState>,
    Query(params): Query<UserParams>,
    Json(request): Json<CreateCardRequest>,
) -> ApiResult<Card> {
    let user_id = require_user_id(params.user_id, "create_card")?;
    log_api_start!("create_card", user_id = user_id);

    match state.card_service.create_card(&user_id, request).await {
        Ok(card) => {
            log_api_success!("create_card", card_id = card.id(), "card created");
            Ok(Json(ApiResponse::success(card)))
        }
        Err(e) => Err(service_error("create_card", e)),
    }
}

pub async fn list_cards(State(state): State<AppState>, Query(params): Query<ListParams>) -> ApiResult<CardListResponse> {
    let user_id = require_user_id(params.user_id, "list_cards")?;
    let (skip, limit) = page(params.skip, params.limit, "list_cards")?;
    log_api_start!("list_cards", user_id = user_id);

    match state.card_service.get_user_cards(&user_id, skip, limit).await {
        Ok((cards, total)) => {
            log_api_success!("list_cards", count = cards.len(), "cards listed");
            Ok(Json(ApiResponse::success(CardListResponse {
                cards,
                total,
                skip,
                limit,
            })))
        }
        Err(e) => Err(service_error("list_cards", e)),
    }
}

pub async fn search_cards(State(state): State<AppState>, Query(params): Query<SearchParams>) -> ApiResult<Vec<Card>> {
    let user_id = require_user_id(params.user_id, "search_cards")?;
    let (skip, limit) = page(params.skip, params.limit, "search_cards")?;
    let query = params.q.unwrap_or_default();

    match state.card_service.search_cards(&user_id, &query, skip, limit).await {
        Ok(cards) => {
            log_api_success!("search_cards", count = cards.len(), "search completed");
            Ok(Json(ApiResponse::success(cards)))
        }
        Err(e) => Err(service_error("search_cards", e)),
    }
}

pub async fn get_cards_by_tags(State(state): State<AppState>, Query(params): Query<TagParams>) -> ApiResult<Vec<Card>> {
    let user_id = require_user_id(params.user_id, "get_cards_by_tags")?;
    let (skip, limit) = page(params.skip, params.limit, "get_cards_by_tags")?;

    let tags: Vec<String> = params
        .tags
        .unwrap_or_default()
        .split(',')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    if tags.is_empty() {
        return Err(api_error!(validation, "get_cards_by_tags", "card", "at least one tag is required"));
    }

    match state.card_service.get_cards_by_tags(&user_id, &tags, skip, limit).await {
        Ok(cards) => {
            log_api_success!("get_cards_by_tags", count = cards.len(), "tag lookup completed");
            Ok(Json(ApiResponse::success(cards)))
        }
        Err(e) => Err(service_error("get_cards_by_tags", e)),
    }
}

pub async fn get_card(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<UserParams>,
) -> ApiResult<Card> {
    let user_id = require_user_id(params.user_id, "get_card")?;
    log_api_start!("get_card", card_id = id, user_id = user_id);

    match state.card_service.get_card(id, &user_id).await {
        Ok(Some(card)) => {
            log_api_success!("get_card", card_id = id, "card retrieved successfully");
            Ok(Json(ApiResponse::success(card)))
        }
        Ok(None) => {
            log_api_warn!("get_card", card_id = id, "card not found");
            Err(api_error!(not_found, "get_card", "card", id))
        }
        Err(e) => Err(service_error("get_card", e)),
    }
}

pub async fn update_card(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<UserParams>,
    Json(request): Json<UpdateCardRequest>,
) -> ApiResult<Card> {
    let user_id = require_user_id(params.user_id, "update_card")?;
    log_api_start!("update_card", card_id = id, user_id = user_id);

    match state.card_service.update_card(id, &user_id, request).await {
        Ok(Some(card)) => {
            log_api_success!("update_card", card_id = id, "card updated");
            Ok(Json(ApiResponse::success(card)))
        }
        Ok(None) => Err(api_error!(not_found, "update_card", "card", id)),
        Err(e) => Err(service_error("update_card", e)),
    }
}

pub async fn delete_card(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<UserParams>,
) -> ApiResult<bool> {
    let user_id = require_user_id(params.user_id, "delete_card")?;
    log_api_start!("delete_card", card_id = id, user_id = user_id);

    match state.card_service.delete_card(id, &user_id).await {
        Ok(true) => {
            log_api_success!("delete_card", card_id = id, "card deleted");
            Ok(Json(ApiResponse::success(true)))
        }
        Ok(false) => Err(api_error!(not_found, "delete_card", "card", id)),
        Err(e) => Err(service_error("delete_card", e)),
    }
}

pub async fn generate_cards(
    State(state): State<AppState>,
    Query(params): Query<UserParams>,
    Json(request): Json<GenerateCardsRequest>,
) -> ApiResult<GenerateCardsResponse> {
    let user_id = require_user_id(params.user_id, "generate_cards")?;
    log_api_start!("generate_cards", provider = request.provider);

    if request.text.trim().is_empty() {
        return Err(api_error!(validation, "generate_cards", "card", "text must not be empty"));
    }

    let max_content_length = state.config.generation.max_content_length;
    if request.text.chars().count() > max_content_length {
        return Err(api_error!(
            validation,
            "generate_cards",
            "card",
            format!("text exceeds the maximum length of {} characters", max_content_length)
        ));
    }

    let max_cards = MAX_CARDS_PER_REQUEST.min(state.config.generation.max_cards_per_generation);
    if !(1..=max_cards).contains(&request.max_cards) {
        return Err(api_error!(
            validation,
            "generate_cards",
            "card",
            format!("max_cards must be between 1 and {}", max_cards)
        ));
    }

    match state.card_generator.generate_and_save(&user_id, &request).await {
        Ok(response) => {
            log_api_success!(
                "generate_cards",
                count = response.total_generated,
                format!("{} generated, {} saved", response.total_generated, response.total_saved)
            );
            Ok(Json(ApiResponse::success(response)))
        }
        Err(e) => Err(api_error!(llm, "generate_cards", "card", e)),
    }
}

// LLM endpoints
pub async fn list_llm_providers(State(state): State<AppState>) -> Json<ApiResponse<ProvidersResponse>> {
    let providers = state.registry.list_providers();
    let details = providers
        .iter()
        .map(|id| (id.clone(), state.registry.models_for(id)))
        .collect();

    Json(ApiResponse::success(ProvidersResponse {
        providers,
        details,
        default_provider: state.config.llm.default_provider.clone(),
    }))
}

/// Build a client from an explicit API key when one is supplied, otherwise
/// from the configured provider settings.
fn resolve_provider(
    state: &AppState,
    provider_id: &str,
    api_key: Option<String>,
    model: Option<String>,
) -> Result<Box<dyn LLMProvider>, LLMError> {
    match api_key.filter(|k| !k.trim().is_empty()) {
        Some(api_key) => {
            let settings = state.config.llm.provider(&provider_id.to_lowercase()).cloned().unwrap_or_default();
            let options = ProviderOptions {
                base_url: settings.base_url,
                ..ProviderRegistry::default_options(&state.config.llm)
            };
            state
                .registry
                .resolve(provider_id, &api_key, model.or(settings.model), options)
        }
        None => state.registry.resolve_from_settings(provider_id, &state.config.llm, model),
    }
}

pub async fn test_llm_connection(
    State(state): State<AppState>,
    Json(request): Json<TestConnectionRequest>,
) -> ApiResult<ConnectionTestResult> {
    let Some(provider_id) = request.provider.filter(|p| !p.trim().is_empty()) else {
        return Err(api_error!(validation, "test_llm_connection", "llm", "Provider name is required"));
    };
    log_api_start!("test_llm_connection", provider = provider_id);

    let provider = resolve_provider(&state, &provider_id, request.api_key, request.model)
        .map_err(|e| api_error!(llm, "test_llm_connection", "llm", e))?;

    let result = provider.test_connection().await;
    info!(
        provider = %result.provider,
        model = %result.model,
        status = ?result.status,
        "LLM connection test finished"
    );
    Ok(Json(ApiResponse::success(result)))
}

pub async fn generate_text(
    State(state): State<AppState>,
    Json(request): Json<GenerateTextRequest>,
) -> ApiResult<GenerateTextResponse> {
    let Some(prompt) = request.prompt.filter(|p| !p.trim().is_empty()) else {
        return Err(api_error!(validation, "generate_text", "llm", "Prompt is required"));
    };
    let provider_id = request
        .provider
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| state.config.llm.default_provider.clone());
    log_api_start!("generate_text", provider = provider_id);

    let provider = resolve_provider(&state, &provider_id, request.api_key, request.model)
        .map_err(|e| api_error!(llm, "generate_text", "llm", e))?;

    let parameters = GenerationOverrides {
        model: None,
        max_tokens: request.max_tokens,
        temperature: request.temperature,
    };
    let policy = state.card_generator.retry_policy_for(provider.as_ref());

    match generate_with_retry(provider.as_ref(), &prompt, &parameters, &policy).await {
        Ok(text) => {
            log_api_success!("generate_text", "text generated");
            Ok(Json(ApiResponse::success(GenerateTextResponse {
                text,
                provider: provider.provider_name().to_string(),
                model: provider.model_name().to_string(),
                prompt,
                parameters,
            })))
        }
        Err(e) => Err(ApiError::LLMError(e).to_response_with_context(
            ErrorContext::new("generate_text", "llm").with_id(&provider_id),
        )),
    }
}

pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        // Card routes
        .route("/cards", post(create_card).get(list_cards))
        .route("/cards/search", get(search_cards))
        .route("/cards/by-tags", get(get_cards_by_tags))
        .route("/cards/generate", post(generate_cards))
        .route("/cards/:id", get(get_card).put(update_card).delete(delete_card))
        // LLM routes
        .route("/llm/providers", get(list_llm_providers))
        .route("/llm/test", post(test_llm_connection))
        .route("/llm/generate", post(generate_text));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api)
        .with_state(state)
}

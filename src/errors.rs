use crate::api::ApiResponse;
use crate::models::CardError;
use axum::{http::StatusCode, response::Json};
use tracing::{error, info, warn};

/// Coarse classification of LLM failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LLMErrorKind {
    Configuration,
    Connection,
    Generation,
    Parse,
}

/// Failures raised by providers, the registry and the generation parser
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LLMError {
    #[error("LLM configuration error: {0}")]
    Configuration(String),

    #[error("Invalid API key for {provider}: {message}")]
    Unauthorized { provider: String, message: String },

    #[error("Rate limit exceeded for {provider}: {message}")]
    RateLimited { provider: String, message: String },

    #[error("Connection error with {provider}: {message}")]
    Connection { provider: String, message: String },

    #[error("{provider} API error (status {status}): {message}")]
    Upstream {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Invalid response format from {provider}: {message}")]
    InvalidResponse { provider: String, message: String },

    #[error("Failed to parse generated content: {0}")]
    Parse(String),
}

impl LLMError {
    pub fn kind(&self) -> LLMErrorKind {
        match self {
            LLMError::Configuration(_) => LLMErrorKind::Configuration,
            LLMError::Unauthorized { .. } | LLMError::RateLimited { .. } | LLMError::Connection { .. } => {
                LLMErrorKind::Connection
            }
            LLMError::Upstream { .. } | LLMError::InvalidResponse { .. } => LLMErrorKind::Generation,
            LLMError::Parse(_) => LLMErrorKind::Parse,
        }
    }

    /// Whether the failure is transient: network, rate limiting, 5xx/408
    /// and malformed bodies. Bad keys and caller mistakes are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            LLMError::RateLimited { .. } | LLMError::Connection { .. } | LLMError::InvalidResponse { .. } => true,
            LLMError::Upstream { status, .. } => *status >= 500 || *status == 408,
            LLMError::Configuration(_) | LLMError::Unauthorized { .. } | LLMError::Parse(_) => false,
        }
    }
}

/// Centralized error types for consistent API error handling
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] anyhow::Error),

    #[error("LLM service error: {0}")]
    LLMError(#[from] LLMError),
}

/// Error context for structured logging
#[derive(Debug)]
pub struct ErrorContext {
    pub operation: String,
    pub resource_id: Option<String>,
    pub resource_type: String,
    pub user_friendly_message: Option<String>,
}

impl ErrorContext {
    pub fn new(operation: &str, resource_type: &str) -> Self {
        Self {
            operation: operation.to_string(),
            resource_id: None,
            resource_type: resource_type.to_string(),
            user_friendly_message: None,
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.resource_id = Some(id.to_string());
        self
    }

    pub fn with_user_message(mut self, message: &str) -> Self {
        self.user_friendly_message = Some(message.to_string());
        self
    }
}

impl From<CardError> for ApiError {
    fn from(err: CardError) -> Self {
        ApiError::ValidationError(err.to_string())
    }
}

impl ApiError {
    /// Convert API error to HTTP response with consistent structure and logging
    pub fn to_response_with_context(self, context: ErrorContext) -> (StatusCode, Json<ApiResponse<()>>) {
        match &self {
            ApiError::NotFound(_) => {
                info!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Resource not found"
                );
                (
                    StatusCode::NOT_FOUND,
                    Json(ApiResponse::error(
                        context
                            .user_friendly_message
                            .unwrap_or_else(|| format!("{} not found", context.resource_type)),
                    )),
                )
            }
            ApiError::ValidationError(_) => {
                warn!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Validation error"
                );
                (StatusCode::BAD_REQUEST, Json(ApiResponse::error(self.to_string())))
            }
            ApiError::LLMError(llm_error) => {
                let status = match llm_error.kind() {
                    LLMErrorKind::Configuration => StatusCode::BAD_REQUEST,
                    LLMErrorKind::Connection => StatusCode::SERVICE_UNAVAILABLE,
                    LLMErrorKind::Generation => StatusCode::BAD_GATEWAY,
                    LLMErrorKind::Parse => StatusCode::UNPROCESSABLE_ENTITY,
                };
                if status == StatusCode::BAD_REQUEST {
                    warn!(
                        operation = %context.operation,
                        resource_type = %context.resource_type,
                        error = %self,
                        "LLM configuration error"
                    );
                } else {
                    error!(
                        operation = %context.operation,
                        resource_type = %context.resource_type,
                        error = %self,
                        "LLM service error"
                    );
                }
                let message = context
                    .user_friendly_message
                    .unwrap_or_else(|| llm_error.to_string());
                (status, Json(ApiResponse::error(message)))
            }
            ApiError::DatabaseError(_) => {
                error!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Database error"
                );
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ApiResponse::error(
                        "Database operation failed. Please try again.".to_string(),
                    )),
                )
            }
        }
    }
}

/// Helper macro for structured error responses
#[macro_export]
macro_rules! api_error {
    (not_found, $operation:expr, $resource_type:expr, $id:expr) => {
        $crate::errors::ApiError::NotFound(format!("{} with id '{}' not found", $resource_type, $id))
            .to_response_with_context(
                $crate::errors::ErrorContext::new($operation, $resource_type).with_id(&$id.to_string()),
            )
    };

    (validation, $operation:expr, $resource_type:expr, $message:expr) => {
        $crate::errors::ApiError::ValidationError($message.to_string())
            .to_response_with_context($crate::errors::ErrorContext::new($operation, $resource_type))
    };

    (llm, $operation:expr, $resource_type:expr, $error:expr) => {
        $crate::errors::ApiError::LLMError($error)
            .to_response_with_context($crate::errors::ErrorContext::new($operation, $resource_type))
    };
}

/// Classify service errors: typed card/LLM failures keep their meaning,
/// anything else is treated as a storage failure.
pub fn classify_service_error(error: anyhow::Error) -> ApiError {
    if let Some(card_error) = error.downcast_ref::<CardError>() {
        return ApiError::from(card_error.clone());
    }
    if let Some(llm_error) = error.downcast_ref::<LLMError>() {
        return ApiError::LLMError(llm_error.clone());
    }

    let error_str = error.to_string().to_lowercase();
    if error_str.contains("not found") || error_str.contains("no rows") {
        ApiError::NotFound("Resource not found".to_string())
    } else {
        ApiError::DatabaseError(error)
    }
}

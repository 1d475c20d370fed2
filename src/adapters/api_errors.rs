use crate::domain::error::PipelineError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// Newtype so the domain error can implement axum's `IntoResponse`.
pub struct ApiError(pub PipelineError);

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self.0 {
            PipelineError::Validation(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "validation_error",
                msg.clone(),
            ),
            PipelineError::Serialization(err) => (
                StatusCode::BAD_REQUEST,
                "malformed_payload",
                err.to_string(),
            ),
            PipelineError::WebhookSignature(_) => (
                StatusCode::UNAUTHORIZED,
                "webhook_error",
                "invalid webhook signature".to_string(),
            ),
            PipelineError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            PipelineError::InvalidTransition(msg) => {
                (StatusCode::CONFLICT, "invalid_transition", msg.clone())
            }
            PipelineError::LockUnavailable(_) => (
                StatusCode::CONFLICT,
                "busy",
                "resource is being modified, retry shortly".to_string(),
            ),
            PipelineError::Transient(msg) => {
                tracing::warn!("transient failure: {msg}");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "temporarily_unavailable",
                    "temporarily unavailable, retry later".to_string(),
                )
            }
            PipelineError::GatewayDecode(msg) => {
                tracing::error!("gateway decode error: {msg}");
                (
                    StatusCode::BAD_GATEWAY,
                    "gateway_error",
                    "unexpected gateway response".to_string(),
                )
            }
            PipelineError::Database(err) => {
                tracing::error!("database error: {err}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal error".to_string(),
                )
            }
            PipelineError::Configuration(msg) => {
                tracing::error!("configuration error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal error".to_string(),
                )
            }
        };

        let body = serde_json::json!({
            "error_code": error_code,
            "message": message,
        });

        (status, Json(body)).into_response()
    }
}

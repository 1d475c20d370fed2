use {
    crate::{
        AppState,
        adapters::api_errors::ApiError,
        domain::{audit::Actor, error::PipelineError, notification::Notification},
    },
    axum::{Json, body::Bytes, extract::State, http::HeaderMap},
    serde_json::json,
};

const SIGNATURE_HEADER: &str = "x-signature";
const REQUEST_ID_HEADER: &str = "x-request-id";

/// 2xx acknowledges the delivery; 5xx asks the gateway to redeliver.
#[tracing::instrument(
    name = "gateway_webhook",
    skip_all,
    fields(notification_id, event_type, resource_id)
)]
pub async fn gateway_webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    let request_id = headers.get(REQUEST_ID_HEADER).and_then(|v| v.to_str().ok());

    if !state.verifier.verify(&body, signature, request_id) {
        return Err(PipelineError::WebhookSignature("signature verification failed".into()).into());
    }

    // Signed but unusable: redelivery would bring the same bytes back.
    let notification: Notification = match serde_json::from_slice(&body) {
        Ok(notification) => notification,
        Err(e) => {
            tracing::warn!(error = %e, "signed notification does not decode, dropping");
            return Ok(malformed());
        }
    };

    let span = tracing::Span::current();
    span.record("notification_id", notification.log_id());
    span.record("event_type", notification.event_type.as_deref().unwrap_or("unknown"));
    span.record("resource_id", notification.data.id.as_str());

    match state.engine.pipeline.handle(&notification, Actor::Webhook).await {
        Ok(result) => {
            tracing::info!(status = result.status(), "notification processed");
            Ok(Json(json!({ "status": result.status() })))
        }
        Err(PipelineError::Validation(msg)) => {
            tracing::warn!(reason = %msg, "notification names no usable resource, dropping");
            Ok(malformed())
        }
        Err(PipelineError::NotFound(msg)) => {
            tracing::info!(reason = %msg, "resource unknown, acknowledging");
            Ok(Json(json!({ "status": "ignored", "reason": "not_found" })))
        }
        Err(e @ (PipelineError::GatewayDecode(_) | PipelineError::InvalidTransition(_))) => {
            tracing::warn!(error = %e, "notification acknowledged as anomaly");
            Ok(Json(json!({ "status": "anomaly" })))
        }
        Err(e) => {
            if e.is_retryable() {
                tracing::warn!(error = %e, "processing failed, requesting redelivery");
            }
            Err(e.into())
        }
    }
}

fn malformed() -> Json<serde_json::Value> {
    Json(json!({ "status": "ignored", "reason": "malformed" }))
}

use {
    crate::{
        AppState,
        adapters::{api_errors::ApiError, webhook::gateway_webhook_handler},
        domain::{payment::PaymentRecord, subscription::SubscriptionRecord},
        services::{
            orders::{OrderOutcome, OrderRequest},
            reconciler::ReconcileOutcome,
            subscriptions::{SubscribeOutcome, SubscribeRequest},
        },
    },
    axum::{
        Json, Router,
        extract::{DefaultBodyLimit, Path, State},
        http::StatusCode,
        routing::{get, post},
    },
    std::time::Duration,
    tower_http::{timeout::TimeoutLayer, trace::TraceLayer},
    uuid::Uuid,
};

/// Gateway notifications are a few KB at most.
const BODY_LIMIT: usize = 64 * 1024;

pub fn router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/webhooks/gateway", post(gateway_webhook_handler))
        .route("/subscriptions", post(subscribe_handler))
        .route("/subscriptions/{id}", get(get_subscription_handler))
        .route("/subscriptions/{id}/cancel", post(cancel_subscription_handler))
        .route("/orders", post(create_order_handler))
        .route("/orders/{id}", get(get_order_handler))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn subscribe_handler(
    State(state): State<AppState>,
    Json(request): Json<SubscribeRequest>,
) -> Result<(StatusCode, Json<SubscribeOutcome>), ApiError> {
    let outcome = state.engine.subscriptions.subscribe(&request).await?;
    let status = match outcome {
        SubscribeOutcome::Created { .. } => StatusCode::CREATED,
        SubscribeOutcome::Duplicate { .. } => StatusCode::OK,
    };
    Ok((status, Json(outcome)))
}

async fn get_subscription_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SubscriptionRecord>, ApiError> {
    Ok(Json(state.engine.subscriptions.get(id).await?))
}

async fn cancel_subscription_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ReconcileOutcome>, ApiError> {
    let outcome = state.engine.subscriptions.cancel(id).await?;
    tracing::info!(subscription_id = %id, status = outcome.status(), "manual cancel");
    Ok(Json(outcome))
}

async fn create_order_handler(
    State(state): State<AppState>,
    Json(request): Json<OrderRequest>,
) -> Result<(StatusCode, Json<OrderOutcome>), ApiError> {
    let outcome = state.engine.orders.create(&request).await?;
    let status = match outcome {
        OrderOutcome::Created { .. } => StatusCode::CREATED,
        OrderOutcome::Duplicate { .. } => StatusCode::OK,
    };
    Ok((status, Json(outcome)))
}

async fn get_order_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PaymentRecord>, ApiError> {
    Ok(Json(state.engine.orders.get(id).await?))
}

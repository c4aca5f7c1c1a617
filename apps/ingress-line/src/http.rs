use axum::{
    Router,
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, StatusCode},
    middleware,
    routing::{get, post},
};
use dine_core::SecretString;
use dine_core::platforms::line::parse_payload;
use dine_telemetry::{RequestOutcome, record_request};
use security::{SIGNATURE_HEADER, verify_signature};
use tracing::info;

use crate::config::IngressConfig;
use crate::dispatch::Dispatcher;
use crate::error::WebhookError;
use crate::rate::{RateLimiter, throttle};
use crate::reqid::with_request_id;

pub const HEALTH_PATH: &str = "/healthz";

#[derive(Clone)]
pub struct AppState {
    pub channel_secret: SecretString,
    pub dispatcher: Dispatcher,
}

/// Builds the ingress router: the webhook route (POST for deliveries, GET and
/// HEAD for reachability probes) plus a health endpoint.
pub fn build_router(config: &IngressConfig, dispatcher: Dispatcher) -> Router {
    let state = AppState {
        channel_secret: config.credentials.channel_secret.clone(),
        dispatcher,
    };

    let mut webhook = Router::new().route(&config.webhook_path, post(receive).get(probe));
    if let Some(limits) = config.rate_limit {
        webhook = webhook.route_layer(middleware::from_fn_with_state(
            RateLimiter::new(limits),
            throttle,
        ));
    }

    Router::new()
        .route(HEALTH_PATH, get(healthz))
        .merge(webhook)
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(middleware::from_fn(with_request_id))
        .with_state(state)
}

/// Verifies, decodes and hands off one delivery, then acknowledges it without
/// waiting for any reply.
async fn receive(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, WebhookError> {
    // Non-UTF-8 bytes become replacement characters and fail base64 decoding.
    let provided = headers
        .get(SIGNATURE_HEADER)
        .map(|value| String::from_utf8_lossy(value.as_bytes()));
    if !verify_signature(state.channel_secret.expose(), &body, provided.as_deref())? {
        return Err(WebhookError::InvalidSignature);
    }

    let payload = parse_payload(&body)?;
    info!(
        events = payload.events.len(),
        destination = payload.destination.as_deref().unwrap_or(""),
        "webhook accepted"
    );
    record_request(RequestOutcome::Accepted);
    drop(state.dispatcher.spawn(payload));
    Ok(StatusCode::OK)
}

async fn probe() -> StatusCode {
    StatusCode::OK
}

async fn healthz() -> StatusCode {
    StatusCode::NO_CONTENT
}

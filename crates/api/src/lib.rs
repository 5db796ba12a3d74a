#![forbid(unsafe_code)]

use std::sync::Arc;

use axum::routing::get;
use axum::{extract::State, http::StatusCode, Router};
use tandem_realtime::broker::GroupBroker;
use tandem_realtime::limiter::RateLimiter;
use tandem_storage::Storage;

mod ws;

pub use ws::PresenceRegistry;

#[derive(Clone)]
pub struct ApiState {
    storage: Arc<dyn Storage>,
    broker: Arc<GroupBroker>,
    limiter: Arc<RateLimiter>,
    presence: Arc<PresenceRegistry>,
}

impl ApiState {
    #[must_use]
    pub fn new(
        storage: Arc<dyn Storage>,
        broker: Arc<GroupBroker>,
        limiter: Arc<RateLimiter>,
        presence: Arc<PresenceRegistry>,
    ) -> Self {
        Self {
            storage,
            broker,
            limiter,
            presence,
        }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws::websocket_upgrade))
        .with_state(state)
}

async fn health(State(state): State<ApiState>) -> StatusCode {
    match state.storage.ping().await {
        Ok(()) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

mod health;
mod metrics;
mod socket;

use crate::server::SharedState;
use axum::{routing::get, Router};

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health::healthcheck))
        .route("/metrics", get(metrics::metrics_handler))
        .route("/ws", get(socket::ws_handler))
}

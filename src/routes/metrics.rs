use crate::server::SharedState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};

pub async fn metrics_handler(State(state): State<SharedState>) -> Response {
    state.metrics.set_active_sessions(state.hub.registry().active_count());

    match state.metrics.encode() {
        Ok(body) => body.into_response(),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

use crate::server::SharedState;
use axum::{extract::State, response::IntoResponse, response::Json};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
pub struct Health {
    status: String,
    connections: usize,
    active_sessions: usize,
}

pub async fn healthcheck(State(state): State<SharedState>) -> impl IntoResponse {
    Json(Health {
        status: "Available".into(),
        connections: state.hub.connection_count(),
        active_sessions: state.hub.registry().active_count(),
    })
}

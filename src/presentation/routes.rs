// Router - machine endpoints use the 0-based machine index in the path
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{
    health_check, list_machines, machine_details, machine_history, refresh_machine,
    refresh_machines,
};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/machines", get(list_machines))
        .route("/machines/refresh", post(refresh_machines))
        .route("/machines/:index", get(machine_details))
        .route("/machines/:index/refresh", post(refresh_machine))
        .route("/machines/:index/history", get(machine_history))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

//! HTTP server module

mod api;
mod invocations;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::AppState;

pub use api::ExecutionParameters;
pub use invocations::{
    ModelInfoResponse, ObservationRequest, ObservationResponse, RewardResponse,
};

/// Create the HTTP router with all routes configured
pub fn create_router(state: Arc<AppState>) -> Router {
    let body_limit = state.profile.max_content_length;
    let timeout = state.profile.timeout;

    Router::new()
        .route("/invocations", post(invocations::invocations))
        .route("/ping", get(api::ping))
        .route("/execution-parameters", get(api::execution_parameters))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TimeoutLayer::new(timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

//! Health and batch-orchestration endpoints

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bandit_core::BatchStrategy;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::AppState;

/// GET /ping
///
/// The router is only served once startup has completed, so answering at all
/// means the server is ready.
pub async fn ping() -> StatusCode {
    StatusCode::OK
}

/// Hints a batch transform orchestrator uses to size its requests
#[derive(Debug, Serialize, Deserialize)]
pub struct ExecutionParameters {
    pub max_concurrent_transforms: usize,
    pub batch_strategy: BatchStrategy,
    #[serde(rename = "max_payload_in_MB")]
    pub max_payload_in_mb: usize,
}

/// GET /execution-parameters
pub async fn execution_parameters(State(state): State<Arc<AppState>>) -> Response {
    let profile = &state.profile;
    let parameters = ExecutionParameters {
        max_concurrent_transforms: profile.max_concurrent_transforms(),
        batch_strategy: profile.batch_strategy(),
        max_payload_in_mb: profile.max_payload_in_mb(),
    };

    if parameters.max_concurrent_transforms == 0 || parameters.max_payload_in_mb == 0 {
        error!(
            workers = profile.num_workers,
            max_content_length = profile.max_content_length,
            "Serving profile cannot produce execution parameters"
        );
        return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response();
    }

    Json(parameters).into_response()
}

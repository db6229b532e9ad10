//! Scoring endpoint

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use bandit_core::codec::APPLICATION_JSONLINES;
use bandit_core::error::CodecError;
use bandit_core::{
    ErrorKind, ExperienceEvent, RequestDecoder, RewardEvent, ScoringEvent, ServingError,
    choose_actions, new_event_id, parse_content_type, report_error,
};
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::AppState;
use crate::error::ApiError;

/// Placeholder reported for rollout tracking, which is not implemented
const SOFT_UPDATE_STATUS: &str = "not tracked";

fn default_top_k() -> usize {
    1
}

/// Body of an `observation` request
#[derive(Debug, Deserialize)]
pub struct ObservationRequest {
    #[serde(default)]
    pub shared_context: Option<Vec<f64>>,
    #[serde(default)]
    pub actions_context: Option<Vec<Vec<f64>>>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub user_id: u64,
}

/// Response to an `observation` request
#[derive(Debug, Serialize, Deserialize)]
pub struct ObservationResponse {
    pub actions: Vec<usize>,
    pub action_probs: Vec<f64>,
    pub event_id: u64,
    pub timestamp: i64,
    pub model_id: String,
    pub sample_prob: f64,
}

/// Response to a `reward` request
#[derive(Debug, Serialize, Deserialize)]
pub struct RewardResponse {
    pub status: String,
}

/// Response to a `model_id` request
#[derive(Debug, Serialize, Deserialize)]
pub struct ModelInfoResponse {
    pub model_id: String,
    pub soft_model_update_status: String,
}

fn malformed(error: serde_json::Error) -> ServingError {
    CodecError::Malformed(error.to_string()).into()
}

fn to_value<T: Serialize>(response: &T) -> Result<Value, ServingError> {
    serde_json::to_value(response).map_err(|e| CodecError::Encode(e.to_string()).into())
}

/// POST /invocations
pub async fn invocations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let header = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
    let (content_type, _params) = parse_content_type(header);

    let codecs = state
        .registry
        .decoder(&content_type)
        .and_then(|decoder| Ok((decoder, state.registry.encoder(&content_type)?)));
    let Ok((decoder, encoder)) = codecs else {
        warn!(content_type = %content_type, "Unsupported content type");
        return (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            format!("content-type {content_type} not supported"),
        )
            .into_response();
    };

    if body.is_empty() {
        return StatusCode::NO_CONTENT.into_response();
    }

    let result = handle(&state, &content_type, decoder.as_ref(), &body)
        .await
        .and_then(|values| encoder.encode(&values).map_err(ServingError::from));

    match result {
        Ok(bytes) => ([(CONTENT_TYPE, encoder.content_type())], bytes).into_response(),
        Err(e) => {
            if e.kind() == ErrorKind::Customer {
                debug!(error = %e, "Rejected request");
            } else {
                report_error(&e, state.profile.mode);
            }
            ApiError(e).into_response()
        }
    }
}

async fn handle(
    state: &AppState,
    content_type: &str,
    decoder: &dyn RequestDecoder,
    body: &[u8],
) -> Result<Vec<Value>, ServingError> {
    let documents = decoder.decode(body)?;
    let batch = content_type == APPLICATION_JSONLINES;

    let mut responses = Vec::with_capacity(documents.len());
    for document in documents {
        let response = if batch {
            observe(state, document).await?
        } else {
            dispatch(state, document).await?
        };
        responses.push(response);
    }
    Ok(responses)
}

async fn dispatch(state: &AppState, document: Value) -> Result<Value, ServingError> {
    let request_type = match document.get("request_type") {
        None | Some(Value::Null) => "observation".to_string(),
        Some(Value::String(kind)) => kind.to_ascii_lowercase(),
        Some(other) => {
            return Err(ServingError::Customer(format!(
                "request_type must be a string, got {other}"
            )));
        }
    };

    match request_type.as_str() {
        "observation" => observe(state, document).await,
        "reward" => reward(state, document),
        "model_id" => model_info(state).await,
        other => Err(ServingError::Customer(format!(
            "Unknown request_type '{other}'"
        ))),
    }
}

async fn observe(state: &AppState, document: Value) -> Result<Value, ServingError> {
    let request: ObservationRequest = serde_json::from_value(document).map_err(malformed)?;
    let shared_context = request.shared_context.unwrap_or_default();
    trace!(user_id = request.user_id, top_k = request.top_k, "Scoring observation");

    // The scoring call runs in its own task holding the lease, so a dropped
    // request can't abandon an exchange halfway through the scorer's pipes.
    let mut lease = state.workers.lease().await;
    let top_k = request.top_k;
    let actions_context = request.actions_context;
    let scoring = tokio::spawn(async move {
        let decision = choose_actions(
            &mut *lease,
            &shared_context,
            actions_context.as_deref(),
            top_k,
        )
        .await;
        (
            decision,
            lease.model_id().to_string(),
            shared_context,
            actions_context,
        )
    });
    let (decision, model_id, shared_context, actions_context) = scoring
        .await
        .map_err(|e| ServingError::Platform(format!("scoring task failed: {e}")))?;
    let decision = decision?;

    let event_id = new_event_id();
    let timestamp = Utc::now().timestamp();
    let sample_prob: f64 = rand::thread_rng().gen_range(0.0..1.0);

    if state.logging_enabled() {
        submit(
            state,
            ScoringEvent {
                actions: decision.actions.clone(),
                action_probs: decision.action_probs.clone(),
                event_id,
                shared_context,
                actions_context,
                timestamp,
                model_id: model_id.clone(),
                sample_prob,
            }
            .into(),
        );
    }

    to_value(&ObservationResponse {
        actions: decision.actions,
        action_probs: decision.action_probs,
        event_id,
        timestamp,
        model_id,
        sample_prob,
    })
}

fn reward(state: &AppState, document: Value) -> Result<Value, ServingError> {
    let event: RewardEvent = serde_json::from_value(document).map_err(malformed)?;

    let status = if state.logging_enabled() {
        submit(state, event.into());
        "success"
    } else {
        debug!(event_id = event.event_id, "Reward received with logging disabled");
        "failure"
    };

    to_value(&RewardResponse {
        status: status.to_string(),
    })
}

async fn model_info(state: &AppState) -> Result<Value, ServingError> {
    to_value(&ModelInfoResponse {
        model_id: state.workers.model_id().await,
        soft_model_update_status: SOFT_UPDATE_STATUS.to_string(),
    })
}

/// Hand an event to the sink; delivery problems never fail the request
fn submit(state: &AppState, event: ExperienceEvent) {
    let Some(sink) = &state.sink else {
        return;
    };
    let event_id = event.event_id();
    match event.to_bytes() {
        Ok(bytes) => {
            if let Err(e) = sink.submit(bytes) {
                warn!(event_id, error = %e, "Failed to submit experience event");
            }
        }
        Err(e) => warn!(event_id, error = %e, "Failed to serialize experience event"),
    }
}

//! End-to-end tests for the scoring endpoint

mod common;

use std::sync::Arc;

use axum::http::StatusCode;
use axum_test::TestServer;
use bandit_core::artifact::ModelArtifact;
use bandit_core::error::ScorerError;
use bandit_core::{MockScorer, Scorer, ScorerFactory};
use bandit_server::http::{ModelInfoResponse, ObservationResponse, RewardResponse};
use serde_json::{Value, json};

async fn post_json(server: &TestServer, body: Value) -> axum_test::TestResponse {
    server
        .post("/invocations")
        .bytes(body.to_string().into())
        .content_type("application/json")
        .await
}

// ==================== Observation Tests ====================

#[tokio::test]
async fn observation_scores_every_candidate() {
    let ctx = common::create_context(false).await;
    let server = ctx.server();

    let response = post_json(
        &server,
        json!({
            "request_type": "observation",
            "shared_context": [1.0, 0.0],
            "actions_context": [[0.1], [0.2]],
        }),
    )
    .await;
    response.assert_status_ok();

    let raw: Value = response.json();
    for key in [
        "actions",
        "action_probs",
        "event_id",
        "timestamp",
        "model_id",
        "sample_prob",
    ] {
        assert!(raw.get(key).is_some(), "missing {key}");
    }

    let body: ObservationResponse = response.json();
    assert_eq!(body.actions.len(), 1);
    assert!(body.actions[0] < 2);
    assert_eq!(body.action_probs.len(), 2);
    assert!((body.action_probs.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    assert_eq!(body.model_id, "m-1");
    assert!((0.0..1.0).contains(&body.sample_prob));
}

#[tokio::test]
async fn observation_is_the_default_request_type() {
    let ctx = common::create_context(false).await;
    let server = ctx.server();

    let response = post_json(&server, json!({"shared_context": [0.5]})).await;
    response.assert_status_ok();
    let body: ObservationResponse = response.json();
    assert_eq!(body.model_id, "m-1");
}

#[tokio::test]
async fn request_type_is_case_insensitive() {
    let ctx = common::create_context(false).await;
    let server = ctx.server();

    post_json(
        &server,
        json!({"request_type": "OBSERVATION", "shared_context": [1.0]}),
    )
    .await
    .assert_status_ok();
}

#[tokio::test]
async fn top_k_returns_distinct_actions() {
    let ctx = common::create_context(false).await;
    let server = ctx.server();

    let response = post_json(&server, json!({"shared_context": [1.0], "top_k": 2})).await;
    response.assert_status_ok();
    let body: ObservationResponse = response.json();
    let mut actions = body.actions.clone();
    actions.sort_unstable();
    assert_eq!(actions, vec![0, 1]);
}

#[tokio::test]
async fn observation_with_logging_emits_scoring_event() {
    let ctx = common::create_context(true).await;
    let server = ctx.server();

    let response = post_json(&server, json!({"shared_context": [1.0, 2.0]})).await;
    response.assert_status_ok();
    let body: ObservationResponse = response.json();

    ctx.flush_events().await;
    let events = ctx.stream.json_records().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["type"], "actions");
    assert_eq!(events[0]["event_id"], body.event_id);
    assert_eq!(events[0]["model_id"], "m-1");
    assert_eq!(events[0]["shared_context"], json!([1.0, 2.0]));
}

// ==================== Reward Tests ====================

#[tokio::test]
async fn reward_without_logging_reports_failure() {
    let ctx = common::create_context(false).await;
    let server = ctx.server();

    let response = post_json(
        &server,
        json!({"request_type": "reward", "event_id": 42, "reward": 1.0}),
    )
    .await;
    response.assert_status_ok();
    let body: RewardResponse = response.json();
    assert_eq!(body.status, "failure");
}

#[tokio::test]
async fn reward_with_logging_emits_one_event() {
    let ctx = common::create_context(true).await;
    let server = ctx.server();

    let response = post_json(
        &server,
        json!({"request_type": "reward", "event_id": 42, "reward": 0.5}),
    )
    .await;
    response.assert_status_ok();
    let body: RewardResponse = response.json();
    assert_eq!(body.status, "success");

    ctx.flush_events().await;
    let events = ctx.stream.json_records().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["type"], "rewards");
    assert_eq!(events[0]["event_id"], 42);
    assert_eq!(events[0]["reward"], 0.5);
}

#[tokio::test]
async fn reward_accepts_string_event_id() {
    let ctx = common::create_context(true).await;
    let server = ctx.server();

    let response = post_json(
        &server,
        json!({"request_type": "reward", "event_id": "18446744073709551615", "reward": 1.0}),
    )
    .await;
    response.assert_status_ok();

    ctx.flush_events().await;
    let events = ctx.stream.json_records().await;
    assert_eq!(events[0]["event_id"], u64::MAX);
}

#[tokio::test]
async fn reward_without_reward_field_is_rejected() {
    let ctx = common::create_context(true).await;
    let server = ctx.server();

    post_json(&server, json!({"request_type": "reward", "event_id": 1}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

// ==================== Model Info Tests ====================

#[tokio::test]
async fn model_id_request_reports_serving_model() {
    let ctx = common::create_context(false).await;
    let server = ctx.server();

    let response = post_json(&server, json!({"request_type": "model_id"})).await;
    response.assert_status_ok();
    let body: ModelInfoResponse = response.json();
    assert_eq!(body.model_id, "m-1");
    assert!(!body.soft_model_update_status.is_empty());
}

// ==================== Rejection Tests ====================

#[tokio::test]
async fn unknown_request_type_is_rejected() {
    let ctx = common::create_context(false).await;
    let server = ctx.server();

    let response = post_json(&server, json!({"request_type": "explain"})).await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert!(response.text().contains("explain"));
}

#[tokio::test]
async fn non_string_request_type_is_rejected() {
    let ctx = common::create_context(false).await;
    let server = ctx.server();

    post_json(&server, json!({"request_type": 7}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_json_is_rejected() {
    let ctx = common::create_context(false).await;
    let server = ctx.server();

    let response = server
        .post("/invocations")
        .bytes("{not json".into())
        .content_type("application/json")
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert!(response.text().contains("Incorrect JSON format error"));
}

#[tokio::test]
async fn unsupported_content_type_is_rejected() {
    let ctx = common::create_context(false).await;
    let server = ctx.server();

    let response = server
        .post("/invocations")
        .bytes("a,b,c".into())
        .content_type("text/csv")
        .await;
    response.assert_status(StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert!(response.text().contains("text/csv"));
}

#[tokio::test]
async fn empty_body_returns_no_content() {
    let ctx = common::create_context(false).await;
    let server = ctx.server();

    server
        .post("/invocations")
        .bytes(Vec::new().into())
        .content_type("application/json")
        .await
        .assert_status(StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn out_of_range_top_k_is_rejected() {
    let ctx = common::create_context(false).await;
    let server = ctx.server();

    post_json(&server, json!({"shared_context": [1.0], "top_k": 5}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn mismatched_actions_context_is_rejected() {
    let ctx = common::create_context(false).await;
    let server = ctx.server();

    post_json(
        &server,
        json!({"shared_context": [1.0], "actions_context": [[1.0], [2.0], [3.0]]}),
    )
    .await
    .assert_status(StatusCode::BAD_REQUEST);
}

// ==================== Batch Tests ====================

#[tokio::test]
async fn jsonlines_scores_each_line() {
    let ctx = common::create_context(false).await;
    let server = ctx.server();

    let body = "{\"shared_context\":[1.0]}\n{\"shared_context\":[2.0]}\n\n{\"shared_context\":[3.0]}\n";
    let response = server
        .post("/invocations")
        .bytes(body.into())
        .content_type("application/jsonlines")
        .await;
    response.assert_status_ok();

    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert_eq!(content_type, "application/jsonlines");

    let text = response.text();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    for line in lines {
        let parsed: ObservationResponse = serde_json::from_str(line).unwrap();
        assert_eq!(parsed.action_probs.len(), 2);
    }
}

#[tokio::test]
async fn jsonlines_with_bad_line_is_rejected() {
    let ctx = common::create_context(false).await;
    let server = ctx.server();

    let response = server
        .post("/invocations")
        .bytes("{\"shared_context\":[1.0]}\n{oops\n".into())
        .content_type("application/jsonlines")
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert!(response.text().contains("line 2"));
}

// ==================== Scorer Failure Tests ====================

/// Every scorer it creates fails its first prediction with a dead process
struct DeadProcessFactory;

impl ScorerFactory for DeadProcessFactory {
    fn create(&self, _artifact: &ModelArtifact) -> Box<dyn Scorer> {
        let mut scorer = MockScorer::new(2);
        scorer.queue_error(ScorerError::ProcessDown { code: Some(137) });
        Box::new(scorer)
    }
}

#[tokio::test]
async fn dead_scorer_process_returns_service_unavailable() {
    let ctx = common::create_context_with_factory(Arc::new(DeadProcessFactory), false).await;
    let server = ctx.server();

    let response = post_json(&server, json!({"shared_context": [1.0]})).await;
    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    assert!(!response.text().contains("137"));
}

// ==================== Live Server Tests ====================

#[tokio::test]
async fn live_server_answers_ping_and_scores() {
    let ctx = common::create_context(false).await;
    let (addr, shutdown) = common::spawn_server(Arc::clone(&ctx.state)).await;
    let client = reqwest::Client::new();

    let ping = client
        .get(format!("http://{addr}/ping"))
        .send()
        .await
        .unwrap();
    assert_eq!(ping.status(), reqwest::StatusCode::OK);

    let response = client
        .post(format!("http://{addr}/invocations"))
        .header("content-type", "application/json; charset=utf-8")
        .body(r#"{"shared_context":[1.0]}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: ObservationResponse = response.json().await.unwrap();
    assert_eq!(body.model_id, "m-1");

    let _ = shutdown.send(());
}

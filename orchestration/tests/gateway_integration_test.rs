//! HTTP surface tests against a real listener.

mod support;

use serde_json::json;

use orchestration::{build_router, AppState};
use support::{app_state, good_greeting, HarnessBuilder, StubToolServer};

async fn serve(state: AppState) -> String {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn greeting_state(rate_per_minute: u32) -> AppState {
    let tools = StubToolServer::new()
        .answer("conversational_responder", &good_greeting())
        .answer("retriever", "context passage")
        .answer(
            "synthesize",
            "Here is a synthesized answer that covers the request in three \
             sentences. It uses the retrieved context. It stays on topic.",
        );
    let harness = HarnessBuilder::new(tools).build();
    app_state(&harness, rate_per_minute, 8, "operator-secret")
}

#[tokio::test]
async fn query_endpoint_round_trip() {
    let base = serve(greeting_state(60)).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/v1/query"))
        .json(&json!({"query": "hello", "session_id": "s-1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["answer"].as_str().unwrap().to_lowercase().contains("hello"));
    assert_eq!(body["strategy_used"], "simple");
    assert_eq!(body["iterations"], 1);
    assert!(body["quality"].as_f64().unwrap() >= 0.7);
    assert!(body["diagnostics"]["phases"].is_array());
}

#[tokio::test]
async fn empty_query_maps_to_invalid_input_envelope() {
    let base = serve(greeting_state(60)).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/v1/query"))
        .json(&json!({"query": "   "}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"], "INVALID_INPUT");
    assert!(body["message"].as_str().unwrap().contains("empty"));
}

#[tokio::test]
async fn rate_limit_rejects_with_retry_after() {
    let base = serve(greeting_state(2)).await;
    let client = reqwest::Client::new();

    for _ in 0..2 {
        let ok = client
            .post(format!("{base}/v1/query"))
            .json(&json!({"query": "hello", "user_id": "u-1"}))
            .send()
            .await
            .unwrap();
        assert_eq!(ok.status(), 200);
    }

    let limited = client
        .post(format!("{base}/v1/query"))
        .json(&json!({"query": "hello", "user_id": "u-1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(limited.status(), 429);
    let body: serde_json::Value = limited.json().await.unwrap();
    assert_eq!(body["code"], "BACKEND_UNAVAILABLE");
    assert!(body["retry_after"].as_u64().is_some());
}

#[tokio::test]
async fn status_and_capabilities_report_shape() {
    let base = serve(greeting_state(60)).await;
    let client = reqwest::Client::new();

    let status: serde_json::Value = client
        .get(format!("{base}/v1/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["status"], "ok");
    assert_eq!(status["tool_server"], "ok");
    assert!(status["queue_depth"].as_u64().is_some());

    let capabilities: serde_json::Value = client
        .get(format!("{base}/v1/capabilities"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(capabilities["capabilities"]["retriever"], "retriever");
    assert_eq!(
        capabilities["capabilities"]["conversational_responder"],
        "conversational_responder"
    );
}

#[tokio::test]
async fn sci_flow_over_http() {
    let base = serve(greeting_state(60)).await;
    let client = reqwest::Client::new();

    let participant: serde_json::Value = client
        .post(format!("{base}/v1/sci/participants"))
        .json(&json!({"name": "ana", "role": "primary_user", "verified": true}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let participant_id = participant["participant_id"].as_str().unwrap().to_string();

    let decision: serde_json::Value = client
        .post(format!("{base}/v1/sci/decisions"))
        .json(&json!({
            "title": "enable canary",
            "type": "rollout",
            "criticality": 0.5,
            "consensus_type": "weighted",
            "deadline_ms": 60000,
            "recommended_option": "enable"
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let decision_id = decision["decision_id"].as_str().unwrap().to_string();

    let vote = client
        .post(format!("{base}/v1/sci/votes"))
        .json(&json!({
            "decision_id": decision_id,
            "participant_id": participant_id,
            "choice": "approve"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(vote.status(), 200);

    let tally: serde_json::Value = client
        .post(format!("{base}/v1/sci/decisions/{decision_id}/tally"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(tally["decided"], true);
    assert_eq!(tally["status"], "approved");
}

#[tokio::test]
async fn sci_unknown_decision_is_not_found() {
    let base = serve(greeting_state(60)).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/v1/sci/decisions/missing-id/tally"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn planning_flow_over_http() {
    let base = serve(greeting_state(60)).await;
    let client = reqwest::Client::new();

    let goal: serde_json::Value = client
        .post(format!("{base}/v1/planning/goals"))
        .json(&json!({
            "title": "summarize findings",
            "description": "produce a summary",
            "priority": "high",
            "success_criteria": ["collect sources", "draft summary"]
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let goal_id = goal["id"].as_str().unwrap().to_string();

    let fetched: serde_json::Value = client
        .get(format!("{base}/v1/planning/goals/{goal_id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["title"], "summarize findings");
    assert_eq!(fetched["status"], "pending");

    let plan: serde_json::Value = client
        .post(format!("{base}/v1/planning/plans"))
        .json(&json!({"goal_id": goal_id, "strategy": "sequential"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let plan_id = plan["id"].as_str().unwrap().to_string();
    assert_eq!(plan["steps"].as_array().unwrap().len(), 2);

    let summary: serde_json::Value = client
        .post(format!("{base}/v1/planning/plans/{plan_id}/execute"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(summary["status"], "completed");
    assert_eq!(summary["steps_succeeded"], 2);

    let finished: serde_json::Value = client
        .get(format!("{base}/v1/planning/goals/{goal_id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(finished["status"], "completed");
    assert_eq!(finished["progress"].as_f64().unwrap(), 1.0);
}

#[tokio::test]
async fn operator_diagnostics_requires_token() {
    let base = serve(greeting_state(60)).await;
    let client = reqwest::Client::new();

    let denied = client
        .get(format!("{base}/v1/internal/diagnostics"))
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status(), 403);

    let allowed = client
        .get(format!("{base}/v1/internal/diagnostics"))
        .header("x-operator-token", "operator-secret")
        .send()
        .await
        .unwrap();
    assert_eq!(allowed.status(), 200);
    let body: serde_json::Value = allowed.json().await.unwrap();
    assert!(body["backends"].is_array());
    assert!(body["consensus"]["participants"].as_u64().is_some());
}

//! End-to-end orchestrator scenarios over stub backends.

mod support;

use backends::MemoryStore;
use orchestration::consensus::{DecisionStatus, Role, VoteChoice};
use orchestration::query::{AttachmentKind, Query};
use orchestration::ErrorKind;

use support::{good_greeting, HarnessBuilder, StubReasoner, StubReply, StubToolServer};

#[tokio::test]
async fn trivial_greeting_uses_simple_workflow() {
    let tools = StubToolServer::new().answer("conversational_responder", &good_greeting());
    let harness = HarnessBuilder::new(tools)
        .with_capabilities(&["conversational_responder"])
        .build();

    let response = harness
        .orchestrator
        .process(&Query::new("hello").with_session("s-1"))
        .await
        .unwrap();

    assert_eq!(response.strategy_used, "simple");
    assert_eq!(response.iterations, 1);
    assert!(response.quality >= 0.7, "quality {}", response.quality);
    assert!(response.answer.to_lowercase().contains("hello"));

    // no consensus decision was ever opened
    assert_eq!(harness.consensus.stats().decisions, 0);

    // the episode landed in memory under the session
    let recent = harness.memory.recent(Some("s-1"), 10).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].strategy_used, "simple");
    assert!(recent[0].quality >= 0.7);
}

#[tokio::test]
async fn complex_text_refines_until_threshold() {
    let good_answer = "Reverse-mode automatic differentiation propagates adjoints \
                       backward through the computation graph. Each node stores a local \
                       derivative. The chain rule explains how reverse mode composes \
                       them into gradients efficiently.";
    let tools = StubToolServer::new()
        .answer("retriever", "passage: adjoint propagation notes")
        .script(
            "synthesize",
            vec![
                StubReply::Text("Adjoint trick.".to_string()),
                StubReply::Text(good_answer.to_string()),
            ],
        );
    let harness = HarnessBuilder::new(tools).build();

    let mut query = Query::new("explain reverse-mode automatic differentiation");
    query.options.quality_threshold = Some(0.8);

    let response = harness.orchestrator.process(&query).await.unwrap();

    assert_eq!(response.strategy_used, "complex");
    assert_eq!(response.iterations, 2, "one refinement pass expected");
    assert!(response.quality >= 0.8, "quality {}", response.quality);
    assert_eq!(response.diagnostics.quality_history.len(), 2);
    assert!(response.diagnostics.quality_history[0] < 0.8);

    // retrieval ran on both iterations
    assert_eq!(harness.tools.call_count("retriever"), 2);
}

#[tokio::test]
async fn complex_text_gives_best_effort_at_iteration_budget() {
    let tools = StubToolServer::new()
        .answer("retriever", "passage")
        .answer("synthesize", "Adjoint trick, briefly.");
    let harness = HarnessBuilder::new(tools).build();

    let mut query = Query::new("explain reverse-mode automatic differentiation");
    query.options.quality_threshold = Some(0.8);
    query.options.max_iterations = Some(3);

    let response = harness.orchestrator.process(&query).await.unwrap();
    assert_eq!(response.iterations, 3);
    assert!(response.quality < 0.8);
}

#[tokio::test]
async fn image_query_runs_multimodal_without_consensus() {
    let tools = StubToolServer::new()
        .answer("image_analyzer", "a rusted lighthouse at dusk")
        .answer(
            "synthesize",
            "The image shows a rusted lighthouse at dusk. The structure leans seaward. \
             Paint loss suggests decades of salt exposure.",
        );
    let harness = HarnessBuilder::new(tools).build();

    let query = Query::new("what is in this image?")
        .with_attachment(AttachmentKind::Image, "file://shot.png");
    let response = harness.orchestrator.process(&query).await.unwrap();

    assert_eq!(response.strategy_used, "multimodal");
    assert!(response.answer.contains("lighthouse"));
    assert_eq!(harness.consensus.stats().decisions, 0);
    assert_eq!(harness.tools.call_count("image_analyzer"), 1);
}

#[tokio::test]
async fn consensus_gate_approves_and_dispatches() {
    let tools = StubToolServer::new()
        .answer("retriever", "migration runbook")
        .answer(
            "synthesize",
            "Migration deploy plan: apply the schema change, watch replication lag, \
             then deploy the application. Roll back on sustained errors.",
        )
        .answer("conversational_responder", "Done.");
    let harness = HarnessBuilder::new(tools)
        .with_consensus(|defaults| {
            defaults.r#type = "weighted".to_string();
            defaults.deadline_ms = 3_000;
        })
        .build();

    let user = harness
        .consensus
        .register_participant("ana", Role::PrimaryUser, true)
        .unwrap();
    let admin = harness
        .consensus
        .register_participant("ops", Role::Administrator, true)
        .unwrap();

    let mut query = Query::new("deploy migration now");
    query.options.consensus_required = true;

    let orchestrator = harness.orchestrator.clone();
    let handle = tokio::spawn(async move { orchestrator.process(&query).await });

    // wait for the gate to open its decision, then vote
    let decision_id = loop {
        let open = harness.consensus.open_decisions();
        if let Some(decision) = open.first() {
            break decision.id.clone();
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    };
    harness
        .consensus
        .cast_vote(&decision_id, &user, VoteChoice::Approve, None)
        .unwrap();
    harness
        .consensus
        .cast_vote(&decision_id, &admin, VoteChoice::Reject, None)
        .unwrap();

    let result = handle.await.unwrap().unwrap();

    // 0.6 approve weight over 0.9 present ≥ 60% → approved, dispatch ran
    assert_ne!(result.strategy_used, "rejected_by_consensus");
    let trace = result.diagnostics.consensus.expect("consensus trace");
    assert_eq!(trace.status, DecisionStatus::Approved);
    assert!(!harness.tools.calls().is_empty());
}

#[tokio::test]
async fn consensus_timeout_refuses_with_timeout_reason() {
    let tools = StubToolServer::new().answer("conversational_responder", &good_greeting());
    let harness = HarnessBuilder::new(tools)
        .with_consensus(|defaults| {
            defaults.r#type = "weighted".to_string();
            defaults.deadline_ms = 120;
        })
        .build();

    let mut query = Query::new("deploy migration now").with_session("s-9");
    query.options.consensus_required = true;

    let response = harness.orchestrator.process(&query).await.unwrap();

    assert_eq!(response.strategy_used, "rejected_by_consensus");
    assert!(response.answer.contains("timeout"));
    assert_eq!(response.quality, 0.0);

    let trace = response.diagnostics.consensus.expect("consensus trace");
    assert_eq!(trace.status, DecisionStatus::Expired);
    assert_eq!(trace.rationale, "timeout");

    // refusal is a normal response: an episode is still recorded
    let recent = harness.memory.recent(Some("s-9"), 10).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].strategy_used, "rejected_by_consensus");

    // no backend was ever invoked
    assert!(harness.tools.calls().is_empty());
}

#[tokio::test]
async fn max_iterations_one_never_refines() {
    let tools = StubToolServer::new().answer("conversational_responder", "meh");
    let harness = HarnessBuilder::new(tools).build();

    let mut query = Query::new("hello");
    query.options.max_iterations = Some(1);
    query.options.quality_threshold = Some(0.99);

    let response = harness.orchestrator.process(&query).await.unwrap();
    assert_eq!(response.iterations, 1);
    assert_eq!(harness.tools.call_count("conversational_responder"), 1);
}

#[tokio::test]
async fn empty_query_is_invalid_input() {
    let tools = StubToolServer::new().answer("conversational_responder", &good_greeting());
    let harness = HarnessBuilder::new(tools).build();

    let err = harness
        .orchestrator
        .process(&Query::new("   "))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidInput);
}

#[tokio::test]
async fn tool_outage_falls_back_to_local_reasoner() {
    let tools = StubToolServer::new().unreachable();
    let reasoner = StubReasoner::new(
        "Hello! The tool tier is offline, so I answered locally instead. \
         Ask me anything else you need.",
    );
    let harness = HarnessBuilder::new(tools).with_reasoner(reasoner).build();

    let response = harness.orchestrator.process(&Query::new("hello")).await.unwrap();
    assert!(response.answer.contains("locally"));
    assert!(response.quality > 0.0);
    assert_eq!(harness.reasoner.as_ref().unwrap().requests(), 1);
}

#[tokio::test]
async fn total_outage_returns_canned_apology_with_zero_quality() {
    let tools = StubToolServer::new().unreachable();
    let harness = HarnessBuilder::new(tools).build();

    let response = harness.orchestrator.process(&Query::new("hello")).await.unwrap();
    assert_eq!(response.quality, 0.0);
    assert_eq!(response.iterations, 1);
    assert!(response.answer.contains("try again"));
}

#[tokio::test]
async fn refinement_divergence_keeps_best_answer() {
    // Scores: 0.9, 0.8, 0.7, 0.3 — three consecutive drops abort the loop.
    let terms_two = "This answer covers caching layers at length over three sentences. \
                     It covers caching basics. It stays on topic throughout the text.";
    let terms_one = "This answer talks about caching for a while with some detail. \
                     It wanders somewhat. It still has several full sentences in it.";
    let terms_zero = "This answer drifts away from the topic entirely now. It keeps \
                      talking about unrelated things. It has sentences nonetheless.";
    let short_bad = "no idea";

    let tools = StubToolServer::new().script(
        "conversational_responder",
        vec![
            StubReply::Text(terms_two.to_string()),
            StubReply::Text(terms_one.to_string()),
            StubReply::Text(terms_zero.to_string()),
            StubReply::Text(short_bad.to_string()),
        ],
    );
    let harness = HarnessBuilder::new(tools).build();

    let mut query = Query::new("describe caching layers");
    query.options.quality_threshold = Some(0.95);
    query.options.max_iterations = Some(10);

    let response = harness.orchestrator.process(&query).await.unwrap();
    assert_eq!(response.iterations, 4);
    assert_eq!(response.answer, terms_two);
    assert!(response.quality >= 0.85);
    assert!(response
        .diagnostics
        .warnings
        .iter()
        .any(|w| w.contains("diverging")));
}

#[tokio::test]
async fn uncertain_critical_query_runs_ensemble() {
    // Tool server advertises neither retrieval nor synthesis, so the
    // composite drops under 0.5 while risk keywords push criticality up.
    let tools = StubToolServer::new().answer("conversational_responder", "ok");
    let local_answer = "Do not delete the production database without a backup. Explain \
                        the plan to the team first. Verify the snapshot, then proceed \
                        in a maintenance window.";
    let reasoner = StubReasoner::new(local_answer);

    let harness = HarnessBuilder::new(tools)
        .with_capabilities(&["conversational_responder"])
        .with_reasoner(reasoner)
        .build();

    let query = Query::new("explain how to safely delete the production database");
    let response = harness.orchestrator.process(&query).await.unwrap();

    assert_eq!(response.strategy_used, "ensemble");
    assert_eq!(response.answer, local_answer);
    assert!(harness.reasoner.as_ref().unwrap().requests() >= 1);
}

#[tokio::test]
async fn quality_always_within_bounds_and_iterations_positive() {
    let tools = StubToolServer::new()
        .answer("conversational_responder", "fine")
        .answer("retriever", "ctx")
        .answer("synthesize", "fine");
    let harness = HarnessBuilder::new(tools).build();

    for text in ["hello", "explain compilers briefly", "what time is it"] {
        let response = harness.orchestrator.process(&Query::new(text)).await.unwrap();
        assert!((0.0..=1.0).contains(&response.quality));
        assert!(response.iterations >= 1);
        assert!(response.iterations <= 3);
    }
}

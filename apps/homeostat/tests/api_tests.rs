//! Integration tests for the Homeostat HTTP API.
//!
//! Uses axum-test to exercise the router without binding a socket.

// Auth tests hold the env mutex across awaits on purpose
#![allow(clippy::unwrap_used, clippy::panic, clippy::await_holding_lock)]

use axum::http::{HeaderValue, StatusCode};
use axum_test::TestServer;
use homeostat::api::{
    AnchorsResponse, AppState, DecisionsResponse, ErrorResponse, FragmentsResponse,
    HealthResponse, IngestResponse, StatusResponse, SubmissionResponse, create_router,
};
use homeostat::config::SchedulerConfig;
use homeostat::scheduler::TaskHealth;
use homeostat_core::{
    CompositeIndexRecord, ConsentOutcome, ConsentState, FragmentPayload, Homeostat,
    HomeostatConfig, ManualClock, NodeId, NullAuditSink, PolicyAction, SequentialIds, Timestamp,
    TuningState,
};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

/// Serializes tests that read or write `HOMEOSTAT_API_KEY`.
static AUTH_TEST_MUTEX: Mutex<()> = Mutex::new(());

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Holds the env mutex and clears the API key on drop.
struct TestGuard {
    _guard: std::sync::MutexGuard<'static, ()>,
}

impl Drop for TestGuard {
    fn drop(&mut self) {
        // SAFETY: env access is serialized by AUTH_TEST_MUTEX.
        unsafe { std::env::remove_var("HOMEOSTAT_API_KEY") };
    }
}

fn monitor() -> Arc<Homeostat> {
    Arc::new(
        Homeostat::new(
            HomeostatConfig::default(),
            Arc::new(ManualClock::new(Timestamp(1_700_000_000_000))),
            Arc::new(SequentialIds::new()),
            Arc::new(NullAuditSink),
        )
        .unwrap(),
    )
}

fn server_for(homeostat: Arc<Homeostat>) -> TestServer {
    let clock = Arc::new(ManualClock::new(Timestamp(1_700_000_000_000)));
    let health = Arc::new(TaskHealth::new(clock, &SchedulerConfig::default()));
    TestServer::new(create_router(AppState::new(homeostat, health))).unwrap()
}

/// Test server without authentication, plus a handle on its monitor.
fn create_test_server() -> (TestServer, Arc<Homeostat>, TestGuard) {
    let guard = AUTH_TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    // SAFETY: env access is serialized by AUTH_TEST_MUTEX.
    unsafe { std::env::remove_var("HOMEOSTAT_API_KEY") };
    let homeostat = monitor();
    (
        server_for(homeostat.clone()),
        homeostat,
        TestGuard { _guard: guard },
    )
}

fn node_states() -> serde_json::Value {
    json!([
        {
            "nodeId": "individual",
            "dimensionScores": {"coherence": 0.9, "emotional": 0.8, "logical": 0.7, "philosophical": 0.6},
            "goals": [{"name": "growth", "priority": 0.8, "strength": 0.9}]
        },
        {
            "nodeId": "collective",
            "dimensionScores": {"coherence": 0.7, "emotional": 0.6, "logical": 0.8, "philosophical": 0.7},
            "goals": [{"name": "care", "priority": 0.6, "strength": 0.8}]
        }
    ])
}

fn high_scoring_artifact(id: &str) -> serde_json::Value {
    json!({
        "id": id,
        "attestations": {
            "privacy": 0.9, "safety": 0.9, "transparency": 0.9,
            "beneficence": 0.9, "autonomy": 0.9, "fairness": 0.9
        },
        "goal_refs": ["growth", "care"]
    })
}

// =============================================================================
// HEALTH ENDPOINT TESTS
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let (server, _, _guard) = create_test_server();

    let response = server.get("/health").await;

    response.assert_status_ok();
    let health: HealthResponse = response.json();
    assert_eq!(health.status, "ok");
    assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_oversized_body_rejected_by_layer_stack() {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    let _guard = AUTH_TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    // SAFETY: env access is serialized by AUTH_TEST_MUTEX.
    unsafe { std::env::remove_var("HOMEOSTAT_API_KEY") };
    let clock = Arc::new(ManualClock::new(Timestamp(1_700_000_000_000)));
    let health = Arc::new(TaskHealth::new(clock, &SchedulerConfig::default()));
    let router = create_router(AppState::new(monitor(), health));

    let request = Request::builder()
        .method("POST")
        .uri("/nodes/state")
        .header("content-type", "application/json")
        .body(Body::from(vec![b' '; 3 * 1024 * 1024]))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

// =============================================================================
// STATUS ENDPOINT TESTS
// =============================================================================

#[tokio::test]
async fn test_status_fresh_monitor() {
    let (server, _, _guard) = create_test_server();

    let response = server.get("/status").await;

    response.assert_status_ok();
    let status: StatusResponse = response.json();
    assert_eq!(status.cycle, 0);
    assert!(status.nodes.is_empty());
    assert_eq!(status.jobs.len(), 6);
    assert!(!status.stale);
    assert!(status.priority_shifts.is_empty());
    assert!(status.indices.values().all(Option::is_none));
}

#[tokio::test]
async fn test_status_after_cycle() {
    let (server, homeostat, _guard) = create_test_server();
    server.post("/nodes/state").json(&node_states()).await;
    homeostat.sample_cycle();
    homeostat.aggregate_cycle();

    let status: StatusResponse = server.get("/status").await.json();
    assert_eq!(status.cycle, 1);
    assert_eq!(status.nodes.len(), 2);
    let equilibrium = status.indices["equilibrium"].as_ref().unwrap();
    assert!((0.0..=1.0).contains(&equilibrium.value));
}

#[tokio::test]
async fn test_status_lists_priority_shifts() {
    let (server, _, _guard) = create_test_server();
    server.post("/nodes/state").json(&node_states()).await;

    let shifted = json!([{
        "nodeId": "individual",
        "dimensionScores": {"coherence": 0.9, "emotional": 0.8, "logical": 0.7, "philosophical": 0.6},
        "goals": [{"name": "growth", "priority": 0.3, "strength": 0.9}]
    }]);
    server.post("/nodes/state").json(&shifted).await.assert_status_ok();

    let status: StatusResponse = server.get("/status").await.json();
    assert_eq!(status.priority_shifts.len(), 1);
    let shift = &status.priority_shifts[0];
    assert_eq!(shift.entity, "growth");
    assert!((shift.from - 0.8).abs() < 1e-12);
    assert!((shift.to - 0.3).abs() < 1e-12);
}

// =============================================================================
// INGESTION TESTS
// =============================================================================

#[tokio::test]
async fn test_ingest_node_states() {
    let (server, homeostat, _guard) = create_test_server();

    let response = server.post("/nodes/state").json(&node_states()).await;

    response.assert_status_ok();
    let ingest: IngestResponse = response.json();
    assert!(ingest.success);
    assert_eq!(ingest.ingested, 2);
    assert_eq!(
        homeostat.node_state("individual").unwrap().dimension("coherence"),
        Some(0.9)
    );
}

#[tokio::test]
async fn test_ingest_degrades_bad_scores() {
    let (server, homeostat, _guard) = create_test_server();

    let response = server
        .post("/nodes/state")
        .json(&json!({"nodeId": "individual", "dimensionScores": {"coherence": "very"}}))
        .await;

    response.assert_status_ok();
    assert_eq!(
        homeostat.node_state("individual").unwrap().dimension("coherence"),
        Some(0.5)
    );
}

#[tokio::test]
async fn test_ingest_rejects_non_json() {
    let (server, _, _guard) = create_test_server();

    let response = server
        .post("/nodes/state")
        .bytes(axum::body::Bytes::from("not valid json"))
        .content_type("application/json")
        .await;

    response.assert_status_bad_request();
    let ingest: IngestResponse = response.json();
    assert!(!ingest.success);
    assert!(ingest.error.is_some());
}

// =============================================================================
// INDEX AND TUNING TESTS
// =============================================================================

#[tokio::test]
async fn test_latest_index_not_found_before_aggregation() {
    let (server, _, _guard) = create_test_server();

    let response = server.get("/indices/equilibrium/latest").await;

    response.assert_status_not_found();
    let error: ErrorResponse = response.json();
    assert!(error.error.contains("equilibrium"));
}

#[tokio::test]
async fn test_latest_index_after_aggregation() {
    let (server, homeostat, _guard) = create_test_server();
    homeostat.sample_cycle();
    homeostat.aggregate_cycle();

    let response = server.get("/indices/equilibrium/latest").await;

    response.assert_status_ok();
    let record: CompositeIndexRecord = response.json();
    assert_eq!(record.index_id, "equilibrium");
    let weight_sum: f64 = record.weights.values().sum();
    assert!((weight_sum - 1.0).abs() < 1e-6);
}

#[tokio::test]
async fn test_tuning_state() {
    let (server, homeostat, _guard) = create_test_server();
    homeostat.sample_cycle();
    homeostat.aggregate_cycle();
    let event = homeostat.autotune_tick();

    let response = server.get("/tuning").add_query_param("limit", 5).await;

    response.assert_status_ok();
    let tuning: TuningState = response.json();
    assert_eq!(tuning.value, event.next);
    assert_eq!(tuning.recent_events.len(), 1);
}

// =============================================================================
// ARTIFACT AND DECISION TESTS
// =============================================================================

#[tokio::test]
async fn test_submit_artifact_mutual_accept() {
    let (server, _, _guard) = create_test_server();
    server.post("/nodes/state").json(&node_states()).await;

    let response = server
        .post("/artifacts")
        .json(&high_scoring_artifact("art-1"))
        .await;

    response.assert_status_ok();
    let submission: SubmissionResponse = response.json();
    assert_eq!(submission.decision.action, PolicyAction::Allowed);
    assert_eq!(submission.consent.outcome, ConsentOutcome::MutualAccept);
    assert_eq!(submission.consent.decision_id, submission.decision.id);
}

#[tokio::test]
async fn test_submit_low_scoring_artifact_blocked() {
    let (server, _, _guard) = create_test_server();

    let response = server
        .post("/artifacts")
        .json(&json!({"id": "art-low", "attestations": {"privacy": 0.2}, "filters": ["privacy"]}))
        .await;

    response.assert_status_ok();
    let submission: SubmissionResponse = response.json();
    assert_eq!(submission.decision.action, PolicyAction::Blocked);
    assert_eq!(submission.consent.outcome, ConsentOutcome::MutualReject);
}

#[tokio::test]
async fn test_submit_artifact_without_id_rejected() {
    let (server, _, _guard) = create_test_server();

    let response = server.post("/artifacts").json(&json!({"id": ""})).await;

    response.assert_status_bad_request();
}

#[tokio::test]
async fn test_decisions_list_with_consent() {
    let (server, _, _guard) = create_test_server();
    server.post("/nodes/state").json(&node_states()).await;
    for i in 0..3 {
        server
            .post("/artifacts")
            .json(&high_scoring_artifact(&format!("art-{}", i)))
            .await
            .assert_status_ok();
    }

    let response = server.get("/decisions").add_query_param("limit", 2).await;

    response.assert_status_ok();
    let decisions: DecisionsResponse = response.json();
    assert_eq!(decisions.decisions.len(), 2);
    assert_eq!(decisions.decisions[0].decision.artifact_id, "art-2");
    assert!(
        decisions
            .decisions
            .iter()
            .all(|d| d.consent == ConsentState::MutualAccept)
    );
}

// =============================================================================
// MEMORY TESTS
// =============================================================================

fn remember_pattern(homeostat: &Homeostat, count: usize) {
    let tags: BTreeSet<String> = ["rhythm", "weekly"].iter().map(|t| t.to_string()).collect();
    for i in 0..count {
        homeostat.store_fragment(
            NodeId::from("individual"),
            "pattern",
            FragmentPayload::new(format!("observation {}", i), "noted"),
            0.6,
            tags.clone(),
        );
    }
}

#[tokio::test]
async fn test_fragments_filtered_by_category_and_tags() {
    let (server, homeostat, _guard) = create_test_server();
    remember_pattern(&homeostat, 3);
    server
        .post("/artifacts")
        .json(&high_scoring_artifact("art-1"))
        .await
        .assert_status_ok();

    let response = server
        .get("/memory/fragments")
        .add_query_param("category", "pattern")
        .add_query_param("tags", "weekly,unrelated")
        .await;

    response.assert_status_ok();
    let fragments: FragmentsResponse = response.json();
    assert_eq!(fragments.fragments.len(), 3);
    assert!(fragments.fragments.iter().all(|f| f.category == "pattern"));
}

#[tokio::test]
async fn test_anchors_after_consolidation() {
    let (server, homeostat, _guard) = create_test_server();
    remember_pattern(&homeostat, 11);
    homeostat.consolidate();

    let response = server
        .get("/memory/anchors")
        .add_query_param("category", "pattern")
        .await;

    response.assert_status_ok();
    let anchors: AnchorsResponse = response.json();
    assert_eq!(anchors.anchors.len(), 1);
    assert_eq!(anchors.anchors[0].source_fragment_ids.len(), 11);
    assert!((anchors.anchors[0].reliability - 0.72).abs() < 1e-9);
}

// =============================================================================
// AUTHENTICATION MIDDLEWARE TESTS
// =============================================================================

/// Must be called while holding AUTH_TEST_MUTEX.
fn create_auth_test_server(api_key: &str) -> TestServer {
    // SAFETY: env access is serialized by AUTH_TEST_MUTEX.
    unsafe { std::env::set_var("HOMEOSTAT_API_KEY", api_key) };
    server_for(monitor())
}

#[tokio::test]
async fn test_auth_valid_bearer_token() {
    let guard = AUTH_TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let _guard = TestGuard { _guard: guard };
    let api_key = "test-secret-key-12345";
    let server = create_auth_test_server(api_key);

    let response = server
        .get("/status")
        .add_header(
            axum::http::header::AUTHORIZATION,
            format!("Bearer {}", api_key)
                .parse::<HeaderValue>()
                .unwrap(),
        )
        .await;

    response.assert_status_ok();
}

#[tokio::test]
async fn test_auth_missing_token_rejected() {
    let guard = AUTH_TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let _guard = TestGuard { _guard: guard };
    let server = create_auth_test_server("correct-key");

    let response = server.get("/decisions").await;

    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_auth_wrong_token_rejected() {
    let guard = AUTH_TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let _guard = TestGuard { _guard: guard };
    let server = create_auth_test_server("correct-key");

    let response = server
        .post("/nodes/state")
        .add_header(
            axum::http::header::AUTHORIZATION,
            "Bearer wrong-key".parse::<HeaderValue>().unwrap(),
        )
        .json(&node_states())
        .await;

    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_auth_health_always_open() {
    let guard = AUTH_TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let _guard = TestGuard { _guard: guard };
    let server = create_auth_test_server("correct-key");

    let response = server.get("/health").await;

    response.assert_status_ok();
}

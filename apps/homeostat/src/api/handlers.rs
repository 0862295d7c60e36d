//! # API Endpoint Handlers
//!
//! This module implements the actual HTTP endpoint handlers. The monitor is
//! synchronous and in-memory, so handlers call it directly.

use super::{
    AppState,
    types::{
        AnchorQuery, AnchorsResponse, ArtifactRequest, DecisionView, DecisionsResponse,
        ErrorResponse, FragmentQuery, FragmentsResponse, HealthResponse, IndexSummary,
        IngestResponse, LimitQuery, StatusResponse, SubmissionResponse,
    },
};
use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use homeostat_core::HomeostatError;

/// Map a monitor error to the status code the API reports it with.
pub fn error_status(error: &HomeostatError) -> StatusCode {
    match error {
        HomeostatError::InputError(_)
        | HomeostatError::SerializationError(_)
        | HomeostatError::ConfigurationError(_) => StatusCode::BAD_REQUEST,
        HomeostatError::DecisionNotFound(_) => StatusCode::NOT_FOUND,
        HomeostatError::ConsentAlreadyRecorded(_) => StatusCode::CONFLICT,
        HomeostatError::PersistenceError(_)
        | HomeostatError::InvariantViolation(_)
        | HomeostatError::IoError(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: &HomeostatError) -> Response {
    (error_status(error), Json(ErrorResponse::new(error.to_string()))).into_response()
}

// =============================================================================
// HEALTH HANDLER
// =============================================================================

/// Health check endpoint.
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

// =============================================================================
// STATUS HANDLER
// =============================================================================

/// Priority shifts listed in `/status`.
const STATUS_SHIFT_LIMIT: usize = 10;

/// Monitor status with the last successful run of every job.
pub async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let homeostat = &state.homeostat;

    let indices = homeostat
        .index_ids()
        .into_iter()
        .map(|id| {
            let summary = homeostat.latest_index(&id).as_ref().map(IndexSummary::from);
            (id, summary)
        })
        .collect();

    let jobs: std::collections::BTreeMap<String, _> = state
        .health
        .report()
        .into_iter()
        .map(|(job, health)| (job.as_str().to_string(), health))
        .collect();
    let stale = jobs.values().any(|h| h.stale);

    let response = StatusResponse {
        cycle: homeostat.cycle(),
        nodes: homeostat.node_states().into_iter().map(|s| s.node_id).collect(),
        coupling_strength: homeostat.tuning_state(0).value,
        indices,
        memory: homeostat.memory_statistics(),
        gate: homeostat.gate_statistics(),
        jobs,
        priority_shifts: homeostat.drift_shifts(STATUS_SHIFT_LIMIT),
        stale,
    };

    (StatusCode::OK, Json(response))
}

// =============================================================================
// INDEX HANDLER
// =============================================================================

/// Latest record of one composite index.
pub async fn latest_index_handler(
    State(state): State<AppState>,
    Path(index_id): Path<String>,
) -> Response {
    match state.homeostat.latest_index(&index_id) {
        Some(record) => (StatusCode::OK, Json(record)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(format!(
                "No record for index '{}'",
                index_id
            ))),
        )
            .into_response(),
    }
}

// =============================================================================
// TUNING HANDLER
// =============================================================================

/// Current tunable parameter and its recent events.
pub async fn tuning_handler(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    Json(state.homeostat.tuning_state(query.limit()))
}

// =============================================================================
// DECISIONS HANDLER
// =============================================================================

/// Recent policy decisions, newest first, with their consent state.
pub async fn decisions_handler(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    let decisions = state
        .homeostat
        .recent_decisions(query.limit())
        .into_iter()
        .map(|decision| {
            let consent = state.homeostat.consent_state(&decision.id);
            DecisionView { decision, consent }
        })
        .collect();
    Json(DecisionsResponse { decisions })
}

// =============================================================================
// MEMORY HANDLERS
// =============================================================================

/// Fragments matching the query string.
pub async fn fragments_handler(
    State(state): State<AppState>,
    Query(query): Query<FragmentQuery>,
) -> impl IntoResponse {
    let fragments = state
        .homeostat
        .retrieve_fragments(&query.filter(), query.limit());
    Json(FragmentsResponse { fragments })
}

/// Anchors matching the query string.
pub async fn anchors_handler(
    State(state): State<AppState>,
    Query(query): Query<AnchorQuery>,
) -> impl IntoResponse {
    let anchors = state
        .homeostat
        .retrieve_anchors(&query.filter(), query.limit());
    Json(AnchorsResponse { anchors })
}

// =============================================================================
// INGEST HANDLER
// =============================================================================

/// Ingest one node state or an array of them.
///
/// The body is taken raw: parsing is lenient and handled by the core, which
/// degrades bad fields to neutral instead of rejecting the request.
pub async fn ingest_state_handler(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    match state.homeostat.ingest_json(&body) {
        Ok(count) => (StatusCode::OK, Json(IngestResponse::success(count))),
        Err(e) => (
            error_status(&e),
            Json(IngestResponse::error(format!("Ingest failed: {}", e))),
        ),
    }
}

// =============================================================================
// ARTIFACT HANDLER
// =============================================================================

/// Gate an artifact and negotiate consent for the decision.
pub async fn artifact_handler(
    State(state): State<AppState>,
    Json(request): Json<ArtifactRequest>,
) -> Response {
    if let Err(e) = request.validate() {
        return error_response(&e);
    }

    match state
        .homeostat
        .submit_artifact(&request.artifact, request.filters.as_deref())
    {
        Ok(submission) => (
            StatusCode::OK,
            Json(SubmissionResponse {
                decision: submission.decision,
                consent: submission.consent,
            }),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

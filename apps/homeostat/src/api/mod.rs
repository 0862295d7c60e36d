//! # Homeostat HTTP API Module
//!
//! Read-only query surface over the running monitor, plus node-state
//! ingestion and artifact submission.
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /status` - Cycle, indices, memory, gate and per-job staleness
//! - `GET /indices/{id}/latest` - Latest record of a composite index
//! - `GET /tuning?limit=` - Tunable parameter and recent tuning events
//! - `GET /decisions?limit=` - Recent policy decisions with consent state
//! - `GET /memory/fragments?node_id=&category=&tags=&min_significance=&limit=`
//! - `GET /memory/anchors?category=&tags=&min_reliability=&limit=`
//! - `POST /nodes/state` - Ingest one node state or an array of them
//! - `POST /artifacts` - Gate an artifact and negotiate consent
//!
//! ## Security Configuration (Environment Variables)
//!
//! - `HOMEOSTAT_CORS_ORIGINS`: Comma-separated list of allowed origins, or "*" for all (default: localhost only)
//! - `HOMEOSTAT_RATE_LIMIT`: Requests per second (default: 100, 0 to disable)
//! - `HOMEOSTAT_API_KEY`: If set, requires Bearer token authentication

mod auth;
mod handlers;
mod middleware;
mod types;

pub use auth::{API_KEY_ENV, get_api_key_from_env};
pub use handlers::error_status;
pub use middleware::{RATE_LIMIT_ENV, create_rate_limiter, get_rate_limit_from_env};
pub use types::{
    AnchorQuery, AnchorsResponse, ArtifactRequest, DecisionView, DecisionsResponse,
    ErrorResponse, FragmentQuery, FragmentsResponse, HealthResponse, IndexSummary,
    IngestResponse, LimitQuery, StatusResponse, SubmissionResponse,
};

use crate::scheduler::TaskHealth;
use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware as axum_middleware,
    routing::{get, post},
};
use homeostat_core::{Homeostat, HomeostatError};
use std::future::Future;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Environment variable listing allowed CORS origins.
pub const CORS_ORIGINS_ENV: &str = "HOMEOSTAT_CORS_ORIGINS";

/// Request body limit (2 MB).
const MAX_BODY_SIZE: usize = 2 * 1024 * 1024;

// =============================================================================
// SERVER STATE
// =============================================================================

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    pub homeostat: Arc<Homeostat>,
    pub health: Arc<TaskHealth>,
}

impl AppState {
    #[must_use]
    pub fn new(homeostat: Arc<Homeostat>, health: Arc<TaskHealth>) -> Self {
        Self { homeostat, health }
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

/// Build the CORS layer from `HOMEOSTAT_CORS_ORIGINS`.
///
/// Unset means localhost only. `*` allows everything and logs a warning.
fn build_cors_layer() -> CorsLayer {
    let origins_env = std::env::var(CORS_ORIGINS_ENV).ok();

    match origins_env.as_deref() {
        Some("*") => {
            tracing::warn!(
                "CORS: Allowing ALL origins ({}=*). This is insecure for production!",
                CORS_ORIGINS_ENV
            );
            CorsLayer::permissive()
        }
        Some(origins) => {
            let allowed: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .filter_map(|origin| match origin.parse::<HeaderValue>() {
                    Ok(hv) => {
                        tracing::info!("CORS: Allowing origin: {}", origin);
                        Some(hv)
                    }
                    Err(e) => {
                        tracing::warn!("CORS: Invalid origin '{}': {}", origin, e);
                        None
                    }
                })
                .collect();

            if allowed.is_empty() {
                tracing::warn!(
                    "CORS: No valid origins in {}, defaulting to localhost only",
                    CORS_ORIGINS_ENV
                );
                build_localhost_cors()
            } else {
                restricted_cors(allowed)
            }
        }
        None => build_localhost_cors(),
    }
}

fn restricted_cors(origins: Vec<HeaderValue>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

fn build_localhost_cors() -> CorsLayer {
    let origins = [
        "http://localhost:3000",
        "http://localhost:8080",
        "http://127.0.0.1:3000",
        "http://127.0.0.1:8080",
    ]
    .iter()
    .filter_map(|o| o.parse::<HeaderValue>().ok())
    .collect();
    restricted_cors(origins)
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Create the router with every endpoint and middleware.
///
/// Middleware stack (outer to inner): tracing, CORS, body limit, rate
/// limiting (if enabled), authentication (if configured).
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer();

    let rate_limit = get_rate_limit_from_env();
    let rate_limiter = if rate_limit > 0 {
        tracing::info!("Rate limiting enabled: {} requests/second", rate_limit);
        Some(create_rate_limiter(rate_limit))
    } else {
        tracing::info!("Rate limiting disabled");
        None
    };

    let has_auth = get_api_key_from_env().is_some();
    if has_auth {
        tracing::info!("API key authentication enabled");
    } else {
        tracing::warn!(
            "API key authentication DISABLED - all endpoints are publicly accessible! \
             Set {} to enable authentication.",
            API_KEY_ENV
        );
    }

    let mut router = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/status", get(handlers::status_handler))
        .route("/indices/{id}/latest", get(handlers::latest_index_handler))
        .route("/tuning", get(handlers::tuning_handler))
        .route("/decisions", get(handlers::decisions_handler))
        .route("/memory/fragments", get(handlers::fragments_handler))
        .route("/memory/anchors", get(handlers::anchors_handler))
        .route("/nodes/state", post(handlers::ingest_state_handler))
        .route("/artifacts", post(handlers::artifact_handler));

    if has_auth {
        router = router.layer(axum_middleware::from_fn(auth::api_key_auth_middleware));
    }

    if let Some(limiter) = rate_limiter {
        router = router.layer(axum_middleware::from_fn_with_state(
            limiter,
            middleware::rate_limit_middleware,
        ));
    }

    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(axum::extract::DefaultBodyLimit::max(MAX_BODY_SIZE)),
        )
        .with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Serve the API until `shutdown` resolves.
pub async fn run_server<F>(addr: &str, state: AppState, shutdown: F) -> Result<(), HomeostatError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| HomeostatError::IoError(format!("Bind failed: {}", e)))?;

    tracing::info!("Homeostat HTTP server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| HomeostatError::IoError(format!("Server error: {}", e)))
}

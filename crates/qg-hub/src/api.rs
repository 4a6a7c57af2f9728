//! # API Handlers
//!
//! Axum handlers for query submission, job polling, worker transitions,
//! credential management and introspection.

use crate::audit::AuditEntry;
use crate::cache::coalesce::CoalescerStats;
use crate::cache::CacheStats;
use crate::gate::credentials::CredentialInfo;
use crate::ledger::{JobUpdate, LedgerError};
use crate::AppState;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use qg_core::{
    DenyReason, JobId, JobState, JobStatusResponse, QueryError, QueryRequest, QueryResponse,
    ResponseStatus, Row,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

type QueryFailure = (StatusCode, Json<QueryResponse>);

pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/status", get(api_status))
        .route("/api/v1/sql-query/execute", post(execute_query))
        .route("/api/v1/jobs", get(list_jobs))
        .route("/api/v1/jobs/:id", get(job_status))
        .route("/api/v1/jobs/:id/start", post(start_job))
        .route("/api/v1/jobs/:id/complete", post(complete_job))
        .route("/api/v1/jobs/:id/fail", post(fail_job))
        .route("/api/v1/credentials/:enterprise", get(list_credentials))
        .route(
            "/api/v1/credentials/:enterprise/:service",
            put(set_credential).delete(revoke_credential),
        )
        .route("/api/v1/cache/stats", get(cache_stats))
        .route("/api/v1/audit", get(get_audit_log))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// HTTP status for a failed routing outcome.
pub fn status_for(err: &QueryError) -> StatusCode {
    match err {
        QueryError::AccessDenied(DenyReason::Entitlement { .. }) => StatusCode::FORBIDDEN,
        QueryError::AccessDenied(DenyReason::Credential { .. }) => StatusCode::UNAUTHORIZED,
        QueryError::RealtimeIneligible(_) => StatusCode::UNPROCESSABLE_ENTITY,
        QueryError::Execution(_) => StatusCode::BAD_GATEWAY,
        QueryError::JobNotFound(_) => StatusCode::NOT_FOUND,
        QueryError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn failure(err: QueryError) -> QueryFailure {
    (status_for(&err), Json(QueryResponse::failed(&err)))
}

/// A failed response for input that never reached the router.
fn bad_request(message: impl Into<String>) -> QueryFailure {
    (
        StatusCode::BAD_REQUEST,
        Json(QueryResponse {
            status: ResponseStatus::Failed,
            data: Vec::new(),
            route: None,
            job_id: None,
            job_status: None,
            error: Some(message.into()),
            error_kind: None,
        }),
    )
}

fn identifier_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]{0,63}$").ok())
        .as_ref()
}

/// Enterprise and service names: 1 to 64 chars, alphanumeric first.
fn validate_identifier(kind: &str, value: &str) -> Result<(), (StatusCode, String)> {
    if identifier_pattern().is_some_and(|re| re.is_match(value)) {
        Ok(())
    } else {
        Err((
            StatusCode::BAD_REQUEST,
            format!("Invalid {} '{}'", kind, value),
        ))
    }
}

fn parse_job_id(raw: &str) -> Result<JobId, QueryFailure> {
    raw.parse()
        .map_err(|_| bad_request(format!("Invalid job id '{}'", raw)))
}

// =============================================================================
// Status
// =============================================================================

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    version: &'static str,
    uptime_secs: u64,
    jobs: usize,
    cache_entries: usize,
    pool_available: usize,
    pool_size: usize,
}

async fn api_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let cache = state.cache.stats().await;
    Json(StatusResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.start_time.elapsed().as_secs(),
        jobs: state.ledger.list(None).await.len(),
        cache_entries: cache.entries,
        pool_available: state.executor.available_connections(),
        pool_size: state.executor.max_connections(),
    })
}

// =============================================================================
// Query
// =============================================================================

pub async fn execute_query(
    State(state): State<Arc<AppState>>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, QueryFailure> {
    let Json(request) = body.map_err(|e| bad_request(e.body_text()))?;
    if request.sql_query.trim().is_empty() {
        return Err(bad_request("sql_query must not be empty"));
    }
    let prefs = request.execution_prefs;
    if !prefs.real_time && prefs.force_real_time {
        return Err(bad_request(
            "real_time = false conflicts with force_real_time = true",
        ));
    }

    let outcome = state.router.submit(request).await;
    match outcome.result {
        Err(err) => Err(failure(err)),
        Ok(_) => Ok(Json(outcome.into_response())),
    }
}

// =============================================================================
// Jobs
// =============================================================================

#[derive(Deserialize)]
pub struct JobListParams {
    state: Option<String>,
}

pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<JobListParams>,
) -> Result<Json<Vec<JobStatusResponse>>, QueryFailure> {
    let filter = params
        .state
        .as_deref()
        .map(|s| s.parse::<JobState>())
        .transpose()
        .map_err(bad_request)?;
    let jobs = state.router.list_jobs(filter).await;
    Ok(Json(jobs.into_iter().map(JobStatusResponse::from).collect()))
}

pub async fn job_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobStatusResponse>, QueryFailure> {
    let id = parse_job_id(&id)?;
    let job = state.router.job_status(id).await.map_err(failure)?;
    Ok(Json(job.into()))
}

#[derive(Deserialize)]
pub struct CompleteJobRequest {
    #[serde(default)]
    rows: Vec<Row>,
}

#[derive(Deserialize)]
pub struct FailJobRequest {
    error: String,
}

async fn apply_update(
    state: &AppState,
    raw_id: &str,
    update: JobUpdate,
) -> Result<Json<JobStatusResponse>, QueryFailure> {
    let id = parse_job_id(raw_id)?;
    let target = update.target();
    let job = state.ledger.transition(id, update).await.map_err(|e| match e {
        LedgerError::NotFound(id) => failure(QueryError::JobNotFound(id)),
        LedgerError::InvalidTransition { .. } => {
            let (_, body) = bad_request(e.to_string());
            (StatusCode::CONFLICT, body)
        }
        LedgerError::DuplicateId(_) => failure(QueryError::Internal(e.to_string())),
    })?;

    let job = state.router.redact_job(job);
    tracing::info!(job_id = %id, state = %target, "Job transitioned");
    state
        .audit
        .record("worker", format!("job_{}", target), format!("job:{}", id), "")
        .await;
    Ok(Json(job.into()))
}

pub async fn start_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobStatusResponse>, QueryFailure> {
    apply_update(&state, &id, JobUpdate::Start).await
}

pub async fn complete_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Result<Json<CompleteJobRequest>, JsonRejection>,
) -> Result<Json<JobStatusResponse>, QueryFailure> {
    let Json(body) = body.map_err(|e| bad_request(e.body_text()))?;
    apply_update(&state, &id, JobUpdate::Succeed(body.rows)).await
}

pub async fn fail_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Result<Json<FailJobRequest>, JsonRejection>,
) -> Result<Json<JobStatusResponse>, QueryFailure> {
    let Json(body) = body.map_err(|e| bad_request(e.body_text()))?;
    apply_update(&state, &id, JobUpdate::Fail(body.error)).await
}

// =============================================================================
// Credentials
// =============================================================================

#[derive(Deserialize)]
pub struct SetCredentialRequest {
    token: String,
    #[serde(default = "default_active")]
    active: bool,
}

fn default_active() -> bool {
    true
}

pub async fn list_credentials(
    State(state): State<Arc<AppState>>,
    Path(enterprise): Path<String>,
) -> Result<Json<Vec<CredentialInfo>>, (StatusCode, String)> {
    validate_identifier("enterprise", &enterprise)?;
    Ok(Json(state.credentials.list(&enterprise).await))
}

pub async fn set_credential(
    State(state): State<Arc<AppState>>,
    Path((enterprise, service)): Path<(String, String)>,
    Json(req): Json<SetCredentialRequest>,
) -> Result<Json<CredentialInfo>, (StatusCode, String)> {
    validate_identifier("enterprise", &enterprise)?;
    validate_identifier("service", &service)?;

    let info = state
        .credentials
        .upsert(&enterprise, &service, &req.token, req.active)
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e))?;

    state
        .audit
        .record(
            "admin",
            "set_credential",
            format!("credential:{}/{}", enterprise, service),
            format!("fingerprint {} active={}", info.fingerprint, info.active),
        )
        .await;
    Ok(Json(info))
}

pub async fn revoke_credential(
    State(state): State<Arc<AppState>>,
    Path((enterprise, service)): Path<(String, String)>,
) -> Result<Json<CredentialInfo>, (StatusCode, String)> {
    validate_identifier("enterprise", &enterprise)?;
    validate_identifier("service", &service)?;

    let info = state
        .credentials
        .revoke(&enterprise, &service)
        .await
        .map_err(|e| (StatusCode::NOT_FOUND, e))?;

    state
        .audit
        .record(
            "admin",
            "revoke_credential",
            format!("credential:{}/{}", enterprise, service),
            "",
        )
        .await;
    Ok(Json(info))
}

// =============================================================================
// Introspection
// =============================================================================

#[derive(Serialize)]
pub struct CacheStatsResponse {
    cache: CacheStats,
    coalescing: CoalescerStats,
}

pub async fn cache_stats(State(state): State<Arc<AppState>>) -> Json<CacheStatsResponse> {
    Json(CacheStatsResponse {
        cache: state.cache.stats().await,
        coalescing: state.router.coalescer_stats(),
    })
}

#[derive(Deserialize)]
pub struct AuditParams {
    limit: Option<usize>,
}

pub async fn get_audit_log(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuditParams>,
) -> Json<Vec<AuditEntry>> {
    Json(state.audit.recent(params.limit.unwrap_or(100)).await)
}

//! # Execution Router
//!
//! Drives one request through gate, classification and routing:
//!
//! ```text
//! Received ─► Gated ─► Classified ─┬─► CacheHit ──┐
//!    │                             ├─► Executing ─┼─► Completed
//!    ▼                             ├─► Enqueuing ─┘
//!  Denied                          └──────────────────► Completed
//! ```
//!
//! Each request ends in exactly one terminal stage. Every stage returns a
//! `Result`; `submit` folds the final one into an [`Outcome`].

use crate::audit::AuditLog;
use crate::cache::coalesce::{Coalescer, CoalescerStats, Registration};
use crate::cache::{CacheKey, ResultCache};
use crate::executor::QueryExecutor;
use crate::gate::AccessGate;
use crate::ledger::{JobLedger, LedgerError};
use qg_core::{
    Admission, AdmissionPolicy, Job, JobId, JobState, QueryError, QueryRequest, QueryResponse,
    Route, Row, ScheduleReason, SignalExtractor,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Received,
    Gated,
    Denied,
    Classified,
    CacheHit,
    Executing,
    Enqueuing,
    Completed,
}

impl Stage {
    pub fn can_advance_to(self, next: Stage) -> bool {
        use Stage::*;
        matches!(
            (self, next),
            (Received, Gated)
                | (Received, Denied)
                | (Gated, Classified)
                | (Classified, CacheHit)
                | (Classified, Executing)
                | (Classified, Enqueuing)
                | (Classified, Completed)
                | (CacheHit, Completed)
                | (Executing, Completed)
                | (Enqueuing, Completed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Denied | Self::Completed)
    }
}

/// Stages visited so far. Only legal forward moves are accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct Lifecycle {
    trail: Vec<Stage>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            trail: vec![Stage::Received],
        }
    }

    pub fn current(&self) -> Stage {
        self.trail.last().copied().unwrap_or(Stage::Received)
    }

    pub fn advance(&mut self, next: Stage) -> Result<(), QueryError> {
        let current = self.current();
        if !current.can_advance_to(next) {
            error!(?current, ?next, "Illegal request stage transition");
            return Err(QueryError::Internal(format!(
                "illegal stage transition {:?} -> {:?}",
                current, next
            )));
        }
        debug!(from = ?current, to = ?next, "Stage transition");
        self.trail.push(next);
        Ok(())
    }

    pub fn trail(&self) -> &[Stage] {
        &self.trail
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// How an admitted request was served.
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    CacheHit(Vec<Row>),
    Executed(Vec<Row>),
    /// Rows from another request's in-flight execution of the same query.
    Coalesced(Vec<Row>),
    Enqueued(JobId),
}

/// The single terminal outcome of a submission.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub request_id: Uuid,
    pub result: Result<Routed, QueryError>,
    pub trail: Vec<Stage>,
}

impl Outcome {
    pub fn into_response(self) -> QueryResponse {
        match self.result {
            Ok(Routed::CacheHit(rows)) => QueryResponse::rows(Route::CacheHit, rows),
            Ok(Routed::Executed(rows)) => QueryResponse::rows(Route::Executed, rows),
            Ok(Routed::Coalesced(rows)) => QueryResponse::rows(Route::Coalesced, rows),
            Ok(Routed::Enqueued(id)) => QueryResponse::queued(id),
            Err(err) => QueryResponse::failed(&err),
        }
    }

    fn summary(&self) -> String {
        match &self.result {
            Ok(Routed::CacheHit(rows)) => format!("cache_hit rows={}", rows.len()),
            Ok(Routed::Executed(rows)) => format!("executed rows={}", rows.len()),
            Ok(Routed::Coalesced(rows)) => format!("coalesced rows={}", rows.len()),
            Ok(Routed::Enqueued(id)) => format!("enqueued job={}", id),
            Err(err) => format!("failed: {}", err),
        }
    }
}

pub struct ExecutionRouter {
    gate: Arc<AccessGate>,
    extractor: Arc<dyn SignalExtractor>,
    policy: AdmissionPolicy,
    cache: Arc<ResultCache>,
    executor: Arc<dyn QueryExecutor>,
    ledger: Arc<dyn JobLedger>,
    audit: Arc<AuditLog>,
    coalescer: Coalescer,
}

impl ExecutionRouter {
    pub fn new(
        gate: Arc<AccessGate>,
        extractor: Arc<dyn SignalExtractor>,
        policy: AdmissionPolicy,
        cache: Arc<ResultCache>,
        executor: Arc<dyn QueryExecutor>,
        ledger: Arc<dyn JobLedger>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            gate,
            extractor,
            policy,
            cache,
            executor,
            ledger,
            audit,
            coalescer: Coalescer::new(),
        }
    }

    pub async fn submit(&self, request: QueryRequest) -> Outcome {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "submit",
            %request_id,
            enterprise = %request.enterprise_id(),
            user = %request.user_context.user_id,
        );

        async move {
            let mut life = Lifecycle::new();
            let result = self.route(&request, &mut life).await;
            if !life.current().is_terminal() {
                error!(trail = ?life.trail(), "Request ended outside a terminal stage");
            }
            let outcome = Outcome {
                request_id,
                result,
                trail: life.trail,
            };

            match &outcome.result {
                Ok(_) => info!(
                    outcome = %outcome.summary(),
                    trail = ?outcome.trail,
                    "Request completed"
                ),
                Err(err) if err.is_client_error() => warn!(error = %err, "Request rejected"),
                Err(err) => warn!(error = %err, "Request failed"),
            }

            self.audit
                .record(
                    request.user_context.user_id.clone(),
                    "submit",
                    format!("query:{}", outcome.request_id),
                    outcome.summary(),
                )
                .await;
            outcome
        }
        .instrument(span)
        .await
    }

    pub async fn job_status(&self, id: JobId) -> Result<Job, QueryError> {
        let job = self.ledger.get(id).await.map_err(|e| match e {
            LedgerError::NotFound(id) => QueryError::JobNotFound(id),
            other => QueryError::Internal(other.to_string()),
        })?;
        Ok(self.redact_job(job))
    }

    pub async fn list_jobs(&self, state: Option<JobState>) -> Vec<Job> {
        self.ledger
            .list(state)
            .await
            .into_iter()
            .map(|job| self.redact_job(job))
            .collect()
    }

    /// Stored results are filtered for the user who submitted the job.
    pub fn redact_job(&self, mut job: Job) -> Job {
        if let Some(rows) = job.result.take() {
            job.result = Some(self.gate.redact(&rows, &job.request.user_context));
        }
        job
    }

    pub fn coalescer_stats(&self) -> CoalescerStats {
        self.coalescer.stats()
    }

    async fn route(
        &self,
        request: &QueryRequest,
        life: &mut Lifecycle,
    ) -> Result<Routed, QueryError> {
        if let Err(denied) = self.gate.authorize(request).await.into_result() {
            life.advance(Stage::Denied)?;
            return Err(denied);
        }
        life.advance(Stage::Gated)?;

        let signals = self.extractor.extract(&request.sql_query);
        let admission = self.policy.classify(&signals, &request.execution_prefs);
        life.advance(Stage::Classified)?;
        debug!(?signals, ?admission, "Classified");

        match admission {
            Admission::RealTime => self.run_real_time(request, life).await,
            // An explicit schedule request always wins over the override
            Admission::Scheduled(reason)
                if request.execution_prefs.force_real_time
                    && reason != ScheduleReason::Requested =>
            {
                life.advance(Stage::Completed)?;
                Err(QueryError::RealtimeIneligible(reason))
            }
            Admission::Scheduled(reason) => self.enqueue(request, reason, life).await,
        }
    }

    async fn run_real_time(
        &self,
        request: &QueryRequest,
        life: &mut Lifecycle,
    ) -> Result<Routed, QueryError> {
        let bypass = request.execution_prefs.bypass_cache;
        let key = self.cache.key(request.enterprise_id(), &request.sql_query);

        if !bypass {
            if let Some(rows) = self.cache.get(&key).await {
                life.advance(Stage::CacheHit)?;
                life.advance(Stage::Completed)?;
                return Ok(Routed::CacheHit(
                    self.gate.redact(&rows, &request.user_context),
                ));
            }
        }

        let (fetched, shared) = match self.coalescer.register(&key) {
            Registration::Leader(flight) => {
                // A previous flight may have landed between the miss and registering
                if !bypass {
                    if let Some(rows) = self.cache.peek(&key).await {
                        flight.complete(Ok(rows.clone()));
                        life.advance(Stage::CacheHit)?;
                        life.advance(Stage::Completed)?;
                        return Ok(Routed::CacheHit(
                            self.gate.redact(&rows, &request.user_context),
                        ));
                    }
                }
                life.advance(Stage::Executing)?;
                let result = self.execute_and_cache(&key, &request.sql_query).await;
                flight.complete(result.clone());
                (result, false)
            }
            Registration::Follower(mut rx) => {
                life.advance(Stage::Executing)?;
                match rx.recv().await {
                    Ok(result) => (result, true),
                    Err(_) => {
                        debug!("In-flight leader went away, executing directly");
                        (self.execute_and_cache(&key, &request.sql_query).await, false)
                    }
                }
            }
        };

        life.advance(Stage::Completed)?;
        let rows = self.gate.redact(&fetched?, &request.user_context);
        Ok(if shared {
            Routed::Coalesced(rows)
        } else {
            Routed::Executed(rows)
        })
    }

    /// Failures are returned as-is and never cached.
    async fn execute_and_cache(
        &self,
        key: &CacheKey,
        query: &str,
    ) -> Result<Arc<Vec<Row>>, QueryError> {
        let rows = self
            .executor
            .execute(query)
            .await
            .map_err(|e| QueryError::Execution(e.to_string()))?;
        let rows = Arc::new(rows);
        self.cache.put(key.clone(), rows.clone()).await;
        Ok(rows)
    }

    async fn enqueue(
        &self,
        request: &QueryRequest,
        reason: ScheduleReason,
        life: &mut Lifecycle,
    ) -> Result<Routed, QueryError> {
        life.advance(Stage::Enqueuing)?;
        let created = self.ledger.create(request.clone()).await;
        life.advance(Stage::Completed)?;

        match created {
            Ok(id) => {
                info!(job_id = %id, %reason, "Query scheduled");
                Ok(Routed::Enqueued(id))
            }
            Err(err) => {
                error!(error = %err, "Job ledger rejected a new job");
                Err(QueryError::Internal(err.to_string()))
            }
        }
    }
}

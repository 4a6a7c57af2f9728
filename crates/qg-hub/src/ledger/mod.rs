//! # Job Ledger
//!
//! Stores deferred jobs and reports their state. Transitions are driven by
//! an external worker through [`JobUpdate`]; the ledger only enforces that
//! they move forward.

use async_trait::async_trait;
use qg_core::{Job, JobId, JobState, QueryRequest, Row};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LedgerError {
    #[error("job '{0}' not found")]
    NotFound(JobId),

    #[error("job id '{0}' already exists")]
    DuplicateId(JobId),

    #[error("job '{id}' cannot move from {from} to {to}")]
    InvalidTransition {
        id: JobId,
        from: JobState,
        to: JobState,
    },
}

/// A worker-reported state change.
#[derive(Debug, Clone, PartialEq)]
pub enum JobUpdate {
    Start,
    Succeed(Vec<Row>),
    Fail(String),
}

impl JobUpdate {
    pub fn target(&self) -> JobState {
        match self {
            Self::Start => JobState::Running,
            Self::Succeed(_) => JobState::Succeeded,
            Self::Fail(_) => JobState::Failed,
        }
    }
}

#[async_trait]
pub trait JobLedger: Send + Sync {
    /// Record a new queued job and return its identifier.
    async fn create(&self, request: QueryRequest) -> Result<JobId, LedgerError>;

    async fn get(&self, id: JobId) -> Result<Job, LedgerError>;

    async fn transition(&self, id: JobId, update: JobUpdate) -> Result<Job, LedgerError>;

    /// Jobs oldest first, optionally restricted to one state.
    async fn list(&self, state: Option<JobState>) -> Vec<Job>;

    async fn start(&self, id: JobId) -> Result<Job, LedgerError> {
        self.transition(id, JobUpdate::Start).await
    }

    async fn succeed(&self, id: JobId, rows: Vec<Row>) -> Result<Job, LedgerError> {
        self.transition(id, JobUpdate::Succeed(rows)).await
    }

    async fn fail(&self, id: JobId, message: String) -> Result<Job, LedgerError> {
        self.transition(id, JobUpdate::Fail(message)).await
    }
}

type IdSource = Arc<dyn Fn() -> JobId + Send + Sync>;

/// In-process ledger. Writes take the lock for the whole check-and-update,
/// so readers never see a half-applied transition.
pub struct MemoryLedger {
    jobs: RwLock<HashMap<JobId, Job>>,
    next_id: IdSource,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::with_id_source(Arc::new(JobId::new_random))
    }

    pub fn with_id_source(next_id: IdSource) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            next_id,
        }
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobLedger for MemoryLedger {
    async fn create(&self, request: QueryRequest) -> Result<JobId, LedgerError> {
        let id = (self.next_id)();
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&id) {
            return Err(LedgerError::DuplicateId(id));
        }
        jobs.insert(id, Job::queued(id, request));
        Ok(id)
    }

    async fn get(&self, id: JobId) -> Result<Job, LedgerError> {
        self.jobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(LedgerError::NotFound(id))
    }

    async fn transition(&self, id: JobId, update: JobUpdate) -> Result<Job, LedgerError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(LedgerError::NotFound(id))?;

        let to = update.target();
        if !job.state.can_transition_to(to) {
            return Err(LedgerError::InvalidTransition {
                id,
                from: job.state,
                to,
            });
        }

        match update {
            JobUpdate::Start => {}
            JobUpdate::Succeed(rows) => job.result = Some(rows),
            JobUpdate::Fail(message) => job.error = Some(message),
        }
        job.state = to;
        job.updated_at = chrono::Utc::now().to_rfc3339();
        Ok(job.clone())
    }

    async fn list(&self, state: Option<JobState>) -> Vec<Job> {
        let jobs = self.jobs.read().await;
        let mut out: Vec<Job> = jobs
            .values()
            .filter(|j| state.map_or(true, |s| j.state == s))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        out
    }
}

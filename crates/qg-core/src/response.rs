//! Outbound response shapes shared by the hub and the CLI.

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, QueryError};
use crate::job::{Job, JobId, JobState};
use crate::request::Row;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    Failed,
}

/// How a successful request was served.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    CacheHit,
    Executed,
    /// Shared the result of an identical in-flight execution.
    Coalesced,
    Enqueued,
}

/// Response to a query submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub status: ResponseStatus,
    #[serde(default)]
    pub data: Vec<Row>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<Route>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_status: Option<JobState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl QueryResponse {
    pub fn rows(route: Route, data: Vec<Row>) -> Self {
        Self {
            status: ResponseStatus::Success,
            data,
            route: Some(route),
            job_id: None,
            job_status: None,
            error: None,
            error_kind: None,
        }
    }

    pub fn queued(job_id: JobId) -> Self {
        Self {
            status: ResponseStatus::Success,
            data: Vec::new(),
            route: Some(Route::Enqueued),
            job_id: Some(job_id),
            job_status: Some(JobState::Queued),
            error: None,
            error_kind: None,
        }
    }

    pub fn failed(err: &QueryError) -> Self {
        Self {
            status: ResponseStatus::Failed,
            data: Vec::new(),
            route: None,
            job_id: None,
            job_status: None,
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
        }
    }
}

/// Response to a job status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: JobId,
    pub state: JobState,
    pub sql_query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Vec<Row>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Job> for JobStatusResponse {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            state: job.state,
            sql_query: job.request.sql_query,
            result: job.result,
            error: job.error,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DenyReason;

    #[test]
    fn test_queued_response_shape() {
        let id = JobId::new_random();
        let json = serde_json::to_value(QueryResponse::queued(id)).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["job_status"], "queued");
        assert_eq!(json["job_id"], id.to_string());
        assert_eq!(json["data"], serde_json::json!([]));
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_failed_response_carries_kind() {
        let err = QueryError::AccessDenied(DenyReason::Credential {
            service: "Salesforce".into(),
        });
        let json = serde_json::to_value(QueryResponse::failed(&err)).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error_kind"], "access_denied");
        assert!(json["error"].as_str().unwrap().contains("Salesforce"));
    }
}

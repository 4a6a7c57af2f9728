//! Error taxonomy for the request lifecycle.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::JobId;
use crate::policy::ScheduleReason;

/// Why the access gate refused a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum DenyReason {
    /// The query touches a sensitivity label the requester has no role for.
    Entitlement { label: String },
    /// A required integration has no active credential for the enterprise.
    Credential { service: String },
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Entitlement { label } => {
                write!(f, "unauthorized access to data labelled '{}'", label)
            }
            Self::Credential { service } => {
                write!(f, "missing or inactive credential for '{}'", service)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryError {
    #[error("access denied: {0}")]
    AccessDenied(DenyReason),

    #[error("query is not eligible for real-time execution: {0}")]
    RealtimeIneligible(ScheduleReason),

    #[error("error executing query: {0}")]
    Execution(String),

    #[error("job '{0}' not found")]
    JobNotFound(JobId),

    /// A broken invariant inside the gateway. Never the caller's fault.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Serialisable tag for [`QueryError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AccessDenied,
    RealtimeIneligible,
    ExecutionFailure,
    JobNotFound,
    Internal,
}

impl QueryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AccessDenied(_) => ErrorKind::AccessDenied,
            Self::RealtimeIneligible(_) => ErrorKind::RealtimeIneligible,
            Self::Execution(_) => ErrorKind::ExecutionFailure,
            Self::JobNotFound(_) => ErrorKind::JobNotFound,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// True for errors the caller can fix by changing the request.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::AccessDenied(_) | Self::RealtimeIneligible(_) | Self::JobNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deny_reasons_stay_distinct() {
        let entitlement = QueryError::AccessDenied(DenyReason::Entitlement {
            label: "highly_confidential".into(),
        });
        let credential = QueryError::AccessDenied(DenyReason::Credential {
            service: "Zendesk".into(),
        });
        assert_eq!(entitlement.kind(), credential.kind());
        assert_ne!(entitlement, credential);
        assert_eq!(
            entitlement.to_string(),
            "access denied: unauthorized access to data labelled 'highly_confidential'"
        );
        assert_eq!(
            credential.to_string(),
            "access denied: missing or inactive credential for 'Zendesk'"
        );
    }

    #[test]
    fn test_client_errors() {
        assert!(QueryError::RealtimeIneligible(ScheduleReason::NoIndexedFilter).is_client_error());
        assert!(!QueryError::Execution("boom".into()).is_client_error());
        assert!(!QueryError::Internal("dup".into()).is_client_error());
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_value(ErrorKind::ExecutionFailure).unwrap();
        assert_eq!(json, serde_json::json!("execution_failure"));
    }
}

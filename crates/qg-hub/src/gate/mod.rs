//! # Access Gate
//!
//! Entitlement and credential checks composed into one admit/deny decision.
//! The entitlement check runs first. Both reasons stay distinguishable so the
//! caller can tell a missing role from a missing integration token.

pub mod credentials;

use crate::config::{IntegrationsConfig, LabelRule};
use credentials::CredentialStore;
use qg_core::{DenyReason, QueryError, QueryRequest, Row, UserContext};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

/// Result of [`AccessGate::authorize`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: Option<DenyReason>,
}

impl AccessDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: DenyReason) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }

    pub fn into_result(self) -> Result<(), QueryError> {
        match self.reason {
            Some(reason) if !self.allowed => Err(QueryError::AccessDenied(reason)),
            _ => Ok(()),
        }
    }
}

pub struct AccessGate {
    labels: Vec<LabelRule>,
    integrations: IntegrationsConfig,
    credentials: Arc<dyn CredentialStore>,
}

impl AccessGate {
    pub fn new(
        labels: Vec<LabelRule>,
        integrations: IntegrationsConfig,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        let labels = labels
            .into_iter()
            .map(|l| LabelRule {
                name: l.name.to_lowercase(),
                roles: l.roles,
            })
            .collect();
        Self {
            labels,
            integrations,
            credentials,
        }
    }

    /// One decision per request. Reads the credential store, writes nothing.
    pub async fn authorize(&self, request: &QueryRequest) -> AccessDecision {
        let tokens: HashSet<String> = qg_core::sql::tokens(&request.sql_query).collect();

        // Labels not listed in the config are readable by anyone
        for rule in &self.labels {
            if tokens.contains(&rule.name) && !request.user_context.has_any_role(&rule.roles) {
                return AccessDecision::deny(DenyReason::Entitlement {
                    label: rule.name.clone(),
                });
            }
        }

        let enterprise = request.enterprise_id();
        for service in self.integrations.required_for(enterprise) {
            if !self.credentials.is_active(enterprise, service).await {
                return AccessDecision::deny(DenyReason::Credential {
                    service: service.clone(),
                });
            }
        }

        AccessDecision::allow()
    }

    /// Drop columns named after labels `user` may not read.
    pub fn redact(&self, rows: &[Row], user: &UserContext) -> Vec<Row> {
        let hidden: Vec<&str> = self
            .labels
            .iter()
            .filter(|rule| !user.has_any_role(&rule.roles))
            .map(|rule| rule.name.as_str())
            .collect();

        if hidden.is_empty() {
            return rows.to_vec();
        }

        rows.iter()
            .map(|row| {
                row.iter()
                    .filter(|(column, _)| !hidden.contains(&column.to_lowercase().as_str()))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect::<Row>()
            })
            .collect()
    }
}

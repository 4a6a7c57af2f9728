//! Inbound request types.
//!
//! Field names follow the public wire format (`sql_query`, `user_context`,
//! `enterprise_context`, `execution_prefs`) so existing clients keep working.

use serde::{Deserialize, Serialize};

/// A single result row: column name to JSON value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// A query submission. Never mutated after it is received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub sql_query: String,
    pub user_context: UserContext,
    pub enterprise_context: EnterpriseContext,
    #[serde(default)]
    pub execution_prefs: ExecutionPreferences,
}

/// Who is asking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct UserContext {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl UserContext {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// True if the user holds at least one of `roles`.
    pub fn has_any_role(&self, roles: &[String]) -> bool {
        roles.iter().any(|r| self.has_role(r))
    }
}

/// On whose behalf the query runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EnterpriseContext {
    pub enterprise_id: String,
}

/// Caller-supplied routing hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPreferences {
    /// `false` is an explicit request to schedule the query.
    #[serde(default = "default_real_time")]
    pub real_time: bool,
    /// Fail with `RealtimeIneligible` instead of scheduling.
    #[serde(default)]
    pub force_real_time: bool,
    /// Skip the cache lookup. The fresh result still refreshes the cache.
    #[serde(default)]
    pub bypass_cache: bool,
}

impl Default for ExecutionPreferences {
    fn default() -> Self {
        Self {
            real_time: true,
            force_real_time: false,
            bypass_cache: false,
        }
    }
}

fn default_real_time() -> bool {
    true
}

impl QueryRequest {
    pub fn new(
        sql_query: impl Into<String>,
        user_context: UserContext,
        enterprise_id: impl Into<String>,
    ) -> Self {
        Self {
            sql_query: sql_query.into(),
            user_context,
            enterprise_context: EnterpriseContext {
                enterprise_id: enterprise_id.into(),
            },
            execution_prefs: ExecutionPreferences::default(),
        }
    }

    pub fn with_prefs(mut self, prefs: ExecutionPreferences) -> Self {
        self.execution_prefs = prefs;
        self
    }

    pub fn enterprise_id(&self) -> &str {
        &self.enterprise_context.enterprise_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefs_default_to_real_time() {
        let req: QueryRequest = serde_json::from_value(serde_json::json!({
            "sql_query": "SELECT name FROM contacts WHERE id = 5",
            "user_context": { "user_id": "u1", "roles": ["Analyst"] },
            "enterprise_context": { "enterprise_id": "acme" }
        }))
        .unwrap();
        assert!(req.execution_prefs.real_time);
        assert!(!req.execution_prefs.force_real_time);
        assert!(!req.execution_prefs.bypass_cache);
    }

    #[test]
    fn test_partial_prefs_keep_other_defaults() {
        let prefs: ExecutionPreferences =
            serde_json::from_value(serde_json::json!({ "bypass_cache": true })).unwrap();
        assert!(prefs.real_time);
        assert!(prefs.bypass_cache);
    }

    #[test]
    fn test_role_membership_is_exact() {
        let user = UserContext {
            user_id: "u1".into(),
            roles: vec!["Admin".into()],
        };
        assert!(user.has_role("Admin"));
        assert!(!user.has_role("admin"));
        assert!(user.has_any_role(&["Auditor".into(), "Admin".into()]));
        assert!(!user.has_any_role(&[]));
    }
}

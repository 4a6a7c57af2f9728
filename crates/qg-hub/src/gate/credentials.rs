//! # Credential Store
//!
//! Per-enterprise SaaS integration tokens. Only SHA-256 hashes are kept;
//! the raw token never leaves `upsert`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Read-only lookup used by the access gate.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// True if `enterprise` holds an active credential for `service`.
    async fn is_active(&self, enterprise: &str, service: &str) -> bool;
}

/// Listing view of a stored credential.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CredentialInfo {
    pub enterprise: String,
    pub service: String,
    pub active: bool,
    /// First 12 hex chars of the token hash.
    pub fingerprint: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
struct StoredCredential {
    service: String,
    token_hash: String,
    active: bool,
    created_at: String,
    updated_at: String,
}

/// Services are matched case-insensitively.
type Key = (String, String);

fn key(enterprise: &str, service: &str) -> Key {
    (enterprise.to_string(), service.to_lowercase())
}

#[derive(Default)]
pub struct MemoryCredentialStore {
    entries: RwLock<HashMap<Key, StoredCredential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a token. Replacing reactivates a revoked entry.
    pub async fn upsert(
        &self,
        enterprise: &str,
        service: &str,
        token: &str,
        active: bool,
    ) -> Result<CredentialInfo, String> {
        if token.is_empty() {
            return Err("Token must not be empty".into());
        }
        let now = chrono::Utc::now().to_rfc3339();
        let mut entries = self.entries.write().await;
        let entry = entries
            .entry(key(enterprise, service))
            .and_modify(|c| {
                c.token_hash = sha256_hex(token);
                c.active = active;
                c.updated_at = now.clone();
            })
            .or_insert_with(|| StoredCredential {
                service: service.to_string(),
                token_hash: sha256_hex(token),
                active,
                created_at: now.clone(),
                updated_at: now.clone(),
            });
        Ok(info(enterprise, entry))
    }

    /// Mark a credential inactive. The hash is kept for the listing.
    pub async fn revoke(&self, enterprise: &str, service: &str) -> Result<CredentialInfo, String> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(&key(enterprise, service))
            .ok_or_else(|| format!("No credential for '{}' in '{}'", service, enterprise))?;
        entry.active = false;
        entry.updated_at = chrono::Utc::now().to_rfc3339();
        Ok(info(enterprise, entry))
    }

    pub async fn list(&self, enterprise: &str) -> Vec<CredentialInfo> {
        let entries = self.entries.read().await;
        let mut out: Vec<CredentialInfo> = entries
            .iter()
            .filter(|((e, _), _)| e == enterprise)
            .map(|((e, _), c)| info(e, c))
            .collect();
        out.sort_by(|a, b| a.service.cmp(&b.service));
        out
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn is_active(&self, enterprise: &str, service: &str) -> bool {
        let entries = self.entries.read().await;
        entries
            .get(&key(enterprise, service))
            .map_or(false, |c| c.active)
    }
}

fn info(enterprise: &str, c: &StoredCredential) -> CredentialInfo {
    CredentialInfo {
        enterprise: enterprise.to_string(),
        service: c.service.clone(),
        active: c.active,
        fingerprint: c.token_hash.chars().take(12).collect(),
        created_at: c.created_at.clone(),
        updated_at: c.updated_at.clone(),
    }
}

fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    format!("{:x}", digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upsert_then_active() {
        let store = MemoryCredentialStore::new();
        assert!(!store.is_active("acme", "Salesforce").await);

        store.upsert("acme", "Salesforce", "sf-1", true).await.unwrap();
        assert!(store.is_active("acme", "Salesforce").await);
        assert!(store.is_active("acme", "salesforce").await);
        assert!(!store.is_active("globex", "Salesforce").await);
    }

    #[tokio::test]
    async fn test_revoke_deactivates() {
        let store = MemoryCredentialStore::new();
        store.upsert("acme", "Zendesk", "zd-1", true).await.unwrap();
        let info = store.revoke("acme", "Zendesk").await.unwrap();
        assert!(!info.active);
        assert!(!store.is_active("acme", "Zendesk").await);

        // Re-registering brings it back
        store.upsert("acme", "Zendesk", "zd-2", true).await.unwrap();
        assert!(store.is_active("acme", "Zendesk").await);
    }

    #[tokio::test]
    async fn test_revoke_unknown_is_error() {
        let store = MemoryCredentialStore::new();
        assert!(store.revoke("acme", "Jira").await.is_err());
    }

    #[tokio::test]
    async fn test_tokens_are_hashed() {
        let store = MemoryCredentialStore::new();
        let info = store.upsert("acme", "Salesforce", "secret", true).await.unwrap();
        assert_eq!(info.fingerprint.len(), 12);
        assert!(!info.fingerprint.contains("secret"));
        assert_eq!(info.fingerprint, sha256_hex("secret")[..12]);
    }

    #[tokio::test]
    async fn test_empty_token_rejected() {
        let store = MemoryCredentialStore::new();
        assert!(store.upsert("acme", "Salesforce", "", true).await.is_err());
    }

    #[tokio::test]
    async fn test_list_is_scoped_and_sorted() {
        let store = MemoryCredentialStore::new();
        store.upsert("acme", "Zendesk", "z", true).await.unwrap();
        store.upsert("acme", "Salesforce", "s", false).await.unwrap();
        store.upsert("globex", "Jira", "j", true).await.unwrap();

        let listed = store.list("acme").await;
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].service, "Salesforce");
        assert!(!listed[0].active);
        assert_eq!(listed[1].service, "Zendesk");
    }
}

use std::collections::HashMap;
use std::future::ready;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::Entry;
use moka::future::Cache;
use moka::ops::compute::Op;

/// Session key of the pending `state`.
pub const STATE_KEY: &str = "oidc.state";
/// Session key of the pending `nonce`.
pub const NONCE_KEY: &str = "oidc.nonce";
/// Session key of the PKCE code verifier.
pub const CODE_VERIFIER_KEY: &str = "oidc.code_verifier";
/// Session key of the session identifier of the last verified ID Token.
pub const SID_KEY: &str = "oidc.sid";

/// Per-visitor key/value storage.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;

    async fn set(&self, key: &str, value: String);

    /// Reads and deletes `key` in one atomic step, so two concurrent callers
    /// never both observe the value.
    async fn take(&self, key: &str) -> Option<String>;

    async fn delete(&self, key: &str);
}

type Values = HashMap<String, String>;

/// How long an untouched visitor session is kept.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// In-process session storage for all visitors.
///
/// A visitor is dropped once its last key is taken or deleted, or after it
/// was not touched for the idle timeout.
#[derive(Clone)]
pub struct MemorySessionStore {
    visitors: Cache<String, Values>,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::with_idle_timeout(DEFAULT_IDLE_TIMEOUT)
    }
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_idle_timeout(idle_timeout: Duration) -> Self {
        let visitors = Cache::builder().time_to_idle(idle_timeout).build();
        Self { visitors }
    }

    /// The session of a single visitor.
    pub fn session(&self, visitor_id: &str) -> VisitorSession {
        VisitorSession {
            visitors: self.visitors.clone(),
            visitor_id: visitor_id.to_string(),
        }
    }

    /// Removes every session whose stored `sid` equals `sid`. Returns the
    /// number of removed sessions.
    pub async fn revoke_sid(&self, sid: &str) -> usize {
        let revoked: Vec<Arc<String>> = self
            .visitors
            .iter()
            .filter(|(_, values)| values.get(SID_KEY).is_some_and(|stored| stored == sid))
            .map(|(visitor_id, _)| visitor_id)
            .collect();
        for visitor_id in &revoked {
            self.visitors.invalidate(visitor_id.as_str()).await;
        }
        revoked.len()
    }

    /// Drops all data of a visitor.
    pub async fn clear(&self, visitor_id: &str) {
        self.visitors.invalidate(visitor_id).await;
    }

    /// Number of visitors currently holding session data.
    pub async fn visitor_count(&self) -> u64 {
        self.visitors.run_pending_tasks().await;
        self.visitors.entry_count()
    }
}

impl std::fmt::Debug for MemorySessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySessionStore")
            .field("visitors", &self.visitors.entry_count())
            .finish()
    }
}

/// Handle on one visitor's entries of a [`MemorySessionStore`].
#[derive(Clone)]
pub struct VisitorSession {
    visitors: Cache<String, Values>,
    visitor_id: String,
}

impl std::fmt::Debug for VisitorSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisitorSession")
            .field("visitor_id", &self.visitor_id)
            .finish()
    }
}

/// Every update of a visitor runs as one atomic compute on its cache entry.
#[async_trait]
impl SessionStore for VisitorSession {
    async fn get(&self, key: &str) -> Option<String> {
        self.visitors.get(&self.visitor_id).await?.get(key).cloned()
    }

    async fn set(&self, key: &str, value: String) {
        self.visitors
            .entry(self.visitor_id.clone())
            .and_compute_with(|entry| {
                let mut values = entry.map(Entry::into_value).unwrap_or_default();
                values.insert(key.to_string(), value);
                ready(Op::Put(values))
            })
            .await;
    }

    async fn take(&self, key: &str) -> Option<String> {
        let mut taken = None;
        self.visitors
            .entry(self.visitor_id.clone())
            .and_compute_with(|entry| {
                let op = match entry {
                    None => Op::Nop,
                    Some(entry) => {
                        let mut values = entry.into_value();
                        taken = values.remove(key);
                        if values.is_empty() {
                            Op::Remove
                        } else if taken.is_some() {
                            Op::Put(values)
                        } else {
                            Op::Nop
                        }
                    }
                };
                ready(op)
            })
            .await;
        taken
    }

    async fn delete(&self, key: &str) {
        self.take(key).await;
    }
}

use std::time::Duration;

use moka::future::Cache;
use tracing::warn;

use crate::error::VerificationError;

const DEFAULT_MAX_CAPACITY: u64 = 100_000;

/// Remembers the `jti` of recently accepted logout tokens.
#[derive(Clone)]
pub struct ReplayGuard {
    seen: Cache<String, ()>,
}

impl ReplayGuard {
    /// Creates a guard that remembers each `jti` for `window`.
    pub fn new(window: Duration) -> Self {
        Self::with_capacity(window, DEFAULT_MAX_CAPACITY)
    }

    pub fn with_capacity(window: Duration, max_capacity: u64) -> Self {
        let seen = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(window)
            .build();
        Self { seen }
    }

    /// Records `jti`, failing when it was already seen within the window.
    ///
    /// The check and the insert are a single atomic cache operation.
    pub async fn check_and_record(&self, jti: &str) -> Result<(), VerificationError> {
        let entry = self.seen.entry(jti.to_string()).or_insert(()).await;
        if !entry.is_fresh() {
            warn!(jti, "logout token replayed");
            return Err(VerificationError::TokenRecentlyUsed(jti.to_string()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ReplayGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayGuard")
            .field("entries", &self.seen.entry_count())
            .finish()
    }
}

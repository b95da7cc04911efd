//! State store (checkpointer) contract and implementations.
//!
//! The store keeps the latest state snapshot per conversation identity with
//! last-write-wins semantics and no transactions. The workflow always reads,
//! merges, and writes within a single turn; serializing concurrent turns for
//! the same identity is the caller's responsibility.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::state::SurveyState;

/// Persistence for per-conversation state snapshots
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Fetch the latest snapshot for an identity, if any
    async fn get(&self, identity: &str) -> Result<Option<SurveyState>>;

    /// Persist the latest snapshot for an identity (last write wins)
    async fn put(&self, identity: &str, state: &SurveyState) -> Result<()>;
}

/// In-memory store, suitable for tests and single-process deployments
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, SurveyState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, identity: &str) -> Result<Option<SurveyState>> {
        Ok(self.inner.lock().get(identity).cloned())
    }

    async fn put(&self, identity: &str, state: &SurveyState) -> Result<()> {
        self.inner.lock().insert(identity.to_string(), state.clone());
        Ok(())
    }
}

/// Wraps any store with bounded retries and backoff. Only after the budget
/// is exhausted does a failure surface, as [`Error::StoreUnavailable`].
pub struct RetryingStore<S> {
    inner: S,
    max_retries: u32,
    initial_delay: Duration,
}

impl<S: StateStore> RetryingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
        }
    }

    pub fn with_retries(mut self, max_retries: u32, initial_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.initial_delay = initial_delay;
        self
    }

    async fn backoff(&self, attempt: u32) {
        let delay = self.initial_delay * 2u32.saturating_pow(attempt);
        tokio::time::sleep(delay).await;
    }
}

#[async_trait]
impl<S: StateStore> StateStore for RetryingStore<S> {
    async fn get(&self, identity: &str) -> Result<Option<SurveyState>> {
        let mut attempt = 0u32;
        loop {
            match self.inner.get(identity).await {
                Ok(state) => return Ok(state),
                Err(e) if attempt < self.max_retries => {
                    tracing::warn!(
                        identity,
                        "Checkpoint read failed (attempt {}/{}): {}",
                        attempt + 1,
                        self.max_retries + 1,
                        e
                    );
                    self.backoff(attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(Error::StoreUnavailable(e.to_string())),
            }
        }
    }

    async fn put(&self, identity: &str, state: &SurveyState) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            match self.inner.put(identity, state).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.max_retries => {
                    tracing::warn!(
                        identity,
                        "Checkpoint write failed (attempt {}/{}): {}",
                        attempt + 1,
                        self.max_retries + 1,
                        e
                    );
                    self.backoff(attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(Error::StoreUnavailable(e.to_string())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.get("t1").await.unwrap().is_none());

        let state = SurveyState::new("t1");
        store.put("t1", &state).await.unwrap();
        let loaded = store.get("t1").await.unwrap().unwrap();
        assert_eq!(loaded.identity, "t1");
    }

    #[tokio::test]
    async fn test_memory_store_last_write_wins() {
        let store = MemoryStore::new();
        let mut state = SurveyState::new("t1");
        store.put("t1", &state).await.unwrap();
        state.stage_status = "later".into();
        store.put("t1", &state).await.unwrap();
        assert_eq!(store.get("t1").await.unwrap().unwrap().stage_status, "later");
    }

    /// A store that fails a fixed number of times before delegating to an
    /// in-memory store.
    struct FlakyStore {
        inner: MemoryStore,
        failures: AtomicU32,
        calls: Arc<AtomicU32>,
    }

    impl FlakyStore {
        fn new(failures: u32) -> (Self, Arc<AtomicU32>) {
            let calls = Arc::new(AtomicU32::new(0));
            (
                Self {
                    inner: MemoryStore::new(),
                    failures: AtomicU32::new(failures),
                    calls: calls.clone(),
                },
                calls,
            )
        }

        fn should_fail(&self) -> bool {
            self.calls.fetch_add(1, Ordering::Relaxed);
            loop {
                let remaining = self.failures.load(Ordering::Relaxed);
                if remaining == 0 {
                    return false;
                }
                if self
                    .failures
                    .compare_exchange(remaining, remaining - 1, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
                {
                    return true;
                }
            }
        }
    }

    #[async_trait]
    impl StateStore for FlakyStore {
        async fn get(&self, identity: &str) -> Result<Option<SurveyState>> {
            if self.should_fail() {
                return Err(Error::StoreUnavailable("connection refused".into()));
            }
            self.inner.get(identity).await
        }

        async fn put(&self, identity: &str, state: &SurveyState) -> Result<()> {
            if self.should_fail() {
                return Err(Error::StoreUnavailable("connection refused".into()));
            }
            self.inner.put(identity, state).await
        }
    }

    #[tokio::test]
    async fn test_retrying_store_recovers_from_transient_failures() {
        let (flaky, calls) = FlakyStore::new(2);
        let store =
            RetryingStore::new(flaky).with_retries(3, Duration::from_millis(1));

        let state = SurveyState::new("t1");
        store.put("t1", &state).await.unwrap();
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_retrying_store_surfaces_exhaustion() {
        let (flaky, _) = FlakyStore::new(u32::MAX);
        let store =
            RetryingStore::new(flaky).with_retries(2, Duration::from_millis(1));

        let err = store.get("t1").await.unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));
        assert_eq!(err.code(), "store_unavailable");
    }
}

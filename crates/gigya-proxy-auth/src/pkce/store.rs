//! Challenge persistence
//!
//! [`ChallengeBackend`] is the storage seam (fallible, async). [`ChallengeStore`]
//! wraps a backend with the availability policy the proxy needs: a write
//! failure never breaks `/authorize`, and a read failure just means the
//! challenge is not found.

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::ChallengeRecord;
use crate::error::AuthResult;

/// Predicate deciding whether a stored record may be consumed
pub type AcceptRecord<'a> = &'a (dyn Fn(&ChallengeRecord) -> bool + Send + Sync);

/// Storage backend for challenge records
///
/// Implementations must make [`take_if`](ChallengeBackend::take_if) a single
/// compare-and-delete: two concurrent calls for the same key must never both
/// return the record.
#[async_trait]
pub trait ChallengeBackend: Send + Sync + fmt::Debug {
    /// Insert or replace the record keyed by its `code_challenge`
    async fn put(&self, record: ChallengeRecord) -> AuthResult<()>;

    /// Remove and return the record for `code_challenge` if `accept` allows it.
    ///
    /// A record rejected by `accept` stays in place.
    async fn take_if(
        &self,
        code_challenge: &str,
        accept: AcceptRecord<'_>,
    ) -> AuthResult<Option<ChallengeRecord>>;

    /// Drop expired records, returning how many were removed.
    ///
    /// Backends whose storage expires records on its own keep the default.
    async fn purge_expired(&self) -> AuthResult<usize> {
        Ok(0)
    }

    /// Table / namespace name, for logs
    fn namespace(&self) -> &str;
}

/// In-process challenge backend
///
/// Records live in a sharded concurrent map. With a `max_age`, records older
/// than that read as missing and [`purge_expired`](Self::purge_expired)
/// drops them.
#[derive(Debug)]
pub struct MemoryChallengeBackend {
    namespace: String,
    records: DashMap<String, ChallengeRecord>,
    max_age: Option<TimeDelta>,
}

impl MemoryChallengeBackend {
    /// Create an empty backend with no expiry
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            records: DashMap::new(),
            max_age: None,
        }
    }

    /// Expire records older than `max_age`
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = TimeDelta::from_std(max_age).ok();
        self
    }

    fn is_expired(&self, record: &ChallengeRecord) -> bool {
        self.max_age
            .is_some_and(|max_age| Utc::now() - record.created_at > max_age)
    }

    /// Drop every expired record, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        if self.max_age.is_none() {
            return 0;
        }
        let before = self.records.len();
        self.records.retain(|_, record| !self.is_expired(record));
        let purged = before.saturating_sub(self.records.len());
        if purged > 0 {
            debug!(namespace = %self.namespace, purged, "Purged expired challenges");
        }
        purged
    }

    /// Number of stored records (expired ones included until purged)
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the backend holds no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl ChallengeBackend for MemoryChallengeBackend {
    async fn put(&self, record: ChallengeRecord) -> AuthResult<()> {
        self.records.insert(record.code_challenge.clone(), record);
        Ok(())
    }

    async fn take_if(
        &self,
        code_challenge: &str,
        accept: AcceptRecord<'_>,
    ) -> AuthResult<Option<ChallengeRecord>> {
        let removed = self
            .records
            .remove_if(code_challenge, |_, record| {
                self.is_expired(record) || accept(record)
            });

        match removed {
            Some((_, record)) if self.is_expired(&record) => {
                debug!(namespace = %self.namespace, "Dropped expired challenge on lookup");
                Ok(None)
            }
            Some((_, record)) => Ok(Some(record)),
            None => Ok(None),
        }
    }

    async fn purge_expired(&self) -> AuthResult<usize> {
        Ok(MemoryChallengeBackend::purge_expired(self))
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }
}

/// Challenge store used by the authorize and token paths
///
/// Never returns errors: storage problems are logged and read as "absent".
#[derive(Debug, Clone)]
pub struct ChallengeStore {
    backend: Arc<dyn ChallengeBackend>,
}

impl ChallengeStore {
    /// Wrap a backend
    pub fn new(backend: Arc<dyn ChallengeBackend>) -> Self {
        Self { backend }
    }

    /// Store backed by a fresh [`MemoryChallengeBackend`]
    pub fn in_memory(namespace: impl Into<String>) -> Self {
        Self::new(Arc::new(MemoryChallengeBackend::new(namespace)))
    }

    /// Persist a challenge. Failures are logged and swallowed.
    pub async fn save(&self, record: ChallengeRecord) {
        debug!(
            namespace = %self.backend.namespace(),
            client_id = %record.client_id,
            method = %record.code_challenge_method,
            "Storing code challenge"
        );
        if let Err(e) = self.backend.put(record).await {
            warn!(
                namespace = %self.backend.namespace(),
                error = %e,
                "Failed to store code challenge; PKCE check for this flow will fail"
            );
        }
    }

    /// Consume the record stored under `key`.
    ///
    /// Returns true exactly once per stored record.
    pub async fn consume(&self, key: &str) -> bool {
        self.consume_if(key, &|_| true).await
    }

    /// Consume the record stored under `key` only if `accept` allows it
    pub async fn consume_if(&self, key: &str, accept: AcceptRecord<'_>) -> bool {
        match self.backend.take_if(key, accept).await {
            Ok(Some(record)) => {
                debug!(
                    namespace = %self.backend.namespace(),
                    client_id = %record.client_id,
                    "Consumed code challenge"
                );
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!(
                    namespace = %self.backend.namespace(),
                    error = %e,
                    "Failed to read code challenge"
                );
                false
            }
        }
    }

    /// Drop expired records. Failures are logged and count as nothing purged.
    pub async fn purge_expired(&self) -> usize {
        match self.backend.purge_expired().await {
            Ok(purged) => purged,
            Err(e) => {
                warn!(
                    namespace = %self.backend.namespace(),
                    error = %e,
                    "Failed to purge expired challenges"
                );
                0
            }
        }
    }

    /// The underlying backend
    pub fn backend(&self) -> &Arc<dyn ChallengeBackend> {
        &self.backend
    }
}

//! Admission gate: key validation, quota check and usage commit.
//!
//! Each request walks a linear state machine:
//!
//! ```text
//! start ─┬─> NoKey | UnknownKey | QuotaExceeded          (rejected)
//!        └─> Admitted ─┬─> Committed                     (handler succeeded)
//!                      └─> (dropped, nothing charged)    (handler failed or request cancelled)
//! ```
//!
//! The key table lives in a single file that is rewritten in full, so two locks keep the
//! accounting exact:
//! - a per-key lock held by the [`Admission`] from the quota check until commit or drop, so two
//!   requests for the same key cannot both pass a check that only one of them may pass;
//! - a store-wide writer lock around commit, which re-reads the table before incrementing, so a
//!   commit for one key never writes back a stale counter for another.

use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::error::GateError;
use crate::store::{KeyRecord, KeyStore};
use crate::timeout::TimeoutPolicy;

pub mod locks;
pub use locks::KeyLocks;

/// Default budget for a wrapped capability call.
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(30);

/// Where a request ended up in the admission state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdmissionState {
    NoKey,
    UnknownKey,
    QuotaExceeded,
    Admitted,
    Committed,
}

impl AdmissionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoKey => "no_key",
            Self::UnknownKey => "unknown_key",
            Self::QuotaExceeded => "quota_exceeded",
            Self::Admitted => "admitted",
            Self::Committed => "committed",
        }
    }

    /// Rejection state for an admission error, if it is one.
    pub fn of_error(err: &GateError) -> Option<Self> {
        match err {
            GateError::MissingKey => Some(Self::NoKey),
            GateError::InvalidKey => Some(Self::UnknownKey),
            GateError::QuotaExceeded { .. } => Some(Self::QuotaExceeded),
            _ => None,
        }
    }
}

impl fmt::Display for AdmissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of a key's quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Usage {
    pub used: u64,
    pub limit: u64,
    pub remaining: u64,
}

impl From<KeyRecord> for Usage {
    fn from(record: KeyRecord) -> Self {
        Self { used: record.used, limit: record.limit, remaining: record.remaining() }
    }
}

/// Permission for one request to proceed.
///
/// Holds the key's lock until it is committed or dropped. Dropping it charges nothing.
#[must_use = "dropping an admission releases it without charging usage"]
#[derive(Debug)]
pub struct Admission {
    key: String,
    record: KeyRecord,
    _permit: OwnedMutexGuard<()>,
}

impl Admission {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Record as loaded at admission time.
    pub fn record(&self) -> KeyRecord {
        self.record
    }

    pub fn state(&self) -> AdmissionState {
        AdmissionState::Admitted
    }
}

/// Per-request authorization and accounting over a [`KeyStore`].
#[derive(Debug)]
pub struct AdmissionGate {
    store: Arc<dyn KeyStore>,
    locks: KeyLocks,
    writer: tokio::sync::Mutex<()>,
    handler_timeout: TimeoutPolicy,
}

impl AdmissionGate {
    pub fn new<S>(store: S) -> Self
    where
        S: KeyStore + 'static,
    {
        Self::from_shared(Arc::new(store))
    }

    /// Build over a store that is also used elsewhere.
    pub fn from_shared(store: Arc<dyn KeyStore>) -> Self {
        Self {
            store,
            locks: KeyLocks::new(),
            writer: tokio::sync::Mutex::new(()),
            handler_timeout: TimeoutPolicy::new(DEFAULT_HANDLER_TIMEOUT),
        }
    }

    /// Builder-style: bound wrapped handlers by `timeout`.
    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = TimeoutPolicy::new(timeout);
        self
    }

    pub fn handler_timeout(&self) -> TimeoutPolicy {
        self.handler_timeout
    }

    /// Validate `key` and check its quota. Usage is not charged here.
    ///
    /// A missing or empty key is rejected before storage is touched. While the returned
    /// [`Admission`] is alive, other requests for the same key wait in `admit`.
    pub async fn admit(&self, key: Option<&str>) -> Result<Admission, GateError> {
        let key = match key {
            Some(k) if !k.is_empty() => k,
            _ => {
                debug!(state = %AdmissionState::NoKey, "request rejected");
                return Err(GateError::MissingKey);
            }
        };

        let permit = self.locks.acquire(key).await;
        let table = self.store.load().await.map_err(|err| {
            warn!(error = %err, "key table unavailable");
            GateError::from(err)
        })?;

        let Some(record) = table.get(key).copied() else {
            debug!(key = %redact(key), state = %AdmissionState::UnknownKey, "request rejected");
            return Err(GateError::InvalidKey);
        };

        if record.is_exhausted() {
            warn!(
                key = %redact(key),
                used = record.used,
                limit = record.limit,
                state = %AdmissionState::QuotaExceeded,
                "request rejected"
            );
            return Err(GateError::QuotaExceeded { used: record.used, limit: record.limit });
        }

        debug!(key = %redact(key), used = record.used, limit = record.limit, "request admitted");
        Ok(Admission { key: key.to_owned(), record, _permit: permit })
    }

    /// Charge exactly one request to the admitted key and persist the table.
    ///
    /// Call only after the wrapped handler succeeded. The table is re-read under the writer
    /// lock; if the record was removed or its limit lowered out-of-band since admission, nothing
    /// is written and the matching rejection is returned.
    pub async fn commit(&self, admission: Admission) -> Result<KeyRecord, GateError> {
        let _writer = self.writer.lock().await;
        let mut table = self.store.load().await?;

        let record = table.get_mut(&admission.key).ok_or(GateError::InvalidKey)?;
        if record.is_exhausted() {
            return Err(GateError::QuotaExceeded { used: record.used, limit: record.limit });
        }
        record.used += 1;
        let committed = *record;

        self.store.save(&table).await?;
        info!(
            key = %redact(&admission.key),
            used = committed.used,
            limit = committed.limit,
            state = %AdmissionState::Committed,
            "usage committed"
        );
        Ok(committed)
    }

    /// Current quota for `key` as last committed. Never charges usage.
    pub async fn usage(&self, key: Option<&str>) -> Result<Usage, GateError> {
        let key = key.filter(|k| !k.is_empty()).ok_or(GateError::MissingKey)?;
        let table = self.store.load().await?;
        table.get(key).copied().map(Usage::from).ok_or(GateError::InvalidKey)
    }

    /// Admit, run `op` within the handler timeout, and commit only if it succeeded.
    ///
    /// If the returned future is dropped before completion nothing is charged.
    pub async fn run<T, E, Fut, Op>(&self, key: Option<&str>, op: Op) -> Result<T, GateError>
    where
        Op: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let admission = self.admit(key).await?;

        let value = match self.handler_timeout.execute(op()).await {
            Ok(Ok(value)) => value,
            Ok(Err(err)) => {
                warn!(
                    key = %redact(admission.key()),
                    error = %err,
                    "handler failed; usage not charged"
                );
                return Err(GateError::HandlerFailure(err.to_string()));
            }
            Err(elapsed) => {
                warn!(
                    key = %redact(admission.key()),
                    error = %elapsed,
                    "handler timed out; usage not charged"
                );
                return Err(GateError::HandlerFailure(elapsed.to_string()));
            }
        };

        self.commit(admission).await?;
        Ok(value)
    }
}

/// Log-safe form of an API key.
pub(crate) fn redact(key: &str) -> String {
    let visible: String = key.chars().take(4).collect();
    if visible.len() < key.len() {
        format!("{visible}…")
    } else {
        visible
    }
}

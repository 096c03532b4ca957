//! Short-lived store for unconsumed commitment scalars and auth challenges.
//!
//! The core delegates all commitment bookkeeping to this interface so that
//! horizontally-scaled deployments can back it with a coordinated store.
//! The contract is strict: `consume_*` is an atomic take that succeeds for
//! at most one caller per id, and entries expire after a short window,
//! after which they are indistinguishable from never having existed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use keyshare_types::CommitId;
use num_bigint::BigUint;
use parking_lot::Mutex;

/// Dynamic trait object for the commitment store.
///
/// Must be `Send + Sync` so the core can be shared across handler tasks.
pub type CommitmentStoreService = Arc<dyn CommitmentStore>;

/// Errors surfaced by commitment store implementations.
#[derive(Debug, thiserror::Error)]
pub enum CommitmentStoreError {
    /// The entry does not exist, was already consumed, or expired.
    #[error("entry not found")]
    NotFound,
    /// The backing store failed; the operation may or may not have landed.
    #[error("commitment store backend failure: {0}")]
    Backend(String),
}

/// Trait that commitment store implementations must provide.
pub trait CommitmentStore: Send + Sync {
    /// Stores the commitment scalar `w` under `id`.
    fn store_commitment(&self, id: CommitId, scalar: BigUint) -> Result<(), CommitmentStoreError>;

    /// Atomically takes the scalar stored under `id`. At most one caller
    /// succeeds per id, under any interleaving.
    fn consume_commitment(&self, id: CommitId) -> Result<BigUint, CommitmentStoreError>;

    /// Stores an auth challenge under a caller-chosen byte id.
    fn store_auth_challenge(
        &self,
        id: Vec<u8>,
        challenge: Vec<u8>,
    ) -> Result<(), CommitmentStoreError>;

    /// Atomically takes the challenge stored under `id`; same contract as
    /// [`Self::consume_commitment`].
    fn consume_auth_challenge(&self, id: &[u8]) -> Result<Vec<u8>, CommitmentStoreError>;

    /// Drops expired entries. Backends with native TTLs may leave this a
    /// no-op; callers invoke it from a periodic sweep.
    fn purge_expired(&self) {}
}

struct TimedEntry<T> {
    value: T,
    stored_at: Instant,
}

impl<T> TimedEntry<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            stored_at: Instant::now(),
        }
    }

    fn expired(&self, lifetime: Duration) -> bool {
        self.stored_at.elapsed() >= lifetime
    }
}

/// In-process [`CommitmentStore`]: guarded maps with timestamped entries.
///
/// Expiry is enforced on the consume path, so correctness never depends on
/// the sweep cadence; [`CommitmentStore::purge_expired`] only bounds memory.
pub struct MemoryCommitmentStore {
    commitments: Mutex<HashMap<CommitId, TimedEntry<BigUint>>>,
    challenges: Mutex<HashMap<Vec<u8>, TimedEntry<Vec<u8>>>>,
    lifetime: Duration,
}

/// Default lifetime of unconsumed entries.
pub const DEFAULT_COMMITMENT_LIFETIME: Duration = Duration::from_secs(10 * 60);

impl MemoryCommitmentStore {
    /// Creates a store whose entries expire after `lifetime`.
    pub fn new(lifetime: Duration) -> Self {
        Self {
            commitments: Mutex::new(HashMap::new()),
            challenges: Mutex::new(HashMap::new()),
            lifetime,
        }
    }

    /// Number of currently parked commitment scalars, for metrics.
    pub fn pending_commitments(&self) -> usize {
        self.commitments.lock().len()
    }
}

impl Default for MemoryCommitmentStore {
    fn default() -> Self {
        Self::new(DEFAULT_COMMITMENT_LIFETIME)
    }
}

impl CommitmentStore for MemoryCommitmentStore {
    fn store_commitment(&self, id: CommitId, scalar: BigUint) -> Result<(), CommitmentStoreError> {
        self.commitments.lock().insert(id, TimedEntry::new(scalar));
        Ok(())
    }

    fn consume_commitment(&self, id: CommitId) -> Result<BigUint, CommitmentStoreError> {
        let entry = self
            .commitments
            .lock()
            .remove(&id)
            .ok_or(CommitmentStoreError::NotFound)?;
        if entry.expired(self.lifetime) {
            return Err(CommitmentStoreError::NotFound);
        }
        Ok(entry.value)
    }

    fn store_auth_challenge(
        &self,
        id: Vec<u8>,
        challenge: Vec<u8>,
    ) -> Result<(), CommitmentStoreError> {
        self.challenges.lock().insert(id, TimedEntry::new(challenge));
        Ok(())
    }

    fn consume_auth_challenge(&self, id: &[u8]) -> Result<Vec<u8>, CommitmentStoreError> {
        let entry = self
            .challenges
            .lock()
            .remove(id)
            .ok_or(CommitmentStoreError::NotFound)?;
        if entry.expired(self.lifetime) {
            return Err(CommitmentStoreError::NotFound);
        }
        Ok(entry.value)
    }

    fn purge_expired(&self) {
        let lifetime = self.lifetime;
        self.commitments
            .lock()
            .retain(|_, entry| !entry.expired(lifetime));
        self.challenges
            .lock()
            .retain(|_, entry| !entry.expired(lifetime));
    }
}

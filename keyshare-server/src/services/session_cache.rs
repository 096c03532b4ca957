//! Per-username memo of the last `getCommitments` call.
//!
//! The cache lets `getResponse` find the commit id and issuer key of the
//! most recent commitment round without the client echoing them. Entries
//! are only hints: the commitment scalar itself lives in the commitment
//! store, so losing an entry merely forces the client to restart the
//! proof. Latest write wins; a sweep task deletes expired entries.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use keyshare_types::{CommitId, PublicKeyIdentifier};

use crate::metrics::{METRICS_KEY_DELETED_CACHE_ENTRIES, METRICS_KEY_OPEN_CACHE_ENTRIES};

/// Default lifetime of cache entries.
pub(crate) const DEFAULT_SESSION_CACHE_LIFETIME: Duration = Duration::from_secs(10);

#[derive(Clone)]
struct Entry {
    commit_id: CommitId,
    key_id: PublicKeyIdentifier,
    expiry: Instant,
}

/// The session cache of the keyshare server. In the background it is a
/// thin wrapper around a Mutex protecting a HashMap.
#[derive(Clone)]
pub(crate) struct SessionCache {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    lifetime: Duration,
}

impl SessionCache {
    pub(crate) fn new(lifetime: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            lifetime,
        }
    }

    /// Records the latest commitment round for `username`, replacing any
    /// previous entry.
    pub(crate) fn insert(&self, username: &str, commit_id: CommitId, key_id: PublicKeyIdentifier) {
        let entry = Entry {
            commit_id,
            key_id,
            expiry: Instant::now() + self.lifetime,
        };
        let fresh = {
            let mut entries = self.entries.lock().expect("not poisoned");
            entries.insert(username.to_owned(), entry).is_none()
        };
        if fresh {
            metrics::gauge!(METRICS_KEY_OPEN_CACHE_ENTRIES).increment(1);
        }
    }

    /// Looks up the live entry for `username`, if any.
    pub(crate) fn get(&self, username: &str) -> Option<(CommitId, PublicKeyIdentifier)> {
        let entries = self.entries.lock().expect("not poisoned");
        entries
            .get(username)
            .filter(|entry| Instant::now() < entry.expiry)
            .map(|entry| (entry.commit_id, entry.key_id.clone()))
    }

    /// Deletes expired entries; returns how many were removed.
    pub(crate) fn purge_expired(&self) -> usize {
        let deleted = {
            let mut entries = self.entries.lock().expect("not poisoned");
            let cutoff = Instant::now();
            let old_size = entries.len();
            entries.retain(|_, entry| cutoff < entry.expiry);
            old_size - entries.len()
        };
        if deleted > 0 {
            metrics::gauge!(METRICS_KEY_OPEN_CACHE_ENTRIES).decrement(deleted as f64);
            metrics::counter!(METRICS_KEY_DELETED_CACHE_ENTRIES).increment(deleted as u64);
        }
        deleted
    }
}

//! User store interface for the keyshare server.
//!
//! This module defines the [`UserStore`] trait, through which the server
//! persists user rows (with their opaque sealed blobs), PIN-check
//! rate-limit state, activity timestamps and audit log entries. The store
//! is the single source of truth for PIN lockout: [`UserStore::reserve_pincheck`]
//! must atomically consume a slot before any PIN comparison happens.
//!
//! Current `UserStore` implementations:
//! - in-memory (tests, single-process deployments)
//!
//! Durable relational backends implement the same trait.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use keyshare_core::UserSecretBlob;
use parking_lot::Mutex;

/// Dynamic trait object for the user store.
///
/// Must be `Send + Sync` to work with async contexts (e.g., Axum).
pub type UserStoreService = Arc<dyn UserStore + Send + Sync>;

/// Errors surfaced by user store implementations.
#[derive(Debug, thiserror::Error)]
pub enum UserStoreError {
    /// No row exists for the requested username.
    #[error("user not found")]
    NotFound,
    /// The backing store failed.
    #[error("user store backend failure: {0}")]
    Backend(String),
}

/// Non-secret user row. The `coredata` blob is opaque to the store.
#[derive(Clone)]
pub struct KeyshareUser {
    pub username: String,
    pub language: String,
    pub coredata: UserSecretBlob,
}

/// Kinds of audit log entries attached to a user.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogEntryKind {
    PinCheckRefused,
    PinCheckFailed,
    PinCheckBlocked,
    PinCheckSuccess,
    IrmaSession,
}

/// Result of [`UserStore::reserve_pincheck`].
#[derive(Clone, Copy, Debug)]
pub struct PincheckReservation {
    /// Whether a check slot was granted.
    pub allowed: bool,
    /// Remaining tries after this one, when granted.
    pub tries_remaining: u64,
    /// Wait in whole seconds before the next slot opens, when relevant.
    pub wait_seconds: u64,
}

/// Trait that user store implementations must provide.
#[async_trait]
pub trait UserStore {
    /// Loads the row for `username`.
    async fn user(&self, username: &str) -> Result<KeyshareUser, UserStoreError>;

    /// Inserts a fresh row; fails if the username is taken.
    async fn new_user(&self, user: KeyshareUser) -> Result<KeyshareUser, UserStoreError>;

    /// Writes back a changed row (new sealed blob after PIN change).
    async fn update_user(&self, user: &KeyshareUser) -> Result<(), UserStoreError>;

    /// Atomically consumes a PIN check slot. Two concurrent calls for the
    /// same user may never both be granted beyond the budget.
    async fn reserve_pincheck(&self, username: &str)
    -> Result<PincheckReservation, UserStoreError>;

    /// Resets the PIN check budget after a successful verification.
    async fn clear_pincheck(&self, username: &str) -> Result<(), UserStoreError>;

    /// Refreshes the user's last-seen timestamp.
    async fn set_seen(&self, username: &str) -> Result<(), UserStoreError>;

    /// Appends an audit log entry.
    async fn add_log(
        &self,
        username: &str,
        kind: LogEntryKind,
        data: Option<u64>,
    ) -> Result<(), UserStoreError>;

    /// Records a pending email verification token.
    async fn add_email_verification(
        &self,
        username: &str,
        email: &str,
        token: &str,
    ) -> Result<(), UserStoreError>;
}

/// PIN lockout policy of the in-memory store.
#[derive(Clone, Copy, Debug)]
pub struct PincheckPolicy {
    /// Checks granted before the account blocks.
    pub max_tries: u64,
    /// Wait after the first block; doubles per subsequent block.
    pub backoff_start: Duration,
}

impl Default for PincheckPolicy {
    fn default() -> Self {
        Self {
            max_tries: 3,
            backoff_start: Duration::from_secs(60),
        }
    }
}

struct UserRecord {
    user: KeyshareUser,
    last_seen: Option<SystemTime>,
    pincheck_count: u64,
    blocked_until: Option<Instant>,
    logs: Vec<(LogEntryKind, Option<u64>)>,
    email_verifications: Vec<(String, String)>,
}

impl UserRecord {
    fn new(user: KeyshareUser) -> Self {
        Self {
            user,
            last_seen: None,
            pincheck_count: 0,
            blocked_until: None,
            logs: Vec::new(),
            email_verifications: Vec::new(),
        }
    }
}

/// In-process [`UserStore`]: a guarded map, with the lockout ladder
/// evaluated inside the lock so reservations are atomic.
pub struct MemoryUserStore {
    users: Mutex<HashMap<String, UserRecord>>,
    policy: PincheckPolicy,
}

impl MemoryUserStore {
    pub fn new(policy: PincheckPolicy) -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            policy,
        }
    }

    /// Log kinds recorded for a user, oldest first. Test observability.
    #[cfg(test)]
    pub fn logged_kinds(&self, username: &str) -> Vec<LogEntryKind> {
        self.users
            .lock()
            .get(username)
            .map(|record| record.logs.iter().map(|(kind, _)| *kind).collect())
            .unwrap_or_default()
    }

    /// Pending email verification tokens for a user. Test observability.
    #[cfg(test)]
    pub fn email_verifications(&self, username: &str) -> Vec<(String, String)> {
        self.users
            .lock()
            .get(username)
            .map(|record| record.email_verifications.clone())
            .unwrap_or_default()
    }
}

impl Default for MemoryUserStore {
    fn default() -> Self {
        Self::new(PincheckPolicy::default())
    }
}

fn remaining_whole_seconds(until: Instant) -> u64 {
    let remaining = until.saturating_duration_since(Instant::now());
    let mut seconds = remaining.as_secs();
    if remaining.subsec_nanos() > 0 {
        seconds += 1;
    }
    seconds
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn user(&self, username: &str) -> Result<KeyshareUser, UserStoreError> {
        self.users
            .lock()
            .get(username)
            .map(|record| record.user.clone())
            .ok_or(UserStoreError::NotFound)
    }

    async fn new_user(&self, user: KeyshareUser) -> Result<KeyshareUser, UserStoreError> {
        let mut users = self.users.lock();
        if users.contains_key(&user.username) {
            return Err(UserStoreError::Backend(format!(
                "username already taken: {}",
                user.username
            )));
        }
        users.insert(user.username.clone(), UserRecord::new(user.clone()));
        Ok(user)
    }

    async fn update_user(&self, user: &KeyshareUser) -> Result<(), UserStoreError> {
        let mut users = self.users.lock();
        let record = users.get_mut(&user.username).ok_or(UserStoreError::NotFound)?;
        record.user = user.clone();
        Ok(())
    }

    async fn reserve_pincheck(
        &self,
        username: &str,
    ) -> Result<PincheckReservation, UserStoreError> {
        let mut users = self.users.lock();
        let record = users.get_mut(username).ok_or(UserStoreError::NotFound)?;

        if let Some(until) = record.blocked_until {
            if Instant::now() < until {
                return Ok(PincheckReservation {
                    allowed: false,
                    tries_remaining: 0,
                    wait_seconds: remaining_whole_seconds(until),
                });
            }
        }

        record.pincheck_count += 1;
        if record.pincheck_count >= self.policy.max_tries {
            // budget exhausted with this check: grant it, but arm the block
            let exponent = (record.pincheck_count - self.policy.max_tries).min(16) as u32;
            let wait = self.policy.backoff_start * 2u32.pow(exponent);
            record.blocked_until = Some(Instant::now() + wait);
            Ok(PincheckReservation {
                allowed: true,
                tries_remaining: 0,
                wait_seconds: wait.as_secs(),
            })
        } else {
            Ok(PincheckReservation {
                allowed: true,
                tries_remaining: self.policy.max_tries - record.pincheck_count,
                wait_seconds: 0,
            })
        }
    }

    async fn clear_pincheck(&self, username: &str) -> Result<(), UserStoreError> {
        let mut users = self.users.lock();
        let record = users.get_mut(username).ok_or(UserStoreError::NotFound)?;
        record.pincheck_count = 0;
        record.blocked_until = None;
        Ok(())
    }

    async fn set_seen(&self, username: &str) -> Result<(), UserStoreError> {
        let mut users = self.users.lock();
        let record = users.get_mut(username).ok_or(UserStoreError::NotFound)?;
        record.last_seen = Some(SystemTime::now());
        Ok(())
    }

    async fn add_log(
        &self,
        username: &str,
        kind: LogEntryKind,
        data: Option<u64>,
    ) -> Result<(), UserStoreError> {
        let mut users = self.users.lock();
        let record = users.get_mut(username).ok_or(UserStoreError::NotFound)?;
        record.logs.push((kind, data));
        Ok(())
    }

    async fn add_email_verification(
        &self,
        username: &str,
        email: &str,
        token: &str,
    ) -> Result<(), UserStoreError> {
        let mut users = self.users.lock();
        let record = users.get_mut(username).ok_or(UserStoreError::NotFound)?;
        record
            .email_verifications
            .push((email.to_owned(), token.to_owned()));
        Ok(())
    }
}

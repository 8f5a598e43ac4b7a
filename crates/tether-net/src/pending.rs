//! Correlation of outstanding requests with their responses.
//!
//! Each entry owns a oneshot responder that is completed exactly once: by a
//! matching response ([`PendingTable::resolve`]), by the timeout sweep
//! ([`PendingTable::sweep`]), or by a reset ([`PendingTable::drain`]). The
//! entry leaves the map before its responder fires, so a second completion
//! for the same key cannot happen.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::RequestError;
use crate::messages::{Inbound, REPLY_TAG, RequestKind};

/// Completion handle of a pending entry.
pub type Responder = oneshot::Sender<Result<Inbound, RequestError>>;

/// Key reserved for the in-flight login.
pub const LOGIN_KEY: &str = "";

/// One outstanding request.
#[derive(Debug)]
pub struct PendingEntry {
    /// What was asked.
    pub kind: RequestKind,
    /// When it was recorded.
    pub submitted_at: Instant,
    responder: Responder,
}

impl PendingEntry {
    fn complete(self, outcome: Result<Inbound, RequestError>) {
        // The caller may have stopped waiting; nothing to do then.
        let _ = self.responder.send(outcome);
    }
}

/// Programmer errors when recording an entry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PendingError {
    /// A login entry already exists.
    #[error("a login is already pending")]
    LoginInFlight,
    /// The key is already outstanding.
    #[error("correlation key {0:?} is already pending")]
    DuplicateKey(String),
}

/// Map from correlation key to outstanding request.
#[derive(Debug)]
pub struct PendingTable {
    entries: HashMap<String, PendingEntry>,
    timeout: Duration,
}

impl PendingTable {
    /// Create an empty table whose entries expire after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            timeout,
        }
    }

    /// Record an entry submitted now.
    pub fn insert(
        &mut self,
        key: String,
        kind: RequestKind,
        responder: Responder,
    ) -> Result<(), PendingError> {
        if self.entries.contains_key(&key) {
            return Err(if key == LOGIN_KEY {
                PendingError::LoginInFlight
            } else {
                PendingError::DuplicateKey(key)
            });
        }
        self.entries.insert(
            key,
            PendingEntry {
                kind,
                submitted_at: Instant::now(),
                responder,
            },
        );
        Ok(())
    }

    /// Complete the entry for `key` with `message`. Returns whether a match
    /// was found.
    pub fn resolve(&mut self, key: &str, message: Inbound) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                entry.complete(Ok(message));
                true
            }
            None => false,
        }
    }

    /// Fail every entry older than the timeout with [`RequestError::Timeout`].
    /// Returns how many were removed.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let timeout = self.timeout;
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| now.saturating_duration_since(e.submitted_at) > timeout)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            if let Some(entry) = self.entries.remove(key) {
                tracing::warn!(kind = %entry.kind, key = %key, "Request timed out");
                entry.complete(Err(RequestError::Timeout));
            }
        }
        expired.len()
    }

    /// Fail every non-login entry with `reason`. Returns how many were removed.
    pub fn drain(&mut self, reason: RequestError) -> usize {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.kind != RequestKind::Login)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &keys {
            if let Some(entry) = self.entries.remove(key) {
                entry.complete(Err(reason.clone()));
            }
        }
        keys.len()
    }

    /// Fail the login entry, if any.
    pub fn fail_login(&mut self, reason: RequestError) -> bool {
        match self.entries.remove(LOGIN_KEY) {
            Some(entry) => {
                entry.complete(Err(reason));
                true
            }
            None => false,
        }
    }

    /// Remove an entry without completing it.
    pub fn remove(&mut self, key: &str) -> Option<PendingEntry> {
        self.entries.remove(key)
    }

    /// Drop every entry without completing it. Waiters observe a closed
    /// channel. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        n
    }

    /// Whether a login is pending.
    pub fn has_login(&self) -> bool {
        self.entries.contains_key(LOGIN_KEY)
    }

    /// Whether `key` is pending.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of outstanding entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is outstanding.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Generates correlation keys of the form `tether:<identity>:<micros>:<seq>`.
///
/// `micros` is measured from the generator's creation on a monotonic clock;
/// `seq` makes two keys issued in the same microsecond distinct.
#[derive(Debug)]
pub struct KeyGenerator {
    epoch: Instant,
    seq: u64,
}

impl KeyGenerator {
    /// Start a generator at the current instant.
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            seq: 0,
        }
    }

    /// Next key for a request sent by `identity`.
    pub fn next_key(&mut self, identity: &str) -> String {
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);
        format!(
            "{REPLY_TAG}{identity}:{}:{seq}",
            self.epoch.elapsed().as_micros()
        )
    }
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

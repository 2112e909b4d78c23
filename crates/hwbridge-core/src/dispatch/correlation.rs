//! Command/response correlation
//!
//! Callers tag commands with a [`CorrelationKey`]. The dispatcher records
//! whatever the device answered under that key exactly once; callers wait on
//! the table with a deadline and are woken as soon as their key is written.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::BridgeError;
use crate::protocol::Command;

/// Longest accepted correlation key
pub const MAX_KEY_LEN: usize = 128;

/// Caller-chosen token linking a command to its response
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CorrelationKey(String);

impl CorrelationKey {
    /// Validate a caller-supplied key: 1 to 128 characters from
    /// `[A-Za-z0-9_.:-]`
    pub fn new(key: impl Into<String>) -> Result<Self, BridgeError> {
        let key = key.into();
        let valid = !key.is_empty()
            && key.len() <= MAX_KEY_LEN
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'));
        if valid {
            Ok(Self(key))
        } else {
            Err(BridgeError::InvalidKey(key))
        }
    }

    /// Fresh key of the form `<prefix>_<8 hex digits>`
    pub fn generate(prefix: &str) -> Self {
        let id = Uuid::new_v4().simple().to_string();
        Self(format!("{}_{}", prefix, &id[..8]))
    }

    /// Key text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CorrelationKey {
    type Error = BridgeError;

    fn try_from(key: String) -> Result<Self, Self::Error> {
        Self::new(key)
    }
}

impl From<CorrelationKey> for String {
    fn from(key: CorrelationKey) -> Self {
        key.0
    }
}

/// What the dispatcher recorded for a command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandResponse {
    /// Raw ack line from the device (`A` or `E`)
    Ack(String),
    /// Written, but no ack arrived within the ack window
    Silent,
    /// Never reached the device (link closed or write failed)
    Undelivered(String),
}

impl CommandResponse {
    /// Raw line received from the device, if any
    pub fn raw(&self) -> Option<&str> {
        match self {
            CommandResponse::Ack(line) => Some(line),
            _ => None,
        }
    }

    /// The device accepted the command
    pub fn is_success(&self) -> bool {
        matches!(self, CommandResponse::Ack(line) if line == "A")
    }
}

/// Result of waiting on a correlation key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Awaited {
    /// The response recorded for the key
    Response(CommandResponse),
    /// Nothing was recorded within the wait window
    TimedOut,
}

impl Awaited {
    /// Whether the wait gave up
    pub fn is_timeout(&self) -> bool {
        matches!(self, Awaited::TimedOut)
    }

    /// The response, unless the wait timed out
    pub fn response(&self) -> Option<&CommandResponse> {
        match self {
            Awaited::Response(r) => Some(r),
            Awaited::TimedOut => None,
        }
    }
}

/// A command waiting for its response
#[derive(Debug, Clone)]
pub struct PendingCommand {
    /// Key the response will be recorded under
    pub key: CorrelationKey,
    /// Command as submitted
    pub command: Command,
    /// Submission time
    pub issued_at: DateTime<Utc>,
}

impl PendingCommand {
    /// Stamp `command` with the current time
    pub fn new(key: CorrelationKey, command: Command) -> Self {
        Self {
            key,
            command,
            issued_at: Utc::now(),
        }
    }
}

#[derive(Debug, Default)]
struct Entries {
    pending: HashMap<CorrelationKey, PendingCommand>,
    /// Keys whose caller stopped waiting; still queued or in flight
    abandoned: HashSet<CorrelationKey>,
    responses: HashMap<CorrelationKey, CommandResponse>,
}

impl Entries {
    fn in_use(&self, key: &CorrelationKey) -> bool {
        self.pending.contains_key(key)
            || self.abandoned.contains(key)
            || self.responses.contains_key(key)
    }
}

/// Write-once response table plus the set of commands still in flight.
///
/// Responses are kept for the life of the bridge.
#[derive(Debug, Default)]
pub struct ResponseTable {
    entries: Mutex<Entries>,
    recorded: Notify,
}

impl ResponseTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track a newly submitted command; its key must not have been used before,
    /// including by a command whose caller gave up waiting
    pub fn register(&self, pending: PendingCommand) -> Result<(), BridgeError> {
        let mut entries = self.lock();
        if entries.in_use(&pending.key) {
            return Err(BridgeError::DuplicateKey(pending.key.to_string()));
        }
        entries.pending.insert(pending.key.clone(), pending);
        Ok(())
    }

    /// Record the response for `key`.
    ///
    /// Returns `false` and leaves the table untouched when the key already
    /// has a response.
    pub fn record(&self, key: &CorrelationKey, response: CommandResponse) -> bool {
        {
            let mut entries = self.lock();
            if entries.responses.contains_key(key) {
                warn!(%key, "response already recorded, ignoring");
                return false;
            }
            entries.abandoned.remove(key);
            if let Some(pending) = entries.pending.remove(key) {
                let elapsed = Utc::now() - pending.issued_at;
                debug!(%key, ?response, elapsed_ms = elapsed.num_milliseconds(), "recorded response");
            }
            entries.responses.insert(key.clone(), response);
        }
        self.recorded.notify_waiters();
        true
    }

    /// Response recorded for `key`, if any
    pub fn get(&self, key: &CorrelationKey) -> Option<CommandResponse> {
        self.lock().responses.get(key).cloned()
    }

    /// Whether a caller is still waiting on `key`
    pub fn is_pending(&self, key: &CorrelationKey) -> bool {
        self.lock().pending.contains_key(key)
    }

    /// Commands submitted but not yet answered or abandoned
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// Responses recorded so far
    pub fn response_count(&self) -> usize {
        self.lock().responses.len()
    }

    /// Wait until `key` has a response or `timeout` elapses.
    ///
    /// No lock is held while suspended. On timeout the command leaves the
    /// pending set but its key stays reserved until the dispatcher records
    /// a response, so it cannot be reused by a later command.
    pub async fn wait(&self, key: &CorrelationKey, timeout: Duration) -> Awaited {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.recorded.notified();
            tokio::pin!(notified);
            // Register before checking so a record() in between is not missed
            notified.as_mut().enable();

            if let Some(response) = self.get(key) {
                return Awaited::Response(response);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let mut entries = self.lock();
                if entries.pending.remove(key).is_some() {
                    entries.abandoned.insert(key.clone());
                }
                drop(entries);
                debug!(%key, timeout_ms = timeout.as_millis() as u64, "wait timed out");
                return Awaited::TimedOut;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CommandCode;
    use std::sync::Arc;

    fn key(s: &str) -> CorrelationKey {
        CorrelationKey::new(s).unwrap()
    }

    fn servo(k: &str) -> PendingCommand {
        PendingCommand::new(key(k), Command::new(CommandCode::Servo, 90))
    }

    #[test]
    fn test_key_validation() {
        assert!(CorrelationKey::new("s1").is_ok());
        assert!(CorrelationKey::new("servo_1a2b3c4d").is_ok());
        assert!(CorrelationKey::new("req:42.a-b").is_ok());
        assert_eq!(
            CorrelationKey::new(""),
            Err(BridgeError::InvalidKey(String::new()))
        );
        assert!(CorrelationKey::new("has space").is_err());
        assert!(CorrelationKey::new("x".repeat(MAX_KEY_LEN + 1)).is_err());
    }

    #[test]
    fn test_generated_keys() {
        let a = CorrelationKey::generate("beep");
        let b = CorrelationKey::generate("beep");
        assert!(a.as_str().starts_with("beep_"));
        assert_eq!(a.as_str().len(), "beep_".len() + 8);
        assert_ne!(a, b);
        assert!(CorrelationKey::new(a.as_str()).is_ok());
    }

    #[test]
    fn test_key_serde_validates() {
        let parsed: CorrelationKey = serde_json::from_str("\"s1\"").unwrap();
        assert_eq!(parsed, key("s1"));
        assert!(serde_json::from_str::<CorrelationKey>("\"bad key\"").is_err());
    }

    #[test]
    fn test_record_is_write_once() {
        let table = ResponseTable::new();
        table.register(servo("s1")).unwrap();
        assert!(table.is_pending(&key("s1")));

        assert!(table.record(&key("s1"), CommandResponse::Ack("A".into())));
        assert!(!table.record(&key("s1"), CommandResponse::Ack("E".into())));

        assert_eq!(table.get(&key("s1")), Some(CommandResponse::Ack("A".into())));
        assert!(!table.is_pending(&key("s1")));
        assert_eq!(table.response_count(), 1);
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let table = ResponseTable::new();
        table.register(servo("s1")).unwrap();
        assert!(matches!(
            table.register(servo("s1")),
            Err(BridgeError::DuplicateKey(_))
        ));
        table.record(&key("s1"), CommandResponse::Silent);
        assert!(table.register(servo("s1")).is_err());
    }

    #[test]
    fn test_response_helpers() {
        assert!(CommandResponse::Ack("A".into()).is_success());
        assert!(!CommandResponse::Ack("E".into()).is_success());
        assert!(!CommandResponse::Silent.is_success());
        assert_eq!(CommandResponse::Ack("E".into()).raw(), Some("E"));
        assert_eq!(CommandResponse::Undelivered("closed".into()).raw(), None);
    }

    #[tokio::test]
    async fn test_wait_returns_recorded_response() {
        let table = Arc::new(ResponseTable::new());
        table.register(servo("s1")).unwrap();

        let writer = table.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.record(&key("s1"), CommandResponse::Ack("A".into()));
        });

        let result = table.wait(&key("s1"), Duration::from_secs(1)).await;
        assert_eq!(result, Awaited::Response(CommandResponse::Ack("A".into())));
    }

    #[tokio::test]
    async fn test_wait_times_out_and_late_response_is_kept() {
        let table = ResponseTable::new();
        table.register(servo("b1")).unwrap();

        let start = Instant::now();
        let result = table.wait(&key("b1"), Duration::from_millis(100)).await;
        assert!(result.is_timeout());
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(table.pending_count(), 0);
        // Still queued, so the key cannot be handed to another command
        assert!(matches!(
            table.register(servo("b1")),
            Err(BridgeError::DuplicateKey(_))
        ));

        // The device answering afterwards does not change the earlier outcome
        table.record(&key("b1"), CommandResponse::Ack("A".into()));
        assert_eq!(table.get(&key("b1")), Some(CommandResponse::Ack("A".into())));
        assert!(table.register(servo("b1")).is_err());
    }

    #[tokio::test]
    async fn test_waiters_on_other_keys_keep_waiting() {
        let table = Arc::new(ResponseTable::new());
        table.register(servo("k1")).unwrap();
        table.register(servo("k2")).unwrap();

        let waiter = {
            let table = table.clone();
            tokio::spawn(async move { table.wait(&key("k2"), Duration::from_millis(300)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        table.record(&key("k1"), CommandResponse::Ack("A".into()));
        tokio::time::sleep(Duration::from_millis(10)).await;
        table.record(&key("k2"), CommandResponse::Ack("E".into()));

        assert_eq!(
            waiter.await.unwrap(),
            Awaited::Response(CommandResponse::Ack("E".into()))
        );
    }
}

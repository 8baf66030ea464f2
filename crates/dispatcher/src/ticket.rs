use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};

/// An in-flight dispatch. See `SPEC_FULL.md` §3.
#[derive(Debug, Clone)]
pub struct StreamTicket {
    pub ticket_id: String,
    pub reply_subject: String,
    pub ack_subject: String,
    pub owner: String,
    pub conversation_id: String,
    pub created_at: Instant,
    pub submitted_at: DateTime<Utc>,
    pub deadline: Instant,
}

impl StreamTicket {
    pub fn new(owner: String, conversation_id: String, total_timeout: Duration) -> Self {
        let ticket_id = Uuid::new_v4().to_string();
        let now = Instant::now();
        Self {
            reply_subject: relaygate_protocol::reply_subject(&ticket_id),
            ack_subject: relaygate_protocol::ack_subject(&ticket_id),
            ticket_id,
            owner,
            conversation_id,
            created_at: now,
            submitted_at: Utc::now(),
            deadline: now + total_timeout,
        }
    }
}

/// Shared registry enforcing the invariant that at most one `StreamTicket`
/// is active per `(owner, conversation_id)` (`SPEC_FULL.md` §4.D.1/§5).
/// The same lock guards the conflict check and the mutation, so two
/// concurrent admissions for the same key never both succeed.
#[derive(Default)]
pub struct TicketRegistry {
    active: Mutex<HashMap<(String, String), String>>,
}

impl TicketRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically check-and-insert. Fails with `Conflict` if a ticket is
    /// already active for this `(owner, conversation_id)`.
    pub fn admit(&self, owner: &str, conversation_id: &str, ticket_id: &str) -> Result<()> {
        let mut guard = self
            .active
            .lock()
            .map_err(|_| Error::Internal("ticket registry poisoned".to_string()))?;
        let key = (owner.to_string(), conversation_id.to_string());
        if guard.contains_key(&key) {
            return Err(Error::Conflict);
        }
        guard.insert(key, ticket_id.to_string());
        Ok(())
    }

    /// Remove the active entry for this key. A no-op (and success) if the
    /// ticket is already gone — cancellation/retirement is idempotent.
    pub fn retire(&self, owner: &str, conversation_id: &str) {
        if let Ok(mut guard) = self.active.lock() {
            guard.remove(&(owner.to_string(), conversation_id.to_string()));
        }
    }

    #[must_use]
    pub fn is_active(&self, owner: &str, conversation_id: &str) -> bool {
        self.active
            .lock()
            .map(|guard| guard.contains_key(&(owner.to_string(), conversation_id.to_string())))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_admit_for_same_key_conflicts() {
        let registry = TicketRegistry::new();
        registry.admit("alice", "r1", "t1").unwrap();
        assert_eq!(registry.admit("alice", "r1", "t2").unwrap_err(), Error::Conflict);
    }

    #[test]
    fn retire_then_admit_succeeds() {
        let registry = TicketRegistry::new();
        registry.admit("alice", "r1", "t1").unwrap();
        registry.retire("alice", "r1");
        assert!(registry.admit("alice", "r1", "t2").is_ok());
    }

    #[test]
    fn retire_on_untracked_key_is_a_no_op() {
        let registry = TicketRegistry::new();
        registry.retire("nobody", "nothing");
    }

    #[test]
    fn distinct_conversations_do_not_conflict() {
        let registry = TicketRegistry::new();
        registry.admit("alice", "r1", "t1").unwrap();
        assert!(registry.admit("alice", "r2", "t2").is_ok());
        assert!(registry.admit("bob", "r1", "t3").is_ok());
    }
}

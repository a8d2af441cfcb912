//! Outstanding teleport requests
//!
//! Tickets live on the node hosting the invited player and are keyed by
//! that player's lowercased name. A newer request for the same player
//! silently replaces the older one.
//!
//! Expiry is enforced twice: `take` refuses a ticket whose deadline has
//! passed, and a periodic `sweep` drops the ones nobody read.

use dashmap::DashMap;
use shared::{name_key, PlayerRef};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub struct TpaTicket {
    pub requester: PlayerRef,
    /// The requester asked the target to come to them
    pub here: bool,
    pub expires_at: Instant,
}

impl TpaTicket {
    pub fn new(requester: PlayerRef, here: bool, ttl: Duration) -> Self {
        Self {
            requester,
            here,
            expires_at: Instant::now() + ttl,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

#[derive(Debug, Clone, Default)]
pub struct TicketStore {
    tickets: Arc<DashMap<String, TpaTicket>>,
}

impl TicketStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Files `ticket` for `target`. Returns the ticket it replaced, if any.
    pub fn issue(&self, target: &str, ticket: TpaTicket) -> Option<TpaTicket> {
        self.tickets.insert(name_key(target), ticket)
    }

    /// Removes the ticket for `target` and returns it if still valid at `now`.
    pub fn take(&self, target: &str, now: Instant) -> Option<TpaTicket> {
        self.tickets
            .remove(&name_key(target))
            .map(|(_, ticket)| ticket)
            .filter(|ticket| !ticket.is_expired(now))
    }

    /// Drops expired tickets. Returns how many were removed.
    pub fn sweep(&self, now: Instant) -> usize {
        let before = self.tickets.len();
        self.tickets.retain(|_, ticket| !ticket.is_expired(now));
        before.saturating_sub(self.tickets.len())
    }

    pub fn contains(&self, target: &str) -> bool {
        self.tickets.contains_key(&name_key(target))
    }

    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket(name: &str, secs: u64) -> TpaTicket {
        TpaTicket::new(PlayerRef::new(name, name), false, Duration::from_secs(secs))
    }

    #[tokio::test(start_paused = true)]
    async fn test_issue_keys_by_lowercase_target() {
        let store = TicketStore::new();
        store.issue("Carol", ticket("Bob", 60));

        assert!(store.contains("carol"));
        let taken = store.take("CAROL", Instant::now()).unwrap();
        assert_eq!(taken.requester.name, "Bob");
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_request_replaces_older() {
        let store = TicketStore::new();
        store.issue("Dave", ticket("Eve", 60));
        let replaced = store.issue("dave", ticket("Frank", 60)).unwrap();

        assert_eq!(replaced.requester.name, "Eve");
        assert_eq!(store.len(), 1);
        let taken = store.take("Dave", Instant::now()).unwrap();
        assert_eq!(taken.requester.name, "Frank");
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_after_expiry_is_absent() {
        let store = TicketStore::new();
        store.issue("Carol", ticket("Bob", 60));

        tokio::time::advance(Duration::from_secs(60)).await;
        // exactly at the deadline the ticket still counts
        assert!(!store.tickets.get("carol").unwrap().is_expired(Instant::now()));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(store.take("Carol", Instant::now()).is_none());
        // a stale read still consumes the ticket
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_only_expired() {
        let store = TicketStore::new();
        store.issue("short", ticket("a", 5));
        store.issue("long", ticket("b", 60));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(store.sweep(Instant::now()), 1);
        assert!(!store.contains("short"));
        assert!(store.contains("long"));
    }
}

//! Single-flight execution for concurrent cache misses.
//!
//! The first real-time miss for a key becomes the leader and runs the query.
//! Misses that arrive while it is in flight subscribe to its result instead of
//! executing again. If the leader is dropped without completing, the channel
//! closes and followers run the query themselves.

use super::CacheKey;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use qg_core::{QueryError, Row};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

pub type FlightResult = Result<Arc<Vec<Row>>, QueryError>;

type InFlight = DashMap<CacheKey, broadcast::Sender<FlightResult>>;

#[derive(Debug, Default, Clone, Serialize, PartialEq)]
pub struct CoalescerStats {
    pub total_requests: u64,
    pub coalesced_requests: u64,
    pub new_requests: u64,
    pub in_flight: usize,
}

pub struct Coalescer {
    in_flight: Arc<InFlight>,
    total_requests: AtomicU64,
    coalesced_requests: AtomicU64,
    new_requests: AtomicU64,
}

pub enum Registration {
    /// Run the query and call [`Flight::complete`].
    Leader(Flight),
    /// Wait for the leader's result.
    Follower(broadcast::Receiver<FlightResult>),
}

impl Coalescer {
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(DashMap::new()),
            total_requests: AtomicU64::new(0),
            coalesced_requests: AtomicU64::new(0),
            new_requests: AtomicU64::new(0),
        }
    }

    pub fn register(&self, key: &CacheKey) -> Registration {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        // Entry API makes check-and-insert atomic
        match self.in_flight.entry(key.clone()) {
            Entry::Occupied(entry) => {
                self.coalesced_requests.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Coalescing with in-flight execution");
                Registration::Follower(entry.get().subscribe())
            }
            Entry::Vacant(entry) => {
                let (tx, _rx) = broadcast::channel(1);
                entry.insert(tx.clone());
                self.new_requests.fetch_add(1, Ordering::Relaxed);
                Registration::Leader(Flight {
                    key: key.clone(),
                    in_flight: self.in_flight.clone(),
                    tx,
                    done: false,
                })
            }
        }
    }

    pub fn stats(&self) -> CoalescerStats {
        CoalescerStats {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            coalesced_requests: self.coalesced_requests.load(Ordering::Relaxed),
            new_requests: self.new_requests.load(Ordering::Relaxed),
            in_flight: self.in_flight_count(),
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

impl Default for Coalescer {
    fn default() -> Self {
        Self::new()
    }
}

/// Leadership of one in-flight key. Dropping it without `complete` releases
/// the key and closes the channel.
pub struct Flight {
    key: CacheKey,
    in_flight: Arc<InFlight>,
    tx: broadcast::Sender<FlightResult>,
    done: bool,
}

impl Flight {
    /// Release the key and hand `result` to every follower.
    pub fn complete(mut self, result: FlightResult) {
        self.done = true;
        // Removing first means a later miss starts a fresh flight
        self.in_flight.remove(&self.key);
        let waiters = self.tx.receiver_count();
        if waiters > 0 {
            debug!(key = %self.key, waiters, "Broadcasting result to coalesced requests");
        }
        let _ = self.tx.send(result);
    }
}

impl Drop for Flight {
    fn drop(&mut self) {
        if !self.done {
            self.in_flight.remove(&self.key);
            debug!(key = %self.key, "Leader dropped before completing");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(q: &str) -> CacheKey {
        CacheKey::new("acme", q)
    }

    fn sample() -> Arc<Vec<Row>> {
        Arc::new(vec![json!({ "id": 5 }).as_object().unwrap().clone()])
    }

    #[tokio::test]
    async fn test_first_is_leader_second_follows() {
        let coalescer = Coalescer::new();
        let first = coalescer.register(&key("q"));
        let second = coalescer.register(&key("q"));
        assert!(matches!(first, Registration::Leader(_)));
        assert!(matches!(second, Registration::Follower(_)));
        assert!(matches!(coalescer.register(&key("other")), Registration::Leader(_)));
    }

    #[tokio::test]
    async fn test_followers_receive_leader_result() {
        let coalescer = Coalescer::new();
        let Registration::Leader(flight) = coalescer.register(&key("q")) else {
            panic!("expected leader");
        };
        let followers: Vec<_> = (0..3)
            .map(|_| match coalescer.register(&key("q")) {
                Registration::Follower(rx) => rx,
                Registration::Leader(_) => panic!("expected follower"),
            })
            .collect();

        flight.complete(Ok(sample()));
        for mut rx in followers {
            assert_eq!(rx.recv().await.unwrap().unwrap(), sample());
        }
        assert_eq!(coalescer.in_flight_count(), 0);

        let stats = coalescer.stats();
        assert_eq!(stats.total_requests, 4);
        assert_eq!(stats.coalesced_requests, 3);
        assert_eq!(stats.new_requests, 1);
    }

    #[tokio::test]
    async fn test_errors_are_shared_too() {
        let coalescer = Coalescer::new();
        let Registration::Leader(flight) = coalescer.register(&key("q")) else {
            panic!("expected leader");
        };
        let Registration::Follower(mut rx) = coalescer.register(&key("q")) else {
            panic!("expected follower");
        };
        flight.complete(Err(QueryError::Execution("boom".into())));
        assert_eq!(
            rx.recv().await.unwrap(),
            Err(QueryError::Execution("boom".into()))
        );
    }

    #[tokio::test]
    async fn test_dropped_leader_closes_channel_and_frees_key() {
        let coalescer = Coalescer::new();
        let leader = coalescer.register(&key("q"));
        let Registration::Follower(mut rx) = coalescer.register(&key("q")) else {
            panic!("expected follower");
        };

        drop(leader);
        assert!(rx.recv().await.is_err());
        assert_eq!(coalescer.in_flight_count(), 0);
        assert!(matches!(coalescer.register(&key("q")), Registration::Leader(_)));
    }
}

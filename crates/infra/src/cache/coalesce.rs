//! In-flight request table: one loader per key, outcome shared by all callers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

/// Result of a coalesced load, as seen by every waiter
#[derive(Debug, Clone)]
pub(crate) enum LoadOutcome {
    /// Serialized value produced by the leader
    Loaded(Arc<Vec<u8>>),
    /// The loader failed with this message
    Failed(String),
    /// The leader went away before finishing
    Cancelled,
}

#[derive(Debug)]
pub(crate) struct InFlight {
    tx: watch::Sender<Option<LoadOutcome>>,
    waiters: AtomicUsize,
}

pub(crate) enum Role {
    Leader(LeaderGuard),
    Follower(Follower),
}

#[derive(Debug, Default)]
pub(crate) struct InFlightTable {
    flights: Mutex<HashMap<String, Arc<InFlight>>>,
}

impl InFlightTable {
    /// Join the load for `key`, becoming its leader if none is running.
    pub(crate) fn join(self: &Arc<Self>, key: &str) -> Role {
        let mut flights = self.flights.lock();
        if let Some(flight) = flights.get(key) {
            flight.waiters.fetch_add(1, Ordering::SeqCst);
            return Role::Follower(Follower {
                rx: flight.tx.subscribe(),
                flight: Arc::clone(flight),
            });
        }

        let (tx, _rx) = watch::channel(None);
        let flight = Arc::new(InFlight { tx, waiters: AtomicUsize::new(0) });
        flights.insert(key.to_string(), Arc::clone(&flight));
        Role::Leader(LeaderGuard {
            table: Arc::clone(self),
            key: key.to_string(),
            flight,
            published: false,
        })
    }

    /// Keys with a load in progress
    pub(crate) fn len(&self) -> usize {
        self.flights.lock().len()
    }

    /// Followers currently waiting on `key`
    pub(crate) fn waiters(&self, key: &str) -> usize {
        self.flights.lock().get(key).map_or(0, |f| f.waiters.load(Ordering::SeqCst))
    }

    fn finish(&self, key: &str, flight: &Arc<InFlight>) {
        let mut flights = self.flights.lock();
        if flights.get(key).is_some_and(|current| Arc::ptr_eq(current, flight)) {
            flights.remove(key);
        }
    }
}

/// Held by the caller running the loader.
///
/// Dropping it without [`complete`](Self::complete) publishes
/// [`LoadOutcome::Cancelled`]; waiting followers then rejoin and one of
/// them takes over the load.
pub(crate) struct LeaderGuard {
    table: Arc<InFlightTable>,
    key: String,
    flight: Arc<InFlight>,
    published: bool,
}

impl LeaderGuard {
    pub(crate) fn complete(mut self, outcome: LoadOutcome) {
        self.publish(outcome);
    }

    fn publish(&mut self, outcome: LoadOutcome) {
        if self.published {
            return;
        }
        self.published = true;
        // Unregister first so late arrivals start a fresh load instead of
        // subscribing to a finished one.
        self.table.finish(&self.key, &self.flight);
        self.flight.tx.send_replace(Some(outcome));
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        if !self.published {
            tracing::debug!(key = %self.key, "coalescing leader dropped before completing");
            self.publish(LoadOutcome::Cancelled);
        }
    }
}

pub(crate) struct Follower {
    rx: watch::Receiver<Option<LoadOutcome>>,
    flight: Arc<InFlight>,
}

impl Follower {
    /// Wait for the leader's outcome
    pub(crate) async fn wait(mut self) -> LoadOutcome {
        let published = self.rx.wait_for(Option::is_some).await.map(|value| (*value).clone());
        published.ok().flatten().unwrap_or(LoadOutcome::Cancelled)
    }
}

impl Drop for Follower {
    fn drop(&mut self) {
        self.flight.waiters.fetch_sub(1, Ordering::SeqCst);
    }
}

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::store::types::Spool;

/// Outcome of one de-duplicated peer fetch, shared by every concurrent caller
/// of the same key.
#[derive(Clone)]
pub enum FetchOutcome {
    /// The blob landed in the local store (owner path, read-repair).
    Stored,
    /// The blob was spooled for serve-and-discard (non-owner path).
    Spooled(Arc<Spool>),
    /// No reachable owner had the key.
    Miss,
}

/// Collapses concurrent fetches of the same key into a single unit of work.
/// The first caller becomes the leader and runs the fetch; everyone else
/// waits on the leader's broadcast.
pub struct SingleFlight {
    calls: DashMap<String, broadcast::Sender<FetchOutcome>>,
}

impl Default for SingleFlight {
    fn default() -> Self {
        Self::new()
    }
}

impl SingleFlight {
    pub fn new() -> Self {
        Self {
            calls: DashMap::new(),
        }
    }

    pub async fn run<F, Fut>(&self, key: &str, fetch: F) -> FetchOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FetchOutcome>,
    {
        let tx = match self.calls.entry(key.to_string()) {
            Entry::Occupied(occupied) => {
                let mut rx = occupied.get().subscribe();
                drop(occupied);
                return match rx.recv().await {
                    Ok(outcome) => outcome,
                    // Leader went away without a result; a miss is always a
                    // legal answer and the next caller starts a fresh flight.
                    Err(_) => FetchOutcome::Miss,
                };
            }
            Entry::Vacant(vacant) => {
                let (tx, _rx) = broadcast::channel(1);
                vacant.insert(tx.clone());
                tx
            }
        };

        // Leader path. The guard unregisters the flight even if the fetch is
        // cancelled mid-await, so waiters never hang on a dead leader.
        let cleanup = Cleanup {
            calls: &self.calls,
            key: key.to_string(),
        };
        let outcome = fetch().await;
        drop(cleanup);
        let _ = tx.send(outcome.clone());
        outcome
    }

    #[cfg(test)]
    pub(crate) fn in_flight(&self) -> usize {
        self.calls.len()
    }
}

struct Cleanup<'a> {
    calls: &'a DashMap<String, broadcast::Sender<FetchOutcome>>,
    key: String,
}

impl Drop for Cleanup<'_> {
    fn drop(&mut self) {
        self.calls.remove(&self.key);
    }
}

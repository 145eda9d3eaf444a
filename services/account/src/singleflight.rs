//! Duplicate call suppression
//!
//! [`Group::work`] collapses concurrent calls for the same key into one
//! execution. The work runs on its own task, so a caller that gives up
//! waiting (its future is dropped or times out) does not cancel it for the
//! others.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::watch;

/// The shared execution ended without producing a value
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("shared call was abandoned before completing")]
pub struct Abandoned;

type Calls<K, V> = Arc<Mutex<HashMap<K, watch::Receiver<Option<V>>>>>;

fn lock<K, V>(calls: &Calls<K, V>) -> MutexGuard<'_, HashMap<K, watch::Receiver<Option<V>>>> {
    calls.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registration of one in-flight call
///
/// Dropping it unregisters the key before the sender goes away, so a call
/// that panics leaves no stale entry behind.
struct Flight<K: Eq + Hash, V> {
    calls: Calls<K, V>,
    key: K,
    tx: watch::Sender<Option<V>>,
}

impl<K: Eq + Hash, V> Drop for Flight<K, V> {
    fn drop(&mut self) {
        lock(&self.calls).remove(&self.key);
    }
}

/// A group of in-flight calls keyed by `K`, each producing a `V`
pub struct Group<K, V> {
    calls: Calls<K, V>,
}

impl<K, V> Default for Group<K, V> {
    fn default() -> Self {
        Self {
            calls: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K, V> Group<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` for `key` unless a call for it is already in flight, in
    /// which case wait for that call's value instead
    ///
    /// `work` is only invoked by the caller that starts the flight.
    pub async fn work<F, Fut>(&self, key: K, work: F) -> Result<V, Abandoned>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let (mut rx, starter) = {
            let mut calls = lock(&self.calls);
            match calls.get(&key) {
                Some(rx) => (rx.clone(), None),
                None => {
                    let (tx, rx) = watch::channel(None);
                    calls.insert(key.clone(), rx.clone());
                    (rx, Some(tx))
                }
            }
        };

        // `work` runs outside the lock; the flight's drop takes it again
        if let Some(tx) = starter {
            let flight = Flight {
                calls: Arc::clone(&self.calls),
                key,
                tx,
            };
            let fut = work();
            tokio::spawn(async move {
                let value = fut.await;
                let _ = flight.tx.send(Some(value));
                drop(flight);
            });
        }

        let value = rx.wait_for(Option::is_some).await.map_err(|_| Abandoned)?;
        value.clone().ok_or(Abandoned)
    }

    /// Number of calls currently in flight
    pub fn in_flight(&self) -> usize {
        lock(&self.calls).len()
    }
}

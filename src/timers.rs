//! Keyed, cancellable deadlines.
//!
//! DESIGN
//! ======
//! `Deadlines<K>` is an expiring-entry map: each key owns at most one
//! pending task that runs once its deadline passes. Scheduling a key that
//! is already pending replaces (and aborts) the previous task; cancelling
//! removes and aborts it. Room idle cleanup and player grace periods both
//! use this type, keyed by room code and connection id respectively.
//!
//! Each entry carries a sequence number. A task that wakes up only runs
//! its body if its entry is still the current one for the key, so a
//! reschedule racing with an expiry never fires the stale body.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::AbortHandle;
use tokio::time::Instant;

pub struct Deadlines<K> {
    inner: Arc<Mutex<DeadlinesInner<K>>>,
}

struct DeadlinesInner<K> {
    next_seq: u64,
    entries: HashMap<K, Entry>,
}

struct Entry {
    seq: u64,
    deadline: Instant,
    handle: AbortHandle,
}

impl<K> Clone for Deadlines<K> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<K> Default for Deadlines<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Deadlines<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(DeadlinesInner { next_seq: 0, entries: HashMap::new() })) }
    }

    /// Run `task` after `delay` unless the key is cancelled or rescheduled first.
    pub fn schedule<F>(&self, key: K, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let deadline = Instant::now() + delay;
        let mut inner = self.lock();
        inner.next_seq += 1;
        let seq = inner.next_seq;

        let this = self.clone();
        let fire_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if this.claim(&fire_key, seq) {
                task.await;
            }
        })
        .abort_handle();

        if let Some(previous) = inner.entries.insert(key, Entry { seq, deadline, handle }) {
            previous.handle.abort();
        }
    }

    /// Cancel a pending deadline. Returns whether one was pending.
    pub fn cancel(&self, key: &K) -> bool {
        let Some(entry) = self.lock().entries.remove(key) else {
            return false;
        };
        entry.handle.abort();
        true
    }

    /// Cancel every pending deadline.
    pub fn cancel_all(&self) {
        let drained: Vec<Entry> = self.lock().entries.drain().map(|(_, e)| e).collect();
        for entry in drained {
            entry.handle.abort();
        }
    }

    #[cfg(test)]
    #[must_use]
    pub fn is_pending(&self, key: &K) -> bool {
        self.lock().entries.contains_key(key)
    }

    #[must_use]
    pub fn deadline(&self, key: &K) -> Option<Instant> {
        self.lock().entries.get(key).map(|e| e.deadline)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove the entry if it is still the one scheduled as `seq`.
    fn claim(&self, key: &K, seq: u64) -> bool {
        let mut inner = self.lock();
        match inner.entries.get(key) {
            Some(entry) if entry.seq == seq => {
                inner.entries.remove(key);
                true
            }
            _ => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, DeadlinesInner<K>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[path = "timers_test.rs"]
mod tests;

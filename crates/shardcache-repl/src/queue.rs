//! Deduplicating work queue keyed by resource identity.
//!
//! Semantics follow the classic controller work queue:
//! - a key is pending at most once, however many times it is added;
//! - a key handed to a worker is "processing" until the worker calls
//!   [`WorkQueue::done`]; adds in the meantime mark it dirty and it is
//!   re-queued on `done`, so a key is never processed by two workers at once;
//! - failed keys are re-added after a per-key exponential backoff.

use crate::backoff::{BackoffConfig, ItemBackoff};
use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

#[derive(Debug)]
struct QueueState<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    shutting_down: bool,
}

struct Inner<K> {
    state: Mutex<QueueState<K>>,
    backoff: Mutex<ItemBackoff<K>>,
    notify: Notify,
}

/// Cloneable handle to a shared work queue.
pub struct WorkQueue<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    /// Create an empty queue with the given retry backoff.
    pub fn new(backoff: BackoffConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    shutting_down: false,
                }),
                backoff: Mutex::new(ItemBackoff::new(backoff)),
                notify: Notify::new(),
            }),
        }
    }

    /// Enqueue `key` unless it is already pending. Ignored after shutdown.
    pub async fn add(&self, key: K) {
        let mut state = self.inner.state.lock().await;
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.inner.state.lock().await;
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    if !state.queue.is_empty() {
                        self.inner.notify.notify_one();
                    }
                    return Some(key);
                }
            }
            notified.await;
        }
    }

    /// Mark `key` as no longer processing; re-queues it if it was added meanwhile.
    pub async fn done(&self, key: &K) {
        let mut state = self.inner.state.lock().await;
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Enqueue `key` after `delay`.
    pub fn add_after(&self, key: K, delay: Duration) {
        let queue = self.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            queue.add(key).await;
        });
    }

    /// Enqueue `key` after its next backoff delay. Returns the delay used.
    pub async fn add_rate_limited(&self, key: K) -> Duration {
        let delay = self.inner.backoff.lock().await.next_delay(&key);
        self.add_after(key, delay);
        delay
    }

    /// Reset the backoff history of `key`.
    pub async fn forget(&self, key: &K) {
        self.inner.backoff.lock().await.forget(key);
    }

    /// Consecutive rate-limited re-queues of `key` since it was last forgotten.
    pub async fn num_requeues(&self, key: &K) -> u32 {
        self.inner.backoff.lock().await.failures(key)
    }

    /// Number of pending (not processing) keys.
    pub async fn len(&self) -> usize {
        self.inner.state.lock().await.queue.len()
    }

    /// Returns true if no key is pending.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of keys currently handed out to workers.
    pub async fn processing(&self) -> usize {
        self.inner.state.lock().await.processing.len()
    }

    /// Stop handing out keys and wake every waiting worker.
    pub async fn shut_down(&self) {
        self.inner.state.lock().await.shutting_down = true;
        self.inner.notify.notify_waiters();
    }

    /// Returns true once [`shut_down`](Self::shut_down) has been called.
    pub async fn is_shutting_down(&self) -> bool {
        self.inner.state.lock().await.shutting_down
    }
}

//! Rate limited work queue deduplicating items by key.
//!
//! An item added while another one with the same key is still pending gets
//! merged into it. An item added while its key is being processed is parked
//! until [`WorkQueue::done`] is called for that key, so a single key is never
//! handed to two consumers at once.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use log::debug;
use tokio::sync::Notify;

use self::rate_limiter::RateLimiter;

pub mod rate_limiter;

pub trait QueueItem: Send + 'static {
    fn key(&self) -> &str;
    /// Merges a newer item with the same key into the pending one.
    fn coalesce(self, newer: Self) -> Self;
}

pub struct WorkQueue<T> {
    shared: Arc<Shared<T>>,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    notify: Notify,
}

struct State<T> {
    order: VecDeque<String>,
    pending: HashMap<String, T>,
    processing: HashSet<String>,
    parked: HashMap<String, T>,
    limiter: RateLimiter,
    shutting_down: bool,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: QueueItem> WorkQueue<T> {
    pub fn new(retry_base_delay: Duration, retry_max_delay: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    order: VecDeque::new(),
                    pending: HashMap::new(),
                    processing: HashSet::new(),
                    parked: HashMap::new(),
                    limiter: RateLimiter::new(retry_base_delay, retry_max_delay),
                    shutting_down: false,
                }),
                notify: Notify::new(),
            }),
        }
    }

    pub fn add(&self, item: T) {
        let mut state = self.lock();

        if state.shutting_down {
            debug!("Queue is shutting down, dropping '{}'!", item.key());
            return;
        }

        let key = item.key().to_owned();

        if state.processing.contains(&key) {
            let parked = match state.parked.remove(&key) {
                Some(parked) => parked.coalesce(item),
                None => item,
            };
            state.parked.insert(key, parked);
            return;
        }

        match state.pending.remove(&key) {
            Some(pending) => {
                state.pending.insert(key, pending.coalesce(item));
            }
            None => {
                state.pending.insert(key.clone(), item);
                state.order.push_back(key);
                drop(state);
                self.shared.notify.notify_one();
            }
        }
    }

    /// Waits for the next item. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.shared.notify.notified();

            {
                let mut state = self.lock();

                while let Some(key) = state.order.pop_front() {
                    if let Some(item) = state.pending.remove(&key) {
                        state.processing.insert(key);
                        return Some(item);
                    }
                }

                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Marks the key as processed, re-queueing whatever got parked meanwhile.
    pub fn done(&self, key: &str) {
        let mut state = self.lock();

        state.processing.remove(key);

        if let Some(item) = state.parked.remove(key) {
            if state.shutting_down {
                return;
            }

            state.pending.insert(key.to_owned(), item);
            state.order.push_back(key.to_owned());
            drop(state);
            self.shared.notify.notify_one();
        }
    }

    /// Adds the item back after the key's backoff delay has passed.
    pub fn add_rate_limited(&self, item: T) {
        let delay = self.lock().limiter.when(item.key());
        let queue = self.clone();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(item);
        });
    }

    pub fn num_requeues(&self, key: &str) -> u32 {
        self.lock().limiter.num_requeues(key)
    }

    /// Stops tracking failures of the key.
    pub fn forget(&self, key: &str) {
        self.lock().limiter.forget(key);
    }

    /// Number of items waiting to be picked up.
    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wakes every consumer. Pending items are abandoned.
    pub fn shut_down(&self) {
        let mut state = self.lock();
        state.shutting_down = true;
        state.order.clear();
        state.pending.clear();
        state.parked.clear();
        drop(state);

        self.shared.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    #[derive(Debug, PartialEq)]
    struct Item {
        key: String,
        payload: Vec<u32>,
    }

    fn item(key: &str, payload: u32) -> Item {
        Item {
            key: key.to_owned(),
            payload: vec![payload],
        }
    }

    impl QueueItem for Item {
        fn key(&self) -> &str {
            &self.key
        }

        fn coalesce(mut self, mut newer: Self) -> Self {
            self.payload.append(&mut newer.payload);
            self
        }
    }

    fn queue() -> WorkQueue<Item> {
        WorkQueue::new(Duration::from_millis(1), Duration::from_millis(10))
    }

    #[tokio::test]
    async fn same_key_is_coalesced_while_pending() {
        let queue = queue();

        queue.add(item("a", 1));
        queue.add(item("b", 2));
        queue.add(item("a", 3));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.get().await.unwrap().payload, vec![1, 3]);
        assert_eq!(queue.get().await.unwrap().payload, vec![2]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn key_in_processing_is_parked_until_done() {
        let queue = queue();

        queue.add(item("a", 1));
        let first = queue.get().await.unwrap();
        queue.add(item("a", 2));

        assert!(queue.is_empty());

        queue.done(&first.key);

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await.unwrap().payload, vec![2]);
    }

    #[tokio::test]
    async fn waiting_consumer_is_woken_by_add() {
        let queue = queue();
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };

        tokio::task::yield_now().await;
        queue.add(item("a", 1));

        let received = timeout(Duration::from_secs(1), consumer).await.unwrap().unwrap();
        assert_eq!(received, Some(item("a", 1)));
    }

    #[tokio::test]
    async fn shut_down_releases_waiting_consumers() {
        let queue = queue();
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };

        tokio::task::yield_now().await;
        queue.shut_down();
        queue.add(item("a", 1));

        let received = timeout(Duration::from_secs(1), consumer).await.unwrap().unwrap();
        assert_eq!(received, None);
        assert!(queue.is_shutting_down());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn rate_limited_items_come_back_and_count_requeues() {
        let queue = queue();

        queue.add_rate_limited(item("a", 1));
        queue.add_rate_limited(item("b", 1));

        assert_eq!(queue.num_requeues("a"), 1);

        let first = timeout(Duration::from_secs(1), queue.get()).await.unwrap();
        assert!(first.is_some());

        queue.forget("a");
        assert_eq!(queue.num_requeues("a"), 0);
        assert_eq!(queue.num_requeues("b"), 1);
    }
}

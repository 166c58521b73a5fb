// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deduplicating work queue with a fixed pool of worker tasks.
//!
//! Each item is an operation ID. An ID is never processed by two workers at
//! once:
//!
//! - adding an ID that is already queued is a no-op;
//! - adding an ID that is being processed marks it dirty, and it is queued
//!   again exactly once when the current run finishes.
//!
//! Errors and panics from the executor are logged and the item is dropped.
//! Nothing is re-queued automatically.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::error::Result;

/// Something that can process one queued operation ID.
#[async_trait]
pub trait Executor: Send + Sync + 'static {
    /// Process the operation. Called by exactly one worker at a time per ID.
    async fn execute(&self, operation_id: &str) -> Result<()>;
}

#[derive(Debug, Default)]
struct QueueState {
    queue: VecDeque<String>,
    /// IDs waiting to be processed, queued or not.
    dirty: HashSet<String>,
    processing: HashSet<String>,
    shutting_down: bool,
}

/// Bounded, deduplicating dispatcher in front of an [`Executor`].
pub struct Queue {
    name: String,
    executor: Arc<dyn Executor>,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl Queue {
    /// Create a queue feeding `executor`.
    pub fn new(name: impl Into<String>, executor: Arc<dyn Executor>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            executor,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        })
    }

    /// Queue name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add an operation ID.
    ///
    /// Returns `false` when the ID was already waiting or the queue is
    /// shutting down.
    pub fn add(&self, operation_id: impl Into<String>) -> bool {
        let operation_id = operation_id.into();
        let mut state = self.lock();

        if state.shutting_down {
            warn!(queue = %self.name, operation_id = %operation_id, "Queue is shutting down, item rejected");
            return false;
        }
        if !state.dirty.insert(operation_id.clone()) {
            return false;
        }
        if state.processing.contains(&operation_id) {
            debug!(queue = %self.name, operation_id = %operation_id, "Item in flight, will run again");
            return true;
        }

        state.queue.push_back(operation_id);
        drop(state);
        self.notify.notify_one();
        true
    }

    /// Number of items waiting to be picked up.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    /// True when no item is waiting to be picked up.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once [`shut_down`](Self::shut_down) was called.
    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    /// Stop accepting items. Queued items still drain, then workers exit.
    pub fn shut_down(&self) {
        let mut state = self.lock();
        if state.shutting_down {
            return;
        }
        state.shutting_down = true;
        drop(state);
        info!(queue = %self.name, "Queue shutting down");
        self.notify.notify_waiters();
    }

    /// Wait for the next item. Returns `None` once shut down and drained.
    async fn get(&self) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(operation_id) = state.queue.pop_front() {
                    state.dirty.remove(&operation_id);
                    state.processing.insert(operation_id.clone());
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        self.notify.notify_one();
                    }
                    return Some(operation_id);
                }
                if state.shutting_down {
                    drop(state);
                    // Let the other idle workers see the shutdown too.
                    self.notify.notify_one();
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Mark an item as processed, re-queuing it if it was added meanwhile.
    fn done(&self, operation_id: &str) {
        let mut state = self.lock();
        state.processing.remove(operation_id);
        if state.dirty.contains(operation_id) {
            state.queue.push_back(operation_id.to_string());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Start `workers` worker tasks.
    ///
    /// The queue shuts down when `shutdown` turns `true` or its sender is
    /// dropped. Use [`QueueHandle::wait`] to join the workers.
    pub fn run(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>, workers: usize) -> QueueHandle {
        let workers = workers.max(1);
        info!(queue = %self.name, workers, "Starting queue workers");

        let handles = (0..workers)
            .map(|worker| {
                let queue = Arc::clone(self);
                let span = info_span!("queue_worker", queue = %self.name, worker);
                tokio::spawn(async move { queue.worker_loop().await }.instrument(span))
            })
            .collect();

        let queue = Arc::clone(self);
        let watcher = tokio::spawn(async move {
            while !*shutdown.borrow_and_update() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
            queue.shut_down();
        });

        QueueHandle {
            workers: handles,
            watcher,
        }
    }

    async fn worker_loop(self: Arc<Self>) {
        while let Some(operation_id) = self.get().await {
            let executor = Arc::clone(&self.executor);
            let id = operation_id.clone();
            // A separate task so a panicking executor does not take the worker down.
            let outcome = tokio::spawn(async move { executor.execute(&id).await }).await;

            match outcome {
                Ok(Ok(())) => {
                    debug!(operation_id = %operation_id, "Item processed");
                }
                Ok(Err(e)) => {
                    error!(operation_id = %operation_id, error = %e, "Executor returned an error, dropping item");
                }
                Err(e) if e.is_panic() => {
                    error!(operation_id = %operation_id, "Executor panicked, dropping item");
                }
                Err(e) => {
                    error!(operation_id = %operation_id, error = %e, "Executor task was cancelled");
                }
            }

            self.done(&operation_id);
        }
        debug!("Worker exiting");
    }
}

/// Join handle for the workers started by [`Queue::run`].
pub struct QueueHandle {
    workers: Vec<JoinHandle<()>>,
    watcher: JoinHandle<()>,
}

impl QueueHandle {
    /// Wait until every worker has exited.
    pub async fn wait(self) {
        for handle in self.workers {
            if let Err(e) = handle.await {
                error!("Queue worker task panicked: {}", e);
            }
        }
        self.watcher.abort();
    }

    /// True once every worker has exited.
    pub fn is_finished(&self) -> bool {
        self.workers.iter().all(JoinHandle::is_finished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Executor for Counter {
        async fn execute(&self, _operation_id: &str) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_add_coalesces_queued_items() {
        let queue = Queue::new("test", Arc::new(Counter::default()));

        assert!(queue.add("a"));
        assert!(!queue.add("a"));
        assert!(queue.add("b"));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_add_rejected_after_shutdown() {
        let queue = Queue::new("test", Arc::new(Counter::default()));
        queue.shut_down();

        assert!(queue.is_shutting_down());
        assert!(!queue.add("a"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_get_done_requeues_dirty_item() {
        let queue = Queue::new("test", Arc::new(Counter::default()));
        queue.add("a");

        let item = queue.get().await.unwrap();
        assert_eq!(item, "a");
        assert!(queue.is_empty());

        // Added while in flight: not queued until done.
        assert!(queue.add("a"));
        assert!(!queue.add("a"));
        assert!(queue.is_empty());

        queue.done("a");
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await.as_deref(), Some("a"));
        queue.done("a");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_get_returns_none_after_drain() {
        let queue = Queue::new("test", Arc::new(Counter::default()));
        queue.add("a");
        queue.shut_down();

        assert_eq!(queue.get().await.as_deref(), Some("a"));
        queue.done("a");
        assert_eq!(queue.get().await, None);
    }
}

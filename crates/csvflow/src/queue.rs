//! Bounded work queue between the producer and the worker pool.
//!
//! Producer-fed batches travel on a bounded channel so a fast parser is held
//! back by slow writers. Batches put back by workers after a failed write use
//! a separate retry lane, which workers drain first. A worker never blocks on
//! a full producer lane while holding a batch, so the pool cannot wedge itself.
//!
//! Every batch handed to the queue stays "pending" until a consumer calls
//! [`WorkQueue::task_done`] for it; [`WorkQueue::join`] waits for that count
//! to reach zero. [`WorkQueue::close`] turns producers away, including ones
//! already blocked on a full lane.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crossbeam_channel::{bounded, select, unbounded, Receiver, SendTimeoutError, Sender};

use crate::batch::Batch;
use crate::error::WorkerError;

/// How often a producer blocked on a full lane rechecks for [`WorkQueue::close`].
const CLOSE_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct WorkQueue {
    sender: Sender<Batch>,
    receiver: Receiver<Batch>,
    retry_sender: Sender<Batch>,
    retry_receiver: Receiver<Batch>,
    capacity: usize,
    pending: Mutex<usize>,
    drained: Condvar,
    closed: AtomicBool,
}

impl WorkQueue {
    /// # Panics
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be > 0");
        let (sender, receiver) = bounded(capacity);
        let (retry_sender, retry_receiver) = unbounded();

        Self {
            sender,
            receiver,
            retry_sender,
            retry_receiver,
            capacity,
            pending: Mutex::new(0),
            drained: Condvar::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Batches waiting in the producer lane.
    pub fn producer_len(&self) -> usize {
        self.receiver.len()
    }

    /// Batches waiting in either lane.
    pub fn len(&self) -> usize {
        self.receiver.len() + self.retry_receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Batches enqueued but not yet marked done, including in-flight ones.
    pub fn pending(&self) -> usize {
        *self.lock_pending()
    }

    /// Adds a batch from the producer, blocking while the queue is full.
    /// Fails with [`WorkerError::QueueShutDown`] once the queue is closed.
    pub fn enqueue(&self, batch: Batch) -> Result<(), WorkerError> {
        self.add_pending();
        let mut batch = batch;
        loop {
            if self.is_closed() {
                self.task_done();
                return Err(WorkerError::QueueShutDown);
            }
            match self.sender.send_timeout(batch, CLOSE_POLL_INTERVAL) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(returned)) => batch = returned,
                Err(SendTimeoutError::Disconnected(_)) => {
                    self.task_done();
                    return Err(WorkerError::ChannelClosed);
                }
            }
        }
    }

    /// Stops accepting producer batches. Blocked producers return within
    /// one poll interval. Batches already queued stay where they are.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            log::debug!("Work queue closed with {} batches waiting", self.len());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Puts a batch back after a failed write. Never blocks.
    pub fn requeue(&self, batch: Batch) -> Result<(), WorkerError> {
        self.add_pending();
        self.retry_sender.send(batch).map_err(|_| {
            self.task_done();
            WorkerError::ChannelClosed
        })
    }

    /// Takes the next batch, blocking until one is available.
    pub fn dequeue(&self) -> Option<Batch> {
        if let Ok(batch) = self.retry_receiver.try_recv() {
            return Some(batch);
        }

        select! {
            recv(self.retry_receiver) -> msg => msg.ok(),
            recv(self.receiver) -> msg => msg.ok(),
        }
    }

    /// Takes the next batch, giving up after `timeout`.
    pub fn dequeue_timeout(&self, timeout: Duration) -> Option<Batch> {
        if let Ok(batch) = self.retry_receiver.try_recv() {
            return Some(batch);
        }

        select! {
            recv(self.retry_receiver) -> msg => msg.ok(),
            recv(self.receiver) -> msg => msg.ok(),
            default(timeout) => None,
        }
    }

    /// Marks one dequeued batch as fully handled.
    pub fn task_done(&self) {
        let mut pending = self.lock_pending();
        if *pending == 0 {
            log::warn!("task_done called more times than batches were enqueued");
            return;
        }

        *pending -= 1;
        if *pending == 0 {
            self.drained.notify_all();
        }
    }

    /// Blocks until every enqueued batch has been marked done.
    pub fn join(&self) {
        let guard = self.lock_pending();
        let _guard = self
            .drained
            .wait_while(guard, |pending| *pending > 0)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
    }

    /// Like [`join`](Self::join) but gives up after `timeout`.
    /// Returns true if the queue drained.
    pub fn join_timeout(&self, timeout: Duration) -> bool {
        let guard = self.lock_pending();
        let (guard, _) = self
            .drained
            .wait_timeout_while(guard, timeout, |pending| *pending > 0)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard == 0
    }

    fn add_pending(&self) {
        *self.lock_pending() += 1;
    }

    fn lock_pending(&self) -> MutexGuard<'_, usize> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Work queue counter lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

//! The bounded record buffer between the read loop and one consumer.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use humboldt_codec::Record;
use thiserror::Error;
use tokio::sync::Notify;

/// Default [`RecordQueue`] capacity, as configured through
/// [`LiveConfig::queue_capacity`](crate::LiveConfig).
pub const DEFAULT_QUEUE_CAPACITY: usize = 2048;

/// Why a queue operation could not complete.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// The intake gate is disabled; records are not being accepted.
    #[error("queue is not accepting records")]
    Disabled,

    /// The queue was closed.
    #[error("queue is closed")]
    Closed,

    /// A bounded wait elapsed before a record arrived.
    #[error("timed out waiting for a record")]
    TimedOut,
}

/// A bounded FIFO of decoded records with an enable/disable gate.
///
/// The read loop is the only producer; exactly one consumer context
/// (synchronous or asynchronous, never both) drains it. While the gate
/// is disabled, intake is rejected immediately instead of blocking, so
/// records flow to callbacks and streams without accumulating for a
/// consumer that never iterates. Closing the queue wakes every waiter;
/// buffered records stay drainable after close.
///
/// Capacity is a soft bound: [`put`](Self::put) blocks at capacity, but
/// [`put_nowait`](Self::put_nowait) appends regardless and relies on the
/// producer pausing via [`space_available`](Self::space_available) once
/// [`is_full`](Self::is_full) reports true.
pub struct RecordQueue {
    inner: Mutex<Inner>,
    readable: Condvar,
    writable: Condvar,
    notify: Notify,
    space: Notify,
    capacity: usize,
}

struct Inner {
    records: VecDeque<Record>,
    enabled: bool,
    closed: bool,
}

impl RecordQueue {
    /// Creates a queue with the given capacity. The gate starts
    /// disabled.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                records: VecDeque::new(),
                enabled: false,
                closed: false,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
            notify: Notify::new(),
            space: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a record, blocking while the queue is at capacity.
    ///
    /// # Errors
    ///
    /// Fails immediately with [`QueueError::Disabled`] while the gate is
    /// disabled (including when it closes mid-wait) and with
    /// [`QueueError::Closed`] once the queue is closed.
    pub fn put(&self, record: Record) -> Result<(), QueueError> {
        let mut inner = self.lock();
        loop {
            if inner.closed {
                return Err(QueueError::Closed);
            }
            if !inner.enabled {
                return Err(QueueError::Disabled);
            }
            if inner.records.len() < self.capacity {
                break;
            }
            inner = self
                .writable
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
        inner.records.push_back(record);
        drop(inner);
        self.readable.notify_one();
        self.notify.notify_one();
        Ok(())
    }

    /// Appends a record without ever blocking.
    ///
    /// The append succeeds even at capacity; the producer is expected to
    /// pause via [`space_available`](Self::space_available) instead of
    /// dropping records.
    ///
    /// # Errors
    ///
    /// Fails with [`QueueError::Disabled`] while the gate is disabled
    /// and [`QueueError::Closed`] once closed.
    pub fn put_nowait(&self, record: Record) -> Result<(), QueueError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(QueueError::Closed);
        }
        if !inner.enabled {
            return Err(QueueError::Disabled);
        }
        inner.records.push_back(record);
        drop(inner);
        self.readable.notify_one();
        self.notify.notify_one();
        Ok(())
    }

    /// Removes the next record, blocking until one arrives.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub fn get(&self) -> Option<Record> {
        let mut inner = self.lock();
        loop {
            if let Some(record) = inner.records.pop_front() {
                self.after_pop(inner);
                return Some(record);
            }
            if inner.closed {
                return None;
            }
            inner = self
                .readable
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`get`](Self::get) with a bounded wait.
    ///
    /// # Errors
    ///
    /// Fails with [`QueueError::TimedOut`] if no record arrives within
    /// `timeout`. Returns `Ok(None)` once closed and drained.
    pub fn get_timeout(&self, timeout: Duration) -> Result<Option<Record>, QueueError> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();
        loop {
            if let Some(record) = inner.records.pop_front() {
                self.after_pop(inner);
                return Ok(Some(record));
            }
            if inner.closed {
                return Ok(None);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(QueueError::TimedOut);
            }
            let (guard, _) = self
                .readable
                .wait_timeout(inner, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            inner = guard;
        }
    }

    /// Removes the next record, suspending until one arrives.
    ///
    /// Returns `None` once the queue is closed and drained. Safe to call
    /// from any async runtime.
    pub async fn pop(&self) -> Option<Record> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.lock();
                if let Some(record) = inner.records.pop_front() {
                    self.after_pop(inner);
                    return Some(record);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Suspends until the consumer has drained below half capacity, the
    /// gate is disabled, or the queue is closed.
    ///
    /// Paired with [`is_full`](Self::is_full), this is the producer's
    /// pause/resume discipline: stop reading the transport once full,
    /// resume when the consumer has caught up.
    pub async fn space_available(&self) {
        loop {
            let notified = self.space.notified();
            {
                let inner = self.lock();
                if inner.closed || !inner.enabled || inner.records.len() < self.resume_threshold()
                {
                    return;
                }
            }
            notified.await;
        }
    }

    // notify_one (not notify_waiters) throughout: it stores a permit
    // when no waiter is registered yet, so the single consumer and the
    // single producer never miss a wake between their gate check and
    // their await. Stale permits cost one spurious loop iteration.
    fn after_pop(&self, inner: MutexGuard<'_, Inner>) {
        let below = inner.records.len() < self.resume_threshold();
        drop(inner);
        self.writable.notify_one();
        if below {
            self.space.notify_one();
        }
    }

    fn resume_threshold(&self) -> usize {
        (self.capacity / 2).max(1)
    }

    /// Opens the intake gate. Buffered records are unaffected.
    pub fn enable(&self) {
        self.lock().enabled = true;
    }

    /// Closes the intake gate without discarding buffered records.
    pub fn disable(&self) {
        self.lock().enabled = false;
        self.writable.notify_all();
        self.space.notify_one();
    }

    /// Marks end-of-session and wakes every waiter. Buffered records
    /// remain drainable.
    pub fn close(&self) {
        self.lock().closed = true;
        self.readable.notify_all();
        self.writable.notify_all();
        self.notify.notify_one();
        self.space.notify_one();
    }

    /// Whether the queue is accepting records but at capacity. A
    /// disabled queue is never full; it is not accepting at all.
    pub fn is_full(&self) -> bool {
        let inner = self.lock();
        inner.enabled && inner.records.len() >= self.capacity
    }

    /// Whether the intake gate is open.
    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    /// Whether the queue was closed.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of buffered records.
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    /// Whether no records are buffered.
    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    /// The configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

impl std::fmt::Debug for RecordQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("RecordQueue")
            .field("len", &inner.records.len())
            .field("capacity", &self.capacity)
            .field("enabled", &inner.enabled)
            .field("closed", &inner.closed)
            .finish()
    }
}

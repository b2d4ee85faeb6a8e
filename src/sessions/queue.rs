//! FIFO queue with `tokio::sync::Notify` wakeup for session tasks.
//!
//! [`SessionQueue`] decouples frame I/O from request processing. It is
//! unbounded unless a capacity is configured, in which case `push` suspends
//! until the consumer makes room. Unlike an mpsc channel, the owning session
//! can [`drain`](SessionQueue::drain) it without holding the receiving end.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

/// Returned by [`SessionQueue::push`] once the queue has been drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("queue closed")]
pub struct QueueClosed;

struct QueueInner<T> {
    items: VecDeque<T>,
    closed: bool,
}

pub struct SessionQueue<T> {
    inner: Mutex<QueueInner<T>>,
    /// `None` = unbounded.
    capacity: Option<usize>,
    /// Signalled when an item arrives or the queue closes.
    items: Notify,
    /// Signalled when an item leaves or the queue closes.
    space: Notify,
}

impl<T> SessionQueue<T> {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::new(),
                closed: false,
            }),
            capacity: capacity.filter(|&cap| cap > 0),
            items: Notify::new(),
            space: Notify::new(),
        }
    }

    #[cfg(test)]
    pub fn unbounded() -> Self {
        Self::new(None)
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `item`, waiting for room if the queue is bounded and full.
    pub async fn push(&self, item: T) -> Result<(), QueueClosed> {
        loop {
            {
                let mut inner = self.lock();
                if inner.closed {
                    return Err(QueueClosed);
                }
                if self.capacity.is_none_or(|cap| inner.items.len() < cap) {
                    inner.items.push_back(item);
                    drop(inner);
                    self.items.notify_one();
                    return Ok(());
                }
            }
            self.space.notified().await;
        }
    }

    /// Take the oldest item, waiting for one to arrive. `None` once drained.
    pub async fn pop(&self) -> Option<T> {
        loop {
            {
                let mut inner = self.lock();
                if let Some(item) = inner.items.pop_front() {
                    drop(inner);
                    self.space.notify_one();
                    return Some(item);
                }
                if inner.closed {
                    return None;
                }
            }
            self.items.notified().await;
        }
    }

    /// Close the queue and discard whatever is still in it. Never blocks.
    /// Returns the number of discarded items.
    pub fn drain(&self) -> usize {
        let discarded = {
            let mut inner = self.lock();
            inner.closed = true;
            std::mem::take(&mut inner.items).len()
        };
        self.items.notify_waiters();
        self.items.notify_one();
        self.space.notify_waiters();
        self.space.notify_one();
        discarded
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

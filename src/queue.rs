//! An unbounded asynchronous queue.
//!
//! [`Queue::get`] returns a [`Future`] that is ready immediately when a
//! value is buffered and is otherwise satisfied by a later
//! [`Queue::put`], oldest getter first. It is the natural producer for
//! a loop's `iterate` step: each iteration asks the queue for the next
//! value and suspends until one arrives.
//!
//! Getters cancel cooperatively: a waiter whose future carries a
//! discard request is skipped (and settled as discarded) when a value
//! arrives, so an abandoned getter never swallows a value. Dropping
//! the queue discards all outstanding getters.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::future::{Future, Promise};

struct QueueInner<T> {
    values: VecDeque<T>,
    waiters: VecDeque<Promise<T>>,
}

/// An unbounded multi-producer, multi-consumer asynchronous queue.
///
/// Clones observe the same queue.
pub struct Queue<T> {
    inner: Arc<Mutex<QueueInner<T>>>,
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock().expect("queue lock poisoned");
        f.debug_struct("Queue")
            .field("buffered", &inner.values.len())
            .field("waiters", &inner.waiters.len())
            .finish()
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Queue<T> {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(QueueInner {
                values: VecDeque::new(),
                waiters: VecDeque::new(),
            })),
        }
    }

    /// Returns a future for the next value.
    ///
    /// Ready immediately if a value is buffered; otherwise satisfied
    /// by a later [`Queue::put`], oldest getter first.
    #[must_use]
    pub fn get(&self) -> Future<T> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        if let Some(value) = inner.values.pop_front() {
            return Future::ready(value);
        }
        let promise = Promise::new();
        let future = promise.future();
        inner.waiters.push_back(promise);
        future
    }

    /// Delivers a value to the oldest live getter, or buffers it.
    ///
    /// Waiters whose future already carries a discard request are
    /// skipped and settled as discarded.
    pub fn put(&self, value: T) {
        let mut value = Some(value);
        let mut skipped = Vec::new();
        let winner = {
            let mut inner = self.inner.lock().expect("queue lock poisoned");
            let mut winner = None;
            while let Some(promise) = inner.waiters.pop_front() {
                if promise.future().has_discard() {
                    skipped.push(promise);
                } else {
                    winner = Some(promise);
                    break;
                }
            }
            if winner.is_none() {
                if let Some(value) = value.take() {
                    inner.values.push_back(value);
                }
            }
            winner
        };
        // Settle outside the lock so continuations may re-enter the
        // queue.
        for promise in skipped {
            promise.discard();
        }
        if let (Some(promise), Some(value)) = (winner, value) {
            promise.set(value);
        }
    }
}

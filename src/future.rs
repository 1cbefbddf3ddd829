//! One-shot asynchronous values.
//!
//! A [`Future`] is a write-once cell with four observable states:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      FUTURE STATE MACHINE                       │
//! │                                                                 │
//! │                 ┌── Promise::set ─────► Ready(T)                │
//! │                 │                                               │
//! │   Pending ──────┼── Promise::fail ────► Failed(reason)          │
//! │      │          │                                               │
//! │      │          └── Promise::discard ─► Discarded               │
//! │      │                                                          │
//! │      └── Future::discard ──► has_discard = true (still Pending) │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The transition out of `Pending` happens exactly once and only on the
//! [`Promise`] side. [`Future::discard`] is a cooperative *request*: it
//! records the `has_discard` flag and fires any [`Future::on_discard`]
//! continuations, but the producer decides whether to honor it by
//! settling the promise with [`Promise::discard`]. A discard request
//! against an already-settled future is a no-op.
//!
//! # Cancel Safety
//!
//! Dropping an unsettled [`Promise`] discards its future, so an
//! abandoned producer can never wedge a consumer. Settlement operations
//! are idempotent after the first one.
//!
//! # Example
//!
//! ```ignore
//! use spool::future::{Future, Promise};
//!
//! let promise = Promise::<i32>::new();
//! let future = promise.future();
//!
//! future.on_any(move || println!("settled"));
//! promise.set(42);
//!
//! assert_eq!(future.get(), Some(42));
//! ```

use std::fmt;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Continuation registered on a future.
type Continuation = Box<dyn FnOnce() + Send>;

/// Observable state of a [`Future`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FutureState {
    /// Not yet settled.
    Pending,
    /// Settled with a value.
    Ready,
    /// Settled with a failure reason.
    Failed,
    /// Settled by a discard.
    Discarded,
}

enum State<T> {
    Pending,
    Ready(T),
    Failed(String),
    Discarded,
}

impl<T> State<T> {
    const fn tag(&self) -> FutureState {
        match self {
            Self::Pending => FutureState::Pending,
            Self::Ready(_) => FutureState::Ready,
            Self::Failed(_) => FutureState::Failed,
            Self::Discarded => FutureState::Discarded,
        }
    }
}

struct Inner<T> {
    state: State<T>,
    /// Whether a discard has been requested while pending.
    discard_requested: bool,
    /// Continuations fired exactly once on the terminal transition.
    on_any: Vec<Continuation>,
    /// Continuations fired when a discard request is first recorded.
    on_discard: Vec<Continuation>,
}

struct Shared<T> {
    inner: Mutex<Inner<T>>,
    /// Signalled on the terminal transition; backs [`Future::wait_timeout`].
    settled: Condvar,
}

impl<T> Shared<T> {
    fn with_state(state: State<T>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                state,
                discard_requested: false,
                on_any: Vec::new(),
                on_discard: Vec::new(),
            }),
            settled: Condvar::new(),
        })
    }

    /// Performs the terminal transition. Returns false if already settled.
    ///
    /// Continuations run after the lock is released so they may re-enter
    /// the future API freely.
    fn settle(&self, next: State<T>) -> bool {
        let continuations = {
            let mut inner = self.inner.lock().expect("future lock poisoned");
            if !matches!(inner.state, State::Pending) {
                return false;
            }
            inner.state = next;
            // Discard continuations can no longer fire; drop them so a
            // continuation holding a promise does not keep it alive.
            inner.on_discard.clear();
            self.settled.notify_all();
            std::mem::take(&mut inner.on_any)
        };
        for continuation in continuations {
            continuation();
        }
        true
    }
}

/// The read side of a one-shot asynchronous value.
///
/// Futures are cheap to clone; every clone observes the same cell.
pub struct Future<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.inner.lock().expect("future lock poisoned");
        f.debug_struct("Future")
            .field("state", &inner.state.tag())
            .field("has_discard", &inner.discard_requested)
            .finish()
    }
}

impl<T> Future<T> {
    /// A future that is already settled with `value`.
    #[must_use]
    pub fn ready(value: T) -> Self {
        Self {
            shared: Shared::with_state(State::Ready(value)),
        }
    }

    /// A future that is already failed with `reason`.
    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            shared: Shared::with_state(State::Failed(reason.into())),
        }
    }

    /// A future that is already discarded.
    #[must_use]
    pub fn discarded() -> Self {
        Self {
            shared: Shared::with_state(State::Discarded),
        }
    }

    /// A future no promise will ever settle.
    ///
    /// Useful as a placeholder slot; it can still record a discard
    /// request.
    #[must_use]
    pub fn pending() -> Self {
        Self {
            shared: Shared::with_state(State::Pending),
        }
    }

    /// Returns the current observable state.
    #[must_use]
    pub fn state(&self) -> FutureState {
        self.shared
            .inner
            .lock()
            .expect("future lock poisoned")
            .state
            .tag()
    }

    /// Returns true if the future has not settled.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.state() == FutureState::Pending
    }

    /// Returns true if the future settled with a value.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state() == FutureState::Ready
    }

    /// Returns true if the future settled with a failure.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.state() == FutureState::Failed
    }

    /// Returns true if the future settled by discard.
    #[must_use]
    pub fn is_discarded(&self) -> bool {
        self.state() == FutureState::Discarded
    }

    /// Returns true if a discard request has been recorded.
    ///
    /// The flag is observable whether or not the producer has honored
    /// the request yet.
    #[must_use]
    pub fn has_discard(&self) -> bool {
        self.shared
            .inner
            .lock()
            .expect("future lock poisoned")
            .discard_requested
    }

    /// Clones out the value if the future is ready.
    #[must_use]
    pub fn get(&self) -> Option<T>
    where
        T: Clone,
    {
        let inner = self.shared.inner.lock().expect("future lock poisoned");
        match &inner.state {
            State::Ready(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// Clones out the failure reason if the future failed.
    #[must_use]
    pub fn failure(&self) -> Option<String> {
        let inner = self.shared.inner.lock().expect("future lock poisoned");
        match &inner.state {
            State::Failed(reason) => Some(reason.clone()),
            _ => None,
        }
    }

    /// Requests a discard.
    ///
    /// The first request against a pending future records `has_discard`
    /// and fires the registered [`Future::on_discard`] continuations.
    /// Requests against a settled future, and repeated requests, are
    /// no-ops.
    pub fn discard(&self) {
        let continuations = {
            let mut inner = self.shared.inner.lock().expect("future lock poisoned");
            if !matches!(inner.state, State::Pending) || inner.discard_requested {
                return;
            }
            inner.discard_requested = true;
            std::mem::take(&mut inner.on_discard)
        };
        for continuation in continuations {
            continuation();
        }
    }

    /// Registers a continuation fired exactly once when the future
    /// settles.
    ///
    /// If the future is already settled, the continuation runs
    /// immediately on the calling thread. Continuations pending at
    /// settlement run on the settling thread, outside all internal
    /// locks.
    pub fn on_any<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut inner = self.shared.inner.lock().expect("future lock poisoned");
            if matches!(inner.state, State::Pending) {
                inner.on_any.push(Box::new(f));
                return;
            }
        }
        f();
    }

    /// Registers a continuation fired when a discard request is first
    /// recorded.
    ///
    /// If a discard has already been requested, the continuation runs
    /// immediately on the calling thread. Continuations still pending
    /// when the future settles are dropped without running.
    pub fn on_discard<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut inner = self.shared.inner.lock().expect("future lock poisoned");
            if matches!(inner.state, State::Pending) && !inner.discard_requested {
                inner.on_discard.push(Box::new(f));
                return;
            }
            if !inner.discard_requested {
                // Settled without a discard request: never fires.
                return;
            }
        }
        f();
    }

    /// Blocks the calling thread until the future settles.
    ///
    /// Returns true if the future settled within `timeout`. Intended
    /// for test code and synchronous boundaries; actor code should
    /// subscribe with [`Future::on_any`] instead.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.shared.inner.lock().expect("future lock poisoned");
        while matches!(inner.state, State::Pending) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let (guard, _) = self
                .shared
                .settled
                .wait_timeout(inner, remaining)
                .expect("future lock poisoned");
            inner = guard;
        }
        true
    }

    /// Number of registered `(on_any, on_discard)` continuations.
    #[cfg(test)]
    pub(crate) fn continuation_counts(&self) -> (usize, usize) {
        let inner = self.shared.inner.lock().expect("future lock poisoned");
        (inner.on_any.len(), inner.on_discard.len())
    }
}

/// The write side of a one-shot asynchronous value.
///
/// A promise settles its future at most once; [`Promise::set`],
/// [`Promise::fail`] and [`Promise::discard`] report whether they
/// performed the settlement. Dropping an unsettled promise discards.
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.inner.lock().expect("future lock poisoned");
        f.debug_struct("Promise")
            .field("state", &inner.state.tag())
            .finish()
    }
}

impl<T> Promise<T> {
    /// Creates a new unsettled promise.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Shared::with_state(State::Pending),
        }
    }

    /// Returns the future observing this promise.
    #[must_use]
    pub fn future(&self) -> Future<T> {
        Future {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Settles the future with a value. Returns false if already
    /// settled.
    pub fn set(&self, value: T) -> bool {
        self.shared.settle(State::Ready(value))
    }

    /// Settles the future with a failure reason. Returns false if
    /// already settled.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.shared.settle(State::Failed(reason.into()))
    }

    /// Settles the future as discarded. Returns false if already
    /// settled.
    pub fn discard(&self) -> bool {
        self.shared.settle(State::Discarded)
    }
}

impl<T> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        self.shared.settle(State::Discarded);
    }
}

//! Per-actor task queues.
//!
//! A mailbox owns the FIFO queue of tasks dispatched to one actor and
//! the small state machine that keeps the actor's execution serialized:
//!
//! - `scheduled` is true while the mailbox sits in the pool's injector
//!   queue or is held by a worker. Enqueueing only pushes the mailbox
//!   onto the injector when it flips this flag, so at most one worker
//!   ever processes a given actor at a time.
//! - `terminated` marks a termination request; the owning worker (or
//!   the terminating thread, if the mailbox is idle) drops all queued
//!   tasks and trips the stop latch.
//! - `stopped` is the latch [`Mailbox::wait_stopped`] blocks on.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::{Duration, Instant};

use super::RuntimeInner;

/// A unit of work dispatched to an actor.
pub(crate) type Task = Box<dyn FnOnce() + Send + 'static>;

/// Outcome of a worker asking for the next task.
pub(crate) enum NextTask {
    /// Run this task, then ask again.
    Run(Task),
    /// The actor terminated; the caller must unregister it.
    Stopped,
    /// Queue drained; the mailbox is idle again.
    Idle,
}

/// Outcome of a worker finishing its batch with tasks possibly left.
pub(crate) enum AfterBatch {
    /// Work remains; push the mailbox back onto the injector.
    Requeue,
    /// Queue drained in the meantime.
    Idle,
    /// The actor terminated; the caller must unregister it.
    Stopped,
}

struct MailboxState {
    queue: VecDeque<Task>,
    scheduled: bool,
    terminated: bool,
    stopped: bool,
}

pub(crate) struct Mailbox {
    id: u64,
    runtime: Weak<RuntimeInner>,
    state: Mutex<MailboxState>,
    stop_signal: Condvar,
}

impl Mailbox {
    pub(crate) fn new(id: u64, runtime: Weak<RuntimeInner>) -> Self {
        Self {
            id,
            runtime,
            state: Mutex::new(MailboxState {
                queue: VecDeque::new(),
                scheduled: false,
                terminated: false,
                stopped: false,
            }),
            stop_signal: Condvar::new(),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Enqueues a task, scheduling the mailbox if it was idle.
    ///
    /// Returns false if the task was dropped because the actor is
    /// terminated or its runtime is gone.
    pub(crate) fn enqueue(self: Arc<Self>, task: Task) -> bool {
        let Some(runtime) = self.runtime.upgrade() else {
            return false;
        };
        let needs_schedule = {
            let mut state = self.state.lock().expect("mailbox lock poisoned");
            if state.terminated || state.stopped {
                return false;
            }
            state.queue.push_back(task);
            if state.scheduled {
                false
            } else {
                state.scheduled = true;
                true
            }
        };
        if needs_schedule {
            runtime.push_runnable(self);
        }
        true
    }

    /// Called by the owning worker to pull the next task.
    pub(crate) fn next_task(&self) -> NextTask {
        let mut state = self.state.lock().expect("mailbox lock poisoned");
        if state.terminated {
            Self::finalize(&mut state, &self.stop_signal);
            return NextTask::Stopped;
        }
        match state.queue.pop_front() {
            Some(task) => NextTask::Run(task),
            None => {
                state.scheduled = false;
                NextTask::Idle
            }
        }
    }

    /// Called by the owning worker when its batch quota is spent.
    pub(crate) fn after_batch(&self) -> AfterBatch {
        let mut state = self.state.lock().expect("mailbox lock poisoned");
        if state.terminated {
            Self::finalize(&mut state, &self.stop_signal);
            AfterBatch::Stopped
        } else if state.queue.is_empty() {
            state.scheduled = false;
            AfterBatch::Idle
        } else {
            // Still scheduled; ownership moves back to the injector.
            AfterBatch::Requeue
        }
    }

    /// Requests termination.
    ///
    /// Returns true if the mailbox stopped immediately (it was idle)
    /// and the caller must unregister it; otherwise the owning worker
    /// finalizes at the next task boundary. Idempotent.
    pub(crate) fn terminate(&self) -> bool {
        let mut state = self.state.lock().expect("mailbox lock poisoned");
        if state.stopped {
            return false;
        }
        state.terminated = true;
        if state.scheduled {
            return false;
        }
        Self::finalize(&mut state, &self.stop_signal);
        true
    }

    fn finalize(state: &mut MailboxState, stop_signal: &Condvar) {
        state.queue.clear();
        state.scheduled = false;
        state.stopped = true;
        stop_signal.notify_all();
    }

    /// Blocks until the stop latch trips.
    ///
    /// With a timeout, returns false if the latch did not trip in time.
    pub(crate) fn wait_stopped(&self, timeout: Option<Duration>) -> bool {
        let mut state = self.state.lock().expect("mailbox lock poisoned");
        match timeout {
            None => {
                while !state.stopped {
                    state = self
                        .stop_signal
                        .wait(state)
                        .expect("mailbox lock poisoned");
                }
                true
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while !state.stopped {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return false;
                    }
                    let (guard, _) = self
                        .stop_signal
                        .wait_timeout(state, remaining)
                        .expect("mailbox lock poisoned");
                    state = guard;
                }
                true
            }
        }
    }

    /// Removes this actor from its runtime's registry.
    pub(crate) fn unregister(&self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.unregister(self.id);
        }
    }
}

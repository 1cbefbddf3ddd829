//! A stack-safe asynchronous loop.
//!
//! [`loop_`] expresses what would synchronously be written as
//!
//! ```text
//! let mut condition = true;
//! while condition {
//!     condition = body(iterate());
//! }
//! ```
//!
//! over values produced asynchronously. Composing futures recursively
//! (`iterate().on_any(|t| body(t).on_any(|c| if c { loop again }))`)
//! grows the stack by one continuation frame per iteration; this
//! module instead materializes the loop as one long-lived state object
//! and drives it with an iterative state machine.
//!
//! The loop runs on a caller-supplied actor: every `iterate` and
//! `body` invocation, and every internal continuation, executes on
//! `pid`'s serialized context. That serialization is also what makes
//! cancellation race-free: the single discard propagator registered on
//! the returned future hops onto `pid` before touching the current
//! iteration's futures, so it always observes a consistent snapshot.
//!
//! Two rules keep resource usage flat no matter how many iterations
//! run:
//!
//! - Consecutive already-ready iterations are drained by a plain
//!   `while` loop in one actor step: O(1) stack, no deferred
//!   re-entry. The driver only suspends (one-shot `on_any`
//!   subscription plus deferred re-entry through the mailbox) when the
//!   current future or condition is actually pending.
//! - Exactly one `on_discard` continuation is ever attached to the
//!   returned future. It re-reads the current iteration's slots at
//!   fire time instead of subscribing per iteration, which would grow
//!   memory linearly with the iteration count.
//!
//! # Outcome
//!
//! The returned `Future<()>` becomes ready when `body` returns a
//! ready-false condition, fails when any intermediate future fails
//! (reason propagated verbatim), and is discarded when any
//! intermediate future is discarded or when the caller's discard
//! request is honored. A panicking `iterate` or `body` fails the loop
//! with a reason naming the callable.
//!
//! # Example
//!
//! ```ignore
//! use spool::{loop_, Future, Queue};
//!
//! let queue: Queue<u64> = Queue::new();
//! let q = queue.clone();
//! let done = loop_(
//!     &pid,
//!     move || q.get(),
//!     move |item| Future::ready(item != 0),
//! );
//! // feed the queue; the loop settles when an item is 0
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use tracing::{debug, trace};

use crate::dispatch::{defer, dispatch};
use crate::future::{Future, FutureState, Promise};
use crate::pid::Pid;
use crate::runtime::{self, Runtime};

const LOOP_LOCK: &str = "loop state lock poisoned";

/// The latest in-flight futures plus the user callables.
///
/// Only ever locked from executions serialized on the loop's actor, so
/// the mutex is uncontended; it exists for the borrow checker, not as
/// a synchronization protocol.
struct Slots<T, I, B> {
    iterate: I,
    body: B,
    /// Latest future produced by `iterate`.
    future: Future<T>,
    /// Latest condition produced by `body`.
    condition: Future<bool>,
}

struct Loop<T, I, B> {
    pid: Pid,
    promise: Promise<()>,
    slots: Mutex<Slots<T, I, B>>,
}

/// Runs an asynchronous loop on `pid`.
///
/// `iterate` produces the next value; `body` consumes it and decides
/// whether to continue. The two strictly alternate, and both always
/// run on `pid`'s serialized context. See the module documentation for
/// the outcome contract.
///
/// `pid` must refer to an actor that stays alive for the duration of
/// the loop; use [`loop_detached`] when there is no natural home.
pub fn loop_<T, I, B>(pid: &Pid, iterate: I, body: B) -> Future<()>
where
    T: Clone + Send + 'static,
    I: FnMut() -> Future<T> + Send + 'static,
    B: FnMut(T) -> Future<bool> + Send + 'static,
{
    let state = Arc::new(Loop {
        pid: pid.clone(),
        promise: Promise::new(),
        slots: Mutex::new(Slots {
            iterate,
            body,
            future: Future::pending(),
            condition: Future::pending(),
        }),
    });
    let result = state.promise.future();
    trace!(pid = %pid, "loop started");

    // Bootstrap the first iteration on the actor. A discard recorded
    // on the outer future before this step executes is forwarded to
    // the seed future here.
    {
        let state = Arc::clone(&state);
        dispatch(pid, move || {
            let seeded = {
                let mut slots = state.slots.lock().expect(LOOP_LOCK);
                match call_iterate(&mut slots.iterate) {
                    Ok(next) => {
                        slots.future = next.clone();
                        Some(next)
                    }
                    Err(reason) => {
                        drop(slots);
                        settle_failed(&state, reason);
                        None
                    }
                }
            };
            let Some(next) = seeded else { return };
            if state.promise.future().has_discard() {
                next.discard();
            }
            run(&state);
        });
    }

    // The single discard propagator. It re-reads the current slots on
    // `pid` instead of subscribing to every per-iteration future;
    // serialization on `pid` makes that snapshot consistent without
    // further locking discipline.
    {
        let state = Arc::clone(&state);
        result.on_discard(defer(pid, move || {
            let slots = state.slots.lock().expect(LOOP_LOCK);
            slots.future.discard();
            slots.condition.discard();
        }));
    }

    result
}

/// Runs an asynchronous loop on a throwaway actor.
///
/// Spawns a fresh actor on the default runtime to host the loop, and
/// reaps it once the loop settles. The reap happens on the runtime's
/// housekeeping actor: settlement is usually observed from a
/// continuation running on the throwaway actor itself, where a
/// synchronous terminate-and-wait would self-join.
pub fn loop_detached<T, I, B>(iterate: I, body: B) -> Future<()>
where
    T: Clone + Send + 'static,
    I: FnMut() -> Future<T> + Send + 'static,
    B: FnMut(T) -> Future<bool> + Send + 'static,
{
    let rt = Runtime::default_runtime();
    let host = rt.spawn();
    let result = loop_(&host, iterate, body);

    let reaper = rt.reaper().clone();
    result.on_any(defer(&reaper, move || {
        runtime::terminate(&host);
        runtime::wait(&host);
        trace!(pid = %host, "detached loop actor reaped");
    }));
    result
}

/// Advances the loop as far as synchronously possible.
///
/// Invoked only on the loop's actor. Consecutive ready iterations are
/// consumed by the `while` loop below without growing the stack; when
/// the current future or condition is pending, a one-shot wake is
/// subscribed and the step returns.
fn run<T, I, B>(state: &Arc<Loop<T, I, B>>)
where
    T: Clone + Send + 'static,
    I: FnMut() -> Future<T> + Send + 'static,
    B: FnMut(T) -> Future<bool> + Send + 'static,
{
    let mut slots = state.slots.lock().expect(LOOP_LOCK);

    while let Some(value) = slots.future.get() {
        let condition = match call_body(&mut slots.body, value) {
            Ok(condition) => condition,
            Err(reason) => {
                drop(slots);
                settle_failed(state, reason);
                return;
            }
        };
        slots.condition = condition.clone();
        // A discard that arrived between the future settling and the
        // body running still lands on this iteration.
        if state.promise.future().has_discard() {
            condition.discard();
        }

        if condition.is_ready() {
            if condition.get() == Some(true) {
                let next = match call_iterate(&mut slots.iterate) {
                    Ok(next) => next,
                    Err(reason) => {
                        drop(slots);
                        settle_failed(state, reason);
                        return;
                    }
                };
                slots.future = next.clone();
                if state.promise.future().has_discard() {
                    next.discard();
                }
            } else {
                drop(slots);
                settle_ready(state);
                return;
            }
        } else {
            drop(slots);
            condition.on_any(condition_wake(state));
            return;
        }
    }

    // The current future is pending, failed, or discarded; resume (or
    // propagate) from a deferred continuation.
    let future = slots.future.clone();
    drop(slots);
    future.on_any(future_wake(state));
}

/// Continuation resuming the loop once the pending condition settles.
fn condition_wake<T, I, B>(state: &Arc<Loop<T, I, B>>) -> impl FnOnce() + Send + 'static
where
    T: Clone + Send + 'static,
    I: FnMut() -> Future<T> + Send + 'static,
    B: FnMut(T) -> Future<bool> + Send + 'static,
{
    let pid = state.pid.clone();
    let state = Arc::clone(state);
    defer(&pid, move || {
        let mut slots = state.slots.lock().expect(LOOP_LOCK);
        match slots.condition.state() {
            FutureState::Ready => {
                if slots.condition.get() == Some(true) {
                    let next = match call_iterate(&mut slots.iterate) {
                        Ok(next) => next,
                        Err(reason) => {
                            drop(slots);
                            settle_failed(&state, reason);
                            return;
                        }
                    };
                    slots.future = next.clone();
                    if state.promise.future().has_discard() {
                        next.discard();
                    }
                    drop(slots);
                    run(&state);
                } else {
                    drop(slots);
                    settle_ready(&state);
                }
            }
            FutureState::Failed => {
                let reason = slots.condition.failure().unwrap_or_default();
                drop(slots);
                settle_failed(&state, reason);
            }
            FutureState::Discarded => {
                drop(slots);
                settle_discarded(&state);
            }
            FutureState::Pending => {}
        }
    })
}

/// Continuation resuming the loop once the pending future settles.
fn future_wake<T, I, B>(state: &Arc<Loop<T, I, B>>) -> impl FnOnce() + Send + 'static
where
    T: Clone + Send + 'static,
    I: FnMut() -> Future<T> + Send + 'static,
    B: FnMut(T) -> Future<bool> + Send + 'static,
{
    let pid = state.pid.clone();
    let state = Arc::clone(state);
    defer(&pid, move || {
        let slots = state.slots.lock().expect(LOOP_LOCK);
        match slots.future.state() {
            FutureState::Ready => {
                drop(slots);
                run(&state);
            }
            FutureState::Failed => {
                let reason = slots.future.failure().unwrap_or_default();
                drop(slots);
                settle_failed(&state, reason);
            }
            FutureState::Discarded => {
                drop(slots);
                settle_discarded(&state);
            }
            FutureState::Pending => {}
        }
    })
}

fn settle_ready<T, I, B>(state: &Arc<Loop<T, I, B>>) {
    if state.promise.set(()) {
        trace!(pid = %state.pid, "loop completed");
    }
}

fn settle_failed<T, I, B>(state: &Arc<Loop<T, I, B>>, reason: String) {
    debug!(pid = %state.pid, reason = %reason, "loop failed");
    state.promise.fail(reason);
}

fn settle_discarded<T, I, B>(state: &Arc<Loop<T, I, B>>) {
    if state.promise.discard() {
        trace!(pid = %state.pid, "loop discarded");
    }
}

fn call_iterate<T, I>(iterate: &mut I) -> Result<Future<T>, String>
where
    I: FnMut() -> Future<T>,
{
    catch_unwind(AssertUnwindSafe(|| iterate()))
        .map_err(|payload| format!("iterate panicked: {}", panic_message(payload.as_ref())))
}

fn call_body<T, B>(body: &mut B, value: T) -> Result<Future<bool>, String>
where
    B: FnMut(T) -> Future<bool>,
{
    catch_unwind(AssertUnwindSafe(|| body(value)))
        .map_err(|payload| format!("body panicked: {}", panic_message(payload.as_ref())))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

//! Posting work onto actors.
//!
//! [`dispatch`] enqueues a closure for execution on an actor's
//! serialized context, preserving FIFO order per [`Pid`]. [`defer`]
//! wraps a closure into a continuation that dispatches when invoked,
//! the building block for hopping back onto an actor from a future
//! callback:
//!
//! ```ignore
//! future.on_any(defer(&pid, move || {
//!     // runs on `pid`, serialized with everything else dispatched
//!     // there, no matter which thread settled the future
//! }));
//! ```

use tracing::trace;

use crate::pid::Pid;

/// Enqueues `f` for execution on `pid`'s serialized context.
///
/// Tasks dispatched to one pid run in dispatch order, one at a time.
/// If the actor has terminated or its runtime is gone, the task is
/// silently dropped.
pub fn dispatch<F>(pid: &Pid, f: F)
where
    F: FnOnce() + Send + 'static,
{
    let delivered = match pid.mailbox() {
        Some(mailbox) => mailbox.enqueue(Box::new(f)),
        None => false,
    };
    if !delivered {
        trace!(pid = %pid, "dispatch dropped: actor gone");
    }
}

/// Returns a continuation that dispatches `f` onto `pid` when invoked.
pub fn defer<F>(pid: &Pid, f: F) -> impl FnOnce() + Send + 'static
where
    F: FnOnce() + Send + 'static,
{
    let pid = pid.clone();
    move || dispatch(&pid, f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{Runtime, RuntimeConfig};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{mpsc, Arc};
    use std::time::Duration;

    #[test]
    fn defer_posts_nothing_until_invoked() {
        let runtime = Runtime::new(RuntimeConfig::default());
        let pid = runtime.spawn();
        let ran = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();

        let deferred = {
            let ran = Arc::clone(&ran);
            defer(&pid, move || {
                ran.store(true, Ordering::SeqCst);
                tx.send(()).expect("test channel");
            })
        };

        std::thread::sleep(Duration::from_millis(20));
        assert!(!ran.load(Ordering::SeqCst));

        deferred();
        rx.recv_timeout(Duration::from_secs(5)).expect("task ran");
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn deferred_continuation_survives_cross_thread_invocation() {
        let runtime = Runtime::new(RuntimeConfig::default());
        let pid = runtime.spawn();
        let (tx, rx) = mpsc::channel();

        let deferred = defer(&pid, move || {
            tx.send(crate::runtime::current_actor_id()).expect("test channel");
        });
        let expected = Some(pid.id());

        std::thread::spawn(deferred).join().expect("invoker panicked");
        let observed = rx.recv_timeout(Duration::from_secs(5)).expect("task ran");
        assert_eq!(observed, expected);
    }
}

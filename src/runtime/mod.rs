//! The actor runtime: worker pool, actor registry, lifecycle.
//!
//! A [`Runtime`] owns a set of named worker threads sharing one
//! injector queue of runnable mailboxes. Each actor spawned on the
//! runtime is a bare serialized execution context: a FIFO mailbox of
//! closures processed one at a time (see [`mailbox`]). Workers pull a
//! runnable mailbox, run a bounded batch of its tasks, and requeue it
//! if work remains, so a hot actor cannot starve the pool.
//!
//! Most callers never construct a runtime: the free functions
//! ([`spawn`], [`crate::dispatch::dispatch`]) target the process-wide
//! default runtime, mirroring how the rest of the crate is used from
//! plain code. Explicit runtimes exist for embedding and for tests
//! that want isolation.
//!
//! # Lifecycle
//!
//! [`terminate`] requests an actor stop: queued tasks are dropped after
//! the in-flight one (if any) returns, and the actor's stop latch
//! trips. [`wait`] blocks on that latch. Waiting on the actor the
//! caller is currently executing on would deadlock; it is detected via
//! a thread-local marker and refused instead.

pub(crate) mod mailbox;

use std::cell::Cell;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_queue::SegQueue;
use tracing::{error, trace};

use crate::pid::Pid;
use mailbox::{AfterBatch, Mailbox, NextTask};

/// Default number of tasks a worker runs from one mailbox before
/// requeueing it.
const DEFAULT_TASK_BATCH: usize = 32;

thread_local! {
    /// Identity of the actor whose task the current thread is running.
    static CURRENT_ACTOR: Cell<Option<u64>> = const { Cell::new(None) };
}

/// Returns the identity of the actor the calling thread is currently
/// executing, if any.
#[must_use]
pub fn current_actor_id() -> Option<u64> {
    CURRENT_ACTOR.get()
}

/// Configuration for a [`Runtime`].
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    workers: usize,
    task_batch: usize,
    thread_name_prefix: String,
}

impl RuntimeConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            workers: thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(4)
                .max(2),
            task_batch: DEFAULT_TASK_BATCH,
            thread_name_prefix: "spool".to_string(),
        }
    }

    /// Sets the number of worker threads. Clamped to at least one.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Sets how many tasks a worker runs from one mailbox before
    /// requeueing it. Clamped to at least one.
    #[must_use]
    pub fn with_task_batch(mut self, task_batch: usize) -> Self {
        self.task_batch = task_batch.max(1);
        self
    }

    /// Sets the worker thread name prefix.
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) struct RuntimeInner {
    /// Pool-wide queue of runnable mailboxes.
    injector: SegQueue<Arc<Mailbox>>,
    /// Strong references to live actors, keyed by id.
    registry: Mutex<HashMap<u64, Arc<Mailbox>>>,
    next_actor_id: AtomicU64,
    task_batch: usize,
    shutdown: AtomicBool,
    /// Number of worker threads that have not exited yet.
    active_workers: AtomicUsize,
    /// Condition variable for worker parking.
    park_signal: Condvar,
    /// Mutex for the parking condition variable.
    park_mutex: Mutex<()>,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
    /// Housekeeping actor used to reap detached-loop actors.
    reaper: OnceLock<Pid>,
}

impl RuntimeInner {
    pub(crate) fn push_runnable(&self, mailbox: Arc<Mailbox>) {
        self.injector.push(mailbox);
        let _guard = self.park_mutex.lock().expect("runtime lock poisoned");
        self.park_signal.notify_one();
    }

    pub(crate) fn unregister(&self, id: u64) {
        let removed = self
            .registry
            .lock()
            .expect("runtime lock poisoned")
            .remove(&id);
        if removed.is_some() {
            trace!(actor = id, "actor stopped");
        }
    }

    fn notify_all_workers(&self) {
        let _guard = self.park_mutex.lock().expect("runtime lock poisoned");
        self.park_signal.notify_all();
    }
}

/// A pool of worker threads hosting actors.
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("actors", &self.actor_count())
            .field(
                "active_workers",
                &self.inner.active_workers.load(Ordering::Relaxed),
            )
            .finish()
    }
}

impl Runtime {
    /// Starts a runtime with the given configuration.
    #[must_use]
    pub fn new(config: RuntimeConfig) -> Self {
        let inner = Arc::new(RuntimeInner {
            injector: SegQueue::new(),
            registry: Mutex::new(HashMap::new()),
            next_actor_id: AtomicU64::new(1),
            task_batch: config.task_batch,
            shutdown: AtomicBool::new(false),
            active_workers: AtomicUsize::new(0),
            park_signal: Condvar::new(),
            park_mutex: Mutex::new(()),
            worker_handles: Mutex::new(Vec::with_capacity(config.workers)),
            reaper: OnceLock::new(),
        });

        let runtime = Self { inner };
        for index in 0..config.workers {
            runtime.spawn_worker(&config.thread_name_prefix, index);
        }
        runtime
    }

    /// Returns the process-wide default runtime, starting it on first
    /// use.
    ///
    /// This is the runtime behind [`spawn`] and
    /// [`crate::looping::loop_detached`]. It lives for the rest of the
    /// process.
    #[must_use]
    pub fn default_runtime() -> &'static Runtime {
        static DEFAULT: OnceLock<Runtime> = OnceLock::new();
        DEFAULT.get_or_init(|| Runtime::new(RuntimeConfig::default()))
    }

    fn spawn_worker(&self, prefix: &str, index: usize) {
        let inner = Arc::clone(&self.inner);
        inner.active_workers.fetch_add(1, Ordering::Relaxed);
        let handle = thread::Builder::new()
            .name(format!("{prefix}-worker-{index}"))
            .spawn(move || {
                worker_loop(&inner);
                inner.active_workers.fetch_sub(1, Ordering::Relaxed);
            })
            .expect("failed to spawn runtime worker");
        self.inner
            .worker_handles
            .lock()
            .expect("runtime lock poisoned")
            .push(handle);
    }

    /// Spawns a new actor and returns its handle.
    #[must_use]
    pub fn spawn(&self) -> Pid {
        let id = self.inner.next_actor_id.fetch_add(1, Ordering::Relaxed);
        let mailbox = Arc::new(Mailbox::new(id, Arc::downgrade(&self.inner)));
        let pid = Pid::new(id, Arc::downgrade(&mailbox));
        self.inner
            .registry
            .lock()
            .expect("runtime lock poisoned")
            .insert(id, mailbox);
        trace!(actor = id, "actor spawned");
        pid
    }

    /// Handle of this runtime's housekeeping actor, spawning it on
    /// first use.
    ///
    /// The reaper hosts cleanup work that must not run on the actor it
    /// cleans up, such as terminating and waiting for a detached
    /// loop's throwaway actor.
    pub(crate) fn reaper(&self) -> &Pid {
        self.inner.reaper.get_or_init(|| self.spawn())
    }

    /// Number of live actors, housekeeping included.
    #[must_use]
    pub fn actor_count(&self) -> usize {
        self.inner.registry.lock().expect("runtime lock poisoned").len()
    }

    /// Requests shutdown: workers exit once the injector drains.
    ///
    /// Actors and their queued tasks are not waited for; this is
    /// process-teardown plumbing, not graceful actor stop.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.notify_all_workers();
    }

    /// Shuts down and waits for the workers to exit.
    ///
    /// Returns false if `timeout` elapsed with workers still running.
    pub fn shutdown_and_wait(&self, timeout: Duration) -> bool {
        self.shutdown();

        let deadline = Instant::now() + timeout;
        while self.inner.active_workers.load(Ordering::Acquire) > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            self.inner.notify_all_workers();
            thread::sleep(Duration::from_millis(10).min(remaining));
        }

        let mut handles = self
            .inner
            .worker_handles
            .lock()
            .expect("runtime lock poisoned");
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
        true
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        let _ = self.shutdown_and_wait(Duration::from_secs(5));
    }
}

fn worker_loop(inner: &Arc<RuntimeInner>) {
    loop {
        if let Some(mailbox) = inner.injector.pop() {
            run_mailbox(inner, &mailbox);
            continue;
        }
        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }
        let guard = inner.park_mutex.lock().expect("runtime lock poisoned");
        if !inner.injector.is_empty() || inner.shutdown.load(Ordering::Acquire) {
            continue;
        }
        drop(
            inner
                .park_signal
                .wait(guard)
                .expect("runtime lock poisoned"),
        );
    }
}

fn run_mailbox(inner: &Arc<RuntimeInner>, mailbox: &Arc<Mailbox>) {
    CURRENT_ACTOR.set(Some(mailbox.id()));
    for _ in 0..inner.task_batch {
        match mailbox.next_task() {
            NextTask::Run(task) => {
                if catch_unwind(AssertUnwindSafe(task)).is_err() {
                    error!(actor = mailbox.id(), "actor task panicked");
                }
            }
            NextTask::Stopped => {
                CURRENT_ACTOR.set(None);
                mailbox.unregister();
                return;
            }
            NextTask::Idle => {
                CURRENT_ACTOR.set(None);
                return;
            }
        }
    }
    CURRENT_ACTOR.set(None);

    match mailbox.after_batch() {
        AfterBatch::Requeue => inner.push_runnable(Arc::clone(mailbox)),
        AfterBatch::Stopped => mailbox.unregister(),
        AfterBatch::Idle => {}
    }
}

/// Spawns a new actor on the default runtime.
#[must_use]
pub fn spawn() -> Pid {
    Runtime::default_runtime().spawn()
}

/// Requests that an actor stop.
///
/// Tasks already queued behind the in-flight one are dropped.
/// Idempotent; a handle to a gone actor is a no-op.
pub fn terminate(pid: &Pid) {
    if let Some(mailbox) = pid.mailbox() {
        if mailbox.terminate() {
            mailbox.unregister();
        }
        trace!(pid = %pid, "actor terminate requested");
    }
}

/// Blocks until an actor has fully stopped.
///
/// Returns true once the actor is gone. Waiting on the actor the
/// calling thread is currently executing on is refused (returns false)
/// rather than deadlocking.
pub fn wait(pid: &Pid) -> bool {
    wait_inner(pid, None)
}

/// Like [`wait`] with an upper bound.
///
/// Returns false if the actor had not stopped when `timeout` elapsed.
#[must_use]
pub fn wait_timeout(pid: &Pid, timeout: Duration) -> bool {
    wait_inner(pid, Some(timeout))
}

fn wait_inner(pid: &Pid, timeout: Option<Duration>) -> bool {
    if current_actor_id() == Some(pid.id()) {
        error!(pid = %pid, "refusing to wait on the currently executing actor");
        return false;
    }
    match pid.mailbox() {
        Some(mailbox) => mailbox.wait_stopped(timeout),
        // Already stopped and reaped.
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::dispatch;
    use std::sync::mpsc;

    fn test_runtime() -> Runtime {
        Runtime::new(RuntimeConfig::default().with_workers(4))
    }

    #[test]
    fn tasks_run_in_dispatch_order() {
        let runtime = test_runtime();
        let pid = runtime.spawn();
        let order = Arc::new(Mutex::new(Vec::new()));

        let (tx, rx) = mpsc::channel();
        for n in 0..100 {
            let order = Arc::clone(&order);
            let tx = tx.clone();
            dispatch(&pid, move || {
                order.lock().expect("test lock").push(n);
                if n == 99 {
                    tx.send(()).expect("test channel");
                }
            });
        }
        rx.recv_timeout(Duration::from_secs(5)).expect("tasks ran");

        let recorded = order.lock().expect("test lock").clone();
        assert_eq!(recorded, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn one_actor_never_runs_two_tasks_at_once() {
        let runtime = test_runtime();
        let pid = runtime.spawn();
        let in_task = Arc::new(AtomicBool::new(false));
        let overlap = Arc::new(AtomicBool::new(false));

        let (tx, rx) = mpsc::channel();
        for n in 0..200 {
            let in_task = Arc::clone(&in_task);
            let overlap = Arc::clone(&overlap);
            let tx = tx.clone();
            dispatch(&pid, move || {
                if in_task.swap(true, Ordering::SeqCst) {
                    overlap.store(true, Ordering::SeqCst);
                }
                std::thread::yield_now();
                in_task.store(false, Ordering::SeqCst);
                if n == 199 {
                    tx.send(()).expect("test channel");
                }
            });
        }
        rx.recv_timeout(Duration::from_secs(5)).expect("tasks ran");
        assert!(!overlap.load(Ordering::SeqCst));
    }

    #[test]
    fn actors_run_in_parallel_across_pids() {
        let runtime = test_runtime();
        let a = runtime.spawn();
        let b = runtime.spawn();

        // Task on `a` blocks until the task on `b` has run; only
        // possible if the two actors occupy different workers.
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (done_tx, done_rx) = mpsc::channel();

        dispatch(&a, move || {
            release_rx
                .recv_timeout(Duration::from_secs(5))
                .expect("released by actor b");
            done_tx.send(()).expect("test channel");
        });
        dispatch(&b, move || {
            release_tx.send(()).expect("test channel");
        });

        done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("actors overlapped");
    }

    #[test]
    fn tasks_observe_their_actor_identity() {
        let runtime = test_runtime();
        let pid = runtime.spawn();
        let (tx, rx) = mpsc::channel();

        let id = pid.id();
        dispatch(&pid, move || {
            tx.send(current_actor_id()).expect("test channel");
        });

        let observed = rx.recv_timeout(Duration::from_secs(5)).expect("task ran");
        assert_eq!(observed, Some(id));
        assert_eq!(current_actor_id(), None);
    }

    #[test]
    fn terminate_drops_queued_tasks_and_trips_the_latch() {
        let runtime = test_runtime();
        let pid = runtime.spawn();
        let ran = Arc::new(AtomicUsize::new(0));

        // Hold the actor busy so the follow-up tasks stay queued.
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        {
            let ran = Arc::clone(&ran);
            dispatch(&pid, move || {
                ran.fetch_add(1, Ordering::SeqCst);
                let _ = gate_rx.recv_timeout(Duration::from_secs(5));
            });
        }
        for _ in 0..10 {
            let ran = Arc::clone(&ran);
            dispatch(&pid, move || {
                ran.fetch_add(1, Ordering::SeqCst);
            });
        }

        terminate(&pid);
        gate_tx.send(()).expect("gate released");

        assert!(wait_timeout(&pid, Duration::from_secs(5)));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(runtime.actor_count(), 0);
    }

    #[test]
    fn terminate_is_idempotent() {
        let runtime = test_runtime();
        let pid = runtime.spawn();

        terminate(&pid);
        terminate(&pid);
        assert!(wait_timeout(&pid, Duration::from_secs(5)));
        assert_eq!(runtime.actor_count(), 0);
    }

    #[test]
    fn wait_on_gone_actor_returns_immediately() {
        let runtime = test_runtime();
        let pid = runtime.spawn();
        terminate(&pid);
        assert!(wait_timeout(&pid, Duration::from_secs(5)));

        // The registry entry is gone; the weak handle no longer
        // upgrades.
        assert!(wait(&pid));
    }

    #[test]
    fn self_wait_is_refused() {
        let runtime = test_runtime();
        let pid = runtime.spawn();
        let (tx, rx) = mpsc::channel();

        let me = pid.clone();
        dispatch(&pid, move || {
            tx.send(wait(&me)).expect("test channel");
        });

        let refused = rx.recv_timeout(Duration::from_secs(5)).expect("task ran");
        assert!(!refused);
        drop(runtime);
    }

    #[test]
    fn wait_timeout_expires_on_live_actor() {
        let runtime = test_runtime();
        let pid = runtime.spawn();
        assert!(!wait_timeout(&pid, Duration::from_millis(20)));
        drop(runtime);
    }

    #[test]
    fn dispatch_to_terminated_actor_is_dropped() {
        let runtime = test_runtime();
        let pid = runtime.spawn();
        terminate(&pid);
        assert!(wait_timeout(&pid, Duration::from_secs(5)));

        let ran = Arc::new(AtomicBool::new(false));
        {
            let ran = Arc::clone(&ran);
            dispatch(&pid, move || {
                ran.store(true, Ordering::SeqCst);
            });
        }
        thread::sleep(Duration::from_millis(50));
        assert!(!ran.load(Ordering::SeqCst));
        drop(runtime);
    }

    #[test]
    fn panicking_task_does_not_wedge_the_actor() {
        let runtime = test_runtime();
        let pid = runtime.spawn();
        let (tx, rx) = mpsc::channel();

        dispatch(&pid, || panic!("intentional"));
        dispatch(&pid, move || {
            tx.send(()).expect("test channel");
        });

        rx.recv_timeout(Duration::from_secs(5))
            .expect("actor survived the panic");
    }

    #[test]
    fn hot_actor_does_not_starve_the_pool() {
        let runtime = Runtime::new(
            RuntimeConfig::default()
                .with_workers(1)
                .with_task_batch(4),
        );
        let hot = runtime.spawn();
        let other = runtime.spawn();

        // Keep the hot actor saturated well past one batch.
        for _ in 0..64 {
            dispatch(&hot, || {
                std::thread::yield_now();
            });
        }
        let (tx, rx) = mpsc::channel();
        dispatch(&other, move || {
            tx.send(()).expect("test channel");
        });

        rx.recv_timeout(Duration::from_secs(5))
            .expect("other actor got a turn");
    }

    #[test]
    fn shutdown_and_wait_stops_workers() {
        let runtime = test_runtime();
        let pid = runtime.spawn();
        let (tx, rx) = mpsc::channel();
        dispatch(&pid, move || {
            tx.send(()).expect("test channel");
        });
        rx.recv_timeout(Duration::from_secs(5)).expect("task ran");

        assert!(runtime.shutdown_and_wait(Duration::from_secs(5)));
        assert_eq!(runtime.inner.active_workers.load(Ordering::Acquire), 0);
    }
}

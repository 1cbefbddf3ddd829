//! Spool: an actor-plus-future runtime with a stack-safe asynchronous
//! loop primitive.
//!
//! # Overview
//!
//! Spool embeds a small message-passing runtime: actors are bare
//! serialized execution contexts addressed by opaque [`Pid`] handles,
//! with per-actor FIFO mailboxes processed one task at a time by a
//! shared worker pool. On top of it, one-shot [`Future`]/[`Promise`]
//! cells carry asynchronous results with cooperative cancellation
//! (discard), and [`loop_`] expresses an asynchronous do/while loop
//! without growing the stack per iteration.
//!
//! # Core Guarantees
//!
//! - **Serialized actors**: everything dispatched to one pid runs in
//!   dispatch order, one task at a time
//! - **Stack-safe loops**: consecutive ready iterations drain in a
//!   plain iteration; suspension re-enters through the actor mailbox
//! - **Cooperative cancellation**: discard is a request the producer
//!   honors, never an error and never a silent drop of a settled value
//! - **At-most-once settlement**: a future settles exactly once;
//!   dropping an unsettled promise discards it
//!
//! # Module Structure
//!
//! - [`future`]: one-shot asynchronous values (`Future`, `Promise`)
//! - [`pid`]: opaque actor handles
//! - [`runtime`]: worker pool, actor registry, lifecycle
//!   (`spawn`/`terminate`/`wait`)
//! - [`dispatch`]: posting work onto actors (`dispatch`, `defer`)
//! - [`queue`]: an unbounded asynchronous queue
//! - [`looping`]: the asynchronous loop primitive (`loop_`,
//!   `loop_detached`)
//!
//! # Example
//!
//! ```ignore
//! use spool::{loop_, spawn, Future};
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use std::sync::Arc;
//!
//! let pid = spawn();
//! let counter = Arc::new(AtomicU64::new(0));
//!
//! let produced = Arc::clone(&counter);
//! let consumed = Arc::clone(&counter);
//! let done = loop_(
//!     &pid,
//!     move || Future::ready(produced.load(Ordering::SeqCst)),
//!     move |_value| {
//!         let n = consumed.fetch_add(1, Ordering::SeqCst) + 1;
//!         Future::ready(n < 5)
//!     },
//! );
//!
//! assert!(done.wait_timeout(std::time::Duration::from_secs(5)));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod dispatch;
pub mod future;
pub mod looping;
pub mod pid;
pub mod queue;
pub mod runtime;

pub use dispatch::{defer, dispatch};
pub use future::{Future, FutureState, Promise};
pub use looping::{loop_, loop_detached};
pub use pid::Pid;
pub use queue::Queue;
pub use runtime::{
    current_actor_id, spawn, terminate, wait, wait_timeout, Runtime, RuntimeConfig,
};

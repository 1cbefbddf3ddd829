//! Law-style property tests for the loop primitive.
//!
//! The termination and failure-propagation laws hold for every
//! iteration count, not just the hand-picked ones in the scenario
//! suite, so they are checked here over generated inputs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use spool::{loop_, Future, Runtime, RuntimeConfig};

fn law_runtime() -> Runtime {
    Runtime::new(RuntimeConfig::default().with_workers(2))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// If `body` returns ready-true for the first n-1 values and
    /// ready-false for the n-th, the loop settles ready after exactly
    /// n iterate and n body invocations.
    #[test]
    fn termination_law(n in 1usize..200) {
        let runtime = law_runtime();
        let pid = runtime.spawn();

        let iterate_calls = Arc::new(AtomicUsize::new(0));
        let body_calls = Arc::new(AtomicUsize::new(0));

        let result = loop_(
            &pid,
            {
                let iterate_calls = Arc::clone(&iterate_calls);
                move || {
                    iterate_calls.fetch_add(1, Ordering::SeqCst);
                    Future::ready(0_u32)
                }
            },
            {
                let body_calls = Arc::clone(&body_calls);
                move |_value| {
                    let k = body_calls.fetch_add(1, Ordering::SeqCst) + 1;
                    Future::ready(k < n)
                }
            },
        );

        prop_assert!(result.wait_timeout(Duration::from_secs(10)));
        prop_assert!(result.is_ready());
        prop_assert_eq!(iterate_calls.load(Ordering::SeqCst), n);
        prop_assert_eq!(body_calls.load(Ordering::SeqCst), n);
    }

    /// If the k-th iterate future fails, the loop fails with the same
    /// reason after k iterate and k-1 body invocations, and nothing
    /// runs afterwards.
    #[test]
    fn iterate_failure_law((total, fail_at) in (2usize..60).prop_flat_map(|n| (Just(n), 1..n))) {
        let _ = total;
        let runtime = law_runtime();
        let pid = runtime.spawn();

        let iterate_calls = Arc::new(AtomicUsize::new(0));
        let body_calls = Arc::new(AtomicUsize::new(0));

        let result = loop_(
            &pid,
            {
                let iterate_calls = Arc::clone(&iterate_calls);
                move || {
                    let k = iterate_calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if k == fail_at {
                        Future::failed("gone")
                    } else {
                        Future::ready(0_u32)
                    }
                }
            },
            {
                let body_calls = Arc::clone(&body_calls);
                move |_value| {
                    body_calls.fetch_add(1, Ordering::SeqCst);
                    Future::ready(true)
                }
            },
        );

        prop_assert!(result.wait_timeout(Duration::from_secs(10)));
        prop_assert!(result.is_failed());
        prop_assert_eq!(result.failure(), Some("gone".to_string()));
        prop_assert_eq!(iterate_calls.load(Ordering::SeqCst), fail_at);
        prop_assert_eq!(body_calls.load(Ordering::SeqCst), fail_at - 1);
    }

    /// Same law for a failing body: k body invocations, k iterate
    /// invocations, reason verbatim.
    #[test]
    fn body_failure_law((total, fail_at) in (2usize..60).prop_flat_map(|n| (Just(n), 1..n))) {
        let _ = total;
        let runtime = law_runtime();
        let pid = runtime.spawn();

        let iterate_calls = Arc::new(AtomicUsize::new(0));
        let body_calls = Arc::new(AtomicUsize::new(0));

        let result = loop_(
            &pid,
            {
                let iterate_calls = Arc::clone(&iterate_calls);
                move || {
                    iterate_calls.fetch_add(1, Ordering::SeqCst);
                    Future::ready(0_u32)
                }
            },
            {
                let body_calls = Arc::clone(&body_calls);
                move |_value| {
                    let k = body_calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if k == fail_at {
                        Future::failed("boom")
                    } else {
                        Future::ready(true)
                    }
                }
            },
        );

        prop_assert!(result.wait_timeout(Duration::from_secs(10)));
        prop_assert!(result.is_failed());
        prop_assert_eq!(result.failure(), Some("boom".to_string()));
        prop_assert_eq!(iterate_calls.load(Ordering::SeqCst), fail_at);
        prop_assert_eq!(body_calls.load(Ordering::SeqCst), fail_at);
    }
}

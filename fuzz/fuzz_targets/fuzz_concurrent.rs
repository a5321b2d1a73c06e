#![no_main]

//! Fuzz target for concurrent resolution
//!
//! Exercises parallel resolution against a single scope: the memo maps
//! must stay consistent and singletons must construct exactly once.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use wirebox::{Container, Dep, Provider, Scope};

#[derive(Clone, Debug, Arbitrary)]
struct SharedConfig {
    value: u32,
}

#[derive(Clone, Debug)]
struct Tracked {
    instance: u64,
}

#[derive(Debug, Clone, Arbitrary)]
enum ThreadOp {
    GetConfig,
    GetTracked,
    GetMarker,
    Plan,
}

#[derive(Debug, Arbitrary)]
struct Scenario {
    config: SharedConfig,
    thread_count: u8,
    ops: Vec<ThreadOp>,
}

static BUILT: AtomicU64 = AtomicU64::new(0);

fuzz_target!(|scenario: Scenario| {
    let container = Container::new("fuzz-concurrent");
    container
        .register(Provider::value(scenario.config))
        .unwrap();
    container
        .register(
            Provider::singleton(|| Tracked {
                instance: BUILT.fetch_add(1, Ordering::SeqCst),
            })
            .thread_safe(true),
        )
        .unwrap();

    let scope = Scope::new(container);
    let injector = scope.injector().unwrap();

    let before = BUILT.load(Ordering::SeqCst);
    let thread_count = (scenario.thread_count % 8).max(1) as usize;
    let ops = scenario.ops;

    let mut handles = Vec::new();
    for _ in 0..thread_count {
        let injector = Arc::clone(&injector);
        let scope = Arc::clone(&scope);
        let ops = ops.clone();
        handles.push(thread::spawn(move || {
            for op in ops.into_iter().take(50) {
                match op {
                    ThreadOp::GetConfig => {
                        let _ = injector.get::<SharedConfig>();
                    }
                    ThreadOp::GetTracked => {
                        let _ = injector.get::<Tracked>();
                    }
                    ThreadOp::GetMarker => {
                        let _ = injector.call(Dep::of::<Tracked>().only_self().key());
                    }
                    ThreadOp::Plan => {
                        let _ = scope.binding(wirebox::Injectable::of::<Tracked>());
                    }
                }
            }
        }));
    }
    for handle in handles {
        let _ = handle.join();
    }

    // Single-flight: at most one construction happened for this scope
    assert!(BUILT.load(Ordering::SeqCst) - before <= 1);
});

#![no_main]

//! Fuzz target for injector lifecycle sequences
//!
//! Arbitrary setup/reset/resolve interleavings must never corrupt the
//! state machine: every misuse surfaces as a typed error.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use wirebox::{Container, InjectError, Provider, Scope};

#[derive(Clone, Debug, Arbitrary)]
struct SimpleService {
    value: u32,
}

#[derive(Debug, Arbitrary)]
enum LifecycleOp {
    Setup,
    Reset,
    Get,
    BuildFresh,
    Activate,
}

#[derive(Debug, Arbitrary)]
struct Scenario {
    service: SimpleService,
    ops: Vec<LifecycleOp>,
}

fuzz_target!(|scenario: Scenario| {
    let container = Container::new("fuzz-lifecycle");
    container
        .register(
            Provider::singleton(move || SimpleService {
                value: scenario.service.value,
            })
            .dispose_with(|_| Ok(())),
        )
        .unwrap();
    let scope = Scope::new(container);

    let mut injector = scope.build_injector().unwrap();

    for op in scenario.ops.into_iter().take(32) {
        match op {
            LifecycleOp::Setup => {
                let _ = injector.setup();
            }
            LifecycleOp::Reset => {
                let _ = injector.reset();
            }
            LifecycleOp::Get => {
                match injector.get::<SimpleService>() {
                    Ok(_) => assert!(injector.is_active()),
                    Err(InjectError::State { .. }) => assert!(!injector.is_active()),
                    Err(other) => panic!("unexpected error: {other:?}"),
                }
            }
            LifecycleOp::BuildFresh => {
                injector = scope.build_injector().unwrap();
            }
            LifecycleOp::Activate => {
                if let Ok(guard) = scope.activate() {
                    let _ = guard.get::<SimpleService>();
                }
            }
        }
    }
});

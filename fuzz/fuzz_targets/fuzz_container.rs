#![no_main]

//! Fuzz target for wiring and resolution
//!
//! Drives registration, include graphs and marker resolution with
//! arbitrary data patterns; wiring errors are expected, panics are not.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use wirebox::{Container, Dep, Injectable, Provider, Scope, Union};

#[derive(Clone, Debug, Arbitrary)]
struct SmallService {
    id: u32,
    name: String,
}

#[derive(Clone, Debug, Arbitrary)]
struct MediumService {
    id: u64,
    data: Vec<u8>,
}

#[derive(Debug, Arbitrary)]
enum WiringOp {
    RegisterSmall(SmallService),
    RegisterMedium(MediumService),
    RegisterSealedSmall(SmallService),
    RegisterFallbackSmall(SmallService),
    RegisterAliasToSmall,
    RegisterFactory,
    IncludeChildWithMedium(MediumService),
}

#[derive(Debug, Arbitrary)]
enum ResolveOp {
    Small,
    Medium,
    OnlySelfSmall,
    SkipSelfSmall,
    UnionSmallMedium,
    DefaultedMissing,
}

#[derive(Debug, Arbitrary)]
struct Scenario {
    wiring: Vec<WiringOp>,
    resolves: Vec<ResolveOp>,
}

struct Absent;

fuzz_target!(|scenario: Scenario| {
    let container = Container::new("fuzz");

    for op in scenario.wiring.into_iter().take(16) {
        match op {
            WiringOp::RegisterSmall(svc) => {
                let _ = container.register(Provider::value(svc));
            }
            WiringOp::RegisterMedium(svc) => {
                let _ = container.register(Provider::value(svc));
            }
            WiringOp::RegisterSealedSmall(svc) => {
                let _ = container.register(Provider::value(svc).sealed());
            }
            WiringOp::RegisterFallbackSmall(svc) => {
                let _ = container.register(Provider::value(svc).fallback());
            }
            WiringOp::RegisterAliasToSmall => {
                let _ = container.register(
                    Provider::alias(Injectable::of::<SmallService>())
                        .provide(Injectable::of::<MediumService>()),
                );
            }
            WiringOp::RegisterFactory => {
                let _ = container.register(Provider::factory(|| SmallService {
                    id: 1,
                    name: "factory".into(),
                }));
            }
            WiringOp::IncludeChildWithMedium(svc) => {
                let child = Container::new("fuzz-child");
                let _ = child.register(Provider::value(svc));
                let _ = container.include([child]);
            }
        }
    }

    let scope = Scope::new(container);
    let Ok(injector) = scope.injector() else {
        return;
    };

    for op in scenario.resolves.into_iter().take(32) {
        match op {
            ResolveOp::Small => {
                let _ = injector.get::<SmallService>();
            }
            ResolveOp::Medium => {
                let _ = injector.get::<MediumService>();
            }
            ResolveOp::OnlySelfSmall => {
                let _ = injector.call(Dep::of::<SmallService>().only_self().key());
            }
            ResolveOp::SkipSelfSmall => {
                let _ = injector.call(Dep::of::<SmallService>().skip_self().key());
            }
            ResolveOp::UnionSmallMedium => {
                let _ = injector.call(Union::of([
                    Injectable::of::<SmallService>(),
                    Injectable::of::<MediumService>(),
                ]));
            }
            ResolveOp::DefaultedMissing => {
                let _ = injector.call(
                    Dep::of::<Absent>()
                        .default_value(SmallService {
                            id: 0,
                            name: String::new(),
                        })
                        .key(),
                );
            }
        }
    }
});

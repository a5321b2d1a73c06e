//! # Wirebox - Layered Dependency Injection for Rust
//!
//! A dependency-injection runtime that resolves abstract keys into
//! concrete values through a layered container graph.
//!
//! ## Features
//!
//! - 🗂 **Layered containers** - registries compose into a provider
//!   resolution order (PRO) with include-order traversal
//! - 🔎 **Predicate algebra** - filter the PRO per key: access levels,
//!   `only_self`/`skip_self`, slices and arbitrary filters composed with
//!   `&`, `|`, `-`, `!`
//! - 🧊 **Frozen plans** - every key resolves once into an immutable
//!   dependency record, memoized per `(key, container, locality)`
//! - 🔁 **Scoped injectors** - scope chains plan, injectors execute;
//!   singleton values are cached per injector with single-flight
//!   construction
//! - ⚡ **Lock-free hot path** - `DashMap` memo caches; published
//!   singletons read without locking
//! - 🪝 **Resource tracking** - scoped resources release LIFO at reset
//! - 🌊 **Async edges** - awaitable factories and edges plan into future
//!   wrappers; executing them is the caller's executor's business
//! - 📊 **Observable** - optional tracing integration with JSON or
//!   pretty output
//!
//! ## Quick Start
//!
//! ```rust
//! use wirebox::{Container, Provider, Scope};
//! use std::sync::Arc;
//!
//! struct Database {
//!     url: String,
//! }
//!
//! struct UserService {
//!     db: Arc<Database>,
//! }
//!
//! let container = Container::new("app");
//! container
//!     .register(Provider::value(Database {
//!         url: "postgres://localhost".into(),
//!     }))
//!     .unwrap();
//! // Arc<T> parameters become dependency edges keyed by T
//! container
//!     .register(Provider::factory(|db: Arc<Database>| UserService { db }))
//!     .unwrap();
//!
//! let scope = Scope::new(container);
//! let injector = scope.injector().unwrap();
//!
//! let users = injector.get::<UserService>().unwrap();
//! assert_eq!(users.db.url, "postgres://localhost");
//! ```
//!
//! ## Markers
//!
//! ```rust
//! use wirebox::{Container, Dep, Provider, Scope};
//!
//! struct Cache;
//!
//! let parent = Container::new("app");
//! parent.register(Provider::value(Cache)).unwrap();
//! let parent_scope = Scope::new(parent);
//! let request_scope = Scope::with_parent(Container::new("request"), parent_scope);
//! let injector = request_scope.injector().unwrap();
//!
//! // skip_self resolves from the ancestor chain
//! assert!(injector.call(Dep::of::<Cache>().skip_self().key()).is_ok());
//! // only_self refuses to leave the request scope
//! assert!(injector.call(Dep::of::<Cache>().only_self().key()).is_err());
//! ```
//!
//! ## Lifetimes
//!
//! ```rust
//! use wirebox::{Container, Provider, Scope};
//!
//! #[derive(Default)]
//! struct Config;
//!
//! let container = Container::new("app");
//! // Singleton: constructed once per injector, then shared
//! container
//!     .register(Provider::singleton(Config::default).thread_safe(true))
//!     .unwrap();
//! let scope = Scope::new(container);
//! let injector = scope.injector().unwrap();
//!
//! let a = injector.get::<Config>().unwrap();
//! let b = injector.get::<Config>().unwrap();
//! assert!(std::sync::Arc::ptr_eq(&a, &b));
//! ```

mod container;
mod dependency;
mod error;
mod injector;
mod key;
#[cfg(feature = "logging")]
pub mod logging;
mod params;
mod predicate;
mod provider;
mod scope;

pub use container::*;
pub use dependency::*;
pub use error::*;
pub use injector::*;
pub use key::*;
pub use params::*;
pub use predicate::*;
pub use provider::*;
pub use scope::*;

// Re-export tracing macros for convenience when logging is enabled
#[cfg(feature = "logging")]
pub use tracing::{debug, error, info, trace, warn};

// Re-export for convenience
pub use std::sync::Arc;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        arg, arg_key, cast, injected, AccessLevel, Container, Dep, InjectError, Injectable,
        Injector, Lookup, Predicate, Provider, Result, Scope, Union,
    };
    pub use std::sync::Arc;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Token(&'static str);

    #[test]
    fn scenario_value_hit() {
        let container = Container::new("app");
        container.register(Provider::value(Token("x"))).unwrap();
        let scope = Scope::new(container);

        let dep = scope.binding(Injectable::of::<Token>()).unwrap();
        assert!(!dep.is_unresolved());

        let injector = scope.injector().unwrap();
        assert_eq!(injector.get::<Token>().unwrap().0, "x");
    }

    #[test]
    fn scenario_parent_fallback() {
        static RESOLVED: AtomicU32 = AtomicU32::new(0);

        struct Answer(u32);

        let parent_container = Container::new("parent");
        parent_container
            .register(Provider::factory(|| {
                RESOLVED.fetch_add(1, Ordering::SeqCst);
                Answer(1)
            }))
            .unwrap();
        let parent_scope = Scope::new(parent_container);
        let child_scope = Scope::with_parent(Container::new("child"), parent_scope);
        let injector = child_scope.injector().unwrap();

        assert_eq!(injector.get::<Answer>().unwrap().0, 1);

        // Memoized: the second lookup reuses the child's record without
        // re-entering parent resolution
        let first = child_scope.binding(Injectable::of::<Answer>()).unwrap();
        let second = child_scope.binding(Injectable::of::<Answer>()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn scenario_only_self_blocks_parent() {
        struct Session;

        let parent_container = Container::new("parent");
        parent_container.register(Provider::value(Session)).unwrap();
        let parent_scope = Scope::new(parent_container);
        let child_scope = Scope::with_parent(Container::new("child"), parent_scope);
        let injector = child_scope.injector().unwrap();

        let err = injector
            .call(Dep::of::<Session>().only_self().key())
            .unwrap_err();
        assert!(err.is_lookup());
    }

    #[test]
    fn scenario_alias_chain() {
        struct A;
        struct B;
        struct C(&'static str);

        let container = Container::new("app");
        container.register(Provider::value(C("z"))).unwrap();
        container
            .register(Provider::alias(Injectable::of::<C>()).provide(Injectable::of::<B>()))
            .unwrap();
        container
            .register(Provider::alias(Injectable::of::<B>()).provide(Injectable::of::<A>()))
            .unwrap();
        let scope = Scope::new(container);
        let injector = scope.injector().unwrap();

        let via_a = injector.get_key::<C>(Injectable::of::<A>()).unwrap();
        assert_eq!(via_a.0, "z");

        let direct = injector.get::<C>().unwrap();
        assert!(Arc::ptr_eq(&via_a, &direct));
    }

    #[test]
    fn scenario_union_narrowing() {
        struct X;
        struct Y(&'static str);

        let container = Container::new("app");
        container.register(Provider::value(Y("y"))).unwrap();
        let scope = Scope::new(container);
        let injector = scope.injector().unwrap();

        let key = Union::of([Injectable::of::<X>(), Injectable::of::<Y>()]);
        let value = injector.get_key::<Y>(key).unwrap();
        assert_eq!(value.0, "y");
    }

    #[test]
    fn lookup_projects_the_resolved_target() {
        struct Config {
            url: String,
        }

        let container = Container::new("app");
        container
            .register(Provider::value(Config {
                url: "pg://db".into(),
            }))
            .unwrap();
        let scope = Scope::new(container);
        let injector = scope.injector().unwrap();

        let key = Lookup::of::<Config>()
            .map("url", |c: &Config| c.url.clone())
            .key();
        let url = injector.get_key::<String>(key).unwrap();
        assert_eq!(*url, "pg://db");
    }

    #[test]
    fn callable_shape_returns_the_planned_callable() {
        struct Port(u16);

        let container = Container::new("app");
        container.register(Provider::callable(|| Port(8080))).unwrap();
        let scope = Scope::new(container);
        let injector = scope.injector().unwrap();

        let planned = injector
            .get_key::<InjectedCall>(Injectable::of::<Port>())
            .unwrap();
        let out = planned.invoke().unwrap();
        assert_eq!(cast::<Port>(&out).unwrap().0, 8080);
    }

    #[test]
    fn partial_merges_call_site_arguments() {
        struct Base(u32);
        struct Sum(u32);

        let container = Container::new("app");
        container.register(Provider::value(Base(10))).unwrap();

        let call = Callable::sync(|args: CallArgs| {
            let base = args.arg::<Base>(0)?;
            let extra = args.arg::<u32>(1)?;
            Ok(injected(Sum(base.0 + *extra)))
        });
        let signature = Signature::new(vec![ParamSpec::positional("base").of::<Base>()]);
        container
            .register(Provider::partial_parts(call, signature).provide(Injectable::of::<Sum>()))
            .unwrap();
        let scope = Scope::new(container);
        let injector = scope.injector().unwrap();

        let planned = injector
            .get_key::<InjectedCall>(Injectable::of::<Sum>())
            .unwrap();
        let out = planned
            .call(CallArgs::new(vec![injected(5u32)], vec![]))
            .unwrap();
        assert_eq!(cast::<Sum>(&out).unwrap().0, 15);
    }

    #[test]
    fn partial_call_site_keywords_skip_planned_deps() {
        struct Cfg(u32);
        struct Out(u32);

        let container = Container::new("app");
        container.register(Provider::value(Cfg(1))).unwrap();

        let call = Callable::sync(|args: CallArgs| {
            let cfg = args.named::<Cfg>("cfg")?;
            Ok(injected(Out(cfg.0)))
        });
        let signature = Signature::new(vec![ParamSpec::keyword("cfg").of::<Cfg>()]);
        container
            .register(Provider::partial_parts(call, signature).provide(Injectable::of::<Out>()))
            .unwrap();
        let scope = Scope::new(container);
        let injector = scope.injector().unwrap();

        let planned = injector
            .get_key::<InjectedCall>(Injectable::of::<Out>())
            .unwrap();

        // Planned keyword dep used when the call site stays silent
        let out = planned.call(CallArgs::empty()).unwrap();
        assert_eq!(cast::<Out>(&out).unwrap().0, 1);

        // Call-site keyword overrides and skips the planned dep
        let out = planned
            .call(CallArgs::new(vec![], vec![("cfg", injected(Cfg(9)))]))
            .unwrap();
        assert_eq!(cast::<Out>(&out).unwrap().0, 9);
    }

    #[tokio::test]
    async fn async_factory_resolves_through_futures() {
        struct Remote(u32);

        let container = Container::new("app");
        container
            .register(Provider::async_factory(|| async { Remote(7) }))
            .unwrap();
        let scope = Scope::new(container);
        let injector = scope.injector().unwrap();

        // The binding is tagged async; synchronous production refuses
        let err = injector.call(Injectable::of::<Remote>()).unwrap_err();
        assert!(matches!(err, InjectError::AsyncBinding { .. }));

        let value = injector
            .get_async::<Remote>(Injectable::of::<Remote>())
            .await
            .unwrap();
        assert_eq!(value.0, 7);
    }

    #[tokio::test]
    async fn async_edges_infect_dependents() {
        struct AuthToken(u32);
        struct Client {
            token: u32,
        }

        let container = Container::new("app");
        container
            .register(Provider::async_factory(|| async { AuthToken(3) }))
            .unwrap();
        container
            .register(Provider::factory(|token: Arc<AuthToken>| Client {
                token: token.0,
            }))
            .unwrap();
        let scope = Scope::new(container);

        let dep = scope.binding(Injectable::of::<Client>()).unwrap();
        assert!(dep.is_async());

        let injector = scope.injector().unwrap();
        let client = injector
            .get_async::<Client>(Injectable::of::<Client>())
            .await
            .unwrap();
        assert_eq!(client.token, 3);
    }

    #[test]
    fn factory_overrides_bind_literal_arguments() {
        struct Left(u32);
        struct Pair(u32, u32);

        let container = Container::new("app");
        container.register(Provider::value(Left(4))).unwrap();

        let call = Callable::sync(|args: CallArgs| {
            let left = args.arg::<Left>(0)?;
            let right = args.named::<u32>("right")?;
            Ok(injected(Pair(left.0, *right)))
        });
        let signature = Signature::new(vec![
            ParamSpec::positional("left").of::<Left>(),
            ParamSpec::keyword("right"),
        ]);
        container
            .register(
                Provider::factory_parts(call, signature)
                    .provide(Injectable::of::<Pair>())
                    .args([arg_key(Injectable::of::<Left>())])
                    .kwarg("right", arg(2u32)),
            )
            .unwrap();
        let scope = Scope::new(container);
        let injector = scope.injector().unwrap();

        let pair = injector.get::<Pair>().unwrap();
        assert_eq!((pair.0, pair.1), (4, 2));
    }

    #[test]
    fn dep_marker_default_key_injects_the_fallback() {
        struct Primary;
        struct Standby(&'static str);

        let container = Container::new("app");
        container.register(Provider::value(Standby("standby"))).unwrap();
        let scope = Scope::new(container);
        let injector = scope.injector().unwrap();

        let key = Dep::of::<Primary>()
            .default_key(Injectable::of::<Standby>())
            .key();
        let value = injector.get_key::<Standby>(key).unwrap();
        assert_eq!(value.0, "standby");
    }
}

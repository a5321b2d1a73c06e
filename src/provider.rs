//! Providers: immutable declarations of how to produce a value
//!
//! A [`Provider`] pairs a production kind (value, alias, factory, union,
//! annotated, injector context, marker redirect) with registration flags.
//! Composition turns a provider into an immutable [`Dependency`] for a
//! requesting scope; a provider that cannot satisfy a key yields `None`.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::container::ContainerId;
use crate::dependency::Dependency;
use crate::error::Result;
use crate::injector::Injector;
use crate::key::{injected, Injectable, Injected};
use crate::params::{
    bind_params, ArgSource, Arguments, Callable, IntoAsyncInjectFn, IntoInjectFn, Signature,
};
use crate::predicate::{AccessLevel, Locality};
use crate::scope::{ResolveCtx, Scope};

#[cfg(feature = "logging")]
use tracing::trace;

/// Predicate deciding whether a provider participates for a scope.
pub type Guard = Arc<dyn Fn(&Scope) -> bool + Send + Sync>;

/// Scoped-resource release hook, run LIFO at injector reset.
pub type Disposer = Arc<dyn Fn(&Injected) -> Result<()> + Send + Sync>;

/// How a factory surfaces to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactoryShape {
    /// Bound factory returns the produced value
    Factory,
    /// Bound factory returns the planned callable itself
    Callable,
    /// Bound factory returns a callable merging call-site arguments
    Partial,
}

/// A factory declaration: erased callable, its signature, call-site
/// overrides and surface shape.
#[derive(Clone)]
pub struct FactorySpec {
    pub(crate) call: Callable,
    pub(crate) signature: Signature,
    pub(crate) arguments: Arguments,
    pub(crate) shape: FactoryShape,
    pub(crate) shared: bool,
}

/// Production kind of a provider.
#[derive(Clone)]
pub enum ProviderKind {
    /// A pre-built value
    Value(Injected),
    /// Redirect to another key in the same scope
    Alias(Injectable),
    /// Produce through a callable (factory, singleton, callable, partial)
    Factory(FactorySpec),
    /// First registered member wins
    Union(Vec<Injectable>),
    /// Metadata keys tried before the base
    Annotated {
        base: Injectable,
        meta: Vec<Injectable>,
    },
    /// Yields the calling injector
    InjectorContext,
    /// Redirect to a dependency marker's target
    DepMarker(Injectable),
}

/// An immutable provider declaration plus registration flags.
pub struct Provider {
    kind: ProviderKind,
    provides: Option<Injectable>,
    container: OnceCell<ContainerId>,
    access: Option<AccessLevel>,
    locality: Locality,
    is_default: bool,
    is_final: bool,
    autoload: bool,
    thread_safe: bool,
    guard: Option<Guard>,
    disposer: Option<Disposer>,
}

impl Provider {
    fn new(kind: ProviderKind, provides: Option<Injectable>) -> Self {
        Self {
            kind,
            provides,
            container: OnceCell::new(),
            access: None,
            locality: Locality::Global,
            is_default: false,
            is_final: false,
            autoload: false,
            thread_safe: false,
            guard: None,
            disposer: None,
        }
    }

    // =========================================================================
    // Constructors
    // =========================================================================

    /// Provide a pre-built value, keyed by its type.
    pub fn value<T: Send + Sync + 'static>(value: T) -> Self {
        Self::new(ProviderKind::Value(injected(value)), Some(Injectable::of::<T>()))
    }

    /// Provide a pre-built erased value under an explicit key.
    pub fn value_keyed(key: impl Into<Injectable>, value: Injected) -> Self {
        Self::new(ProviderKind::Value(value), Some(key.into()))
    }

    /// Redirect to `target`. Call [`provide`](Self::provide) to set the
    /// alias key.
    pub fn alias(target: impl Into<Injectable>) -> Self {
        Self::new(ProviderKind::Alias(target.into()), None)
    }

    /// Factory from a typed closure; `Arc<T>` parameters become
    /// type-annotated dependency edges, and the key defaults to the
    /// return type.
    pub fn factory<M>(f: impl IntoInjectFn<M>) -> Self {
        let provides = f.return_key();
        let (call, signature) = f.into_parts();
        Self::factory_parts(call, signature).provide(provides)
    }

    /// Factory from an erased callable and an explicit signature.
    pub fn factory_parts(call: Callable, signature: Signature) -> Self {
        Self::new(
            ProviderKind::Factory(FactorySpec {
                call,
                signature,
                arguments: Arguments::new(),
                shape: FactoryShape::Factory,
                shared: false,
            }),
            None,
        )
    }

    /// Async factory from a typed closure returning a future.
    pub fn async_factory<M>(f: impl IntoAsyncInjectFn<M>) -> Self {
        let provides = f.return_key();
        let (call, signature) = f.into_parts();
        Self::factory_parts(call, signature).provide(provides)
    }

    /// Shared factory: the value is constructed once per injector.
    pub fn singleton<M>(f: impl IntoInjectFn<M>) -> Self {
        Self::factory(f).shared(true)
    }

    /// The caller receives the planned callable, not its result.
    pub fn callable<M>(f: impl IntoInjectFn<M>) -> Self {
        Self::factory(f).shape(FactoryShape::Callable)
    }

    /// Callable from erased parts.
    pub fn callable_parts(call: Callable, signature: Signature) -> Self {
        Self::factory_parts(call, signature).shape(FactoryShape::Callable)
    }

    /// The caller receives a callable that merges call-site arguments
    /// with the planned ones.
    pub fn partial<M>(f: impl IntoInjectFn<M>) -> Self {
        Self::factory(f).shape(FactoryShape::Partial)
    }

    /// Partial from erased parts.
    pub fn partial_parts(call: Callable, signature: Signature) -> Self {
        Self::factory_parts(call, signature).shape(FactoryShape::Partial)
    }

    /// Resolve whichever member is provided first, in declaration order.
    /// Keyed by the equivalent union marker unless overridden.
    pub fn union(members: impl IntoIterator<Item = Injectable>) -> Self {
        let members: Vec<Injectable> = members.into_iter().collect();
        let key = Injectable::Union(members.clone().into());
        Self::new(ProviderKind::Union(members), Some(key))
    }

    /// Try metadata keys, then the base. Keyed by the equivalent
    /// annotated marker unless overridden.
    pub fn annotated(base: impl Into<Injectable>, meta: impl IntoIterator<Item = Injectable>) -> Self {
        let base = base.into();
        let meta: Vec<Injectable> = meta.into_iter().collect();
        let key = crate::key::Annotated::key(base.clone(), meta.clone());
        Self::new(ProviderKind::Annotated { base, meta }, Some(key))
    }

    /// Yields the injector evaluating the binding.
    pub fn injector_context() -> Self {
        Self::new(
            ProviderKind::InjectorContext,
            Some(Injectable::of::<Injector>()),
        )
    }

    /// Redirect a key to a dependency marker's target.
    pub fn dep_marker(marker: impl Into<Injectable>) -> Self {
        Self::new(ProviderKind::DepMarker(marker.into()), None)
    }

    // =========================================================================
    // Builder options
    // =========================================================================

    /// Set (or override) the key this provider is registered under.
    pub fn provide(mut self, key: impl Into<Injectable>) -> Self {
        self.provides = Some(key.into());
        self
    }

    /// Positional call-site overrides for a factory.
    pub fn args(mut self, args: impl IntoIterator<Item = ArgSource>) -> Self {
        if let ProviderKind::Factory(spec) = &mut self.kind {
            spec.arguments = std::mem::take(&mut spec.arguments).positional(args);
        }
        self
    }

    /// Keyword call-site override for a factory.
    pub fn kwarg(mut self, name: &'static str, source: ArgSource) -> Self {
        if let ProviderKind::Factory(spec) = &mut self.kind {
            spec.arguments = std::mem::take(&mut spec.arguments).keyword(name, source);
        }
        self
    }

    /// Toggle shared (once-per-injector) construction.
    pub fn shared(mut self, shared: bool) -> Self {
        if let ProviderKind::Factory(spec) = &mut self.kind {
            spec.shared = shared;
        }
        self
    }

    fn shape(mut self, shape: FactoryShape) -> Self {
        if let ProviderKind::Factory(spec) = &mut self.kind {
            spec.shape = shape;
        }
        self
    }

    /// Guard the shared value slot with a lock. Single-threaded builds
    /// keep the lock-free path.
    pub fn thread_safe(mut self, thread_safe: bool) -> Self {
        self.thread_safe = thread_safe;
        self
    }

    /// Bind (and invoke) eagerly when an injector activates.
    pub fn autoload(mut self) -> Self {
        self.autoload = true;
        self
    }

    /// Seal the key: no later provider may override this one.
    pub fn sealed(mut self) -> Self {
        self.is_final = true;
        self
    }

    /// Lowest priority: used only when nothing else provides the key.
    pub fn fallback(mut self) -> Self {
        self.is_default = true;
        self
    }

    /// Access level required to see this provider. Defaults to the
    /// owning container's policy.
    pub fn access(mut self, level: AccessLevel) -> Self {
        self.access = Some(level);
        self
    }

    /// Confine to the owning container's local registry.
    pub fn local(mut self) -> Self {
        self.locality = Locality::Local;
        self
    }

    /// Participate only when the guard accepts the resolving scope.
    pub fn when(mut self, guard: impl Fn(&Scope) -> bool + Send + Sync + 'static) -> Self {
        self.guard = Some(Arc::new(guard));
        self
    }

    /// Treat produced values as scoped resources released at reset.
    /// Honored for shared factories.
    pub fn dispose_with(mut self, f: impl Fn(&Injected) -> Result<()> + Send + Sync + 'static) -> Self {
        self.disposer = Some(Arc::new(f));
        self
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn key(&self) -> Option<&Injectable> {
        self.provides.as_ref()
    }

    pub fn kind(&self) -> &ProviderKind {
        &self.kind
    }

    pub fn is_final(&self) -> bool {
        self.is_final
    }

    pub fn is_default(&self) -> bool {
        self.is_default
    }

    pub fn is_autoload(&self) -> bool {
        self.autoload
    }

    pub fn locality(&self) -> Locality {
        self.locality
    }

    /// Access level, resolved against the owning container's default.
    pub fn access_or(&self, container_default: AccessLevel) -> AccessLevel {
        self.access.unwrap_or(container_default)
    }

    pub(crate) fn container_id(&self) -> Option<ContainerId> {
        self.container.get().copied()
    }

    /// Attach once to a container; false when already attached elsewhere.
    pub(crate) fn attach(&self, container: ContainerId) -> bool {
        self.container.set(container).is_ok()
    }

    // =========================================================================
    // Composition
    // =========================================================================

    /// Compose into an immutable [`Dependency`] for `scope`, or `None`
    /// when this provider cannot satisfy `key`. Overridden candidates
    /// arrive in `rest`, priority-descending; a guarded-out provider
    /// delegates to them.
    pub(crate) fn compose(
        self: &Arc<Self>,
        scope: &Arc<Scope>,
        key: &Injectable,
        rest: &[Arc<Provider>],
        ctx: &mut ResolveCtx,
    ) -> Result<Option<Arc<Dependency>>> {
        if let Some(guard) = &self.guard {
            if !guard(scope) {
                #[cfg(feature = "logging")]
                trace!(
                    target: "wirebox",
                    key = %key.describe(),
                    "provider guarded out; delegating to overridden candidates"
                );
                return match rest.split_first() {
                    Some((next, tail)) => next.compose(scope, key, tail, ctx),
                    None => Ok(None),
                };
            }
        }

        match &self.kind {
            ProviderKind::Value(value) => Ok(Some(Dependency::value(
                key.clone(),
                scope,
                self.container_id(),
                value.clone(),
            ))),
            ProviderKind::Alias(target) => scope.resolve_key(target, ctx),
            ProviderKind::Factory(spec) => {
                let params = bind_params(scope, &spec.signature, &spec.arguments, ctx)?;
                Ok(Some(Dependency::factory(
                    key.clone(),
                    scope,
                    self.container_id(),
                    spec,
                    params,
                    self.thread_safe,
                    self.disposer.clone(),
                )))
            }
            ProviderKind::Union(members) => {
                for member in members {
                    if let Some(dep) = scope.resolve_key(member, ctx)? {
                        return Ok(Some(dep));
                    }
                }
                Ok(None)
            }
            ProviderKind::Annotated { base, meta } => {
                for candidate in meta.iter().chain(std::iter::once(base)) {
                    if let Some(dep) = scope.resolve_key(candidate, ctx)? {
                        return Ok(Some(dep));
                    }
                }
                Ok(None)
            }
            ProviderKind::InjectorContext => {
                Ok(Some(Dependency::injector_ref(key.clone(), scope)))
            }
            ProviderKind::DepMarker(marker) => scope.resolve_key(marker, ctx),
        }
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            ProviderKind::Value(_) => "value",
            ProviderKind::Alias(_) => "alias",
            ProviderKind::Factory(spec) => match (spec.shared, spec.shape) {
                (true, _) => "singleton",
                (false, FactoryShape::Factory) => "factory",
                (false, FactoryShape::Callable) => "callable",
                (false, FactoryShape::Partial) => "partial",
            },
            ProviderKind::Union(_) => "union",
            ProviderKind::Annotated { .. } => "annotated",
            ProviderKind::InjectorContext => "injector-context",
            ProviderKind::DepMarker(_) => "dep-marker",
        };
        f.debug_struct("Provider")
            .field("kind", &kind)
            .field("provides", &self.provides)
            .field("final", &self.is_final)
            .field("default", &self.is_default)
            .field("autoload", &self.autoload)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Container;
    use crate::key::cast;
    use crate::scope::Scope;

    struct Config {
        debug: bool,
    }

    struct Service;

    #[test]
    fn value_provider_keys_by_type() {
        let provider = Provider::value(Config { debug: true });
        assert_eq!(provider.key(), Some(&Injectable::of::<Config>()));
    }

    #[test]
    fn factory_keys_by_return_type() {
        let provider = Provider::factory(|| Service);
        assert_eq!(provider.key(), Some(&Injectable::of::<Service>()));
    }

    #[test]
    fn provide_overrides_the_key() {
        let provider = Provider::value(Config { debug: false }).provide(Injectable::of::<Service>());
        assert_eq!(provider.key(), Some(&Injectable::of::<Service>()));
    }

    #[test]
    fn attach_is_set_once() {
        let container = Container::new("app");
        let provider = Provider::value(Config { debug: true });
        assert!(provider.attach(container.id()));
        assert!(!provider.attach(container.id()));
    }

    #[test]
    fn guarded_out_provider_delegates_to_overridden() {
        let container = Container::new("app");
        container
            .register(
                Provider::value(Config { debug: true }).when(|_| false),
            )
            .unwrap();
        container
            .register(Provider::value(Config { debug: false }))
            .unwrap();
        let scope = Scope::new(container);

        let dep = scope.binding(Injectable::of::<Config>()).unwrap();
        let injector = scope.injector().unwrap();
        let value = injector.call(Injectable::of::<Config>()).unwrap();
        assert!(!cast::<Config>(&value).unwrap().debug);
        assert!(!dep.is_unresolved());
    }

    #[test]
    fn union_provider_derives_union_key() {
        let provider = Provider::union([Injectable::of::<Config>(), Injectable::of::<Service>()]);
        assert!(matches!(provider.key(), Some(Injectable::Union(_))));
    }
}

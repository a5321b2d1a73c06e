//! Immutable dependency records and their bindings
//!
//! A [`Dependency`] is the frozen plan the scope produced for a key:
//! bound parameters, the production callable, and the async tag. Binding
//! against an injector yields a zero-argument [`BoundFactory`] (or an
//! async [`FutureWrapper`]). Identity is the `(key, scope, container)`
//! fingerprint only; plans never affect equality.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use once_cell::sync::OnceCell;

use crate::container::ContainerId;
use crate::error::{InjectError, Result};
use crate::injector::Injector;
use crate::key::{Injectable, Injected, LookupOp};
use crate::params::{Arg, BoundParams, CallArgs, Callable, InjectFuture, KwArg};
use crate::provider::{Disposer, FactoryShape, FactorySpec};
use crate::scope::{Scope, ScopeId};

#[cfg(feature = "logging")]
use tracing::trace;

/// Structural identity of a dependency record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub key: Injectable,
    pub scope: ScopeId,
    pub container: Option<ContainerId>,
}

/// The frozen production plan behind a dependency.
pub(crate) struct FactoryPlan {
    call: Callable,
    params: BoundParams,
    shape: FactoryShape,
    shared: bool,
    thread_safe: bool,
    disposer: Option<Disposer>,
}

enum DependencyKind {
    /// Constant value
    Value(Injected),
    /// Planned callable
    Factory(FactoryPlan),
    /// Yields the evaluating injector
    InjectorRef,
    /// Projection over another dependency
    Lookup {
        target: Arc<Dependency>,
        ops: Arc<[LookupOp]>,
    },
    /// Memoized negative result; binding raises the lookup error
    Unresolved,
}

/// An immutable, bound dependency plan.
pub struct Dependency {
    key: Injectable,
    scope: ScopeId,
    scope_name: Arc<str>,
    container: Option<ContainerId>,
    kind: DependencyKind,
    is_async: bool,
}

impl Dependency {
    pub(crate) fn value(
        key: Injectable,
        scope: &Arc<Scope>,
        container: Option<ContainerId>,
        value: Injected,
    ) -> Arc<Self> {
        Arc::new(Self {
            key,
            scope: scope.id(),
            scope_name: scope.name_tag(),
            container,
            kind: DependencyKind::Value(value),
            is_async: false,
        })
    }

    pub(crate) fn factory(
        key: Injectable,
        scope: &Arc<Scope>,
        container: Option<ContainerId>,
        spec: &FactorySpec,
        params: BoundParams,
        thread_safe: bool,
        disposer: Option<Disposer>,
    ) -> Arc<Self> {
        let is_async = spec.call.is_async() || params.is_async();
        Arc::new(Self {
            key,
            scope: scope.id(),
            scope_name: scope.name_tag(),
            container,
            kind: DependencyKind::Factory(FactoryPlan {
                call: spec.call.clone(),
                params,
                shape: spec.shape,
                shared: spec.shared,
                thread_safe,
                disposer,
            }),
            is_async,
        })
    }

    pub(crate) fn injector_ref(key: Injectable, scope: &Arc<Scope>) -> Arc<Self> {
        Arc::new(Self {
            key,
            scope: scope.id(),
            scope_name: scope.name_tag(),
            container: None,
            kind: DependencyKind::InjectorRef,
            is_async: false,
        })
    }

    pub(crate) fn lookup(
        key: Injectable,
        scope: &Arc<Scope>,
        target: Arc<Dependency>,
        ops: Arc<[LookupOp]>,
    ) -> Arc<Self> {
        let is_async = target.is_async();
        Arc::new(Self {
            key,
            scope: scope.id(),
            scope_name: scope.name_tag(),
            container: target.container(),
            kind: DependencyKind::Lookup { target, ops },
            is_async,
        })
    }

    /// The memoized "absent" record, distinguishable from "not yet
    /// resolved".
    pub(crate) fn unresolved(key: Injectable, scope: &Arc<Scope>) -> Arc<Self> {
        Arc::new(Self {
            key,
            scope: scope.id(),
            scope_name: scope.name_tag(),
            container: None,
            kind: DependencyKind::Unresolved,
            is_async: false,
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn key(&self) -> &Injectable {
        &self.key
    }

    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    pub fn container(&self) -> Option<ContainerId> {
        self.container
    }

    pub fn is_async(&self) -> bool {
        self.is_async
    }

    pub fn is_unresolved(&self) -> bool {
        matches!(self.kind, DependencyKind::Unresolved)
    }

    /// Dependency records this plan draws from.
    pub fn edges(&self) -> &[Arc<Dependency>] {
        match &self.kind {
            DependencyKind::Factory(plan) => plan.params.edges(),
            DependencyKind::Lookup { target, .. } => std::slice::from_ref(target),
            _ => &[],
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            key: self.key.clone(),
            scope: self.scope,
            container: self.container,
        }
    }

    // =========================================================================
    // Binding
    // =========================================================================

    /// Build the zero-argument factory producing this dependency's value
    /// inside `injector`. The unresolved record raises here, not at call
    /// time, so memoized misses stay cheap and observable.
    pub fn bind(self: &Arc<Self>, injector: &Arc<Injector>) -> Result<BoundFactory> {
        #[cfg(feature = "logging")]
        trace!(
            target: "wirebox",
            key = %self.key.describe(),
            scope = %self.scope_name,
            "Binding dependency"
        );

        match &self.kind {
            DependencyKind::Unresolved => Err(InjectError::lookup(
                self.key.describe(),
                self.scope_name.to_string(),
            )),
            DependencyKind::Value(value) => {
                let value = value.clone();
                Ok(BoundFactory::sync(move || Ok(value.clone())))
            }
            DependencyKind::InjectorRef => {
                let weak = Arc::downgrade(injector);
                Ok(BoundFactory::sync(move || {
                    weak.upgrade()
                        .map(|injector| injector as Injected)
                        .ok_or_else(|| InjectError::Internal("injector dropped".into()))
                }))
            }
            DependencyKind::Lookup { target, ops } => self.bind_lookup(injector, target, ops),
            DependencyKind::Factory(plan) => self.bind_factory(injector, plan),
        }
    }

    fn bind_lookup(
        self: &Arc<Self>,
        injector: &Arc<Injector>,
        target: &Arc<Dependency>,
        ops: &Arc<[LookupOp]>,
    ) -> Result<BoundFactory> {
        let bound = injector.bind_dependency(target)?;
        let ops = ops.clone();

        if !bound.is_async() {
            return Ok(BoundFactory::sync(move || {
                let mut value = bound.call()?;
                for op in ops.iter() {
                    value = op.apply(value)?;
                }
                Ok(value)
            }));
        }

        // Async target: project once the target future resolves
        let project = Callable::sync(move |args: CallArgs| {
            let mut value = args
                .positional()
                .first()
                .cloned()
                .ok_or_else(|| InjectError::Internal("lookup target missing".into()))?;
            for op in ops.iter() {
                value = op.apply(value)?;
            }
            Ok(value)
        });
        Ok(BoundFactory::Future(Arc::new(FutureWrapper {
            label: self.key.describe().into(),
            call: project,
            vals: Vec::new(),
            args: vec![BoundArg::Bound(bound)],
            kwargs: Vec::new(),
            aw_call: false,
        })))
    }

    fn bind_factory(
        self: &Arc<Self>,
        injector: &Arc<Injector>,
        plan: &FactoryPlan,
    ) -> Result<BoundFactory> {
        let (args, kwargs) = resolve_plan(injector, &plan.params)?;
        let vals = plan.params.vals.clone();

        if self.is_async {
            let wrapper = Arc::new(FutureWrapper {
                label: self.key.describe().into(),
                call: plan.call.clone(),
                vals,
                args,
                kwargs,
                aw_call: plan.call.is_async(),
            });
            return Ok(match plan.shape {
                FactoryShape::Factory => BoundFactory::Future(wrapper),
                FactoryShape::Callable | FactoryShape::Partial => {
                    let planned = Arc::new(InjectedCall {
                        wrapper: wrapper.clone(),
                    });
                    BoundFactory::sync(move || Ok(planned.clone() as Injected))
                }
            });
        }

        let wrapper = Arc::new(FutureWrapper {
            label: self.key.describe().into(),
            call: plan.call.clone(),
            vals,
            args,
            kwargs,
            aw_call: false,
        });

        match plan.shape {
            FactoryShape::Callable | FactoryShape::Partial => {
                let planned = Arc::new(InjectedCall { wrapper });
                Ok(BoundFactory::sync(move || Ok(planned.clone() as Injected)))
            }
            FactoryShape::Factory if !plan.shared => {
                Ok(BoundFactory::sync(move || wrapper.produce_sync()))
            }
            FactoryShape::Factory => {
                // Shared: double-checked single-flight. Readers never
                // lock once the value is published; the lock is opt-in.
                let cell: Arc<OnceCell<Injected>> = Arc::new(OnceCell::new());
                let lock = plan.thread_safe.then(|| Arc::new(Mutex::new(())));
                let disposer = plan.disposer.clone();
                let weak = Arc::downgrade(injector);
                let label = self.key.describe();

                Ok(BoundFactory::sync(move || {
                    if let Some(value) = cell.get() {
                        return Ok(value.clone());
                    }
                    let _guard = lock.as_ref().map(|l| l.lock().unwrap());
                    if let Some(value) = cell.get() {
                        return Ok(value.clone());
                    }
                    let value = wrapper.produce_sync()?;
                    let mut published_here = false;
                    let published = cell
                        .get_or_init(|| {
                            published_here = true;
                            value
                        })
                        .clone();
                    if published_here {
                        if let (Some(disposer), Some(injector)) = (&disposer, weak.upgrade()) {
                            injector.push_disposal(label.clone(), published.clone(), disposer.clone());
                        }
                    }
                    Ok(published)
                }))
            }
        }
    }
}

impl PartialEq for Dependency {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.scope == other.scope && self.container == other.container
    }
}

impl Eq for Dependency {}

impl Hash for Dependency {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
        self.scope.hash(state);
        self.container.hash(state);
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            DependencyKind::Value(_) => "value",
            DependencyKind::Factory(plan) if plan.shared => "singleton",
            DependencyKind::Factory(_) => "factory",
            DependencyKind::InjectorRef => "injector-ref",
            DependencyKind::Lookup { .. } => "lookup",
            DependencyKind::Unresolved => "unresolved",
        };
        f.debug_struct("Dependency")
            .field("key", &self.key)
            .field("kind", &kind)
            .field("scope", &self.scope)
            .field("container", &self.container)
            .field("is_async", &self.is_async)
            .finish()
    }
}

/// Turn a frozen plan into per-injector bound arguments.
fn resolve_plan(
    injector: &Arc<Injector>,
    params: &BoundParams,
) -> Result<(Vec<BoundArg>, Vec<(&'static str, BoundArg)>)> {
    let mut args = Vec::with_capacity(params.args.len());
    for arg in &params.args {
        args.push(resolve_arg(injector, arg)?);
    }
    let mut kwargs = Vec::with_capacity(params.kwds.len());
    for KwArg { name, arg } in &params.kwds {
        kwargs.push((*name, resolve_arg(injector, arg)?));
    }
    Ok((args, kwargs))
}

fn resolve_arg(injector: &Arc<Injector>, arg: &Arg) -> Result<BoundArg> {
    Ok(match arg {
        Arg::Value(value) => BoundArg::Value(value.clone()),
        Arg::Dep(dep) => BoundArg::Bound(injector.bind_dependency(dep)?),
        Arg::Hole(name) => {
            let name = *name;
            BoundArg::Bound(BoundFactory::sync(move || {
                Err(InjectError::UnboundParam { param: name.into() })
            }))
        }
    })
}

// =============================================================================
// Bound factories
// =============================================================================

/// A planned argument, evaluated on every call of the bound factory.
#[derive(Clone)]
pub enum BoundArg {
    Value(Injected),
    Bound(BoundFactory),
}

impl BoundArg {
    fn value_sync(&self) -> Result<Injected> {
        match self {
            Self::Value(v) => Ok(v.clone()),
            Self::Bound(factory) => factory.call(),
        }
    }

    async fn value(&self) -> Result<Injected> {
        match self {
            Self::Value(v) => Ok(v.clone()),
            Self::Bound(factory) => factory.call_async().await,
        }
    }
}

/// A zero-argument bound production, sync or awaitable.
#[derive(Clone)]
pub enum BoundFactory {
    Sync(Arc<dyn Fn() -> Result<Injected> + Send + Sync>),
    Future(Arc<FutureWrapper>),
}

impl std::fmt::Debug for BoundFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sync(_) => f.debug_tuple("Sync").finish(),
            Self::Future(wrapper) => f.debug_tuple("Future").field(&wrapper.label).finish(),
        }
    }
}

impl BoundFactory {
    pub fn sync(f: impl Fn() -> Result<Injected> + Send + Sync + 'static) -> Self {
        Self::Sync(Arc::new(f))
    }

    #[inline]
    pub fn is_async(&self) -> bool {
        matches!(self, Self::Future(_))
    }

    /// Produce synchronously. Async bindings refuse: drive them through
    /// [`call_async`](Self::call_async) instead.
    pub fn call(&self) -> Result<Injected> {
        match self {
            Self::Sync(f) => f(),
            Self::Future(wrapper) => Err(InjectError::AsyncBinding {
                key: wrapper.label.to_string(),
            }),
        }
    }

    /// Produce through a future. Sync bindings resolve immediately.
    pub fn call_async(&self) -> InjectFuture {
        match self {
            Self::Sync(f) => Box::pin(std::future::ready(f())),
            Self::Future(wrapper) => wrapper.invoke(),
        }
    }
}

/// The planned future record for a dependency with awaitable edges (or
/// an awaitable callable): literal values, per-position bound arguments,
/// keyword bound arguments and the call tag. Invocation drives the
/// awaitable edges, assembles the full argument vector and finally calls
/// (or awaits) the callable. Scheduling beyond sequential readiness is
/// the executor's concern, not the plan's.
pub struct FutureWrapper {
    label: Arc<str>,
    call: Callable,
    vals: Vec<(&'static str, Injected)>,
    args: Vec<BoundArg>,
    kwargs: Vec<(&'static str, BoundArg)>,
    aw_call: bool,
}

impl FutureWrapper {
    /// Whether the callable itself must be awaited.
    pub fn is_call_async(&self) -> bool {
        self.aw_call
    }

    pub fn invoke(self: &Arc<Self>) -> InjectFuture {
        let this = self.clone();
        Box::pin(async move {
            let mut pos = Vec::with_capacity(this.args.len());
            for arg in &this.args {
                pos.push(arg.value().await?);
            }
            let mut kw: Vec<(&'static str, Injected)> = this.vals.clone();
            for (name, arg) in &this.kwargs {
                kw.push((*name, arg.value().await?));
            }
            let call_args = CallArgs::new(pos, kw);
            if this.aw_call {
                this.call.call_future(call_args).await
            } else {
                this.call.call_sync(call_args)
            }
        })
    }

    /// Synchronous fast path used when no edge is awaitable.
    fn produce_sync(&self) -> Result<Injected> {
        let mut pos = Vec::with_capacity(self.args.len());
        for arg in &self.args {
            pos.push(arg.value_sync()?);
        }
        let mut kw: Vec<(&'static str, Injected)> = self.vals.clone();
        for (name, arg) in &self.kwargs {
            kw.push((*name, arg.value_sync()?));
        }
        self.call.call_sync(CallArgs::new(pos, kw))
    }

    fn merged_sync(&self, extra: &CallArgs) -> Result<Injected> {
        let mut pos = Vec::with_capacity(self.args.len() + extra.positional().len());
        for arg in &self.args {
            pos.push(arg.value_sync()?);
        }
        pos.extend(extra.positional().iter().cloned());

        let mut kw: Vec<(&'static str, Injected)> = Vec::new();
        let overridden =
            |name: &str| extra.keywords().iter().any(|(n, _)| *n == name);
        for (name, value) in &self.vals {
            if !overridden(name) {
                kw.push((*name, value.clone()));
            }
        }
        kw.extend(extra.keywords().iter().cloned());
        // Planned keyword deps are skipped when the call site supplies
        // the name
        for (name, arg) in &self.kwargs {
            if !overridden(name) {
                kw.push((*name, arg.value_sync()?));
            }
        }
        self.call.call_sync(CallArgs::new(pos, kw))
    }
}

/// The value produced for callable and partial shapes: the planned
/// callable itself, invokable with call-site arguments merged over the
/// plan.
pub struct InjectedCall {
    wrapper: Arc<FutureWrapper>,
}

impl InjectedCall {
    /// Invoke with no call-site arguments.
    pub fn invoke(&self) -> Result<Injected> {
        self.call(CallArgs::empty())
    }

    /// Invoke, merging call-site arguments with the planned ones:
    /// positional appended after planned, keywords overriding planned
    /// values and skipping planned keyword deps of the same name.
    pub fn call(&self, extra: CallArgs) -> Result<Injected> {
        if self.wrapper.aw_call || self.is_async() {
            return Err(InjectError::AsyncBinding {
                key: self.wrapper.label.to_string(),
            });
        }
        self.wrapper.merged_sync(&extra)
    }

    /// Awaitable invocation for plans with async edges or callables.
    pub fn call_future(&self, extra: CallArgs) -> InjectFuture {
        let wrapper = self.wrapper.clone();
        Box::pin(async move {
            let mut pos = Vec::with_capacity(wrapper.args.len() + extra.positional().len());
            for arg in &wrapper.args {
                pos.push(arg.value().await?);
            }
            pos.extend(extra.positional().iter().cloned());

            let mut kw: Vec<(&'static str, Injected)> = Vec::new();
            let overridden =
                |name: &str| extra.keywords().iter().any(|(n, _)| *n == name);
            for (name, value) in &wrapper.vals {
                if !overridden(name) {
                    kw.push((*name, value.clone()));
                }
            }
            kw.extend(extra.keywords().iter().cloned());
            for (name, arg) in &wrapper.kwargs {
                if !overridden(name) {
                    kw.push((*name, arg.value().await?));
                }
            }
            let call_args = CallArgs::new(pos, kw);
            if wrapper.aw_call {
                wrapper.call.call_future(call_args).await
            } else {
                wrapper.call.call_sync(call_args)
            }
        })
    }

    fn is_async(&self) -> bool {
        self.wrapper
            .args
            .iter()
            .chain(self.wrapper.kwargs.iter().map(|(_, a)| a))
            .any(|arg| matches!(arg, BoundArg::Bound(BoundFactory::Future(_))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Container;
    use crate::key::cast;
    use crate::provider::Provider;
    use crate::scope::Scope;

    struct Widget {
        size: u32,
    }

    #[test]
    fn identity_is_key_scope_container() {
        let container = Container::new("app");
        container
            .register(Provider::value(Widget { size: 1 }))
            .unwrap();
        let scope = Scope::new(container);

        let a = scope.binding(Injectable::of::<Widget>()).unwrap();
        let b = scope.binding(Injectable::of::<Widget>()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn unresolved_binding_raises_lookup() {
        let container = Container::new("empty");
        let scope = Scope::new(container);
        let injector = scope.injector().unwrap();

        let dep = scope.binding(Injectable::of::<Widget>()).unwrap();
        assert!(dep.is_unresolved());
        let err = dep.bind(&injector).unwrap_err();
        assert!(err.is_lookup());
    }

    #[test]
    fn value_binding_returns_the_value() {
        let container = Container::new("app");
        container
            .register(Provider::value(Widget { size: 7 }))
            .unwrap();
        let scope = Scope::new(container);
        let injector = scope.injector().unwrap();

        let dep = scope.binding(Injectable::of::<Widget>()).unwrap();
        let factory = dep.bind(&injector).unwrap();
        assert!(!factory.is_async());
        let value = factory.call().unwrap();
        assert_eq!(cast::<Widget>(&value).unwrap().size, 7);
    }

    #[test]
    fn factory_edges_are_recorded() {
        struct Service {
            widget_size: u32,
        }

        let container = Container::new("app");
        container
            .register(Provider::value(Widget { size: 3 }))
            .unwrap();
        container
            .register(Provider::factory(|w: Arc<Widget>| Service {
                widget_size: w.size,
            }))
            .unwrap();
        let scope = Scope::new(container);

        let dep = scope.binding(Injectable::of::<Service>()).unwrap();
        assert_eq!(dep.edges().len(), 1);
        assert_eq!(dep.edges()[0].key(), &Injectable::of::<Widget>());
    }
}

//! Callable signatures and the parameter planner
//!
//! Factories are type-erased callables with an explicit [`Signature`].
//! The planner binds call-site [`Arguments`] onto the signature, records
//! dependency edges for annotated parameters, and freezes the result into
//! a [`BoundParams`] plan so no per-call re-planning ever happens.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::dependency::Dependency;
use crate::error::{InjectError, Result};
use crate::key::{cast, injected, Injectable, Injected};
use crate::scope::{ResolveCtx, Scope};

/// Boxed future produced by async callables and wrappers.
pub type InjectFuture = Pin<Box<dyn Future<Output = Result<Injected>> + Send>>;

// =============================================================================
// Call arguments
// =============================================================================

/// The fully resolved argument vector handed to a callable.
#[derive(Clone, Default)]
pub struct CallArgs {
    pos: Vec<Injected>,
    kw: Vec<(&'static str, Injected)>,
}

impl CallArgs {
    pub fn new(pos: Vec<Injected>, kw: Vec<(&'static str, Injected)>) -> Self {
        Self { pos, kw }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Positional argument at `index`, downcast to `T`.
    pub fn arg<T: Send + Sync + 'static>(&self, index: usize) -> Result<Arc<T>> {
        let value = self.pos.get(index).ok_or_else(|| InjectError::UnboundParam {
            param: format!("#{index}"),
        })?;
        cast::<T>(value)
    }

    /// Keyword argument by name, downcast to `T`.
    pub fn named<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>> {
        let value = self
            .kw
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
            .ok_or_else(|| InjectError::UnboundParam { param: name.into() })?;
        cast::<T>(value)
    }

    pub fn positional(&self) -> &[Injected] {
        &self.pos
    }

    pub fn keywords(&self) -> &[(&'static str, Injected)] {
        &self.kw
    }
}

// =============================================================================
// Erased callables
// =============================================================================

type SyncFn = Arc<dyn Fn(CallArgs) -> Result<Injected> + Send + Sync>;
type AsyncFn = Arc<dyn Fn(CallArgs) -> InjectFuture + Send + Sync>;

/// A type-erased factory callable, sync or awaitable.
#[derive(Clone)]
pub enum Callable {
    Sync(SyncFn),
    Async(AsyncFn),
}

impl Callable {
    pub fn sync(f: impl Fn(CallArgs) -> Result<Injected> + Send + Sync + 'static) -> Self {
        Self::Sync(Arc::new(f))
    }

    pub fn future(f: impl Fn(CallArgs) -> InjectFuture + Send + Sync + 'static) -> Self {
        Self::Async(Arc::new(f))
    }

    #[inline]
    pub fn is_async(&self) -> bool {
        matches!(self, Self::Async(_))
    }

    pub(crate) fn call_sync(&self, args: CallArgs) -> Result<Injected> {
        match self {
            Self::Sync(f) => f(args),
            Self::Async(_) => Err(InjectError::Internal(
                "async callable invoked synchronously".into(),
            )),
        }
    }

    pub(crate) fn call_future(&self, args: CallArgs) -> InjectFuture {
        match self {
            Self::Sync(f) => Box::pin(std::future::ready(f(args))),
            Self::Async(f) => f(args),
        }
    }
}

impl std::fmt::Debug for Callable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sync(_) => write!(f, "Callable::Sync"),
            Self::Async(_) => write!(f, "Callable::Async"),
        }
    }
}

// =============================================================================
// Signatures
// =============================================================================

/// How a parameter binds at the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Positional,
    Keyword,
}

/// Default carried by a parameter: a literal or a dependency key.
#[derive(Clone)]
pub enum ParamDefault {
    Value(Injected),
    Key(Injectable),
}

/// One parameter of a callable: kind, optional annotation, optional
/// default.
#[derive(Clone)]
pub struct ParamSpec {
    name: &'static str,
    kind: ParamKind,
    annotation: Option<Injectable>,
    default: Option<ParamDefault>,
}

impl ParamSpec {
    pub fn positional(name: &'static str) -> Self {
        Self {
            name,
            kind: ParamKind::Positional,
            annotation: None,
            default: None,
        }
    }

    pub fn keyword(name: &'static str) -> Self {
        Self {
            name,
            kind: ParamKind::Keyword,
            annotation: None,
            default: None,
        }
    }

    /// Annotate with the type key `T`.
    pub fn of<T: ?Sized + Send + Sync + 'static>(mut self) -> Self {
        self.annotation = Some(Injectable::of::<T>());
        self
    }

    /// Annotate with an explicit key (markers included).
    pub fn keyed(mut self, key: impl Into<Injectable>) -> Self {
        self.annotation = Some(key.into());
        self
    }

    pub fn with_default<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.default = Some(ParamDefault::Value(injected(value)));
        self
    }

    /// The default is itself a dependency key.
    pub fn default_key(mut self, key: impl Into<Injectable>) -> Self {
        self.default = Some(ParamDefault::Key(key.into()));
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> ParamKind {
        self.kind
    }
}

/// Ordered parameter list of a callable.
#[derive(Clone, Default)]
pub struct Signature {
    params: Vec<ParamSpec>,
}

impl Signature {
    pub fn new(params: Vec<ParamSpec>) -> Self {
        Self { params }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }
}

// =============================================================================
// Call-site argument overrides
// =============================================================================

/// A call-site override: a literal value or a dependency key.
#[derive(Clone)]
pub enum ArgSource {
    Value(Injected),
    Key(Injectable),
}

/// Literal override.
pub fn arg<T: Send + Sync + 'static>(value: T) -> ArgSource {
    ArgSource::Value(injected(value))
}

/// Key override: the parameter becomes a dependency edge.
pub fn arg_key(key: impl Into<Injectable>) -> ArgSource {
    ArgSource::Key(key.into())
}

/// Positional and keyword overrides supplied when a provider is declared.
#[derive(Clone, Default)]
pub struct Arguments {
    pos: Vec<ArgSource>,
    kw: Vec<(&'static str, ArgSource)>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn positional(mut self, args: impl IntoIterator<Item = ArgSource>) -> Self {
        self.pos.extend(args);
        self
    }

    pub fn keyword(mut self, name: &'static str, source: ArgSource) -> Self {
        self.kw.push((name, source));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.pos.is_empty() && self.kw.is_empty()
    }
}

// =============================================================================
// Bound parameter plans
// =============================================================================

/// A planned positional slot.
#[derive(Clone)]
pub enum Arg {
    /// Literal value, cloned on every call
    Value(Injected),
    /// Dependency edge, re-evaluated through its binding on every call
    Dep(Arc<Dependency>),
    /// Unbindable parameter; resolves to an error at first call
    Hole(&'static str),
}

/// A planned keyword dependency edge.
#[derive(Clone)]
pub struct KwArg {
    pub name: &'static str,
    pub arg: Arg,
}

/// Frozen parameter plan: positional slots, keyword edges, literal
/// keyword values, and precomputed dispatch counters.
#[derive(Clone, Default)]
pub struct BoundParams {
    pub(crate) args: Vec<Arg>,
    pub(crate) kwds: Vec<KwArg>,
    pub(crate) vals: Vec<(&'static str, Injected)>,
    pub(crate) pos_vals: usize,
    pub(crate) pos_deps: usize,
    pub(crate) aw_args: Vec<usize>,
    pub(crate) aw_kwds: Vec<&'static str>,
    edges: Vec<Arc<Dependency>>,
}

impl BoundParams {
    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.kwds.is_empty() && self.vals.is_empty()
    }

    /// True when any planned edge is awaitable.
    pub fn is_async(&self) -> bool {
        !self.aw_args.is_empty() || !self.aw_kwds.is_empty()
    }

    /// The dependency records this plan draws from.
    pub fn edges(&self) -> &[Arc<Dependency>] {
        &self.edges
    }
}

/// Plan parameters for a callable: bind overrides onto the signature,
/// record edges for annotations, fall back to defaults, and leave holes
/// for anything unbindable.
pub(crate) fn bind_params(
    scope: &Arc<Scope>,
    signature: &Signature,
    overrides: &Arguments,
    ctx: &mut ResolveCtx,
) -> Result<BoundParams> {
    enum Slot {
        Value(Injected),
        Edge(Injectable),
        Hole,
    }

    let mut pos_overrides = overrides.pos.iter();
    let mut plan = BoundParams::default();

    for param in signature.params() {
        let source = match param.kind {
            ParamKind::Positional => pos_overrides.next(),
            ParamKind::Keyword => overrides
                .kw
                .iter()
                .find(|(name, _)| *name == param.name)
                .map(|(_, source)| source),
        };

        let slot = if let Some(source) = source {
            match source {
                ArgSource::Value(v) => Slot::Value(v.clone()),
                ArgSource::Key(k) => Slot::Edge(k.clone()),
            }
        } else if let Some(annotation) = &param.annotation {
            Slot::Edge(annotation.clone())
        } else if let Some(default) = &param.default {
            match default {
                ParamDefault::Value(v) => Slot::Value(v.clone()),
                ParamDefault::Key(k) => Slot::Edge(k.clone()),
            }
        } else {
            Slot::Hole
        };

        let bound = match slot {
            Slot::Value(v) => Arg::Value(v),
            Slot::Hole => Arg::Hole(param.name),
            Slot::Edge(key) => {
                let dep = scope.edge(&key, ctx)?;
                plan.edges.push(dep.clone());
                Arg::Dep(dep)
            }
        };

        match (param.kind, bound) {
            (ParamKind::Positional, Arg::Value(v)) => {
                plan.pos_vals += 1;
                plan.args.push(Arg::Value(v));
            }
            (ParamKind::Positional, bound) => {
                if let Arg::Dep(dep) = &bound {
                    if dep.is_async() {
                        plan.aw_args.push(plan.args.len());
                    }
                }
                plan.pos_deps += 1;
                plan.args.push(bound);
            }
            (ParamKind::Keyword, Arg::Value(v)) => {
                plan.vals.push((param.name, v));
            }
            (ParamKind::Keyword, bound) => {
                if let Arg::Dep(dep) = &bound {
                    if dep.is_async() {
                        plan.aw_kwds.push(param.name);
                    }
                }
                plan.kwds.push(KwArg {
                    name: param.name,
                    arg: bound,
                });
            }
        }
    }

    #[cfg(feature = "logging")]
    if pos_overrides.next().is_some() {
        tracing::warn!(
            target: "wirebox",
            "more positional overrides than positional parameters; extras ignored"
        );
    }

    Ok(plan)
}

// =============================================================================
// Typed adapters
// =============================================================================

/// Turns a typed closure into an erased callable plus a synthesized
/// signature: each `Arc<T>` parameter becomes a positional param
/// annotated with the type key `T`.
pub trait IntoInjectFn<Marker> {
    fn into_parts(self) -> (Callable, Signature);

    /// Key derived from the closure's return type.
    fn return_key(&self) -> Injectable;
}

/// Async flavor of [`IntoInjectFn`] for closures returning futures.
pub trait IntoAsyncInjectFn<Marker> {
    fn into_parts(self) -> (Callable, Signature);

    /// Key derived from the future's output type.
    fn return_key(&self) -> Injectable;
}

macro_rules! impl_into_inject_fn {
    ($($name:ident : $ty:ident @ $idx:tt),*) => {
        impl<$($ty,)* T, F> IntoInjectFn<(($($ty,)*), T)> for F
        where
            $($ty: Send + Sync + 'static,)*
            T: Send + Sync + 'static,
            F: Fn($(Arc<$ty>,)*) -> T + Send + Sync + 'static,
        {
            fn into_parts(self) -> (Callable, Signature) {
                let signature = Signature::new(vec![
                    $(ParamSpec::positional(stringify!($name)).of::<$ty>(),)*
                ]);
                let call = Callable::sync(move |args: CallArgs| {
                    $(let $name = args.arg::<$ty>($idx)?;)*
                    let _ = &args;
                    Ok(injected(self($($name,)*)))
                });
                (call, signature)
            }

            fn return_key(&self) -> Injectable {
                Injectable::of::<T>()
            }
        }

        impl<$($ty,)* Fut, T, F> IntoAsyncInjectFn<(($($ty,)*), Fut, T)> for F
        where
            $($ty: Send + Sync + 'static,)*
            Fut: Future<Output = T> + Send + 'static,
            T: Send + Sync + 'static,
            F: Fn($(Arc<$ty>,)*) -> Fut + Send + Sync + 'static,
        {
            fn into_parts(self) -> (Callable, Signature) {
                let signature = Signature::new(vec![
                    $(ParamSpec::positional(stringify!($name)).of::<$ty>(),)*
                ]);
                let call = Callable::future(move |args: CallArgs| {
                    $(
                        let $name = match args.arg::<$ty>($idx) {
                            Ok(value) => value,
                            Err(e) => return Box::pin(std::future::ready(Err(e))) as InjectFuture,
                        };
                    )*
                    let _ = &args;
                    let fut = self($($name,)*);
                    Box::pin(async move { Ok(injected(fut.await)) })
                });
                (call, signature)
            }

            fn return_key(&self) -> Injectable {
                Injectable::of::<T>()
            }
        }
    };
}

impl_into_inject_fn!();
impl_into_inject_fn!(a0: A0 @ 0);
impl_into_inject_fn!(a0: A0 @ 0, a1: A1 @ 1);
impl_into_inject_fn!(a0: A0 @ 0, a1: A1 @ 1, a2: A2 @ 2);
impl_into_inject_fn!(a0: A0 @ 0, a1: A1 @ 1, a2: A2 @ 2, a3: A3 @ 3);
impl_into_inject_fn!(a0: A0 @ 0, a1: A1 @ 1, a2: A2 @ 2, a3: A3 @ 3, a4: A4 @ 4);

//! Scopes: per-container resolvers with structural memoization
//!
//! A [`Scope`] turns keys into immutable [`Dependency`] records. Results
//! memoize twice: a top-level binding map guaranteeing one canonical
//! record per key, and an inner cache keyed by
//! `(key, candidate container, locality)` so re-walks are O(1). Absent
//! keys memoize an unresolved record, distinguishing "missing" from
//! "never asked".

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ahash::RandomState;
use dashmap::DashMap;

use crate::container::{Container, ContainerId};
use crate::dependency::Dependency;
use crate::error::{InjectError, Result};
use crate::injector::Injector;
use crate::key::{Abstract, DepDefault, DepSpec, Injectable};
use crate::predicate::{Locality, Predicate, ResolveSrc};

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// Unique scope identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u64);

impl ScopeId {
    #[inline]
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope-{}", self.0)
    }
}

/// Per-resolution state: the in-progress key stack for cycle detection.
#[derive(Default)]
pub(crate) struct ResolveCtx {
    stack: Vec<Injectable>,
}

impl ResolveCtx {
    fn enter(&mut self, key: &Injectable) -> Result<()> {
        if self.stack.contains(key) {
            return Err(InjectError::CyclicResolution {
                key: key.describe(),
            });
        }
        self.stack.push(key.clone());
        Ok(())
    }

    fn leave(&mut self) {
        self.stack.pop();
    }
}

/// A planner bound to a container tree, chained to an optional parent
/// scope.
pub struct Scope {
    id: ScopeId,
    name: Arc<str>,
    container: Arc<Container>,
    parent: Option<Arc<Scope>>,
    bindings: DashMap<Injectable, Arc<Dependency>, RandomState>,
    resolved: DashMap<(Injectable, ContainerId, Locality), Arc<Dependency>, RandomState>,
}

impl Scope {
    /// Root scope over a container tree. Freezes the tree: wiring after
    /// this point is an error.
    pub fn new(container: Arc<Container>) -> Arc<Self> {
        Self::build(container, None)
    }

    /// Child scope chained to `parent`.
    pub fn with_parent(container: Arc<Container>, parent: Arc<Scope>) -> Arc<Self> {
        Self::build(container, Some(parent))
    }

    fn build(container: Arc<Container>, parent: Option<Arc<Scope>>) -> Arc<Self> {
        container.freeze();

        #[cfg(feature = "logging")]
        debug!(
            target: "wirebox",
            container = %container.name(),
            has_parent = parent.is_some(),
            "Creating scope"
        );

        Arc::new(Self {
            id: ScopeId::new(),
            name: container.name().into(),
            container,
            parent,
            bindings: DashMap::default(),
            resolved: DashMap::default(),
        })
    }

    #[inline]
    pub fn id(&self) -> ScopeId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_tag(&self) -> Arc<str> {
        self.name.clone()
    }

    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    pub fn parent(&self) -> Option<&Arc<Scope>> {
        self.parent.as_ref()
    }

    // =========================================================================
    // Entry points
    // =========================================================================

    /// The canonical dependency record for `key`. Two calls return the
    /// same record; misses return (and memoize) an unresolved record.
    pub fn binding(self: &Arc<Self>, key: impl Into<Injectable>) -> Result<Arc<Dependency>> {
        let key = key.into();
        if let Some(dep) = self.bindings.get(&key) {
            return Ok(dep.clone());
        }
        let mut ctx = ResolveCtx::default();
        self.edge(&key, &mut ctx)
    }

    /// Resolve, treating a memoized miss as `None`.
    pub fn find(self: &Arc<Self>, key: impl Into<Injectable>) -> Option<Arc<Dependency>> {
        self.binding(key).ok().filter(|dep| !dep.is_unresolved())
    }

    /// Resolve through the confined (`Local`) registry path. Local
    /// entries are visible to their owning container only and never
    /// escape to a parent scope.
    pub fn binding_local(self: &Arc<Self>, key: impl Into<Injectable>) -> Result<Arc<Dependency>> {
        let key = key.into();
        let mut ctx = ResolveCtx::default();
        ctx.enter(&key)?;
        let result = self.resolve_dependency(&key, None, Locality::Local, false, &mut ctx);
        ctx.leave();
        Ok(result?.unwrap_or_else(|| Dependency::unresolved(key, self)))
    }

    /// Whether `key` resolves from this scope (or, unless `only_self`,
    /// an ancestor).
    pub fn is_provided(self: &Arc<Self>, key: &Injectable, only_self: bool) -> bool {
        if matches!(key, Injectable::Provider(_)) || self.container.provides(key) {
            return true;
        }
        if let Some(dep) = self.bindings.get(key) {
            if !dep.is_unresolved() {
                return true;
            }
        }
        if !only_self {
            if let Some(parent) = &self.parent {
                return parent.is_provided(key, false);
            }
        }
        false
    }

    /// Resolution within an ongoing plan: shares the cycle stack and the
    /// binding memo.
    pub(crate) fn edge(
        self: &Arc<Self>,
        key: &Injectable,
        ctx: &mut ResolveCtx,
    ) -> Result<Arc<Dependency>> {
        if let Some(dep) = self.bindings.get(key) {
            return Ok(dep.clone());
        }
        let resolved = self.resolve_key(key, ctx)?;
        let dep = resolved.unwrap_or_else(|| {
            #[cfg(feature = "logging")]
            debug!(
                target: "wirebox",
                key = %key.describe(),
                scope = %self.name,
                "Key unresolved; memoizing negative record"
            );
            Dependency::unresolved(key.clone(), self)
        });
        Ok(self.bindings.entry(key.clone()).or_insert(dep).clone())
    }

    // =========================================================================
    // Resolution algorithm
    // =========================================================================

    /// Resolve a key: the generic registry walk first, then the builtin
    /// marker handling.
    pub(crate) fn resolve_key(
        self: &Arc<Self>,
        key: &Injectable,
        ctx: &mut ResolveCtx,
    ) -> Result<Option<Arc<Dependency>>> {
        ctx.enter(key)?;
        let result = self
            .resolve_dependency(key, None, Locality::Global, false, ctx)
            .and_then(|found| match found {
                Some(dep) => Ok(Some(dep)),
                None => self.resolve_builtin(key, ctx),
            });
        ctx.leave();
        result
    }

    /// The layered walk. `container` defaults to this scope's own; the
    /// inner retry (step 4) restarts from it with `only_self` set, and
    /// the final step delegates to the parent scope carrying the
    /// advanced container. `Local` lookups never escape to the parent
    /// scope.
    fn resolve_dependency(
        self: &Arc<Self>,
        key: &Injectable,
        container: Option<Arc<Container>>,
        locality: Locality,
        only_self: bool,
        ctx: &mut ResolveCtx,
    ) -> Result<Option<Arc<Dependency>>> {
        let container = container.unwrap_or_else(|| self.container.clone());
        let ident = (key.clone(), container.id(), locality);

        if let Some(dep) = self.resolved.get(&ident) {
            return Ok(Some(dep.clone()));
        }

        let candidates = self.candidates(key, &container, locality);
        if let Some((winner, rest)) = candidates.split_first() {
            #[cfg(feature = "logging")]
            trace!(
                target: "wirebox",
                key = %key.describe(),
                container = %container.name(),
                candidates = candidates.len(),
                "Composing winning provider"
            );
            if let Some(dep) = winner.compose(self, key, rest, ctx)? {
                return Ok(Some(self.resolved.entry(ident).or_insert(dep).clone()));
            }
        }

        if !(container.id() == self.container.id() || locality == Locality::Local) {
            if let Some(dep) = self.resolve_dependency(key, None, locality, true, ctx)? {
                return Ok(Some(self.resolved.entry(ident).or_insert(dep).clone()));
            }
        }

        let next = container.parent();
        if next.is_none() && locality == Locality::Local {
            return Ok(None);
        }

        if !only_self && !key.is_marker() {
            if let Some(parent) = &self.parent {
                return parent.resolve_dependency(key, next, locality, false, ctx);
            }
        }

        Ok(None)
    }

    /// Candidate providers for `key` as seen from this scope: `Global`
    /// merges the container's PRO (access-filtered from the requester's
    /// viewpoint); `Local` consults the container's confined registry
    /// only. Empty candidate sets fall back to the key's origin
    /// sentinel.
    fn candidates(
        &self,
        key: &Injectable,
        container: &Arc<Container>,
        locality: Locality,
    ) -> Vec<Arc<crate::provider::Provider>> {
        if let Injectable::Provider(provider) = key {
            return vec![provider.clone()];
        }

        let collect = |key: &Injectable| match locality {
            Locality::Local => container.providers_for(key, Locality::Local),
            Locality::Global => {
                let viewpoint = Some(&self.container);
                let mut out = Vec::new();
                for member in container.pro() {
                    let granted = member.access_level(viewpoint);
                    for provider in member.providers_for(key, Locality::Global) {
                        if provider.access_or(member.default_access()) <= granted {
                            out.push(provider);
                        }
                    }
                }
                out
            }
        };

        let found = collect(key);
        if !found.is_empty() {
            return found;
        }
        match key.origin() {
            Some(origin) => collect(&Injectable::Type(origin)),
            None => found,
        }
    }

    // =========================================================================
    // Builtin marker handling
    // =========================================================================

    /// Markers own their cross-scope walk, so the generic delegation
    /// skips them and lands here instead.
    fn resolve_builtin(
        self: &Arc<Self>,
        key: &Injectable,
        ctx: &mut ResolveCtx,
    ) -> Result<Option<Arc<Dependency>>> {
        match key {
            Injectable::Dep(spec) => self.resolve_marker_dep(key, spec, ctx),
            Injectable::Union(members) => {
                for member in members.iter() {
                    if let Some(dep) = self.resolve_key(member, ctx)? {
                        return Ok(Some(dep));
                    }
                }
                Ok(None)
            }
            Injectable::Annotated(spec) => {
                for candidate in spec.meta.iter().chain(std::iter::once(&spec.base)) {
                    if let Some(dep) = self.resolve_key(candidate, ctx)? {
                        return Ok(Some(dep));
                    }
                }
                Ok(None)
            }
            Injectable::Lookup(spec) => {
                let Some(target) = self.resolve_key(&spec.base, ctx)? else {
                    return Ok(None);
                };
                Ok(Some(Dependency::lookup(
                    key.clone(),
                    self,
                    target,
                    spec.ops.clone().into(),
                )))
            }
            Injectable::Type(abstract_key)
                if *abstract_key == Abstract::of::<Injector>() =>
            {
                Ok(Some(Dependency::injector_ref(key.clone(), self)))
            }
            _ => Ok(None),
        }
    }

    /// `Dep` markers: walk the scope chain, filtering each scope's PRO
    /// through the marker predicate (evaluated against the origin
    /// scope), then fall back to the marker default.
    fn resolve_marker_dep(
        self: &Arc<Self>,
        key: &Injectable,
        spec: &Arc<DepSpec>,
        ctx: &mut ResolveCtx,
    ) -> Result<Option<Arc<Dependency>>> {
        let src = ResolveSrc {
            container: self.container.clone(),
            scope: self.id,
        };

        let mut cursor = Some(self.clone());
        while let Some(scope) = cursor {
            if let Some(dep) = scope.resolve_filtered(&spec.base, &spec.predicate, &src, ctx)? {
                return Ok(Some(dep));
            }
            cursor = scope.parent.clone();
        }

        match &spec.default {
            DepDefault::Value(value) => Ok(Some(Dependency::value(
                key.clone(),
                self,
                None,
                value.clone(),
            ))),
            DepDefault::Marker(fallback) => self.resolve_key(fallback, ctx),
            DepDefault::Missing => Ok(None),
        }
    }

    /// Resolve `base` within this scope only, over the predicate-filtered
    /// PRO. Not cached: the marker's own binding memo covers it.
    fn resolve_filtered(
        self: &Arc<Self>,
        base: &Injectable,
        predicate: &Predicate,
        src: &ResolveSrc,
        ctx: &mut ResolveCtx,
    ) -> Result<Option<Arc<Dependency>>> {
        let pro = self.container.pro();
        let filtered = predicate.pro_entries(&pro, self, src);
        if filtered.is_empty() {
            return Ok(None);
        }

        let viewpoint = Some(&src.container);
        let collect = |key: &Injectable| {
            let mut out = Vec::new();
            for member in &filtered {
                let granted = member.access_level(viewpoint);
                for provider in member.providers_for(key, Locality::Global) {
                    if provider.access_or(member.default_access()) <= granted {
                        out.push(provider);
                    }
                }
            }
            out
        };

        let mut candidates = collect(base);
        if candidates.is_empty() {
            if let Some(origin) = base.origin() {
                candidates = collect(&Injectable::Type(origin));
            }
        }

        match candidates.split_first() {
            Some((winner, rest)) => winner.compose(self, base, rest, ctx),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Injectors
    // =========================================================================

    /// Build and activate an injector for this scope, constructing (and
    /// activating) parent injectors along the scope chain as needed.
    pub fn injector(self: &Arc<Self>) -> Result<Arc<Injector>> {
        self.injector_with(None)
    }

    /// Like [`injector`](Self::injector), reusing `parent` where it
    /// already covers an ancestor scope.
    pub fn injector_with(self: &Arc<Self>, parent: Option<Arc<Injector>>) -> Result<Arc<Injector>> {
        let injector = self.build_injector_with(parent)?;
        injector.setup()?;
        Ok(injector)
    }

    /// Build a fresh (not yet active) injector; `setup` remains the
    /// caller's to invoke.
    pub fn build_injector(self: &Arc<Self>) -> Result<Arc<Injector>> {
        self.build_injector_with(None)
    }

    pub fn build_injector_with(
        self: &Arc<Self>,
        parent: Option<Arc<Injector>>,
    ) -> Result<Arc<Injector>> {
        let parent = if let Some(parent_scope) = &self.parent {
            match parent {
                Some(injector) if injector.covers(parent_scope) => {
                    if injector.covers(self) {
                        return Err(InjectError::Internal(format!(
                            "injector already covers scope '{}'",
                            self.name
                        )));
                    }
                    Some(injector)
                }
                other => Some(parent_scope.injector_with(other)?),
            }
        } else {
            if let Some(injector) = &parent {
                if injector.covers(self) {
                    return Err(InjectError::Internal(format!(
                        "injector already covers scope '{}'",
                        self.name
                    )));
                }
            }
            parent
        };
        Ok(Injector::new(self.clone(), parent))
    }

    /// Build and activate an injector guarded for scope-exit: dropping
    /// the guard resets the injector.
    pub fn activate(self: &Arc<Self>) -> Result<crate::injector::ActiveInjector> {
        Ok(crate::injector::ActiveInjector::new(self.injector()?))
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.id)
            .field("container", &self.name)
            .field("has_parent", &self.parent.is_some())
            .field("bindings", &self.bindings.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{cast, Dep, Union};
    use crate::provider::Provider;

    struct Db {
        url: &'static str,
    }

    struct CacheA;
    struct CacheB;

    #[test]
    fn registered_key_resolves_to_its_container() {
        let container = Container::new("app");
        container.register(Provider::value(Db { url: "pg" })).unwrap();
        let scope = Scope::new(container.clone());

        let dep = scope.binding(Injectable::of::<Db>()).unwrap();
        assert!(!dep.is_unresolved());
        assert_eq!(dep.container(), Some(container.id()));
    }

    #[test]
    fn binding_is_canonical_per_key() {
        let container = Container::new("app");
        container.register(Provider::value(Db { url: "pg" })).unwrap();
        let scope = Scope::new(container);

        let a = scope.binding(Injectable::of::<Db>()).unwrap();
        let b = scope.binding(Injectable::of::<Db>()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn parent_scope_fallback_and_memoization() {
        let parent_container = Container::new("parent");
        parent_container
            .register(Provider::factory(|| Db { url: "parent" }))
            .unwrap();
        let parent = Scope::new(parent_container);

        let child_container = Container::new("child");
        let child = Scope::with_parent(child_container, parent.clone());

        let dep = child.binding(Injectable::of::<Db>()).unwrap();
        assert!(!dep.is_unresolved());
        // The record is owned by the parent scope
        assert_eq!(dep.scope(), parent.id());

        // Second call short-circuits on the child's own memo
        let again = child.binding(Injectable::of::<Db>()).unwrap();
        assert!(Arc::ptr_eq(&dep, &again));
    }

    #[test]
    fn only_self_blocks_parent_fallback() {
        let parent_container = Container::new("parent");
        parent_container
            .register(Provider::value(Db { url: "parent" }))
            .unwrap();
        let parent = Scope::new(parent_container);
        let child = Scope::with_parent(Container::new("child"), parent);

        let key = Dep::of::<Db>().only_self().key();
        let dep = child.binding(key).unwrap();
        assert!(dep.is_unresolved());
    }

    #[test]
    fn skip_self_prefers_the_parent() {
        let parent_container = Container::new("parent");
        parent_container
            .register(Provider::value(Db { url: "parent" }))
            .unwrap();
        let parent = Scope::new(parent_container);

        let child_container = Container::new("child");
        child_container
            .register(Provider::value(Db { url: "child" }))
            .unwrap();
        let child = Scope::with_parent(child_container, parent.clone());

        let dep = child
            .binding(Dep::of::<Db>().skip_self().key())
            .unwrap();
        assert_eq!(dep.scope(), parent.id());

        // The plain key still prefers the child
        let own = child.binding(Injectable::of::<Db>()).unwrap();
        assert_eq!(own.scope(), child.id());
    }

    #[test]
    fn dep_default_applies_after_the_walk() {
        let scope = Scope::new(Container::new("empty"));
        let dep = scope
            .binding(Dep::of::<Db>().default_value(9u64).key())
            .unwrap();
        assert!(!dep.is_unresolved());

        let injector = scope.injector().unwrap();
        let value = injector
            .call(Dep::of::<Db>().default_value(9u64).key())
            .unwrap();
        assert_eq!(*cast::<u64>(&value).unwrap(), 9);
    }

    #[test]
    fn union_resolves_first_provided_member() {
        let container = Container::new("app");
        container.register(Provider::value(CacheB)).unwrap();
        let scope = Scope::new(container);

        let key = Union::of([Injectable::of::<CacheA>(), Injectable::of::<CacheB>()]);
        let dep = scope.binding(key).unwrap();
        assert_eq!(dep.key(), &Injectable::of::<CacheB>());
    }

    #[test]
    fn union_prefers_earlier_members_once_registered() {
        let container = Container::new("app");
        container.register(Provider::value(CacheB)).unwrap();
        container.register(Provider::value(CacheA)).unwrap();
        let scope = Scope::new(container);

        let key = Union::of([Injectable::of::<CacheA>(), Injectable::of::<CacheB>()]);
        let dep = scope.binding(key).unwrap();
        assert_eq!(dep.key(), &Injectable::of::<CacheA>());
    }

    #[test]
    fn alias_chain_lands_on_the_value() {
        struct A;
        struct B;

        let container = Container::new("app");
        container.register(Provider::value(Db { url: "z" })).unwrap();
        container
            .register(Provider::alias(Injectable::of::<Db>()).provide(Injectable::of::<B>()))
            .unwrap();
        container
            .register(Provider::alias(Injectable::of::<B>()).provide(Injectable::of::<A>()))
            .unwrap();
        let scope = Scope::new(container);

        let via_alias = scope.binding(Injectable::of::<A>()).unwrap();
        let direct = scope.binding(Injectable::of::<Db>()).unwrap();
        assert!(Arc::ptr_eq(&via_alias, &direct));
    }

    #[test]
    fn cyclic_alias_is_reported() {
        struct A;
        struct B;

        let container = Container::new("app");
        container
            .register(Provider::alias(Injectable::of::<B>()).provide(Injectable::of::<A>()))
            .unwrap();
        container
            .register(Provider::alias(Injectable::of::<A>()).provide(Injectable::of::<B>()))
            .unwrap();
        let scope = Scope::new(container);

        let err = scope.binding(Injectable::of::<A>()).unwrap_err();
        assert!(matches!(err, InjectError::CyclicResolution { .. }));
    }

    #[test]
    fn local_providers_stay_confined() {
        let parent_container = Container::new("parent");
        parent_container
            .register(Provider::value(Db { url: "local" }).local())
            .unwrap();
        let parent = Scope::new(parent_container);
        let child = Scope::with_parent(Container::new("child"), parent.clone());

        // Invisible through the global path
        let global = child.binding(Injectable::of::<Db>()).unwrap();
        assert!(global.is_unresolved());

        // Visible from the owning scope's local path
        let local = parent.binding_local(Injectable::of::<Db>()).unwrap();
        assert!(!local.is_unresolved());

        // And never escaping a child scope's local path
        let child_local = child.binding_local(Injectable::of::<Db>()).unwrap();
        assert!(child_local.is_unresolved());
    }

    #[test]
    fn annotated_tries_meta_before_base() {
        struct Meta;

        let container = Container::new("app");
        container.register(Provider::value(Db { url: "base" })).unwrap();
        container
            .register(Provider::value(CacheA).provide(Injectable::of::<Meta>()))
            .unwrap();
        let scope = Scope::new(container);

        let key = crate::key::Annotated::of::<Db>([Injectable::of::<Meta>()]);
        let dep = scope.binding(key).unwrap();
        assert_eq!(dep.key(), &Injectable::of::<Meta>());
    }

    #[test]
    fn earlier_pro_containers_win() {
        let root = Container::new("root");
        let included = Container::new("included");
        root.register(Provider::value(Db { url: "root" })).unwrap();
        included
            .register(Provider::value(Db { url: "included" }))
            .unwrap();
        root.include([included.clone()]).unwrap();
        let scope = Scope::new(root.clone());

        let dep = scope.binding(Injectable::of::<Db>()).unwrap();
        assert_eq!(dep.container(), Some(root.id()));
    }

    #[test]
    fn is_provided_respects_only_self() {
        let parent_container = Container::new("parent");
        parent_container
            .register(Provider::value(Db { url: "parent" }))
            .unwrap();
        let parent = Scope::new(parent_container);
        let child = Scope::with_parent(Container::new("child"), parent);

        let key = Injectable::of::<Db>();
        assert!(child.is_provided(&key, false));
        assert!(!child.is_provided(&key, true));
    }

    #[test]
    fn frozen_after_scope_build() {
        let container = Container::new("app");
        let _scope = Scope::new(container.clone());
        let err = container.register(Provider::value(CacheA)).unwrap_err();
        assert!(matches!(err, InjectError::Frozen { .. }));
    }
}

//! Containers: provider registries arranged into a lookup graph
//!
//! A [`Container`] holds provider registrations partitioned by locality,
//! includes child containers, and exposes its provider resolution order
//! (PRO): the flattened, deduplicated sequence of itself and its
//! descendants in include order. Containers are mutable while wiring and
//! frozen by the first scope built over them.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use ahash::RandomState;
use dashmap::DashMap;
use once_cell::sync::OnceCell;

use crate::error::{InjectError, Result};
use crate::key::{is_injectable, Injectable};
use crate::predicate::{AccessLevel, Locality};
use crate::provider::Provider;

#[cfg(feature = "logging")]
use tracing::debug;

/// Unique container identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContainerId(u64);

impl ContainerId {
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

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "container-{}", self.0)
    }
}

type Registry = DashMap<Injectable, Vec<Arc<Provider>>, RandomState>;

/// A provider registry with children, an access-level policy and a
/// memoized PRO.
pub struct Container {
    id: ContainerId,
    name: String,
    access: AccessLevel,
    parent: OnceCell<Weak<Container>>,
    children: RwLock<Vec<Arc<Container>>>,
    global: Registry,
    local: Registry,
    autoloads: RwLock<Vec<Injectable>>,
    pro: OnceCell<Vec<Arc<Container>>>,
    frozen: AtomicBool,
}

impl Container {
    /// Create a container with the default (public) access policy.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::with_access(name, AccessLevel::Public)
    }

    /// Create a container with an explicit default access policy for its
    /// providers.
    pub fn with_access(name: impl Into<String>, access: AccessLevel) -> Arc<Self> {
        let name = name.into();

        #[cfg(feature = "logging")]
        debug!(
            target: "wirebox",
            container = %name,
            ?access,
            "Creating container"
        );

        Arc::new(Self {
            id: ContainerId::new(),
            name,
            access,
            parent: OnceCell::new(),
            children: RwLock::new(Vec::new()),
            global: Registry::default(),
            local: Registry::default(),
            autoloads: RwLock::new(Vec::new()),
            pro: OnceCell::new(),
            frozen: AtomicBool::new(false),
        })
    }

    #[inline]
    pub fn id(&self) -> ContainerId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Default access level applied to providers registered without one.
    #[inline]
    pub fn default_access(&self) -> AccessLevel {
        self.access
    }

    #[inline]
    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    /// First container that included this one, if any.
    pub fn parent(&self) -> Option<Arc<Container>> {
        self.parent.get().and_then(Weak::upgrade)
    }

    // =========================================================================
    // Wiring
    // =========================================================================

    /// Register a provider under its key.
    ///
    /// Fails when the container is frozen, the provider has no key, the
    /// key is denied, or a sealed provider already owns the key.
    pub fn register(&self, provider: Provider) -> Result<Arc<Provider>> {
        self.register_arc(Arc::new(provider))
    }

    /// Register a shared provider handle. Also fails when the provider
    /// is already attached to another container.
    pub fn register_arc(&self, provider: Arc<Provider>) -> Result<Arc<Provider>> {
        self.check_not_frozen()?;

        let key = provider.key().cloned().ok_or(InjectError::UnkeyedProvider)?;
        if let Injectable::Type(abstract_key) = &key {
            if !is_injectable(abstract_key) {
                return Err(InjectError::NotInjectable {
                    key: abstract_key.name(),
                });
            }
        }

        if !provider.attach(self.id) {
            return Err(InjectError::AlreadyAttached {
                key: key.describe(),
                container: provider
                    .container_id()
                    .map(|id| id.to_string())
                    .unwrap_or_default(),
            });
        }

        let registry = match provider.locality() {
            Locality::Global => &self.global,
            Locality::Local => &self.local,
        };

        {
            let mut entry = registry.entry(key.clone()).or_default();
            if entry.iter().any(|existing| existing.is_final()) {
                return Err(InjectError::FinalOverride {
                    key: key.describe(),
                    container: self.name.clone(),
                });
            }
            entry.push(provider.clone());
        }

        if provider.is_autoload() {
            self.autoloads.write().unwrap().push(key.clone());
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "wirebox",
            container = %self.name,
            key = %key.describe(),
            provider = ?provider,
            "Registered provider"
        );

        Ok(provider)
    }

    /// Append children to the PRO, in order.
    pub fn include(
        self: &Arc<Self>,
        children: impl IntoIterator<Item = Arc<Container>>,
    ) -> Result<()> {
        self.check_not_frozen()?;

        for child in children {
            if child.id == self.id || child.subtree_contains(self.id) {
                return Err(InjectError::CyclicInclude {
                    container: child.name.clone(),
                });
            }
            // First includer wins the parent pointer; later includes keep
            // the child in their PRO without re-parenting
            let _ = child.parent.set(Arc::downgrade(self));

            #[cfg(feature = "logging")]
            debug!(
                target: "wirebox",
                container = %self.name,
                child = %child.name,
                "Including container"
            );

            self.children.write().unwrap().push(child);
        }
        Ok(())
    }

    /// Replace all previously included children.
    pub fn include_replace(
        self: &Arc<Self>,
        children: impl IntoIterator<Item = Arc<Container>>,
    ) -> Result<()> {
        self.check_not_frozen()?;
        self.children.write().unwrap().clear();
        self.include(children)
    }

    /// Freeze this container and every PRO member. Called by the first
    /// scope built over the tree; wiring afterwards is an error.
    pub(crate) fn freeze(self: &Arc<Self>) {
        let pro = self.compute_pro();
        for member in &pro {
            member.frozen.store(true, Ordering::Release);
        }
        self.frozen.store(true, Ordering::Release);
        let _ = self.pro.set(pro);

        #[cfg(feature = "logging")]
        debug!(
            target: "wirebox",
            container = %self.name,
            "Container tree frozen"
        );
    }

    fn check_not_frozen(&self) -> Result<()> {
        if self.is_frozen() {
            return Err(InjectError::Frozen {
                container: self.name.clone(),
            });
        }
        Ok(())
    }

    // =========================================================================
    // Lookup structure
    // =========================================================================

    /// The provider resolution order: this container first, descendants
    /// depth-first in include order, duplicates kept on first visit.
    pub fn pro(self: &Arc<Self>) -> Vec<Arc<Container>> {
        if self.is_frozen() {
            return self.pro.get_or_init(|| self.compute_pro()).clone();
        }
        self.compute_pro()
    }

    fn compute_pro(self: &Arc<Self>) -> Vec<Arc<Container>> {
        let mut seen = Vec::new();
        let mut out = Vec::new();
        self.visit_pro(&mut seen, &mut out);
        out
    }

    fn visit_pro(self: &Arc<Self>, seen: &mut Vec<ContainerId>, out: &mut Vec<Arc<Container>>) {
        if seen.contains(&self.id) {
            return;
        }
        seen.push(self.id);
        out.push(self.clone());
        let children = self.children.read().unwrap().clone();
        for child in children {
            child.visit_pro(seen, out);
        }
    }

    fn subtree_contains(self: &Arc<Self>, id: ContainerId) -> bool {
        self.pro().iter().any(|c| c.id == id)
    }

    fn root_id(&self) -> ContainerId {
        let mut current = self.id;
        let mut parent = self.parent();
        while let Some(p) = parent {
            current = p.id;
            parent = p.parent();
        }
        current
    }

    /// The access level a requesting container is granted on this one,
    /// computed from the path between them: owner itself sees private,
    /// an includer sees guarded, tree-mates see protected, strangers see
    /// public.
    pub fn access_level(&self, from: Option<&Arc<Container>>) -> AccessLevel {
        let Some(from) = from else {
            return AccessLevel::Public;
        };
        if from.id == self.id {
            return AccessLevel::Private;
        }
        if from.subtree_contains(self.id) {
            return AccessLevel::Guarded;
        }
        if from.root_id() == self.root_id() {
            return AccessLevel::Protected;
        }
        AccessLevel::Public
    }

    /// Providers registered here for `key`, priority-descending: sealed
    /// first, fallbacks last, registration order preserved within each
    /// tier (the earlier registration wins a same-tier tie).
    pub(crate) fn providers_for(&self, key: &Injectable, locality: Locality) -> Vec<Arc<Provider>> {
        let registry = match locality {
            Locality::Global => &self.global,
            Locality::Local => &self.local,
        };
        let Some(entry) = registry.get(key) else {
            return Vec::new();
        };

        let mut finals = Vec::new();
        let mut regular = Vec::new();
        let mut defaults = Vec::new();
        for provider in entry.iter() {
            if provider.is_final() {
                finals.push(provider.clone());
            } else if provider.is_default() {
                defaults.push(provider.clone());
            } else {
                regular.push(provider.clone());
            }
        }
        finals.extend(regular);
        finals.extend(defaults);
        finals
    }

    /// Whether this container or its subtree provides `key`.
    pub fn provides(self: &Arc<Self>, key: &Injectable) -> bool {
        if self.local.contains_key(key) {
            return true;
        }
        self.pro().iter().any(|c| c.global.contains_key(key))
    }

    /// Autoload keys of this container, in registration order.
    pub(crate) fn autoload_keys(&self) -> Vec<Injectable> {
        self.autoloads.read().unwrap().clone()
    }

    /// Number of keys registered directly on this container.
    pub fn len(&self) -> usize {
        self.global.len() + self.local.len()
    }

    pub fn is_empty(&self) -> bool {
        self.global.is_empty() && self.local.is_empty()
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("keys", &self.len())
            .field("children", &self.children.read().unwrap().len())
            .field("frozen", &self.is_frozen())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Provider;

    struct ServiceA;
    struct ServiceB;

    #[test]
    fn pro_is_self_first_depth_first() {
        let root = Container::new("root");
        let left = Container::new("left");
        let leaf = Container::new("leaf");
        let right = Container::new("right");

        left.include([leaf.clone()]).unwrap();
        root.include([left.clone(), right.clone()]).unwrap();

        let names: Vec<_> = root.pro().iter().map(|c| c.name().to_string()).collect();
        assert_eq!(names, ["root", "left", "leaf", "right"]);
    }

    #[test]
    fn pro_deduplicates_on_first_visit() {
        let root = Container::new("root");
        let shared = Container::new("shared");
        let mid = Container::new("mid");

        mid.include([shared.clone()]).unwrap();
        root.include([shared.clone(), mid.clone()]).unwrap();

        let names: Vec<_> = root.pro().iter().map(|c| c.name().to_string()).collect();
        assert_eq!(names, ["root", "shared", "mid"]);
    }

    #[test]
    fn include_replace_drops_prior_children() {
        let root = Container::new("root");
        let old = Container::new("old");
        let new = Container::new("new");

        root.include([old.clone()]).unwrap();
        root.include_replace([new.clone()]).unwrap();

        let names: Vec<_> = root.pro().iter().map(|c| c.name().to_string()).collect();
        assert_eq!(names, ["root", "new"]);
    }

    #[test]
    fn include_rejects_cycles() {
        let a = Container::new("a");
        let b = Container::new("b");
        a.include([b.clone()]).unwrap();
        let err = b.include([a.clone()]).unwrap_err();
        assert!(matches!(err, InjectError::CyclicInclude { .. }));
    }

    #[test]
    fn sealed_provider_rejects_override() {
        let container = Container::new("app");
        container
            .register(Provider::value(ServiceA).sealed())
            .unwrap();
        let err = container.register(Provider::value(ServiceA)).unwrap_err();
        assert!(matches!(err, InjectError::FinalOverride { .. }));
    }

    #[test]
    fn shared_provider_attaches_once() {
        let first = Container::new("first");
        let second = Container::new("second");
        let provider = first.register(Provider::value(ServiceA)).unwrap();
        let err = second.register_arc(provider).unwrap_err();
        assert!(matches!(err, InjectError::AlreadyAttached { .. }));
    }

    #[test]
    fn denied_keys_are_rejected() {
        let container = Container::new("app");
        let err = container.register(Provider::value(42u32)).unwrap_err();
        assert!(matches!(err, InjectError::NotInjectable { .. }));
    }

    #[test]
    fn frozen_container_rejects_wiring() {
        let container = Container::new("app");
        container.freeze();
        let err = container.register(Provider::value(ServiceA)).unwrap_err();
        assert!(matches!(err, InjectError::Frozen { .. }));
    }

    #[test]
    fn registration_order_breaks_ties_sealed_stays_first() {
        let container = Container::new("app");
        let fallback = container
            .register(Provider::value(ServiceA).fallback())
            .unwrap();
        let first = container.register(Provider::value(ServiceA)).unwrap();
        let second = container.register(Provider::value(ServiceA)).unwrap();

        let ordered = container.providers_for(&Injectable::of::<ServiceA>(), Locality::Global);
        assert!(Arc::ptr_eq(&ordered[0], &first));
        assert!(Arc::ptr_eq(&ordered[1], &second));
        assert!(Arc::ptr_eq(&ordered[2], &fallback));
    }

    #[test]
    fn provides_sees_subtree() {
        let root = Container::new("root");
        let child = Container::new("child");
        child.register(Provider::value(ServiceB)).unwrap();
        root.include([child.clone()]).unwrap();

        assert!(root.provides(&Injectable::of::<ServiceB>()));
        assert!(!root.provides(&Injectable::of::<ServiceA>()));
    }

    #[test]
    fn access_levels_follow_the_path() {
        let root = Container::new("root");
        let child = Container::new("child");
        let sibling = Container::new("sibling");
        let stranger = Container::new("stranger");
        root.include([child.clone(), sibling.clone()]).unwrap();

        assert_eq!(
            child.access_level(Some(&child)),
            AccessLevel::Private
        );
        // root includes child: root is granted guarded access
        assert_eq!(child.access_level(Some(&root)), AccessLevel::Guarded);
        assert_eq!(
            child.access_level(Some(&sibling)),
            AccessLevel::Protected
        );
        assert_eq!(
            child.access_level(Some(&stranger)),
            AccessLevel::Public
        );
        assert_eq!(child.access_level(None), AccessLevel::Public);
    }
}

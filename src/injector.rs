//! Injectors: runtime carriers executing dependency plans
//!
//! An [`Injector`] walks FRESH → ACTIVE → DISPOSED. While active it
//! caches bound factories per dependency, owns the singleton value
//! slots, and tracks scoped resources on a LIFO disposal stack. An
//! optional ambient handle (thread-local) is installed by `setup` and
//! removed by `reset`; the core never assumes it.

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use ahash::RandomState;
use dashmap::DashMap;

use crate::dependency::{BoundFactory, Dependency, Fingerprint};
use crate::error::{InjectError, Result};
use crate::key::{cast, Injectable, Injected};
use crate::provider::Disposer;
use crate::scope::Scope;

#[cfg(feature = "logging")]
use tracing::{debug, warn};

const STATE_FRESH: u8 = 0;
const STATE_ACTIVE: u8 = 1;
const STATE_DISPOSED: u8 = 2;

fn state_name(state: u8) -> &'static str {
    match state {
        STATE_FRESH => "fresh",
        STATE_ACTIVE => "active",
        _ => "disposed",
    }
}

thread_local! {
    /// Ambient injector stack; one entry per activation on this thread.
    static CURRENT: RefCell<Vec<Arc<Injector>>> = const { RefCell::new(Vec::new()) };
}

/// The innermost ambient injector installed on this thread, if any.
pub fn current() -> Option<Arc<Injector>> {
    CURRENT.with(|stack| stack.borrow().last().cloned())
}

struct DisposalEntry {
    label: String,
    value: Injected,
    disposer: Disposer,
}

/// A runtime context executing the plans of one scope.
pub struct Injector {
    scope: Arc<Scope>,
    parent: Option<Arc<Injector>>,
    state: AtomicU8,
    /// Per-key bound factories (the `injector[key]` cache)
    keyed: DashMap<Injectable, BoundFactory, RandomState>,
    /// Per-dependency bound factories, shared by planned edges
    bound: DashMap<Fingerprint, BoundFactory, RandomState>,
    disposal: Mutex<Vec<DisposalEntry>>,
}

impl Injector {
    pub(crate) fn new(scope: Arc<Scope>, parent: Option<Arc<Injector>>) -> Arc<Self> {
        #[cfg(feature = "logging")]
        debug!(
            target: "wirebox",
            scope = %scope.name(),
            has_parent = parent.is_some(),
            "Creating injector"
        );

        Arc::new(Self {
            scope,
            parent,
            state: AtomicU8::new(STATE_FRESH),
            keyed: DashMap::default(),
            bound: DashMap::default(),
            disposal: Mutex::new(Vec::new()),
        })
    }

    #[inline]
    pub fn scope(&self) -> &Arc<Scope> {
        &self.scope
    }

    #[inline]
    pub fn parent(&self) -> Option<&Arc<Injector>> {
        self.parent.as_ref()
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_ACTIVE
    }

    /// Whether this injector or an ancestor executes for `scope`.
    pub(crate) fn covers(&self, scope: &Arc<Scope>) -> bool {
        if self.scope.id() == scope.id() {
            return true;
        }
        self.parent.as_ref().is_some_and(|p| p.covers(scope))
    }

    fn ensure_active(&self) -> Result<()> {
        let state = self.state.load(Ordering::Acquire);
        if state != STATE_ACTIVE {
            return Err(InjectError::state("active", state_name(state)));
        }
        Ok(())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Activate: install as the ambient injector on this thread and bind
    /// autoload providers in registration order. Idempotent while
    /// active; an error once disposed.
    pub fn setup(self: &Arc<Self>) -> Result<()> {
        match self.state.compare_exchange(
            STATE_FRESH,
            STATE_ACTIVE,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                CURRENT.with(|stack| stack.borrow_mut().push(self.clone()));
                self.run_autoloads();
                Ok(())
            }
            Err(STATE_ACTIVE) => Ok(()),
            Err(state) => Err(InjectError::state("fresh", state_name(state))),
        }
    }

    /// Reverse one activation: uninstall the ambient handle and release
    /// scoped resources in LIFO order. Release failures are collected
    /// and reported after every entry ran.
    pub fn reset(self: &Arc<Self>) -> Result<()> {
        self.state
            .compare_exchange(
                STATE_ACTIVE,
                STATE_DISPOSED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|state| InjectError::state("active", state_name(state)))?;

        CURRENT.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(pos) = stack.iter().rposition(|i| Arc::ptr_eq(i, self)) {
                stack.remove(pos);
            }
        });

        let entries = {
            let mut disposal = self.disposal.lock().unwrap();
            std::mem::take(&mut *disposal)
        };

        let mut failures = Vec::new();
        for entry in entries.into_iter().rev() {
            if let Err(error) = (entry.disposer)(&entry.value) {
                #[cfg(feature = "logging")]
                warn!(
                    target: "wirebox",
                    resource = %entry.label,
                    %error,
                    "Resource release failed"
                );
                failures.push(format!("{}: {error}", entry.label));
            }
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "wirebox",
            scope = %self.scope.name(),
            failed = failures.len(),
            "Injector reset"
        );

        if failures.is_empty() {
            Ok(())
        } else {
            Err(InjectError::Disposal { failures })
        }
    }

    fn run_autoloads(self: &Arc<Self>) {
        for container in self.scope.container().pro() {
            for key in container.autoload_keys() {
                match self.factory(key.clone()) {
                    Ok(factory) if !factory.is_async() => {
                        if let Err(_error) = factory.call() {
                            #[cfg(feature = "logging")]
                            warn!(
                                target: "wirebox",
                                key = %key.describe(),
                                error = %_error,
                                "Autoload invocation failed"
                            );
                        }
                    }
                    // Async autoloads are bound but not driven; the
                    // executor owns awaiting them
                    Ok(_) => {}
                    Err(_error) => {
                        #[cfg(feature = "logging")]
                        warn!(
                            target: "wirebox",
                            key = %key.describe(),
                            error = %_error,
                            "Autoload binding failed"
                        );
                    }
                }
            }
        }
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    /// The bound zero-argument factory for `key`, from the per-injector
    /// cache; on miss the scope plans a dependency and it is bound here.
    pub fn factory(self: &Arc<Self>, key: impl Into<Injectable>) -> Result<BoundFactory> {
        self.ensure_active()?;
        let key = key.into();
        if let Some(factory) = self.keyed.get(&key) {
            return Ok(factory.clone());
        }
        let dep = self.scope.binding(key.clone())?;
        let factory = self.bind_dependency(&dep)?;
        Ok(self.keyed.entry(key).or_insert(factory).clone())
    }

    /// Bind a dependency record, delegating to the ancestor injector
    /// owning the record's scope. Without a matching ancestor the lookup
    /// fails (the null-injector contract).
    pub(crate) fn bind_dependency(self: &Arc<Self>, dep: &Arc<Dependency>) -> Result<BoundFactory> {
        if dep.scope() != self.scope.id() {
            let mut cursor = self.parent.as_ref();
            while let Some(injector) = cursor {
                if injector.scope.id() == dep.scope() {
                    return injector.bind_dependency(dep);
                }
                cursor = injector.parent.as_ref();
            }
            return Err(InjectError::lookup(
                dep.key().describe(),
                format!("{} (no ancestor injector)", self.scope.name()),
            ));
        }

        let fingerprint = dep.fingerprint();
        if let Some(factory) = self.bound.get(&fingerprint) {
            return Ok(factory.clone());
        }
        let factory = dep.bind(self)?;
        Ok(self.bound.entry(fingerprint).or_insert(factory).clone())
    }

    /// Resolve and produce in one step.
    pub fn call(self: &Arc<Self>, key: impl Into<Injectable>) -> Result<Injected> {
        self.factory(key)?.call()
    }

    /// Resolve and produce through a future (sync bindings resolve
    /// immediately).
    pub async fn call_async(self: &Arc<Self>, key: impl Into<Injectable>) -> Result<Injected> {
        let factory = self.factory(key)?;
        factory.call_async().await
    }

    /// Typed resolution by the type's own key.
    pub fn get<T: Send + Sync + 'static>(self: &Arc<Self>) -> Result<Arc<T>> {
        self.get_key(Injectable::of::<T>())
    }

    /// Typed resolution under an explicit key.
    pub fn get_key<T: Send + Sync + 'static>(
        self: &Arc<Self>,
        key: impl Into<Injectable>,
    ) -> Result<Arc<T>> {
        let value = self.call(key)?;
        cast::<T>(&value)
    }

    /// Typed async resolution under an explicit key.
    pub async fn get_async<T: Send + Sync + 'static>(
        self: &Arc<Self>,
        key: impl Into<Injectable>,
    ) -> Result<Arc<T>> {
        let value = self.call_async(key).await?;
        cast::<T>(&value)
    }

    /// Record a scoped resource for LIFO release at reset.
    pub(crate) fn push_disposal(&self, label: String, value: Injected, disposer: Disposer) {
        self.disposal.lock().unwrap().push(DisposalEntry {
            label,
            value,
            disposer,
        });
    }
}

impl fmt::Debug for Injector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Injector")
            .field("scope", &self.scope.name())
            .field("state", &state_name(self.state.load(Ordering::Acquire)))
            .field("bound", &self.bound.len())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

/// RAII activation guard: holds an active injector and resets it on
/// drop.
pub struct ActiveInjector {
    injector: Arc<Injector>,
}

impl ActiveInjector {
    pub(crate) fn new(injector: Arc<Injector>) -> Self {
        Self { injector }
    }

    pub fn injector(&self) -> &Arc<Injector> {
        &self.injector
    }
}

impl std::ops::Deref for ActiveInjector {
    type Target = Arc<Injector>;

    fn deref(&self) -> &Self::Target {
        &self.injector
    }
}

impl Drop for ActiveInjector {
    fn drop(&mut self) {
        if self.injector.is_active() {
            let _ = self.injector.reset();
        }
    }
}

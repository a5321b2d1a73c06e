//! Abstract keys and dependency markers
//!
//! A dependency is registered and looked up under an [`Injectable`] key:
//! a plain type, a function item, or a marker carrying resolution policy
//! (predicate, default, lazy projection, union, annotation metadata).

use std::any::{Any, TypeId};
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::error::{InjectError, Result};
use crate::predicate::{AccessLevel, Predicate};
use crate::provider::Provider;

/// A resolved injection value. Type-erased and shared.
pub type Injected = Arc<dyn Any + Send + Sync>;

/// Wrap a concrete value as an [`Injected`].
#[inline]
pub fn injected<T: Send + Sync + 'static>(value: T) -> Injected {
    Arc::new(value)
}

/// Downcast an [`Injected`] to a concrete type.
#[inline]
pub fn cast<T: Send + Sync + 'static>(value: &Injected) -> Result<Arc<T>> {
    value
        .clone()
        .downcast::<T>()
        .map_err(|_| InjectError::type_mismatch::<T>())
}

/// Sentinel for "no default". Denied as an injection key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Missing;

// =============================================================================
// Abstract key identity
// =============================================================================

/// The identity under which a dependency is registered: a type or a
/// function item, captured as `TypeId` plus a display name.
#[derive(Clone, Copy)]
pub struct Abstract {
    id: TypeId,
    name: &'static str,
}

impl Abstract {
    /// Key for type `T`.
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Key for a value's type. Each function item has a unique type, so
    /// this turns free functions into keys.
    #[inline]
    pub fn of_val<T: 'static>(_: &T) -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    #[inline]
    pub fn id(&self) -> TypeId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for Abstract {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Abstract {}

impl Hash for Abstract {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Abstract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Closed deny-list: scalar and sentinel types never act as keys.
static DENY: Lazy<HashSet<TypeId>> = Lazy::new(|| {
    let mut set = HashSet::new();
    set.insert(TypeId::of::<()>());
    set.insert(TypeId::of::<Missing>());
    set.insert(TypeId::of::<String>());
    set.insert(TypeId::of::<&'static str>());
    set.insert(TypeId::of::<str>());
    set.insert(TypeId::of::<bool>());
    set.insert(TypeId::of::<char>());
    set.insert(TypeId::of::<i8>());
    set.insert(TypeId::of::<i16>());
    set.insert(TypeId::of::<i32>());
    set.insert(TypeId::of::<i64>());
    set.insert(TypeId::of::<i128>());
    set.insert(TypeId::of::<isize>());
    set.insert(TypeId::of::<u8>());
    set.insert(TypeId::of::<u16>());
    set.insert(TypeId::of::<u32>());
    set.insert(TypeId::of::<u64>());
    set.insert(TypeId::of::<u128>());
    set.insert(TypeId::of::<usize>());
    set.insert(TypeId::of::<f32>());
    set.insert(TypeId::of::<f64>());
    set
});

/// Whether the abstract may stand for a dependency.
#[inline]
pub fn is_injectable(key: &Abstract) -> bool {
    !DENY.contains(&key.id)
}

// =============================================================================
// Markers
// =============================================================================

/// Default policy carried by a [`Dep`] marker.
#[derive(Clone)]
pub enum DepDefault {
    /// No default; resolution failure is an error
    Missing,
    /// Literal fallback value
    Value(Injected),
    /// The default is itself a dependency key
    Marker(Injectable),
}

impl DepDefault {
    #[inline]
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    /// `has_default ⇔ default ≠ Missing`
    #[inline]
    pub fn has_default(&self) -> bool {
        !self.is_missing()
    }

    /// `injects_default ⇔ default is itself a marker`
    #[inline]
    pub fn injects_default(&self) -> bool {
        matches!(self, Self::Marker(_))
    }
}

impl PartialEq for DepDefault {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Missing, Self::Missing) => true,
            (Self::Value(a), Self::Value(b)) => Arc::ptr_eq(a, b),
            (Self::Marker(a), Self::Marker(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for DepDefault {}

impl Hash for DepDefault {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Missing => state.write_u8(0),
            Self::Value(v) => {
                state.write_u8(1);
                (Arc::as_ptr(v) as *const () as usize).hash(state);
            }
            Self::Marker(m) => {
                state.write_u8(2);
                m.hash(state);
            }
        }
    }
}

impl fmt::Debug for DepDefault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "Missing"),
            Self::Value(_) => write!(f, "Value(..)"),
            Self::Marker(m) => write!(f, "{m:?}"),
        }
    }
}

/// A `Dep` marker: base key plus a resolution-order predicate and an
/// optional default.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DepSpec {
    pub base: Injectable,
    pub predicate: Predicate,
    pub default: DepDefault,
}

/// One step of a lazy projection chain: a named transformation applied
/// to the resolved target.
#[derive(Clone)]
pub struct LookupOp {
    name: &'static str,
    apply: Arc<dyn Fn(Injected) -> Result<Injected> + Send + Sync>,
}

impl LookupOp {
    pub fn new(
        name: &'static str,
        apply: impl Fn(Injected) -> Result<Injected> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            apply: Arc::new(apply),
        }
    }

    /// Typed projection: downcast the current value to `T` and map it.
    pub fn map<T, U, F>(name: &'static str, f: F) -> Self
    where
        T: Send + Sync + 'static,
        U: Send + Sync + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        Self::new(name, move |value| {
            let target = cast::<T>(&value)?;
            Ok(injected(f(&target)))
        })
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub(crate) fn apply(&self, value: Injected) -> Result<Injected> {
        (self.apply)(value)
    }
}

impl PartialEq for LookupOp {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && Arc::ptr_eq(&self.apply, &other.apply)
    }
}

impl Eq for LookupOp {}

impl Hash for LookupOp {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        (Arc::as_ptr(&self.apply) as *const () as usize).hash(state);
    }
}

impl fmt::Debug for LookupOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ".{}", self.name)
    }
}

/// A lazy projection: resolve `base`, then apply the recorded ops.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LookupSpec {
    pub base: Injectable,
    pub ops: Vec<LookupOp>,
}

/// Annotated key: metadata tried first, then the base type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AnnotatedSpec {
    pub base: Injectable,
    pub meta: Vec<Injectable>,
}

// =============================================================================
// Injectable
// =============================================================================

/// Any value that may stand for a dependency.
///
/// `Type` is both the plain key and the interned pure-marker form: a
/// `Dep` with a noop predicate and no default *is* its base key, so the
/// common path stays equality-fast.
#[derive(Clone)]
pub enum Injectable {
    /// A type or function key (also the interned `PureDep` form)
    Type(Abstract),
    /// Key with a resolution predicate and/or default
    Dep(Arc<DepSpec>),
    /// Lazy projection of another key
    Lookup(Arc<LookupSpec>),
    /// First member a container provides wins
    Union(Arc<[Injectable]>),
    /// Metadata tried before the base key
    Annotated(Arc<AnnotatedSpec>),
    /// An ad-hoc provider used directly as a key
    Provider(Arc<Provider>),
}

impl Injectable {
    /// Plain key for type `T`.
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self::Type(Abstract::of::<T>())
    }

    /// Key for a function item or other unique-typed value.
    #[inline]
    pub fn of_val<T: 'static>(value: &T) -> Self {
        Self::Type(Abstract::of_val(value))
    }

    /// Build a `Dep` marker, interning the all-defaults case to the bare
    /// base key.
    pub fn dep_parts(base: Injectable, predicate: Predicate, default: DepDefault) -> Self {
        if predicate == Predicate::Noop && default.is_missing() {
            return base;
        }
        Self::Dep(Arc::new(DepSpec {
            base,
            predicate,
            default,
        }))
    }

    /// The marker-kind sentinel consulted as a registry fallback, if any.
    pub(crate) fn origin(&self) -> Option<Abstract> {
        match self {
            Self::Dep(_) => Some(Abstract::of::<DepOrigin>()),
            Self::Lookup(_) => Some(Abstract::of::<LookupOrigin>()),
            Self::Union(_) => Some(Abstract::of::<UnionOrigin>()),
            Self::Annotated(_) => Some(Abstract::of::<AnnotatedOrigin>()),
            Self::Type(_) | Self::Provider(_) => None,
        }
    }

    /// Marker keys perform their own cross-scope walk during resolution.
    #[inline]
    pub(crate) fn is_marker(&self) -> bool {
        matches!(
            self,
            Self::Dep(_) | Self::Lookup(_) | Self::Union(_) | Self::Annotated(_)
        )
    }

    /// Human-readable form for error messages.
    pub fn describe(&self) -> String {
        format!("{self:?}")
    }
}

impl From<Abstract> for Injectable {
    #[inline]
    fn from(key: Abstract) -> Self {
        Self::Type(key)
    }
}

impl PartialEq for Injectable {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Type(a), Self::Type(b)) => a == b,
            (Self::Dep(a), Self::Dep(b)) => a == b,
            (Self::Lookup(a), Self::Lookup(b)) => a == b,
            (Self::Union(a), Self::Union(b)) => a == b,
            (Self::Annotated(a), Self::Annotated(b)) => a == b,
            (Self::Provider(a), Self::Provider(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for Injectable {}

impl Hash for Injectable {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            // Bare keys and interned pure markers share the base hash
            Self::Type(a) => a.hash(state),
            Self::Dep(s) => {
                state.write_u8(1);
                s.hash(state);
            }
            Self::Lookup(s) => {
                state.write_u8(2);
                s.hash(state);
            }
            Self::Union(members) => {
                state.write_u8(3);
                members.hash(state);
            }
            Self::Annotated(s) => {
                state.write_u8(4);
                s.hash(state);
            }
            Self::Provider(p) => {
                state.write_u8(5);
                (Arc::as_ptr(p) as *const () as usize).hash(state);
            }
        }
    }
}

impl fmt::Debug for Injectable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Type(a) => write!(f, "{a:?}"),
            Self::Dep(s) => write!(
                f,
                "Dep({:?}, predicate={:?}, default={:?})",
                s.base, s.predicate, s.default
            ),
            Self::Lookup(s) => {
                write!(f, "Lookup({:?}", s.base)?;
                for op in &s.ops {
                    write!(f, "{op:?}")?;
                }
                write!(f, ")")
            }
            Self::Union(members) => {
                write!(f, "Union(")?;
                for (i, m) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, " | ")?;
                    }
                    write!(f, "{m:?}")?;
                }
                write!(f, ")")
            }
            Self::Annotated(s) => write!(f, "Annotated({:?}, meta={:?})", s.base, s.meta),
            Self::Provider(p) => write!(f, "Provider({:p})", Arc::as_ptr(p)),
        }
    }
}

/// Intersecting a key with a predicate yields a `Dep` marker (or tightens
/// an existing one).
impl std::ops::BitAnd<Predicate> for Injectable {
    type Output = Injectable;

    fn bitand(self, rhs: Predicate) -> Injectable {
        match self {
            Injectable::Dep(spec) => Injectable::dep_parts(
                spec.base.clone(),
                spec.predicate.clone() & rhs,
                spec.default.clone(),
            ),
            base => Injectable::dep_parts(base, rhs, DepDefault::Missing),
        }
    }
}

impl std::ops::BitOr<Predicate> for Injectable {
    type Output = Injectable;

    fn bitor(self, rhs: Predicate) -> Injectable {
        match self {
            Injectable::Dep(spec) => Injectable::dep_parts(
                spec.base.clone(),
                spec.predicate.clone() | rhs,
                spec.default.clone(),
            ),
            base => Injectable::dep_parts(base, rhs, DepDefault::Missing),
        }
    }
}

// =============================================================================
// Marker builders
// =============================================================================

/// Builder entry point for `Dep` markers.
///
/// ```rust
/// use wirebox::Dep;
///
/// struct Db;
/// let key = Dep::of::<Db>().only_self().key();
/// let with_fallback = Dep::of::<Db>().default_value(42u64).key();
/// # let _ = (key, with_fallback);
/// ```
pub struct Dep(());

impl Dep {
    pub fn of<T: ?Sized + 'static>() -> DepBuilder {
        Self::key(Injectable::of::<T>())
    }

    pub fn key(base: impl Into<Injectable>) -> DepBuilder {
        DepBuilder {
            base: base.into(),
            predicate: Predicate::Noop,
            default: DepDefault::Missing,
        }
    }
}

/// Accumulates predicate and default policy for a `Dep` marker.
#[derive(Clone)]
pub struct DepBuilder {
    base: Injectable,
    predicate: Predicate,
    default: DepDefault,
}

impl DepBuilder {
    /// Intersect the marker predicate with `p`.
    pub fn filter(mut self, p: Predicate) -> Self {
        self.predicate = self.predicate & p;
        self
    }

    /// Resolve only from the requesting scope, never from parents.
    pub fn only_self(self) -> Self {
        self.filter(Predicate::only_self())
    }

    /// Skip the requesting scope, resolve from ancestors.
    pub fn skip_self(self) -> Self {
        self.filter(Predicate::skip_self())
    }

    /// Keep only containers viewable at `level` or above.
    pub fn access(self, level: AccessLevel) -> Self {
        self.filter(Predicate::Access(level))
    }

    /// Literal fallback used when resolution fails.
    pub fn default_value<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.default = DepDefault::Value(injected(value));
        self
    }

    /// Fallback key resolved when the base cannot be.
    pub fn default_key(mut self, key: impl Into<Injectable>) -> Self {
        self.default = DepDefault::Marker(key.into());
        self
    }

    /// Finish the marker, interning the all-defaults case.
    pub fn key(self) -> Injectable {
        Injectable::dep_parts(self.base, self.predicate, self.default)
    }
}

impl From<DepBuilder> for Injectable {
    fn from(builder: DepBuilder) -> Self {
        builder.key()
    }
}

/// Builder entry point for lazy projections.
///
/// ```rust
/// use wirebox::Lookup;
///
/// struct Config { url: String }
/// let key = Lookup::of::<Config>()
///     .map("url", |c: &Config| c.url.clone())
///     .key();
/// # let _ = key;
/// ```
pub struct Lookup(());

impl Lookup {
    pub fn of<T: ?Sized + 'static>() -> LookupBuilder {
        Self::key(Injectable::of::<T>())
    }

    pub fn key(base: impl Into<Injectable>) -> LookupBuilder {
        LookupBuilder {
            base: base.into(),
            ops: Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct LookupBuilder {
    base: Injectable,
    ops: Vec<LookupOp>,
}

impl LookupBuilder {
    /// Append a typed projection step.
    pub fn map<T, U, F>(mut self, name: &'static str, f: F) -> Self
    where
        T: Send + Sync + 'static,
        U: Send + Sync + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        self.ops.push(LookupOp::map(name, f));
        self
    }

    /// Append a raw projection step.
    pub fn op(mut self, op: LookupOp) -> Self {
        self.ops.push(op);
        self
    }

    pub fn key(self) -> Injectable {
        if self.ops.is_empty() {
            return self.base;
        }
        Injectable::Lookup(Arc::new(LookupSpec {
            base: self.base,
            ops: self.ops,
        }))
    }
}

impl From<LookupBuilder> for Injectable {
    fn from(builder: LookupBuilder) -> Self {
        builder.key()
    }
}

/// Union key constructor: resolves the first member a container provides.
pub struct Union(());

impl Union {
    pub fn of(members: impl IntoIterator<Item = Injectable>) -> Injectable {
        let members: Vec<Injectable> = members.into_iter().collect();
        Injectable::Union(members.into())
    }
}

/// Annotated key constructor: metadata keys tried before the base.
pub struct Annotated(());

impl Annotated {
    pub fn of<T: ?Sized + 'static>(meta: impl IntoIterator<Item = Injectable>) -> Injectable {
        Self::key(Injectable::of::<T>(), meta)
    }

    pub fn key(
        base: impl Into<Injectable>,
        meta: impl IntoIterator<Item = Injectable>,
    ) -> Injectable {
        Injectable::Annotated(Arc::new(AnnotatedSpec {
            base: base.into(),
            meta: meta.into_iter().collect(),
        }))
    }
}

// =============================================================================
// Origin sentinels
// =============================================================================

/// Registry fallback key for `Dep` markers. Register a provider under
/// `Injectable::of::<DepOrigin>()` to replace the builtin handling.
pub struct DepOrigin(());

/// Registry fallback key for `Union` markers.
pub struct UnionOrigin(());

/// Registry fallback key for `Annotated` markers.
pub struct AnnotatedOrigin(());

/// Registry fallback key for `Lookup` markers.
pub struct LookupOrigin(());

#[cfg(test)]
mod tests {
    use super::*;

    struct Service;
    #[derive(Debug)]
    struct Other;

    #[test]
    fn abstract_identity_by_type() {
        assert_eq!(Abstract::of::<Service>(), Abstract::of::<Service>());
        assert_ne!(Abstract::of::<Service>(), Abstract::of::<Other>());
    }

    #[test]
    fn function_items_are_keys() {
        fn make() -> u32 {
            7
        }
        fn other() -> u32 {
            9
        }
        assert_eq!(Abstract::of_val(&make), Abstract::of_val(&make));
        assert_ne!(Abstract::of_val(&make), Abstract::of_val(&other));
    }

    #[test]
    fn deny_list_rejects_scalars() {
        assert!(!is_injectable(&Abstract::of::<String>()));
        assert!(!is_injectable(&Abstract::of::<u32>()));
        assert!(!is_injectable(&Abstract::of::<f64>()));
        assert!(!is_injectable(&Abstract::of::<()>()));
        assert!(!is_injectable(&Abstract::of::<Missing>()));
        assert!(is_injectable(&Abstract::of::<Service>()));
    }

    #[test]
    fn pure_dep_interns_to_base_key() {
        // All-defaults marker is the bare key: equal and hash-equal
        let bare = Injectable::of::<Service>();
        let marked = Dep::of::<Service>().key();
        assert_eq!(bare, marked);

        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let hash = |k: &Injectable| {
            let mut h = DefaultHasher::new();
            k.hash(&mut h);
            h.finish()
        };
        assert_eq!(hash(&bare), hash(&marked));
    }

    #[test]
    fn dep_with_policy_is_distinct() {
        let bare = Injectable::of::<Service>();
        let marked = Dep::of::<Service>().only_self().key();
        assert_ne!(bare, marked);
        assert_eq!(marked, Dep::of::<Service>().only_self().key());
    }

    #[test]
    fn predicate_round_trip_preserves_base_and_default() {
        let p = Predicate::only_self();
        let base = Dep::of::<Service>().default_key(Injectable::of::<Other>());
        let marked = base.clone().key() & p.clone();
        let round = marked & !p;

        match (&round, &base.key()) {
            (Injectable::Dep(a), Injectable::Dep(b)) => {
                assert_eq!(a.base, b.base);
                assert_eq!(a.default, b.default);
            }
            other => panic!("expected Dep markers, got {other:?}"),
        }
    }

    #[test]
    fn lookup_without_ops_is_base() {
        assert_eq!(Lookup::of::<Service>().key(), Injectable::of::<Service>());
    }

    #[test]
    fn lookup_op_applies_projection() {
        let op = LookupOp::map("double", |v: &u32| v * 2);
        let out = op.apply(injected(21u32)).unwrap();
        assert_eq!(*cast::<u32>(&out).unwrap(), 42);
    }

    #[test]
    fn union_members_equality() {
        let a = Union::of([Injectable::of::<Service>(), Injectable::of::<Other>()]);
        let b = Union::of([Injectable::of::<Service>(), Injectable::of::<Other>()]);
        let c = Union::of([Injectable::of::<Other>(), Injectable::of::<Service>()]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn cast_mismatch_is_typed_error() {
        let value = injected(Service);
        let err = cast::<Other>(&value).unwrap_err();
        assert!(matches!(err, InjectError::TypeMismatch { .. }));
    }
}

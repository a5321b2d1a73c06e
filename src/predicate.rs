//! Predicate algebra over the provider resolution order
//!
//! A [`Predicate`] filters the ordered container sequence (the PRO)
//! consulted for a key. Predicates are immutable, structurally hashable
//! and compose with `&`, `|`, `-` and `!`. Evaluation always returns an
//! index-ordered subsequence of its input.

use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::container::{Container, ContainerId};
use crate::scope::{Scope, ScopeId};

/// How much of a container's registry a requester may see.
///
/// Levels order from the most open to the most restricted view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum AccessLevel {
    Public = 1,
    Protected = 2,
    Guarded = 3,
    Private = 4,
}

/// Registry partition: `Global` entries are visible to descendants,
/// `Local` entries never leave their container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Locality {
    #[default]
    Global,
    Local,
}

/// Where a resolution originated: the requesting container and scope.
#[derive(Clone)]
pub struct ResolveSrc {
    pub container: Arc<Container>,
    pub scope: ScopeId,
}

/// Bound of a PRO slice: a position (negative wraps from the end) or a
/// container identity located in the sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SliceBound {
    Index(isize),
    Container(ContainerId),
}

impl SliceBound {
    /// Bound anchored at a specific container.
    pub fn at(container: &Arc<Container>) -> Self {
        Self::Container(container.id())
    }

    fn position(&self, pro: &[Arc<Container>]) -> Option<usize> {
        match self {
            Self::Index(i) => {
                let len = pro.len() as isize;
                let idx = if *i < 0 { (len + i).max(0) } else { (*i).min(len) };
                Some(idx as usize)
            }
            Self::Container(id) => pro.iter().position(|c| c.id() == *id),
        }
    }
}

/// A slice of the PRO. The step must be positive: evaluation is required
/// to preserve input order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProSlice {
    pub start: Option<SliceBound>,
    pub stop: Option<SliceBound>,
    pub step: Option<usize>,
}

impl ProSlice {
    pub fn new(start: Option<SliceBound>, stop: Option<SliceBound>, step: Option<usize>) -> Self {
        Self { start, stop, step }
    }

    fn entries(&self, pro: &[Arc<Container>]) -> Vec<Arc<Container>> {
        let start = match &self.start {
            Some(bound) => match bound.position(pro) {
                Some(i) => i,
                // An anchor container absent from the PRO selects nothing
                None => return Vec::new(),
            },
            None => 0,
        };
        let stop = match &self.stop {
            Some(bound) => match bound.position(pro) {
                Some(i) => i,
                None => return Vec::new(),
            },
            None => pro.len(),
        };
        let step = self.step.unwrap_or(1).max(1);
        if start >= stop {
            return Vec::new();
        }
        pro[start..stop].iter().step_by(step).cloned().collect()
    }
}

/// An arbitrary container filter. Identity is by closure pointer, so two
/// filters compare equal only when built from the same closure instance.
#[derive(Clone)]
pub struct ProFilter {
    name: &'static str,
    f: Arc<dyn Fn(&Arc<Container>, &Scope, &ResolveSrc) -> bool + Send + Sync>,
}

impl ProFilter {
    fn keep(&self, container: &Arc<Container>, scope: &Scope, src: &ResolveSrc) -> bool {
        (self.f)(container, scope, src)
    }
}

impl PartialEq for ProFilter {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.f, &other.f)
    }
}

impl Eq for ProFilter {}

impl Hash for ProFilter {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.f) as *const () as usize).hash(state);
    }
}

impl fmt::Debug for ProFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Filter({})", self.name)
    }
}

/// Filter tree over the PRO.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Predicate {
    /// Identity filter
    Noop,
    /// Keep containers viewable at this level or above
    Access(AccessLevel),
    /// Keep the PRO only while evaluating in the origin scope
    OnlySelf,
    /// Keep the PRO only while evaluating outside the origin scope
    SkipSelf,
    /// Positional slice of the PRO
    Slice(ProSlice),
    /// Arbitrary container filter
    Filter(ProFilter),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Sub(Box<Predicate>, Box<Predicate>),
}

impl Predicate {
    #[inline]
    pub fn only_self() -> Self {
        Self::OnlySelf
    }

    #[inline]
    pub fn skip_self() -> Self {
        Self::SkipSelf
    }

    #[inline]
    pub fn access(level: AccessLevel) -> Self {
        Self::Access(level)
    }

    /// Slice of the PRO by position or container anchors.
    pub fn slice(
        start: Option<SliceBound>,
        stop: Option<SliceBound>,
        step: Option<usize>,
    ) -> Self {
        Self::Slice(ProSlice::new(start, stop, step))
    }

    /// Filter on the container alone.
    pub fn filter(
        name: &'static str,
        f: impl Fn(&Arc<Container>) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self::Filter(ProFilter {
            name,
            f: Arc::new(move |c, _, _| f(c)),
        })
    }

    /// Filter that also sees the evaluating scope.
    pub fn filter_with_scope(
        name: &'static str,
        f: impl Fn(&Arc<Container>, &Scope) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self::Filter(ProFilter {
            name,
            f: Arc::new(move |c, s, _| f(c, s)),
        })
    }

    /// Filter with full resolution context.
    pub fn filter_with_src(
        name: &'static str,
        f: impl Fn(&Arc<Container>, &Scope, &ResolveSrc) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self::Filter(ProFilter {
            name,
            f: Arc::new(f),
        })
    }

    /// Evaluate against a PRO. The result is an index-ordered subsequence
    /// of `pro`; evaluation is idempotent.
    pub fn pro_entries(
        &self,
        pro: &[Arc<Container>],
        scope: &Scope,
        src: &ResolveSrc,
    ) -> Vec<Arc<Container>> {
        match self {
            Self::Noop => pro.to_vec(),
            Self::Access(level) => pro
                .iter()
                .filter(|c| c.access_level(Some(&src.container)) >= *level)
                .cloned()
                .collect(),
            Self::OnlySelf => {
                if scope.id() == src.scope {
                    pro.to_vec()
                } else {
                    Vec::new()
                }
            }
            Self::SkipSelf => {
                if scope.id() != src.scope {
                    pro.to_vec()
                } else {
                    Vec::new()
                }
            }
            Self::Slice(slice) => slice.entries(pro),
            Self::Filter(filter) => pro
                .iter()
                .filter(|c| filter.keep(c, scope, src))
                .cloned()
                .collect(),
            Self::And(a, b) => Self::operate(pro, scope, src, a, b, |l, r| {
                l.intersection(r).copied().collect()
            }),
            Self::Or(a, b) => {
                Self::operate(pro, scope, src, a, b, |l, r| l.union(r).copied().collect())
            }
            Self::Sub(a, b) => Self::operate(pro, scope, src, a, b, |l, r| {
                l.difference(r).copied().collect()
            }),
        }
    }

    /// Set-operate two operand evaluations, then restore input order.
    fn operate(
        pro: &[Arc<Container>],
        scope: &Scope,
        src: &ResolveSrc,
        a: &Predicate,
        b: &Predicate,
        op: impl Fn(&HashSet<ContainerId>, &HashSet<ContainerId>) -> HashSet<ContainerId>,
    ) -> Vec<Arc<Container>> {
        let left: HashSet<ContainerId> =
            a.pro_entries(pro, scope, src).iter().map(|c| c.id()).collect();
        let right: HashSet<ContainerId> =
            b.pro_entries(pro, scope, src).iter().map(|c| c.id()).collect();
        let keep = op(&left, &right);
        pro.iter().filter(|c| keep.contains(&c.id())).cloned().collect()
    }
}

impl std::ops::BitAnd for Predicate {
    type Output = Predicate;

    fn bitand(self, rhs: Predicate) -> Predicate {
        if self == rhs {
            return self;
        }
        if self == Predicate::Noop {
            return rhs;
        }
        if rhs == Predicate::Noop {
            return self;
        }
        Predicate::And(Box::new(self), Box::new(rhs))
    }
}

impl std::ops::BitOr for Predicate {
    type Output = Predicate;

    fn bitor(self, rhs: Predicate) -> Predicate {
        if self == rhs {
            return self;
        }
        Predicate::Or(Box::new(self), Box::new(rhs))
    }
}

impl std::ops::Sub for Predicate {
    type Output = Predicate;

    fn sub(self, rhs: Predicate) -> Predicate {
        Predicate::Sub(Box::new(self), Box::new(rhs))
    }
}

impl std::ops::Not for Predicate {
    type Output = Predicate;

    /// Complement relative to the identity filter.
    fn not(self) -> Predicate {
        Predicate::Sub(Box::new(Predicate::Noop), Box::new(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Container;
    use crate::scope::Scope;

    fn wired() -> (Vec<Arc<Container>>, Arc<Scope>, ResolveSrc) {
        let root = Container::new("root");
        let a = Container::new("a");
        let b = Container::new("b");
        root.include([a.clone(), b.clone()]).unwrap();
        let scope = Scope::new(root.clone());
        let pro = root.pro();
        let src = ResolveSrc {
            container: root,
            scope: scope.id(),
        };
        (pro, scope, src)
    }

    #[test]
    fn noop_is_identity() {
        let (pro, scope, src) = wired();
        let out = Predicate::Noop.pro_entries(&pro, &scope, &src);
        assert_eq!(out.len(), pro.len());
    }

    #[test]
    fn entries_are_order_preserving_subsequence() {
        let (pro, scope, src) = wired();
        let pred = Predicate::filter("skip-a", |c| c.name() != "a");
        let out = pred.pro_entries(&pro, &scope, &src);

        let mut cursor = pro.iter();
        for kept in &out {
            assert!(cursor.any(|c| c.id() == kept.id()), "order not preserved");
        }
    }

    #[test]
    fn pro_entries_idempotent() {
        let (pro, scope, src) = wired();
        let pred = Predicate::filter("skip-b", |c| c.name() != "b")
            | Predicate::Access(AccessLevel::Public);
        let once = pred.pro_entries(&pro, &scope, &src);
        let twice = pred.pro_entries(&once, &scope, &src);
        let ids = |v: &[Arc<Container>]| v.iter().map(|c| c.id()).collect::<Vec<_>>();
        assert_eq!(ids(&once), ids(&twice));
    }

    #[test]
    fn and_intersects_or_unions() {
        let (pro, scope, src) = wired();
        let not_a = Predicate::filter("not-a", |c| c.name() != "a");
        let not_b = Predicate::filter("not-b", |c| c.name() != "b");

        let both = (not_a.clone() & not_b.clone()).pro_entries(&pro, &scope, &src);
        assert_eq!(both.len(), 1);
        assert_eq!(both[0].name(), "root");

        let either = (not_a | not_b).pro_entries(&pro, &scope, &src);
        assert_eq!(either.len(), 3);
    }

    #[test]
    fn invert_is_complement() {
        let (pro, scope, src) = wired();
        let not_a = Predicate::filter("not-a", |c| c.name() != "a");
        let only_a = !not_a;
        let out = only_a.pro_entries(&pro, &scope, &src);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name(), "a");
    }

    #[test]
    fn slice_by_index_and_anchor() {
        let (pro, scope, src) = wired();
        let tail =
            Predicate::slice(Some(SliceBound::Index(1)), None, None).pro_entries(&pro, &scope, &src);
        assert_eq!(tail.len(), pro.len() - 1);

        let anchored = Predicate::slice(Some(SliceBound::at(&pro[1])), None, None)
            .pro_entries(&pro, &scope, &src);
        assert_eq!(anchored[0].id(), pro[1].id());

        let negative = Predicate::slice(Some(SliceBound::Index(-1)), None, None)
            .pro_entries(&pro, &scope, &src);
        assert_eq!(negative.len(), 1);
    }

    #[test]
    fn combining_equal_predicates_collapses() {
        let p = Predicate::only_self();
        assert_eq!(p.clone() & p.clone(), p);
        assert_eq!(p.clone() | p.clone(), p);
    }

    #[test]
    fn access_levels_are_ordered() {
        assert!(AccessLevel::Private > AccessLevel::Guarded);
        assert!(AccessLevel::Guarded > AccessLevel::Protected);
        assert!(AccessLevel::Protected > AccessLevel::Public);
    }
}

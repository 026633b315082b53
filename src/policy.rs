//! # Policies
//!
//! A policy is a named dispatch strategy. It decides which binding keys match
//! a callback key (its [`Variance`]), how competing bindings are ordered, and
//! how a binding's [`Outcome`] is recorded into the callback.
//!
//! | Policy | Variance | Nothing returned means |
//! |---|---|---|
//! | `Handles` | contravariant | handled |
//! | `Provides` | covariant | not handled |
//! | `Creates` | covariant | not handled |
//! | `Maps` | bivariant | not handled |
//! | `Validates` | contravariant | handled |
//!
//! Policies are process-wide statics. Each carries a list of global
//! [`FilterProvider`]s that run for every binding of that policy; the list is
//! swapped atomically so dispatch never takes a lock to read it.

use crate::callback::Callback;
use crate::dispatch::Outcome;
use crate::filter::FilterProvider;
use crate::handle_result::HandleResult;
use crate::types;
use crate::value::Key;
use arc_swap::ArcSwap;
use once_cell::sync::Lazy;
use std::fmt;
use std::sync::Arc;

/// Built-in policy identifiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PolicyKind {
    Handles,
    Provides,
    Creates,
    Maps,
    Validates,
}

impl PolicyKind {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            PolicyKind::Handles => "Handles",
            PolicyKind::Provides => "Provides",
            PolicyKind::Creates => "Creates",
            PolicyKind::Maps => "Maps",
            PolicyKind::Validates => "Validates",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How binding keys relate to callback keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Variance {
    /// Binding key must be exactly the callback key
    Invariant,
    /// Callback type must be assignable to the binding key
    Contravariant,
    /// Binding result type must be assignable to the callback key
    Covariant,
    /// Contravariant source, invariant target
    Bivariant,
}

/// A dispatch strategy.
pub struct Policy {
    kind: PolicyKind,
    variance: Variance,
    filters: ArcSwap<Vec<Arc<dyn FilterProvider>>>,
}

static HANDLES: Lazy<Policy> = Lazy::new(|| Policy::new(PolicyKind::Handles, Variance::Contravariant));
static PROVIDES: Lazy<Policy> = Lazy::new(|| Policy::new(PolicyKind::Provides, Variance::Covariant));
static CREATES: Lazy<Policy> = Lazy::new(|| Policy::new(PolicyKind::Creates, Variance::Covariant));
static MAPS: Lazy<Policy> = Lazy::new(|| Policy::new(PolicyKind::Maps, Variance::Bivariant));
static VALIDATES: Lazy<Policy> =
    Lazy::new(|| Policy::new(PolicyKind::Validates, Variance::Contravariant));

impl Policy {
    fn new(kind: PolicyKind, variance: Variance) -> Self {
        Self {
            kind,
            variance,
            filters: ArcSwap::from_pointee(Vec::new()),
        }
    }

    #[must_use]
    pub fn handles() -> &'static Policy {
        &HANDLES
    }

    #[must_use]
    pub fn provides() -> &'static Policy {
        &PROVIDES
    }

    #[must_use]
    pub fn creates() -> &'static Policy {
        &CREATES
    }

    #[must_use]
    pub fn maps() -> &'static Policy {
        &MAPS
    }

    #[must_use]
    pub fn validates() -> &'static Policy {
        &VALIDATES
    }

    #[must_use]
    pub fn of(kind: PolicyKind) -> &'static Policy {
        match kind {
            PolicyKind::Handles => Self::handles(),
            PolicyKind::Provides => Self::provides(),
            PolicyKind::Creates => Self::creates(),
            PolicyKind::Maps => Self::maps(),
            PolicyKind::Validates => Self::validates(),
        }
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> PolicyKind {
        self.kind
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    #[inline]
    #[must_use]
    pub fn variance(&self) -> Variance {
        self.variance
    }

    /// Global filter providers for this policy.
    #[must_use]
    pub fn filters(&self) -> Arc<Vec<Arc<dyn FilterProvider>>> {
        self.filters.load_full()
    }

    /// Append global filter providers.
    pub fn add_filters<I>(&self, providers: I)
    where
        I: IntoIterator<Item = Arc<dyn FilterProvider>>,
    {
        let added: Vec<Arc<dyn FilterProvider>> = providers.into_iter().collect();
        if added.is_empty() {
            return;
        }
        self.filters.rcu(|current| {
            let mut next = Vec::with_capacity(current.len() + added.len());
            next.extend(current.iter().map(Arc::clone));
            next.extend(added.iter().map(Arc::clone));
            next
        });
    }

    /// Remove every global filter provider.
    pub fn clear_filters(&self) {
        self.filters.store(Arc::new(Vec::new()));
    }

    /// Whether a binding keyed by `binding` can serve a callback keyed by `callback`.
    ///
    /// `strict` disables assignability, leaving exact and `Any` matches.
    #[must_use]
    pub fn matches_key(&self, binding: &Key, callback: &Key, strict: bool) -> bool {
        match self.variance {
            Variance::Invariant => binding == callback,
            Variance::Contravariant => contravariant(binding, callback, strict),
            Variance::Covariant => covariant(binding, callback, strict),
            Variance::Bivariant => match (binding, callback) {
                (Key::Any, _) => true,
                (
                    Key::Mapping { source: bs, target: bt },
                    Key::Mapping { source: cs, target: ct },
                ) => contravariant(bs, cs, strict) && (bt == ct || bt.is_any()),
                _ => false,
            },
        }
    }

    /// Record `outcome` into `callback` and report whether it was handled.
    pub fn accept(&self, outcome: Outcome, callback: &mut dyn Callback) -> HandleResult {
        match self.variance {
            Variance::Contravariant => accept_contravariant(outcome, callback),
            _ => accept_covariant(outcome, callback),
        }
    }
}

impl fmt::Debug for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Policy")
            .field("kind", &self.kind)
            .field("variance", &self.variance)
            .field("filters", &self.filters.load().len())
            .finish()
    }
}

fn contravariant(binding: &Key, callback: &Key, strict: bool) -> bool {
    if binding == callback || binding.is_any() {
        return true;
    }
    match (binding, callback) {
        (Key::Type(target), Key::Type(source)) => !strict && types::is_assignable(*source, *target),
        _ => false,
    }
}

fn covariant(binding: &Key, callback: &Key, strict: bool) -> bool {
    if binding == callback || binding.is_any() {
        return true;
    }
    match (binding, callback) {
        (Key::Type(_), Key::Any) => !strict,
        (Key::Type(produced), Key::Type(requested)) => {
            !strict && types::is_assignable(*produced, *requested)
        }
        _ => false,
    }
}

fn accept_contravariant(outcome: Outcome, callback: &mut dyn Callback) -> HandleResult {
    match outcome {
        Outcome::Nothing => HandleResult::HANDLED,
        Outcome::Value(value) => {
            callback.receive_result(value);
            HandleResult::HANDLED
        }
        Outcome::Values(values) => {
            for value in values {
                callback.receive_result(value);
            }
            HandleResult::HANDLED
        }
        Outcome::Result(result) => result,
        Outcome::WithResult(inner, result) => {
            if result.handled() {
                record(*inner, callback);
            }
            result
        }
        Outcome::Pending(pending) => {
            callback.receive_pending(pending.then_try(Outcome::into_values));
            HandleResult::HANDLED
        }
        Outcome::Effects(inner, _) => accept_contravariant(*inner, callback),
    }
}

fn accept_covariant(outcome: Outcome, callback: &mut dyn Callback) -> HandleResult {
    match outcome {
        Outcome::Result(result) => result,
        Outcome::WithResult(inner, result) => {
            if result.handled() && !record(*inner, callback) {
                return HandleResult::NOT_HANDLED;
            }
            result
        }
        other => {
            if record(other, callback) {
                HandleResult::HANDLED
            } else {
                HandleResult::NOT_HANDLED
            }
        }
    }
}

/// Record every value of `outcome`; true when at least one was accepted.
fn record(outcome: Outcome, callback: &mut dyn Callback) -> bool {
    match outcome {
        Outcome::Nothing | Outcome::Result(_) => false,
        Outcome::Value(value) => callback.receive_result(value),
        Outcome::Values(values) => {
            let mut accepted = false;
            for value in values {
                accepted |= callback.receive_result(value);
            }
            accepted
        }
        Outcome::WithResult(inner, result) => result.handled() && record(*inner, callback),
        Outcome::Pending(pending) => {
            callback.receive_pending(pending.then_try(Outcome::into_values));
            true
        }
        Outcome::Effects(inner, _) => record(*inner, callback),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeKey;

    struct Animal;
    struct Dog;

    #[test]
    fn contravariant_matches_supertypes() {
        types::relate::<Dog, Animal>(|_| Arc::new(Animal));
        let handles = Policy::handles();
        let animal = Key::Type(TypeKey::of::<Animal>());
        let dog = Key::Type(TypeKey::of::<Dog>());
        assert!(handles.matches_key(&animal, &dog, false));
        assert!(!handles.matches_key(&animal, &dog, true));
        assert!(!handles.matches_key(&dog, &animal, false));
        assert!(handles.matches_key(&Key::Any, &dog, true));
    }

    #[test]
    fn covariant_matches_subtypes() {
        types::relate::<Dog, Animal>(|_| Arc::new(Animal));
        let provides = Policy::provides();
        let animal = Key::Type(TypeKey::of::<Animal>());
        let dog = Key::Type(TypeKey::of::<Dog>());
        assert!(provides.matches_key(&dog, &animal, false));
        assert!(!provides.matches_key(&animal, &dog, false));
    }

    #[test]
    fn names_match_exactly() {
        let provides = Policy::provides();
        assert!(provides.matches_key(&Key::name("a"), &Key::name("a"), false));
        assert!(!provides.matches_key(&Key::name("a"), &Key::name("b"), false));
    }

    #[test]
    fn maps_target_is_invariant() {
        let maps = Policy::maps();
        let source = Key::Type(TypeKey::of::<Dog>());
        let json = Key::mapping(source.clone(), Key::name("json"));
        let xml = Key::mapping(source.clone(), Key::name("xml"));
        let open = Key::mapping(source, Key::Any);
        assert!(maps.matches_key(&json, &json, false));
        assert!(!maps.matches_key(&json, &xml, false));
        assert!(maps.matches_key(&open, &xml, false));
    }
}

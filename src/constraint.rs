//! Binding metadata and the constraints resolution requests place on it.
//!
//! A binding carries [`BindingMetadata`]: an optional name, string pairs,
//! qualifier types, validation groups and arbitrary typed values. A callback
//! carries a [`ConstraintSet`]. A binding is a candidate only when its
//! metadata satisfies every constraint of the callback; in addition a named
//! binding is only ever selected by a request for that name.

use crate::types::{Keyed, TypeKey};
use crate::value::Value;
use once_cell::sync::Lazy;
use smallvec::SmallVec;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// A single requirement on binding metadata.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Constraint {
    /// Binding must be named exactly this
    Named(Arc<str>),
    /// Binding must carry this key/value pair
    Metadata { key: Arc<str>, value: Arc<str> },
    /// Binding must be tagged with this qualifier type
    Qualifier(TypeKey),
}

impl Constraint {
    pub fn named(name: impl Into<Arc<str>>) -> Self {
        Constraint::Named(name.into())
    }

    pub fn metadata(key: impl Into<Arc<str>>, value: impl Into<Arc<str>>) -> Self {
        Constraint::Metadata {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Require the zero-sized marker type `Q`.
    #[must_use]
    pub fn qualifier<Q: ?Sized + 'static>() -> Self {
        Constraint::Qualifier(TypeKey::of::<Q>())
    }

    /// True when `metadata` fulfils this constraint.
    #[must_use]
    pub fn satisfied_by(&self, metadata: &BindingMetadata) -> bool {
        match self {
            Constraint::Named(name) => metadata.name.as_deref() == Some(&**name),
            Constraint::Metadata { key, value } => {
                metadata.values.get(key).is_some_and(|v| v == value)
            }
            Constraint::Qualifier(key) => metadata.qualifiers.contains(key),
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Named(name) => write!(f, "named({name})"),
            Constraint::Metadata { key, value } => write!(f, "{key}={value}"),
            Constraint::Qualifier(key) => write!(f, "qualifier({})", key.short_name()),
        }
    }
}

/// Constraints attached to a callback.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConstraintSet {
    items: SmallVec<[Constraint; 2]>,
}

static EMPTY: Lazy<ConstraintSet> = Lazy::new(ConstraintSet::default);

impl ConstraintSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared empty set.
    #[must_use]
    pub fn empty() -> &'static ConstraintSet {
        &EMPTY
    }

    pub fn push(&mut self, constraint: Constraint) {
        if !self.items.contains(&constraint) {
            self.items.push(constraint);
        }
    }

    #[must_use]
    pub fn with(mut self, constraint: Constraint) -> Self {
        self.push(constraint);
        self
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Constraint> {
        self.items.iter()
    }

    /// The requested name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.items.iter().find_map(|c| match c {
            Constraint::Named(name) => Some(&**name),
            _ => None,
        })
    }

    /// Whether a binding with `metadata` may serve a request with these constraints.
    #[must_use]
    pub fn allows(&self, metadata: &BindingMetadata) -> bool {
        if metadata.name.is_some() && self.name().is_none() {
            return false;
        }
        self.items.iter().all(|c| c.satisfied_by(metadata))
    }
}

impl FromIterator<Constraint> for ConstraintSet {
    fn from_iter<I: IntoIterator<Item = Constraint>>(iter: I) -> Self {
        let mut set = ConstraintSet::new();
        for constraint in iter {
            set.push(constraint);
        }
        set
    }
}

/// Metadata declared on a binding.
#[derive(Clone, Default)]
pub struct BindingMetadata {
    name: Option<Arc<str>>,
    values: BTreeMap<Arc<str>, Arc<str>>,
    qualifiers: SmallVec<[TypeKey; 2]>,
    groups: Vec<Arc<str>>,
    typed: HashMap<TypeKey, Value>,
}

impl BindingMetadata {
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: impl Into<Arc<str>>) {
        self.name = Some(name.into());
    }

    /// String value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|v| &**v)
    }

    pub fn insert(&mut self, key: impl Into<Arc<str>>, value: impl Into<Arc<str>>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn values(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (&**k, &**v))
    }

    pub fn add_qualifier(&mut self, key: TypeKey) {
        if !self.qualifiers.contains(&key) {
            self.qualifiers.push(key);
        }
    }

    #[must_use]
    pub fn has_qualifier(&self, key: TypeKey) -> bool {
        self.qualifiers.contains(&key)
    }

    /// Validation groups this binding belongs to.
    #[must_use]
    pub fn groups(&self) -> &[Arc<str>] {
        &self.groups
    }

    pub fn add_group(&mut self, group: impl Into<Arc<str>>) {
        let group = group.into();
        if !self.groups.contains(&group) {
            self.groups.push(group);
        }
    }

    /// Attach a typed value readable through the `Metadata<M>` dependency.
    pub fn set_value<M: Keyed>(&mut self, value: Arc<M>) {
        self.typed.insert(M::type_key(), M::into_value(value));
    }

    #[must_use]
    pub fn value<M: Keyed>(&self) -> Option<Arc<M>> {
        self.typed.get(&M::type_key()).and_then(M::from_value)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.values.is_empty()
            && self.qualifiers.is_empty()
            && self.groups.is_empty()
            && self.typed.is_empty()
    }
}

impl fmt::Debug for BindingMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingMetadata")
            .field("name", &self.name)
            .field("values", &self.values)
            .field("qualifiers", &self.qualifiers)
            .field("groups", &self.groups)
            .field("typed", &self.typed.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Primary;

    #[test]
    fn named_bindings_require_a_matching_request() {
        let mut meta = BindingMetadata::default();
        meta.set_name("x");
        assert!(!ConstraintSet::new().allows(&meta));
        assert!(ConstraintSet::new().with(Constraint::named("x")).allows(&meta));
        assert!(!ConstraintSet::new().with(Constraint::named("y")).allows(&meta));
    }

    #[test]
    fn unnamed_bindings_reject_named_requests() {
        let meta = BindingMetadata::default();
        assert!(ConstraintSet::new().allows(&meta));
        assert!(!ConstraintSet::new().with(Constraint::named("x")).allows(&meta));
    }

    #[test]
    fn metadata_and_qualifiers() {
        let mut meta = BindingMetadata::default();
        meta.insert("layout", "wide");
        meta.add_qualifier(TypeKey::of::<Primary>());
        let request = ConstraintSet::new()
            .with(Constraint::metadata("layout", "wide"))
            .with(Constraint::qualifier::<Primary>());
        assert!(request.allows(&meta));
        let other = ConstraintSet::new().with(Constraint::metadata("layout", "narrow"));
        assert!(!other.allows(&meta));
    }

    #[test]
    fn typed_values_round_trip() {
        let mut meta = BindingMetadata::default();
        meta.set_value(Arc::new(42_u16));
        assert_eq!(*meta.value::<u16>().unwrap(), 42);
        assert!(meta.value::<u32>().is_none());
    }
}

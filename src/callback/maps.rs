use super::{Callback, CallbackBase, Reply};
use crate::constraint::ConstraintSet;
use crate::policy::Policy;
use crate::types::Keyed;
use crate::value::{Key, Value};
use std::any::Any;
use std::sync::Arc;

/// Project a source value into a target type or format.
///
/// The key combines the source type with either the target type or a format
/// name. When mapping into an existing value, [`Maps::target`] exposes it to
/// the binding.
pub struct Maps {
    source: Value,
    target_key: Key,
    target: Option<Value>,
    constraints: ConstraintSet,
    base: CallbackBase,
}

impl Maps {
    /// Map `source` to the type `T`.
    #[must_use]
    pub fn to<T: ?Sized + Keyed>(source: Value) -> Self {
        Self::new(source, Key::of::<T>())
    }

    /// Map `source` to a named format.
    pub fn to_format(source: Value, format: impl Into<Arc<str>>) -> Self {
        Self::new(source, Key::Name(format.into()))
    }

    #[must_use]
    pub fn new(source: Value, target_key: Key) -> Self {
        Self {
            source,
            target_key,
            target: None,
            constraints: ConstraintSet::new(),
            base: CallbackBase::new(),
        }
    }

    /// Map into an existing `target` instead of producing a new value.
    #[must_use]
    pub fn into_target(mut self, target: Value) -> Self {
        self.target = Some(target);
        self
    }

    #[must_use]
    pub fn target(&self) -> Option<&Value> {
        self.target.as_ref()
    }

    #[must_use]
    pub fn target_key(&self) -> &Key {
        &self.target_key
    }

    /// Format name when mapping to a format.
    #[must_use]
    pub fn format(&self) -> Option<&str> {
        match &self.target_key {
            Key::Name(name) => Some(name),
            _ => None,
        }
    }

    #[must_use]
    pub fn result(&self, many: bool) -> Reply<Vec<Value>> {
        self.base.result(many)
    }
}

impl Callback for Maps {
    fn policy(&self) -> &'static Policy {
        Policy::maps()
    }

    fn key(&self) -> Key {
        Key::mapping(Key::Type(self.source.type_key()), self.target_key.clone())
    }

    fn source(&self) -> Option<&Value> {
        Some(&self.source)
    }

    fn constraints(&self) -> &ConstraintSet {
        &self.constraints
    }

    fn base(&self) -> &CallbackBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut CallbackBase {
        &mut self.base
    }

    fn receive_result(&mut self, value: Value) -> bool {
        if let Key::Type(key) = &self.target_key {
            if !value.is_assignable_to(*key) {
                return false;
            }
        }
        self.base.add_value(value);
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

use super::{Callback, CallbackBase, Reply};
use crate::constraint::{Constraint, ConstraintSet};
use crate::policy::Policy;
use crate::types::Keyed;
use crate::value::{Key, Value};
use std::any::Any;

/// A covariant request for new instances of a key.
///
/// Unlike [`Provides`](super::Provides), lifestyles never apply, so every
/// matching factory runs.
pub struct Creates {
    key: Key,
    constraints: ConstraintSet,
    base: CallbackBase,
}

impl Creates {
    pub fn new(key: impl Into<Key>) -> Self {
        Self {
            key: key.into(),
            constraints: ConstraintSet::new(),
            base: CallbackBase::new(),
        }
    }

    #[must_use]
    pub fn of<T: ?Sized + Keyed>() -> Self {
        Self::new(Key::of::<T>())
    }

    #[must_use]
    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    #[must_use]
    pub fn result(&self, many: bool) -> Reply<Vec<Value>> {
        self.base.result(many)
    }
}

impl Callback for Creates {
    fn policy(&self) -> &'static Policy {
        Policy::creates()
    }

    fn key(&self) -> Key {
        self.key.clone()
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
        if let Key::Type(key) = &self.key {
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

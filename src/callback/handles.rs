use super::{Callback, CallbackBase};
use crate::constraint::{Constraint, ConstraintSet};
use crate::policy::Policy;
use crate::types::Keyed;
use crate::value::{Key, Value};
use std::any::Any;
use std::sync::Arc;

/// A command or event delivered to contravariant `Handles` bindings.
pub struct Handles {
    source: Value,
    constraints: ConstraintSet,
    base: CallbackBase,
}

impl Handles {
    #[must_use]
    pub fn new(source: Value) -> Self {
        Self {
            source,
            constraints: ConstraintSet::new(),
            base: CallbackBase::new(),
        }
    }

    /// Wrap a shared message.
    pub fn of<T: ?Sized + Keyed>(message: Arc<T>) -> Self {
        Self::new(T::into_value(message))
    }

    #[must_use]
    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// The message being handled.
    #[must_use]
    pub fn message(&self) -> &Value {
        &self.source
    }
}

impl Callback for Handles {
    fn policy(&self) -> &'static Policy {
        Policy::handles()
    }

    fn key(&self) -> Key {
        Key::Type(self.source.type_key())
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

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

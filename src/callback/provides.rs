use super::{Callback, CallbackBase, Reply};
use crate::constraint::{Constraint, ConstraintSet};
use crate::descriptor::Binding;
use crate::policy::Policy;
use crate::promise::Promise;
use crate::runtime_config::RuntimeConfig;
use crate::types::Keyed;
use crate::value::{Key, Value};
use std::any::Any;
use std::sync::Arc;
use tracing::warn;

/// One step of a dependency chain.
///
/// Every `Provides` made while materializing a binding's dependencies
/// carries the frame of the binding that needed them, so nested resolutions
/// can detect cycles and enforce lifestyle compatibility with their parent.
#[derive(Debug)]
pub struct ResolutionFrame {
    key: Key,
    binding: Arc<Binding>,
    instance: usize,
    parent: Option<Arc<ResolutionFrame>>,
    depth: usize,
}

impl ResolutionFrame {
    #[must_use]
    pub fn new(
        key: Key,
        binding: Arc<Binding>,
        instance: usize,
        parent: Option<Arc<ResolutionFrame>>,
    ) -> Self {
        let depth = parent.as_ref().map_or(0, |p| p.depth + 1);
        Self {
            key,
            binding,
            instance,
            parent,
            depth,
        }
    }

    /// Key that was being resolved.
    #[must_use]
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Binding that was serving the resolution.
    #[must_use]
    pub fn binding(&self) -> &Arc<Binding> {
        &self.binding
    }

    #[must_use]
    pub fn parent(&self) -> Option<&Arc<ResolutionFrame>> {
        self.parent.as_ref()
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// This frame followed by its ancestors.
    pub fn ancestry(&self) -> impl Iterator<Item = &ResolutionFrame> {
        std::iter::successors(Some(self), |frame| frame.parent.as_deref())
    }
}

/// A covariant request for instances of a key.
pub struct Provides {
    key: Key,
    constraints: ConstraintSet,
    parent: Option<Arc<ResolutionFrame>>,
    explicit: bool,
    strict: bool,
    late: bool,
    base: CallbackBase,
}

impl Provides {
    pub fn new(key: impl Into<Key>) -> Self {
        Self {
            key: key.into(),
            constraints: ConstraintSet::new(),
            parent: None,
            explicit: false,
            strict: false,
            late: false,
            base: CallbackBase::new(),
        }
    }

    /// Request instances of `T`.
    #[must_use]
    pub fn of<T: ?Sized + Keyed>() -> Self {
        Self::new(Key::of::<T>())
    }

    #[must_use]
    pub fn with_parent(mut self, parent: Option<Arc<ResolutionFrame>>) -> Self {
        self.parent = parent;
        self
    }

    #[must_use]
    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    #[must_use]
    pub fn with_constraints(mut self, constraints: ConstraintSet) -> Self {
        for constraint in constraints.iter() {
            self.constraints.push(constraint.clone());
        }
        self
    }

    /// Skip existing handler instances answering for their own type.
    #[must_use]
    pub fn explicit(mut self) -> Self {
        self.explicit = true;
        self
    }

    /// Only exact key matches.
    #[must_use]
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Record values without checking them against the requested type.
    #[must_use]
    pub fn late(mut self) -> Self {
        self.late = true;
        self
    }

    #[must_use]
    pub fn without_inference(mut self) -> Self {
        self.base.set_infer(false);
        self
    }

    #[must_use]
    pub fn parent(&self) -> Option<&Arc<ResolutionFrame>> {
        self.parent.as_ref()
    }

    #[must_use]
    pub fn is_explicit(&self) -> bool {
        self.explicit
    }

    #[must_use]
    pub fn is_late(&self) -> bool {
        self.late
    }

    /// Resolved values, the first only unless `many`.
    #[must_use]
    pub fn result(&self, many: bool) -> Reply<Vec<Value>> {
        self.base.result(many)
    }

    pub(crate) fn accepts(&self, value: &Value) -> bool {
        accepts(&self.key, self.late, value)
    }
}

fn accepts(key: &Key, late: bool, value: &Value) -> bool {
    if late {
        return true;
    }
    match key {
        Key::Type(key) => value.is_assignable_to(*key),
        _ => true,
    }
}

impl Callback for Provides {
    fn policy(&self) -> &'static Policy {
        Policy::provides()
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

    fn is_strict(&self) -> bool {
        self.strict
    }

    fn receive_result(&mut self, value: Value) -> bool {
        if !self.accepts(&value) {
            return false;
        }
        self.base.add_value(value);
        true
    }

    /// Promised values pass the same type check once they settle.
    fn receive_pending(&mut self, pending: Promise<Vec<Value>>) {
        let key = self.key.clone();
        let late = self.late;
        self.base.add_pending(pending.then(move |values| {
            values
                .into_iter()
                .filter(|value| accepts(&key, late, value))
                .collect::<Vec<Value>>()
        }));
    }

    fn child_frame(&self, binding: &Arc<Binding>, instance: usize) -> Option<Arc<ResolutionFrame>> {
        Some(Arc::new(ResolutionFrame::new(
            self.key.clone(),
            Arc::clone(binding),
            instance,
            self.parent.clone(),
        )))
    }

    fn can_dispatch(&self, instance: usize, binding: &Binding) -> bool {
        let Some(parent) = &self.parent else {
            return true;
        };
        if parent.depth() + 1 >= RuntimeConfig::global().max_dispatch_depth {
            warn!(
                key = %self.key,
                depth = parent.depth() + 1,
                "resolution depth limit reached"
            );
            return false;
        }
        !parent
            .ancestry()
            .any(|frame| frame.instance == instance && std::ptr::eq(&*frame.binding, binding))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_requests_reject_unrelated_values() {
        let mut provides = Provides::of::<u32>();
        assert!(!provides.receive_result(Value::new("text")));
        assert!(provides.receive_result(Value::new(7_u32)));
        assert_eq!(provides.base().len(), 1);
    }

    #[test]
    fn promised_values_are_type_checked() {
        let mut provides = Provides::of::<u32>();
        provides.receive_pending(Promise::resolve(vec![Value::new("text"), Value::new(9_u32)]));
        let values = provides.base().result(true).wait().unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(*values[0].downcast::<u32>().unwrap(), 9);
    }

    #[test]
    fn late_requests_accept_anything() {
        let mut provides = Provides::of::<u32>().late();
        assert!(provides.receive_result(Value::new("text")));
    }
}

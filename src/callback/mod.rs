//! # Callbacks
//!
//! A callback is the record being dispatched: a command, a provisioning
//! request, a mapping, a validation. Each callback names its [`Policy`],
//! exposes the [`Key`] bindings are matched against, and accumulates the
//! results handlers produce.
//!
//! ## Built-in callbacks
//!
//! | Callback | Policy | Key |
//! |---|---|---|
//! | [`Handles`] | `Handles` (contravariant) | type of the message |
//! | [`Provides`] | `Provides` (covariant) | requested type or name |
//! | [`Creates`] | `Creates` (covariant) | requested type |
//! | [`Maps`] | `Maps` (bivariant) | source type plus target type or format |
//! | [`Validates`] | `Validates` (contravariant) | type of the validated value |
//!
//! ## Results
//!
//! [`CallbackBase`] stores results in insertion order. Results may be ready
//! values or promises; [`CallbackBase::result`] folds them into a single
//! [`Reply`], which is pending as soon as any result is.

mod creates;
mod handles;
mod maps;
mod provides;
mod validates;

pub use creates::Creates;
pub use handles::Handles;
pub use maps::Maps;
pub use provides::{Provides, ResolutionFrame};
pub use validates::{ValidationOutcome, Validates, ANY_GROUP};

use crate::constraint::ConstraintSet;
use crate::descriptor::Binding;
use crate::error::Error;
use crate::policy::Policy;
use crate::promise::Promise;
use crate::value::{Key, Value};
use std::any::Any;
use std::sync::Arc;

/// A record dispatched through handlers.
pub trait Callback: Send + Sync {
    /// Policy selecting which bindings apply.
    fn policy(&self) -> &'static Policy;

    /// Key matched against binding keys under the policy's variance.
    fn key(&self) -> Key;

    /// The value carried by the callback, if any.
    fn source(&self) -> Option<&Value> {
        None
    }

    /// Constraints a binding must satisfy.
    fn constraints(&self) -> &ConstraintSet {
        ConstraintSet::empty()
    }

    fn base(&self) -> &CallbackBase;

    fn base_mut(&mut self) -> &mut CallbackBase;

    /// Whether inference handlers may serve this callback.
    fn can_infer(&self) -> bool {
        self.base().can_infer()
    }

    /// Whether filter pipelines run for this callback.
    fn can_filter(&self) -> bool {
        true
    }

    /// Disable variance: only exact keys match.
    fn is_strict(&self) -> bool {
        false
    }

    /// Last chance to veto a candidate binding.
    fn matches_binding(&self, _binding: &Binding) -> bool {
        true
    }

    /// Record a result; returns false when the value is not acceptable.
    fn receive_result(&mut self, value: Value) -> bool {
        self.base_mut().add_value(value);
        true
    }

    /// Record a result that settles later.
    fn receive_pending(&mut self, pending: Promise<Vec<Value>>) {
        self.base_mut().add_pending(pending);
    }

    /// Frame describing this resolution for nested dependency requests.
    fn child_frame(&self, _binding: &Arc<Binding>, _instance: usize) -> Option<Arc<ResolutionFrame>> {
        None
    }

    /// Guard against re-entrant resolution of the same binding.
    fn can_dispatch(&self, _instance: usize, _binding: &Binding) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Human readable description for diagnostics and errors.
    fn describe(&self) -> String {
        format!("{} {}", self.policy().name(), self.key())
    }
}

enum ResultEntry {
    Ready(Value),
    Pending(Promise<Vec<Value>>),
}

/// Result storage shared by every callback.
pub struct CallbackBase {
    results: Vec<ResultEntry>,
    pending: usize,
    infer: bool,
}

impl Default for CallbackBase {
    fn default() -> Self {
        Self::new()
    }
}

impl CallbackBase {
    #[must_use]
    pub fn new() -> Self {
        Self {
            results: Vec::new(),
            pending: 0,
            infer: true,
        }
    }

    pub fn add_value(&mut self, value: Value) {
        self.results.push(ResultEntry::Ready(value));
    }

    pub fn add_pending(&mut self, pending: Promise<Vec<Value>>) {
        self.pending += 1;
        self.results.push(ResultEntry::Pending(pending));
    }

    #[must_use]
    pub fn can_infer(&self) -> bool {
        self.infer
    }

    pub fn set_infer(&mut self, infer: bool) {
        self.infer = infer;
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending > 0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Ready values recorded so far, in order.
    pub fn ready_values(&self) -> impl Iterator<Item = &Value> {
        self.results.iter().filter_map(|entry| match entry {
            ResultEntry::Ready(value) => Some(value),
            ResultEntry::Pending(_) => None,
        })
    }

    /// Fold every result into one reply.
    ///
    /// With `many` the reply carries all values in order; otherwise at most
    /// the first. Any pending entry makes the whole reply pending.
    #[must_use]
    pub fn result(&self, many: bool) -> Reply<Vec<Value>> {
        if self.pending == 0 {
            let mut values: Vec<Value> = self.ready_values().cloned().collect();
            if !many {
                values.truncate(1);
            }
            return Reply::Ready(values);
        }
        let parts = self
            .results
            .iter()
            .map(|entry| match entry {
                ResultEntry::Ready(value) => Promise::resolve(vec![value.clone()]),
                ResultEntry::Pending(pending) => pending.clone(),
            })
            .collect();
        Reply::Pending(Promise::all(parts).then(move |groups| {
            let mut values: Vec<Value> = groups.into_iter().flatten().collect();
            if !many {
                values.truncate(1);
            }
            values
        }))
    }
}

/// A value that is either available now or promised.
#[derive(Debug, Clone)]
pub enum Reply<T> {
    Ready(T),
    Pending(Promise<T>),
}

impl<T: Clone + Send + 'static> Reply<T> {
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Reply::Pending(_))
    }

    /// The ready value, if not pending.
    #[must_use]
    pub fn ready(&self) -> Option<&T> {
        match self {
            Reply::Ready(value) => Some(value),
            Reply::Pending(_) => None,
        }
    }

    /// The promise, if pending.
    #[must_use]
    pub fn pending(&self) -> Option<&Promise<T>> {
        match self {
            Reply::Pending(promise) => Some(promise),
            Reply::Ready(_) => None,
        }
    }

    /// Block until the value is available.
    pub fn wait(self) -> Result<T, Error> {
        match self {
            Reply::Ready(value) => Ok(value),
            Reply::Pending(promise) => promise.wait(),
        }
    }

    #[must_use]
    pub fn into_promise(self) -> Promise<T> {
        match self {
            Reply::Ready(value) => Promise::resolve(value),
            Reply::Pending(promise) => promise,
        }
    }

    pub fn map<U, F>(self, f: F) -> Reply<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        match self {
            Reply::Ready(value) => Reply::Ready(f(value)),
            Reply::Pending(promise) => Reply::Pending(promise.then(f)),
        }
    }

    pub fn try_map<U, F>(self, f: F) -> Result<Reply<U>, Error>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<U, Error> + Send + 'static,
    {
        match self {
            Reply::Ready(value) => f(value).map(Reply::Ready),
            Reply::Pending(promise) => Ok(Reply::Pending(promise.then_try(f))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_results_fold_synchronously() {
        let mut base = CallbackBase::new();
        base.add_value(Value::new(1_u8));
        base.add_value(Value::new(2_u8));
        match base.result(true) {
            Reply::Ready(values) => assert_eq!(values.len(), 2),
            Reply::Pending(_) => panic!("expected ready"),
        }
        match base.result(false) {
            Reply::Ready(values) => assert_eq!(values.len(), 1),
            Reply::Pending(_) => panic!("expected ready"),
        }
    }

    #[test]
    fn pending_results_preserve_order() {
        let mut base = CallbackBase::new();
        base.add_value(Value::new(1_u8));
        let (pending, resolver) = Promise::defer();
        base.add_pending(pending);
        base.add_value(Value::new(3_u8));
        let reply = base.result(true);
        assert!(reply.is_pending());
        resolver.resolve(vec![Value::new(2_u8)]);
        let values = reply.wait().unwrap();
        let numbers: Vec<u8> = values.iter().map(|v| *v.downcast::<u8>().unwrap()).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }
}

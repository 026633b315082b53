//! # Dispatch Context
//!
//! Everything a binding sees while it runs: the callback being dispatched,
//! the binding itself, the handler instance that owns it and the *composer*,
//! the handler chain in effect for nested resolutions.
//!
//! ## Nested resolution
//!
//! Bindings resolve their dependencies by dispatching fresh [`Provides`]
//! callbacks through the composer. Those requests carry a
//! [`ResolutionFrame`] describing the binding that asked, which is how
//! lifestyles check parent compatibility and how resolution cycles are cut.
//!
//! ## Side effects
//!
//! A binding may return [`SideEffect`]s next to its result. They are applied
//! with the binding's own context as soon as it returns; promised effects
//! delay the result until they settle.

mod dependency;
mod effect;
mod outcome;

pub use dependency::{
    Dependency, DependencyArg, FromOptions, Metadata, NameTag, Named, Optional, Strict,
};
pub use effect::{effect_fn, Cascade, SideEffect, SideEffects};
pub use outcome::{IntoOutcome, Outcome};

use crate::callback::{Callback, Provides, Reply, ResolutionFrame};
use crate::constraint::ConstraintSet;
use crate::descriptor::Binding;
use crate::error::{Error, UnresolvedArgError};
use crate::handle_result::HandleResult;
use crate::handler::Handler;
use crate::types::Keyed;
use crate::value::{Key, Value};
use std::sync::Arc;

/// Per-invocation view handed to bindings and filters.
pub struct HandleContext<'a> {
    callback: &'a dyn Callback,
    binding: &'a Arc<Binding>,
    instance: Option<&'a Value>,
    composer: &'a dyn Handler,
    greedy: bool,
    frame: Option<Arc<ResolutionFrame>>,
}

impl<'a> HandleContext<'a> {
    pub(crate) fn new(
        callback: &'a dyn Callback,
        binding: &'a Arc<Binding>,
        instance: Option<&'a Value>,
        composer: &'a dyn Handler,
        greedy: bool,
        frame: Option<Arc<ResolutionFrame>>,
    ) -> Self {
        Self {
            callback,
            binding,
            instance,
            composer,
            greedy,
            frame,
        }
    }

    #[inline]
    #[must_use]
    pub fn callback(&self) -> &'a dyn Callback {
        self.callback
    }

    #[inline]
    #[must_use]
    pub fn binding(&self) -> &'a Arc<Binding> {
        self.binding
    }

    /// Handler instance owning the binding; `None` for function bindings.
    #[inline]
    #[must_use]
    pub fn instance(&self) -> Option<&'a Value> {
        self.instance
    }

    #[inline]
    #[must_use]
    pub fn composer(&self) -> &'a dyn Handler {
        self.composer
    }

    #[inline]
    #[must_use]
    pub fn greedy(&self) -> bool {
        self.greedy
    }

    /// Frame passed to nested resolutions.
    #[must_use]
    pub fn frame(&self) -> Option<&Arc<ResolutionFrame>> {
        self.frame.as_ref()
    }

    /// The callback as a concrete type.
    #[must_use]
    pub fn callback_as<C: 'static>(&self) -> Option<&'a C> {
        self.callback.as_any().downcast_ref::<C>()
    }

    /// A `Provides` for `key` chained to this invocation.
    #[must_use]
    pub fn provides(&self, key: impl Into<Key>) -> Provides {
        Provides::new(key).with_parent(self.frame.clone())
    }

    /// Resolve a single `T`.
    pub fn resolve<T: ?Sized + Keyed>(&self) -> Result<Option<Arc<T>>, Error> {
        let values = self.resolve_with(self.provides(Key::of::<T>()), false)?;
        Ok(values.iter().find_map(T::from_value))
    }

    /// Resolve every `T`.
    pub fn resolve_all<T: ?Sized + Keyed>(&self) -> Result<Vec<Arc<T>>, Error> {
        let values = self.resolve_with(self.provides(Key::of::<T>()), true)?;
        Ok(values.iter().filter_map(T::from_value).collect())
    }

    /// Resolve a `T` whose binding satisfies `constraints`.
    pub fn resolve_constrained<T: ?Sized + Keyed>(
        &self,
        constraints: ConstraintSet,
    ) -> Result<Option<Arc<T>>, Error> {
        let provides = self.provides(Key::of::<T>()).with_constraints(constraints);
        let values = self.resolve_with(provides, false)?;
        Ok(values.iter().find_map(T::from_value))
    }

    /// Dispatch a prepared `Provides` and wait for its values.
    pub fn resolve_with(&self, mut provides: Provides, many: bool) -> Result<Vec<Value>, Error> {
        let result = self.composer.handle(&mut provides, many, self.composer);
        surface(&result)?;
        provides.result(many).wait()
    }

    /// Dispatch a prepared `Provides` without waiting.
    pub fn resolve_reply(&self, mut provides: Provides, many: bool) -> Result<Reply<Vec<Value>>, Error> {
        let result = self.composer.handle(&mut provides, many, self.composer);
        surface(&result)?;
        Ok(provides.result(many))
    }

    pub(crate) fn unresolved(&self, arg: &str) -> Error {
        Error::UnresolvedArg(UnresolvedArgError {
            method: self.binding.name().to_string(),
            arg: arg.to_string(),
        })
    }
}

/// Turn a hard failure carried by `result` into an `Err`.
///
/// Declines never surface: a binding that did not handle is not a failure.
pub(crate) fn surface(result: &HandleResult) -> Result<(), Error> {
    match result.error() {
        Some(err) if !err.is_declined() => Err(err.clone()),
        _ => Ok(()),
    }
}

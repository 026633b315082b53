//! Side effects returned alongside a binding's result.
//!
//! A binding returning `(result, effect)` has `effect` applied right after it
//! returns, with the same [`HandleContext`]. Effects that settle later hand
//! back a promise and the binding's result waits for it.

use super::HandleContext;
use crate::api;
use crate::callback::{Handles, Reply};
use crate::constraint::{Constraint, ConstraintSet};
use crate::error::Error;
use crate::handler::Handler;
use crate::promise::Promise;
use crate::types::Keyed;
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

/// An action performed on behalf of a binding once it has returned.
pub trait SideEffect: Send + Sync + 'static {
    /// Perform the action. `Some` when it completes later.
    fn apply(&self, ctx: &HandleContext<'_>) -> Result<Option<Promise<()>>, Error>;
}

impl<E: SideEffect + ?Sized> SideEffect for Arc<E> {
    fn apply(&self, ctx: &HandleContext<'_>) -> Result<Option<Promise<()>>, Error> {
        (**self).apply(ctx)
    }
}

impl SideEffect for Vec<Arc<dyn SideEffect>> {
    fn apply(&self, ctx: &HandleContext<'_>) -> Result<Option<Promise<()>>, Error> {
        apply_all(self, ctx)
    }
}

/// Ordered group of side effects, applied front to back.
///
/// The first failing effect stops the group.
#[derive(Clone, Default)]
pub struct SideEffects(Vec<Arc<dyn SideEffect>>);

impl SideEffects {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, effect: impl SideEffect) -> Self {
        self.0.push(Arc::new(effect));
        self
    }

    pub fn push(&mut self, effect: Arc<dyn SideEffect>) {
        self.0.push(effect);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SideEffects {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SideEffects").field("len", &self.0.len()).finish()
    }
}

impl FromIterator<Arc<dyn SideEffect>> for SideEffects {
    fn from_iter<I: IntoIterator<Item = Arc<dyn SideEffect>>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<Arc<dyn SideEffect>> for SideEffects {
    fn from(effect: Arc<dyn SideEffect>) -> Self {
        Self(vec![effect])
    }
}

impl SideEffect for SideEffects {
    fn apply(&self, ctx: &HandleContext<'_>) -> Result<Option<Promise<()>>, Error> {
        apply_all(&self.0, ctx)
    }
}

fn apply_all(
    effects: &[Arc<dyn SideEffect>],
    ctx: &HandleContext<'_>,
) -> Result<Option<Promise<()>>, Error> {
    let mut pending = Vec::new();
    for effect in effects {
        if let Some(promise) = effect.apply(ctx)? {
            pending.push(promise);
        }
    }
    Ok(join(pending))
}

fn join(mut pending: Vec<Promise<()>>) -> Option<Promise<()>> {
    match pending.len() {
        0 => None,
        1 => pending.pop(),
        _ => Some(Promise::all(pending).then(|_| ())),
    }
}

/// Sends further commands once the binding returns.
///
/// Commands go through the composer unless [`Cascade::through`] names
/// another handler. An unhandled command fails the binding.
#[derive(Clone)]
pub struct Cascade {
    messages: Vec<Value>,
    constraints: ConstraintSet,
    handler: Option<Arc<dyn Handler>>,
    greedy: bool,
}

impl Cascade {
    /// Cascade a single message.
    pub fn of<C: ?Sized + Keyed>(message: Arc<C>) -> Self {
        Self::new().and(message)
    }

    #[must_use]
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            constraints: ConstraintSet::new(),
            handler: None,
            greedy: false,
        }
    }

    #[must_use]
    pub fn and<C: ?Sized + Keyed>(mut self, message: Arc<C>) -> Self {
        self.messages.push(C::into_value(message));
        self
    }

    #[must_use]
    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    #[must_use]
    pub fn through(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Deliver each message to every handler accepting it.
    #[must_use]
    pub fn greedy(mut self) -> Self {
        self.greedy = true;
        self
    }
}

impl Default for Cascade {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Cascade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cascade")
            .field("messages", &self.messages.len())
            .field("greedy", &self.greedy)
            .finish_non_exhaustive()
    }
}

impl SideEffect for Cascade {
    fn apply(&self, ctx: &HandleContext<'_>) -> Result<Option<Promise<()>>, Error> {
        let handler: &dyn Handler = match &self.handler {
            Some(handler) => &**handler,
            None => ctx.composer(),
        };
        let mut pending = Vec::new();
        for message in &self.messages {
            let mut handles = Handles::new(message.clone());
            for constraint in self.constraints.iter() {
                handles = handles.with_constraint(constraint.clone());
            }
            if let Reply::Pending(promise) = api::send(handler, handles, self.greedy)? {
                pending.push(promise);
            }
        }
        Ok(join(pending))
    }
}

/// A side effect from a closure.
pub fn effect_fn<F>(f: F) -> Arc<dyn SideEffect>
where
    F: Fn(&HandleContext<'_>) -> Result<Option<Promise<()>>, Error> + Send + Sync + 'static,
{
    Arc::new(EffectFn(f))
}

struct EffectFn<F>(F);

impl<F> SideEffect for EffectFn<F>
where
    F: Fn(&HandleContext<'_>) -> Result<Option<Promise<()>>, Error> + Send + Sync + 'static,
{
    fn apply(&self, ctx: &HandleContext<'_>) -> Result<Option<Promise<()>>, Error> {
        (self.0)(ctx)
    }
}

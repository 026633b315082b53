//! # Handler Descriptors
//!
//! A [`HandlerDescriptor`] is the compiled form of a handler type (or of a
//! function spec): its bindings grouped by policy, ready for dispatch.
//! Descriptors are built once by [`HandlerDescriptorFactory`] and never
//! mutated afterwards.
//!
//! ## Binding order
//!
//! Within a policy, bindings keyed by a string live in an exact-match map.
//! Every other binding sits in a list kept sorted so that more specific keys
//! come first, [`Key::Any`] comes last and declaration order breaks ties.
//!
//! ## Dispatch
//!
//! [`HandlerDescriptor::dispatch`] walks the candidates for a callback and,
//! for each one that matches its key, constraints and resolution guards:
//!
//! 1. assembles the filter pipeline (a provider that cannot be satisfied
//!    makes the binding decline)
//! 2. runs the pipeline around the binding, catching panics
//! 3. lets the policy record the outcome into the callback
//!
//! Results fold with [`HandleResult::or`]; the loop stops once the result is
//! done for the requested greediness.

mod binding;
mod builder;
mod registry;

pub use binding::{Binding, BindingKind, Invoker};
pub use builder::{BindingBuilder, Describe, DescriptorBuilder, FuncHost, FuncSpec, HandlerSpec, TypeSpec};
pub use registry::HandlerDescriptorFactory;

use crate::callback::Callback;
use crate::dispatch::{HandleContext, Outcome};
use crate::error::{Error, MethodBindingError};
use crate::filter::{ordered_filters, run_pipeline};
use crate::handle_result::HandleResult;
use crate::handler::Handler;
use crate::policy::{Policy, PolicyKind};
use crate::types::TypeKey;
use crate::value::{Key, Value};
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error};

/// Registry identity of a handler spec.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SpecKey {
    Type(TypeKey),
    /// A function spec: its name plus the id assigned when it was created,
    /// so two specs sharing a name stay distinct
    Func(Arc<str>, u64),
}

impl fmt::Display for SpecKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpecKey::Type(key) => f.write_str(key.short_name()),
            SpecKey::Func(name, _) => write!(f, "func {name}"),
        }
    }
}

/// Bindings of one policy.
#[derive(Default)]
pub struct PolicyBindings {
    variant: Vec<Arc<Binding>>,
    invariant: HashMap<Key, Vec<Arc<Binding>>>,
}

impl PolicyBindings {
    pub(crate) fn insert(&mut self, binding: Arc<Binding>) {
        if binding.key().is_invariant() {
            self.invariant
                .entry(binding.key().clone())
                .or_default()
                .push(binding);
            return;
        }
        let position = self
            .variant
            .iter()
            .position(|existing| binding.key().is_more_specific_than(existing.key()))
            .unwrap_or(self.variant.len());
        self.variant.insert(position, binding);
    }

    /// Bindings that may serve `key`, exact string matches first.
    pub fn candidates<'a>(&'a self, key: &Key) -> impl Iterator<Item = &'a Arc<Binding>> + 'a {
        let exact = match key {
            Key::Name(_) => self.invariant.get(key).map(Vec::as_slice).unwrap_or_default(),
            _ => &[],
        };
        exact.iter().chain(self.variant.iter())
    }

    /// Every binding of the policy.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Binding>> {
        self.invariant.values().flatten().chain(self.variant.iter())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.variant.len() + self.invariant.values().map(Vec::len).sum::<usize>()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Compiled bindings of one handler spec.
pub struct HandlerDescriptor {
    spec: SpecKey,
    handler: TypeKey,
    bindings: HashMap<PolicyKind, PolicyBindings>,
}

impl fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("spec", &self.spec)
            .field("bindings", &self.binding_count())
            .finish()
    }
}

impl HandlerDescriptor {
    pub(crate) fn new(
        spec: SpecKey,
        handler: TypeKey,
        bindings: HashMap<PolicyKind, PolicyBindings>,
    ) -> Self {
        Self {
            spec,
            handler,
            bindings,
        }
    }

    #[must_use]
    pub fn spec(&self) -> &SpecKey {
        &self.spec
    }

    /// Type of the handler instances; [`FuncHost`] for function specs.
    #[must_use]
    pub fn handler_type(&self) -> TypeKey {
        self.handler
    }

    #[must_use]
    pub fn bindings(&self, policy: PolicyKind) -> Option<&PolicyBindings> {
        self.bindings.get(&policy)
    }

    /// Policies this descriptor has bindings for.
    pub fn policies(&self) -> impl Iterator<Item = PolicyKind> + '_ {
        self.bindings.keys().copied()
    }

    #[must_use]
    pub fn binding_count(&self) -> usize {
        self.bindings.values().map(PolicyBindings::len).sum()
    }

    /// Dispatch `callback` to the bindings of `policy`.
    ///
    /// `instance` is the handler instance owning the bindings; it is `None`
    /// for constructors and function bindings.
    pub fn dispatch(
        &self,
        policy: &'static Policy,
        instance: Option<&Value>,
        callback: &mut dyn Callback,
        greedy: bool,
        composer: &dyn Handler,
    ) -> HandleResult {
        let Some(bindings) = self.bindings.get(&policy.kind()) else {
            return HandleResult::NOT_HANDLED;
        };
        let key = callback.key();
        let strict = callback.is_strict();
        let instance_id = instance.map_or(0, Value::addr);
        let mut result = HandleResult::NOT_HANDLED;
        for binding in bindings.candidates(&key) {
            if !policy.matches_key(binding.key(), &key, strict || binding.is_strict())
                || !callback.constraints().allows(binding.metadata())
                || !callback.matches_binding(binding)
                || !callback.can_dispatch(instance_id, binding)
            {
                continue;
            }
            result = result.or(invoke(binding, instance, callback, greedy, composer));
            if result.is_done(greedy) {
                break;
            }
        }
        result
    }
}

fn execute(ctx: &HandleContext<'_>) -> Result<Outcome, Error> {
    let binding = ctx.binding();
    let Some(filters) = ordered_filters(binding, ctx.callback(), ctx.composer())? else {
        return Ok(Outcome::Result(HandleResult::NOT_HANDLED));
    };
    if filters.is_empty() {
        return binding.invoke(ctx);
    }
    run_pipeline(ctx, &filters, &|ctx: &HandleContext<'_>| ctx.binding().invoke(ctx))?
        .apply_effects(ctx)
}

fn invoke(
    binding: &Arc<Binding>,
    instance: Option<&Value>,
    callback: &mut dyn Callback,
    greedy: bool,
    composer: &dyn Handler,
) -> HandleResult {
    let frame = callback.child_frame(binding, instance.map_or(0, Value::addr));
    let executed = {
        let ctx = HandleContext::new(&*callback, binding, instance, composer, greedy, frame);
        match catch_unwind(AssertUnwindSafe(|| execute(&ctx))) {
            Ok(result) => result,
            Err(panic) => Err(Error::from_panic(panic)),
        }
    };
    match executed {
        Ok(outcome) => binding.policy().accept(outcome, callback),
        Err(err) if err.is_declined() => {
            debug!(binding = binding.name(), reason = %err, "binding declined");
            HandleResult::NOT_HANDLED
        }
        Err(err @ Error::Panic(_)) => {
            error!(binding = binding.name(), error = %err, "binding panicked");
            HandleResult::NOT_HANDLED.with_error(Error::MethodBinding(MethodBindingError {
                method: binding.name().to_string(),
                cause: Box::new(err),
            }))
        }
        Err(err) => {
            debug!(binding = binding.name(), error = %err, "binding failed");
            HandleResult::NOT_HANDLED.with_error(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Animal;
    struct Dog;

    fn binding(key: Key) -> Arc<Binding> {
        let mut binding = Binding::link(Policy::provides(), TypeKey::of::<Dog>());
        binding.key = key;
        Arc::new(binding)
    }

    #[test]
    fn specific_keys_sort_before_general_ones() {
        crate::types::relate::<Dog, Animal>(|_| Arc::new(Animal));
        let mut bindings = PolicyBindings::default();
        bindings.insert(binding(Key::Any));
        bindings.insert(binding(Key::of::<Animal>()));
        bindings.insert(binding(Key::of::<Dog>()));
        bindings.insert(binding(Key::name("primary")));
        let order: Vec<String> = bindings
            .candidates(&Key::name("primary"))
            .map(|b| b.key().to_string())
            .collect();
        assert_eq!(order, vec!["\"primary\"", "Dog", "Animal", "*"]);
        assert_eq!(bindings.len(), 4);
    }
}

//! # Handlers
//!
//! A [`Handler`] receives callbacks. Everything that takes part in dispatch
//! implements it: handler instances, lists of handlers, contexts, option
//! decorators and the inference handler.
//!
//! ## Composers
//!
//! Every `handle` call carries a *composer*: the outermost handler of the
//! current chain. Bindings resolve their dependencies through it, so a value
//! or option installed by an outer decorator is visible to every binding
//! dispatched beneath it. [`dispatch`] starts a chain with the handler as
//! its own composer.
//!
//! ## Building blocks
//!
//! | Handler | Role |
//! |---|---|
//! | [`InstanceHandler`] | dispatches to the bindings of one instance |
//! | [`Handlers`] | ordered list, stops once the result is done |
//! | [`ValueProvider`] | answers `Provides` with fixed values |
//! | [`CascadeHandler`] | tries one handler, then another |
//! | [`OptionsHandler`] | answers option reads, forwards the rest |
//! | [`AxisHandler`] | routes through a context traversal axis |

mod builder;

pub use builder::{
    build_up, options, with, AxisBuilder, Builder, HandlerExt, OptionsBuilder, WithValues,
};

use crate::callback::{Callback, Provides};
use crate::context::Axis;
use crate::descriptor::{Describe, HandlerDescriptor, HandlerDescriptorFactory, HandlerSpec};
use crate::error::Error;
use crate::handle_result::HandleResult;
use crate::options::{GetOptions, Options};
use crate::types::Keyed;
use crate::value::{Key, Value};
use parking_lot::RwLock;
use std::sync::Arc;

/// Receives callbacks.
pub trait Handler: Send + Sync {
    /// Offer `callback` to this handler.
    ///
    /// With `greedy` every matching binding runs; otherwise dispatch stops at
    /// the first that handles. `composer` is the chain nested resolutions
    /// should go through.
    fn handle(&self, callback: &mut dyn Callback, greedy: bool, composer: &dyn Handler) -> HandleResult;

    /// Offer `callback` along a context traversal axis.
    ///
    /// Handlers without a context graph ignore the axis.
    fn handle_axis(
        &self,
        _axis: Axis,
        callback: &mut dyn Callback,
        greedy: bool,
        composer: &dyn Handler,
    ) -> HandleResult {
        self.handle(callback, greedy, composer)
    }
}

impl<H: Handler + ?Sized> Handler for &H {
    fn handle(&self, callback: &mut dyn Callback, greedy: bool, composer: &dyn Handler) -> HandleResult {
        (**self).handle(callback, greedy, composer)
    }

    fn handle_axis(
        &self,
        axis: Axis,
        callback: &mut dyn Callback,
        greedy: bool,
        composer: &dyn Handler,
    ) -> HandleResult {
        (**self).handle_axis(axis, callback, greedy, composer)
    }
}

impl<H: Handler + ?Sized> Handler for Arc<H> {
    fn handle(&self, callback: &mut dyn Callback, greedy: bool, composer: &dyn Handler) -> HandleResult {
        (**self).handle(callback, greedy, composer)
    }

    fn handle_axis(
        &self,
        axis: Axis,
        callback: &mut dyn Callback,
        greedy: bool,
        composer: &dyn Handler,
    ) -> HandleResult {
        (**self).handle_axis(axis, callback, greedy, composer)
    }
}

/// Dispatch `callback` with `handler` as its own composer.
pub fn dispatch(handler: &dyn Handler, callback: &mut dyn Callback, greedy: bool) -> HandleResult {
    handler.handle(callback, greedy, handler)
}

fn same_handler(a: &Arc<dyn Handler>, b: &Arc<dyn Handler>) -> bool {
    Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>()
}

/// Dispatches to the bindings of one handler instance.
///
/// An instance also answers `Provides` for its own type (and anything it is
/// assignable to) unless the request is explicit or constrained.
pub struct InstanceHandler {
    instance: Value,
    descriptor: Arc<HandlerDescriptor>,
}

impl InstanceHandler {
    #[must_use]
    pub fn new(instance: Value, descriptor: Arc<HandlerDescriptor>) -> Self {
        Self {
            instance,
            descriptor,
        }
    }

    /// Wrap `instance`, registering `H` with the global factory.
    pub fn of<H: Describe>(instance: Arc<H>) -> Result<Self, Error> {
        let descriptor = HandlerDescriptorFactory::global().descriptor(&HandlerSpec::of::<H>())?;
        Ok(Self::new(Value::from_arc(instance), descriptor))
    }

    #[must_use]
    pub fn instance(&self) -> &Value {
        &self.instance
    }

    #[must_use]
    pub fn descriptor(&self) -> &Arc<HandlerDescriptor> {
        &self.descriptor
    }

    fn provide_self(&self, callback: &mut dyn Callback) -> bool {
        let Some(provides) = callback.as_any_mut().downcast_mut::<Provides>() else {
            return false;
        };
        if provides.is_explicit() || !provides.constraints().is_empty() {
            return false;
        }
        match provides.key() {
            Key::Type(key) if self.instance.is_assignable_to(key) => {
                provides.receive_result(self.instance.clone())
            }
            _ => false,
        }
    }
}

impl Handler for InstanceHandler {
    fn handle(&self, callback: &mut dyn Callback, greedy: bool, composer: &dyn Handler) -> HandleResult {
        let mut result = HandleResult::NOT_HANDLED;
        if self.provide_self(callback) {
            result = HandleResult::HANDLED;
            if !greedy {
                return result;
            }
        }
        let policy = callback.policy();
        result.or(self
            .descriptor
            .dispatch(policy, Some(&self.instance), callback, greedy, composer))
    }
}

/// An ordered, mutable list of handlers.
#[derive(Default)]
pub struct Handlers {
    handlers: RwLock<Vec<Arc<dyn Handler>>>,
}

impl Handlers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_vec(handlers: Vec<Arc<dyn Handler>>) -> Self {
        Self {
            handlers: RwLock::new(handlers),
        }
    }

    pub fn push(&self, handler: Arc<dyn Handler>) {
        self.handlers.write().push(handler);
    }

    /// Insert at `index`, clamped to the list length.
    pub fn insert(&self, index: usize, handler: Arc<dyn Handler>) {
        let mut handlers = self.handlers.write();
        let index = index.min(handlers.len());
        handlers.insert(index, handler);
    }

    /// Remove `handler`; returns whether it was present.
    pub fn remove(&self, handler: &Arc<dyn Handler>) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|h| !same_handler(h, handler));
        handlers.len() != before
    }

    /// Remove the handler living at address `addr`.
    pub(crate) fn remove_addr(&self, addr: usize) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|h| Arc::as_ptr(h).cast::<()>() as usize != addr);
        handlers.len() != before
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Copy of the current list.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<dyn Handler>> {
        self.handlers.read().clone()
    }
}

impl Handler for Handlers {
    fn handle(&self, callback: &mut dyn Callback, greedy: bool, composer: &dyn Handler) -> HandleResult {
        let mut result = HandleResult::NOT_HANDLED;
        for handler in self.snapshot() {
            result = result.or(handler.handle(callback, greedy, composer));
            if result.is_done(greedy) {
                break;
            }
        }
        result
    }
}

/// Answers `Provides` with a fixed set of values.
pub struct ValueProvider {
    values: Vec<Value>,
}

impl ValueProvider {
    #[must_use]
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    #[must_use]
    pub fn of<T: ?Sized + Keyed>(value: Arc<T>) -> Self {
        Self::new(vec![Value::from_arc(value)])
    }

    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

impl Handler for ValueProvider {
    fn handle(&self, callback: &mut dyn Callback, greedy: bool, _composer: &dyn Handler) -> HandleResult {
        let Some(provides) = callback.as_any_mut().downcast_mut::<Provides>() else {
            return HandleResult::NOT_HANDLED;
        };
        let Key::Type(key) = provides.key() else {
            return HandleResult::NOT_HANDLED;
        };
        if !provides.constraints().is_empty() {
            return HandleResult::NOT_HANDLED;
        }
        let mut result = HandleResult::NOT_HANDLED;
        for value in &self.values {
            if value.is_assignable_to(key) && provides.receive_result(value.clone()) {
                result = HandleResult::HANDLED;
                if !greedy {
                    break;
                }
            }
        }
        result
    }
}

/// Offers callbacks to `first`, then to `second` unless done.
pub struct CascadeHandler {
    first: Arc<dyn Handler>,
    second: Arc<dyn Handler>,
}

impl CascadeHandler {
    #[must_use]
    pub fn new(first: Arc<dyn Handler>, second: Arc<dyn Handler>) -> Self {
        Self { first, second }
    }
}

impl Handler for CascadeHandler {
    fn handle(&self, callback: &mut dyn Callback, greedy: bool, composer: &dyn Handler) -> HandleResult {
        let result = self.first.handle(callback, greedy, composer);
        if result.is_done(greedy) {
            return result;
        }
        result.or(self.second.handle(callback, greedy, composer))
    }

    fn handle_axis(
        &self,
        axis: Axis,
        callback: &mut dyn Callback,
        greedy: bool,
        composer: &dyn Handler,
    ) -> HandleResult {
        let result = self.first.handle(callback, greedy, composer);
        if result.is_done(greedy) {
            return result;
        }
        result.or(self.second.handle_axis(axis, callback, greedy, composer))
    }
}

/// Handles nothing; the inner handler of leaf decorators.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHandler;

impl Handler for NullHandler {
    fn handle(&self, _callback: &mut dyn Callback, _greedy: bool, _composer: &dyn Handler) -> HandleResult {
        HandleResult::NOT_HANDLED
    }
}

/// Carries an options record of type `O` for the handlers beneath it.
pub struct OptionsHandler<H, O> {
    inner: H,
    options: O,
}

impl<H: Handler, O: Options> OptionsHandler<H, O> {
    pub fn new(inner: H, options: O) -> Self {
        Self { inner, options }
    }

    #[must_use]
    pub fn options(&self) -> &O {
        &self.options
    }
}

impl<O: Options> OptionsHandler<NullHandler, O> {
    /// Options with nothing beneath them, for handler lists.
    pub fn leaf(options: O) -> Self {
        Self::new(NullHandler, options)
    }
}

impl<H: Handler, O: Options> OptionsHandler<H, O> {
    fn merge_into(&self, callback: &mut dyn Callback) -> bool {
        match callback.as_any_mut().downcast_mut::<GetOptions<O>>() {
            Some(request) => {
                request.receive(&self.options);
                true
            }
            None => false,
        }
    }
}

impl<H: Handler, O: Options> Handler for OptionsHandler<H, O> {
    fn handle(&self, callback: &mut dyn Callback, greedy: bool, composer: &dyn Handler) -> HandleResult {
        if self.merge_into(callback) {
            return HandleResult::HANDLED.or(self.inner.handle(callback, greedy, composer));
        }
        self.inner.handle(callback, greedy, composer)
    }

    fn handle_axis(
        &self,
        axis: Axis,
        callback: &mut dyn Callback,
        greedy: bool,
        composer: &dyn Handler,
    ) -> HandleResult {
        if self.merge_into(callback) {
            return HandleResult::HANDLED.or(self.inner.handle_axis(axis, callback, greedy, composer));
        }
        self.inner.handle_axis(axis, callback, greedy, composer)
    }
}

/// Routes every callback through a traversal axis of the inner handler.
pub struct AxisHandler {
    inner: Arc<dyn Handler>,
    axis: Axis,
}

impl AxisHandler {
    #[must_use]
    pub fn new(inner: Arc<dyn Handler>, axis: Axis) -> Self {
        Self { inner, axis }
    }

    #[must_use]
    pub fn axis(&self) -> Axis {
        self.axis
    }
}

impl Handler for AxisHandler {
    fn handle(&self, callback: &mut dyn Callback, greedy: bool, composer: &dyn Handler) -> HandleResult {
        self.inner.handle_axis(self.axis, callback, greedy, composer)
    }
}

//! # Context Graph
//!
//! A [`Context`] is a node in a tree of handler scopes. Each context owns an
//! ordered list of handlers and answers callbacks with them first, then
//! defers to its parent. Lifestyles use contexts as the boundary of scoped
//! and rooted instances.
//!
//! ## Lifecycle
//!
//! A context is `Active` until [`Context::end`] is called. Ending moves it to
//! `Ending`, notifies observers, ends every child (newest first), then moves
//! to `Ended` and notifies again. The parent hears about both steps through
//! the `child_*` observer methods and forgets the child once it has ended.
//!
//! ```rust
//! use std::sync::Arc;
//! use callweave::context::{Context, EndReason};
//!
//! let root = Context::new();
//! let child = root.new_child().unwrap();
//! child.store(Arc::new(42_u32));
//! root.end(EndReason::Requested);
//! assert!(!child.is_active());
//! assert!(root.children().is_empty());
//! ```
//!
//! ## Axes
//!
//! [`Handler::handle_axis`] routes a callback to the contexts selected by an
//! [`Axis`], offering it only to each visited context's own handlers.

mod axis;
mod traversal;

pub use axis::Axis;
pub use traversal::{
    traverse_ancestors, traverse_axis, traverse_level_order, traverse_post_order,
    traverse_pre_order, traverse_reverse_level_order, Traversing,
};

use crate::callback::{Callback, Provides};
use crate::descriptor::Describe;
use crate::error::Error;
use crate::handle_result::HandleResult;
use crate::handler::{Handler, Handlers, InstanceHandler, ValueProvider};
use crate::ids::ContextId;
use crate::types::{Keyed, TypeKey};
use crate::value::{Key, Value};
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Lifecycle state of a context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextState {
    Active,
    Ending,
    Ended,
}

/// Why a context ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndReason {
    /// [`Context::end`] was called directly
    Requested,
    /// An ancestor ended or unwound
    Unwinded,
    Disposed,
    /// Reported to observers registered after the fact
    AlreadyEnded,
}

/// Receives lifecycle notifications. Every method defaults to a no-op.
pub trait ContextObserver: Send + Sync {
    fn ending(&self, _context: &Context, _reason: EndReason) {}

    fn ended(&self, _context: &Context, _reason: EndReason) {}

    fn child_ending(&self, _child: &Context, _reason: EndReason) {}

    fn child_ended(&self, _child: &Context, _reason: EndReason) {}
}

struct EndedFn<F>(F);

impl<F> ContextObserver for EndedFn<F>
where
    F: Fn(&Context, EndReason) + Send + Sync,
{
    fn ended(&self, context: &Context, reason: EndReason) {
        (self.0)(context, reason);
    }
}

/// Registration returned by [`Context::observe`].
///
/// Dropping it keeps the observer registered; call
/// [`Subscription::unsubscribe`] to remove it.
#[derive(Debug)]
pub struct Subscription {
    context: Weak<Context>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(context) = self.context.upgrade() {
            context.observers.write().retain(|(id, _)| *id != self.id);
        }
    }
}

/// A scope in the context graph.
pub struct Context {
    id: ContextId,
    me: Weak<Context>,
    parent: Option<Weak<Context>>,
    state: RwLock<ContextState>,
    children: RwLock<Vec<Arc<Context>>>,
    handlers: Handlers,
    observers: RwLock<Vec<(u64, Arc<dyn ContextObserver>)>>,
    next_subscription: AtomicU64,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("children", &self.children.read().len())
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl Context {
    /// A new root context with no handlers.
    #[must_use]
    pub fn new() -> Arc<Context> {
        Self::with_handlers(Vec::new())
    }

    /// A new root context serving `handlers` in order.
    #[must_use]
    pub fn with_handlers(handlers: Vec<Arc<dyn Handler>>) -> Arc<Context> {
        Self::create(None, handlers)
    }

    fn create(parent: Option<Weak<Context>>, handlers: Vec<Arc<dyn Handler>>) -> Arc<Context> {
        Arc::new_cyclic(|me| Context {
            id: ContextId::new(),
            me: me.clone(),
            parent,
            state: RwLock::new(ContextState::Active),
            children: RwLock::new(Vec::new()),
            handlers: Handlers::from_vec(handlers),
            observers: RwLock::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
        })
    }

    /// Create a child scope.
    ///
    /// # Errors
    ///
    /// Fails when this context is no longer active.
    pub fn new_child(&self) -> Result<Arc<Context>, Error> {
        self.ensure_active()?;
        let child = Self::create(Some(self.me.clone()), Vec::new());
        self.children.write().push(Arc::clone(&child));
        debug!(context = %child.id, parent = %self.id, "context created");
        Ok(child)
    }

    #[must_use]
    pub fn id(&self) -> ContextId {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> ContextState {
        *self.state.read()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == ContextState::Active
    }

    #[must_use]
    pub fn parent(&self) -> Option<Arc<Context>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// The top of this context's tree.
    #[must_use]
    pub fn root(&self) -> Option<Arc<Context>> {
        let mut current = self.me.upgrade()?;
        while let Some(parent) = current.parent() {
            current = parent;
        }
        Some(current)
    }

    /// Children in creation order.
    #[must_use]
    pub fn children(&self) -> Vec<Arc<Context>> {
        self.children.read().clone()
    }

    #[must_use]
    pub fn has_children(&self) -> bool {
        !self.children.read().is_empty()
    }

    #[must_use]
    pub fn handlers(&self) -> &Handlers {
        &self.handlers
    }

    pub fn add_handler(&self, handler: Arc<dyn Handler>) -> &Self {
        self.handlers.push(handler);
        self
    }

    pub fn insert_handler(&self, index: usize, handler: Arc<dyn Handler>) -> &Self {
        self.handlers.insert(index, handler);
        self
    }

    pub fn remove_handler(&self, handler: &Arc<dyn Handler>) -> bool {
        self.handlers.remove(handler)
    }

    /// Add a handler instance, compiling its descriptor on first use.
    ///
    /// # Errors
    ///
    /// [`Error::HandlerInfo`] when `H` declares invalid bindings.
    pub fn add_instance<H: Describe>(&self, instance: Arc<H>) -> Result<&Self, Error> {
        self.handlers.push(Arc::new(InstanceHandler::of(instance)?));
        Ok(self)
    }

    /// Make `value` available to `Provides` in this scope.
    pub fn store<T: ?Sized + Keyed>(&self, value: Arc<T>) -> &Self {
        self.store_value(Value::from_arc(value))
    }

    pub fn store_value(&self, value: Value) -> &Self {
        self.handlers.push(Arc::new(ValueProvider::new(vec![value])));
        self
    }

    /// Register `observer` for lifecycle notifications.
    ///
    /// Observing a context that is already ending or ended reports
    /// [`EndReason::AlreadyEnded`] immediately and registers nothing.
    pub fn observe(&self, observer: Arc<dyn ContextObserver>) -> Subscription {
        match self.state() {
            ContextState::Active => {
                let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
                self.observers.write().push((id, observer));
                Subscription {
                    context: self.me.clone(),
                    id,
                }
            }
            ContextState::Ending => {
                observer.ending(self, EndReason::AlreadyEnded);
                Subscription {
                    context: Weak::new(),
                    id: 0,
                }
            }
            ContextState::Ended => {
                observer.ended(self, EndReason::AlreadyEnded);
                Subscription {
                    context: Weak::new(),
                    id: 0,
                }
            }
        }
    }

    /// Run `f` once this context has ended.
    pub fn on_ended<F>(&self, f: F) -> Subscription
    where
        F: Fn(&Context, EndReason) + Send + Sync + 'static,
    {
        self.observe(Arc::new(EndedFn(f)))
    }

    /// End this context and every descendant.
    ///
    /// Ending an inactive context does nothing.
    pub fn end(&self, reason: EndReason) {
        {
            let mut state = self.state.write();
            if *state != ContextState::Active {
                return;
            }
            *state = ContextState::Ending;
        }
        debug!(context = %self.id, ?reason, "context ending");
        self.notify(|observer| observer.ending(self, reason));
        let parent = self.parent();
        if let Some(parent) = &parent {
            parent.notify(|observer| observer.child_ending(self, reason));
        }

        self.unwind();

        *self.state.write() = ContextState::Ended;
        self.notify(|observer| observer.ended(self, reason));
        if let Some(parent) = &parent {
            parent
                .children
                .write()
                .retain(|child| !std::ptr::eq(Arc::as_ptr(child), self));
            parent.notify(|observer| observer.child_ended(self, reason));
        }
        debug!(context = %self.id, ?reason, "context ended");
    }

    /// End with [`EndReason::Disposed`].
    pub fn dispose(&self) {
        self.end(EndReason::Disposed);
    }

    /// End every child, newest first, leaving this context active.
    pub fn unwind(&self) -> &Self {
        let children = self.children();
        for child in children.iter().rev() {
            child.end(EndReason::Unwinded);
        }
        self
    }

    /// Unwind the root of this context's tree.
    pub fn unwind_to_root(&self) {
        if let Some(root) = self.root() {
            root.unwind();
        }
    }

    fn ensure_active(&self) -> Result<(), Error> {
        if self.is_active() {
            Ok(())
        } else {
            Err(Error::msg(format!("context {} has already ended", self.id)))
        }
    }

    fn notify(&self, f: impl Fn(&dyn ContextObserver)) {
        let observers: Vec<Arc<dyn ContextObserver>> = self
            .observers
            .read()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();
        for observer in &observers {
            f(observer.as_ref());
        }
    }

    fn provide_self(&self, callback: &mut dyn Callback) -> bool {
        let Some(provides) = callback.as_any_mut().downcast_mut::<Provides>() else {
            return false;
        };
        if !provides.constraints().is_empty() {
            return false;
        }
        let Key::Type(key) = provides.key() else {
            return false;
        };
        if !crate::types::is_assignable(TypeKey::of::<Context>(), key) {
            return false;
        }
        match self.me.upgrade() {
            Some(me) => provides.receive_result(Value::from_arc(me)),
            None => false,
        }
    }

    /// Offer `callback` to this context alone, ignoring parent and children.
    fn handle_local(
        &self,
        callback: &mut dyn Callback,
        greedy: bool,
        composer: &dyn Handler,
    ) -> HandleResult {
        let mut result = HandleResult::NOT_HANDLED;
        if self.provide_self(callback) {
            result = HandleResult::HANDLED;
            if !greedy {
                return result;
            }
        }
        result.or(self.handlers.handle(callback, greedy, composer))
    }
}

impl Handler for Context {
    fn handle(&self, callback: &mut dyn Callback, greedy: bool, composer: &dyn Handler) -> HandleResult {
        let result = self.handle_local(callback, greedy, composer);
        if result.is_done(greedy) {
            return result;
        }
        match self.parent() {
            Some(parent) => result.or(parent.handle(callback, greedy, composer)),
            None => result,
        }
    }

    fn handle_axis(
        &self,
        axis: Axis,
        callback: &mut dyn Callback,
        greedy: bool,
        composer: &dyn Handler,
    ) -> HandleResult {
        let me = match (axis, self.me.upgrade()) {
            (Axis::SelfOnly, _) | (_, None) => return self.handle_local(callback, greedy, composer),
            (_, Some(me)) => me,
        };
        let mut result = HandleResult::NOT_HANDLED;
        let traversed = traverse_axis(&me, axis, |node| {
            let step = node.handle_local(&mut *callback, greedy, composer);
            result = std::mem::take(&mut result).or(step);
            result.is_done(greedy)
        });
        if let Err(err) = traversed {
            result = result.with_error(err);
        }
        result
    }
}

impl Traversing for Arc<Context> {
    fn node_id(&self) -> usize {
        Arc::as_ptr(self) as usize
    }

    fn parent_node(&self) -> Option<Self> {
        self.parent()
    }

    fn child_nodes(&self) -> Vec<Self> {
        self.children()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::dispatch;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl ContextObserver for Recorder {
        fn ending(&self, context: &Context, reason: EndReason) {
            self.events.lock().push(format!("ending {} {reason:?}", context.id()));
        }

        fn ended(&self, context: &Context, reason: EndReason) {
            self.events.lock().push(format!("ended {} {reason:?}", context.id()));
        }

        fn child_ended(&self, child: &Context, _reason: EndReason) {
            self.events.lock().push(format!("child {}", child.id()));
        }
    }

    fn provide_u32(handler: &dyn Handler, greedy: bool) -> Vec<u32> {
        let mut provides = Provides::of::<u32>();
        let _ = dispatch(handler, &mut provides, greedy);
        provides
            .result(true)
            .wait()
            .unwrap()
            .iter()
            .map(|v| *v.downcast::<u32>().unwrap())
            .collect()
    }

    #[test]
    fn ending_cascades_newest_child_first() {
        let root = Context::new();
        let first = root.new_child().unwrap();
        let second = root.new_child().unwrap();
        let recorder = Arc::new(Recorder::default());
        root.observe(Arc::clone(&recorder) as Arc<dyn ContextObserver>);
        first.observe(Arc::clone(&recorder) as Arc<dyn ContextObserver>);
        second.observe(Arc::clone(&recorder) as Arc<dyn ContextObserver>);

        root.end(EndReason::Requested);

        let events = recorder.events.lock().clone();
        assert_eq!(
            events,
            vec![
                format!("ending {} Requested", root.id()),
                format!("ending {} Unwinded", second.id()),
                format!("ended {} Unwinded", second.id()),
                format!("child {}", second.id()),
                format!("ending {} Unwinded", first.id()),
                format!("ended {} Unwinded", first.id()),
                format!("child {}", first.id()),
                format!("ended {} Requested", root.id()),
            ]
        );
        assert_eq!(root.state(), ContextState::Ended);
        assert!(root.children().is_empty());
        assert!(root.new_child().is_err());
    }

    #[test]
    fn late_observers_hear_already_ended() {
        let context = Context::new();
        context.dispose();
        let recorder = Arc::new(Recorder::default());
        context.observe(Arc::clone(&recorder) as Arc<dyn ContextObserver>);
        assert_eq!(
            recorder.events.lock().clone(),
            vec![format!("ended {} AlreadyEnded", context.id())]
        );
    }

    #[test]
    fn unsubscribed_observers_are_silent() {
        let context = Context::new();
        let recorder = Arc::new(Recorder::default());
        context.observe(Arc::clone(&recorder) as Arc<dyn ContextObserver>).unsubscribe();
        context.end(EndReason::Requested);
        assert!(recorder.events.lock().is_empty());
    }

    #[test]
    fn children_fall_back_to_parents() {
        let root = Context::new();
        root.store(Arc::new(1_u32));
        let child = root.new_child().unwrap();
        child.store(Arc::new(2_u32));
        assert_eq!(provide_u32(&*child, false), vec![2]);
        assert_eq!(provide_u32(&*child, true), vec![2, 1]);
        assert_eq!(provide_u32(&*root, true), vec![1]);
    }

    #[test]
    fn contexts_provide_themselves() {
        let context = Context::new();
        let mut provides = Provides::of::<Context>();
        assert!(dispatch(&*context, &mut provides, false).handled());
        let values = provides.result(false).wait().unwrap();
        let found = values[0].downcast::<Context>().unwrap();
        assert!(Arc::ptr_eq(&found, &context));
    }

    #[test]
    fn axes_select_contexts() {
        let root = Context::new();
        root.store(Arc::new(1_u32));
        let left = root.new_child().unwrap();
        left.store(Arc::new(2_u32));
        let right = root.new_child().unwrap();
        right.store(Arc::new(3_u32));
        let leaf = left.new_child().unwrap();
        leaf.store(Arc::new(4_u32));

        let collect = |context: &Arc<Context>, axis: Axis| {
            let mut provides = Provides::of::<u32>();
            let _ = context.handle_axis(axis, &mut provides, true, &**context);
            provides
                .result(true)
                .wait()
                .unwrap()
                .iter()
                .map(|v| *v.downcast::<u32>().unwrap())
                .collect::<Vec<_>>()
        };

        assert_eq!(collect(&left, Axis::SelfOnly), vec![2]);
        assert_eq!(collect(&left, Axis::Sibling), vec![3]);
        assert_eq!(collect(&left, Axis::SelfOrChild), vec![2, 4]);
        assert_eq!(collect(&leaf, Axis::Ancestor), vec![2, 1]);
        assert_eq!(collect(&leaf, Axis::Root), vec![1]);
        assert_eq!(collect(&root, Axis::Descendant), vec![2, 4, 3]);
        assert_eq!(collect(&root, Axis::SelfOrDescendantReverse), vec![4, 3, 2, 1]);
        assert_eq!(collect(&left, Axis::SelfSiblingOrAncestor), vec![2, 3, 1]);
    }
}

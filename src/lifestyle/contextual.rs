use crate::context::{Context, EndReason};
use crate::error::Error;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// Releases resources when a scoped instance goes out of scope.
pub trait Disposable: Send + Sync {
    fn dispose(&self);
}

crate::interface!(Disposable);

/// Notified when a contextual instance moves between contexts.
pub trait ContextualObserver: Send + Sync {
    /// Called before the change; an error vetoes it.
    fn context_changing(
        &self,
        _old: Option<&Arc<Context>>,
        _new: Option<&Arc<Context>>,
    ) -> Result<(), Error> {
        Ok(())
    }

    fn context_changed(&self, _old: Option<&Arc<Context>>, _new: Option<&Arc<Context>>) {}
}

/// An instance that knows which context it belongs to.
///
/// Implement it by embedding a [`ContextualBase`]:
///
/// ```rust,ignore
/// struct Session {
///     base: ContextualBase,
/// }
///
/// impl Contextual for Session {
///     fn contextual_base(&self) -> &ContextualBase {
///         &self.base
///     }
/// }
/// ```
pub trait Contextual: Send + Sync {
    fn contextual_base(&self) -> &ContextualBase;

    fn context(&self) -> Option<Arc<Context>> {
        self.contextual_base().context()
    }

    /// Move to `context`, or detach with `None`.
    ///
    /// # Errors
    ///
    /// The error of the first observer vetoing the change.
    fn set_context(&self, context: Option<&Arc<Context>>) -> Result<(), Error> {
        self.contextual_base().change_context(context)
    }

    /// End the current context, if any.
    fn end_context(&self) {
        if let Some(context) = self.context() {
            context.end(EndReason::Requested);
        }
    }
}

crate::interface!(Contextual);

#[derive(Default)]
struct ContextualState {
    context: Weak<Context>,
    observers: Vec<(u64, Arc<dyn ContextualObserver>)>,
    next_id: u64,
}

/// Context back-reference and change observers for [`Contextual`] types.
///
/// The context is held weakly; an instance never keeps its scope alive.
#[derive(Default)]
pub struct ContextualBase {
    state: Mutex<ContextualState>,
}

impl ContextualBase {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn context(&self) -> Option<Arc<Context>> {
        self.state.lock().context.upgrade()
    }

    /// Switch contexts, asking every observer first.
    pub fn change_context(&self, context: Option<&Arc<Context>>) -> Result<(), Error> {
        let old = self.context();
        let unchanged = match (&old, context) {
            (Some(old), Some(new)) => Arc::ptr_eq(old, new),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            return Ok(());
        }
        let observers = self.observers();
        for observer in &observers {
            observer.context_changing(old.as_ref(), context)?;
        }
        self.state.lock().context = context.map_or_else(Weak::new, Arc::downgrade);
        for observer in &observers {
            observer.context_changed(old.as_ref(), context);
        }
        Ok(())
    }

    /// Register `observer`; the returned id removes it again.
    pub fn observe(&self, observer: Arc<dyn ContextualObserver>) -> u64 {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.observers.push((id, observer));
        id
    }

    pub fn unobserve(&self, id: u64) {
        self.state.lock().observers.retain(|(observer, _)| *observer != id);
    }

    fn observers(&self) -> Vec<Arc<dyn ContextualObserver>> {
        self.state
            .lock()
            .observers
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Veto;

    impl ContextualObserver for Veto {
        fn context_changing(
            &self,
            old: Option<&Arc<Context>>,
            new: Option<&Arc<Context>>,
        ) -> Result<(), Error> {
            if old.is_some() && new.is_some() {
                return Err(Error::msg("pinned"));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl ContextualObserver for Counter {
        fn context_changed(&self, _old: Option<&Arc<Context>>, _new: Option<&Arc<Context>>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn observers_can_veto_changes() {
        let base = ContextualBase::new();
        base.observe(Arc::new(Veto));
        let first = Context::new();
        let second = Context::new();
        base.change_context(Some(&first)).unwrap();
        assert!(base.change_context(Some(&second)).is_err());
        assert!(Arc::ptr_eq(&base.context().unwrap(), &first));
        base.change_context(None).unwrap();
        assert!(base.context().is_none());
    }

    #[test]
    fn unchanged_contexts_do_not_notify() {
        let base = ContextualBase::new();
        let counter = Arc::new(Counter::default());
        let id = base.observe(Arc::clone(&counter) as Arc<dyn ContextualObserver>);
        let context = Context::new();
        base.change_context(Some(&context)).unwrap();
        base.change_context(Some(&context)).unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        base.unobserve(id);
        base.change_context(None).unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn the_context_is_held_weakly() {
        let base = ContextualBase::new();
        let context = Context::new();
        base.change_context(Some(&context)).unwrap();
        drop(context);
        assert!(base.context().is_none());
    }
}

use super::contextual::{Contextual, ContextualObserver, Disposable};
use super::{produce, settle, LifestyleKind, LIFESTYLE_ORDER};
use crate::callback::{Callback, Provides};
use crate::context::Context;
use crate::descriptor::{HandlerDescriptorFactory, SpecKey};
use crate::dispatch::Outcome;
use crate::error::{Error, LifestyleError};
use crate::filter::{Filter, Next};
use crate::handler::{Handler, InstanceHandler, ValueProvider};
use crate::ids::ContextId;
use crate::value::{Key, Value};
use arc_swap::ArcSwap;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::debug;

type Slot = Arc<OnceCell<Arc<Vec<Value>>>>;
type Cache = HashMap<(ContextId, Key), Slot>;

/// Caches one result per context (or per root context) and requested key.
///
/// Reads go through an [`ArcSwap`] snapshot; inserts and evictions copy the
/// map under `writer`.
pub(crate) struct ScopedFilter {
    me: Weak<ScopedFilter>,
    rooted: bool,
    cache: ArcSwap<Cache>,
    writer: Mutex<()>,
}

impl ScopedFilter {
    pub(crate) fn new(rooted: bool) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            rooted,
            cache: ArcSwap::from_pointee(HashMap::new()),
            writer: Mutex::new(()),
        })
    }

    fn kind(&self) -> LifestyleKind {
        if self.rooted {
            LifestyleKind::Rooted
        } else {
            LifestyleKind::Scoped
        }
    }

    fn slot(&self, id: ContextId, key: &Key) -> Slot {
        let entry = (id, key.clone());
        if let Some(slot) = self.cache.load().get(&entry) {
            return Arc::clone(slot);
        }
        let _guard = self.writer.lock();
        let current = self.cache.load_full();
        if let Some(slot) = current.get(&entry) {
            return Arc::clone(slot);
        }
        let slot = Slot::default();
        let mut next = (*current).clone();
        next.insert(entry, Arc::clone(&slot));
        self.cache.store(Arc::new(next));
        slot
    }

    fn evict(&self, id: ContextId, key: &Key) {
        let _guard = self.writer.lock();
        let current = self.cache.load_full();
        let entry = (id, key.clone());
        if !current.contains_key(&entry) {
            return;
        }
        let mut next = (*current).clone();
        next.remove(&entry);
        self.cache.store(Arc::new(next));
    }

    /// A longer-lived parent cannot capture this instance.
    fn check_parent(&self, provides: &Provides) -> Result<(), Error> {
        let Some(parent) = provides.parent() else {
            return Ok(());
        };
        for frame in parent.ancestry() {
            let incompatible = match frame.binding().lifestyle() {
                Some(LifestyleKind::Singleton) => true,
                Some(LifestyleKind::Rooted) => !self.rooted,
                _ => false,
            };
            if incompatible {
                return Err(LifestyleError::Mismatch {
                    key: provides.key().to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Tie a freshly created instance to `context`.
    fn track(&self, context: &Arc<Context>, key: Key, value: &Value) -> Result<(), Error> {
        let id = context.id();
        let contextual = value.downcast::<dyn Contextual>();
        let disposable = value.downcast::<dyn Disposable>();

        if let Some(contextual) = &contextual {
            contextual.set_context(Some(context))?;
            let handler: Arc<dyn Handler> =
                match HandlerDescriptorFactory::global().get(&SpecKey::Type(value.type_key())) {
                    Some(descriptor) => Arc::new(InstanceHandler::new(value.clone(), descriptor)),
                    None => Arc::new(ValueProvider::new(vec![value.clone()])),
                };
            let handler_addr = Arc::as_ptr(&handler).cast::<()>() as usize;
            context.insert_handler(0, handler);
            contextual.contextual_base().observe(Arc::new(ScopedObserver {
                filter: self.me.clone(),
                context: id,
                key: key.clone(),
                handler: handler_addr,
                disposable: disposable.as_ref().map(Arc::downgrade),
            }));
        }

        let filter = self.me.clone();
        let lifestyle = self.kind();
        context.on_ended(move |_, _| {
            if let Some(contextual) = &contextual {
                // Detaching runs the observer, which evicts and disposes.
                if let Err(err) = contextual.set_context(None) {
                    debug!(error = %err, "contextual instance refused to detach");
                }
                return;
            }
            if let Some(filter) = filter.upgrade() {
                filter.evict(id, &key);
            }
            if let Some(disposable) = &disposable {
                disposable.dispose();
            }
            debug!(context = %id, key = %key, %lifestyle, "scoped instance released");
        });
        Ok(())
    }
}

impl Filter for ScopedFilter {
    fn order(&self) -> Option<i32> {
        Some(LIFESTYLE_ORDER)
    }

    fn next(&self, next: Next<'_>) -> Result<Outcome, Error> {
        let ctx = next.context();
        let Some(provides) = ctx.callback_as::<Provides>() else {
            return next.proceed();
        };
        let key = provides.key();
        if key == Key::of::<Context>() {
            return Ok(Outcome::Nothing);
        }
        self.check_parent(provides)?;

        let Some(context) = ctx.resolve::<Context>()? else {
            return next.abort();
        };
        if !context.is_active() {
            return Err(LifestyleError::InactiveContext.into());
        }
        let context = if self.rooted {
            context.root().unwrap_or(context)
        } else {
            context
        };

        let slot = self.slot(context.id(), &key);
        let mut created = false;
        let gate = slot.get_or_try_init(|| {
            let values = produce(next)?;
            created = true;
            Ok(values)
        });
        if created {
            if let Ok(values) = &gate {
                if let Some(instance) = values.first() {
                    if let Err(err) = self.track(&context, key.clone(), instance) {
                        self.evict(context.id(), &key);
                        return Err(err);
                    }
                }
            }
            debug!(
                binding = ctx.binding().name(),
                context = %context.id(),
                key = %key,
                lifestyle = %self.kind(),
                "scoped instance created"
            );
        }
        settle(gate)
    }
}

/// Keeps a managed contextual instance in its context.
///
/// Once detached the instance stays unmanaged; it cannot join another context.
struct ScopedObserver {
    filter: Weak<ScopedFilter>,
    context: ContextId,
    key: Key,
    handler: usize,
    disposable: Option<Weak<dyn Disposable>>,
}

impl ContextualObserver for ScopedObserver {
    fn context_changing(
        &self,
        _old: Option<&Arc<Context>>,
        new: Option<&Arc<Context>>,
    ) -> Result<(), Error> {
        match new {
            Some(_) => Err(LifestyleError::ContextChange.into()),
            None => Ok(()),
        }
    }

    fn context_changed(&self, old: Option<&Arc<Context>>, new: Option<&Arc<Context>>) {
        if new.is_some() {
            return;
        }
        if let Some(filter) = self.filter.upgrade() {
            filter.evict(self.context, &self.key);
        }
        if let Some(old) = old {
            old.handlers().remove_addr(self.handler);
        }
        if let Some(disposable) = self.disposable.as_ref().and_then(Weak::upgrade) {
            disposable.dispose();
        }
        debug!(context = %self.context, key = %self.key, "scoped instance released");
    }
}

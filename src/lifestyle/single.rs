use super::{produce, settle, LIFESTYLE_ORDER};
use crate::dispatch::Outcome;
use crate::error::Error;
use crate::filter::{Filter, Next};
use crate::value::{Key, Value};
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use std::sync::Arc;
use tracing::debug;

type Slot = Arc<OnceCell<Arc<Vec<Value>>>>;

/// Caches the first successful result per requested key.
pub(crate) struct SingletonFilter {
    instances: DashMap<Key, Slot>,
}

impl SingletonFilter {
    pub(crate) fn new() -> Self {
        Self {
            instances: DashMap::new(),
        }
    }

    fn slot(&self, key: &Key) -> Slot {
        if let Some(slot) = self.instances.get(key) {
            return Arc::clone(&slot);
        }
        // The shard guard must be released before the gate runs the binding.
        Arc::clone(&self.instances.entry(key.clone()).or_default())
    }
}

impl Filter for SingletonFilter {
    fn order(&self) -> Option<i32> {
        Some(LIFESTYLE_ORDER)
    }

    fn next(&self, next: Next<'_>) -> Result<Outcome, Error> {
        let key = next.context().callback().key();
        let binding = next.context().binding().name().to_string();
        let slot = self.slot(&key);
        let mut created = false;
        // A panic unwinds through the gate and leaves it uninitialized.
        let gate = slot.get_or_try_init(|| {
            let values = produce(next)?;
            created = true;
            Ok(values)
        });
        if created {
            debug!(binding = %binding, key = %key, "singleton created");
        }
        settle(gate)
    }
}

//! # Descriptor Registry
//!
//! Compiles handler specs into [`HandlerDescriptor`]s and caches them.
//!
//! ## Thread Safety
//!
//! Reads go through an [`ArcSwap`] snapshot and never block. Registration
//! compiles the spec outside any lock, then publishes a new snapshot under a
//! writer mutex so concurrent registrations of the same spec agree on one
//! descriptor.

use super::{HandlerDescriptor, HandlerSpec, SpecKey};
use crate::error::Error;
use arc_swap::ArcSwap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Default)]
struct Snapshot {
    by_key: HashMap<SpecKey, Arc<HandlerDescriptor>>,
    ordered: Vec<Arc<HandlerDescriptor>>,
}

/// Cache of compiled descriptors.
pub struct HandlerDescriptorFactory {
    snapshot: ArcSwap<Snapshot>,
    writer: Mutex<()>,
}

static GLOBAL: Lazy<HandlerDescriptorFactory> = Lazy::new(HandlerDescriptorFactory::new);

impl Default for HandlerDescriptorFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerDescriptorFactory {
    #[must_use]
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(Snapshot::default()),
            writer: Mutex::new(()),
        }
    }

    /// Process-wide factory, created on first use.
    #[must_use]
    pub fn global() -> &'static HandlerDescriptorFactory {
        &GLOBAL
    }

    /// Look up an already registered descriptor.
    #[must_use]
    pub fn get(&self, key: &SpecKey) -> Option<Arc<HandlerDescriptor>> {
        self.snapshot.load().by_key.get(key).map(Arc::clone)
    }

    /// Every registered descriptor, in registration order.
    #[must_use]
    pub fn descriptors(&self) -> Vec<Arc<HandlerDescriptor>> {
        self.snapshot.load().ordered.clone()
    }

    /// Compile and cache `spec`.
    ///
    /// # Arguments
    ///
    /// * `spec` - Handler type or function spec to compile
    ///
    /// # Returns
    ///
    /// The descriptor and whether this call added it. Registering a spec
    /// twice returns the cached descriptor with `false`.
    ///
    /// # Errors
    ///
    /// [`Error::HandlerInfo`] listing every invalid binding of the spec.
    pub fn register(&self, spec: &HandlerSpec) -> Result<(Arc<HandlerDescriptor>, bool), Error> {
        let key = spec.key();
        if let Some(existing) = self.get(&key) {
            return Ok((existing, false));
        }
        let descriptor = match spec.compile() {
            Ok(descriptor) => Arc::new(descriptor),
            Err(err) => {
                warn!(spec = %key, error = %err, "handler spec rejected");
                return Err(err);
            }
        };

        let _guard = self.writer.lock();
        let current = self.snapshot.load_full();
        if let Some(existing) = current.by_key.get(&key) {
            return Ok((Arc::clone(existing), false));
        }
        let mut by_key = current.by_key.clone();
        by_key.insert(key.clone(), Arc::clone(&descriptor));
        let mut ordered = current.ordered.clone();
        ordered.push(Arc::clone(&descriptor));
        self.snapshot.store(Arc::new(Snapshot { by_key, ordered }));

        info!(
            spec = %key,
            bindings = descriptor.binding_count(),
            "handler descriptor registered"
        );
        Ok((descriptor, true))
    }

    /// Register `spec` and return its descriptor.
    pub fn descriptor(&self, spec: &HandlerSpec) -> Result<Arc<HandlerDescriptor>, Error> {
        self.register(spec).map(|(descriptor, _)| descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Describe, DescriptorBuilder};

    struct Clock;

    impl Describe for Clock {
        fn describe(d: &mut DescriptorBuilder<Self>) {
            d.provides::<u64, _, _, _>("now", |_: &Clock, (), _ctx| Arc::new(1_u64));
        }
    }

    #[test]
    fn registration_is_idempotent() {
        let factory = HandlerDescriptorFactory::new();
        let spec = HandlerSpec::of::<Clock>();
        let (first, added) = factory.register(&spec).unwrap();
        assert!(added);
        let (second, added_again) = factory.register(&spec).unwrap();
        assert!(!added_again);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.descriptors().len(), 1);
    }
}

//! # Inference
//!
//! The [`InferenceHandler`] lets a handler chain serve callbacks for handler
//! types it has no instance of. It is built from the registered descriptors
//! and answers in two ways:
//!
//! - **Direct bindings.** Constructors and free functions need no receiver,
//!   so they are dispatched as they are. A `Provides(HandlerX)` reaches the
//!   constructor of `HandlerX`, subject to its lifestyle.
//! - **Links.** For every handler type with a method binding matching the
//!   callback, the handler resolves explicit instances of that type through
//!   the composer and dispatches the callback to each of them.
//!
//! Each handler type is linked once per dispatch, however many of its
//! bindings match, so instances never receive the same callback twice.
//!
//! Callbacks that disable inference ([`Callback::can_infer`]) are never
//! served.

use crate::callback::{Callback, Provides};
use crate::descriptor::{
    Binding, BindingKind, FuncHost, HandlerDescriptor, PolicyBindings, SpecKey,
};
use crate::dispatch::surface;
use crate::handle_result::HandleResult;
use crate::handler::Handler;
use crate::policy::{Policy, PolicyKind};
use crate::types::TypeKey;
use crate::value::{Key, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Inferred access to one handler type.
struct Link {
    descriptor: Arc<HandlerDescriptor>,
    bindings: HashMap<PolicyKind, Arc<Binding>>,
}

impl Link {
    fn handler_type(&self) -> TypeKey {
        self.descriptor.handler_type()
    }

    /// Whether some method binding of the handler type could serve `callback`.
    fn matches(&self, policy: &'static Policy, callback: &dyn Callback) -> bool {
        let Some(bindings) = self.descriptor.bindings(policy.kind()) else {
            return false;
        };
        let key = callback.key();
        let strict = callback.is_strict();
        bindings.candidates(&key).any(|binding| {
            binding.kind() == BindingKind::Method
                && policy.matches_key(binding.key(), &key, strict || binding.is_strict())
                && callback.constraints().allows(binding.metadata())
                && callback.matches_binding(binding)
        })
    }
}

/// Serves callbacks for registered handler types without explicit instances.
pub struct InferenceHandler {
    direct: HandlerDescriptor,
    links: Vec<Link>,
}

impl fmt::Debug for InferenceHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InferenceHandler")
            .field("direct", &self.direct.binding_count())
            .field("links", &self.links.len())
            .finish()
    }
}

impl InferenceHandler {
    /// Build from compiled descriptors. Duplicate specs are linked once.
    #[must_use]
    pub fn new<I>(descriptors: I) -> Self
    where
        I: IntoIterator<Item = Arc<HandlerDescriptor>>,
    {
        let mut seen = HashSet::new();
        let mut direct: HashMap<PolicyKind, PolicyBindings> = HashMap::new();
        let mut links = Vec::new();

        for descriptor in descriptors {
            if !seen.insert(descriptor.spec().clone()) {
                continue;
            }
            let handler = descriptor.handler_type();
            let mut link_bindings = HashMap::new();
            for kind in descriptor.policies() {
                let Some(bindings) = descriptor.bindings(kind) else {
                    continue;
                };
                let mut has_methods = false;
                for binding in bindings.iter() {
                    match binding.kind() {
                        BindingKind::Constructor | BindingKind::Function => direct
                            .entry(kind)
                            .or_default()
                            .insert(Arc::clone(binding)),
                        BindingKind::Method => has_methods = true,
                        BindingKind::Link => {}
                    }
                }
                if has_methods && handler != TypeKey::of::<FuncHost>() {
                    link_bindings.insert(kind, Arc::new(Binding::link(Policy::of(kind), handler)));
                }
            }
            if !link_bindings.is_empty() {
                links.push(Link {
                    descriptor,
                    bindings: link_bindings,
                });
            }
        }

        Self {
            direct: HandlerDescriptor::new(
                SpecKey::Type(TypeKey::of::<InferenceHandler>()),
                TypeKey::of::<InferenceHandler>(),
                direct,
            ),
            links,
        }
    }

    /// Handler types reachable through links.
    pub fn handler_types(&self) -> impl Iterator<Item = TypeKey> + '_ {
        self.links.iter().map(Link::handler_type)
    }

    fn infer(
        &self,
        link: &Link,
        link_binding: &Arc<Binding>,
        callback: &mut dyn Callback,
        greedy: bool,
        composer: &dyn Handler,
    ) -> HandleResult {
        let handler = link.handler_type();
        let mut resolves = Provides::new(Key::Type(handler))
            .explicit()
            .with_parent(callback.child_frame(link_binding, 0));
        let resolved = composer.handle(&mut resolves, true, composer);
        if let Err(err) = surface(&resolved) {
            return HandleResult::NOT_HANDLED.with_error(err);
        }
        let instances = match resolves.result(true).wait() {
            Ok(instances) => instances,
            Err(err) => return HandleResult::NOT_HANDLED.with_error(err),
        };
        debug!(
            handler = handler.short_name(),
            instances = instances.len(),
            callback = %callback.describe(),
            "inferred handler instances"
        );

        let policy = callback.policy();
        let mut dispatched: HashSet<usize> = HashSet::new();
        let mut result = HandleResult::NOT_HANDLED;
        for instance in instances.iter().filter(|value| dispatched.insert(value.addr())) {
            let Some(instance) = as_handler(instance, handler) else {
                continue;
            };
            result = result.or(link
                .descriptor
                .dispatch(policy, Some(&instance), callback, greedy, composer));
            if result.is_done(greedy) {
                break;
            }
        }
        result
    }
}

/// The instance seen as the linked handler type.
fn as_handler(instance: &Value, handler: TypeKey) -> Option<Value> {
    crate::types::cast(instance, handler)
}

impl Handler for InferenceHandler {
    fn handle(&self, callback: &mut dyn Callback, greedy: bool, composer: &dyn Handler) -> HandleResult {
        if !callback.can_infer() {
            return HandleResult::NOT_HANDLED;
        }
        let policy = callback.policy();
        let mut result = self.direct.dispatch(policy, None, callback, greedy, composer);
        if result.is_done(greedy) {
            return result;
        }
        for link in &self.links {
            let Some(link_binding) = link.bindings.get(&policy.kind()) else {
                continue;
            };
            if !link.matches(policy, callback) || !callback.can_dispatch(0, link_binding) {
                continue;
            }
            result = result.or(self.infer(link, link_binding, callback, greedy, composer));
            if result.is_done(greedy) {
                break;
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Describe, DescriptorBuilder, HandlerDescriptorFactory, HandlerSpec};
    use crate::handler::dispatch;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static BUILT: AtomicUsize = AtomicUsize::new(0);

    struct Station;

    impl Describe for Station {
        fn describe(d: &mut DescriptorBuilder<Self>) {
            d.provides::<String, _, _, _>("name", |_: &Station, (), _ctx| {
                Arc::new("central".to_string())
            });
            d.constructor(|(): ()| {
                BUILT.fetch_add(1, Ordering::SeqCst);
                Station
            });
        }
    }

    fn inference() -> InferenceHandler {
        let factory = HandlerDescriptorFactory::new();
        let descriptor = factory.descriptor(&HandlerSpec::of::<Station>()).unwrap();
        InferenceHandler::new([Arc::clone(&descriptor), descriptor])
    }

    #[test]
    fn methods_resolve_through_constructed_instances() {
        let handler = inference();
        assert_eq!(handler.handler_types().count(), 1);

        let mut provides = Provides::of::<String>();
        assert!(dispatch(&handler, &mut provides, false).handled());
        let values = provides.result(false).wait().unwrap();
        assert_eq!(*values[0].downcast::<String>().unwrap(), "central");

        let mut again = Provides::of::<String>();
        assert!(dispatch(&handler, &mut again, false).handled());
        assert_eq!(BUILT.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callbacks_can_opt_out() {
        let handler = inference();
        let mut provides = Provides::of::<String>().without_inference();
        assert!(!dispatch(&handler, &mut provides, false).handled());
    }
}

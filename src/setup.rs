//! # Setup
//!
//! [`Setup`] assembles a handler chain from handler specs, explicit handler
//! instances and installable [`Feature`]s.
//!
//! ## Chain layout
//!
//! ```text
//! [options / with / filters decorators]
//!   └─ Handlers
//!        ├─ explicit handlers, in the order they were added
//!        └─ InferenceHandler over every (non-excluded) spec
//! ```
//!
//! Explicit handlers come first, so an instance added by hand wins over one
//! built through inference.
//!
//! ## Features
//!
//! A feature installs its dependencies first, then itself. Features that
//! must only install once guard their `install` with [`Setup::tag`]:
//!
//! ```rust,ignore
//! impl Feature for Auditing {
//!     fn install(&self, setup: &mut Setup) -> Result<(), Error> {
//!         if setup.tag::<Auditing>() {
//!             setup.spec(HandlerSpec::of::<AuditHandler>());
//!         }
//!         Ok(())
//!     }
//! }
//! ```
//!
//! Build errors from every feature and spec are collected, not short
//! circuited; the build fails with all of them at once.

use crate::context::Context;
use crate::descriptor::{Describe, HandlerDescriptorFactory, HandlerSpec};
use crate::error::Error;
use crate::filter::{FilterOptions, FilterProvider};
use crate::handler::{with, Builder, Handler, Handlers, InstanceHandler, OptionsHandler};
use crate::inference::InferenceHandler;
use crate::options::Options;
use crate::types::Keyed;
use crate::value::Value;
use std::any::TypeId;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Installable unit of setup.
pub trait Feature: Send + Sync {
    /// Features installed before this one.
    fn depends_on(&self) -> Vec<Arc<dyn Feature>> {
        Vec::new()
    }

    fn install(&self, setup: &mut Setup) -> Result<(), Error>;

    /// Called with the finished handler chain.
    fn after_install(&self, _setup: &Setup, _handler: &Arc<dyn Handler>) -> Result<(), Error> {
        Ok(())
    }
}

struct InstallFn<F>(F);

impl<F> Feature for InstallFn<F>
where
    F: Fn(&mut Setup) -> Result<(), Error> + Send + Sync,
{
    fn install(&self, setup: &mut Setup) -> Result<(), Error> {
        (self.0)(setup)
    }
}

/// A feature from a closure.
pub fn feature<F>(f: F) -> Arc<dyn Feature>
where
    F: Fn(&mut Setup) -> Result<(), Error> + Send + Sync + 'static,
{
    Arc::new(InstallFn(f))
}

enum Explicit {
    Instance(Value, HandlerSpec),
    Handler(Arc<dyn Handler>),
}

type Exclude = Box<dyn Fn(&HandlerSpec) -> bool + Send + Sync>;
type Decorator = Box<dyn Fn(Arc<dyn Handler>) -> Arc<dyn Handler> + Send + Sync>;

/// Builder of a handler chain.
pub struct Setup {
    specs: Vec<HandlerSpec>,
    explicit: Vec<Explicit>,
    features: Vec<Arc<dyn Feature>>,
    excludes: Vec<Exclude>,
    decorators: Vec<Decorator>,
    filters: Vec<Arc<dyn FilterProvider>>,
    values: Vec<Value>,
    no_inference: bool,
    tags: HashSet<TypeId>,
    factory: &'static HandlerDescriptorFactory,
}

impl Default for Setup {
    fn default() -> Self {
        Self::new()
    }
}

impl Setup {
    #[must_use]
    pub fn new() -> Self {
        Self {
            specs: Vec::new(),
            explicit: Vec::new(),
            features: Vec::new(),
            excludes: Vec::new(),
            decorators: Vec::new(),
            filters: Vec::new(),
            values: Vec::new(),
            no_inference: false,
            tags: HashSet::new(),
            factory: HandlerDescriptorFactory::global(),
        }
    }

    /// Register a handler spec for inference.
    pub fn spec(&mut self, spec: impl Into<HandlerSpec>) -> &mut Self {
        self.specs.push(spec.into());
        self
    }

    /// Register the spec of handler type `H`.
    pub fn spec_of<H: Describe>(&mut self) -> &mut Self {
        self.spec(HandlerSpec::of::<H>())
    }

    pub fn specs<I>(&mut self, specs: I) -> &mut Self
    where
        I: IntoIterator<Item = HandlerSpec>,
    {
        self.specs.extend(specs);
        self
    }

    /// Add an explicit handler instance.
    pub fn instance<H: Describe>(&mut self, instance: Arc<H>) -> &mut Self {
        self.explicit
            .push(Explicit::Instance(Value::from_arc(instance), HandlerSpec::of::<H>()));
        self
    }

    /// Add ready-made handlers.
    pub fn handlers<I>(&mut self, handlers: I) -> &mut Self
    where
        I: IntoIterator<Item = Arc<dyn Handler>>,
    {
        self.explicit.extend(handlers.into_iter().map(Explicit::Handler));
        self
    }

    /// Carry `options` on the finished chain.
    pub fn options<O: Options>(&mut self, options: O) -> &mut Self {
        self.decorators.push(Box::new(move |handler: Arc<dyn Handler>| -> Arc<dyn Handler> {
            Arc::new(OptionsHandler::new(handler, options.clone()))
        }));
        self
    }

    /// Skip specs matching `predicate`.
    pub fn exclude_specs<P>(&mut self, predicate: P) -> &mut Self
    where
        P: Fn(&HandlerSpec) -> bool + Send + Sync + 'static,
    {
        self.excludes.push(Box::new(predicate));
        self
    }

    pub fn feature(&mut self, feature: Arc<dyn Feature>) -> &mut Self {
        self.features.push(feature);
        self
    }

    pub fn features<I>(&mut self, features: I) -> &mut Self
    where
        I: IntoIterator<Item = Arc<dyn Feature>>,
    {
        self.features.extend(features);
        self
    }

    /// Filter providers applied to every binding dispatched through the chain.
    pub fn filters<I>(&mut self, providers: I) -> &mut Self
    where
        I: IntoIterator<Item = Arc<dyn FilterProvider>>,
    {
        self.filters.extend(providers);
        self
    }

    /// Make `values` available to `Provides`.
    pub fn with(&mut self, values: Vec<Value>) -> &mut Self {
        self.values.extend(values);
        self
    }

    pub fn with_value<T: ?Sized + Keyed>(&mut self, value: Arc<T>) -> &mut Self {
        self.values.push(Value::from_arc(value));
        self
    }

    /// Register specs without serving them through inference.
    pub fn without_inference(&mut self) -> &mut Self {
        self.no_inference = true;
        self
    }

    /// Use `factory` instead of the process-wide descriptor factory.
    pub fn factory(&mut self, factory: &'static HandlerDescriptorFactory) -> &mut Self {
        self.factory = factory;
        self
    }

    /// Claim tag `T`; true only the first time.
    pub fn tag<T: ?Sized + 'static>(&mut self) -> bool {
        self.tags.insert(TypeId::of::<T>())
    }

    /// Build the handler chain.
    ///
    /// # Errors
    ///
    /// Every feature and spec failure, combined into one error.
    pub fn handler(&mut self) -> Result<Arc<dyn Handler>, Error> {
        let mut errors: Option<Error> = None;

        let features = std::mem::take(&mut self.features);
        let mut installed = HashSet::new();
        for feature in &features {
            if let Err(err) = self.install_graph(feature, &mut installed) {
                errors = Error::combine(errors, Some(err));
            }
        }

        let mut handlers: Vec<Arc<dyn Handler>> = Vec::new();
        for explicit in std::mem::take(&mut self.explicit) {
            match explicit {
                Explicit::Handler(handler) => handlers.push(handler),
                Explicit::Instance(instance, spec) => match self.factory.descriptor(&spec) {
                    Ok(descriptor) => handlers.push(Arc::new(InstanceHandler::new(instance, descriptor))),
                    Err(err) => errors = Error::combine(errors, Some(err)),
                },
            }
        }

        let mut seen = HashSet::new();
        let mut descriptors = Vec::new();
        for spec in &self.specs {
            if !seen.insert(spec.key()) || self.excludes.iter().any(|exclude| exclude(spec)) {
                continue;
            }
            match self.factory.descriptor(spec) {
                Ok(descriptor) => descriptors.push(descriptor),
                Err(err) => errors = Error::combine(errors, Some(err)),
            }
        }
        if !self.no_inference && !descriptors.is_empty() {
            handlers.push(Arc::new(InferenceHandler::new(descriptors)));
        }

        if let Some(err) = errors {
            return Err(err);
        }

        let count = handlers.len();
        let mut handler: Arc<dyn Handler> = Arc::new(Handlers::from_vec(handlers));
        if !self.values.is_empty() {
            handler = with(self.values.clone()).build(handler);
        }
        if !self.filters.is_empty() {
            let filters = FilterOptions::with_filter_providers(self.filters.clone());
            handler = Arc::new(OptionsHandler::new(handler, filters));
        }
        for decorate in &self.decorators {
            handler = decorate(handler);
        }

        let mut errors = None;
        for feature in &features {
            if let Err(err) = feature.after_install(self, &handler) {
                errors = Error::combine(errors, Some(err));
            }
        }
        self.features = features;
        if let Some(err) = errors {
            return Err(err);
        }

        info!(
            handlers = count,
            specs = seen.len(),
            inference = !self.no_inference,
            "handler chain built"
        );
        Ok(handler)
    }

    /// Build the handler chain inside a new root context.
    pub fn context(&mut self) -> Result<Arc<Context>, Error> {
        let handler = self.handler()?;
        Ok(Context::with_handlers(vec![handler]))
    }

    fn install_graph(
        &mut self,
        feature: &Arc<dyn Feature>,
        installed: &mut HashSet<usize>,
    ) -> Result<(), Error> {
        if !installed.insert(Arc::as_ptr(feature).cast::<()>() as usize) {
            return Ok(());
        }
        let mut errors = None;
        for dependency in feature.depends_on() {
            errors = Error::combine(errors, self.install_graph(&dependency, installed).err());
        }
        debug!("installing feature");
        errors = Error::combine(errors, feature.install(self).err());
        errors.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::Provides;
    use crate::descriptor::DescriptorBuilder;
    use crate::handler::dispatch;
    use crate::options::{get_options, CallbackSemantics};

    struct Pump;

    impl Describe for Pump {
        fn describe(d: &mut DescriptorBuilder<Self>) {
            d.provides::<u8, _, _, _>("pressure", |_: &Pump, (), _ctx| Arc::new(9_u8));
            d.constructor(|(): ()| Pump);
        }
    }

    struct Plumbing;

    impl Feature for Plumbing {
        fn install(&self, setup: &mut Setup) -> Result<(), Error> {
            if setup.tag::<Plumbing>() {
                setup.spec_of::<Pump>();
            }
            Ok(())
        }
    }

    #[test]
    fn features_install_their_dependencies_once() {
        struct Site;

        impl Feature for Site {
            fn depends_on(&self) -> Vec<Arc<dyn Feature>> {
                vec![Arc::new(Plumbing), Arc::new(Plumbing)]
            }

            fn install(&self, _setup: &mut Setup) -> Result<(), Error> {
                Ok(())
            }
        }

        let mut setup = Setup::new();
        let handler = setup.feature(Arc::new(Site)).handler().unwrap();
        assert_eq!(setup.specs.len(), 1);

        let mut provides = Provides::of::<u8>();
        assert!(dispatch(&*handler, &mut provides, false).handled());
    }

    #[test]
    fn failing_features_are_collected() {
        let result = Setup::new()
            .feature(feature(|_| Err(Error::msg("first"))))
            .feature(feature(|_| Err(Error::msg("second"))))
            .handler();
        match result {
            Err(Error::Multi(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected two errors, got {:?}", other.err()),
        }
    }

    #[test]
    fn dependency_failures_do_not_stop_the_feature() {
        struct Parent;

        impl Feature for Parent {
            fn depends_on(&self) -> Vec<Arc<dyn Feature>> {
                vec![
                    feature(|_| Err(Error::msg("a"))),
                    feature(|_| Err(Error::msg("b"))),
                ]
            }

            fn install(&self, setup: &mut Setup) -> Result<(), Error> {
                setup.spec_of::<Pump>();
                Err(Error::msg("parent"))
            }
        }

        let mut setup = Setup::new();
        match setup.feature(Arc::new(Parent)).handler() {
            Err(Error::Multi(errors)) => {
                let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
                assert_eq!(messages, vec!["a", "b", "parent"]);
            }
            other => panic!("expected three errors, got {:?}", other.err()),
        }
        assert_eq!(setup.specs.len(), 1);
    }

    #[test]
    fn without_inference_serves_nothing_from_specs() {
        let handler = Setup::new().spec_of::<Pump>().without_inference().handler().unwrap();
        let mut provides = Provides::of::<u8>();
        assert!(!dispatch(&*handler, &mut provides, false).handled());
    }

    #[test]
    fn options_decorate_the_chain() {
        let handler = Setup::new()
            .options(CallbackSemantics::best_effort())
            .handler()
            .unwrap();
        let semantics = get_options::<CallbackSemantics>(&*handler).unwrap();
        assert!(semantics.is_best_effort());
    }
}

use super::binding::{Binding, BindingKind, Invoker};
use super::{HandlerDescriptor, PolicyBindings, SpecKey};
use crate::callback::Validates;
use crate::constraint::BindingMetadata;
use crate::dispatch::{Dependency, DependencyArg, HandleContext, IntoOutcome, Outcome};
use crate::error::{Error, HandlerInfoError, InvalidBindingError};
use crate::filter::{Filter, FilterInstanceProvider, FilterProvider, FilterSpec};
use crate::lifestyle::{self, Contextual, Disposable, LifestyleKind};
use crate::policy::{Policy, PolicyKind};
use crate::runtime_config::RuntimeConfig;
use crate::tags::{self, Tags};
use crate::types::{self, Keyed, TypeKey};
use crate::value::{Key, Value};
use once_cell::sync::Lazy;
use smallvec::{smallvec, SmallVec};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// A handler type that declares its own bindings.
///
/// ```rust,ignore
/// impl Describe for Inventory {
///     fn describe(d: &mut DescriptorBuilder<Self>) {
///         d.handles("reserve", |inv: &Inventory, order: Arc<Order>, (), _ctx| inv.reserve(&order));
///         d.provides("stock", |inv: &Inventory, (), _ctx| inv.stock());
///         d.default_constructor();
///     }
/// }
/// ```
pub trait Describe: Send + Sync + Sized + 'static {
    fn describe(d: &mut DescriptorBuilder<Self>);
}

/// Receiver of function bindings, which have no handler instance.
#[derive(Debug, Default, Clone, Copy)]
pub struct FuncHost;

static FUNC_HOST: Lazy<Value> = Lazy::new(|| Value::new(FuncHost));

#[derive(Clone)]
struct BindingDraft {
    name: Arc<str>,
    key: Key,
    policies: SmallVec<[&'static Policy; 2]>,
    kind: BindingKind,
    strict: bool,
    skip_filters: bool,
    metadata: BindingMetadata,
    filters: Vec<Arc<dyn FilterProvider>>,
    lifestyle: Option<LifestyleKind>,
    dependencies: Vec<DependencyArg>,
    invoker: Invoker,
    errors: Vec<String>,
}

type Factory<H> = Arc<dyn Fn(&HandleContext<'_>) -> Result<H, Error> + Send + Sync>;
type Initializer<H> = Arc<dyn Fn(&H, &HandleContext<'_>) -> Result<(), Error> + Send + Sync>;

/// Collects the bindings of one handler type.
pub struct DescriptorBuilder<H> {
    handler: TypeKey,
    drafts: Vec<BindingDraft>,
    constructor: Option<(usize, Factory<H>)>,
    constructors: usize,
    initializer: Option<Initializer<H>>,
    no_constructor: bool,
    filters: Vec<Arc<dyn FilterProvider>>,
    errors: Vec<InvalidBindingError>,
    marker: PhantomData<fn() -> H>,
}

impl<H> Clone for DescriptorBuilder<H> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler,
            drafts: self.drafts.clone(),
            constructor: self.constructor.clone(),
            constructors: self.constructors,
            initializer: self.initializer.clone(),
            no_constructor: self.no_constructor,
            filters: self.filters.clone(),
            errors: self.errors.clone(),
            marker: PhantomData,
        }
    }
}

fn receiver<H: Send + Sync + 'static>(ctx: &HandleContext<'_>) -> Result<Arc<H>, Error> {
    ctx.instance()
        .and_then(|instance| instance.downcast_sized::<H>())
        .or_else(|| FUNC_HOST.downcast_sized::<H>())
        .ok_or_else(|| Error::not_handled(ctx.callback().describe()))
}

fn source<C: ?Sized + Keyed>(ctx: &HandleContext<'_>) -> Result<Arc<C>, Error> {
    ctx.callback()
        .source()
        .and_then(C::from_value)
        .ok_or_else(|| Error::not_handled(ctx.callback().describe()))
}

fn dependencies<D: Dependency>() -> Vec<DependencyArg> {
    let mut args = Vec::new();
    D::describe(&mut args);
    args
}

impl<H: Send + Sync + 'static> Default for DescriptorBuilder<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: Send + Sync + 'static> DescriptorBuilder<H> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            handler: TypeKey::of::<H>(),
            drafts: Vec::new(),
            constructor: None,
            constructors: 0,
            initializer: None,
            no_constructor: false,
            filters: Vec::new(),
            errors: Vec::new(),
            marker: PhantomData,
        }
    }

    fn method_kind(&self) -> BindingKind {
        if self.handler == TypeKey::of::<FuncHost>() {
            BindingKind::Function
        } else {
            BindingKind::Method
        }
    }

    fn push(
        &mut self,
        name: &str,
        key: Key,
        policy: &'static Policy,
        dependencies: Vec<DependencyArg>,
        invoker: Invoker,
    ) -> BindingBuilder<'_> {
        let kind = self.method_kind();
        let name: Arc<str> = match kind {
            BindingKind::Function => Arc::from(name),
            _ => Arc::from(format!("{}::{name}", self.handler.short_name())),
        };
        self.drafts.push(BindingDraft {
            name,
            key,
            policies: smallvec![policy],
            kind,
            strict: false,
            skip_filters: false,
            metadata: BindingMetadata::default(),
            filters: Vec::new(),
            lifestyle: None,
            dependencies,
            invoker,
            errors: Vec::new(),
        });
        let index = self.drafts.len() - 1;
        BindingBuilder {
            draft: &mut self.drafts[index],
        }
    }

    /// Handle commands of type `C`.
    pub fn handles<C, D, R, F>(&mut self, name: &str, f: F) -> BindingBuilder<'_>
    where
        C: ?Sized + Keyed,
        D: Dependency,
        R: IntoOutcome,
        F: Fn(&H, Arc<C>, D, &HandleContext<'_>) -> R + Send + Sync + 'static,
    {
        let invoker: Invoker = Arc::new(move |ctx: &HandleContext<'_>| {
            let handler = receiver::<H>(ctx)?;
            let message = source::<C>(ctx)?;
            let deps = D::resolve(ctx)?;
            f(&handler, message, deps, ctx).into_outcome(ctx.binding().is_strict())
        });
        self.push(name, Key::of::<C>(), Policy::handles(), dependencies::<D>(), invoker)
    }

    /// Handle commands under an arbitrary key, receiving the raw message.
    pub fn handles_value<D, R, F>(&mut self, name: &str, key: impl Into<Key>, f: F) -> BindingBuilder<'_>
    where
        D: Dependency,
        R: IntoOutcome,
        F: Fn(&H, &Value, D, &HandleContext<'_>) -> R + Send + Sync + 'static,
    {
        let invoker: Invoker = Arc::new(move |ctx: &HandleContext<'_>| {
            let handler = receiver::<H>(ctx)?;
            let message = ctx
                .callback()
                .source()
                .ok_or_else(|| Error::not_handled(ctx.callback().describe()))?;
            let deps = D::resolve(ctx)?;
            f(&handler, message, deps, ctx).into_outcome(ctx.binding().is_strict())
        });
        self.push(name, key.into(), Policy::handles(), dependencies::<D>(), invoker)
    }

    /// Provide instances of `T`.
    pub fn provides<T, D, R, F>(&mut self, name: &str, f: F) -> BindingBuilder<'_>
    where
        T: ?Sized + Keyed,
        D: Dependency,
        R: IntoOutcome,
        F: Fn(&H, D, &HandleContext<'_>) -> R + Send + Sync + 'static,
    {
        self.provides_key(name, Key::of::<T>(), f)
    }

    /// Provide values under `key`, typically a string key or [`Key::Any`].
    pub fn provides_key<D, R, F>(&mut self, name: &str, key: impl Into<Key>, f: F) -> BindingBuilder<'_>
    where
        D: Dependency,
        R: IntoOutcome,
        F: Fn(&H, D, &HandleContext<'_>) -> R + Send + Sync + 'static,
    {
        let invoker: Invoker = Arc::new(move |ctx: &HandleContext<'_>| {
            let handler = receiver::<H>(ctx)?;
            let deps = D::resolve(ctx)?;
            f(&handler, deps, ctx).into_outcome(ctx.binding().is_strict())
        });
        self.push(name, key.into(), Policy::provides(), dependencies::<D>(), invoker)
    }

    /// Create new instances of `T`.
    pub fn creates<T, D, R, F>(&mut self, name: &str, f: F) -> BindingBuilder<'_>
    where
        T: ?Sized + Keyed,
        D: Dependency,
        R: IntoOutcome,
        F: Fn(&H, D, &HandleContext<'_>) -> R + Send + Sync + 'static,
    {
        let invoker: Invoker = Arc::new(move |ctx: &HandleContext<'_>| {
            let handler = receiver::<H>(ctx)?;
            let deps = D::resolve(ctx)?;
            f(&handler, deps, ctx).into_outcome(ctx.binding().is_strict())
        });
        self.push(name, Key::of::<T>(), Policy::creates(), dependencies::<D>(), invoker)
    }

    /// Map values of type `S` to `T`.
    pub fn maps<S, T, D, R, F>(&mut self, name: &str, f: F) -> BindingBuilder<'_>
    where
        S: ?Sized + Keyed,
        T: ?Sized + Keyed,
        D: Dependency,
        R: IntoOutcome,
        F: Fn(&H, Arc<S>, D, &HandleContext<'_>) -> R + Send + Sync + 'static,
    {
        self.maps_to(name, Key::mapping(Key::of::<S>(), Key::of::<T>()), f)
    }

    /// Map values of type `S` into a named format.
    pub fn maps_format<S, D, R, F>(&mut self, name: &str, format: &str, f: F) -> BindingBuilder<'_>
    where
        S: ?Sized + Keyed,
        D: Dependency,
        R: IntoOutcome,
        F: Fn(&H, Arc<S>, D, &HandleContext<'_>) -> R + Send + Sync + 'static,
    {
        let target = if format.is_empty() { Key::Any } else { Key::name(format) };
        self.maps_to(name, Key::mapping(Key::of::<S>(), target), f)
    }

    fn maps_to<S, D, R, F>(&mut self, name: &str, key: Key, f: F) -> BindingBuilder<'_>
    where
        S: ?Sized + Keyed,
        D: Dependency,
        R: IntoOutcome,
        F: Fn(&H, Arc<S>, D, &HandleContext<'_>) -> R + Send + Sync + 'static,
    {
        let invoker: Invoker = Arc::new(move |ctx: &HandleContext<'_>| {
            let handler = receiver::<H>(ctx)?;
            let value = source::<S>(ctx)?;
            let deps = D::resolve(ctx)?;
            f(&handler, value, deps, ctx).into_outcome(ctx.binding().is_strict())
        });
        self.push(name, key, Policy::maps(), dependencies::<D>(), invoker)
    }

    /// Validate values of type `T`, reporting into the [`Validates`] callback.
    pub fn validates<T, D, R, F>(&mut self, name: &str, f: F) -> BindingBuilder<'_>
    where
        T: ?Sized + Keyed,
        D: Dependency,
        R: IntoOutcome,
        F: Fn(&H, Arc<T>, &Validates, D, &HandleContext<'_>) -> R + Send + Sync + 'static,
    {
        let invoker: Invoker = Arc::new(move |ctx: &HandleContext<'_>| {
            let handler = receiver::<H>(ctx)?;
            let target = source::<T>(ctx)?;
            let validates = ctx
                .callback_as::<Validates>()
                .ok_or_else(|| Error::not_handled(ctx.callback().describe()))?;
            let deps = D::resolve(ctx)?;
            f(&handler, target, validates, deps, ctx).into_outcome(ctx.binding().is_strict())
        });
        self.push(name, Key::of::<T>(), Policy::validates(), dependencies::<D>(), invoker)
    }

    /// Attach a descriptor-wide filter provider to every binding.
    pub fn filter(&mut self, provider: Arc<dyn FilterProvider>) -> &mut Self {
        self.filters.push(provider);
        self
    }

    /// Declare that instances of `H` take part in context ownership.
    pub fn contextual(&mut self) -> &mut Self
    where
        H: Contextual,
    {
        types::relate::<H, dyn Contextual>(|h| h);
        self
    }

    /// Declare that instances of `H` are disposed when their scope ends.
    pub fn disposable(&mut self) -> &mut Self
    where
        H: Disposable,
    {
        types::relate::<H, dyn Disposable>(|h| h);
        self
    }

    /// Make `H` assignable to `I` for dispatch.
    pub fn implements<I: ?Sized + Keyed>(&mut self, cast: fn(Arc<H>) -> Arc<I>) -> &mut Self {
        types::relate::<H, I>(cast);
        self
    }

    /// Declare that `H` must only be used through explicit instances.
    pub fn no_constructor(&mut self) -> &mut Self {
        self.no_constructor = true;
        self
    }

    /// Run `f` on every instance built by the constructor before it is handed out.
    pub fn initializer<D, E, F>(&mut self, f: F) -> &mut Self
    where
        D: Dependency,
        E: Into<Error>,
        F: Fn(&H, D) -> Result<(), E> + Send + Sync + 'static,
    {
        self.initializer = Some(Arc::new(move |handler: &H, ctx: &HandleContext<'_>| {
            let deps = D::resolve(ctx)?;
            f(handler, deps).map_err(Into::into)
        }));
        self
    }

    /// Build `H` from its dependencies. Constructed instances are singletons
    /// unless the returned builder selects another lifestyle.
    pub fn constructor<D, F>(&mut self, f: F) -> BindingBuilder<'_>
    where
        D: Dependency,
        F: Fn(D) -> H + Send + Sync + 'static,
    {
        self.try_constructor(move |deps: D| Ok::<H, Error>(f(deps)))
    }

    /// Build `H` from its dependencies, which may fail.
    pub fn try_constructor<D, E, F>(&mut self, f: F) -> BindingBuilder<'_>
    where
        D: Dependency,
        E: Into<Error>,
        F: Fn(D) -> Result<H, E> + Send + Sync + 'static,
    {
        let factory: Factory<H> = Arc::new(move |ctx: &HandleContext<'_>| {
            let deps = D::resolve(ctx)?;
            f(deps).map_err(Into::into)
        });
        self.constructors += 1;
        let name: Arc<str> = Arc::from(format!("{}::new", self.handler.short_name()));
        self.drafts.push(BindingDraft {
            name,
            key: Key::Type(self.handler),
            policies: smallvec![Policy::provides(), Policy::creates()],
            kind: BindingKind::Constructor,
            strict: false,
            skip_filters: false,
            metadata: BindingMetadata::default(),
            filters: Vec::new(),
            lifestyle: Some(LifestyleKind::Singleton),
            dependencies: dependencies::<D>(),
            invoker: Arc::new(|_: &HandleContext<'_>| Ok(Outcome::Nothing)),
            errors: Vec::new(),
        });
        let index = self.drafts.len() - 1;
        self.constructor = Some((index, factory));
        BindingBuilder {
            draft: &mut self.drafts[index],
        }
    }

    /// Build `H` with `Default::default()`.
    pub fn default_constructor(&mut self) -> BindingBuilder<'_>
    where
        H: Default,
    {
        self.constructor(|(): ()| H::default())
    }

    fn constructor_invoker(factory: Factory<H>, initializer: Option<Initializer<H>>) -> Invoker {
        Arc::new(move |ctx: &HandleContext<'_>| {
            // A handler instance of this very type never constructs another.
            if ctx.instance().is_some_and(|instance| instance.type_key() == TypeKey::of::<H>()) {
                return Ok(Outcome::Nothing);
            }
            let handler = factory(ctx)?;
            if let Some(init) = &initializer {
                init(&handler, ctx)?;
            }
            Ok(Outcome::Value(Value::new(handler)))
        })
    }

    /// Compile the collected drafts into a descriptor.
    pub(crate) fn build(mut self, spec: SpecKey) -> Result<HandlerDescriptor, HandlerInfoError> {
        let handler_name = match &spec {
            SpecKey::Type(key) => key.short_name().to_string(),
            SpecKey::Func(name, _) => name.to_string(),
        };
        if self.no_constructor && self.constructors > 0 {
            self.errors.push(InvalidBindingError::new(
                format!("{handler_name}::new"),
                "constructor conflicts with no_constructor",
            ));
        }
        if self.constructors > 1 {
            self.errors.push(InvalidBindingError::new(
                format!("{handler_name}::new"),
                "only one constructor may be declared",
            ));
        }
        if let Some((index, factory)) = self.constructor.take() {
            let invoker = Self::constructor_invoker(factory, self.initializer.take());
            self.drafts[index].invoker = invoker;
        }

        let log_bindings = RuntimeConfig::global().log_bindings;
        let mut errors = std::mem::take(&mut self.errors);
        let mut bindings: HashMap<PolicyKind, PolicyBindings> = HashMap::new();
        for draft in self.drafts {
            let mut invalid = draft
                .errors
                .iter()
                .map(|reason| InvalidBindingError::new(&*draft.name, reason.as_str()))
                .collect::<Vec<_>>();
            if matches!(&draft.key, Key::Name(name) if name.is_empty()) {
                invalid.push(InvalidBindingError::new(&*draft.name, "empty string key"));
            }
            if draft.dependencies.iter().any(|arg| arg.untyped) {
                invalid.push(InvalidBindingError::new(
                    &*draft.name,
                    "untyped Value dependency needs a resolver",
                ));
            }
            let provides = draft.policies.iter().any(|p| p.kind() == PolicyKind::Provides);
            if draft.lifestyle.is_some() && !provides {
                invalid.push(InvalidBindingError::new(
                    &*draft.name,
                    "lifestyles only apply to provides bindings",
                ));
            }
            let validates = draft.policies.iter().any(|p| p.kind() == PolicyKind::Validates);
            if !draft.metadata.groups().is_empty() && !validates {
                invalid.push(InvalidBindingError::new(
                    &*draft.name,
                    "groups only apply to validates bindings",
                ));
            }
            if !invalid.is_empty() {
                for err in &invalid {
                    warn!(handler = %handler_name, binding = %err.method, reason = %err.reason, "invalid binding");
                }
                errors.extend(invalid);
                continue;
            }

            for &policy in &draft.policies {
                let kind = match policy.kind() {
                    PolicyKind::Provides => draft.lifestyle,
                    _ => None,
                };
                let mut filters = draft.filters.clone();
                filters.extend(self.filters.iter().map(Arc::clone));
                if let Some(provider) = kind.and_then(lifestyle::provider) {
                    filters.push(provider);
                }
                let binding = Binding {
                    name: Arc::clone(&draft.name),
                    key: draft.key.clone(),
                    policy,
                    kind: draft.kind,
                    handler: self.handler,
                    strict: draft.strict,
                    skip_filters: draft.skip_filters,
                    metadata: draft.metadata.clone(),
                    filters,
                    lifestyle: kind,
                    dependencies: draft.dependencies.clone(),
                    invoker: Arc::clone(&draft.invoker),
                };
                if log_bindings {
                    debug!(handler = %handler_name, binding = %binding, "binding compiled");
                }
                bindings
                    .entry(policy.kind())
                    .or_default()
                    .insert(Arc::new(binding));
            }
        }

        if !errors.is_empty() {
            return Err(HandlerInfoError {
                handler: handler_name,
                errors,
            });
        }
        Ok(HandlerDescriptor::new(spec, self.handler, bindings))
    }
}

/// Modifiers for the binding just declared.
pub struct BindingBuilder<'a> {
    draft: &'a mut BindingDraft,
}

impl BindingBuilder<'_> {
    /// Disable variance: only exact keys match.
    pub fn strict(self) -> Self {
        self.draft.strict = true;
        self
    }

    /// Bypass every non-required filter.
    pub fn skip_filters(self) -> Self {
        self.draft.skip_filters = true;
        self
    }

    /// Only serve requests constrained by this name.
    pub fn named(self, name: &str) -> Self {
        self.draft.metadata.set_name(name);
        self
    }

    /// Attach a metadata pair matched by [`Constraint::Metadata`](crate::constraint::Constraint::Metadata).
    pub fn metadata(self, key: &str, value: &str) -> Self {
        self.draft.metadata.insert(key, value);
        self
    }

    /// Attach typed metadata readable through [`Metadata`](crate::dispatch::Metadata).
    pub fn meta_value<M: Keyed>(self, value: M) -> Self {
        self.draft.metadata.set_value(Arc::new(value));
        self
    }

    /// Mark the binding with qualifier `Q`.
    pub fn qualifier<Q: ?Sized + 'static>(self) -> Self {
        self.draft.metadata.add_qualifier(TypeKey::of::<Q>());
        self
    }

    /// Replace the primary key.
    pub fn key(self, key: impl Into<Key>) -> Self {
        self.draft.key = key.into();
        self
    }

    pub fn filter(self, provider: Arc<dyn FilterProvider>) -> Self {
        self.draft.filters.push(provider);
        self
    }

    /// Attach fixed filter instances.
    pub fn filters(self, filters: Vec<Arc<dyn Filter>>) -> Self {
        self.filter(Arc::new(FilterInstanceProvider::new(filters)))
    }

    /// Resolve a filter of type `F` for each invocation.
    pub fn filter_spec<F: Filter + Keyed>(self, spec: FilterSpec<F>) -> Self {
        self.filter(Arc::new(spec))
    }

    pub fn singleton(self) -> Self {
        self.lifestyle(LifestyleKind::Singleton)
    }

    pub fn scoped(self) -> Self {
        self.lifestyle(LifestyleKind::Scoped)
    }

    pub fn rooted(self) -> Self {
        self.lifestyle(LifestyleKind::Rooted)
    }

    pub fn transient(self) -> Self {
        self.draft.lifestyle = None;
        self
    }

    fn lifestyle(self, kind: LifestyleKind) -> Self {
        self.draft.lifestyle = Some(kind);
        self
    }

    /// Validation groups this binding belongs to.
    pub fn groups<I, S>(self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        for group in groups {
            self.draft.metadata.add_group(group);
        }
        self
    }

    /// Apply a tag string such as `key:"primary" bind:"strict" scope:"rooted"`.
    ///
    /// Unknown tags become metadata pairs.
    pub fn tags(self, input: &str) -> Self {
        let parsed = match Tags::parse(input) {
            Ok(parsed) => parsed,
            Err(err) => {
                self.draft.errors.push(err.to_string());
                return self;
            }
        };
        for (name, value) in parsed.iter() {
            match name {
                tags::KEY => {
                    if value.is_empty() {
                        self.draft.errors.push("empty string key".to_string());
                    } else {
                        self.draft.key = Key::name(value);
                    }
                }
                tags::BIND => {
                    for option in value.split(',').map(str::trim).filter(|o| !o.is_empty()) {
                        match option {
                            "strict" => self.draft.strict = true,
                            "skipFilters" => self.draft.skip_filters = true,
                            other => self.draft.errors.push(format!("unknown bind option '{other}'")),
                        }
                    }
                }
                tags::SCOPE => match value {
                    "singleton" => self.draft.lifestyle = Some(LifestyleKind::Singleton),
                    "scoped" => self.draft.lifestyle = Some(LifestyleKind::Scoped),
                    "rooted" => self.draft.lifestyle = Some(LifestyleKind::Rooted),
                    "transient" => self.draft.lifestyle = None,
                    other => self.draft.errors.push(format!("unknown scope '{other}'")),
                },
                tags::NAME => self.draft.metadata.set_name(value),
                _ => self.draft.metadata.insert(name, value),
            }
        }
        self
    }
}

/// A set of free functions registered as one handler spec.
///
/// ```rust,ignore
/// let spec = FuncSpec::new("audit")
///     .handles("record", |event: Arc<Event>, (), _ctx| log(&event))
///     .describe(|d| {
///         d.provides_key("clock", "clock", |_, (), _ctx| Arc::new(SystemClock));
///     });
/// ```
#[derive(Clone)]
pub struct FuncSpec {
    name: Arc<str>,
    id: u64,
    builder: DescriptorBuilder<FuncHost>,
}

static NEXT_FUNC_SPEC: AtomicU64 = AtomicU64::new(1);

impl FuncSpec {
    /// A new, empty spec. Every call yields a distinct spec, even for a
    /// name already in use; clones share the identity of their original.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            id: NEXT_FUNC_SPEC.fetch_add(1, Ordering::Relaxed),
            builder: DescriptorBuilder::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn handles<C, D, R, F>(mut self, name: &str, f: F) -> Self
    where
        C: ?Sized + Keyed,
        D: Dependency,
        R: IntoOutcome,
        F: Fn(Arc<C>, D, &HandleContext<'_>) -> R + Send + Sync + 'static,
    {
        self.builder
            .handles(name, move |_: &FuncHost, message: Arc<C>, deps: D, ctx| f(message, deps, ctx));
        self
    }

    #[must_use]
    pub fn provides<T, D, R, F>(mut self, name: &str, f: F) -> Self
    where
        T: ?Sized + Keyed,
        D: Dependency,
        R: IntoOutcome,
        F: Fn(D, &HandleContext<'_>) -> R + Send + Sync + 'static,
    {
        self.builder
            .provides::<T, D, R, _>(name, move |_: &FuncHost, deps: D, ctx| f(deps, ctx));
        self
    }

    #[must_use]
    pub fn creates<T, D, R, F>(mut self, name: &str, f: F) -> Self
    where
        T: ?Sized + Keyed,
        D: Dependency,
        R: IntoOutcome,
        F: Fn(D, &HandleContext<'_>) -> R + Send + Sync + 'static,
    {
        self.builder
            .creates::<T, D, R, _>(name, move |_: &FuncHost, deps: D, ctx| f(deps, ctx));
        self
    }

    #[must_use]
    pub fn maps<S, T, D, R, F>(mut self, name: &str, f: F) -> Self
    where
        S: ?Sized + Keyed,
        T: ?Sized + Keyed,
        D: Dependency,
        R: IntoOutcome,
        F: Fn(Arc<S>, D, &HandleContext<'_>) -> R + Send + Sync + 'static,
    {
        self.builder.maps::<S, T, D, R, _>(name, move |_: &FuncHost, value: Arc<S>, deps: D, ctx| {
            f(value, deps, ctx)
        });
        self
    }

    #[must_use]
    pub fn validates<T, D, R, F>(mut self, name: &str, f: F) -> Self
    where
        T: ?Sized + Keyed,
        D: Dependency,
        R: IntoOutcome,
        F: Fn(Arc<T>, &Validates, D, &HandleContext<'_>) -> R + Send + Sync + 'static,
    {
        self.builder.validates::<T, D, R, _>(
            name,
            move |_: &FuncHost, target: Arc<T>, validates: &Validates, deps: D, ctx| {
                f(target, validates, deps, ctx)
            },
        );
        self
    }

    /// Declare bindings with full access to the binding modifiers.
    #[must_use]
    pub fn describe(mut self, f: impl FnOnce(&mut DescriptorBuilder<FuncHost>)) -> Self {
        f(&mut self.builder);
        self
    }

    pub(crate) fn compile(&self) -> Result<HandlerDescriptor, HandlerInfoError> {
        self.builder
            .clone()
            .build(SpecKey::Func(Arc::clone(&self.name), self.id))
    }
}

/// What the registry compiles into a [`HandlerDescriptor`].
#[derive(Clone)]
pub enum HandlerSpec {
    /// A handler type implementing [`Describe`]
    Type(TypeSpec),
    /// A set of free functions
    Func(FuncSpec),
}

/// A [`Describe`] implementation captured without its generic parameter.
#[derive(Clone, Copy)]
pub struct TypeSpec {
    key: TypeKey,
    compile: fn() -> Result<HandlerDescriptor, HandlerInfoError>,
}

fn compile_type<H: Describe>() -> Result<HandlerDescriptor, HandlerInfoError> {
    let mut builder = DescriptorBuilder::<H>::new();
    H::describe(&mut builder);
    builder.build(SpecKey::Type(TypeKey::of::<H>()))
}

impl TypeSpec {
    #[must_use]
    pub fn of<H: Describe>() -> Self {
        Self {
            key: TypeKey::of::<H>(),
            compile: compile_type::<H>,
        }
    }

    #[must_use]
    pub fn key(&self) -> TypeKey {
        self.key
    }
}

impl HandlerSpec {
    /// Spec of handler type `H`.
    #[must_use]
    pub fn of<H: Describe>() -> Self {
        HandlerSpec::Type(TypeSpec::of::<H>())
    }

    /// Registry identity.
    #[must_use]
    pub fn key(&self) -> SpecKey {
        match self {
            HandlerSpec::Type(spec) => SpecKey::Type(spec.key),
            HandlerSpec::Func(spec) => SpecKey::Func(Arc::clone(&spec.name), spec.id),
        }
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.key().to_string()
    }

    pub(crate) fn compile(&self) -> Result<HandlerDescriptor, Error> {
        let compiled = match self {
            HandlerSpec::Type(spec) => (spec.compile)(),
            HandlerSpec::Func(spec) => spec.compile(),
        };
        compiled.map_err(Error::HandlerInfo)
    }
}

impl From<FuncSpec> for HandlerSpec {
    fn from(spec: FuncSpec) -> Self {
        HandlerSpec::Func(spec)
    }
}

impl From<TypeSpec> for HandlerSpec {
    fn from(spec: TypeSpec) -> Self {
        HandlerSpec::Type(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle_result::HandleResult;

    struct Greeter;

    impl Describe for Greeter {
        fn describe(d: &mut DescriptorBuilder<Self>) {
            d.handles("greet", |_: &Greeter, _name: Arc<String>, (), _ctx| HandleResult::HANDLED);
            d.provides::<u32, _, _, _>("answer", |_: &Greeter, (), _ctx| Arc::new(42_u32))
                .tags(r#"name:"answer" scope:"singleton" layout:"wide""#);
        }
    }

    #[test]
    fn describe_compiles_bindings_per_policy() {
        let descriptor = HandlerSpec::of::<Greeter>().compile().unwrap();
        let handles = descriptor.bindings(PolicyKind::Handles).unwrap();
        assert_eq!(handles.iter().count(), 1);
        let provides = descriptor.bindings(PolicyKind::Provides).unwrap();
        let answer = provides.iter().next().unwrap();
        assert_eq!(answer.name(), "Greeter::answer");
        assert_eq!(answer.metadata().name(), Some("answer"));
        assert_eq!(answer.metadata().get("layout"), Some("wide"));
        assert_eq!(answer.lifestyle(), Some(LifestyleKind::Singleton));
    }

    struct Broken;

    impl Describe for Broken {
        fn describe(d: &mut DescriptorBuilder<Self>) {
            d.handles("bad_tag", |_: &Broken, _m: Arc<u8>, (), _ctx| ())
                .tags(r#"key:"unterminated"#);
            d.handles("untyped", |_: &Broken, _m: Arc<u16>, _v: Value, _ctx| ());
            d.provides_key("empty", "", |_: &Broken, (), _ctx| Arc::new(1_u8));
            d.constructor(|(): ()| Broken);
            d.no_constructor();
        }
    }

    #[test]
    fn invalid_bindings_are_collected() {
        let err = match HandlerSpec::of::<Broken>().compile() {
            Err(Error::HandlerInfo(info)) => info,
            other => panic!("expected handler info error, got {:?}", other.map(|_| ())),
        };
        assert_eq!(err.handler, "Broken");
        assert_eq!(err.errors.len(), 4);
    }

    #[test]
    fn func_specs_compile_function_bindings() {
        let spec = FuncSpec::new("clock").provides::<u64, _, _, _>("now", |(), _ctx| Arc::new(7_u64));
        let descriptor = HandlerSpec::from(spec).compile().unwrap();
        let binding = descriptor
            .bindings(PolicyKind::Provides)
            .and_then(|b| b.iter().next().cloned())
            .unwrap();
        assert_eq!(binding.kind(), BindingKind::Function);
        assert_eq!(binding.name(), "now");
    }

    #[test]
    fn func_specs_sharing_a_name_stay_distinct() {
        let first = HandlerSpec::from(FuncSpec::new("clock"));
        let second = HandlerSpec::from(FuncSpec::new("clock"));
        assert_ne!(first.key(), second.key());
        assert_eq!(first.key(), first.clone().key());
        assert_eq!(first.name(), second.name());
    }
}

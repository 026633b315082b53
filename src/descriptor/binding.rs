use crate::constraint::BindingMetadata;
use crate::dispatch::{DependencyArg, HandleContext, Outcome};
use crate::error::Error;
use crate::filter::FilterProvider;
use crate::lifestyle::LifestyleKind;
use crate::policy::Policy;
use crate::types::TypeKey;
use crate::value::Key;
use std::fmt;
use std::sync::Arc;

/// Prepared call of a binding: materializes dependencies, runs the user
/// closure and converts its return value.
pub type Invoker = Arc<dyn Fn(&HandleContext<'_>) -> Result<Outcome, Error> + Send + Sync>;

/// Where a binding came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindingKind {
    /// A method of a handler type
    Method,
    /// Creates instances of the handler type
    Constructor,
    /// A free function of a function spec
    Function,
    /// Synthetic binding standing for an inferred handler type
    Link,
}

/// One callable registration.
pub struct Binding {
    pub(crate) name: Arc<str>,
    pub(crate) key: Key,
    pub(crate) policy: &'static Policy,
    pub(crate) kind: BindingKind,
    pub(crate) handler: TypeKey,
    pub(crate) strict: bool,
    pub(crate) skip_filters: bool,
    pub(crate) metadata: BindingMetadata,
    pub(crate) filters: Vec<Arc<dyn FilterProvider>>,
    pub(crate) lifestyle: Option<LifestyleKind>,
    pub(crate) dependencies: Vec<DependencyArg>,
    pub(crate) invoker: Invoker,
}

impl Binding {
    /// `Handler::method` style name used in logs and errors.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Primary key.
    #[inline]
    #[must_use]
    pub fn key(&self) -> &Key {
        &self.key
    }

    #[inline]
    #[must_use]
    pub fn policy(&self) -> &'static Policy {
        self.policy
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> BindingKind {
        self.kind
    }

    /// Handler type owning this binding.
    #[must_use]
    pub fn handler_type(&self) -> TypeKey {
        self.handler
    }

    #[inline]
    #[must_use]
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    #[inline]
    #[must_use]
    pub fn skip_filters(&self) -> bool {
        self.skip_filters
    }

    #[must_use]
    pub fn metadata(&self) -> &BindingMetadata {
        &self.metadata
    }

    /// Filter providers declared at the binding site.
    #[must_use]
    pub fn filters(&self) -> &[Arc<dyn FilterProvider>] {
        &self.filters
    }

    #[must_use]
    pub fn lifestyle(&self) -> Option<LifestyleKind> {
        self.lifestyle
    }

    #[must_use]
    pub fn dependencies(&self) -> &[DependencyArg] {
        &self.dependencies
    }

    /// Call the binding without any filters, then apply the side effects
    /// it returned.
    pub fn invoke(&self, ctx: &HandleContext<'_>) -> Result<Outcome, Error> {
        (self.invoker)(ctx)?.apply_effects(ctx)
    }

    /// A link binding representing an inferred handler type.
    pub(crate) fn link(policy: &'static Policy, handler: TypeKey) -> Self {
        Self {
            name: Arc::from(format!("{}::<inferred>", handler.short_name())),
            key: Key::Type(handler),
            policy,
            kind: BindingKind::Link,
            handler,
            strict: false,
            skip_filters: true,
            metadata: BindingMetadata::default(),
            filters: Vec::new(),
            lifestyle: None,
            dependencies: Vec::new(),
            invoker: Arc::new(|_: &HandleContext<'_>| Ok(Outcome::Nothing)),
        }
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("name", &self.name)
            .field("policy", &self.policy.kind())
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("strict", &self.strict)
            .field("lifestyle", &self.lifestyle)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} [{}]", self.policy.name(), self.key, self.name)
    }
}

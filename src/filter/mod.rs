//! # Filter Pipeline
//!
//! Filters wrap binding invocations the way middleware wraps requests. Each
//! dispatch step assembles a pipeline from filter providers merged in this
//! order:
//!
//! 1. global providers registered on the [`Policy`](crate::policy::Policy)
//! 2. providers declared on the binding (and its handler descriptor)
//! 3. transient providers supplied through [`FilterOptions`] on the composer
//!
//! Filters then run in ascending [`Filter::order`]; filters without an order
//! run last, and ties keep their declaration order.
//!
//! ## Writing a filter
//!
//! ```rust,ignore
//! struct Audit;
//!
//! impl Filter for Audit {
//!     fn order(&self) -> Option<i32> {
//!         Some(10)
//!     }
//!
//!     fn next(&self, next: Next<'_>) -> Result<Outcome, Error> {
//!         tracing::info!(binding = next.context().binding().name(), "audit");
//!         next.proceed()
//!     }
//! }
//! ```
//!
//! [`Next::proceed`] consumes the continuation, so a filter can call it at
//! most once. [`Next::abort`] short-circuits the pipeline with a
//! [`RejectedError`](crate::error::RejectedError), which dispatch treats as
//! "not handled".
//!
//! ## Skipping
//!
//! A binding marked `skip_filters` bypasses every provider except the
//! required ones (lifestyles are required). [`FilterOptions::skip_filters`]
//! and [`FilterOptions::enable_filters`] override the binding flag for a
//! whole composer chain.

mod pipeline;
mod tracing;
mod validation;

pub(crate) use pipeline::{ordered_filters, run_pipeline};
pub use tracing::{TracingFilter, TracingProvider};
pub use validation::{ValidationFilter, ValidationProvider};

use crate::callback::Callback;
use crate::descriptor::Binding;
use crate::dispatch::{HandleContext, Outcome};
use crate::error::{Error, RejectedError};
use crate::handler::Handler;
use crate::options::Options;
use crate::types::Keyed;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;

/// Order of the logging filter installed by the logging feature.
pub const LOGGING_STAGE: i32 = 10;

/// Order of the validation filter installed by the validation feature.
pub const VALIDATION_STAGE: i32 = 50;

/// A step wrapped around binding invocation.
pub trait Filter: Send + Sync {
    /// Position in the pipeline; lower runs first, `None` runs last.
    fn order(&self) -> Option<i32> {
        None
    }

    fn next(&self, next: Next<'_>) -> Result<Outcome, Error>;
}

type Terminal<'a> = dyn Fn(&HandleContext<'_>) -> Result<Outcome, Error> + 'a;

/// The rest of the pipeline.
pub struct Next<'a> {
    ctx: &'a HandleContext<'a>,
    chain: &'a [Arc<dyn Filter>],
    terminal: &'a Terminal<'a>,
}

impl<'a> Next<'a> {
    pub(crate) fn new(
        ctx: &'a HandleContext<'a>,
        chain: &'a [Arc<dyn Filter>],
        terminal: &'a Terminal<'a>,
    ) -> Self {
        Self {
            ctx,
            chain,
            terminal,
        }
    }

    #[must_use]
    pub fn context(&self) -> &'a HandleContext<'a> {
        self.ctx
    }

    /// Run the remaining filters and finally the binding.
    pub fn proceed(self) -> Result<Outcome, Error> {
        match self.chain.split_first() {
            Some((filter, rest)) => filter.next(Next::new(self.ctx, rest, self.terminal)),
            None => (self.terminal)(self.ctx),
        }
    }

    /// Stop the pipeline; the binding does not run.
    pub fn abort(self) -> Result<Outcome, Error> {
        Err(Error::Rejected(RejectedError {
            callback: self.ctx.callback().describe(),
        }))
    }
}

/// Source of filters for a binding.
pub trait FilterProvider: Send + Sync {
    /// Required providers run even when filters are skipped, and fail the
    /// binding when they cannot supply a filter.
    fn required(&self) -> bool {
        false
    }

    /// Restrict the provider to some callbacks.
    fn applies_to(&self, _callback: &dyn Callback) -> bool {
        true
    }

    /// Filters for one dispatch step. An empty list means the provider
    /// cannot be satisfied.
    fn filters(
        &self,
        binding: &Binding,
        callback: &dyn Callback,
        composer: &dyn Handler,
    ) -> Result<Vec<Arc<dyn Filter>>, Error>;
}

/// Provider returning fixed filter instances.
pub struct FilterInstanceProvider {
    filters: Vec<Arc<dyn Filter>>,
    required: bool,
}

impl FilterInstanceProvider {
    #[must_use]
    pub fn new(filters: Vec<Arc<dyn Filter>>) -> Self {
        Self {
            filters,
            required: false,
        }
    }

    #[must_use]
    pub fn required(filters: Vec<Arc<dyn Filter>>) -> Self {
        Self {
            filters,
            required: true,
        }
    }
}

impl FilterProvider for FilterInstanceProvider {
    fn required(&self) -> bool {
        self.required
    }

    fn filters(
        &self,
        _binding: &Binding,
        _callback: &dyn Callback,
        _composer: &dyn Handler,
    ) -> Result<Vec<Arc<dyn Filter>>, Error> {
        Ok(self.filters.iter().map(Arc::clone).collect())
    }
}

type FilterFactory<F> = Arc<dyn Fn() -> F + Send + Sync>;

/// Provider resolving a filter of type `F` from the composer.
///
/// Filters registered as handler specs get their own dependencies injected.
/// When nothing provides `F`, the optional factory builds one.
pub struct FilterSpec<F> {
    required: bool,
    order: Option<i32>,
    factory: Option<FilterFactory<F>>,
    marker: PhantomData<fn() -> F>,
}

impl<F: Filter + Keyed> Default for FilterSpec<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Filter + Keyed> FilterSpec<F> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            required: false,
            order: None,
            factory: None,
            marker: PhantomData,
        }
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Override the filter's own order.
    #[must_use]
    pub fn order(mut self, order: i32) -> Self {
        self.order = Some(order);
        self
    }

    #[must_use]
    pub fn or_else(mut self, factory: impl Fn() -> F + Send + Sync + 'static) -> Self {
        self.factory = Some(Arc::new(factory));
        self
    }
}

struct Reordered {
    inner: Arc<dyn Filter>,
    order: i32,
}

impl Filter for Reordered {
    fn order(&self) -> Option<i32> {
        Some(self.order)
    }

    fn next(&self, next: Next<'_>) -> Result<Outcome, Error> {
        self.inner.next(next)
    }
}

impl<F: Filter + Keyed> FilterProvider for FilterSpec<F> {
    fn required(&self) -> bool {
        self.required
    }

    fn filters(
        &self,
        _binding: &Binding,
        _callback: &dyn Callback,
        composer: &dyn Handler,
    ) -> Result<Vec<Arc<dyn Filter>>, Error> {
        let resolved: Option<Arc<F>> = match crate::api::resolve::<F>(composer)?.wait()? {
            Some(filter) => Some(filter),
            None => self.factory.as_ref().map(|factory| Arc::new(factory())),
        };
        let Some(filter) = resolved else {
            return Ok(Vec::new());
        };
        let filter: Arc<dyn Filter> = filter;
        Ok(vec![match self.order {
            Some(order) => Arc::new(Reordered {
                inner: filter,
                order,
            }),
            None => filter,
        }])
    }
}

/// Filter control carried by the composer chain.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterOptions {
    #[serde(skip)]
    pub providers: Vec<Arc<dyn FilterProvider>>,
    /// `Some(true)` skips non-required filters, `Some(false)` forces them on
    pub skip_filters: Option<bool>,
}

impl std::fmt::Debug for FilterOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterOptions")
            .field("providers", &self.providers.len())
            .field("skip_filters", &self.skip_filters)
            .finish()
    }
}

impl FilterOptions {
    #[must_use]
    pub fn skip_filters() -> Self {
        Self {
            providers: Vec::new(),
            skip_filters: Some(true),
        }
    }

    #[must_use]
    pub fn enable_filters() -> Self {
        Self {
            providers: Vec::new(),
            skip_filters: Some(false),
        }
    }

    #[must_use]
    pub fn with_filters(filters: Vec<Arc<dyn Filter>>) -> Self {
        Self::with_filter_providers(vec![Arc::new(FilterInstanceProvider::new(filters))])
    }

    #[must_use]
    pub fn with_required_filters(filters: Vec<Arc<dyn Filter>>) -> Self {
        Self::with_filter_providers(vec![Arc::new(FilterInstanceProvider::required(filters))])
    }

    #[must_use]
    pub fn with_filter_providers(providers: Vec<Arc<dyn FilterProvider>>) -> Self {
        Self {
            providers,
            skip_filters: None,
        }
    }
}

impl Options for FilterOptions {
    fn merge(&mut self, other: &Self) {
        if self.skip_filters.is_none() {
            self.skip_filters = other.skip_filters;
        }
        self.providers.extend(other.providers.iter().map(Arc::clone));
    }
}

/// Filter built from a closure.
pub struct FnFilter<F> {
    order: Option<i32>,
    f: F,
}

/// Wrap a closure as a filter.
pub fn filter_fn<F>(order: Option<i32>, f: F) -> Arc<dyn Filter>
where
    F: Fn(Next<'_>) -> Result<Outcome, Error> + Send + Sync + 'static,
{
    Arc::new(FnFilter { order, f })
}

impl<F> Filter for FnFilter<F>
where
    F: Fn(Next<'_>) -> Result<Outcome, Error> + Send + Sync,
{
    fn order(&self) -> Option<i32> {
        self.order
    }

    fn next(&self, next: Next<'_>) -> Result<Outcome, Error> {
        (self.f)(next)
    }
}

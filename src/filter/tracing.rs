use super::{Filter, FilterProvider, Next, LOGGING_STAGE};
use crate::callback::{Callback, Handles};
use crate::descriptor::Binding;
use crate::dispatch::Outcome;
use crate::error::Error;
use crate::handler::Handler;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, debug_span, warn};

/// Wraps each binding invocation in a `tracing` span and logs its latency.
pub struct TracingFilter {
    order: Option<i32>,
}

impl TracingFilter {
    #[must_use]
    pub fn new() -> Self {
        Self { order: Some(i32::MIN) }
    }

    #[must_use]
    pub fn with_order(order: i32) -> Self {
        Self { order: Some(order) }
    }
}

impl Default for TracingFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for TracingFilter {
    fn order(&self) -> Option<i32> {
        self.order
    }

    fn next(&self, next: Next<'_>) -> Result<Outcome, Error> {
        let ctx = next.context();
        let span = debug_span!(
            "binding",
            policy = ctx.binding().policy().name(),
            binding = ctx.binding().name(),
            callback = %ctx.callback().key(),
        );
        let _entered = span.enter();
        let started = Instant::now();
        let result = next.proceed();
        let latency_us = started.elapsed().as_micros() as u64;
        match &result {
            Err(err) if !err.is_declined() => warn!(latency_us, error = %err, "binding failed"),
            _ => debug!(latency_us, ok = result.is_ok(), "binding completed"),
        }
        result
    }
}

/// Supplies a [`TracingFilter`] at the logging stage to `Handles` bindings.
pub struct TracingProvider {
    filter: Arc<dyn Filter>,
}

impl TracingProvider {
    #[must_use]
    pub fn new() -> Self {
        Self {
            filter: Arc::new(TracingFilter::with_order(LOGGING_STAGE)),
        }
    }
}

impl Default for TracingProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterProvider for TracingProvider {
    fn applies_to(&self, callback: &dyn Callback) -> bool {
        callback.as_any().is::<Handles>()
    }

    fn filters(
        &self,
        _binding: &Binding,
        _callback: &dyn Callback,
        _composer: &dyn Handler,
    ) -> Result<Vec<Arc<dyn Filter>>, Error> {
        Ok(vec![Arc::clone(&self.filter)])
    }
}

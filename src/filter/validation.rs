use super::{Filter, FilterProvider, Next, VALIDATION_STAGE};
use crate::callback::{Callback, Handles, Validates};
use crate::descriptor::Binding;
use crate::dispatch::{surface, Outcome};
use crate::error::Error;
use crate::handler::{dispatch, Handler};
use crate::promise::Promise;
use crate::value::Value;
use std::sync::Arc;
use tracing::debug;

/// Validates the command before its binding runs and, optionally, the
/// binding's first result afterwards.
///
/// An invalid command never reaches the binding; the dispatch fails with
/// [`Error::Validation`].
pub struct ValidationFilter {
    output: bool,
}

impl ValidationFilter {
    #[must_use]
    pub fn new(output: bool) -> Self {
        Self { output }
    }
}

impl Filter for ValidationFilter {
    fn order(&self) -> Option<i32> {
        Some(VALIDATION_STAGE)
    }

    fn next(&self, next: Next<'_>) -> Result<Outcome, Error> {
        let ctx = next.context();
        if let Some(source) = ctx.callback().source() {
            validate(ctx.composer(), source.clone())?.wait()?;
        }
        let outcome = next.proceed()?;
        if !self.output {
            return Ok(outcome);
        }
        match outcome {
            Outcome::Value(ref value) => {
                validate(ctx.composer(), value.clone())?.wait()?;
                Ok(outcome)
            }
            Outcome::Values(ref values) => {
                if let Some(first) = values.first() {
                    validate(ctx.composer(), first.clone())?.wait()?;
                }
                Ok(outcome)
            }
            Outcome::Pending(pending) => {
                // Validators run before the composer goes out of scope.
                let results = pending.wait()?.into_values()?;
                if let Some(first) = results.first() {
                    validate(ctx.composer(), first.clone())?.wait()?;
                }
                Ok(Outcome::Values(results))
            }
            other => Ok(other),
        }
    }
}

/// Run every validator for `target` through `composer`.
fn validate(composer: &dyn Handler, target: Value) -> Result<Promise<()>, Error> {
    let mut validates = Validates::new(target);
    let result = dispatch(composer, &mut validates, true);
    surface(&result)?;
    if !result.handled() {
        return Ok(Promise::resolve(()));
    }
    let validates = Arc::new(validates);
    Ok(validates.base().result(true).into_promise().then_try(move |_| {
        let outcome = validates.outcome();
        if outcome.is_valid() {
            Ok(())
        } else {
            debug!(target = %validates.describe(), "validation failed");
            Err(Error::Validation(outcome))
        }
    }))
}

/// Supplies a [`ValidationFilter`] to every `Handles` binding.
pub struct ValidationProvider {
    filter: Arc<dyn Filter>,
}

impl ValidationProvider {
    #[must_use]
    pub fn new(output: bool) -> Self {
        Self {
            filter: Arc::new(ValidationFilter::new(output)),
        }
    }
}

impl FilterProvider for ValidationProvider {
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

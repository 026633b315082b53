use super::{Filter, FilterOptions, FilterProvider, Next, Terminal};
use crate::callback::Callback;
use crate::descriptor::Binding;
use crate::dispatch::{HandleContext, Outcome};
use crate::error::Error;
use crate::handler::{Handler, OptionsHandler};
use crate::options::get_options;
use std::sync::Arc;
use tracing::debug;

/// Assemble the ordered filters for one dispatch step.
///
/// Returns `Ok(None)` when an optional provider cannot be satisfied, which
/// makes the binding decline. An unsatisfied required provider is an error.
pub(crate) fn ordered_filters(
    binding: &Binding,
    callback: &dyn Callback,
    composer: &dyn Handler,
) -> Result<Option<Vec<Arc<dyn Filter>>>, Error> {
    let policy_providers = binding.policy().filters();
    let options = get_options::<FilterOptions>(composer).unwrap_or_default();
    let skip = options
        .skip_filters
        .or_else(|| (!callback.can_filter()).then_some(true));

    let mut providers: Vec<&Arc<dyn FilterProvider>> = Vec::new();
    let candidates = policy_providers
        .iter()
        .chain(binding.filters().iter())
        .chain(options.providers.iter())
        .filter(|p| p.applies_to(callback));
    for provider in candidates {
        let keep = match skip {
            Some(true) => provider.required(),
            Some(false) => true,
            None => provider.required() || !binding.skip_filters(),
        };
        if keep {
            providers.push(provider);
        }
    }
    if providers.is_empty() {
        return Ok(Some(Vec::new()));
    }

    // Resolving filters must not itself be filtered.
    let resolver = OptionsHandler::new(composer, FilterOptions::skip_filters());
    let mut filters: Vec<Arc<dyn Filter>> = Vec::new();
    for provider in providers {
        let provided = provider.filters(binding, callback, &resolver)?;
        if provided.is_empty() {
            if provider.required() {
                return Err(Error::msg(format!(
                    "required filter unavailable for binding '{}'",
                    binding.name()
                )));
            }
            debug!(binding = binding.name(), "filter provider unsatisfied");
            return Ok(None);
        }
        filters.extend(provided);
    }
    filters.sort_by_key(|f| f.order().map_or(i64::MAX, i64::from));
    Ok(Some(filters))
}

/// Run `terminal` wrapped by `filters`.
pub(crate) fn run_pipeline(
    ctx: &HandleContext<'_>,
    filters: &[Arc<dyn Filter>],
    terminal: &Terminal<'_>,
) -> Result<Outcome, Error> {
    Next::new(ctx, filters, terminal).proceed()
}

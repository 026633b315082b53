//! # Lifestyles
//!
//! A lifestyle decides how often a `Provides` binding really runs. It is a
//! required filter attached to the binding when the descriptor is compiled,
//! so it runs even when other filters are skipped.
//!
//! | Lifestyle | Instances |
//! |---|---|
//! | transient (no lifestyle) | one per resolution |
//! | [`LifestyleKind::Singleton`] | one per binding and requested key |
//! | [`LifestyleKind::Scoped`] | one per context and requested key |
//! | [`LifestyleKind::Rooted`] | one per root context and requested key |
//!
//! Every cache slot is a once-gate. A binding that fails, panics or produces
//! nothing leaves the gate open, so a later resolution can try again.
//!
//! ## Scoped instances
//!
//! Scoped and rooted instances are tied to a [`Context`](crate::context::Context):
//!
//! - resolving from an ended context fails with
//!   [`LifestyleError::InactiveContext`](crate::error::LifestyleError::InactiveContext)
//! - a singleton (or, for plain scoped bindings, a rooted instance) depending
//!   on them fails with [`LifestyleError::Mismatch`](crate::error::LifestyleError::Mismatch)
//! - [`Contextual`] instances learn their context, are inserted first in its
//!   handler list and cannot be moved to another context
//! - when the context ends the slot is cleared and [`Disposable`] instances
//!   are disposed

mod contextual;
mod scoped;
mod single;

pub use contextual::{Contextual, ContextualBase, ContextualObserver, Disposable};

use crate::callback::{Callback, Provides};
use crate::descriptor::Binding;
use crate::dispatch::Outcome;
use crate::error::Error;
use crate::filter::{Filter, FilterProvider, Next};
use crate::handler::Handler;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Lifestyle filters run after every ordered user filter.
pub const LIFESTYLE_ORDER: i32 = i32::MAX - 1000;

/// Caching policy of a `Provides` binding. Transient bindings have none.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifestyleKind {
    Singleton,
    Scoped,
    Rooted,
}

impl fmt::Display for LifestyleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LifestyleKind::Singleton => "singleton",
            LifestyleKind::Scoped => "scoped",
            LifestyleKind::Rooted => "rooted",
        })
    }
}

/// Filter provider for a binding declared with `kind`.
///
/// Each call creates a fresh filter, so every binding owns its cache.
pub(crate) fn provider(kind: LifestyleKind) -> Option<Arc<dyn FilterProvider>> {
    let filter: Arc<dyn Filter> = match kind {
        LifestyleKind::Singleton => Arc::new(single::SingletonFilter::new()),
        LifestyleKind::Scoped => scoped::ScopedFilter::new(false),
        LifestyleKind::Rooted => scoped::ScopedFilter::new(true),
    };
    Some(Arc::new(LifestyleProvider { filter }))
}

struct LifestyleProvider {
    filter: Arc<dyn Filter>,
}

impl FilterProvider for LifestyleProvider {
    fn required(&self) -> bool {
        true
    }

    fn applies_to(&self, callback: &dyn Callback) -> bool {
        callback.as_any().is::<Provides>()
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

/// Why a once-gate stayed open.
pub(crate) enum Miss {
    /// The binding produced nothing
    Empty,
    Failed(Error),
}

/// Run the rest of the pipeline and wait for its values.
pub(crate) fn produce(next: Next<'_>) -> Result<Arc<Vec<Value>>, Miss> {
    let values = next
        .proceed()
        .and_then(Outcome::into_values)
        .map_err(Miss::Failed)?;
    if values.is_empty() {
        return Err(Miss::Empty);
    }
    Ok(Arc::new(values))
}

/// Turn the state of a once-gate into the binding outcome.
pub(crate) fn settle(gate: Result<&Arc<Vec<Value>>, Miss>) -> Result<Outcome, Error> {
    match gate {
        Ok(values) => Ok(Outcome::Values(values.to_vec())),
        Err(Miss::Empty) => Ok(Outcome::Nothing),
        Err(Miss::Failed(err)) => Err(err),
    }
}

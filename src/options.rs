//! # Options
//!
//! Options are plain records carried by handler decorators and read back by
//! bindings, filters and the convenience API. A read walks the composer chain
//! with a greedy [`GetOptions`] callback; each decorator holding options of
//! the requested type merges its record in. Outer decorators are reached
//! first, so their values win; [`Options::merge`] only fills what is unset.
//!
//! Two records ship with the crate:
//!
//! - [`CallbackSemantics`] selects best-effort, broadcast and inference
//!   behaviour for the convenience functions.
//! - [`FilterOptions`](crate::filter::FilterOptions) adds transient filters
//!   and controls filter skipping.
//!
//! Records deriving `serde` traits can be loaded from JSON:
//!
//! ```rust
//! use callweave::options::CallbackSemantics;
//!
//! let semantics: CallbackSemantics =
//!     serde_json::from_str(r#"{"best_effort": true}"#).unwrap();
//! assert_eq!(semantics.best_effort, Some(true));
//! ```

use crate::callback::{Callback, CallbackBase};
use crate::handler::Handler;
use crate::policy::Policy;
use crate::value::Key;
use serde::{Deserialize, Serialize};
use std::any::Any;

/// A mergeable options record.
pub trait Options: Clone + Default + Send + Sync + 'static {
    /// Fill unset fields of `self` from `other`.
    fn merge(&mut self, other: &Self);
}

/// Collects options of type `O` from a handler chain.
pub struct GetOptions<O> {
    options: Option<O>,
    base: CallbackBase,
}

impl<O: Options> Default for GetOptions<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: Options> GetOptions<O> {
    #[must_use]
    pub fn new() -> Self {
        let mut base = CallbackBase::new();
        base.set_infer(false);
        Self {
            options: None,
            base,
        }
    }

    /// Merge a decorator's record into the collected options.
    pub fn receive(&mut self, options: &O) {
        match &mut self.options {
            Some(collected) => collected.merge(options),
            None => self.options = Some(options.clone()),
        }
    }

    #[must_use]
    pub fn into_options(self) -> Option<O> {
        self.options
    }
}

impl<O: Options> Callback for GetOptions<O> {
    fn policy(&self) -> &'static Policy {
        Policy::handles()
    }

    fn key(&self) -> Key {
        Key::Type(crate::types::TypeKey::of::<O>())
    }

    fn base(&self) -> &CallbackBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut CallbackBase {
        &mut self.base
    }

    fn can_filter(&self) -> bool {
        false
    }

    fn matches_binding(&self, _binding: &crate::descriptor::Binding) -> bool {
        false
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn describe(&self) -> String {
        format!("GetOptions<{}>", std::any::type_name::<O>())
    }
}

/// Read the merged options of type `O` visible from `handler`.
pub fn get_options<O: Options>(handler: &dyn Handler) -> Option<O> {
    let mut request = GetOptions::<O>::new();
    if !handler.handle(&mut request, true, handler).handled() {
        return None;
    }
    request.into_options()
}

/// Dispatch semantics honoured by the convenience API.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackSemantics {
    /// Treat "not handled" as success with no results
    pub best_effort: Option<bool>,
    /// Dispatch to every matching binding
    pub broadcast: Option<bool>,
    /// Allow inference handlers
    pub infer: Option<bool>,
}

impl CallbackSemantics {
    #[must_use]
    pub fn best_effort() -> Self {
        Self {
            best_effort: Some(true),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn broadcast() -> Self {
        Self {
            broadcast: Some(true),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn no_inference() -> Self {
        Self {
            infer: Some(false),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_best_effort(&self) -> bool {
        self.best_effort == Some(true)
    }

    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.broadcast == Some(true)
    }

    #[must_use]
    pub fn allows_inference(&self) -> bool {
        self.infer != Some(false)
    }
}

impl Options for CallbackSemantics {
    fn merge(&mut self, other: &Self) {
        self.best_effort = self.best_effort.or(other.best_effort);
        self.broadcast = self.broadcast.or(other.broadcast);
        self.infer = self.infer.or(other.infer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_outer_values() {
        let mut outer = CallbackSemantics::best_effort();
        outer.merge(&CallbackSemantics {
            best_effort: Some(false),
            broadcast: Some(true),
            infer: None,
        });
        assert!(outer.is_best_effort());
        assert!(outer.is_broadcast());
        assert!(outer.allows_inference());
    }

    #[test]
    fn semantics_load_from_json() {
        let semantics: CallbackSemantics =
            serde_json::from_str(r#"{"broadcast": true, "infer": false}"#).unwrap();
        assert!(semantics.is_broadcast());
        assert!(!semantics.allows_inference());
    }
}

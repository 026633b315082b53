//! Composer decorators.
//!
//! ```rust,ignore
//! let handler = build_up(root, &[&with(vec![Value::new(config)]), &options(CallbackSemantics::best_effort())]);
//! // or, equivalently
//! let handler = root.with_values(vec![Value::new(config)]).best_effort();
//! ```
//!
//! Builders apply in order, so the last one ends up outermost.

use super::{AxisHandler, CascadeHandler, Handler, OptionsHandler, ValueProvider};
use crate::context::Axis;
use crate::filter::{Filter, FilterOptions};
use crate::options::{CallbackSemantics, Options};
use crate::value::Value;
use std::sync::Arc;

/// Wraps a handler in a decorator.
pub trait Builder {
    fn build(&self, handler: Arc<dyn Handler>) -> Arc<dyn Handler>;
}

/// Apply `builders` to `handler` in order.
pub fn build_up(handler: Arc<dyn Handler>, builders: &[&dyn Builder]) -> Arc<dyn Handler> {
    builders
        .iter()
        .fold(handler, |handler, builder| builder.build(handler))
}

/// Installs an options record.
pub struct OptionsBuilder<O>(O);

impl<O: Options> Builder for OptionsBuilder<O> {
    fn build(&self, handler: Arc<dyn Handler>) -> Arc<dyn Handler> {
        Arc::new(OptionsHandler::new(handler, self.0.clone()))
    }
}

#[must_use]
pub fn options<O: Options>(options: O) -> OptionsBuilder<O> {
    OptionsBuilder(options)
}

/// Makes transient values available to `Provides`.
pub struct WithValues(Vec<Value>);

impl Builder for WithValues {
    fn build(&self, handler: Arc<dyn Handler>) -> Arc<dyn Handler> {
        Arc::new(CascadeHandler::new(
            Arc::new(ValueProvider::new(self.0.clone())),
            handler,
        ))
    }
}

#[must_use]
pub fn with(values: Vec<Value>) -> WithValues {
    WithValues(values)
}

/// Selects a context traversal axis.
pub struct AxisBuilder(Axis);

impl AxisBuilder {
    #[must_use]
    pub fn new(axis: Axis) -> Self {
        AxisBuilder(axis)
    }
}

impl Builder for AxisBuilder {
    fn build(&self, handler: Arc<dyn Handler>) -> Arc<dyn Handler> {
        Arc::new(AxisHandler::new(handler, self.0))
    }
}

/// Fluent decorators on shared handlers.
pub trait HandlerExt: Sized {
    fn into_handler(self) -> Arc<dyn Handler>;

    fn build_up(self, builders: &[&dyn Builder]) -> Arc<dyn Handler> {
        build_up(self.into_handler(), builders)
    }

    fn with_options<O: Options>(self, options: O) -> Arc<dyn Handler> {
        Arc::new(OptionsHandler::new(self.into_handler(), options))
    }

    fn with_values(self, values: Vec<Value>) -> Arc<dyn Handler> {
        with(values).build(self.into_handler())
    }

    /// "Not handled" becomes success with no results.
    fn best_effort(self) -> Arc<dyn Handler> {
        self.with_options(CallbackSemantics::best_effort())
    }

    /// Every matching binding runs.
    fn broadcast(self) -> Arc<dyn Handler> {
        self.with_options(CallbackSemantics::broadcast())
    }

    fn no_inference(self) -> Arc<dyn Handler> {
        self.with_options(CallbackSemantics::no_inference())
    }

    fn skip_filters(self) -> Arc<dyn Handler> {
        self.with_options(FilterOptions::skip_filters())
    }

    fn enable_filters(self) -> Arc<dyn Handler> {
        self.with_options(FilterOptions::enable_filters())
    }

    fn with_filters(self, filters: Vec<Arc<dyn Filter>>) -> Arc<dyn Handler> {
        self.with_options(FilterOptions::with_filters(filters))
    }

    fn axis(self, axis: Axis) -> Arc<dyn Handler> {
        Arc::new(AxisHandler::new(self.into_handler(), axis))
    }

    fn self_axis(self) -> Arc<dyn Handler> {
        self.axis(Axis::SelfOnly)
    }

    fn root_axis(self) -> Arc<dyn Handler> {
        self.axis(Axis::Root)
    }

    fn child_axis(self) -> Arc<dyn Handler> {
        self.axis(Axis::Child)
    }

    fn sibling_axis(self) -> Arc<dyn Handler> {
        self.axis(Axis::Sibling)
    }

    fn ancestor_axis(self) -> Arc<dyn Handler> {
        self.axis(Axis::Ancestor)
    }

    fn descendant_axis(self) -> Arc<dyn Handler> {
        self.axis(Axis::Descendant)
    }

    fn descendant_reverse_axis(self) -> Arc<dyn Handler> {
        self.axis(Axis::DescendantReverse)
    }

    fn self_or_child_axis(self) -> Arc<dyn Handler> {
        self.axis(Axis::SelfOrChild)
    }

    fn self_or_sibling_axis(self) -> Arc<dyn Handler> {
        self.axis(Axis::SelfOrSibling)
    }

    fn self_or_ancestor_axis(self) -> Arc<dyn Handler> {
        self.axis(Axis::SelfOrAncestor)
    }

    fn self_or_descendant_axis(self) -> Arc<dyn Handler> {
        self.axis(Axis::SelfOrDescendant)
    }

    fn self_or_descendant_reverse_axis(self) -> Arc<dyn Handler> {
        self.axis(Axis::SelfOrDescendantReverse)
    }

    fn self_sibling_or_ancestor_axis(self) -> Arc<dyn Handler> {
        self.axis(Axis::SelfSiblingOrAncestor)
    }
}

impl HandlerExt for Arc<dyn Handler> {
    fn into_handler(self) -> Arc<dyn Handler> {
        self
    }
}

impl<H: Handler + 'static> HandlerExt for Arc<H> {
    fn into_handler(self) -> Arc<dyn Handler> {
        self
    }
}

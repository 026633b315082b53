//! Outcome of a single dispatch step.
//!
//! A [`HandleResult`] is two bits (`handled`, `stop`) plus an optional
//! error. Results combine with [`HandleResult::or`] (greedy accumulation
//! across bindings and handlers) and [`HandleResult::and`]; errors from both
//! sides are concatenated into a multi-error.

use crate::error::Error;
use std::fmt;

/// Result of offering a callback to a handler.
#[derive(Clone, Debug)]
#[must_use]
pub struct HandleResult {
    handled: bool,
    stop: bool,
    error: Option<Error>,
}

impl HandleResult {
    pub const HANDLED: HandleResult = HandleResult {
        handled: true,
        stop: false,
        error: None,
    };
    pub const HANDLED_AND_STOP: HandleResult = HandleResult {
        handled: true,
        stop: true,
        error: None,
    };
    pub const NOT_HANDLED: HandleResult = HandleResult {
        handled: false,
        stop: false,
        error: None,
    };
    pub const NOT_HANDLED_AND_STOP: HandleResult = HandleResult {
        handled: false,
        stop: true,
        error: None,
    };

    /// Build from the two flags.
    pub fn new(handled: bool, stop: bool) -> Self {
        Self {
            handled,
            stop,
            error: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn handled(&self) -> bool {
        self.handled
    }

    #[inline]
    #[must_use]
    pub fn stop(&self) -> bool {
        self.stop
    }

    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    #[inline]
    #[must_use]
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    #[must_use]
    pub fn into_error(self) -> Option<Error> {
        self.error
    }

    /// Attach an error; errors always stop further dispatch.
    pub fn with_error(self, err: impl Into<Error>) -> Self {
        Self {
            handled: self.handled,
            stop: true,
            error: Error::combine(self.error, Some(err.into())),
        }
    }

    pub fn without_error(self) -> Self {
        Self {
            error: None,
            ..self
        }
    }

    pub fn with_stop(self) -> Self {
        Self { stop: true, ..self }
    }

    pub fn without_stop(self) -> Self {
        Self { stop: false, ..self }
    }

    /// True when dispatch should not continue after this result.
    #[inline]
    #[must_use]
    pub fn is_done(&self, greedy: bool) -> bool {
        self.stop || (self.handled && !greedy)
    }

    pub fn or(self, other: HandleResult) -> Self {
        Self {
            handled: self.handled || other.handled,
            stop: self.stop || other.stop,
            error: Error::combine(self.error, other.error),
        }
    }

    pub fn and(self, other: HandleResult) -> Self {
        Self {
            handled: self.handled && other.handled,
            stop: self.stop || other.stop,
            error: Error::combine(self.error, other.error),
        }
    }

    /// Continue with `next` unless this result stops dispatch.
    pub fn then(self, next: impl FnOnce() -> HandleResult) -> Self {
        if self.stop {
            self
        } else {
            self.or(next())
        }
    }

    pub fn then_if(self, condition: bool, next: impl FnOnce() -> HandleResult) -> Self {
        if condition {
            self.then(next)
        } else {
            self
        }
    }

    /// Try `next` only when this result was not handled.
    pub fn otherwise(self, next: impl FnOnce() -> HandleResult) -> Self {
        if self.handled || self.stop {
            self
        } else {
            self.or(next())
        }
    }

    pub fn otherwise_if(self, condition: bool, next: impl FnOnce() -> HandleResult) -> Self {
        if condition {
            self.otherwise(next)
        } else {
            self
        }
    }

    /// Mark handled, keeping the stop flag and any error.
    pub fn otherwise_handled(self) -> Self {
        Self {
            handled: true,
            ..self
        }
    }
}

impl Default for HandleResult {
    fn default() -> Self {
        Self::NOT_HANDLED
    }
}

impl PartialEq for HandleResult {
    fn eq(&self, other: &Self) -> bool {
        self.handled == other.handled
            && self.stop == other.stop
            && match (&self.error, &other.error) {
                (None, None) => true,
                (Some(a), Some(b)) => a.to_string() == b.to_string(),
                _ => false,
            }
    }
}

impl fmt::Display for HandleResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match (self.handled, self.stop) {
            (true, false) => "Handled",
            (true, true) => "HandledAndStop",
            (false, false) => "NotHandled",
            (false, true) => "NotHandledAndStop",
        };
        match &self.error {
            Some(err) => write!(f, "{state} ({err})"),
            None => f.write_str(state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn or_is_a_boolean_or_on_both_bits() {
        assert_eq!(
            HandleResult::HANDLED.or(HandleResult::NOT_HANDLED_AND_STOP),
            HandleResult::HANDLED_AND_STOP
        );
        assert_eq!(
            HandleResult::NOT_HANDLED.or(HandleResult::NOT_HANDLED),
            HandleResult::NOT_HANDLED
        );
    }

    #[test]
    fn and_requires_both_handled() {
        assert_eq!(
            HandleResult::HANDLED.and(HandleResult::NOT_HANDLED),
            HandleResult::NOT_HANDLED
        );
        assert_eq!(
            HandleResult::HANDLED.and(HandleResult::HANDLED),
            HandleResult::HANDLED
        );
    }

    #[test]
    fn errors_stop_and_concatenate() {
        let a = HandleResult::NOT_HANDLED.with_error(Error::msg("first"));
        assert!(a.stop());
        let b = HandleResult::HANDLED.with_error(Error::msg("second"));
        let both = a.or(b);
        assert!(both.handled());
        match both.error() {
            Some(Error::Multi(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected multi error, got {other:?}"),
        }
    }

    #[test]
    fn then_and_otherwise() {
        let r = HandleResult::HANDLED.otherwise(|| panic!("must not run"));
        assert!(r.handled());
        let r = HandleResult::NOT_HANDLED.otherwise(|| HandleResult::HANDLED);
        assert!(r.handled());
        let r = HandleResult::HANDLED_AND_STOP.then(|| panic!("must not run"));
        assert!(r.stop());
    }
}

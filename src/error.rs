//! Error taxonomy for dispatch, setup and lifestyle failures.
//!
//! Every failure surfaced by the engine is an [`Error`]. Errors are `Clone`
//! because the same failure is routinely observed by several parties: a
//! rejected promise hands its cause to every waiter, and [`HandleResult`]
//! values fold errors from many bindings into one [`Error::Multi`].
//!
//! Arbitrary user failures travel as [`Error::Other`] wrapping an
//! [`anyhow::Error`]. Converting an `anyhow::Error` that already carries an
//! [`Error`] unwraps it again, so errors survive a round trip through
//! user code that returns `anyhow::Result`.
//!
//! [`HandleResult`]: crate::HandleResult

use crate::callback::ValidationOutcome;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Result alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Every failure the engine reports.
#[derive(Debug, Clone)]
pub enum Error {
    /// No binding accepted the callback
    NotHandled(NotHandledError),
    /// A specific binding failed while executing
    MethodBinding(MethodBindingError),
    /// A handler spec could not be compiled
    HandlerInfo(HandlerInfoError),
    /// A single malformed binding declaration
    InvalidBinding(InvalidBindingError),
    /// Lifestyle misuse (mismatch, inactive context, context change)
    Lifestyle(LifestyleError),
    /// Validation failed with structured field errors
    Validation(ValidationOutcome),
    /// A filter aborted the pipeline
    Rejected(RejectedError),
    /// A promise was canceled
    Canceled(CanceledError),
    /// A required dependency could not be resolved
    UnresolvedArg(UnresolvedArgError),
    /// A handler method or executor panicked
    Panic(PanicError),
    /// Several errors folded together
    Multi(Vec<Error>),
    /// Any other failure
    Other(Arc<anyhow::Error>),
}

impl Error {
    /// Wrap an arbitrary message as [`Error::Other`].
    pub fn msg<M>(message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Error::Other(Arc::new(anyhow::Error::msg(message)))
    }

    /// A [`NotHandledError`] for the described callback.
    pub fn not_handled(callback: impl Into<String>) -> Self {
        Error::NotHandled(NotHandledError {
            callback: callback.into(),
        })
    }

    /// Build a [`Error::Panic`] from a `catch_unwind` payload.
    #[must_use]
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        Error::Panic(PanicError { message })
    }

    /// Fold two optional errors, flattening nested multi-errors.
    #[must_use]
    pub fn combine(first: Option<Error>, second: Option<Error>) -> Option<Error> {
        match (first, second) {
            (None, None) => None,
            (Some(e), None) | (None, Some(e)) => Some(e),
            (Some(a), Some(b)) => {
                let mut errors = Vec::new();
                for err in [a, b] {
                    match err {
                        Error::Multi(inner) => errors.extend(inner),
                        other => errors.push(other),
                    }
                }
                Some(Error::Multi(errors))
            }
        }
    }

    /// True for failures the dispatch loop treats as "binding did not handle".
    #[must_use]
    pub fn is_declined(&self) -> bool {
        matches!(
            self,
            Error::NotHandled(_) | Error::Rejected(_) | Error::UnresolvedArg(_)
        )
    }

    /// True when this is (or wraps only) a cancellation.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        match self {
            Error::Canceled(_) => true,
            Error::Multi(errors) => !errors.is_empty() && errors.iter().all(Error::is_canceled),
            _ => false,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotHandled(e) => e.fmt(f),
            Error::MethodBinding(e) => e.fmt(f),
            Error::HandlerInfo(e) => e.fmt(f),
            Error::InvalidBinding(e) => e.fmt(f),
            Error::Lifestyle(e) => e.fmt(f),
            Error::Validation(outcome) => write!(f, "validation failed: {outcome}"),
            Error::Rejected(e) => e.fmt(f),
            Error::Canceled(e) => e.fmt(f),
            Error::UnresolvedArg(e) => e.fmt(f),
            Error::Panic(e) => e.fmt(f),
            Error::Multi(errors) => {
                if errors.len() == 1 {
                    return errors[0].fmt(f);
                }
                write!(f, "{} errors occurred:", errors.len())?;
                for err in errors {
                    write!(f, "\n\t* {err}")?;
                }
                Ok(())
            }
            Error::Other(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::MethodBinding(e) => Some(e.cause.as_ref()),
            Error::Other(err) => Some(&***err),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<Error>() {
            Ok(inner) => inner,
            Err(other) => Error::Other(Arc::new(other)),
        }
    }
}

impl From<NotHandledError> for Error {
    fn from(e: NotHandledError) -> Self {
        Error::NotHandled(e)
    }
}

impl From<InvalidBindingError> for Error {
    fn from(e: InvalidBindingError) -> Self {
        Error::InvalidBinding(e)
    }
}

impl From<HandlerInfoError> for Error {
    fn from(e: HandlerInfoError) -> Self {
        Error::HandlerInfo(e)
    }
}

impl From<LifestyleError> for Error {
    fn from(e: LifestyleError) -> Self {
        Error::Lifestyle(e)
    }
}

impl From<ValidationOutcome> for Error {
    fn from(outcome: ValidationOutcome) -> Self {
        Error::Validation(outcome)
    }
}

/// No binding accepted the callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotHandledError {
    /// Description of the offending callback
    pub callback: String,
}

impl fmt::Display for NotHandledError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "callback not handled: {}", self.callback)
    }
}

impl std::error::Error for NotHandledError {}

/// A specific binding failed to execute.
#[derive(Debug, Clone)]
pub struct MethodBindingError {
    /// `Handler::method` that failed
    pub method: String,
    /// Underlying failure
    pub cause: Box<Error>,
}

impl fmt::Display for MethodBindingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "binding '{}' failed: {}", self.method, self.cause)
    }
}

impl std::error::Error for MethodBindingError {}

/// A malformed binding declaration detected while compiling a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidBindingError {
    /// Binding (method) name
    pub method: String,
    /// What is wrong with it
    pub reason: String,
}

impl InvalidBindingError {
    pub fn new(method: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for InvalidBindingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid binding '{}': {}", self.method, self.reason)
    }
}

impl std::error::Error for InvalidBindingError {}

/// Aggregate of every invalid binding found in one handler spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerInfoError {
    /// Handler type or function spec name
    pub handler: String,
    /// Every offending binding
    pub errors: Vec<InvalidBindingError>,
}

impl fmt::Display for HandlerInfoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler '{}' has {} invalid binding(s):", self.handler, self.errors.len())?;
        for err in &self.errors {
            write!(f, "\n\t* {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for HandlerInfoError {}

/// Scope misuse reported by the lifestyle filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifestyleError {
    /// The resolving context has already ended (or is ending)
    InactiveContext,
    /// A longer-lived parent tried to depend on a shorter-lived instance
    Mismatch {
        /// Requested key
        key: String,
    },
    /// A managed contextual instance was moved to another context
    ContextChange,
}

impl fmt::Display for LifestyleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifestyleError::InactiveContext => {
                write!(f, "scoped: cannot scope instances to an inactive context")
            }
            LifestyleError::Mismatch { key } => {
                write!(f, "lifestyle mismatch: '{key}' cannot be served to a longer-lived parent")
            }
            LifestyleError::ContextChange => {
                write!(f, "managed instances cannot change context")
            }
        }
    }
}

impl std::error::Error for LifestyleError {}

/// A filter aborted the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedError {
    /// Description of the rejected callback
    pub callback: String,
}

impl fmt::Display for RejectedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "callback rejected: {}", self.callback)
    }
}

impl std::error::Error for RejectedError {}

/// A promise was canceled before it settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanceledError {
    pub reason: String,
}

impl fmt::Display for CanceledError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "promise canceled: {}", self.reason)
    }
}

impl std::error::Error for CanceledError {}

/// A required dependency had no provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedArgError {
    /// Binding that needed the argument
    pub method: String,
    /// Type name of the argument
    pub arg: String,
}

impl fmt::Display for UnresolvedArgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unable to resolve argument '{}' of '{}'", self.arg, self.method)
    }
}

impl std::error::Error for UnresolvedArgError {}

/// Captured panic payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanicError {
    pub message: String,
}

impl fmt::Display for PanicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "panic: {}", self.message)
    }
}

impl std::error::Error for PanicError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_flattens_multi_errors() {
        let a = Error::msg("a");
        let b = Error::msg("b");
        let c = Error::msg("c");
        let ab = Error::combine(Some(a), Some(b));
        let abc = Error::combine(ab, Some(c)).unwrap();
        match abc {
            Error::Multi(errors) => assert_eq!(errors.len(), 3),
            other => panic!("expected multi error, got {other:?}"),
        }
    }

    #[test]
    fn anyhow_round_trip_preserves_kind() {
        let original = Error::Lifestyle(LifestyleError::InactiveContext);
        let wrapped = anyhow::Error::new(original);
        let back = Error::from(wrapped);
        assert!(matches!(back, Error::Lifestyle(LifestyleError::InactiveContext)));
    }

    #[test]
    fn inactive_context_message() {
        assert_eq!(
            LifestyleError::InactiveContext.to_string(),
            "scoped: cannot scope instances to an inactive context"
        );
    }

    #[test]
    fn panic_payloads_are_captured() {
        let err = Error::from_panic(Box::new("boom"));
        assert_eq!(err.to_string(), "panic: boom");
        let err = Error::from_panic(Box::new(String::from("bang")));
        assert_eq!(err.to_string(), "panic: bang");
    }

    #[test]
    fn declined_errors() {
        assert!(Error::Rejected(RejectedError { callback: "x".into() }).is_declined());
        assert!(!Error::msg("real").is_declined());
    }
}

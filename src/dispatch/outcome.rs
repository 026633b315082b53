//! What a binding produced, before the policy interprets it.

use super::effect::{SideEffect, SideEffects};
use super::HandleContext;
use crate::error::Error;
use crate::handle_result::HandleResult;
use crate::promise::Promise;
use crate::types::Keyed;
use crate::value::Value;
use std::sync::Arc;

/// Erased return value of a binding.
///
/// The policy that owns the callback decides how an outcome is recorded:
/// contravariant policies treat [`Outcome::Nothing`] as handled, covariant
/// ones as not handled.
#[derive(Clone, Debug)]
pub enum Outcome {
    /// The binding returned nothing (`()` or `None`)
    Nothing,
    Value(Value),
    /// Independently recorded results
    Values(Vec<Value>),
    /// An explicit handle result
    Result(HandleResult),
    /// A result recorded only when the handle result is handled
    WithResult(Box<Outcome>, HandleResult),
    /// Settles later
    Pending(Promise<Outcome>),
    /// A result with side effects still to apply
    Effects(Box<Outcome>, SideEffects),
}

impl Outcome {
    /// True when the outcome carries no usable result.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Outcome::Nothing => true,
            Outcome::Value(_) | Outcome::Pending(_) => false,
            Outcome::Values(values) => values.is_empty(),
            Outcome::Result(_) => true,
            Outcome::WithResult(inner, result) => !result.handled() || inner.is_empty(),
            Outcome::Effects(inner, _) => inner.is_empty(),
        }
    }

    /// Flatten into values, blocking on pending outcomes.
    pub fn into_values(self) -> Result<Vec<Value>, Error> {
        match self {
            Outcome::Nothing => Ok(Vec::new()),
            Outcome::Value(value) => Ok(vec![value]),
            Outcome::Values(values) => Ok(values),
            Outcome::Result(result) => match result.into_error() {
                Some(err) => Err(err),
                None => Ok(Vec::new()),
            },
            Outcome::WithResult(inner, result) => {
                if let Some(err) = result.error() {
                    return Err(err.clone());
                }
                if result.handled() {
                    inner.into_values()
                } else {
                    Ok(Vec::new())
                }
            }
            Outcome::Pending(pending) => pending.wait()?.into_values(),
            Outcome::Effects(..) => Err(Error::msg(
                "side effects can only be returned synchronously by a binding",
            )),
        }
    }

    /// Apply pending side effects with the context of the binding that
    /// returned them.
    ///
    /// Effects of a declined result are dropped. Promised effects turn the
    /// outcome into a pending one that settles once they all have.
    pub fn apply_effects(self, ctx: &HandleContext<'_>) -> Result<Outcome, Error> {
        match self {
            Outcome::Effects(inner, effects) => {
                let inner = inner.apply_effects(ctx)?;
                match effects.apply(ctx)? {
                    None => Ok(inner),
                    Some(applied) => Ok(Outcome::Pending(applied.then(move |()| inner))),
                }
            }
            Outcome::WithResult(inner, result) if result.handled() => Ok(Outcome::WithResult(
                Box::new(inner.apply_effects(ctx)?),
                result,
            )),
            Outcome::WithResult(inner, result) => Ok(Outcome::WithResult(
                Box::new(inner.without_effects()),
                result,
            )),
            other => Ok(other),
        }
    }

    fn without_effects(self) -> Outcome {
        match self {
            Outcome::Effects(inner, _) => inner.without_effects(),
            Outcome::WithResult(inner, result) => {
                Outcome::WithResult(Box::new(inner.without_effects()), result)
            }
            other => other,
        }
    }

    /// Promise of the flattened values.
    #[must_use]
    pub fn into_promise(self) -> Promise<Vec<Value>> {
        match self {
            Outcome::Pending(pending) => pending.then_try(Outcome::into_values),
            ready => Promise::settled(ready.into_values()),
        }
    }
}

/// Conversion of binding return types into an [`Outcome`].
///
/// `strict` is the binding's strict flag: a strict binding records a `Vec`
/// as one value instead of recording each element.
pub trait IntoOutcome: Send + 'static {
    fn into_outcome(self, strict: bool) -> Result<Outcome, Error>;
}

impl IntoOutcome for () {
    fn into_outcome(self, _strict: bool) -> Result<Outcome, Error> {
        Ok(Outcome::Nothing)
    }
}

impl IntoOutcome for HandleResult {
    fn into_outcome(self, _strict: bool) -> Result<Outcome, Error> {
        Ok(Outcome::Result(self))
    }
}

impl IntoOutcome for Outcome {
    fn into_outcome(self, _strict: bool) -> Result<Outcome, Error> {
        Ok(self)
    }
}

impl IntoOutcome for Value {
    fn into_outcome(self, _strict: bool) -> Result<Outcome, Error> {
        Ok(Outcome::Value(self))
    }
}

impl<T: ?Sized + Keyed> IntoOutcome for Arc<T> {
    fn into_outcome(self, _strict: bool) -> Result<Outcome, Error> {
        Ok(Outcome::Value(T::into_value(self)))
    }
}

impl<X: IntoOutcome> IntoOutcome for Option<X> {
    fn into_outcome(self, strict: bool) -> Result<Outcome, Error> {
        match self {
            Some(inner) => inner.into_outcome(strict),
            None => Ok(Outcome::Nothing),
        }
    }
}

impl<T: ?Sized + Keyed> IntoOutcome for Vec<Arc<T>> {
    fn into_outcome(self, strict: bool) -> Result<Outcome, Error> {
        if strict {
            Ok(Outcome::Value(Value::new(self)))
        } else {
            Ok(Outcome::Values(self.into_iter().map(T::into_value).collect()))
        }
    }
}

impl<X> IntoOutcome for Promise<X>
where
    X: IntoOutcome + Clone,
{
    fn into_outcome(self, strict: bool) -> Result<Outcome, Error> {
        Ok(Outcome::Pending(
            self.then_try(move |inner| inner.into_outcome(strict)),
        ))
    }
}

impl<X: IntoOutcome> IntoOutcome for (X, HandleResult) {
    fn into_outcome(self, strict: bool) -> Result<Outcome, Error> {
        let (inner, result) = self;
        Ok(Outcome::WithResult(
            Box::new(inner.into_outcome(strict)?),
            result,
        ))
    }
}

impl<X: IntoOutcome, E: SideEffect> IntoOutcome for (X, E) {
    fn into_outcome(self, strict: bool) -> Result<Outcome, Error> {
        let (inner, effect) = self;
        let effects = SideEffects::from(Arc::new(effect) as Arc<dyn SideEffect>);
        Ok(Outcome::Effects(Box::new(inner.into_outcome(strict)?), effects))
    }
}

impl<X, E> IntoOutcome for Result<X, E>
where
    X: IntoOutcome,
    E: Into<Error> + Send + 'static,
{
    fn into_outcome(self, strict: bool) -> Result<Outcome, Error> {
        match self {
            Ok(inner) => inner.into_outcome(strict),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vectors_fan_out_unless_strict() {
        let items = vec![Arc::new(1_u8), Arc::new(2_u8)];
        match items.clone().into_outcome(false).unwrap() {
            Outcome::Values(values) => assert_eq!(values.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
        match items.into_outcome(true).unwrap() {
            Outcome::Value(value) => {
                assert_eq!(value.downcast::<Vec<Arc<u8>>>().unwrap().len(), 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn errors_propagate() {
        let failed: Result<Arc<u8>, anyhow::Error> = Err(anyhow::anyhow!("nope"));
        assert_eq!(failed.into_outcome(false).unwrap_err().to_string(), "nope");
    }

    #[test]
    fn effects_wrap_the_result() {
        match (Arc::new(3_u8), SideEffects::new()).into_outcome(false).unwrap() {
            Outcome::Effects(inner, effects) => {
                assert_eq!(effects.len(), 1);
                assert!(!inner.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn declined_results_are_empty() {
        let outcome = (None::<Arc<u8>>, HandleResult::NOT_HANDLED).into_outcome(false).unwrap();
        assert!(outcome.is_empty());
        assert!(outcome.into_values().unwrap().is_empty());
    }
}

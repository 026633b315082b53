//! # Convenience API
//!
//! One function per common callback shape. Each builds the callback,
//! dispatches it through `handler` and turns the outcome into a
//! [`Reply`]: ready when every binding answered synchronously, pending as
//! soon as one returned a promise.
//!
//! ## Callback semantics
//!
//! Every call first reads [`CallbackSemantics`] from the chain:
//!
//! - `broadcast` dispatches to every matching binding, even for the single
//!   value functions
//! - `infer: false` keeps inference handlers out of the dispatch
//! - `best_effort` turns "not handled" into an empty success
//!
//! ## Not handled
//!
//! | Function | Not handled |
//! |---|---|
//! | [`command`], [`execute`], [`create`], [`map`], [`map_into`] | [`Error::NotHandled`] |
//! | [`resolve`], [`resolve_all`], [`create_all`] | empty result |
//! | [`validate`] | valid |
//!
//! Hard failures of a binding always surface, whatever the semantics.
//!
//! ```rust,ignore
//! let reply = api::execute::<PlaceOrder, Receipt>(&*handler, Arc::new(order))?;
//! let receipt = reply.wait()?;
//! ```

use crate::callback::{Callback, Creates, Handles, Maps, Provides, Reply, ValidationOutcome, Validates};
use crate::constraint::ConstraintSet;
use crate::dispatch::surface;
use crate::error::Error;
use crate::handler::{dispatch, Handler};
use crate::options::{get_options, CallbackSemantics};
use crate::types::Keyed;
use crate::value::{Key, Value};
use std::sync::Arc;
use tracing::debug;

fn semantics(handler: &dyn Handler) -> CallbackSemantics {
    get_options::<CallbackSemantics>(handler).unwrap_or_default()
}

/// Dispatch `callback` under the chain's callback semantics.
///
/// # Arguments
///
/// * `handler` - Chain to dispatch through
/// * `callback` - Callback to dispatch
/// * `many` - Dispatch to every matching binding
///
/// # Returns
///
/// Whether any binding handled the callback. Only best-effort chains
/// return `Ok(false)`.
///
/// # Errors
///
/// Binding failures, or [`Error::NotHandled`] when nothing handled the
/// callback.
pub fn handle(handler: &dyn Handler, callback: &mut dyn Callback, many: bool) -> Result<bool, Error> {
    let semantics = semantics(handler);
    run(handler, callback, many, &semantics, !semantics.is_best_effort())
}

fn run(
    handler: &dyn Handler,
    callback: &mut dyn Callback,
    many: bool,
    semantics: &CallbackSemantics,
    required: bool,
) -> Result<bool, Error> {
    if !semantics.allows_inference() {
        callback.base_mut().set_infer(false);
    }
    let greedy = many || semantics.is_broadcast();
    let result = dispatch(handler, callback, greedy);
    surface(&result)?;
    if result.handled() {
        return Ok(true);
    }
    if !required {
        debug!(callback = %callback.describe(), "callback not handled");
        return Ok(false);
    }
    let describe = callback.describe();
    Err(result
        .into_error()
        .unwrap_or_else(|| Error::not_handled(describe)))
}

fn first<T: ?Sized + Keyed>(values: Vec<Value>) -> Option<Arc<T>> {
    values.iter().find_map(T::from_value)
}

fn every<T: ?Sized + Keyed>(values: Vec<Value>) -> Vec<Arc<T>> {
    values.iter().filter_map(T::from_value).collect()
}

/// Send `message` to the first handler accepting it.
pub fn command<C: ?Sized + Keyed>(handler: &dyn Handler, message: Arc<C>) -> Result<Reply<()>, Error> {
    send(handler, Handles::of(message), false)
}

/// Send `message` to every handler accepting it.
pub fn command_all<C: ?Sized + Keyed>(handler: &dyn Handler, message: Arc<C>) -> Result<Reply<()>, Error> {
    send(handler, Handles::of(message), true)
}

/// Send a prepared [`Handles`], for example one carrying constraints.
pub fn send(handler: &dyn Handler, mut handles: Handles, many: bool) -> Result<Reply<()>, Error> {
    handle(handler, &mut handles, many)?;
    Ok(handles.base().result(true).map(|_| ()))
}

/// Send `request` and return the first result of type `R`.
///
/// # Errors
///
/// [`Error::NotHandled`] when no handler accepts `request`, unless the chain
/// is best effort.
pub fn execute<C, R>(handler: &dyn Handler, request: Arc<C>) -> Result<Reply<Option<Arc<R>>>, Error>
where
    C: ?Sized + Keyed,
    R: ?Sized + Keyed,
{
    let mut handles = Handles::of(request);
    handle(handler, &mut handles, false)?;
    Ok(handles.base().result(false).map(first::<R>))
}

/// Send `request` to every handler and collect the results of type `R`.
pub fn execute_all<C, R>(handler: &dyn Handler, request: Arc<C>) -> Result<Reply<Vec<Arc<R>>>, Error>
where
    C: ?Sized + Keyed,
    R: ?Sized + Keyed,
{
    let mut handles = Handles::of(request);
    handle(handler, &mut handles, true)?;
    Ok(handles.base().result(true).map(every::<R>))
}

/// Create a new `T`.
pub fn create<T: ?Sized + Keyed>(handler: &dyn Handler) -> Result<Reply<Option<Arc<T>>>, Error> {
    let mut creates = Creates::of::<T>();
    handle(handler, &mut creates, false)?;
    Ok(creates.result(false).map(first::<T>))
}

/// Create a `T` from every creating binding.
pub fn create_all<T: ?Sized + Keyed>(handler: &dyn Handler) -> Result<Reply<Vec<Arc<T>>>, Error> {
    let semantics = semantics(handler);
    let mut creates = Creates::of::<T>();
    run(handler, &mut creates, true, &semantics, false)?;
    Ok(creates.result(true).map(every::<T>))
}

/// Resolve one `T`; `None` when nothing provides it.
pub fn resolve<T: ?Sized + Keyed>(handler: &dyn Handler) -> Result<Reply<Option<Arc<T>>>, Error> {
    provide(handler, Provides::of::<T>(), false).map(|reply| reply.map(first::<T>))
}

/// Resolve every `T`.
pub fn resolve_all<T: ?Sized + Keyed>(handler: &dyn Handler) -> Result<Reply<Vec<Arc<T>>>, Error> {
    provide(handler, Provides::of::<T>(), true).map(|reply| reply.map(every::<T>))
}

/// Resolve one `T` from a binding satisfying `constraints`.
///
/// ```rust,ignore
/// let primary = api::resolve_with::<dyn Store>(
///     &*handler,
///     ConstraintSet::new().with(Constraint::named("primary")),
/// )?;
/// ```
pub fn resolve_with<T: ?Sized + Keyed>(
    handler: &dyn Handler,
    constraints: ConstraintSet,
) -> Result<Reply<Option<Arc<T>>>, Error> {
    let provides = Provides::of::<T>().with_constraints(constraints);
    provide(handler, provides, false).map(|reply| reply.map(first::<T>))
}

/// Resolve one `T` provided under a string key.
pub fn resolve_key<T: ?Sized + Keyed>(
    handler: &dyn Handler,
    key: impl Into<Arc<str>>,
) -> Result<Reply<Option<Arc<T>>>, Error> {
    provide(handler, Provides::new(Key::name(key)), false).map(|reply| reply.map(first::<T>))
}

/// Dispatch a prepared [`Provides`]; nothing provided is not an error.
pub fn provide(handler: &dyn Handler, mut provides: Provides, many: bool) -> Result<Reply<Vec<Value>>, Error> {
    let semantics = semantics(handler);
    run(handler, &mut provides, many, &semantics, false)?;
    Ok(provides.result(many))
}

/// Map `source` to a `T`.
pub fn map<T: ?Sized + Keyed>(handler: &dyn Handler, source: Value) -> Result<Reply<Option<Arc<T>>>, Error> {
    let mut maps = Maps::to::<T>(source);
    handle(handler, &mut maps, false)?;
    Ok(maps.result(false).map(first::<T>))
}

/// Map `source` into a named `format`, returning the result as a `T`.
///
/// ```rust,ignore
/// let json = api::map_format::<String>(&*handler, Value::new(order), "application/json")?;
/// ```
pub fn map_format<T: ?Sized + Keyed>(
    handler: &dyn Handler,
    source: Value,
    format: &str,
) -> Result<Reply<Option<Arc<T>>>, Error> {
    let mut maps = Maps::to_format(source, format);
    handle(handler, &mut maps, false)?;
    Ok(maps.result(false).map(first::<T>))
}

/// Map `source` into the existing `target`.
///
/// The key is the target's type, or `format` when given. Bindings reach
/// the target through [`Maps::target`].
pub fn map_into(
    handler: &dyn Handler,
    source: Value,
    target: Value,
    format: Option<&str>,
) -> Result<Reply<()>, Error> {
    let key = match format {
        Some(format) => Key::name(format),
        None => Key::Type(target.type_key()),
    };
    let mut maps = Maps::new(source, key).into_target(target);
    handle(handler, &mut maps, false)?;
    Ok(maps.result(true).map(|_| ()))
}

/// Validate `target` with every validator of the requested `groups`.
///
/// Validators run greedily. A target no validator accepts is valid.
///
/// # Errors
///
/// [`Error::Validation`] carrying the outcome when the target is invalid,
/// or the failure of a validator.
pub fn validate<T, I, S>(handler: &dyn Handler, target: Arc<T>, groups: I) -> Result<Reply<ValidationOutcome>, Error>
where
    T: ?Sized + Keyed,
    I: IntoIterator<Item = S>,
    S: Into<Arc<str>>,
{
    let semantics = semantics(handler);
    let mut validates = Validates::of(target).with_groups(groups);
    run(handler, &mut validates, true, &semantics, false)?;
    match validates.base().result(true) {
        Reply::Ready(_) => checked(&validates).map(Reply::Ready),
        Reply::Pending(pending) => {
            let validates = Arc::new(validates);
            Ok(Reply::Pending(pending.then_try(move |_| checked(&validates))))
        }
    }
}

fn checked(validates: &Validates) -> Result<ValidationOutcome, Error> {
    let outcome = validates.outcome();
    if outcome.is_valid() {
        Ok(outcome)
    } else {
        Err(Error::Validation(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Describe, DescriptorBuilder, HandlerDescriptorFactory, HandlerSpec};
    use crate::handler::{HandlerExt, InstanceHandler};

    struct Ledger;

    struct Deposit(u32);

    impl Describe for Ledger {
        fn describe(d: &mut DescriptorBuilder<Self>) {
            d.handles("deposit", |_: &Ledger, deposit: Arc<Deposit>, (), _ctx| {
                Arc::new(deposit.0 * 2)
            });
            d.validates::<Deposit, _, _, _>("positive", |_: &Ledger, deposit: Arc<Deposit>, v: &Validates, (), _ctx| {
                if deposit.0 == 0 {
                    v.add_error("amount", "must be positive");
                }
            });
        }
    }

    fn ledger() -> Arc<dyn Handler> {
        let descriptor = HandlerDescriptorFactory::new()
            .descriptor(&HandlerSpec::of::<Ledger>())
            .unwrap();
        Arc::new(InstanceHandler::new(Value::new(Ledger), descriptor))
    }

    #[test]
    fn execute_returns_the_first_result() {
        let handler = ledger();
        let reply = execute::<Deposit, u32>(&*handler, Arc::new(Deposit(21))).unwrap();
        assert_eq!(*reply.wait().unwrap().unwrap(), 42);
    }

    #[test]
    fn unhandled_commands_fail_unless_best_effort() {
        let handler = ledger();
        let err = command(&*handler, Arc::new("unknown".to_string())).unwrap_err();
        assert!(matches!(err, Error::NotHandled(_)));

        let lenient = handler.best_effort();
        assert!(command(&*lenient, Arc::new("unknown".to_string())).is_ok());
    }

    #[test]
    fn resolve_without_providers_is_empty() {
        let handler = ledger();
        assert!(resolve::<String>(&*handler).unwrap().wait().unwrap().is_none());
        assert!(resolve_all::<String>(&*handler).unwrap().wait().unwrap().is_empty());
    }

    #[test]
    fn validate_reports_field_errors() {
        let handler = ledger();
        assert!(validate(&*handler, Arc::new(Deposit(5)), Vec::<String>::new()).is_ok());
        match validate(&*handler, Arc::new(Deposit(0)), Vec::<String>::new()) {
            Err(Error::Validation(outcome)) => {
                assert_eq!(outcome.field_errors("amount"), vec!["must be positive"]);
            }
            other => panic!("expected validation error, got {:?}", other.map(|_| ())),
        }
    }
}

//! Extractor-style dependencies.
//!
//! A binding declares its dependencies as a tuple of [`Dependency`] types.
//! Each type knows how to materialize itself from the [`HandleContext`]:
//!
//! | Declared as | Resolves |
//! |---|---|
//! | `Arc<T>` | first `T`, waiting on promises; missing declines the binding |
//! | `Option<Arc<T>>` | first `T` or `None` |
//! | `Vec<Arc<T>>` | every `T`, possibly empty |
//! | `Strict<Arc<T>>` | first `T` from exact bindings only |
//! | `Strict<Vec<Arc<T>>>` | a `Vec<Arc<T>>` produced as one value |
//! | `Promise<Arc<T>>` | the pending result as is |
//! | `Optional<D>` | any dependency, `None` instead of declining |
//! | `FromOptions<O>` | merged options from the composer |
//! | `Metadata<M>` | typed metadata declared on the binding |
//! | `Named<N, T>` | a `T` bound under the name `N::NAME` |
//!
//! Anything else implementing [`Dependency`] acts as a custom resolver.

use super::HandleContext;
use crate::callback::Reply;
use crate::constraint::{Constraint, ConstraintSet};
use crate::error::{Error, InvalidBindingError};
use crate::options::{get_options, Options};
use crate::promise::Promise;
use crate::types::Keyed;
use crate::value::{Key, Value};
use std::marker::PhantomData;
use std::sync::Arc;

/// Static description of one dependency slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DependencyArg {
    pub type_name: &'static str,
    /// Missing values do not decline the binding
    pub optional: bool,
    /// No variance or collection fan-out
    pub strict: bool,
    /// Declared as the untyped [`Value`]
    pub untyped: bool,
}

impl DependencyArg {
    #[must_use]
    pub fn of<T: ?Sized>() -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            optional: false,
            strict: false,
            untyped: false,
        }
    }

    #[must_use]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    #[must_use]
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }
}

/// A value materialized for a binding before it runs.
pub trait Dependency: Sized + Send + 'static {
    fn resolve(ctx: &HandleContext<'_>) -> Result<Self, Error>;

    fn describe(args: &mut Vec<DependencyArg>) {
        args.push(DependencyArg::of::<Self>());
    }
}

fn type_name<T: ?Sized + Keyed>() -> &'static str {
    T::type_key().short_name()
}

impl<T: ?Sized + Keyed> Dependency for Arc<T> {
    fn resolve(ctx: &HandleContext<'_>) -> Result<Self, Error> {
        ctx.resolve::<T>()?
            .ok_or_else(|| ctx.unresolved(type_name::<T>()))
    }

    fn describe(args: &mut Vec<DependencyArg>) {
        args.push(DependencyArg::of::<T>());
    }
}

impl<T: ?Sized + Keyed> Dependency for Option<Arc<T>> {
    fn resolve(ctx: &HandleContext<'_>) -> Result<Self, Error> {
        ctx.resolve::<T>()
    }

    fn describe(args: &mut Vec<DependencyArg>) {
        args.push(DependencyArg::of::<T>().optional());
    }
}

impl<T: ?Sized + Keyed> Dependency for Vec<Arc<T>> {
    fn resolve(ctx: &HandleContext<'_>) -> Result<Self, Error> {
        ctx.resolve_all::<T>()
    }

    fn describe(args: &mut Vec<DependencyArg>) {
        args.push(DependencyArg::of::<Vec<Arc<T>>>().optional());
    }
}

/// Disable variance and collection fan-out for the wrapped dependency.
#[derive(Debug, Clone)]
pub struct Strict<D>(pub D);

impl<T: ?Sized + Keyed> Dependency for Strict<Arc<T>> {
    fn resolve(ctx: &HandleContext<'_>) -> Result<Self, Error> {
        let values = ctx.resolve_with(ctx.provides(Key::of::<T>()).strict(), false)?;
        values
            .iter()
            .find_map(T::from_value)
            .map(Strict)
            .ok_or_else(|| ctx.unresolved(type_name::<T>()))
    }

    fn describe(args: &mut Vec<DependencyArg>) {
        args.push(DependencyArg::of::<T>().strict());
    }
}

impl<T: ?Sized + Keyed> Dependency for Strict<Vec<Arc<T>>> {
    fn resolve(ctx: &HandleContext<'_>) -> Result<Self, Error> {
        let values = ctx.resolve_with(ctx.provides(Key::of::<Vec<Arc<T>>>()).strict(), false)?;
        let items = values
            .iter()
            .find_map(|v| v.downcast::<Vec<Arc<T>>>())
            .map(|items| items.iter().map(Arc::clone).collect())
            .unwrap_or_default();
        Ok(Strict(items))
    }

    fn describe(args: &mut Vec<DependencyArg>) {
        args.push(DependencyArg::of::<Vec<Arc<T>>>().strict().optional());
    }
}

fn first<T: ?Sized + Keyed>(values: &[Value], missing: Error) -> Result<Arc<T>, Error> {
    values.iter().find_map(T::from_value).ok_or(missing)
}

impl<T: ?Sized + Keyed> Dependency for Promise<Arc<T>> {
    fn resolve(ctx: &HandleContext<'_>) -> Result<Self, Error> {
        let missing = ctx.unresolved(type_name::<T>());
        match ctx.resolve_reply(ctx.provides(Key::of::<T>()), false)? {
            Reply::Ready(values) => first::<T>(&values, missing).map(Promise::resolve),
            Reply::Pending(pending) => {
                Ok(pending.then_try(move |values| first::<T>(&values, missing)))
            }
        }
    }

    fn describe(args: &mut Vec<DependencyArg>) {
        args.push(DependencyArg::of::<T>());
    }
}

/// Any dependency, yielding `None` instead of declining the binding.
#[derive(Debug, Clone)]
pub struct Optional<D>(pub Option<D>);

impl<D: Dependency> Dependency for Optional<D> {
    fn resolve(ctx: &HandleContext<'_>) -> Result<Self, Error> {
        match D::resolve(ctx) {
            Ok(value) => Ok(Optional(Some(value))),
            Err(err) if err.is_declined() => Ok(Optional(None)),
            Err(err) => Err(err),
        }
    }

    fn describe(args: &mut Vec<DependencyArg>) {
        let start = args.len();
        D::describe(args);
        for arg in &mut args[start..] {
            arg.optional = true;
        }
    }
}

/// Options of type `O` merged along the composer chain.
#[derive(Debug, Clone)]
pub struct FromOptions<O>(pub O);

impl<O: Options> Dependency for FromOptions<O> {
    fn resolve(ctx: &HandleContext<'_>) -> Result<Self, Error> {
        get_options::<O>(ctx.composer())
            .map(FromOptions)
            .ok_or_else(|| ctx.unresolved(std::any::type_name::<O>()))
    }
}

/// Typed metadata attached to the binding being invoked.
#[derive(Debug)]
pub struct Metadata<M: ?Sized>(pub Arc<M>);

impl<M: Keyed> Dependency for Metadata<M> {
    fn resolve(ctx: &HandleContext<'_>) -> Result<Self, Error> {
        ctx.binding()
            .metadata()
            .value::<M>()
            .map(Metadata)
            .ok_or_else(|| ctx.unresolved(type_name::<M>()))
    }
}

/// Compile-time name used by [`Named`].
pub trait NameTag: Send + Sync + 'static {
    const NAME: &'static str;
}

/// A `T` bound under the name `N::NAME`.
pub struct Named<N, T: ?Sized>(pub Arc<T>, PhantomData<fn() -> N>);

impl<N, T: ?Sized> Named<N, T> {
    pub fn new(value: Arc<T>) -> Self {
        Named(value, PhantomData)
    }

    #[must_use]
    pub fn into_inner(self) -> Arc<T> {
        self.0
    }
}

impl<N: NameTag, T: ?Sized + Keyed> Dependency for Named<N, T> {
    fn resolve(ctx: &HandleContext<'_>) -> Result<Self, Error> {
        let constraints = ConstraintSet::new().with(Constraint::named(N::NAME));
        ctx.resolve_constrained::<T>(constraints)?
            .map(Named::new)
            .ok_or_else(|| ctx.unresolved(N::NAME))
    }

    fn describe(args: &mut Vec<DependencyArg>) {
        args.push(DependencyArg::of::<T>());
    }
}

/// The untyped value cannot be resolved without a custom resolver.
impl Dependency for Value {
    fn resolve(ctx: &HandleContext<'_>) -> Result<Self, Error> {
        Err(InvalidBindingError::new(
            ctx.binding().name(),
            "untyped Value dependency needs a resolver",
        )
        .into())
    }

    fn describe(args: &mut Vec<DependencyArg>) {
        args.push(DependencyArg {
            untyped: true,
            ..DependencyArg::of::<Value>()
        });
    }
}

macro_rules! tuple_dependency {
    ($($name:ident),*) => {
        impl<$($name: Dependency),*> Dependency for ($($name,)*) {
            #[allow(unused_variables)]
            fn resolve(ctx: &HandleContext<'_>) -> Result<Self, Error> {
                Ok(($($name::resolve(ctx)?,)*))
            }

            #[allow(unused_variables)]
            fn describe(args: &mut Vec<DependencyArg>) {
                $($name::describe(args);)*
            }
        }
    };
}

tuple_dependency!();
tuple_dependency!(A);
tuple_dependency!(A, B);
tuple_dependency!(A, B, C);
tuple_dependency!(A, B, C, D);
tuple_dependency!(A, B, C, D, E);
tuple_dependency!(A, B, C, D, E, F);
tuple_dependency!(A, B, C, D, E, F, G);
tuple_dependency!(A, B, C, D, E, F, G, H);

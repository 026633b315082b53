//! # Type Keys and the Assignability Lattice
//!
//! Dispatch matches callbacks to bindings by *type*. Rust has no runtime
//! notion of "`Foo` implements `Counter`", so the engine keeps a small,
//! process-wide lattice of explicit relations:
//!
//! - [`TypeKey`] identifies a type (sized or `dyn Trait`) by `TypeId` and
//!   carries its name for diagnostics.
//! - [`relate`] records that values of one type can be viewed as another,
//!   storing the cast used to perform the conversion.
//! - [`is_assignable`] answers reflexive, transitive assignability.
//! - [`cast`] walks the shortest chain of relations and converts a [`Value`].
//!
//! ## Keyed types
//!
//! Anything that flows through dispatch implements [`Keyed`]. Every sized
//! `Send + Sync + 'static` type gets it for free. Trait objects opt in with
//! the [`interface!`](crate::interface) macro, which stores them as
//! `Arc<dyn Trait>` inside the [`Value`].
//!
//! ```rust
//! use std::sync::Arc;
//! use callweave::{interface, types};
//!
//! pub trait Counter: Send + Sync {
//!     fn count(&self) -> usize;
//! }
//! interface!(Counter);
//!
//! struct Foo;
//! impl Counter for Foo {
//!     fn count(&self) -> usize { 1 }
//! }
//!
//! types::relate::<Foo, dyn Counter>(|foo| foo as Arc<dyn Counter>);
//! assert!(types::is_assignable(
//!     types::TypeKey::of::<Foo>(),
//!     types::TypeKey::of::<dyn Counter>(),
//! ));
//! ```

use crate::value::Value;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::any::TypeId;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::debug;

/// Identity of a type participating in dispatch.
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    /// Key of `T`, which may be a trait object.
    #[inline]
    #[must_use]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Fully qualified type name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Last path segment of the type name, for compact logs.
    #[must_use]
    pub fn short_name(&self) -> &'static str {
        let name = self.name;
        let base = name.split('<').next().unwrap_or(name);
        match base.rfind("::") {
            Some(idx) => &name[idx + 2..],
            None => name,
        }
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeKey({})", self.name)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A type that can travel through dispatch inside a [`Value`].
///
/// Implemented for every sized `Send + Sync + 'static` type. Trait objects
/// implement it through [`interface!`](crate::interface).
pub trait Keyed: Send + Sync + 'static {
    /// Key used to match bindings.
    fn type_key() -> TypeKey;

    /// Erase a shared instance.
    fn into_value(this: Arc<Self>) -> Value;

    /// Recover the instance only when `value` holds exactly this type.
    fn from_value_exact(value: &Value) -> Option<Arc<Self>>;

    /// Recover the instance, following lattice relations when needed.
    fn from_value(value: &Value) -> Option<Arc<Self>> {
        Self::from_value_exact(value).or_else(|| {
            cast(value, Self::type_key()).and_then(|cast| Self::from_value_exact(&cast))
        })
    }
}

impl<T: Send + Sync + 'static> Keyed for T {
    #[inline]
    fn type_key() -> TypeKey {
        TypeKey::of::<T>()
    }

    #[inline]
    fn into_value(this: Arc<Self>) -> Value {
        Value::from_sized(this)
    }

    #[inline]
    fn from_value_exact(value: &Value) -> Option<Arc<Self>> {
        value.downcast_sized::<T>()
    }
}

/// Implement [`Keyed`] for a trait object so it can be used as a binding key,
/// a dependency or a result type.
///
/// The trait must have `Send + Sync` as supertraits.
#[macro_export]
macro_rules! interface {
    ($($tr:tt)+) => {
        impl $crate::Keyed for dyn $($tr)+ {
            fn type_key() -> $crate::TypeKey {
                $crate::TypeKey::of::<dyn $($tr)+>()
            }

            fn into_value(this: ::std::sync::Arc<Self>) -> $crate::Value {
                $crate::Value::from_interface::<dyn $($tr)+>(this)
            }

            fn from_value_exact(value: &$crate::Value) -> ::std::option::Option<::std::sync::Arc<Self>> {
                value.downcast_interface::<dyn $($tr)+>()
            }
        }
    };
}

type Caster = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

struct Edge {
    to: TypeKey,
    cast: Caster,
}

#[derive(Default)]
struct Lattice {
    edges: HashMap<TypeKey, Vec<Edge>>,
}

impl Lattice {
    /// Breadth-first search for the shortest chain of edges from `from` to `to`.
    fn path(&self, from: TypeKey, to: TypeKey) -> Option<Vec<Caster>> {
        let mut visited = HashSet::new();
        let mut queue: VecDeque<(TypeKey, Vec<Caster>)> = VecDeque::new();
        visited.insert(from);
        queue.push_back((from, Vec::new()));
        while let Some((node, trail)) = queue.pop_front() {
            let Some(edges) = self.edges.get(&node) else {
                continue;
            };
            for edge in edges {
                if !visited.insert(edge.to) {
                    continue;
                }
                let mut next = trail.clone();
                next.push(Arc::clone(&edge.cast));
                if edge.to == to {
                    return Some(next);
                }
                queue.push_back((edge.to, next));
            }
        }
        None
    }

    fn reachable(&self, from: TypeKey, to: TypeKey) -> bool {
        let mut visited = HashSet::new();
        let mut stack = vec![from];
        while let Some(node) = stack.pop() {
            if node == to {
                return true;
            }
            if !visited.insert(node) {
                continue;
            }
            if let Some(edges) = self.edges.get(&node) {
                stack.extend(edges.iter().map(|e| e.to));
            }
        }
        false
    }
}

static LATTICE: Lazy<RwLock<Lattice>> = Lazy::new(|| RwLock::new(Lattice::default()));

/// Record that `S` is assignable to `I`, using `cast` to convert.
///
/// Relations are process-wide and idempotent; registering the same pair
/// twice keeps the first cast.
pub fn relate<S, I>(cast: fn(Arc<S>) -> Arc<I>)
where
    S: ?Sized + Keyed,
    I: ?Sized + Keyed,
{
    let from = S::type_key();
    let to = I::type_key();
    if from == to {
        return;
    }
    let mut lattice = LATTICE.write();
    let edges = lattice.edges.entry(from).or_default();
    if edges.iter().any(|e| e.to == to) {
        return;
    }
    debug!(from = from.short_name(), to = to.short_name(), "type relation registered");
    edges.push(Edge {
        to,
        cast: Arc::new(move |value: &Value| {
            S::from_value_exact(value).map(|source| I::into_value(cast(source)))
        }),
    });
}

/// Reflexive, transitive assignability.
#[must_use]
pub fn is_assignable(from: TypeKey, to: TypeKey) -> bool {
    from == to || LATTICE.read().reachable(from, to)
}

/// Convert `value` into the representation of `to`.
///
/// Returns `None` when `value`'s type is not assignable to `to`.
#[must_use]
pub fn cast(value: &Value, to: TypeKey) -> Option<Value> {
    if value.type_key() == to {
        return Some(value.clone());
    }
    let path = LATTICE.read().path(value.type_key(), to)?;
    let mut current = value.clone();
    for step in path {
        current = step(&current)?;
    }
    Some(current)
}

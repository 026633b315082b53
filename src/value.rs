//! Type-erased values and binding keys.

use crate::types::{self, Keyed, TypeKey};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A shared, type-erased value flowing through dispatch.
///
/// A `Value` remembers the [`TypeKey`] it was created with and the address
/// of the underlying object, so two values that view the same instance
/// through different interfaces still compare identical with
/// [`Value::ptr_eq`].
#[derive(Clone)]
pub struct Value {
    inner: Arc<dyn Any + Send + Sync>,
    key: TypeKey,
    addr: usize,
}

impl Value {
    /// Wrap an owned value.
    pub fn new<T: Send + Sync + 'static>(value: T) -> Self {
        Self::from_sized(Arc::new(value))
    }

    /// Wrap a shared instance of any [`Keyed`] type.
    pub fn from_arc<T: ?Sized + Keyed>(value: Arc<T>) -> Self {
        T::into_value(value)
    }

    #[doc(hidden)]
    pub fn from_sized<T: Send + Sync + 'static>(value: Arc<T>) -> Self {
        let addr = Arc::as_ptr(&value).cast::<()>() as usize;
        Self {
            inner: value,
            key: TypeKey::of::<T>(),
            addr,
        }
    }

    #[doc(hidden)]
    pub fn from_interface<I: ?Sized + Send + Sync + 'static>(value: Arc<I>) -> Self {
        let addr = Arc::as_ptr(&value).cast::<()>() as usize;
        Self {
            inner: Arc::new(value),
            key: TypeKey::of::<I>(),
            addr,
        }
    }

    #[doc(hidden)]
    pub fn downcast_sized<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        if self.key != TypeKey::of::<T>() {
            return None;
        }
        Arc::clone(&self.inner).downcast::<T>().ok()
    }

    #[doc(hidden)]
    pub fn downcast_interface<I: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<I>> {
        self.inner.downcast_ref::<Arc<I>>().map(Arc::clone)
    }

    /// View this value as `T`, following type relations.
    #[inline]
    pub fn downcast<T: ?Sized + Keyed>(&self) -> Option<Arc<T>> {
        T::from_value(self)
    }

    /// The type this value was created with.
    #[inline]
    #[must_use]
    pub fn type_key(&self) -> TypeKey {
        self.key
    }

    /// True when this value can be viewed as `key`.
    #[must_use]
    pub fn is_assignable_to(&self, key: TypeKey) -> bool {
        types::is_assignable(self.key, key)
    }

    /// Identity of the underlying instance.
    #[inline]
    #[must_use]
    pub fn addr(&self) -> usize {
        self.addr
    }

    /// True when both values refer to the same instance.
    #[inline]
    #[must_use]
    pub fn ptr_eq(&self, other: &Value) -> bool {
        self.addr == other.addr
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value({}@{:#x})", self.key.short_name(), self.addr)
    }
}

/// The primary key of a binding or the key a callback asks for.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    /// Match by type, subject to policy variance
    Type(TypeKey),
    /// Match a string discriminator exactly
    Name(Arc<str>),
    /// Open-ended binding matching any key
    Any,
    /// `Maps` key: source type plus target type or format
    Mapping {
        source: Box<Key>,
        target: Box<Key>,
    },
}

impl Key {
    /// Type key of `T`.
    #[inline]
    #[must_use]
    pub fn of<T: ?Sized + Keyed>() -> Self {
        Key::Type(T::type_key())
    }

    /// String key.
    pub fn name(name: impl Into<Arc<str>>) -> Self {
        Key::Name(name.into())
    }

    /// `Maps` key from a source key to a target key.
    #[must_use]
    pub fn mapping(source: Key, target: Key) -> Self {
        Key::Mapping {
            source: Box::new(source),
            target: Box::new(target),
        }
    }

    #[must_use]
    pub fn as_type(&self) -> Option<TypeKey> {
        match self {
            Key::Type(key) => Some(*key),
            _ => None,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_any(&self) -> bool {
        matches!(self, Key::Any)
    }

    /// Invariant keys only ever match themselves.
    #[inline]
    #[must_use]
    pub fn is_invariant(&self) -> bool {
        matches!(self, Key::Name(_))
    }

    /// True when `self` is strictly more specific than `other`.
    #[must_use]
    pub fn is_more_specific_than(&self, other: &Key) -> bool {
        match (self, other) {
            (_, Key::Any) => !self.is_any(),
            (Key::Type(a), Key::Type(b)) => a != b && types::is_assignable(*a, *b),
            (
                Key::Mapping { source: s1, target: t1 },
                Key::Mapping { source: s2, target: t2 },
            ) => {
                (s1.is_more_specific_than(s2) && (t1 == t2 || t2.is_any()))
                    || (s1 == s2 && t1.is_more_specific_than(t2))
            }
            _ => false,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Type(key) => f.write_str(key.short_name()),
            Key::Name(name) => write!(f, "\"{name}\""),
            Key::Any => f.write_str("*"),
            Key::Mapping { source, target } => write!(f, "{source} -> {target}"),
        }
    }
}

impl From<TypeKey> for Key {
    fn from(key: TypeKey) -> Self {
        Key::Type(key)
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Key::Name(Arc::from(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Foo(u32);

    #[test]
    fn values_keep_identity_and_type() {
        let foo = Arc::new(Foo(7));
        let a = Value::from_arc(Arc::clone(&foo));
        let b = Value::from_arc(Arc::clone(&foo));
        assert!(a.ptr_eq(&b));
        assert_eq!(a.type_key(), TypeKey::of::<Foo>());
        assert_eq!(a.downcast::<Foo>().unwrap().0, 7);
        assert!(a.downcast::<String>().is_none());
    }

    #[test]
    fn any_is_least_specific() {
        let typed = Key::of::<Foo>();
        assert!(typed.is_more_specific_than(&Key::Any));
        assert!(!Key::Any.is_more_specific_than(&typed));
        assert!(!typed.is_more_specific_than(&typed));
    }

    #[test]
    fn names_are_invariant() {
        assert!(Key::name("primary").is_invariant());
        assert_eq!(Key::from("primary"), Key::name("primary"));
    }
}

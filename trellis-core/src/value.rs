//! Values
//!
//! Providers produce values of arbitrary type: a number, a database session,
//! a loaded entity. The engine moves them around as [`Value`], a shared,
//! type-erased handle, and providers get their concrete type back with a
//! downcast.
//!
//! Request arguments, on the other hand, come from the outside world and are
//! JSON-shaped, so they are kept as [`serde_json::Value`] and decoded on
//! demand.

use std::any::{type_name, Any};
use std::fmt::{self, Debug};
use std::sync::Arc;

use indexmap::IndexMap;

/// Request arguments, keyed by argument name.
pub type Arguments = IndexMap<String, serde_json::Value>;

/// A shared, type-erased value produced by a provider.
///
/// Cloning is cheap: all clones point at the same allocation.
#[derive(Clone)]
pub struct Value {
    inner: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Value {
    /// Wrap a value.
    pub fn new<T>(value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        Self {
            inner: Arc::new(value),
            type_name: type_name::<T>(),
        }
    }

    /// Wrap an already shared value without another allocation.
    pub fn from_arc<T>(value: Arc<T>) -> Self
    where
        T: Any + Send + Sync,
    {
        Self {
            inner: value,
            type_name: type_name::<T>(),
        }
    }

    /// The name of the wrapped type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Check whether the wrapped value is a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.inner.is::<T>()
    }

    /// Borrow the wrapped value as a `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    /// Get a shared handle to the wrapped value as a `T`.
    pub fn downcast<T>(&self) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        Arc::clone(&self.inner).downcast::<T>().ok()
    }

    /// Check whether two values share the same allocation.
    pub fn ptr_eq(&self, other: &Value) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Value")
            .field("type", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// Named values attached to a request, such as the authenticated user or a
/// connection pool.
#[derive(Debug, Clone, Default)]
pub struct Context {
    entries: IndexMap<String, Value>,
}

impl Context {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry, replacing any previous entry with the same name.
    pub fn with<T>(mut self, name: impl Into<String>, value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        self.insert(name, value);
        self
    }

    /// Add an entry, replacing any previous entry with the same name.
    pub fn insert<T>(&mut self, name: impl Into<String>, value: T)
    where
        T: Any + Send + Sync,
    {
        self.entries.insert(name.into(), Value::new(value));
    }

    /// Get the raw entry.
    pub fn entry(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    /// Get an entry as a `T`. Returns `None` if it is missing or of another type.
    pub fn get<T: Any>(&self, name: &str) -> Option<&T> {
        self.entries.get(name).and_then(Value::downcast_ref)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

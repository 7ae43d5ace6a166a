//! What a provider body receives when it runs.

use std::any::{type_name, Any};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;

use crate::error::CallError;
use crate::graph::NodeKey;
use crate::value::{Arguments, Context, Value};

/// The inputs of one provider invocation.
///
/// `arguments` only holds the parameters the provider declared, with
/// defaults already applied. `dependencies` holds every declared
/// sub-dependency, fully resolved.
#[derive(Debug, Clone)]
pub struct Call {
    node: NodeKey,
    parent: Option<Value>,
    context: Arc<Context>,
    arguments: Arguments,
    dependencies: IndexMap<String, Value>,
}

impl Call {
    pub(crate) fn new(
        node: NodeKey,
        parent: Option<Value>,
        context: Arc<Context>,
        arguments: Arguments,
        dependencies: IndexMap<String, Value>,
    ) -> Self {
        Self {
            node,
            parent,
            context,
            arguments,
            dependencies,
        }
    }

    /// The provider being invoked.
    pub fn node(&self) -> &NodeKey {
        &self.node
    }

    /// The parent value of the request, if any.
    pub fn parent(&self) -> Option<&Value> {
        self.parent.as_ref()
    }

    /// The request context.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Decode a declared argument.
    pub fn arg<T: DeserializeOwned>(&self, name: &str) -> Result<T, CallError> {
        let raw = self
            .arguments
            .get(name)
            .ok_or_else(|| CallError::MissingArgument {
                name: name.to_string(),
            })?;

        T::deserialize(raw).map_err(|source| CallError::InvalidArgument {
            name: name.to_string(),
            source,
        })
    }

    /// The raw JSON value of a declared argument.
    pub fn raw_arg(&self, name: &str) -> Option<&serde_json::Value> {
        self.arguments.get(name)
    }

    pub fn arguments(&self) -> &Arguments {
        &self.arguments
    }

    /// Borrow a resolved dependency as a `T`.
    pub fn dep<T: Any>(&self, name: &str) -> Result<&T, CallError> {
        let value = self.dep_value(name)?;
        value.downcast_ref::<T>().ok_or_else(|| CallError::TypeMismatch {
            name: name.to_string(),
            expected: type_name::<T>(),
            actual: value.type_name(),
        })
    }

    /// Get a shared handle to a resolved dependency, for moving into a
    /// future or another task.
    pub fn dep_arc<T>(&self, name: &str) -> Result<Arc<T>, CallError>
    where
        T: Any + Send + Sync,
    {
        let value = self.dep_value(name)?;
        value.downcast::<T>().ok_or_else(|| CallError::TypeMismatch {
            name: name.to_string(),
            expected: type_name::<T>(),
            actual: value.type_name(),
        })
    }

    /// The type-erased value of a resolved dependency.
    pub fn dep_value(&self, name: &str) -> Result<&Value, CallError> {
        self.dependencies
            .get(name)
            .ok_or_else(|| CallError::MissingDependency {
                name: name.to_string(),
            })
    }

    pub fn dependencies(&self) -> &IndexMap<String, Value> {
        &self.dependencies
    }
}

//! Error Types
//!
//! Errors are split by when they can happen:
//!
//! - [`BuildError`]: raised once while a dependency graph is constructed.
//!   A root that fails to build never serves a request.
//! - [`ResolveError`]: raised while a request is evaluated. These are shared
//!   between every waiter of a failed node, so they are cheap to clone.
//! - [`CallError`]: raised by the accessors on [`Call`](crate::Call) inside a
//!   provider body. They convert into [`BoxError`] with `?`.
//! - [`TeardownError`]: collected while releasing scoped resources.
//!
//! [`Error`] is the union returned by [`Invoker`](crate::Invoker).

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::graph::NodeKey;

/// Error type returned by provider bodies and release steps.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// A provider error shared between every waiter of the node that raised it.
pub type SharedError = Arc<dyn StdError + Send + Sync + 'static>;

/// Errors raised while building a dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    /// A provider transitively depends on itself.
    #[error("circular dependency detected: {}", format_cycle(.cycle))]
    CircularDependency { cycle: Vec<NodeKey> },

    /// A dependency names a provider that was never registered.
    #[error("provider '{name}' is not registered (required by {})", describe_requirer(.required_by))]
    UnknownProvider {
        name: NodeKey,
        required_by: Option<NodeKey>,
    },

    /// Two providers were registered under the same name.
    #[error("provider '{name}' is registered more than once")]
    DuplicateProvider { name: NodeKey },

    /// A parameter has neither a declared type nor a usable default.
    #[error("parameter '{parameter}' of provider '{node}' has no type and no default value")]
    MalformedParameter { node: NodeKey, parameter: String },

    /// A name is declared twice on the same provider.
    #[error("parameter '{parameter}' is declared more than once on provider '{node}'")]
    DuplicateParameter { node: NodeKey, parameter: String },

    /// Two reachable providers declare the same argument with different types.
    #[error("argument '{parameter}' is declared as {first} and as {second}")]
    ConflictingParameter {
        parameter: String,
        first: String,
        second: String,
    },
}

fn describe_requirer(required_by: &Option<NodeKey>) -> String {
    match required_by {
        Some(node) => format!("'{node}'"),
        None => "the caller".to_string(),
    }
}

fn format_cycle(cycle: &[NodeKey]) -> String {
    cycle
        .iter()
        .map(NodeKey::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Errors raised while resolving a request.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolveError {
    /// A provider body (or its acquire step) returned an error.
    #[error("provider '{node}' failed: {source}")]
    NodeFailed {
        node: NodeKey,
        #[source]
        source: SharedError,
    },

    /// A required argument was not supplied by the request.
    #[error("missing required argument '{argument}' for provider '{node}'")]
    MissingArgument { node: NodeKey, argument: String },

    /// The request supplied an argument no reachable provider declares.
    #[error("unknown argument '{argument}'")]
    UnknownArgument { argument: String },

    /// The node does not belong to the graph this channel was built for.
    #[error("provider '{node}' is not part of this execution channel")]
    UnknownNode { node: NodeKey },
}

impl ResolveError {
    /// The provider the failure originated from, if any.
    pub fn node(&self) -> Option<&NodeKey> {
        match self {
            Self::NodeFailed { node, .. }
            | Self::MissingArgument { node, .. }
            | Self::UnknownNode { node } => Some(node),
            Self::UnknownArgument { .. } => None,
        }
    }
}

/// Errors raised by [`Call`](crate::Call) accessors inside a provider body.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("dependency '{name}' was not resolved for this call")]
    MissingDependency { name: String },

    #[error("'{name}' holds a value of type {actual}, not {expected}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("argument '{name}' was not supplied")]
    MissingArgument { name: String },

    #[error("argument '{name}' could not be decoded: {source}")]
    InvalidArgument {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("the request carries no parent value")]
    MissingParent,

    #[error("context entry '{name}' is not set")]
    MissingContext { name: String },
}

/// A single release step that failed.
#[derive(Debug, Clone)]
pub struct ReleaseFailure {
    pub node: NodeKey,
    pub source: SharedError,
}

impl fmt::Display for ReleaseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}': {}", self.node, self.source)
    }
}

/// Every release step that failed during one teardown pass.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{} release step(s) failed: {}", .failures.len(), format_failures(.failures))]
pub struct TeardownError {
    pub failures: Vec<ReleaseFailure>,
}

fn format_failures(failures: &[ReleaseFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors returned by an [`Invoker`](crate::Invoker).
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Teardown(#[from] TeardownError),

    /// The root evaluation exceeded the configured timeout.
    #[error("invocation timed out after {timeout:?}")]
    Timeout { timeout: Duration },
}

//! Graph Nodes
//!
//! This module defines the nodes that live in a dependency graph.
//!
//! A node is identified by its [`NodeKey`], the name its provider was
//! registered under. Two nodes are equal when their keys are equal, whatever
//! position they were reached from.

use std::borrow::Borrow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Serialize, Serializer};

use super::param::ParamDecl;
use super::provider::Body;

/// Stable identity of a provider and of the node built from it.
///
/// Cloning is cheap: the name is shared.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey(Arc<str>);

impl NodeKey {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// Get the provider name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeKey {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for NodeKey {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

impl Borrow<str> for NodeKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeKey({:?})", &*self.0)
    }
}

impl Serialize for NodeKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// How a node's body is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Runs to completion on the calling task.
    Sync,

    /// Returns a future that is awaited.
    Async,

    /// Acquires a resource synchronously. The acquired value is the node's
    /// result; the release step runs during channel teardown.
    Scoped,

    /// Like [`NodeKind::Scoped`], with asynchronous acquire and release steps.
    AsyncScoped,
}

impl NodeKind {
    /// Whether evaluating this node leaves a release step behind.
    pub fn is_scoped(self) -> bool {
        matches!(self, Self::Scoped | Self::AsyncScoped)
    }
}

/// A node in the dependency graph.
///
/// Nodes are created once by the [`GraphBuilder`](super::GraphBuilder) and
/// never change afterwards. They are shared between every request served
/// against the graph.
pub struct DependencyNode {
    /// Identity of this node.
    key: NodeKey,

    /// How the body runs.
    kind: NodeKind,

    /// The provider body.
    body: Body,

    /// Direct sub-dependencies, keyed by the name the body reads them under.
    /// Declaration order is kept.
    dependencies: IndexMap<String, Arc<DependencyNode>>,

    /// Plain parameters this node reads from the request.
    params: IndexMap<String, ParamDecl>,
}

impl DependencyNode {
    pub(crate) fn new(
        key: NodeKey,
        body: Body,
        dependencies: IndexMap<String, Arc<DependencyNode>>,
        params: IndexMap<String, ParamDecl>,
    ) -> Self {
        Self {
            key,
            kind: body.kind(),
            body,
            dependencies,
            params,
        }
    }

    /// Get the node's key.
    pub fn key(&self) -> &NodeKey {
        &self.key
    }

    /// Get the node's kind.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub(crate) fn body(&self) -> &Body {
        &self.body
    }

    /// Get the direct sub-dependencies.
    pub fn dependencies(&self) -> &IndexMap<String, Arc<DependencyNode>> {
        &self.dependencies
    }

    /// Get the declared plain parameters.
    pub fn params(&self) -> &IndexMap<String, ParamDecl> {
        &self.params
    }

    /// Check whether this node depends directly on `key`.
    pub fn depends_on(&self, key: &NodeKey) -> bool {
        self.dependencies.values().any(|dep| dep.key() == key)
    }
}

impl PartialEq for DependencyNode {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for DependencyNode {}

impl Hash for DependencyNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Debug for DependencyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyNode")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field(
                "dependencies",
                &self
                    .dependencies
                    .iter()
                    .map(|(name, dep)| (name.as_str(), dep.key().as_str()))
                    .collect::<Vec<_>>(),
            )
            .field("params", &self.params.keys().collect::<Vec<_>>())
            .finish()
    }
}

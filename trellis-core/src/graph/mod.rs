//! Dependency Graph
//!
//! This module turns provider declarations into the immutable graphs that
//! requests are resolved against.
//!
//! # Overview
//!
//! - A [`Provider`] declares a body, its plain parameters and its
//!   sub-dependencies by provider name.
//! - The [`GraphBuilder`] walks the declarations from a root provider,
//!   rejects cycles and malformed declarations, and produces a
//!   [`DependencyGraph`]: the root node, every reachable node exactly once,
//!   and the merged argument map.
//! - The [`Registry`] owns the providers and caches one graph per root.
//!
//! Graphs never change after they are built. Every request served against
//! a root shares the same nodes; per-request state lives in the
//! [`ExecutionChannel`](crate::ExecutionChannel).

mod builder;
mod node;
pub(crate) mod param;
pub(crate) mod provider;
mod registry;

pub use builder::{DependencyGraph, GraphBuilder};
pub use node::{DependencyNode, NodeKey, NodeKind};
pub use param::{ArgType, ParamDecl};
pub use provider::{AsyncResource, Provider, Resource};
pub use registry::{Registry, RegistryBuilder};

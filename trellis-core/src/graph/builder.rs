//! Graph Construction
//!
//! The builder turns provider declarations into an immutable
//! [`DependencyGraph`] for one root provider.
//!
//! # Algorithm
//!
//! We walk the declarations depth-first from the root:
//!
//! 1. A provider already built is reused, so a provider reached through two
//!    branches becomes one shared node.
//! 2. A provider already on the ancestor path closes a cycle. The walk stops
//!    with the path from the first occurrence back to itself.
//! 3. Otherwise the provider's parameters are checked and merged into the
//!    graph's argument map, its dependencies are built recursively, and the
//!    node is created once all of them exist.
//!
//! Nodes are created children first, so the flattened node set comes out in
//! an order where every node follows its dependencies.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use indexmap::IndexMap;
use smallvec::SmallVec;

use super::node::{DependencyNode, NodeKey};
use super::param::ParamDecl;
use super::provider::Provider;
use crate::error::BuildError;

/// The ancestor path during the walk. Most graphs are shallow.
type AncestorPath = SmallVec<[NodeKey; 8]>;

/// A built dependency graph for one root provider.
#[derive(Debug)]
pub struct DependencyGraph {
    root: Arc<DependencyNode>,
    nodes: IndexMap<NodeKey, Arc<DependencyNode>>,
    arguments: IndexMap<String, ParamDecl>,
}

impl DependencyGraph {
    /// The root node. It is not part of [`nodes`](Self::nodes).
    pub fn root(&self) -> &Arc<DependencyNode> {
        &self.root
    }

    /// Every node reachable from the root, excluding the root, each once.
    pub fn nodes(&self) -> &IndexMap<NodeKey, Arc<DependencyNode>> {
        &self.nodes
    }

    pub fn node(&self, key: &str) -> Option<&Arc<DependencyNode>> {
        self.nodes.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.nodes.contains_key(key)
    }

    /// Number of nodes in the flattened set.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The plain parameters of the root and every reachable node, merged.
    ///
    /// Types are always resolved. This is what a schema layer exposes as the
    /// field's arguments.
    pub fn arguments(&self) -> &IndexMap<String, ParamDecl> {
        &self.arguments
    }

    /// The flattened nodes, dependencies before dependents.
    ///
    /// Nodes with no ordering constraint between them keep their order in
    /// [`nodes`](Self::nodes).
    pub fn evaluation_order(&self) -> Vec<NodeKey> {
        let mut in_degree: HashMap<&NodeKey, usize> = HashMap::with_capacity(self.nodes.len());
        let mut dependents: HashMap<&NodeKey, Vec<&NodeKey>> = HashMap::new();
        let mut queue = VecDeque::new();

        for (key, node) in &self.nodes {
            in_degree.insert(key, node.dependencies().len());
            for dep in node.dependencies().values() {
                dependents.entry(dep.key()).or_default().push(key);
            }
            if node.dependencies().is_empty() {
                queue.push_back(key);
            }
        }

        // Kahn's algorithm
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(key) = queue.pop_front() {
            order.push(key.clone());

            for &dependent in dependents.get(key).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }

        order
    }
}

/// Builds [`DependencyGraph`]s from a set of provider declarations.
pub struct GraphBuilder<'a> {
    providers: &'a IndexMap<NodeKey, Provider>,
}

/// Mutable state of one build.
#[derive(Default)]
struct BuildState {
    /// Nodes created so far, in creation order.
    built: IndexMap<NodeKey, Arc<DependencyNode>>,
    path: AncestorPath,
    arguments: IndexMap<String, ParamDecl>,
    /// Which provider first declared each argument.
    declared_by: HashMap<String, NodeKey>,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(providers: &'a IndexMap<NodeKey, Provider>) -> Self {
        Self { providers }
    }

    /// Build the graph rooted at `root`.
    pub fn build(&self, root: &str) -> Result<DependencyGraph, BuildError> {
        let mut state = BuildState::default();
        let root = self.visit(&NodeKey::from(root), None, &mut state)?;

        let mut nodes = state.built;
        nodes.shift_remove(root.key());

        Ok(DependencyGraph {
            root,
            nodes,
            arguments: state.arguments,
        })
    }

    fn visit(
        &self,
        key: &NodeKey,
        required_by: Option<&NodeKey>,
        state: &mut BuildState,
    ) -> Result<Arc<DependencyNode>, BuildError> {
        if let Some(node) = state.built.get(key) {
            return Ok(Arc::clone(node));
        }

        if let Some(start) = state.path.iter().position(|ancestor| ancestor == key) {
            let mut cycle: Vec<NodeKey> = state.path[start..].to_vec();
            cycle.push(key.clone());
            return Err(BuildError::CircularDependency { cycle });
        }

        let provider = self
            .providers
            .get(key)
            .ok_or_else(|| BuildError::UnknownProvider {
                name: key.clone(),
                required_by: required_by.cloned(),
            })?;

        if let Some(parameter) = provider.duplicates().first() {
            return Err(BuildError::DuplicateParameter {
                node: key.clone(),
                parameter: parameter.clone(),
            });
        }

        let params = Self::collect_params(provider, state)?;

        state.path.push(key.clone());
        let mut dependencies = IndexMap::with_capacity(provider.dependencies().len());
        for (name, dep_key) in provider.dependencies() {
            let child = self.visit(dep_key, Some(key), state)?;
            dependencies.insert(name.clone(), child);
        }
        state.path.pop();

        let node = Arc::new(DependencyNode::new(
            key.clone(),
            provider.body().clone(),
            dependencies,
            params,
        ));
        state.built.insert(key.clone(), Arc::clone(&node));

        Ok(node)
    }

    /// Normalize a provider's parameters and merge them into the graph's
    /// argument map.
    fn collect_params(
        provider: &Provider,
        state: &mut BuildState,
    ) -> Result<IndexMap<String, ParamDecl>, BuildError> {
        let mut params = IndexMap::with_capacity(provider.params().len());

        for (name, decl) in provider.params() {
            let decl = decl
                .normalized()
                .ok_or_else(|| BuildError::MalformedParameter {
                    node: provider.key().clone(),
                    parameter: name.clone(),
                })?;

            match state.arguments.get(name) {
                Some(existing) if existing.resolved_type() != decl.resolved_type() => {
                    let owner = &state.declared_by[name];
                    return Err(BuildError::ConflictingParameter {
                        parameter: name.clone(),
                        first: describe(existing, owner),
                        second: describe(&decl, provider.key()),
                    });
                }
                Some(_) => {}
                None => {
                    state.arguments.insert(name.clone(), decl.clone());
                    state
                        .declared_by
                        .insert(name.clone(), provider.key().clone());
                }
            }

            params.insert(name.clone(), decl);
        }

        Ok(params)
    }
}

fn describe(decl: &ParamDecl, owner: &NodeKey) -> String {
    match decl.resolved_type() {
        Some(ty) => format!("{ty} by '{owner}'"),
        None => format!("an untyped value by '{owner}'"),
    }
}

//! Provider Registry
//!
//! The registry owns every provider declaration and caches one built graph
//! per root. A graph is built the first time its root is asked for; build
//! errors surface there, before any request runs against it.

use std::sync::Arc;

use dashmap::DashMap;
use indexmap::IndexMap;
use tracing::{debug, info};

use super::builder::{DependencyGraph, GraphBuilder};
use super::node::NodeKey;
use super::provider::Provider;
use crate::config::InvokerConfig;
use crate::error::BuildError;
use crate::invoker::Invoker;

/// Collects providers before they are frozen into a [`Registry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    providers: IndexMap<NodeKey, Provider>,
    duplicates: Vec<NodeKey>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider.
    pub fn provide(mut self, provider: Provider) -> Self {
        self.register(provider);
        self
    }

    /// Add a provider through a mutable reference.
    pub fn register(&mut self, provider: Provider) {
        let key = provider.key().clone();
        if self.providers.contains_key(&key) {
            self.duplicates.push(key);
        } else {
            self.providers.insert(key, provider);
        }
    }

    /// Freeze the declarations.
    ///
    /// Fails if a name was registered twice.
    pub fn build(self) -> Result<Registry, BuildError> {
        if let Some(name) = self.duplicates.into_iter().next() {
            return Err(BuildError::DuplicateProvider { name });
        }

        Ok(Registry {
            providers: self.providers,
            graphs: DashMap::new(),
        })
    }
}

/// A frozen set of providers plus the graphs built from them.
#[derive(Debug)]
pub struct Registry {
    providers: IndexMap<NodeKey, Provider>,
    graphs: DashMap<NodeKey, Arc<DependencyGraph>>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn provider(&self, key: &str) -> Option<&Provider> {
        self.providers.get(key)
    }

    pub fn providers(&self) -> &IndexMap<NodeKey, Provider> {
        &self.providers
    }

    /// Get the graph rooted at `root`, building it on first use.
    pub fn graph(&self, root: &str) -> Result<Arc<DependencyGraph>, BuildError> {
        if let Some(graph) = self.graphs.get(root) {
            debug!(root, "graph_cache_hit");
            return Ok(Arc::clone(graph.value()));
        }

        let graph = Arc::new(GraphBuilder::new(&self.providers).build(root)?);
        info!(
            root,
            nodes = graph.len(),
            arguments = graph.arguments().len(),
            "graph_built"
        );

        // A concurrent build of the same root may have won; keep the first.
        let entry = self
            .graphs
            .entry(graph.root().key().clone())
            .or_insert(graph);
        Ok(Arc::clone(entry.value()))
    }

    /// Number of graphs built so far.
    pub fn cached_graphs(&self) -> usize {
        self.graphs.len()
    }

    /// An invoker for `root` with the default configuration.
    pub fn invoker(&self, root: &str) -> Result<Invoker, BuildError> {
        self.invoker_with(root, InvokerConfig::default())
    }

    pub fn invoker_with(&self, root: &str, config: InvokerConfig) -> Result<Invoker, BuildError> {
        Ok(Invoker::new(self.graph(root)?, config))
    }
}

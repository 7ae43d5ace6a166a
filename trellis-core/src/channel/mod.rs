//! Execution Channel
//!
//! A channel is the runtime of one request. It is created from a built
//! [`DependencyGraph`] and the request's inputs, evaluates nodes on demand,
//! and releases every scoped resource once the request is done.
//!
//! # Resolution
//!
//! [`ExecutionChannel::get`] returns a node's value:
//!
//! 1. If the node's slot already holds an outcome, that outcome is returned.
//! 2. Otherwise the first caller spawns the node's evaluation and every
//!    caller waits for it (see [`slot`]). The evaluation outlives callers
//!    that give up on it.
//! 3. Evaluation resolves all sub-dependencies concurrently, then runs the
//!    body with the declared arguments and the resolved values.
//! 4. The outcome, value or failure, is stored and shared with every waiter.
//!
//! A failed node fails every node that depends on it with the same error.
//! Nodes that do not depend on it are unaffected, and in-flight siblings are
//! never cancelled.
//!
//! # Teardown
//!
//! Scoped providers push their release steps while evaluating.
//! [`ExecutionChannel::release`] runs them in reverse order of acquisition.
//! A channel dropped with release steps still pending runs them from `Drop`.

mod call;
mod release;
pub mod slot;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::{join_all, BoxFuture, FutureExt};
use indexmap::IndexMap;
use tracing::{debug, error, instrument, warn};

pub use call::Call;
pub use slot::{Outcome, SlotState};

use crate::error::{ResolveError, TeardownError};
use crate::graph::provider::{Acquired, Body};
use crate::graph::{DependencyGraph, DependencyNode, NodeKey};
use crate::value::{Arguments, Context, Value};
use release::ReleaseStack;
use slot::Slot;

/// Unique identifier of a channel, used to correlate log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(u64);

impl ChannelId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

/// The inputs of one request.
#[derive(Debug, Clone, Default)]
pub struct Request {
    parent: Option<Value>,
    context: Arc<Context>,
    arguments: Arguments,
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the parent value (the object the resolved field belongs to).
    pub fn parent(mut self, parent: Value) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn context(mut self, context: Context) -> Self {
        self.context = Arc::new(context);
        self
    }

    /// Share a context between several requests.
    pub fn shared_context(mut self, context: Arc<Context>) -> Self {
        self.context = context;
        self
    }

    pub fn argument(
        mut self,
        name: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.arguments.insert(name.into(), value.into());
        self
    }

    pub fn arguments(mut self, arguments: Arguments) -> Self {
        self.arguments.extend(arguments);
        self
    }

    pub fn supplied_arguments(&self) -> &Arguments {
        &self.arguments
    }
}

/// The per-request runtime of a dependency graph.
///
/// Nodes are evaluated on tokio tasks that share the channel's state, so an
/// evaluation runs to completion even when every caller waiting on it has
/// gone away. A channel must therefore be driven from inside a tokio runtime;
/// outside one, every node fails.
///
/// Dropping the channel releases whatever is still pending. Sync release
/// steps run inline and async ones are spawned on the current runtime. With
/// no runtime, an async step runs only if it finishes without suspending and
/// is otherwise leaked with a warning.
pub struct ExecutionChannel {
    state: Arc<ChannelState>,
}

/// Everything an evaluation task needs, shared between the channel handle
/// and the tasks it spawned.
struct ChannelState {
    id: ChannelId,
    graph: Arc<DependencyGraph>,
    slots: HashMap<NodeKey, Slot>,
    releases: ReleaseStack,
    request: Request,
}

impl ExecutionChannel {
    /// Create a channel with one unset slot per node of `graph`.
    pub fn new(graph: Arc<DependencyGraph>, request: Request) -> Self {
        let slots = graph
            .nodes()
            .keys()
            .map(|key| (key.clone(), Slot::new(key.clone())))
            .collect();

        Self {
            state: Arc::new(ChannelState {
                id: ChannelId::next(),
                graph,
                slots,
                releases: ReleaseStack::new(),
                request,
            }),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.state.id
    }

    pub fn graph(&self) -> &Arc<DependencyGraph> {
        &self.state.graph
    }

    /// Resolve a node of this channel's graph.
    ///
    /// The node is evaluated at most once per channel, however many callers
    /// ask for it and however concurrently they do.
    pub fn get(&self, node: &DependencyNode) -> BoxFuture<'static, Outcome> {
        self.state.resolve(node.key().clone())
    }

    /// Resolve a node by provider name.
    pub fn get_key(&self, key: &str) -> BoxFuture<'static, Outcome> {
        self.state.resolve(NodeKey::from(key))
    }

    /// Evaluate the root of the graph.
    ///
    /// The root has no slot: every call evaluates it again, on the caller's
    /// task.
    pub async fn evaluate_root(&self) -> Outcome {
        let root = Arc::clone(self.state.graph.root());
        Arc::clone(&self.state).evaluate(root).await
    }

    /// Run every pending release step, most recently acquired first.
    pub async fn release(&self) -> Result<(), TeardownError> {
        self.state.releases.drain().await
    }

    /// The state of a node's slot, or `None` for nodes outside the graph.
    pub fn slot_state(&self, key: &str) -> Option<SlotState> {
        self.state.slots.get(key).map(Slot::state)
    }

    /// Number of release steps not yet run.
    pub fn pending_releases(&self) -> usize {
        self.state.releases.len()
    }
}

impl ChannelState {
    fn resolve(self: &Arc<Self>, key: NodeKey) -> BoxFuture<'static, Outcome> {
        let state = Arc::clone(self);
        async move {
            let node = state.graph.node(key.as_str());
            let (Some(node), Some(slot)) = (node, state.slots.get(&key)) else {
                return Err(ResolveError::UnknownNode { node: key });
            };
            let node = Arc::clone(node);
            slot.resolve(|| Arc::clone(&state).evaluate(node)).await
        }
        .boxed()
    }

    #[instrument(
        name = "node_evaluate",
        skip_all,
        fields(channel = %self.id, node = %node.key())
    )]
    async fn evaluate(self: Arc<Self>, node: Arc<DependencyNode>) -> Outcome {
        let dependencies = match self.resolve_dependencies(&node).await {
            Ok(dependencies) => dependencies,
            Err(e) => {
                debug!(cause = ?e.node(), "dependency_failed");
                return Err(e);
            }
        };
        let arguments = self.bind_arguments(&node)?;
        let call = Call::new(
            node.key().clone(),
            self.request.parent.clone(),
            Arc::clone(&self.request.context),
            arguments,
            dependencies,
        );

        debug!(kind = ?node.kind(), "node_started");

        let result = match node.body() {
            Body::Sync(body) => body(call),
            Body::Async(body) => body(call).await,
            Body::Scoped(body) => body(call).map(|acquired| self.hold(&node, acquired)),
            Body::AsyncScoped(body) => body(call).await.map(|acquired| self.hold(&node, acquired)),
        };

        match result {
            Ok(value) => {
                debug!(value_type = value.type_name(), "node_completed");
                Ok(value)
            }
            Err(e) => {
                error!(error = %e, "node_failed");
                Err(ResolveError::NodeFailed {
                    node: node.key().clone(),
                    source: Arc::from(e),
                })
            }
        }
    }

    /// Resolve every sub-dependency of `node` concurrently.
    ///
    /// All of them run to completion before a failure is reported.
    async fn resolve_dependencies(
        self: &Arc<Self>,
        node: &DependencyNode,
    ) -> Result<IndexMap<String, Value>, ResolveError> {
        if node.dependencies().is_empty() {
            return Ok(IndexMap::new());
        }

        let outcomes = join_all(
            node.dependencies()
                .values()
                .map(|dep| self.resolve(dep.key().clone())),
        )
        .await;

        node.dependencies()
            .keys()
            .cloned()
            .zip(outcomes)
            .map(|(name, outcome)| outcome.map(|value| (name, value)))
            .collect()
    }

    /// Pick the request arguments `node` declared, filling in defaults.
    fn bind_arguments(&self, node: &DependencyNode) -> Result<Arguments, ResolveError> {
        let mut bound = Arguments::with_capacity(node.params().len());

        for (name, decl) in node.params() {
            let value = match (self.request.arguments.get(name), decl.default_json()) {
                (Some(supplied), _) => supplied.clone(),
                (None, Some(default)) => default.clone(),
                (None, None) => {
                    return Err(ResolveError::MissingArgument {
                        node: node.key().clone(),
                        argument: name.clone(),
                    })
                }
            };
            bound.insert(name.clone(), value);
        }

        Ok(bound)
    }

    /// Keep the release step of an acquired resource and hand out its value.
    fn hold(&self, node: &DependencyNode, acquired: Acquired) -> Value {
        let Acquired { value, release } = acquired;
        self.releases.push(node.key().clone(), release);
        debug!(pending = self.releases.len(), "resource_acquired");
        value
    }

    /// Release what is still pending without waiting for it.
    fn abandon(&self) {
        let pending = self.releases.len();
        if pending > 0 {
            warn!(
                channel = %self.id,
                pending,
                "channel dropped with pending releases, releasing now"
            );
            self.releases.drain_detached();
        }
    }
}

impl Drop for ExecutionChannel {
    fn drop(&mut self) {
        self.state.abandon();
    }
}

// Evaluations still running when the handle goes away may acquire more.
impl Drop for ChannelState {
    fn drop(&mut self) {
        self.abandon();
    }
}

impl fmt::Debug for ExecutionChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionChannel")
            .field("id", &self.state.id)
            .field("root", self.state.graph.root().key())
            .field("nodes", &self.state.slots.len())
            .field("pending_releases", &self.state.releases.len())
            .finish()
    }
}

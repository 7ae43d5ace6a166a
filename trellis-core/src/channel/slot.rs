//! Result Slots
//!
//! Each node of a channel owns one slot. A slot is written at most once and
//! read any number of times.
//!
//! # How Slots Work
//!
//! 1. The slot starts unset.
//!
//! 2. The first caller of [`Slot::resolve`] becomes the initializer. It
//!    spawns the evaluation on the tokio runtime and stores a shared handle
//!    to it. Electing the initializer happens under one lock inside the cell,
//!    so no two callers can both start an evaluation.
//!
//! 3. Every caller, the initializer included, awaits a clone of that handle.
//!
//! 4. When the evaluation finishes its outcome, success or failure, is kept
//!    by the handle and every caller receives a clone of it.
//!
//! The evaluation belongs to the slot, not to a caller. Dropping a caller
//! mid-evaluation leaves the evaluation running, and whoever asks next gets
//! its outcome.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{self, BoxFuture, FutureExt, Shared};
use tokio::runtime::Handle;
use tokio::sync::OnceCell;

use crate::error::ResolveError;
use crate::graph::NodeKey;
use crate::value::Value;

/// The stored outcome of a node.
pub type Outcome = Result<Value, ResolveError>;

type Evaluation = Shared<BoxFuture<'static, Outcome>>;

/// Observable state of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Nothing has been stored yet. An evaluation may be in flight.
    Unset,

    /// The node produced a value.
    Resolved,

    /// The node failed. The failure is handed to every caller.
    Failed,
}

/// A write-once, many-reader result cell.
pub struct Slot {
    node: NodeKey,
    evaluation: OnceCell<Evaluation>,
}

impl Slot {
    pub fn new(node: NodeKey) -> Self {
        Self {
            node,
            evaluation: OnceCell::new(),
        }
    }

    /// Get the outcome, spawning `evaluate` if nobody has started it yet.
    ///
    /// `evaluate` is called at most once per slot.
    pub async fn resolve<F, Fut>(&self, evaluate: F) -> Outcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        let evaluation = self
            .evaluation
            .get_or_init(|| async move { spawn(&self.node, evaluate()) })
            .await
            .clone();

        evaluation.await
    }

    /// Get the outcome without waiting.
    pub fn peek(&self) -> Option<&Outcome> {
        self.evaluation.get().and_then(Shared::peek)
    }

    pub fn state(&self) -> SlotState {
        match self.peek() {
            None => SlotState::Unset,
            Some(Ok(_)) => SlotState::Resolved,
            Some(Err(_)) => SlotState::Failed,
        }
    }
}

/// Run `evaluation` on its own task and return a handle every caller can await.
fn spawn<Fut>(node: &NodeKey, evaluation: Fut) -> Evaluation
where
    Fut: Future<Output = Outcome> + Send + 'static,
{
    let node = node.clone();

    match Handle::try_current() {
        Ok(runtime) => {
            let task = runtime.spawn(evaluation);
            async move {
                task.await.unwrap_or_else(|e| {
                    Err(ResolveError::NodeFailed {
                        node,
                        source: Arc::new(e),
                    })
                })
            }
            .boxed()
            .shared()
        }
        Err(e) => future::ready(Err(ResolveError::NodeFailed {
            node,
            source: Arc::new(e),
        }))
        .boxed()
        .shared(),
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("node", &self.node)
            .field("state", &self.state())
            .finish()
    }
}

//! Release Stack
//!
//! Scoped providers leave a release step behind when they acquire a
//! resource. The channel pushes those steps here in acquisition order and
//! drains them last-in, first-out once the request is done, so a resource is
//! always released before anything it was built on.
//!
//! A failing release step does not stop the pass. Every step runs; the
//! failures are collected and returned together.

use std::sync::Arc;

use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, error, warn};

use crate::error::{BoxError, ReleaseFailure, TeardownError};
use crate::graph::provider::Release;
use crate::graph::NodeKey;

/// A release step waiting to run, tagged with the node that acquired it.
pub(crate) struct PendingRelease {
    node: NodeKey,
    release: Release,
}

/// LIFO stack of pending release steps.
#[derive(Default)]
pub(crate) struct ReleaseStack {
    pending: Mutex<Vec<PendingRelease>>,
}

impl ReleaseStack {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, node: NodeKey, release: Release) {
        self.pending.lock().push(PendingRelease { node, release });
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.lock().len()
    }

    fn pop(&self) -> Option<PendingRelease> {
        self.pending.lock().pop()
    }

    /// Run every pending release step, most recent first.
    ///
    /// Async steps run as their own tasks. Dropping this future mid-step
    /// leaves that step running; the steps after it stay on the stack.
    pub(crate) async fn drain(&self) -> Result<(), TeardownError> {
        let mut failures = Vec::new();

        // The lock is only held while popping, never across an await.
        while let Some(PendingRelease { node, release }) = self.pop() {
            let result = match release {
                Release::Sync(release) => release(),
                Release::Async(release) => match Handle::try_current() {
                    Ok(runtime) => runtime
                        .spawn(release())
                        .await
                        .unwrap_or_else(|e| Err(BoxError::from(e))),
                    Err(_) => release().await,
                },
            };

            match result {
                Ok(()) => debug!(node = %node, "resource_released"),
                Err(e) => {
                    error!(node = %node, error = %e, "release_failed");
                    failures.push(ReleaseFailure {
                        node,
                        source: Arc::from(e),
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(TeardownError { failures })
        }
    }

    /// Release whatever is left without an async context.
    ///
    /// Sync steps run inline. Async steps are spawned on the current tokio
    /// runtime. Without one, an async step is polled once and leaked if it
    /// does not finish right away.
    pub(crate) fn drain_detached(&self) {
        let pending = std::mem::take(&mut *self.pending.lock());
        let runtime = Handle::try_current().ok();

        for PendingRelease { node, release } in pending.into_iter().rev() {
            match release {
                Release::Sync(release) => report(&node, release()),
                Release::Async(release) => match &runtime {
                    Some(runtime) => {
                        runtime.spawn(async move { report(&node, release().await) });
                    }
                    None => match release().now_or_never() {
                        Some(result) => report(&node, result),
                        None => warn!(node = %node, "no runtime to finish release on, leaking it"),
                    },
                },
            }
        }
    }
}

fn report(node: &NodeKey, result: Result<(), BoxError>) {
    match result {
        Ok(()) => debug!(node = %node, "resource_released"),
        Err(e) => error!(node = %node, error = %e, "release_failed"),
    }
}

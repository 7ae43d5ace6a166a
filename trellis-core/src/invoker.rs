//! Invoker
//!
//! The invoker serves requests against one built graph. Each request gets a
//! fresh [`ExecutionChannel`]; the root is evaluated through it, and every
//! scoped resource acquired along the way is released before the request is
//! reported finished.
//!
//! # Error precedence
//!
//! - A root failure (or timeout) is returned even if teardown also failed.
//!   The teardown failure is logged.
//! - A successful root followed by a failed teardown returns
//!   [`Error::Teardown`].

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::channel::{ExecutionChannel, Request};
use crate::config::InvokerConfig;
use crate::error::{Error, ReleaseFailure, ResolveError, TeardownError};
use crate::graph::DependencyGraph;
use crate::value::Value;

/// Runs requests against one root.
#[derive(Debug, Clone)]
pub struct Invoker {
    graph: Arc<DependencyGraph>,
    config: InvokerConfig,
}

/// A finished root evaluation whose teardown is still running.
#[derive(Debug)]
pub struct Detached {
    /// The root outcome.
    pub result: Result<Value, Error>,

    /// The release pass. The request is finished once this completes.
    pub teardown: JoinHandle<Result<(), TeardownError>>,
}

impl Detached {
    /// Wait for teardown and combine both outcomes the way
    /// [`Invoker::invoke`] does.
    pub async fn finish(self) -> Result<Value, Error> {
        let teardown = join_teardown(self.teardown).await;
        settle(self.result, teardown)
    }
}

impl Invoker {
    pub fn new(graph: Arc<DependencyGraph>, config: InvokerConfig) -> Self {
        Self { graph, config }
    }

    pub fn graph(&self) -> &Arc<DependencyGraph> {
        &self.graph
    }

    pub fn config(&self) -> &InvokerConfig {
        &self.config
    }

    /// Open a channel for `request` without evaluating anything.
    pub fn channel(&self, request: Request) -> Result<ExecutionChannel, Error> {
        if self.config.reject_unknown_arguments {
            let arguments = self.graph.arguments();
            if let Some(unknown) = request
                .supplied_arguments()
                .keys()
                .find(|name| !arguments.contains_key(name.as_str()))
            {
                return Err(ResolveError::UnknownArgument {
                    argument: unknown.clone(),
                }
                .into());
            }
        }

        Ok(ExecutionChannel::new(Arc::clone(&self.graph), request))
    }

    /// Evaluate the root for one request, then release its resources.
    ///
    /// Returns once every release step has run. Teardown runs on its own
    /// task, so dropping this future while it is in progress does not stop it.
    #[instrument(name = "invoke", skip_all, fields(root = %self.graph.root().key()))]
    pub async fn invoke(&self, request: Request) -> Result<Value, Error> {
        let channel = self.channel(request)?;
        let result = self.run_root(&channel).await;
        let teardown = join_teardown(spawn_teardown(channel)).await;

        settle(result, teardown)
    }

    /// Evaluate the root for one request and release its resources in a
    /// spawned task.
    ///
    /// The root value is available before teardown finishes. Await
    /// [`Detached::teardown`] (or call [`Detached::finish`]) to learn when
    /// the request is complete.
    #[instrument(name = "invoke", skip_all, fields(root = %self.graph.root().key()))]
    pub async fn invoke_detached(&self, request: Request) -> Detached {
        let channel = match self.channel(request) {
            Ok(channel) => channel,
            Err(e) => {
                return Detached {
                    result: Err(e),
                    teardown: tokio::spawn(async { Ok::<(), TeardownError>(()) }),
                }
            }
        };

        let result = self.run_root(&channel).await;
        let teardown = spawn_teardown(channel);

        Detached { result, teardown }
    }

    async fn run_root(&self, channel: &ExecutionChannel) -> Result<Value, Error> {
        info!(
            channel = %channel.id(),
            nodes = self.graph.len(),
            "invocation_started"
        );

        let Some(timeout) = self.config.timeout() else {
            return Ok(channel.evaluate_root().await?);
        };

        match tokio::time::timeout(timeout, channel.evaluate_root()).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                warn!(
                    channel = %channel.id(),
                    ?timeout,
                    "invocation_timed_out"
                );
                Err(Error::Timeout { timeout })
            }
        }
    }
}

/// Release everything `channel` acquired on a task of its own.
fn spawn_teardown(channel: ExecutionChannel) -> JoinHandle<Result<(), TeardownError>> {
    tokio::spawn(async move {
        let teardown = channel.release().await;
        if let Err(e) = &teardown {
            error!(channel = %channel.id(), error = %e, "teardown_failed");
        }
        teardown
    })
}

async fn join_teardown(
    teardown: JoinHandle<Result<(), TeardownError>>,
) -> Result<(), TeardownError> {
    match teardown.await {
        Ok(teardown) => teardown,
        Err(e) => Err(TeardownError {
            failures: vec![ReleaseFailure {
                node: "teardown".into(),
                source: Arc::new(e),
            }],
        }),
    }
}

/// Combine the root outcome with the teardown outcome.
fn settle(
    result: Result<Value, Error>,
    teardown: Result<(), TeardownError>,
) -> Result<Value, Error> {
    match (result, teardown) {
        (Ok(value), Ok(())) => {
            info!(value_type = value.type_name(), "invocation_completed");
            Ok(value)
        }
        (Ok(_), Err(teardown)) => {
            error!(error = %teardown, "invocation_failed");
            Err(Error::Teardown(teardown))
        }
        (Err(e), Ok(())) => {
            error!(error = %e, "invocation_failed");
            Err(e)
        }
        (Err(e), Err(teardown)) => {
            error!(error = %e, teardown = %teardown, "invocation_failed");
            Err(e)
        }
    }
}

//! Trellis Core
//!
//! This crate resolves the dependencies of a field resolver once per request.
//! A resolver declares the values it needs; each of those is produced by a
//! provider that may have dependencies of its own. Trellis builds the
//! dependency graph once, then for every request:
//!
//! - evaluates each provider at most once, however many resolvers in the
//!   graph ask for it,
//! - runs independent providers concurrently,
//! - releases scoped resources (sessions, transactions, locks) in reverse
//!   order of acquisition once the request is done.
//!
//! # Architecture
//!
//! - `graph`: provider declarations, graph construction and the registry
//! - `channel`: the per-request runtime (memoization, fan-out, teardown)
//! - `invoker`: runs one request against a graph
//! - `builtin`: providers for the request's parent value and context
//!
//! # Example
//!
//! ```rust
//! use trellis_core::{ParamDecl, Provider, Registry, Request, Resource};
//!
//! # tokio_test();
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn tokio_test() {
//! let registry = Registry::builder()
//!     .provide(Provider::scoped("session", |_| {
//!         Ok(Resource::new(String::from("db"), || Ok(())))
//!     }))
//!     .provide(
//!         Provider::sync("orders", |call| {
//!             let limit: usize = call.arg("limit")?;
//!             let session = call.dep::<String>("session")?;
//!             Ok(vec![format!("{session}: {limit} orders")])
//!         })
//!         .param("limit", ParamDecl::default_value(10))
//!         .depends_on("session", "session"),
//!     )
//!     .build()
//!     .unwrap();
//!
//! let invoker = registry.invoker("orders").unwrap();
//! let value = invoker.invoke(Request::new().argument("limit", 3)).await.unwrap();
//!
//! assert_eq!(
//!     value.downcast_ref::<Vec<String>>().unwrap(),
//!     &vec![String::from("db: 3 orders")]
//! );
//! # }
//! ```

pub mod builtin;
pub mod channel;
pub mod config;
pub mod error;
pub mod graph;
pub mod invoker;
pub mod value;

pub use channel::{Call, ChannelId, ExecutionChannel, Outcome, Request, SlotState};
pub use config::InvokerConfig;
pub use error::{
    BoxError, BuildError, CallError, Error, ReleaseFailure, ResolveError, SharedError,
    TeardownError,
};
pub use graph::{
    ArgType, AsyncResource, DependencyGraph, DependencyNode, GraphBuilder, NodeKey, NodeKind,
    ParamDecl, Provider, Registry, RegistryBuilder, Resource,
};
pub use invoker::{Detached, Invoker};
pub use value::{Arguments, Context, Value};

//! Provider Declarations
//!
//! A provider is a named computation plus the shape of its inputs: plain
//! parameters read from the request and sub-dependencies satisfied by other
//! providers. Providers are registered in a
//! [`Registry`](super::Registry), which builds them into graphs.
//!
//! # Kinds
//!
//! - [`Provider::sync`]: a plain function.
//! - [`Provider::async_fn`]: a function returning a future.
//! - [`Provider::scoped`]: acquires a [`Resource`]. The acquired value is what
//!   dependents see; the release step runs once the request is done.
//! - [`Provider::async_scoped`]: the same with an [`AsyncResource`].
//!
//! # Example
//!
//! ```rust
//! use trellis_core::{ArgType, ParamDecl, Provider, Resource};
//!
//! let session = Provider::scoped("session", |call| {
//!     let dsn: String = call.arg("dsn")?;
//!     Ok(Resource::new(format!("session({dsn})"), || Ok(())))
//! })
//! .param("dsn", ParamDecl::typed(ArgType::String.non_null()));
//!
//! let orders = Provider::sync("orders", |call| {
//!     let session = call.dep::<String>("session")?;
//!     Ok(vec![format!("orders via {session}")])
//! })
//! .depends_on("session", "session");
//! # let _ = (session, orders);
//! ```

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use indexmap::IndexMap;

use super::node::{NodeKey, NodeKind};
use super::param::ParamDecl;
use crate::channel::Call;
use crate::error::BoxError;
use crate::value::Value;

type SyncFn = dyn Fn(Call) -> Result<Value, BoxError> + Send + Sync;
type AsyncFn = dyn Fn(Call) -> BoxFuture<'static, Result<Value, BoxError>> + Send + Sync;
type ScopedFn = dyn Fn(Call) -> Result<Acquired, BoxError> + Send + Sync;
type AsyncScopedFn = dyn Fn(Call) -> BoxFuture<'static, Result<Acquired, BoxError>> + Send + Sync;

/// A type-erased provider body.
#[derive(Clone)]
pub(crate) enum Body {
    Sync(Arc<SyncFn>),
    Async(Arc<AsyncFn>),
    Scoped(Arc<ScopedFn>),
    AsyncScoped(Arc<AsyncScopedFn>),
}

impl Body {
    pub(crate) fn kind(&self) -> NodeKind {
        match self {
            Self::Sync(_) => NodeKind::Sync,
            Self::Async(_) => NodeKind::Async,
            Self::Scoped(_) => NodeKind::Scoped,
            Self::AsyncScoped(_) => NodeKind::AsyncScoped,
        }
    }
}

/// A release step waiting to run.
pub(crate) enum Release {
    Sync(Box<dyn FnOnce() -> Result<(), BoxError> + Send>),
    Async(Box<dyn FnOnce() -> BoxFuture<'static, Result<(), BoxError>> + Send>),
}

/// The outcome of a scoped provider's acquire step.
pub(crate) struct Acquired {
    pub(crate) value: Value,
    pub(crate) release: Release,
}

/// A value acquired by a scoped provider together with its release step.
///
/// The release step runs exactly once, after the request that acquired the
/// value has finished with it, in reverse order of acquisition.
pub struct Resource<T> {
    value: T,
    release: Box<dyn FnOnce() -> Result<(), BoxError> + Send>,
}

impl<T> Resource<T>
where
    T: Any + Send + Sync,
{
    pub fn new<R>(value: T, release: R) -> Self
    where
        R: FnOnce() -> Result<(), BoxError> + Send + 'static,
    {
        Self {
            value,
            release: Box::new(release),
        }
    }

    fn erase(self) -> Acquired {
        Acquired {
            value: Value::new(self.value),
            release: Release::Sync(self.release),
        }
    }
}

/// Like [`Resource`], with an asynchronous release step.
pub struct AsyncResource<T> {
    value: T,
    release: Box<dyn FnOnce() -> BoxFuture<'static, Result<(), BoxError>> + Send>,
}

impl<T> AsyncResource<T>
where
    T: Any + Send + Sync,
{
    pub fn new<R, Fut>(value: T, release: R) -> Self
    where
        R: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self {
            value,
            release: Box::new(move || release().boxed()),
        }
    }

    fn erase(self) -> Acquired {
        Acquired {
            value: Value::new(self.value),
            release: Release::Async(self.release),
        }
    }
}

/// Declaration of one provider.
#[derive(Clone)]
pub struct Provider {
    key: NodeKey,
    body: Body,
    params: IndexMap<String, ParamDecl>,
    dependencies: IndexMap<String, NodeKey>,
    /// Names declared more than once; reported when the graph is built.
    duplicates: Vec<String>,
}

impl Provider {
    pub(crate) fn from_body(name: impl Into<NodeKey>, body: Body) -> Self {
        Self {
            key: name.into(),
            body,
            params: IndexMap::new(),
            dependencies: IndexMap::new(),
            duplicates: Vec::new(),
        }
    }

    /// Declare a synchronous provider.
    pub fn sync<F, T>(name: impl Into<NodeKey>, body: F) -> Self
    where
        F: Fn(Call) -> Result<T, BoxError> + Send + Sync + 'static,
        T: Any + Send + Sync,
    {
        Self::from_body(
            name,
            Body::Sync(Arc::new(move |call| body(call).map(Value::new))),
        )
    }

    /// Declare an asynchronous provider.
    pub fn async_fn<F, Fut, T>(name: impl Into<NodeKey>, body: F) -> Self
    where
        F: Fn(Call) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
        T: Any + Send + Sync,
    {
        Self::from_body(
            name,
            Body::Async(Arc::new(move |call| body(call).map(|r| r.map(Value::new)).boxed())),
        )
    }

    /// Declare a provider that acquires a [`Resource`].
    pub fn scoped<F, T>(name: impl Into<NodeKey>, body: F) -> Self
    where
        F: Fn(Call) -> Result<Resource<T>, BoxError> + Send + Sync + 'static,
        T: Any + Send + Sync,
    {
        Self::from_body(
            name,
            Body::Scoped(Arc::new(move |call| body(call).map(Resource::erase))),
        )
    }

    /// Declare a provider that acquires an [`AsyncResource`].
    pub fn async_scoped<F, Fut, T>(name: impl Into<NodeKey>, body: F) -> Self
    where
        F: Fn(Call) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<AsyncResource<T>, BoxError>> + Send + 'static,
        T: Any + Send + Sync,
    {
        Self::from_body(
            name,
            Body::AsyncScoped(Arc::new(move |call| {
                body(call).map(|r| r.map(AsyncResource::erase)).boxed()
            })),
        )
    }

    /// Declare a plain parameter read from the request.
    pub fn param(mut self, name: impl Into<String>, decl: ParamDecl) -> Self {
        let name = name.into();
        if self.is_declared(&name) {
            self.duplicates.push(name);
        } else {
            self.params.insert(name, decl);
        }
        self
    }

    /// Declare that the body reads the value of `provider` under `name`.
    pub fn depends_on(mut self, name: impl Into<String>, provider: impl Into<NodeKey>) -> Self {
        let name = name.into();
        if self.is_declared(&name) {
            self.duplicates.push(name);
        } else {
            self.dependencies.insert(name, provider.into());
        }
        self
    }

    fn is_declared(&self, name: &str) -> bool {
        self.params.contains_key(name) || self.dependencies.contains_key(name)
    }

    pub fn key(&self) -> &NodeKey {
        &self.key
    }

    pub fn kind(&self) -> NodeKind {
        self.body.kind()
    }

    pub fn params(&self) -> &IndexMap<String, ParamDecl> {
        &self.params
    }

    /// Declared sub-dependencies: parameter name to provider key.
    pub fn dependencies(&self) -> &IndexMap<String, NodeKey> {
        &self.dependencies
    }

    pub(crate) fn body(&self) -> &Body {
        &self.body
    }

    pub(crate) fn duplicates(&self) -> &[String] {
        &self.duplicates
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("key", &self.key)
            .field("kind", &self.kind())
            .field("params", &self.params)
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

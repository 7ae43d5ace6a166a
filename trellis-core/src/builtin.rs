//! Built-in providers.
//!
//! These expose parts of the request itself as dependencies, so a provider
//! can depend on the parent value or a context entry the same way it depends
//! on anything else. Register them like any other provider:
//!
//! ```rust
//! use trellis_core::{builtin, Provider, Registry};
//!
//! let registry = Registry::builder()
//!     .provide(builtin::parent())
//!     .provide(builtin::context_entry("locale"))
//!     .provide(
//!         Provider::sync("greeting", |call| {
//!             let locale = call.dep::<String>("locale")?;
//!             Ok(format!("hello ({locale})"))
//!         })
//!         .depends_on("locale", "context:locale"),
//!     )
//!     .build()
//!     .unwrap();
//! # let _ = registry;
//! ```

use std::sync::Arc;

use crate::channel::Call;
use crate::error::{BoxError, CallError};
use crate::graph::provider::Body;
use crate::graph::Provider;
use crate::value::Value;

/// Name of the provider returned by [`parent`].
pub const PARENT: &str = "parent";

/// Prefix of the providers returned by [`context_entry`].
pub const CONTEXT_PREFIX: &str = "context:";

/// A provider named `parent` that yields the request's parent value.
///
/// Fails with [`CallError::MissingParent`] when the request has none.
pub fn parent() -> Provider {
    Provider::from_body(
        PARENT,
        Body::Sync(Arc::new(|call: Call| -> Result<Value, BoxError> {
            call.parent()
                .cloned()
                .ok_or_else(|| CallError::MissingParent.into())
        })),
    )
}

/// A provider named `context:<name>` that yields one context entry.
///
/// Fails with [`CallError::MissingContext`] when the entry is not set.
pub fn context_entry(name: &str) -> Provider {
    let name = name.to_string();
    Provider::from_body(
        format!("{CONTEXT_PREFIX}{name}"),
        Body::Sync(Arc::new(move |call: Call| -> Result<Value, BoxError> {
            call.context()
                .entry(&name)
                .cloned()
                .ok_or_else(|| CallError::MissingContext { name: name.clone() }.into())
        })),
    )
}

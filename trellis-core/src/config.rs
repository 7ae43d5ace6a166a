//! Invoker configuration.
//!
//! ```rust
//! use trellis_core::InvokerConfig;
//!
//! let config = InvokerConfig::from_json(r#"{"timeout_ms": 250}"#).unwrap();
//! assert_eq!(config.timeout_ms, Some(250));
//! assert!(!config.reject_unknown_arguments);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-root settings applied to every request an invoker serves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvokerConfig {
    /// Upper bound on the root evaluation. Release still runs when it is hit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Fail requests that supply arguments no reachable provider declares.
    pub reject_unknown_arguments: bool,
}

impl InvokerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn reject_unknown_arguments(mut self, reject: bool) -> Self {
        self.reject_unknown_arguments = reject;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

//! Capabilities wrapped by the admission gate.
//!
//! A [`Capability`] is an opaque collaborator: it receives the request's query parameters
//! (minus the API key) and returns a JSON payload or a [`CapabilityError`]. The gate charges
//! usage only when it returns `Ok`.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;

pub mod phrases;
pub mod postal;
pub mod video;

pub use phrases::PhrasePicker;
pub use postal::PostalCodeLookup;
pub use video::VideoLinkResolver;

/// Query parameters handed to a capability.
pub type CapabilityParams = HashMap<String, String>;

/// Errors produced by capabilities.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum CapabilityError {
    /// A required parameter was not supplied.
    #[error("missing parameter `{0}`")]
    MissingParam(&'static str),
    /// A parameter was supplied but is unusable.
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParam {
        /// Parameter name.
        name: &'static str,
        /// Why it was rejected.
        reason: String,
    },
    /// The upstream has no result for the request.
    #[error("not found: {0}")]
    NotFound(String),
    /// The upstream call failed.
    #[error("upstream failure: {0}")]
    Upstream(String),
    /// The capability cannot serve requests right now (bad local data, missing tool).
    #[error("capability unavailable: {0}")]
    Unavailable(String),
}

impl CapabilityError {
    /// Caused by the request rather than the collaborator.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::MissingParam(_) | Self::InvalidParam { .. } | Self::NotFound(_))
    }
}

/// An external operation the gateway meters.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Route name, used as the request path segment.
    fn name(&self) -> &'static str;

    /// Perform the operation.
    async fn invoke(&self, params: &CapabilityParams) -> Result<JsonValue, CapabilityError>;
}

/// Capabilities by route name.
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    entries: HashMap<&'static str, Arc<dyn Capability>>,
    aliases: HashMap<&'static str, &'static str>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability under its name, replacing any previous one.
    pub fn register(&mut self, capability: Arc<dyn Capability>) {
        self.entries.insert(capability.name(), capability);
    }

    /// Builder-style `register`.
    pub fn with(mut self, capability: impl Capability + 'static) -> Self {
        self.register(Arc::new(capability));
        self
    }

    /// Builder-style: also serve the capability `target` under `alias`.
    pub fn with_alias(mut self, alias: &'static str, target: &'static str) -> Self {
        self.aliases.insert(alias, target);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        let name = self.aliases.get(name).copied().unwrap_or(name);
        self.entries.get(name).cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.entries.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry").field("names", &self.names()).finish()
    }
}

/// Fetch a required, non-blank parameter.
pub(crate) fn required<'a>(
    params: &'a CapabilityParams,
    name: &'static str,
) -> Result<&'a str, CapabilityError> {
    params
        .get(name)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .ok_or(CapabilityError::MissingParam(name))
}

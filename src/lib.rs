#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # keygate
//!
//! An HTTP gateway that meters a small set of capabilities behind API keys.
//!
//! Every gated request carries `?key=...`. The key must exist in a persisted key table and still
//! have quota left; usage is charged only after the wrapped capability succeeds, so failed,
//! timed-out or cancelled requests cost nothing.
//!
//! ## Features
//!
//! - **Admission gate** with exact, serialized quota accounting per key
//! - **Pluggable key storage** behind the [`KeyStore`] trait (JSON file, in-memory)
//! - **Tower middleware** that puts the gate in front of any axum route
//! - **Capabilities**: random phrase, postal-code lookup, video link resolution
//!
//! ## Quick Start
//!
//! ```rust
//! use keygate::{AdmissionGate, InMemoryKeyStore, KeyRecord, KeyTable};
//!
//! #[tokio::main]
//! async fn main() {
//!     let table: KeyTable = [("abc", KeyRecord::new(0, 1))].into_iter().collect();
//!     let gate = AdmissionGate::new(InMemoryKeyStore::new(table));
//!
//!     let out = gate.run(Some("abc"), || async { Ok::<_, std::io::Error>("hello") }).await;
//!     assert_eq!(out.unwrap(), "hello");
//!
//!     // The single request allowed by the limit has been used.
//!     assert!(gate.run(Some("abc"), || async { Ok::<_, std::io::Error>(()) }).await.is_err());
//! }
//! ```

pub mod capability;
pub mod config;
pub mod error;
pub mod gate;
pub mod http;
pub mod middleware;
pub mod store;
pub mod timeout;

// Re-exports
pub use capability::{
    Capability, CapabilityError, CapabilityParams, CapabilityRegistry, PhrasePicker,
    PostalCodeLookup, VideoLinkResolver,
};
pub use config::{ConfigError, GatewayConfig};
pub use error::{GateError, StoreError};
pub use gate::{Admission, AdmissionGate, AdmissionState, Usage};
pub use http::{router, AppState};
pub use middleware::{AdmissionLayer, AdmissionService, AdmittedKey, GatePolicy};
pub use store::{InMemoryKeyStore, JsonFileKeyStore, KeyRecord, KeyStore, KeyTable};
pub use timeout::{TimedOut, TimeoutPolicy};

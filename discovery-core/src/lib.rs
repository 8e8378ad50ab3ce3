//! # Discovery Core Library
//!
//! Service discovery for a shared-memory IPC middleware. Providers offer
//! (service, instance, event) endpoints to a shared registry; clients find
//! them by polling, by blocking until a condition holds, or by reacting to
//! change callbacks.
//!
//! ## Modules
//! - `model`: Bounded identifiers, service descriptors and wildcard queries.
//! - `registry`: The shared registry, its read interface and cached snapshots.
//! - `notify`: Change events, the signal-safe doorbell, blocking waits and the listener thread.
//! - `discovery`: The `ServiceDiscovery` facade.
//! - `runtime`: Edge-triggered find-service handlers on top of the facade.
//! - `config`: Capacities and failure policies, loadable from JSON.
//! - `args`: Standardized argument parsing.
//! - `error`: Error types.

pub mod args;
pub mod config;
pub mod discovery;
pub mod error;
pub mod model;
pub mod notify;
pub mod registry;
pub mod runtime;

pub use config::{DiscoveryConfig, DuplicateHandlerPolicy, FailurePolicy};
pub use discovery::ServiceDiscovery;
pub use error::{DiscoveryError, Result};
pub use model::{IdString, MessagingPattern, QueryField, ServiceContainer, ServiceDescriptor, ServiceQuery};
pub use notify::UnblockHandle;
pub use registry::{RegistrySource, SharedRegistry};
pub use runtime::{FindServiceHandle, FindServiceRuntime};

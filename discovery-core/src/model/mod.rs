//! Identifiers and queries shared by every discovery component.
//!
//! A service endpoint is named by a (service, instance, event) triple. Queries
//! select endpoints by matching each position either exactly or with a wildcard.
//!
//! # Submodules
//! - [`descriptor`]: Bounded identifiers and the descriptor triple.
//! - [`query`]: Per-field match predicates.

pub mod descriptor;
pub mod query;

pub use descriptor::{IdString, MessagingPattern, ServiceDescriptor, MAX_ID_LENGTH};
pub use query::{QueryField, ServiceQuery};

/// The materialized result of a service lookup.
pub type ServiceContainer = Vec<ServiceDescriptor>;

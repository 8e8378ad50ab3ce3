//! The service registry and the snapshots clients take of it.
//!
//! - [`shared`]: the process-wide registry providers offer services to.
//! - [`source`]: the read interface discovery clients consume.
//! - [`snapshot`]: immutable cached copies and the cache that refreshes them.

pub mod shared;
pub mod snapshot;
pub mod source;

pub use shared::{SharedRegistry, DEFAULT_REGISTRY_CAPACITY};
pub use snapshot::{Matches, ServiceEntry, ServiceRegistrySnapshot, SnapshotCache};
pub use source::RegistrySource;

use super::snapshot::ServiceEntry;
use crate::model::ServiceQuery;
use crate::notify::ChangeEvent;
use std::sync::Arc;

/// The published side of a service registry, as seen by discovery clients.
///
/// Implementations are shared between threads. [`SharedRegistry`](super::SharedRegistry)
/// is the in-process implementation; tests provide their own.
pub trait RegistrySource: Send + Sync {
    /// Monotonic counter bumped on every registry mutation.
    fn change_counter(&self) -> u64;

    /// Pulls the latest published entries.
    ///
    /// # Returns
    ///
    /// The change counter the entries correspond to, and the entries in registry order.
    fn update(&self) -> (u64, Vec<ServiceEntry>);

    /// Visits every entry matching `query` without materializing them.
    fn find_entries(&self, query: &ServiceQuery, visitor: &mut dyn FnMut(&ServiceEntry));

    /// The `REGISTRY_CHANGED` event fired after every mutation.
    fn change_event(&self) -> Arc<ChangeEvent>;
}

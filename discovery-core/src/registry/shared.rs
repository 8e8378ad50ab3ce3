//! The process-wide service registry.
//!
//! Providers offer and withdraw services here; discovery facades read it through
//! [`RegistrySource`]. It is passed around explicitly as `Arc<SharedRegistry>`.
//!
//! Every mutation, successful or redundant, bumps the change counter and fires
//! the change event, so clients can only learn that *something* changed and
//! must re-query.

use super::snapshot::ServiceEntry;
use super::source::RegistrySource;
use crate::config::DiscoveryConfig;
use crate::error::RegistryError;
use crate::model::{MessagingPattern, ServiceDescriptor, ServiceQuery};
use crate::notify::ChangeEvent;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Default number of distinct entries the registry holds.
pub const DEFAULT_REGISTRY_CAPACITY: usize = 512;

/// In-process registry of offered services.
#[derive(Debug)]
pub struct SharedRegistry {
    capacity: usize,
    entries: Mutex<Vec<ServiceEntry>>,
    change_counter: AtomicU64,
    change_event: Arc<ChangeEvent>,
}

impl SharedRegistry {
    /// Creates an empty registry.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of distinct (service, instance, event) entries.
    /// * `max_attachments` - Maximum number of waiters on the change event.
    pub fn new(capacity: usize, max_attachments: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(Vec::new()),
            change_counter: AtomicU64::new(0),
            change_event: Arc::new(ChangeEvent::new(max_attachments)),
        }
    }

    /// Creates a registry sized by `config`.
    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self::new(config.registry_capacity, config.max_attachments)
    }

    fn lock_entries(&self) -> MutexGuard<'_, Vec<ServiceEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_change(&self) {
        self.change_event.notify();
    }

    /// Offers a service.
    ///
    /// Offering an already known triple adds a provider to the existing entry
    /// instead of creating a second one.
    ///
    /// # Arguments
    ///
    /// * `descriptor` - The offered endpoint.
    /// * `pattern` - Whether a publisher or a server provides it.
    ///
    /// # Returns
    ///
    /// * `Ok(())` on success.
    /// * `Err(RegistryError::CapacityExceeded)` if a new entry does not fit.
    pub fn offer(
        &self,
        descriptor: ServiceDescriptor,
        pattern: MessagingPattern,
    ) -> Result<(), RegistryError> {
        {
            let mut entries = self.lock_entries();
            match entries.iter_mut().find(|e| e.descriptor() == &descriptor) {
                Some(entry) => {
                    entry.add_provider(pattern);
                    debug!(
                        "Registry: Added {} provider to '{}' ({} total)",
                        pattern,
                        descriptor,
                        entry.total_providers()
                    );
                }
                None => {
                    if entries.len() >= self.capacity {
                        warn!(
                            "Registry: Could not add service '{}', registry is full",
                            descriptor
                        );
                        return Err(RegistryError::CapacityExceeded {
                            capacity: self.capacity,
                        });
                    }
                    info!("Registry: Offered '{}' [{}]", descriptor, pattern);
                    entries.push(ServiceEntry::new(descriptor, pattern));
                }
            }
            // Bumped under the lock so `update()` always pairs entries with their counter.
            self.change_counter.fetch_add(1, Ordering::Release);
        }

        self.publish_change();
        Ok(())
    }

    /// Withdraws one provider of a service.
    ///
    /// The entry disappears once its last provider is gone. Withdrawing an
    /// unknown service is not an error.
    ///
    /// # Returns
    ///
    /// `true` if a provider was removed.
    pub fn stop_offer(&self, descriptor: &ServiceDescriptor, pattern: MessagingPattern) -> bool {
        let removed = {
            let mut entries = self.lock_entries();
            let removed = match entries.iter().position(|e| e.descriptor() == descriptor) {
                Some(index) => {
                    let removed = entries[index].remove_provider(pattern);
                    if entries[index].total_providers() == 0 {
                        entries.remove(index);
                        info!("Registry: Stopped offering '{}'", descriptor);
                    }
                    removed
                }
                None => {
                    debug!("Registry: Stop offer for unknown service '{}'", descriptor);
                    false
                }
            };
            self.change_counter.fetch_add(1, Ordering::Release);
            removed
        };

        self.publish_change();
        removed
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_entries().is_empty()
    }
}

impl Default for SharedRegistry {
    fn default() -> Self {
        Self::from_config(&DiscoveryConfig::default())
    }
}

impl RegistrySource for SharedRegistry {
    fn change_counter(&self) -> u64 {
        self.change_counter.load(Ordering::Acquire)
    }

    fn update(&self) -> (u64, Vec<ServiceEntry>) {
        let entries = self.lock_entries();
        let counter = self.change_counter.load(Ordering::Acquire);
        (counter, entries.clone())
    }

    fn find_entries(&self, query: &ServiceQuery, visitor: &mut dyn FnMut(&ServiceEntry)) {
        let entries = self.lock_entries();
        entries
            .iter()
            .filter(|entry| entry.matches(query))
            .for_each(|entry| visitor(entry));
    }

    fn change_event(&self) -> Arc<ChangeEvent> {
        Arc::clone(&self.change_event)
    }
}

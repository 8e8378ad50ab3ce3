//! The registry-changed event.
//!
//! A [`ChangeEvent`] fans one "the registry may have changed" signal out to every
//! attached doorbell. Waiters ([`ChangeNotifier`](super::ChangeNotifier)) and
//! background dispatchers ([`Listener`](super::Listener)) attach to it the same way.

use super::doorbell::{DoorbellRinger, RingResult};
use crate::error::{DiscoveryError, Result};
use log::{debug, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Default number of doorbells one event accepts.
pub const DEFAULT_MAX_ATTACHMENTS: usize = 64;

/// The `REGISTRY_CHANGED` event source.
#[derive(Debug)]
pub struct ChangeEvent {
    capacity: usize,
    next_id: AtomicU64,
    ringers: Mutex<Vec<(u64, DoorbellRinger)>>,
}

/// Keeps a doorbell attached to a [`ChangeEvent`]. Detaches on drop.
#[derive(Debug)]
pub struct Attachment {
    event: Arc<ChangeEvent>,
    id: u64,
}

impl ChangeEvent {
    /// Creates an event accepting at most `capacity` attachments.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            next_id: AtomicU64::new(0),
            ringers: Mutex::new(Vec::new()),
        }
    }

    /// Attaches a doorbell so that it rings on every [`notify`](Self::notify).
    ///
    /// # Arguments
    ///
    /// * `ringer` - The ringing end of the waiter's doorbell.
    ///
    /// # Returns
    ///
    /// * `Ok(Attachment)` holding the registration.
    /// * `Err(DiscoveryError::AttachmentCapacity)` when the event is full.
    pub fn attach(self: &Arc<Self>, ringer: DoorbellRinger) -> Result<Attachment> {
        let mut ringers = self.ringers.lock().unwrap_or_else(PoisonError::into_inner);
        if ringers.len() >= self.capacity {
            warn!(
                "ChangeEvent: Rejecting attachment, capacity of {} reached",
                self.capacity
            );
            return Err(DiscoveryError::AttachmentCapacity {
                capacity: self.capacity,
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        ringers.push((id, ringer));
        debug!("ChangeEvent: Attached #{} ({} total)", id, ringers.len());

        Ok(Attachment {
            event: Arc::clone(self),
            id,
        })
    }

    fn detach(&self, id: u64) {
        let mut ringers = self.ringers.lock().unwrap_or_else(PoisonError::into_inner);
        ringers.retain(|(attached, _)| *attached != id);
        debug!("ChangeEvent: Detached #{} ({} left)", id, ringers.len());
    }

    /// Rings every attached doorbell.
    pub fn notify(&self) {
        let ringers = self.ringers.lock().unwrap_or_else(PoisonError::into_inner);
        for (id, ringer) in ringers.iter() {
            if ringer.ring() == RingResult::Closed {
                debug!("ChangeEvent: Doorbell #{} is closed", id);
            }
        }
    }

    /// Number of currently attached doorbells.
    pub fn attached(&self) -> usize {
        self.ringers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for ChangeEvent {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTACHMENTS)
    }
}

impl Drop for Attachment {
    fn drop(&mut self) {
        self.event.detach(self.id);
    }
}

//! Blocking wait for registry changes with a one-way unblock valve.
//!
//! A [`ChangeNotifier`] is either *armed* (waiting allowed) or *unblocked*.
//! Unblocking is terminal: once set, every current and future wait returns
//! immediately and there is no way to re-arm the notifier.

use super::doorbell::{Doorbell, DoorbellRinger};
use super::event::{Attachment, ChangeEvent};
use crate::error::Result;
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Back-off used when the doorbell itself reports an error, so callers
/// looping on [`ChangeNotifier::wait_until_change`] do not spin.
const DEGRADED_WAIT: Duration = Duration::from_millis(10);

/// Sets the unblock flag of one notifier from any context.
///
/// [`unblock`](Self::unblock) performs an atomic store and one non-blocking
/// `send(2)`. It takes no lock, which makes it callable from a signal handler.
#[derive(Debug, Clone)]
pub struct UnblockHandle {
    unblocked: Arc<AtomicBool>,
    ringer: DoorbellRinger,
}

impl UnblockHandle {
    /// Moves the notifier to the unblocked state and wakes its waiter.
    pub fn unblock(&self) {
        self.unblocked.store(true, Ordering::Release);
        let _ = self.ringer.ring();
    }

    pub fn is_unblocked(&self) -> bool {
        self.unblocked.load(Ordering::Acquire)
    }
}

/// Waits for `REGISTRY_CHANGED` notifications.
#[derive(Debug)]
pub struct ChangeNotifier {
    doorbell: Doorbell,
    unblock: UnblockHandle,
    _attachment: Attachment,
}

impl ChangeNotifier {
    /// Creates an armed notifier attached to `event`.
    ///
    /// # Arguments
    ///
    /// * `event` - The registry's change event.
    ///
    /// # Returns
    ///
    /// * `Ok(ChangeNotifier)` on success.
    /// * `Err` if the doorbell cannot be created or the event is full.
    pub fn new(event: &Arc<ChangeEvent>) -> Result<Self> {
        let (doorbell, ringer) = Doorbell::new()?;
        let attachment = event.attach(ringer.clone())?;

        Ok(Self {
            doorbell,
            unblock: UnblockHandle {
                unblocked: Arc::new(AtomicBool::new(false)),
                ringer,
            },
            _attachment: attachment,
        })
    }

    /// True while the notifier is armed.
    pub fn is_blocking(&self) -> bool {
        !self.unblock.is_unblocked()
    }

    /// Blocks until a change notification arrives or the notifier is unblocked.
    ///
    /// Spurious wakeups are possible: returning does not guarantee that the
    /// registry changed, only that it may have.
    pub fn wait_until_change(&self) {
        if !self.is_blocking() {
            return;
        }

        if let Err(e) = self.doorbell.wait(None) {
            warn!("Notifier: Doorbell wait failed: {}", e);
            thread::sleep(DEGRADED_WAIT);
        }
        self.relay_unblock();
    }

    /// One ring wakes one waiter. Once unblocked, every woken waiter rings
    /// again so other threads blocked on this notifier wake up too.
    fn relay_unblock(&self) {
        if !self.is_blocking() {
            let _ = self.unblock.ringer.ring();
        }
    }

    /// Like [`wait_until_change`](Self::wait_until_change) but gives up after `timeout`.
    ///
    /// # Returns
    ///
    /// * `true` if woken by a notification or by unblocking.
    /// * `false` if the timeout elapsed.
    pub fn wait_until_change_timeout(&self, timeout: Duration) -> bool {
        if !self.is_blocking() {
            return true;
        }

        match self.doorbell.wait(Some(timeout)) {
            Ok(woken) => {
                self.relay_unblock();
                woken
            }
            Err(e) => {
                warn!("Notifier: Doorbell wait failed: {}", e);
                thread::sleep(DEGRADED_WAIT.min(timeout));
                false
            }
        }
    }

    /// Unblocks the notifier for good.
    pub fn unblock_wait(&self) {
        debug!("Notifier: Unblocking waiters");
        self.unblock.unblock();
    }

    /// A handle that can unblock this notifier from another thread or a signal handler.
    pub fn unblock_handle(&self) -> UnblockHandle {
        self.unblock.clone()
    }
}

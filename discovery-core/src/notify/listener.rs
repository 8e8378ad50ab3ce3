//! Background dispatcher for change notifications.
//!
//! A [`Listener`] owns one named thread that sleeps on its own doorbell and
//! invokes a callback after every wakeup. Invocations never overlap and run in
//! arrival order; notifications that arrive during an invocation coalesce into
//! the next one.

use super::doorbell::{Doorbell, DoorbellRinger};
use super::event::{Attachment, ChangeEvent};
use crate::error::{DiscoveryError, Result};
use log::{debug, error, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// A running notification thread. Stops and joins on drop.
pub struct Listener {
    name: String,
    stop: Arc<AtomicBool>,
    ringer: DoorbellRinger,
    thread: Option<JoinHandle<()>>,
    _attachment: Attachment,
}

impl Listener {
    /// Starts a listener thread attached to `event`.
    ///
    /// # Arguments
    ///
    /// * `name` - The thread name (shows up in logs and debuggers).
    /// * `event` - The change event to listen to.
    /// * `callback` - Invoked once per wakeup. Return `false` to stop listening.
    ///
    /// # Returns
    ///
    /// * `Ok(Listener)` once the thread is running.
    /// * `Err` if the doorbell, the attachment or the thread cannot be created.
    pub fn spawn<F>(name: &str, event: &Arc<ChangeEvent>, mut callback: F) -> Result<Self>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let (doorbell, ringer) = Doorbell::new()?;
        let attachment = event.attach(ringer.clone())?;
        let stop = Arc::new(AtomicBool::new(false));

        let thread_stop = Arc::clone(&stop);
        let thread_name = name.to_string();
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                debug!("Listener: '{}' started", thread_name);
                run_loop(&doorbell, &thread_stop, &mut callback);
                debug!("Listener: '{}' stopped", thread_name);
            })
            .map_err(|source| DiscoveryError::Spawn {
                name: name.to_string(),
                source,
            })?;

        info!("Listener: Spawned '{}'", name);
        Ok(Self {
            name: name.to_string(),
            stop,
            ringer,
            thread: Some(thread),
            _attachment: attachment,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True while the listener thread is still running.
    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}

fn run_loop<F>(doorbell: &Doorbell, stop: &AtomicBool, callback: &mut F)
where
    F: FnMut() -> bool,
{
    loop {
        if let Err(e) = doorbell.wait(None) {
            error!("Listener: Doorbell wait failed, stopping: {}", e);
            return;
        }

        if stop.load(Ordering::Acquire) {
            return;
        }

        if !callback() {
            return;
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        let _ = self.ringer.ring();

        if let Some(handle) = self.thread.take() {
            // Dropped from inside the callback: the thread sees the stop flag
            // once the callback returns, it cannot join itself.
            if handle.thread().id() == thread::current().id() {
                return;
            }

            if handle.join().is_err() {
                error!("Listener: '{}' panicked", self.name);
            }
        }
    }
}

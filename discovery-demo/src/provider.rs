//! Background provider that keeps the demo registry busy.
//!
//! Offers a fixed set of radar services, then toggles the front-left camera on
//! and off every cycle so that waiters and handlers have something to observe.

use anyhow::Result;
use discovery_core::{MessagingPattern, ServiceDescriptor, SharedRegistry};
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const PUB_SUB: MessagingPattern = MessagingPattern::PublishSubscribe;

/// Services that stay offered for the whole run.
const STATIC_SERVICES: &[(&str, &str, &str, MessagingPattern)] = &[
    ("Radar", "FrontLeft", "Object", PUB_SUB),
    ("Radar", "FrontRight", "Object", PUB_SUB),
    ("Radar", "Rear", "Config", MessagingPattern::RequestResponse),
];

/// Runs the provider loop on its own thread. Stops and withdraws everything on drop.
pub struct Provider {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Provider {
    /// Starts offering services into `registry`.
    ///
    /// # Arguments
    ///
    /// * `registry` - The registry to offer into.
    /// * `initial_delay` - Time before the first offer, so waiters start empty.
    /// * `period` - Time between two camera toggles.
    pub fn start(
        registry: Arc<SharedRegistry>,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let thread = thread::Builder::new()
            .name("demo-provider".to_string())
            .spawn(move || {
                if let Err(e) = run(&registry, &thread_stop, initial_delay, period) {
                    warn!("Provider: Stopped with error: {}", e);
                }
            })?;

        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }
}

impl Drop for Provider {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

/// Sleeps in short steps so a stop request is noticed quickly.
/// Returns `false` if a stop was requested.
fn pause(stop: &AtomicBool, duration: Duration) -> bool {
    let step = Duration::from_millis(20);
    let mut slept = Duration::ZERO;
    while slept < duration {
        if stop.load(Ordering::Acquire) {
            return false;
        }
        thread::sleep(step);
        slept += step;
    }
    !stop.load(Ordering::Acquire)
}

fn run(
    registry: &SharedRegistry,
    stop: &AtomicBool,
    initial_delay: Duration,
    period: Duration,
) -> Result<()> {
    if !pause(stop, initial_delay) {
        return Ok(());
    }

    let mut offered = Vec::new();
    for (service, instance, event, pattern) in STATIC_SERVICES {
        let descriptor = ServiceDescriptor::new(service, instance, event)?;
        registry.offer(descriptor.clone(), *pattern)?;
        offered.push((descriptor, *pattern));
    }

    let camera = ServiceDescriptor::new("Camera", "FrontLeft", "Image")?;
    let mut camera_offered = false;
    while pause(stop, period) {
        if camera_offered {
            registry.stop_offer(&camera, PUB_SUB);
            info!("Provider: Camera withdrawn");
        } else {
            registry.offer(camera.clone(), PUB_SUB)?;
            info!("Provider: Camera offered");
        }
        camera_offered = !camera_offered;
    }

    if camera_offered {
        registry.stop_offer(&camera, PUB_SUB);
    }
    for (descriptor, pattern) in offered {
        registry.stop_offer(&descriptor, pattern);
    }
    info!("Provider: All services withdrawn");
    Ok(())
}

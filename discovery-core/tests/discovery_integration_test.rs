use anyhow::Result;
use discovery_core::notify::ChangeEvent;
use discovery_core::registry::ServiceEntry;
use discovery_core::{
    DiscoveryConfig, DiscoveryError, MessagingPattern, RegistrySource, ServiceDescriptor,
    ServiceDiscovery, ServiceQuery, SharedRegistry,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const PUB_SUB: MessagingPattern = MessagingPattern::PublishSubscribe;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A registry that only publishes what the test pushes into it.
struct ScriptedSource {
    counter: AtomicU64,
    entries: Mutex<Vec<ServiceEntry>>,
    event: Arc<ChangeEvent>,
}

impl ScriptedSource {
    fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
            entries: Mutex::new(Vec::new()),
            event: Arc::new(ChangeEvent::new(4)),
        }
    }

    fn publish(&self, entries: Vec<ServiceEntry>) {
        *self.entries.lock().unwrap() = entries;
        self.counter.fetch_add(1, Ordering::Release);
        self.event.notify();
    }

    /// Fires the event without changing anything.
    fn spurious_wakeup(&self) {
        self.event.notify();
    }
}

impl RegistrySource for ScriptedSource {
    fn change_counter(&self) -> u64 {
        self.counter.load(Ordering::Acquire)
    }

    fn update(&self) -> (u64, Vec<ServiceEntry>) {
        let entries = self.entries.lock().unwrap();
        (self.counter.load(Ordering::Acquire), entries.clone())
    }

    fn find_entries(&self, query: &ServiceQuery, visitor: &mut dyn FnMut(&ServiceEntry)) {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|entry| entry.matches(query))
            .for_each(|entry| visitor(entry));
    }

    fn change_event(&self) -> Arc<ChangeEvent> {
        Arc::clone(&self.event)
    }
}

#[test]
fn test_camera_appears_while_waiting() -> Result<()> {
    init_logger();
    let registry = Arc::new(SharedRegistry::default());
    let discovery = ServiceDiscovery::new(registry.clone())?;
    let camera = ServiceQuery::parse("Camera", "FrontLeft", "Image")?;
    assert!(discovery.find_service(&camera).is_empty());

    let provider = {
        let registry = Arc::clone(&registry);
        thread::spawn(move || -> Result<()> {
            thread::sleep(Duration::from_millis(50));
            registry.offer(ServiceDescriptor::new("Radar", "FrontLeft", "Object")?, PUB_SUB)?;
            thread::sleep(Duration::from_millis(50));
            registry.offer(ServiceDescriptor::new("Camera", "FrontLeft", "Image")?, PUB_SUB)?;
            Ok(())
        })
    };

    assert!(discovery.wait_until(|| !discovery.find_service(&camera).is_empty()));
    assert_eq!(discovery.find_service(&camera).len(), 1);
    provider.join().expect("provider thread panicked")?;
    Ok(())
}

#[test]
fn test_unblock_from_another_thread_ends_wait() -> Result<()> {
    init_logger();
    let registry = Arc::new(SharedRegistry::default());
    let discovery = ServiceDiscovery::new(registry)?;
    let lidar = ServiceQuery::parse("Lidar", "*", "*")?;
    let handle = discovery.unblock_handle();

    let unblocker = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        handle.unblock();
    });

    assert!(!discovery.wait_until(|| !discovery.find_service(&lidar).is_empty()));
    assert!(!discovery.is_blocking());
    unblocker.join().expect("unblocker thread panicked");

    // The valve never closes again.
    let start = Instant::now();
    discovery.wait_until_change();
    assert!(!discovery.wait_until(|| false));
    assert!(start.elapsed() < Duration::from_secs(1));
    Ok(())
}

#[test]
fn test_clones_share_one_facade() -> Result<()> {
    let registry = Arc::new(SharedRegistry::default());
    let discovery = ServiceDiscovery::new(registry.clone())?;
    let clone = discovery.clone();

    registry.offer(ServiceDescriptor::new("Radar", "Rear", "Object")?, PUB_SUB)?;
    assert_eq!(clone.find_service(&ServiceQuery::all()).len(), 1);
    assert_eq!(discovery.generation(), clone.generation());

    clone.unblock_wait();
    assert!(!discovery.is_blocking());
    Ok(())
}

#[test]
fn test_callback_observes_offer_and_stop_offer() -> Result<()> {
    init_logger();
    let registry = Arc::new(SharedRegistry::default());
    let discovery = ServiceDiscovery::new(registry.clone())?;
    let (tx, rx) = mpsc::channel();

    let radar = ServiceQuery::parse("Radar", "*", "*")?;
    discovery.register_callback(move |discovery| {
        let _ = tx.send(discovery.find_service(&radar).len());
    })?;

    let descriptor = ServiceDescriptor::new("Radar", "FrontRight", "Object")?;
    registry.offer(descriptor.clone(), PUB_SUB)?;
    let deadline = Instant::now() + Duration::from_secs(5);
    while rx.recv_timeout(Duration::from_secs(5))? != 1 {
        assert!(Instant::now() < deadline);
    }

    registry.stop_offer(&descriptor, PUB_SUB);
    while rx.recv_timeout(Duration::from_secs(5))? != 0 {
        assert!(Instant::now() < deadline);
    }

    discovery.deregister_callback();
    assert!(!discovery.has_callback());
    Ok(())
}

#[test]
fn test_pattern_filter_distinguishes_servers() -> Result<()> {
    let registry = Arc::new(SharedRegistry::default());
    let discovery = ServiceDiscovery::new(registry.clone())?;

    registry.offer(ServiceDescriptor::new("Radar", "Rear", "Object")?, PUB_SUB)?;
    registry.offer(
        ServiceDescriptor::new("Radar", "Rear", "Config")?,
        MessagingPattern::RequestResponse,
    )?;

    let servers = ServiceQuery::parse("Radar", "*", "*")?.with_pattern(MessagingPattern::RequestResponse);
    let found = discovery.find_service(&servers);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].event().as_str(), "Config");
    assert_eq!(discovery.find_service(&ServiceQuery::parse("Radar", "*", "*")?).len(), 2);
    Ok(())
}

#[test]
fn test_spurious_wakeup_keeps_generation() -> Result<()> {
    let source = Arc::new(ScriptedSource::new());
    let discovery = ServiceDiscovery::new(source.clone())?;

    source.publish(vec![ServiceEntry::new(
        ServiceDescriptor::new("Camera", "FrontLeft", "Image")?,
        PUB_SUB,
    )]);
    assert!(discovery.wait_until_change_timeout(Duration::from_secs(1)));
    assert!(discovery.update());
    let generation = discovery.generation();

    source.spurious_wakeup();
    assert!(discovery.wait_until_change_timeout(Duration::from_secs(1)));
    assert!(!discovery.update());
    assert_eq!(discovery.generation(), generation);
    assert_eq!(discovery.find_service(&ServiceQuery::all()).len(), 1);
    Ok(())
}

#[test]
fn test_attachment_failure_propagates() -> Result<()> {
    let config = DiscoveryConfig {
        max_attachments: 1,
        ..DiscoveryConfig::default()
    };
    let registry = Arc::new(SharedRegistry::from_config(&config));
    let discovery = ServiceDiscovery::with_config(registry.clone(), config.clone())?;

    // The first facade took the only slot.
    let second = ServiceDiscovery::with_config(registry, config);
    assert!(matches!(second, Err(DiscoveryError::AttachmentCapacity { capacity: 1 })));

    let callback = discovery.register_callback(|_| {});
    assert!(matches!(callback, Err(DiscoveryError::AttachmentCapacity { .. })));
    assert!(!discovery.has_callback());
    Ok(())
}

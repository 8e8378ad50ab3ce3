//! Edge-triggered find-service handlers.
//!
//! A [`FindServiceRuntime`] occupies the facade's callback slot and fans every
//! change notification out to any number of handlers. Each handler watches one
//! (service, instance) pair and remembers how many matches it saw last time; it
//! is only invoked when that number changes.

use crate::config::{DiscoveryConfig, DuplicateHandlerPolicy};
use crate::discovery::ServiceDiscovery;
use crate::error::{DiscoveryError, Result};
use crate::model::{IdString, QueryField, ServiceContainer, ServiceQuery};
use log::{debug, info, warn};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError, Weak};

/// Default number of handlers one runtime holds.
pub const DEFAULT_MAX_FIND_SERVICE_HANDLERS: usize = 50;

type FindServiceHandler = Box<dyn FnMut(&ServiceContainer, FindServiceHandle) + Send>;

/// Identifies one outstanding [`FindServiceRuntime::start_find_service`] call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FindServiceHandle {
    id: u64,
    service: IdString,
    instance: QueryField,
}

impl FindServiceHandle {
    pub fn service(&self) -> &IdString {
        &self.service
    }

    pub fn instance(&self) -> &QueryField {
        &self.instance
    }
}

impl fmt::Display for FindServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}/{}", self.id, self.service, self.instance)
    }
}

struct HandlerRecord {
    handle: FindServiceHandle,
    query: ServiceQuery,
    /// `None` until the record has been evaluated once.
    last_count: Option<usize>,
    handler: Arc<Mutex<FindServiceHandler>>,
}

#[derive(Default)]
struct HandlerTable {
    records: Vec<HandlerRecord>,
    next_id: u64,
}

struct Shared {
    discovery: ServiceDiscovery,
    duplicates: DuplicateHandlerPolicy,
    capacity: usize,
    table: Mutex<HandlerTable>,
    poll_lock: Mutex<()>,
    poll_pending: AtomicBool,
}

impl Shared {
    fn lock_table(&self) -> MutexGuard<'_, HandlerTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_active(&self, handle: &FindServiceHandle) -> bool {
        self.lock_table()
            .records
            .iter()
            .any(|record| record.handle.id == handle.id)
    }

    /// Requests an evaluation round. A round already running on another thread
    /// (or further up this thread's stack) picks the request up instead.
    fn poll(&self) {
        self.poll_pending.store(true, Ordering::SeqCst);

        while self.poll_pending.load(Ordering::SeqCst) {
            let _guard = match self.poll_lock.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::WouldBlock) => return,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            };
            if !self.poll_pending.swap(false, Ordering::SeqCst) {
                break;
            }
            self.evaluate();
        }
    }

    fn evaluate(&self) {
        self.discovery.update();
        let snapshot = self.discovery.snapshot();

        let mut due = Vec::new();
        {
            let mut table = self.lock_table();
            for record in table.records.iter_mut() {
                let found: ServiceContainer = snapshot.find(&record.query).cloned().collect();
                let count = found.len();
                let fire = match record.last_count {
                    None => count > 0,
                    Some(last) => last != count,
                };
                record.last_count = Some(count);

                if fire {
                    debug!(
                        "FindService: {} now has {} match(es)",
                        record.handle, count
                    );
                    due.push((
                        Arc::clone(&record.handler),
                        found,
                        record.handle.clone(),
                    ));
                }
            }
        }

        // Handlers run without the table lock so they can start or stop searches.
        for (handler, found, handle) in due {
            if !self.is_active(&handle) {
                continue;
            }
            let mut handler = handler.lock().unwrap_or_else(PoisonError::into_inner);
            (&mut **handler)(&found, handle);
        }
    }
}

/// Multi-handler find-service dispatcher built on a [`ServiceDiscovery`] callback.
///
/// Dropping the runtime deregisters the facade callback.
pub struct FindServiceRuntime {
    shared: Arc<Shared>,
}

impl FindServiceRuntime {
    /// Creates the runtime and registers it as `discovery`'s callback.
    ///
    /// # Arguments
    ///
    /// * `discovery` - The facade to attach to. Its callback slot must be free.
    /// * `config` - Supplies the duplicate handler policy and the handler limit.
    ///
    /// # Returns
    ///
    /// * `Ok(FindServiceRuntime)` once the callback is registered.
    /// * `Err(DiscoveryError::CallbackAlreadyRegistered)` if the slot is taken,
    ///   or any other registration error.
    pub fn new(discovery: ServiceDiscovery, config: &DiscoveryConfig) -> Result<Self> {
        let shared = Arc::new(Shared {
            discovery: discovery.clone(),
            duplicates: config.duplicate_handlers,
            capacity: config.max_find_service_handlers,
            table: Mutex::new(HandlerTable::default()),
            poll_lock: Mutex::new(()),
            poll_pending: AtomicBool::new(false),
        });

        let weak: Weak<Shared> = Arc::downgrade(&shared);
        discovery.register_callback(move |_| {
            if let Some(shared) = weak.upgrade() {
                shared.poll();
            }
        })?;

        info!("FindService: Runtime attached to discovery callback");
        Ok(Self { shared })
    }

    /// Starts watching a (service, instance) pair.
    ///
    /// The handler receives the full match set every time the number of
    /// matches changes. If matches already exist it fires right away, so a
    /// late start does not miss services offered earlier.
    ///
    /// # Threads
    ///
    /// That first invocation usually runs on the calling thread, before this
    /// returns. Later ones run on the facade's listener thread. Do not hold a
    /// lock the handler needs while calling this.
    ///
    /// # Duplicates
    ///
    /// Starting a pair that is already watched follows the configured
    /// [`DuplicateHandlerPolicy`]. With `Reuse` the existing handle is returned,
    /// `handler` is dropped and nothing is invoked.
    ///
    /// # Arguments
    ///
    /// * `service` - The service to look for.
    /// * `instance` - An exact instance or [`QueryField::Wildcard`].
    /// * `handler` - Called with the current matches and the search's handle.
    ///
    /// # Returns
    ///
    /// * `Ok(FindServiceHandle)` identifying the search.
    /// * `Err(DiscoveryError::DuplicateFindService)` if the pair is already
    ///   watched and the config rejects duplicates.
    /// * `Err(DiscoveryError::FindServiceCapacity)` if the handler limit is
    ///   reached. The handler is not invoked.
    pub fn start_find_service<F>(
        &self,
        service: IdString,
        instance: QueryField,
        handler: F,
    ) -> Result<FindServiceHandle>
    where
        F: FnMut(&ServiceContainer, FindServiceHandle) + Send + 'static,
    {
        let handle = {
            let mut table = self.shared.lock_table();

            let existing = table
                .records
                .iter()
                .find(|r| r.handle.service == service && r.handle.instance == instance)
                .map(|r| r.handle.clone());
            if let Some(existing) = existing {
                match self.shared.duplicates {
                    DuplicateHandlerPolicy::Reuse => {
                        debug!("FindService: Reusing {}", existing);
                        return Ok(existing);
                    }
                    DuplicateHandlerPolicy::Reject => {
                        warn!(
                            "FindService: Rejected duplicate search for '{}/{}'",
                            service, instance
                        );
                        return Err(DiscoveryError::DuplicateFindService {
                            service: service.to_string(),
                            instance: instance.to_string(),
                        });
                    }
                    DuplicateHandlerPolicy::Allow => {}
                }
            }

            if table.records.len() >= self.shared.capacity {
                warn!(
                    "FindService: Could not start search for '{}/{}', {} handlers registered",
                    service, instance, self.shared.capacity
                );
                return Err(DiscoveryError::FindServiceCapacity {
                    capacity: self.shared.capacity,
                });
            }

            table.next_id += 1;
            let handle = FindServiceHandle {
                id: table.next_id,
                service: service.clone(),
                instance: instance.clone(),
            };
            let query = ServiceQuery::new(QueryField::Exact(service), instance, QueryField::Wildcard);
            table.records.push(HandlerRecord {
                handle: handle.clone(),
                query,
                last_count: None,
                handler: Arc::new(Mutex::new(Box::new(handler))),
            });
            handle
        };

        info!("FindService: Started {}", handle);
        self.shared.poll();
        Ok(handle)
    }

    /// Stops a search. The handler is not invoked again once this returns,
    /// unless it is running right now on another thread.
    ///
    /// # Returns
    ///
    /// `false` if the handle was unknown or already stopped.
    pub fn stop_find_service(&self, handle: &FindServiceHandle) -> bool {
        let mut table = self.shared.lock_table();
        let before = table.records.len();
        table.records.retain(|record| record.handle.id != handle.id);
        let removed = table.records.len() != before;
        if removed {
            info!("FindService: Stopped {}", handle);
        }
        removed
    }

    /// Evaluates every search against a fresh snapshot.
    ///
    /// The background callback calls this after every change. If a round is
    /// already running, that round performs the evaluation and this returns
    /// immediately.
    pub fn poll(&self) {
        self.shared.poll();
    }

    /// Number of active searches.
    pub fn len(&self) -> usize {
        self.shared.lock_table().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn discovery(&self) -> &ServiceDiscovery {
        &self.shared.discovery
    }
}

impl Drop for FindServiceRuntime {
    fn drop(&mut self) {
        self.shared.discovery.deregister_callback();
        debug!("FindService: Runtime detached");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MessagingPattern, ServiceDescriptor};
    use crate::registry::SharedRegistry;
    use std::sync::mpsc::{self, Receiver};
    use std::time::Duration;

    const PUB_SUB: MessagingPattern = MessagingPattern::PublishSubscribe;
    const TIMEOUT: Duration = Duration::from_secs(5);
    const QUIET: Duration = Duration::from_millis(100);

    fn setup(config: DiscoveryConfig) -> (Arc<SharedRegistry>, FindServiceRuntime) {
        let registry = Arc::new(SharedRegistry::from_config(&config));
        let discovery = ServiceDiscovery::with_config(registry.clone(), config.clone()).unwrap();
        let runtime = FindServiceRuntime::new(discovery, &config).unwrap();
        (registry, runtime)
    }

    fn descriptor(s: &str, i: &str, e: &str) -> ServiceDescriptor {
        ServiceDescriptor::new(s, i, e).unwrap()
    }

    fn id(value: &str) -> IdString {
        IdString::new(value).unwrap()
    }

    fn counting_search(
        runtime: &FindServiceRuntime,
        service: &str,
    ) -> (FindServiceHandle, Receiver<usize>) {
        let (tx, rx) = mpsc::channel();
        let handle = runtime
            .start_find_service(id(service), QueryField::Wildcard, move |found, _| {
                let _ = tx.send(found.len());
            })
            .unwrap();
        (handle, rx)
    }

    #[test]
    fn test_handler_fires_on_every_count_change() {
        let (registry, runtime) = setup(DiscoveryConfig::default());
        let (_handle, rx) = counting_search(&runtime, "service1");
        let service = descriptor("service1", "instance1", "event1");

        registry.offer(service.clone(), PUB_SUB).unwrap();
        assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), 1);

        registry.stop_offer(&service, PUB_SUB);
        assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), 0);

        registry.offer(service, PUB_SUB).unwrap();
        assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), 1);
    }

    #[test]
    fn test_both_handlers_fire_once_then_stay_quiet() {
        let config = DiscoveryConfig {
            duplicate_handlers: DuplicateHandlerPolicy::Allow,
            ..DiscoveryConfig::default()
        };
        let (registry, runtime) = setup(config);
        let (_first, first_rx) = counting_search(&runtime, "service1");
        let (_second, second_rx) = counting_search(&runtime, "service1");
        let (_probe, probe_rx) = counting_search(&runtime, "service2");

        registry
            .offer(descriptor("service1", "instance1", "event1"), PUB_SUB)
            .unwrap();
        assert_eq!(first_rx.recv_timeout(TIMEOUT).unwrap(), 1);
        assert_eq!(second_rx.recv_timeout(TIMEOUT).unwrap(), 1);

        // The probe fires in the same round that re-evaluates the first two.
        registry
            .offer(descriptor("service2", "instance1", "event1"), PUB_SUB)
            .unwrap();
        assert_eq!(probe_rx.recv_timeout(TIMEOUT).unwrap(), 1);

        assert!(first_rx.try_recv().is_err());
        assert!(second_rx.try_recv().is_err());
    }

    #[test]
    fn test_late_start_sees_existing_services() {
        let (registry, runtime) = setup(DiscoveryConfig::default());
        registry
            .offer(descriptor("service1", "instance1", "event1"), PUB_SUB)
            .unwrap();
        registry
            .offer(descriptor("service2", "instance1", "event1"), PUB_SUB)
            .unwrap();

        let (tx, rx) = mpsc::channel();
        let handle = runtime
            .start_find_service(id("service1"), QueryField::Wildcard, move |found, handle| {
                let _ = tx.send((found.clone(), handle));
            })
            .unwrap();

        let (found, reported) = rx.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(found, vec![descriptor("service1", "instance1", "event1")]);
        assert_eq!(reported, handle);
    }

    #[test]
    fn test_no_match_on_first_check_does_not_fire() {
        let (_registry, runtime) = setup(DiscoveryConfig::default());
        let (_handle, rx) = counting_search(&runtime, "service1");
        runtime.poll();
        assert!(rx.recv_timeout(QUIET).is_err());
    }

    #[test]
    fn test_stopped_search_never_fires() {
        let (registry, runtime) = setup(DiscoveryConfig::default());
        let (handle, rx) = counting_search(&runtime, "service1");

        assert!(runtime.stop_find_service(&handle));
        assert!(!runtime.stop_find_service(&handle));
        assert!(runtime.is_empty());

        registry
            .offer(descriptor("service1", "instance1", "event1"), PUB_SUB)
            .unwrap();
        runtime.poll();
        assert!(rx.recv_timeout(QUIET).is_err());
    }

    #[test]
    fn test_stop_from_inside_handler() {
        let (registry, runtime) = setup(DiscoveryConfig::default());
        let runtime = Arc::new(runtime);
        let (tx, rx) = mpsc::channel();

        let inner = Arc::downgrade(&runtime);
        runtime
            .start_find_service(id("service1"), QueryField::Wildcard, move |found, handle| {
                if !found.is_empty() {
                    if let Some(runtime) = inner.upgrade() {
                        let _ = tx.send(runtime.stop_find_service(&handle));
                    }
                }
            })
            .unwrap();

        registry
            .offer(descriptor("service1", "instance1", "event1"), PUB_SUB)
            .unwrap();
        assert!(rx.recv_timeout(TIMEOUT).unwrap());
        assert!(runtime.is_empty());
    }

    #[test]
    fn test_duplicate_pair_reuses_existing_search() {
        let (registry, runtime) = setup(DiscoveryConfig::default());
        registry
            .offer(descriptor("service1", "instance1", "event1"), PUB_SUB)
            .unwrap();
        let (first, rx) = counting_search(&runtime, "service1");
        assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), 1);

        let (tx, second_rx) = mpsc::channel();
        let second = runtime
            .start_find_service(id("service1"), QueryField::Wildcard, move |found, _| {
                let _ = tx.send(found.len());
            })
            .unwrap();

        assert_eq!(second, first);
        assert_eq!(runtime.len(), 1);
        runtime.poll();
        assert!(second_rx.recv_timeout(QUIET).is_err());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_duplicate_pairs_allowed_by_policy() {
        let config = DiscoveryConfig {
            duplicate_handlers: DuplicateHandlerPolicy::Allow,
            ..DiscoveryConfig::default()
        };
        let (_registry, runtime) = setup(config);
        let first = runtime
            .start_find_service(id("service1"), QueryField::Wildcard, |_, _| {})
            .unwrap();
        let second = runtime
            .start_find_service(id("service1"), QueryField::Wildcard, |_, _| {})
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(runtime.len(), 2);
    }

    #[test]
    fn test_duplicate_pairs_rejected_by_policy() {
        let config = DiscoveryConfig {
            duplicate_handlers: DuplicateHandlerPolicy::Reject,
            ..DiscoveryConfig::default()
        };
        let (_registry, runtime) = setup(config);
        runtime
            .start_find_service(id("service1"), QueryField::Wildcard, |_, _| {})
            .unwrap();

        let err = runtime
            .start_find_service(id("service1"), QueryField::Wildcard, |_, _| {})
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::DuplicateFindService { .. }));

        // A different instance is a different key.
        assert!(runtime
            .start_find_service(id("service1"), QueryField::Exact(id("instance1")), |_, _| {})
            .is_ok());
    }

    #[test]
    fn test_handler_limit_rejects_without_invoking() {
        let config = DiscoveryConfig {
            max_find_service_handlers: 3,
            ..DiscoveryConfig::default()
        };
        let (registry, runtime) = setup(config);
        registry
            .offer(descriptor("service_max", "instance1", "event1"), PUB_SUB)
            .unwrap();

        let handles: Vec<_> = (0..3)
            .map(|i| {
                runtime
                    .start_find_service(id(&format!("service{}", i)), QueryField::Wildcard, |_, _| {})
                    .unwrap()
            })
            .collect();

        let (tx, rx) = mpsc::channel();
        let err = runtime
            .start_find_service(id("service_max"), QueryField::Wildcard, move |found, _| {
                let _ = tx.send(found.len());
            })
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::FindServiceCapacity { capacity: 3 }));
        assert_eq!(runtime.len(), 3);
        assert!(rx.recv_timeout(QUIET).is_err());

        // A stopped search frees its slot.
        assert!(runtime.stop_find_service(&handles[0]));
        assert!(runtime
            .start_find_service(id("service_max"), QueryField::Wildcard, |_, _| {})
            .is_ok());
    }

    #[test]
    fn test_runtime_needs_free_callback_slot() {
        let registry = Arc::new(SharedRegistry::default());
        let discovery = ServiceDiscovery::new(registry).unwrap();
        discovery.register_callback(|_| {}).unwrap();

        let result = FindServiceRuntime::new(discovery, &DiscoveryConfig::default());
        assert!(matches!(
            result,
            Err(DiscoveryError::CallbackAlreadyRegistered)
        ));
    }

    #[test]
    fn test_drop_releases_callback_slot() {
        let (_registry, runtime) = setup(DiscoveryConfig::default());
        let discovery = runtime.discovery().clone();
        assert!(discovery.has_callback());

        drop(runtime);
        assert!(!discovery.has_callback());
    }
}

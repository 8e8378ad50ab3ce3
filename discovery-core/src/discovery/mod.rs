//! # Service Discovery
//!
//! The process-local view of the shared service registry. [`ServiceDiscovery`]
//! composes a snapshot cache, a change notifier and an optional callback
//! listener into three usage patterns:
//!
//! 1. **Polling**: [`ServiceDiscovery::find_service`] refreshes the cache and
//!    returns the matching descriptors.
//! 2. **Blocking**: [`ServiceDiscovery::wait_until`] re-evaluates a condition
//!    after every change notification until it holds or the facade is unblocked.
//! 3. **Callback**: [`ServiceDiscovery::register_callback`] runs a closure on a
//!    background thread after every change. The closure receives the facade and
//!    re-queries; it is never handed a diff.
//!
//! ## Races
//! A `true` from `wait_until` only says the condition held when it was
//! evaluated. The registry is shared with other processes and may have changed
//! again by the time the caller looks.

use crate::config::DiscoveryConfig;
use crate::error::Result;
use crate::model::{ServiceContainer, ServiceDescriptor, ServiceQuery};
use crate::notify::{ChangeNotifier, Listener, UnblockHandle};
use crate::registry::{RegistrySource, ServiceRegistrySnapshot, SnapshotCache};
use log::{debug, info, warn};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;

type DiscoveryCallback = Box<dyn FnMut(&ServiceDiscovery) + Send>;

struct Inner {
    source: Arc<dyn RegistrySource>,
    cache: RwLock<SnapshotCache>,
    notifier: ChangeNotifier,
    callback: Mutex<Option<Listener>>,
    config: DiscoveryConfig,
}

/// Handle to a discovery facade.
///
/// Cloning yields another handle to the same facade: clones share the cache,
/// the notifier and the callback slot.
#[derive(Clone)]
pub struct ServiceDiscovery {
    inner: Arc<Inner>,
}

impl ServiceDiscovery {
    /// Creates a facade over `source` with the default configuration.
    pub fn new(source: Arc<dyn RegistrySource>) -> Result<Self> {
        Self::with_config(source, DiscoveryConfig::default())
    }

    /// Creates a facade over `source`.
    ///
    /// # Arguments
    ///
    /// * `source` - The registry to read (usually an `Arc<SharedRegistry>`).
    /// * `config` - Failure policy and listener settings.
    ///
    /// # Returns
    ///
    /// * `Ok(ServiceDiscovery)` with an empty snapshot and an armed notifier.
    /// * `Err` if the notifier cannot attach to the change event. With
    ///   [`FailurePolicy::Abort`](crate::config::FailurePolicy::Abort) the
    ///   process exits instead.
    pub fn with_config(source: Arc<dyn RegistrySource>, config: DiscoveryConfig) -> Result<Self> {
        let notifier = config
            .failure_policy
            .enforce(ChangeNotifier::new(&source.change_event()))?;

        Ok(Self {
            inner: Arc::new(Inner {
                source,
                cache: RwLock::new(SnapshotCache::new()),
                notifier,
                callback: Mutex::new(None),
                config,
            }),
        })
    }

    fn from_inner(inner: Arc<Inner>) -> Self {
        Self { inner }
    }

    fn callback_slot(&self) -> MutexGuard<'_, Option<Listener>> {
        self.inner
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Pulls the latest registry state into the local cache.
    ///
    /// # Returns
    ///
    /// `true` if the snapshot was replaced.
    pub fn update(&self) -> bool {
        let source = self.inner.source.as_ref();
        {
            let cache = self.inner.cache.read().unwrap_or_else(PoisonError::into_inner);
            if !cache.is_stale(source) {
                return false;
            }
        }

        let mut cache = self.inner.cache.write().unwrap_or_else(PoisonError::into_inner);
        let refreshed = cache.refresh(source);
        if refreshed {
            let snapshot = cache.snapshot();
            debug!(
                "Discovery: Snapshot generation {} ({} entries)",
                snapshot.generation(),
                snapshot.len()
            );
        }
        refreshed
    }

    /// The cached snapshot, without refreshing.
    pub fn snapshot(&self) -> Arc<ServiceRegistrySnapshot> {
        self.inner
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }

    /// Generation of the cached snapshot. Starts at 0 and grows on every refresh
    /// that observed a registry change.
    pub fn generation(&self) -> u64 {
        self.snapshot().generation()
    }

    /// Finds every service matching `query`.
    ///
    /// Refreshes the cache first. Never blocks on the registry change event.
    ///
    /// # Returns
    ///
    /// The matching descriptors in registry order; empty if nothing matches.
    pub fn find_service(&self, query: &ServiceQuery) -> ServiceContainer {
        self.update();
        let snapshot = self.snapshot();
        snapshot.find(query).cloned().collect()
    }

    /// Push-style [`find_service`](Self::find_service): calls `visitor` for
    /// every match instead of collecting them.
    pub fn find_service_with<F>(&self, query: &ServiceQuery, mut visitor: F)
    where
        F: FnMut(&ServiceDescriptor),
    {
        self.update();
        let snapshot = self.snapshot();
        snapshot.find(query).for_each(|descriptor| visitor(descriptor));
    }

    /// Blocks until `condition` holds or the facade is unblocked.
    ///
    /// The condition is evaluated once up front and again after every change
    /// notification; it typically calls [`find_service`](Self::find_service).
    ///
    /// # Returns
    ///
    /// * `true` if the condition held when last evaluated.
    /// * `false` if [`unblock_wait`](Self::unblock_wait) was called while the
    ///   condition was false.
    pub fn wait_until<F>(&self, mut condition: F) -> bool
    where
        F: FnMut() -> bool,
    {
        loop {
            if condition() {
                return true;
            }
            if !self.inner.notifier.is_blocking() {
                return false;
            }
            self.inner.notifier.wait_until_change();
        }
    }

    /// Blocks until the registry may have changed or the facade is unblocked.
    ///
    /// Spurious wakeups are part of the contract.
    pub fn wait_until_change(&self) {
        self.inner.notifier.wait_until_change();
    }

    /// Like [`wait_until_change`](Self::wait_until_change) with an upper bound.
    ///
    /// # Returns
    ///
    /// `false` if `timeout` elapsed without a wakeup.
    pub fn wait_until_change_timeout(&self, timeout: Duration) -> bool {
        self.inner.notifier.wait_until_change_timeout(timeout)
    }

    /// Unblocks every current and future wait on this facade. Irreversible.
    pub fn unblock_wait(&self) {
        self.inner.notifier.unblock_wait();
    }

    /// A handle for unblocking from a signal handler or another thread.
    pub fn unblock_handle(&self) -> UnblockHandle {
        self.inner.notifier.unblock_handle()
    }

    /// True until [`unblock_wait`](Self::unblock_wait) is called.
    pub fn is_blocking(&self) -> bool {
        self.inner.notifier.is_blocking()
    }

    /// Registers the single change callback.
    ///
    /// The callback runs on a dedicated listener thread once per detected
    /// change, never concurrently with itself, and receives this facade so it
    /// can re-query.
    ///
    /// # Returns
    ///
    /// * `Ok(())` once the listener runs.
    /// * `Err(DiscoveryError::CallbackAlreadyRegistered)` if the slot is taken.
    /// * `Err` if the listener cannot attach or spawn.
    ///
    /// With [`FailurePolicy::Abort`](crate::config::FailurePolicy::Abort)
    /// every error terminates the process instead.
    pub fn register_callback<F>(&self, callback: F) -> Result<()>
    where
        F: FnMut(&ServiceDiscovery) + Send + 'static,
    {
        let result = self.try_register_callback(Box::new(callback));
        self.inner.config.failure_policy.enforce(result)
    }

    fn try_register_callback(&self, mut callback: DiscoveryCallback) -> Result<()> {
        let mut slot = self.callback_slot();
        if slot.is_some() {
            warn!("Discovery: Only one callback can be registered");
            return Err(crate::error::DiscoveryError::CallbackAlreadyRegistered);
        }

        // The listener only holds a weak reference so the facade can be dropped
        // while a callback is registered.
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let listener = Listener::spawn(
            &self.inner.config.listener_name,
            &self.inner.source.change_event(),
            move || match weak.upgrade() {
                Some(inner) => {
                    callback(&ServiceDiscovery::from_inner(inner));
                    true
                }
                None => false,
            },
        )?;

        *slot = Some(listener);
        info!("Discovery: Callback registered");
        Ok(())
    }

    /// Removes the callback, if any. Idempotent.
    ///
    /// When called from outside the callback, returns once the listener thread
    /// has stopped.
    pub fn deregister_callback(&self) {
        let listener = self.callback_slot().take();
        if let Some(listener) = listener {
            drop(listener);
            info!("Discovery: Callback deregistered");
        }
    }

    pub fn has_callback(&self) -> bool {
        self.callback_slot().is_some()
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.inner.config
    }
}

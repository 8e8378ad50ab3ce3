//! Point-in-time views of the service registry.
//!
//! A [`ServiceRegistrySnapshot`] is immutable. [`SnapshotCache`] replaces it
//! wholesale whenever the source reports a new change counter.

use super::source::RegistrySource;
use crate::model::{MessagingPattern, ServiceDescriptor, ServiceQuery};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// One registry entry: a descriptor plus the number of live providers per pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEntry {
    descriptor: ServiceDescriptor,
    publishers: u32,
    servers: u32,
}

impl ServiceEntry {
    /// Creates an entry with a single provider of the given pattern.
    pub fn new(descriptor: ServiceDescriptor, pattern: MessagingPattern) -> Self {
        let mut entry = Self {
            descriptor,
            publishers: 0,
            servers: 0,
        };
        entry.add_provider(pattern);
        entry
    }

    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    pub fn provider_count(&self, pattern: MessagingPattern) -> u32 {
        match pattern {
            MessagingPattern::PublishSubscribe => self.publishers,
            MessagingPattern::RequestResponse => self.servers,
        }
    }

    /// Providers across all patterns.
    pub fn total_providers(&self) -> u32 {
        self.publishers.saturating_add(self.servers)
    }

    pub(crate) fn add_provider(&mut self, pattern: MessagingPattern) {
        match pattern {
            MessagingPattern::PublishSubscribe => {
                self.publishers = self.publishers.saturating_add(1)
            }
            MessagingPattern::RequestResponse => self.servers = self.servers.saturating_add(1),
        }
    }

    /// Adds the provider counts of `other`, which names the same descriptor.
    fn absorb(&mut self, other: &ServiceEntry) {
        self.publishers = self.publishers.saturating_add(other.publishers);
        self.servers = self.servers.saturating_add(other.servers);
    }

    /// Removes one provider. Returns `false` if none was registered for `pattern`.
    pub(crate) fn remove_provider(&mut self, pattern: MessagingPattern) -> bool {
        let count = match pattern {
            MessagingPattern::PublishSubscribe => &mut self.publishers,
            MessagingPattern::RequestResponse => &mut self.servers,
        };
        if *count == 0 {
            return false;
        }
        *count -= 1;
        true
    }

    /// Matches the identifier fields and, if the query has one, the pattern.
    pub fn matches(&self, query: &ServiceQuery) -> bool {
        query.matches(&self.descriptor)
            && query
                .pattern()
                .map_or(true, |pattern| self.provider_count(pattern) > 0)
    }
}

/// An immutable copy of the registry tagged with a local generation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServiceRegistrySnapshot {
    generation: u64,
    entries: Vec<ServiceEntry>,
}

/// Lazy iterator over the descriptors of a snapshot that match a query.
///
/// Clones are independent cursors: a clone taken before iterating replays the
/// full sequence.
#[derive(Debug, Clone)]
pub struct Matches<'a> {
    entries: std::slice::Iter<'a, ServiceEntry>,
    query: &'a ServiceQuery,
}

impl<'a> Iterator for Matches<'a> {
    type Item = &'a ServiceDescriptor;

    fn next(&mut self) -> Option<Self::Item> {
        let query = self.query;
        self.entries
            .find(|entry| entry.matches(query))
            .map(ServiceEntry::descriptor)
    }
}

/// Folds entries naming the same descriptor into the first one, keeping
/// registry order. A snapshot never holds the same triple twice.
fn merge_duplicates(entries: Vec<ServiceEntry>) -> Vec<ServiceEntry> {
    let mut index: HashMap<ServiceDescriptor, usize> = HashMap::with_capacity(entries.len());
    let mut merged: Vec<ServiceEntry> = Vec::with_capacity(entries.len());

    for entry in entries {
        match index.get(entry.descriptor()) {
            Some(&position) => merged[position].absorb(&entry),
            None => {
                index.insert(entry.descriptor().clone(), merged.len());
                merged.push(entry);
            }
        }
    }
    merged
}

impl ServiceRegistrySnapshot {
    /// Creates a snapshot. Entries for the same descriptor are merged and
    /// their provider counts added up.
    pub fn new(generation: u64, entries: Vec<ServiceEntry>) -> Self {
        Self {
            generation,
            entries: merge_duplicates(entries),
        }
    }

    /// The empty snapshot a facade starts with.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn entries(&self) -> &[ServiceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All descriptors matching `query`, in registry order.
    ///
    /// A query that matches nothing yields an empty sequence.
    pub fn find<'a>(&'a self, query: &'a ServiceQuery) -> Matches<'a> {
        Matches {
            entries: self.entries.iter(),
            query,
        }
    }
}

/// Holds the current snapshot and the source counter it was taken at.
#[derive(Debug, Default)]
pub struct SnapshotCache {
    snapshot: Arc<ServiceRegistrySnapshot>,
    last_counter: Option<u64>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<ServiceRegistrySnapshot> {
        Arc::clone(&self.snapshot)
    }

    /// True if the source has published changes since the last refresh.
    pub fn is_stale(&self, source: &dyn RegistrySource) -> bool {
        self.last_counter != Some(source.change_counter())
    }

    /// Pulls the latest registry data if the source counter moved.
    ///
    /// The comparison is coarse: a moved counter always produces a new
    /// generation, even if the entries happen to be identical.
    ///
    /// # Returns
    ///
    /// `true` if the snapshot was replaced.
    pub fn refresh(&mut self, source: &dyn RegistrySource) -> bool {
        if !self.is_stale(source) {
            return false;
        }

        let (counter, entries) = source.update();
        let generation = self.snapshot.generation() + 1;
        self.snapshot = Arc::new(ServiceRegistrySnapshot::new(generation, entries));
        self.last_counter = Some(counter);
        true
    }
}

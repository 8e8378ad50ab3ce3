//! Discovery configuration.
//!
//! Every field has a default, so a config file only needs to list what it changes.

use crate::error::{DiscoveryError, Result};
use crate::notify::event::DEFAULT_MAX_ATTACHMENTS;
use crate::registry::DEFAULT_REGISTRY_CAPACITY;
use crate::runtime::find_service::DEFAULT_MAX_FIND_SERVICE_HANDLERS;
use log::error;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::BufReader;
use std::path::Path;

/// What to do when a fatal discovery error occurs (attachment failure,
/// duplicate callback registration).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Return the error to the caller.
    #[default]
    Propagate,
    /// Log the error and terminate the process.
    Abort,
}

impl FailurePolicy {
    /// Applies the policy to `result`.
    ///
    /// With [`FailurePolicy::Abort`] an error never returns: it is logged and
    /// the process exits with status 1.
    pub fn enforce<T>(self, result: Result<T>) -> Result<T> {
        match (self, result) {
            (FailurePolicy::Abort, Err(e)) => {
                error!("Discovery: Fatal error: {}", e);
                std::process::exit(1);
            }
            (_, result) => result,
        }
    }
}

/// What a second find-service start for an already watched (service, instance)
/// pair does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateHandlerPolicy {
    /// Hand back the existing search; the new handler is dropped unused.
    #[default]
    Reuse,
    /// Add another independent search with its own handle.
    Allow,
    /// Fail with `DiscoveryError::DuplicateFindService`.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Maximum number of distinct entries in the shared registry.
    pub registry_capacity: usize,
    /// Maximum number of waiters and listeners attached to the change event.
    pub max_attachments: usize,
    pub failure_policy: FailurePolicy,
    pub duplicate_handlers: DuplicateHandlerPolicy,
    /// Maximum number of concurrent find-service handlers.
    pub max_find_service_handlers: usize,
    /// Thread name of the callback listener.
    pub listener_name: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            registry_capacity: DEFAULT_REGISTRY_CAPACITY,
            max_attachments: DEFAULT_MAX_ATTACHMENTS,
            failure_policy: FailurePolicy::Propagate,
            duplicate_handlers: DuplicateHandlerPolicy::Reuse,
            max_find_service_handlers: DEFAULT_MAX_FIND_SERVICE_HANDLERS,
            listener_name: "discovery-listener".to_string(),
        }
    }
}

impl DiscoveryConfig {
    /// Loads a configuration from a JSON file.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the JSON file.
    ///
    /// # Returns
    ///
    /// * `Ok(DiscoveryConfig)` with defaults for every missing field.
    /// * `Err` if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let file = fs::File::open(path).map_err(|source| DiscoveryError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader).map_err(|source| DiscoveryError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }
}

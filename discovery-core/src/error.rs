use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while building identifiers and service descriptors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    /// Identifiers must contain at least one character.
    #[error("Identifier is empty")]
    Empty,

    /// Identifiers are bounded so that they fit the registry's fixed-size slots.
    #[error("Identifier is {len} bytes long, the maximum is {max}")]
    TooLong { len: usize, max: usize },
}

/// Errors returned by the shared service registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No free slot is left for a new service entry.
    #[error("Service registry is full ({capacity} entries)")]
    CapacityExceeded { capacity: usize },
}

/// Global error type for the discovery facade and its collaborators.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// The wait primitive could not be created or polled.
    #[error("Doorbell error: {0}")]
    Doorbell(#[from] std::io::Error),

    /// The change event has no room for another attachment.
    #[error("Change event cannot accept more than {capacity} attachments")]
    AttachmentCapacity { capacity: usize },

    /// The background notification thread could not be started.
    #[error("Failed to spawn listener thread '{name}': {source}")]
    Spawn {
        name: String,
        source: std::io::Error,
    },

    /// Only one callback may occupy the slot at a time.
    #[error("A discovery callback is already registered")]
    CallbackAlreadyRegistered,

    /// A find-service handler for the same service/instance pair exists.
    #[error("A find-service handler for '{service}/{instance}' is already registered")]
    DuplicateFindService { service: String, instance: String },

    /// The find-service runtime has no room for another handler.
    #[error("Find-service runtime cannot hold more than {capacity} handlers")]
    FindServiceCapacity { capacity: usize },

    /// The configuration file could not be read.
    #[error("Failed to read config {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for `DiscoveryConfig`.
    #[error("Failed to parse config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// A specialized Result type for discovery operations.
pub type Result<T> = std::result::Result<T, DiscoveryError>;

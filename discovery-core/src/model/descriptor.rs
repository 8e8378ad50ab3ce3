//! Service identifiers.
//!
//! Defines [`IdString`], the bounded identifier used in every position of a
//! [`ServiceDescriptor`], and [`MessagingPattern`], the kind of provider behind an entry.

use crate::error::DescriptorError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum length of a single identifier, in bytes.
pub const MAX_ID_LENGTH: usize = 100;

/// A non-empty identifier of at most [`MAX_ID_LENGTH`] bytes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdString(String);

impl IdString {
    /// Creates a new identifier.
    ///
    /// # Arguments
    ///
    /// * `value` - The identifier text.
    ///
    /// # Returns
    ///
    /// * `Ok(IdString)` if the value is non-empty and within bounds.
    /// * `Err(DescriptorError)` otherwise.
    pub fn new(value: &str) -> Result<Self, DescriptorError> {
        if value.is_empty() {
            return Err(DescriptorError::Empty);
        }
        if value.len() > MAX_ID_LENGTH {
            return Err(DescriptorError::TooLong {
                len: value.len(),
                max: MAX_ID_LENGTH,
            });
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for IdString {
    type Error = DescriptorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        IdString::new(&value)
    }
}

impl From<IdString> for String {
    fn from(id: IdString) -> Self {
        id.0
    }
}

impl FromStr for IdString {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IdString::new(s)
    }
}

impl AsRef<str> for IdString {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The communication pattern a provider offers a service under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessagingPattern {
    /// Publishers delivering samples to subscribers.
    PublishSubscribe,
    /// Servers answering client requests.
    RequestResponse,
}

impl fmt::Display for MessagingPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessagingPattern::PublishSubscribe => write!(f, "pub-sub"),
            MessagingPattern::RequestResponse => write!(f, "req-res"),
        }
    }
}

impl FromStr for MessagingPattern {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pub-sub" | "pubsub" => Ok(MessagingPattern::PublishSubscribe),
            "req-res" | "reqres" => Ok(MessagingPattern::RequestResponse),
            _ => Err(format!("Unknown messaging pattern: {}", s)),
        }
    }
}

/// Names one endpoint: the (service, instance, event) triple.
///
/// Equality is exact on all three identifiers. Ordering is lexicographic in
/// field order so containers can be sorted for presentation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    service: IdString,
    instance: IdString,
    event: IdString,
}

impl ServiceDescriptor {
    /// Creates a descriptor from three raw identifiers.
    ///
    /// # Arguments
    ///
    /// * `service` - The service name (e.g. "Radar").
    /// * `instance` - The instance name (e.g. "FrontLeft").
    /// * `event` - The event name (e.g. "Object").
    ///
    /// # Returns
    ///
    /// * `Ok(ServiceDescriptor)` if all three identifiers are valid.
    /// * `Err(DescriptorError)` for the first invalid identifier.
    pub fn new(service: &str, instance: &str, event: &str) -> Result<Self, DescriptorError> {
        Ok(Self {
            service: IdString::new(service)?,
            instance: IdString::new(instance)?,
            event: IdString::new(event)?,
        })
    }

    /// Creates a descriptor from already validated identifiers.
    pub fn from_ids(service: IdString, instance: IdString, event: IdString) -> Self {
        Self {
            service,
            instance,
            event,
        }
    }

    pub fn service(&self) -> &IdString {
        &self.service
    }

    pub fn instance(&self) -> &IdString {
        &self.instance
    }

    pub fn event(&self) -> &IdString {
        &self.event
    }
}

impl fmt::Display for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.service, self.instance, self.event)
    }
}

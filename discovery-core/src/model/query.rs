//! Query predicates over service descriptors.
//!
//! Matching is pattern-driven, not regex: each field is compared on its own and
//! a [`QueryField::Wildcard`] always matches.

use super::descriptor::{IdString, MessagingPattern, ServiceDescriptor};
use crate::error::DescriptorError;
use std::fmt;

/// The textual form of a wildcard field.
pub const WILDCARD: &str = "*";

/// One position of a [`ServiceQuery`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryField {
    /// Matches any identifier.
    Wildcard,
    /// Matches exactly this identifier.
    Exact(IdString),
}

impl QueryField {
    /// Parses a field, treating `"*"` as [`QueryField::Wildcard`].
    pub fn parse(value: &str) -> Result<Self, DescriptorError> {
        if value == WILDCARD {
            Ok(QueryField::Wildcard)
        } else {
            Ok(QueryField::Exact(IdString::new(value)?))
        }
    }

    pub fn matches(&self, id: &IdString) -> bool {
        match self {
            QueryField::Wildcard => true,
            QueryField::Exact(expected) => expected == id,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, QueryField::Wildcard)
    }
}

impl From<IdString> for QueryField {
    fn from(id: IdString) -> Self {
        QueryField::Exact(id)
    }
}

impl fmt::Display for QueryField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryField::Wildcard => f.write_str(WILDCARD),
            QueryField::Exact(id) => write!(f, "{}", id),
        }
    }
}

/// A predicate over (service, instance, event), optionally restricted to one
/// messaging pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceQuery {
    service: QueryField,
    instance: QueryField,
    event: QueryField,
    pattern: Option<MessagingPattern>,
}

impl ServiceQuery {
    pub fn new(service: QueryField, instance: QueryField, event: QueryField) -> Self {
        Self {
            service,
            instance,
            event,
            pattern: None,
        }
    }

    /// The query that matches every entry.
    pub fn all() -> Self {
        Self::new(QueryField::Wildcard, QueryField::Wildcard, QueryField::Wildcard)
    }

    /// Builds a query from three strings, `"*"` standing for a wildcard.
    ///
    /// # Arguments
    ///
    /// * `service` - Service name or `"*"`.
    /// * `instance` - Instance name or `"*"`.
    /// * `event` - Event name or `"*"`.
    ///
    /// # Returns
    ///
    /// * `Ok(ServiceQuery)` if every concrete field is a valid identifier.
    /// * `Err(DescriptorError)` otherwise.
    pub fn parse(service: &str, instance: &str, event: &str) -> Result<Self, DescriptorError> {
        Ok(Self::new(
            QueryField::parse(service)?,
            QueryField::parse(instance)?,
            QueryField::parse(event)?,
        ))
    }

    /// The query matching exactly one descriptor.
    pub fn exact(descriptor: &ServiceDescriptor) -> Self {
        Self::new(
            QueryField::Exact(descriptor.service().clone()),
            QueryField::Exact(descriptor.instance().clone()),
            QueryField::Exact(descriptor.event().clone()),
        )
    }

    /// Restricts the query to entries offered under `pattern`.
    pub fn with_pattern(mut self, pattern: MessagingPattern) -> Self {
        self.pattern = Some(pattern);
        self
    }

    pub fn service(&self) -> &QueryField {
        &self.service
    }

    pub fn instance(&self) -> &QueryField {
        &self.instance
    }

    pub fn event(&self) -> &QueryField {
        &self.event
    }

    pub fn pattern(&self) -> Option<MessagingPattern> {
        self.pattern
    }

    /// Checks the three identifier fields. The pattern filter is applied by the
    /// registry, which is the one that knows who provides an entry.
    pub fn matches(&self, descriptor: &ServiceDescriptor) -> bool {
        self.service.matches(descriptor.service())
            && self.instance.matches(descriptor.instance())
            && self.event.matches(descriptor.event())
    }
}

impl Default for ServiceQuery {
    fn default() -> Self {
        Self::all()
    }
}

impl fmt::Display for ServiceQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.service, self.instance, self.event)?;
        if let Some(pattern) = self.pattern {
            write!(f, " [{}]", pattern)?;
        }
        Ok(())
    }
}

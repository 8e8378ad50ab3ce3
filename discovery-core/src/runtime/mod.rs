//! Higher-level runtimes built on the discovery facade.
//!
//! - [`find_service`]: many edge-triggered handlers sharing one facade callback.

pub mod find_service;

pub use find_service::{FindServiceHandle, FindServiceRuntime};

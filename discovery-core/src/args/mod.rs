//! Command-line arguments shared by every discovery binary.
//!
//! Binaries flatten [`DiscoveryArgs`] into their own `clap` parser so that the
//! config file, log level and failure flags are spelled the same everywhere.

use crate::config::{DiscoveryConfig, DuplicateHandlerPolicy, FailurePolicy};
use crate::error::Result;
use clap::Args;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Discovery options parsed from the command line.
#[derive(Args, Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryArgs {
    /// Path to a JSON discovery config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter (overrides RUST_LOG), e.g. "info" or "discovery_core=debug"
    #[arg(long)]
    log_level: Option<String>,

    /// Terminate the process on attachment or registration failures
    #[arg(long)]
    fail_fast: bool,

    /// Refuse a second find-service handler for the same service/instance pair
    #[arg(long)]
    reject_duplicate_handlers: bool,
}

impl DiscoveryArgs {
    /// Builds the effective configuration.
    ///
    /// Starts from the config file if one was given (defaults otherwise) and
    /// lets the command-line flags override it.
    ///
    /// # Returns
    ///
    /// * `Ok(DiscoveryConfig)` with the flags applied.
    /// * `Err` if the config file cannot be loaded.
    pub fn resolve_config(&self) -> Result<DiscoveryConfig> {
        let mut config = match &self.config {
            Some(path) => DiscoveryConfig::load(path)?,
            None => DiscoveryConfig::default(),
        };

        if self.fail_fast {
            config.failure_policy = FailurePolicy::Abort;
        }
        if self.reject_duplicate_handlers {
            config.duplicate_handlers = DuplicateHandlerPolicy::Reject;
        }
        Ok(config)
    }

    /// Returns the log filter given on the command line, if any.
    pub fn get_log_level(&self) -> Option<&str> {
        self.log_level.as_deref()
    }

    /// Returns the path of the config file, if any.
    pub fn get_config_path(&self) -> Option<&PathBuf> {
        self.config.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        discovery: DiscoveryArgs,
    }

    fn parse(args: &[&str]) -> DiscoveryArgs {
        TestCli::parse_from(std::iter::once("test").chain(args.iter().copied())).discovery
    }

    #[test]
    fn test_defaults_without_flags() {
        let args = parse(&[]);
        assert_eq!(args.resolve_config().unwrap(), DiscoveryConfig::default());
        assert!(args.get_log_level().is_none());
        assert!(args.get_config_path().is_none());
    }

    #[test]
    fn test_flags_override_policies() {
        let args = parse(&["--fail-fast", "--reject-duplicate-handlers", "--log-level", "debug"]);
        let config = args.resolve_config().unwrap();

        assert_eq!(config.failure_policy, FailurePolicy::Abort);
        assert_eq!(config.duplicate_handlers, DuplicateHandlerPolicy::Reject);
        assert_eq!(args.get_log_level(), Some("debug"));
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let args = parse(&["--config", "/nonexistent/discovery.json"]);
        assert!(args.resolve_config().is_err());
    }
}

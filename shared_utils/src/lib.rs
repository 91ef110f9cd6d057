//! Shared utilities for the VPN bridge components.
//!
//! This crate provides configuration loading and logging setup for the
//! `bridgectl` host. The bridge core itself does not depend on it.

pub mod config;
pub mod logging;

// Re-export commonly used types for convenience
pub use config::{Config, ConfigError, ConfigManager};

//! Builders
//!
//! Fluent builder patterns for Garmin configuration.

pub mod config;

pub use config::{garmin_config, GarminConfigBuilder};

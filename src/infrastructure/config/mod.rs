//! Configuration management infrastructure.
//!
//! Hierarchical configuration using figment: programmatic defaults, an
//! optional `fleetwright.yaml`, then `FLEETWRIGHT_`-prefixed environment
//! variables, validated eagerly after extraction.

pub mod loader;

pub use loader::{ConfigError, ConfigLoader, EngineConfig};

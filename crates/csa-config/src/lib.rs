//! Configuration loading, layered precedence resolution, paths, and the
//! process-wide logging bootstrap.

pub mod config;
pub mod config_merge;
pub mod logging;
pub mod paths;

pub use config::{Config, PartialConfig, Provider};
pub use config_merge::resolve;

//! Utility modules for layerpack

pub mod fs;
pub mod logging;

pub use logging::{init_default, init_from_env, init_logging, LoggingConfig};

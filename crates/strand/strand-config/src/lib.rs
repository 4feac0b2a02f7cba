mod config;

pub use config::{ConfigError, ProbeConfig};

//! Security-related configuration types for Redis connections

mod tls_config;

pub use tls_config::*;

//! Redscope Core - shared types for the Redis connection layer and bulk actions
//!
//! This crate provides the types every other Redscope crate depends on:
//!
//! - `ClientMetadata` - Identity of a logical Redis connection
//! - `Database` - Read-only descriptor of a Redis deployment
//! - `TlsConfig` - TLS settings attached to a database
//! - `RedscopeError` - The error taxonomy shared by all crates
//! - `logging` - Tracing subscriber setup

mod database;
mod error;
pub mod logging;
mod metadata;
pub mod security;

pub use database::*;
pub use error::*;
pub use metadata::*;
pub use security::TlsConfig;

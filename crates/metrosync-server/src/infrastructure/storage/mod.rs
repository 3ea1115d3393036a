//! Storage infrastructure: `server.toml` persistence.

pub mod config;

//! Storage infrastructure: `client.toml` persistence.
//!
//! A missing file means first run and yields defaults; a partial file fills
//! the gaps from defaults field by field.

pub mod config;

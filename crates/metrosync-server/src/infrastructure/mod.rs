//! Infrastructure layer for the server application.
//!
//! Contains the OS-facing adapters: the TCP listener and mDNS advertiser,
//! the in-memory playback engine, and TOML configuration storage.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `metrosync_core`, but MUST NOT be imported by the `application` layer.

pub mod engine;
pub mod network;
pub mod storage;

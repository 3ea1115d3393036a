//! Infrastructure layer for the client application.
//!
//! Contains the OS-facing adapters: mDNS browsing, the TCP connection slot
//! and its read pump, and TOML configuration storage.
//!
//! **Dependency rule**: this layer may depend on `metrosync_core`, but MUST
//! NOT be imported by `metrosync_core`.
//!
//! # Sub-modules
//!
//! - **`discovery`** – Browses the local network for phones advertising the
//!   MetroSync service and publishes the deduplicated device list.
//!
//! - **`network`** – Owns the single active socket (`ConnectionManager`) and
//!   the protocol engine above it (`SyncSession`).
//!
//! - **`storage`** – Loads and saves `client.toml`.

pub mod discovery;
pub mod network;
pub mod storage;

//! Application layer use cases for the companion client.
//!
//! - **`remote_control`** – Selects a phone (superseding any prior session)
//!   and issues play/pause/next/previous through the active `SyncSession`.

pub mod remote_control;

//! Network infrastructure for the server (phone) role.
//!
//! # Sub-modules
//!
//! - **`listener`** – The TCP accept loop.  Each companion gets its own read
//!   pump (commands in) and writer (state snapshots out); a desynchronised or
//!   closed peer is dropped without affecting the others.
//!
//! - **`advertiser`** – Registers the `_metrosync._tcp.` instance with the
//!   mDNS daemon so companions can find this phone without manual IPs.

pub mod advertiser;
pub mod listener;

pub use advertiser::{AdvertiseError, ServiceAdvertiser};
pub use listener::{ServerError, StatePublisher, SyncServer};

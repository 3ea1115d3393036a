//! Domain entities for MetroSync.
//!
//! This module contains pure state with no infrastructure dependencies: it
//! never touches a socket, a multicast daemon, or a clock.  The network and
//! discovery layers in the client and server crates feed events in and
//! publish the resulting snapshots.

/// Deduplicated set of devices found on the local network.
///
/// See [`device::DeviceRegistry`] for the main type.
pub mod device;

/// Per-client session snapshot and connection lifecycle states.
pub mod session;

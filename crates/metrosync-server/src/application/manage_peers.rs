//! Peer registry: every companion currently connected to this server.
//!
//! Entries are created on accept and removed when the peer's session ends.
//! The registry sits behind a `std::sync::Mutex` shared between the accept
//! loop and the per-peer read pumps; no lock is held across an `.await`.

use std::collections::HashMap;
use std::net::SocketAddr;

use uuid::Uuid;

/// Identifies one accepted TCP connection.
pub type PeerId = Uuid;

/// Runtime information about a connected companion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: PeerId,
    pub address: SocketAddr,
    /// `deviceId` carried by the most recent command, if any arrived yet.
    pub device_id: Option<String>,
    pub commands_received: u64,
}

#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: HashMap<PeerId, PeerInfo>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly accepted connection and returns its id.
    pub fn register(&mut self, address: SocketAddr) -> PeerId {
        let id = Uuid::new_v4();
        self.peers.insert(
            id,
            PeerInfo {
                id,
                address,
                device_id: None,
                commands_received: 0,
            },
        );
        id
    }

    /// Attributes one command to `id`.  An empty `device_id` keeps the last
    /// known attribution.
    pub fn record_command(&mut self, id: PeerId, device_id: &str) {
        if let Some(peer) = self.peers.get_mut(&id) {
            peer.commands_received += 1;
            if !device_id.is_empty() {
                peer.device_id = Some(device_id.to_string());
            }
        }
    }

    pub fn remove(&mut self, id: PeerId) -> Option<PeerInfo> {
        self.peers.remove(&id)
    }

    pub fn get(&self, id: PeerId) -> Option<&PeerInfo> {
        self.peers.get(&id)
    }

    /// Snapshot of all peers, ordered by address.
    pub fn all(&self) -> Vec<PeerInfo> {
        let mut peers: Vec<PeerInfo> = self.peers.values().cloned().collect();
        peers.sort_by_key(|p| p.address);
        peers
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([192, 168, 1, 30], port))
    }

    #[test]
    fn test_register_creates_unattributed_entry() {
        let mut registry = PeerRegistry::new();

        let id = registry.register(addr(50000));

        let peer = registry.get(id).unwrap();
        assert_eq!(peer.address, addr(50000));
        assert_eq!(peer.device_id, None);
        assert_eq!(peer.commands_received, 0);
    }

    #[test]
    fn test_register_assigns_distinct_ids() {
        let mut registry = PeerRegistry::new();
        let a = registry.register(addr(1));
        let b = registry.register(addr(1));
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_record_command_counts_and_attributes() {
        // Arrange
        let mut registry = PeerRegistry::new();
        let id = registry.register(addr(50000));

        // Act
        registry.record_command(id, "watch1");
        registry.record_command(id, "");

        // Assert: the empty id did not erase the attribution
        let peer = registry.get(id).unwrap();
        assert_eq!(peer.commands_received, 2);
        assert_eq!(peer.device_id.as_deref(), Some("watch1"));
    }

    #[test]
    fn test_record_command_for_unknown_peer_is_ignored() {
        let mut registry = PeerRegistry::new();
        registry.record_command(Uuid::new_v4(), "watch1");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_returns_final_info() {
        let mut registry = PeerRegistry::new();
        let id = registry.register(addr(50000));
        registry.record_command(id, "watch1");

        let removed = registry.remove(id).unwrap();

        assert_eq!(removed.commands_received, 1);
        assert!(registry.is_empty());
        assert!(registry.remove(id).is_none());
    }

    #[test]
    fn test_all_is_sorted_by_address() {
        let mut registry = PeerRegistry::new();
        registry.register(addr(3));
        registry.register(addr(1));
        registry.register(addr(2));

        let ports: Vec<u16> = registry.all().iter().map(|p| p.address.port()).collect();

        assert_eq!(ports, vec![1, 2, 3]);
    }
}

//! Peer table for the swarm transport (C6, §4.6 "Receive path" step 5).

use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Peer table capacity; the oldest-seen peer is evicted to make room.
pub const PEER_CAPACITY: usize = 32;
/// A peer not heard from in this long is evicted on the next sweep.
pub const PEER_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct SwarmPeer {
    pub node_id: u32,
    pub addr: SocketAddr,
    pub last_seen: Instant,
    pub failures: u32,
}

/// Small linear-scan table (capacity 32): a `Vec` is simpler and just as
/// fast as a hash map at this size, and keeps `send_to_random` indexing
/// deterministic for a given peer set.
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: Vec<SwarmPeer>,
}

impl PeerTable {
    pub fn new() -> Self {
        PeerTable { peers: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SwarmPeer> {
        self.peers.iter()
    }

    /// Upsert by `node_id`: resets `last_seen` and `failures`. Evicts the
    /// oldest-seen peer first if the table is at capacity and this is a
    /// brand-new entry.
    pub fn upsert(&mut self, node_id: u32, addr: SocketAddr) {
        if let Some(peer) = self.peers.iter_mut().find(|p| p.node_id == node_id) {
            peer.addr = addr;
            peer.last_seen = Instant::now();
            peer.failures = 0;
            return;
        }

        if self.peers.len() >= PEER_CAPACITY {
            if let Some((oldest_idx, _)) = self
                .peers
                .iter()
                .enumerate()
                .min_by_key(|(_, p)| p.last_seen)
            {
                self.peers.remove(oldest_idx);
            }
        }

        self.peers.push(SwarmPeer {
            node_id,
            addr,
            last_seen: Instant::now(),
            failures: 0,
        });
    }

    /// Remove every peer not heard from within `ttl`. The comparison is
    /// strict (`>`), so a peer exactly at the TTL boundary still survives.
    pub fn evict_expired(&mut self, ttl: Duration) {
        let now = Instant::now();
        self.peers.retain(|p| now.duration_since(p.last_seen) <= ttl);
    }

    /// `peers[index mod len]`, or `None` when the table is empty.
    pub fn pick(&self, index: u64) -> Option<&SwarmPeer> {
        if self.peers.is_empty() {
            return None;
        }
        self.peers.get((index as usize) % self.peers.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    #[test]
    fn upsert_then_pick_round_trips() {
        let mut table = PeerTable::new();
        table.upsert(1, addr(9001));
        table.upsert(2, addr(9002));
        assert_eq!(table.len(), 2);
        assert_eq!(table.pick(0).unwrap().node_id, 1);
        assert_eq!(table.pick(1).unwrap().node_id, 2);
        assert_eq!(table.pick(2).unwrap().node_id, 1);
    }

    #[test]
    fn upsert_existing_resets_failures() {
        let mut table = PeerTable::new();
        table.upsert(1, addr(9001));
        table.peers[0].failures = 3;
        table.upsert(1, addr(9001));
        assert_eq!(table.peers[0].failures, 0);
    }

    #[test]
    fn capacity_evicts_oldest() {
        let mut table = PeerTable::new();
        for i in 0..PEER_CAPACITY as u32 {
            table.upsert(i, addr(9000 + i as u16));
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(table.len(), PEER_CAPACITY);
        table.upsert(999, addr(9999));
        assert_eq!(table.len(), PEER_CAPACITY);
        assert!(table.iter().all(|p| p.node_id != 0));
        assert!(table.iter().any(|p| p.node_id == 999));
    }

    #[test]
    fn ttl_eviction_removes_stale_peers() {
        let mut table = PeerTable::new();
        table.upsert(1, addr(9001));
        table.evict_expired(Duration::from_millis(0));
        assert!(table.is_empty());
    }
}

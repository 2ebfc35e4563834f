//! UDP gossip transport (C6, §4.6). One background thread owns the socket's
//! receive side; `peer_lock` and `queue_lock` guard the two pieces of shared
//! state public methods touch from any caller thread.

use std::collections::VecDeque;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::KolibriResult;
use crate::peer::{PeerTable, PEER_TTL};
use crate::wire::{self, MAX_DATAGRAM};

/// Bounded event ring capacity; overflow drops the oldest event.
pub const EVENT_RING_CAPACITY: usize = 64;
/// Minimum spacing between automatic HELLO broadcasts.
pub const HELLO_INTERVAL: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq)]
pub enum SwarmEvent {
    Hello { node_id: u32, addr: SocketAddr },
    Formula { node_id: u32, gene_digits: Vec<u8>, fitness: f64 },
}

struct Shared {
    socket: UdpSocket,
    key: Vec<u8>,
    self_id: u32,
    port: u16,
    peers: Mutex<PeerTable>,
    events: Mutex<VecDeque<SwarmEvent>>,
}

/// One gossip-mesh participant. All public methods are safe to call from
/// any thread; receiving happens exclusively on the background thread
/// spawned in [`Swarm::bind`].
pub struct Swarm {
    shared: Arc<Shared>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Swarm {
    /// Bind `addr`, start the background receive thread, and return.
    pub fn bind<A: std::net::ToSocketAddrs>(addr: A, self_id: u32, key: &[u8]) -> KolibriResult<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_broadcast(true)?;
        socket.set_read_timeout(Some(READ_TIMEOUT))?;
        let port = socket.local_addr()?.port();

        let shared = Arc::new(Shared {
            socket,
            key: key.to_vec(),
            self_id,
            port,
            peers: Mutex::new(PeerTable::new()),
            events: Mutex::new(VecDeque::new()),
        });
        let running = Arc::new(AtomicBool::new(true));

        let thread = {
            let shared = shared.clone();
            let running = running.clone();
            thread::spawn(move || receive_loop(shared, running))
        };

        Ok(Swarm { shared, running, thread: Some(thread) })
    }

    pub fn local_addr(&self) -> KolibriResult<SocketAddr> {
        Ok(self.shared.socket.local_addr()?)
    }

    pub fn peer_count(&self) -> usize {
        self.shared.peers.lock().unwrap().len()
    }

    pub fn peers(&self) -> Vec<(u32, SocketAddr)> {
        self.shared.peers.lock().unwrap().iter().map(|p| (p.node_id, p.addr)).collect()
    }

    /// Non-blocking: the oldest queued event, or `None`.
    pub fn poll_event(&self) -> Option<SwarmEvent> {
        self.shared.events.lock().unwrap().pop_front()
    }

    pub fn share_hello(&self) -> KolibriResult<()> {
        let datagram = wire::encode_hello(&self.shared.key, self.shared.self_id, self.shared.port)?;
        broadcast(&self.shared.socket, &datagram, self.shared.port)
    }

    pub fn add_peer(&self, addr: SocketAddr, node_id: u32) -> KolibriResult<()> {
        self.shared.peers.lock().unwrap().upsert(node_id, addr);
        let datagram = wire::encode_hello(&self.shared.key, self.shared.self_id, self.shared.port)?;
        self.shared.socket.send_to(&datagram, addr)?;
        Ok(())
    }

    /// Unicast a FORMULA datagram to `peers[random_u64 mod n]`. A no-op
    /// (`Ok(())`) when the peer table is empty — gossip is best-effort.
    pub fn send_to_random(&self, random_u64: u64, gene_digits: &[u8], fitness: f64) -> KolibriResult<()> {
        let addr = {
            let peers = self.shared.peers.lock().unwrap();
            match peers.pick(random_u64) {
                Some(p) => p.addr,
                None => return Ok(()),
            }
        };
        let datagram = wire::encode_formula(&self.shared.key, self.shared.self_id, self.shared.port, gene_digits, fitness)?;
        self.shared.socket.send_to(&datagram, addr)?;
        Ok(())
    }

    /// Broadcast a FORMULA datagram, then unicast it to every known peer.
    pub fn broadcast_formula(&self, gene_digits: &[u8], fitness: f64) -> KolibriResult<()> {
        let datagram = wire::encode_formula(&self.shared.key, self.shared.self_id, self.shared.port, gene_digits, fitness)?;
        broadcast(&self.shared.socket, &datagram, self.shared.port)?;

        let addrs: Vec<SocketAddr> = self.shared.peers.lock().unwrap().iter().map(|p| p.addr).collect();
        for addr in addrs {
            self.shared.socket.send_to(&datagram, addr)?;
        }
        Ok(())
    }

    /// Stop the background thread and join it. `std::net::UdpSocket` has no
    /// half-close, so shutdown relies on the 1-second read timeout to bound
    /// how long the thread can be blocked in `recv_from` after `running` is
    /// cleared.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Swarm {
    fn drop(&mut self) {
        self.stop();
    }
}

fn broadcast(socket: &UdpSocket, datagram: &[u8], port: u16) -> KolibriResult<()> {
    socket.send_to(datagram, (Ipv4Addr::BROADCAST, port))?;
    Ok(())
}

fn push_event(events: &Mutex<VecDeque<SwarmEvent>>, event: SwarmEvent) {
    let mut q = events.lock().unwrap();
    if q.len() >= EVENT_RING_CAPACITY {
        q.pop_front();
    }
    q.push_back(event);
}

fn receive_loop(shared: Arc<Shared>, running: Arc<AtomicBool>) {
    let mut buf = [0u8; MAX_DATAGRAM];
    // Send the first HELLO immediately rather than waiting a full interval.
    let mut last_hello = Instant::now() - HELLO_INTERVAL;

    while running.load(Ordering::Relaxed) {
        match shared.socket.recv_from(&mut buf) {
            Ok((n, src)) => {
                match wire::decode_datagram(&buf[..n], &shared.key, shared.self_id) {
                    Some(decoded) => {
                        let peer_addr = SocketAddr::new(src.ip(), decoded.port);
                        shared.peers.lock().unwrap().upsert(decoded.sender_id, peer_addr);

                        let event = match decoded.payload {
                            wire::Payload::Hello => SwarmEvent::Hello { node_id: decoded.sender_id, addr: peer_addr },
                            wire::Payload::Formula { gene_digits, fitness } => {
                                SwarmEvent::Formula { node_id: decoded.sender_id, gene_digits, fitness }
                            }
                        };
                        push_event(&shared.events, event);
                    }
                    None => log::trace!("dropped malformed or unauthenticated datagram from {src}"),
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {}
            Err(_) => {}
        }

        let now = Instant::now();
        if now.duration_since(last_hello) >= HELLO_INTERVAL {
            if let Ok(datagram) = wire::encode_hello(&shared.key, shared.self_id, shared.port) {
                let _ = broadcast(&shared.socket, &datagram, shared.port);
            }
            last_hello = now;
            shared.peers.lock().unwrap().evict_expired(PEER_TTL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn poll_until<F: Fn(&SwarmEvent) -> bool>(swarm: &Swarm, pred: F, timeout: StdDuration) -> Option<SwarmEvent> {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if let Some(event) = swarm.poll_event() {
                if pred(&event) {
                    return Some(event);
                }
            }
            thread::sleep(StdDuration::from_millis(10));
        }
        None
    }

    #[test]
    fn hello_between_two_swarms_is_observed() {
        let key = b"shared-swarm-key".to_vec();
        let mut a = Swarm::bind("127.0.0.1:0", 1, &key).unwrap();
        let mut b = Swarm::bind("127.0.0.1:0", 2, &key).unwrap();

        let b_addr = b.local_addr().unwrap();
        a.add_peer(b_addr, 2).unwrap();

        let seen = poll_until(&b, |e| matches!(e, SwarmEvent::Hello { node_id: 1, .. }), StdDuration::from_secs(2));
        assert!(seen.is_some(), "b never observed a's hello");

        a.stop();
        b.stop();
    }

    #[test]
    fn formula_gossip_is_observed() {
        let key = b"another-swarm-key".to_vec();
        let mut a = Swarm::bind("127.0.0.1:0", 10, &key).unwrap();
        let mut b = Swarm::bind("127.0.0.1:0", 20, &key).unwrap();

        let a_addr = a.local_addr().unwrap();
        b.add_peer(a_addr, 10).unwrap();
        // Let a learn about b via the unicast hello before gossiping back.
        poll_until(&a, |e| matches!(e, SwarmEvent::Hello { node_id: 20, .. }), StdDuration::from_secs(2));

        a.broadcast_formula(&[1, 2, 3], 0.5).unwrap();
        let seen = poll_until(&b, |e| matches!(e, SwarmEvent::Formula { node_id: 10, .. }), StdDuration::from_secs(2));
        assert!(seen.is_some(), "b never observed a's formula");

        a.stop();
        b.stop();
    }

    #[test]
    fn self_sent_datagrams_never_surface_as_events() {
        let key = b"loopback-key".to_vec();
        let mut a = Swarm::bind("127.0.0.1:0", 5, &key).unwrap();
        let own_addr = a.local_addr().unwrap();
        a.add_peer(own_addr, 5).unwrap();
        assert!(poll_until(&a, |_| true, StdDuration::from_millis(300)).is_none());
        a.stop();
    }

    #[test]
    fn send_to_random_is_a_noop_without_peers() {
        let key = b"empty-key-0123456".to_vec();
        let mut a = Swarm::bind("127.0.0.1:0", 1, &key).unwrap();
        assert!(a.send_to_random(42, &[1, 2, 3], 0.1).is_ok());
        a.stop();
    }
}

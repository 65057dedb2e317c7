//! The concrete network transport: `bincode` over `net2`/`UdpSocket`,
//! point-to-point per-peer sockets rather than a shared multicast group,
//! which is what gives each RPC its own independent deadline and prevents
//! one peer's slowness from affecting another.

use std::net::{SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use crate::error::PeerCallError;
use crate::message::{RpcRequest, RpcResponse};

pub type PeerAddress = SocketAddrV4;

/// Reliable-enough request/response over a pluggable transport, with a
/// per-call deadline. Framing is opaque to the rest of the crate -- only
/// `UdpTransport` below knows this is UDP.
pub trait Transport: Send + Sync {
    fn call(&self, target: &PeerAddress, request: RpcRequest, deadline: Duration) -> Result<RpcResponse, PeerCallError>;
}

const MAX_DATAGRAM: usize = 16 * 1024;

/// A UDP transport where every outgoing call opens a fresh, ephemeral
/// socket. This trades a little setup cost for correctness under the
/// concurrent per-peer fan-out in `network::collect_until`: sharing one
/// socket across threads would let one thread's reply be stolen by
/// another thread's `recv`, since UDP has no connection to demultiplex on.
pub struct UdpTransport;

impl UdpTransport {
    pub fn new() -> Self {
        UdpTransport
    }
}

impl Default for UdpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for UdpTransport {
    fn call(&self, target: &PeerAddress, request: RpcRequest, deadline: Duration) -> Result<RpcResponse, PeerCallError> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .map_err(|e| PeerCallError::Transport(format!("could not bind socket: {}", e)))?;
        socket
            .set_read_timeout(Some(deadline))
            .map_err(|e| PeerCallError::Transport(format!("could not set read timeout: {}", e)))?;

        let encoded =
            bincode::serialize(&request).map_err(|e| PeerCallError::Transport(format!("encode failed: {}", e)))?;
        socket
            .send_to(&encoded, target)
            .map_err(|e| PeerCallError::Transport(format!("send failed: {}", e)))?;

        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (n, _src) = socket.recv_from(&mut buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut {
                PeerCallError::Timeout(uuid::Uuid::nil())
            } else {
                PeerCallError::Transport(format!("recv failed: {}", e))
            }
        })?;

        bincode::deserialize(&buf[..n]).map_err(|e| PeerCallError::Transport(format!("decode failed: {}", e)))
    }
}

/// Serves the peer RPC surface for one node: receives a datagram, decodes
/// an `RpcRequest`, hands it to the supplied `Peer`, and sends back the
/// encoded `RpcResponse`. Runs on its own background thread, owned and
/// joined by whoever constructs it (typically a `demos/` binary).
pub struct RpcServer {
    socket: UdpSocket,
    requests_served: AtomicU64,
}

impl RpcServer {
    pub fn bind(address: PeerAddress) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(address)?;
        Ok(RpcServer {
            socket,
            requests_served: AtomicU64::new(0),
        })
    }

    pub fn requests_served(&self) -> u64 {
        self.requests_served.load(Ordering::Relaxed)
    }

    /// Runs the receive loop until `shutdown` is observed between
    /// iterations. Intended to be spawned on its own thread; a short read
    /// timeout keeps the loop responsive to shutdown without busy-waiting.
    pub fn serve(&self, peer: &dyn crate::peer::Peer, shutdown: &std::sync::atomic::AtomicBool) {
        let _ = self.socket.set_read_timeout(Some(Duration::from_millis(200)));
        let mut buf = vec![0u8; MAX_DATAGRAM];
        while !shutdown.load(Ordering::SeqCst) {
            let (n, src) = match self.socket.recv_from(&mut buf) {
                Ok(pair) => pair,
                Err(_) => continue, // timeout or transient error; re-check shutdown
            };
            let request: RpcRequest = match bincode::deserialize(&buf[..n]) {
                Ok(request) => request,
                Err(_) => continue, // malformed datagram; drop it
            };
            let response = dispatch(peer, request);
            if let Ok(encoded) = bincode::serialize(&response) {
                let _ = self.socket.send_to(&encoded, src);
            }
            self.requests_served.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn dispatch(peer: &dyn crate::peer::Peer, request: RpcRequest) -> RpcResponse {
    // Local dispatch never crosses the network, so a generous fixed
    // deadline here only bounds pathological local contention, not RTT.
    let local_deadline = Duration::from_secs(5);
    match request {
        RpcRequest::Prepare { seq, ballot } => {
            RpcResponse::Prepare(peer.prepare(seq, ballot, local_deadline).expect("local prepare cannot fail"))
        }
        RpcRequest::Accept { seq, ballot, value } => RpcResponse::Accept(
            peer.accept(seq, ballot, value, local_deadline)
                .expect("local accept cannot fail"),
        ),
        RpcRequest::Learn { seq, value } => {
            peer.learn(seq, value, local_deadline).expect("local learn cannot fail");
            RpcResponse::Learn
        }
        RpcRequest::LearnedSince { seq } => RpcResponse::LearnedSince(
            peer.learned_values_since(seq, local_deadline)
                .expect("local learned_values_since cannot fail"),
        ),
        RpcRequest::LatestSequence => RpcResponse::LatestSequence(
            peer.latest_sequence_prepared_or_accepted(local_deadline)
                .expect("local latest_sequence cannot fail"),
        ),
        RpcRequest::Ping => RpcResponse::Ping(peer.ping(local_deadline).expect("local ping cannot fail")),
        RpcRequest::GetUuid => RpcResponse::Uuid(peer.get_uuid(local_deadline).expect("local get_uuid cannot fail")),
    }
}

/// An in-process transport used by tests and by `demos/simulate.rs` when
/// it wants a deterministic, socket-free cluster: routes a call directly
/// to the target's registered handler instead of going over a real
/// socket. Registration happens once per simulated node at startup.
pub struct InProcessTransport {
    routes: Mutex<std::collections::HashMap<PeerAddress, std::sync::Arc<dyn crate::peer::Peer>>>,
}

impl InProcessTransport {
    pub fn new() -> Self {
        InProcessTransport {
            routes: Mutex::new(std::collections::HashMap::new()),
        }
    }

    pub fn register(&self, address: PeerAddress, peer: std::sync::Arc<dyn crate::peer::Peer>) {
        self.routes.lock().expect("route table poisoned").insert(address, peer);
    }
}

impl Default for InProcessTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for InProcessTransport {
    fn call(&self, target: &PeerAddress, request: RpcRequest, _deadline: Duration) -> Result<RpcResponse, PeerCallError> {
        // A short, randomized scheduling yield keeps this transport from
        // starving other threads under tight test loops while staying
        // deterministic in outcome (unlike a real network, it never drops
        // or reorders).
        thread::yield_now();
        let peer = {
            let routes = self.routes.lock().expect("route table poisoned");
            routes
                .get(target)
                .cloned()
                .ok_or_else(|| PeerCallError::Transport(format!("no route registered for {}", target)))?
        };
        let deadline = Duration::from_secs(5);
        Ok(match request {
            RpcRequest::Prepare { seq, ballot } => RpcResponse::Prepare(peer.prepare(seq, ballot, deadline)?),
            RpcRequest::Accept { seq, ballot, value } => RpcResponse::Accept(peer.accept(seq, ballot, value, deadline)?),
            RpcRequest::Learn { seq, value } => {
                peer.learn(seq, value, deadline)?;
                RpcResponse::Learn
            }
            RpcRequest::LearnedSince { seq } => RpcResponse::LearnedSince(peer.learned_values_since(seq, deadline)?),
            RpcRequest::LatestSequence => {
                RpcResponse::LatestSequence(peer.latest_sequence_prepared_or_accepted(deadline)?)
            }
            RpcRequest::Ping => RpcResponse::Ping(peer.ping(deadline)?),
            RpcRequest::GetUuid => RpcResponse::Uuid(peer.get_uuid(deadline)?),
        })
    }
}

//! Simulated node network over in-memory duplex streams.

use async_trait::async_trait;
use camurai_env::{Acceptor, EnvError};
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tracing::debug;

/// Bytes each direction of a link can buffer.
const LINK_BUFFER: usize = 64 * 1024;

type Pending = (DuplexStream, IpAddr);

/// Node side of the simulated network.
///
/// `connect` creates a link, keeps the node end and queues the server end
/// for the [`SimAcceptor`].
#[derive(Clone)]
pub struct SimNetwork {
    pending: mpsc::UnboundedSender<Pending>,

    /// Addresses whose connection attempts are dropped on the floor
    refused: Arc<Mutex<HashSet<IpAddr>>>,
}

/// Server side of the simulated network.
pub struct SimAcceptor {
    /// Incoming links (behind tokio mutex for async)
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Pending>>>,
}

impl SimNetwork {
    /// Creates a network and its acceptor.
    pub fn new() -> (Self, SimAcceptor) {
        let (tx, rx) = mpsc::unbounded_channel();
        let network = Self {
            pending: tx,
            refused: Arc::new(Mutex::new(HashSet::new())),
        };
        let acceptor = SimAcceptor {
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
        };
        (network, acceptor)
    }

    /// Opens a link from `peer` and returns the node end.
    ///
    /// A refused address gets a stream whose other end is already gone.
    pub fn connect(&self, peer: IpAddr) -> DuplexStream {
        let (node, server) = tokio::io::duplex(LINK_BUFFER);

        if self.is_refused(peer) || self.pending.send((server, peer)).is_err() {
            debug!(%peer, "connection refused");
        }
        node
    }

    /// Refuses new connections from `peer` until [`allow`](Self::allow).
    pub fn refuse(&self, peer: IpAddr) {
        self.refused.lock().unwrap_or_else(PoisonError::into_inner).insert(peer);
    }

    pub fn allow(&self, peer: IpAddr) {
        self.refused.lock().unwrap_or_else(PoisonError::into_inner).remove(&peer);
    }

    fn is_refused(&self, peer: IpAddr) -> bool {
        self.refused.lock().unwrap_or_else(PoisonError::into_inner).contains(&peer)
    }
}

#[async_trait]
impl Acceptor for SimAcceptor {
    type Stream = DuplexStream;

    async fn accept(&self) -> Result<(DuplexStream, IpAddr), EnvError> {
        let mut rx = self.rx.lock().await;
        rx.recv().await.ok_or(EnvError::Closed)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}

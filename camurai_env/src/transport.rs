//! Inbound transport abstraction for node connections.

use async_trait::async_trait;
use crate::error::EnvError;
use std::net::{IpAddr, SocketAddr};
use tokio::io::{AsyncRead, AsyncWrite};

/// Source of inbound node connections.
///
/// # Implementations
///
/// - **Production**: `TcpAcceptor` wraps a bound `TcpListener`
/// - **Simulation**: `SimAcceptor` hands out in-memory duplex streams
///
/// # Connection Flow
///
/// ```text
/// Node                     Acceptor                  Coordinator
///   |                          |                          |
///   |-- connect() ------------>|                          |
///   |                          |-- (stream, peer ip) ---->|
///   |<================ frames ==========================>|
/// ```
///
/// Nodes are identified purely by the peer IP returned here; there is no
/// handshake.
#[async_trait]
pub trait Acceptor: Send + Sync + 'static {
    /// Bidirectional byte stream to one node.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Waits for the next inbound connection.
    ///
    /// # Returns
    /// * `Ok((stream, peer))` - A node connected from `peer`
    /// * `Err(EnvError::Closed)` - No more connections will arrive
    /// * `Err(EnvError::Io)` - A transient accept failure
    async fn accept(&self) -> Result<(Self::Stream, IpAddr), EnvError>;

    /// Returns the local address, if this acceptor is bound to one.
    fn local_addr(&self) -> Option<SocketAddr>;
}

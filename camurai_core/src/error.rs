//! Error taxonomy for node connections and the wire protocol.

use std::net::IpAddr;
use thiserror::Error;

/// Errors raised while talking to nodes.
///
/// None of these are fatal to the coordinator: each one is contained to the
/// connection (or the single send) that produced it.
#[derive(Debug, Error)]
pub enum CamuraiError {
    /// Peer is not in the static address table
    #[error("Unknown address: {0}")]
    UnknownAddress(IpAddr),

    /// Stream ended, possibly mid-frame
    #[error("Connection closed")]
    ConnectionClosed,

    /// Unknown kind, wrong payload length for the kind, or bad payload bytes
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Payload does not fit the 1-byte length field
    #[error("Payload too large: {0} bytes (max 255)")]
    PayloadTooLarge(usize),

    /// Any other transport failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CamuraiError {
    /// Creates a malformed frame error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedFrame(msg.into())
    }

    /// Returns true for routine disconnects that deserve no alarm.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::ConnectionClosed | Self::Io(_))
    }
}

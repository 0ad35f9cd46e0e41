//! Error types for the environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Socket-level failure (bind, accept, peer lookup)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The acceptor has been shut down and will yield no more streams
    #[error("Acceptor closed")]
    Closed,
}

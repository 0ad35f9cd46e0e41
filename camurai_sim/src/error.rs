//! Scenario failure taxonomy.

use camurai_core::{CamuraiError, ConfigError};
use thiserror::Error;

/// Why a scenario step failed.
#[derive(Debug, Error)]
pub enum SimError {
    /// Nothing arrived within the stall window
    #[error("Timed out waiting for {0}")]
    Timeout(String),

    /// A node received something other than what the step expected
    #[error("{node}: expected {expected}, got {got}")]
    Unexpected {
        node: String,
        expected: String,
        got: String,
    },

    /// An assertion over coordinator state failed
    #[error("Check failed: {0}")]
    Check(String),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Node link error: {0}")]
    Link(#[from] CamuraiError),
}

impl SimError {
    pub fn check(msg: impl Into<String>) -> Self {
        Self::Check(msg.into())
    }
}

/// Fails with [`SimError::Check`] unless `cond` holds.
pub fn ensure(cond: bool, msg: impl FnOnce() -> String) -> Result<(), SimError> {
    if cond {
        Ok(())
    } else {
        Err(SimError::Check(msg()))
    }
}

//! Camurai Core - coordinator for a grid of networked light/buzzer/button nodes
//!
//! Each node holds one TCP connection to the coordinator. The coordinator:
//! 1. **Identifies** nodes by peer address through a static table
//! 2. **Runs levels**: players must press nodes in a secret order
//! 3. **Animates** the grid while nobody is playing (column sweep, joy ripple)

pub mod ambient;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod joy;
pub mod level;
pub mod registry;
pub mod sequencer;

// Re-export key types for convenience
pub use codec::{read_frame, write_frame, Frame, FrameKind};
pub use config::{ConfigError, CoordinatorConfig, Mode};
pub use coordinator::{Coordinator, GameEvent, GameStatus};
pub use error::CamuraiError;
pub use level::{LevelEngine, LevelPhase, LevelSpec, OrderingMode, PressOutcome};
pub use registry::{AddressTable, NodeRegistry};

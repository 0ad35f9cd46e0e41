//! Camurai Deterministic Simulation Harness
//!
//! Runs the real coordinator against scripted nodes over an in-memory
//! network, with a virtual clock and a single seed behind every shuffle.
//!
//! # Core Principle
//!
//! Everything the coordinator reads from its environment is controlled:
//! - **Time**: `sleep` advances a virtual clock instead of waiting
//! - **Network**: each node is one end of a tokio duplex stream
//! - **Randomness**: level layouts come from a ChaCha8 stream seeded once
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                   SimWorld                   │
//! │  ┌────────────────────────────────────────┐  │
//! │  │ Coordinator<SimContext>                │  │
//! │  │   game loop, animator, node handlers   │  │
//! │  └───────────────▲────────────────────────┘  │
//! │                  │ SimAcceptor               │
//! │  ┌───────────────┴────────────────────────┐  │
//! │  │ SimNetwork (duplex links)              │  │
//! │  └───▲──────────▲──────────▲──────────────┘  │
//! │  ┌───┴───┐  ┌───┴───┐  ┌───┴───┐             │
//! │  │SimNode│  │SimNode│  │SimNode│  ...        │
//! │  └───────┘  └───────┘  └───────┘             │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use camurai_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::CanonicalRun);
//! assert!(result.passed);
//! ```

mod context;
mod error;
mod network;
mod node;
mod runner;
pub mod scenarios;
mod world;

pub use context::SimContext;
pub use error::{ensure, SimError};
pub use network::{SimAcceptor, SimNetwork};
pub use node::SimNode;
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use world::{SimConfig, SimWorld};

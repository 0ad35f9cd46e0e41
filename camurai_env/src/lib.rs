//! Camurai Environment Abstraction Layer
//!
//! This crate provides the seam that lets the coordinator run in both
//! **Production** (tokio + TCP) and **Simulation** (virtual clock + in-memory
//! links) environments.
//!
//! # Core Concept
//!
//! The coordinator never touches the outside world directly. Everything
//! non-deterministic goes through one of two traits:
//! - [`CamuraiContext`]: time (`now()`, `sleep()`), task spawning, and the
//!   randomness used to shuffle level layouts
//! - [`Acceptor`]: the source of inbound node streams and their peer addresses
//!
//! Seeding the simulation context makes every randomized level layout
//! reproducible from a single 64-bit number.
//!
//! # Example
//!
//! ```ignore
//! use camurai_env::{Acceptor, CamuraiContext, TcpAcceptor, TokioContext};
//!
//! async fn accept_loop<Ctx: CamuraiContext, Acc: Acceptor>(ctx: &Ctx, acceptor: &Acc) {
//!     while let Ok((stream, peer)) = acceptor.accept().await {
//!         ctx.spawn("node", handle(stream, peer));
//!     }
//! }
//! ```

mod context;
mod error;
mod tokio_impl;
mod transport;
mod types;

pub use context::CamuraiContext;
pub use error::EnvError;
pub use tokio_impl::{TcpAcceptor, TokioContext};
pub use transport::Acceptor;
pub use types::{Coord, Rgb};

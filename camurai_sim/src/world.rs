//! SimWorld - The simulation harness container.

use crate::context::SimContext;
use crate::error::SimError;
use crate::network::SimNetwork;
use crate::node::SimNode;

use camurai_core::config::AmbientConfig;
use camurai_core::{AddressTable, Coordinator, CoordinatorConfig, GameStatus};
use camurai_env::{CamuraiContext, Coord};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

/// Longest wait for a status change (wall clock).
const STALL: Duration = Duration::from_secs(2);

/// Wall-clock pause that lets every runnable task finish its work.
const SETTLE: Duration = Duration::from_millis(10);

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Coordinator under test
    pub coordinator: CoordinatorConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            // Idle sweeps would never stop on a virtual clock
            coordinator: CoordinatorConfig {
                ambient: AmbientConfig::off(),
                ..Default::default()
            },
        }
    }
}

/// The SimWorld - one coordinator, its network, and the nodes connected to it.
pub struct SimWorld {
    /// Configuration
    pub config: SimConfig,

    /// Shared simulation context (virtual clock)
    pub context: Arc<SimContext>,

    /// Node side of the network
    pub network: SimNetwork,

    pub coordinator: Coordinator<SimContext>,

    addresses: AddressTable,
}

impl SimWorld {
    /// Launches the coordinator and its accept loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: SimConfig) -> Result<Self, SimError> {
        let context = SimContext::shared(config.seed);
        let (network, acceptor) = SimNetwork::new();

        let coordinator = Coordinator::launch(Arc::clone(&context), config.coordinator.clone())?;
        let server = coordinator.clone();
        context.spawn("accept", async move {
            if let Err(e) = server.serve(acceptor).await {
                warn!("accept loop failed: {}", e);
            }
        });

        let addresses = config.coordinator.address_table();
        Ok(Self {
            config,
            context,
            network,
            coordinator,
            addresses,
        })
    }

    /// Address the table assigns to `coord`.
    pub fn address_of(&self, coord: Coord) -> Option<IpAddr> {
        self.addresses
            .iter()
            .find(|(_, c)| **c == coord)
            .map(|(ip, _)| *ip)
    }

    /// Connects the node at `coord`.
    pub fn connect(&self, coord: Coord) -> Result<SimNode, SimError> {
        let peer = self
            .address_of(coord)
            .ok_or_else(|| SimError::check(format!("no address for {}", coord)))?;
        Ok(self.connect_ip(peer))
    }

    /// Connects from an arbitrary address, known or not.
    pub fn connect_ip(&self, peer: IpAddr) -> SimNode {
        let stream = self.network.connect(peer);
        SimNode::new(peer, self.addresses.resolve(peer), stream)
    }

    /// Connects every cell of the grid.
    pub fn connect_all(&self) -> Result<BTreeMap<Coord, SimNode>, SimError> {
        self.config
            .coordinator
            .grid
            .coords()
            .map(|coord| Ok((coord, self.connect(coord)?)))
            .collect()
    }

    /// The latest published status.
    pub fn status(&self) -> GameStatus {
        self.coordinator.snapshot()
    }

    /// Waits until the published status satisfies `pred`.
    pub async fn wait_status<F>(&self, what: &str, pred: F) -> Result<GameStatus, SimError>
    where
        F: FnMut(&GameStatus) -> bool,
    {
        let mut rx = self.coordinator.status();
        let result = timeout(STALL, rx.wait_for(pred)).await;
        match result {
            Ok(Ok(status)) => Ok(status.clone()),
            Ok(Err(_)) => Err(SimError::check("game loop stopped")),
            Err(_) => Err(SimError::Timeout(format!("status: {}", what))),
        }
    }

    /// Lets every task run until nothing is left to do.
    pub async fn settle(&self) {
        tokio::time::sleep(SETTLE).await;
    }

    /// Returns the current simulation time in seconds.
    pub fn time(&self) -> f64 {
        self.context.now().as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camurai_core::level::COLORS;
    use camurai_core::Frame;

    #[tokio::test]
    async fn test_sim_world_creation() {
        let world = SimWorld::new(SimConfig::default()).unwrap();

        assert_eq!(world.status().level_index, 0);
        assert_eq!(world.time(), 0.0);
        assert!(world.address_of(Coord::new(3, 3)).is_some());
        assert!(world.address_of(Coord::new(4, 0)).is_none());
    }

    #[tokio::test]
    async fn test_connected_node_gets_display() {
        let world = SimWorld::new(SimConfig::default()).unwrap();
        let mut node = world.connect(Coord::new(1, 1)).unwrap();

        node.expect(&Frame::Color(Some(COLORS[1]))).await.unwrap();
        node.expect(&Frame::Unlock).await.unwrap();
        assert!(world.coordinator.registry().is_connected(Coord::new(1, 1)));
    }

    #[tokio::test]
    async fn test_sim_world_determinism() {
        let mut config = SimConfig::default();
        config.coordinator.levels = vec![camurai_core::LevelSpec::random("random", true)];

        let mut sequences = Vec::new();
        for _ in 0..2 {
            let world = SimWorld::new(config.clone()).unwrap();
            let mut nodes = world.connect_all().unwrap();
            world.settle().await;

            // Fail once so the level is drawn over every connected node
            let status = world.status();
            let first = status.sequence[0];
            nodes.get_mut(&first).unwrap().press().await.unwrap();
            nodes.get_mut(&first).unwrap().press().await.unwrap();
            world.settle().await;

            sequences.push(world.status().sequence);
        }

        // Same seed = same layout
        assert_eq!(sequences[0], sequences[1]);
        assert_eq!(sequences[0].len(), 4);
    }
}

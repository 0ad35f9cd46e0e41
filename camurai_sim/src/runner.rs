//! Scenario runner - drives a SimWorld through each scenario and checks the
//! coordinator's observable behavior.

use crate::error::{ensure, SimError};
use crate::node::SimNode;
use crate::scenarios::ScenarioId;
use crate::world::{SimConfig, SimWorld};

use camurai_core::ambient::{RippleMetric, RING_COLORS, RING_NOTES, SWEEP_COLOR};
use camurai_core::level::{COLORS, EMPTY_COLOR, FAIL_NOTES, NOTES};
use camurai_core::{Frame, LevelPhase, LevelSpec, Mode};
use camurai_env::Coord;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::net::{IpAddr, Ipv4Addr};
use tracing::{debug, info};

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    /// Button presses sent by simulated nodes
    pub presses: u64,

    /// Connections opened, known or not
    pub connections: u64,

    /// Levels completed according to the coordinator
    pub levels_completed: u64,

    /// Final virtual time in seconds
    pub virtual_time_secs: f64,
}

type Nodes = BTreeMap<Coord, SimNode>;

/// Runs simulation scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Runs a scenario on a fresh single-threaded runtime and returns the
    /// result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let outcome = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| SimError::check(format!("cannot build runtime: {}", e)))
            .and_then(|runtime| runtime.block_on(self.run_async(scenario)));

        match outcome {
            Ok(metrics) => ScenarioResult {
                scenario,
                seed: self.seed,
                passed: true,
                failure_reason: None,
                metrics,
            },
            Err(e) => ScenarioResult {
                scenario,
                seed: self.seed,
                passed: false,
                failure_reason: Some(e.to_string()),
                metrics: ScenarioMetrics::default(),
            },
        }
    }

    async fn run_async(&self, scenario: ScenarioId) -> Result<ScenarioMetrics, SimError> {
        match scenario {
            ScenarioId::CanonicalRun => self.run_canonical().await,
            ScenarioId::EarlyPress => self.run_early_press().await,
            ScenarioId::MidGameReconnect => self.run_mid_game_reconnect().await,
            ScenarioId::UnknownPeer => self.run_unknown_peer().await,
            ScenarioId::RacingPresses => self.run_racing_presses().await,
            ScenarioId::RandomLevels => self.run_random_levels().await,
            ScenarioId::Ripple => self.run_ripple().await,
            ScenarioId::Sequencer => self.run_sequencer().await,
        }
    }

    fn config(&self) -> SimConfig {
        SimConfig {
            seed: self.seed,
            ..Default::default()
        }
    }

    /// SIM-001: all four canonical levels, wrapping back to the diagonal.
    async fn run_canonical(&self) -> Result<ScenarioMetrics, SimError> {
        let world = SimWorld::new(self.config())?;
        let mut metrics = ScenarioMetrics::default();
        let mut nodes = connect_all(&world, &mut metrics).await?;

        let diagonal = [Coord::new(0, 0), Coord::new(1, 1), Coord::new(2, 2), Coord::new(3, 3)];
        for coord in diagonal {
            node(&mut nodes, coord)?.drain().await;
        }

        // Each correct press locks the node and plays its jingle
        for (i, coord) in diagonal.into_iter().enumerate() {
            let n = node(&mut nodes, coord)?;
            n.press().await?;
            metrics.presses += 1;
            n.expect(&Frame::Lock).await?;
            n.expect(&Frame::Buzzer(NOTES[i].to_string())).await?;
        }
        let status = world
            .wait_status("second level", |s| s.level_index == 1 && s.phase == LevelPhase::Pristine)
            .await?;
        ensure(status.levels_completed == 1, || {
            format!("levels_completed = {}", status.levels_completed)
        })?;

        for expected_next in [2, 3, 0] {
            check_layout(&world, 4)?;
            play_level(&world, &mut nodes, &mut metrics).await?;
            let status = world.status();
            ensure(status.level_index == expected_next, || {
                format!("level {} after playing, expected {}", status.level_index, expected_next)
            })?;
        }

        let status = world.status();
        ensure(status.levels_completed == 4, || {
            format!("levels_completed = {}", status.levels_completed)
        })?;
        ensure(status.sequence == diagonal, || "diagonal is back after wrapping".to_string())?;

        Ok(finish(&world, metrics))
    }

    /// SIM-002: pressing the second slot first.
    async fn run_early_press(&self) -> Result<ScenarioMetrics, SimError> {
        let world = SimWorld::new(self.config())?;
        let mut metrics = ScenarioMetrics::default();
        let mut nodes = connect_all(&world, &mut metrics).await?;

        let second = node(&mut nodes, Coord::new(1, 1))?;
        second.drain().await;
        second.press().await?;
        metrics.presses += 1;

        // Fail jingle, then the reset display
        second.expect(&Frame::Buzzer(FAIL_NOTES.to_string())).await?;
        second.expect(&Frame::Color(Some(COLORS[1]))).await?;
        second.expect(&Frame::Unlock).await?;
        ensure(world.status().progress == 0, || "progress survived a failure".to_string())?;

        node(&mut nodes, Coord::new(0, 0))?.press().await?;
        metrics.presses += 1;
        world.wait_status("first step after failure", |s| s.progress == 1).await?;

        Ok(finish(&world, metrics))
    }

    /// SIM-003: a non-participating node drops and comes back at progress 1.
    async fn run_mid_game_reconnect(&self) -> Result<ScenarioMetrics, SimError> {
        let world = SimWorld::new(self.config())?;
        let mut metrics = ScenarioMetrics::default();
        let mut nodes = connect_all(&world, &mut metrics).await?;

        node(&mut nodes, Coord::new(0, 0))?.press().await?;
        metrics.presses += 1;
        world.wait_status("progress 1", |s| s.progress == 1).await?;

        let outsider = Coord::new(3, 0);
        if let Some(n) = nodes.remove(&outsider) {
            n.disconnect();
        }
        world.settle().await;
        ensure(!world.coordinator.registry().is_connected(outsider), || {
            "link survived disconnect".to_string()
        })?;
        ensure(world.status().progress == 1, || "disconnect alone must not reset".to_string())?;

        let mut back = world.connect(outsider)?;
        metrics.connections += 1;
        world.wait_status("reset after rejoin", |s| s.progress == 0).await?;
        back.expect(&Frame::Color(Some(EMPTY_COLOR))).await?;
        back.expect(&Frame::Unlock).await?;
        nodes.insert(outsider, back);

        play_level(&world, &mut nodes, &mut metrics).await?;
        Ok(finish(&world, metrics))
    }

    /// SIM-004: a stranger connects.
    async fn run_unknown_peer(&self) -> Result<ScenarioMetrics, SimError> {
        let world = SimWorld::new(self.config())?;
        let mut metrics = ScenarioMetrics::default();
        let mut nodes = connect_all(&world, &mut metrics).await?;

        node(&mut nodes, Coord::new(0, 0))?.press().await?;
        metrics.presses += 1;
        let before = world.wait_status("progress 1", |s| s.progress == 1).await?;

        let mut stranger = world.connect_ip(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 99)));
        metrics.connections += 1;
        stranger.expect_closed().await?;
        world.settle().await;

        ensure(world.coordinator.registry().connected().len() == 16, || {
            "stranger changed the registry".to_string()
        })?;
        ensure(world.status() == before, || "stranger changed game state".to_string())?;

        Ok(finish(&world, metrics))
    }

    /// SIM-005: every node presses at once.
    async fn run_racing_presses(&self) -> Result<ScenarioMetrics, SimError> {
        let world = SimWorld::new(self.config())?;
        let mut metrics = ScenarioMetrics::default();
        let mut nodes = connect_all(&world, &mut metrics).await?;

        let mut order: Vec<Coord> = nodes.keys().copied().collect();
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_mul(0x9e3779b97f4a7c15));
        order.shuffle(&mut rng);
        debug!(?order, "press order");

        for coord in &order {
            node(&mut nodes, *coord)?.press().await?;
            metrics.presses += 1;
        }
        world.settle().await;

        let status = world.status();
        ensure(status.progress <= status.sequence.len(), || {
            format!("progress {} past length {}", status.progress, status.sequence.len())
        })?;

        // Get back to a pristine level before playing it cleanly
        if status.phase == LevelPhase::InProgress {
            let first = *status
                .sequence
                .first()
                .ok_or_else(|| SimError::check("level in progress with no steps"))?;
            node(&mut nodes, first)?.press().await?;
            metrics.presses += 1;
        }
        let before = world
            .wait_status("pristine after race", |s| s.phase == LevelPhase::Pristine)
            .await?;

        play_level(&world, &mut nodes, &mut metrics).await?;
        let after = world.status();
        ensure(after.levels_completed == before.levels_completed + 1, || {
            "clean play after the race did not complete".to_string()
        })?;

        Ok(finish(&world, metrics))
    }

    /// SIM-006: random levels over partial grids.
    async fn run_random_levels(&self) -> Result<ScenarioMetrics, SimError> {
        let anchor = Coord::new(0, 0);
        let mut config = self.config();
        config.coordinator.levels = vec![
            LevelSpec::fixed("warmup", vec![anchor], true),
            LevelSpec::random("random", true),
            LevelSpec::random("random-unlocked", false),
        ];
        let world = SimWorld::new(config)?;
        let mut metrics = ScenarioMetrics::default();

        // The anchor plus five seeded cells
        let mut others: Vec<Coord> = world
            .config
            .coordinator
            .grid
            .coords()
            .filter(|c| *c != anchor)
            .collect();
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed ^ 0x5eed);
        others.shuffle(&mut rng);

        let mut nodes = Nodes::new();
        for coord in std::iter::once(anchor).chain(others.iter().take(5).copied()) {
            nodes.insert(coord, world.connect(coord)?);
            metrics.connections += 1;
        }
        world.settle().await;

        for _round in 0..2 {
            // Warmup, then both random variants
            play_level(&world, &mut nodes, &mut metrics).await?;
            check_layout(&world, 4)?;
            play_level(&world, &mut nodes, &mut metrics).await?;
            check_layout(&world, 4)?;
            play_level(&world, &mut nodes, &mut metrics).await?;
        }

        // Shrink to two nodes; the next random level has only two steps
        let keep = [anchor, others[0]];
        let dropped: Vec<Coord> = nodes.keys().copied().filter(|c| !keep.contains(c)).collect();
        for coord in dropped {
            if let Some(n) = nodes.remove(&coord) {
                n.disconnect();
            }
        }
        world.settle().await;

        play_level(&world, &mut nodes, &mut metrics).await?;
        check_layout(&world, 2)?;
        play_level(&world, &mut nodes, &mut metrics).await?;

        Ok(finish(&world, metrics))
    }

    /// SIM-007: joy ripple while pristine, and none during play.
    async fn run_ripple(&self) -> Result<ScenarioMetrics, SimError> {
        let mut config = self.config();
        config.coordinator.ambient.ripple_on_joy = true;
        config.coordinator.ambient.ripple_metric = RippleMetric::Chebyshev;
        let world = SimWorld::new(config)?;
        let mut metrics = ScenarioMetrics::default();
        let mut nodes = connect_all(&world, &mut metrics).await?;

        let origin = Coord::new(1, 2);
        let far = Coord::new(3, 0);
        node(&mut nodes, far)?.drain().await;

        let source = node(&mut nodes, origin)?;
        source.joy(40).await?;
        source.joy(220).await?;

        // (3,0) sits on ring 2 around (1,2)
        let watcher = node(&mut nodes, far)?;
        watcher
            .wait_for("ring 2 color", |f| *f == Frame::Color(Some(RING_COLORS[2])))
            .await?;
        watcher.expect(&Frame::Lock).await?;
        watcher.expect(&Frame::Buzzer(RING_NOTES[2].to_string())).await?;
        watcher.expect(&Frame::Color(None)).await?;
        // Level display comes back once the ripple is over
        watcher.expect(&Frame::Color(Some(EMPTY_COLOR))).await?;
        watcher.expect(&Frame::Unlock).await?;

        // Mid-level, joy is noted but nothing animates
        node(&mut nodes, Coord::new(0, 0))?.press().await?;
        metrics.presses += 1;
        world.wait_status("progress 1", |s| s.progress == 1).await?;

        let source = node(&mut nodes, origin)?;
        source.joy(40).await?;
        source.joy(220).await?;
        world.settle().await;

        let frames = node(&mut nodes, far)?.drain().await;
        ensure(frames.is_empty(), || format!("ripple during play: {:?}", frames))?;

        Ok(finish(&world, metrics))
    }

    /// SIM-008: sequencer mode.
    async fn run_sequencer(&self) -> Result<ScenarioMetrics, SimError> {
        let mut config = self.config();
        config.coordinator.mode = Mode::Sequencer;
        let world = SimWorld::new(config)?;
        let mut metrics = ScenarioMetrics::default();
        let mut nodes = Nodes::new();
        for coord in world.config.coordinator.grid.coords() {
            nodes.insert(coord, world.connect(coord)?);
            metrics.connections += 1;
        }

        let on = Coord::new(2, 1);
        node(&mut nodes, on)?.press().await?;
        node(&mut nodes, Coord::new(0, 3))?.press().await?;
        metrics.presses += 2;
        let status = world.wait_status("two enabled", |s| s.enabled.len() == 2).await?;
        ensure(status.enabled == vec![Coord::new(0, 3), on], || {
            format!("enabled = {:?}", status.enabled)
        })?;
        ensure(status.phase == LevelPhase::Pristine, || "sequencer left pristine".to_string())?;

        // Row 1 plays D4e as the sweep passes column 2
        node(&mut nodes, on)?
            .wait_for("row note", |f| *f == Frame::Buzzer("D4e".to_string()))
            .await?;
        node(&mut nodes, Coord::new(1, 1))?
            .wait_for("grey sweep", |f| *f == Frame::Color(Some(SWEEP_COLOR)))
            .await?;

        node(&mut nodes, on)?.press().await?;
        metrics.presses += 1;
        let status = world.wait_status("one enabled", |s| s.enabled.len() == 1).await?;
        ensure(!status.enabled.contains(&on), || "toggle off ignored".to_string())?;

        Ok(finish(&world, metrics))
    }
}

fn node(nodes: &mut Nodes, coord: Coord) -> Result<&mut SimNode, SimError> {
    nodes
        .get_mut(&coord)
        .ok_or_else(|| SimError::check(format!("no node at {}", coord)))
}

/// Connects the whole grid and waits for every join to be handled.
async fn connect_all(world: &SimWorld, metrics: &mut ScenarioMetrics) -> Result<Nodes, SimError> {
    let nodes = world.connect_all()?;
    metrics.connections += nodes.len() as u64;
    world.settle().await;

    let connected = world.coordinator.registry().connected().len();
    ensure(connected == nodes.len(), || {
        format!("{} of {} nodes connected", connected, nodes.len())
    })?;
    Ok(nodes)
}

/// The active level draws `expected` distinct connected nodes.
fn check_layout(world: &SimWorld, expected: usize) -> Result<(), SimError> {
    let status = world.status();
    let connected = world.coordinator.registry().connected();
    let distinct: HashSet<&Coord> = status.sequence.iter().collect();

    ensure(status.sequence.len() == expected, || {
        format!("{} has {} steps, expected {}", status.level_name, status.sequence.len(), expected)
    })?;
    ensure(distinct.len() == status.sequence.len(), || {
        format!("{} repeats a node", status.level_name)
    })?;
    ensure(status.sequence.iter().all(|c| connected.contains(c)), || {
        format!("{} uses a disconnected node", status.level_name)
    })
}

/// Plays the active level in order and waits for the next one.
async fn play_level(
    world: &SimWorld,
    nodes: &mut Nodes,
    metrics: &mut ScenarioMetrics,
) -> Result<(), SimError> {
    let start = world
        .wait_status("pristine level", |s| s.phase == LevelPhase::Pristine)
        .await?;
    ensure(!start.sequence.is_empty(), || format!("{} is empty", start.level_name))?;
    debug!(level = %start.level_name, sequence = ?start.sequence, "playing level");

    let last = start.sequence.len() - 1;
    for (i, coord) in start.sequence.iter().enumerate() {
        node(nodes, *coord)?.press().await?;
        metrics.presses += 1;

        if i < last {
            world
                .wait_status("next step", |s| s.level_index == start.level_index && s.progress == i + 1)
                .await?;
        }
    }

    world
        .wait_status("next level", |s| {
            s.levels_completed == start.levels_completed + 1 && s.phase == LevelPhase::Pristine
        })
        .await?;
    Ok(())
}

fn finish(world: &SimWorld, mut metrics: ScenarioMetrics) -> ScenarioMetrics {
    metrics.levels_completed = world.status().levels_completed;
    metrics.virtual_time_secs = world.time();
    metrics
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_passes(scenario: ScenarioId) {
        for seed in [1, 42, 1337] {
            let result = ScenarioRunner::new(seed).run(scenario);
            assert!(
                result.passed,
                "{} seed={} failed: {:?}",
                scenario,
                seed,
                result.failure_reason
            );
        }
    }

    #[test]
    fn test_canonical_run() {
        assert_passes(ScenarioId::CanonicalRun);
    }

    #[test]
    fn test_early_press() {
        assert_passes(ScenarioId::EarlyPress);
    }

    #[test]
    fn test_mid_game_reconnect() {
        assert_passes(ScenarioId::MidGameReconnect);
    }

    #[test]
    fn test_unknown_peer() {
        assert_passes(ScenarioId::UnknownPeer);
    }

    #[test]
    fn test_racing_presses() {
        assert_passes(ScenarioId::RacingPresses);
    }

    #[test]
    fn test_random_levels() {
        assert_passes(ScenarioId::RandomLevels);
    }

    #[test]
    fn test_ripple() {
        assert_passes(ScenarioId::Ripple);
    }

    #[test]
    fn test_sequencer() {
        assert_passes(ScenarioId::Sequencer);
    }

    #[test]
    fn test_metrics_reflect_run() {
        let result = ScenarioRunner::new(7).run(ScenarioId::CanonicalRun);
        assert!(result.passed);
        assert_eq!(result.metrics.levels_completed, 4);
        assert_eq!(result.metrics.connections, 16);
        assert_eq!(result.metrics.presses, 16);
        // Four success delays of one second each
        assert!(result.metrics.virtual_time_secs >= 4.0);
    }
}

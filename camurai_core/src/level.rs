//! The Level Engine - required press ordering, progress, and reset policy.
//!
//! A level is an ordered list of grid coordinates. Nodes must be pressed in
//! exactly that order; each correct press advances `progress` by one and the
//! level completes when `progress` reaches the sequence length. Any other
//! press by a participating node fails the level for everyone.
//!
//! ```text
//!   Pristine ──correct──► InProgress ──correct (last)──► Complete
//!      ▲                      │
//!      └──── wrong press ─────┘   (coordinator calls reset)
//! ```
//!
//! Level variants differ only in two policy flags carried by [`LevelSpec`]:
//! whether a correct press locks the node, and whether the ordering is fixed
//! or a random subset of connected nodes.

use crate::codec::Frame;
use crate::registry::NodeRegistry;
use camurai_env::{CamuraiContext, Coord, Rgb};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

// ============================================================================
// PALETTE
// ============================================================================

/// Slot colors, indexed by order.
pub const COLORS: [Rgb; 4] = [
    Rgb::new(255, 0, 0),
    Rgb::new(255, 255, 0),
    Rgb::new(0, 255, 0),
    Rgb::new(0, 255, 255),
];

/// Color for nodes that take no part in the level.
pub const EMPTY_COLOR: Rgb = Rgb::new(0, 0, 128);

/// Success jingles, indexed by order.
pub const NOTES: [&str; 4] = ["C4eE4q", "E4eG4q", "G4eC5q", "C5eC6q"];

/// Played on any out-of-order press.
pub const FAIL_NOTES: &str = "E4e,A3q";

/// Longest sequence a level can have: one color per slot.
pub const MAX_SEQUENCE: usize = COLORS.len();

// ============================================================================
// LEVEL SPECS
// ============================================================================

/// How a level picks its sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "ordering", rename_all = "snake_case")]
pub enum OrderingMode {
    /// Always the same coordinates, whether connected or not
    Fixed { sequence: Vec<Coord> },

    /// Up to [`MAX_SEQUENCE`] connected nodes in a secret random order
    RandomSubset,
}

/// One entry in the ordered list of levels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelSpec {
    pub name: String,

    /// Whether a correct press sends LOCK to the node
    pub locks_on_success: bool,

    #[serde(flatten)]
    pub ordering: OrderingMode,

    /// Success jingle per order
    #[serde(default = "LevelSpec::default_notes")]
    pub notes: Vec<String>,
}

impl LevelSpec {
    fn default_notes() -> Vec<String> {
        NOTES.iter().map(|n| n.to_string()).collect()
    }

    /// Creates a fixed-order level.
    pub fn fixed(name: &str, sequence: Vec<Coord>, locks_on_success: bool) -> Self {
        Self {
            name: name.to_string(),
            locks_on_success,
            ordering: OrderingMode::Fixed { sequence },
            notes: Self::default_notes(),
        }
    }

    /// Creates a random-subset level.
    pub fn random(name: &str, locks_on_success: bool) -> Self {
        Self {
            name: name.to_string(),
            locks_on_success,
            ordering: OrderingMode::RandomSubset,
            notes: Self::default_notes(),
        }
    }

    /// Returns the success jingle for an order.
    pub fn note(&self, order: usize) -> &str {
        match self.notes.get(order) {
            Some(note) => note,
            None => NOTES[order % NOTES.len()],
        }
    }

    /// The canonical four levels: diagonal and random, each with and
    /// without locking.
    pub fn canonical() -> Vec<LevelSpec> {
        let diagonal = vec![
            Coord::new(0, 0),
            Coord::new(1, 1),
            Coord::new(2, 2),
            Coord::new(3, 3),
        ];

        vec![
            LevelSpec::fixed("diagonal", diagonal.clone(), true),
            LevelSpec::random("random", true),
            LevelSpec::fixed("diagonal-unlocked", diagonal, false),
            LevelSpec::random("random-unlocked", false),
        ]
    }
}

// ============================================================================
// LEVEL INSTANCE
// ============================================================================

/// Observable state of the active level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelPhase {
    /// No correct presses yet
    Pristine,

    /// 0 < progress < length
    InProgress,

    /// progress == length
    Complete,
}

/// Result of a button press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressOutcome {
    /// Node takes no part in this level
    Ignored,

    /// Correct press, more to go
    Advanced,

    /// Correct press, level complete
    Success,

    /// Out-of-order press (including a repeat of a consumed slot)
    Failed,
}

/// One round's required ordering and how far players have got.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Level {
    sequence: Vec<Coord>,
    progress: usize,
}

impl Level {
    pub fn new(sequence: Vec<Coord>) -> Self {
        Self { sequence, progress: 0 }
    }

    pub fn sequence(&self) -> &[Coord] {
        &self.sequence
    }

    pub fn progress(&self) -> usize {
        self.progress
    }

    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    pub fn pristine(&self) -> bool {
        self.progress == 0
    }

    pub fn phase(&self) -> LevelPhase {
        if self.pristine() {
            LevelPhase::Pristine
        } else if self.progress < self.len() {
            LevelPhase::InProgress
        } else {
            LevelPhase::Complete
        }
    }

    /// Position of `coord` in the sequence.
    pub fn order_of(&self, coord: Coord) -> Option<usize> {
        self.sequence.iter().position(|c| *c == coord)
    }
}

/// Per-node game state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeState {
    pub order: Option<usize>,
    pub locked: bool,
}

// ============================================================================
// ENGINE
// ============================================================================

/// Holds the active level and keeps every node's `order`/`locked` in step
/// with it.
///
/// The engine is not thread-safe by itself; the coordinator's game loop
/// owns it and is the only caller.
pub struct LevelEngine {
    specs: Vec<LevelSpec>,
    index: usize,

    /// Random order of every grid cell, drawn when the level starts.
    /// Random levels take connected cells from the front of this.
    ranking: Vec<Coord>,

    level: Level,
    nodes: BTreeMap<Coord, NodeState>,
}

impl LevelEngine {
    /// Creates an engine on the first level with nothing connected.
    ///
    /// No frames are emitted; nodes receive their display as they join.
    ///
    /// `specs` must not be empty; [`CoordinatorConfig::validate`] rejects
    /// configurations without levels.
    ///
    /// [`CoordinatorConfig::validate`]: crate::config::CoordinatorConfig::validate
    pub fn new<C: CamuraiContext>(
        specs: Vec<LevelSpec>,
        grid: impl IntoIterator<Item = Coord>,
        ctx: &C,
    ) -> Self {
        debug_assert!(!specs.is_empty(), "level engine needs at least one level");
        let nodes: BTreeMap<Coord, NodeState> =
            grid.into_iter().map(|c| (c, NodeState::default())).collect();

        let mut engine = Self {
            specs,
            index: 0,
            ranking: Vec::new(),
            level: Level::new(Vec::new()),
            nodes,
        };
        engine.draw_ranking(ctx);
        engine.regenerate(&[]);
        engine
    }

    pub fn level(&self) -> &Level {
        &self.level
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn spec(&self) -> &LevelSpec {
        &self.specs[self.index]
    }

    pub fn phase(&self) -> LevelPhase {
        self.level.phase()
    }

    pub fn node(&self, coord: Coord) -> Option<NodeState> {
        self.nodes.get(&coord).copied()
    }

    /// Applies a button press from `coord`.
    ///
    /// Emits LOCK (if the level locks) and the success note on a correct
    /// press, or the fail jingle otherwise. Does not reset on failure; the
    /// caller applies the reset policy.
    pub fn button_pressed(&mut self, coord: Coord, registry: &NodeRegistry) -> PressOutcome {
        let Some(state) = self.nodes.get_mut(&coord) else {
            return PressOutcome::Ignored;
        };
        let Some(order) = state.order else {
            debug!(x = coord.x, y = coord.y, "press from node outside the level");
            return PressOutcome::Ignored;
        };

        let spec = &self.specs[self.index];
        if order != self.level.progress {
            debug!(
                x = coord.x,
                y = coord.y,
                order,
                progress = self.level.progress,
                "out-of-order press"
            );
            registry.send(coord, &Frame::Buzzer(FAIL_NOTES.to_string()));
            return PressOutcome::Failed;
        }

        self.level.progress += 1;
        if spec.locks_on_success {
            state.locked = true;
            registry.send(coord, &Frame::Lock);
        }
        registry.send(coord, &Frame::Buzzer(spec.note(order).to_string()));

        if self.level.progress == self.level.len() {
            PressOutcome::Success
        } else {
            PressOutcome::Advanced
        }
    }

    /// Regenerates the sequence for `connected`, zeroes progress, and sends
    /// every connected node its slot color and UNLOCK.
    pub fn reset(&mut self, connected: &[Coord], registry: &NodeRegistry) {
        self.regenerate(connected);
        info!(
            level = %self.spec().name,
            sequence = ?self.level.sequence(),
            "level reset"
        );
        self.redisplay(registry);
    }

    /// Moves to the next level (wrapping), draws its layout and resets.
    ///
    /// Returns the new level index.
    pub fn advance<C: CamuraiContext>(&mut self, ctx: &C, registry: &NodeRegistry) -> usize {
        let next = (self.index + 1) % self.specs.len();
        self.start(next, ctx, registry);
        next
    }

    /// Starts the level at `index` with a freshly drawn layout.
    pub fn start<C: CamuraiContext>(&mut self, index: usize, ctx: &C, registry: &NodeRegistry) {
        self.index = index % self.specs.len();
        self.draw_ranking(ctx);
        info!(level = %self.spec().name, index = self.index, "starting level");
        self.reset(&registry.connected(), registry);
    }

    /// Sends one node its display for the current state: slot color (or the
    /// empty color) followed by LOCK or UNLOCK.
    pub fn display_node(&self, coord: Coord, registry: &NodeRegistry) {
        let Some(state) = self.nodes.get(&coord) else {
            return;
        };
        let color = state.order.map_or(EMPTY_COLOR, |order| COLORS[order % COLORS.len()]);
        registry.send(coord, &Frame::Color(Some(color)));
        registry.send(coord, if state.locked { &Frame::Lock } else { &Frame::Unlock });
    }

    /// Sends every connected node its display.
    pub fn redisplay(&self, registry: &NodeRegistry) {
        for coord in self.nodes.keys() {
            if registry.is_connected(*coord) {
                self.display_node(*coord, registry);
            }
        }
    }

    /// Checks that node state agrees with the active level.
    pub fn invariants_hold(&self) -> bool {
        let level = &self.level;
        if level.progress > level.len() {
            return false;
        }
        self.nodes.iter().all(|(coord, state)| {
            let order_ok = state.order == level.order_of(*coord);
            let lock_ok = !state.locked || state.order.is_some_and(|o| o < level.progress);
            order_ok && lock_ok
        })
    }

    fn draw_ranking<C: CamuraiContext>(&mut self, ctx: &C) {
        self.ranking = self.nodes.keys().copied().collect();
        ctx.shuffle(&mut self.ranking);
    }

    fn regenerate(&mut self, connected: &[Coord]) {
        let sequence = match &self.specs[self.index].ordering {
            OrderingMode::Fixed { sequence } => sequence.clone(),
            OrderingMode::RandomSubset => self
                .ranking
                .iter()
                .filter(|c| connected.contains(c))
                .take(MAX_SEQUENCE)
                .copied()
                .collect(),
        };

        self.level = Level::new(sequence);
        for (coord, state) in self.nodes.iter_mut() {
            *state = NodeState {
                order: self.level.order_of(*coord),
                locked: false,
            };
        }
    }
}

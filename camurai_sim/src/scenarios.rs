//! Scenario catalogue for the simulation harness.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// SIM-001: Full 4x4 run through all four canonical levels
    CanonicalRun,

    /// SIM-002: Out-of-order first press fails, then the level restarts
    EarlyPress,

    /// SIM-003: A node reconnects mid-level and forces a reset
    MidGameReconnect,

    /// SIM-004: Connection from an address outside the table
    UnknownPeer,

    /// SIM-005: Every node pressed at once, in seeded random order
    RacingPresses,

    /// SIM-006: Random-subset levels over partial grids
    RandomLevels,

    /// SIM-007: Joy peak ripples across the grid
    Ripple,

    /// SIM-008: Step sequencer toggles and sweeps
    Sequencer,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::CanonicalRun,
            ScenarioId::EarlyPress,
            ScenarioId::MidGameReconnect,
            ScenarioId::UnknownPeer,
            ScenarioId::RacingPresses,
            ScenarioId::RandomLevels,
            ScenarioId::Ripple,
            ScenarioId::Sequencer,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::CanonicalRun => "canonical_run",
            ScenarioId::EarlyPress => "early_press",
            ScenarioId::MidGameReconnect => "mid_game_reconnect",
            ScenarioId::UnknownPeer => "unknown_peer",
            ScenarioId::RacingPresses => "racing_presses",
            ScenarioId::RandomLevels => "random_levels",
            ScenarioId::Ripple => "ripple",
            ScenarioId::Sequencer => "sequencer",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::CanonicalRun => "Diagonal, random, and their unlocked variants played to completion",
            ScenarioId::EarlyPress => "Press (1,1) first: fail jingle, reset, then (0,0) still counts",
            ScenarioId::MidGameReconnect => "Node outside the sequence reconnects at progress 1",
            ScenarioId::UnknownPeer => "Unknown address is closed without touching game state",
            ScenarioId::RacingPresses => "16 simultaneous presses keep progress within the level",
            ScenarioId::RandomLevels => "Random levels draw only from connected nodes",
            ScenarioId::Ripple => "Joy above the peak ripples rings out from the node",
            ScenarioId::Sequencer => "Toggled nodes play their row note as the sweep passes",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "canonical_run" | "canonical" | "sim-001" => Ok(ScenarioId::CanonicalRun),
            "early_press" | "sim-002" => Ok(ScenarioId::EarlyPress),
            "mid_game_reconnect" | "reconnect" | "sim-003" => Ok(ScenarioId::MidGameReconnect),
            "unknown_peer" | "sim-004" => Ok(ScenarioId::UnknownPeer),
            "racing_presses" | "racing" | "sim-005" => Ok(ScenarioId::RacingPresses),
            "random_levels" | "random" | "sim-006" => Ok(ScenarioId::RandomLevels),
            "ripple" | "sim-007" => Ok(ScenarioId::Ripple),
            "sequencer" | "sim-008" => Ok(ScenarioId::Sequencer),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

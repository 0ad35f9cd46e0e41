//! Step sequencer mode.
//!
//! Nodes toggle between enabled and disabled on press. A column sweep runs
//! continuously; each enabled node in the active column plays its row's note.

use crate::ambient::{AnimationStep, SWEEP_COLOR};
use crate::codec::Frame;
use crate::registry::NodeRegistry;
use camurai_env::{Coord, Rgb};
use std::collections::BTreeSet;
use tracing::debug;

/// Row colors, cycled for taller grids.
pub const ROW_COLORS: [Rgb; 5] = [
    Rgb::new(255, 0, 0),
    Rgb::new(255, 255, 0),
    Rgb::new(0, 255, 0),
    Rgb::new(0, 255, 255),
    Rgb::new(0, 0, 255),
];

/// Row notes, cycled for taller grids.
pub const ROW_NOTES: [&str; 5] = ["C4e", "D4e", "E4e", "G4e", "A4e"];

#[derive(Debug, Default)]
pub struct Sequencer {
    enabled: BTreeSet<Coord>,
}

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row_color(y: u16) -> Rgb {
        ROW_COLORS[y as usize % ROW_COLORS.len()]
    }

    pub fn row_note(y: u16) -> &'static str {
        ROW_NOTES[y as usize % ROW_NOTES.len()]
    }

    pub fn is_enabled(&self, coord: Coord) -> bool {
        self.enabled.contains(&coord)
    }

    /// Enabled nodes in grid order.
    pub fn enabled(&self) -> Vec<Coord> {
        self.enabled.iter().copied().collect()
    }

    /// Flips a node and shows its new state. Returns the new state.
    pub fn toggle(&mut self, coord: Coord, registry: &NodeRegistry) -> bool {
        let now_enabled = if self.enabled.remove(&coord) {
            false
        } else {
            self.enabled.insert(coord);
            true
        };
        debug!(x = coord.x, y = coord.y, enabled = now_enabled, "toggled");

        self.display_node(coord, registry);
        now_enabled
    }

    /// Enabled: row color + LOCK. Disabled: cleared.
    pub fn display_node(&self, coord: Coord, registry: &NodeRegistry) {
        if self.is_enabled(coord) {
            registry.send(coord, &Frame::Color(Some(Self::row_color(coord.y))));
            registry.send(coord, &Frame::Lock);
        } else {
            registry.send(coord, &Frame::Color(None));
        }
    }

    /// Renders a sweep step. Rings have no meaning here and are ignored.
    pub fn render(&self, step: &AnimationStep, registry: &NodeRegistry) {
        let AnimationStep::Column { x, active } = *step else {
            return;
        };

        for coord in step.targets(registry.coords()) {
            debug_assert_eq!(coord.x, x);
            if !registry.is_connected(coord) {
                continue;
            }
            match (self.is_enabled(coord), active) {
                (true, true) => registry.send(coord, &Frame::Buzzer(Self::row_note(coord.y).to_string())),
                (true, false) => {}
                (false, true) => {
                    registry.send(coord, &Frame::Color(Some(SWEEP_COLOR)));
                    registry.send(coord, &Frame::Lock);
                }
                (false, false) => {
                    registry.send(coord, &Frame::Color(None));
                    registry.send(coord, &Frame::Lock);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ambient::RippleMetric;
    use crate::registry::AddressTable;
    use tokio::sync::mpsc;

    fn drain(rx: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        while let Ok(bytes) = rx.try_recv() {
            out.push(bytes);
        }
        out
    }

    fn bytes(frame: Frame) -> Vec<u8> {
        frame.encode().unwrap()
    }

    #[test]
    fn test_toggle_shows_row_color() {
        let registry = NodeRegistry::new(4, 4, AddressTable::default());
        let coord = Coord::new(2, 1);
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.bind(coord, tx);
        let mut seq = Sequencer::new();

        assert!(seq.toggle(coord, &registry));
        assert_eq!(
            drain(&mut rx),
            vec![bytes(Frame::Color(Some(Rgb::new(255, 255, 0)))), bytes(Frame::Lock)]
        );

        assert!(!seq.toggle(coord, &registry));
        assert_eq!(drain(&mut rx), vec![bytes(Frame::Color(None))]);
        assert!(seq.enabled().is_empty());
    }

    #[test]
    fn test_active_column_plays_enabled_rows() {
        let registry = NodeRegistry::new(2, 2, AddressTable::default());
        let (tx_on, mut rx_on) = mpsc::unbounded_channel();
        let (tx_off, mut rx_off) = mpsc::unbounded_channel();
        registry.bind(Coord::new(1, 1), tx_on);
        registry.bind(Coord::new(1, 0), tx_off);

        let mut seq = Sequencer::new();
        seq.toggle(Coord::new(1, 1), &registry);
        drain(&mut rx_on);

        seq.render(&AnimationStep::Column { x: 1, active: true }, &registry);
        assert_eq!(drain(&mut rx_on), vec![bytes(Frame::Buzzer("D4e".to_string()))]);
        assert_eq!(
            drain(&mut rx_off),
            vec![bytes(Frame::Color(Some(SWEEP_COLOR))), bytes(Frame::Lock)]
        );

        seq.render(&AnimationStep::Column { x: 1, active: false }, &registry);
        assert!(drain(&mut rx_on).is_empty());
        assert_eq!(drain(&mut rx_off), vec![bytes(Frame::Color(None)), bytes(Frame::Lock)]);
    }

    #[test]
    fn test_rings_are_ignored() {
        let registry = NodeRegistry::new(2, 2, AddressTable::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.bind(Coord::new(0, 0), tx);

        let step = AnimationStep::Ring {
            origin: Coord::new(0, 0),
            distance: 0,
            metric: RippleMetric::Chebyshev,
            lit: true,
        };
        Sequencer::new().render(&step, &registry);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_rows_cycle() {
        assert_eq!(Sequencer::row_note(5), "C4e");
        assert_eq!(Sequencer::row_color(6), Rgb::new(255, 255, 0));
    }
}

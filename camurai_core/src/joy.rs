//! Joy detection with hysteresis over each node's intensity stream.

use crate::config::JoyConfig;
use camurai_env::Coord;
use std::collections::HashMap;
use tracing::info;

/// Threshold crossing for one JOY sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoyTransition {
    /// Rose above the peak threshold
    Detected,

    /// Fell below the minimum threshold
    Ended,
}

/// Keeps the previous intensity per node.
#[derive(Debug, Default)]
pub struct JoyTracker {
    peak: u8,
    min: u8,
    previous: HashMap<Coord, u8>,
}

impl JoyTracker {
    pub fn new(config: &JoyConfig) -> Self {
        Self {
            peak: config.peak,
            min: config.min,
            previous: HashMap::new(),
        }
    }

    /// Records a sample and reports a threshold crossing, if any.
    ///
    /// A node's first sample is compared against 0.
    pub fn update(&mut self, coord: Coord, intensity: u8) -> Option<JoyTransition> {
        let previous = self.previous.insert(coord, intensity).unwrap_or(0);

        if intensity > self.peak && self.peak >= previous {
            info!(x = coord.x, y = coord.y, intensity, "joy detected");
            Some(JoyTransition::Detected)
        } else if intensity < self.min && self.min <= previous {
            info!(x = coord.x, y = coord.y, intensity, "joy ended");
            Some(JoyTransition::Ended)
        } else {
            None
        }
    }

    /// Forgets a node's history, e.g. after it reconnects.
    pub fn forget(&mut self, coord: Coord) {
        self.previous.remove(&coord);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> JoyTracker {
        JoyTracker::new(&JoyConfig::default())
    }

    #[test]
    fn test_detect_once_per_rise() {
        let mut joy = tracker();
        let c = Coord::new(1, 2);

        assert_eq!(joy.update(c, 100), None);
        assert_eq!(joy.update(c, 200), Some(JoyTransition::Detected));
        // Staying high does not fire again
        assert_eq!(joy.update(c, 250), None);
        assert_eq!(joy.update(c, 129), None);
    }

    #[test]
    fn test_end_requires_falling_below_min() {
        let mut joy = tracker();
        let c = Coord::new(0, 0);

        joy.update(c, 200);
        assert_eq!(joy.update(c, 60), None);
        assert_eq!(joy.update(c, 10), Some(JoyTransition::Ended));
        assert_eq!(joy.update(c, 5), None);
    }

    #[test]
    fn test_peak_is_exclusive() {
        let mut joy = tracker();
        let c = Coord::new(3, 3);

        assert_eq!(joy.update(c, 128), None);
        assert_eq!(joy.update(c, 129), Some(JoyTransition::Detected));
    }

    #[test]
    fn test_nodes_are_tracked_separately() {
        let mut joy = tracker();

        joy.update(Coord::new(0, 0), 200);
        assert_eq!(joy.update(Coord::new(1, 0), 200), Some(JoyTransition::Detected));
    }

    #[test]
    fn test_forget_restarts_history() {
        let mut joy = tracker();
        let c = Coord::new(2, 2);

        joy.update(c, 200);
        joy.forget(c);
        assert_eq!(joy.update(c, 200), Some(JoyTransition::Detected));
    }
}

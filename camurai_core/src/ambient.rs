//! The Ambient Animator - idle-time light and sound patterns.
//!
//! Two patterns:
//! - **Column sweep**: one column lit at a time, right to left
//! - **Ripple**: rings spreading from an origin node, each ring lit with a
//!   color and tone keyed to its distance, then cleared
//!
//! The animator task only decides *when* and *what*; it emits semantic
//! [`AnimationStep`]s to the game loop, which renders them into frames.
//! That keeps every COLOR write serialized with level state, and lets the
//! game loop drop steps whenever the level is not pristine.

use crate::codec::Frame;
use crate::coordinator::{GameEvent, GameStatus};
use crate::level::LevelPhase;
use crate::registry::NodeRegistry;
use camurai_env::{CamuraiContext, Coord, Rgb};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::debug;

/// Column color during the sweep.
pub const SWEEP_COLOR: Rgb = Rgb::new(128, 128, 128);

/// Ring colors by distance (wrapping).
pub const RING_COLORS: [Rgb; 5] = [
    Rgb::new(255, 0, 0),
    Rgb::new(255, 255, 0),
    Rgb::new(0, 255, 0),
    Rgb::new(0, 255, 255),
    Rgb::new(0, 0, 255),
];

/// Ring tones by distance (wrapping).
pub const RING_NOTES: [&str; 5] = ["C4e", "D4e", "E4e", "G4e", "A4e"];

/// Ring shape for ripples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RippleMetric {
    /// Square rings
    #[default]
    Chebyshev,

    /// Diamond rings
    Manhattan,
}

impl RippleMetric {
    pub fn distance(self, a: Coord, b: Coord) -> u16 {
        match self {
            RippleMetric::Chebyshev => a.chebyshev(b),
            RippleMetric::Manhattan => a.manhattan(b),
        }
    }
}

/// One semantic animation change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimationStep {
    /// Light (`active`) or clear column `x`
    Column { x: u16, active: bool },

    /// Light (`lit`) or clear every node at `distance` from `origin`
    Ring {
        origin: Coord,
        distance: u16,
        metric: RippleMetric,
        lit: bool,
    },
}

impl AnimationStep {
    /// Nodes this step touches.
    pub fn targets(&self, grid: impl Iterator<Item = Coord>) -> Vec<Coord> {
        match *self {
            AnimationStep::Column { x, .. } => grid.filter(|c| c.x == x).collect(),
            AnimationStep::Ring { origin, distance, metric, .. } => {
                grid.filter(|c| metric.distance(origin, *c) == distance).collect()
            }
        }
    }
}

/// Steps applied together, followed by one delay.
pub type AnimationFrame = Vec<AnimationStep>;

/// Right-to-left sweep over `width` columns, ending with all columns clear.
pub fn column_sweep(width: u16) -> Vec<AnimationFrame> {
    let mut frames = Vec::new();
    let mut previous = None;

    for x in (0..width).rev() {
        let mut frame = Vec::new();
        if let Some(prev) = previous {
            frame.push(AnimationStep::Column { x: prev, active: false });
        }
        frame.push(AnimationStep::Column { x, active: true });
        frames.push(frame);
        previous = Some(x);
    }
    if let Some(prev) = previous {
        frames.push(vec![AnimationStep::Column { x: prev, active: false }]);
    }

    frames
}

/// Rings from `origin` out to the farthest cell of a `width x height` grid,
/// ending with the last ring cleared.
pub fn ripple(origin: Coord, width: u16, height: u16, metric: RippleMetric) -> Vec<AnimationFrame> {
    let corners = [
        Coord::new(0, 0),
        Coord::new(width.saturating_sub(1), 0),
        Coord::new(0, height.saturating_sub(1)),
        Coord::new(width.saturating_sub(1), height.saturating_sub(1)),
    ];
    let max = corners.iter().map(|c| metric.distance(origin, *c)).max().unwrap_or(0);

    let ring = |distance, lit| AnimationStep::Ring { origin, distance, metric, lit };
    let mut frames = Vec::new();
    for distance in 0..=max {
        let mut frame = Vec::new();
        if distance > 0 {
            frame.push(ring(distance - 1, false));
        }
        frame.push(ring(distance, true));
        frames.push(frame);
    }
    frames.push(vec![ring(max, false)]);

    frames
}

/// Renders a step with the plain ambient palette.
pub fn render_step(step: &AnimationStep, registry: &NodeRegistry) {
    for coord in step.targets(registry.coords()) {
        if !registry.is_connected(coord) {
            continue;
        }
        match *step {
            AnimationStep::Column { active, .. } => {
                registry.send(coord, &Frame::Color(active.then_some(SWEEP_COLOR)));
                registry.send(coord, &Frame::Lock);
            }
            AnimationStep::Ring { distance, lit: true, .. } => {
                let band = distance as usize % RING_COLORS.len();
                registry.send(coord, &Frame::Color(Some(RING_COLORS[band])));
                registry.send(coord, &Frame::Lock);
                registry.send(coord, &Frame::Buzzer(RING_NOTES[band].to_string()));
            }
            AnimationStep::Ring { lit: false, .. } => {
                registry.send(coord, &Frame::Color(None));
            }
        }
    }
}

/// Timing and switches for the animator task.
#[derive(Debug, Clone)]
pub struct AnimatorSettings {
    pub width: u16,
    pub height: u16,
    pub sweep: bool,
    pub idle_delay: Duration,
    pub sweep_step: Duration,
    pub ripple_step: Duration,
    pub metric: RippleMetric,
}

/// Background task that plays patterns while the level is pristine.
pub struct Animator<Ctx: CamuraiContext> {
    ctx: Arc<Ctx>,
    settings: AnimatorSettings,
    events: mpsc::UnboundedSender<GameEvent>,
    status: watch::Receiver<GameStatus>,
    ripples: mpsc::UnboundedReceiver<Coord>,

    /// False once the ripple sender is gone
    listening: bool,
}

impl<Ctx: CamuraiContext> Animator<Ctx> {
    pub fn new(
        ctx: Arc<Ctx>,
        settings: AnimatorSettings,
        events: mpsc::UnboundedSender<GameEvent>,
        status: watch::Receiver<GameStatus>,
        ripples: mpsc::UnboundedReceiver<Coord>,
    ) -> Self {
        Self {
            ctx,
            settings,
            events,
            status,
            ripples,
            listening: true,
        }
    }

    /// Runs until the game loop goes away.
    pub async fn run(mut self) {
        loop {
            // Nothing plays over a level in progress
            if self.status.wait_for(|s| s.phase == LevelPhase::Pristine).await.is_err() {
                return;
            }

            let sweep = self.settings.sweep;
            let listening = self.listening;
            let (frames, step) = tokio::select! {
                origin = self.ripples.recv(), if listening => match origin {
                    Some(origin) => (
                        ripple(origin, self.settings.width, self.settings.height, self.settings.metric),
                        self.settings.ripple_step,
                    ),
                    // Ripples are off; sweeping may still be on
                    None => {
                        self.listening = false;
                        if !sweep {
                            return;
                        }
                        continue;
                    }
                },
                _ = self.ctx.sleep(self.settings.idle_delay), if sweep => {
                    (column_sweep(self.settings.width), self.settings.sweep_step)
                }
            };

            if !self.play(frames, step).await {
                return;
            }
        }
    }

    /// Emits each frame then waits `step`. Stops early once the level
    /// leaves pristine. Returns false if the game loop is gone.
    async fn play(&mut self, frames: Vec<AnimationFrame>, step: Duration) -> bool {
        debug!(frames = frames.len(), "playing ambient pattern");

        for frame in frames {
            if self.status.borrow().phase != LevelPhase::Pristine {
                break;
            }
            for s in frame {
                if self.events.send(GameEvent::Animate(s)).is_err() {
                    return false;
                }
            }
            self.ctx.sleep(step).await;
        }

        self.events.send(GameEvent::AnimationDone).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::AddressTable;

    #[test]
    fn test_column_sweep_order() {
        let frames = column_sweep(3);

        assert_eq!(
            frames,
            vec![
                vec![AnimationStep::Column { x: 2, active: true }],
                vec![
                    AnimationStep::Column { x: 2, active: false },
                    AnimationStep::Column { x: 1, active: true },
                ],
                vec![
                    AnimationStep::Column { x: 1, active: false },
                    AnimationStep::Column { x: 0, active: true },
                ],
                vec![AnimationStep::Column { x: 0, active: false }],
            ]
        );
    }

    #[test]
    fn test_ripple_reaches_far_corner() {
        let origin = Coord::new(0, 0);
        let frames = ripple(origin, 4, 4, RippleMetric::Chebyshev);
        // Rings 0..=3 plus the final clear
        assert_eq!(frames.len(), 5);

        let frames = ripple(origin, 4, 4, RippleMetric::Manhattan);
        // Rings 0..=6 plus the final clear
        assert_eq!(frames.len(), 8);
        assert_eq!(
            frames.last().unwrap(),
            &vec![AnimationStep::Ring { origin, distance: 6, metric: RippleMetric::Manhattan, lit: false }]
        );
    }

    #[test]
    fn test_ring_targets() {
        let registry = NodeRegistry::new(4, 4, AddressTable::default());
        let origin = Coord::new(1, 1);

        let square = AnimationStep::Ring { origin, distance: 1, metric: RippleMetric::Chebyshev, lit: true };
        assert_eq!(square.targets(registry.coords()).len(), 8);

        let diamond = AnimationStep::Ring { origin, distance: 1, metric: RippleMetric::Manhattan, lit: true };
        let mut targets = diamond.targets(registry.coords());
        targets.sort();
        assert_eq!(
            targets,
            vec![Coord::new(0, 1), Coord::new(1, 0), Coord::new(1, 2), Coord::new(2, 1)]
        );
    }

    #[test]
    fn test_column_targets() {
        let registry = NodeRegistry::new(4, 3, AddressTable::default());
        let step = AnimationStep::Column { x: 2, active: true };
        let targets = step.targets(registry.coords());

        assert_eq!(targets.len(), 3);
        assert!(targets.iter().all(|c| c.x == 2));
    }

    #[test]
    fn test_render_ring_frames() {
        let registry = NodeRegistry::new(2, 1, AddressTable::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.bind(Coord::new(1, 0), tx);

        let step = AnimationStep::Ring {
            origin: Coord::new(0, 0),
            distance: 1,
            metric: RippleMetric::Chebyshev,
            lit: true,
        };
        render_step(&step, &registry);

        assert_eq!(rx.try_recv().unwrap(), Frame::Color(Some(RING_COLORS[1])).encode().unwrap());
        assert_eq!(rx.try_recv().unwrap(), Frame::Lock.encode().unwrap());
        assert_eq!(rx.try_recv().unwrap(), Frame::Buzzer("D4e".to_string()).encode().unwrap());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_runs_without_ripples() {
        let settings = AnimatorSettings {
            width: 2,
            height: 1,
            sweep: true,
            idle_delay: Duration::from_secs(5),
            sweep_step: Duration::from_millis(200),
            ripple_step: Duration::from_millis(150),
            metric: RippleMetric::Chebyshev,
        };
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (_status_tx, status_rx) = watch::channel(GameStatus {
            mode: crate::config::Mode::Game,
            phase: LevelPhase::Pristine,
            level_index: 0,
            level_name: "diagonal".to_string(),
            progress: 0,
            sequence: Vec::new(),
            levels_completed: 0,
            enabled: Vec::new(),
        });
        // Ripples disabled: nobody holds the sender
        let (_, ripples_rx) = mpsc::unbounded_channel();

        let animator = Animator::new(
            camurai_env::TokioContext::shared(),
            settings,
            events_tx,
            status_rx,
            ripples_rx,
        );
        tokio::spawn(animator.run());

        assert_eq!(
            events_rx.recv().await,
            Some(GameEvent::Animate(AnimationStep::Column { x: 1, active: true }))
        );
    }
}

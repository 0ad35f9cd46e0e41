//! The Coordinator - accept loop, per-node connection handlers and the
//! single game loop that owns all game state.
//!
//! # Task Layout
//!
//! ```text
//!  Acceptor ──► handler (per node) ──GameEvent──┐
//!                  │                            ▼
//!                  └─► writer (per link) ◄── game loop ──watch──► animator
//!                                               ▲                    │
//!                                               └──── Animate ───────┘
//! ```
//!
//! Handlers only translate inbound frames into [`GameEvent`]s. The game loop
//! is the only place level state changes, so presses, joins, resets and
//! animation rendering are serialized without locks.

use crate::ambient::{self, AnimationStep, Animator, AnimatorSettings};
use crate::codec::{read_frame, Frame};
use crate::config::{ConfigError, CoordinatorConfig, Mode};
use crate::error::CamuraiError;
use crate::joy::{JoyTracker, JoyTransition};
use crate::level::{LevelEngine, LevelPhase, PressOutcome};
use crate::registry::{LinkId, NodeRegistry};
use crate::sequencer::Sequencer;
use camurai_env::{Acceptor, CamuraiContext, Coord, EnvError};
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Everything the game loop reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameEvent {
    /// A node's link was bound
    Joined(Coord),

    Pressed(Coord),

    Released(Coord),

    /// Joy intensity sample from a node's camera
    Joy { coord: Coord, intensity: u8 },

    /// Ambient step to render, if the level is still pristine
    Animate(AnimationStep),

    /// The current ambient pattern has finished
    AnimationDone,
}

/// Snapshot published by the game loop after every event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameStatus {
    pub mode: Mode,
    pub phase: LevelPhase,
    pub level_index: usize,
    pub level_name: String,
    pub progress: usize,
    pub sequence: Vec<Coord>,
    pub levels_completed: u64,

    /// Sequencer mode only
    pub enabled: Vec<Coord>,
}

enum Game {
    Levels(LevelEngine),
    Sequencer(Sequencer),
}

/// Single owner of game state.
struct GameLoop<Ctx: CamuraiContext> {
    ctx: Arc<Ctx>,
    registry: Arc<NodeRegistry>,
    game: Game,
    joy: JoyTracker,
    ripples: Option<mpsc::UnboundedSender<Coord>>,
    success_delay: Duration,

    /// An ambient step has been rendered since the last redisplay
    animated: bool,

    levels_completed: u64,
    status: watch::Sender<GameStatus>,
}

impl<Ctx: CamuraiContext> GameLoop<Ctx> {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<GameEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event).await;
            self.publish();
        }
        debug!("game loop stopped");
    }

    async fn handle(&mut self, event: GameEvent) {
        match event {
            GameEvent::Joined(coord) => self.joined(coord),
            GameEvent::Pressed(coord) => self.pressed(coord).await,
            GameEvent::Released(coord) => {
                debug!(x = coord.x, y = coord.y, "button released");
            }
            GameEvent::Joy { coord, intensity } => self.joy(coord, intensity),
            GameEvent::Animate(step) => {
                if self.phase() != LevelPhase::Pristine {
                    return;
                }
                match &self.game {
                    Game::Levels(_) => ambient::render_step(&step, &self.registry),
                    Game::Sequencer(seq) => seq.render(&step, &self.registry),
                }
                self.animated = true;
            }
            GameEvent::AnimationDone => {
                if let Game::Levels(engine) = &self.game {
                    if self.animated && engine.phase() == LevelPhase::Pristine {
                        engine.redisplay(&self.registry);
                    }
                }
                self.animated = false;
            }
        }
    }

    fn joined(&mut self, coord: Coord) {
        self.joy.forget(coord);

        match &mut self.game {
            Game::Levels(engine) => {
                // An empty level can only fill up through a reset
                if engine.phase() == LevelPhase::Pristine && !engine.level().is_empty() {
                    engine.display_node(coord, &self.registry);
                } else {
                    info!(
                        x = coord.x,
                        y = coord.y,
                        progress = engine.level().progress(),
                        "node joined, resetting level"
                    );
                    engine.reset(&self.registry.connected(), &self.registry);
                }
            }
            Game::Sequencer(seq) => seq.display_node(coord, &self.registry),
        }
    }

    async fn pressed(&mut self, coord: Coord) {
        let engine = match &mut self.game {
            Game::Levels(engine) => engine,
            Game::Sequencer(seq) => {
                seq.toggle(coord, &self.registry);
                return;
            }
        };

        // Clear half-played ambient colors before the level moves on
        if self.animated {
            engine.redisplay(&self.registry);
            self.animated = false;
        }

        match engine.button_pressed(coord, &self.registry) {
            PressOutcome::Ignored => {}
            PressOutcome::Advanced => {
                debug!(x = coord.x, y = coord.y, progress = engine.level().progress(), "correct press");
            }
            PressOutcome::Failed => {
                info!(x = coord.x, y = coord.y, level = %engine.spec().name, "wrong press, level failed");
                engine.reset(&self.registry.connected(), &self.registry);
            }
            PressOutcome::Success => {
                self.levels_completed += 1;
                info!(
                    level = %engine.spec().name,
                    completed = self.levels_completed,
                    "level complete"
                );
                // Show Complete while the success delay runs
                self.publish();
                self.ctx.sleep(self.success_delay).await;

                if let Game::Levels(engine) = &mut self.game {
                    engine.advance(self.ctx.as_ref(), &self.registry);
                }
            }
        }
    }

    fn joy(&mut self, coord: Coord, intensity: u8) {
        let transition = self.joy.update(coord, intensity);
        if transition != Some(JoyTransition::Detected) || self.phase() != LevelPhase::Pristine {
            return;
        }
        if let Some(ripples) = &self.ripples {
            let _ = ripples.send(coord);
        }
    }

    fn phase(&self) -> LevelPhase {
        match &self.game {
            Game::Levels(engine) => engine.phase(),
            Game::Sequencer(_) => LevelPhase::Pristine,
        }
    }

    fn snapshot(&self) -> GameStatus {
        status_of(&self.game, self.levels_completed)
    }

    fn publish(&self) {
        self.status.send_replace(self.snapshot());
    }
}

/// Handle to a running coordinator.
///
/// Cheap to clone; every clone feeds the same game loop.
pub struct Coordinator<Ctx: CamuraiContext> {
    ctx: Arc<Ctx>,
    registry: Arc<NodeRegistry>,
    events: mpsc::UnboundedSender<GameEvent>,
    status: watch::Receiver<GameStatus>,
}

impl<Ctx: CamuraiContext> Clone for Coordinator<Ctx> {
    fn clone(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
            registry: Arc::clone(&self.registry),
            events: self.events.clone(),
            status: self.status.clone(),
        }
    }
}

impl<Ctx: CamuraiContext> Coordinator<Ctx> {
    /// Validates `config`, then spawns the game loop and, if any ambient
    /// pattern is enabled, the animator.
    pub fn launch(ctx: Arc<Ctx>, config: CoordinatorConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let (width, height) = (config.grid.width, config.grid.height);
        let addresses = config.address_table();
        if addresses.is_empty() {
            warn!("address table is empty, no node can join");
        }
        let nodes = addresses.len();
        let registry = Arc::new(NodeRegistry::new(width, height, addresses));

        let game = match config.mode {
            Mode::Game => Game::Levels(LevelEngine::new(
                config.levels.clone(),
                config.grid.coords(),
                ctx.as_ref(),
            )),
            Mode::Sequencer => Game::Sequencer(Sequencer::new()),
        };

        // The sequencer sweeps without pause and has no use for ripples
        let (sweep, idle_delay, ripple_on_joy) = match config.mode {
            Mode::Game => (config.ambient.sweep, config.timing.idle_delay(), config.ambient.ripple_on_joy),
            Mode::Sequencer => (true, Duration::ZERO, false),
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (ripples_tx, ripples_rx) = mpsc::unbounded_channel();

        let (status_tx, status_rx) = watch::channel(status_of(&game, 0));

        let game_loop = GameLoop {
            ctx: Arc::clone(&ctx),
            registry: Arc::clone(&registry),
            game,
            joy: JoyTracker::new(&config.joy),
            ripples: ripple_on_joy.then_some(ripples_tx),
            success_delay: config.timing.success_delay(),
            animated: false,
            levels_completed: 0,
            status: status_tx,
        };

        info!(
            mode = ?config.mode,
            width,
            height,
            levels = config.levels.len(),
            nodes,
            seed = ctx.seed(),
            "coordinator starting"
        );
        ctx.spawn("game-loop", game_loop.run(events_rx));

        if sweep || ripple_on_joy {
            let settings = AnimatorSettings {
                width,
                height,
                sweep,
                idle_delay,
                sweep_step: config.timing.sweep_step(),
                ripple_step: config.timing.ripple_step(),
                metric: config.ambient.ripple_metric,
            };
            let animator = Animator::new(
                Arc::clone(&ctx),
                settings,
                events_tx.clone(),
                status_rx.clone(),
                ripples_rx,
            );
            ctx.spawn("animator", animator.run());
        }

        Ok(Self {
            ctx,
            registry,
            events: events_tx,
            status: status_rx,
        })
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Receiver for the status published after every game event.
    pub fn status(&self) -> watch::Receiver<GameStatus> {
        self.status.clone()
    }

    /// The latest published status.
    pub fn snapshot(&self) -> GameStatus {
        self.status.borrow().clone()
    }

    /// Accepts connections until the acceptor closes.
    ///
    /// Transient accept errors are logged and skipped.
    pub async fn serve<A: Acceptor>(&self, acceptor: A) -> Result<(), EnvError> {
        if let Some(addr) = acceptor.local_addr() {
            info!(%addr, "listening for nodes");
        }

        loop {
            match acceptor.accept().await {
                Ok((stream, peer)) => {
                    let coordinator = self.clone();
                    self.ctx.spawn("node", async move {
                        let _ = coordinator.handle_connection(stream, peer).await;
                    });
                }
                Err(EnvError::Closed) => {
                    info!("acceptor closed");
                    return Ok(());
                }
                Err(e) => warn!("accept failed: {}", e),
            }
        }
    }

    /// Like [`serve`](Self::serve), but stops accepting once `shutdown`
    /// resolves.
    pub async fn serve_until<A, F>(&self, acceptor: A, shutdown: F) -> Result<(), EnvError>
    where
        A: Acceptor,
        F: Future<Output = ()>,
    {
        tokio::select! {
            result = self.serve(acceptor) => result,
            _ = shutdown => {
                info!("shutting down");
                Ok(())
            }
        }
    }

    /// Runs one node connection to completion.
    ///
    /// Unknown peers are rejected before any state changes. Closes, transport
    /// failures and a replaced link count as a disconnect and return `Ok`;
    /// malformed frames are returned after the node has been unbound.
    pub async fn handle_connection<S>(&self, stream: S, peer: IpAddr) -> Result<(), CamuraiError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let coord = match self.registry.resolve(peer) {
            Ok(coord) => coord,
            Err(e) => {
                warn!(%peer, "unknown address, closing connection");
                return Err(e);
            }
        };
        info!(%peer, x = coord.x, y = coord.y, "node connected");

        let (mut reader, writer) = tokio::io::split(stream);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let link = self.registry.bind(coord, outbound_tx);
        self.ctx.spawn("writer", write_loop(writer, outbound_rx, coord));

        let _ = self.events.send(GameEvent::Joined(coord));
        let result = self.read_loop(&mut reader, coord, link).await;
        self.registry.unbind(coord, link);

        match result {
            Ok(()) => {
                info!(%peer, x = coord.x, y = coord.y, "node disconnected");
                Ok(())
            }
            Err(e) if e.is_disconnect() => {
                info!(%peer, x = coord.x, y = coord.y, "node disconnected: {}", e);
                Ok(())
            }
            Err(e) => {
                warn!(%peer, x = coord.x, y = coord.y, "dropping connection: {}", e);
                Err(e)
            }
        }
    }

    async fn read_loop<R>(&self, reader: &mut R, coord: Coord, link: LinkId) -> Result<(), CamuraiError>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            let frame = read_frame(reader).await?;
            debug!(x = coord.x, y = coord.y, ?frame, "frame received");

            // A reconnect took over this node
            if !self.registry.is_current(coord, link) {
                info!(x = coord.x, y = coord.y, "link replaced, closing stale connection");
                return Ok(());
            }

            let event = match frame {
                Frame::ButtonPressed => GameEvent::Pressed(coord),
                Frame::ButtonReleased => GameEvent::Released(coord),
                Frame::Joy(intensity) => GameEvent::Joy { coord, intensity },
                other => {
                    warn!(x = coord.x, y = coord.y, kind = ?other.kind(), "ignoring command frame from node");
                    continue;
                }
            };

            if self.events.send(event).is_err() {
                // Game loop is gone
                return Ok(());
            }
        }
    }
}

/// Drains a link's queue into the write half until the link is dropped or
/// a write fails.
async fn write_loop<W>(mut writer: W, mut outbound: mpsc::UnboundedReceiver<Vec<u8>>, coord: Coord)
where
    W: AsyncWrite + Unpin,
{
    while let Some(bytes) = outbound.recv().await {
        if let Err(e) = writer.write_all(&bytes).await {
            warn!(x = coord.x, y = coord.y, "write failed: {}", e);
            return;
        }
    }
    let _ = writer.shutdown().await;
}

fn status_of(game: &Game, levels_completed: u64) -> GameStatus {
    match game {
        Game::Levels(engine) => GameStatus {
            mode: Mode::Game,
            phase: engine.phase(),
            level_index: engine.index(),
            level_name: engine.spec().name.clone(),
            progress: engine.level().progress(),
            sequence: engine.level().sequence().to_vec(),
            levels_completed,
            enabled: Vec::new(),
        },
        Game::Sequencer(seq) => GameStatus {
            mode: Mode::Sequencer,
            phase: LevelPhase::Pristine,
            level_index: 0,
            level_name: "sequencer".to_string(),
            progress: 0,
            sequence: Vec::new(),
            levels_completed: 0,
            enabled: seq.enabled(),
        },
    }
}

//! Task decomposition: a model that moves a character and a view that renders it.
//!
//! The two roles share nothing but [`SharedModelState`]. The producer is the
//! only writer of the position fields; the renderer only reads them. Each field
//! is its own atomic, published with release stores and read with acquire
//! loads, so the renderer always sees the latest value of each field without
//! taking a lock. The pair is not a compound snapshot: a frame may show the
//! new `x` with the previous `y`.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::thread;

use crossbeam::utils::CachePadded;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::config::GameConfig;
use crate::error::{ConcurrencyError, ConfigError, Result};
use crate::pool::{WorkItem, WorkerPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[derive(Debug)]
pub struct SharedModelState {
    x: CachePadded<AtomicI32>,
    y: CachePadded<AtomicI32>,
    updates: CachePadded<AtomicU32>,
    running: CachePadded<AtomicBool>,
    stop_requested: AtomicBool,
}

impl SharedModelState {
    pub fn new(start: Position) -> Self {
        Self {
            x: CachePadded::new(AtomicI32::new(start.x)),
            y: CachePadded::new(AtomicI32::new(start.y)),
            updates: CachePadded::new(AtomicU32::new(0)),
            running: CachePadded::new(AtomicBool::new(true)),
            stop_requested: AtomicBool::new(false),
        }
    }

    pub fn position(&self) -> Position {
        Position {
            x: self.x.load(Ordering::Acquire),
            y: self.y.load(Ordering::Acquire),
        }
    }

    pub fn updates(&self) -> u32 {
        self.updates.load(Ordering::Acquire)
    }

    /// The completion flag: true until the producer stops.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Asks the producer to stop at its next cycle boundary.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    fn publish(&self, position: Position) {
        self.x.store(position.x, Ordering::Release);
        self.y.store(position.y, Ordering::Release);
        self.updates.fetch_add(1, Ordering::AcqRel);
    }

    fn finish(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Clears the completion flag when the producer exits, however it exits.
struct CompleteOnDrop<'a>(&'a SharedModelState);

impl Drop for CompleteOnDrop<'_> {
    fn drop(&mut self) {
        self.0.finish();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerState {
    Initializing,
    Updating,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererState {
    Observing,
    Stopped,
}

/// The model role: a bounded random walk, one step per cycle.
pub struct Producer<'a> {
    shared: &'a SharedModelState,
    config: &'a GameConfig,
    rng: StdRng,
    state: ProducerState,
}

impl<'a> Producer<'a> {
    /// `config` must be free of [`GameConfig::problems`]; a zero step has no
    /// range to draw from.
    pub fn new(shared: &'a SharedModelState, config: &'a GameConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            shared,
            config,
            rng,
            state: ProducerState::Initializing,
        }
    }

    pub fn state(&self) -> ProducerState {
        self.state
    }

    fn clamp(&self, value: i32) -> i32 {
        value.clamp(self.config.min_coordinate, self.config.max_coordinate)
    }

    fn step(&mut self, from: Position) -> Position {
        let step = self.config.max_step;
        let dx = self.rng.gen_range(-step..step);
        let dy = self.rng.gen_range(-step..step);
        Position {
            x: self.clamp(from.x.saturating_add(dx)),
            y: self.clamp(from.y.saturating_add(dy)),
        }
    }

    /// Runs every cycle and returns the published positions in order.
    /// Leaves the producer in [`ProducerState::Stopped`] either way.
    pub fn run(&mut self) -> Result<Vec<Position>> {
        let _complete = CompleteOnDrop(self.shared);
        info!("model starting");
        self.state = ProducerState::Updating;

        let mut history = Vec::with_capacity(self.config.cycles as usize);
        let mut position = self.shared.position();

        for cycle in 0..self.config.cycles {
            if self.shared.stop_requested() {
                self.state = ProducerState::Stopped;
                warn!(cycle, "model interrupted");
                return Err(ConcurrencyError::Interrupted {
                    worker: thread::current().name().unwrap_or("model").to_string(),
                });
            }

            position = self.step(position);
            self.shared.publish(position);
            history.push(position);
            info!("Model: updated position to {position}");

            thread::sleep(self.config.producer_interval());
        }

        self.state = ProducerState::Stopped;
        info!("model ending");
        Ok(history)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub position: Position,
    /// How many updates the model had published when the frame was drawn.
    pub updates_seen: u32,
}

/// The view role: renders whatever the model last published, at its own pace.
pub struct Renderer<'a> {
    shared: &'a SharedModelState,
    config: &'a GameConfig,
    state: RendererState,
}

impl<'a> Renderer<'a> {
    pub fn new(shared: &'a SharedModelState, config: &'a GameConfig) -> Self {
        Self {
            shared,
            config,
            state: RendererState::Observing,
        }
    }

    pub fn state(&self) -> RendererState {
        self.state
    }

    pub fn run(&mut self) -> Result<Vec<Frame>> {
        info!("view starting");
        let mut frames = Vec::new();

        while self.state == RendererState::Observing {
            let frame = Frame {
                position: self.shared.position(),
                updates_seen: self.shared.updates(),
            };
            info!("View: rendering character at {}", frame.position);
            frames.push(frame);

            thread::sleep(self.config.renderer_interval());
            if !self.shared.is_running() {
                self.state = RendererState::Stopped;
            }
        }

        info!(frames = frames.len(), "view ending");
        Ok(frames)
    }
}

enum RoleOutput {
    Model(Vec<Position>),
    View(Vec<Frame>),
}

#[derive(Debug)]
pub struct GameRun {
    pub history: Result<Vec<Position>>,
    pub frames: Result<Vec<Frame>>,
}

/// Runs the model and the view on two workers until the model completes.
#[derive(Debug, Clone)]
pub struct TaskDecompositionPair {
    config: GameConfig,
}

impl TaskDecompositionPair {
    /// Rejects a config the model could not walk (no cycles, an empty
    /// domain, a non-positive step).
    pub fn new(config: GameConfig) -> Result<Self> {
        let problems = config.problems();
        if !problems.is_empty() {
            return Err(ConfigError::Invalid { problems }.into());
        }
        Ok(Self { config })
    }

    pub fn start_position(&self) -> Position {
        Position {
            x: self.config.min_coordinate,
            y: self.config.min_coordinate,
        }
    }

    pub fn run(&self) -> GameRun {
        let shared = SharedModelState::new(self.start_position());
        self.run_on(&shared)
    }

    /// Runs against caller-owned state so the caller can observe it or
    /// request an early stop from another thread.
    pub fn run_on(&self, shared: &SharedModelState) -> GameRun {
        let config = &self.config;
        let items = vec![
            WorkItem::named("Model", move || {
                let mut producer = Producer::new(shared, config);
                let history = producer.run();
                debug!(state = ?producer.state(), "model role done");
                history.map(RoleOutput::Model)
            }),
            WorkItem::named("View", move || {
                let mut renderer = Renderer::new(shared, config);
                let frames = renderer.run();
                debug!(state = ?renderer.state(), "view role done");
                frames.map(RoleOutput::View)
            }),
        ];

        let mut outcomes = WorkerPool::new("game")
            .launch_and_join(items)
            .into_outcomes()
            .into_iter();
        let history = match outcomes.next() {
            Some(Ok(RoleOutput::Model(history))) => Ok(history),
            Some(Err(err)) => Err(err),
            _ => Err(ConcurrencyError::Interrupted {
                worker: "Model".into(),
            }),
        };
        let frames = match outcomes.next() {
            Some(Ok(RoleOutput::View(frames))) => Ok(frames),
            Some(Err(err)) => Err(err),
            _ => Err(ConcurrencyError::Interrupted {
                worker: "View".into(),
            }),
        };

        debug!(updates = shared.updates(), "game simulation joined");
        GameRun { history, frames }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn fast_config(cycles: u32, seed: u64) -> GameConfig {
        GameConfig {
            cycles,
            producer_interval_ms: 2,
            renderer_interval_ms: 3,
            seed: Some(seed),
            ..GameConfig::default()
        }
    }

    #[test]
    fn test_producer_walk_stays_in_domain() {
        let config = fast_config(30, 42);
        let run = TaskDecompositionPair::new(config.clone()).unwrap().run();
        let history = run.history.unwrap();

        assert_eq!(history.len(), 30);
        let mut previous = Position { x: 0, y: 0 };
        for position in &history {
            assert!((0..=100).contains(&position.x));
            assert!((0..=100).contains(&position.y));
            assert!((position.x - previous.x).abs() <= config.max_step);
            assert!((position.y - previous.y).abs() <= config.max_step);
            previous = *position;
        }
    }

    #[test]
    fn test_renderer_terminates_after_producer() {
        let config = fast_config(10, 1);
        let pair = TaskDecompositionPair::new(config).unwrap();
        let shared = SharedModelState::new(pair.start_position());

        let run = pair.run_on(&shared);
        let frames = run.frames.unwrap();
        let history = run.history.unwrap();

        assert!(!shared.is_running());
        assert_eq!(shared.updates(), 10);
        assert!(!frames.is_empty());
        assert_eq!(shared.position(), *history.last().unwrap());
        for frame in &frames {
            assert!(frame.updates_seen <= 10);
        }
        // renders never go backwards in time
        for pair in frames.windows(2) {
            assert!(pair[0].updates_seen <= pair[1].updates_seen);
        }
    }

    #[test]
    fn test_seeded_walk_is_reproducible() {
        let first = TaskDecompositionPair::new(fast_config(12, 99)).unwrap().run();
        let second = TaskDecompositionPair::new(fast_config(12, 99)).unwrap().run();
        assert_eq!(first.history.unwrap(), second.history.unwrap());
    }

    #[test]
    fn test_slow_renderer_still_sees_a_frame() {
        let config = GameConfig {
            renderer_interval_ms: 50,
            ..fast_config(3, 5)
        };
        let run = TaskDecompositionPair::new(config).unwrap().run();
        assert_eq!(run.frames.unwrap().len(), 1);
        assert_eq!(run.history.unwrap().len(), 3);
    }

    #[test]
    fn test_stop_request_interrupts_producer_only() {
        let config = GameConfig {
            cycles: 10_000,
            ..fast_config(0, 3)
        };
        let pair = TaskDecompositionPair::new(config).unwrap();
        let shared = SharedModelState::new(pair.start_position());

        let run = thread::scope(|s| {
            let handle = s.spawn(|| pair.run_on(&shared));
            thread::sleep(Duration::from_millis(20));
            shared.request_stop();
            handle.join().unwrap()
        });

        assert!(matches!(run.history, Err(ConcurrencyError::Interrupted { .. })));
        assert!(run.frames.is_ok());
        assert!(!shared.is_running());
        assert!(shared.updates() < 10_000);
    }

    #[test]
    fn test_completion_flag_cleared_on_unwind() {
        let shared = SharedModelState::new(Position { x: 1, y: 1 });
        let result = thread::scope(|s| {
            s.spawn(|| {
                let _complete = CompleteOnDrop(&shared);
                panic!("model crashed");
            })
            .join()
        });

        assert!(result.is_err());
        assert!(!shared.is_running());
    }

    #[test]
    fn test_role_states() {
        let config = fast_config(3, 0);
        let shared = SharedModelState::new(Position { x: 0, y: 0 });

        let mut producer = Producer::new(&shared, &config);
        assert_eq!(producer.state(), ProducerState::Initializing);
        assert_eq!(producer.run().unwrap().len(), 3);
        assert_eq!(producer.state(), ProducerState::Stopped);

        // the model already finished, so the view draws one frame and stops
        let mut renderer = Renderer::new(&shared, &config);
        assert_eq!(renderer.state(), RendererState::Observing);
        assert_eq!(renderer.run().unwrap().len(), 1);
        assert_eq!(renderer.state(), RendererState::Stopped);
    }

    #[test]
    fn test_interrupted_producer_ends_stopped() {
        let config = fast_config(5, 0);
        let shared = SharedModelState::new(Position { x: 0, y: 0 });
        shared.request_stop();

        let mut producer = Producer::new(&shared, &config);
        assert!(matches!(producer.run(), Err(ConcurrencyError::Interrupted { .. })));
        assert_eq!(producer.state(), ProducerState::Stopped);
        assert_eq!(shared.updates(), 0);
        assert!(!shared.is_running());
    }

    #[test]
    fn test_unwalkable_config_is_rejected() {
        for config in [
            GameConfig {
                max_step: 0,
                ..fast_config(3, 0)
            },
            GameConfig {
                min_coordinate: 50,
                max_coordinate: 10,
                ..fast_config(3, 0)
            },
            fast_config(0, 0),
        ] {
            let err = TaskDecompositionPair::new(config).unwrap_err();
            assert!(matches!(err, ConcurrencyError::Config(ConfigError::Invalid { .. })));
        }
    }

    #[test]
    fn test_walk_near_the_integer_limit_saturates() {
        let config = GameConfig {
            min_coordinate: i32::MAX - 10,
            max_coordinate: i32::MAX,
            ..fast_config(20, 7)
        };
        let history = TaskDecompositionPair::new(config).unwrap().run().history.unwrap();
        assert!(history.iter().all(|p| p.x >= i32::MAX - 10 && p.y >= i32::MAX - 10));
    }
}

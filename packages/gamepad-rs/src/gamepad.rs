//! The coordinator: ties a [`Worker`], the level stores and a game together.
//!
//! The worker decides *when* a step runs and in which direction. The
//! coordinator sits between the worker and the game and keeps the level
//! stores in lockstep with history:
//!
//! ```text
//! Worker ──► Coordinator::manage(request, back, replay)
//!               │
//!               ├─► taps (highlight)
//!               ├─► level switch on STARTED / FINISHED boundaries
//!               ├─► replay: unload / load the store's changesets
//!               ├─► game.manage(request, back, replay)
//!               ├─► drop the step if a reset happened meanwhile
//!               ├─► lifecycle update
//!               └─► fresh: commit the store
//! ```
//!
//! # Example
//!
//! ```ignore
//! let levels = Levels::new(json!([{"n": 0}, {"n": 10}]))?;
//! let gamepad = Gamepad::builder()
//!     .with_levels(levels.clone())
//!     .with_game(MyGame::new(levels))
//!     .build()?;
//!
//! let source = gamepad.load(2)?;
//! tokio::spawn(program::run(source, 2, my_body));
//!
//! gamepad.forward().await;
//! gamepad.backward().await;
//! ```

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::breakpoint::BreakpointHit;
use crate::change::ChangeBatch;
use crate::config::GamepadConfig;
use crate::error::{Cancelled, GamepadError};
use crate::handler::{StepHandler, StepOutcome};
use crate::lock;
use crate::manager::Levels;
use crate::request::{Request, COMPLETED, FINISHED, STARTED};
use crate::tap::{StepTap, TapContext, TapRegistry};
use crate::worker::{step_is_live, StepSource, Worker};

/// Where the program stands relative to its levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Started,
    Finished,
    Completed,
}

impl Lifecycle {
    /// The lifecycle state a request announces, if any.
    pub fn of(request: &Request) -> Option<Self> {
        match request.method() {
            STARTED => Some(Lifecycle::Started),
            FINISHED => Some(Lifecycle::Finished),
            COMPLETED => Some(Lifecycle::Completed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::Started => STARTED,
            Lifecycle::Finished => FINISHED,
            Lifecycle::Completed => COMPLETED,
        }
    }
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Coordinator
// =============================================================================

struct Coordinator {
    config: GamepadConfig,
    levels: Levels,
    state: Mutex<Lifecycle>,
    game: Arc<dyn StepHandler>,
    taps: TapRegistry,
}

impl Coordinator {
    fn state(&self) -> Lifecycle {
        *lock(&self.state)
    }

    fn set_state(&self, state: Lifecycle) {
        *lock(&self.state) = state;
    }

    /// Move between levels on lifecycle boundaries.
    fn switch_level(&self, request: &Request, back: bool) {
        let state = self.state();
        let switched = match Lifecycle::of(request) {
            Some(Lifecycle::Started)
                if !back && matches!(state, Lifecycle::Finished | Lifecycle::Completed) =>
            {
                self.levels.with(|manager| manager.load_next())
            }
            Some(Lifecycle::Finished | Lifecycle::Completed)
                if back && state == Lifecycle::Started =>
            {
                self.levels.with(|manager| manager.load_prior())
            }
            _ => false,
        };
        if switched {
            info!(level = self.levels.index(), back, "level switched");
        }
    }
}

#[async_trait]
impl StepHandler for Coordinator {
    async fn manage(&self, request: &Request, back: bool, replay: bool) -> Result<StepOutcome> {
        if !step_is_live() {
            return Err(Cancelled::Closed.into());
        }

        if self.config.highlight {
            self.taps.run_all(request, &TapContext::new(back, replay));
        }

        self.switch_level(request, back);

        let tracked = self.config.magic_json && !request.is(COMPLETED);
        if tracked && replay && !request.is_generated() {
            let moved = self.levels.with(|manager| {
                if back {
                    manager.unload_changes()
                } else {
                    manager.load_changes()
                }
            })?;
            debug!(id = request.id(), back, moved, "store replayed");
        }

        let outcome = self.game.manage(request, back, replay).await?;

        // The stores belong to the new epoch after a reset
        if !step_is_live() {
            debug!(id = request.id(), "step outlived its epoch");
            return Err(Cancelled::Closed.into());
        }

        if let Some(state) = Lifecycle::of(request) {
            self.set_state(state);
        }

        if tracked && !replay {
            self.levels.with(|manager| manager.commit());
        }

        Ok(outcome)
    }
}

// =============================================================================
// Gamepad
// =============================================================================

/// Controls a stepwise program: load it, step it, run it, debug it.
///
/// Must be built and used inside a tokio runtime.
pub struct Gamepad {
    coordinator: Arc<Coordinator>,
    worker: Worker,
}

impl Gamepad {
    pub fn builder() -> GamepadBuilder {
        GamepadBuilder::new()
    }

    /// Start a fresh run of the program `times` times.
    ///
    /// Resets the lifecycle, the worker and every level store, and returns
    /// the step source for the new epoch.
    pub fn load(&self, times: usize) -> Result<StepSource, GamepadError> {
        if times < 1 {
            return Err(GamepadError::invalid("times must be a number greater than 0"));
        }
        self.coordinator.set_state(Lifecycle::Started);
        self.worker.reset();
        self.coordinator.levels.with(|manager| manager.reset())?;
        info!(times, generation = self.worker.generation(), "program loaded");
        Ok(self.worker.instance()?)
    }

    /// Reset the lifecycle, the level stores and the worker.
    pub fn reset(&self) -> Result<(), GamepadError> {
        self.coordinator.set_state(Lifecycle::Started);
        self.coordinator.levels.with(|manager| manager.reset())?;
        self.worker.reset();
        Ok(())
    }

    /// Stop running and execute one step forward.
    pub async fn forward(&self) -> bool {
        self.worker.stop();
        self.worker.go(false).await
    }

    /// Stop running and execute one step backward.
    pub async fn backward(&self) -> bool {
        self.worker.stop();
        self.worker.go(true).await
    }

    /// Run continuously in the given direction.
    pub fn play(&self, back: bool) {
        self.worker.remove_breakpoint();
        self.worker.free_queue();
        self.worker.start(back);
    }

    pub fn pause(&self) {
        self.worker.stop();
        self.worker.free_queue();
    }

    pub fn toggle_play(&self) {
        if self.worker.is_running() {
            self.pause();
        } else {
            self.play(self.worker.direction());
        }
    }

    /// Run until the step `id` is reached.
    pub fn debug(&self, id: &str, back: bool) -> Option<BreakpointHit> {
        let hit = self.worker.set_breakpoint(Some(id));
        self.worker.start(back);
        hit
    }

    /// Replace the levels. `levels` must be a JSON array.
    pub fn set_levels(&self, levels: Value) -> Result<(), GamepadError> {
        if !levels.is_array() {
            return Err(GamepadError::invalid("levels argument must be an array"));
        }
        self.coordinator.levels.with(|manager| manager.init(levels))?;
        Ok(())
    }

    /// Replace the levels with a single one.
    pub fn set_level(&self, level: Value) -> Result<(), GamepadError> {
        self.set_levels(json!([level]))
    }

    /// Snapshot of the current level.
    pub fn level(&self) -> Option<Value> {
        self.coordinator.levels.level()
    }

    /// Snapshots of every level.
    pub fn levels(&self) -> Vec<Value> {
        self.coordinator.levels.with(|manager| manager.levels())
    }

    /// Shared handle to the level stores.
    pub fn stores(&self) -> &Levels {
        &self.coordinator.levels
    }

    /// Change batches for the level at `index`.
    ///
    /// The receiver outlives a [`set_levels`](Self::set_levels) but goes
    /// quiet: the rebuilt stores have fresh feeds.
    pub fn subscribe_level(&self, index: usize) -> Option<broadcast::Receiver<ChangeBatch>> {
        self.coordinator
            .levels
            .with(|manager| manager.stores().get(index).map(|store| store.subscribe()))
    }

    /// The step source for the live epoch.
    pub fn instance(&self) -> Result<StepSource, Cancelled> {
        self.worker.instance()
    }

    pub fn state(&self) -> Lifecycle {
        self.coordinator.state()
    }

    pub fn config(&self) -> &GamepadConfig {
        &self.coordinator.config
    }

    pub fn worker(&self) -> &Worker {
        &self.worker
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_running()
    }
}

impl std::fmt::Debug for Gamepad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gamepad")
            .field("config", &self.coordinator.config)
            .field("state", &self.state())
            .field("worker", &self.worker)
            .finish()
    }
}

// =============================================================================
// Gamepad Builder
// =============================================================================

/// Builder for a [`Gamepad`].
pub struct GamepadBuilder {
    config: GamepadConfig,
    levels: Option<Levels>,
    game: Option<Arc<dyn StepHandler>>,
    taps: TapRegistry,
}

impl Default for GamepadBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GamepadBuilder {
    pub fn new() -> Self {
        Self {
            config: GamepadConfig::default(),
            levels: None,
            game: None,
            taps: TapRegistry::new(),
        }
    }

    pub fn with_config(mut self, config: GamepadConfig) -> Self {
        self.config = config;
        self
    }

    /// Share level stores with the game. Defaults to an empty level list.
    pub fn with_levels(mut self, levels: Levels) -> Self {
        self.levels = Some(levels);
        self
    }

    /// Set the game every step is delegated to.
    pub fn with_game<G: StepHandler>(mut self, game: G) -> Self {
        self.game = Some(Arc::new(game));
        self
    }

    /// Register a step tap, notified when `highlight` is on.
    pub fn with_tap<T: StepTap>(mut self, tap: T, name: &'static str) -> Self {
        self.taps.register(tap, name);
        self
    }

    /// Build the gamepad and start its first epoch. A game is required.
    pub fn build(self) -> Result<Gamepad, GamepadError> {
        let game = self
            .game
            .ok_or_else(|| GamepadError::invalid("gamepad requires a game"))?;
        let levels = match self.levels {
            Some(levels) => levels,
            None => Levels::new(json!([]))?,
        };

        let coordinator = Arc::new(Coordinator {
            config: self.config,
            levels,
            state: Mutex::new(Lifecycle::Started),
            game,
            taps: self.taps,
        });
        let worker = Worker::builder()
            .with_shared_handler(coordinator.clone())
            .build()?;

        let gamepad = Gamepad {
            coordinator,
            worker,
        };
        gamepad.reset()?;
        Ok(gamepad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::BatchKind;
    use crate::program;
    use std::time::Duration;

    /// Adds `args[0]` to `n` on fresh `ADD` steps. Replays leave the tree
    /// alone: the stores replay it.
    struct Adder {
        levels: Levels,
        goal: i64,
    }

    #[async_trait]
    impl StepHandler for Adder {
        async fn manage(&self, request: &Request, _back: bool, replay: bool) -> Result<StepOutcome> {
            if replay {
                return Ok(StepOutcome::none());
            }
            match request.method() {
                "ADD" => {
                    let delta = request.args().first().and_then(Value::as_i64).unwrap_or(0);
                    let n = self.levels.with_store(|store| {
                        let tree = store.tree_mut();
                        let root = tree.root();
                        let n = tree.get(root, "n")?.and_then(|v| v.as_i64()).unwrap_or(0) + delta;
                        tree.set(root, "n", json!(n))?;
                        Ok::<_, crate::error::TreeError>(n)
                    });
                    Ok(StepOutcome::Return(json!(n.transpose()?)))
                }
                "SLOW" => {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(StepOutcome::none())
                }
                FINISHED => {
                    let n = self.levels.level().and_then(|level| level["n"].as_i64());
                    if n == Some(self.goal) {
                        Ok(StepOutcome::none())
                    } else {
                        Ok(StepOutcome::Completed)
                    }
                }
                _ => Ok(StepOutcome::none()),
            }
        }
    }

    fn gamepad(source: Value, goal: i64) -> Gamepad {
        let levels = Levels::new(source).unwrap();
        Gamepad::builder()
            .with_levels(levels.clone())
            .with_game(Adder { levels, goal })
            .build()
            .unwrap()
    }

    fn add(id: &str, n: i64) -> Request {
        Request::new("ADD", vec![json!(n)], id)
    }

    async fn drive(source: StepSource, times: usize, steps: Vec<Request>) -> Result<()> {
        let body_source = source.clone();
        program::run(&source, times, move |_| {
            let source = body_source.clone();
            let steps = steps.clone();
            async move {
                for step in steps {
                    source.submit(step).await?;
                }
                Ok::<_, anyhow::Error>(())
            }
        })
        .await
    }

    #[tokio::test]
    async fn test_load_rejects_zero_times() {
        let gamepad = gamepad(json!([{"n": 0}]), 0);
        assert!(matches!(gamepad.load(0), Err(GamepadError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_set_levels_requires_array() {
        let gamepad = gamepad(json!([{"n": 0}]), 0);
        assert!(matches!(
            gamepad.set_levels(json!({"n": 1})),
            Err(GamepadError::InvalidArgument(_))
        ));
        gamepad.set_level(json!({"n": 7})).unwrap();
        assert_eq!(gamepad.levels(), vec![json!({"n": 7})]);
    }

    #[tokio::test]
    async fn test_build_requires_game() {
        assert!(matches!(
            Gamepad::builder().build(),
            Err(GamepadError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_forward_then_backward_restores_level() {
        let gamepad = gamepad(json!([{"n": 0}]), 3);
        let source = gamepad.load(1).unwrap();
        let program = tokio::spawn(drive(source, 1, vec![add("a", 1), add("b", 2)]));

        // STARTED, a, b
        for _ in 0..3 {
            assert!(gamepad.forward().await);
        }
        assert_eq!(gamepad.level(), Some(json!({"n": 3})));

        assert!(gamepad.backward().await);
        assert_eq!(gamepad.level(), Some(json!({"n": 1})));
        assert!(gamepad.backward().await);
        assert_eq!(gamepad.level(), Some(json!({"n": 0})));

        // Replay forward to the end, then FINISHED and the program closes
        assert!(gamepad.forward().await);
        assert!(gamepad.forward().await);
        assert_eq!(gamepad.level(), Some(json!({"n": 3})));
        assert!(gamepad.forward().await);
        assert_eq!(gamepad.state(), Lifecycle::Finished);

        program.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_levels_switch_forward_and_back() {
        let gamepad = gamepad(json!([{"n": 0}, {"n": 0}]), 1);
        let source = gamepad.load(2).unwrap();
        let program = tokio::spawn(drive(source, 2, vec![add("a", 1)]));

        // STARTED a FINISHED | STARTED a FINISHED | COMPLETED
        gamepad.play(false);
        program.await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(gamepad.stores().index(), 1);
        assert_eq!(gamepad.levels(), vec![json!({"n": 1}), json!({"n": 1})]);
        assert_eq!(gamepad.state(), Lifecycle::Completed);

        // Back over COMPLETED, FINISHED, a, STARTED of level two
        for _ in 0..4 {
            assert!(gamepad.backward().await);
        }
        assert_eq!(gamepad.levels(), vec![json!({"n": 1}), json!({"n": 0})]);
        assert_eq!(gamepad.stores().index(), 1);

        // FINISHED of level one switches back
        assert!(gamepad.backward().await);
        assert_eq!(gamepad.stores().index(), 0);
        assert_eq!(gamepad.state(), Lifecycle::Finished);
    }

    #[tokio::test]
    async fn test_failed_goal_completes_the_program() {
        let gamepad = gamepad(json!([{"n": 0}, {"n": 0}]), 99);
        let source = gamepad.load(2).unwrap();
        let program = tokio::spawn(drive(source, 2, vec![add("a", 1)]));

        gamepad.play(false);
        program.await.unwrap().unwrap();

        let (history, _) = gamepad.worker().history();
        let methods: Vec<&str> = history.iter().map(Request::method).collect();
        assert_eq!(methods, vec![STARTED, "ADD", FINISHED, COMPLETED]);
        assert!(history[3].is_generated());
        assert_eq!(gamepad.stores().index(), 0);
    }

    #[tokio::test]
    async fn test_debug_stops_at_breakpoint() {
        let gamepad = gamepad(json!([{"n": 0}]), 6);
        let source = gamepad.load(1).unwrap();
        let _program = tokio::spawn(drive(source, 1, vec![add("a", 1), add("b", 2), add("c", 3)]));

        let hit = gamepad.debug("b", false).unwrap();
        assert!(hit.wait().await);
        assert!(!gamepad.is_running());
        assert_eq!(gamepad.level(), Some(json!({"n": 3})));
    }

    #[tokio::test]
    async fn test_level_feed_sees_commits_and_undo() {
        let gamepad = gamepad(json!([{"n": 0}]), 1);
        let source = gamepad.load(1).unwrap();
        let mut feed = gamepad.subscribe_level(0).unwrap();
        let _program = tokio::spawn(drive(source, 1, vec![add("a", 1)]));

        assert!(gamepad.forward().await);
        assert!(gamepad.forward().await);
        assert!(gamepad.backward().await);

        let commit = feed.recv().await.unwrap();
        assert_eq!(commit.kind, BatchKind::Commit);
        assert_eq!(commit.changes.len(), 1);
        let undo = feed.recv().await.unwrap();
        assert_eq!(undo.kind, BatchKind::Undo);
    }

    #[tokio::test]
    async fn test_taps_only_run_with_highlight() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let levels = Levels::new(json!([{"n": 0}])).unwrap();
        let recorder = {
            let seen = seen.clone();
            move |request: &Request, _: &TapContext| -> Result<()> {
                seen.lock().unwrap().push(request.id().to_string());
                Ok(())
            }
        };
        let gamepad = Gamepad::builder()
            .with_config(GamepadConfig {
                magic_json: true,
                highlight: true,
            })
            .with_levels(levels.clone())
            .with_game(Adder { levels, goal: 1 })
            .with_tap(recorder, "recorder")
            .build()
            .unwrap();

        let source = gamepad.load(1).unwrap();
        let _program = tokio::spawn(drive(source, 1, vec![add("a", 1)]));
        assert!(gamepad.forward().await);
        assert!(gamepad.forward().await);

        assert_eq!(*seen.lock().unwrap(), vec![STARTED.to_string(), "a".to_string()]);
    }

    #[tokio::test]
    async fn test_step_in_flight_during_load_leaves_fresh_stores_alone() {
        let gamepad = gamepad(json!([{"n": 0}]), 0);
        let source = gamepad.load(1).unwrap();
        let _program = tokio::spawn(drive(source, 1, vec![Request::new("SLOW", vec![], "slow")]));
        assert!(gamepad.forward().await);

        // Reload while the game is still inside SLOW
        let (stepped, reloaded) = tokio::join!(gamepad.forward(), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            gamepad.load(1)
        });
        assert!(!stepped);
        let _fresh = reloaded.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        let (history, cursor) = gamepad.worker().history();
        assert!(history.is_empty());
        assert_eq!(cursor, -1);
        let store = gamepad
            .stores()
            .with(|manager| manager.store().map(|store| (store.commits().len(), store.cursor())));
        assert_eq!(store, Some((0, -1)));
        assert_eq!(gamepad.level(), Some(json!({"n": 0})));
    }

    #[tokio::test]
    async fn test_reset_closes_loaded_source() {
        let gamepad = gamepad(json!([{"n": 0}]), 1);
        let source = gamepad.load(1).unwrap();
        gamepad.reset().unwrap();
        assert!(!source.is_live());
        assert_eq!(gamepad.state(), Lifecycle::Started);
    }
}

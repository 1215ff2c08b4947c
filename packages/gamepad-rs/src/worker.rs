//! The execution engine.
//!
//! A [`Worker`] owns a cooperative main loop that turns navigation intents
//! (forward / backward) into step executions:
//!
//! ```text
//!                    go(back) / start(back)
//!                             │
//!                             ▼
//!   ┌──────────── navigation mailbox ◄──── free_queue() resolves false
//!   │
//!   ▼
//! intent ── back ──► history.current ─► handler(back, replay) ─► history.prior
//!   │
//!   └──── forward ─► history.next? ──yes──► handler(forward, replay)
//!                         │
//!                         no
//!                         ▼
//!                  requests mailbox ◄──── StepSource::submit(request)
//!                         │
//!                         ▼
//!            handler(forward, fresh) ─► history.add ─► reply to source
//! ```
//!
//! Each epoch (see [`EpochGuard`]) gets fresh mailboxes, history and
//! breakpoint. A [`reset`](Worker::reset) invalidates the old epoch: its
//! loop and every [`StepSource`] bound to it fail with
//! [`Cancelled::Closed`] on their next access.
//!
//! # Example
//!
//! ```ignore
//! let worker = Worker::builder().with_handler(MyGame::new()).build()?;
//! worker.reset();
//!
//! let source = worker.instance()?;
//! tokio::spawn(async move {
//!     program::run(&source, 1, |_| async { Ok(()) }).await
//! });
//!
//! worker.go(false).await; // one step forward
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::breakpoint::{Breakpoint, BreakpointHit};
use crate::epoch::{EpochGuard, Scoped};
use crate::error::{Cancelled, GamepadError, StepError};
use crate::handler::{StepHandler, StepOutcome};
use crate::history::History;
use crate::lock;
use crate::mailbox::Mailbox;
use crate::request::{Request, COMPLETED, FINISHED, STARTED};

// =============================================================================
// Per-epoch state
// =============================================================================

/// A discrete forward/backward request.
struct Navigation {
    back: bool,
    done: Option<oneshot::Sender<bool>>,
}

/// A step submitted by the step source, waiting for its reply.
struct PendingStep {
    request: Request,
    reply: oneshot::Sender<Result<Value, StepError>>,
}

impl PendingStep {
    fn resolve(self, result: Result<Value, StepError>) {
        // The source may have stopped waiting
        let _ = self.reply.send(result);
    }
}

pub(crate) struct WorkerState {
    history: Mutex<History<Request>>,
    navigation: Mailbox<Navigation>,
    requests: Mailbox<PendingStep>,
    breakpoint: Mutex<Breakpoint>,
    running: AtomicBool,
    back: AtomicBool,
}

impl WorkerState {
    fn new() -> Self {
        Self {
            history: Mutex::new(History::new()),
            navigation: Mailbox::new(),
            requests: Mailbox::new(),
            breakpoint: Mutex::new(Breakpoint::new()),
            running: AtomicBool::new(false),
            back: AtomicBool::new(false),
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn direction(&self) -> bool {
        self.back.load(Ordering::Acquire)
    }

    fn start(&self, back: bool) {
        self.back.store(back, Ordering::Release);
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        // Release a loop suspended on the navigation mailbox
        self.navigation.close();
        self.navigation.open();
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.remove_breakpoint();
    }

    fn free_queue(&self) {
        let dropped = self.navigation.drain();
        if !dropped.is_empty() {
            debug!(count = dropped.len(), "navigation queue freed");
        }
        for navigation in dropped {
            if let Some(done) = navigation.done {
                let _ = done.send(false);
            }
        }
        self.remove_breakpoint();
    }

    fn set_breakpoint(&self, id: Option<String>) -> Option<BreakpointHit> {
        lock(&self.breakpoint).set(id)
    }

    fn remove_breakpoint(&self) {
        lock(&self.breakpoint).remove();
    }

    /// Pause if `id` is the armed breakpoint.
    fn check_breakpoint(&self, id: &str) {
        if lock(&self.breakpoint).check(id) {
            self.free_queue();
            self.stop();
        }
    }

    fn close(&self) {
        self.requests.close();
    }

    /// Tear down on reset: nothing queued may stay pending.
    fn shutdown(&self) {
        self.free_queue();
        self.navigation.reset();
        self.requests.reset();
        lock(&self.history).reset();
        self.remove_breakpoint();
    }
}

// =============================================================================
// Main loop
// =============================================================================

tokio::task_local! {
    /// The epoch of the loop executing the current step.
    static LOOP_EPOCH: Scoped<WorkerState>;
}

/// Returns false once the worker epoch running the current step has been
/// reset. Always true outside a worker loop.
pub(crate) fn step_is_live() -> bool {
    LOOP_EPOCH.try_with(Scoped::is_live).unwrap_or(true)
}

enum Halt {
    Cancelled(Cancelled),
    Fault(anyhow::Error),
}

impl From<Cancelled> for Halt {
    fn from(cancelled: Cancelled) -> Self {
        Halt::Cancelled(cancelled)
    }
}

async fn run_loop(scope: Scoped<WorkerState>, handler: Arc<dyn StepHandler>) {
    let generation = scope.generation();
    info!(generation, "worker loop started");

    let outcome = LOOP_EPOCH
        .scope(scope.clone(), drive(&scope, handler.as_ref()))
        .await;
    match outcome {
        Ok(()) => {}
        Err(Halt::Cancelled(reason)) => {
            debug!(generation, %reason, "worker loop closed");
        }
        Err(Halt::Fault(e)) => {
            error!(generation, error = %e, "worker loop halted");
        }
    }
}

async fn drive(scope: &Scoped<WorkerState>, handler: &dyn StepHandler) -> Result<(), Halt> {
    loop {
        let state = scope.get()?;

        let intent = if state.is_running() {
            Navigation {
                back: state.direction(),
                done: None,
            }
        } else {
            match state.navigation.get().await? {
                Some(navigation) => navigation,
                None => {
                    // Woken by start() or a drain; re-evaluate
                    tokio::task::yield_now().await;
                    continue;
                }
            }
        };

        let advanced = if intent.back {
            backward(scope, handler).await?
        } else {
            forward(scope, handler).await?
        };

        scope.get()?;
        if let Some(done) = intent.done {
            let _ = done.send(advanced);
        }
    }
}

async fn manage(
    handler: &dyn StepHandler,
    state: &WorkerState,
    request: &Request,
    back: bool,
    replay: bool,
) -> Result<StepOutcome, Halt> {
    debug!(
        id = request.id(),
        method = request.method(),
        back,
        replay,
        "step"
    );
    handler
        .manage(request, back, replay)
        .await
        .map_err(|e| match e.downcast_ref::<Cancelled>() {
            Some(cancelled) => Halt::Cancelled(*cancelled),
            None => {
                error!(
                    id = request.id(),
                    method = request.method(),
                    error = %e,
                    "step handler failed"
                );
                state.stop();
                Halt::Fault(e)
            }
        })
}

/// Replay the current entry backward. Returns false at the start of
/// history.
async fn backward(scope: &Scoped<WorkerState>, handler: &dyn StepHandler) -> Result<bool, Halt> {
    let state = scope.get()?;
    let Some(request) = lock(&state.history).current() else {
        state.stop();
        return Ok(false);
    };

    manage(handler, state, &request, true, true).await?;

    let state = scope.get()?;
    let now = {
        let mut history = lock(&state.history);
        history.prior();
        history.current()
    };
    if let Some(now) = now {
        state.check_breakpoint(now.id());
    }
    Ok(true)
}

/// Replay the next recorded entry, or execute a fresh step. Returns false
/// when history did not move: the step mailbox is closed or the step was
/// rejected.
async fn forward(scope: &Scoped<WorkerState>, handler: &dyn StepHandler) -> Result<bool, Halt> {
    let state = scope.get()?;

    let recorded = lock(&state.history).next();
    if let Some(request) = recorded {
        manage(handler, state, &request, false, true).await?;
        scope.get()?.check_breakpoint(request.id());
        return Ok(true);
    }

    let Some(pending) = state.requests.get().await? else {
        state.stop();
        return Ok(false);
    };
    let state = scope.get()?;

    // Steps running past the end of a level or of the program are stale
    let current = lock(&state.history).current();
    if let Some(current) = current {
        if current.is(FINISHED)
            && !pending.request.is(STARTED)
            && !pending.request.is(COMPLETED)
        {
            debug!(id = pending.request.id(), "rejecting step after level end");
            pending.resolve(Err(Cancelled::Finished.into()));
            return Ok(false);
        }
        if current.is(COMPLETED) {
            debug!(id = pending.request.id(), "rejecting step after completion");
            pending.resolve(Err(Cancelled::Completed.into()));
            state.stop();
            state.close();
            return Ok(false);
        }
    }

    let outcome = match manage(handler, state, &pending.request, false, false).await {
        Ok(outcome) => outcome,
        Err(halt) => {
            if let Halt::Fault(e) = &halt {
                let fault = StepError::Fault {
                    id: pending.request.id().to_string(),
                    method: pending.request.method().to_string(),
                    message: format!("{e:#}"),
                };
                pending.resolve(Err(fault));
            }
            return Err(halt);
        }
    };

    let state = scope.get()?;
    lock(&state.history).add(pending.request.clone(), true);
    state.check_breakpoint(pending.request.id());

    match outcome {
        StepOutcome::Return(value) => pending.resolve(Ok(value)),
        StepOutcome::Finished => {
            lock(&state.history).add(Request::generated(FINISHED), true);
            state.check_breakpoint(FINISHED);
            pending.resolve(Err(Cancelled::Finished.into()));
        }
        StepOutcome::Completed => {
            lock(&state.history).add(Request::generated(COMPLETED), true);
            state.check_breakpoint(COMPLETED);
            pending.resolve(Err(Cancelled::Completed.into()));
            state.close();
        }
    }
    Ok(true)
}

// =============================================================================
// Step Source
// =============================================================================

/// The step source's view of one worker epoch.
///
/// Every call fails with [`Cancelled::Closed`] once the worker has been
/// reset.
#[derive(Clone)]
pub struct StepSource {
    scope: Scoped<WorkerState>,
}

impl StepSource {
    /// Submit one step and wait until the engine processes it.
    ///
    /// Resolves to the handler's return value, or fails with `Finished`
    /// (the level ended), `Completed` (every level ended), `Closed` (the
    /// worker was reset) or a handler fault.
    pub async fn submit(&self, request: Request) -> Result<Value, StepError> {
        let state = self.scope.get()?;
        let (reply, rx) = oneshot::channel();
        state.requests.set(PendingStep { request, reply });
        rx.await.unwrap_or(Err(Cancelled::Closed.into()))
    }

    /// Stop accepting steps for good.
    pub fn close(&self) -> Result<(), Cancelled> {
        self.scope.get()?.close();
        Ok(())
    }

    /// Returns true until the worker is reset.
    pub fn is_live(&self) -> bool {
        self.scope.is_live()
    }
}

impl std::fmt::Debug for StepSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepSource")
            .field("scope", &self.scope)
            .finish()
    }
}

// =============================================================================
// Worker
// =============================================================================

/// Handle to the execution engine.
///
/// The worker is inert until the first [`reset`](Self::reset), which
/// starts the first epoch. Must be used inside a tokio runtime.
pub struct Worker {
    guard: EpochGuard<WorkerState>,
    handler: Arc<dyn StepHandler>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    pub fn builder() -> WorkerBuilder {
        WorkerBuilder::new()
    }

    /// Shorthand for a builder with just a handler.
    pub fn new<H: StepHandler>(handler: H) -> Self {
        Self::from_arc(Arc::new(handler))
    }

    fn from_arc(handler: Arc<dyn StepHandler>) -> Self {
        Self {
            guard: EpochGuard::new(),
            handler,
            task: Mutex::new(None),
        }
    }

    /// Invalidate the live epoch and start a fresh one.
    ///
    /// Queued navigation requests resolve to false, queued steps fail with
    /// `Closed`, history and breakpoint are cleared.
    pub fn reset(&self) {
        self.guard.reset(|previous| {
            if let Some(state) = previous {
                state.shutdown();
            }
        });

        let handler = self.handler.clone();
        let spawned = self.guard.run(WorkerState::new, |scope| {
            tokio::spawn(run_loop(scope, handler))
        });
        if let Some(task) = spawned {
            // The previous loop exits on its own once it sees the reset
            lock(&self.task).replace(task);
        }
    }

    /// The step source handle for the live epoch.
    pub fn instance(&self) -> Result<StepSource, Cancelled> {
        let scope = self.live()?;
        Ok(StepSource { scope })
    }

    /// Run continuously in the given direction. Only the direction changes
    /// if already running.
    pub fn start(&self, back: bool) {
        self.with_state(|state| state.start(back));
    }

    /// Stop running continuously and clear the breakpoint.
    pub fn stop(&self) {
        self.with_state(WorkerState::stop);
    }

    /// Execute one step in the given direction and wait for it.
    ///
    /// Returns true when history moved. Returns false when there was
    /// nothing to do (start of history, closed step mailbox, rejected
    /// step), when the request was discarded (queue freed, reset), or when
    /// the worker is running continuously, in which case nothing is
    /// enqueued.
    pub async fn go(&self, back: bool) -> bool {
        let rx = self.with_state(|state| {
            if state.is_running() {
                return None;
            }
            let (done, rx) = oneshot::channel();
            state.navigation.set(Navigation {
                back,
                done: Some(done),
            });
            Some(rx)
        });

        match rx.flatten() {
            Some(rx) => rx.await.unwrap_or(false),
            None => false,
        }
    }

    /// Stop accepting new steps.
    pub fn close(&self) {
        self.with_state(WorkerState::close);
    }

    /// Accept new steps again.
    pub fn open(&self) {
        self.with_state(|state| state.requests.open());
    }

    /// Arm a breakpoint on a step id, or clear it with `None`.
    ///
    /// The returned future resolves to true when the id is reached, false
    /// if the breakpoint is replaced, removed or freed first.
    pub fn set_breakpoint(&self, id: Option<&str>) -> Option<BreakpointHit> {
        self.with_state(|state| state.set_breakpoint(id.map(str::to_string)))
            .flatten()
    }

    pub fn remove_breakpoint(&self) {
        self.with_state(WorkerState::remove_breakpoint);
    }

    /// Resolve every queued navigation request with false and clear the
    /// breakpoint.
    pub fn free_queue(&self) {
        self.with_state(WorkerState::free_queue);
    }

    pub fn is_running(&self) -> bool {
        self.with_state(WorkerState::is_running).unwrap_or(false)
    }

    /// The running direction: true for backward.
    pub fn direction(&self) -> bool {
        self.with_state(WorkerState::direction).unwrap_or(false)
    }

    /// Every recorded step of the live epoch, and the cursor.
    pub fn history(&self) -> (Vec<Request>, isize) {
        self.with_state(|state| {
            let history = lock(&state.history);
            (history.entries().to_vec(), history.cursor())
        })
        .unwrap_or((Vec::new(), -1))
    }

    /// The live epoch's generation.
    pub fn generation(&self) -> u64 {
        self.guard.generation()
    }

    fn live(&self) -> Result<Scoped<WorkerState>, Cancelled> {
        let scope = self.guard.current().ok_or(Cancelled::Closed)?;
        scope.get()?;
        Ok(scope)
    }

    fn with_state<R>(&self, f: impl FnOnce(&WorkerState) -> R) -> Option<R> {
        let scope = self.live().ok()?;
        let state = scope.get().ok()?;
        Some(f(state))
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Ok(scope) = self.live() {
            if let Ok(state) = scope.get() {
                state.shutdown();
            }
        }
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("generation", &self.generation())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Worker Builder
// =============================================================================

/// Builder for a [`Worker`].
#[derive(Default)]
pub struct WorkerBuilder {
    handler: Option<Arc<dyn StepHandler>>,
}

impl WorkerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the step handler.
    pub fn with_handler<H: StepHandler>(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Set a shared step handler.
    pub fn with_shared_handler(mut self, handler: Arc<dyn StepHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Build the worker. A handler is required.
    pub fn build(self) -> Result<Worker, GamepadError> {
        let handler = self
            .handler
            .ok_or_else(|| GamepadError::invalid("worker requires a step handler"))?;
        Ok(Worker::from_arc(handler))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Scope;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Records every call; `FIN` finishes the level, `END` completes,
    /// `BOOM` fails.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(String, bool, bool)>>,
    }

    impl Recorder {
        fn calls(&self) -> Vec<(String, bool, bool)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl StepHandler for Recorder {
        async fn manage(&self, request: &Request, back: bool, replay: bool) -> anyhow::Result<StepOutcome> {
            self.calls
                .lock()
                .unwrap()
                .push((request.id().to_string(), back, replay));
            match request.method() {
                "FIN" => Ok(StepOutcome::Finished),
                "END" => Ok(StepOutcome::Completed),
                "BOOM" => anyhow::bail!("boom"),
                _ => Ok(StepOutcome::Return(json!(request.id()))),
            }
        }
    }

    fn worker() -> (Worker, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let worker = Worker::builder()
            .with_shared_handler(recorder.clone())
            .build()
            .unwrap();
        worker.reset();
        (worker, recorder)
    }

    fn step(id: &str) -> Request {
        Request::new("MOVE", vec![], id)
    }

    /// Submit steps in the background; results come back in order.
    fn feed(
        source: &StepSource,
        requests: Vec<Request>,
    ) -> tokio::task::JoinHandle<Vec<Result<Value, StepError>>> {
        let source = source.clone();
        tokio::spawn(async move {
            let mut results = Vec::new();
            for request in requests {
                results.push(source.submit(request).await);
            }
            results
        })
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[test]
    fn test_build_requires_handler() {
        assert!(matches!(
            Worker::builder().build(),
            Err(GamepadError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_forward_executes_then_backward_replays() {
        let (worker, recorder) = worker();
        let source = worker.instance().unwrap();
        let results = feed(&source, vec![step("a"), step("b")]);

        assert!(worker.go(false).await);
        assert!(worker.go(false).await);
        assert_eq!(results.await.unwrap().len(), 2);

        assert!(worker.go(true).await);
        assert!(worker.go(false).await);

        assert_eq!(
            recorder.calls(),
            vec![
                ("a".into(), false, false),
                ("b".into(), false, false),
                ("b".into(), true, true),
                ("b".into(), false, true),
            ]
        );
        let (history, cursor) = worker.history();
        assert_eq!(history.len(), 2);
        assert_eq!(cursor, 1);
    }

    #[tokio::test]
    async fn test_backward_at_start_stops() {
        let (worker, recorder) = worker();
        worker.start(true);
        settle().await;

        assert!(!worker.is_running());
        assert!(recorder.calls().is_empty());
    }

    #[tokio::test]
    async fn test_go_reports_whether_history_moved() {
        let (worker, _recorder) = worker();
        let source = worker.instance().unwrap();

        assert!(!worker.go(true).await);

        let results = feed(&source, vec![step("a")]);
        assert!(worker.go(false).await);
        assert_eq!(results.await.unwrap().len(), 1);
        assert!(worker.go(true).await);
        assert!(!worker.go(true).await);

        let (_, cursor) = worker.history();
        assert_eq!(cursor, -1);
    }

    #[tokio::test]
    async fn test_cancelled_handler_ends_the_loop_quietly() {
        let worker = Worker::new(|_: &Request, _: bool, _: bool| -> anyhow::Result<StepOutcome> {
            Err(Cancelled::Closed.into())
        });
        worker.reset();
        let source = worker.instance().unwrap();
        let results = feed(&source, vec![step("a")]);

        assert!(!worker.go(false).await);
        let results = results.await.unwrap();
        assert_eq!(results[0].as_ref().unwrap_err().cancelled(), Some(Cancelled::Closed));
        assert!(worker.history().0.is_empty());
    }

    #[tokio::test]
    async fn test_go_while_running_is_noop() {
        let (worker, _recorder) = worker();
        worker.start(false);

        assert!(!worker.go(false).await);
        worker.stop();
    }

    #[tokio::test]
    async fn test_finished_rejects_stale_steps_without_handler() {
        let (worker, recorder) = worker();
        let source = worker.instance().unwrap();
        let results = feed(
            &source,
            vec![
                Request::new("FIN", vec![], "f"),
                step("stale"),
                Request::lifecycle(STARTED),
            ],
        );

        worker.start(false);
        let results = results.await.unwrap();

        assert_eq!(results[0].as_ref().unwrap_err().cancelled(), Some(Cancelled::Finished));
        assert_eq!(results[1].as_ref().unwrap_err().cancelled(), Some(Cancelled::Finished));
        assert_eq!(results[2].as_ref().unwrap(), &json!(STARTED));

        let ids: Vec<String> = recorder.calls().into_iter().map(|c| c.0).collect();
        assert_eq!(ids, vec!["f".to_string(), STARTED.to_string()]);

        let (history, _) = worker.history();
        assert!(history[1].is_generated());
        assert_eq!(history[1].method(), FINISHED);
    }

    #[tokio::test]
    async fn test_completed_closes_step_mailbox() {
        let (worker, recorder) = worker();
        let source = worker.instance().unwrap();
        let results = feed(&source, vec![Request::new("END", vec![], "e")]);

        assert!(worker.go(false).await);
        let results = results.await.unwrap();
        assert!(results[0].as_ref().unwrap_err().is_expected_by(Scope::Program));

        // The mailbox is closed: a further forward has nothing to execute
        let late = feed(&source, vec![step("late")]);
        assert!(!worker.go(false).await);
        settle().await;
        assert!(!late.is_finished());
        assert_eq!(recorder.calls().len(), 1);

        worker.reset();
        let late = late.await.unwrap();
        assert_eq!(late[0].as_ref().unwrap_err().cancelled(), Some(Cancelled::Closed));
    }

    #[tokio::test]
    async fn test_handler_fault_is_reported_and_halts() {
        let (worker, _recorder) = worker();
        let source = worker.instance().unwrap();
        let results = feed(&source, vec![Request::new("BOOM", vec![], "x")]);

        assert!(!worker.go(false).await);
        let results = results.await.unwrap();
        match &results[0] {
            Err(StepError::Fault { id, method, message }) => {
                assert_eq!(id, "x");
                assert_eq!(method, "BOOM");
                assert_eq!(message, "boom");
            }
            other => panic!("expected fault, got {other:?}"),
        }

        // Halted: further navigation is never processed
        let pending = tokio::time::timeout(Duration::from_millis(50), worker.go(false)).await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn test_reset_resolves_pending_navigation_false() {
        let (worker, _recorder) = worker();
        let worker = Arc::new(worker);

        // Nothing submitted: the first go blocks on the step mailbox
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let worker = worker.clone();
                tokio::spawn(async move { worker.go(false).await })
            })
            .collect();
        settle().await;

        worker.reset();

        for waiter in waiters {
            assert!(!waiter.await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_stale_source_is_closed_after_reset() {
        let (worker, _recorder) = worker();
        let stale = worker.instance().unwrap();
        worker.reset();

        assert!(!stale.is_live());
        assert_eq!(
            stale.submit(step("a")).await.unwrap_err().cancelled(),
            Some(Cancelled::Closed)
        );
        assert!(worker.instance().unwrap().is_live());
    }

    #[tokio::test]
    async fn test_breakpoint_pauses_running_once() {
        let (worker, recorder) = worker();
        let source = worker.instance().unwrap();
        let _results = feed(&source, vec![step("a"), step("b"), step("c")]);

        let hit = worker.set_breakpoint(Some("b")).unwrap();
        worker.start(false);

        assert!(hit.wait().await);
        settle().await;
        assert!(!worker.is_running());
        assert_eq!(recorder.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_breakpoint_frees_queued_navigation() {
        let (worker, _recorder) = worker();
        let worker = Arc::new(worker);
        let source = worker.instance().unwrap();
        let _results = feed(&source, vec![step("a"), step("b")]);
        settle().await;

        let hit = worker.set_breakpoint(Some("a")).unwrap();
        let first = {
            let worker = worker.clone();
            tokio::spawn(async move { worker.go(false).await })
        };
        let second = {
            let worker = worker.clone();
            tokio::spawn(async move { worker.go(false).await })
        };

        assert!(hit.wait().await);
        let outcomes = [first.await.unwrap(), second.await.unwrap()];
        assert!(outcomes.contains(&true));
        assert!(outcomes.contains(&false));
    }

    #[tokio::test]
    async fn test_free_queue_resolves_false_and_clears_breakpoint() {
        let (worker, _recorder) = worker();
        let worker = Arc::new(worker);
        let hit = worker.set_breakpoint(Some("zz")).unwrap();

        let blocked = {
            let worker = worker.clone();
            tokio::spawn(async move { worker.go(false).await })
        };
        let queued = {
            let worker = worker.clone();
            tokio::spawn(async move { worker.go(true).await })
        };
        settle().await;

        worker.free_queue();
        assert!(!hit.wait().await);
        assert!(!queued.await.unwrap());

        worker.reset();
        assert!(!blocked.await.unwrap());
    }

    #[tokio::test]
    async fn test_start_switches_direction_while_running() {
        let (worker, _recorder) = worker();
        worker.start(false);
        worker.start(true);
        assert!(worker.direction());
        worker.stop();
        assert!(!worker.is_running());
    }

    #[tokio::test]
    async fn test_closure_handler_counts_steps() {
        let count = Arc::new(AtomicUsize::new(0));
        let worker = Worker::new({
            let count = count.clone();
            move |_: &Request, _: bool, _: bool| -> anyhow::Result<StepOutcome> {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(StepOutcome::none())
            }
        });
        worker.reset();
        let source = worker.instance().unwrap();
        let results = feed(&source, vec![step("a")]);

        assert!(worker.go(false).await);
        assert_eq!(results.await.unwrap()[0].as_ref().unwrap(), &Value::Null);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}

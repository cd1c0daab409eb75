//! Pipeline engine
//!
//! Every instance gets one worker task owning its state and its queue of
//! remaining steps. The worker pops a step, runs it to completion, then looks
//! at the [`StepControl`] the step filled in:
//!
//! ```text
//!   pop step -> run_step ----Err----> on_failure -> Failed
//!      ^            |
//!      |           Ok
//!      |            v
//!      |      killed? ----yes------------------> Killed
//!      |            |
//!      |         paused? --yes--> wait: Resume -> on_resume
//!      |            |                   Kill   -> Killed
//!      +-----no-----+
//! ```
//!
//! The kill flag is only looked at between steps and while paused; a running
//! step is never interrupted.

use crate::{Result, WorkflowError};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A pipeline definition: the steps it knows and how to run them
#[async_trait]
pub trait Workflow: Send + Sync + 'static {
    type Step: fmt::Debug + Send + 'static;
    type State: Send + 'static;
    type Error: fmt::Display + Send + 'static;
    /// Value delivered to a paused pipeline by [`WorkflowEngine::resume`]
    type Resume: Send + 'static;

    async fn run_step(
        &self,
        step: Self::Step,
        state: &mut Self::State,
        control: &mut StepControl<Self::Step>,
    ) -> std::result::Result<(), Self::Error>;

    /// Handle the value that woke a paused pipeline
    async fn on_resume(
        &self,
        _state: &mut Self::State,
        _resume: Self::Resume,
        _control: &mut StepControl<Self::Step>,
    ) -> std::result::Result<(), Self::Error> {
        Ok(())
    }

    /// Compensation hook; the returned error is the one reported
    async fn on_failure(&self, _state: &mut Self::State, error: Self::Error) -> Self::Error {
        error
    }
}

/// Requests a step makes of the engine
#[derive(Debug)]
pub struct StepControl<S> {
    paused: bool,
    killed: bool,
    scheduled: Vec<S>,
}

impl<S> StepControl<S> {
    fn new() -> Self {
        Self {
            paused: false,
            killed: false,
            scheduled: Vec::new(),
        }
    }

    /// Hold the next step until a resume value arrives
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Drop the remaining queue once this step returns
    pub fn kill(&mut self) {
        self.killed = true;
    }

    /// Append a step to the end of the queue
    pub fn schedule(&mut self, step: S) {
        self.scheduled.push(step);
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_killed(&self) -> bool {
        self.killed
    }
}

/// How a pipeline ended, with the final state
#[derive(Debug)]
pub enum PipelineOutcome<S, E> {
    Completed(S),
    Failed { state: S, error: E },
    Killed(S),
}

impl<S, E> PipelineOutcome<S, E> {
    pub fn is_completed(&self) -> bool {
        matches!(self, PipelineOutcome::Completed(_))
    }

    pub fn state(&self) -> &S {
        match self {
            PipelineOutcome::Completed(state)
            | PipelineOutcome::Failed { state, .. }
            | PipelineOutcome::Killed(state) => state,
        }
    }

    pub fn into_state(self) -> S {
        match self {
            PipelineOutcome::Completed(state)
            | PipelineOutcome::Failed { state, .. }
            | PipelineOutcome::Killed(state) => state,
        }
    }
}

/// Awaitable end of one started pipeline
pub struct PipelineHandle<S, E> {
    instance_id: String,
    join: JoinHandle<PipelineOutcome<S, E>>,
}

impl<S, E> PipelineHandle<S, E> {
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub async fn outcome(self) -> Result<PipelineOutcome<S, E>> {
        self.join.await.map_err(|e| WorkflowError::WorkerLost {
            instance_id: self.instance_id,
            reason: e.to_string(),
        })
    }
}

enum Control<R> {
    Resume(R),
    Kill,
}

struct InstanceHandle<R> {
    killed: Arc<AtomicBool>,
    control: mpsc::UnboundedSender<Control<R>>,
}

type InstanceTable<R> = DashMap<String, InstanceHandle<R>>;

pub struct WorkflowEngine<W: Workflow> {
    workflow: Arc<W>,
    instances: Arc<InstanceTable<W::Resume>>,
    pool: Option<Arc<Semaphore>>,
}

impl<W: Workflow> Clone for WorkflowEngine<W> {
    fn clone(&self) -> Self {
        Self {
            workflow: self.workflow.clone(),
            instances: self.instances.clone(),
            pool: self.pool.clone(),
        }
    }
}

impl<W: Workflow> WorkflowEngine<W> {
    /// Engine without a step limit: every instance progresses independently
    pub fn new(workflow: W) -> Self {
        Self {
            workflow: Arc::new(workflow),
            instances: Arc::new(DashMap::new()),
            pool: None,
        }
    }

    /// Engine where at most `size` steps run at once across all instances
    pub fn with_pool(workflow: W, size: usize) -> Self {
        Self {
            pool: Some(Arc::new(Semaphore::new(size.max(1)))),
            ..Self::new(workflow)
        }
    }

    pub fn workflow(&self) -> &W {
        &self.workflow
    }

    /// Spawn the worker for `instance_id` with its initial queue
    pub fn start(
        &self,
        instance_id: impl Into<String>,
        state: W::State,
        steps: impl IntoIterator<Item = W::Step>,
    ) -> Result<PipelineHandle<W::State, W::Error>> {
        let instance_id = instance_id.into();
        let killed = Arc::new(AtomicBool::new(false));
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        match self.instances.entry(instance_id.clone()) {
            Entry::Occupied(_) => return Err(WorkflowError::DuplicateInstance(instance_id)),
            Entry::Vacant(slot) => {
                slot.insert(InstanceHandle {
                    killed: killed.clone(),
                    control: control_tx,
                });
            }
        }

        let worker = Worker {
            workflow: self.workflow.clone(),
            instances: self.instances.clone(),
            pool: self.pool.clone(),
            instance_id: instance_id.clone(),
            queue: steps.into_iter().collect(),
            killed,
            control: control_rx,
        };
        debug!(instance_id = %instance_id, steps = worker.queue.len(), "Pipeline started");

        Ok(PipelineHandle {
            instance_id,
            join: tokio::spawn(worker.run(state)),
        })
    }

    /// Deliver `value` to the pipeline; buffered if it is not paused yet
    pub fn resume(&self, instance_id: &str, value: W::Resume) -> Result<()> {
        let handle = self
            .instances
            .get(instance_id)
            .ok_or_else(|| WorkflowError::UnknownInstance(instance_id.to_string()))?;
        handle
            .control
            .send(Control::Resume(value))
            .map_err(|_| WorkflowError::UnknownInstance(instance_id.to_string()))
    }

    /// Set the kill flag; returns `false` for unknown instances
    pub fn kill(&self, instance_id: &str) -> bool {
        match self.instances.get(instance_id) {
            Some(handle) => {
                handle.killed.store(true, Ordering::SeqCst);
                let _ = handle.control.send(Control::Kill);
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, instance_id: &str) -> bool {
        self.instances.contains_key(instance_id)
    }

    pub fn active_instances(&self) -> Vec<String> {
        self.instances.iter().map(|entry| entry.key().clone()).collect()
    }
}

enum Ended<E> {
    Completed,
    Failed(E),
    Killed,
}

struct Worker<W: Workflow> {
    workflow: Arc<W>,
    instances: Arc<InstanceTable<W::Resume>>,
    pool: Option<Arc<Semaphore>>,
    instance_id: String,
    queue: VecDeque<W::Step>,
    killed: Arc<AtomicBool>,
    control: mpsc::UnboundedReceiver<Control<W::Resume>>,
}

impl<W: Workflow> Worker<W> {
    async fn run(mut self, mut state: W::State) -> PipelineOutcome<W::State, W::Error> {
        let ended = self.drive(&mut state).await;
        self.instances.remove(&self.instance_id);

        match ended {
            Ended::Completed => {
                info!(instance_id = %self.instance_id, "Pipeline completed");
                PipelineOutcome::Completed(state)
            }
            Ended::Failed(error) => {
                warn!(instance_id = %self.instance_id, "Pipeline failed: {}", error);
                PipelineOutcome::Failed { state, error }
            }
            Ended::Killed => {
                info!(
                    instance_id = %self.instance_id,
                    skipped_steps = self.queue.len(),
                    "Pipeline killed"
                );
                PipelineOutcome::Killed(state)
            }
        }
    }

    async fn drive(&mut self, state: &mut W::State) -> Ended<W::Error> {
        loop {
            if self.killed.load(Ordering::SeqCst) {
                return Ended::Killed;
            }
            let step = match self.queue.pop_front() {
                Some(step) => step,
                None => return Ended::Completed,
            };

            debug!(instance_id = %self.instance_id, step = ?step, "Running step");
            let mut control = StepControl::new();
            let result = {
                let _permit = acquire(self.pool.clone()).await;
                self.workflow.run_step(step, state, &mut control).await
            };
            if let Err(error) = result {
                return Ended::Failed(self.workflow.on_failure(state, error).await);
            }

            let mut paused = self.apply(control);
            while paused {
                let resume = match self.control.recv().await {
                    Some(Control::Resume(value)) => value,
                    Some(Control::Kill) | None => return Ended::Killed,
                };

                let mut control = StepControl::new();
                let result = {
                    let _permit = acquire(self.pool.clone()).await;
                    self.workflow.on_resume(state, resume, &mut control).await
                };
                if let Err(error) = result {
                    return Ended::Failed(self.workflow.on_failure(state, error).await);
                }
                paused = self.apply(control);
            }
        }
    }

    /// Fold a step's control requests into the worker; returns whether to pause
    fn apply(&mut self, control: StepControl<W::Step>) -> bool {
        self.queue.extend(control.scheduled);
        if control.killed {
            self.killed.store(true, Ordering::SeqCst);
            return false;
        }
        control.paused && !self.killed.load(Ordering::SeqCst)
    }
}

/// Wait for a step slot; `None` pool means unbounded
async fn acquire(pool: Option<Arc<Semaphore>>) -> Option<OwnedSemaphorePermit> {
    match pool {
        Some(pool) => pool.acquire_owned().await.ok(),
        None => None,
    }
}

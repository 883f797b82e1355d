//! Main orchestrator for pipeline runs.
//!
//! Owns the fixed step sequence, drives the execution engine one step at a
//! time, keeps the run state current, and publishes every run-level
//! transition. At most one run is active; a second start is rejected, not
//! queued.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::ResolvedConfig;
use crate::domain::{
    BroadcastMessage, PipelineState, RunConfig, RunConfigError, RunStatus, RunSummary,
    StateUpdate, StepName,
};

use super::executor::{StepExecutor, StepOutcome, STOPPED_BY_USER};
use super::hub::EventHub;
use super::state_store::StateStore;
use super::stop::StopSignal;
use super::workers::WorkerCatalog;

/// Result of a start request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartOutcome {
    pub accepted: bool,

    /// The new run, or the run already in progress when rejected
    pub run_id: Option<Uuid>,

    pub message: String,
}

/// Result of a stop request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopOutcome {
    pub acknowledged: bool,
    pub message: String,
}

/// Main pipeline orchestrator
pub struct Orchestrator {
    store: StateStore,
    hub: Arc<EventHub>,
    executor: StepExecutor,
    workers: WorkerCatalog,
    project_root: PathBuf,

    /// Single-flight guard: true from an accepted start until the run flow ends
    active: AtomicBool,

    /// Stop signal of the current (or last) run
    stop: Mutex<StopSignal>,

    /// Task executing the current run
    flow: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(project_root: impl Into<PathBuf>, workers: WorkerCatalog, hub: Arc<EventHub>) -> Self {
        let store = StateStore::new();
        Self {
            executor: StepExecutor::new(store.clone(), Arc::clone(&hub)),
            store,
            hub,
            workers,
            project_root: project_root.into(),
            active: AtomicBool::new(false),
            stop: Mutex::new(StopSignal::new()),
            flow: tokio::sync::Mutex::new(None),
        }
    }

    /// Build an orchestrator (and its hub) from resolved configuration
    pub fn from_config(config: &ResolvedConfig) -> Self {
        let hub = Arc::new(EventHub::new(config.max_connections));
        Self::new(config.project_root.clone(), config.workers.clone(), hub)
            .with_step_timeout(config.step_timeout)
    }

    pub fn with_step_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.executor = self.executor.with_step_timeout(timeout);
        self
    }

    pub fn hub(&self) -> &Arc<EventHub> {
        &self.hub
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn workers(&self) -> &WorkerCatalog {
        &self.workers
    }

    /// Snapshot of the current run
    pub fn status(&self) -> PipelineState {
        self.store.snapshot()
    }

    /// Whether a run flow is in progress
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Start a new run.
    ///
    /// Returns as soon as `pipeline_started` has been published; the steps
    /// execute on a spawned task. If a run is already active the request is
    /// rejected with `accepted: false` and state is left untouched.
    #[instrument(skip(self, config), fields(niche = %config.niche))]
    pub async fn start(self: &Arc<Self>, config: RunConfig) -> Result<StartOutcome, RunConfigError> {
        let config = config.validated()?;

        let run_id = Uuid::new_v4();
        let stop = {
            let mut slot = self.lock_stop();
            if self
                .active
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                info!("Pipeline already running, start rejected");
                return Ok(StartOutcome {
                    accepted: false,
                    run_id: self.store.snapshot().run_id,
                    message: "Pipeline is already running".to_string(),
                });
            }

            *slot = StopSignal::new();
            self.store.reset(PipelineState::new_run(run_id, Utc::now()));
            slot.clone()
        };

        info!(%run_id, max_sites = config.max_sites, "Pipeline started");
        self.hub
            .publish(&BroadcastMessage::PipelineStarted {
                run_id,
                steps: StepName::ALL.to_vec(),
                config: config.clone(),
            })
            .await;

        let message = format!(
            "Pipeline started for niche '{}' with max {} sites",
            config.niche, config.max_sites
        );

        let guard = ActiveGuard(Arc::clone(self));
        let handle = tokio::spawn(async move {
            guard.0.run(run_id, config, stop).await;
            drop(guard);
        });
        *self.flow.lock().await = Some(handle);

        Ok(StartOutcome {
            accepted: true,
            run_id: Some(run_id),
            message,
        })
    }

    /// Request that the active run stop.
    ///
    /// The flag is checked before each step and interrupts the worker in
    /// flight. With no active run this is a successful no-op.
    pub fn stop(&self) -> StopOutcome {
        let slot = self.lock_stop();
        if !self.active.load(Ordering::Acquire) {
            return StopOutcome {
                acknowledged: true,
                message: "No pipeline is currently running".to_string(),
            };
        }

        slot.request();
        info!("Pipeline stop requested");
        StopOutcome {
            acknowledged: true,
            message: "Pipeline stop requested".to_string(),
        }
    }

    /// Wait for the current run flow, if any, to finish.
    ///
    /// Cancel-safe: the handle stays in place until the task has ended.
    pub async fn wait_idle(&self) {
        let mut flow = self.flow.lock().await;
        if let Some(handle) = flow.as_mut() {
            if let Err(e) = handle.await {
                error!(error = %e, "Pipeline task ended abnormally");
            }
            *flow = None;
        }
    }

    /// Execute every step in order, fail-fast
    #[instrument(skip(self, config, stop))]
    async fn run(&self, run_id: Uuid, config: RunConfig, stop: StopSignal) {
        let run_start = Instant::now();
        let mut steps_completed = 0;
        let mut items_processed = 0;

        for step in StepName::ALL {
            if stop.is_requested() {
                self.finish_stopped(run_id, step).await;
                return;
            }

            self.store.apply(StateUpdate::SetCurrentStep(Some(step)));
            let invocation = self.workers.resolve(step, &config, &self.project_root);
            let outcome = self.executor.execute(run_id, &invocation, &stop).await;

            match outcome {
                StepOutcome::Completed { .. } | StepOutcome::Skipped { .. } => {
                    steps_completed += 1;
                    items_processed += outcome.items_processed();
                }
                StepOutcome::Stopped => {
                    self.finish_stopped(run_id, step).await;
                    return;
                }
                StepOutcome::Failed { error, .. } => {
                    self.finish_failed(run_id, step, &error).await;
                    return;
                }
            }
        }

        let summary = RunSummary {
            total_duration: run_start.elapsed().as_secs(),
            steps_completed,
            total_steps: StepName::ALL.len(),
            items_processed,
        };
        self.finish_completed(run_id, summary).await;
    }

    async fn finish_stopped(&self, run_id: Uuid, at: StepName) {
        info!(step = %at, "Pipeline stopped by user");
        self.store.apply(StateUpdate::SetStatus(RunStatus::Idle));
        self.store
            .apply(StateUpdate::SetError(Some(STOPPED_BY_USER.to_string())));
        self.hub
            .publish(&BroadcastMessage::PipelineStopped { run_id })
            .await;
    }

    async fn finish_failed(&self, run_id: Uuid, step: StepName, cause: &str) {
        let error = format!("Step {} failed: {}", step, cause);
        warn!(%error, "Pipeline failed, remaining steps will not run");
        self.store.apply(StateUpdate::SetStatus(RunStatus::Failed));
        self.store.apply(StateUpdate::SetError(Some(error.clone())));
        self.hub
            .publish(&BroadcastMessage::PipelineFailed { run_id, error })
            .await;
    }

    async fn finish_completed(&self, run_id: Uuid, summary: RunSummary) {
        info!(
            duration_secs = summary.total_duration,
            items_processed = summary.items_processed,
            "Pipeline completed"
        );
        self.store.apply(StateUpdate::SetStatus(RunStatus::Completed));
        self.store.apply(StateUpdate::SetCompletedAt(Utc::now()));
        self.hub
            .publish(&BroadcastMessage::PipelineCompleted { run_id, summary })
            .await;
    }

    fn lock_stop(&self) -> MutexGuard<'_, StopSignal> {
        self.stop.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Releases the single-flight guard when the run task ends, even on panic
struct ActiveGuard(Arc<Orchestrator>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.store(false, Ordering::Release);
    }
}

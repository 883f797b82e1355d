//! Process execution engine.
//!
//! Runs one worker per step as a child process. A reader task streams the
//! child's stdout line by line and forwards decoded progress records through
//! a bounded channel; the engine folds them into the step state and
//! broadcasts them while also watching for a stop request.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{ChildStderr, ChildStdout};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{BroadcastMessage, ProgressEvent, StateUpdate, StepName, StepState};

use super::hub::EventHub;
use super::progress::{parse_progress_line, percentage};
use super::state_store::StateStore;
use super::stop::StopSignal;
use super::workers::WorkerInvocation;

/// Error text recorded when a user stop interrupts a step or run
pub const STOPPED_BY_USER: &str = "Stopped by user";

/// Progress records buffered between the stdout reader and the engine
const PROGRESS_BUFFER: usize = 64;

/// How long to wait for stderr to drain after the worker exits
const STDERR_GRACE: Duration = Duration::from_secs(5);

/// Result of running one step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Completed { items_processed: u64 },

    /// Worker missing; counts as success with zero items
    Skipped { reason: String },

    Failed { error: String, items_processed: u64 },

    /// Interrupted by a stop request
    Stopped,
}

impl StepOutcome {
    /// Whether the run may continue to the next step
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Skipped { .. })
    }

    pub fn items_processed(&self) -> u64 {
        match self {
            Self::Completed { items_processed } | Self::Failed { items_processed, .. } => {
                *items_processed
            }
            Self::Skipped { .. } | Self::Stopped => 0,
        }
    }
}

/// How the worker process ended
enum Exit {
    Code(i32),
    Stopped,
    TimedOut(Duration),
}

/// Launches workers and translates their behavior into step state and events
pub struct StepExecutor {
    store: StateStore,
    hub: Arc<EventHub>,
    step_timeout: Option<Duration>,
}

impl StepExecutor {
    pub fn new(store: StateStore, hub: Arc<EventHub>) -> Self {
        Self {
            store,
            hub,
            step_timeout: None,
        }
    }

    /// Kill workers that run longer than `timeout` (no limit when `None`)
    pub fn with_step_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// Run one step to a terminal state.
    ///
    /// Publishes `step_started`, zero or more `step_progress`, then exactly
    /// one of `step_completed`, `step_failed` or `step_skipped`.
    #[instrument(skip(self, invocation, stop), fields(step = %invocation.step))]
    pub async fn execute(
        &self,
        run_id: Uuid,
        invocation: &WorkerInvocation,
        stop: &StopSignal,
    ) -> StepOutcome {
        let step = invocation.step;

        if !invocation.worker_path.exists() {
            let reason = format!("Worker not found: {}", invocation.worker_path.display());
            return self.skip(run_id, step, reason).await;
        }

        info!(command = %invocation.command_line(), "Executing step");
        let mut state = StepState::started(Utc::now());
        self.store.apply(StateUpdate::SetStepState {
            step,
            state: state.clone(),
        });
        self.hub
            .publish(&BroadcastMessage::StepStarted { step, run_id })
            .await;

        let step_start = Instant::now();
        match self.drive(run_id, invocation, stop, &mut state).await {
            Ok(Exit::Code(0)) => {
                let duration = step_start.elapsed().as_secs();
                let items_processed = state.items_processed;
                state.complete(Utc::now());
                self.store.apply(StateUpdate::SetStepState { step, state });
                self.hub
                    .publish(&BroadcastMessage::StepCompleted {
                        step,
                        run_id,
                        duration,
                        items_processed,
                    })
                    .await;

                info!(duration_secs = duration, items_processed, "Step completed");
                StepOutcome::Completed { items_processed }
            }
            Ok(Exit::Code(code)) => {
                let error = format!("Exit code: {}", code);
                error!(%error, "Step failed");
                self.fail(run_id, step, state, error).await
            }
            Ok(Exit::TimedOut(limit)) => {
                let error = format!("Timed out after {:?}", limit);
                error!(%error, "Step failed");
                self.fail(run_id, step, state, error).await
            }
            Ok(Exit::Stopped) => {
                info!("Step interrupted by stop request");
                self.fail(run_id, step, state, STOPPED_BY_USER.to_string())
                    .await;
                StepOutcome::Stopped
            }
            Err(e) => {
                let error = format!("{:#}", e);
                error!(%error, "Error executing step");
                self.fail(run_id, step, state, error).await
            }
        }
    }

    /// Spawn the worker and pump its output until it exits or is interrupted
    async fn drive(
        &self,
        run_id: Uuid,
        invocation: &WorkerInvocation,
        stop: &StopSignal,
        state: &mut StepState,
    ) -> Result<Exit> {
        let step = invocation.step;
        let mut child = invocation
            .command()
            .spawn()
            .with_context(|| format!("Failed to spawn worker for step '{}'", step))?;

        let stdout = child
            .stdout
            .take()
            .context("Failed to capture worker stdout")?;
        let stderr = child
            .stderr
            .take()
            .context("Failed to capture worker stderr")?;

        let (tx, mut rx) = mpsc::channel(PROGRESS_BUFFER);
        let reader = tokio::spawn(read_stdout(step, stdout, tx));
        let mut stderr_task = tokio::spawn(read_stderr(stderr));

        let step_timeout = self.step_timeout;
        let deadline = async move {
            match step_timeout {
                Some(limit) => {
                    tokio::time::sleep(limit).await;
                    limit
                }
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);

        let mut interrupted = None;
        loop {
            tokio::select! {
                biased;

                _ = stop.requested() => {
                    interrupted = Some(Exit::Stopped);
                    break;
                }

                limit = &mut deadline => {
                    interrupted = Some(Exit::TimedOut(limit));
                    break;
                }

                event = rx.recv() => match event {
                    Some(event) => self.record_progress(run_id, step, state, &event).await,
                    None => break,
                },
            }
        }

        // Stdout may close before the worker exits; keep honoring stop and timeout
        let waited = match interrupted {
            Some(exit) => Err(exit),
            None => tokio::select! {
                biased;

                _ = stop.requested() => Err(Exit::Stopped),
                limit = &mut deadline => Err(Exit::TimedOut(limit)),
                result = child.wait() => Ok(result.context("Failed to wait for worker")?),
            },
        };

        let status = match waited {
            Ok(status) => status,
            Err(exit) => {
                // Best-effort: signal the worker, don't wait on its pipes
                if let Err(e) = child.start_kill() {
                    warn!(error = %e, "Failed to signal worker");
                }
                reader.abort();
                stderr_task.abort();
                if let Err(e) = child.wait().await {
                    warn!(error = %e, "Failed to reap worker");
                }
                return Ok(exit);
            }
        };

        match tokio::time::timeout(STDERR_GRACE, &mut stderr_task).await {
            Ok(Ok(Ok(text))) => {
                let text = text.trim();
                if !text.is_empty() {
                    warn!(stderr = %text, "Worker wrote to stderr");
                }
            }
            Ok(Ok(Err(e))) => warn!(error = %e, "Failed to read worker stderr"),
            Ok(Err(e)) => warn!(error = %e, "Stderr reader task failed"),
            Err(_) => {
                stderr_task.abort();
                warn!("Worker stderr still open after exit, abandoning it");
            }
        }

        Ok(Exit::Code(status.code().unwrap_or(-1)))
    }

    async fn record_progress(
        &self,
        run_id: Uuid,
        step: StepName,
        state: &mut StepState,
        event: &ProgressEvent,
    ) {
        let pct = percentage(event.current, event.total);
        state.record_progress(event, pct);
        self.store.apply(StateUpdate::SetStepState {
            step,
            state: state.clone(),
        });

        self.hub
            .publish(&BroadcastMessage::StepProgress {
                step,
                run_id,
                current: event.current,
                total: event.total,
                percentage: pct,
                message: event.message.clone(),
            })
            .await;
    }

    async fn skip(&self, run_id: Uuid, step: StepName, reason: String) -> StepOutcome {
        warn!(%reason, "Skipping step");
        self.store.apply(StateUpdate::SetStepState {
            step,
            state: StepState::skipped(reason.clone(), Utc::now()),
        });
        self.hub
            .publish(&BroadcastMessage::StepSkipped {
                step,
                run_id,
                reason: reason.clone(),
            })
            .await;

        StepOutcome::Skipped { reason }
    }

    async fn fail(
        &self,
        run_id: Uuid,
        step: StepName,
        mut state: StepState,
        error: String,
    ) -> StepOutcome {
        let items_processed = state.items_processed;
        state.fail(error.clone(), Utc::now());
        self.store.apply(StateUpdate::SetStepState { step, state });
        self.hub
            .publish(&BroadcastMessage::StepFailed {
                step,
                run_id,
                error: error.clone(),
            })
            .await;

        StepOutcome::Failed {
            error,
            items_processed,
        }
    }
}

/// Producer side: decode stdout lines, forward progress, log the rest
async fn read_stdout(step: StepName, stdout: ChildStdout, tx: mpsc::Sender<ProgressEvent>) {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match parse_progress_line(line) {
                    Some(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    None => debug!(step = %step, "{}", line),
                }
            }
            Err(e) => {
                warn!(step = %step, error = %e, "Failed to read worker stdout");
                break;
            }
        }
    }
}

async fn read_stderr(stderr: ChildStderr) -> std::io::Result<String> {
    let mut bytes = Vec::new();
    BufReader::new(stderr).read_to_end(&mut bytes).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

//! Run state and the typed mutations applied to it.
//!
//! A run is one end-to-end pass over the fixed step sequence. Only the
//! current run is kept; starting a new one replaces it wholesale.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::step::{StepName, StepState};

/// Overall status of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// No run in progress (initial state, and the state after a stop)
    Idle,

    Running,

    Completed,

    Failed,
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::Idle
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.pad(s)
    }
}

/// Snapshot of the current run and all of its steps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineState {
    pub status: RunStatus,

    /// Step presently executing; set only while `status == Running`
    pub current_step: Option<StepName>,

    pub run_id: Option<Uuid>,

    pub steps: BTreeMap<StepName, StepState>,

    pub started_at: Option<DateTime<Utc>>,

    pub completed_at: Option<DateTime<Utc>>,

    /// Last fatal error, or the stop reason
    pub error: Option<String>,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            status: RunStatus::Idle,
            current_step: None,
            run_id: None,
            steps: pending_steps(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }
}

fn pending_steps() -> BTreeMap<StepName, StepState> {
    StepName::ALL
        .iter()
        .map(|step| (*step, StepState::default()))
        .collect()
}

impl PipelineState {
    /// State of a freshly started run: running, positioned on the first step,
    /// every step pending
    pub fn new_run(run_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            status: RunStatus::Running,
            current_step: StepName::ALL.first().copied(),
            run_id: Some(run_id),
            steps: pending_steps(),
            started_at: Some(now),
            completed_at: None,
            error: None,
        }
    }

    /// Apply a single mutation
    pub fn apply(&mut self, update: StateUpdate) {
        match update {
            StateUpdate::SetStatus(status) => {
                self.status = status;
                if status != RunStatus::Running {
                    self.current_step = None;
                }
            }
            StateUpdate::SetCurrentStep(step) => self.current_step = step,
            StateUpdate::SetCompletedAt(at) => self.completed_at = Some(at),
            StateUpdate::SetError(error) => self.error = error,
            StateUpdate::SetStepState { step, state } => {
                self.steps.insert(step, state);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == RunStatus::Running
    }

    pub fn step(&self, step: StepName) -> Option<&StepState> {
        self.steps.get(&step)
    }
}

/// A mutation of the run state.
///
/// This is the only way run state changes after a run has been created.
#[derive(Debug, Clone, PartialEq)]
pub enum StateUpdate {
    /// Leaving `Running` also clears `current_step`
    SetStatus(RunStatus),
    SetCurrentStep(Option<StepName>),
    SetCompletedAt(DateTime<Utc>),
    SetError(Option<String>),
    SetStepState { step: StepName, state: StepState },
}

/// Parameters supplied when starting a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Target niche keyword for discovery
    pub niche: String,

    /// Upper bound on sites processed
    #[serde(default = "default_max_sites")]
    pub max_sites: u32,
}

pub const MAX_NICHE_LEN: usize = 100;
pub const MAX_SITES_LIMIT: u32 = 100;

fn default_max_sites() -> u32 {
    10
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            niche: "general".to_string(),
            max_sites: default_max_sites(),
        }
    }
}

/// Reasons a run configuration is rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunConfigError {
    #[error("niche must not be empty")]
    EmptyNiche,

    #[error("niche must be at most {MAX_NICHE_LEN} characters (got {0})")]
    NicheTooLong(usize),

    #[error("max_sites must be between 1 and {MAX_SITES_LIMIT} (got {0})")]
    MaxSitesOutOfRange(u32),
}

impl RunConfig {
    pub fn new(niche: impl Into<String>, max_sites: u32) -> Self {
        Self {
            niche: niche.into(),
            max_sites,
        }
    }

    /// Trim and validate, returning the normalized config
    pub fn validated(self) -> Result<Self, RunConfigError> {
        let niche = self.niche.trim().to_string();
        let len = niche.chars().count();
        if len == 0 {
            return Err(RunConfigError::EmptyNiche);
        }
        if len > MAX_NICHE_LEN {
            return Err(RunConfigError::NicheTooLong(len));
        }
        if !(1..=MAX_SITES_LIMIT).contains(&self.max_sites) {
            return Err(RunConfigError::MaxSitesOutOfRange(self.max_sites));
        }
        Ok(Self {
            niche,
            max_sites: self.max_sites,
        })
    }
}

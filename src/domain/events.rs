//! Messages exchanged with observers.
//!
//! Outbound messages are JSON objects discriminated by a `type` field.
//! They are ephemeral: nothing here is persisted.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::run::RunConfig;
use super::step::StepName;

/// A progress record decoded from a worker's stdout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub current: u64,
    pub total: u64,
    pub message: String,
}

/// Aggregate figures reported when a run completes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Wall-clock duration of the run in seconds
    pub total_duration: u64,
    pub steps_completed: usize,
    pub total_steps: usize,
    pub items_processed: u64,
}

/// A server → observer message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BroadcastMessage {
    /// Sent once to a newly registered observer, before any broadcast
    Connected { client_id: Uuid },

    PipelineStarted {
        run_id: Uuid,
        steps: Vec<StepName>,
        config: RunConfig,
    },

    StepStarted { step: StepName, run_id: Uuid },

    StepProgress {
        step: StepName,
        run_id: Uuid,
        current: u64,
        total: u64,
        percentage: u8,
        message: String,
    },

    StepCompleted {
        step: StepName,
        run_id: Uuid,
        /// Seconds
        duration: u64,
        items_processed: u64,
    },

    StepFailed {
        step: StepName,
        run_id: Uuid,
        error: String,
    },

    StepSkipped {
        step: StepName,
        run_id: Uuid,
        reason: String,
    },

    PipelineCompleted { run_id: Uuid, summary: RunSummary },

    PipelineFailed { run_id: Uuid, error: String },

    PipelineStopped { run_id: Uuid },

    Pong,
}

impl BroadcastMessage {
    /// The `type` discriminator as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::PipelineStarted { .. } => "pipeline_started",
            Self::StepStarted { .. } => "step_started",
            Self::StepProgress { .. } => "step_progress",
            Self::StepCompleted { .. } => "step_completed",
            Self::StepFailed { .. } => "step_failed",
            Self::StepSkipped { .. } => "step_skipped",
            Self::PipelineCompleted { .. } => "pipeline_completed",
            Self::PipelineFailed { .. } => "pipeline_failed",
            Self::PipelineStopped { .. } => "pipeline_stopped",
            Self::Pong => "pong",
        }
    }

    /// Step this message refers to, if any
    pub fn step(&self) -> Option<StepName> {
        match self {
            Self::StepStarted { step, .. }
            | Self::StepProgress { step, .. }
            | Self::StepCompleted { step, .. }
            | Self::StepFailed { step, .. }
            | Self::StepSkipped { step, .. } => Some(*step),
            _ => None,
        }
    }
}

/// An observer → server message
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// Liveness probe, answered with `pong`
    Ping,

    #[serde(other)]
    Unknown,
}

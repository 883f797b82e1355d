//! Pipeline steps and their per-step state.
//!
//! The step set is fixed: every run walks the same six steps in the same order.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::events::ProgressEvent;

/// One named stage of the pipeline, backed by one worker program
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepName {
    /// Find candidate storefronts for a niche
    Discovery,

    /// Confirm which candidates run on the target platform
    Verification,

    /// Capture homepage screenshots and markup
    Audit,

    /// AI analysis of the captured homepages
    Analysis,

    /// Scrape contact details
    Contacts,

    /// Draft outreach messages
    Outreach,
}

impl StepName {
    /// All steps in execution order
    pub const ALL: [StepName; 6] = [
        StepName::Discovery,
        StepName::Verification,
        StepName::Audit,
        StepName::Analysis,
        StepName::Contacts,
        StepName::Outreach,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepName::Discovery => "discovery",
            StepName::Verification => "verification",
            StepName::Audit => "audit",
            StepName::Analysis => "analysis",
            StepName::Contacts => "contacts",
            StepName::Outreach => "outreach",
        }
    }

    /// Position of this step in the execution order
    pub fn index(&self) -> usize {
        Self::ALL
            .iter()
            .position(|s| s == self)
            .unwrap_or(Self::ALL.len())
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Status of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not yet reached
    Pending,

    /// Worker is executing
    Running,

    /// Worker exited cleanly
    Completed,

    /// Worker failed or was stopped
    Failed,

    /// Worker program was not found
    Skipped,
}

impl Default for StepStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl StepStatus {
    /// Whether the step has reached an end state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.pad(s)
    }
}

/// Mutable state of one step within the current run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepState {
    pub status: StepStatus,

    /// Percentage, 0..=100
    pub progress: u8,

    /// Latest human-readable status line
    pub message: Option<String>,

    pub error: Option<String>,

    pub items_processed: u64,

    pub items_total: u64,

    pub started_at: Option<DateTime<Utc>>,

    pub completed_at: Option<DateTime<Utc>>,
}

impl StepState {
    /// Fresh state for a step entering `running`
    pub fn started(now: DateTime<Utc>) -> Self {
        Self {
            status: StepStatus::Running,
            started_at: Some(now),
            ..Default::default()
        }
    }

    /// Terminal state for a step whose worker is missing
    pub fn skipped(reason: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            status: StepStatus::Skipped,
            message: Some(reason.into()),
            completed_at: Some(now),
            ..Default::default()
        }
    }

    /// Fold a progress record into the state.
    ///
    /// `progress` never moves backwards while the step is running, even if
    /// the worker reports a smaller count than before.
    pub fn record_progress(&mut self, event: &ProgressEvent, percentage: u8) {
        self.progress = self.progress.max(percentage.min(100));
        self.items_processed = event.current;
        self.items_total = event.total;
        self.message = Some(event.message.clone());
    }

    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.status = StepStatus::Completed;
        self.progress = 100;
        self.completed_at = Some(now);
    }

    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.status = StepStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(now);
    }
}

//! Domain types for the auditrun orchestrator.
//!
//! This module contains the core data structures:
//! - Step: the fixed step sequence and per-step state
//! - Run: pipeline state, typed mutations, run configuration
//! - Events: observer wire messages and worker progress records

pub mod events;
pub mod run;
pub mod step;

// Re-export commonly used types
pub use events::{BroadcastMessage, InboundMessage, ProgressEvent, RunSummary};
pub use run::{PipelineState, RunConfig, RunConfigError, RunStatus, StateUpdate};
pub use step::{StepName, StepState, StepStatus};

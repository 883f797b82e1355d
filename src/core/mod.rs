//! Core orchestration logic.
//!
//! This module contains:
//! - StateStore: In-memory run and step state
//! - EventHub: Observer registry and broadcast fan-out
//! - StepExecutor: Worker process execution and progress parsing
//! - Orchestrator: Step sequencing, stop and fail-fast policy

pub mod executor;
pub mod hub;
pub mod orchestrator;
pub mod progress;
pub mod state_store;
pub mod stop;
pub mod workers;

// Re-export commonly used types
pub use executor::{StepExecutor, StepOutcome, STOPPED_BY_USER};
pub use hub::{EventHub, HubError, ObserverId, DEFAULT_MAX_CONNECTIONS};
pub use orchestrator::{Orchestrator, StartOutcome, StopOutcome};
pub use progress::{parse_progress_line, percentage};
pub use state_store::StateStore;
pub use stop::StopSignal;
pub use workers::{WorkerCatalog, WorkerInvocation, WorkerSpec};

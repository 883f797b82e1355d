//! auditrun - storefront audit pipeline orchestrator
//!
//! Runs a fixed sequence of worker processes (discovery, verification,
//! audit, analysis, contacts, outreach), tracks per-step progress from the
//! JSON lines the workers print, and streams every transition to live
//! observers over WebSocket.
//!
//! # Architecture
//!
//! - A single in-memory run state is mutated through typed updates
//! - Each step is one subprocess; `{"type": "progress", ...}` lines on its
//!   stdout drive progress, everything else is diagnostics
//! - At most one run is active; runs are fail-fast and can be stopped
//!
//! # Modules
//!
//! - `adapters`: Observer sinks (WebSocket channel, log)
//! - `core`: Orchestration logic (StateStore, EventHub, StepExecutor, Orchestrator)
//! - `domain`: Data structures (steps, run state, wire messages)
//! - `server`: HTTP API and WebSocket endpoint
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Serve the API and live event stream
//! auditrun serve --bind 127.0.0.1:8000
//!
//! # Run once in the foreground
//! auditrun run --niche fitness --max-sites 10
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod server;

// Re-export main types at crate root for convenience
pub use core::{EventHub, Orchestrator};
pub use domain::{BroadcastMessage, PipelineState, RunConfig, RunStatus, StepName, StepStatus};

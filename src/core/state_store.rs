//! In-memory store for the current run.
//!
//! Cheap to clone; all clones share the same state. Reads hand out owned
//! snapshots, writes go through [`StateUpdate`].

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::domain::{PipelineState, StateUpdate, StepName, StepState};

#[derive(Debug, Clone, Default)]
pub struct StateStore {
    inner: Arc<RwLock<PipelineState>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Owned copy of the full state
    pub fn snapshot(&self) -> PipelineState {
        self.read().clone()
    }

    /// State of one step
    pub fn step(&self, step: StepName) -> StepState {
        self.read().step(step).cloned().unwrap_or_default()
    }

    pub fn apply(&self, update: StateUpdate) {
        self.write().apply(update);
    }

    /// Replace the whole state (used when a new run starts)
    pub fn reset(&self, state: PipelineState) {
        *self.write() = state;
    }

    // A writer panicking mid-update leaves plain data behind; keep serving it.
    fn read(&self) -> RwLockReadGuard<'_, PipelineState> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, PipelineState> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

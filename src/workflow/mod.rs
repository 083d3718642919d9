//! Workflow module - sequencing of one deposit run
//!
//! This module provides:
//! - The run state machine and its controller
//! - Events published on every state change and status snapshot
//! - Cancellation of suspended steps

pub mod cancel;
pub mod controller;
pub mod events;
pub mod state;

pub use cancel::{CancelHandle, CancelToken};
pub use controller::{RunRequest, RunSummary, WorkflowController, WorkflowDeps};
pub use events::WorkflowEvent;
pub use state::WorkflowState;

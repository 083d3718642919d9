//! Events published by the workflow controller
//!
//! Subscribers (a CLI renderer, a UI bridge) receive every state change and
//! status snapshot through a broadcast channel.

use super::WorkflowState;
use crate::coordinator::{OrchestrationStatus, TransferType};
use crate::module::ModuleKind;
use crate::orchestration::FlowKind;

#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEvent {
    StateChanged {
        from: WorkflowState,
        to: WorkflowState,
    },

    RequiredStateResolved {
        module_kind: ModuleKind,
        chain_id: u64,
    },

    OrchestrationCreated {
        request_id: String,
        flow: FlowKind,
    },

    DepositSubmitted {
        request_id: String,
        transfer_type: TransferType,
    },

    StatusUpdated(OrchestrationStatus),

    /// A step failed; `message` is already user-facing
    StepFailed {
        state: WorkflowState,
        message: String,
        ambiguous: bool,
    },
}

impl WorkflowEvent {
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowEvent::StateChanged { .. } => "state_changed",
            WorkflowEvent::RequiredStateResolved { .. } => "required_state_resolved",
            WorkflowEvent::OrchestrationCreated { .. } => "orchestration_created",
            WorkflowEvent::DepositSubmitted { .. } => "deposit_submitted",
            WorkflowEvent::StatusUpdated(_) => "status_updated",
            WorkflowEvent::StepFailed { .. } => "step_failed",
        }
    }
}

//! Workflow states and the transitions between them

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum WorkflowState {
    Idle,
    ModuleSelected,
    RequiredStateReady,
    IntentReady,
    OrchestrationReady,
    DepositSubmitted,
    /// Funds moved or an authorization exists, but the coordinator was not told
    NotifyFailed,
    Polling,
    Completed,
    Failed,
    TimedOut,
}

impl WorkflowState {
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowState::Idle => "idle",
            WorkflowState::ModuleSelected => "module_selected",
            WorkflowState::RequiredStateReady => "required_state_ready",
            WorkflowState::IntentReady => "intent_ready",
            WorkflowState::OrchestrationReady => "orchestration_ready",
            WorkflowState::DepositSubmitted => "deposit_submitted",
            WorkflowState::NotifyFailed => "notify_failed",
            WorkflowState::Polling => "polling",
            WorkflowState::Completed => "completed",
            WorkflowState::Failed => "failed",
            WorkflowState::TimedOut => "timed_out",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowState::Completed | WorkflowState::Failed | WorkflowState::TimedOut
        )
    }

    /// An orchestration record exists and the run has not reached a terminal state
    pub fn run_in_flight(&self) -> bool {
        matches!(
            self,
            WorkflowState::OrchestrationReady
                | WorkflowState::DepositSubmitted
                | WorkflowState::NotifyFailed
                | WorkflowState::Polling
        )
    }

    /// Steps before an orchestration exists, where the user may still edit choices
    pub fn is_editable(&self) -> bool {
        matches!(
            self,
            WorkflowState::ModuleSelected
                | WorkflowState::RequiredStateReady
                | WorkflowState::IntentReady
        )
    }

    /// Legal forward and backward moves. Reset to `Idle` is always allowed.
    pub fn can_transition_to(&self, next: WorkflowState) -> bool {
        use WorkflowState::*;

        if next == Idle {
            return true;
        }

        match (self, next) {
            (Idle, ModuleSelected) => true,
            (ModuleSelected | RequiredStateReady | IntentReady, ModuleSelected) => true,
            (ModuleSelected, RequiredStateReady) => true,
            (IntentReady, RequiredStateReady) => true,
            (RequiredStateReady | IntentReady, IntentReady) => true,
            (IntentReady, OrchestrationReady) => true,
            (OrchestrationReady, DepositSubmitted | NotifyFailed) => true,
            (NotifyFailed, DepositSubmitted) => true,
            (DepositSubmitted | TimedOut, Polling) => true,
            (Polling, Completed | Failed | TimedOut | DepositSubmitted) => true,
            // A finished run may be followed by a fresh selection
            (Completed | Failed | TimedOut, ModuleSelected) => true,
            _ => false,
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

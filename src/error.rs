//! Error types for the deposit workflow

use thiserror::Error;

/// Longest raw cause shown to a user before truncation
pub const MAX_ERROR_MESSAGE_LEN: usize = 150;

/// Main error type for the orchestration workflow
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Chain {chain_id} not supported")]
    ChainNotFound { chain_id: u64 },

    #[error("Invalid amount {amount:?}: {reason}")]
    InvalidAmount { amount: String, reason: String },

    #[error("Insufficient balance on chain {chain_id}: have {have}, need {need}")]
    InsufficientBalance {
        chain_id: u64,
        have: String,
        need: String,
    },

    #[error("Failed to resolve required state: {cause}")]
    ResolutionFailed { cause: String },

    #[error("Required state for chain {resolved} is stale, destination is now {expected}")]
    StaleRequiredState { resolved: u64, expected: u64 },

    #[error("Failed to create orchestration: {cause}")]
    OrchestrationCreationFailed { cause: String },

    #[error("Signature request rejected by user")]
    SigningRejected,

    #[error("Transfer authorization failed: {cause}")]
    AuthorizationFailed { cause: String },

    #[error("Deposit transfer failed: {cause}")]
    TransferFailed { cause: String },

    #[error("Failed to notify coordinator of deposit for request {request_id}: {cause}")]
    NotifyFailed { request_id: String, cause: String },

    #[error("Status polling for request {request_id} ended without a terminal status")]
    PollingTimedOut { request_id: String },

    #[error("Orchestration failed remotely: {message}")]
    RemoteFailure { message: String },

    #[error("An orchestration run is already in progress")]
    RunInProgress,

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WorkflowError {
    /// Check if the failed step can be re-invoked as is
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WorkflowError::SigningRejected
                | WorkflowError::ResolutionFailed { .. }
                | WorkflowError::OrchestrationCreationFailed { .. }
                | WorkflowError::PollingTimedOut { .. }
                | WorkflowError::Cancelled
        )
    }

    /// Funds may have moved while the coordinator was never told about it.
    /// Restarting the run could double-spend, only `retry_notify` is safe.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, WorkflowError::NotifyFailed { .. })
    }

    /// Short message suitable for display, never the raw provider error
    pub fn user_message(&self) -> String {
        match self {
            WorkflowError::SigningRejected => {
                "Signature request was rejected. Please try again.".to_string()
            }
            WorkflowError::Cancelled => "The operation was cancelled.".to_string(),
            WorkflowError::RunInProgress => {
                "A deposit is already in progress. Wait for it to finish or reset.".to_string()
            }
            WorkflowError::NotifyFailed { .. } => {
                "Your deposit was made but the service could not be notified. Retry the notification instead of depositing again.".to_string()
            }
            WorkflowError::PollingTimedOut { request_id } => format!(
                "The deposit is still being processed. Check request {} again later.",
                request_id
            ),
            WorkflowError::InsufficientBalance { .. } => {
                "Insufficient funds. Please check your balance.".to_string()
            }
            WorkflowError::ChainNotFound { .. } => "This chain is not supported.".to_string(),
            other => friendly_message(&other.to_string()),
        }
    }
}

/// Truncate a diagnostic message to a bounded length
pub fn truncate_message(message: &str) -> String {
    if message.chars().count() > MAX_ERROR_MESSAGE_LEN {
        let head: String = message.chars().take(MAX_ERROR_MESSAGE_LEN - 3).collect();
        format!("{}...", head)
    } else {
        message.to_string()
    }
}

/// Map common provider failures to plain language, otherwise truncate
pub fn friendly_message(raw: &str) -> String {
    let lower = raw.to_lowercase();

    if lower.contains("insufficient funds") || lower.contains("insufficient balance") {
        return "Insufficient funds. Please check your balance.".to_string();
    }
    if lower.contains("user rejected") || lower.contains("user denied") {
        return "Transaction was rejected. Please try again.".to_string();
    }
    if lower.contains("network") || lower.contains("connection") {
        return "Network error. Please check your connection and try again.".to_string();
    }

    truncate_message(raw)
}

/// Result type for workflow operations
pub type WorkflowResult<T> = Result<T, WorkflowError>;

//! Status polling for a submitted orchestration
//!
//! Polling is read-only: it can be restarted for the same request id at any
//! time. A poll run ends on the first terminal snapshot, on cancellation or
//! once the attempt budget is spent. Running out of attempts is not a
//! failure, the orchestration may still be in flight.

use crate::config::PollingConfig;
use crate::coordinator::{Coordinator, OrchestrationStatus, StatusKind};
use crate::workflow::CancelToken;

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Polling cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: 60,
        }
    }
}

impl From<&PollingConfig> for PollConfig {
    fn from(config: &PollingConfig) -> Self {
        Self {
            interval: config.interval(),
            max_attempts: config.max_attempts,
        }
    }
}

/// Receives snapshots as they arrive
pub trait StatusObserver: Send + Sync {
    fn on_update(&self, _status: &OrchestrationStatus) {}

    fn on_complete(&self, _status: &OrchestrationStatus) {}

    fn on_error(&self, _message: &str) {}
}

impl StatusObserver for () {}

/// How a poll run ended
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Completed(OrchestrationStatus),
    Failed(OrchestrationStatus),
    /// Budget exhausted without a terminal snapshot; result unknown
    TimedOut {
        attempts: u32,
        last: Option<OrchestrationStatus>,
    },
    Cancelled,
}

pub struct StatusPoller {
    coordinator: Arc<dyn Coordinator>,
}

impl StatusPoller {
    pub fn new(coordinator: Arc<dyn Coordinator>) -> Self {
        Self { coordinator }
    }

    pub async fn poll(
        &self,
        request_id: &str,
        config: &PollConfig,
        observer: &dyn StatusObserver,
        cancel: &CancelToken,
    ) -> PollOutcome {
        let mut last: Option<OrchestrationStatus> = None;

        info!(
            "Polling orchestration {} every {:?} (max {} attempts)",
            request_id, config.interval, config.max_attempts
        );

        for attempt in 1..=config.max_attempts {
            let response = match cancel.run(self.coordinator.get_status(request_id)).await {
                Some(response) => response,
                None => return PollOutcome::Cancelled,
            };
            if cancel.is_cancelled() {
                return PollOutcome::Cancelled;
            }

            match response {
                Ok(snapshot) if snapshot.request_id != request_id => {
                    warn!(
                        "Discarding snapshot for {} while polling {}",
                        snapshot.request_id, request_id
                    );
                }
                Ok(snapshot) => {
                    debug!(
                        "Orchestration {} status {:?} (attempt {}/{})",
                        request_id, snapshot.status, attempt, config.max_attempts
                    );
                    observer.on_update(&snapshot);

                    match snapshot.status {
                        StatusKind::Completed => {
                            info!("Orchestration {} completed", request_id);
                            observer.on_complete(&snapshot);
                            return PollOutcome::Completed(snapshot);
                        }
                        StatusKind::Failed => {
                            let message = snapshot
                                .error_message
                                .clone()
                                .unwrap_or_else(|| "Orchestration failed".to_string());
                            warn!("Orchestration {} failed: {}", request_id, message);
                            observer.on_error(&message);
                            return PollOutcome::Failed(snapshot);
                        }
                        StatusKind::Pending => last = Some(snapshot),
                    }
                }
                Err(e) => {
                    warn!(
                        "Status query for {} failed (attempt {}/{}): {}",
                        request_id, attempt, config.max_attempts, e
                    );
                }
            }

            if attempt < config.max_attempts && cancel.run(sleep(config.interval)).await.is_none() {
                return PollOutcome::Cancelled;
            }
        }

        info!(
            "Orchestration {} still pending after {} attempts",
            request_id, config.max_attempts
        );
        PollOutcome::TimedOut {
            attempts: config.max_attempts,
            last,
        }
    }
}

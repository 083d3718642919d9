//! Orchestration requests
//!
//! Turns an intent and a resolved module into a signed request, submits it
//! and keeps the coordinator's record together with the flow classification.

pub mod builder;

pub use builder::OrchestrationRequestBuilder;

use crate::coordinator::OrchestrationRecord;
use std::fmt;

/// Whether the run crosses chains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    SameChain,
    CrossChain,
}

impl FlowKind {
    /// Classification from the intent's source chain and the resolved chain
    pub fn classify(source_chain_id: u64, required_state_chain_id: u64) -> Self {
        if source_chain_id == required_state_chain_id {
            FlowKind::SameChain
        } else {
            FlowKind::CrossChain
        }
    }
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowKind::SameChain => f.write_str("same-chain"),
            FlowKind::CrossChain => f.write_str("cross-chain"),
        }
    }
}

/// A created orchestration and the flow it was classified as
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltOrchestration {
    pub record: OrchestrationRecord,
    pub flow: FlowKind,
}

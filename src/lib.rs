//! Gasless Depositor - cross-chain deposit orchestration client
//!
//! Moves a stable token from a source chain into a strategy module on a
//! destination chain. The coordinator backend creates the smart accounts
//! and bridges; this crate resolves the module, signs the orchestration
//! request, makes the deposit (gasless EIP-3009 authorization or on-chain
//! transfer) and follows the orchestration until it settles.

pub mod chain;
pub mod config;
pub mod coordinator;
pub mod deposit;
pub mod error;
pub mod intent;
pub mod module;
pub mod orchestration;
pub mod poller;
pub mod workflow;

#[cfg(test)]
pub(crate) mod test_utils;

pub use error::{WorkflowError, WorkflowResult};

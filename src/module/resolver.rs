//! Fetches the required state of a module on a destination chain

use super::{ModuleKind, ModuleRegistry, RequiredState};
use crate::chain::ChainRegistry;
use crate::coordinator::Coordinator;
use crate::error::{WorkflowError, WorkflowResult};

use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct ModuleResolver {
    chains: Arc<ChainRegistry>,
    modules: Arc<ModuleRegistry>,
    coordinator: Arc<dyn Coordinator>,
}

impl ModuleResolver {
    pub fn new(
        chains: Arc<ChainRegistry>,
        modules: Arc<ModuleRegistry>,
        coordinator: Arc<dyn Coordinator>,
    ) -> Self {
        Self {
            chains,
            modules,
            coordinator,
        }
    }

    /// Resolve what `module_kind` needs on `destination_chain_id`.
    ///
    /// Unknown chains fail before any network call. The returned state
    /// always carries the requested chain and module.
    pub async fn resolve(
        &self,
        module_kind: ModuleKind,
        destination_chain_id: u64,
    ) -> WorkflowResult<RequiredState> {
        if !self.chains.contains(destination_chain_id) {
            return Err(WorkflowError::ResolutionFailed {
                cause: format!("chain {} is not supported", destination_chain_id),
            });
        }

        debug!(
            "Resolving {} on chain {}",
            module_kind, destination_chain_id
        );

        let state = self
            .coordinator
            .resolve_required_state(module_kind, destination_chain_id)
            .await
            .map_err(|e| WorkflowError::ResolutionFailed {
                cause: e.to_string(),
            })?;

        if state.chain_id != destination_chain_id || state.module_kind != module_kind {
            return Err(WorkflowError::ResolutionFailed {
                cause: format!(
                    "coordinator answered for {} on chain {}, asked for {} on chain {}",
                    state.module_kind, state.chain_id, module_kind, destination_chain_id
                ),
            });
        }

        if let Some(schema) = self.modules.get(module_kind)?.field_schema() {
            let names: Vec<&str> = schema.iter().map(|f| f.name.as_str()).collect();
            let remote: Vec<&str> = state.required_fields.iter().map(|f| f.name.as_str()).collect();
            if !remote.is_empty() && names != remote {
                warn!(
                    "Coordinator fields {:?} for {} differ from local schema {:?}",
                    remote, module_kind, names
                );
            }
        }

        info!(
            "Resolved {} on chain {}: module {:?} ({})",
            module_kind, destination_chain_id, state.module_address, state.config_input_type
        );

        Ok(state)
    }
}

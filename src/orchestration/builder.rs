//! Builds, signs and submits orchestration requests

use super::{BuiltOrchestration, FlowKind};
use crate::coordinator::{Coordinator, CreateOrchestrationRequest, CurrentState};
use crate::deposit::{SignerError, WalletSigner};
use crate::error::{WorkflowError, WorkflowResult};
use crate::intent::Intent;
use crate::module::RequiredState;
use crate::workflow::CancelToken;

use ethers::abi::{encode, Token};
use ethers::types::{Address, Bytes, H256, U256};
use sha3::{Digest, Keccak256};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct OrchestrationRequestBuilder {
    coordinator: Arc<dyn Coordinator>,
    signer: Arc<dyn WalletSigner>,
}

fn creation_failed(cause: impl Into<String>) -> WorkflowError {
    WorkflowError::OrchestrationCreationFailed {
        cause: cause.into(),
    }
}

fn keccak256(bytes: &[u8]) -> H256 {
    H256::from_slice(Keccak256::digest(bytes).as_slice())
}

/// Digest the owner signs to authorize a request
pub fn request_digest(intent: &Intent, required_state: &RequiredState, encoded_config: &Bytes) -> H256 {
    keccak256(&encode(&[
        Token::Uint(U256::from(intent.source_chain_id)),
        Token::Address(intent.source_token_address),
        Token::Uint(intent.amount.to_u256()),
        Token::Address(intent.owner_address),
        Token::Uint(U256::from(required_state.chain_id)),
        Token::Address(required_state.module_address),
        Token::FixedBytes(keccak256(encoded_config).as_bytes().to_vec()),
    ]))
}

impl OrchestrationRequestBuilder {
    pub fn new(coordinator: Arc<dyn Coordinator>, signer: Arc<dyn WalletSigner>) -> Self {
        Self { coordinator, signer }
    }

    /// Create exactly one orchestration record. Never retried here.
    pub async fn build(
        &self,
        intent: &Intent,
        required_state: &RequiredState,
        owner_address: Address,
        api_key: &str,
        encoded_module_config: &Bytes,
        cancel: &CancelToken,
    ) -> WorkflowResult<BuiltOrchestration> {
        if owner_address.is_zero() {
            return Err(creation_failed("owner address is missing"));
        }
        if owner_address != intent.owner_address {
            return Err(creation_failed(format!(
                "owner {:?} does not match intent owner {:?}",
                owner_address, intent.owner_address
            )));
        }
        if api_key.trim().is_empty() {
            return Err(creation_failed("api key is missing"));
        }
        if encoded_module_config.is_empty() {
            return Err(creation_failed("encoded module config is empty"));
        }
        if self.signer.address() != owner_address {
            return Err(creation_failed(format!(
                "connected signer {:?} is not the owner {:?}",
                self.signer.address(),
                owner_address
            )));
        }

        let flow = FlowKind::classify(intent.source_chain_id, required_state.chain_id);
        info!(
            "Building {} orchestration: {} units on chain {} -> {} on chain {}",
            flow,
            intent.amount.units(),
            intent.source_chain_id,
            required_state.module_kind,
            required_state.chain_id
        );

        let digest = request_digest(intent, required_state, encoded_module_config);
        debug!("Request digest 0x{}", hex::encode(digest));

        let signature = cancel
            .run(self.signer.sign_message(digest.as_bytes().to_vec()))
            .await
            .ok_or(WorkflowError::Cancelled)?
            .map_err(|e| match e {
                SignerError::Rejected => creation_failed("owner declined to sign the request"),
                SignerError::Failed(cause) => creation_failed(cause),
            })?;

        let request = CreateOrchestrationRequest {
            current_state: CurrentState::from(intent),
            required_state: required_state.clone(),
            owner_address,
            encoded_data: encoded_module_config.clone(),
            owner_signature: Bytes::from(signature.to_vec()),
            api_key: api_key.to_string(),
        };

        let record = self
            .coordinator
            .create_orchestration(&request)
            .await
            .map_err(|e| creation_failed(e.to_string()))?;

        if record.request_id.trim().is_empty() {
            return Err(creation_failed("coordinator returned an empty request id"));
        }
        if record.source_chain_id != intent.source_chain_id
            || record.destination_chain_id != required_state.chain_id
        {
            warn!(
                "Coordinator record {} spans {} -> {}, requested {} -> {}",
                record.request_id,
                record.source_chain_id,
                record.destination_chain_id,
                intent.source_chain_id,
                required_state.chain_id
            );
            return Err(creation_failed(format!(
                "record {} does not match the requested chains",
                record.request_id
            )));
        }

        info!(
            "Orchestration {} created: source account {:?}, destination account {:?}",
            record.request_id,
            record.account_address_on_source_chain,
            record.account_address_on_destination_chain
        );

        Ok(BuiltOrchestration { record, flow })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deposit::signer::MockWalletSigner;
    use crate::module::ModuleKind;
    use crate::test_utils::{required_state, sample_intent, FakeCoordinator, KeySigner};
    use crate::workflow::CancelHandle;

    fn config() -> Bytes {
        Bytes::from(vec![0xde, 0xad, 0xbe, 0xef])
    }

    #[tokio::test]
    async fn test_cross_chain_build() {
        let coordinator = Arc::new(FakeCoordinator::new());
        let signer = Arc::new(KeySigner::new());
        let builder = OrchestrationRequestBuilder::new(coordinator.clone(), signer.clone());

        let intent = sample_intent(84532, "5.00", signer.address());
        let state = required_state(ModuleKind::Autoswap, 421614);

        let built = builder
            .build(
                &intent,
                &state,
                signer.address(),
                "key",
                &config(),
                &CancelHandle::new().token(),
            )
            .await
            .unwrap();

        assert_eq!(built.flow, FlowKind::CrossChain);
        assert_eq!(built.record.source_chain_id, 84532);
        assert_eq!(built.record.destination_chain_id, 421614);

        let requests = coordinator.created();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].api_key, "key");
        assert_eq!(requests[0].current_state.token_amount, "5000000");

        let signature =
            ethers::types::Signature::try_from(requests[0].owner_signature.as_ref()).unwrap();
        let digest = request_digest(&intent, &state, &config());
        assert_eq!(
            signature.recover(digest.as_bytes().to_vec()).unwrap(),
            signer.address()
        );
    }

    #[tokio::test]
    async fn test_same_chain_build() {
        let coordinator = Arc::new(FakeCoordinator::new());
        let signer = Arc::new(KeySigner::new());
        let builder = OrchestrationRequestBuilder::new(coordinator, signer.clone());

        let intent = sample_intent(421614, "1.50", signer.address());
        let state = required_state(ModuleKind::Bond, 421614);

        let built = builder
            .build(
                &intent,
                &state,
                signer.address(),
                "key",
                &config(),
                &CancelHandle::new().token(),
            )
            .await
            .unwrap();
        assert_eq!(built.flow, FlowKind::SameChain);
    }

    #[tokio::test]
    async fn test_preconditions_block_network_call() {
        let coordinator = Arc::new(FakeCoordinator::new());
        let signer = Arc::new(KeySigner::new());
        let builder = OrchestrationRequestBuilder::new(coordinator.clone(), signer.clone());
        let intent = sample_intent(84532, "5.00", signer.address());
        let state = required_state(ModuleKind::Autoswap, 421614);
        let cancel = CancelHandle::new().token();

        let valid = config();
        let empty = Bytes::default();
        let cases: Vec<(Address, &str, &Bytes)> = vec![
            (Address::zero(), "key", &valid),
            (Address::repeat_byte(0x77), "key", &valid),
            (signer.address(), "", &valid),
            (signer.address(), "key", &empty),
        ];
        for (owner, api_key, encoded) in cases {
            let err = builder
                .build(&intent, &state, owner, api_key, encoded, &cancel)
                .await
                .unwrap_err();
            assert!(matches!(err, WorkflowError::OrchestrationCreationFailed { .. }));
        }
        assert!(coordinator.created().is_empty());
    }

    #[tokio::test]
    async fn test_declined_signature_aborts_build() {
        let coordinator = Arc::new(FakeCoordinator::new());
        let owner = Address::repeat_byte(0x11);
        let mut signer = MockWalletSigner::new();
        signer.expect_address().return_const(owner);
        signer
            .expect_sign_message()
            .returning(|_| Err(SignerError::Rejected));
        let builder = OrchestrationRequestBuilder::new(coordinator.clone(), Arc::new(signer));

        let err = builder
            .build(
                &sample_intent(84532, "5.00", owner),
                &required_state(ModuleKind::Autoswap, 421614),
                owner,
                "key",
                &config(),
                &CancelHandle::new().token(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::OrchestrationCreationFailed { .. }));
        assert!(err.is_retryable());
        assert!(coordinator.created().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_record_is_rejected() {
        let coordinator = Arc::new(FakeCoordinator::new());
        coordinator.return_empty_request_id();
        let signer = Arc::new(KeySigner::new());
        let builder = OrchestrationRequestBuilder::new(coordinator, signer.clone());

        let err = builder
            .build(
                &sample_intent(84532, "5.00", signer.address()),
                &required_state(ModuleKind::Autoswap, 421614),
                signer.address(),
                "key",
                &config(),
                &CancelHandle::new().token(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::OrchestrationCreationFailed { .. }));
    }
}

//! Gasless deposits through EIP-3009 `transferWithAuthorization`
//!
//! The owner signs an EIP-712 typed message under the token's own domain.
//! Nothing is broadcast here; the coordinator redeems the authorization in
//! its batch.

use super::{DepositContext, DepositOutcome, DepositStrategy, SignedAuthorization};
use super::signer::{SignerError, WalletSigner};
use crate::chain::ChainDescriptor;
use crate::error::{WorkflowError, WorkflowResult};
use crate::module::DepositStrategyKind;
use crate::orchestration::FlowKind;
use crate::workflow::CancelToken;

use async_trait::async_trait;
use ethers::abi::{encode, Token};
use ethers::types::{Address, Bytes, H256, U256};
use lazy_static::lazy_static;
use sha3::{Digest, Keccak256};
use std::sync::Arc;
use tracing::{debug, info};

lazy_static! {
    static ref DOMAIN_TYPEHASH: H256 = keccak256(
        b"EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)"
    );
    static ref TRANSFER_WITH_AUTHORIZATION_TYPEHASH: H256 = keccak256(
        b"TransferWithAuthorization(address from,address to,uint256 value,uint256 validAfter,uint256 validBefore,bytes32 nonce)"
    );
}

fn keccak256(bytes: &[u8]) -> H256 {
    H256::from_slice(Keccak256::digest(bytes).as_slice())
}

/// EIP-712 domain of the token contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationDomain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: Address,
}

impl AuthorizationDomain {
    pub fn for_chain(chain: &ChainDescriptor) -> Self {
        Self {
            name: chain.token_name.clone(),
            version: chain.token_version.clone(),
            chain_id: chain.chain_id,
            verifying_contract: chain.token_address,
        }
    }

    pub fn separator(&self) -> H256 {
        keccak256(&encode(&[
            Token::FixedBytes(DOMAIN_TYPEHASH.as_bytes().to_vec()),
            Token::FixedBytes(keccak256(self.name.as_bytes()).as_bytes().to_vec()),
            Token::FixedBytes(keccak256(self.version.as_bytes()).as_bytes().to_vec()),
            Token::Uint(U256::from(self.chain_id)),
            Token::Address(self.verifying_contract),
        ]))
    }
}

/// Unsigned authorization fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferAuthorization {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub valid_after: U256,
    pub valid_before: U256,
    pub nonce: H256,
}

impl TransferAuthorization {
    fn struct_hash(&self) -> H256 {
        keccak256(&encode(&[
            Token::FixedBytes(TRANSFER_WITH_AUTHORIZATION_TYPEHASH.as_bytes().to_vec()),
            Token::Address(self.from),
            Token::Address(self.to),
            Token::Uint(self.value),
            Token::Uint(self.valid_after),
            Token::Uint(self.valid_before),
            Token::FixedBytes(self.nonce.as_bytes().to_vec()),
        ]))
    }

    /// Final EIP-712 digest: `keccak256(0x1901 || domainSeparator || structHash)`
    pub fn digest(&self, domain: &AuthorizationDomain) -> H256 {
        let mut buf = Vec::with_capacity(2 + 32 + 32);
        buf.extend_from_slice(b"\x19\x01");
        buf.extend_from_slice(domain.separator().as_bytes());
        buf.extend_from_slice(self.struct_hash().as_bytes());
        keccak256(&buf)
    }
}

pub struct GaslessDepositExecutor {
    signer: Arc<dyn WalletSigner>,
    validity_secs: u64,
}

impl GaslessDepositExecutor {
    pub fn new(signer: Arc<dyn WalletSigner>, validity_secs: u64) -> Self {
        Self {
            signer,
            validity_secs,
        }
    }

    /// Sign an authorization moving `amount` units from `from` to `to`
    pub async fn deposit_gasless(
        &self,
        from: Address,
        to: Address,
        domain: &AuthorizationDomain,
        amount: U256,
        cancel: &CancelToken,
    ) -> WorkflowResult<SignedAuthorization> {
        let signer_address = self.signer.address();
        if signer_address != from {
            return Err(WorkflowError::AuthorizationFailed {
                cause: format!(
                    "signer {:?} does not own {:?}",
                    signer_address, from
                ),
            });
        }

        let valid_before = chrono::Utc::now().timestamp().max(0) as u64 + self.validity_secs;
        let authorization = TransferAuthorization {
            from,
            to,
            value: amount,
            valid_after: U256::zero(),
            valid_before: U256::from(valid_before),
            nonce: H256::random(),
        };
        let digest = authorization.digest(domain);

        debug!(
            "Requesting EIP-3009 signature: {:?} -> {:?}, value {}, nonce 0x{}",
            from,
            to,
            amount,
            hex::encode(authorization.nonce)
        );

        let signature = cancel
            .run(self.signer.sign_authorization(digest))
            .await
            .ok_or(WorkflowError::Cancelled)?
            .map_err(|e| match e {
                SignerError::Rejected => WorkflowError::SigningRejected,
                SignerError::Failed(cause) => WorkflowError::AuthorizationFailed { cause },
            })?;

        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        signature.r.to_big_endian(&mut r);
        signature.s.to_big_endian(&mut s);

        Ok(SignedAuthorization {
            from,
            to,
            value: amount,
            valid_after: authorization.valid_after,
            valid_before: authorization.valid_before,
            nonce: authorization.nonce,
            v: signature.v,
            r: H256::from(r),
            s: H256::from(s),
            signature: Bytes::from(signature.to_vec()),
        })
    }
}

#[async_trait]
impl DepositStrategy for GaslessDepositExecutor {
    fn kind(&self) -> DepositStrategyKind {
        DepositStrategyKind::Gasless
    }

    /// Same-chain runs have no bridge step, funds go straight to the executing account
    fn recipient(&self, ctx: &DepositContext<'_>) -> Address {
        match ctx.flow {
            FlowKind::SameChain => ctx.record.account_address_on_destination_chain,
            FlowKind::CrossChain => ctx.record.account_address_on_source_chain,
        }
    }

    async fn submit(
        &self,
        ctx: &DepositContext<'_>,
        cancel: &CancelToken,
    ) -> WorkflowResult<DepositOutcome> {
        let to = self.recipient(ctx);
        let domain = AuthorizationDomain::for_chain(ctx.source_chain);

        let signed_authorization = self
            .deposit_gasless(
                ctx.intent.owner_address,
                to,
                &domain,
                ctx.intent.amount.to_u256(),
                cancel,
            )
            .await?;

        info!(
            "EIP-3009 authorization signed for request {}: {} units to {:?}",
            ctx.record.request_id, signed_authorization.value, to
        );

        Ok(DepositOutcome::Gasless {
            signed_authorization,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deposit::signer::MockWalletSigner;
    use crate::test_utils::{sample_intent, sample_record, test_registry, KeySigner};
    use crate::workflow::CancelHandle;
    use std::time::Duration;

    #[test]
    fn test_typehash_constants() {
        assert_eq!(
            hex::encode(TRANSFER_WITH_AUTHORIZATION_TYPEHASH.as_bytes()),
            "7c7c6cdb67a18743f49ec6fa9b35f50d52ed05cbed4cc592e13b44501c1a2267"
        );
        assert_eq!(
            hex::encode(DOMAIN_TYPEHASH.as_bytes()),
            "8b73c3c69bb8fe3d512ecc4cf759cc79239f7b179b0ffacaa9a75d522b39400f"
        );
    }

    #[tokio::test]
    async fn test_recipient_depends_on_flow() {
        let registry = test_registry();
        let signer = Arc::new(KeySigner::new());
        let executor = GaslessDepositExecutor::new(signer.clone(), 3_600);
        let intent = sample_intent(84532, "5.00", signer.address());
        let source = registry.get(84532).unwrap();
        let cancel = CancelHandle::new().token();

        let cross = sample_record(84532, 421614);
        let ctx = DepositContext {
            record: &cross,
            intent: &intent,
            flow: FlowKind::CrossChain,
            source_chain: source,
        };
        let outcome = executor.submit(&ctx, &cancel).await.unwrap();
        assert_eq!(outcome.recipient(), Some(cross.account_address_on_source_chain));

        let same = sample_record(84532, 84532);
        let ctx = DepositContext {
            record: &same,
            intent: &intent,
            flow: FlowKind::SameChain,
            source_chain: source,
        };
        let outcome = executor.submit(&ctx, &cancel).await.unwrap();
        assert_eq!(
            outcome.recipient(),
            Some(same.account_address_on_destination_chain)
        );
    }

    #[tokio::test]
    async fn test_authorization_is_fresh_and_recoverable() {
        let registry = test_registry();
        let source = registry.get(84532).unwrap();
        let domain = AuthorizationDomain::for_chain(source);
        let signer = Arc::new(KeySigner::new());
        let executor = GaslessDepositExecutor::new(signer.clone(), 600);
        let cancel = CancelHandle::new().token();
        let to = Address::repeat_byte(0x22);
        let amount = U256::from(5_000_000u64);

        let first = executor
            .deposit_gasless(signer.address(), to, &domain, amount, &cancel)
            .await
            .unwrap();
        let second = executor
            .deposit_gasless(signer.address(), to, &domain, amount, &cancel)
            .await
            .unwrap();

        assert_ne!(first.nonce, second.nonce);
        assert_eq!(first.valid_after, U256::zero());
        assert!(first.valid_before > U256::from(chrono::Utc::now().timestamp() as u64));
        assert_eq!(first.signature.len(), 65);

        let digest = TransferAuthorization {
            from: first.from,
            to: first.to,
            value: first.value,
            valid_after: first.valid_after,
            valid_before: first.valid_before,
            nonce: first.nonce,
        }
        .digest(&domain);
        let signature = ethers::types::Signature::try_from(first.signature.as_ref()).unwrap();
        assert_eq!(signature.recover(digest).unwrap(), signer.address());
    }

    #[tokio::test]
    async fn test_rejection_and_failure_are_distinct() {
        let registry = test_registry();
        let domain = AuthorizationDomain::for_chain(registry.get(84532).unwrap());
        let owner = Address::repeat_byte(0x11);
        let cancel = CancelHandle::new().token();

        let mut rejecting = MockWalletSigner::new();
        rejecting.expect_address().return_const(owner);
        rejecting
            .expect_sign_authorization()
            .times(1)
            .returning(|_| Err(SignerError::Rejected));
        let executor = GaslessDepositExecutor::new(Arc::new(rejecting), 600);
        let err = executor
            .deposit_gasless(owner, owner, &domain, U256::one(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::SigningRejected));

        let mut failing = MockWalletSigner::new();
        failing.expect_address().return_const(owner);
        failing
            .expect_sign_authorization()
            .returning(|_| Err(SignerError::Failed("device disconnected".into())));
        let executor = GaslessDepositExecutor::new(Arc::new(failing), 600);
        let err = executor
            .deposit_gasless(owner, owner, &domain, U256::one(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::AuthorizationFailed { .. }));
    }

    #[tokio::test]
    async fn test_signer_must_own_source_funds() {
        let registry = test_registry();
        let domain = AuthorizationDomain::for_chain(registry.get(84532).unwrap());
        let mut signer = MockWalletSigner::new();
        signer
            .expect_address()
            .return_const(Address::repeat_byte(0x99));
        signer.expect_sign_authorization().never();

        let executor = GaslessDepositExecutor::new(Arc::new(signer), 600);
        let err = executor
            .deposit_gasless(
                Address::repeat_byte(0x11),
                Address::repeat_byte(0x22),
                &domain,
                U256::one(),
                &CancelHandle::new().token(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::AuthorizationFailed { .. }));
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_signature() {
        let registry = test_registry();
        let domain = AuthorizationDomain::for_chain(registry.get(84532).unwrap());
        let signer = Arc::new(KeySigner::new().with_delay(Duration::from_secs(30)));
        let executor = GaslessDepositExecutor::new(signer.clone(), 600);
        let handle = CancelHandle::new();
        let token = handle.token();

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.cancel();
        });

        let err = executor
            .deposit_gasless(
                signer.address(),
                Address::repeat_byte(0x22),
                &domain,
                U256::one(),
                &token,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Cancelled));
        canceller.await.unwrap();
    }
}

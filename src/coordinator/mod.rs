//! Coordinator module - the backend that owns orchestration records
//!
//! The coordinator resolves module requirements, creates orchestration
//! records, accepts deposit proofs and reports progress. Everything here is
//! its request/response contract; `http` carries it over HTTP.

pub mod http;

pub use http::HttpCoordinator;

use crate::deposit::SignedAuthorization;
use crate::intent::Intent;
use crate::module::{chain_id_string, ModuleKind, RequiredState};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use ethers::types::{Address, Bytes, H256};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Errors returned by the coordinator client
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Coordinator unreachable: {0}")]
    Transport(String),

    #[error("Coordinator returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid coordinator response: {0}")]
    InvalidResponse(String),
}

/// Request/response contract of the coordinator
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// On-chain configuration `module` needs on `chain_id`
    async fn resolve_required_state(
        &self,
        module: ModuleKind,
        chain_id: u64,
    ) -> Result<RequiredState, CoordinatorError>;

    /// Create one orchestration record
    async fn create_orchestration(
        &self,
        request: &CreateOrchestrationRequest,
    ) -> Result<OrchestrationRecord, CoordinatorError>;

    /// Hand the deposit proof for `request_id` to the coordinator
    async fn notify_deposit(
        &self,
        request_id: &str,
        proof: &DepositProof,
    ) -> Result<(), CoordinatorError>;

    /// Current status snapshot; read-only
    async fn get_status(&self, request_id: &str) -> Result<OrchestrationStatus, CoordinatorError>;
}

/// What the user holds, as the coordinator expects it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentState {
    #[serde(with = "chain_id_string")]
    pub chain_id: u64,
    pub token_address: Address,
    /// Integer token units as a decimal string
    pub token_amount: String,
    pub owner_address: Address,
}

impl From<&Intent> for CurrentState {
    fn from(intent: &Intent) -> Self {
        Self {
            chain_id: intent.source_chain_id,
            token_address: intent.source_token_address,
            token_amount: intent.amount.units().to_string(),
            owner_address: intent.owner_address,
        }
    }
}

/// Body of `POST /api/v1/orchestrations`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrchestrationRequest {
    pub current_state: CurrentState,
    pub required_state: RequiredState,
    pub owner_address: Address,
    pub encoded_data: Bytes,
    pub owner_signature: Bytes,
    /// Sent as the `x-api-key` header, never in the body
    #[serde(skip)]
    pub api_key: String,
}

/// Smart-account layout the coordinator assigned to one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationRecord {
    pub request_id: String,
    #[serde(with = "chain_id_string")]
    pub source_chain_id: u64,
    #[serde(with = "chain_id_string")]
    pub destination_chain_id: u64,
    pub account_address_on_source_chain: Address,
    pub account_address_on_destination_chain: Address,
    pub destination_token_address: Address,
    #[serde(default)]
    pub source_chain_account_modules: Vec<Address>,
    #[serde(default)]
    pub destination_chain_account_modules: Vec<Address>,
}

/// Progress of an orchestration on the coordinator side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusKind {
    #[serde(alias = "completed")]
    Completed,
    #[serde(alias = "failed")]
    Failed,
    /// Any in-flight stage the coordinator reports
    #[serde(other)]
    Pending,
}

impl StatusKind {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StatusKind::Completed | StatusKind::Failed)
    }
}

/// One status snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationStatus {
    pub status: StatusKind,
    #[serde(alias = "requestId")]
    pub request_id: String,
    #[serde(default, alias = "updatedAt", deserialize_with = "lenient_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "createdAt", deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl OrchestrationStatus {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Equal apart from timestamps
    pub fn same_state_as(&self, other: &OrchestrationStatus) -> bool {
        self.status == other.status
            && self.request_id == other.request_id
            && self.error_message == other.error_message
    }
}

/// RFC 3339, offset-less (taken as UTC) or epoch milliseconds. Anything else
/// is dropped rather than failing the snapshot.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw.and_then(|value| parse_timestamp(&value)))
}

fn parse_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    if let Some(millis) = value.as_i64() {
        return Utc.timestamp_millis_opt(millis).single();
    }

    let text = value.as_str()?.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// How the deposit reached the orchestration account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferType {
    Transfer,
    TransferWithAuthorization,
}

/// Evidence of a completed deposit
#[derive(Debug, Clone, PartialEq)]
pub enum DepositProof {
    TransferWithAuthorization(SignedAuthorization),
    Transfer { tx_hash: H256, block_number: u64 },
}

impl DepositProof {
    pub fn transfer_type(&self) -> TransferType {
        match self {
            DepositProof::TransferWithAuthorization(_) => TransferType::TransferWithAuthorization,
            DepositProof::Transfer { .. } => TransferType::Transfer,
        }
    }
}

/// Body of `POST /api/v1/orchestrations/{id}/deposit`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DepositNotification<'a> {
    pub request_id: &'a str,
    pub transaction_hash: String,
    pub block_number: String,
    pub transfer_type: TransferType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_authorization: Option<AuthorizationPayload>,
}

impl<'a> DepositNotification<'a> {
    pub fn new(request_id: &'a str, proof: &DepositProof) -> Self {
        match proof {
            // Nothing was broadcast, the coordinator redeems the authorization itself
            DepositProof::TransferWithAuthorization(auth) => Self {
                request_id,
                transaction_hash: "0x".to_string(),
                block_number: "0".to_string(),
                transfer_type: TransferType::TransferWithAuthorization,
                signed_authorization: Some(AuthorizationPayload::from(auth)),
            },
            DepositProof::Transfer {
                tx_hash,
                block_number,
            } => Self {
                request_id,
                transaction_hash: format!("{:?}", tx_hash),
                block_number: block_number.to_string(),
                transfer_type: TransferType::Transfer,
                signed_authorization: None,
            },
        }
    }
}

/// Signed EIP-3009 authorization with integers as decimal strings
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AuthorizationPayload {
    pub from: Address,
    pub to: Address,
    pub value: String,
    pub valid_after: String,
    pub valid_before: String,
    pub nonce: H256,
    pub v: u64,
    pub r: H256,
    pub s: H256,
    pub signature: Bytes,
}

impl From<&SignedAuthorization> for AuthorizationPayload {
    fn from(auth: &SignedAuthorization) -> Self {
        Self {
            from: auth.from,
            to: auth.to,
            value: auth.value.to_string(),
            valid_after: auth.valid_after.to_string(),
            valid_before: auth.valid_before.to_string(),
            nonce: auth.nonce,
            v: auth.v,
            r: auth.r,
            s: auth.s,
            signature: auth.signature.clone(),
        }
    }
}

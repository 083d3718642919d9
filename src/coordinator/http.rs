//! HTTP client for the coordinator API

use super::{
    Coordinator, CoordinatorError, CreateOrchestrationRequest, DepositNotification, DepositProof,
    OrchestrationRecord, OrchestrationStatus,
};
use crate::config::CoordinatorConfig;
use crate::error::truncate_message;
use crate::module::{ModuleKind, RequiredState};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

const API_KEY_HEADER: &str = "x-api-key";

/// Coordinator reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpCoordinator {
    base_url: String,
    api_key: String,
    client: Client,
}

/// Some deployments wrap payloads in `{ "data": ... }`
#[derive(Deserialize)]
#[serde(untagged)]
enum Envelope<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> Envelope<T> {
    fn into_inner(self) -> T {
        match self {
            Envelope::Wrapped { data } => data,
            Envelope::Bare(value) => value,
        }
    }
}

impl HttpCoordinator {
    pub fn new(config: &CoordinatorConfig) -> Result<Self, CoordinatorError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| CoordinatorError::Transport(e.to_string()))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, CoordinatorError> {
        let response = request.send().await.map_err(map_http_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(CoordinatorError::Api {
            status: status.as_u16(),
            message: error_message(&body, status.canonical_reason()),
        })
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, CoordinatorError> {
        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| CoordinatorError::InvalidResponse(e.to_string()))?;
        Ok(envelope.into_inner())
    }
}

fn map_http_error(error: reqwest::Error) -> CoordinatorError {
    if error.is_timeout() {
        CoordinatorError::Transport(format!("Request timeout: {}", error))
    } else if error.is_connect() {
        CoordinatorError::Transport(format!("Connection error: {}", error))
    } else {
        CoordinatorError::Transport(format!("HTTP error: {}", error))
    }
}

/// Pull a readable message out of an error body
fn error_message(body: &str, reason: Option<&str>) -> String {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
    let from_json = parsed.as_ref().and_then(|value| {
        ["message", "error"]
            .iter()
            .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
            .map(str::to_string)
    });

    match from_json {
        Some(message) => truncate_message(&message),
        None if !body.trim().is_empty() => truncate_message(body.trim()),
        None => reason.unwrap_or("unknown error").to_string(),
    }
}

#[async_trait]
impl Coordinator for HttpCoordinator {
    #[instrument(skip(self))]
    async fn resolve_required_state(
        &self,
        module: ModuleKind,
        chain_id: u64,
    ) -> Result<RequiredState, CoordinatorError> {
        let url = self.url(&format!("/api/v1/modules/{}/required-state", module));
        debug!("Resolving required state: {}", url);

        let request = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .query(&[("chainId", chain_id.to_string())]);

        let response = self.send(request).await?;
        Self::read_json(response).await
    }

    #[instrument(skip(self, request), fields(owner = ?request.owner_address))]
    async fn create_orchestration(
        &self,
        request: &CreateOrchestrationRequest,
    ) -> Result<OrchestrationRecord, CoordinatorError> {
        let url = self.url("/api/v1/orchestrations");
        debug!(
            "Creating orchestration {} -> {}",
            request.current_state.chain_id, request.required_state.chain_id
        );

        let http_request = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &request.api_key)
            .json(request);

        let response = self.send(http_request).await?;
        Self::read_json(response).await
    }

    #[instrument(skip(self, proof), fields(transfer_type = ?proof.transfer_type()))]
    async fn notify_deposit(
        &self,
        request_id: &str,
        proof: &DepositProof,
    ) -> Result<(), CoordinatorError> {
        let url = self.url(&format!("/api/v1/orchestrations/{}/deposit", request_id));
        let body = DepositNotification::new(request_id, proof);

        let request = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body);

        self.send(request).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_status(&self, request_id: &str) -> Result<OrchestrationStatus, CoordinatorError> {
        let url = self.url(&format!("/api/v1/orchestrations/{}/status", request_id));

        let request = self.client.get(&url).header(API_KEY_HEADER, &self.api_key);

        let response = self.send(request).await?;
        Self::read_json(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{CurrentState, StatusKind};
    use ethers::types::{Address, Bytes, H256};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn coordinator(server: &MockServer) -> HttpCoordinator {
        HttpCoordinator::new(&CoordinatorConfig {
            base_url: format!("{}/", server.uri()),
            api_key: "test-key".to_string(),
            request_timeout_secs: 5,
        })
        .unwrap()
    }

    fn required_state_body() -> serde_json::Value {
        json!({
            "chainId": "421614",
            "moduleName": "AUTOSWAP",
            "moduleAddress": "0x42CF1b746F96D6cc59e84F87d26Ea64D3fbCa3a0",
            "configInputType": "AutoSwapConfig",
            "requiredFields": [
                {"name": "chainId", "type": "uint256"},
                {"name": "tokenAddress", "type": "address"}
            ],
            "configTemplate": {"chainId": null, "tokenAddress": null}
        })
    }

    #[tokio::test]
    async fn test_resolve_required_state() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/modules/AUTOSWAP/required-state"))
            .and(query_param("chainId", "421614"))
            .and(header("x-api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(required_state_body()))
            .expect(1)
            .mount(&server)
            .await;

        let state = coordinator(&server)
            .resolve_required_state(ModuleKind::Autoswap, 421614)
            .await
            .unwrap();

        assert_eq!(state.chain_id, 421614);
        assert_eq!(state.module_kind, ModuleKind::Autoswap);
        assert_eq!(state.required_fields.len(), 2);
    }

    #[tokio::test]
    async fn test_wrapped_response_is_unwrapped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/modules/AUTOSWAP/required-state"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "data": required_state_body() })),
            )
            .mount(&server)
            .await;

        let state = coordinator(&server)
            .resolve_required_state(ModuleKind::Autoswap, 421614)
            .await
            .unwrap();
        assert_eq!(state.chain_id, 421614);
    }

    #[tokio::test]
    async fn test_api_error_is_typed_and_bounded() {
        let server = MockServer::start().await;
        let long_message = "unsupported module ".repeat(20);
        Mock::given(method("GET"))
            .and(path("/api/v1/modules/BOND/required-state"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({ "message": long_message })),
            )
            .mount(&server)
            .await;

        let err = coordinator(&server)
            .resolve_required_state(ModuleKind::Bond, 1)
            .await
            .unwrap_err();

        match err {
            CoordinatorError::Api { status, message } => {
                assert_eq!(status, 400);
                assert!(message.starts_with("unsupported module"));
                assert!(message.chars().count() <= crate::error::MAX_ERROR_MESSAGE_LEN);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_orchestration_uses_request_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/orchestrations"))
            .and(header("x-api-key", "caller-key"))
            .and(body_partial_json(json!({
                "currentState": {"chainId": "84532", "tokenAmount": "5000000"},
                "requiredState": {"chainId": "421614"}
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "requestId": "req-42",
                "sourceChainId": "84532",
                "destinationChainId": "421614",
                "accountAddressOnSourceChain": "0x1111111111111111111111111111111111111111",
                "accountAddressOnDestinationChain": "0x2222222222222222222222222222222222222222",
                "destinationTokenAddress": "0x75faf114eafb1bdbe2f0316df893fd58ce46aa4d",
                "sourceChainAccountModules": [],
                "destinationChainAccountModules": ["0x42CF1b746F96D6cc59e84F87d26Ea64D3fbCa3a0"]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let required_state: RequiredState =
            serde_json::from_value(required_state_body()).unwrap();
        let owner = Address::repeat_byte(0x11);
        let request = CreateOrchestrationRequest {
            current_state: CurrentState {
                chain_id: 84532,
                token_address: Address::repeat_byte(0x03),
                token_amount: "5000000".to_string(),
                owner_address: owner,
            },
            required_state,
            owner_address: owner,
            encoded_data: Bytes::from(vec![1, 2, 3]),
            owner_signature: Bytes::from(vec![9; 65]),
            api_key: "caller-key".to_string(),
        };

        let record = coordinator(&server)
            .create_orchestration(&request)
            .await
            .unwrap();
        assert_eq!(record.request_id, "req-42");
        assert_eq!(record.destination_chain_account_modules.len(), 1);
    }

    #[tokio::test]
    async fn test_notify_onchain_deposit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/orchestrations/req-7/deposit"))
            .and(body_partial_json(json!({
                "requestId": "req-7",
                "blockNumber": "77",
                "transferType": "TRANSFER"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let proof = DepositProof::Transfer {
            tx_hash: H256::repeat_byte(0x01),
            block_number: 77,
        };
        coordinator(&server)
            .notify_deposit("req-7", &proof)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_notify_failure_surfaces_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/orchestrations/req-7/deposit"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let proof = DepositProof::Transfer {
            tx_hash: H256::repeat_byte(0x01),
            block_number: 77,
        };
        let err = coordinator(&server)
            .notify_deposit("req-7", &proof)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::Api { status: 502, .. }));
    }

    #[tokio::test]
    async fn test_status_reads_are_idempotent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/orchestrations/req-9/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "PENDING",
                "request_id": "req-9",
                "created_at": "2024-05-01T12:00:00Z"
            })))
            .expect(2)
            .mount(&server)
            .await;

        let client = coordinator(&server);
        let first = client.get_status("req-9").await.unwrap();
        let second = client.get_status("req-9").await.unwrap();

        assert_eq!(first.status, StatusKind::Pending);
        assert!(first.same_state_as(&second));
    }
}

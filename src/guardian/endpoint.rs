//! Guardian endpoint seam and its REST implementation

use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Why a single endpoint lookup failed. Never surfaced past the client.
#[derive(Error, Debug)]
pub enum EndpointError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("response carried no attestation bytes")]
    MissingPayload,

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// A source of signed attestations
#[async_trait]
pub trait GuardianEndpoint: Send + Sync {
    /// Human-readable identifier for logs
    fn name(&self) -> &str;

    /// Look up the raw attestation bytes for a message
    async fn fetch_signed_vaa(
        &self,
        emitter_chain: u16,
        emitter_address: &[u8; 32],
        sequence: u64,
    ) -> Result<Vec<u8>, EndpointError>;
}

/// Guardian REST endpoint: `GET {base}/v1/signed_vaa/{chain}/{emitter}/{sequence}`
pub struct HttpGuardianEndpoint {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignedVaaResponse {
    vaa_bytes: Option<String>,
}

impl HttpGuardianEndpoint {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, EndpointError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("xchain-tracker/", env!("CARGO_PKG_VERSION")))
            .timeout(request_timeout)
            .build()
            .map_err(|e| EndpointError::Transport(e.to_string()))?;
        reqwest::Url::parse(base_url)
            .map_err(|e| EndpointError::Malformed(format!("base URL {}: {}", base_url, e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, emitter_chain: u16, emitter_address: &[u8; 32], sequence: u64) -> String {
        format!(
            "{}/v1/signed_vaa/{}/{}/{}",
            self.base_url,
            emitter_chain,
            hex::encode(emitter_address),
            sequence
        )
    }
}

#[async_trait]
impl GuardianEndpoint for HttpGuardianEndpoint {
    fn name(&self) -> &str {
        &self.base_url
    }

    async fn fetch_signed_vaa(
        &self,
        emitter_chain: u16,
        emitter_address: &[u8; 32],
        sequence: u64,
    ) -> Result<Vec<u8>, EndpointError> {
        let url = self.url(emitter_chain, emitter_address, sequence);
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EndpointError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EndpointError::Status(status.as_u16()));
        }

        let body: SignedVaaResponse = response
            .json()
            .await
            .map_err(|e| EndpointError::Malformed(e.to_string()))?;

        let encoded = body
            .vaa_bytes
            .filter(|s| !s.is_empty())
            .ok_or(EndpointError::MissingPayload)?;

        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| EndpointError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_url_layout() {
        let endpoint =
            HttpGuardianEndpoint::new("https://guardian.example/", Duration::from_secs(1)).unwrap();
        let mut emitter = [0u8; 32];
        emitter[31] = 0xab;

        assert_eq!(
            endpoint.url(2, &emitter, 77),
            format!(
                "https://guardian.example/v1/signed_vaa/2/{}ab/77",
                "00".repeat(31)
            )
        );
        assert_eq!(endpoint.name(), "https://guardian.example");
    }

    #[test]
    fn test_response_without_payload_field() {
        let parsed: SignedVaaResponse = serde_json::from_str(r#"{"code": 5}"#).unwrap();
        assert!(parsed.vaa_bytes.is_none());

        let parsed: SignedVaaResponse =
            serde_json::from_str(r#"{"vaaBytes": "AQID"}"#).unwrap();
        assert_eq!(parsed.vaa_bytes.as_deref(), Some("AQID"));
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        assert!(matches!(
            HttpGuardianEndpoint::new("guardian.example", Duration::from_secs(1)),
            Err(EndpointError::Malformed(_))
        ));
    }

    const EMITTER: [u8; 32] = [0x0e; 32];

    /// Guardian stand-in whose answer depends on the requested sequence
    fn guardian_service() -> Router {
        async fn signed_vaa(Path((chain, emitter, sequence)): Path<(u16, String, u64)>) -> Response {
            if chain != 2 || emitter != hex::encode(EMITTER) {
                return StatusCode::BAD_REQUEST.into_response();
            }
            match sequence {
                1 => Json(json!({ "vaaBytes": "AQID" })).into_response(),
                2 => (StatusCode::NOT_FOUND, Json(json!({ "code": 5 }))).into_response(),
                3 => Json(json!({ "code": 5 })).into_response(),
                4 => Json(json!({ "vaaBytes": "" })).into_response(),
                5 => Json(json!({ "vaaBytes": "not base64!" })).into_response(),
                6 => (StatusCode::OK, "<html>").into_response(),
                _ => StatusCode::SERVICE_UNAVAILABLE.into_response(),
            }
        }

        Router::new().route("/v1/signed_vaa/:chain/:emitter/:sequence", get(signed_vaa))
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_success_requires_http_success_and_payload() {
        let base = serve(guardian_service()).await;
        let endpoint = HttpGuardianEndpoint::new(&base, Duration::from_secs(5)).unwrap();

        let fetched = endpoint.fetch_signed_vaa(2, &EMITTER, 1).await.unwrap();
        assert_eq!(fetched, vec![1, 2, 3]);

        let mut outcomes = Vec::new();
        for sequence in 2..=7 {
            outcomes.push(endpoint.fetch_signed_vaa(2, &EMITTER, sequence).await);
        }
        assert!(matches!(outcomes[0], Err(EndpointError::Status(404))));
        assert!(matches!(outcomes[1], Err(EndpointError::MissingPayload)));
        assert!(matches!(outcomes[2], Err(EndpointError::MissingPayload)));
        assert!(matches!(outcomes[3], Err(EndpointError::Malformed(_))));
        assert!(matches!(outcomes[4], Err(EndpointError::Malformed(_))));
        assert!(matches!(outcomes[5], Err(EndpointError::Status(503))));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let endpoint = HttpGuardianEndpoint::new("http://127.0.0.1:1", Duration::from_secs(5)).unwrap();
        assert!(matches!(
            endpoint.fetch_signed_vaa(2, &EMITTER, 1).await,
            Err(EndpointError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_client_falls_back_past_failing_http_endpoint() {
        use crate::guardian::testing::{attestation_bytes, EMITTER as ATTESTED_EMITTER};
        use crate::guardian::{GuardianClient, RetryPolicy};
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine as _;

        let down = serve(Router::new().route(
            "/v1/signed_vaa/:chain/:emitter/:sequence",
            get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        ))
        .await;
        let encoded = STANDARD.encode(attestation_bytes(2, 42));
        let up = serve(Router::new().route(
            "/v1/signed_vaa/:chain/:emitter/:sequence",
            get(move || {
                let encoded = encoded.clone();
                async move { Json(json!({ "vaaBytes": encoded })) }
            }),
        ))
        .await;

        let endpoints: Vec<Arc<dyn GuardianEndpoint>> = vec![
            Arc::new(HttpGuardianEndpoint::new(&down, Duration::from_secs(5)).unwrap()),
            Arc::new(HttpGuardianEndpoint::new(&up, Duration::from_secs(5)).unwrap()),
        ];
        let client = GuardianClient::new(
            endpoints,
            RetryPolicy {
                rounds: 1,
                round_delay: Duration::from_millis(10),
            },
        );

        let signed = client.fetch_attestation(2, &ATTESTED_EMITTER, 42).await.unwrap();
        assert_eq!(signed.attestation.sequence, 42);
    }
}

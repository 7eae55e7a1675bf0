//! External order status source

use crate::config::AuctionConfig;
use crate::error::{TrackerError, TrackerResult};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Coarse order status as reported by the order service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatus {
    pub status: String,
    #[serde(default)]
    pub resolver: Option<String>,
    #[serde(default)]
    pub fills: Vec<OrderFill>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFill {
    #[serde(default)]
    pub tx_hash: Option<String>,
    #[serde(default)]
    pub amount: Option<String>,
}

/// Where the tracker learns about orders
#[async_trait]
pub trait OrderStatusSource: Send + Sync {
    /// Fetch the current status. Failures are `StatusQuery` errors.
    async fn get_order_status(&self, order_hash: &str) -> TrackerResult<OrderStatus>;

    /// Hand the order's secret to the service so the resolver can finish
    async fn submit_secret(&self, order_hash: &str, secret: &str) -> TrackerResult<()>;
}

/// Order service REST client
///
/// - `GET {base}/orders/{hash}/status`
/// - `POST {base}/orders/{hash}/secret` with `{"secret": "..."}`
pub struct HttpStatusSource {
    base_url: reqwest::Url,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpStatusSource {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        request_timeout: Duration,
    ) -> TrackerResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("xchain-tracker/", env!("CARGO_PKG_VERSION")))
            .timeout(request_timeout)
            .build()
            .map_err(|e| TrackerError::config(format!("HTTP client: {}", e)))?;

        let base_url = reqwest::Url::parse(base_url)
            .map_err(|e| TrackerError::config(format!("Order status URL {}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(TrackerError::config(format!(
                "Order status URL {} cannot take a path",
                base_url
            )));
        }

        Ok(Self {
            base_url,
            // An unset ${VAR} substitutes to an empty key
            api_key: api_key.filter(|k| !k.is_empty()),
            client,
        })
    }

    pub fn from_config(config: &AuctionConfig) -> TrackerResult<Self> {
        Self::new(
            &config.status_api_url,
            config.api_key.clone(),
            Duration::from_millis(config.request_timeout_ms),
        )
    }

    /// The hash is a single percent-encoded path segment
    fn url(&self, order_hash: &str, action: &str) -> TrackerResult<reqwest::Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| query_error(order_hash, "base URL cannot take a path"))?
            .pop_if_empty()
            .extend(["orders", order_hash, action]);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

fn query_error(order_hash: &str, message: impl Into<String>) -> TrackerError {
    TrackerError::StatusQuery {
        order_hash: order_hash.to_string(),
        message: message.into(),
    }
}

#[async_trait]
impl OrderStatusSource for HttpStatusSource {
    async fn get_order_status(&self, order_hash: &str) -> TrackerResult<OrderStatus> {
        let url = self.url(order_hash, "status")?;
        debug!("GET {}", url);

        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(|e| query_error(order_hash, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(query_error(order_hash, format!("HTTP status {}", status)));
        }

        response
            .json()
            .await
            .map_err(|e| query_error(order_hash, format!("malformed response: {}", e)))
    }

    async fn submit_secret(&self, order_hash: &str, secret: &str) -> TrackerResult<()> {
        let url = self.url(order_hash, "secret")?;
        debug!("POST {}", url);

        let response = self
            .authorize(self.client.post(url))
            .json(&serde_json::json!({ "secret": secret }))
            .send()
            .await
            .map_err(|e| query_error(order_hash, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(query_error(order_hash, format!("HTTP status {}", status)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::header::AUTHORIZATION;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::{get, post};
    use axum::{Json, Router};

    #[test]
    fn test_status_json_shape() {
        let status: OrderStatus = serde_json::from_str(
            r#"{
                "status": "executing",
                "resolver": "0x5e1",
                "fills": [{"txHash": "0xf111", "amount": "100"}]
            }"#,
        )
        .unwrap();

        assert_eq!(status.status, "executing");
        assert_eq!(status.resolver.as_deref(), Some("0x5e1"));
        assert_eq!(status.fills[0].tx_hash.as_deref(), Some("0xf111"));

        let bare: OrderStatus = serde_json::from_str(r#"{"status": "pending"}"#).unwrap();
        assert!(bare.fills.is_empty());
        assert!(bare.resolver.is_none());
    }

    #[test]
    fn test_urls_and_empty_key() {
        let source = HttpStatusSource::new(
            "https://orders.example/v1/",
            Some(String::new()),
            Duration::from_secs(1),
        )
        .unwrap();

        assert_eq!(
            source.url("0xabc", "status").unwrap().as_str(),
            "https://orders.example/v1/orders/0xabc/status"
        );
        assert_eq!(
            source.url("0xab/cd?e#f", "secret").unwrap().as_str(),
            "https://orders.example/v1/orders/0xab%2Fcd%3Fe%23f/secret"
        );
        assert!(source.api_key.is_none());

        assert!(HttpStatusSource::new("not a url", None, Duration::from_secs(1)).is_err());
    }

    /// Order service stand-in. Hashes starting with `0xdead` answer 500 and
    /// `0xbad` answers a non-JSON body; anything else echoes the hash back
    /// as its status. Requests without the bearer key are refused.
    fn order_service() -> Router {
        async fn status(Path(hash): Path<String>, headers: HeaderMap) -> Response {
            if headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) != Some("Bearer k3y") {
                return StatusCode::UNAUTHORIZED.into_response();
            }
            if hash.starts_with("0xdead") {
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
            if hash.starts_with("0xbad") {
                return (StatusCode::OK, "<html>").into_response();
            }
            Json(serde_json::json!({
                "status": hash,
                "fills": [{"txHash": "0xf111"}]
            }))
            .into_response()
        }

        async fn secret(Json(body): Json<serde_json::Value>) -> StatusCode {
            if body["secret"] == "s3cret" {
                StatusCode::NO_CONTENT
            } else {
                StatusCode::BAD_REQUEST
            }
        }

        Router::new()
            .route("/v1/orders/:hash/status", get(status))
            .route("/v1/orders/:hash/secret", post(secret))
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{}/v1", addr)
    }

    async fn source(api_key: Option<&str>) -> HttpStatusSource {
        let base = serve(order_service()).await;
        HttpStatusSource::new(&base, api_key.map(String::from), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_status_over_http() {
        let source = source(Some("k3y")).await;

        let status = source.get_order_status("0xabc").await.unwrap();
        assert_eq!(status.status, "0xabc");
        assert_eq!(status.fills[0].tx_hash.as_deref(), Some("0xf111"));

        // Path-hostile hashes arrive intact as one segment
        let status = source.get_order_status("0xab/cd?e#f").await.unwrap();
        assert_eq!(status.status, "0xab/cd?e#f");
    }

    #[tokio::test]
    async fn test_http_failures_become_status_query_errors() {
        let source = source(Some("k3y")).await;

        let err = source.get_order_status("0xdead").await.unwrap_err();
        assert!(matches!(
            err,
            TrackerError::StatusQuery { ref order_hash, ref message }
                if order_hash == "0xdead" && message.contains("500")
        ));

        let err = source.get_order_status("0xbad").await.unwrap_err();
        assert!(matches!(
            err,
            TrackerError::StatusQuery { ref message, .. } if message.contains("malformed")
        ));

        let unauthorized = self::source(None).await;
        let err = unauthorized.get_order_status("0xabc").await.unwrap_err();
        assert!(matches!(
            err,
            TrackerError::StatusQuery { ref message, .. } if message.contains("401")
        ));

        let closed = HttpStatusSource::new("http://127.0.0.1:1", None, Duration::from_secs(5)).unwrap();
        assert!(matches!(
            closed.get_order_status("0xabc").await,
            Err(TrackerError::StatusQuery { .. })
        ));
    }

    #[tokio::test]
    async fn test_secret_submission_over_http() {
        let source = source(Some("k3y")).await;

        source.submit_secret("0xabc", "s3cret").await.unwrap();

        let err = source.submit_secret("0xabc", "wrong").await.unwrap_err();
        assert!(matches!(
            err,
            TrackerError::StatusQuery { ref message, .. } if message.contains("400")
        ));
    }
}

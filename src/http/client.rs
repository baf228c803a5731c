//! reqwest-backed client for the four service exchanges.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{
    Client, RequestBuilder, Url,
    header::{CONTENT_TYPE, HeaderMap, HeaderValue},
};
use std::time::Duration;

use crate::api::{ApiEnvelope, GenerationRequest, TaskHandle};
use crate::config::ClientConfig;
use crate::error::{DomainFailure, TransportError, TransportErrorKind};

/// The exchanges the generation service offers.
///
/// Every call returns the decoded envelope as-is, including
/// `success: false` ones; only transport problems become errors here.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageApi: Send + Sync {
    async fn health(&self) -> Result<ApiEnvelope>;
    async fn submit_async(&self, request: &GenerationRequest) -> Result<ApiEnvelope>;
    async fn submit_sync(&self, request: &GenerationRequest) -> Result<ApiEnvelope>;
    async fn query_status(&self, task: &TaskHandle) -> Result<ApiEnvelope>;
}

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    sync_timeout: Duration,
}

impl ApiClient {
    /// Builds a client with the fixed JSON content type, user agent and
    /// request timeout from `config`. The sync exchange gets
    /// `config.sync_timeout` instead.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            sync_timeout: config.sync_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn task_url(&self, task: &TaskHandle) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint("/api/task"))
            .with_context(|| format!("Invalid base URL: {}", self.base_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("Base URL cannot carry a path: {}", self.base_url))?
            .push(task.as_str());
        Ok(url)
    }

    /// Sends one request and decodes the envelope.
    async fn exchange(&self, request: RequestBuilder, operation: &str) -> Result<ApiEnvelope> {
        let response = request
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::from_reqwest(&e))?;

        if !status.is_success() {
            // Error responses usually still carry an envelope with details.
            let detail = serde_json::from_str::<ApiEnvelope>(&body)
                .ok()
                .and_then(|envelope| envelope.error_detail().cloned())
                .map(|detail| DomainFailure::new(detail).message());
            let message = match detail {
                Some(detail) => format!("{} failed: {}", operation, detail),
                None => format!("{} failed", operation),
            };
            warn!("{} returned HTTP {}", operation, status);
            return Err(TransportError::from_status(status, message).into());
        }

        let envelope: ApiEnvelope = serde_json::from_str(&body).map_err(|e| {
            TransportError::new(
                TransportErrorKind::Decode,
                format!("{}: invalid response envelope: {}", operation, e),
            )
        })?;

        if !envelope.is_success() {
            debug!("{} answered success=false: {:?}", operation, envelope.error_detail());
        }

        Ok(envelope)
    }
}

#[async_trait]
impl ImageApi for ApiClient {
    #[tracing::instrument(skip(self))]
    async fn health(&self) -> Result<ApiEnvelope> {
        let url = self.endpoint("/health");
        debug!("GET {}", url);
        self.exchange(self.client.get(&url), "Health check").await
    }

    #[tracing::instrument(skip(self, request))]
    async fn submit_async(&self, request: &GenerationRequest) -> Result<ApiEnvelope> {
        let url = self.endpoint("/api/generate");
        debug!("POST {} (batch of {})", url, request.batch_size());
        self.exchange(self.client.post(&url).json(request), "Task submission")
            .await
    }

    #[tracing::instrument(skip(self, request))]
    async fn submit_sync(&self, request: &GenerationRequest) -> Result<ApiEnvelope> {
        let url = self.endpoint("/api/generate-sync");
        debug!(
            "POST {} (batch of {}, waiting up to {:?})",
            url,
            request.batch_size(),
            self.sync_timeout
        );
        let builder = self
            .client
            .post(&url)
            .json(request)
            .timeout(self.sync_timeout);
        self.exchange(builder, "Synchronous generation").await
    }

    #[tracing::instrument(skip(self))]
    async fn query_status(&self, task: &TaskHandle) -> Result<ApiEnvelope> {
        let url = self.task_url(task)?;
        debug!("GET {}", url);
        self.exchange(self.client.get(url), "Status query").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{GenerationResult, HealthStatus, TaskAccepted, TaskState, TaskStatus};
    use mockito::Matcher;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn client_for(url: &str) -> ApiClient {
        ApiClient::new(&ClientConfig::new(url)).unwrap()
    }

    #[tokio::test]
    async fn test_health_success() {
        let mut server = mockito::Server::new_async().await;

        let mock = server
            .mock("GET", "/health")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success": true, "data": {"status": "healthy", "service": "freeai2api"}}"#)
            .create_async()
            .await;

        let envelope = client_for(&server.url()).health().await.unwrap();

        mock.assert_async().await;
        let health: HealthStatus = envelope.payload().unwrap();
        assert_eq!(health.status, "healthy");
        assert_eq!(health.service.as_deref(), Some("freeai2api"));
    }

    #[tokio::test]
    async fn test_submit_async_sends_headers_and_body() {
        let mut server = mockito::Server::new_async().await;

        let mock = server
            .mock("POST", "/api/generate")
            .match_header("content-type", "application/json")
            .match_header("user-agent", Matcher::Regex("^imagegen-client/".to_string()))
            .match_body(Matcher::Json(json!({
                "prompt": "a cat",
                "width": 512,
                "height": 512,
                "batch_size": 1,
                "negative_prompt": "模糊，变形，畸形"
            })))
            .with_status(200)
            .with_body(r#"{"success": true, "data": {"task_id": "abc123", "status": "queued"}}"#)
            .create_async()
            .await;

        let envelope = client_for(&server.url())
            .submit_async(&GenerationRequest::new("a cat"))
            .await
            .unwrap();

        mock.assert_async().await;
        let accepted: TaskAccepted = envelope.payload().unwrap();
        assert_eq!(accepted.task_id, TaskHandle::new("abc123"));
        assert_eq!(accepted.status, TaskStatus::Queued);
    }

    #[tokio::test]
    async fn test_submit_sync_returns_result() {
        let mut server = mockito::Server::new_async().await;

        let mock = server
            .mock("POST", "/api/generate-sync")
            .match_body(Matcher::PartialJson(json!({"prompt": "a cat", "batch_size": 1})))
            .with_status(200)
            .with_body(r#"{"success": true, "data": {"images": ["https://x/2.png"], "prompt": "a cat"}}"#)
            .create_async()
            .await;

        let envelope = client_for(&server.url())
            .submit_sync(&GenerationRequest::new("a cat"))
            .await
            .unwrap();

        mock.assert_async().await;
        let result: GenerationResult = envelope.payload().unwrap();
        assert_eq!(result.images, vec!["https://x/2.png"]);
        assert_eq!(result.prompt.as_deref(), Some("a cat"));
    }

    #[tokio::test]
    async fn test_query_status_success() {
        let mut server = mockito::Server::new_async().await;

        let mock = server
            .mock("GET", "/api/task/abc123")
            .with_status(200)
            .with_body(r#"{"success": true, "data": {"task_id": "abc123", "status": "processing", "prompt": "a cat"}}"#)
            .create_async()
            .await;

        let envelope = client_for(&server.url())
            .query_status(&TaskHandle::new("abc123"))
            .await
            .unwrap();

        mock.assert_async().await;
        let state: TaskState = envelope.payload().unwrap();
        assert_eq!(state.status(), TaskStatus::Running);
    }

    #[tokio::test]
    async fn test_query_status_unknown_task_is_not_found() {
        let mut server = mockito::Server::new_async().await;

        let mock = server
            .mock("GET", "/api/task/missing")
            .with_status(404)
            .with_body(r#"{"success": false, "error": {"code": "NOT_FOUND", "message": "Task not found"}}"#)
            .create_async()
            .await;

        let err = client_for(&server.url())
            .query_status(&TaskHandle::new("missing"))
            .await
            .unwrap_err();

        mock.assert_async().await;
        let transport = err.downcast_ref::<TransportError>().unwrap();
        assert_eq!(transport.kind, TransportErrorKind::NotFound);
        assert_eq!(transport.status, Some(404));
        assert!(transport.message.contains("Task not found"));
    }

    #[tokio::test]
    async fn test_success_false_with_ok_status_is_returned() {
        let mut server = mockito::Server::new_async().await;

        let mock = server
            .mock("GET", "/api/task/abc123")
            .with_status(200)
            .with_body(r#"{"success": false, "error": {"code": "INTERNAL_ERROR", "message": "upstream down"}}"#)
            .create_async()
            .await;

        let envelope = client_for(&server.url())
            .query_status(&TaskHandle::new("abc123"))
            .await
            .unwrap();

        mock.assert_async().await;
        assert!(!envelope.is_success());
        let err = envelope.payload::<TaskState>().unwrap_err();
        assert!(err.downcast_ref::<DomainFailure>().is_some());
    }

    #[tokio::test]
    async fn test_validation_error_is_client_error() {
        let mut server = mockito::Server::new_async().await;

        let mock = server
            .mock("POST", "/api/generate")
            .with_status(400)
            .with_body(r#"{"success": false, "error": {"code": "VALIDATION_ERROR", "message": "Invalid request data"}}"#)
            .create_async()
            .await;

        let err = client_for(&server.url())
            .submit_async(&GenerationRequest::new("a cat"))
            .await
            .unwrap_err();

        mock.assert_async().await;
        let transport = err.downcast_ref::<TransportError>().unwrap();
        assert_eq!(transport.kind, TransportErrorKind::ClientError);
        assert!(transport.message.contains("Invalid request data"));
    }

    #[tokio::test]
    async fn test_server_error_without_envelope() {
        let mut server = mockito::Server::new_async().await;

        let mock = server
            .mock("GET", "/health")
            .with_status(503)
            .with_body("Service Unavailable")
            .create_async()
            .await;

        let err = client_for(&server.url()).health().await.unwrap_err();

        mock.assert_async().await;
        let transport = err.downcast_ref::<TransportError>().unwrap();
        assert_eq!(transport.kind, TransportErrorKind::ServerError);
        assert_eq!(transport.status, Some(503));
    }

    #[tokio::test]
    async fn test_malformed_body_is_decode_error() {
        let mut server = mockito::Server::new_async().await;

        let mock = server
            .mock("GET", "/health")
            .with_status(200)
            .with_body("<html>not json</html>")
            .create_async()
            .await;

        let err = client_for(&server.url()).health().await.unwrap_err();

        mock.assert_async().await;
        let transport = err.downcast_ref::<TransportError>().unwrap();
        assert_eq!(transport.kind, TransportErrorKind::Decode);
    }

    #[tokio::test]
    async fn test_unreachable_service_is_connect_error() {
        let err = client_for("http://127.0.0.1:1").health().await.unwrap_err();

        let transport = err.downcast_ref::<TransportError>().unwrap();
        assert_eq!(transport.kind, TransportErrorKind::Connect);
        assert_eq!(transport.status, None);
    }

    /// Answers the first request on a local port with `body`, after `delay`.
    async fn delayed_server(delay: Duration, body: &'static str) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request_complete(&request) {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                request.extend_from_slice(&buf[..n]);
            }

            tokio::time::sleep(delay).await;
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        });

        format!("http://{}", addr)
    }

    fn request_complete(raw: &[u8]) -> bool {
        let Some(head_end) = raw.windows(4).position(|w| w == b"\r\n\r\n") else {
            return false;
        };
        let head = String::from_utf8_lossy(&raw[..head_end]);
        let length = head
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        raw.len() >= head_end + 4 + length
    }

    #[tokio::test]
    async fn test_submit_sync_outlasts_request_timeout() {
        let url = delayed_server(
            Duration::from_millis(600),
            r#"{"success": true, "data": {"images": ["https://x/slow.png"], "prompt": "a cat"}}"#,
        )
        .await;
        let config = ClientConfig::new(url)
            .with_timeout(Duration::from_millis(100))
            .with_sync_timeout(Duration::from_secs(10));

        let envelope = ApiClient::new(&config)
            .unwrap()
            .submit_sync(&GenerationRequest::new("a cat"))
            .await
            .unwrap();

        let result: GenerationResult = envelope.payload().unwrap();
        assert_eq!(result.images, vec!["https://x/slow.png"]);
    }

    #[tokio::test]
    async fn test_request_timeout_applies_to_status_query() {
        let url = delayed_server(
            Duration::from_millis(600),
            r#"{"success": true, "data": {"status": "running"}}"#,
        )
        .await;
        let config = ClientConfig::new(url)
            .with_timeout(Duration::from_millis(100))
            .with_sync_timeout(Duration::from_secs(10));

        let err = ApiClient::new(&config)
            .unwrap()
            .query_status(&TaskHandle::new("abc123"))
            .await
            .unwrap_err();

        let transport = err.downcast_ref::<TransportError>().unwrap();
        assert_eq!(transport.kind, TransportErrorKind::Timeout);
    }

    #[test]
    fn test_task_url_encodes_handle() {
        let client = client_for("http://localhost:8000/");
        assert_eq!(client.base_url(), "http://localhost:8000");
        let url = client.task_url(&TaskHandle::new("a/b c")).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/api/task/a%2Fb%20c");
    }
}

use anyhow::{Context, Result};
use bytes::Bytes;
use chrono::DateTime;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};

use crate::logging::with_logger;

/// TCP connect limit for every request; the startup probe has its own total limit
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Raw body of a streamed endpoint
pub type ByteStream = BoxStream<'static, reqwest::Result<Bytes>>;

/// A model entry from `/api/tags`
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub modified_at: Option<String>,
}

impl ModelInfo {
    /// Calendar date of the last modification, or "unknown date"
    pub fn modified_date(&self) -> String {
        self.modified_at
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|ts| ts.date_naive().to_string())
            .unwrap_or_else(|| "unknown date".to_string())
    }
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

/// Client for the endpoints of a local Ollama server
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
    probe_timeout: Duration,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, probe_timeout: Duration) -> Self {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            probe_timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Startup probe against `/api/tags`
    pub async fn check_connection(&self) -> Result<()> {
        let started = Instant::now();
        let result = self
            .client
            .get(self.url("/api/tags"))
            .timeout(self.probe_timeout)
            .send()
            .await
            .and_then(|response| response.error_for_status());

        log_request("/api/tags", started, result.is_ok());
        result.map(|_| ()).map_err(anyhow::Error::from)
    }

    pub async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let started = Instant::now();
        let response = self
            .client
            .get(self.url("/api/tags"))
            .send()
            .await
            .and_then(|response| response.error_for_status());
        log_request("/api/tags", started, response.is_ok());

        let tags: TagsResponse = response?
            .json()
            .await
            .context("Failed to parse model list")?;
        Ok(tags.models)
    }

    /// Start a streamed generation and hand back the raw body stream
    pub async fn generate_stream(
        &self,
        model: &str,
        prompt: &str,
    ) -> Result<ByteStream> {
        let body = json!({
            "model": model,
            "prompt": prompt,
            "stream": true,
        });
        self.post_stream("/api/generate", &body).await
    }

    /// Start a streamed model download
    pub async fn pull_stream(&self, model: &str) -> Result<ByteStream> {
        let body = json!({
            "model": model,
            "stream": true,
        });
        self.post_stream("/api/pull", &body).await
    }

    /// Delete a model; returns the response body as sent by the server
    pub async fn delete_model(&self, model: &str) -> Result<String> {
        let started = Instant::now();
        let response = self
            .client
            .delete(self.url("/api/delete"))
            .json(&json!({ "model": model }))
            .send()
            .await
            .and_then(|response| response.error_for_status());
        log_request("/api/delete", started, response.is_ok());

        Ok(response?.text().await?)
    }

    async fn post_stream(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<ByteStream> {
        let started = Instant::now();
        let response = self.client.post(self.url(path)).json(body).send().await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                log_request(path, started, false);
                return Err(e.into());
            }
        };

        let status_error = response.error_for_status_ref().err();
        if let Some(status_error) = status_error {
            log_request(path, started, false);
            let detail = response
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from));
            let message = match detail {
                Some(detail) => format!("Request to {} failed: {}", path, detail),
                None => format!("Request to {} failed", path),
            };
            return Err(anyhow::Error::from(status_error).context(message));
        }

        log_request(path, started, true);
        Ok(response.bytes_stream().boxed())
    }
}

fn log_request(endpoint: &str, started: Instant, success: bool) {
    let elapsed = started.elapsed().as_millis() as u64;
    with_logger(|logger| logger.log_request(endpoint, elapsed, success));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_handling::{enhance_error, ErrorType};
    use crate::stream::render_stream;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> OllamaClient {
        OllamaClient::new(server.uri(), Duration::from_secs(5))
    }

    #[test]
    fn test_modified_date() {
        let model = ModelInfo {
            name: "gemma3:1b".to_string(),
            modified_at: Some("2025-03-14T09:26:53.123456789-07:00".to_string()),
        };
        assert_eq!(model.modified_date(), "2025-03-14");

        let zulu = ModelInfo {
            name: "x".to_string(),
            modified_at: Some("2024-12-01T23:00:00Z".to_string()),
        };
        assert_eq!(zulu.modified_date(), "2024-12-01");

        let missing = ModelInfo {
            name: "x".to_string(),
            modified_at: None,
        };
        assert_eq!(missing.modified_date(), "unknown date");
    }

    #[test]
    fn test_base_url_trailing_slash_is_dropped() {
        let client = OllamaClient::new("http://localhost:11434/", Duration::from_secs(5));
        assert_eq!(client.url("/api/tags"), "http://localhost:11434/api/tags");
    }

    #[tokio::test]
    async fn test_check_connection() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "models": [] })))
            .mount(&server)
            .await;

        assert!(client_for(&server).check_connection().await.is_ok());
    }

    #[tokio::test]
    async fn test_check_connection_rejects_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        assert!(client_for(&server).check_connection().await.is_err());
    }

    #[tokio::test]
    async fn test_check_connection_unreachable() {
        let client = OllamaClient::new("http://127.0.0.1:9", Duration::from_secs(2));
        assert!(client.check_connection().await.is_err());
    }

    #[tokio::test]
    async fn test_list_models() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "models": [
                    { "name": "gemma3:1b", "modified_at": "2025-01-02T03:04:05Z" },
                    { "name": "mistral" }
                ]
            })))
            .mount(&server)
            .await;

        let models = client_for(&server).list_models().await.unwrap();

        assert_eq!(models.len(), 2);
        assert_eq!(models[0].name, "gemma3:1b");
        assert_eq!(models[1].modified_at, None);
    }

    #[tokio::test]
    async fn test_list_models_missing_key_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        assert!(client_for(&server).list_models().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_generate_stream_sends_prompt_and_streams_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_json(json!({
                "model": "gemma3:1b",
                "prompt": "hi",
                "stream": true
            })))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "{\"done\":false,\"response\":\"Hel\"}\n{\"done\":false,\"response\":\"lo\"}\n{\"done\":true}\n",
                "application/x-ndjson",
            ))
            .expect(1)
            .mount(&server)
            .await;

        let stream = client_for(&server)
            .generate_stream("gemma3:1b", "hi")
            .await
            .unwrap();
        let mut out = Vec::new();
        let mut buffer = String::new();
        render_stream(stream, &mut out, &mut buffer)
            .await
            .unwrap();

        assert_eq!(buffer, "Hello");
        assert_eq!(String::from_utf8(out).unwrap(), "Hello\n");
    }

    #[tokio::test]
    async fn test_generate_stream_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(json!({ "error": "model 'x' not found" })),
            )
            .mount(&server)
            .await;

        let err = match client_for(&server).generate_stream("x", "hi").await {
            Ok(_) => panic!("expected an error"),
            Err(e) => e,
        };
        let text = format!("{:#}", err);
        assert!(text.contains("404"));
        assert!(text.contains("model 'x' not found"));

        let status = err.downcast_ref::<reqwest::Error>().and_then(|e| e.status());
        assert_eq!(status, Some(reqwest::StatusCode::NOT_FOUND));

        let shown = enhance_error(&err);
        assert_eq!(shown.error_type, ErrorType::NotFound);
        assert_eq!(shown.message, "The server does not know that model");
    }

    #[tokio::test]
    async fn test_pull_stream_server_error_is_transport() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/pull"))
            .respond_with(ResponseTemplate::new(500).set_body_string("oops"))
            .mount(&server)
            .await;

        let err = match client_for(&server).pull_stream("phi3").await {
            Ok(_) => panic!("expected an error"),
            Err(e) => e,
        };

        assert!(format!("{:#}", err).starts_with("Request to /api/pull failed: HTTP status server error (500"));
        assert_eq!(enhance_error(&err).error_type, ErrorType::Transport);
    }

    #[tokio::test]
    async fn test_pull_stream_request_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/pull"))
            .and(body_json(json!({ "model": "phi3", "stream": true })))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "{\"status\":\"success\"}\n",
                "application/x-ndjson",
            ))
            .expect(1)
            .mount(&server)
            .await;

        assert!(client_for(&server).pull_stream("phi3").await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_model_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/delete"))
            .and(body_json(json!({ "model": "phi3" })))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"status\":\"deleted\"}"))
            .mount(&server)
            .await;

        let body = client_for(&server).delete_model("phi3").await.unwrap();
        assert_eq!(body, "{\"status\":\"deleted\"}");
    }

    #[tokio::test]
    async fn test_delete_missing_model_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/delete"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(client_for(&server).delete_model("nope").await.is_err());
    }
}

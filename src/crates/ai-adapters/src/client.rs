use crate::error::{AdapterResult, AiAdapterError};
use crate::stream_handler::{handle_openai_stream, SnapshotSink};
use crate::types::openai::{extract_completion_text, parse_model_ids, ChatCompletionRequest};
use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, USER_AGENT};
use reqwest::Response;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const EVENT_STREAM_MIME_TYPE: &str = "text/event-stream";
const JSON_MIME_TYPE: &str = "application/json";

/// Where completion requests go and how they authenticate.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiTarget {
    endpoint: String,
    api_key: String,
}

impl ApiTarget {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> AdapterResult<Self> {
        let endpoint = endpoint.into().trim().trim_end_matches('/').to_string();
        let api_key = api_key.into().trim().to_string();
        if endpoint.is_empty() || api_key.is_empty() {
            return Err(AiAdapterError::Config(
                "API endpoint and API key must be configured".to_string(),
            ));
        }
        Ok(Self { endpoint, api_key })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path.trim_start_matches('/'))
    }
}

impl fmt::Debug for ApiTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiTarget")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// The calls the polisher makes against a completion provider.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn list_models(&self, target: &ApiTarget) -> AdapterResult<Vec<String>>;

    /// One blocking completion. Returns the first choice's content, or `source_text` when the reply
    /// parses but carries no usable content.
    async fn send_completion(
        &self,
        target: &ApiTarget,
        request: &ChatCompletionRequest,
        source_text: &str,
        cancel: &CancellationToken,
    ) -> AdapterResult<String>;

    /// Streamed completion. `on_snapshot` receives the cumulative text after every delta; the
    /// returned string is the final snapshot.
    async fn stream_completion(
        &self,
        target: &ApiTarget,
        request: &ChatCompletionRequest,
        cancel: &CancellationToken,
        on_snapshot: SnapshotSink<'_>,
    ) -> AdapterResult<String>;
}

#[derive(Debug, Clone)]
pub struct OpenAICompatClient {
    http: reqwest::Client,
}

impl OpenAICompatClient {
    pub fn new() -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("AI-Polisher/0.1"));

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .default_headers(headers)
            .build()
            .unwrap_or_else(|e| {
                warn!("Failed to create HTTP client, using default config: {}", e);
                reqwest::Client::new()
            });

        Self { http }
    }

    pub fn with_http_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl Default for OpenAICompatClient {
    fn default() -> Self {
        Self::new()
    }
}

async fn until_cancelled<F, T>(cancel: &CancellationToken, fut: F) -> AdapterResult<T>
where
    F: Future<Output = Result<T, reqwest::Error>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AiAdapterError::Cancelled),
        result = fut => result.map_err(AiAdapterError::from),
    }
}

async fn error_from_response(response: Response, cancel: &CancellationToken) -> AiAdapterError {
    let status = response.status().as_u16();
    match until_cancelled(cancel, response.text()).await {
        Ok(body) => {
            warn!("Completion request rejected: status={}, body={}", status, body);
            AiAdapterError::Api { status, body }
        }
        Err(AiAdapterError::Cancelled) => AiAdapterError::Cancelled,
        Err(e) => AiAdapterError::Api {
            status,
            body: e.to_string(),
        },
    }
}

fn is_json_response(response: &Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|ct| ct.starts_with(JSON_MIME_TYPE))
        .unwrap_or(false)
}

#[async_trait]
impl CompletionBackend for OpenAICompatClient {
    async fn list_models(&self, target: &ApiTarget) -> AdapterResult<Vec<String>> {
        let response = self
            .http
            .get(target.url("models"))
            .bearer_auth(&target.api_key)
            .header(CONTENT_TYPE, JSON_MIME_TYPE)
            .send()
            .await?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AiAdapterError::Api { status, body });
        }

        let body: Value = response.json().await.map_err(|e| AiAdapterError::Api {
            status,
            body: format!("invalid model list: {}", e),
        })?;
        let models = parse_model_ids(&body);
        if models.is_empty() {
            return Err(AiAdapterError::Api {
                status,
                body: "no models returned".to_string(),
            });
        }

        info!(
            "Fetched model list: endpoint={}, count={}",
            target.endpoint(),
            models.len()
        );
        Ok(models)
    }

    async fn send_completion(
        &self,
        target: &ApiTarget,
        request: &ChatCompletionRequest,
        source_text: &str,
        cancel: &CancellationToken,
    ) -> AdapterResult<String> {
        let body = request.with_stream(false);
        debug!(
            "Sending chat completion: endpoint={}, model={}, messages={}, stream=false",
            target.endpoint(),
            body.model,
            body.messages.len()
        );

        let response = until_cancelled(
            cancel,
            self.http
                .post(target.url("chat/completions"))
                .bearer_auth(&target.api_key)
                .json(&body)
                .send(),
        )
        .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response, cancel).await);
        }

        let status = response.status().as_u16();
        let text = until_cancelled(cancel, response.text()).await?;
        let json: Value = serde_json::from_str(&text).map_err(|e| {
            warn!("Completion body is not JSON: status={}, error={}", status, e);
            AiAdapterError::Api {
                status,
                body: text.clone(),
            }
        })?;

        match extract_completion_text(&json) {
            Some(content) => Ok(content),
            None => {
                warn!("Completion response carried no content, keeping source text");
                Ok(source_text.to_string())
            }
        }
    }

    async fn stream_completion(
        &self,
        target: &ApiTarget,
        request: &ChatCompletionRequest,
        cancel: &CancellationToken,
        on_snapshot: SnapshotSink<'_>,
    ) -> AdapterResult<String> {
        let body = request.with_stream(true);
        debug!(
            "Sending chat completion: endpoint={}, model={}, messages={}, stream=true",
            target.endpoint(),
            body.model,
            body.messages.len()
        );

        let response = until_cancelled(
            cancel,
            self.http
                .post(target.url("chat/completions"))
                .bearer_auth(&target.api_key)
                .header(ACCEPT, EVENT_STREAM_MIME_TYPE)
                .json(&body)
                .send(),
        )
        .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response, cancel).await);
        }

        let status = response.status().as_u16();

        // Some providers ignore `stream: true` and answer with a plain completion object.
        if is_json_response(&response) {
            debug!("Streaming request answered with JSON body, treating as single snapshot");
            let text = until_cancelled(cancel, response.text()).await?;
            let content = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|json| extract_completion_text(&json))
                .ok_or_else(|| AiAdapterError::Api {
                    status,
                    body: text.clone(),
                })?;
            on_snapshot(&content);
            return Ok(content);
        }

        handle_openai_stream(response.bytes_stream(), status, cancel, on_snapshot).await
    }
}

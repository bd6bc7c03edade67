//! Paths to the language model
//!
//! `ProxyTransport` talks to the trusted proxy, which keeps the provider key
//! server-side. `DirectTransport` calls the provider with a locally held key
//! and is the fallback when the proxy fails. `TransportChain` tries each in
//! order.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::prompts::{self, ChatMessage};
use super::{AiRequest, ProxyResponse};
use crate::config::AiConfig;
use crate::error::AiError;

#[async_trait]
pub trait AiTransport: Send + Sync {
    /// Send a request and return the model's raw text reply
    async fn complete(&self, request: &AiRequest) -> Result<String, AiError>;

    fn name(&self) -> &str;
}

/// HTTP client with the configured request timeout
pub fn http_client(timeout: Duration) -> Result<Client, AiError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AiError::Transport(format!("failed to build HTTP client: {}", e)))
}

pub struct ProxyTransport {
    client: Client,
    url: String,
    token: Option<String>,
}

impl ProxyTransport {
    pub fn new(client: Client, url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client,
            url: url.into(),
            token,
        }
    }
}

#[async_trait]
impl AiTransport for ProxyTransport {
    async fn complete(&self, request: &AiRequest) -> Result<String, AiError> {
        let mut builder = self.client.post(&self.url).json(request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AiError::Transport(format!("proxy unreachable: {}", e)))?;

        let status = response.status();
        let body = response.json::<ProxyResponse>().await.ok();

        match body {
            Some(ProxyResponse {
                content: Some(content),
                ..
            }) if status.is_success() && !content.trim().is_empty() => Ok(content),
            Some(ProxyResponse {
                error: Some(error), ..
            }) => Err(AiError::Transport(format!("proxy error ({}): {}", status, error))),
            _ if !status.is_success() => {
                Err(AiError::Transport(format!("proxy returned {}", status)))
            }
            _ => Err(AiError::EmptyResponse),
        }
    }

    fn name(&self) -> &str {
        "proxy"
    }
}

/// OpenAI-compatible chat completion call
pub struct DirectTransport {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl DirectTransport {
    pub fn new(client: Client, endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            model: crate::config::DEFAULT_MODEL.to_string(),
            max_tokens: 1000,
            temperature: 0.5,
        }
    }

    pub fn from_config(client: Client, config: &AiConfig) -> Self {
        Self {
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            ..Self::new(client, config.api_url.clone(), config.api_key())
        }
    }

    pub fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait]
impl AiTransport for DirectTransport {
    async fn complete(&self, request: &AiRequest) -> Result<String, AiError> {
        let api_key = self.api_key.as_deref().ok_or(AiError::MissingCredential)?;
        let messages =
            prompts::build_messages(request.action, &request.payload, Utc::now().date_naive())?;

        let body = ChatRequest {
            model: &self.model,
            messages: &messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AiError::Transport(format!("provider unreachable: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error: serde_json::Value = response.json().await.unwrap_or_default();
            let message = error
                .pointer("/error/message")
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("AI provider API error: {}", status.as_u16()));
            return Err(AiError::Provider(message));
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| AiError::Malformed(format!("invalid completion body: {}", e)))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .unwrap_or_default();

        if content.is_empty() {
            return Err(AiError::EmptyResponse);
        }

        tracing::debug!(action = %request.action, model = %self.model, "Provider call complete");
        Ok(content)
    }

    fn name(&self) -> &str {
        "direct"
    }
}

/// Ordered list of transports; the first success wins and the last error
/// is returned when all fail.
#[derive(Default)]
pub struct TransportChain {
    transports: Vec<Box<dyn AiTransport>>,
}

impl TransportChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, transport: impl AiTransport + 'static) -> Self {
        self.transports.push(Box::new(transport));
        self
    }

    pub fn len(&self) -> usize {
        self.transports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transports.is_empty()
    }

    /// Proxy (when configured) followed by the direct provider call
    pub fn from_config(config: &AiConfig) -> Result<Self, AiError> {
        let client = http_client(config.timeout())?;
        let mut chain = Self::new();

        if let Some(url) = &config.proxy_url {
            chain = chain.with(ProxyTransport::new(
                client.clone(),
                url.clone(),
                config.proxy_token.clone(),
            ));
        }

        let direct = DirectTransport::from_config(client, config);
        if direct.has_credential() {
            tracing::warn!("Direct AI fallback holds a client-side API key");
        }
        Ok(chain.with(direct))
    }
}

#[async_trait]
impl AiTransport for TransportChain {
    async fn complete(&self, request: &AiRequest) -> Result<String, AiError> {
        let mut last_error = None;

        for transport in &self.transports {
            match transport.complete(request).await {
                Ok(content) => return Ok(content),
                Err(err) => {
                    tracing::warn!(
                        transport = transport.name(),
                        action = %request.action,
                        error = %err,
                        "AI transport failed"
                    );
                    last_error = Some(err);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| AiError::Transport("no AI transport configured".to_string())))
    }

    fn name(&self) -> &str {
        "chain"
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ai::AiAction;
    use serde_json::json;
    use std::sync::Mutex;

    /// Replays canned replies and records what it was asked
    pub(crate) struct FakeTransport {
        name: &'static str,
        replies: Mutex<Vec<Result<String, AiError>>>,
        pub calls: Mutex<Vec<AiRequest>>,
    }

    impl FakeTransport {
        pub fn new(name: &'static str, replies: Vec<Result<String, AiError>>) -> Self {
            Self {
                name,
                replies: Mutex::new(replies),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn replying(content: &str) -> Self {
            Self::new("fake", vec![Ok(content.to_string())])
        }

        pub fn failing(err: AiError) -> Self {
            Self::new("fake", vec![Err(err)])
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl AiTransport for FakeTransport {
        async fn complete(&self, request: &AiRequest) -> Result<String, AiError> {
            self.calls.lock().unwrap().push(request.clone());
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                return Err(AiError::Transport("no canned reply".to_string()));
            }
            replies.remove(0)
        }

        fn name(&self) -> &str {
            self.name
        }
    }

    fn request() -> AiRequest {
        AiRequest::new(AiAction::Enhance, json!({"title": "taxes"}))
    }

    #[tokio::test]
    async fn chain_falls_back_after_proxy_failure() {
        let chain = TransportChain::new()
            .with(FakeTransport::failing(AiError::Transport("down".into())))
            .with(FakeTransport::replying("{\"title\":\"File taxes\"}"));

        let content = chain.complete(&request()).await.unwrap();
        assert_eq!(content, "{\"title\":\"File taxes\"}");
    }

    #[tokio::test]
    async fn chain_reports_last_error() {
        let chain = TransportChain::new()
            .with(FakeTransport::failing(AiError::Transport("down".into())))
            .with(FakeTransport::failing(AiError::MissingCredential));

        assert!(matches!(
            chain.complete(&request()).await,
            Err(AiError::MissingCredential)
        ));
        assert!(matches!(
            TransportChain::new().complete(&request()).await,
            Err(AiError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn direct_without_key_fails_before_any_network() {
        let client = http_client(Duration::from_secs(1)).unwrap();
        // Unroutable endpoint: reaching it would be a bug
        let direct = DirectTransport::new(client, "http://127.0.0.1:9/v1", Some("  ".into()));
        assert!(!direct.has_credential());
        assert!(matches!(
            direct.complete(&request()).await,
            Err(AiError::MissingCredential)
        ));
    }

    #[tokio::test]
    async fn unreachable_proxy_is_a_transport_error() {
        let client = http_client(Duration::from_secs(2)).unwrap();
        let proxy = ProxyTransport::new(client, "http://127.0.0.1:9/api/v1/ai/proxy", None);
        assert!(matches!(
            proxy.complete(&request()).await,
            Err(AiError::Transport(_))
        ));
    }

    #[test]
    fn chain_from_config_orders_proxy_first() {
        let config = AiConfig {
            proxy_url: Some("http://localhost:3030/api/v1/ai/proxy".into()),
            ..AiConfig::default()
        };
        let chain = TransportChain::from_config(&config).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.transports[0].name(), "proxy");
        assert_eq!(chain.transports[1].name(), "direct");

        let chain = TransportChain::from_config(&AiConfig::default()).unwrap();
        assert_eq!(chain.len(), 1);
    }
}

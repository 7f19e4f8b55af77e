use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use wakeline_types::{Channel, HttpMethod};

use crate::TransportError;

#[derive(Debug, Clone, PartialEq)]
pub enum WireBody {
    Empty,
    Json(Value),
    Form(Vec<(String, String)>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct WireRequest {
    pub channel: Channel,
    pub method: HttpMethod,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub body: WireBody,
    pub timeout: Duration,
}

impl WireRequest {
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            channel: Channel::Primary,
            method: HttpMethod::Get,
            url: url.into(),
            query: Vec::new(),
            body: WireBody::Empty,
            timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WireResponse {
    pub status: u16,
    pub body: String,
}

impl WireResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(self.body.trim()).ok()
    }

    /// Human-readable message from an error body: a JSON `error`/`message`/`title`/`detail`
    /// field, or the trimmed plain text.
    pub fn message(&self) -> Option<String> {
        if let Some(value) = self.json() {
            for key in ["error", "message", "title", "detail", "Error", "Message"] {
                if let Some(text) = value.get(key).and_then(Value::as_str) {
                    let text = text.trim();
                    if !text.is_empty() {
                        return Some(text.to_string());
                    }
                }
            }
            if let Some(text) = value.as_str() {
                return Some(text.trim().to_string()).filter(|t| !t.is_empty());
            }
            return None;
        }
        let text = self.body.trim();
        if text.is_empty() {
            None
        } else {
            Some(truncate(text, 500))
        }
    }
}

/// One request out, one response back. Implementations never retry.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: WireRequest) -> Result<WireResponse, TransportError>;
}

/// reqwest-backed transport with two independently configured clients.
pub struct HttpTransport {
    primary: Client,
    alternate: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        Ok(Self {
            primary: build_primary_client()?,
            alternate: build_alternate_client()?,
        })
    }

    fn client(&self, channel: Channel) -> &Client {
        match channel {
            Channel::Primary => &self.primary,
            Channel::Alternate => &self.alternate,
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: WireRequest) -> Result<WireResponse, TransportError> {
        let timeout_ms = request.timeout.as_millis() as u64;
        let client = self.client(request.channel);
        let mut builder = match request.method {
            HttpMethod::Get => client.get(&request.url),
            HttpMethod::Post => client.post(&request.url),
        }
        .timeout(request.timeout);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        builder = match &request.body {
            WireBody::Empty => builder,
            WireBody::Json(value) => builder.json(value),
            WireBody::Form(pairs) => builder.form(pairs),
        };

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(e, timeout_ms))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::from_reqwest(e, timeout_ms))?;
        Ok(WireResponse { status, body })
    }
}

fn build_primary_client() -> Result<Client, TransportError> {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| TransportError::InvalidRequest(format!("failed to create HTTP client: {e}")))
}

// HTTP/1.1 only, no pooled connections: a fresh socket for the last-resort attempt.
fn build_alternate_client() -> Result<Client, TransportError> {
    Client::builder()
        .http1_only()
        .pool_max_idle_per_host(0)
        .tcp_keepalive(Duration::from_secs(60))
        .build()
        .map_err(|e| {
            TransportError::InvalidRequest(format!("failed to create alternate client: {e}"))
        })
}

fn truncate(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    let mut out = input.chars().take(max_chars).collect::<String>();
    out.push_str("...");
    out
}

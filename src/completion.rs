//! Completion client with a two-round function-calling protocol.
//!
//! ```text
//! round 1: transcript + catalog ──▶ model
//!            │ text ─────────────────────────▶ answer
//!            │ function_call(name, args)
//!            ▼
//!      FunctionExecutor ── failure ──▶ None
//!            │ result
//!            ▼
//! round 2: transcript + call + result + full catalog ──▶ model ──▶ answer
//! ```
//!
//! The request uses the OpenAI `functions` / `function_call` envelope with
//! `role: "function"` result messages. When the request carries document
//! context, round 1 offers only time-variant functions and a call outside
//! that subset is rejected without executing it.
//!
//! Every failure (transport, non-2xx, malformed payload, timeout, failed
//! function) is logged and collapses to `None`. A function that succeeds
//! with nothing to report (an empty product list, zero revenue) is still a
//! result: its "none found" summary goes to round 2 so the model can say so.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::CompletionConfig;
use crate::error::{Result, SupportError};
use crate::functions::{FunctionDescriptor, FunctionExecutor, FunctionOutcome};
use crate::prompt::{assemble, ChatRequest};

// ============ Transcript ============

/// A function invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded argument object, exactly as the model produced it.
    #[serde(default)]
    pub arguments: String,
}

/// One message in the chat-completion envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    /// `null` on an assistant function-call turn.
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub function_call: Option<FunctionCall>,
}

impl ChatMessage {
    fn plain(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.into()),
            name: None,
            function_call: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain("assistant", content)
    }

    pub fn assistant_function_call(call: FunctionCall) -> Self {
        Self {
            role: "assistant".to_string(),
            content: None,
            name: None,
            function_call: Some(call),
        }
    }

    pub fn function_result(name: &str, content: impl Into<String>) -> Self {
        Self {
            role: "function".to_string(),
            content: Some(content.into()),
            name: Some(name.to_string()),
            function_call: None,
        }
    }
}

/// Append-only conversation value passed between rounds.
///
/// [`with`](Transcript::with) returns a new transcript; the original is
/// left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
}

impl Transcript {
    pub fn from_messages(messages: Vec<ChatMessage>) -> Self {
        Self { messages }
    }

    pub fn with(&self, message: ChatMessage) -> Self {
        let mut next = self.messages.clone();
        next.push(message);
        Self::from_messages(next)
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

// ============ Transport ============

/// One chat-completion request body.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub functions: Vec<FunctionDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// What the model answered with.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionReply {
    Text(String),
    FunctionCall(FunctionCall),
}

/// Sends one completion request. Implemented over HTTP by
/// [`OpenAiTransport`]; tests substitute scripted transports.
#[async_trait]
pub trait CompletionTransport: Send + Sync {
    async fn send(&self, request: &CompletionRequest) -> Result<CompletionReply>;
}

/// OpenAI-compatible `/chat/completions` transport.
pub struct OpenAiTransport {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl OpenAiTransport {
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SupportError::Other(e.into()))?;
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            warn!(env = %config.api_key_env, "completion API key not set; sending unauthenticated requests");
        }
        Ok(Self {
            client,
            url: format!("{}/chat/completions", config.url.trim_end_matches('/')),
            api_key,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: Option<ApiMessage>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    content: Option<String>,
    function_call: Option<FunctionCall>,
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ApiToolCall {
    function: FunctionCall,
}

/// Extract the reply from a raw `/chat/completions` body.
///
/// Accepts the legacy `function_call` field and, for gateways that only
/// speak the newer shape, the first entry of `tool_calls`.
pub fn parse_completion_body(body: &str) -> Result<CompletionReply> {
    let response: ApiResponse = serde_json::from_str(body).map_err(|e| {
        SupportError::CompletionTransportFailure(format!("malformed completion payload: {}", e))
    })?;
    let message = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .ok_or_else(|| SupportError::CompletionTransportFailure("completion had no choices".into()))?;

    let call = message
        .function_call
        .or_else(|| message.tool_calls.and_then(|tc| tc.into_iter().next().map(|t| t.function)));
    if let Some(call) = call {
        if call.name.trim().is_empty() {
            return Err(SupportError::CompletionTransportFailure(
                "function call without a name".into(),
            ));
        }
        return Ok(CompletionReply::FunctionCall(call));
    }

    match message.content {
        Some(text) if !text.trim().is_empty() => Ok(CompletionReply::Text(text)),
        _ => Err(SupportError::CompletionTransportFailure(
            "completion returned no content".into(),
        )),
    }
}

#[async_trait]
impl CompletionTransport for OpenAiTransport {
    async fn send(&self, request: &CompletionRequest) -> Result<CompletionReply> {
        let mut builder = self.client.post(&self.url).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| SupportError::CompletionTransportFailure(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SupportError::CompletionTransportFailure(e.to_string()))?;
        if !status.is_success() {
            return Err(SupportError::CompletionTransportFailure(format!(
                "{} returned {}: {}",
                self.url, status, body
            )));
        }
        parse_completion_body(&body)
    }
}

// ============ Client ============

pub struct CompletionClient {
    transport: Arc<dyn CompletionTransport>,
    executor: Arc<FunctionExecutor>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    round_timeout: Duration,
}

impl CompletionClient {
    pub fn new(
        transport: Arc<dyn CompletionTransport>,
        executor: Arc<FunctionExecutor>,
        config: &CompletionConfig,
    ) -> Self {
        Self {
            transport,
            executor,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            round_timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Answer `request`, running at most one function call in between.
    /// `None` on any failure.
    pub async fn complete(&self, request: &ChatRequest) -> Option<String> {
        let transcript = assemble(request);
        let restricted = request.has_document_context();
        let offered = self.executor.catalog().descriptors(restricted);
        let allowed: Vec<String> = offered.iter().map(|d| d.name.clone()).collect();

        debug!(
            chat_id = %request.chat_id,
            restricted,
            functions = allowed.len(),
            "completion round 1"
        );
        let call = match self.round(&transcript, offered).await? {
            CompletionReply::Text(text) => return Some(text),
            CompletionReply::FunctionCall(call) => call,
        };

        info!(chat_id = %request.chat_id, function = %call.name, "model requested function");
        let outcome = self
            .executor
            .execute(&call.name, &call.arguments, Some(&allowed))
            .await;
        let payload = match &outcome {
            FunctionOutcome::Success { .. } => outcome.to_json().to_string(),
            FunctionOutcome::Failure { error } => {
                warn!(function = %call.name, error = %error, "skipping second round");
                return None;
            }
        };

        let name = call.name.clone();
        let transcript = transcript
            .with(ChatMessage::assistant_function_call(call))
            .with(ChatMessage::function_result(&name, payload));

        debug!(chat_id = %request.chat_id, "completion round 2");
        match self.round(&transcript, self.executor.catalog().descriptors(false)).await? {
            CompletionReply::Text(text) => Some(text),
            CompletionReply::FunctionCall(again) => {
                warn!(function = %again.name, "model requested a second function call; giving up");
                None
            }
        }
    }

    async fn round(
        &self,
        transcript: &Transcript,
        functions: Vec<FunctionDescriptor>,
    ) -> Option<CompletionReply> {
        let request = CompletionRequest {
            model: self.model.clone(),
            messages: transcript.messages().to_vec(),
            function_call: (!functions.is_empty()).then(|| "auto".to_string()),
            functions,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        match tokio::time::timeout(self.round_timeout, self.transport.send(&request)).await {
            Ok(Ok(reply)) => Some(reply),
            Ok(Err(e)) => {
                warn!(error = %e, "completion request failed");
                None
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.round_timeout.as_secs(),
                    "completion request timed out"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_with_leaves_original_untouched() {
        let a = Transcript::from_messages(vec![ChatMessage::user("hi")]);
        let b = a.with(ChatMessage::assistant("hello"));
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 2);
    }

    #[test]
    fn parses_plain_text_reply() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"We deliver daily."}}]}"#;
        assert_eq!(
            parse_completion_body(body).unwrap(),
            CompletionReply::Text("We deliver daily.".into())
        );
    }

    #[test]
    fn parses_legacy_function_call() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":null,
            "function_call":{"name":"getProductsExpiringSoon","arguments":"{\"days\":7}"}}}]}"#;
        let CompletionReply::FunctionCall(call) = parse_completion_body(body).unwrap() else {
            panic!("expected function call");
        };
        assert_eq!(call.name, "getProductsExpiringSoon");
        assert_eq!(call.arguments, r#"{"days":7}"#);
    }

    #[test]
    fn parses_tool_calls_shape() {
        let body = r#"{"choices":[{"message":{"content":null,"tool_calls":[
            {"id":"call_1","type":"function","function":{"name":"getActivePromotions","arguments":"{}"}}]}}]}"#;
        assert!(matches!(
            parse_completion_body(body).unwrap(),
            CompletionReply::FunctionCall(c) if c.name == "getActivePromotions"
        ));
    }

    #[test]
    fn malformed_and_empty_payloads_fail() {
        assert!(parse_completion_body("not json").is_err());
        assert!(parse_completion_body(r#"{"choices":[]}"#).is_err());
        assert!(parse_completion_body(r#"{"choices":[{"message":{"content":"  "}}]}"#).is_err());
    }

    #[test]
    fn request_serializes_function_envelope() {
        let request = CompletionRequest {
            model: "m".into(),
            messages: vec![
                ChatMessage::assistant_function_call(FunctionCall {
                    name: "f".into(),
                    arguments: "{}".into(),
                }),
                ChatMessage::function_result("f", "{\"ok\":true}"),
            ],
            functions: Vec::new(),
            function_call: None,
            temperature: 0.0,
            max_tokens: 10,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("functions").is_none());
        assert_eq!(json["messages"][0]["content"], serde_json::Value::Null);
        assert_eq!(json["messages"][0]["function_call"]["name"], "f");
        assert_eq!(json["messages"][1]["role"], "function");
        assert_eq!(json["messages"][1]["name"], "f");
    }
}

use async_trait::async_trait;
use futures_util::Stream;
use std::error::Error;
use std::fmt;
use std::pin::Pin;

use crate::finllm::tool_executor::ToolDefinition;

/// A ClientWrapper is a wrapper around one LLM provider's wire protocol.
/// It carries no credential and no model of its own: both are handed in per
/// call so that the gateway can rotate API keys and fall back across models
/// without rebuilding the client.

/// Represents the possible roles for a conversation entry.
#[derive(Clone, Debug)]
pub enum Role {
    System,
    // set by the developer to steer the model's responses
    User,
    // a message sent by a human user (or app user)
    Assistant, // content generated by the model, including tool-call requests
}

/// Represents a plain text message as stored in a chat session.
#[derive(Clone, Debug)]
pub struct Message {
    /// The role associated with the message.
    pub role: Role,
    /// The actual content of the message.
    pub content: String,
}

/// Represents a chunk of a streaming response.
#[derive(Clone, Debug)]
pub struct MessageChunk {
    /// The incremental content in this chunk. May be empty when the provider
    /// sends keep-alive or metadata-only frames.
    pub content: String,
    /// Whether this is the final chunk in the stream.
    pub is_final: bool,
}

/// A structured tool invocation requested by the model.
#[derive(Clone, Debug)]
pub struct ToolCall {
    pub name: String,
    /// Arguments as the model produced them; validated by the tool handler.
    pub arguments: serde_json::Value,
}

/// The serialized outcome of a tool invocation, echoed back to the model.
#[derive(Clone, Debug)]
pub struct ToolResponse {
    pub name: String,
    pub response: serde_json::Value,
}

/// One part of a conversation entry or model response.
#[derive(Clone, Debug)]
pub enum ContentPart {
    Text(String),
    ToolCall(ToolCall),
    ToolResponse(ToolResponse),
}

/// A single entry in the conversation sent upstream. Unlike [`Message`], an
/// entry can carry structured parts (tool calls and their results) in
/// addition to plain text.
#[derive(Clone, Debug)]
pub struct ConversationEntry {
    pub role: Role,
    pub parts: Vec<ContentPart>,
}

impl ConversationEntry {
    /// A user entry holding a single text part.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![ContentPart::Text(text.into())],
        }
    }

    /// A model entry replaying the tool call the model asked for.
    pub fn tool_call(call: ToolCall) -> Self {
        Self {
            role: Role::Assistant,
            parts: vec![ContentPart::ToolCall(call)],
        }
    }

    /// A user entry carrying a tool's serialized result back to the model.
    pub fn tool_response(name: impl Into<String>, response: serde_json::Value) -> Self {
        Self {
            role: Role::User,
            parts: vec![ContentPart::ToolResponse(ToolResponse {
                name: name.into(),
                response,
            })],
        }
    }
}

/// Everything one upstream call needs besides the credential and model.
#[derive(Clone, Debug)]
pub struct GenerationRequest {
    /// Optional system instruction steering the whole exchange.
    pub system_instruction: Option<String>,
    /// The conversation so far, newest entry last.
    pub entries: Vec<ConversationEntry>,
    /// Tool definitions advertised to the model. Empty means no tools.
    pub tools: Vec<ToolDefinition>,
}

/// A non-streaming model response, decomposed into parts.
#[derive(Clone, Debug, Default)]
pub struct GenerationResponse {
    pub parts: Vec<ContentPart>,
}

impl GenerationResponse {
    /// Concatenation of all text parts.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            if let ContentPart::Text(text) = part {
                out.push_str(text);
            }
        }
        out
    }

    /// The tool calls the model asked for, in response order.
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::ToolCall(call) => Some(call.clone()),
                _ => None,
            })
            .collect()
    }
}

/// Errors surfaced by a [`ClientWrapper`] implementation.
///
/// The gateway only cares about one distinction: rate-limit-class failures
/// (retryable with a different key or model) versus everything else (fatal
/// for the current call). [`ClientError::is_rate_limit_class`] encodes it.
#[derive(Clone, Debug)]
pub enum ClientError {
    /// The provider rejected the call for quota reasons (HTTP 429, 503,
    /// RESOURCE_EXHAUSTED).
    RateLimited(String),
    /// The per-call network timeout expired before a response arrived.
    Timeout(String),
    /// Any other non-success HTTP status.
    Http { status: u16, message: String },
    /// Connection-level failure before or during the exchange.
    Transport(String),
    /// The response body could not be decoded.
    Decode(String),
}

impl ClientError {
    /// Whether the retry/fallback policy applies to this failure.
    pub fn is_rate_limit_class(&self) -> bool {
        matches!(self, ClientError::RateLimited(_) | ClientError::Timeout(_))
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::RateLimited(msg) => write!(f, "rate limited: {}", msg),
            ClientError::Timeout(msg) => write!(f, "request timed out: {}", msg),
            ClientError::Http { status, message } => {
                write!(f, "HTTP {}: {}", status, message)
            }
            ClientError::Transport(msg) => write!(f, "transport error: {}", msg),
            ClientError::Decode(msg) => write!(f, "decode error: {}", msg),
        }
    }
}

impl Error for ClientError {}

/// Type alias for the chunk stream returned by streaming calls.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<MessageChunk, ClientError>> + Send>>;

/// Trait defining the interface to one LLM provider.
#[async_trait]
pub trait ClientWrapper: Send + Sync {
    /// Issue a non-streaming generation call.
    /// - `credential`: the API key selected for this attempt.
    /// - `model`: the model name selected for this attempt.
    async fn generate(
        &self,
        credential: &str,
        model: &str,
        request: GenerationRequest,
    ) -> Result<GenerationResponse, ClientError>;

    /// Issue a streaming generation call and return a stream of chunks,
    /// allowing tokens to be processed as they arrive.
    /// This method has a default implementation that returns an error, so
    /// wrappers for providers without a streaming surface still compile.
    async fn generate_stream(
        &self,
        _credential: &str,
        _model: &str,
        _request: GenerationRequest,
    ) -> Result<ChunkStream, ClientError> {
        Err(ClientError::Transport(
            "streaming not supported by this client".into(),
        ))
    }
}

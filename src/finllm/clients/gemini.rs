//! Native client for the Gemini `generateContent` REST API.
//!
//! Speaks both the unary `generateContent` verb (used for the tool
//! resolution pass) and `streamGenerateContent?alt=sse` (used for the
//! user-facing token stream). The client holds no credential and no model;
//! both arrive per call so the gateway can rotate keys and fall back across
//! models on a single client instance.

use async_stream::stream;
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::finllm::client_wrapper::{
    ChunkStream, ClientError, ClientWrapper, ContentPart, GenerationRequest, GenerationResponse,
    MessageChunk, Role, ToolCall, ToolResponse,
};
use crate::finllm::http_client_pool::get_or_create_client;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Commonly used Gemini model names.
pub enum Model {
    Gemini25Pro,
    Gemini25Flash,
    Gemini25FlashLite,
    Gemini20Flash,
    Gemini20FlashLite,
    Gemini15Pro,
    Gemini15Flash,
    Gemini15Flash8b,
}

pub fn model_to_string(model: Model) -> String {
    match model {
        Model::Gemini25Pro => "gemini-2.5-pro".to_string(),
        Model::Gemini25Flash => "gemini-2.5-flash".to_string(),
        Model::Gemini25FlashLite => "gemini-2.5-flash-lite".to_string(),
        Model::Gemini20Flash => "gemini-2.0-flash".to_string(),
        Model::Gemini20FlashLite => "gemini-2.0-flash-lite".to_string(),
        Model::Gemini15Pro => "gemini-1.5-pro".to_string(),
        Model::Gemini15Flash => "gemini-1.5-flash".to_string(),
        Model::Gemini15Flash8b => "gemini-1.5-flash-8b".to_string(),
    }
}

pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
}

impl GeminiClient {
    pub fn new() -> Self {
        Self::new_with_base_url(DEFAULT_BASE_URL)
    }

    /// Point the client at a different host, e.g. a regional endpoint or a
    /// local mock server in tests.
    pub fn new_with_base_url(base_url: &str) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        GeminiClient {
            http: get_or_create_client(&base_url),
            base_url,
            request_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn endpoint(&self, model: &str, verb: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, model, verb)
    }
}

impl Default for GeminiClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClientWrapper for GeminiClient {
    async fn generate(
        &self,
        credential: &str,
        model: &str,
        request: GenerationRequest,
    ) -> Result<GenerationResponse, ClientError> {
        let url = self.endpoint(model, "generateContent");
        let body = WireRequest::from_generation_request(request);
        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", credential)
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let wire: WireResponse = response
            .json()
            .await
            .map_err(|err| ClientError::Decode(err.to_string()))?;
        Ok(wire.into_generation_response())
    }

    async fn generate_stream(
        &self,
        credential: &str,
        model: &str,
        request: GenerationRequest,
    ) -> Result<ChunkStream, ClientError> {
        let url = format!(
            "{}?alt=sse",
            self.endpoint(model, "streamGenerateContent")
        );
        let body = WireRequest::from_generation_request(request);
        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", credential)
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let mut bytes = response.bytes_stream();
        let chunks = stream! {
            let mut sse_buffer = SseLineBuffer::new();
            'frames: while let Some(item) = bytes.next().await {
                let chunk = match item {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        yield Err(classify_transport(err));
                        break 'frames;
                    }
                };
                sse_buffer.extend(&chunk);

                while let Some(line) = sse_buffer.next_line() {
                    let line = match line {
                        Ok(line) => line,
                        Err(err) => {
                            yield Err(err);
                            break 'frames;
                        }
                    };
                    let line = line.trim();
                    if !line.starts_with("data:") {
                        continue;
                    }
                    let payload = line.trim_start_matches("data:").trim();
                    let parsed: WireResponse = match serde_json::from_str(payload) {
                        Ok(parsed) => parsed,
                        Err(err) => {
                            yield Err(ClientError::Decode(err.to_string()));
                            break 'frames;
                        }
                    };
                    yield Ok(parsed.into_message_chunk());
                }
            }
        };
        Ok(Box::pin(chunks))
    }
}

/// Reassembles SSE lines from raw transport chunks. Chunk boundaries fall
/// wherever the network put them, including inside a multi-byte UTF-8
/// sequence, so bytes stay buffered until their newline arrives and only
/// complete lines are decoded.
struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    fn new() -> Self {
        SseLineBuffer {
            pending: Vec::new(),
        }
    }

    fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// The next complete line with its terminator stripped, or `None` until
    /// one has fully arrived.
    fn next_line(&mut self) -> Option<Result<String, ClientError>> {
        let newline_index = self.pending.iter().position(|&byte| byte == b'\n')?;
        let mut line: Vec<u8> = self.pending.drain(..=newline_index).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(match String::from_utf8(line) {
            Ok(line) => Ok(line),
            Err(err) => Err(ClientError::Decode(err.to_string())),
        })
    }
}

fn classify_transport(err: reqwest::Error) -> ClientError {
    if err.is_timeout() {
        ClientError::Timeout(err.to_string())
    } else {
        ClientError::Transport(err.to_string())
    }
}

/// 429 and 503 are the quota signals worth rotating a key or model over.
fn classify_status(status: reqwest::StatusCode, body: &str) -> ClientError {
    let message = extract_error_message(body)
        .unwrap_or_else(|| format!("request failed with status {}", status));
    match status.as_u16() {
        429 | 503 => ClientError::RateLimited(message),
        code => ClientError::Http {
            status: code,
            message,
        },
    }
}

fn extract_error_message(body: &str) -> Option<String> {
    let parsed = serde_json::from_str::<WireErrorEnvelope>(body).ok()?;
    Some(parsed.error.message)
}

// Wire types mirror the generateContent JSON shapes. Parts are a union of
// text, functionCall and functionResponse; absent members stay off the wire.

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRequest {
    contents: Vec<WireContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<WireContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_config: Option<WireToolConfig>,
    generation_config: WireGenerationConfig,
}

impl WireRequest {
    fn from_generation_request(request: GenerationRequest) -> Self {
        let contents = request.entries.into_iter().map(WireContent::from_entry).collect();

        let system_instruction = request.system_instruction.map(|text| WireContent {
            role: None,
            parts: vec![WirePart::text(text)],
        });

        // Tools are advertised with automatic function calling left to the
        // gateway; the API is told to pick tools on its own (AUTO) but the
        // resulting calls come back unexecuted.
        let (tools, tool_config) = if request.tools.is_empty() {
            (None, None)
        } else {
            let declarations = request
                .tools
                .iter()
                .map(|tool| WireFunctionDeclaration {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.parameters_schema(),
                })
                .collect();
            (
                Some(vec![WireTool {
                    function_declarations: declarations,
                }]),
                Some(WireToolConfig {
                    function_calling_config: WireFunctionCallingConfig {
                        mode: "AUTO".to_string(),
                    },
                }),
            )
        };

        WireRequest {
            contents,
            system_instruction,
            tools,
            tool_config,
            generation_config: WireGenerationConfig {
                response_mime_type: "text/plain".to_string(),
            },
        }
    }
}

#[derive(Serialize, Deserialize)]
struct WireContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<WirePart>,
}

impl WireContent {
    fn from_entry(entry: crate::finllm::client_wrapper::ConversationEntry) -> Self {
        // Gemini has no system role inside `contents`; system text travels
        // via `systemInstruction` instead.
        let role = match entry.role {
            Role::Assistant => "model",
            Role::User | Role::System => "user",
        };
        WireContent {
            role: Some(role.to_string()),
            parts: entry.parts.into_iter().map(WirePart::from_part).collect(),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<WireFunctionCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_response: Option<WireFunctionResponse>,
}

impl WirePart {
    fn text(text: String) -> Self {
        WirePart {
            text: Some(text),
            function_call: None,
            function_response: None,
        }
    }

    fn from_part(part: ContentPart) -> Self {
        match part {
            ContentPart::Text(text) => WirePart::text(text),
            ContentPart::ToolCall(call) => WirePart {
                text: None,
                function_call: Some(WireFunctionCall {
                    name: call.name,
                    args: call.arguments,
                }),
                function_response: None,
            },
            ContentPart::ToolResponse(response) => WirePart {
                text: None,
                function_call: None,
                function_response: Some(WireFunctionResponse {
                    name: response.name,
                    response: response.response,
                }),
            },
        }
    }
}

#[derive(Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Serialize, Deserialize)]
struct WireFunctionResponse {
    name: String,
    response: Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireTool {
    function_declarations: Vec<WireFunctionDeclaration>,
}

#[derive(Serialize)]
struct WireFunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireToolConfig {
    function_calling_config: WireFunctionCallingConfig,
}

#[derive(Serialize)]
struct WireFunctionCallingConfig {
    mode: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireGenerationConfig {
    response_mime_type: String,
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    candidates: Vec<WireCandidate>,
}

impl WireResponse {
    fn into_generation_response(self) -> GenerationResponse {
        let mut parts = Vec::new();
        if let Some(candidate) = self.candidates.into_iter().next() {
            if let Some(content) = candidate.content {
                for part in content.parts {
                    if let Some(text) = part.text {
                        parts.push(ContentPart::Text(text));
                    }
                    if let Some(call) = part.function_call {
                        parts.push(ContentPart::ToolCall(ToolCall {
                            name: call.name,
                            arguments: call.args,
                        }));
                    }
                    if let Some(response) = part.function_response {
                        parts.push(ContentPart::ToolResponse(ToolResponse {
                            name: response.name,
                            response: response.response,
                        }));
                    }
                }
            }
        }
        GenerationResponse { parts }
    }

    /// Collapse one SSE frame into a chunk. Frames that only carry a finish
    /// reason come out with empty content and `is_final` set.
    fn into_message_chunk(self) -> MessageChunk {
        let mut content = String::new();
        let mut is_final = false;
        if let Some(candidate) = self.candidates.into_iter().next() {
            if candidate.finish_reason.is_some() {
                is_final = true;
            }
            if let Some(inner) = candidate.content {
                for part in inner.parts {
                    if let Some(text) = part.text {
                        content.push_str(&text);
                    }
                }
            }
        }
        MessageChunk { content, is_final }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCandidate {
    content: Option<WireContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireErrorEnvelope {
    error: WireError,
}

#[derive(Deserialize)]
struct WireError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finllm::client_wrapper::ConversationEntry;
    use crate::finllm::tool_executor::{ToolDefinition, ToolParameter, ToolParameterType};
    use serde_json::json;

    #[test]
    fn test_requests_serialize_in_camel_case_with_tools() {
        let request = GenerationRequest {
            system_instruction: Some("be brief".to_string()),
            entries: vec![ConversationEntry::user_text("hello")],
            tools: vec![ToolDefinition::new("get_price", "Latest price").with_parameter(
                ToolParameter::new("symbol", ToolParameterType::String)
                    .with_description("Ticker symbol")
                    .required(),
            )],
        };

        let wire = WireRequest::from_generation_request(request);
        let value = serde_json::to_value(&wire).unwrap();

        assert_eq!(value["contents"][0]["role"], "user");
        assert_eq!(value["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(value["systemInstruction"]["parts"][0]["text"], "be brief");
        assert_eq!(
            value["tools"][0]["functionDeclarations"][0]["name"],
            "get_price"
        );
        assert_eq!(
            value["toolConfig"]["functionCallingConfig"]["mode"],
            "AUTO"
        );
        assert_eq!(value["generationConfig"]["responseMimeType"], "text/plain");
    }

    #[test]
    fn test_tool_exchange_entries_map_to_function_call_parts() {
        let call = ToolCall {
            name: "get_price".to_string(),
            arguments: json!({"symbol": "VNM"}),
        };
        let request = GenerationRequest {
            system_instruction: None,
            entries: vec![
                ConversationEntry::user_text("price of VNM?"),
                ConversationEntry::tool_call(call),
                ConversationEntry::tool_response("get_price", json!({"result": "62,300 VND"})),
            ],
            tools: Vec::new(),
        };

        let value = serde_json::to_value(&WireRequest::from_generation_request(request)).unwrap();

        assert_eq!(value["contents"][1]["role"], "model");
        assert_eq!(
            value["contents"][1]["parts"][0]["functionCall"]["name"],
            "get_price"
        );
        assert_eq!(value["contents"][2]["role"], "user");
        assert_eq!(
            value["contents"][2]["parts"][0]["functionResponse"]["response"]["result"],
            "62,300 VND"
        );
        assert!(value.get("tools").is_none());
    }

    #[test]
    fn test_responses_decompose_into_text_and_tool_calls() {
        let payload = json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        {"text": "Let me check."},
                        {"functionCall": {"name": "get_price", "args": {"symbol": "FPT"}}}
                    ]
                }
            }]
        });
        let wire: WireResponse = serde_json::from_value(payload).unwrap();
        let response = wire.into_generation_response();

        assert_eq!(response.text(), "Let me check.");
        let calls = response.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "get_price");
        assert_eq!(calls[0].arguments["symbol"], "FPT");
    }

    #[test]
    fn test_finish_only_frames_become_empty_final_chunks() {
        let payload = json!({
            "candidates": [{"finishReason": "STOP"}]
        });
        let wire: WireResponse = serde_json::from_value(payload).unwrap();
        let chunk = wire.into_message_chunk();
        assert!(chunk.content.is_empty());
        assert!(chunk.is_final);
    }

    #[test]
    fn test_text_frames_concatenate_their_parts() {
        let payload = json!({
            "candidates": [{
                "content": {"parts": [{"text": "Hel"}, {"text": "lo"}]}
            }]
        });
        let wire: WireResponse = serde_json::from_value(payload).unwrap();
        let chunk = wire.into_message_chunk();
        assert_eq!(chunk.content, "Hello");
        assert!(!chunk.is_final);
    }

    #[test]
    fn test_lines_split_mid_character_reassemble_cleanly() {
        // "ệ" is three bytes on the wire; split the frame one byte into the
        // sequence, the way a transport chunk boundary can land.
        let frame = "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"hệ số\"}]}}]}\n";
        let raw = frame.as_bytes();
        let split_at = frame.find('ệ').unwrap() + 1;

        let mut buffer = SseLineBuffer::new();
        buffer.extend(&raw[..split_at]);
        assert!(buffer.next_line().is_none());

        buffer.extend(&raw[split_at..]);
        let line = buffer.next_line().unwrap().unwrap();
        let payload = line.trim_start_matches("data:").trim();
        let wire: WireResponse = serde_json::from_str(payload).unwrap();
        assert_eq!(wire.into_message_chunk().content, "hệ số");
        assert!(buffer.next_line().is_none());
    }

    #[test]
    fn test_buffered_lines_drain_in_arrival_order() {
        let mut buffer = SseLineBuffer::new();
        buffer.extend(b"data: one\r\ndata: two\ndata: thr");
        assert_eq!(buffer.next_line().unwrap().unwrap(), "data: one");
        assert_eq!(buffer.next_line().unwrap().unwrap(), "data: two");
        assert!(buffer.next_line().is_none());
        buffer.extend(b"ee\n");
        assert_eq!(buffer.next_line().unwrap().unwrap(), "data: three");
    }

    #[test]
    fn test_malformed_bytes_in_a_complete_line_fail_to_decode() {
        let mut buffer = SseLineBuffer::new();
        buffer.extend(&[b'd', 0xE1, b'\n']);
        assert!(matches!(
            buffer.next_line(),
            Some(Err(ClientError::Decode(_)))
        ));
    }

    #[test]
    fn test_model_names_match_their_rest_identifiers() {
        assert_eq!(model_to_string(Model::Gemini25Pro), "gemini-2.5-pro");
        assert_eq!(model_to_string(Model::Gemini20Flash), "gemini-2.0-flash");
        assert_eq!(
            model_to_string(Model::Gemini15Flash8b),
            "gemini-1.5-flash-8b"
        );
    }
}

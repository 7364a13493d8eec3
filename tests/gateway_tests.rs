use async_trait::async_trait;
use finllm::client_wrapper::{
    ChunkStream, ClientError, ClientWrapper, ContentPart, GenerationRequest, GenerationResponse,
    MessageChunk, ToolCall,
};
use finllm::tool_executor::{
    ToolDefinition, ToolParameter, ToolParameterType, ToolRegistry, ToolResult,
};
use finllm::{CredentialPool, GatewayConfig, GatewayError, ModelGateway, TextStream};
use futures_util::StreamExt;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted outcome for a `generate_stream` call.
enum StreamScript {
    /// The stream opens and plays back these frames.
    Frames(Vec<Result<MessageChunk, ClientError>>),
    /// Opening the stream fails outright.
    Fail(ClientError),
}

/// Client whose responses are scripted per call, recording everything the
/// gateway sends its way.
struct ScriptedClient {
    opens: AtomicUsize,
    stream_scripts: Mutex<VecDeque<StreamScript>>,
    resolve_scripts: Mutex<VecDeque<Result<GenerationResponse, ClientError>>>,
    resolve_calls: AtomicUsize,
    models_seen: Mutex<Vec<String>>,
    stream_requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedClient {
    fn new(stream_scripts: Vec<StreamScript>) -> Self {
        Self {
            opens: AtomicUsize::new(0),
            stream_scripts: Mutex::new(stream_scripts.into_iter().collect()),
            resolve_scripts: Mutex::new(VecDeque::new()),
            resolve_calls: AtomicUsize::new(0),
            models_seen: Mutex::new(Vec::new()),
            stream_requests: Mutex::new(Vec::new()),
        }
    }

    fn with_resolve_scripts(
        self,
        scripts: Vec<Result<GenerationResponse, ClientError>>,
    ) -> Self {
        *self.resolve_scripts.lock().unwrap() = scripts.into_iter().collect();
        self
    }
}

#[async_trait]
impl ClientWrapper for ScriptedClient {
    async fn generate(
        &self,
        _credential: &str,
        _model: &str,
        _request: GenerationRequest,
    ) -> Result<GenerationResponse, ClientError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        self.resolve_scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(GenerationResponse::default()))
    }

    async fn generate_stream(
        &self,
        _credential: &str,
        model: &str,
        request: GenerationRequest,
    ) -> Result<ChunkStream, ClientError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.models_seen.lock().unwrap().push(model.to_string());
        self.stream_requests.lock().unwrap().push(request);
        let script = self
            .stream_scripts
            .lock()
            .unwrap()
            .pop_front()
            .expect("more stream opens than scripted outcomes");
        match script {
            StreamScript::Fail(err) => Err(err),
            StreamScript::Frames(frames) => Ok(Box::pin(futures_util::stream::iter(frames))),
        }
    }
}

fn text(content: &str) -> Result<MessageChunk, ClientError> {
    Ok(MessageChunk {
        content: content.to_string(),
        is_final: false,
    })
}

fn empty() -> Result<MessageChunk, ClientError> {
    Ok(MessageChunk {
        content: String::new(),
        is_final: false,
    })
}

fn fast_config(models: &[&str]) -> GatewayConfig {
    GatewayConfig {
        primary_model: models[0].to_string(),
        backup_models: models[1..].iter().map(|model| model.to_string()).collect(),
        max_retries: 3,
        base_retry_delay: Duration::from_millis(1),
        rate_limit_cooldown: Duration::from_secs(60),
        max_concurrent_requests: 4,
    }
}

fn single_key_pool() -> Arc<CredentialPool> {
    Arc::new(CredentialPool::new(vec!["test-key-alpha".to_string()]).unwrap())
}

async fn collect(mut stream: TextStream) -> (Vec<String>, Option<GatewayError>) {
    let mut fragments = Vec::new();
    let mut error = None;
    while let Some(item) = stream.next().await {
        match item {
            Ok(fragment) => fragments.push(fragment),
            Err(err) => error = Some(err),
        }
    }
    (fragments, error)
}

#[tokio::test]
async fn test_fragments_stream_through_on_a_clean_first_attempt() {
    finllm::init_logger();
    let client = Arc::new(ScriptedClient::new(vec![StreamScript::Frames(vec![
        text("Hello, "),
        text("world."),
        Ok(MessageChunk {
            content: String::new(),
            is_final: true,
        }),
    ])]));
    let gateway = ModelGateway::new(
        client.clone(),
        single_key_pool(),
        fast_config(&["model-a"]),
    );

    let (fragments, error) = collect(gateway.stream_generate(None, "hi".to_string())).await;

    assert_eq!(fragments, vec!["Hello, ".to_string(), "world.".to_string()]);
    assert!(error.is_none());
    assert_eq!(client.opens.load(Ordering::SeqCst), 1);
    // No tools registered, so the resolution round trip is skipped entirely.
    assert_eq!(client.resolve_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_rate_limited_attempts_walk_the_model_chain_in_order() {
    let rate_limited = || StreamScript::Fail(ClientError::RateLimited("quota".to_string()));
    let client = Arc::new(ScriptedClient::new(vec![
        rate_limited(),
        rate_limited(),
        rate_limited(),
        rate_limited(),
        rate_limited(),
        rate_limited(),
    ]));
    let pool = single_key_pool();
    let gateway = ModelGateway::new(
        client.clone(),
        pool.clone(),
        fast_config(&["model-a", "model-b"]),
    );

    let (fragments, error) = collect(gateway.stream_generate(None, "hi".to_string())).await;

    assert!(fragments.is_empty());
    match error {
        Some(GatewayError::AllModelsExhausted { models_tried }) => {
            assert_eq!(models_tried, 2);
        }
        other => panic!("expected AllModelsExhausted, got {:?}", other),
    }
    // Three attempts per model, primary first.
    assert_eq!(client.opens.load(Ordering::SeqCst), 6);
    assert_eq!(
        *client.models_seen.lock().unwrap(),
        vec!["model-a", "model-a", "model-a", "model-b", "model-b", "model-b"]
    );
    // Every failed attempt put the key on cooldown.
    assert_eq!(pool.stats().available, 0);
}

#[tokio::test]
async fn test_empty_chunks_are_forgiven_once_text_arrives() {
    let client = Arc::new(ScriptedClient::new(vec![StreamScript::Frames(vec![
        empty(),
        empty(),
        text("hello"),
        empty(),
        empty(),
        empty(),
    ])]));
    let gateway = ModelGateway::new(
        client.clone(),
        single_key_pool(),
        fast_config(&["model-a"]),
    );

    let (fragments, error) = collect(gateway.stream_generate(None, "hi".to_string())).await;

    // Two leading empties stay under the limit, and once real text shows up
    // the trailing empties no longer trigger a retry.
    assert_eq!(fragments, vec!["hello".to_string()]);
    assert!(error.is_none());
    assert_eq!(client.opens.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_entirely_empty_stream_is_retried_on_a_fresh_attempt() {
    let client = Arc::new(ScriptedClient::new(vec![
        StreamScript::Frames(vec![empty(), empty(), empty()]),
        StreamScript::Frames(vec![text("recovered")]),
    ]));
    let pool = single_key_pool();
    let gateway = ModelGateway::new(
        client.clone(),
        pool.clone(),
        fast_config(&["model-a"]),
    );

    let (fragments, error) = collect(gateway.stream_generate(None, "hi".to_string())).await;

    assert_eq!(fragments, vec!["recovered".to_string()]);
    assert!(error.is_none());
    assert_eq!(client.opens.load(Ordering::SeqCst), 2);
    // The empty stream counts as a rate limit signal for the key it used.
    assert_eq!(pool.stats().available, 0);
}

#[tokio::test]
async fn test_mid_stream_rate_limit_before_any_text_retries() {
    let client = Arc::new(ScriptedClient::new(vec![
        StreamScript::Frames(vec![Err(ClientError::RateLimited("quota".to_string()))]),
        StreamScript::Frames(vec![text("after retry")]),
    ]));
    let gateway = ModelGateway::new(
        client.clone(),
        single_key_pool(),
        fast_config(&["model-a"]),
    );

    let (fragments, error) = collect(gateway.stream_generate(None, "hi".to_string())).await;

    assert_eq!(fragments, vec!["after retry".to_string()]);
    assert!(error.is_none());
    assert_eq!(client.opens.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_non_retryable_error_after_text_surfaces_with_the_partial_output() {
    let client = Arc::new(ScriptedClient::new(vec![StreamScript::Frames(vec![
        text("partial "),
        Err(ClientError::Http {
            status: 500,
            message: "internal".to_string(),
        }),
    ])]));
    let gateway = ModelGateway::new(
        client.clone(),
        single_key_pool(),
        fast_config(&["model-a"]),
    );

    let (fragments, error) = collect(gateway.stream_generate(None, "hi".to_string())).await;

    assert_eq!(fragments, vec!["partial ".to_string()]);
    match error {
        Some(GatewayError::Upstream(ClientError::Http { status, .. })) => {
            assert_eq!(status, 500);
        }
        other => panic!("expected an upstream HTTP error, got {:?}", other),
    }
    assert_eq!(client.opens.load(Ordering::SeqCst), 1);
}

fn price_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(
        ToolDefinition::new("get_price", "Latest traded price for a symbol").with_parameter(
            ToolParameter::new("symbol", ToolParameterType::String).required(),
        ),
        Arc::new(|arguments| {
            let symbol = arguments["symbol"].as_str().unwrap_or_default().to_string();
            Ok(ToolResult::success(serde_json::json!({
                "symbol": symbol,
                "price": 91500,
            })))
        }),
    );
    registry
}

#[tokio::test]
async fn test_tool_calls_resolve_into_the_streaming_request() {
    let client = Arc::new(
        ScriptedClient::new(vec![StreamScript::Frames(vec![text(
            "FPT trades at 91,500 VND.",
        )])])
        .with_resolve_scripts(vec![Ok(GenerationResponse {
            parts: vec![ContentPart::ToolCall(ToolCall {
                name: "get_price".to_string(),
                arguments: serde_json::json!({"symbol": "FPT"}),
            })],
        })]),
    );
    let gateway = ModelGateway::new(
        client.clone(),
        single_key_pool(),
        fast_config(&["model-a"]),
    )
    .with_tools(Arc::new(price_registry()));

    let (fragments, error) =
        collect(gateway.stream_generate(None, "what is FPT worth?".to_string())).await;

    assert_eq!(fragments, vec!["FPT trades at 91,500 VND.".to_string()]);
    assert!(error.is_none());
    assert_eq!(client.resolve_calls.load(Ordering::SeqCst), 1);

    let requests = client.stream_requests.lock().unwrap();
    let request = &requests[0];
    // Prompt, the model's call, and the tool's answer, in that order.
    assert_eq!(request.entries.len(), 3);
    match &request.entries[1].parts[0] {
        ContentPart::ToolCall(call) => assert_eq!(call.name, "get_price"),
        other => panic!("expected a tool call part, got {:?}", other),
    }
    match &request.entries[2].parts[0] {
        ContentPart::ToolResponse(response) => {
            assert_eq!(response.name, "get_price");
            assert_eq!(response.response["result"]["price"], 91500);
        }
        other => panic!("expected a tool response part, got {:?}", other),
    }
    assert_eq!(request.tools.len(), 1);
}

#[tokio::test]
async fn test_unknown_tool_call_is_skipped_without_ending_the_turn() {
    let client = Arc::new(
        ScriptedClient::new(vec![StreamScript::Frames(vec![text("answered anyway")])])
            .with_resolve_scripts(vec![Ok(GenerationResponse {
                parts: vec![ContentPart::ToolCall(ToolCall {
                    name: "get_weather".to_string(),
                    arguments: serde_json::json!({"city": "Hanoi"}),
                })],
            })]),
    );
    let gateway = ModelGateway::new(
        client.clone(),
        single_key_pool(),
        fast_config(&["model-a"]),
    )
    .with_tools(Arc::new(price_registry()));

    let (fragments, error) = collect(gateway.stream_generate(None, "hi".to_string())).await;

    assert_eq!(fragments, vec!["answered anyway".to_string()]);
    assert!(error.is_none());
    // The unresolvable call leaves no trace in the streaming request.
    let requests = client.stream_requests.lock().unwrap();
    assert_eq!(requests[0].entries.len(), 1);
}

#[tokio::test]
async fn test_failing_tool_handler_is_skipped_without_ending_the_turn() {
    let mut registry = ToolRegistry::new();
    registry.register(
        ToolDefinition::new("get_price", "Latest traded price for a symbol"),
        Arc::new(|_arguments| Err("upstream feed offline".into())),
    );
    let client = Arc::new(
        ScriptedClient::new(vec![StreamScript::Frames(vec![text("best effort answer")])])
            .with_resolve_scripts(vec![Ok(GenerationResponse {
                parts: vec![ContentPart::ToolCall(ToolCall {
                    name: "get_price".to_string(),
                    arguments: serde_json::json!({"symbol": "FPT"}),
                })],
            })]),
    );
    let gateway = ModelGateway::new(
        client.clone(),
        single_key_pool(),
        fast_config(&["model-a"]),
    )
    .with_tools(Arc::new(registry));

    let (fragments, error) = collect(gateway.stream_generate(None, "hi".to_string())).await;

    assert_eq!(fragments, vec!["best effort answer".to_string()]);
    assert!(error.is_none());
    let requests = client.stream_requests.lock().unwrap();
    assert_eq!(requests[0].entries.len(), 1);
}

#[tokio::test]
async fn test_rate_limited_tool_resolution_retries_like_a_failed_open() {
    let client = Arc::new(
        ScriptedClient::new(vec![StreamScript::Frames(vec![text("resolved")])])
            .with_resolve_scripts(vec![
                Err(ClientError::RateLimited("quota".to_string())),
                Ok(GenerationResponse::default()),
            ]),
    );
    let gateway = ModelGateway::new(
        client.clone(),
        single_key_pool(),
        fast_config(&["model-a"]),
    )
    .with_tools(Arc::new(price_registry()));

    let (fragments, error) = collect(gateway.stream_generate(None, "hi".to_string())).await;

    assert_eq!(fragments, vec!["resolved".to_string()]);
    assert!(error.is_none());
    // First attempt died during resolution, before any stream was opened.
    assert_eq!(client.resolve_calls.load(Ordering::SeqCst), 2);
    assert_eq!(client.opens.load(Ordering::SeqCst), 1);
}

/// Client that measures how many calls are in flight at once.
struct GaugeClient {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

#[async_trait]
impl ClientWrapper for GaugeClient {
    async fn generate(
        &self,
        _credential: &str,
        _model: &str,
        _request: GenerationRequest,
    ) -> Result<GenerationResponse, ClientError> {
        Ok(GenerationResponse::default())
    }

    async fn generate_stream(
        &self,
        _credential: &str,
        _model: &str,
        _request: GenerationRequest,
    ) -> Result<ChunkStream, ClientError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(Box::pin(futures_util::stream::iter(vec![text("ok")])))
    }
}

#[tokio::test]
async fn test_concurrency_limit_bounds_simultaneous_upstream_calls() {
    let client = Arc::new(GaugeClient {
        in_flight: AtomicUsize::new(0),
        max_in_flight: AtomicUsize::new(0),
    });
    let mut config = fast_config(&["model-a"]);
    config.max_concurrent_requests = 1;
    let gateway = Arc::new(ModelGateway::new(
        client.clone(),
        single_key_pool(),
        config,
    ));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let gateway = Arc::clone(&gateway);
            tokio::spawn(async move {
                collect(gateway.stream_generate(None, "ping".to_string())).await
            })
        })
        .collect();
    for handle in handles {
        let (fragments, error) = handle.await.unwrap();
        assert_eq!(fragments, vec!["ok".to_string()]);
        assert!(error.is_none());
    }

    assert_eq!(client.max_in_flight.load(Ordering::SeqCst), 1);
}

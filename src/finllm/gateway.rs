//! The streaming gateway: credential rotation, one-pass tool resolution,
//! model-chain fallback, and the empty-stream guard.
//!
//! [`ModelGateway::stream_generate`] drives one request through a bounded
//! loop of attempts. Each attempt selects a credential and a model, resolves
//! tool calls with a single non-streaming round trip, then opens the
//! streaming call and forwards text chunks as they arrive. Rate-limit-class
//! failures put the credential on cooldown and retry with exponential
//! backoff on the same model; once a model's retries are spent the next
//! model in the chain takes over. When the whole chain is spent the stream
//! ends with a single terminal [`GatewayError::AllModelsExhausted`] item —
//! exhaustion is a sentinel, not a panic.
//!
//! A shared semaphore bounds concurrent upstream calls. The permit covers
//! tool resolution, tool execution, and stream initiation of one attempt;
//! chunk draining and backoff sleeps run outside it so stalled retries can
//! never starve live traffic.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use futures_util::StreamExt;
//! use finllm::{CredentialPool, GatewayConfig, ModelGateway};
//! use finllm::clients::gemini::GeminiClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = Arc::new(CredentialPool::from_env("GEMINI_API_KEY")?);
//!     let gateway = ModelGateway::new(
//!         Arc::new(GeminiClient::new()),
//!         pool,
//!         GatewayConfig::default(),
//!     );
//!
//!     let mut stream = gateway.stream_generate(None, "Explain P/E ratios briefly.".into());
//!     while let Some(item) = stream.next().await {
//!         print!("{}", item?);
//!     }
//!     Ok(())
//! }
//! ```

use async_stream::stream;
use futures_util::{Stream, StreamExt};
use log::{debug, error, info, warn};
use std::error::Error;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::finllm::client_wrapper::{
    ChunkStream, ClientError, ClientWrapper, ConversationEntry, GenerationRequest, ToolCall,
};
use crate::finllm::config::GatewayConfig;
use crate::finllm::credential_pool::{mask_key, CredentialPool};
use crate::finllm::tool_executor::{ToolError, ToolRegistry};

// Maximum number of consecutive empty chunks before a stream that has not
// produced any text yet is abandoned and retried.
const MAX_EMPTY_CHUNKS: u32 = 3;

/// Terminal failures a gateway stream can end with. Retryable conditions
/// (rate limits, empty streams) never surface here; they are absorbed by the
/// retry policy.
#[derive(Clone, Debug)]
pub enum GatewayError {
    /// Every model in the chain was exhausted by rate limiting or empty
    /// streams.
    AllModelsExhausted { models_tried: usize },
    /// A non-retryable upstream failure ended the current call.
    Upstream(ClientError),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::AllModelsExhausted { models_tried } => {
                write!(
                    f,
                    "all configured models exhausted ({} tried), unable to complete request",
                    models_tried
                )
            }
            GatewayError::Upstream(err) => write!(f, "upstream call failed: {}", err),
        }
    }
}

impl Error for GatewayError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            GatewayError::Upstream(err) => Some(err),
            _ => None,
        }
    }
}

/// Type alias for the text-fragment stream a gateway request produces.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, GatewayError>> + Send>>;

/// Mediates every model interaction: key selection, tool resolution,
/// streaming, retries, and fallback.
pub struct ModelGateway {
    client: Arc<dyn ClientWrapper>,
    pool: Arc<CredentialPool>,
    tools: Arc<ToolRegistry>,
    config: GatewayConfig,
    limiter: Arc<Semaphore>,
}

impl ModelGateway {
    /// Build a gateway over the given client and credential pool. Starts
    /// with no tools registered; see [`ModelGateway::with_tools`].
    pub fn new(
        client: Arc<dyn ClientWrapper>,
        pool: Arc<CredentialPool>,
        config: GatewayConfig,
    ) -> Self {
        let limiter = Arc::new(Semaphore::new(config.max_concurrent_requests.max(1)));
        info!(
            "gateway initialised: model chain {:?}, {} concurrent upstream call(s)",
            config.model_chain(),
            config.max_concurrent_requests.max(1)
        );
        Self {
            client,
            pool,
            tools: Arc::new(ToolRegistry::new()),
            config,
            limiter,
        }
    }

    /// Attach a tool registry. Tool definitions are advertised on every
    /// upstream call and calls coming back are resolved in one pass.
    pub fn with_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = tools;
        self
    }

    /// The credential pool backing this gateway, e.g. for stats readouts.
    pub fn pool(&self) -> &Arc<CredentialPool> {
        &self.pool
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Run one generation request as a lazy stream of text fragments.
    ///
    /// The stream is one-shot: polling drives the attempt loop, and once it
    /// ends (naturally or with a terminal error item) it never restarts.
    pub fn stream_generate(
        &self,
        system_instruction: Option<String>,
        prompt: String,
    ) -> TextStream {
        let client = Arc::clone(&self.client);
        let pool = Arc::clone(&self.pool);
        let tools = Arc::clone(&self.tools);
        let limiter = Arc::clone(&self.limiter);
        let config = self.config.clone();

        let output = stream! {
            let chain = config.model_chain();
            let mut retry_count: u32 = 0;
            let mut model_index: usize = 0;
            let mut total_attempts: u32 = 0;
            let mut yielded_any = false;

            'attempts: loop {
                if model_index >= chain.len() {
                    error!(
                        "all models exhausted after {} attempt(s), unable to complete request",
                        total_attempts
                    );
                    yield Err(GatewayError::AllModelsExhausted {
                        models_tried: chain.len(),
                    });
                    break 'attempts;
                }

                let model = chain[model_index].clone();
                let credential = pool.select_random();
                total_attempts += 1;
                info!(
                    "attempting stream with model {} and credential {} (retry {}/{})",
                    model,
                    mask_key(&credential),
                    retry_count,
                    config.max_retries
                );

                // One permit spans tool resolution, tool execution, and
                // stream initiation; draining happens after it is released.
                let opened = {
                    let _permit = limiter.acquire().await.expect("semaphore closed");
                    debug!("acquired upstream permit");
                    open_attempt(
                        client.as_ref(),
                        tools.as_ref(),
                        &credential,
                        &model,
                        system_instruction.as_deref(),
                        &prompt,
                    )
                    .await
                };

                let mut chunks = match opened {
                    Ok(chunks) => chunks,
                    Err(err) if err.is_rate_limit_class() => {
                        warn!("rate limit encountered: {}", err);
                        pool.mark_rate_limited(&credential, config.rate_limit_cooldown);
                        backoff_or_advance(&mut retry_count, &mut model_index, &chain, &config)
                            .await;
                        continue 'attempts;
                    }
                    Err(err) => {
                        error!("error initialising content stream: {}", err);
                        yield Err(GatewayError::Upstream(err));
                        break 'attempts;
                    }
                };

                let mut empty_chunks: u32 = 0;
                loop {
                    match chunks.next().await {
                        Some(Ok(chunk)) => {
                            if chunk.content.is_empty() {
                                empty_chunks += 1;
                                if empty_chunks >= MAX_EMPTY_CHUNKS && !yielded_any {
                                    warn!(
                                        "received {} empty chunks and no content, retrying with a new stream",
                                        empty_chunks
                                    );
                                    pool.mark_rate_limited(&credential, config.rate_limit_cooldown);
                                    backoff_or_advance(
                                        &mut retry_count,
                                        &mut model_index,
                                        &chain,
                                        &config,
                                    )
                                    .await;
                                    continue 'attempts;
                                }
                            } else {
                                empty_chunks = 0;
                                yielded_any = true;
                                yield Ok(chunk.content);
                            }
                        }
                        Some(Err(err)) if err.is_rate_limit_class() && !yielded_any => {
                            warn!("rate limit encountered mid-stream: {}", err);
                            pool.mark_rate_limited(&credential, config.rate_limit_cooldown);
                            backoff_or_advance(&mut retry_count, &mut model_index, &chain, &config)
                                .await;
                            continue 'attempts;
                        }
                        Some(Err(err)) => {
                            error!("error processing content stream: {}", err);
                            yield Err(GatewayError::Upstream(err));
                            break 'attempts;
                        }
                        None => {
                            debug!("content stream complete after {} attempt(s)", total_attempts);
                            break 'attempts;
                        }
                    }
                }
            }
        };

        Box::pin(output)
    }
}

/// One attempt's upstream work: resolve tools with a single non-streaming
/// call, splice call/result pairs into the conversation, then open the
/// streaming call.
async fn open_attempt(
    client: &dyn ClientWrapper,
    tools: &ToolRegistry,
    credential: &str,
    model: &str,
    system_instruction: Option<&str>,
    prompt: &str,
) -> Result<ChunkStream, ClientError> {
    let mut entries = vec![ConversationEntry::user_text(prompt)];
    let definitions = tools.definitions();

    if !definitions.is_empty() {
        let request = GenerationRequest {
            system_instruction: system_instruction.map(|s| s.to_string()),
            entries: entries.clone(),
            tools: definitions.clone(),
        };
        let response = client.generate(credential, model, request).await?;
        for call in response.tool_calls() {
            resolve_tool_call(tools, call, &mut entries).await;
        }
    }

    let request = GenerationRequest {
        system_instruction: system_instruction.map(|s| s.to_string()),
        entries,
        tools: definitions,
    };
    client.generate_stream(credential, model, request).await
}

/// Execute one tool call and splice the call and its result into the
/// conversation as a model entry followed by a user entry. Unknown or
/// failing tools are logged and skipped; the turn proceeds without their
/// output.
async fn resolve_tool_call(
    tools: &ToolRegistry,
    call: ToolCall,
    entries: &mut Vec<ConversationEntry>,
) {
    info!("tool call requested: {}({})", call.name, call.arguments);
    match tools.execute(&call.name, call.arguments.clone()).await {
        Ok(result) if result.success => {
            let response = serde_json::json!({ "result": result.output });
            entries.push(ConversationEntry::tool_call(call.clone()));
            entries.push(ConversationEntry::tool_response(call.name, response));
        }
        Ok(result) => {
            error!(
                "tool {} reported failure: {}",
                call.name,
                result.error.unwrap_or_else(|| "unspecified".to_string())
            );
        }
        Err(ToolError::NotFound(name)) => {
            warn!("tool {} not found in available tools, skipping call", name);
        }
        Err(err) => {
            error!("error executing tool {}: {}", call.name, err);
        }
    }
}

/// Retry bookkeeping shared by the rate-limit and empty-stream paths. While
/// the current model has retries left, sleeps the exponential backoff and
/// keeps the model; otherwise resets the counter and advances the chain.
/// Callers detect exhaustion by `model_index` walking past the chain.
async fn backoff_or_advance(
    retry_count: &mut u32,
    model_index: &mut usize,
    chain: &[String],
    config: &GatewayConfig,
) {
    *retry_count += 1;
    if *retry_count < config.max_retries {
        let delay = config.base_retry_delay * 2u32.saturating_pow(*retry_count - 1);
        info!(
            "retrying in {:?} (attempt {}/{})",
            delay,
            *retry_count + 1,
            config.max_retries
        );
        tokio::time::sleep(delay).await;
    } else {
        *retry_count = 0;
        *model_index += 1;
        if let Some(next) = chain.get(*model_index) {
            warn!("switching to backup model: {}", next);
        }
    }
}

//! # FinLLM
//!
//! FinLLM is a Rust gateway for building resilient, finance-aware chat services on top of
//! Google Gemini. It sits between a chat frontend and the provider API and takes care of
//! everything that makes raw LLM calls unpleasant in production:
//!
//! * **Credential Rotation**: [`CredentialPool`] manages a set of API keys with per-key
//!   cooldowns, usage counters, and pluggable selection strategies, so one rate-limited key
//!   never stalls the service
//! * **Model Fallback**: [`ModelGateway`] walks an ordered model chain with exponential
//!   backoff, switching keys and models until a generation attempt succeeds or every model
//!   is exhausted
//! * **Tool Calling**: a [`tool_executor::ToolRegistry`] of plain Rust functions (sync or
//!   async) the model can invoke mid-turn; stock market lookups and web search ship in
//!   [`tools`]
//! * **Sessions**: [`SessionRegistry`] keeps per-conversation history with atomic
//!   create-or-reuse semantics, safe under concurrent turns
//! * **Streaming Turns**: [`StreamCoordinator`] runs a full chat turn, forwards response
//!   fragments the moment they arrive, and commits history exactly once per turn
//!
//! ## Core Concepts
//!
//! ### CredentialPool: Keys That Rotate Themselves
//!
//! The pool loads keys from numbered environment variables and hands one out per attempt.
//! Keys marked rate limited sit out their cooldown; selection always returns something,
//! falling back to the key whose cooldown expires soonest when every key is cooling down:
//!
//! ```rust
//! use std::time::Duration;
//! use finllm::CredentialPool;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = CredentialPool::new(vec!["key-a".into(), "key-b".into()])?;
//!
//! let key = pool.select_random();
//! pool.mark_rate_limited(&key, Duration::from_secs(60));
//!
//! // The other key takes over; selection never fails outright.
//! let next = pool.select_least_used();
//! assert_ne!(key, next);
//! # Ok(())
//! # }
//! ```
//!
//! ### ModelGateway: One Call, Many Attempts
//!
//! [`ModelGateway::stream_generate`] hides the retry machinery behind a single text
//! stream. Internally it picks a key and model, resolves tool calls in one pass, opens the
//! provider stream, and watches for empty-stream stalls; on rate limits it cools the key
//! down, backs off, and eventually advances to the next model in the chain:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use futures_util::StreamExt;
//! use finllm::{CredentialPool, GatewayConfig, ModelGateway};
//! use finllm::clients::gemini::GeminiClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     finllm::init_logger();
//!
//!     let pool = Arc::new(CredentialPool::from_env("GEMINI_API_KEY")?);
//!     let gateway = ModelGateway::new(
//!         Arc::new(GeminiClient::new()),
//!         pool,
//!         GatewayConfig::from_env(),
//!     );
//!
//!     let mut stream = gateway.stream_generate(None, "What moves a P/E ratio?".into());
//!     while let Some(fragment) = stream.next().await {
//!         print!("{}", fragment?);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ### Tools: Plain Functions the Model Can Call
//!
//! Register sync or async Rust functions with a parameter schema; the gateway advertises
//! them upstream, executes whatever the model asks for, and feeds results back before
//! streaming the final answer. A failing or unknown tool is logged and skipped, never
//! fatal:
//!
//! ```rust
//! use std::sync::Arc;
//! use finllm::tool_executor::{ToolDefinition, ToolParameter, ToolParameterType, ToolRegistry, ToolResult};
//!
//! let mut registry = ToolRegistry::new();
//! registry.register(
//!     ToolDefinition::new("get_vat_rate", "Current VAT rate for a country")
//!         .with_parameter(ToolParameter::new("country", ToolParameterType::String).required()),
//!     Arc::new(|params| {
//!         let country = params["country"].as_str().unwrap_or("VN");
//!         Ok(ToolResult::success(serde_json::json!({ "country": country, "rate": 0.1 })))
//!     }),
//! );
//! ```
//!
//! ### StreamCoordinator: Whole Turns, End to End
//!
//! The coordinator ties sessions, prompt building, and the gateway together. It snapshots
//! history, embeds it (plus optional financial report content) in the prompt, streams
//! fragments out as they arrive, and appends the completed turn to the session exactly
//! once. A client that disconnects mid-stream does not lose the turn; it still runs to
//! completion and commits:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use futures_util::StreamExt;
//! use finllm::{CredentialPool, GatewayConfig, ModelGateway, SessionRegistry, StreamCoordinator};
//! use finllm::clients::gemini::GeminiClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = Arc::new(CredentialPool::from_env("GEMINI_API_KEY")?);
//!     let gateway = Arc::new(ModelGateway::new(
//!         Arc::new(GeminiClient::new()),
//!         pool,
//!         GatewayConfig::default(),
//!     ));
//!     let coordinator = StreamCoordinator::new(gateway, Arc::new(SessionRegistry::new()));
//!
//!     let mut stream = coordinator.handle(None, "Compare FPT and VNM margins.").await;
//!     println!("session: {}", stream.session_id());
//!     while let Some(fragment) = stream.next().await {
//!         print!("{}", fragment);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Continue exploring the modules re-exported from the crate root for progressively richer
//! interaction patterns.

use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

/// Initialise the global [`env_logger`] subscriber exactly once.
///
/// The helper is intentionally lightweight so that applications embedding FinLLM can opt-in
/// to simple `RUST_LOG` driven diagnostics without having to choose a specific logging backend
/// upfront.
///
/// ```rust
/// finllm::init_logger();
/// log::info!("Logger is ready");
/// ```
pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        env_logger::init();
    });
}

// Import the top-level `finllm` module.
pub mod finllm;

// Re-exporting key items for easier external access.
pub use crate::finllm::client_wrapper;
pub use crate::finllm::client_wrapper::{
    ChunkStream, ClientError, ClientWrapper, ContentPart, ConversationEntry, GenerationRequest,
    GenerationResponse, Message, MessageChunk, Role, ToolCall, ToolResponse,
};
pub use crate::finllm::clients;
pub use crate::finllm::config::GatewayConfig;
pub use crate::finllm::coordinator;
pub use crate::finllm::coordinator::{ChatStream, StreamCoordinator, DEFAULT_SYSTEM_INSTRUCTION};
pub use crate::finllm::credential_pool;
pub use crate::finllm::credential_pool::{CredentialPool, CredentialStats, PoolError, PoolStats};
pub use crate::finllm::gateway;
pub use crate::finllm::gateway::{GatewayError, ModelGateway, TextStream};
pub use crate::finllm::http_client_pool;
pub use crate::finllm::report_store::{InMemoryReportStore, ReportStore};
pub use crate::finllm::session::{ChatSession, SessionRegistry};
pub use crate::finllm::tool_executor;
pub use crate::finllm::tools;

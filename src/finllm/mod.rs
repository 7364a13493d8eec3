// src/finllm/mod.rs

pub mod client_wrapper;
pub mod clients;
pub mod config;
pub mod coordinator;
pub mod credential_pool;
pub mod gateway;
pub mod http_client_pool;
pub mod report_store;
pub mod session;
pub mod tool_executor;
pub mod tools;

// Explicitly export the orchestration types so callers reach them as
// finllm::StreamCoordinator instead of finllm::finllm::coordinator::StreamCoordinator.
pub use coordinator::{ChatStream, StreamCoordinator};
pub use gateway::ModelGateway;
pub use session::{ChatSession, SessionRegistry};

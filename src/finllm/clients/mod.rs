//! Provider specific [`ClientWrapper`](crate::finllm::client_wrapper::ClientWrapper) implementations.
//!
//! Each submodule offers a concrete client that speaks a particular vendor's API while
//! conforming to the uniform gateway contract.

pub mod gemini;

//! Remote escalation provider (Anthropic Messages API).

pub mod client;

pub use client::AnthropicClient;

//! Local model pool client (Ollama chat API).

pub mod client;

pub use client::OllamaClient;

//! Infrastructure layer: configuration, logging, and the concrete
//! model-endpoint clients behind the domain ports.

pub mod anthropic;
pub mod config;
pub mod logging;
pub mod ollama;

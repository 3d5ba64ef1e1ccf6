//! Ports (trait boundaries) between the delegation engine and the
//! outside world: model endpoints, tool providers, and domain memory.

pub mod memory;
pub mod mock_model;
pub mod model_client;
pub mod tool_backend;

pub use memory::{
    InMemoryStore, MemoryFeature, MemoryGoal, MemorySnapshot, MemoryStore, NullMemoryStore,
    ProgressEntry,
};
pub use mock_model::{MockModelClient, MockReply};
pub use model_client::{ChatRequest, ModelClient};
pub use tool_backend::{CompositeToolBackend, ToolBackend};

//! Multi-step dialogues
//!
//! Flow definitions, per-user session storage and the engine that drives a
//! user through a flow.

pub mod engine;
pub mod flow;
pub mod session;

// Re-export commonly used types
pub use engine::ConversationEngine;
pub use flow::{FlowCatalog, FlowDefinition, Input, StepSpec};
pub use session::{ConversationSession, InMemorySessionStore, SessionStore};

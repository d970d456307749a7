//! Lanemate - player profiles and teammate search for a chat bot
//!
//! This crate drives multi-step registration and matchmaking dialogues for
//! chat users, stores player profiles, answers teammate queries by lane and
//! rank, and tracks which chats the bot belongs to. Events arrive from the
//! chat gateway over AMQP and replies are published back the same way.

pub mod amqp;
pub mod config;
pub mod conversation;
pub mod dispatch;
pub mod error;
pub mod matchmaking;
pub mod membership;
pub mod metrics;
pub mod router;
pub mod service;
pub mod store;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{LanemateError, Result};
pub use types::*;

// Re-export key components
pub use amqp::publisher::ReplyPublisher;
pub use conversation::ConversationEngine;
pub use dispatch::KeyedDispatcher;
pub use router::SessionRouter;
pub use store::{InMemoryProfileStore, ProfileStore, SqliteProfileStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

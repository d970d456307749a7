//! AMQP bridge to the chat gateway
//!
//! This module handles the broker connection, the inbound event consumer and
//! the publisher for replies and team broadcasts.

pub mod connection;
pub mod handlers;
pub mod messages;
pub mod publisher;

// Re-export commonly used types
pub use connection::{AmqpConfig, AmqpConnection};
pub use handlers::{EventHandler, InboundConsumer};
pub use messages::*;
pub use publisher::{AmqpReplyPublisher, MockReplyPublisher, PublisherConfig, ReplyPublisher};

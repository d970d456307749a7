//! Error types for the lanemate service
//!
//! Propagation uses anyhow throughout; the enums below are the concrete
//! causes the router and engine inspect when turning failures into replies.

use crate::types::{Field, UserId};

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific service scenarios
#[derive(Debug, thiserror::Error)]
pub enum LanemateError {
    #[error("AMQP connection failed: {message}")]
    AmqpConnectionFailed { message: String },

    #[error("Invalid inbound event: {reason}")]
    InvalidEvent { reason: String },

    #[error("User {user_id} has no registered profile")]
    NotRegistered { user_id: UserId },

    #[error("Profile storage failure: {message}")]
    Storage { message: String },

    #[error("User {user_id} already had an active {previous} conversation")]
    SessionConflict { user_id: UserId, previous: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl LanemateError {
    /// Wrap any backing-medium failure as a storage error
    pub fn storage(err: impl std::fmt::Display) -> Self {
        LanemateError::Storage {
            message: err.to_string(),
        }
    }
}

/// A dialogue step rejected the value it was given.
///
/// Never fatal: the engine answers with a re-prompt for the same step.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: Field,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: Field, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

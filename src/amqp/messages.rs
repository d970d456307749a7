//! AMQP message definitions and serialization

use crate::error::{LanemateError, Result};
use crate::types::{InboundEnvelope, Reply};
use serde_json;

/// Default queue and exchange names
pub const INBOUND_QUEUE: &str = "lanemate.inbound";
pub const REPLIES_EXCHANGE: &str = "lanemate.replies";
pub const BROADCASTS_EXCHANGE: &str = "lanemate.broadcasts";

/// Routing key prefix for replies; the reply kind is appended
pub const REPLY_ROUTING_PREFIX: &str = "reply";
pub const TEAM_BROADCAST_ROUTING_KEY: &str = "broadcast.team";

/// Message envelope with metadata
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MessageEnvelope<T> {
    pub payload: T,
    pub correlation_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub routing_key: String,
}

impl<T> MessageEnvelope<T>
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    /// Create a new message envelope
    pub fn new(payload: T, routing_key: String) -> Self {
        Self {
            payload,
            correlation_id: crate::utils::generate_correlation_id(),
            timestamp: crate::utils::current_timestamp(),
            routing_key,
        }
    }

    /// Serialize the envelope to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            LanemateError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    /// Deserialize envelope from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            LanemateError::InvalidEvent {
                reason: format!("Failed to deserialize message: {}", e),
            }
            .into()
        })
    }
}

/// Message serialization and validation utilities
pub struct MessageUtils;

impl MessageUtils {
    /// Serialize an inbound envelope to bytes
    pub fn serialize_inbound(envelope: &InboundEnvelope) -> Result<Vec<u8>> {
        Self::validate_inbound(envelope)?;
        Self::serialize_message(envelope)
    }

    /// Deserialize and validate an inbound envelope
    pub fn deserialize_inbound(bytes: &[u8]) -> Result<InboundEnvelope> {
        let envelope: InboundEnvelope =
            serde_json::from_slice(bytes).map_err(|e| LanemateError::InvalidEvent {
                reason: format!("Failed to deserialize inbound event: {}", e),
            })?;

        Self::validate_inbound(&envelope)?;
        Ok(envelope)
    }

    /// Validate an inbound envelope
    pub fn validate_inbound(envelope: &InboundEnvelope) -> Result<()> {
        if envelope.user_id == 0 {
            return Err(LanemateError::InvalidEvent {
                reason: "User ID cannot be 0".to_string(),
            }
            .into());
        }

        Ok(())
    }

    /// Serialize any AMQP message to bytes
    pub fn serialize_message<T: serde::Serialize>(message: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(message).map_err(|e| {
            LanemateError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    /// Routing key a reply is published under
    pub fn reply_routing_key(reply: &Reply) -> String {
        format!("{}.{}", REPLY_ROUTING_PREFIX, reply.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InboundEvent;

    #[test]
    fn test_message_envelope_creation() {
        let reply = Reply::Deleted { user_id: 3 };
        let envelope = MessageEnvelope::new(reply, "reply.deleted".to_string());

        assert_eq!(envelope.routing_key, "reply.deleted");
        assert!(!envelope.correlation_id.is_empty());
    }

    #[test]
    fn test_inbound_validation() {
        let valid = InboundEnvelope::new(42, InboundEvent::GetProfile);
        assert!(MessageUtils::validate_inbound(&valid).is_ok());

        let invalid = InboundEnvelope::new(0, InboundEvent::GetProfile);
        let err = MessageUtils::validate_inbound(&invalid).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LanemateError>(),
            Some(LanemateError::InvalidEvent { .. })
        ));
    }

    #[test]
    fn test_malformed_inbound_is_invalid_event() {
        let err = MessageUtils::deserialize_inbound(br#"{"user_id": 5, "event": {"type": "Dance"}}"#)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LanemateError>(),
            Some(LanemateError::InvalidEvent { .. })
        ));
    }

    #[test]
    fn test_inbound_bytes_from_gateway() {
        let bytes = MessageUtils::serialize_inbound(&InboundEnvelope::new(
            7,
            InboundEvent::SetNotifications { enabled: false },
        ))
        .unwrap();
        let parsed = MessageUtils::deserialize_inbound(&bytes).unwrap();
        assert_eq!(parsed.user_id, 7);
        assert_eq!(parsed.event, InboundEvent::SetNotifications { enabled: false });
    }

    #[test]
    fn test_reply_routing_key() {
        assert_eq!(
            MessageUtils::reply_routing_key(&Reply::NoActiveConversation { user_id: 1 }),
            "reply.no_active_conversation"
        );
    }
}

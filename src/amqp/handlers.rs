//! AMQP handlers for inbound gateway events
//!
//! The consumer decodes each delivery into an [`InboundEnvelope`], hands it
//! to an [`EventHandler`] and acknowledges it. Malformed deliveries are
//! reported to the handler and acknowledged as well; nothing is requeued.

use crate::amqp::messages::MessageUtils;
use crate::error::{LanemateError, Result};
use crate::types::InboundEnvelope;
use amqprs::{
    channel::{BasicAckArguments, BasicCancelArguments, BasicConsumeArguments, Channel},
    consumer::AsyncConsumer,
    BasicProperties, Deliver,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Trait defining the interface for handling inbound events
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one decoded event
    async fn handle_event(&self, envelope: InboundEnvelope) -> Result<()>;

    /// Handle processing errors
    async fn handle_error(&self, error: LanemateError, message_data: &[u8]);
}

/// Consumer for the inbound event queue
pub struct InboundConsumer {
    handler: Arc<dyn EventHandler>,
    channel: Channel,
    consumer_tag: String,
}

impl InboundConsumer {
    /// Create a new inbound consumer
    pub fn new(handler: Arc<dyn EventHandler>, channel: Channel) -> Self {
        let consumer_tag = format!("lanemate-consumer-{}", crate::utils::generate_correlation_id());

        Self {
            handler,
            channel,
            consumer_tag,
        }
    }

    /// Start consuming messages from the queue
    pub async fn start_consuming(&self, queue_name: &str) -> Result<()> {
        let args = BasicConsumeArguments::new(queue_name, &self.consumer_tag)
            .no_ack(false)
            .finish();

        self.channel
            .basic_consume(EventConsumer::new(self.handler.clone()), args)
            .await
            .map_err(|e| LanemateError::AmqpConnectionFailed {
                message: format!("Failed to start consuming: {}", e),
            })?;

        info!("Started consuming messages from queue: {}", queue_name);
        Ok(())
    }

    /// Stop consuming messages
    pub async fn stop_consuming(&self) -> Result<()> {
        let args = BasicCancelArguments::new(&self.consumer_tag);

        self.channel.basic_cancel(args).await.map_err(|e| {
            LanemateError::AmqpConnectionFailed {
                message: format!("Failed to stop consuming: {}", e),
            }
        })?;

        info!("Stopped consuming messages");
        Ok(())
    }

    pub fn channel_is_open(&self) -> bool {
        self.channel.is_open()
    }
}

/// Internal consumer implementation
struct EventConsumer {
    handler: Arc<dyn EventHandler>,
}

impl EventConsumer {
    fn new(handler: Arc<dyn EventHandler>) -> Self {
        Self { handler }
    }

    /// Decode and forward one delivery
    async fn process_message(&self, content: &[u8]) -> Result<()> {
        let envelope = MessageUtils::deserialize_inbound(content)?;

        debug!(
            "Inbound event parsed - user_id: {}, event: {}",
            envelope.user_id,
            envelope.event.name()
        );

        self.handler.handle_event(envelope).await
    }
}

#[async_trait]
impl AsyncConsumer for EventConsumer {
    async fn consume(
        &mut self,
        channel: &Channel,
        deliver: Deliver,
        _basic_properties: BasicProperties,
        content: Vec<u8>,
    ) {
        let delivery_tag = deliver.delivery_tag();

        debug!(
            "AMQP message received - delivery_tag: {}, routing_key: '{}', size: {} bytes",
            delivery_tag,
            deliver.routing_key(),
            content.len()
        );

        let start_time = std::time::Instant::now();

        match self.process_message(&content).await {
            Ok(_) => {
                debug!(
                    "Message handed off - delivery_tag: {}, processing_time: {:.2}ms",
                    delivery_tag,
                    start_time.elapsed().as_secs_f64() * 1000.0
                );
            }
            Err(e) => {
                warn!(
                    "Message processing failed - delivery_tag: {}, error: {}",
                    delivery_tag, e
                );
                let error = match e.downcast::<LanemateError>() {
                    Ok(error) => error,
                    Err(other) => LanemateError::InternalError {
                        message: other.to_string(),
                    },
                };
                self.handler.handle_error(error, &content).await;
            }
        }

        if let Err(e) = channel
            .basic_ack(BasicAckArguments::new(delivery_tag, false))
            .await
        {
            error!("Failed to ack delivery {}: {}", delivery_tag, e);
        }
    }
}

/// Mock event handler for testing
pub struct MockEventHandler {
    pub received_events: Arc<tokio::sync::Mutex<Vec<InboundEnvelope>>>,
    pub errors: Arc<tokio::sync::Mutex<Vec<String>>>,
}

impl Default for MockEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEventHandler {
    pub fn new() -> Self {
        Self {
            received_events: Arc::new(tokio::sync::Mutex::new(Vec::new())),
            errors: Arc::new(tokio::sync::Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl EventHandler for MockEventHandler {
    async fn handle_event(&self, envelope: InboundEnvelope) -> Result<()> {
        let mut events = self.received_events.lock().await;
        events.push(envelope);
        Ok(())
    }

    async fn handle_error(&self, error: LanemateError, _message_data: &[u8]) {
        let mut errors = self.errors.lock().await;
        errors.push(error.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InboundEvent;

    #[tokio::test]
    async fn test_consumer_forwards_valid_events() {
        let handler = Arc::new(MockEventHandler::new());
        let consumer = EventConsumer::new(handler.clone());

        let bytes = MessageUtils::serialize_inbound(&InboundEnvelope::new(
            11,
            InboundEvent::StartMatchmakingQuery,
        ))
        .unwrap();
        consumer.process_message(&bytes).await.unwrap();

        let received = handler.received_events.lock().await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].user_id, 11);
        assert_eq!(received[0].event, InboundEvent::StartMatchmakingQuery);
    }

    #[tokio::test]
    async fn test_consumer_rejects_malformed_events() {
        let handler = Arc::new(MockEventHandler::new());
        let consumer = EventConsumer::new(handler.clone());

        assert!(consumer.process_message(b"not json").await.is_err());
        assert!(handler.received_events.lock().await.is_empty());
    }
}

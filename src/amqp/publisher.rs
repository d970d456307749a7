//! AMQP publisher for replies and team broadcasts

use crate::amqp::messages::{
    MessageEnvelope, MessageUtils, BROADCASTS_EXCHANGE, REPLIES_EXCHANGE,
    TEAM_BROADCAST_ROUTING_KEY,
};
use crate::error::{LanemateError, Result};
use crate::metrics::MetricsCollector;
use crate::types::{Reply, TeamBroadcast};
use amqprs::{
    channel::{BasicPublishArguments, Channel, ExchangeDeclareArguments},
    BasicProperties,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Outbound side of the chat gateway bridge
#[async_trait]
pub trait ReplyPublisher: Send + Sync {
    /// Publish a reply addressed to one user
    async fn publish_reply(&self, reply: &Reply) -> Result<()>;

    /// Publish a team request to the broadcast exchange
    async fn publish_team_broadcast(&self, broadcast: TeamBroadcast) -> Result<()>;
}

/// Configuration for publishing
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub reply_exchange: String,
    pub broadcast_exchange: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            reply_exchange: REPLIES_EXCHANGE.to_string(),
            broadcast_exchange: BROADCASTS_EXCHANGE.to_string(),
            max_retries: 3,
            retry_delay_ms: 500,
        }
    }
}

/// AMQP-based publisher implementation
pub struct AmqpReplyPublisher {
    channel: Channel,
    config: PublisherConfig,
    metrics: Option<Arc<MetricsCollector>>,
}

impl AmqpReplyPublisher {
    /// Create a new publisher and declare its exchanges
    pub async fn new(channel: Channel, config: PublisherConfig) -> Result<Self> {
        let publisher = Self {
            channel,
            config,
            metrics: None,
        };

        publisher.setup_exchanges().await?;

        Ok(publisher)
    }

    /// Record publish outcomes in the given collector
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Set up the topic exchanges replies and broadcasts go to
    async fn setup_exchanges(&self) -> Result<()> {
        for exchange in [&self.config.reply_exchange, &self.config.broadcast_exchange] {
            let args = ExchangeDeclareArguments::new(exchange, "topic")
                .durable(true)
                .finish();
            self.channel.exchange_declare(args).await.map_err(|e| {
                LanemateError::AmqpConnectionFailed {
                    message: format!("Failed to declare exchange {}: {}", exchange, e),
                }
            })?;
        }

        info!(
            "Declared exchanges {} and {}",
            self.config.reply_exchange, self.config.broadcast_exchange
        );
        Ok(())
    }

    /// Publish to an exchange with exponential backoff
    async fn publish_to_exchange<T>(
        &self,
        exchange: &str,
        envelope: &MessageEnvelope<T>,
    ) -> Result<()>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
    {
        let started = Instant::now();
        let mut retry_count = 0;
        let mut delay = Duration::from_millis(self.config.retry_delay_ms);

        loop {
            match self.try_publish(exchange, envelope).await {
                Ok(_) => {
                    debug!(
                        "Published message {} to {} ({})",
                        envelope.correlation_id, exchange, envelope.routing_key
                    );
                    self.record("publish", true, started.elapsed());
                    return Ok(());
                }
                Err(e) => {
                    retry_count += 1;
                    if retry_count > self.config.max_retries {
                        error!(
                            "Failed to publish message {} after {} retries: {}",
                            envelope.correlation_id, self.config.max_retries, e
                        );
                        self.record("publish", false, started.elapsed());
                        return Err(e);
                    }

                    warn!(
                        "Publish attempt {} failed for message {}: {}. Retrying in {:?}",
                        retry_count, envelope.correlation_id, e, delay
                    );

                    sleep(delay).await;
                    delay = Duration::from_millis((delay.as_millis() as u64 * 2).min(5000));
                }
            }
        }
    }

    /// Single publish attempt
    async fn try_publish<T>(&self, exchange: &str, envelope: &MessageEnvelope<T>) -> Result<()>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
    {
        let payload = envelope.to_bytes()?;

        let args = BasicPublishArguments::new(exchange, &envelope.routing_key);
        let mut properties = BasicProperties::default();
        properties
            .with_message_id(&envelope.correlation_id)
            .with_timestamp(envelope.timestamp.timestamp() as u64)
            .with_content_type("application/json");

        self.channel
            .basic_publish(properties, payload, args)
            .await
            .map_err(|e| LanemateError::AmqpConnectionFailed {
                message: format!("Failed to publish message: {}", e),
            })?;

        Ok(())
    }

    fn record(&self, operation: &str, success: bool, duration: Duration) {
        if let Some(metrics) = &self.metrics {
            metrics.record_amqp_operation(operation, success, duration);
        }
    }
}

#[async_trait]
impl ReplyPublisher for AmqpReplyPublisher {
    async fn publish_reply(&self, reply: &Reply) -> Result<()> {
        let envelope = MessageEnvelope::new(reply.clone(), MessageUtils::reply_routing_key(reply));
        self.publish_to_exchange(&self.config.reply_exchange, &envelope)
            .await
    }

    async fn publish_team_broadcast(&self, broadcast: TeamBroadcast) -> Result<()> {
        let envelope = MessageEnvelope::new(broadcast, TEAM_BROADCAST_ROUTING_KEY.to_string());
        self.publish_to_exchange(&self.config.broadcast_exchange, &envelope)
            .await
    }
}

/// Mock publisher that records everything it is asked to send (for testing)
#[derive(Debug, Default)]
pub struct MockReplyPublisher {
    replies: std::sync::Mutex<Vec<Reply>>,
    broadcasts: std::sync::Mutex<Vec<TeamBroadcast>>,
    fail_publishes: std::sync::atomic::AtomicBool,
}

impl MockReplyPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent publish fail
    pub fn set_failing(&self, failing: bool) {
        self.fail_publishes
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    /// Replies published so far, in order
    pub fn replies(&self) -> Vec<Reply> {
        self.replies
            .lock()
            .map(|replies| replies.clone())
            .unwrap_or_default()
    }

    /// Replies published for one user, in order
    pub fn replies_for(&self, user_id: crate::types::UserId) -> Vec<Reply> {
        self.replies()
            .into_iter()
            .filter(|reply| reply.user_id() == user_id)
            .collect()
    }

    /// Team broadcasts published so far
    pub fn broadcasts(&self) -> Vec<TeamBroadcast> {
        self.broadcasts
            .lock()
            .map(|broadcasts| broadcasts.clone())
            .unwrap_or_default()
    }

    /// Clear recorded messages (for testing)
    pub fn clear(&self) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.clear();
        }
        if let Ok(mut broadcasts) = self.broadcasts.lock() {
            broadcasts.clear();
        }
    }

    fn check_failing(&self) -> Result<()> {
        if self.fail_publishes.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(LanemateError::AmqpConnectionFailed {
                message: "mock publisher set to fail".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl ReplyPublisher for MockReplyPublisher {
    async fn publish_reply(&self, reply: &Reply) -> Result<()> {
        self.check_failing()?;
        if let Ok(mut replies) = self.replies.lock() {
            replies.push(reply.clone());
        }
        Ok(())
    }

    async fn publish_team_broadcast(&self, broadcast: TeamBroadcast) -> Result<()> {
        self.check_failing()?;
        if let Ok(mut broadcasts) = self.broadcasts.lock() {
            broadcasts.push(broadcast);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publisher_config_default() {
        let config = PublisherConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay_ms, 500);
        assert_eq!(config.reply_exchange, "lanemate.replies");
        assert_eq!(config.broadcast_exchange, "lanemate.broadcasts");
    }

    #[tokio::test]
    async fn test_mock_publisher_records_in_order() {
        let publisher = MockReplyPublisher::new();
        publisher
            .publish_reply(&Reply::NotRegistered { user_id: 1 })
            .await
            .unwrap();
        publisher
            .publish_reply(&Reply::Deleted { user_id: 2 })
            .await
            .unwrap();

        assert_eq!(publisher.replies().len(), 2);
        assert_eq!(
            publisher.replies_for(2),
            vec![Reply::Deleted { user_id: 2 }]
        );

        publisher.set_failing(true);
        assert!(publisher
            .publish_reply(&Reply::Deleted { user_id: 3 })
            .await
            .is_err());
        assert_eq!(publisher.replies().len(), 2);
    }
}

//! Main application state and service coordination
//!
//! This module contains the production AppState that wires the profile
//! store, dialogue engine, dispatcher, AMQP bridge and background tasks.

use crate::amqp::connection::{AmqpConfig, AmqpConnection};
use crate::amqp::handlers::{EventHandler, InboundConsumer};
use crate::amqp::messages::MessageUtils;
use crate::amqp::publisher::{AmqpReplyPublisher, PublisherConfig, ReplyPublisher};
use crate::config::AppConfig;
use crate::conversation::{ConversationEngine, FlowCatalog, InMemorySessionStore};
use crate::dispatch::KeyedDispatcher;
use crate::error::{LanemateError, Result as LanemateResult};
use crate::membership::MembershipRegistry;
use crate::metrics::health::HealthServerConfig;
use crate::metrics::{HealthServer, MetricsCollector, MetricsService};
use crate::router::SessionRouter;
use crate::store::{ProfileStore, SqliteProfileStore};
use crate::types::InboundEnvelope;
use crate::utils::payload_preview;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("AMQP connection error: {message}")]
    AmqpConnection { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Validates inbound events and queues them on the dispatcher
struct DispatchingEventHandler {
    dispatcher: Arc<KeyedDispatcher>,
    metrics: Arc<MetricsCollector>,
}

#[async_trait]
impl EventHandler for DispatchingEventHandler {
    async fn handle_event(&self, envelope: InboundEnvelope) -> LanemateResult<()> {
        MessageUtils::validate_inbound(&envelope)?;
        self.dispatcher.submit(envelope).await
    }

    async fn handle_error(&self, error: LanemateError, message_data: &[u8]) {
        error!(
            "Dropping inbound message - error: '{}', message_size: {} bytes",
            error,
            message_data.len()
        );

        if !message_data.is_empty() {
            error!("Message preview: {:?}", payload_preview(message_data, 100));
        }

        self.metrics
            .record_amqp_operation("consume", false, Duration::ZERO);
    }
}

/// Main application state containing all service components
pub struct AppState {
    config: AppConfig,

    store: Arc<dyn ProfileStore>,
    engine: Arc<ConversationEngine>,
    membership: Arc<MembershipRegistry>,
    router: Arc<SessionRouter>,
    dispatcher: Arc<KeyedDispatcher>,

    /// Absent when running without a broker (tests, local tools)
    amqp_connection: Option<Arc<AmqpConnection>>,

    metrics_service: Arc<MetricsService>,

    background_tasks: Mutex<Vec<JoinHandle<()>>>,
    inbound_consumer: RwLock<Option<InboundConsumer>>,
    is_running: Arc<RwLock<bool>>,
    started_at: Instant,
}

impl AppState {
    /// Initialize the application with the SQLite store and a broker connection
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing lanemate service");
        info!(
            "Configuration: service={}, amqp_url={}, database={}",
            config.service.name, config.amqp.url, config.storage.database_path
        );

        let metrics_service = Self::initialize_metrics(&config)?;
        let store = Self::initialize_store(&config)?;
        let amqp_connection = Self::initialize_amqp(&config).await?;
        let publisher =
            Self::initialize_publisher(&config, &amqp_connection, metrics_service.collector())
                .await?;

        Ok(Self::assemble(
            config,
            store,
            publisher,
            Some(amqp_connection),
            metrics_service,
        ))
    }

    /// Build the service around caller-provided components and no broker.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn with_components(
        config: AppConfig,
        store: Arc<dyn ProfileStore>,
        publisher: Arc<dyn ReplyPublisher>,
    ) -> Result<Self, ServiceError> {
        let metrics_service = Self::initialize_metrics(&config)?;
        Ok(Self::assemble(
            config,
            store,
            publisher,
            None,
            metrics_service,
        ))
    }

    fn assemble(
        config: AppConfig,
        store: Arc<dyn ProfileStore>,
        publisher: Arc<dyn ReplyPublisher>,
        amqp_connection: Option<Arc<AmqpConnection>>,
        metrics_service: Arc<MetricsService>,
    ) -> Self {
        let metrics = metrics_service.collector();

        let engine = Arc::new(ConversationEngine::new(
            Arc::new(InMemorySessionStore::new()),
            store.clone(),
            FlowCatalog::new(config.conversation.max_nickname_length),
            metrics.clone(),
        ));
        let membership = Arc::new(MembershipRegistry::new());
        let router = Arc::new(SessionRouter::new(
            engine.clone(),
            store.clone(),
            membership.clone(),
            publisher.clone(),
            config.conversation.team_channel.clone(),
            metrics,
        ));
        let dispatcher = Arc::new(KeyedDispatcher::spawn(
            router.clone(),
            publisher,
            config.service.dispatcher_workers,
            config.service.dispatcher_queue_depth,
        ));

        Self {
            config,
            store,
            engine,
            membership,
            router,
            dispatcher,
            amqp_connection,
            metrics_service,
            background_tasks: Mutex::new(Vec::new()),
            inbound_consumer: RwLock::new(None),
            is_running: Arc::new(RwLock::new(false)),
            started_at: Instant::now(),
        }
    }

    /// Start health endpoints, event consumption and background tasks
    pub async fn start(self: &Arc<Self>) -> Result<(), ServiceError> {
        info!("Starting lanemate service");

        *self.is_running.write().await = true;

        self.metrics_service
            .health_server()
            .attach_app_state(Arc::downgrade(self));
        self.start_metrics_service().await?;

        self.start_amqp_consumption().await?;

        self.start_background_tasks().await?;

        info!("✅ Lanemate service started successfully");
        Ok(())
    }

    /// Stop consuming, drain queued events and stop background work
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of lanemate service");

        *self.is_running.write().await = false;

        if let Some(consumer) = self.inbound_consumer.write().await.take() {
            if let Err(e) = consumer.stop_consuming().await {
                warn!("Failed to stop AMQP consumer: {}", e);
            } else {
                info!("✅ AMQP message consumption stopped");
            }
        }

        // Events already queued still get their replies published
        self.dispatcher.shutdown().await;

        self.stop_background_tasks().await;

        if let Err(e) = self.metrics_service.stop().await {
            warn!("Failed to stop metrics service: {}", e);
        } else {
            info!("✅ Metrics service stopped");
        }

        if let Some(connection) = &self.amqp_connection {
            if let Err(e) = connection.connection().clone().close().await {
                warn!("Failed to close AMQP connection: {}", e);
            }
        }

        match self.store.count() {
            Ok(registered) => info!(
                "Final statistics: {} registered players, {} events processed, {} open dialogues",
                registered,
                self.dispatcher.events_processed(),
                self.engine.active_sessions()
            ),
            Err(e) => warn!("Failed to gather final statistics: {}", e),
        }
        info!("✅ Lanemate service shutdown completed");

        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn store(&self) -> Arc<dyn ProfileStore> {
        self.store.clone()
    }

    pub fn engine(&self) -> Arc<ConversationEngine> {
        self.engine.clone()
    }

    pub fn membership(&self) -> Arc<MembershipRegistry> {
        self.membership.clone()
    }

    pub fn router(&self) -> Arc<SessionRouter> {
        self.router.clone()
    }

    pub fn dispatcher(&self) -> Arc<KeyedDispatcher> {
        self.dispatcher.clone()
    }

    pub fn metrics_service(&self) -> Arc<MetricsService> {
        self.metrics_service.clone()
    }

    /// Get AMQP connection for health checks
    pub fn amqp_connection(&self) -> Option<Arc<AmqpConnection>> {
        self.amqp_connection.clone()
    }

    /// Whether an inbound consumer is attached and its channel is open
    pub async fn consumer_active(&self) -> bool {
        self.inbound_consumer
            .read()
            .await
            .as_ref()
            .map(|consumer| consumer.channel_is_open())
            .unwrap_or(false)
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    fn initialize_metrics(config: &AppConfig) -> Result<Arc<MetricsService>, ServiceError> {
        info!(
            "Initializing metrics service on port {}",
            config.service.health_port
        );

        let metrics_collector =
            Arc::new(
                MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );

        let health_config = HealthServerConfig {
            port: config.service.health_port,
            host: "0.0.0.0".to_string(),
        };

        let health_server = Arc::new(HealthServer::new(health_config, metrics_collector.clone()));
        Ok(Arc::new(MetricsService::new(
            metrics_collector,
            health_server,
        )))
    }

    fn initialize_store(config: &AppConfig) -> Result<Arc<dyn ProfileStore>, ServiceError> {
        info!(
            "Opening profile database at {} (pool size {})",
            config.storage.database_path, config.storage.pool_size
        );

        let store = SqliteProfileStore::open(
            &config.storage.database_path,
            config.storage.pool_size,
        )
        .map_err(|e| ServiceError::Storage {
            message: format!("Failed to open profile database: {}", e),
        })?;

        Ok(Arc::new(store))
    }

    /// Connect to the broker with the configured retry policy
    async fn initialize_amqp(config: &AppConfig) -> Result<Arc<AmqpConnection>, ServiceError> {
        info!("Connecting to AMQP broker: {}", config.amqp.url);

        let amqp_config = AmqpConfig::from_url(&config.amqp.url)
            .map_err(|e| ServiceError::Configuration {
                message: format!("Failed to parse AMQP URL: {}", e),
            })?
            .with_retry(
                config.amqp.max_retry_attempts,
                config.amqp.retry_delay_ms,
                config.amqp_connection_timeout(),
            );

        let connection =
            AmqpConnection::new(amqp_config)
                .await
                .map_err(|e| ServiceError::AmqpConnection {
                    message: format!("Failed to connect to AMQP: {}", e),
                })?;

        Ok(Arc::new(connection))
    }

    async fn initialize_publisher(
        config: &AppConfig,
        connection: &AmqpConnection,
        metrics: Arc<MetricsCollector>,
    ) -> Result<Arc<dyn ReplyPublisher>, ServiceError> {
        let channel = connection
            .open_channel()
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to open publisher channel: {}", e),
            })?;

        let publisher_config = PublisherConfig {
            reply_exchange: config.amqp.reply_exchange.clone(),
            broadcast_exchange: config.amqp.broadcast_exchange.clone(),
            ..PublisherConfig::default()
        };

        let publisher = AmqpReplyPublisher::new(channel, publisher_config)
            .await
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to initialize reply publisher: {}", e),
            })?
            .with_metrics(metrics);

        Ok(Arc::new(publisher))
    }

    async fn start_metrics_service(&self) -> Result<(), ServiceError> {
        info!("Starting metrics and health endpoints");

        let metrics_service = self.metrics_service.clone();
        let port = self.config.service.health_port;

        let metrics_handle = tokio::spawn(async move {
            if let Err(e) = metrics_service.start().await {
                error!("Metrics service failed: {}", e);
            } else {
                info!("Metrics service task completed");
            }
        });

        self.background_tasks.lock().await.push(metrics_handle);

        // Give the server a moment to bind
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        info!("✅ Metrics service started on port {}", port);
        Ok(())
    }

    async fn start_amqp_consumption(&self) -> Result<(), ServiceError> {
        let Some(connection) = &self.amqp_connection else {
            info!("No AMQP connection configured - inbound consumption disabled");
            return Ok(());
        };

        let queue = self.config.amqp.inbound_queue.as_str();
        let channel = connection
            .open_channel()
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to open consumer channel: {}", e),
            })?;

        let queue_declare_args = amqprs::channel::QueueDeclareArguments::new(queue)
            .durable(true)
            .auto_delete(false)
            .finish();

        channel
            .queue_declare(queue_declare_args)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to declare queue {}: {}", queue, e),
            })?;

        info!("Queue '{}' declared successfully", queue);

        let handler = Arc::new(DispatchingEventHandler {
            dispatcher: self.dispatcher.clone(),
            metrics: self.metrics_service.collector(),
        });
        let consumer = InboundConsumer::new(handler, channel);

        consumer
            .start_consuming(queue)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to start consuming messages: {}", e),
            })?;

        *self.inbound_consumer.write().await = Some(consumer);

        info!("Listening for chat events on queue '{}'", queue);
        Ok(())
    }

    async fn start_background_tasks(&self) -> Result<(), ServiceError> {
        let mut tasks = Vec::new();

        // Gauges derived from the store and the engine
        let stats_task = {
            let store = self.store.clone();
            let engine = self.engine.clone();
            let metrics_collector = self.metrics_service.collector();
            let is_running = self.is_running.clone();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(30));
                info!("Statistics update task started");

                while *is_running.read().await {
                    interval.tick().await;

                    match store.count() {
                        Ok(count) => metrics_collector.set_profiles_total(count),
                        Err(e) => {
                            metrics_collector.record_storage_error("count");
                            warn!("Failed to count profiles for metrics update: {}", e);
                        }
                    }
                    metrics_collector.set_active_sessions(engine.active_sessions());
                }

                info!("Statistics update task stopped");
            })
        };
        tasks.push(stats_task);

        if let Some(max_idle) = self.config.session_idle_timeout() {
            let sweep_interval = self.config.sweep_interval();
            info!(
                "Starting idle dialogue sweep ({}s interval, {}s timeout)...",
                sweep_interval.as_secs(),
                max_idle.as_secs()
            );

            let engine = self.engine.clone();
            let is_running = self.is_running.clone();

            tasks.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(sweep_interval);

                while *is_running.read().await {
                    interval.tick().await;

                    let expired = engine.sweep_idle(max_idle);
                    if expired > 0 {
                        info!("Expired {} idle dialogues", expired);
                    } else {
                        debug!("Idle sweep completed - nothing to expire");
                    }
                }

                info!("Idle sweep task stopped");
            }));
        } else {
            info!("Idle dialogue expiry disabled - skipping sweep task");
        }

        let health_metrics_task = {
            let metrics_collector = self.metrics_service.collector();
            let amqp_connection = self.amqp_connection.clone();
            let store = self.store.clone();
            let is_running = self.is_running.clone();
            let started_at = self.started_at;

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(60));
                info!("Health metrics task started");

                while *is_running.read().await {
                    interval.tick().await;

                    metrics_collector.update_uptime(started_at.elapsed());

                    let store_healthy = store.count().is_ok();
                    let amqp_healthy = amqp_connection
                        .as_ref()
                        .map(|connection| connection.is_alive())
                        .unwrap_or(true);

                    metrics_collector.update_component_health("profile_store", store_healthy);
                    metrics_collector.update_component_health("amqp", amqp_healthy);

                    // 2 = healthy, 1 = degraded
                    let status = if store_healthy && amqp_healthy { 2 } else { 1 };
                    metrics_collector.update_health_status(status);
                }

                info!("Health metrics task stopped");
            })
        };
        tasks.push(health_metrics_task);

        let task_count = tasks.len();
        self.background_tasks.lock().await.extend(tasks);

        info!("{} background tasks started", task_count);
        Ok(())
    }

    async fn stop_background_tasks(&self) {
        let tasks: Vec<JoinHandle<()>> = self.background_tasks.lock().await.drain(..).collect();
        let task_count = tasks.len();
        if task_count == 0 {
            debug!("No background tasks to stop");
            return;
        }

        info!("Stopping {} background tasks...", task_count);

        for task in tasks {
            task.abort();
        }

        info!("✅ All {} background tasks stopped", task_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amqp::publisher::MockReplyPublisher;
    use crate::store::InMemoryProfileStore;
    use crate::types::{InboundEvent, Reply};

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.service.health_port = 0;
        config.service.dispatcher_workers = 2;
        config
    }

    async fn test_app() -> (Arc<AppState>, Arc<MockReplyPublisher>) {
        let publisher = Arc::new(MockReplyPublisher::new());
        let app = AppState::with_components(
            test_config(),
            Arc::new(InMemoryProfileStore::new()),
            publisher.clone(),
        )
        .await
        .unwrap();
        (Arc::new(app), publisher)
    }

    #[tokio::test]
    async fn test_start_and_shutdown_without_broker() {
        let (app, _publisher) = test_app().await;
        assert!(!app.is_running().await);

        app.start().await.unwrap();
        assert!(app.is_running().await);
        assert!(!app.consumer_active().await);

        app.shutdown().await.unwrap();
        assert!(!app.is_running().await);
    }

    #[tokio::test]
    async fn test_handler_validates_and_dispatches() {
        let (app, publisher) = test_app().await;
        let handler = DispatchingEventHandler {
            dispatcher: app.dispatcher(),
            metrics: app.metrics_service().collector(),
        };

        assert!(handler
            .handle_event(InboundEnvelope::new(0, InboundEvent::GetProfile))
            .await
            .is_err());

        handler
            .handle_event(InboundEnvelope::new(5, InboundEvent::GetProfile))
            .await
            .unwrap();
        app.shutdown().await.unwrap();

        assert_eq!(
            publisher.replies(),
            vec![Reply::NotRegistered { user_id: 5 }]
        );
    }

    #[tokio::test]
    async fn test_handler_error_records_failed_consume() {
        let (app, _publisher) = test_app().await;
        let metrics = app.metrics_service().collector();
        let handler = DispatchingEventHandler {
            dispatcher: app.dispatcher(),
            metrics: metrics.clone(),
        };

        handler
            .handle_error(
                LanemateError::InvalidEvent {
                    reason: "bad json".to_string(),
                },
                b"{oops",
            )
            .await;

        let failures = metrics
            .service()
            .amqp_errors_total
            .with_label_values(&["consume"])
            .get();
        assert_eq!(failures, 1);
    }
}

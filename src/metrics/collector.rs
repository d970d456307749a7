//! Metrics collection using Prometheus
//!
//! This module provides metrics collection for the lanemate service using
//! Prometheus metrics.

use crate::types::{Field, FlowKind};
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the lanemate service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Dialogue session metrics
    conversation_metrics: ConversationMetrics,

    /// Profile store metrics
    profile_metrics: ProfileMetrics,

    /// Matchmaking query metrics
    matchmaking_metrics: MatchmakingMetrics,

    /// Performance metrics
    performance_metrics: PerformanceMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Total AMQP messages processed
    pub amqp_messages_total: IntCounterVec,

    /// AMQP message processing errors
    pub amqp_errors_total: IntCounterVec,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// Dialogue session metrics
#[derive(Clone)]
pub struct ConversationMetrics {
    /// Flows started
    pub sessions_started_total: IntCounterVec,

    /// Flows that reached their last step
    pub sessions_completed_total: IntCounterVec,

    /// Flows dropped before completion
    pub sessions_abandoned_total: IntCounterVec,

    /// Step inputs that failed validation
    pub validation_failures_total: IntCounterVec,

    /// Sessions currently in flight
    pub active_sessions: IntGauge,
}

/// Profile store metrics
#[derive(Clone)]
pub struct ProfileMetrics {
    /// Completed registrations
    pub registrations_total: IntCounterVec,

    /// Profiles deleted
    pub deletions_total: IntCounter,

    /// Mute/unmute changes
    pub notification_changes_total: IntCounterVec,

    /// Registered profiles
    pub profiles_total: IntGauge,

    /// Failed store operations
    pub storage_errors_total: IntCounterVec,
}

/// Matchmaking query metrics
#[derive(Clone)]
pub struct MatchmakingMetrics {
    /// Queries answered
    pub queries_total: IntCounter,

    /// Players returned per query
    pub query_results: Histogram,
}

/// Performance metrics
#[derive(Clone)]
pub struct PerformanceMetrics {
    /// Time to route one inbound event
    pub event_processing_duration: HistogramVec,

    /// Profile store call durations
    pub store_operation_duration: HistogramVec,

    /// AMQP operation durations
    pub amqp_operation_duration: HistogramVec,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let conversation_metrics = ConversationMetrics::new(&registry)?;
        let profile_metrics = ProfileMetrics::new(&registry)?;
        let matchmaking_metrics = MatchmakingMetrics::new(&registry)?;
        let performance_metrics = PerformanceMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            conversation_metrics,
            profile_metrics,
            matchmaking_metrics,
            performance_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Get service metrics
    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    /// Get dialogue session metrics
    pub fn conversation(&self) -> &ConversationMetrics {
        &self.conversation_metrics
    }

    /// Get profile metrics
    pub fn profile(&self) -> &ProfileMetrics {
        &self.profile_metrics
    }

    /// Get matchmaking metrics
    pub fn matchmaking(&self) -> &MatchmakingMetrics {
        &self.matchmaking_metrics
    }

    /// Get performance metrics
    pub fn performance(&self) -> &PerformanceMetrics {
        &self.performance_metrics
    }

    pub fn record_session_started(&self, flow: FlowKind) {
        self.conversation_metrics
            .sessions_started_total
            .with_label_values(&[flow.as_ref()])
            .inc();
    }

    pub fn record_session_completed(&self, flow: FlowKind) {
        self.conversation_metrics
            .sessions_completed_total
            .with_label_values(&[flow.as_ref()])
            .inc();
    }

    /// Record a flow dropped before completion (replaced, cancelled, idle, store_error)
    pub fn record_session_abandoned(&self, flow: FlowKind, reason: &str) {
        self.conversation_metrics
            .sessions_abandoned_total
            .with_label_values(&[flow.as_ref(), reason])
            .inc();
    }

    pub fn record_validation_failure(&self, field: Field) {
        self.conversation_metrics
            .validation_failures_total
            .with_label_values(&[field.as_ref()])
            .inc();
    }

    pub fn set_active_sessions(&self, count: usize) {
        self.conversation_metrics
            .active_sessions
            .set(count as i64);
    }

    /// Record a committed registration
    pub fn record_registration(&self, created: bool) {
        let outcome = if created { "created" } else { "updated" };
        self.profile_metrics
            .registrations_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn record_deletion(&self) {
        self.profile_metrics.deletions_total.inc();
    }

    pub fn record_notification_change(&self, enabled: bool) {
        let state = if enabled { "unmuted" } else { "muted" };
        self.profile_metrics
            .notification_changes_total
            .with_label_values(&[state])
            .inc();
    }

    pub fn set_profiles_total(&self, count: usize) {
        self.profile_metrics.profiles_total.set(count as i64);
    }

    pub fn record_storage_error(&self, operation: &str) {
        self.profile_metrics
            .storage_errors_total
            .with_label_values(&[operation])
            .inc();
    }

    /// Record a matchmaking query and the number of players it returned
    pub fn record_matchmaking_query(&self, results: usize) {
        self.matchmaking_metrics.queries_total.inc();
        self.matchmaking_metrics
            .query_results
            .observe(results as f64);
    }

    /// Record how long routing an inbound event took
    pub fn record_event_processed(&self, event: &str, duration: Duration) {
        self.performance_metrics
            .event_processing_duration
            .with_label_values(&[event])
            .observe(duration.as_secs_f64());
    }

    /// Record profile store call duration
    pub fn record_store_operation(&self, operation: &str, duration: Duration) {
        self.performance_metrics
            .store_operation_duration
            .with_label_values(&[operation])
            .observe(duration.as_secs_f64());
    }

    /// Record AMQP operation
    pub fn record_amqp_operation(&self, operation: &str, success: bool, duration: Duration) {
        let status = if success { "success" } else { "error" };

        self.service_metrics
            .amqp_messages_total
            .with_label_values(&[operation, status])
            .inc();

        if !success {
            self.service_metrics
                .amqp_errors_total
                .with_label_values(&[operation])
                .inc();
        }

        self.performance_metrics
            .amqp_operation_duration
            .with_label_values(&[operation, status])
            .observe(duration.as_secs_f64());
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    /// Update uptime gauge
    pub fn update_uptime(&self, uptime: Duration) {
        self.service_metrics
            .uptime_seconds
            .set(uptime.as_secs() as i64);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds = IntGauge::new("lanemate_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let amqp_messages_total = IntCounterVec::new(
            Opts::new(
                "lanemate_amqp_messages_total",
                "Total AMQP messages processed",
            ),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_messages_total.clone()))?;

        let amqp_errors_total = IntCounterVec::new(
            Opts::new("lanemate_amqp_errors_total", "Total AMQP errors"),
            &["operation"],
        )?;
        registry.register(Box::new(amqp_errors_total.clone()))?;

        let health_status = IntGauge::new(
            "lanemate_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("lanemate_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            amqp_messages_total,
            amqp_errors_total,
            health_status,
            component_health,
        })
    }
}

impl ConversationMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let sessions_started_total = IntCounterVec::new(
            Opts::new("lanemate_sessions_started_total", "Dialogue flows started"),
            &["flow"],
        )?;
        registry.register(Box::new(sessions_started_total.clone()))?;

        let sessions_completed_total = IntCounterVec::new(
            Opts::new(
                "lanemate_sessions_completed_total",
                "Dialogue flows completed",
            ),
            &["flow"],
        )?;
        registry.register(Box::new(sessions_completed_total.clone()))?;

        let sessions_abandoned_total = IntCounterVec::new(
            Opts::new(
                "lanemate_sessions_abandoned_total",
                "Dialogue flows dropped before completion",
            ),
            &["flow", "reason"],
        )?;
        registry.register(Box::new(sessions_abandoned_total.clone()))?;

        let validation_failures_total = IntCounterVec::new(
            Opts::new(
                "lanemate_validation_failures_total",
                "Step inputs rejected by validation",
            ),
            &["field"],
        )?;
        registry.register(Box::new(validation_failures_total.clone()))?;

        let active_sessions =
            IntGauge::new("lanemate_active_sessions", "Dialogue sessions in flight")?;
        registry.register(Box::new(active_sessions.clone()))?;

        Ok(Self {
            sessions_started_total,
            sessions_completed_total,
            sessions_abandoned_total,
            validation_failures_total,
            active_sessions,
        })
    }
}

impl ProfileMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let registrations_total = IntCounterVec::new(
            Opts::new("lanemate_registrations_total", "Completed registrations"),
            &["outcome"],
        )?;
        registry.register(Box::new(registrations_total.clone()))?;

        let deletions_total =
            IntCounter::new("lanemate_profile_deletions_total", "Profiles deleted")?;
        registry.register(Box::new(deletions_total.clone()))?;

        let notification_changes_total = IntCounterVec::new(
            Opts::new(
                "lanemate_notification_changes_total",
                "Notification preference changes",
            ),
            &["state"],
        )?;
        registry.register(Box::new(notification_changes_total.clone()))?;

        let profiles_total = IntGauge::new("lanemate_profiles_total", "Registered profiles")?;
        registry.register(Box::new(profiles_total.clone()))?;

        let storage_errors_total = IntCounterVec::new(
            Opts::new(
                "lanemate_storage_errors_total",
                "Failed profile store operations",
            ),
            &["operation"],
        )?;
        registry.register(Box::new(storage_errors_total.clone()))?;

        Ok(Self {
            registrations_total,
            deletions_total,
            notification_changes_total,
            profiles_total,
            storage_errors_total,
        })
    }
}

impl MatchmakingMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let queries_total =
            IntCounter::new("lanemate_matchmaking_queries_total", "Matchmaking queries")?;
        registry.register(Box::new(queries_total.clone()))?;

        let query_results = Histogram::with_opts(
            HistogramOpts::new(
                "lanemate_matchmaking_query_results",
                "Players returned per matchmaking query",
            )
            .buckets(vec![0.0, 1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0]),
        )?;
        registry.register(Box::new(query_results.clone()))?;

        Ok(Self {
            queries_total,
            query_results,
        })
    }
}

impl PerformanceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let event_processing_duration = HistogramVec::new(
            HistogramOpts::new(
                "lanemate_event_processing_duration_seconds",
                "Inbound event routing time",
            )
            .buckets(vec![0.0001, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            &["event"],
        )?;
        registry.register(Box::new(event_processing_duration.clone()))?;

        let store_operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "lanemate_store_operation_duration_seconds",
                "Profile store operation duration",
            )
            .buckets(vec![0.0001, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5]),
            &["operation"],
        )?;
        registry.register(Box::new(store_operation_duration.clone()))?;

        let amqp_operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "lanemate_amqp_operation_duration_seconds",
                "AMQP operation duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_operation_duration.clone()))?;

        Ok(Self {
            event_processing_duration,
            store_operation_duration,
            amqp_operation_duration,
        })
    }
}

//! Keyed worker pool
//!
//! Every user id maps to one shard. A shard is a single task draining a
//! bounded queue, so events for one user are routed strictly in submission
//! order while different shards run concurrently.

use crate::amqp::publisher::ReplyPublisher;
use crate::error::{LanemateError, Result};
use crate::router::SessionRouter;
use crate::types::{InboundEnvelope, Reply};
use crate::utils::shard_for;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

struct Job {
    envelope: InboundEnvelope,
    respond_to: Option<oneshot::Sender<Reply>>,
}

pub struct KeyedDispatcher {
    senders: Mutex<Vec<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shard_count: usize,
    processed: Arc<AtomicU64>,
}

impl KeyedDispatcher {
    /// Start `shard_count` workers, each buffering up to `queue_depth` events
    pub fn spawn(
        router: Arc<SessionRouter>,
        publisher: Arc<dyn ReplyPublisher>,
        shard_count: usize,
        queue_depth: usize,
    ) -> Self {
        let shard_count = shard_count.max(1);
        let processed = Arc::new(AtomicU64::new(0));
        let mut senders = Vec::with_capacity(shard_count);
        let mut workers = Vec::with_capacity(shard_count);

        for shard in 0..shard_count {
            let (tx, rx) = mpsc::channel(queue_depth.max(1));
            senders.push(tx);
            workers.push(tokio::spawn(run_worker(
                shard,
                rx,
                router.clone(),
                publisher.clone(),
                processed.clone(),
            )));
        }

        info!("Started {} dispatcher shards", shard_count);

        Self {
            senders: Mutex::new(senders),
            workers: Mutex::new(workers),
            shard_count,
            processed,
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    /// Events routed since start
    pub fn events_processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Queue an event; the reply is published by the worker
    pub async fn submit(&self, envelope: InboundEnvelope) -> Result<()> {
        self.enqueue(Job {
            envelope,
            respond_to: None,
        })
        .await
    }

    /// Queue an event and wait for its reply (also published)
    pub async fn dispatch(&self, envelope: InboundEnvelope) -> Result<Reply> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(Job {
            envelope,
            respond_to: Some(tx),
        })
        .await?;

        rx.await.map_err(|_| {
            LanemateError::InternalError {
                message: "Dispatcher worker dropped the reply".to_string(),
            }
            .into()
        })
    }

    async fn enqueue(&self, job: Job) -> Result<()> {
        let shard = shard_for(job.envelope.user_id, self.shard_count);
        let sender = self
            .senders
            .lock()
            .map_err(|_| LanemateError::InternalError {
                message: "Failed to acquire dispatcher lock".to_string(),
            })?
            .get(shard)
            .cloned()
            .ok_or_else(|| LanemateError::InternalError {
                message: "Dispatcher is shut down".to_string(),
            })?;

        sender.send(job).await.map_err(|_| {
            LanemateError::InternalError {
                message: format!("Dispatcher shard {} is closed", shard),
            }
            .into()
        })
    }

    /// Stop accepting events and wait for queued ones to drain
    pub async fn shutdown(&self) {
        let workers = match (self.senders.lock(), self.workers.lock()) {
            (Ok(mut senders), Ok(mut workers)) => {
                senders.clear();
                std::mem::take(&mut *workers)
            }
            _ => {
                error!("Dispatcher lock poisoned during shutdown");
                return;
            }
        };

        for worker in workers {
            if let Err(e) = worker.await {
                error!("Dispatcher worker ended abnormally: {}", e);
            }
        }
        info!(
            "Dispatcher stopped after {} events",
            self.events_processed()
        );
    }
}

async fn run_worker(
    shard: usize,
    mut rx: mpsc::Receiver<Job>,
    router: Arc<SessionRouter>,
    publisher: Arc<dyn ReplyPublisher>,
    processed: Arc<AtomicU64>,
) {
    debug!("Dispatcher shard {} started", shard);

    while let Some(job) = rx.recv().await {
        let reply = router.route(job.envelope).await;

        if let Err(e) = publisher.publish_reply(&reply).await {
            error!(
                "Failed to publish {} reply for user {}: {}",
                reply.kind(),
                reply.user_id(),
                e
            );
        }
        processed.fetch_add(1, Ordering::Relaxed);

        if let Some(respond_to) = job.respond_to {
            // The caller may have given up waiting
            let _ = respond_to.send(reply);
        }
    }

    debug!("Dispatcher shard {} drained", shard);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amqp::publisher::MockReplyPublisher;
    use crate::conversation::{ConversationEngine, FlowCatalog, InMemorySessionStore};
    use crate::membership::MembershipRegistry;
    use crate::metrics::MetricsCollector;
    use crate::store::{InMemoryProfileStore, ProfileStore};
    use crate::types::InboundEvent;
    use tokio_test::assert_ok;

    fn dispatcher(shards: usize) -> (KeyedDispatcher, Arc<MockReplyPublisher>) {
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let store: Arc<dyn ProfileStore> = Arc::new(InMemoryProfileStore::new());
        let engine = Arc::new(ConversationEngine::new(
            Arc::new(InMemorySessionStore::new()),
            store.clone(),
            FlowCatalog::default(),
            metrics.clone(),
        ));
        let publisher = Arc::new(MockReplyPublisher::new());
        let router = Arc::new(SessionRouter::new(
            engine,
            store,
            Arc::new(MembershipRegistry::new()),
            publisher.clone(),
            "team-search",
            metrics,
        ));
        (
            KeyedDispatcher::spawn(router, publisher.clone(), shards, 16),
            publisher,
        )
    }

    #[tokio::test]
    async fn test_dispatch_returns_and_publishes_reply() {
        let (dispatcher, publisher) = dispatcher(4);

        let reply = assert_ok!(
            dispatcher
                .dispatch(InboundEnvelope::new(12, InboundEvent::GetProfile))
                .await
        );
        assert_eq!(reply, Reply::NotRegistered { user_id: 12 });
        assert_eq!(publisher.replies(), vec![reply]);
        assert_eq!(dispatcher.events_processed(), 1);
    }

    #[tokio::test]
    async fn test_submit_preserves_per_user_order() {
        let (dispatcher, publisher) = dispatcher(3);

        let script = vec![
            InboundEvent::StartRegistration { handle: None },
            InboundEvent::ProvideText {
                text: "Ari".to_string(),
            },
            InboundEvent::ProvideChoice {
                choice: "Mid".to_string(),
            },
            InboundEvent::ProvideChoice {
                choice: "Support".to_string(),
            },
            InboundEvent::ProvideChoice {
                choice: "Elite".to_string(),
            },
        ];
        for event in script {
            assert_ok!(dispatcher.submit(InboundEnvelope::new(100, event)).await);
        }
        dispatcher.shutdown().await;

        let kinds: Vec<&str> = publisher
            .replies_for(100)
            .iter()
            .map(|r| r.kind())
            .collect();
        assert_eq!(
            kinds,
            vec!["prompt", "prompt", "prompt", "prompt", "registered"]
        );
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_fails() {
        let (dispatcher, _publisher) = dispatcher(2);
        dispatcher.shutdown().await;

        assert!(dispatcher
            .submit(InboundEnvelope::new(1, InboundEvent::ListChats))
            .await
            .is_err());
    }
}

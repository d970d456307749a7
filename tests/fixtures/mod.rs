//! Test fixtures and helpers for integration testing

#![allow(dead_code)]

use lanemate::amqp::publisher::MockReplyPublisher;
use lanemate::conversation::{ConversationEngine, FlowCatalog, InMemorySessionStore};
use lanemate::dispatch::KeyedDispatcher;
use lanemate::error::{LanemateError, Result};
use lanemate::membership::MembershipRegistry;
use lanemate::metrics::MetricsCollector;
use lanemate::router::SessionRouter;
use lanemate::store::{InMemoryProfileStore, ProfileStore};
use lanemate::types::{
    InboundEnvelope, InboundEvent, Lane, Player, ProfileDraft, Rank, Reply, UserId,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const TEAM_CHANNEL: &str = "team-search";

/// Router and dispatcher over a shared store and a recording publisher
pub struct TestSystem {
    pub router: Arc<SessionRouter>,
    pub dispatcher: KeyedDispatcher,
    pub store: Arc<dyn ProfileStore>,
    pub publisher: Arc<MockReplyPublisher>,
    pub metrics: Arc<MetricsCollector>,
}

impl TestSystem {
    /// Route one event directly, bypassing the dispatcher
    pub async fn send(&self, user_id: UserId, event: InboundEvent) -> Reply {
        self.router
            .route(InboundEnvelope::new(user_id, event))
            .await
    }

    /// Route a sequence of events and return the last reply
    pub async fn send_all(&self, user_id: UserId, events: Vec<InboundEvent>) -> Reply {
        let mut last = None;
        for event in events {
            last = Some(self.send(user_id, event).await);
        }
        last.expect("script must not be empty")
    }
}

/// Must be called from within a tokio runtime
pub fn create_test_system(store: Arc<dyn ProfileStore>) -> TestSystem {
    let metrics = Arc::new(MetricsCollector::new().expect("Failed to create collector"));
    let engine = Arc::new(ConversationEngine::new(
        Arc::new(InMemorySessionStore::new()),
        store.clone(),
        FlowCatalog::default(),
        metrics.clone(),
    ));
    let publisher = Arc::new(MockReplyPublisher::new());
    let router = Arc::new(SessionRouter::new(
        engine,
        store.clone(),
        Arc::new(MembershipRegistry::new()),
        publisher.clone(),
        TEAM_CHANNEL,
        metrics.clone(),
    ));
    let dispatcher = KeyedDispatcher::spawn(router.clone(), publisher.clone(), 4, 64);

    TestSystem {
        router,
        dispatcher,
        store,
        publisher,
        metrics,
    }
}

pub fn memory_system() -> TestSystem {
    create_test_system(Arc::new(InMemoryProfileStore::new()))
}

pub fn registration_script(
    nickname: &str,
    lane: &str,
    sublane: &str,
    rank: &str,
) -> Vec<InboundEvent> {
    vec![
        InboundEvent::StartRegistration { handle: None },
        InboundEvent::ProvideText {
            text: nickname.to_string(),
        },
        choice(lane),
        choice(sublane),
        choice(rank),
    ]
}

pub fn matchmaking_script(lane: &str, rank: &str) -> Vec<InboundEvent> {
    vec![
        InboundEvent::StartMatchmakingQuery,
        choice(lane),
        choice(rank),
    ]
}

pub fn choice(value: &str) -> InboundEvent {
    InboundEvent::ProvideChoice {
        choice: value.to_string(),
    }
}

pub fn draft(id: UserId, nickname: &str, lane: Lane, sublane: Lane, rank: Rank) -> ProfileDraft {
    ProfileDraft {
        id,
        handle: Some(format!("@{}", nickname.to_lowercase())),
        nickname: nickname.to_string(),
        lane,
        sublane,
        rank,
    }
}

/// In-memory store that can be switched into failing every call
#[derive(Default)]
pub struct FlakyProfileStore {
    inner: InMemoryProfileStore,
    failing: AtomicBool,
}

impl FlakyProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(LanemateError::storage("database is locked").into());
        }
        Ok(())
    }
}

impl ProfileStore for FlakyProfileStore {
    fn get(&self, id: UserId) -> Result<Option<Player>> {
        self.check()?;
        self.inner.get(id)
    }

    fn upsert(&self, draft: ProfileDraft) -> Result<Player> {
        self.check()?;
        self.inner.upsert(draft)
    }

    fn delete(&self, id: UserId) -> Result<bool> {
        self.check()?;
        self.inner.delete(id)
    }

    fn set_notifications(&self, id: UserId, enabled: bool) -> Result<bool> {
        self.check()?;
        self.inner.set_notifications(id, enabled)
    }

    fn query_by_lane_and_rank(&self, lane: Lane, rank: Rank) -> Result<Vec<Player>> {
        self.check()?;
        self.inner.query_by_lane_and_rank(lane, rank)
    }

    fn count(&self) -> Result<usize> {
        self.check()?;
        self.inner.count()
    }
}

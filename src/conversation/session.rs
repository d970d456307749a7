//! In-flight conversation sessions
//!
//! Sessions live in process memory only. A restart drops every unfinished
//! dialogue.

use crate::types::{Field, FieldValue, FlowKind, UserId};
use dashmap::DashMap;
use std::collections::HashMap;
use std::time::Instant;

/// Progress of one user through one flow
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationSession {
    pub user_id: UserId,
    pub flow: FlowKind,
    /// Zero-based index of the step awaiting input
    pub step: usize,
    pub collected: HashMap<Field, FieldValue>,
    /// Platform handle captured when the flow started
    pub handle: Option<String>,
    pub started_at: Instant,
    pub updated_at: Instant,
}

impl ConversationSession {
    pub fn new(user_id: UserId, flow: FlowKind, handle: Option<String>) -> Self {
        let now = Instant::now();
        Self {
            user_id,
            flow,
            step: 0,
            collected: HashMap::new(),
            handle,
            started_at: now,
            updated_at: now,
        }
    }

    /// Store a validated value and move to the next step
    pub fn record(&mut self, field: Field, value: FieldValue) {
        self.collected.insert(field, value);
        self.step += 1;
        self.updated_at = Instant::now();
    }
}

/// Per-user session map injected into the engine
pub trait SessionStore: Send + Sync {
    fn get(&self, user_id: UserId) -> Option<ConversationSession>;

    /// Insert or replace; returns the session that was replaced
    fn put(&self, session: ConversationSession) -> Option<ConversationSession>;

    fn remove(&self, user_id: UserId) -> Option<ConversationSession>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return sessions last updated before `cutoff`
    fn remove_idle_since(&self, cutoff: Instant) -> Vec<ConversationSession>;
}

/// Session store on a sharded concurrent map
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<UserId, ConversationSession>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn get(&self, user_id: UserId) -> Option<ConversationSession> {
        self.sessions.get(&user_id).map(|entry| entry.value().clone())
    }

    fn put(&self, session: ConversationSession) -> Option<ConversationSession> {
        self.sessions.insert(session.user_id, session)
    }

    fn remove(&self, user_id: UserId) -> Option<ConversationSession> {
        self.sessions.remove(&user_id).map(|(_, session)| session)
    }

    fn len(&self) -> usize {
        self.sessions.len()
    }

    fn remove_idle_since(&self, cutoff: Instant) -> Vec<ConversationSession> {
        let idle: Vec<UserId> = self
            .sessions
            .iter()
            .filter(|entry| entry.updated_at < cutoff)
            .map(|entry| *entry.key())
            .collect();

        // Re-check under the entry lock; the session may have moved on
        idle.into_iter()
            .filter_map(|user_id| {
                self.sessions
                    .remove_if(&user_id, |_, session| session.updated_at < cutoff)
                    .map(|(_, session)| session)
            })
            .collect()
    }
}

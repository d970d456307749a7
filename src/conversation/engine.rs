//! Conversation engine
//!
//! Drives one user's dialogue one step per inbound value. A session ends in
//! one of two ways: it completes (registration commits a profile, a
//! matchmaking query runs the search) or it is abandoned without any write.
//!
//! The engine holds no per-user locks. Callers must deliver events for the
//! same user one at a time; the keyed dispatcher does that in the service.

use super::flow::{FlowCatalog, Input};
use super::session::{ConversationSession, SessionStore};
use crate::error::LanemateError;
use crate::matchmaking::MatchmakingService;
use crate::metrics::MetricsCollector;
use crate::store::ProfileStore;
use crate::types::{Field, FieldValue, FlowKind, Lane, ProfileDraft, Rank, Reply, UserId};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub struct ConversationEngine {
    sessions: Arc<dyn SessionStore>,
    store: Arc<dyn ProfileStore>,
    matchmaking: MatchmakingService,
    flows: FlowCatalog,
    metrics: Arc<MetricsCollector>,
}

impl ConversationEngine {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        store: Arc<dyn ProfileStore>,
        flows: FlowCatalog,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let matchmaking = MatchmakingService::new(store.clone());
        Self {
            sessions,
            store,
            matchmaking,
            flows,
            metrics,
        }
    }

    /// Begin a flow at its first step, discarding any unfinished one
    pub fn start(&self, user_id: UserId, handle: Option<String>, flow: FlowKind) -> Reply {
        let replaced = self
            .sessions
            .put(ConversationSession::new(user_id, flow, handle))
            .map(|previous| {
                let conflict = LanemateError::SessionConflict {
                    user_id,
                    previous: previous.flow.to_string(),
                };
                warn!("{}; replacing it with {}", conflict, flow);
                self.metrics
                    .record_session_abandoned(previous.flow, "replaced");
                previous.flow
            });

        info!("User {} started {} flow", user_id, flow);
        self.metrics.record_session_started(flow);
        self.refresh_active_sessions();

        self.prompt_for(user_id, flow, 0, replaced)
    }

    /// Feed the current step one value
    pub fn provide(&self, user_id: UserId, input: Input) -> Reply {
        let Some(mut session) = self.sessions.get(user_id) else {
            return Reply::NoActiveConversation { user_id };
        };

        let definition = self.flows.get(session.flow);
        let Some(step) = definition.step(session.step) else {
            // Completed sessions are removed, so this only happens if the store is corrupt
            error!(
                "User {} session points past the end of the {} flow",
                user_id, session.flow
            );
            self.sessions.remove(user_id);
            self.refresh_active_sessions();
            return Reply::TransientFailure {
                user_id,
                reason: "conversation state was lost, please start again".to_string(),
            };
        };

        let value = match step.validate(&input) {
            Ok(value) => value,
            Err(validation) => {
                debug!("User {} input rejected: {}", user_id, validation);
                self.metrics.record_validation_failure(validation.field);
                return Reply::Rejected {
                    user_id,
                    flow: session.flow,
                    step: session.step,
                    reason: validation.reason,
                    prompt: step.prompt(),
                };
            }
        };

        session.record(step.field, value);

        if session.step < definition.len() {
            let (flow, next) = (session.flow, session.step);
            self.sessions.put(session);
            return self.prompt_for(user_id, flow, next, None);
        }

        // Last step; the session ends here whatever the outcome
        self.sessions.remove(user_id);
        self.refresh_active_sessions();
        self.complete(session)
    }

    /// Abandon the user's session, if any
    pub fn cancel(&self, user_id: UserId) -> Reply {
        match self.sessions.remove(user_id) {
            Some(session) => {
                info!("User {} cancelled {} flow", user_id, session.flow);
                self.metrics
                    .record_session_abandoned(session.flow, "cancelled");
                self.refresh_active_sessions();
                Reply::Cancelled {
                    user_id,
                    flow: session.flow,
                }
            }
            None => Reply::NoActiveConversation { user_id },
        }
    }

    pub fn has_session(&self, user_id: UserId) -> bool {
        self.sessions.get(user_id).is_some()
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Drop sessions that saw no input for longer than `max_idle`
    pub fn sweep_idle(&self, max_idle: Duration) -> usize {
        let Some(cutoff) = Instant::now().checked_sub(max_idle) else {
            return 0;
        };

        let dropped = self.sessions.remove_idle_since(cutoff);
        for session in &dropped {
            debug!(
                "Expired idle {} session for user {}",
                session.flow, session.user_id
            );
            self.metrics.record_session_abandoned(session.flow, "idle");
        }
        if !dropped.is_empty() {
            info!("Expired {} idle conversation sessions", dropped.len());
            self.refresh_active_sessions();
        }
        dropped.len()
    }

    fn prompt_for(
        &self,
        user_id: UserId,
        flow: FlowKind,
        step: usize,
        replaced: Option<FlowKind>,
    ) -> Reply {
        let definition = self.flows.get(flow);
        match definition.step(step) {
            Some(spec) => Reply::Prompt {
                user_id,
                flow,
                step,
                total_steps: definition.len(),
                prompt: spec.prompt(),
                replaced,
            },
            None => Reply::TransientFailure {
                user_id,
                reason: format!("{} flow has no step {}", flow, step),
            },
        }
    }

    fn complete(&self, session: ConversationSession) -> Reply {
        let user_id = session.user_id;
        let flow = session.flow;

        let outcome = match flow {
            FlowKind::Registration => self.commit_registration(session),
            FlowKind::MatchmakingQuery => self.run_matchmaking_query(session),
        };

        match outcome {
            Ok(reply) => {
                self.metrics.record_session_completed(flow);
                reply
            }
            Err(err) => {
                error!("Failed to complete {} flow for user {}: {:#}", flow, user_id, err);
                self.metrics.record_session_abandoned(flow, "store_error");
                Reply::TransientFailure {
                    user_id,
                    reason: "profile storage is temporarily unavailable, please try again"
                        .to_string(),
                }
            }
        }
    }

    fn commit_registration(&self, session: ConversationSession) -> crate::error::Result<Reply> {
        let draft = ProfileDraft {
            id: session.user_id,
            nickname: collected_text(&session, Field::Nickname)?,
            lane: collected_lane(&session, Field::Lane)?,
            sublane: collected_lane(&session, Field::Sublane)?,
            rank: collected_rank(&session, Field::Rank)?,
            handle: session.handle,
        };

        let timer = self.metrics.start_timer();
        let existing = self.store.get(draft.id).inspect_err(|_| {
            self.metrics.record_storage_error("get");
        })?;
        self.metrics.record_store_operation("get", timer.stop());

        let timer = self.metrics.start_timer();
        let player = self.store.upsert(draft).inspect_err(|_| {
            self.metrics.record_storage_error("upsert");
        })?;
        self.metrics.record_store_operation("upsert", timer.stop());

        let created = existing.is_none();
        self.metrics.record_registration(created);
        info!(
            "User {} {} profile {} ({} / {} / {})",
            player.id,
            if created { "created" } else { "updated" },
            player.nickname,
            player.lane,
            player.sublane,
            player.rank
        );

        Ok(Reply::Registered {
            user_id: player.id,
            created,
            player,
        })
    }

    fn run_matchmaking_query(&self, session: ConversationSession) -> crate::error::Result<Reply> {
        let lane = collected_lane(&session, Field::DesiredLane)?;
        let rank = collected_rank(&session, Field::DesiredRank)?;

        let timer = self.metrics.start_timer();
        let players = self.matchmaking.find(lane, rank).inspect_err(|_| {
            self.metrics.record_storage_error("query_by_lane_and_rank");
        })?;
        self.metrics
            .record_store_operation("query_by_lane_and_rank", timer.stop());
        self.metrics.record_matchmaking_query(players.len());

        Ok(Reply::Matches {
            user_id: session.user_id,
            lane,
            rank,
            players,
        })
    }

    fn refresh_active_sessions(&self) {
        self.metrics.set_active_sessions(self.sessions.len());
    }
}

fn missing(session: &ConversationSession, field: Field) -> LanemateError {
    LanemateError::InternalError {
        message: format!(
            "{} session for user {} has no usable {}",
            session.flow, session.user_id, field
        ),
    }
}

fn collected_text(session: &ConversationSession, field: Field) -> crate::error::Result<String> {
    match session.collected.get(&field) {
        Some(FieldValue::Text(text)) => Ok(text.clone()),
        _ => Err(missing(session, field).into()),
    }
}

fn collected_lane(session: &ConversationSession, field: Field) -> crate::error::Result<Lane> {
    match session.collected.get(&field) {
        Some(FieldValue::Lane(lane)) => Ok(*lane),
        _ => Err(missing(session, field).into()),
    }
}

fn collected_rank(session: &ConversationSession, field: Field) -> crate::error::Result<Rank> {
    match session.collected.get(&field) {
        Some(FieldValue::Rank(rank)) => Ok(*rank),
        _ => Err(missing(session, field).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::session::InMemorySessionStore;
    use crate::store::{InMemoryProfileStore, MockProfileStore};
    use crate::types::{InputKind, Player};

    fn engine_with(store: Arc<dyn ProfileStore>) -> ConversationEngine {
        ConversationEngine::new(
            Arc::new(InMemorySessionStore::new()),
            store,
            FlowCatalog::new(32),
            Arc::new(MetricsCollector::new().unwrap()),
        )
    }

    fn text(value: &str) -> Input {
        Input::Text(value.to_string())
    }

    fn choice(value: &str) -> Input {
        Input::Choice(value.to_string())
    }

    fn register(
        engine: &ConversationEngine,
        user_id: UserId,
        nickname: &str,
        lane: &str,
        sublane: &str,
        rank: &str,
    ) -> Reply {
        engine.start(user_id, Some(format!("u{}", user_id)), FlowKind::Registration);
        engine.provide(user_id, text(nickname));
        engine.provide(user_id, choice(lane));
        engine.provide(user_id, choice(sublane));
        engine.provide(user_id, choice(rank))
    }

    #[test]
    fn test_registration_walkthrough() {
        let store = Arc::new(InMemoryProfileStore::new());
        let engine = engine_with(store.clone());

        match engine.start(100, Some("ari".to_string()), FlowKind::Registration) {
            Reply::Prompt {
                step,
                total_steps,
                prompt,
                replaced,
                ..
            } => {
                assert_eq!(step, 0);
                assert_eq!(total_steps, 4);
                assert_eq!(prompt.field, Field::Nickname);
                assert_eq!(prompt.input, InputKind::FreeText);
                assert_eq!(replaced, None);
            }
            other => panic!("unexpected reply: {:?}", other),
        }

        match engine.provide(100, text("Ari")) {
            Reply::Prompt { step, prompt, .. } => {
                assert_eq!(step, 1);
                assert_eq!(prompt.field, Field::Lane);
                assert_eq!(prompt.choices, Lane::tokens());
            }
            other => panic!("unexpected reply: {:?}", other),
        }
        engine.provide(100, choice("Mid"));
        engine.provide(100, choice("Support"));

        match engine.provide(100, choice("Elite")) {
            Reply::Registered {
                user_id,
                created,
                player,
            } => {
                assert_eq!(user_id, 100);
                assert!(created);
                assert_eq!(
                    player,
                    Player {
                        id: 100,
                        handle: Some("ari".to_string()),
                        nickname: "Ari".to_string(),
                        lane: Lane::Mid,
                        sublane: Lane::Support,
                        rank: Rank::Elite,
                        notifications_enabled: true,
                    }
                );
            }
            other => panic!("unexpected reply: {:?}", other),
        }

        assert!(!engine.has_session(100));
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_reregistration_reports_update_and_keeps_mute() {
        let store = Arc::new(InMemoryProfileStore::new());
        let engine = engine_with(store.clone());

        register(&engine, 100, "Ari", "Mid", "Support", "Elite");
        store.set_notifications(100, false).unwrap();

        match register(&engine, 100, "Ari", "Top", "Support", "Elite") {
            Reply::Registered {
                created, player, ..
            } => {
                assert!(!created);
                assert_eq!(player.lane, Lane::Top);
                assert!(!player.notifications_enabled);
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[test]
    fn test_wrong_input_kind_does_not_advance() {
        let engine = engine_with(Arc::new(InMemoryProfileStore::new()));
        engine.start(1, None, FlowKind::Registration);

        match engine.provide(1, choice("Top")) {
            Reply::Rejected { step, prompt, .. } => {
                assert_eq!(step, 0);
                assert_eq!(prompt.field, Field::Nickname);
            }
            other => panic!("unexpected reply: {:?}", other),
        }

        // Still on nickname; a valid nickname now moves to lane
        match engine.provide(1, text("Nick")) {
            Reply::Prompt { step, .. } => assert_eq!(step, 1),
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_choice_leaves_collected_untouched() {
        let sessions = Arc::new(InMemorySessionStore::new());
        let engine = ConversationEngine::new(
            sessions.clone(),
            Arc::new(InMemoryProfileStore::new()),
            FlowCatalog::new(32),
            Arc::new(MetricsCollector::new().unwrap()),
        );
        engine.start(1, None, FlowKind::Registration);
        engine.provide(1, text("Nick"));
        let before = sessions.get(1).unwrap();

        assert!(matches!(
            engine.provide(1, choice("Carry")),
            Reply::Rejected { step: 1, .. }
        ));

        let after = sessions.get(1).unwrap();
        assert_eq!(after.step, before.step);
        assert_eq!(after.collected, before.collected);
    }

    #[test]
    fn test_restart_replaces_session() {
        let engine = engine_with(Arc::new(InMemoryProfileStore::new()));
        engine.start(1, None, FlowKind::Registration);
        engine.provide(1, text("Nick"));

        match engine.start(1, None, FlowKind::MatchmakingQuery) {
            Reply::Prompt {
                flow,
                step,
                replaced,
                ..
            } => {
                assert_eq!(flow, FlowKind::MatchmakingQuery);
                assert_eq!(step, 0);
                assert_eq!(replaced, Some(FlowKind::Registration));
            }
            other => panic!("unexpected reply: {:?}", other),
        }
        assert_eq!(engine.active_sessions(), 1);
    }

    #[test]
    fn test_matchmaking_query_returns_matches() {
        let store = Arc::new(InMemoryProfileStore::new());
        let engine = engine_with(store.clone());
        register(&engine, 1, "A", "Support", "Mid", "Mythic");
        register(&engine, 2, "B", "Support", "Top", "Mythic");
        register(&engine, 3, "C", "Support", "Top", "Legend");

        engine.start(9, None, FlowKind::MatchmakingQuery);
        engine.provide(9, choice("support"));
        match engine.provide(9, choice("MYTHIC")) {
            Reply::Matches {
                lane,
                rank,
                players,
                ..
            } => {
                assert_eq!(lane, Lane::Support);
                assert_eq!(rank, Rank::Mythic);
                let ids: Vec<UserId> = players.iter().map(|p| p.id).collect();
                assert_eq!(ids, vec![1, 2]);
            }
            other => panic!("unexpected reply: {:?}", other),
        }
        assert_eq!(store.count().unwrap(), 3);
    }

    #[test]
    fn test_store_failure_yields_transient_failure_and_drops_session() {
        let mut store = MockProfileStore::new();
        store.expect_get().returning(|_| Ok(None));
        store
            .expect_upsert()
            .returning(|_| Err(LanemateError::storage("database is locked").into()));

        let engine = engine_with(Arc::new(store));
        let reply = register(&engine, 5, "Ari", "Mid", "Top", "Epic");

        assert!(matches!(reply, Reply::TransientFailure { user_id: 5, .. }));
        assert!(!engine.has_session(5));
    }

    #[test]
    fn test_existence_check_runs_before_upsert() {
        let mut seq = mockall::Sequence::new();
        let mut store = MockProfileStore::new();
        store
            .expect_get()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(None));
        store
            .expect_upsert()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|draft| Ok(draft.into_new_player()));

        let engine = engine_with(Arc::new(store));
        assert!(matches!(
            register(&engine, 6, "Bo", "Bot", "Support", "Master"),
            Reply::Registered { created: true, .. }
        ));
    }

    #[test]
    fn test_cancel_and_provide_without_session() {
        let engine = engine_with(Arc::new(InMemoryProfileStore::new()));

        assert_eq!(
            engine.cancel(3),
            Reply::NoActiveConversation { user_id: 3 }
        );
        assert_eq!(
            engine.provide(3, text("hello")),
            Reply::NoActiveConversation { user_id: 3 }
        );

        engine.start(3, None, FlowKind::MatchmakingQuery);
        assert_eq!(
            engine.cancel(3),
            Reply::Cancelled {
                user_id: 3,
                flow: FlowKind::MatchmakingQuery
            }
        );
        assert!(!engine.has_session(3));
    }

    #[test]
    fn test_sweep_idle_expires_sessions() {
        let engine = engine_with(Arc::new(InMemoryProfileStore::new()));
        engine.start(1, None, FlowKind::Registration);
        engine.start(2, None, FlowKind::MatchmakingQuery);

        assert_eq!(engine.sweep_idle(Duration::from_secs(3600)), 0);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(engine.sweep_idle(Duration::ZERO), 2);
        assert_eq!(engine.active_sessions(), 0);
    }
}

//! Inbound event routing
//!
//! Dialogue events go to the conversation engine. Profile commands, team
//! requests and membership changes are answered directly and never touch an
//! active dialogue.

use crate::amqp::publisher::ReplyPublisher;
use crate::conversation::{ConversationEngine, Input};
use crate::membership::MembershipRegistry;
use crate::metrics::MetricsCollector;
use crate::store::ProfileStore;
use crate::types::{FlowKind, InboundEnvelope, InboundEvent, Reply, TeamBroadcast, UserId};
use std::sync::Arc;
use tracing::{debug, error, info};

const STORAGE_UNAVAILABLE: &str = "profile storage is temporarily unavailable, please try again";

pub struct SessionRouter {
    engine: Arc<ConversationEngine>,
    store: Arc<dyn ProfileStore>,
    membership: Arc<MembershipRegistry>,
    publisher: Arc<dyn ReplyPublisher>,
    team_channel: String,
    metrics: Arc<MetricsCollector>,
}

impl SessionRouter {
    pub fn new(
        engine: Arc<ConversationEngine>,
        store: Arc<dyn ProfileStore>,
        membership: Arc<MembershipRegistry>,
        publisher: Arc<dyn ReplyPublisher>,
        team_channel: impl Into<String>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            engine,
            store,
            membership,
            publisher,
            team_channel: team_channel.into(),
            metrics,
        }
    }

    pub fn engine(&self) -> &Arc<ConversationEngine> {
        &self.engine
    }

    pub fn membership(&self) -> &Arc<MembershipRegistry> {
        &self.membership
    }

    /// Turn one inbound event into exactly one reply
    pub async fn route(&self, envelope: InboundEnvelope) -> Reply {
        let timer = self.metrics.start_timer();
        let event_name = envelope.event.name();
        let user_id = envelope.user_id;

        let reply = match envelope.event {
            InboundEvent::StartRegistration { handle } => {
                self.engine.start(user_id, handle, FlowKind::Registration)
            }
            InboundEvent::StartMatchmakingQuery => {
                self.engine.start(user_id, None, FlowKind::MatchmakingQuery)
            }
            InboundEvent::ProvideText { text } => self.forward(user_id, Input::Text(text)),
            InboundEvent::ProvideChoice { choice } => {
                self.forward(user_id, Input::Choice(choice))
            }
            InboundEvent::Cancel => self.engine.cancel(user_id),
            InboundEvent::Unregister => self.unregister(user_id),
            InboundEvent::SetNotifications { enabled } => {
                self.set_notifications(user_id, enabled)
            }
            InboundEvent::GetProfile => self.get_profile(user_id),
            InboundEvent::RequestTeam => self.request_team(user_id).await,
            InboundEvent::MembershipChanged {
                chat_id,
                chat_kind,
                is_member,
            } => {
                self.membership.apply(chat_kind, chat_id, is_member);
                Reply::MembershipUpdated {
                    user_id,
                    chat_id,
                    chat_kind,
                    is_member,
                }
            }
            InboundEvent::ListChats => Reply::Chats {
                user_id,
                chats: self.membership.snapshot(),
            },
        };

        debug!(
            "Routed {} for user {} -> {}",
            event_name,
            user_id,
            reply.kind()
        );
        self.metrics.record_event_processed(event_name, timer.stop());
        reply
    }

    /// Free input outside a dialogue is ignored
    fn forward(&self, user_id: UserId, input: Input) -> Reply {
        if self.engine.has_session(user_id) {
            self.engine.provide(user_id, input)
        } else {
            Reply::NoActiveConversation { user_id }
        }
    }

    fn unregister(&self, user_id: UserId) -> Reply {
        match self.timed(user_id, "delete", || self.store.delete(user_id)) {
            Ok(true) => {
                info!("User {} deleted their profile", user_id);
                self.metrics.record_deletion();
                Reply::Deleted { user_id }
            }
            Ok(false) => Reply::NotRegistered { user_id },
            Err(reply) => reply,
        }
    }

    fn set_notifications(&self, user_id: UserId, enabled: bool) -> Reply {
        match self.timed(user_id, "set_notifications", || {
            self.store.set_notifications(user_id, enabled)
        }) {
            Ok(true) => {
                info!(
                    "User {} turned notifications {}",
                    user_id,
                    if enabled { "on" } else { "off" }
                );
                self.metrics.record_notification_change(enabled);
                Reply::NotificationsUpdated { user_id, enabled }
            }
            Ok(false) => Reply::NotRegistered { user_id },
            Err(reply) => reply,
        }
    }

    fn get_profile(&self, user_id: UserId) -> Reply {
        match self.timed(user_id, "get", || self.store.get(user_id)) {
            Ok(Some(player)) => Reply::Profile { user_id, player },
            Ok(None) => Reply::NotRegistered { user_id },
            Err(reply) => reply,
        }
    }

    async fn request_team(&self, user_id: UserId) -> Reply {
        let player = match self.timed(user_id, "get", || self.store.get(user_id)) {
            Ok(Some(player)) => player,
            Ok(None) => return Reply::NotRegistered { user_id },
            Err(reply) => return reply,
        };

        let broadcast = TeamBroadcast {
            channel_hint: self.team_channel.clone(),
            player,
            timestamp: crate::utils::current_timestamp(),
        };

        match self.publisher.publish_team_broadcast(broadcast).await {
            Ok(()) => {
                info!("User {} posted a team request to {}", user_id, self.team_channel);
                Reply::TeamRequestPosted {
                    user_id,
                    channel_hint: self.team_channel.clone(),
                }
            }
            Err(e) => {
                error!("Failed to publish team request for user {}: {}", user_id, e);
                Reply::TransientFailure {
                    user_id,
                    reason: "could not post the team request, please try again".to_string(),
                }
            }
        }
    }

    /// Run a store call, timing it; a failure becomes the reply to send
    fn timed<T>(
        &self,
        user_id: UserId,
        operation: &'static str,
        call: impl FnOnce() -> crate::error::Result<T>,
    ) -> Result<T, Reply> {
        let timer = self.metrics.start_timer();
        let result = call();
        self.metrics.record_store_operation(operation, timer.stop());

        result.map_err(|e| {
            error!("Profile store {} failed for user {}: {:#}", operation, user_id, e);
            self.metrics.record_storage_error(operation);
            Reply::TransientFailure {
                user_id,
                reason: STORAGE_UNAVAILABLE.to_string(),
            }
        })
    }
}

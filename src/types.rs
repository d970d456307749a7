//! Common types used throughout the lanemate service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

/// Chat platform identity of a user
pub type UserId = i64;

/// Chat platform identity of a private chat, group or channel
pub type ChatId = i64;

/// Primary (and secondary) role a player plays
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[strum(ascii_case_insensitive)]
pub enum Lane {
    Top,
    Jungle,
    Mid,
    Bot,
    Support,
}

/// Competitive tier label, lowest first
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[strum(ascii_case_insensitive)]
pub enum Rank {
    Warrior,
    Elite,
    Master,
    Grandmaster,
    Epic,
    Legend,
    Mythic,
}

impl Lane {
    /// Choice tokens in keyboard order
    pub fn tokens() -> Vec<String> {
        Lane::iter().map(|lane| lane.to_string()).collect()
    }
}

impl Rank {
    /// Choice tokens in keyboard order
    pub fn tokens() -> Vec<String> {
        Rank::iter().map(|rank| rank.to_string()).collect()
    }
}

/// A stored player profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: UserId,
    pub handle: Option<String>,
    pub nickname: String,
    pub lane: Lane,
    pub sublane: Lane,
    pub rank: Rank,
    pub notifications_enabled: bool,
}

/// Upsert input for the profile store.
///
/// Carries no notification preference, so writing a draft can never reset it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileDraft {
    pub id: UserId,
    pub handle: Option<String>,
    pub nickname: String,
    pub lane: Lane,
    pub sublane: Lane,
    pub rank: Rank,
}

impl ProfileDraft {
    /// The profile a fresh insert of this draft produces
    pub fn into_new_player(self) -> Player {
        Player {
            id: self.id,
            handle: self.handle,
            nickname: self.nickname,
            lane: self.lane,
            sublane: self.sublane,
            rank: self.rank,
            notifications_enabled: true,
        }
    }
}

/// Which dialogue a conversation session is running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FlowKind {
    Registration,
    MatchmakingQuery,
}

/// Named slot a dialogue step writes into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Field {
    Nickname,
    Lane,
    Sublane,
    Rank,
    DesiredLane,
    DesiredRank,
}

/// A validated value collected by a dialogue step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Lane(Lane),
    Rank(Rank),
}

/// Shape of input a dialogue step expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InputKind {
    FreeText,
    Choice,
}

/// What the transport should ask the user for next
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub field: Field,
    pub input: InputKind,
    /// Selectable tokens for choice steps, empty for free text
    pub choices: Vec<String>,
}

/// Kind of chat the bot can be a member of
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChatKind {
    Private,
    Group,
    Channel,
}

/// Ids of every chat the bot currently belongs to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatsSnapshot {
    pub private: Vec<ChatId>,
    pub groups: Vec<ChatId>,
    pub channels: Vec<ChatId>,
}

/// Inbound events published by the chat gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InboundEvent {
    StartRegistration {
        #[serde(default)]
        handle: Option<String>,
    },
    StartMatchmakingQuery,
    ProvideText {
        text: String,
    },
    ProvideChoice {
        choice: String,
    },
    Cancel,
    Unregister,
    SetNotifications {
        enabled: bool,
    },
    GetProfile,
    RequestTeam,
    MembershipChanged {
        chat_id: ChatId,
        chat_kind: ChatKind,
        is_member: bool,
    },
    ListChats,
}

impl InboundEvent {
    /// Short label used in logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            InboundEvent::StartRegistration { .. } => "start_registration",
            InboundEvent::StartMatchmakingQuery => "start_matchmaking_query",
            InboundEvent::ProvideText { .. } => "provide_text",
            InboundEvent::ProvideChoice { .. } => "provide_choice",
            InboundEvent::Cancel => "cancel",
            InboundEvent::Unregister => "unregister",
            InboundEvent::SetNotifications { .. } => "set_notifications",
            InboundEvent::GetProfile => "get_profile",
            InboundEvent::RequestTeam => "request_team",
            InboundEvent::MembershipChanged { .. } => "membership_changed",
            InboundEvent::ListChats => "list_chats",
        }
    }
}

/// An inbound event together with the user it came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEnvelope {
    pub user_id: UserId,
    pub event: InboundEvent,
    pub timestamp: DateTime<Utc>,
}

impl InboundEnvelope {
    pub fn new(user_id: UserId, event: InboundEvent) -> Self {
        Self {
            user_id,
            event,
            timestamp: Utc::now(),
        }
    }
}

/// Message posted to the team channel when a player looks for a team
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamBroadcast {
    pub channel_hint: String,
    pub player: Player,
    pub timestamp: DateTime<Utc>,
}

/// Structured outbound result; the gateway renders it for the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Reply {
    Prompt {
        user_id: UserId,
        flow: FlowKind,
        step: usize,
        total_steps: usize,
        prompt: Prompt,
        /// Set when starting this flow discarded an unfinished one
        replaced: Option<FlowKind>,
    },
    Rejected {
        user_id: UserId,
        flow: FlowKind,
        step: usize,
        reason: String,
        prompt: Prompt,
    },
    Registered {
        user_id: UserId,
        created: bool,
        player: Player,
    },
    Matches {
        user_id: UserId,
        lane: Lane,
        rank: Rank,
        players: Vec<Player>,
    },
    Cancelled {
        user_id: UserId,
        flow: FlowKind,
    },
    NoActiveConversation {
        user_id: UserId,
    },
    Deleted {
        user_id: UserId,
    },
    NotificationsUpdated {
        user_id: UserId,
        enabled: bool,
    },
    Profile {
        user_id: UserId,
        player: Player,
    },
    NotRegistered {
        user_id: UserId,
    },
    TeamRequestPosted {
        user_id: UserId,
        channel_hint: String,
    },
    MembershipUpdated {
        user_id: UserId,
        chat_id: ChatId,
        chat_kind: ChatKind,
        is_member: bool,
    },
    Chats {
        user_id: UserId,
        chats: ChatsSnapshot,
    },
    TransientFailure {
        user_id: UserId,
        reason: String,
    },
}

impl Reply {
    /// Snake-case label, used for routing keys and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Reply::Prompt { .. } => "prompt",
            Reply::Rejected { .. } => "rejected",
            Reply::Registered { .. } => "registered",
            Reply::Matches { .. } => "matches",
            Reply::Cancelled { .. } => "cancelled",
            Reply::NoActiveConversation { .. } => "no_active_conversation",
            Reply::Deleted { .. } => "deleted",
            Reply::NotificationsUpdated { .. } => "notifications_updated",
            Reply::Profile { .. } => "profile",
            Reply::NotRegistered { .. } => "not_registered",
            Reply::TeamRequestPosted { .. } => "team_request_posted",
            Reply::MembershipUpdated { .. } => "membership_updated",
            Reply::Chats { .. } => "chats",
            Reply::TransientFailure { .. } => "transient_failure",
        }
    }

    /// The user this reply is addressed to
    pub fn user_id(&self) -> UserId {
        match self {
            Reply::Prompt { user_id, .. }
            | Reply::Rejected { user_id, .. }
            | Reply::Registered { user_id, .. }
            | Reply::Matches { user_id, .. }
            | Reply::Cancelled { user_id, .. }
            | Reply::NoActiveConversation { user_id }
            | Reply::Deleted { user_id }
            | Reply::NotificationsUpdated { user_id, .. }
            | Reply::Profile { user_id, .. }
            | Reply::NotRegistered { user_id }
            | Reply::TeamRequestPosted { user_id, .. }
            | Reply::MembershipUpdated { user_id, .. }
            | Reply::Chats { user_id, .. }
            | Reply::TransientFailure { user_id, .. } => *user_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_lane_and_rank_parse_case_insensitively() {
        assert_eq!(Lane::from_str("support").unwrap(), Lane::Support);
        assert_eq!(Lane::from_str("MID").unwrap(), Lane::Mid);
        assert_eq!(Rank::from_str("grandmaster").unwrap(), Rank::Grandmaster);
        assert!(Lane::from_str("Carry").is_err());
        assert!(Rank::from_str("Main").is_err());
    }

    #[test]
    fn test_choice_tokens_follow_keyboard_order() {
        assert_eq!(Lane::tokens(), vec!["Top", "Jungle", "Mid", "Bot", "Support"]);
        assert_eq!(Rank::tokens().first().map(String::as_str), Some("Warrior"));
        assert_eq!(Rank::tokens().last().map(String::as_str), Some("Mythic"));
    }

    #[test]
    fn test_inbound_event_wire_format() {
        let json = r#"{"user_id":42,"event":{"type":"ProvideChoice","choice":"Top"},"timestamp":"2024-05-01T10:00:00Z"}"#;
        let envelope: InboundEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.user_id, 42);
        assert_eq!(
            envelope.event,
            InboundEvent::ProvideChoice {
                choice: "Top".to_string()
            }
        );

        let json = r#"{"user_id":7,"event":{"type":"StartRegistration"},"timestamp":"2024-05-01T10:00:00Z"}"#;
        let envelope: InboundEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.event, InboundEvent::StartRegistration { handle: None });
    }

    #[test]
    fn test_reply_kind_and_user() {
        let reply = Reply::NotRegistered { user_id: 9 };
        assert_eq!(reply.kind(), "not_registered");
        assert_eq!(reply.user_id(), 9);

        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["type"], "NotRegistered");
    }

    #[test]
    fn test_new_player_from_draft_has_notifications_on() {
        let draft = ProfileDraft {
            id: 1,
            handle: Some("ari".to_string()),
            nickname: "Ari".to_string(),
            lane: Lane::Mid,
            sublane: Lane::Support,
            rank: Rank::Elite,
        };
        let player = draft.into_new_player();
        assert!(player.notifications_enabled);
        assert_eq!(player.lane, Lane::Mid);
    }
}

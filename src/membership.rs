//! Chats the bot currently belongs to
//!
//! The gateway reports join/leave events; the registry keeps one id set per
//! chat kind for broadcast targeting. State is in memory only.

use crate::types::{ChatId, ChatKind, ChatsSnapshot};
use dashmap::DashSet;
use tracing::debug;

#[derive(Debug, Default)]
pub struct MembershipRegistry {
    private: DashSet<ChatId>,
    groups: DashSet<ChatId>,
    channels: DashSet<ChatId>,
}

impl MembershipRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn set_for(&self, kind: ChatKind) -> &DashSet<ChatId> {
        match kind {
            ChatKind::Private => &self.private,
            ChatKind::Group => &self.groups,
            ChatKind::Channel => &self.channels,
        }
    }

    /// Returns `true` if the chat was not already tracked
    pub fn add(&self, kind: ChatKind, chat_id: ChatId) -> bool {
        let added = self.set_for(kind).insert(chat_id);
        if added {
            debug!("Tracking {} chat {}", kind, chat_id);
        }
        added
    }

    /// Returns `true` if the chat was tracked
    pub fn remove(&self, kind: ChatKind, chat_id: ChatId) -> bool {
        let removed = self.set_for(kind).remove(&chat_id).is_some();
        if removed {
            debug!("Stopped tracking {} chat {}", kind, chat_id);
        }
        removed
    }

    /// Apply a membership change
    pub fn apply(&self, kind: ChatKind, chat_id: ChatId, is_member: bool) -> bool {
        if is_member {
            self.add(kind, chat_id)
        } else {
            self.remove(kind, chat_id)
        }
    }

    /// Sorted ids of one chat kind
    pub fn list(&self, kind: ChatKind) -> Vec<ChatId> {
        let mut ids: Vec<ChatId> = self.set_for(kind).iter().map(|id| *id).collect();
        ids.sort_unstable();
        ids
    }

    pub fn snapshot(&self) -> ChatsSnapshot {
        ChatsSnapshot {
            private: self.list(ChatKind::Private),
            groups: self.list(ChatKind::Group),
            channels: self.list(ChatKind::Channel),
        }
    }

    pub fn total(&self) -> usize {
        self.private.len() + self.groups.len() + self.channels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_remove_is_idempotent() {
        let registry = MembershipRegistry::new();
        assert!(registry.add(ChatKind::Group, -100));
        assert!(!registry.add(ChatKind::Group, -100));
        assert_eq!(registry.total(), 1);

        assert!(registry.remove(ChatKind::Group, -100));
        assert!(!registry.remove(ChatKind::Group, -100));
        assert_eq!(registry.total(), 0);
    }

    #[test]
    fn test_kinds_are_tracked_separately() {
        let registry = MembershipRegistry::new();
        registry.apply(ChatKind::Private, 42, true);
        registry.apply(ChatKind::Channel, -1009, true);
        registry.apply(ChatKind::Group, -5, true);
        registry.apply(ChatKind::Group, -3, true);
        registry.apply(ChatKind::Private, 42, false);

        let snapshot = registry.snapshot();
        assert!(snapshot.private.is_empty());
        assert_eq!(snapshot.groups, vec![-5, -3]);
        assert_eq!(snapshot.channels, vec![-1009]);
    }
}

//! In-memory profile store

use super::ProfileStore;
use crate::types::{Lane, Player, ProfileDraft, Rank, UserId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Profile store backed by a concurrent map; contents are lost on restart
#[derive(Debug, Default)]
pub struct InMemoryProfileStore {
    players: DashMap<UserId, Player>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with existing profiles (for testing)
    pub fn with_players(players: impl IntoIterator<Item = Player>) -> Self {
        let store = Self::new();
        for player in players {
            store.players.insert(player.id, player);
        }
        store
    }
}

impl ProfileStore for InMemoryProfileStore {
    fn get(&self, id: UserId) -> crate::error::Result<Option<Player>> {
        Ok(self.players.get(&id).map(|entry| entry.value().clone()))
    }

    fn upsert(&self, draft: ProfileDraft) -> crate::error::Result<Player> {
        // The entry guard holds the shard lock, so read-modify-write is atomic
        let player = match self.players.entry(draft.id) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get_mut();
                current.handle = draft.handle;
                current.nickname = draft.nickname;
                current.lane = draft.lane;
                current.sublane = draft.sublane;
                current.rank = draft.rank;
                current.clone()
            }
            Entry::Vacant(vacant) => vacant.insert(draft.into_new_player()).value().clone(),
        };
        Ok(player)
    }

    fn delete(&self, id: UserId) -> crate::error::Result<bool> {
        Ok(self.players.remove(&id).is_some())
    }

    fn set_notifications(&self, id: UserId, enabled: bool) -> crate::error::Result<bool> {
        match self.players.get_mut(&id) {
            Some(mut player) => {
                player.notifications_enabled = enabled;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn query_by_lane_and_rank(
        &self,
        lane: Lane,
        rank: Rank,
    ) -> crate::error::Result<Vec<Player>> {
        let mut matches: Vec<Player> = self
            .players
            .iter()
            .filter(|entry| entry.lane == lane && entry.rank == rank)
            .map(|entry| entry.value().clone())
            .collect();
        matches.sort_by_key(|player| player.id);
        Ok(matches)
    }

    fn count(&self) -> crate::error::Result<usize> {
        Ok(self.players.len())
    }
}

//! Player profile storage
//!
//! One profile per user id. The conversation engine and the router only see
//! the [`ProfileStore`] trait; the service picks SQLite for production and the
//! in-memory store for tests and dry runs.

pub mod memory;
pub mod sqlite;

use crate::types::{Lane, Player, ProfileDraft, Rank, UserId};

// Re-export commonly used types
pub use memory::InMemoryProfileStore;
pub use sqlite::{create_pool, DbPool, SqliteProfileStore};

/// Durable mapping from user id to player profile
#[cfg_attr(test, mockall::automock)]
pub trait ProfileStore: Send + Sync {
    /// Fetch the profile for a user, if any
    fn get(&self, id: UserId) -> crate::error::Result<Option<Player>>;

    /// Insert or replace the profile fields of a draft.
    ///
    /// A new profile starts with notifications enabled; an existing profile
    /// keeps its current notification preference.
    fn upsert(&self, draft: ProfileDraft) -> crate::error::Result<Player>;

    /// Remove a profile; `false` when there was nothing to remove
    fn delete(&self, id: UserId) -> crate::error::Result<bool>;

    /// Change the notification flag; `false` when the user has no profile
    fn set_notifications(&self, id: UserId, enabled: bool) -> crate::error::Result<bool>;

    /// Every profile whose primary lane and rank match exactly, ordered by id
    fn query_by_lane_and_rank(&self, lane: Lane, rank: Rank)
        -> crate::error::Result<Vec<Player>>;

    /// Number of stored profiles
    fn count(&self) -> crate::error::Result<usize>;
}

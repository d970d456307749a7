//! Teammate search over registered profiles

use crate::store::ProfileStore;
use crate::types::{Lane, Player, Rank};
use std::sync::Arc;
use tracing::debug;

/// Read-only lane/rank search
#[derive(Clone)]
pub struct MatchmakingService {
    store: Arc<dyn ProfileStore>,
}

impl MatchmakingService {
    pub fn new(store: Arc<dyn ProfileStore>) -> Self {
        Self { store }
    }

    /// Every player whose primary lane and rank equal the filter.
    ///
    /// An empty result is not an error.
    pub fn find(&self, lane: Lane, rank: Rank) -> crate::error::Result<Vec<Player>> {
        let players = self.store.query_by_lane_and_rank(lane, rank)?;
        debug!("Found {} players for {} / {}", players.len(), lane, rank);
        Ok(players)
    }
}

//! SQLite profile store
//!
//! Profiles live in a single `players` table. Connections come from an r2d2
//! pool; every operation is a single statement, so per-id writes are atomic
//! without explicit transactions.

use super::ProfileStore;
use crate::error::LanemateError;
use crate::types::{Lane, Player, ProfileDraft, Rank, UserId};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS players (
    id            INTEGER PRIMARY KEY,
    handle        TEXT,
    nickname      TEXT    NOT NULL,
    lane          TEXT    NOT NULL,
    sublane       TEXT    NOT NULL,
    rank          TEXT    NOT NULL,
    notifications INTEGER NOT NULL DEFAULT 1
);
CREATE INDEX IF NOT EXISTS idx_players_lane_rank ON players (lane, rank);
";

const SELECT_COLUMNS: &str = "id, handle, nickname, lane, sublane, rank, notifications";

/// Create a connection pool for a database file and make sure the schema exists
pub fn create_pool(database_path: &str, pool_size: u32) -> crate::error::Result<DbPool> {
    let manager = SqliteConnectionManager::file(database_path).with_init(configure_connection);
    let pool = Pool::builder()
        .max_size(pool_size)
        .build(manager)
        .map_err(LanemateError::storage)?;

    migrate_schema(&pool)?;
    info!(
        "Opened profile database at {} (pool size {})",
        database_path, pool_size
    );
    Ok(pool)
}

fn configure_connection(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)
}

fn migrate_schema(pool: &DbPool) -> crate::error::Result<()> {
    let conn = pool.get().map_err(LanemateError::storage)?;
    conn.execute_batch(SCHEMA).map_err(LanemateError::storage)?;
    Ok(())
}

fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = strum::ParseError>,
{
    let raw: String = row.get(idx)?;
    T::from_str(&raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}

fn row_to_player(row: &Row<'_>) -> rusqlite::Result<Player> {
    Ok(Player {
        id: row.get(0)?,
        handle: row.get(1)?,
        nickname: row.get(2)?,
        lane: parse_column(row, 3)?,
        sublane: parse_column(row, 4)?,
        rank: parse_column(row, 5)?,
        notifications_enabled: row.get(6)?,
    })
}

/// Profile store persisted in SQLite
#[derive(Debug, Clone)]
pub struct SqliteProfileStore {
    pool: DbPool,
}

impl SqliteProfileStore {
    /// Wrap an existing pool; the schema must already be in place
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Open (or create) a database file
    pub fn open(database_path: &str, pool_size: u32) -> crate::error::Result<Self> {
        Ok(Self::new(create_pool(database_path, pool_size)?))
    }

    /// Private in-memory database.
    ///
    /// Each SQLite memory connection is its own database, so the pool is
    /// limited to one connection.
    pub fn in_memory() -> crate::error::Result<Self> {
        let manager = SqliteConnectionManager::memory().with_init(configure_connection);
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(LanemateError::storage)?;
        migrate_schema(&pool)?;
        Ok(Self::new(pool))
    }

    fn connection(&self) -> crate::error::Result<DbConnection> {
        Ok(self.pool.get().map_err(LanemateError::storage)?)
    }
}

impl ProfileStore for SqliteProfileStore {
    fn get(&self, id: UserId) -> crate::error::Result<Option<Player>> {
        let conn = self.connection()?;
        let player = conn
            .query_row(
                &format!("SELECT {} FROM players WHERE id = ?1", SELECT_COLUMNS),
                params![id],
                row_to_player,
            )
            .optional()
            .map_err(LanemateError::storage)?;
        Ok(player)
    }

    fn upsert(&self, draft: ProfileDraft) -> crate::error::Result<Player> {
        let conn = self.connection()?;
        // notifications is left out of the update set so it survives re-registration
        let sql = format!(
            "INSERT INTO players (id, handle, nickname, lane, sublane, rank, notifications)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)
             ON CONFLICT(id) DO UPDATE SET
                 handle = excluded.handle,
                 nickname = excluded.nickname,
                 lane = excluded.lane,
                 sublane = excluded.sublane,
                 rank = excluded.rank
             RETURNING {}",
            SELECT_COLUMNS
        );
        let player = conn
            .query_row(
                &sql,
                params![
                    draft.id,
                    draft.handle,
                    draft.nickname,
                    draft.lane.as_ref(),
                    draft.sublane.as_ref(),
                    draft.rank.as_ref(),
                ],
                row_to_player,
            )
            .map_err(LanemateError::storage)?;

        debug!("Upserted profile for user {}", player.id);
        Ok(player)
    }

    fn delete(&self, id: UserId) -> crate::error::Result<bool> {
        let conn = self.connection()?;
        let removed = conn
            .execute("DELETE FROM players WHERE id = ?1", params![id])
            .map_err(LanemateError::storage)?;
        Ok(removed > 0)
    }

    fn set_notifications(&self, id: UserId, enabled: bool) -> crate::error::Result<bool> {
        let conn = self.connection()?;
        let updated = conn
            .execute(
                "UPDATE players SET notifications = ?1 WHERE id = ?2",
                params![enabled, id],
            )
            .map_err(LanemateError::storage)?;
        Ok(updated > 0)
    }

    fn query_by_lane_and_rank(
        &self,
        lane: Lane,
        rank: Rank,
    ) -> crate::error::Result<Vec<Player>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare_cached(&format!(
                "SELECT {} FROM players WHERE lane = ?1 AND rank = ?2 ORDER BY id",
                SELECT_COLUMNS
            ))
            .map_err(LanemateError::storage)?;
        let players = stmt
            .query_map(params![lane.as_ref(), rank.as_ref()], row_to_player)
            .map_err(LanemateError::storage)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(LanemateError::storage)?;
        Ok(players)
    }

    fn count(&self) -> crate::error::Result<usize> {
        let conn = self.connection()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM players", [], |row| row.get(0))
            .map_err(LanemateError::storage)?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn draft(id: UserId, nickname: &str, lane: Lane, rank: Rank) -> ProfileDraft {
        ProfileDraft {
            id,
            handle: None,
            nickname: nickname.to_string(),
            lane,
            sublane: Lane::Jungle,
            rank,
        }
    }

    #[test]
    fn test_in_memory_roundtrip() {
        let store = SqliteProfileStore::in_memory().unwrap();
        let stored = store.upsert(draft(10, "Ari", Lane::Mid, Rank::Epic)).unwrap();

        assert!(stored.notifications_enabled);
        assert_eq!(stored.handle, None);
        assert_eq!(store.get(10).unwrap(), Some(stored));
        assert_eq!(store.get(11).unwrap(), None);
    }

    #[test]
    fn test_upsert_keeps_notifications_and_replaces_fields() {
        let store = SqliteProfileStore::in_memory().unwrap();
        store.upsert(draft(1, "Ari", Lane::Mid, Rank::Epic)).unwrap();
        assert!(store.set_notifications(1, false).unwrap());

        let mut second = draft(1, "Ari Prime", Lane::Top, Rank::Mythic);
        second.handle = Some("ari".to_string());
        let updated = store.upsert(second).unwrap();

        assert_eq!(updated.nickname, "Ari Prime");
        assert_eq!(updated.lane, Lane::Top);
        assert_eq!(updated.rank, Rank::Mythic);
        assert_eq!(updated.handle.as_deref(), Some("ari"));
        assert!(!updated.notifications_enabled);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_delete_and_missing_profile_operations() {
        let store = SqliteProfileStore::in_memory().unwrap();
        assert!(!store.delete(3).unwrap());
        assert!(!store.set_notifications(3, false).unwrap());

        store.upsert(draft(3, "Cy", Lane::Bot, Rank::Warrior)).unwrap();
        assert!(store.delete(3).unwrap());
        assert!(store.get(3).unwrap().is_none());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_query_is_exact_and_ordered() {
        let store = SqliteProfileStore::in_memory().unwrap();
        store.upsert(draft(30, "C", Lane::Mid, Rank::Epic)).unwrap();
        store.upsert(draft(10, "A", Lane::Mid, Rank::Epic)).unwrap();
        store.upsert(draft(20, "B", Lane::Mid, Rank::Legend)).unwrap();
        store.upsert(draft(40, "D", Lane::Top, Rank::Epic)).unwrap();

        let ids: Vec<UserId> = store
            .query_by_lane_and_rank(Lane::Mid, Rank::Epic)
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec![10, 30]);
        assert!(store
            .query_by_lane_and_rank(Lane::Jungle, Rank::Epic)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_file_database_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("players.db");
        let path = path.to_str().unwrap();

        {
            let store = SqliteProfileStore::open(path, 2).unwrap();
            store.upsert(draft(7, "Persisted", Lane::Support, Rank::Master)).unwrap();
            store.set_notifications(7, false).unwrap();
        }

        let reopened = SqliteProfileStore::open(path, 2).unwrap();
        let player = reopened.get(7).unwrap().unwrap();
        assert_eq!(player.nickname, "Persisted");
        assert!(!player.notifications_enabled);
    }

    #[test]
    fn test_unknown_enum_value_is_a_storage_error() {
        let store = SqliteProfileStore::in_memory().unwrap();
        store
            .connection()
            .unwrap()
            .execute(
                "INSERT INTO players (id, nickname, lane, sublane, rank) VALUES (1, 'X', 'Carry', 'Mid', 'Epic')",
                [],
            )
            .unwrap();

        let err = store.get(1).unwrap_err();
        assert!(err.downcast_ref::<LanemateError>().is_some());
    }
}

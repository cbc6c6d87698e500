use async_trait::async_trait;
use log::debug;
use std::path::Path;
use std::time::Duration;

use crate::settings::{Frequency, Key, MatchState, RunFlag};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] libsql::Error),
    #[error("corrupt value for '{key}': '{value}'")]
    Corrupt { key: Key, value: String },
}

/// Durable string-keyed settings.
///
/// Every write is complete once the returned future resolves. `set_many`
/// applies all of its entries or none of them; a `None` value removes the key.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get(&self, key: Key) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: Key, value: &str) -> Result<(), StoreError>;

    async fn set_many(&self, entries: &[(Key, Option<String>)]) -> Result<(), StoreError>;

    /// Counts one more match at `now_ms` and returns the new state.
    /// The read and the write are one atomic step, also across processes.
    async fn record_match(&self, now_ms: i64) -> Result<MatchState, StoreError>;

    async fn run_flag(&self) -> Result<RunFlag, StoreError> {
        Ok(RunFlag::from_stored(self.get(Key::RunFlag).await?.as_deref()))
    }

    async fn set_run_flag(&self, flag: RunFlag) -> Result<(), StoreError> {
        self.set(Key::RunFlag, flag.as_str()).await
    }

    async fn frequency(&self) -> Result<Frequency, StoreError> {
        Ok(Frequency::from_stored(self.get(Key::IntervalMinutes).await?.as_deref()))
    }

    async fn match_state(&self) -> Result<MatchState, StoreError> {
        let count = self.get(Key::MatchCount).await?;
        let last_match_at = self.get(Key::LastMatchAt).await?;
        parse_match_state(count, last_match_at)
    }

    /// Writes count and timestamp as one batch
    async fn save_match_state(&self, state: &MatchState) -> Result<(), StoreError> {
        self.set_many(&match_entries(state)).await
    }
}

fn parse_match_state(
    count: Option<String>,
    last_match_at: Option<String>,
) -> Result<MatchState, StoreError> {
    let count = match count {
        Some(raw) => raw.trim().parse::<u64>().map_err(|_| StoreError::Corrupt {
            key: Key::MatchCount,
            value: raw,
        })?,
        None => 0,
    };
    let last_match_at = match last_match_at {
        Some(raw) => Some(raw.trim().parse::<i64>().map_err(|_| StoreError::Corrupt {
            key: Key::LastMatchAt,
            value: raw,
        })?),
        None => None,
    };
    Ok(MatchState { count, last_match_at })
}

fn match_entries(state: &MatchState) -> [(Key, Option<String>); 2] {
    [
        (Key::MatchCount, Some(state.count.to_string())),
        (Key::LastMatchAt, state.last_match_at.map(|ms| ms.to_string())),
    ]
}

const CREATE_TABLE: &str =
    "CREATE TABLE IF NOT EXISTS settings (key TEXT PRIMARY KEY NOT NULL, value TEXT NOT NULL)";
const SELECT_VALUE: &str = "SELECT value FROM settings WHERE key = ?1";
const UPSERT_VALUE: &str = "INSERT INTO settings (key, value) VALUES (?1, ?2) \
     ON CONFLICT(key) DO UPDATE SET value = excluded.value";
const DELETE_VALUE: &str = "DELETE FROM settings WHERE key = ?1";

/// How long a writer waits for another connection's write lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings kept in a local libsql (SQLite) database
pub struct SqlStore {
    _db: libsql::Database,
    conn: libsql::Connection,
}

impl SqlStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        debug!("Opening settings store at {}", path.as_ref().display());
        let db = libsql::Builder::new_local(path.as_ref()).build().await?;
        Self::init(db).await
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:").build().await?;
        Self::init(db).await
    }

    async fn init(db: libsql::Database) -> Result<Self, StoreError> {
        let conn = db.connect()?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute(CREATE_TABLE, ()).await?;
        Ok(Self { _db: db, conn })
    }
}

#[async_trait]
impl ConfigStore for SqlStore {
    async fn get(&self, key: Key) -> Result<Option<String>, StoreError> {
        let mut rows = self.conn.query(SELECT_VALUE, libsql::params![key.as_str()]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row.get::<String>(0)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: Key, value: &str) -> Result<(), StoreError> {
        self.conn
            .execute(UPSERT_VALUE, libsql::params![key.as_str(), value])
            .await?;
        Ok(())
    }

    async fn set_many(&self, entries: &[(Key, Option<String>)]) -> Result<(), StoreError> {
        // Dropping the transaction without commit rolls it back
        let tx = self.conn.transaction().await?;
        for (key, value) in entries {
            match value {
                Some(value) => {
                    tx.execute(UPSERT_VALUE, libsql::params![key.as_str(), value.as_str()])
                        .await?;
                }
                None => {
                    tx.execute(DELETE_VALUE, libsql::params![key.as_str()]).await?;
                }
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn record_match(&self, now_ms: i64) -> Result<MatchState, StoreError> {
        // IMMEDIATE takes the write lock before the read, so no other
        // connection can count in between
        let tx = self
            .conn
            .transaction_with_behavior(libsql::TransactionBehavior::Immediate)
            .await?;

        let mut values = [None, None];
        for (slot, key) in values.iter_mut().zip([Key::MatchCount, Key::LastMatchAt]) {
            let mut rows = tx.query(SELECT_VALUE, libsql::params![key.as_str()]).await?;
            if let Some(row) = rows.next().await? {
                *slot = Some(row.get::<String>(0)?);
            }
        }
        let [count, last_match_at] = values;
        let state = parse_match_state(count, last_match_at)?.next(now_ms);

        for (key, value) in match_entries(&state) {
            if let Some(value) = value {
                tx.execute(UPSERT_VALUE, libsql::params![key.as_str(), value]).await?;
            }
        }
        tx.commit().await?;
        Ok(state)
    }
}

use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, Transaction, TransactionBehavior};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

pub mod mentions;
pub mod notifications;
pub mod posts;
pub mod spaces;
pub mod users;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    /// A UNIQUE/CHECK/NOT NULL violation raised by the storage layer
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            StoreError::Database(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation
        )
    }
}

/// Maps `QueryReturnedNoRows` to `NotFound(what)`
pub(crate) fn not_found(what: impl Into<String>) -> impl FnOnce(rusqlite::Error) -> StoreError {
    let what = what.into();
    move |e| match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(what),
        _ => StoreError::Database(e),
    }
}

pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Thread-safe SQLite store.
///
/// Single statements go through [`Store::read`]; anything that touches more than one row
/// or re-validates a precondition before writing goes through [`Store::transaction`].
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path
    pub fn new(db_path: &str) -> StoreResult<Self> {
        Self::open(db_path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Open a store whose statements give up with `DatabaseBusy` after `busy_timeout`
    pub fn open(db_path: &str, busy_timeout: Duration) -> StoreResult<Self> {
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(busy_timeout)?;
        Self::from_connection(conn)
    }

    /// Create an in-memory store for testing
    pub fn in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("connection lock poisoned".to_string()))
    }

    /// Run `f` against the connection outside of an explicit transaction
    pub fn read<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Connection) -> Result<T, E>,
        E: From<StoreError>,
    {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Run `f` inside a `BEGIN IMMEDIATE` transaction.
    ///
    /// The write lock is taken up front so reads made inside `f` cannot go stale before
    /// its writes land. Commits when `f` returns `Ok`; any `Err` (or a panic) drops the
    /// transaction, which rolls it back.
    pub fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;
        let value = f(&tx)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(value)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT UNIQUE NOT NULL,
                display_name TEXT DEFAULT '',
                relationship_status TEXT NOT NULL DEFAULT 'single',
                partner_id TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                CHECK ((relationship_status = 'in_relationship') = (partner_id IS NOT NULL))
            );

            CREATE TABLE IF NOT EXISTS friends (
                id TEXT PRIMARY KEY,
                sender_id TEXT NOT NULL,
                receiver_id TEXT NOT NULL,
                pair_key TEXT UNIQUE NOT NULL,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                FOREIGN KEY (sender_id) REFERENCES users(id),
                FOREIGN KEY (receiver_id) REFERENCES users(id)
            );

            CREATE TABLE IF NOT EXISTS couples (
                id TEXT PRIMARY KEY,
                requester_id TEXT NOT NULL,
                partner_id TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                FOREIGN KEY (requester_id) REFERENCES users(id),
                FOREIGN KEY (partner_id) REFERENCES users(id)
            );

            CREATE TABLE IF NOT EXISTS spaces (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                space_type TEXT NOT NULL,
                invite_code TEXT UNIQUE NOT NULL,
                check_in_interval_seconds INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'active',
                created_by TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS space_members (
                id TEXT PRIMARY KEY,
                space_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                role TEXT NOT NULL,
                status TEXT NOT NULL,
                joined_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE(space_id, user_id),
                FOREIGN KEY (space_id) REFERENCES spaces(id),
                FOREIGN KEY (user_id) REFERENCES users(id)
            );

            CREATE TABLE IF NOT EXISTS space_posts (
                id TEXT PRIMARY KEY,
                space_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                content TEXT DEFAULT '',
                status TEXT NOT NULL DEFAULT 'normal',
                created_at INTEGER NOT NULL,
                FOREIGN KEY (space_id) REFERENCES spaces(id),
                FOREIGN KEY (user_id) REFERENCES users(id)
            );

            CREATE TABLE IF NOT EXISTS post_mentions (
                id TEXT PRIMARY KEY,
                post_id TEXT NOT NULL,
                mentioned_user_id TEXT NOT NULL,
                mentioner_user_id TEXT NOT NULL,
                timeout_seconds INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                viewed_at INTEGER,
                last_notified_at INTEGER,
                status TEXT NOT NULL DEFAULT 'pending',
                UNIQUE(post_id, mentioned_user_id),
                FOREIGN KEY (post_id) REFERENCES space_posts(id)
            );

            CREATE TABLE IF NOT EXISTS notifications (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                notification_type TEXT NOT NULL,
                resource_type TEXT,
                resource_id TEXT,
                title TEXT DEFAULT '',
                body TEXT DEFAULT '',
                read INTEGER DEFAULT 0,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id)
            );

            CREATE TABLE IF NOT EXISTS checkin_reminders (
                space_id TEXT PRIMARY KEY,
                last_notified_at INTEGER NOT NULL,
                FOREIGN KEY (space_id) REFERENCES spaces(id)
            );

            CREATE INDEX IF NOT EXISTS idx_couples_partner ON couples(partner_id, status);
            CREATE INDEX IF NOT EXISTS idx_space_members_user ON space_members(user_id, status);
            CREATE INDEX IF NOT EXISTS idx_space_posts_author ON space_posts(space_id, user_id, status, created_at);
            CREATE INDEX IF NOT EXISTS idx_post_mentions_due ON post_mentions(status, created_at);
            CREATE INDEX IF NOT EXISTS idx_post_mentions_user ON post_mentions(mentioned_user_id, status);
            CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id, created_at);
            "#,
        )?;
        Ok(())
    }
}

/// Timestamps are persisted as Unix milliseconds
pub(crate) fn to_millis(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

//! SQLite-backed persistence for the gift log and recipient checkpoints.
//! One connection behind a mutex: every call is a short, self-contained
//! statement (or pair of statements) executed while holding the lock.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use giftwatch_core::error::{GiftWatchError, Result};
use giftwatch_core::traits::{CheckpointStore, GiftStore};
use giftwatch_core::types::{AppendOutcome, Gift, GiftCandidate, GiftStats, RecipientCheckpoint};
use rusqlite::{Connection, OptionalExtension, params};

const GIFT_COLUMNS: &str = "gift_id, name, price, channel_id, message_id, created_at";
const CHECKPOINT_COLUMNS: &str =
    "recipient_id, notifications_enabled, interval_minutes, last_checkpoint";

/// Gift log + checkpoint store.
pub struct GiftDb {
    conn: Mutex<Option<Connection>>,
    default_interval_minutes: u32,
}

impl GiftDb {
    /// Open or create the database file.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| store_err("DB open", e))?;
        // Enable WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        let db = Self::from_connection(conn);
        db.migrate()?;
        tracing::info!("💾 Gift database opened at {}", path.display());
        Ok(db)
    }

    /// Private in-memory database (tests, dry runs).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| store_err("DB open", e))?;
        let db = Self::from_connection(conn);
        db.migrate()?;
        Ok(db)
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
            default_interval_minutes: giftwatch_core::types::DEFAULT_INTERVAL_MINUTES,
        }
    }

    /// Interval assigned to recipients created on first access.
    pub fn with_default_interval(mut self, minutes: u32) -> Self {
        self.default_interval_minutes = minutes.max(1);
        self
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "
            -- Append-only gift log
            CREATE TABLE IF NOT EXISTS gifts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                gift_id TEXT NOT NULL UNIQUE,      -- '{channel_id}_{message_id}'
                name TEXT NOT NULL,
                price REAL NOT NULL,
                channel_id INTEGER NOT NULL,
                message_id INTEGER NOT NULL,
                created_at INTEGER NOT NULL,       -- unix micros, assigned on insert
                UNIQUE (channel_id, message_id)
            );
            CREATE INDEX IF NOT EXISTS idx_gifts_created_at ON gifts(created_at);

            -- One row per recipient
            CREATE TABLE IF NOT EXISTS recipient_settings (
                recipient_id INTEGER PRIMARY KEY,
                notifications_enabled INTEGER NOT NULL DEFAULT 1,
                interval_minutes INTEGER NOT NULL DEFAULT 60 CHECK (interval_minutes > 0),
                last_checkpoint INTEGER NOT NULL DEFAULT 0   -- unix micros, 0 = never
            );
            ",
            )
            .map_err(|e| store_err("Migration", e))
        })
    }

    /// Release the connection. Later calls fail with a store error.
    pub fn close(&self) -> Result<()> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|e| GiftWatchError::Store(format!("Lock: {e}")))?;
        if let Some(conn) = guard.take() {
            conn.close().map_err(|(_, e)| store_err("DB close", e))?;
            tracing::info!("💾 Gift database closed");
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.conn.lock().map(|g| g.is_none()).unwrap_or(true)
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self
            .conn
            .lock()
            .map_err(|e| GiftWatchError::Store(format!("Lock: {e}")))?;
        let conn = guard
            .as_ref()
            .ok_or_else(|| GiftWatchError::Store("database is closed".into()))?;
        f(conn)
    }

    // ─── Gifts ────────────────────────────────────────────────

    /// Insert unless the identity exists; either way return the stored row.
    pub fn append_gift(&self, candidate: &GiftCandidate) -> Result<AppendOutcome> {
        let id = candidate.gift_id();
        self.with_conn(|conn| {
            // Timestamp taken under the lock so it orders against list_since.
            let created_at = Utc::now();
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO gifts (gift_id, name, price, channel_id, message_id, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        id,
                        candidate.name,
                        candidate.price,
                        candidate.channel_id,
                        candidate.message_id,
                        created_at.timestamp_micros(),
                    ],
                )
                .map_err(|e| store_err("Insert gift", e))?;

            let stored = conn
                .query_row(
                    &format!("SELECT {GIFT_COLUMNS} FROM gifts WHERE gift_id = ?1"),
                    params![id],
                    row_to_gift,
                )
                .map_err(|e| store_err("Load gift", e))?;

            if inserted > 0 {
                tracing::debug!("💾 Gift saved: {id}");
                Ok(AppendOutcome::Inserted(stored))
            } else {
                tracing::debug!("Gift {id} already stored");
                Ok(AppendOutcome::Existing(stored))
            }
        })
    }

    /// Gifts with `created_at > since`, newest first.
    pub fn gifts_since(&self, since: DateTime<Utc>, limit: Option<usize>) -> Result<Vec<Gift>> {
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {GIFT_COLUMNS} FROM gifts WHERE created_at > ?1
                     ORDER BY created_at DESC, id DESC LIMIT ?2"
                ))
                .map_err(|e| store_err("Query gifts", e))?;
            let rows = stmt
                .query_map(params![since.timestamp_micros(), limit], row_to_gift)
                .map_err(|e| store_err("Query gifts", e))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| store_err("Read gift row", e))
        })
    }

    pub fn recent_gifts(&self, limit: usize) -> Result<Vec<Gift>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {GIFT_COLUMNS} FROM gifts ORDER BY created_at DESC, id DESC LIMIT ?1"
                ))
                .map_err(|e| store_err("Query gifts", e))?;
            let rows = stmt
                .query_map(params![limit as i64], row_to_gift)
                .map_err(|e| store_err("Query gifts", e))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| store_err("Read gift row", e))
        })
    }

    pub fn gift_stats(&self) -> Result<GiftStats> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*), AVG(price), COUNT(DISTINCT channel_id) FROM gifts",
                [],
                |row| {
                    let count: i64 = row.get(0)?;
                    let avg: Option<f64> = row.get(1)?;
                    let channels: i64 = row.get(2)?;
                    Ok(GiftStats {
                        count: count as u64,
                        average_price: (avg.unwrap_or(0.0) * 100.0).round() / 100.0,
                        distinct_channels: channels as u64,
                    })
                },
            )
            .map_err(|e| store_err("Stats", e))
        })
    }

    /// Channels that have produced at least one gift.
    pub fn tracked_channels(&self) -> Result<Vec<i64>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT DISTINCT channel_id FROM gifts ORDER BY channel_id")
                .map_err(|e| store_err("Query channels", e))?;
            let rows = stmt
                .query_map([], |row| row.get(0))
                .map_err(|e| store_err("Query channels", e))?;
            rows.collect::<rusqlite::Result<Vec<i64>>>()
                .map_err(|e| store_err("Read channel row", e))
        })
    }

    pub fn gift_count(&self) -> Result<u64> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM gifts", [], |r| r.get::<_, i64>(0))
                .map(|n| n as u64)
                .map_err(|e| store_err("Count", e))
        })
    }

    // ─── Recipient checkpoints ────────────────────────────────

    /// Read-with-default-insert.
    pub fn checkpoint(&self, recipient_id: i64) -> Result<RecipientCheckpoint> {
        self.with_conn(|conn| load_or_create(conn, recipient_id, self.default_interval_minutes))
    }

    pub fn set_notifications_enabled(
        &self,
        recipient_id: i64,
        enabled: bool,
    ) -> Result<RecipientCheckpoint> {
        self.with_conn(|conn| {
            load_or_create(conn, recipient_id, self.default_interval_minutes)?;
            conn.execute(
                "UPDATE recipient_settings SET notifications_enabled = ?2 WHERE recipient_id = ?1",
                params![recipient_id, enabled],
            )
            .map_err(|e| store_err("Update recipient", e))?;
            load_or_create(conn, recipient_id, self.default_interval_minutes)
        })
    }

    /// Flip in one statement so concurrent toggles never lose an update.
    pub fn toggle_notifications(&self, recipient_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            load_or_create(conn, recipient_id, self.default_interval_minutes)?;
            conn.execute(
                "UPDATE recipient_settings SET notifications_enabled = 1 - notifications_enabled
                 WHERE recipient_id = ?1",
                params![recipient_id],
            )
            .map_err(|e| store_err("Toggle recipient", e))?;
            Ok(load_or_create(conn, recipient_id, self.default_interval_minutes)?
                .notifications_enabled)
        })
    }

    pub fn set_check_interval(&self, recipient_id: i64, minutes: u32) -> Result<RecipientCheckpoint> {
        if minutes == 0 {
            return Err(GiftWatchError::Validation("interval must be > 0 minutes".into()));
        }
        self.with_conn(|conn| {
            load_or_create(conn, recipient_id, self.default_interval_minutes)?;
            conn.execute(
                "UPDATE recipient_settings SET interval_minutes = ?2 WHERE recipient_id = ?1",
                params![recipient_id, minutes],
            )
            .map_err(|e| store_err("Update recipient", e))?;
            load_or_create(conn, recipient_id, self.default_interval_minutes)
        })
    }

    pub fn set_checkpoint(&self, recipient_id: i64, at: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO recipient_settings (recipient_id, interval_minutes, last_checkpoint)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(recipient_id) DO UPDATE SET last_checkpoint = excluded.last_checkpoint",
                params![recipient_id, self.default_interval_minutes, at.timestamp_micros()],
            )
            .map_err(|e| store_err("Advance checkpoint", e))?;
            Ok(())
        })
    }

    pub fn enabled_recipients(&self) -> Result<Vec<RecipientCheckpoint>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {CHECKPOINT_COLUMNS} FROM recipient_settings
                     WHERE notifications_enabled = 1 ORDER BY recipient_id"
                ))
                .map_err(|e| store_err("Query recipients", e))?;
            let rows = stmt
                .query_map([], row_to_checkpoint)
                .map_err(|e| store_err("Query recipients", e))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| store_err("Read recipient row", e))
        })
    }
}

fn store_err(context: &str, e: rusqlite::Error) -> GiftWatchError {
    GiftWatchError::Store(format!("{context}: {e}"))
}

fn micros_to_utc(micros: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_micros(micros).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn row_to_gift(row: &rusqlite::Row<'_>) -> rusqlite::Result<Gift> {
    Ok(Gift {
        gift_id: row.get(0)?,
        name: row.get(1)?,
        price: row.get(2)?,
        channel_id: row.get(3)?,
        message_id: row.get(4)?,
        created_at: micros_to_utc(row.get(5)?),
    })
}

fn row_to_checkpoint(row: &rusqlite::Row<'_>) -> rusqlite::Result<RecipientCheckpoint> {
    Ok(RecipientCheckpoint {
        recipient_id: row.get(0)?,
        notifications_enabled: row.get(1)?,
        interval_minutes: row.get(2)?,
        last_checkpoint: micros_to_utc(row.get(3)?),
    })
}

fn load_or_create(
    conn: &Connection,
    recipient_id: i64,
    default_interval: u32,
) -> Result<RecipientCheckpoint> {
    conn.execute(
        "INSERT OR IGNORE INTO recipient_settings (recipient_id, interval_minutes) VALUES (?1, ?2)",
        params![recipient_id, default_interval],
    )
    .map_err(|e| store_err("Create recipient", e))?;
    conn.query_row(
        &format!("SELECT {CHECKPOINT_COLUMNS} FROM recipient_settings WHERE recipient_id = ?1"),
        params![recipient_id],
        row_to_checkpoint,
    )
    .optional()
    .map_err(|e| store_err("Load recipient", e))?
    .ok_or_else(|| GiftWatchError::Store(format!("recipient {recipient_id} vanished")))
}

#[async_trait]
impl GiftStore for GiftDb {
    async fn append(&self, candidate: &GiftCandidate) -> Result<AppendOutcome> {
        self.append_gift(candidate)
    }

    async fn list_since(&self, since: DateTime<Utc>, limit: Option<usize>) -> Result<Vec<Gift>> {
        self.gifts_since(since, limit)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Gift>> {
        self.recent_gifts(limit)
    }

    async fn stats(&self) -> Result<GiftStats> {
        self.gift_stats()
    }
}

#[async_trait]
impl CheckpointStore for GiftDb {
    async fn get(&self, recipient_id: i64) -> Result<RecipientCheckpoint> {
        self.checkpoint(recipient_id)
    }

    async fn set_enabled(&self, recipient_id: i64, enabled: bool) -> Result<RecipientCheckpoint> {
        self.set_notifications_enabled(recipient_id, enabled)
    }

    async fn toggle_enabled(&self, recipient_id: i64) -> Result<bool> {
        self.toggle_notifications(recipient_id)
    }

    async fn set_interval(&self, recipient_id: i64, minutes: u32) -> Result<RecipientCheckpoint> {
        self.set_check_interval(recipient_id, minutes)
    }

    async fn advance_checkpoint(&self, recipient_id: i64, at: DateTime<Utc>) -> Result<()> {
        self.set_checkpoint(recipient_id, at)
    }

    async fn list_enabled(&self) -> Result<Vec<RecipientCheckpoint>> {
        self.enabled_recipients()
    }
}

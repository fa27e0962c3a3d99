//! Durable record of vault items.
//!
//! The repository is the single source of truth for item status. All writes
//! go through one connection and one transaction per call, so an edit and an
//! unlock run can never interleave into a half-applied record.

use std::fs;
use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Transaction};
use tracing::debug;

use crate::error::{Result, VaultError};
use crate::models::{BlobRef, ItemId, ItemMutation, ItemStatus, MediaType, VaultItem};

const SCHEMA_VERSION: i32 = 1;

const ITEM_COLUMNS: &str = "id, media_type, created_at, unlock_at, status, blob_ref, \
                            custom_message, metadata, thumbnail_ref, backed_up";

// ============================================================================
// Query types
// ============================================================================

/// Which items a query returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemFilter {
    All,
    Status(ItemStatus),
    /// Locked items whose unlock time is at or before `now`.
    DueForUnlock { now: DateTime<Utc> },
    MediaType(MediaType),
    /// Case-insensitive match against the media type label.
    Search(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    UnlockAscending,
    UnlockDescending,
    CreatedAscending,
    CreatedDescending,
}

impl SortOrder {
    fn as_sql(&self) -> &'static str {
        match self {
            Self::UnlockAscending => "unlock_at ASC, created_at ASC, id ASC",
            Self::UnlockDescending => "unlock_at DESC, created_at DESC, id ASC",
            Self::CreatedAscending => "created_at ASC, id ASC",
            Self::CreatedDescending => "created_at DESC, id ASC",
        }
    }
}

/// A mutation that only lands if the stored record still matches the
/// conditions the caller observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardedUpdate {
    pub id: ItemId,
    pub expect_status: ItemStatus,
    /// When set, the stored `unlock_at` must be at or before this instant.
    pub due_by: Option<DateTime<Utc>>,
    pub mutation: ItemMutation,
}

impl GuardedUpdate {
    /// Flip a due item from locked to unlocked.
    pub fn unlock(id: ItemId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            expect_status: ItemStatus::Locked,
            due_by: Some(now),
            mutation: ItemMutation::status(ItemStatus::Unlocked),
        }
    }

    fn holds(&self, item: &VaultItem) -> bool {
        item.status == self.expect_status && self.due_by.map_or(true, |due| item.unlock_at <= due)
    }
}

// ============================================================================
// Trait
// ============================================================================

pub trait ItemRepository: Send + Sync {
    fn insert(&self, item: &VaultItem) -> Result<()>;

    fn get(&self, id: &ItemId) -> Result<VaultItem>;

    fn query(&self, filter: &ItemFilter, order: SortOrder) -> Result<Vec<VaultItem>>;

    /// Validate and apply `mutation` atomically, returning the stored result.
    fn update(&self, id: &ItemId, mutation: &ItemMutation) -> Result<VaultItem>;

    /// Returns whether a record was removed.
    fn delete(&self, id: &ItemId) -> Result<bool>;

    /// Apply every update whose guard still holds, in a single transaction.
    /// Returns the ids that were applied. On error nothing is applied.
    fn commit_batch(&self, updates: &[GuardedUpdate]) -> Result<Vec<ItemId>>;
}

// ============================================================================
// SQLite implementation
// ============================================================================

pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        let repo = Self {
            conn: Mutex::new(conn),
        };
        repo.migrate()?;
        Ok(repo)
    }

    pub fn open_in_memory() -> Result<Self> {
        let repo = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        repo.migrate()?;
        Ok(repo)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
            [],
        )?;
        let current: i32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?;
        if current < 1 {
            migrate_v1(&conn)?;
        }
        debug!(version = SCHEMA_VERSION, "repository schema ready");
        Ok(())
    }
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS vault_items (
            id TEXT PRIMARY KEY,
            media_type TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            unlock_at INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'locked',
            blob_ref TEXT NOT NULL,
            custom_message TEXT,
            metadata BLOB,
            thumbnail_ref TEXT,
            backed_up INTEGER NOT NULL DEFAULT 0,
            CHECK (unlock_at >= created_at)
        );

        CREATE INDEX IF NOT EXISTS idx_vault_items_due ON vault_items(status, unlock_at);
        CREATE INDEX IF NOT EXISTS idx_vault_items_created ON vault_items(created_at);

        INSERT OR REPLACE INTO schema_version (version) VALUES (1);
        "#,
    )?;
    Ok(())
}

impl ItemRepository for SqliteRepository {
    fn insert(&self, item: &VaultItem) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            &format!("INSERT INTO vault_items ({ITEM_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
            params![
                item.id.to_string(),
                item.media_type.as_str(),
                item.created_at.timestamp_millis(),
                item.unlock_at.timestamp_millis(),
                item.status.as_str(),
                item.blob_ref.as_str(),
                item.custom_message,
                item.metadata,
                item.thumbnail_ref.as_ref().map(|r| r.as_str()),
                item.backed_up,
            ],
        )
        .map_err(write_failed)?;
        Ok(())
    }

    fn get(&self, id: &ItemId) -> Result<VaultItem> {
        let conn = self.conn.lock();
        load(&conn, id)?.ok_or(VaultError::RepositoryNotFound(*id))
    }

    fn query(&self, filter: &ItemFilter, order: SortOrder) -> Result<Vec<VaultItem>> {
        let (clause, values) = match filter {
            ItemFilter::All => (String::new(), Vec::new()),
            ItemFilter::Status(status) => (
                "WHERE status = ?".to_string(),
                vec![Value::Text(status.as_str().into())],
            ),
            ItemFilter::DueForUnlock { now } => (
                "WHERE status = ? AND unlock_at <= ?".to_string(),
                vec![
                    Value::Text(ItemStatus::Locked.as_str().into()),
                    Value::Integer(now.timestamp_millis()),
                ],
            ),
            ItemFilter::MediaType(media) => (
                "WHERE media_type = ?".to_string(),
                vec![Value::Text(media.as_str().into())],
            ),
            ItemFilter::Search(text) => {
                let matches: Vec<Value> = MediaType::ALL
                    .iter()
                    .filter(|m| m.matches_label(text))
                    .map(|m| Value::Text(m.as_str().into()))
                    .collect();
                if matches.is_empty() {
                    return Ok(Vec::new());
                }
                let slots = vec!["?"; matches.len()].join(", ");
                (format!("WHERE media_type IN ({slots})"), matches)
            }
        };

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM vault_items {clause} ORDER BY {}",
            order.as_sql()
        ))?;
        let items = stmt
            .query_map(params_from_iter(values.iter()), row_to_item)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    fn update(&self, id: &ItemId, mutation: &ItemMutation) -> Result<VaultItem> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let current = load(&tx, id)?.ok_or(VaultError::RepositoryNotFound(*id))?;
        let next = mutation.apply(&current)?;
        if next != current {
            store(&tx, &next)?;
        }
        tx.commit().map_err(write_failed)?;
        Ok(next)
    }

    fn delete(&self, id: &ItemId) -> Result<bool> {
        let conn = self.conn.lock();
        let removed = conn
            .execute("DELETE FROM vault_items WHERE id = ?1", params![id.to_string()])
            .map_err(write_failed)?;
        Ok(removed > 0)
    }

    fn commit_batch(&self, updates: &[GuardedUpdate]) -> Result<Vec<ItemId>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut applied = Vec::with_capacity(updates.len());
        for update in updates {
            let Some(current) = load(&tx, &update.id)? else {
                debug!(item = %update.id, "guarded update skipped: record gone");
                continue;
            };
            if !update.holds(&current) {
                debug!(item = %update.id, status = %current.status, "guarded update skipped: guard no longer holds");
                continue;
            }
            let next = update.mutation.apply(&current)?;
            store(&tx, &next)?;
            applied.push(update.id);
        }
        tx.commit().map_err(write_failed)?;
        Ok(applied)
    }
}

fn load(conn: &Connection, id: &ItemId) -> Result<Option<VaultItem>> {
    conn.query_row(
        &format!("SELECT {ITEM_COLUMNS} FROM vault_items WHERE id = ?1"),
        params![id.to_string()],
        row_to_item,
    )
    .optional()
    .map_err(Into::into)
}

fn store(tx: &Transaction<'_>, item: &VaultItem) -> Result<()> {
    tx.execute(
        "UPDATE vault_items SET unlock_at = ?1, custom_message = ?2, status = ?3 WHERE id = ?4",
        params![
            item.unlock_at.timestamp_millis(),
            item.custom_message,
            item.status.as_str(),
            item.id.to_string(),
        ],
    )
    .map_err(write_failed)?;
    Ok(())
}

fn write_failed(e: rusqlite::Error) -> VaultError {
    VaultError::RepositoryWriteFailed(e.to_string())
}

fn row_to_item(row: &rusqlite::Row) -> rusqlite::Result<VaultItem> {
    let thumbnail: Option<String> = row.get(8)?;
    Ok(VaultItem {
        id: parse_column(row, 0)?,
        media_type: parse_column(row, 1)?,
        created_at: millis_column(row, 2)?,
        unlock_at: millis_column(row, 3)?,
        status: parse_column(row, 4)?,
        blob_ref: BlobRef::from_raw(row.get::<_, String>(5)?),
        custom_message: row.get(6)?,
        metadata: row.get(7)?,
        thumbnail_ref: thumbnail.map(BlobRef::from_raw),
        backed_up: row.get(9)?,
    })
}

fn parse_column<T>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = VaultError>,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn millis_column(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let millis: i64 = row.get(idx)?;
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, millis))
}

//! Persistent Store
//!
//! SQLite-backed storage for social items, memories, style guide versions,
//! the approval queue and loop cursors. Several processes may share one
//! database file: WAL journaling + busy timeout, and every shared-row mutation
//! is a single statement or a transaction.

mod approvals;
mod items;
mod memories;
mod style;

pub use memories::LearningCommit;
pub use style::ActivationError;

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Store with SQLite backend
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open or create the database
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;

        let store = Self { conn: Mutex::new(conn) };
        store.init_schema()?;

        info!("Store opened: {}", path.display());
        Ok(store)
    }

    /// Private in-memory database (tests, dry runs)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn: Mutex::new(conn) };
        store.init_schema()?;
        Ok(store)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        self.conn.lock().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS inbound_items (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL CHECK(kind IN ('mention', 'reply', 'post')),
                content TEXT NOT NULL,
                author_id TEXT NOT NULL,
                author_handle TEXT NOT NULL,
                in_reply_to TEXT,
                created_at INTEGER NOT NULL,
                recorded_at INTEGER NOT NULL,
                learning_processed INTEGER NOT NULL DEFAULT 0,
                learning_processed_at INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_inbound_pending
                ON inbound_items(learning_processed, created_at);

            CREATE TABLE IF NOT EXISTS outbound_items (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL CHECK(kind IN ('mention', 'reply', 'post')),
                content TEXT NOT NULL,
                author_id TEXT NOT NULL,
                author_handle TEXT NOT NULL,
                in_reply_to TEXT,
                created_at INTEGER NOT NULL,
                recorded_at INTEGER NOT NULL,
                metrics TEXT,
                learning_processed INTEGER NOT NULL DEFAULT 0,
                learning_processed_at INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_outbound_pending
                ON outbound_items(learning_processed, created_at);
            CREATE INDEX IF NOT EXISTS idx_outbound_recorded
                ON outbound_items(recorded_at DESC);

            CREATE TABLE IF NOT EXISTS memories (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL CHECK(kind IN ('slang', 'narrative_tag', 'risk_flag', 'engagement_outcome')),
                content TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_memories_kind ON memories(kind, created_at DESC);

            -- Which memories cite which source item
            CREATE TABLE IF NOT EXISTS memory_sources (
                memory_id TEXT NOT NULL REFERENCES memories(id),
                source_item_id TEXT NOT NULL,
                direction TEXT NOT NULL CHECK(direction IN ('inbound', 'outbound')),
                added_at INTEGER NOT NULL,
                PRIMARY KEY (memory_id, source_item_id)
            );

            CREATE INDEX IF NOT EXISTS idx_memory_sources_item
                ON memory_sources(source_item_id);

            CREATE TABLE IF NOT EXISTS style_guide_versions (
                version_id TEXT PRIMARY KEY,
                generated_at INTEGER NOT NULL,
                source TEXT NOT NULL,
                tweet_count INTEGER NOT NULL,
                markdown_path TEXT NOT NULL,
                json_path TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 0 CHECK(is_active IN (0, 1)),
                activated_at INTEGER,
                deactivated_at INTEGER,
                metadata TEXT NOT NULL DEFAULT '{}'
            );

            -- At most one active style guide, whatever the application does
            CREATE UNIQUE INDEX IF NOT EXISTS idx_style_single_active
                ON style_guide_versions(is_active) WHERE is_active = 1;

            CREATE TABLE IF NOT EXISTS pending_posts (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                in_reply_to TEXT,
                created_at INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending'
                    CHECK(status IN ('pending', 'approved', 'rejected', 'posted')),
                decided_at INTEGER,
                posted_item_id TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_pending_status ON pending_posts(status, created_at);

            CREATE TABLE IF NOT EXISTS cursors (
                name TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )?;

        Ok(())
    }

    /// Read a named cursor
    pub fn get_cursor(&self, name: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let value = conn
            .query_row("SELECT value FROM cursors WHERE name = ?1", params![name], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    /// Overwrite a named cursor
    pub fn set_cursor(&self, name: &str, value: &str, now: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock();
        set_cursor_on(&conn, name, value, now)
    }
}

fn set_cursor_on(conn: &Connection, name: &str, value: &str, now: DateTime<Utc>) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO cursors (name, value, updated_at) VALUES (?1, ?2, ?3)
        ON CONFLICT(name) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
        params![name, value, now.timestamp_millis()],
    )?;
    Ok(())
}

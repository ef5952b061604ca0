//! Memory storage
//!
//! Memories are keyed by content fingerprint; `memory_sources` records which
//! items cite each one. Writing a source's memories and flagging the source
//! as processed happen in one transaction.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use super::Store;
use crate::models::{from_millis, Direction, MemoryItem, MemoryKind};

/// What a learning commit did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LearningCommit {
    /// Memories that did not exist before
    pub created: usize,
    /// Source links added (new or existing memories)
    pub linked: usize,
}

fn memory_from_row(row: &Row) -> rusqlite::Result<(String, MemoryKind, String, i64)> {
    let raw_kind: String = row.get(1)?;
    let kind = MemoryKind::parse(&raw_kind).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, format!("bad kind {}", raw_kind).into())
    })?;
    Ok((row.get(0)?, kind, row.get(2)?, row.get(3)?))
}

fn sources_for(conn: &Connection, memory_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT source_item_id FROM memory_sources WHERE memory_id = ?1 ORDER BY added_at ASC, rowid ASC",
    )?;
    let ids = stmt
        .query_map(params![memory_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(ids)
}

fn hydrate(conn: &Connection, rows: Vec<(String, MemoryKind, String, i64)>) -> Result<Vec<MemoryItem>> {
    rows.into_iter()
        .map(|(id, kind, content, created_at)| {
            let source_item_ids = sources_for(conn, &id)?;
            Ok(MemoryItem {
                id,
                content,
                kind,
                source_item_ids,
                created_at: from_millis(created_at),
            })
        })
        .collect()
}

impl Store {
    /// Write the memories extracted from one source item and mark the item
    /// processed, all or nothing.
    ///
    /// Returns `None` (and writes nothing) if the item was already processed
    /// or does not exist, so a second worker racing on the same item is a
    /// no-op.
    pub fn commit_learning(
        &self,
        direction: Direction,
        item_id: &str,
        memories: &[MemoryItem],
        processed_at: DateTime<Utc>,
    ) -> Result<Option<LearningCommit>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = processed_at.timestamp_millis();

        // Claim the item first; the conditional update is the idempotency gate
        let claimed = tx.execute(
            &format!(
                "UPDATE {} SET learning_processed = 1, learning_processed_at = ?2 \
                 WHERE id = ?1 AND learning_processed = 0",
                direction.table()
            ),
            params![item_id, now],
        )?;
        if claimed == 0 {
            debug!("Item {} already processed, skipping memory writes", item_id);
            return Ok(None);
        }

        let direction_name = match direction {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        };

        let mut commit = LearningCommit::default();
        for memory in memories {
            commit.created += tx.execute(
                "INSERT OR IGNORE INTO memories (id, kind, content, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![memory.id, memory.kind.as_str(), memory.content, memory.created_at.timestamp_millis()],
            )?;
            commit.linked += tx.execute(
                r#"
                INSERT OR IGNORE INTO memory_sources (memory_id, source_item_id, direction, added_at)
                VALUES (?1, ?2, ?3, ?4)
                "#,
                params![memory.id, item_id, direction_name, now],
            )?;
        }

        tx.commit()?;
        Ok(Some(commit))
    }

    pub fn get_memory(&self, id: &str) -> Result<Option<MemoryItem>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT id, kind, content, created_at FROM memories WHERE id = ?1",
                params![id],
                memory_from_row,
            )
            .optional()?;
        Ok(hydrate(&conn, row.into_iter().collect())?.pop())
    }

    /// Memories citing a source item (uses the source index)
    pub fn memories_for_source(&self, item_id: &str) -> Result<Vec<MemoryItem>> {
        let conn = self.conn.lock();
        let rows = {
            let mut stmt = conn.prepare(
                r#"
                SELECT m.id, m.kind, m.content, m.created_at
                FROM memory_sources s
                JOIN memories m ON m.id = s.memory_id
                WHERE s.source_item_id = ?1
                ORDER BY m.created_at ASC, m.id ASC
                "#,
            )?;
            let rows = stmt
                .query_map(params![item_id], memory_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        hydrate(&conn, rows)
    }

    /// Newest memories, optionally of one kind
    pub fn recent_memories(&self, kind: Option<MemoryKind>, limit: usize) -> Result<Vec<MemoryItem>> {
        let conn = self.conn.lock();
        let rows = {
            let mut stmt = conn.prepare(
                r#"
                SELECT id, kind, content, created_at FROM memories
                WHERE ?1 IS NULL OR kind = ?1
                ORDER BY created_at DESC, id ASC
                LIMIT ?2
                "#,
            )?;
            let rows = stmt
                .query_map(params![kind.map(|k| k.as_str()), limit as i64], memory_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        hydrate(&conn, rows)
    }

    pub fn count_memories(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Author, InboundItem};

    fn memory(id: &str, content: &str) -> MemoryItem {
        MemoryItem {
            id: id.to_string(),
            content: content.to_string(),
            kind: MemoryKind::Slang,
            source_item_ids: vec![],
            created_at: Utc::now(),
        }
    }

    fn seed(store: &Store, id: &str) {
        let item = InboundItem::mention(id, "gm wagmi", Author::new("1", "fan"), Utc::now());
        store.insert_inbound(&item, Utc::now()).unwrap();
    }

    #[test]
    fn test_commit_flags_item_and_writes_memories() {
        let store = Store::open_in_memory().unwrap();
        seed(&store, "10");

        let commit = store
            .commit_learning(Direction::Inbound, "10", &[memory("m1", "slang term wagmi")], Utc::now())
            .unwrap()
            .unwrap();
        assert_eq!(commit, LearningCommit { created: 1, linked: 1 });

        let item = store.get_inbound("10").unwrap().unwrap();
        assert!(item.learning_processed);
        assert!(item.learning_processed_at.is_some());
        assert_eq!(store.memories_for_source("10").unwrap().len(), 1);
    }

    #[test]
    fn test_second_commit_is_noop() {
        let store = Store::open_in_memory().unwrap();
        seed(&store, "10");

        store
            .commit_learning(Direction::Inbound, "10", &[memory("m1", "slang term wagmi")], Utc::now())
            .unwrap();
        let again = store
            .commit_learning(Direction::Inbound, "10", &[memory("m2", "slang term ser")], Utc::now())
            .unwrap();

        assert!(again.is_none());
        assert_eq!(store.count_memories().unwrap(), 1);
    }

    #[test]
    fn test_shared_memory_keeps_source_order() {
        let store = Store::open_in_memory().unwrap();
        seed(&store, "1");
        seed(&store, "2");

        let t0 = Utc::now();
        store.commit_learning(Direction::Inbound, "2", &[memory("m", "slang term gm")], t0).unwrap();
        let second = store
            .commit_learning(Direction::Inbound, "1", &[memory("m", "slang term gm")], t0 + chrono::Duration::seconds(1))
            .unwrap()
            .unwrap();

        assert_eq!(second.created, 0);
        assert_eq!(second.linked, 1);
        let stored = store.get_memory("m").unwrap().unwrap();
        assert_eq!(stored.source_item_ids, vec!["2".to_string(), "1".to_string()]);
    }

    #[test]
    fn test_unknown_item_writes_nothing() {
        let store = Store::open_in_memory().unwrap();
        let result = store
            .commit_learning(Direction::Outbound, "missing", &[memory("m", "x")], Utc::now())
            .unwrap();
        assert!(result.is_none());
        assert_eq!(store.count_memories().unwrap(), 0);
    }
}

//! Inbound / outbound social items

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use super::{set_cursor_on, Store};
use crate::models::{from_millis, Author, EngagementMetrics, InboundItem, ItemKind, OutboundItem};

const INBOUND_COLUMNS: &str = "id, kind, content, author_id, author_handle, in_reply_to, created_at, \
     learning_processed, learning_processed_at";

const OUTBOUND_COLUMNS: &str = "id, kind, content, author_id, author_handle, in_reply_to, created_at, \
     learning_processed, learning_processed_at, metrics";

fn kind_from_row(row: &Row, idx: usize) -> rusqlite::Result<ItemKind> {
    let raw: String = row.get(idx)?;
    ItemKind::parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, format!("bad kind {}", raw).into())
    })
}

fn inbound_from_row(row: &Row) -> rusqlite::Result<InboundItem> {
    let processed_at: Option<i64> = row.get(8)?;
    Ok(InboundItem {
        id: row.get(0)?,
        kind: kind_from_row(row, 1)?,
        content: row.get(2)?,
        author: Author {
            id: row.get(3)?,
            handle: row.get(4)?,
        },
        in_reply_to: row.get(5)?,
        created_at: from_millis(row.get(6)?),
        learning_processed: row.get(7)?,
        learning_processed_at: processed_at.map(from_millis),
    })
}

fn outbound_from_row(row: &Row) -> rusqlite::Result<OutboundItem> {
    let processed_at: Option<i64> = row.get(8)?;
    let metrics: Option<String> = row.get(9)?;
    Ok(OutboundItem {
        id: row.get(0)?,
        kind: kind_from_row(row, 1)?,
        content: row.get(2)?,
        author: Author {
            id: row.get(3)?,
            handle: row.get(4)?,
        },
        in_reply_to: row.get(5)?,
        created_at: from_millis(row.get(6)?),
        learning_processed: row.get(7)?,
        learning_processed_at: processed_at.map(from_millis),
        metrics: metrics.and_then(|m| serde_json::from_str::<EngagementMetrics>(&m).ok()),
    })
}

fn insert_inbound_on(conn: &Connection, item: &InboundItem, recorded_at: DateTime<Utc>) -> Result<bool> {
    let inserted = conn.execute(
        r#"
        INSERT OR IGNORE INTO inbound_items
            (id, kind, content, author_id, author_handle, in_reply_to, created_at, recorded_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
        params![
            item.id,
            item.kind.as_str(),
            item.content,
            item.author.id,
            item.author.handle,
            item.in_reply_to,
            item.created_at.timestamp_millis(),
            recorded_at.timestamp_millis(),
        ],
    )?;
    Ok(inserted == 1)
}

pub(super) fn record_outbound_on(conn: &Connection, item: &OutboundItem, recorded_at: DateTime<Utc>) -> Result<bool> {
    let metrics = item.metrics.map(|m| serde_json::to_string(&m)).transpose()?;
    let inserted = conn.execute(
        r#"
        INSERT OR IGNORE INTO outbound_items
            (id, kind, content, author_id, author_handle, in_reply_to, created_at, recorded_at, metrics)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
        params![
            item.id,
            item.kind.as_str(),
            item.content,
            item.author.id,
            item.author.handle,
            item.in_reply_to,
            item.created_at.timestamp_millis(),
            recorded_at.timestamp_millis(),
            metrics,
        ],
    )?;
    Ok(inserted == 1)
}

impl Store {
    /// Insert one inbound item. Returns false if the platform id was already
    /// stored (duplicates are ignored, not errors).
    pub fn insert_inbound(&self, item: &InboundItem, recorded_at: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn.lock();
        insert_inbound_on(&conn, item, recorded_at)
    }

    /// Persist a batch of fetched mentions and advance the cursor in the same
    /// transaction. Returns the ids that were new.
    pub fn ingest_inbound(
        &self,
        items: &[InboundItem],
        cursor: Option<(&str, &str)>,
        recorded_at: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let mut fresh = Vec::new();
        for item in items {
            if insert_inbound_on(&tx, item, recorded_at)? {
                fresh.push(item.id.clone());
            } else {
                debug!("Inbound {} already stored", item.id);
            }
        }

        if let Some((name, value)) = cursor {
            set_cursor_on(&tx, name, value, recorded_at)?;
        }

        tx.commit()?;
        Ok(fresh)
    }

    /// Record something we published
    pub fn record_outbound(&self, item: &OutboundItem, recorded_at: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn.lock();
        record_outbound_on(&conn, item, recorded_at)
    }

    /// Refresh engagement counters on one of our posts
    pub fn update_outbound_metrics(&self, id: &str, metrics: &EngagementMetrics) -> Result<bool> {
        let raw = serde_json::to_string(metrics)?;
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE outbound_items SET metrics = ?2 WHERE id = ?1",
            params![id, raw],
        )?;
        Ok(updated == 1)
    }

    pub fn get_inbound(&self, id: &str) -> Result<Option<InboundItem>> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {} FROM inbound_items WHERE id = ?1", INBOUND_COLUMNS);
        Ok(conn.query_row(&sql, params![id], inbound_from_row).optional()?)
    }

    pub fn get_outbound(&self, id: &str) -> Result<Option<OutboundItem>> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {} FROM outbound_items WHERE id = ?1", OUTBOUND_COLUMNS);
        Ok(conn.query_row(&sql, params![id], outbound_from_row).optional()?)
    }

    /// Oldest inbound items the learning worker has not processed yet
    pub fn pending_inbound(&self, limit: usize) -> Result<Vec<InboundItem>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM inbound_items WHERE learning_processed = 0 ORDER BY created_at ASC, id ASC LIMIT ?1",
            INBOUND_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let items = stmt
            .query_map(params![limit as i64], inbound_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    /// Oldest outbound items the learning worker has not processed yet
    pub fn pending_outbound(&self, limit: usize) -> Result<Vec<OutboundItem>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM outbound_items WHERE learning_processed = 0 ORDER BY created_at ASC, id ASC LIMIT ?1",
            OUTBOUND_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let items = stmt
            .query_map(params![limit as i64], outbound_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    /// Most recent outbound items (newest first)
    pub fn recent_outbound(&self, limit: usize) -> Result<Vec<OutboundItem>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM outbound_items ORDER BY recorded_at DESC LIMIT ?1",
            OUTBOUND_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let items = stmt
            .query_map(params![limit as i64], outbound_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    /// Number of items we published at or after `since`
    pub fn outbound_count_since(&self, since: DateTime<Utc>) -> Result<u32> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM outbound_items WHERE recorded_at >= ?1",
            params![since.timestamp_millis()],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    /// Whether we already replied to an inbound item
    pub fn has_reply_to(&self, item_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let exists: bool = conn.query_row(
            r#"
            SELECT EXISTS(SELECT 1 FROM outbound_items WHERE in_reply_to = ?1)
                OR EXISTS(SELECT 1 FROM pending_posts WHERE in_reply_to = ?1 AND status != 'rejected')
            "#,
            params![item_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn mention(id: &str) -> InboundItem {
        InboundItem::mention(
            id,
            "@persona gm ser",
            Author::new("42", "fan"),
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_duplicate_inbound_ignored() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.insert_inbound(&mention("1"), Utc::now()).unwrap());
        assert!(!store.insert_inbound(&mention("1"), Utc::now()).unwrap());

        let stored = store.get_inbound("1").unwrap().unwrap();
        assert_eq!(stored.author.handle, "fan");
        assert!(!stored.learning_processed);
    }

    #[test]
    fn test_ingest_advances_cursor_with_items() {
        let store = Store::open_in_memory().unwrap();
        store.insert_inbound(&mention("1"), Utc::now()).unwrap();

        let fresh = store
            .ingest_inbound(&[mention("1"), mention("2"), mention("3")], Some(("mentions", "3")), Utc::now())
            .unwrap();

        assert_eq!(fresh, vec!["2".to_string(), "3".to_string()]);
        assert_eq!(store.get_cursor("mentions").unwrap().as_deref(), Some("3"));
        assert_eq!(store.pending_inbound(10).unwrap().len(), 3);
    }

    #[test]
    fn test_outbound_count_window() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let author = Author::new("1", "persona");

        let old = OutboundItem::post("a", "old", author.clone(), now);
        store.record_outbound(&old, now - chrono::Duration::hours(2)).unwrap();
        let fresh = OutboundItem::post("b", "fresh", author, now);
        store.record_outbound(&fresh, now - chrono::Duration::minutes(10)).unwrap();

        assert_eq!(store.outbound_count_since(now - chrono::Duration::hours(1)).unwrap(), 1);
        assert_eq!(store.outbound_count_since(now - chrono::Duration::days(1)).unwrap(), 2);
    }

    #[test]
    fn test_metrics_persist() {
        let store = Store::open_in_memory().unwrap();
        let post = OutboundItem::post("p1", "thread", Author::new("1", "persona"), Utc::now());
        store.record_outbound(&post, Utc::now()).unwrap();

        let metrics = EngagementMetrics { likes: 12, replies: 3, reposts: 1, quotes: 0 };
        assert!(store.update_outbound_metrics("p1", &metrics).unwrap());

        let stored = store.get_outbound("p1").unwrap().unwrap();
        assert_eq!(stored.metrics, Some(metrics));
    }
}

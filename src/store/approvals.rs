//! Approval queue for staged posts

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::items::record_outbound_on;
use super::Store;
use crate::models::{from_millis, OutboundItem, PendingPost, PendingStatus};

fn pending_from_row(row: &Row) -> rusqlite::Result<PendingPost> {
    let status: String = row.get(4)?;
    Ok(PendingPost {
        id: row.get(0)?,
        content: row.get(1)?,
        in_reply_to: row.get(2)?,
        created_at: from_millis(row.get(3)?),
        status: PendingStatus::parse(&status).unwrap_or(PendingStatus::Pending),
    })
}

impl Store {
    /// Stage content for a human decision
    pub fn stage_post(&self, content: &str, in_reply_to: Option<&str>, now: DateTime<Utc>) -> Result<PendingPost> {
        let post = PendingPost {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.to_string(),
            in_reply_to: in_reply_to.map(|s| s.to_string()),
            created_at: now,
            status: PendingStatus::Pending,
        };

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO pending_posts (id, content, in_reply_to, created_at, status) VALUES (?1, ?2, ?3, ?4, 'pending')",
            params![post.id, post.content, post.in_reply_to, now.timestamp_millis()],
        )?;
        Ok(post)
    }

    /// Staged posts with the given status, oldest first
    pub fn list_pending(&self, status: PendingStatus) -> Result<Vec<PendingPost>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT id, content, in_reply_to, created_at, status FROM pending_posts
            WHERE status = ?1 ORDER BY created_at ASC, id ASC
            "#,
        )?;
        let posts = stmt
            .query_map(params![status.as_str()], pending_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(posts)
    }

    /// Approve or reject a pending post. Returns false if it is unknown or no
    /// longer pending.
    pub fn decide_pending(&self, id: &str, approve: bool, now: DateTime<Utc>) -> Result<bool> {
        let status = if approve { PendingStatus::Approved } else { PendingStatus::Rejected };
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE pending_posts SET status = ?2, decided_at = ?3 WHERE id = ?1 AND status = 'pending'",
            params![id, status.as_str(), now.timestamp_millis()],
        )?;
        Ok(updated == 1)
    }

    /// Oldest approved post still waiting to be published
    pub fn next_approved(&self) -> Result<Option<PendingPost>> {
        let conn = self.conn.lock();
        let post = conn
            .query_row(
                r#"
                SELECT id, content, in_reply_to, created_at, status FROM pending_posts
                WHERE status = 'approved' ORDER BY decided_at ASC, created_at ASC LIMIT 1
                "#,
                [],
                pending_from_row,
            )
            .optional()?;
        Ok(post)
    }

    /// Take an approved post for publishing, before the provider is called.
    /// A claimed post is never offered again unless the claim is released.
    /// Returns false if it is no longer approved.
    pub fn claim_approved(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE pending_posts SET status = 'posted' WHERE id = ?1 AND status = 'approved'",
            params![id],
        )?;
        Ok(updated == 1)
    }

    /// Undo a claim when the provider refused the post
    pub fn release_approved_claim(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE pending_posts SET status = 'approved' \
             WHERE id = ?1 AND status = 'posted' AND posted_item_id IS NULL",
            params![id],
        )?;
        Ok(updated == 1)
    }

    /// Record the published item and link it to its claimed approval, in one
    /// transaction
    pub fn record_approved_post(&self, id: &str, item: &OutboundItem, recorded_at: DateTime<Utc>) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        record_outbound_on(&tx, item, recorded_at)?;
        let linked = tx.execute(
            "UPDATE pending_posts SET posted_item_id = ?2 WHERE id = ?1 AND status = 'posted'",
            params![id, item.id],
        )?;
        tx.commit()?;
        Ok(linked == 1)
    }

    pub fn count_pending(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM pending_posts WHERE status = 'pending'",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Author;

    #[test]
    fn test_stage_approve_post_flow() {
        let store = Store::open_in_memory().unwrap();
        let staged = store.stage_post("markets are quiet today", None, Utc::now()).unwrap();
        assert_eq!(store.count_pending().unwrap(), 1);
        assert!(store.next_approved().unwrap().is_none());

        assert!(store.decide_pending(&staged.id, true, Utc::now()).unwrap());
        // Decisions are final
        assert!(!store.decide_pending(&staged.id, false, Utc::now()).unwrap());

        let approved = store.next_approved().unwrap().unwrap();
        assert_eq!(approved.id, staged.id);

        assert!(store.claim_approved(&staged.id).unwrap());
        let item = OutboundItem::post("tweet-1", &approved.content, Author::new("1", "me"), Utc::now());
        assert!(store.record_approved_post(&staged.id, &item, Utc::now()).unwrap());

        assert!(store.next_approved().unwrap().is_none());
        assert_eq!(store.list_pending(PendingStatus::Posted).unwrap().len(), 1);
        assert!(store.get_outbound("tweet-1").unwrap().is_some());
        // Linked posts stay claimed
        assert!(!store.release_approved_claim(&staged.id).unwrap());
    }

    #[test]
    fn test_claim_is_exclusive_and_releasable() {
        let store = Store::open_in_memory().unwrap();
        let staged = store.stage_post("gm", None, Utc::now()).unwrap();
        store.decide_pending(&staged.id, true, Utc::now()).unwrap();

        assert!(store.claim_approved(&staged.id).unwrap());
        assert!(!store.claim_approved(&staged.id).unwrap());
        // Claimed posts are not offered again
        assert!(store.next_approved().unwrap().is_none());

        assert!(store.release_approved_claim(&staged.id).unwrap());
        assert_eq!(store.next_approved().unwrap().map(|p| p.id), Some(staged.id));
    }

    #[test]
    fn test_rejected_post_never_published() {
        let store = Store::open_in_memory().unwrap();
        let staged = store.stage_post("spicy take", Some("55"), Utc::now()).unwrap();
        store.decide_pending(&staged.id, false, Utc::now()).unwrap();

        assert!(store.next_approved().unwrap().is_none());
        assert!(!store.claim_approved(&staged.id).unwrap());
        // A rejected reply doesn't count as answered
        assert!(!store.has_reply_to("55").unwrap());
    }
}

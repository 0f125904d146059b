//! Event and node persistence.
//!
//! Every state change is a single guarded UPDATE whose WHERE clause
//! carries the expected current state; zero rows updated means another
//! node won the race or an operator intervened. No advisory locks, no
//! leases: the database is the arbiter.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::info;

use crate::event::{Event, EventState};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("event not found: {0}")]
    NotFound(String),
    #[error("illegal state transition {from} -> {to} for event {id}")]
    IllegalTransition {
        id: String,
        from: EventState,
        to: EventState,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A peer node advertised for backfill.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Node {
    pub name: String,
    pub url: String,
    pub backfill_from: bool,
    pub is_local: bool,
}

const EVENT_COLUMNS: &str = "id, sheet_name, event_start, event_end, category, description, \
     image_links, tags, video_ranges, video_transitions, video_crop, video_title, \
     video_description, video_tags, video_channel, video_quality, thumbnail_mode, \
     thumbnail_time, thumbnail_template, thumbnail_image, thumbnail_crop, thumbnail_location, \
     thumbnail_last_written, allow_holes, public, uploader_whitelist, upload_location, \
     state, uploader, error, video_id, video_link, editor, edit_time, upload_time, last_modified";

#[derive(Clone)]
pub struct EventStore {
    pool: SqlitePool,
}

impl EventStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a full event row. Used by the sheet-sync shim and tests.
    pub async fn insert(&self, event: &Event) -> Result<()> {
        let sql = format!(
            "INSERT INTO events ({EVENT_COLUMNS}) VALUES \
             (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, \
              ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        sqlx::query(&sql)
            .bind(&event.id)
            .bind(&event.sheet_name)
            .bind(event.event_start)
            .bind(event.event_end)
            .bind(&event.category)
            .bind(&event.description)
            .bind(&event.image_links)
            .bind(&event.tags)
            .bind(&event.video_ranges)
            .bind(&event.video_transitions)
            .bind(&event.video_crop)
            .bind(&event.video_title)
            .bind(&event.video_description)
            .bind(&event.video_tags)
            .bind(&event.video_channel)
            .bind(&event.video_quality)
            .bind(event.thumbnail_mode)
            .bind(event.thumbnail_time)
            .bind(&event.thumbnail_template)
            .bind(&event.thumbnail_image)
            .bind(&event.thumbnail_crop)
            .bind(&event.thumbnail_location)
            .bind(&event.thumbnail_last_written)
            .bind(event.allow_holes)
            .bind(event.public)
            .bind(&event.uploader_whitelist)
            .bind(&event.upload_location)
            .bind(event.state)
            .bind(&event.uploader)
            .bind(&event.error)
            .bind(&event.video_id)
            .bind(&event.video_link)
            .bind(&event.editor)
            .bind(event.edit_time)
            .bind(event.upload_time)
            .bind(event.last_modified)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Event> {
        sqlx::query_as::<_, Event>("SELECT * FROM events WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    pub async fn list_by_state(&self, state: EventState) -> Result<Vec<Event>> {
        Ok(
            sqlx::query_as::<_, Event>(
                "SELECT * FROM events WHERE state = ? ORDER BY edit_time, id",
            )
            .bind(state)
            .fetch_all(&self.pool)
            .await?,
        )
    }

    /// Candidate rows this cutter could claim: `EDITED`, unowned, in one
    /// of its configured upload locations, and not excluded by the row's
    /// uploader allow-list. Coverage checks happen in the cutter before
    /// it attempts the claim.
    pub async fn list_claimable(&self, uploader: &str, locations: &[String]) -> Result<Vec<Event>> {
        if locations.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = locations.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let sql = format!(
            "SELECT * FROM events \
             WHERE state = 'EDITED' AND uploader IS NULL \
               AND upload_location IN ({placeholders}) \
               AND (uploader_whitelist IS NULL \
                    OR EXISTS (SELECT 1 FROM json_each(events.uploader_whitelist) WHERE value = ?)) \
             ORDER BY edit_time, id"
        );
        let mut query = sqlx::query_as::<_, Event>(&sql);
        for location in locations {
            query = query.bind(location);
        }
        Ok(query.bind(uploader).fetch_all(&self.pool).await?)
    }

    /// Atomically claim one specific `EDITED` row.
    ///
    /// Returns `None` when another cutter won: the WHERE clause still
    /// requires `state = 'EDITED' AND uploader IS NULL`, so exactly one
    /// concurrent UPDATE can affect the row.
    pub async fn try_claim(&self, id: &str, uploader: &str) -> Result<Option<Event>> {
        let claimed = sqlx::query_as::<_, Event>(
            "UPDATE events \
             SET state = 'CLAIMED', uploader = ?, error = NULL, last_modified = ? \
             WHERE id = ? AND state = 'EDITED' AND uploader IS NULL \
             RETURNING *",
        )
        .bind(uploader)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(claimed)
    }

    /// Atomically take ownership of a `MODIFIED` row. The row stays in
    /// `MODIFIED` while owned; `finish_modify` moves it back to `DONE`.
    pub async fn try_claim_modified(&self, id: &str, uploader: &str) -> Result<Option<Event>> {
        let claimed = sqlx::query_as::<_, Event>(
            "UPDATE events \
             SET uploader = ?, error = NULL, last_modified = ? \
             WHERE id = ? AND state = 'MODIFIED' AND uploader IS NULL \
             RETURNING *",
        )
        .bind(uploader)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(claimed)
    }

    /// Retryable failure: give the row back for any cutter to retry.
    pub async fn release_claim(&self, id: &str) -> Result<bool> {
        self.guarded_update(
            id,
            EventState::Claimed,
            EventState::Edited,
            "uploader = NULL, error = NULL",
        )
        .await
    }

    /// Non-retryable failure: needs an operator. `uploader` is retained
    /// so the operator can see which node hit the error.
    pub async fn fail_to_unedited(&self, id: &str, error: &str) -> Result<bool> {
        let rows = sqlx::query(
            "UPDATE events SET state = 'UNEDITED', error = ?, last_modified = ? \
             WHERE id = ? AND state IN ('CLAIMED', 'FINALIZING')",
        )
        .bind(error)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows == 1)
    }

    /// All cut bytes are at the backend; about to ask it to commit.
    pub async fn begin_finalizing(&self, id: &str) -> Result<bool> {
        self.guarded_update(id, EventState::Claimed, EventState::Finalizing, "")
            .await
    }

    /// The backend confirmed the upload never committed; safe to retry.
    pub async fn finalizing_rollback(&self, id: &str) -> Result<bool> {
        self.guarded_update(
            id,
            EventState::Finalizing,
            EventState::Edited,
            "uploader = NULL, error = NULL",
        )
        .await
    }

    /// Commit acknowledged: record the backend handle and advance to
    /// `TRANSCODING` or straight to `DONE` when immediately playable.
    pub async fn record_commit(
        &self,
        id: &str,
        video_id: &str,
        video_link: &str,
        playable: bool,
    ) -> Result<bool> {
        let to = if playable {
            EventState::Done
        } else {
            EventState::Transcoding
        };
        let rows = sqlx::query(
            "UPDATE events \
             SET state = ?, video_id = ?, video_link = ?, upload_time = ?, last_modified = ? \
             WHERE id = ? AND state = 'FINALIZING'",
        )
        .bind(to)
        .bind(video_id)
        .bind(video_link)
        .bind(Utc::now())
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows == 1)
    }

    /// Any cutter that observes the backend finished post-processing
    /// advances the row, regardless of who uploaded it.
    pub async fn finish_transcoding(&self, id: &str) -> Result<bool> {
        self.guarded_update(id, EventState::Transcoding, EventState::Done, "")
            .await
    }

    /// Metadata push done; back to `DONE`. Updates the thumbnail hash
    /// when a new image was uploaded.
    pub async fn finish_modify(&self, id: &str, thumbnail_hash: Option<&str>) -> Result<bool> {
        let rows = match thumbnail_hash {
            Some(hash) => {
                sqlx::query(
                    "UPDATE events \
                     SET state = 'DONE', uploader = NULL, thumbnail_last_written = ?, last_modified = ? \
                     WHERE id = ? AND state = 'MODIFIED'",
                )
                .bind(hash)
                .bind(Utc::now())
                .bind(id)
                .execute(&self.pool)
                .await?
                .rows_affected()
            }
            None => {
                sqlx::query(
                    "UPDATE events \
                     SET state = 'DONE', uploader = NULL, last_modified = ? \
                     WHERE id = ? AND state = 'MODIFIED'",
                )
                .bind(Utc::now())
                .bind(id)
                .execute(&self.pool)
                .await?
                .rows_affected()
            }
        };
        Ok(rows == 1)
    }

    /// A `MODIFIED` row that cannot be serviced (e.g. the backend does
    /// not support metadata edits) stays `MODIFIED` with `error` set for
    /// the operator and no owner.
    pub async fn modify_failed(&self, id: &str, error: &str) -> Result<bool> {
        let rows = sqlx::query(
            "UPDATE events SET uploader = NULL, error = ?, last_modified = ? \
             WHERE id = ? AND state = 'MODIFIED'",
        )
        .bind(error)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows == 1)
    }

    /// Record the hash of the most recently uploaded thumbnail.
    pub async fn set_thumbnail_written(&self, id: &str, hash: &str) -> Result<bool> {
        let rows = sqlx::query(
            "UPDATE events SET thumbnail_last_written = ?, last_modified = ? WHERE id = ?",
        )
        .bind(hash)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows == 1)
    }

    /// Operator-timeout sweep: rows stuck in `CLAIMED` go back to
    /// `EDITED`. The cut is pure and idempotent, so a crashed cutter's
    /// claim can always be redone. `FINALIZING` rows are deliberately
    /// untouched: the commit outcome is ambiguous.
    pub async fn reset_stale_claims(&self, older_than: ChronoDuration) -> Result<u64> {
        let cutoff: DateTime<Utc> = Utc::now() - older_than;
        let rows = sqlx::query(
            "UPDATE events \
             SET state = 'EDITED', uploader = NULL, last_modified = ? \
             WHERE state = 'CLAIMED' AND last_modified < ?",
        )
        .bind(Utc::now())
        .bind(cutoff)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if rows > 0 {
            info!(rows, "Reset stale claims to EDITED");
        }
        Ok(rows)
    }

    async fn guarded_update(
        &self,
        id: &str,
        from: EventState,
        to: EventState,
        extra_set: &str,
    ) -> Result<bool> {
        if !EventState::can_transition(from, to) {
            return Err(StoreError::IllegalTransition {
                id: id.to_string(),
                from,
                to,
            });
        }
        let extra = if extra_set.is_empty() {
            String::new()
        } else {
            format!(", {extra_set}")
        };
        let sql = format!(
            "UPDATE events SET state = ?, last_modified = ?{extra} WHERE id = ? AND state = ?"
        );
        let rows = sqlx::query(&sql)
            .bind(to)
            .bind(Utc::now())
            .bind(id)
            .bind(from)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(rows == 1)
    }

    // Nodes

    pub async fn upsert_node(&self, node: &Node) -> Result<()> {
        sqlx::query(
            "INSERT INTO nodes (name, url, backfill_from, is_local) VALUES (?, ?, ?, ?) \
             ON CONFLICT (name) DO UPDATE SET url = excluded.url, \
             backfill_from = excluded.backfill_from, is_local = excluded.is_local",
        )
        .bind(&node.name)
        .bind(&node.url)
        .bind(node.backfill_from)
        .bind(node.is_local)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Peers to backfill from: advertised, not ourselves.
    pub async fn list_backfill_peers(&self, local_name: &str) -> Result<Vec<Node>> {
        Ok(sqlx::query_as::<_, Node>(
            "SELECT name, url, backfill_from, is_local FROM nodes \
             WHERE backfill_from AND NOT is_local AND name != ? ORDER BY name",
        )
        .bind(local_name)
        .fetch_all(&self.pool)
        .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ThumbnailMode, TimeRange, Transition};
    use sqlx::types::Json;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn store(dir: &TempDir) -> EventStore {
        let db_path = dir.path().join("events.db");
        let url = format!("sqlite:{}?mode=rwc", db_path.to_string_lossy());
        let pool = crate::db::create_pool(&url).await.unwrap();
        EventStore::new(pool)
    }

    fn edited_event(id: &str) -> Event {
        let mut event = Event::new(id, "sheet");
        event.state = EventState::Edited;
        event.upload_location = Some("archive".into());
        event.video_channel = Some("alpha".into());
        event.video_quality = Some("source".into());
        event.video_title = Some("a highlight".into());
        event.edit_time = Some(Utc::now());
        event.video_ranges = Some(Json(vec![TimeRange {
            start: Utc::now(),
            end: Utc::now() + ChronoDuration::seconds(10),
        }]));
        event.video_transitions = Some(Json(vec![]));
        event
    }

    #[tokio::test]
    async fn insert_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let mut event = edited_event("ev1");
        event.video_transitions = Some(Json(vec![Some(Transition {
            kind: "fade".into(),
            duration: 1.0,
        })]));
        event.thumbnail_mode = ThumbnailMode::Bare;
        store.insert(&event).await.unwrap();

        let got = store.get("ev1").await.unwrap();
        assert_eq!(got.state, EventState::Edited);
        assert_eq!(got.upload_location.as_deref(), Some("archive"));
        assert_eq!(got.thumbnail_mode, ThumbnailMode::Bare);
        let transitions = got.video_transitions.unwrap().0;
        assert_eq!(transitions[0].as_ref().unwrap().kind, "fade");
    }

    #[tokio::test]
    async fn claim_is_exclusive() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        store.insert(&edited_event("ev1")).await.unwrap();

        let a = store.try_claim("ev1", "node-a").await.unwrap();
        let b = store.try_claim("ev1", "node-b").await.unwrap();
        assert!(a.is_some());
        assert!(b.is_none(), "second claim must lose");
        assert_eq!(a.unwrap().uploader.as_deref(), Some("node-a"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_have_one_winner() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(store(&dir).await);
        store.insert(&edited_event("ev1")).await.unwrap();

        let mut join_set = tokio::task::JoinSet::new();
        for worker in 0..8 {
            let store = store.clone();
            join_set.spawn(async move {
                store
                    .try_claim("ev1", &format!("node-{worker}"))
                    .await
                    .unwrap()
                    .is_some()
            });
        }
        let mut winners = 0;
        while let Some(result) = join_set.join_next().await {
            if result.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn whitelist_filters_claimable() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;

        let mut restricted = edited_event("restricted");
        restricted.uploader_whitelist = Some(Json(vec!["node-b".into()]));
        store.insert(&restricted).await.unwrap();
        store.insert(&edited_event("open")).await.unwrap();

        let mut wrong_location = edited_event("wrong-location");
        wrong_location.upload_location = Some("youtube".into());
        store.insert(&wrong_location).await.unwrap();

        let for_a = store
            .list_claimable("node-a", &["archive".into()])
            .await
            .unwrap();
        assert_eq!(
            for_a.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(),
            vec!["open"]
        );

        let for_b = store
            .list_claimable("node-b", &["archive".into()])
            .await
            .unwrap();
        assert_eq!(for_b.len(), 2);
    }

    #[tokio::test]
    async fn full_lifecycle_to_done() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        store.insert(&edited_event("ev1")).await.unwrap();

        store.try_claim("ev1", "node-a").await.unwrap().unwrap();
        assert!(store.begin_finalizing("ev1").await.unwrap());
        assert!(
            store
                .record_commit("ev1", "vid-123", "https://example.test/vid-123", false)
                .await
                .unwrap()
        );
        let row = store.get("ev1").await.unwrap();
        assert_eq!(row.state, EventState::Transcoding);
        assert_eq!(row.video_id.as_deref(), Some("vid-123"));

        assert!(store.finish_transcoding("ev1").await.unwrap());
        assert_eq!(store.get("ev1").await.unwrap().state, EventState::Done);
    }

    #[tokio::test]
    async fn release_and_fail_paths() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        store.insert(&edited_event("ev1")).await.unwrap();

        store.try_claim("ev1", "node-a").await.unwrap().unwrap();
        assert!(store.release_claim("ev1").await.unwrap());
        let row = store.get("ev1").await.unwrap();
        assert_eq!(row.state, EventState::Edited);
        assert!(row.uploader.is_none());

        store.try_claim("ev1", "node-a").await.unwrap().unwrap();
        assert!(store.fail_to_unedited("ev1", "bad range").await.unwrap());
        let row = store.get("ev1").await.unwrap();
        assert_eq!(row.state, EventState::Unedited);
        assert_eq!(row.error.as_deref(), Some("bad range"));
        // Uploader retained so the operator can see who failed.
        assert_eq!(row.uploader.as_deref(), Some("node-a"));
    }

    #[tokio::test]
    async fn stale_claims_reset_but_finalizing_stays() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        store.insert(&edited_event("stuck")).await.unwrap();
        store.insert(&edited_event("committing")).await.unwrap();

        store.try_claim("stuck", "node-a").await.unwrap().unwrap();
        store
            .try_claim("committing", "node-a")
            .await
            .unwrap()
            .unwrap();
        store.begin_finalizing("committing").await.unwrap();

        // Nothing is stale yet.
        assert_eq!(
            store
                .reset_stale_claims(ChronoDuration::minutes(30))
                .await
                .unwrap(),
            0
        );
        // With a zero timeout the CLAIMED row resets, FINALIZING is kept.
        assert_eq!(
            store
                .reset_stale_claims(ChronoDuration::zero())
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            store.get("stuck").await.unwrap().state,
            EventState::Edited
        );
        assert_eq!(
            store.get("committing").await.unwrap().state,
            EventState::Finalizing
        );
    }

    #[tokio::test]
    async fn modified_claim_and_finish() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let mut event = edited_event("ev1");
        event.state = EventState::Modified;
        event.video_id = Some("vid-123".into());
        store.insert(&event).await.unwrap();

        let a = store.try_claim_modified("ev1", "node-a").await.unwrap();
        let b = store.try_claim_modified("ev1", "node-b").await.unwrap();
        assert!(a.is_some());
        assert!(b.is_none());

        assert!(store.finish_modify("ev1", Some("abc123")).await.unwrap());
        let row = store.get("ev1").await.unwrap();
        assert_eq!(row.state, EventState::Done);
        assert_eq!(row.thumbnail_last_written.as_deref(), Some("abc123"));
        assert!(row.uploader.is_none());
    }

    #[tokio::test]
    async fn nodes_roundtrip_and_peer_filtering() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        for node in [
            Node {
                name: "local".into(),
                url: "http://localhost:8000".into(),
                backfill_from: true,
                is_local: true,
            },
            Node {
                name: "peer-1".into(),
                url: "http://peer-1:8000".into(),
                backfill_from: true,
                is_local: false,
            },
            Node {
                name: "readonly".into(),
                url: "http://readonly:8000".into(),
                backfill_from: false,
                is_local: false,
            },
        ] {
            store.upsert_node(&node).await.unwrap();
        }

        let peers = store.list_backfill_peers("local").await.unwrap();
        assert_eq!(
            peers.iter().map(|n| n.name.as_str()).collect::<Vec<_>>(),
            vec!["peer-1"]
        );
    }
}

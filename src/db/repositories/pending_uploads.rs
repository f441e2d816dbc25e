use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{from_millis, to_millis, to_u32},
};
use crate::models::{PendingUpload, UploadMetadata, UploadPayload};

fn row_to_pending(row: &Row) -> Result<PendingUpload> {
    let attempts: i64 = row.get("attempts")?;
    let next_retry_at: i64 = row.get("next_retry_at_ms")?;
    let created_at: i64 = row.get("created_at_ms")?;

    Ok(PendingUpload {
        id: row.get("id")?,
        task_id: row.get("task_id")?,
        attempts: to_u32(attempts, "attempts")?,
        next_retry_at: from_millis(next_retry_at, "next_retry_at_ms")?,
        created_at: from_millis(created_at, "created_at_ms")?,
        last_error: row.get("last_error")?,
    })
}

impl Database {
    /// Writes a capture to the outbox. Re-inserting the same task is a no-op
    /// so a retried write-ahead cannot duplicate a capture.
    pub async fn insert_pending_upload(
        &self,
        payload: &UploadPayload,
        attempts: u32,
        next_retry_at: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Result<PendingUpload> {
        let metadata_json = serde_json::to_string(&payload.metadata)
            .context("failed to serialize upload metadata")?;
        let task_id = payload.task_id().to_string();
        let image = payload.image.clone();

        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO pending_uploads (task_id, metadata_json, image, attempts, next_retry_at_ms, created_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(task_id) DO NOTHING",
                params![
                    task_id,
                    metadata_json,
                    image,
                    i64::from(attempts),
                    to_millis(next_retry_at),
                    to_millis(created_at),
                ],
            )?;

            let mut stmt = conn.prepare(
                "SELECT id, task_id, attempts, next_retry_at_ms, created_at_ms, last_error
                 FROM pending_uploads
                 WHERE task_id = ?1",
            )?;
            let mut rows = stmt.query(params![task_id])?;
            let row = rows
                .next()?
                .context("pending upload missing right after insert")?;
            row_to_pending(row)
        })
        .await
    }

    /// All queued uploads, oldest first.
    pub async fn list_pending_uploads(&self) -> Result<Vec<PendingUpload>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, task_id, attempts, next_retry_at_ms, created_at_ms, last_error
                 FROM pending_uploads
                 ORDER BY id ASC",
            )?;

            let mut rows = stmt.query([])?;
            let mut uploads = Vec::new();
            while let Some(row) = rows.next()? {
                uploads.push(row_to_pending(row)?);
            }
            Ok(uploads)
        })
        .await
    }

    pub async fn load_pending_payload(&self, id: i64) -> Result<Option<UploadPayload>> {
        self.execute(move |conn| {
            let record: Option<(String, Vec<u8>)> = conn
                .query_row(
                    "SELECT metadata_json, image FROM pending_uploads WHERE id = ?1",
                    params![id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            match record {
                Some((metadata_json, image)) => {
                    let metadata: UploadMetadata = serde_json::from_str(&metadata_json)
                        .with_context(|| format!("corrupt metadata for pending upload {id}"))?;
                    Ok(Some(UploadPayload { metadata, image }))
                }
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn record_upload_failure(
        &self,
        id: i64,
        attempts: u32,
        next_retry_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<()> {
        let last_error = last_error.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE pending_uploads
                 SET attempts = ?1,
                     next_retry_at_ms = ?2,
                     last_error = ?3
                 WHERE id = ?4",
                params![
                    i64::from(attempts),
                    to_millis(next_retry_at),
                    last_error,
                    id
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn delete_pending_upload(&self, id: i64) -> Result<()> {
        self.execute(move |conn| {
            conn.execute("DELETE FROM pending_uploads WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await
    }

    pub async fn count_pending_uploads(&self) -> Result<u64> {
        self.execute(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM pending_uploads", [], |row| row.get(0))?;
            Ok(count.max(0) as u64)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActivityBucket, CaptureContext, CaptureTask, EncodedImage};
    use chrono::Duration;

    fn payload(now: DateTime<Utc>) -> UploadPayload {
        UploadPayload::new(
            CaptureTask::interval(now),
            ActivityBucket::empty(now),
            CaptureContext::default(),
            now,
            EncodedImage {
                bytes: vec![1, 2, 3, 4],
                mime: "image/jpeg".into(),
                width: 2,
                height: 2,
            },
        )
    }

    fn open_db(dir: &tempfile::TempDir) -> Database {
        Database::new(dir.path().join("outbox.sqlite3")).unwrap()
    }

    #[tokio::test]
    async fn insert_then_load_keeps_image_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);
        let now = Utc::now();
        let payload = payload(now);

        let pending = db.insert_pending_upload(&payload, 0, now, now).await.unwrap();
        assert_eq!(pending.task_id, payload.task_id());
        assert_eq!(pending.attempts, 0);

        let loaded = db.load_pending_payload(pending.id).await.unwrap().unwrap();
        assert_eq!(loaded, payload);
    }

    #[tokio::test]
    async fn duplicate_task_insert_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);
        let now = Utc::now();
        let payload = payload(now);

        let first = db.insert_pending_upload(&payload, 0, now, now).await.unwrap();
        let second = db.insert_pending_upload(&payload, 3, now, now).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.attempts, 0);
        assert_eq!(db.count_pending_uploads().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn list_is_in_creation_order() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);
        let now = Utc::now();

        let a = payload(now);
        let b = payload(now + Duration::seconds(60));
        db.insert_pending_upload(&a, 0, now, now).await.unwrap();
        db.insert_pending_upload(&b, 0, now, now + Duration::seconds(60))
            .await
            .unwrap();

        let listed = db.list_pending_uploads().await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|p| p.task_id.as_str()).collect();
        assert_eq!(ids, vec![a.task_id(), b.task_id()]);
    }

    #[tokio::test]
    async fn failure_update_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);
        let now = Utc::now();
        let pending = db
            .insert_pending_upload(&payload(now), 0, now, now)
            .await
            .unwrap();

        let retry_at = now + Duration::seconds(10);
        db.record_upload_failure(pending.id, 1, retry_at, "503")
            .await
            .unwrap();
        let listed = db.list_pending_uploads().await.unwrap();
        assert_eq!(listed[0].attempts, 1);
        assert_eq!(listed[0].last_error.as_deref(), Some("503"));
        assert_eq!(listed[0].next_retry_at.timestamp_millis(), retry_at.timestamp_millis());

        db.delete_pending_upload(pending.id).await.unwrap();
        assert_eq!(db.count_pending_uploads().await.unwrap(), 0);
        assert!(db.load_pending_payload(pending.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn queue_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        {
            let db = open_db(&dir);
            db.insert_pending_upload(&payload(now), 2, now, now)
                .await
                .unwrap();
        }

        let reopened = open_db(&dir);
        let listed = reopened.list_pending_uploads().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].attempts, 2);
    }
}

//! Observation store: append-only `observations` table.
//!
//! Exposes exactly one write (`insert`) and one read (`recent`). Rows are
//! never updated or deleted.

use sqlx::SqlitePool;

use crate::models::{NewObservation, Observation};

/// Row cap for `recent`.
pub const RECENT_LIMIT: u32 = 100;

#[derive(Debug, Clone)]
pub struct ObservationStore {
    pool: SqlitePool,
}

impl ObservationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Append one row. `id` and `created_at` are both assigned by the same
    /// statement, so id order and creation order agree.
    pub async fn insert(&self, new: NewObservation) -> Result<Observation, sqlx::Error> {
        let row: Observation = sqlx::query_as(
            r#"
            INSERT INTO observations
                (filename, image_url, label, estimated_age, confidence, raw_response, created_at)
            VALUES (?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            RETURNING id, filename, image_url, label, estimated_age, confidence, raw_response, created_at
            "#,
        )
        .bind(&new.filename)
        .bind(&new.image_url)
        .bind(&new.label)
        .bind(&new.estimated_age)
        .bind(new.confidence)
        .bind(&new.raw_response)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(id = row.id, filename = %row.filename, "Observation stored");
        Ok(row)
    }

    /// Most recent rows, newest first, capped at [`RECENT_LIMIT`].
    pub async fn recent(&self, limit: u32) -> Result<Vec<Observation>, sqlx::Error> {
        let limit = limit.min(RECENT_LIMIT);

        sqlx::query_as(
            r#"
            SELECT id, filename, image_url, label, estimated_age, confidence, raw_response, created_at
            FROM observations
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn count(&self) -> Result<i64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM observations")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_memory_pool;

    async fn store() -> ObservationStore {
        ObservationStore::new(create_memory_pool().await.unwrap())
    }

    fn sample(filename: &str) -> NewObservation {
        NewObservation {
            filename: filename.to_string(),
            image_url: format!("/uploads/{}", filename),
            label: Some("clay shard".to_string()),
            estimated_age: Some("1200-1400 CE".to_string()),
            confidence: Some(0.82),
            raw_response: "{}".to_string(),
        }
    }

    #[tokio::test]
    async fn test_insert_assigns_increasing_ids() {
        let store = store().await;
        let first = store.insert(sample("a.png")).await.unwrap();
        let second = store.insert(sample("b.png")).await.unwrap();

        assert!(second.id > first.id);
        assert!(second.created_at >= first.created_at);
        assert_eq!(second.label.as_deref(), Some("clay shard"));
        assert_eq!(second.image_url.as_deref(), Some("/uploads/b.png"));
    }

    #[tokio::test]
    async fn test_insert_keeps_nulls() {
        let store = store().await;
        let row = store
            .insert(NewObservation {
                filename: "raw.png".to_string(),
                image_url: "/uploads/raw.png".to_string(),
                raw_response: "\"not json\"".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(row.label.is_none());
        assert!(row.estimated_age.is_none());
        assert!(row.confidence.is_none());
        assert_eq!(row.raw_response.as_deref(), Some("\"not json\""));
    }

    #[tokio::test]
    async fn test_recent_is_newest_first() {
        let store = store().await;
        for name in ["1.png", "2.png", "3.png"] {
            store.insert(sample(name)).await.unwrap();
        }

        let rows = store.recent(RECENT_LIMIT).await.unwrap();
        let names: Vec<_> = rows.iter().map(|r| r.filename.as_str()).collect();
        assert_eq!(names, vec!["3.png", "2.png", "1.png"]);
    }

    #[tokio::test]
    async fn test_recent_never_exceeds_cap() {
        let store = store().await;
        for i in 0..105 {
            store.insert(sample(&format!("{}.png", i))).await.unwrap();
        }

        assert_eq!(store.count().await.unwrap(), 105);
        let rows = store.recent(500).await.unwrap();
        assert_eq!(rows.len(), RECENT_LIMIT as usize);
        assert_eq!(rows[0].filename, "104.png");
    }

    #[tokio::test]
    async fn test_created_at_is_fixed_width_text() {
        let store = store().await;
        for name in ["a.png", "b.png", "c.png"] {
            store.insert(sample(name)).await.unwrap();
        }

        let rows: Vec<(i64, String)> = sqlx::query_as("SELECT id, created_at FROM observations ORDER BY id")
            .fetch_all(store.pool())
            .await
            .unwrap();

        assert_eq!(rows.len(), 3);
        for (_, created_at) in &rows {
            // 2026-01-02T03:04:05.678Z
            assert_eq!(created_at.len(), 24, "{}", created_at);
            assert_eq!(&created_at[10..11], "T");
            assert!(created_at.ends_with('Z'));
        }
        assert!(rows.windows(2).all(|w| w[0].1 <= w[1].1));
    }
}

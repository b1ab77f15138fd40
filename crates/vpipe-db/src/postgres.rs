//! PostgreSQL video repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres};
use tracing::{debug, info};
use uuid::Uuid;
use vpipe_models::{Stage, StageRunStatus, Video, VideoId, VideoStatus};

use crate::config::DatabaseConfig;
use crate::error::{RepositoryError, RepositoryResult};
use crate::repository::VideoRepository;

#[derive(Debug, sqlx::FromRow)]
struct VideoRow {
    id: Uuid,
    filename: String,
    status: String,
    processed_file: Option<String>,
    uploaded_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl TryFrom<VideoRow> for Video {
    type Error = RepositoryError;

    fn try_from(row: VideoRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<VideoStatus>()
            .map_err(|e| RepositoryError::InvalidRecord(e.to_string()))?;

        Ok(Video {
            id: VideoId::from(row.id.to_string()),
            filename: row.filename,
            status,
            processed_file: row.processed_file,
            uploaded_at: row.uploaded_at,
            processed_at: row.processed_at,
        })
    }
}

const SELECT_VIDEO: &str = r#"
    SELECT id, filename, status, processed_file, uploaded_at, processed_at
    FROM videos
"#;

/// `VideoRepository` on PostgreSQL.
#[derive(Clone)]
pub struct PgVideoRepository {
    pool: PgPool,
}

impl PgVideoRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool. Does not run migrations.
    pub async fn connect(config: &DatabaseConfig) -> RepositoryResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await?;

        info!(max_connections = config.max_connections, "Connected to database");
        Ok(Self::new(pool))
    }

    /// Apply the embedded migrations.
    pub async fn migrate(&self) -> RepositoryResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn parse_id(id: &VideoId) -> RepositoryResult<Uuid> {
        Uuid::parse_str(id.as_str()).map_err(|_| RepositoryError::invalid_id(id.as_str()))
    }

    fn ensure_updated(rows: u64, id: &VideoId) -> RepositoryResult<()> {
        if rows == 0 {
            return Err(RepositoryError::not_found(id.as_str()));
        }
        Ok(())
    }
}

#[async_trait]
impl VideoRepository for PgVideoRepository {
    #[tracing::instrument(skip(self))]
    async fn find_by_id(&self, id: &VideoId) -> RepositoryResult<Video> {
        let uuid = Self::parse_id(id)?;

        let row = sqlx::query_as::<Postgres, VideoRow>(&format!("{} WHERE id = $1", SELECT_VIDEO))
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RepositoryError::not_found(id.as_str()))?;

        row.try_into()
    }

    #[tracing::instrument(skip(self))]
    async fn find_by_filename(&self, filename: &str) -> RepositoryResult<Video> {
        let row = sqlx::query_as::<Postgres, VideoRow>(&format!(
            "{} WHERE filename = $1",
            SELECT_VIDEO
        ))
        .bind(filename)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RepositoryError::not_found(filename))?;

        row.try_into()
    }

    #[tracing::instrument(skip(self))]
    async fn update_status(&self, id: &VideoId, status: VideoStatus) -> RepositoryResult<()> {
        let uuid = Self::parse_id(id)?;

        let result = sqlx::query("UPDATE videos SET status = $2 WHERE id = $1")
            .bind(uuid)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Self::ensure_updated(result.rows_affected(), id)?;

        debug!(video_id = %id, status = %status, "Updated video status");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn update_status_and_processed_file(
        &self,
        id: &VideoId,
        status: VideoStatus,
        processed_file: &str,
    ) -> RepositoryResult<()> {
        let uuid = Self::parse_id(id)?;

        let result = sqlx::query(
            r#"
            UPDATE videos
            SET status = $2,
                processed_file = $3,
                processed_at = CASE WHEN $2 = 'PROCESSED' THEN NOW() ELSE processed_at END
            WHERE id = $1
            "#,
        )
        .bind(uuid)
        .bind(status.as_str())
        .bind(processed_file)
        .execute(&self.pool)
        .await?;
        Self::ensure_updated(result.rows_affected(), id)?;

        debug!(
            video_id = %id,
            status = %status,
            processed_file = %processed_file,
            "Updated video status and processed file"
        );
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn record_stage_run(
        &self,
        id: &VideoId,
        stage: Stage,
        status: StageRunStatus,
    ) -> RepositoryResult<()> {
        let uuid = Self::parse_id(id)?;

        sqlx::query(
            r#"
            INSERT INTO video_stage_runs (video_id, stage, status, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (video_id, stage)
            DO UPDATE SET status = EXCLUDED.status, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(uuid)
        .bind(stage.as_str())
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        debug!(video_id = %id, stage = %stage, status = %status, "Recorded stage run");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn last_completed_stage(&self, id: &VideoId) -> RepositoryResult<Option<Stage>> {
        let uuid = Self::parse_id(id)?;

        let stage: Option<String> = sqlx::query_scalar(
            r#"
            SELECT stage FROM video_stage_runs
            WHERE video_id = $1 AND status = 'COMPLETED'
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
        )
        .bind(uuid)
        .fetch_optional(&self.pool)
        .await?;

        stage
            .map(|s| {
                s.parse::<Stage>()
                    .map_err(|e| RepositoryError::InvalidRecord(e.to_string()))
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_conversion() {
        let id = Uuid::new_v4();
        let row = VideoRow {
            id,
            filename: "a.mp4".into(),
            status: "ADDING_WATERMARK".into(),
            processed_file: None,
            uploaded_at: Utc::now(),
            processed_at: None,
        };
        let video = Video::try_from(row).unwrap();
        assert_eq!(video.id.as_str(), id.to_string());
        assert_eq!(video.status, VideoStatus::AddingWatermark);
    }

    #[test]
    fn test_unknown_status_is_invalid_record() {
        let row = VideoRow {
            id: Uuid::new_v4(),
            filename: "a.mp4".into(),
            status: "ENCODING".into(),
            processed_file: None,
            uploaded_at: Utc::now(),
            processed_at: None,
        };
        assert!(matches!(Video::try_from(row), Err(RepositoryError::InvalidRecord(_))));
    }

    #[test]
    fn test_malformed_id_is_rejected_before_query() {
        let err = PgVideoRepository::parse_id(&VideoId::from("123")).unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidId(_)));
    }
}

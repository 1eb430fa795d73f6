use super::JobStore;
use crate::job::{FailureReason, Job, JobId, JobParams, JobStatus, JobUpdate};
use crate::locale::Locale;
use crate::source::EntityId;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::info;

const SELECT_JOBS: &str = "SELECT id, content_type, source_locale, target_locale, entity_ids, \
     auto_publish, status, progress, failure_reason, total_entities, translated_entities, \
     created_at, updated_at FROM batch_translate_jobs";

/// Job store backed by a PostgreSQL table.
///
/// The explicit entity id list and the failure reason are stored as JSON text.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    /// Connect and create the jobs table if needed
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to job database")?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS batch_translate_jobs (
                id TEXT PRIMARY KEY,
                content_type TEXT NOT NULL,
                source_locale TEXT NOT NULL,
                target_locale TEXT NOT NULL,
                entity_ids TEXT,
                auto_publish BOOLEAN NOT NULL DEFAULT FALSE,
                status TEXT NOT NULL,
                progress DOUBLE PRECISION NOT NULL DEFAULT 0,
                failure_reason TEXT,
                total_entities BIGINT NOT NULL DEFAULT 0,
                translated_entities BIGINT NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create batch_translate_jobs table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS batch_translate_jobs_status_idx
                ON batch_translate_jobs (status)",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create batch_translate_jobs status index")?;

        info!("Job store ready");
        Ok(())
    }
}

fn status_names(statuses: &[JobStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

fn job_from_row(row: &PgRow) -> Result<Job> {
    let entity_ids: Option<String> = row.try_get("entity_ids")?;
    let entity_ids = entity_ids
        .map(|raw| serde_json::from_str::<Vec<EntityId>>(&raw))
        .transpose()
        .context("Invalid entity_ids column")?;

    let failure_reason: Option<String> = row.try_get("failure_reason")?;
    let failure_reason = failure_reason
        .map(|raw| serde_json::from_str::<FailureReason>(&raw))
        .transpose()
        .context("Invalid failure_reason column")?;

    let status: String = row.try_get("status")?;
    let source_locale: String = row.try_get("source_locale")?;
    let target_locale: String = row.try_get("target_locale")?;
    let total: i64 = row.try_get("total_entities")?;
    let translated: i64 = row.try_get("translated_entities")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;
    let id: String = row.try_get("id")?;

    Ok(Job {
        id: JobId::from(id),
        params: JobParams {
            content_type: row.try_get("content_type")?,
            source_locale: Locale::parse(&source_locale)?,
            target_locale: Locale::parse(&target_locale)?,
            entity_ids,
            auto_publish: row.try_get("auto_publish")?,
        },
        status: status.parse()?,
        progress: row.try_get("progress")?,
        failure_reason,
        total_entities: total.max(0) as u64,
        translated_entities: translated.max(0) as u64,
        created_at,
        updated_at,
    })
}

fn jobs_from_rows(rows: &[PgRow]) -> Result<Vec<Job>> {
    rows.iter().map(job_from_row).collect()
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, params: JobParams) -> Result<Job> {
        let job = Job::new(params);
        let entity_ids = job
            .params
            .entity_ids
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            "INSERT INTO batch_translate_jobs (id, content_type, source_locale, target_locale,
                entity_ids, auto_publish, status, progress, failure_reason, total_entities,
                translated_entities, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NULL, $9, $10, $11, $12)",
        )
        .bind(job.id.as_str())
        .bind(&job.params.content_type)
        .bind(job.params.source_locale.code())
        .bind(job.params.target_locale.code())
        .bind(entity_ids)
        .bind(job.params.auto_publish)
        .bind(job.status.as_str())
        .bind(job.progress)
        .bind(job.total_entities as i64)
        .bind(job.translated_entities as i64)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert job")?;

        Ok(job)
    }

    async fn find(&self, id: &JobId) -> Result<Option<Job>> {
        let row = sqlx::query(&format!("{} WHERE id = $1", SELECT_JOBS))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load job")?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn update(&self, id: &JobId, update: JobUpdate) -> Result<Job> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!("{} WHERE id = $1 FOR UPDATE", SELECT_JOBS))
            .bind(id.as_str())
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to lock job")?
            .with_context(|| format!("Job {} does not exist", id))?;

        let mut job = job_from_row(&row)?;
        update.apply(&mut job);

        let failure_reason = job
            .failure_reason
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            "UPDATE batch_translate_jobs
             SET status = $2, progress = $3, failure_reason = $4, total_entities = $5,
                 translated_entities = $6, updated_at = $7
             WHERE id = $1",
        )
        .bind(id.as_str())
        .bind(job.status.as_str())
        .bind(job.progress)
        .bind(failure_reason)
        .bind(job.total_entities as i64)
        .bind(job.translated_entities as i64)
        .bind(job.updated_at)
        .execute(&mut *tx)
        .await
        .context("Failed to update job")?;

        tx.commit().await?;
        Ok(job)
    }

    async fn find_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "{} WHERE status = ANY($1) ORDER BY created_at",
            SELECT_JOBS
        ))
        .bind(status_names(statuses))
        .fetch_all(&self.pool)
        .await
        .context("Failed to query jobs by status")?;
        jobs_from_rows(&rows)
    }

    async fn find_by_params(
        &self,
        content_type: &str,
        source: &Locale,
        target: &Locale,
        statuses: &[JobStatus],
    ) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "{} WHERE content_type = $1 AND source_locale = $2 AND target_locale = $3
               AND status = ANY($4) ORDER BY created_at",
            SELECT_JOBS
        ))
        .bind(content_type)
        .bind(source.code())
        .bind(target.code())
        .bind(status_names(statuses))
        .fetch_all(&self.pool)
        .await
        .context("Failed to query jobs by parameters")?;
        jobs_from_rows(&rows)
    }

    async fn list(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!("{} ORDER BY created_at", SELECT_JOBS))
            .fetch_all(&self.pool)
            .await
            .context("Failed to list jobs")?;
        jobs_from_rows(&rows)
    }
}

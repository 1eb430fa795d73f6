//! Job store: durable record of every job ever submitted.
//!
//! Jobs are never deleted here; finished, cancelled and failed jobs stay as
//! audit records.

mod postgres;

pub use postgres::PgJobStore;

use crate::job::{Job, JobId, JobParams, JobStatus, JobUpdate};
use crate::locale::Locale;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job in `created` state
    async fn create(&self, params: JobParams) -> Result<Job>;

    async fn find(&self, id: &JobId) -> Result<Option<Job>>;

    /// Apply `update` to the stored job and return the new record.
    /// Fails if the job does not exist.
    async fn update(&self, id: &JobId, update: JobUpdate) -> Result<Job>;

    async fn find_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<Job>>;

    async fn find_by_params(
        &self,
        content_type: &str,
        source: &Locale,
        target: &Locale,
        statuses: &[JobStatus],
    ) -> Result<Vec<Job>>;

    /// All jobs, oldest first
    async fn list(&self) -> Result<Vec<Job>>;
}

/// Job store that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn select<F>(&self, predicate: F) -> Vec<Job>
    where
        F: Fn(&Job) -> bool,
    {
        let jobs = self.jobs.read().await;
        let mut selected: Vec<Job> = jobs.values().filter(|job| predicate(job)).cloned().collect();
        selected.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        selected
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, params: JobParams) -> Result<Job> {
        let job = Job::new(params);
        self.jobs.write().await.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    async fn find(&self, id: &JobId) -> Result<Option<Job>> {
        Ok(self.jobs.read().await.get(id).cloned())
    }

    async fn update(&self, id: &JobId, update: JobUpdate) -> Result<Job> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(id)
            .with_context(|| format!("Job {} does not exist", id))?;
        update.apply(job);
        Ok(job.clone())
    }

    async fn find_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<Job>> {
        Ok(self.select(|job| statuses.contains(&job.status)).await)
    }

    async fn find_by_params(
        &self,
        content_type: &str,
        source: &Locale,
        target: &Locale,
        statuses: &[JobStatus],
    ) -> Result<Vec<Job>> {
        Ok(self
            .select(|job| {
                statuses.contains(&job.status) && job.params.same_triple(content_type, source, target)
            })
            .await)
    }

    async fn list(&self) -> Result<Vec<Job>> {
        Ok(self.select(|_| true).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(content_type: &str, target: &str) -> JobParams {
        JobParams::new(
            content_type,
            Locale::parse("en").unwrap(),
            Locale::parse(target).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let store = MemoryJobStore::new();
        let job = store.create(params("blogPost", "de")).await.unwrap();

        assert_eq!(job.status, JobStatus::Created);
        let found = store.find(&job.id).await.unwrap().expect("Should exist");
        assert_eq!(found, job);
        assert!(store.find(&JobId::from("missing")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_applies_fields() {
        let store = MemoryJobStore::new();
        let job = store.create(params("blogPost", "de")).await.unwrap();

        let updated = store
            .update(&job.id, JobUpdate::progress(2, 4).with_status(JobStatus::Running))
            .await
            .unwrap();
        assert_eq!(updated.status, JobStatus::Running);
        assert_eq!(updated.translated_entities, 2);
        assert_eq!(updated.total_entities, 4);
        assert!((updated.progress - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_update_missing_job() {
        let store = MemoryJobStore::new();
        let result = store
            .update(&JobId::from("missing"), JobUpdate::status(JobStatus::Running))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_find_by_status_and_params() {
        let store = MemoryJobStore::new();
        let first = store.create(params("blogPost", "de")).await.unwrap();
        let second = store.create(params("blogPost", "fr")).await.unwrap();
        store
            .update(&second.id, JobUpdate::status(JobStatus::Running))
            .await
            .unwrap();

        let running = store.find_by_status(&[JobStatus::Running]).await.unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, second.id);

        let matching = store
            .find_by_params(
                "blogPost",
                &Locale::parse("en").unwrap(),
                &Locale::parse("de").unwrap(),
                &JobStatus::ACTIVE,
            )
            .await
            .unwrap();
        assert_eq!(matching.len(), 1);
        assert_eq!(matching[0].id, first.id);

        assert_eq!(store.list().await.unwrap().len(), 2);
    }
}

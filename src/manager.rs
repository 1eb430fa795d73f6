//! Job manager: the process-wide registry of running executors.
//!
//! Enforces at most one active job per (content type, source locale, target
//! locale), resumes running jobs after a restart and pauses everything on
//! shutdown.

use crate::error::{ExecutorError, ManagerError, Result};
use crate::executor::{ExecutorContext, JobExecutor};
use crate::job::{Job, JobId, JobParams, JobStatus, JobStatusReport};
use crate::locale::Locale;
use crate::source::EntityId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Default time `destroy` waits for each job to stop before aborting it
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

struct ActiveJob {
    executor: Arc<JobExecutor>,
    handle: Option<JoinHandle<()>>,
}

/// Executors currently running in this process, keyed by job id.
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, ActiveJob>>,
}

impl JobRegistry {
    pub async fn get(&self, id: &JobId) -> Option<Arc<JobExecutor>> {
        self.jobs.read().await.get(id).map(|job| job.executor.clone())
    }

    pub async fn contains(&self, id: &JobId) -> bool {
        self.jobs.read().await.contains_key(id)
    }

    pub async fn ids(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self.jobs.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    async fn remove(&self, id: &JobId) -> bool {
        self.jobs.write().await.remove(id).is_some()
    }
}

pub struct JobManager {
    ctx: ExecutorContext,
    registry: Arc<JobRegistry>,
    /// Serializes the duplicate check and job creation of `submit_job`
    submissions: Mutex<()>,
    shutdown_grace: Duration,
}

impl JobManager {
    pub fn new(ctx: ExecutorContext) -> Self {
        Self {
            ctx,
            registry: Arc::new(JobRegistry::default()),
            submissions: Mutex::new(()),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Resume every job the store reports as running.
    ///
    /// Jobs that cannot be resumed are logged and skipped.
    ///
    /// # Returns
    /// The number of jobs resumed
    pub async fn bootstrap(&self) -> Result<usize> {
        let jobs = self.ctx.store.find_by_status(&[JobStatus::Running]).await?;
        let mut resumed = 0;

        for job in jobs {
            if self.registry.contains(&job.id).await {
                continue;
            }
            let id = job.id.clone();
            match self.resume_stored(job).await {
                Ok(_) => resumed += 1,
                Err(e) => error!(job_id = %id, "Failed to resume job: {}", e),
            }
        }

        info!(resumed, "Bootstrap complete");
        Ok(resumed)
    }

    /// Create a job and start it in the background.
    ///
    /// # Returns
    /// * `Ok(Job)` - The stored job record
    /// * `Err(DuplicateJob)` - Another job is active for the same triple
    /// * `Err(InvalidParams)` - Identical locales or an empty explicit id list
    pub async fn submit_job(&self, params: JobParams) -> Result<Job> {
        if params.source_locale == params.target_locale {
            return Err(ManagerError::InvalidParams(format!(
                "source and target locale are both '{}'",
                params.source_locale
            )));
        }
        if params.entity_ids.as_ref().is_some_and(Vec::is_empty) {
            return Err(ManagerError::InvalidParams(
                "explicit entity id list is empty".to_string(),
            ));
        }

        let content_type = self
            .ctx
            .localized_content_type(&params.content_type)
            .await?;

        // Held until the new job is registered so two submissions for the
        // same triple cannot both pass the duplicate check.
        let _submission = self.submissions.lock().await;
        let existing = self
            .ctx
            .store
            .find_by_params(
                &params.content_type,
                &params.source_locale,
                &params.target_locale,
                &JobStatus::ACTIVE,
            )
            .await?;
        if let Some(job) = existing.into_iter().next() {
            return Err(ManagerError::DuplicateJob {
                existing: job.id,
                content_type: params.content_type,
                source_locale: params.source_locale.to_string(),
                target_locale: params.target_locale.to_string(),
            });
        }

        let job = self.ctx.store.create(params).await?;
        info!(
            job_id = %job.id,
            content_type = %job.params.content_type,
            source_locale = %job.params.source_locale,
            target_locale = %job.params.target_locale,
            "Job submitted"
        );

        let executor = JobExecutor::with_content_type(job, content_type, self.ctx.clone());
        self.launch(executor, false).await
    }

    pub async fn pause_job(&self, id: &JobId) -> Result<Job> {
        let executor = self.active(id).await?;
        executor.pause(true).await?;
        self.job(id).await
    }

    pub async fn cancel_job(&self, id: &JobId) -> Result<Job> {
        let executor = self.active(id).await?;
        executor.cancel().await?;
        self.job(id).await
    }

    pub async fn resume_job(&self, id: &JobId) -> Result<Job> {
        if self.registry.contains(id).await {
            return Err(ManagerError::JobAlreadyRunning(id.clone()));
        }
        let job = self.job(id).await?;
        self.resume_stored(job).await
    }

    pub async fn get_job_status(&self, id: &JobId) -> Result<JobStatusReport> {
        Ok(self.job(id).await?.status_report())
    }

    pub async fn list_jobs(&self) -> Result<Vec<Job>> {
        Ok(self.ctx.store.list().await?)
    }

    /// Ids of the jobs running in this process
    pub async fn active_jobs(&self) -> Vec<JobId> {
        self.registry.ids().await
    }

    pub async fn untranslated_ids(
        &self,
        content_type: &str,
        source: &Locale,
        target: &Locale,
    ) -> Result<Vec<EntityId>> {
        Ok(self
            .ctx
            .source
            .list_untranslated_ids(content_type, source, target)
            .await?)
    }

    /// Pause every active job and leave it stored as `running`, so the next
    /// `bootstrap` resumes it. This includes jobs caught before setup ran.
    /// Jobs still busy after the grace period are aborted.
    pub async fn destroy(&self) {
        let active: Vec<(JobId, Arc<JobExecutor>, Option<JoinHandle<()>>)> = {
            let mut jobs = self.registry.jobs.write().await;
            jobs.iter_mut()
                .map(|(id, job)| (id.clone(), job.executor.clone(), job.handle.take()))
                .collect()
        };

        if active.is_empty() {
            return;
        }
        info!(jobs = active.len(), "Pausing active jobs for shutdown");

        for (id, executor, _) in &active {
            if let Err(e) = executor.pause(false).await {
                warn!(job_id = %id, "Failed to pause job: {:#}", e);
            }
        }

        for (id, _, handle) in active {
            if let Some(mut handle) = handle {
                match tokio::time::timeout(self.shutdown_grace, &mut handle).await {
                    Ok(_) => debug!(job_id = %id, "Job stopped"),
                    Err(_) => {
                        warn!(
                            job_id = %id,
                            grace = ?self.shutdown_grace,
                            "Job did not stop in time, aborting"
                        );
                        handle.abort();
                    }
                }
            }
            self.registry.remove(&id).await;
        }
    }

    async fn active(&self, id: &JobId) -> Result<Arc<JobExecutor>> {
        self.registry
            .get(id)
            .await
            .ok_or_else(|| ManagerError::JobNotRunning(id.clone()))
    }

    async fn job(&self, id: &JobId) -> Result<Job> {
        self.ctx
            .store
            .find(id)
            .await?
            .ok_or_else(|| ManagerError::JobNotFound(id.clone()))
    }

    async fn resume_stored(&self, job: Job) -> Result<Job> {
        if !job.status.is_resumable() {
            return Err(ManagerError::CannotBeResumed {
                id: job.id,
                status: job.status,
            });
        }
        info!(job_id = %job.id, status = %job.status, "Resuming job");
        let executor = JobExecutor::new(job, self.ctx.clone()).await?;
        self.launch(executor, true).await
    }

    /// Register the executor and run it on its own task. The registry entry
    /// is removed when the run settles, whatever the outcome.
    async fn launch(&self, executor: JobExecutor, resume: bool) -> Result<Job> {
        executor.prepare(resume).await?;
        let executor = Arc::new(executor);
        let id = executor.id().clone();

        {
            let mut jobs = self.registry.jobs.write().await;
            if jobs.contains_key(&id) {
                return Err(ManagerError::JobAlreadyRunning(id));
            }

            let task_executor = executor.clone();
            let registry = self.registry.clone();
            let handle = tokio::spawn(async move {
                let job_id = task_executor.id().clone();
                match task_executor.execute().await {
                    Ok(()) => info!(job_id = %job_id, "Job completed"),
                    Err(ExecutorError::Paused) => info!(job_id = %job_id, "Job stopped: paused"),
                    Err(ExecutorError::Cancelled) => {
                        info!(job_id = %job_id, "Job stopped: cancelled")
                    }
                    Err(e) => warn!(job_id = %job_id, "Job stopped: {}", e),
                }
                registry.remove(&job_id).await;
            });

            jobs.insert(
                id.clone(),
                ActiveJob {
                    executor,
                    handle: Some(handle),
                },
            );
        }

        self.job(&id).await
    }
}

//! Job executor: the per-job state machine.
//!
//! One executor drives one job from `created` to a terminal state,
//! translating one entity per loop iteration. Pause and cancel only flip the
//! status; the loop notices at its next iteration boundary.

use crate::error::ExecutorError;
use crate::job::{FailureReason, Job, JobId, JobParams, JobStatus, JobUpdate};
use crate::provider::TranslationProvider;
use crate::schema::ContentType;
use crate::source::{CountFilter, Entity, EntityId, EntitySource};
use crate::store::JobStore;
use crate::translate::TranslationService;
use anyhow::Context;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Collaborators shared by every executor of a process.
#[derive(Clone)]
pub struct ExecutorContext {
    pub store: Arc<dyn JobStore>,
    pub source: Arc<dyn EntitySource>,
    pub translator: TranslationService,
}

impl ExecutorContext {
    pub fn new(
        store: Arc<dyn JobStore>,
        source: Arc<dyn EntitySource>,
        provider: Arc<dyn TranslationProvider>,
    ) -> Self {
        let translator = TranslationService::new(provider, source.clone());
        Self {
            store,
            source,
            translator,
        }
    }

    /// Look up a content type that can be translated between locales
    pub async fn localized_content_type(&self, uid: &str) -> Result<ContentType, ExecutorError> {
        let content_type = self
            .source
            .content_type(uid)
            .await?
            .ok_or_else(|| ExecutorError::ContentTypeNotFound(uid.to_string()))?;

        if !content_type.localized {
            return Err(ExecutorError::ContentTypeNotLocalized(uid.to_string()));
        }
        Ok(content_type)
    }
}

/// Executor-local progress, rebuilt by every setup.
#[derive(Debug)]
struct WorkingSet {
    /// Remaining explicit ids, popped from the end
    queue: Option<Vec<EntityId>>,
    translated: u64,
    total: u64,
}

pub struct JobExecutor {
    id: JobId,
    params: JobParams,
    content_type: ContentType,
    ctx: ExecutorContext,
    status: Mutex<JobStatus>,
}

impl JobExecutor {
    /// Build an executor for a stored job.
    ///
    /// Fails if the content type does not exist or is not localized.
    pub async fn new(job: Job, ctx: ExecutorContext) -> Result<Self, ExecutorError> {
        let content_type = ctx.localized_content_type(&job.params.content_type).await?;
        Ok(Self::with_content_type(job, content_type, ctx))
    }

    /// Build an executor for a job whose content type was already checked
    pub fn with_content_type(job: Job, content_type: ContentType, ctx: ExecutorContext) -> Self {
        Self {
            id: job.id,
            params: job.params,
            content_type,
            ctx,
            status: Mutex::new(job.status),
        }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn params(&self) -> &JobParams {
        &self.params
    }

    pub async fn status(&self) -> JobStatus {
        *self.status.lock().await
    }

    /// Check that the job can be started (or resumed) from its current status.
    ///
    /// A fresh start needs `created`. Resuming accepts `created`, `setup`,
    /// `running` and `paused`; a paused job is flipped back to `running` here so
    /// that a pause arriving before setup still takes effect.
    pub async fn prepare(&self, resume: bool) -> Result<(), ExecutorError> {
        let mut status = self.status.lock().await;
        let allowed = if resume {
            matches!(
                *status,
                JobStatus::Created | JobStatus::Setup | JobStatus::Running | JobStatus::Paused
            )
        } else {
            *status == JobStatus::Created
        };

        if !allowed {
            return Err(ExecutorError::InvalidStart {
                status: *status,
                resume,
            });
        }
        if *status == JobStatus::Paused {
            *status = JobStatus::Running;
        }
        Ok(())
    }

    /// Run setup and the main loop until the job stops.
    ///
    /// # Returns
    /// * `Ok(())` when the job finished
    /// * `Err(Paused | Cancelled | Failed)` when it stopped for another reason
    pub async fn execute(&self) -> Result<(), ExecutorError> {
        match self.setup().await? {
            Some(mut work) => self.run(&mut work).await,
            None => Self::outcome(self.status().await),
        }
    }

    pub async fn start(&self, resume: bool) -> Result<(), ExecutorError> {
        self.prepare(resume).await?;
        self.execute().await
    }

    /// Stop after the current entity.
    ///
    /// `set_status = false` is the shutdown pause: the job is stored as
    /// `running` instead of `paused` so the next bootstrap resumes it, even
    /// when it was stopped before setup got to run.
    pub async fn pause(&self, set_status: bool) -> anyhow::Result<()> {
        let mut status = self.status.lock().await;
        if status.is_stopped() {
            debug!(job_id = %self.id, status = %*status, "Pause ignored");
            return Ok(());
        }

        let stored = if set_status {
            JobStatus::Paused
        } else {
            JobStatus::Running
        };
        self.ctx
            .store
            .update(&self.id, JobUpdate::status(stored))
            .await?;
        *status = JobStatus::Paused;
        info!(job_id = %self.id, persisted = set_status, "Job paused");
        Ok(())
    }

    pub async fn cancel(&self) -> anyhow::Result<()> {
        let mut status = self.status.lock().await;
        if status.is_stopped() {
            debug!(job_id = %self.id, status = %*status, "Cancel ignored");
            return Ok(());
        }

        self.ctx
            .store
            .update(&self.id, JobUpdate::status(JobStatus::Cancelled))
            .await?;
        *status = JobStatus::Cancelled;
        info!(job_id = %self.id, "Job cancelled");
        Ok(())
    }

    /// Move to `setup`, count entities, then move to `running`.
    /// `None` when another actor changed the status in between.
    async fn setup(&self) -> Result<Option<WorkingSet>, ExecutorError> {
        let entered = self
            .transition(
                JobStatus::Setup,
                &[JobStatus::Created, JobStatus::Setup, JobStatus::Running],
                JobUpdate::status(JobStatus::Setup),
            )
            .await?;
        if !entered {
            return Ok(None);
        }

        info!(
            job_id = %self.id,
            content_type = %self.params.content_type,
            source_locale = %self.params.source_locale,
            target_locale = %self.params.target_locale,
            "Setting up job"
        );

        let work = match self.count_entities().await {
            Ok(work) => work,
            Err(e) => return Err(self.fail(e).await),
        };

        if let Err(e) = self
            .ctx
            .store
            .update(&self.id, JobUpdate::progress(work.translated, work.total))
            .await
        {
            return Err(self.fail(e).await);
        }

        let running = self
            .transition(
                JobStatus::Running,
                &[JobStatus::Setup],
                JobUpdate::status(JobStatus::Running),
            )
            .await?;
        if !running {
            return Ok(None);
        }

        info!(
            job_id = %self.id,
            translated = work.translated,
            total = work.total,
            "Job running"
        );
        Ok(Some(work))
    }

    async fn count_entities(&self) -> anyhow::Result<WorkingSet> {
        let params = &self.params;

        let Some(ids) = &params.entity_ids else {
            let total = self
                .ctx
                .source
                .count(&params.content_type, &params.source_locale, CountFilter::All)
                .await
                .context("failed to count source entities")?;
            let translated = self
                .ctx
                .source
                .count(
                    &params.content_type,
                    &params.source_locale,
                    CountFilter::LocalizedIn(params.target_locale.clone()),
                )
                .await
                .context("failed to count translated entities")?;

            return Ok(WorkingSet {
                queue: None,
                translated: translated.min(total),
                total,
            });
        };

        let mut translated = 0;
        for id in ids {
            let entity = self
                .ctx
                .source
                .find_by_id(&params.content_type, *id)
                .await
                .with_context(|| format!("failed to load entity {}", id))?;
            if entity.is_some_and(|e| e.has_localization(&params.target_locale)) {
                translated += 1;
            }
        }

        Ok(WorkingSet {
            queue: Some(ids.clone()),
            translated,
            total: ids.len() as u64,
        })
    }

    async fn run(&self, work: &mut WorkingSet) -> Result<(), ExecutorError> {
        loop {
            tokio::task::yield_now().await;

            let status = self.status().await;
            if status != JobStatus::Running {
                return Self::outcome(status);
            }

            if work.translated >= work.total {
                return self.finish(work).await;
            }

            let entity = match self.next_entity(work).await {
                Ok(Some(entity)) => entity,
                Ok(None) => return self.finish(work).await,
                Err(e) => return Err(self.fail(e).await),
            };

            if let Err(e) = self.translate_entity(&entity, work).await {
                return Err(self.fail(e).await);
            }
        }
    }

    async fn next_entity(&self, work: &mut WorkingSet) -> anyhow::Result<Option<Entity>> {
        let params = &self.params;

        let Some(queue) = work.queue.as_mut() else {
            return self
                .ctx
                .source
                .find_untranslated(
                    &params.content_type,
                    &params.source_locale,
                    &params.target_locale,
                )
                .await
                .context("failed to find untranslated entity");
        };

        while let Some(id) = queue.pop() {
            match self.ctx.source.find_by_id(&params.content_type, id).await? {
                None => warn!(job_id = %self.id, entity_id = id, "Skipping missing entity"),
                Some(entity) if entity.locale != params.source_locale => warn!(
                    job_id = %self.id,
                    entity_id = id,
                    locale = %entity.locale,
                    "Skipping entity in unexpected locale"
                ),
                Some(entity) if entity.has_localization(&params.target_locale) => debug!(
                    job_id = %self.id,
                    entity_id = id,
                    "Skipping entity that is already translated"
                ),
                Some(entity) => return Ok(Some(entity)),
            }
        }
        Ok(None)
    }

    async fn translate_entity(&self, entity: &Entity, work: &mut WorkingSet) -> anyhow::Result<()> {
        let target = &self.params.target_locale;

        let data = self
            .ctx
            .translator
            .build_localization(&self.content_type, entity, target)
            .await
            .with_context(|| format!("failed to translate entity {}", entity.id))?;

        let publish = self.params.auto_publish && entity.published;
        let created = self
            .ctx
            .source
            .create_localization(entity, target, data, publish)
            .await
            .with_context(|| format!("failed to create '{}' localization of entity {}", target, entity.id))?;

        work.translated = (work.translated + 1).min(work.total);
        self.ctx
            .store
            .update(&self.id, JobUpdate::progress(work.translated, work.total))
            .await?;

        info!(
            job_id = %self.id,
            entity_id = entity.id,
            localization_id = created.id,
            translated = work.translated,
            total = work.total,
            "Translated entity"
        );
        Ok(())
    }

    async fn finish(&self, work: &WorkingSet) -> Result<(), ExecutorError> {
        let update = JobUpdate::progress(work.translated, work.total)
            .with_progress(1.0)
            .with_status(JobStatus::Finished);

        if self
            .transition(JobStatus::Finished, &[JobStatus::Running], update)
            .await?
        {
            info!(
                job_id = %self.id,
                translated = work.translated,
                total = work.total,
                "Job finished"
            );
            return Ok(());
        }
        Self::outcome(self.status().await)
    }

    /// Record `error` as the failure reason and move to `failed`.
    async fn fail(&self, error: anyhow::Error) -> ExecutorError {
        let reason = FailureReason::from_error(&error);
        error!(job_id = %self.id, kind = %reason.kind, "Job failed: {:#}", error);

        let update = JobUpdate::status(JobStatus::Failed).with_failure(reason.clone());
        match self
            .transition(
                JobStatus::Failed,
                &[JobStatus::Setup, JobStatus::Running],
                update,
            )
            .await
        {
            Ok(true) => ExecutorError::Failed(reason),
            Ok(false) => Self::outcome(self.status().await)
                .err()
                .unwrap_or(ExecutorError::Failed(reason)),
            Err(e) => ExecutorError::Store(e.context("failed to record job failure")),
        }
    }

    /// Persist `update` and move to `to`, but only from one of `allowed`.
    /// Holds the status lock for the whole write so pause and cancel cannot
    /// interleave.
    async fn transition(
        &self,
        to: JobStatus,
        allowed: &[JobStatus],
        update: JobUpdate,
    ) -> anyhow::Result<bool> {
        let mut status = self.status.lock().await;
        if !allowed.contains(&*status) {
            debug!(job_id = %self.id, from = %*status, to = %to, "Transition skipped");
            return Ok(false);
        }

        self.ctx.store.update(&self.id, update).await?;
        *status = to;
        Ok(true)
    }

    fn outcome(status: JobStatus) -> Result<(), ExecutorError> {
        match status {
            JobStatus::Finished => Ok(()),
            JobStatus::Paused => Err(ExecutorError::Paused),
            JobStatus::Cancelled => Err(ExecutorError::Cancelled),
            other => Err(ExecutorError::Interrupted(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locale::Locale;
    use crate::provider::{DummyProvider, ProviderError, TranslateRequest};
    use crate::schema::{Attribute, Schema, TextFormat};
    use crate::source::{MemoryEntitySource, NewEntity};
    use crate::store::MemoryJobStore;
    use async_trait::async_trait;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    struct Broken;

    #[async_trait]
    impl TranslationProvider for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn translate(&self, _request: TranslateRequest) -> Result<Vec<String>, ProviderError> {
            Err(ProviderError::Http {
                status: 400,
                body: "unsupported target language".to_string(),
            })
        }
    }

    fn locale(code: &str) -> Locale {
        Locale::parse(code).unwrap()
    }

    struct Fixture {
        store: Arc<MemoryJobStore>,
        source: Arc<MemoryEntitySource>,
        ids: Vec<EntityId>,
    }

    impl Fixture {
        fn new() -> Self {
            let source = Arc::new(MemoryEntitySource::new());
            let schema = Schema::new()
                .with("title", Attribute::text(TextFormat::Plain))
                .with("slug", Attribute::uid(Some("title")));
            source.add_content_type(ContentType::new("blogPost", true, schema));
            source.add_content_type(ContentType::new("settings", false, Schema::new()));

            let ids = (1..=3)
                .map(|n| {
                    let entity = NewEntity::new(
                        "blogPost",
                        locale("en"),
                        json!({ "title": format!("Post {}", n) }),
                    );
                    source.insert(if n == 2 { entity.published() } else { entity })
                })
                .collect();

            Self {
                store: Arc::new(MemoryJobStore::new()),
                source,
                ids,
            }
        }

        fn context(&self, provider: Arc<dyn TranslationProvider>) -> ExecutorContext {
            ExecutorContext::new(self.store.clone(), self.source.clone(), provider)
        }

        async fn executor(&self, params: JobParams) -> JobExecutor {
            let job = self.store.create(params).await.unwrap();
            JobExecutor::new(job, self.context(Arc::new(DummyProvider)))
                .await
                .expect("Should build executor")
        }

        async fn stored(&self, executor: &JobExecutor) -> Job {
            self.store.find(executor.id()).await.unwrap().unwrap()
        }
    }

    fn params() -> JobParams {
        JobParams::new("blogPost", locale("en"), locale("de"))
    }

    // ==================== Construction Tests ====================

    #[tokio::test]
    async fn test_new_rejects_unknown_content_type() {
        let fixture = Fixture::new();
        let job = Job::new(JobParams::new("missing", locale("en"), locale("de")));
        let result = JobExecutor::new(job, fixture.context(Arc::new(DummyProvider))).await;
        assert!(matches!(result, Err(ExecutorError::ContentTypeNotFound(_))));
    }

    #[tokio::test]
    async fn test_new_rejects_unlocalized_content_type() {
        let fixture = Fixture::new();
        let job = Job::new(JobParams::new("settings", locale("en"), locale("de")));
        let result = JobExecutor::new(job, fixture.context(Arc::new(DummyProvider))).await;
        assert!(matches!(result, Err(ExecutorError::ContentTypeNotLocalized(_))));
    }

    // ==================== Run Tests ====================

    #[tokio::test]
    async fn test_translates_all_untranslated() {
        let fixture = Fixture::new();
        fixture.source.insert(
            NewEntity::new("blogPost", locale("de"), json!({ "title": "Beitrag 1" }))
                .localization_of(fixture.ids[0]),
        );
        let executor = fixture.executor(params()).await;

        assert_ok!(executor.start(false).await);

        let job = fixture.stored(&executor).await;
        assert_eq!(job.status, JobStatus::Finished);
        assert_eq!(job.total_entities, 3);
        assert_eq!(job.translated_entities, 3);
        assert!((job.progress - 1.0).abs() < f64::EPSILON);
        assert_eq!(fixture.source.entities("blogPost", &locale("de")).len(), 3);
    }

    #[tokio::test]
    async fn test_explicit_ids_pop_from_end_and_skip() {
        let fixture = Fixture::new();
        let german = fixture.source.insert(NewEntity::new(
            "blogPost",
            locale("de"),
            json!({ "title": "Nur Deutsch" }),
        ));
        let ids = vec![fixture.ids[0], 999, german, fixture.ids[2]];
        let executor = fixture.executor(params().with_entity_ids(ids)).await;

        assert_ok!(executor.start(false).await);

        let created: Vec<i64> = fixture
            .source
            .entities("blogPost", &locale("de"))
            .into_iter()
            .filter(|e| e.id != german)
            .map(|e| e.localization(&locale("en")).unwrap())
            .collect();
        assert_eq!(created, vec![fixture.ids[2], fixture.ids[0]]);

        let job = fixture.stored(&executor).await;
        assert_eq!(job.status, JobStatus::Finished);
        assert_eq!(job.total_entities, 4);
        assert_eq!(job.translated_entities, 2);
    }

    #[tokio::test]
    async fn test_auto_publish_requires_published_source() {
        let fixture = Fixture::new();
        let executor = fixture
            .executor(params().with_auto_publish(true))
            .await;

        assert_ok!(executor.start(false).await);

        for german in fixture.source.entities("blogPost", &locale("de")) {
            let source_id = german.localization(&locale("en")).unwrap();
            assert_eq!(german.published, source_id == fixture.ids[1]);
        }
    }

    #[tokio::test]
    async fn test_nothing_to_translate_finishes() {
        let fixture = Fixture::new();
        let executor = fixture
            .executor(JobParams::new("blogPost", locale("fr"), locale("de")))
            .await;

        assert_ok!(executor.start(false).await);

        let job = fixture.stored(&executor).await;
        assert_eq!(job.status, JobStatus::Finished);
        assert_eq!(job.total_entities, 0);
        assert!((job.progress - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_provider_error_fails_job() {
        let fixture = Fixture::new();
        let job = fixture.store.create(params()).await.unwrap();
        let executor = JobExecutor::new(job, fixture.context(Arc::new(Broken)))
            .await
            .unwrap();

        let result = executor.start(false).await;
        let Err(ExecutorError::Failed(reason)) = result else {
            panic!("expected failure, got {:?}", result);
        };
        assert_eq!(reason.kind, "ProviderHttpError");
        assert!(reason.message.contains("failed to translate entity"));
        assert!(reason.stack.lines().count() >= 2);

        let stored = fixture.stored(&executor).await;
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.failure_reason, Some(reason));
        assert!(fixture.source.entities("blogPost", &locale("de")).is_empty());
    }

    // ==================== State Machine Tests ====================

    #[tokio::test]
    async fn test_start_requires_created() {
        let fixture = Fixture::new();
        let executor = fixture.executor(params()).await;
        assert_ok!(executor.start(false).await);

        let result = executor.start(false).await;
        assert!(matches!(
            result,
            Err(ExecutorError::InvalidStart {
                status: JobStatus::Finished,
                resume: false
            })
        ));
        assert_err!(executor.start(true).await);
    }

    #[tokio::test]
    async fn test_cancel_before_setup() {
        let fixture = Fixture::new();
        let executor = fixture.executor(params()).await;

        assert_ok!(executor.prepare(false).await);
        assert_ok!(executor.cancel().await);
        let result = executor.execute().await;

        assert!(matches!(result, Err(ExecutorError::Cancelled)));
        assert_eq!(fixture.stored(&executor).await.status, JobStatus::Cancelled);
        assert!(fixture.source.entities("blogPost", &locale("de")).is_empty());
    }

    #[tokio::test]
    async fn test_pause_then_resume() {
        let fixture = Fixture::new();
        let executor = fixture.executor(params()).await;

        assert_ok!(executor.prepare(false).await);
        assert_ok!(executor.pause(true).await);
        assert!(matches!(executor.execute().await, Err(ExecutorError::Paused)));
        assert_eq!(fixture.stored(&executor).await.status, JobStatus::Paused);

        let job = fixture.stored(&executor).await;
        let resumed = JobExecutor::new(job, fixture.context(Arc::new(DummyProvider)))
            .await
            .unwrap();
        assert_ok!(resumed.start(true).await);
        assert_eq!(fixture.stored(&resumed).await.status, JobStatus::Finished);
    }

    #[tokio::test]
    async fn test_shutdown_pause_keeps_running_status() {
        let fixture = Fixture::new();
        let job = fixture.store.create(params()).await.unwrap();
        fixture
            .store
            .update(&job.id, JobUpdate::status(JobStatus::Running))
            .await
            .unwrap();
        let job = fixture.store.find(&job.id).await.unwrap().unwrap();
        let executor = JobExecutor::new(job, fixture.context(Arc::new(DummyProvider)))
            .await
            .unwrap();

        assert_ok!(executor.pause(false).await);
        assert_eq!(executor.status().await, JobStatus::Paused);
        assert_eq!(fixture.stored(&executor).await.status, JobStatus::Running);
    }

    #[tokio::test]
    async fn test_shutdown_pause_before_setup_stores_running() {
        let fixture = Fixture::new();
        let executor = fixture.executor(params()).await;
        assert_ok!(executor.prepare(false).await);
        assert_eq!(fixture.stored(&executor).await.status, JobStatus::Created);

        assert_ok!(executor.pause(false).await);
        assert!(matches!(executor.execute().await, Err(ExecutorError::Paused)));
        let job = fixture.stored(&executor).await;
        assert_eq!(job.status, JobStatus::Running);

        let resumed = JobExecutor::new(job, fixture.context(Arc::new(DummyProvider)))
            .await
            .unwrap();
        assert_ok!(resumed.start(true).await);
        assert_eq!(fixture.stored(&resumed).await.status, JobStatus::Finished);
    }

    #[tokio::test]
    async fn test_pause_and_cancel_ignored_when_stopped() {
        let fixture = Fixture::new();
        let executor = fixture.executor(params()).await;
        assert_ok!(executor.start(false).await);

        assert_ok!(executor.pause(true).await);
        assert_ok!(executor.cancel().await);
        assert_eq!(executor.status().await, JobStatus::Finished);
        assert_eq!(fixture.stored(&executor).await.status, JobStatus::Finished);
    }
}

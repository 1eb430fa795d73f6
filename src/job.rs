//! Job data model: identity, parameters, status and progress of one batch
//! translation job as stored in the job store.

use crate::error::TranslateError;
use crate::locale::Locale;
use crate::provider::ProviderError;
use crate::source::EntityId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Opaque job identifier, stable across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Job lifecycle status.
///
/// `created -> setup -> running -> finished`, with `running -> paused`,
/// `running -> cancelled` and `setup|running -> failed`. Paused jobs can be
/// resumed; cancelled and failed jobs cannot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Created,
    Setup,
    Running,
    Paused,
    Finished,
    Cancelled,
    Failed,
}

impl JobStatus {
    /// Statuses that block another job for the same content type and locales
    pub const ACTIVE: [JobStatus; 3] = [JobStatus::Created, JobStatus::Setup, JobStatus::Running];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Created => "created",
            JobStatus::Setup => "setup",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Finished => "finished",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }

    /// No further work happens in this process once a job reaches one of these.
    pub fn is_stopped(&self) -> bool {
        matches!(
            self,
            JobStatus::Paused | JobStatus::Cancelled | JobStatus::Finished | JobStatus::Failed
        )
    }

    /// Statuses accepted by the resume path.
    pub fn is_resumable(&self) -> bool {
        matches!(self, JobStatus::Running | JobStatus::Paused)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown job status '{0}'")]
pub struct UnknownStatus(String);

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(JobStatus::Created),
            "setup" => Ok(JobStatus::Setup),
            "running" => Ok(JobStatus::Running),
            "paused" => Ok(JobStatus::Paused),
            "finished" => Ok(JobStatus::Finished),
            "cancelled" => Ok(JobStatus::Cancelled),
            "failed" => Ok(JobStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Immutable parameters of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobParams {
    pub content_type: String,
    pub source_locale: Locale,
    pub target_locale: Locale,
    /// Explicit entities to translate; `None` means every untranslated entity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_ids: Option<Vec<EntityId>>,
    #[serde(default)]
    pub auto_publish: bool,
}

impl JobParams {
    pub fn new(content_type: impl Into<String>, source_locale: Locale, target_locale: Locale) -> Self {
        Self {
            content_type: content_type.into(),
            source_locale,
            target_locale,
            entity_ids: None,
            auto_publish: false,
        }
    }

    pub fn with_entity_ids(mut self, ids: Vec<EntityId>) -> Self {
        self.entity_ids = Some(ids);
        self
    }

    pub fn with_auto_publish(mut self, auto_publish: bool) -> Self {
        self.auto_publish = auto_publish;
        self
    }

    /// Same (content type, source locale, target locale) triple
    pub fn same_triple(&self, content_type: &str, source: &Locale, target: &Locale) -> bool {
        self.content_type == content_type
            && &self.source_locale == source
            && &self.target_locale == target
    }
}

/// Structured reason recorded when a job fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReason {
    pub message: String,
    /// Cause chain, outermost first, one cause per line
    pub stack: String,
    pub kind: String,
}

impl FailureReason {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            stack: message.clone(),
            message,
            kind: kind.into(),
        }
    }

    /// Capture message, cause chain and the kind of the first domain error
    /// found in the chain.
    pub fn from_error(error: &anyhow::Error) -> Self {
        let kind = error
            .chain()
            .find_map(|cause| {
                if let Some(e) = cause.downcast_ref::<TranslateError>() {
                    Some(e.kind())
                } else {
                    cause.downcast_ref::<ProviderError>().map(ProviderError::kind)
                }
            })
            .unwrap_or("Error");

        let stack = error
            .chain()
            .map(|cause| cause.to_string())
            .collect::<Vec<_>>()
            .join("\n");

        Self {
            message: format!("{:#}", error),
            stack,
            kind: kind.to_string(),
        }
    }
}

/// One stored job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    #[serde(flatten)]
    pub params: JobParams,
    pub status: JobStatus,
    pub progress: f64,
    pub failure_reason: Option<FailureReason>,
    pub total_entities: u64,
    pub translated_entities: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// A fresh record in `created` state
    pub fn new(params: JobParams) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::generate(),
            params,
            status: JobStatus::Created,
            progress: 0.0,
            failure_reason: None,
            total_entities: 0,
            translated_entities: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status_report(&self) -> JobStatusReport {
        JobStatusReport {
            status: self.status,
            progress: self.progress,
            failure_reason: self.failure_reason.clone(),
        }
    }
}

/// Answer to a job status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusReport {
    pub status: JobStatus,
    pub progress: f64,
    pub failure_reason: Option<FailureReason>,
}

/// Partial update of the mutable job fields. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<f64>,
    pub failure_reason: Option<FailureReason>,
    pub total_entities: Option<u64>,
    pub translated_entities: Option<u64>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Counters plus the derived progress ratio
    pub fn progress(translated: u64, total: u64) -> Self {
        Self {
            progress: Some(progress_ratio(translated, total)),
            total_entities: Some(total),
            translated_entities: Some(translated),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_failure(mut self, reason: FailureReason) -> Self {
        self.failure_reason = Some(reason);
        self
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn apply(&self, job: &mut Job) {
        if let Some(status) = self.status {
            job.status = status;
        }
        if let Some(progress) = self.progress {
            job.progress = progress.clamp(0.0, 1.0);
        }
        if let Some(reason) = &self.failure_reason {
            job.failure_reason = Some(reason.clone());
        }
        if let Some(total) = self.total_entities {
            job.total_entities = total;
        }
        if let Some(translated) = self.translated_entities {
            job.translated_entities = translated;
        }
        job.updated_at = Utc::now();
    }
}

/// translated / total, 0.0 when there is nothing to translate
pub fn progress_ratio(translated: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        (translated as f64 / total as f64).min(1.0)
    }
}

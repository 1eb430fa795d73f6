use crate::job::{FailureReason, JobId, JobStatus};
use crate::provider::ProviderError;
use thiserror::Error;

/// Errors produced while building the target-locale copy of an entity.
#[derive(Error, Debug)]
pub enum TranslateError {
    #[error("translation provider failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("content type '{0}' does not exist")]
    MissingContentType(String),

    #[error("invalid value for field '{pointer}': {reason}")]
    InvalidFieldValue { pointer: String, reason: String },
}

impl TranslateError {
    /// Short machine-readable kind, recorded in a job's failure reason
    pub fn kind(&self) -> &'static str {
        match self {
            TranslateError::Provider(e) => e.kind(),
            TranslateError::MissingContentType(_) => "MissingContentType",
            TranslateError::InvalidFieldValue { .. } => "InvalidFieldValue",
        }
    }
}

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("content type '{0}' does not exist")]
    ContentTypeNotFound(String),

    #[error("content type '{0}' is not localized")]
    ContentTypeNotLocalized(String),

    #[error("job in status '{status}' cannot be {}", start_verb(.resume))]
    InvalidStart { status: JobStatus, resume: bool },

    #[error("job was paused")]
    Paused,

    #[error("job was cancelled")]
    Cancelled,

    #[error("job stopped in unexpected status '{0}'")]
    Interrupted(JobStatus),

    #[error("job failed: {}", .0.message)]
    Failed(FailureReason),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("invalid job parameters: {0}")]
    InvalidParams(String),

    #[error("job {existing} is already translating '{content_type}' from {source_locale} to {target_locale}")]
    DuplicateJob {
        existing: JobId,
        content_type: String,
        source_locale: String,
        target_locale: String,
    },

    #[error("job {0} is not running")]
    JobNotRunning(JobId),

    #[error("job {0} is already running")]
    JobAlreadyRunning(JobId),

    #[error("job {0} does not exist")]
    JobNotFound(JobId),

    #[error("job {id} in status '{status}' cannot be resumed")]
    CannotBeResumed { id: JobId, status: JobStatus },

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ManagerError>;

fn start_verb(resume: &bool) -> &'static str {
    if *resume {
        "resumed"
    } else {
        "started"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_error_kinds() {
        let provider = TranslateError::from(ProviderError::Decode("bad json".to_string()));
        assert_eq!(provider.kind(), "ProviderDecodeError");
        assert_eq!(
            TranslateError::MissingContentType("tag".to_string()).kind(),
            "MissingContentType"
        );
    }

    #[test]
    fn test_invalid_start_messages() {
        let start = ExecutorError::InvalidStart {
            status: JobStatus::Running,
            resume: false,
        };
        assert_eq!(start.to_string(), "job in status 'running' cannot be started");

        let resume = ExecutorError::InvalidStart {
            status: JobStatus::Failed,
            resume: true,
        };
        assert_eq!(resume.to_string(), "job in status 'failed' cannot be resumed");
    }

    #[test]
    fn test_manager_error_messages() {
        let err = ManagerError::JobNotRunning(JobId::from("abc"));
        assert_eq!(err.to_string(), "job abc is not running");

        let err = ManagerError::CannotBeResumed {
            id: JobId::from("abc"),
            status: JobStatus::Cancelled,
        };
        assert!(err.to_string().contains("cannot be resumed"));
    }
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("request to provider failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to decode provider response: {0}")]
    Decode(String),

    #[error("provider returned {actual} translations for {expected} fragments")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("provider does not support {0}")]
    Unsupported(String),
}

impl ProviderError {
    /// Rate limits, server errors and network failures are worth another try.
    /// Other client errors will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Http { status, .. } => *status == 429 || *status >= 500,
            ProviderError::Transport(_) => true,
            _ => false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Http { .. } => "ProviderHttpError",
            ProviderError::Transport(_) => "ProviderTransportError",
            ProviderError::Decode(_) => "ProviderDecodeError",
            ProviderError::LengthMismatch { .. } => "ProviderLengthMismatch",
            ProviderError::Unsupported(_) => "ProviderUnsupported",
        }
    }
}

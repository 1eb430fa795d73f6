//! Translation gateway: the providers that turn text in one locale into text
//! in another.
//!
//! Providers receive a list of fragments and must return exactly one
//! translated fragment per input, in the same order. Providers with request
//! limits split their input with [`crate::chunks`] and reassemble the results.

mod dummy;
mod error;
mod http;

pub use dummy::DummyProvider;
pub use error::ProviderError;
pub use http::{HttpProvider, HttpProviderConfig};

use crate::locale::Locale;
use crate::schema::TextFormat;
use async_trait::async_trait;
use std::fmt;

/// Who is waiting for a translation. Interactive requests should not queue
/// behind batch jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// A user is waiting for the result
    Direct,
    /// Background batch job
    Batch,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Direct => f.write_str("direct"),
            Priority::Batch => f.write_str("batch"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TranslateRequest {
    pub fragments: Vec<String>,
    pub format: TextFormat,
    pub source_locale: Locale,
    pub target_locale: Locale,
    pub priority: Priority,
}

#[async_trait]
pub trait TranslationProvider: Send + Sync {
    /// Short provider name for logs
    fn name(&self) -> &'static str;

    /// Translate every fragment of `request`, preserving count and order.
    async fn translate(&self, request: TranslateRequest) -> Result<Vec<String>, ProviderError>;
}

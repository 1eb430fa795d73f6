use super::{ProviderError, TranslateRequest, TranslationProvider};
use async_trait::async_trait;

/// Returns every fragment unchanged. Useful for development and for
/// checking the job pipeline without a real provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct DummyProvider;

#[async_trait]
impl TranslationProvider for DummyProvider {
    fn name(&self) -> &'static str {
        "dummy"
    }

    async fn translate(&self, request: TranslateRequest) -> Result<Vec<String>, ProviderError> {
        Ok(request.fragments)
    }
}

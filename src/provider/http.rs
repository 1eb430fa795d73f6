use super::{Priority, ProviderError, TranslateRequest, TranslationProvider};
use crate::chunks::{self, ChunkBounds};
use crate::retry::{retry_provider_call, RetryPolicy};
use crate::schema::TextFormat;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::debug;

/// Settings for [`HttpProvider`]
#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    /// Request limits of the remote API
    pub bounds: ChunkBounds,
    /// Maximum concurrent requests for batch work
    pub max_parallel: usize,
    pub retry: RetryPolicy,
}

impl HttpProviderConfig {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            api_key: None,
            bounds: ChunkBounds::new(50, 128 * 1024),
            max_parallel: 4,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ProviderRequest<'a> {
    text: &'a [String],
    source_lang: &'a str,
    target_lang: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tag_handling: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
struct ProviderResponse {
    translations: Vec<Translation>,
}

#[derive(Debug, Deserialize)]
struct Translation {
    text: String,
}

/// Provider backed by a JSON translation API.
///
/// Fragments are split into chunks that respect the API limits, sent
/// concurrently and reassembled. Batch requests share a pool of
/// `max_parallel` permits; direct requests skip it so they never wait
/// behind a running job.
pub struct HttpProvider {
    client: reqwest::Client,
    config: HttpProviderConfig,
    batch_permits: Semaphore,
}

impl HttpProvider {
    pub fn new(config: HttpProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to build HTTP client for translation provider")?;

        Ok(Self {
            client,
            batch_permits: Semaphore::new(config.max_parallel.max(1)),
            config,
        })
    }

    async fn send_chunk(
        &self,
        index: usize,
        texts: &[String],
        request: &TranslateRequest,
    ) -> Result<Vec<String>, ProviderError> {
        // Only fails if the semaphore is closed, which never happens
        let _permit = match request.priority {
            Priority::Batch => self.batch_permits.acquire().await.ok(),
            Priority::Direct => None,
        };

        let body = ProviderRequest {
            text: texts,
            source_lang: request.source_locale.code(),
            target_lang: request.target_locale.code(),
            tag_handling: (request.format == TextFormat::Html).then_some("html"),
        };

        debug!(
            chunk = index,
            fragments = texts.len(),
            priority = %request.priority,
            "Sending translation chunk"
        );

        retry_provider_call(&self.config.retry, index, || self.post(&body)).await
    }

    async fn post(&self, body: &ProviderRequest<'_>) -> Result<Vec<String>, ProviderError> {
        let mut builder = self.client.post(&self.config.api_url).json(body);
        if let Some(key) = &self.config.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<failed to read body: {}>", e));
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ProviderResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        let translated: Vec<String> = parsed.translations.into_iter().map(|t| t.text).collect();
        if translated.len() != body.text.len() {
            return Err(ProviderError::LengthMismatch {
                expected: body.text.len(),
                actual: translated.len(),
            });
        }
        Ok(translated)
    }
}

#[async_trait]
impl TranslationProvider for HttpProvider {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn translate(&self, request: TranslateRequest) -> Result<Vec<String>, ProviderError> {
        if request.fragments.is_empty() {
            return Ok(Vec::new());
        }

        let plan = chunks::split(&request.fragments, self.config.bounds);
        let request = &request;
        let batches: Vec<Vec<String>> = stream::iter(plan.chunks().iter().cloned().enumerate())
            .map(move |(index, chunk)| async move { self.send_chunk(index, &chunk, request).await })
            .buffered(self.config.max_parallel.max(1))
            .try_collect()
            .await?;

        let translated = plan.reassemble(batches);
        if translated.len() != request.fragments.len() {
            return Err(ProviderError::LengthMismatch {
                expected: request.fragments.len(),
                actual: translated.len(),
            });
        }
        Ok(translated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locale::Locale;
    use serde_json::json;
    use wiremock::{
        matchers::{body_partial_json, header, method, path},
        Mock, MockServer, Request, Respond, ResponseTemplate,
    };

    /// Answers every request by upper-casing the submitted texts
    struct Uppercase;

    impl Respond for Uppercase {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let body: serde_json::Value =
                serde_json::from_slice(&request.body).expect("request body is JSON");
            let translations: Vec<serde_json::Value> = body["text"]
                .as_array()
                .expect("text array")
                .iter()
                .map(|t| json!({ "text": t.as_str().unwrap_or_default().to_uppercase() }))
                .collect();
            ResponseTemplate::new(200).set_body_json(json!({ "translations": translations }))
        }
    }

    fn create_provider(server: &MockServer, bounds: ChunkBounds) -> HttpProvider {
        let mut config = HttpProviderConfig::new(format!("{}/v2/translate", server.uri()));
        config.api_key = Some("test-key".to_string());
        config.bounds = bounds;
        config.max_parallel = 2;
        config.retry = RetryPolicy::new(3, Duration::from_millis(10));
        HttpProvider::new(config).expect("Should build provider")
    }

    fn request(fragments: &[&str], format: TextFormat) -> TranslateRequest {
        TranslateRequest {
            fragments: fragments.iter().map(|s| s.to_string()).collect(),
            format,
            source_locale: Locale::parse("en").unwrap(),
            target_locale: Locale::parse("de").unwrap(),
            priority: Priority::Batch,
        }
    }

    // ==================== Chunking Tests ====================

    #[tokio::test]
    async fn test_translate_splits_by_count() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v2/translate"))
            .and(header("Authorization", "Bearer test-key"))
            .respond_with(Uppercase)
            .expect(3)
            .mount(&server)
            .await;

        let provider = create_provider(&server, ChunkBounds::unbounded().with_max_count(2));
        let result = provider
            .translate(request(&["a", "b", "c", "d", "e"], TextFormat::Plain))
            .await
            .expect("Should translate");

        assert_eq!(result, vec!["A", "B", "C", "D", "E"]);
    }

    #[tokio::test]
    async fn test_translate_reassembles_split_fragment() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v2/translate"))
            .respond_with(Uppercase)
            .mount(&server)
            .await;

        let long = "First sentence here. Second sentence here. Third sentence here.";
        let provider = create_provider(&server, ChunkBounds::unbounded().with_max_byte_size(30));
        let result = provider
            .translate(request(&["short", long], TextFormat::Plain))
            .await
            .expect("Should translate");

        assert_eq!(result, vec!["SHORT".to_string(), long.to_uppercase()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_translate_runs_on_spawned_task() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v2/translate"))
            .respond_with(Uppercase)
            .expect(2)
            .mount(&server)
            .await;

        let provider: std::sync::Arc<dyn TranslationProvider> = std::sync::Arc::new(
            create_provider(&server, ChunkBounds::unbounded().with_max_count(1)),
        );
        let handle = tokio::spawn(async move {
            provider
                .translate(request(&["x", "y"], TextFormat::Plain))
                .await
        });

        let result = handle.await.expect("task should not panic");
        assert_eq!(result.expect("Should translate"), vec!["X", "Y"]);
    }

    #[tokio::test]
    async fn test_translate_empty_input_sends_nothing() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(Uppercase)
            .expect(0)
            .mount(&server)
            .await;

        let provider = create_provider(&server, ChunkBounds::unbounded());
        let result = provider.translate(request(&[], TextFormat::Plain)).await;
        assert!(result.expect("Should succeed").is_empty());
    }

    // ==================== Request Format Tests ====================

    #[tokio::test]
    async fn test_html_sets_tag_handling() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "source_lang": "en",
                "target_lang": "de",
                "tag_handling": "html"
            })))
            .respond_with(Uppercase)
            .expect(1)
            .mount(&server)
            .await;

        let provider = create_provider(&server, ChunkBounds::unbounded());
        let result = provider
            .translate(request(&["<p>hi</p>"], TextFormat::Html))
            .await
            .expect("Should translate");
        assert_eq!(result, vec!["<P>HI</P>"]);
    }

    // ==================== Error Handling Tests ====================

    #[tokio::test]
    async fn test_retries_server_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(Uppercase)
            .mount(&server)
            .await;

        let provider = create_provider(&server, ChunkBounds::unbounded());
        let result = provider
            .translate(request(&["hello"], TextFormat::Plain))
            .await
            .expect("Should succeed after retry");
        assert_eq!(result, vec!["HELLO"]);
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("bad key"))
            .expect(1)
            .mount(&server)
            .await;

        let provider = create_provider(&server, ChunkBounds::unbounded());
        let err = provider
            .translate(request(&["hello"], TextFormat::Plain))
            .await
            .unwrap_err();

        match err {
            ProviderError::Http { status, body } => {
                assert_eq!(status, 403);
                assert_eq!(body, "bad key");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_short_response_is_length_mismatch() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "translations": [{ "text": "nur eins" }] })),
            )
            .mount(&server)
            .await;

        let provider = create_provider(&server, ChunkBounds::unbounded());
        let err = provider
            .translate(request(&["one", "two"], TextFormat::Plain))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ProviderError::LengthMismatch {
                expected: 2,
                actual: 1
            }
        ));
    }

    #[tokio::test]
    async fn test_malformed_response_is_decode_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let provider = create_provider(&server, ChunkBounds::unbounded());
        let err = provider
            .translate(request(&["one"], TextFormat::Plain))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "ProviderDecodeError");
    }
}

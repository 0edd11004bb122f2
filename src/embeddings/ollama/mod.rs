
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use super::{EMBED_BATCH_SIZE, EmbeddingProvider};
use crate::RagError;
use crate::config::OllamaConfig;

const EXPONENTIAL_BACKOFF_BASE: u64 = 2;

/// Blocking client for the Ollama HTTP API
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    model: String,
    agent: ureq::Agent,
    probe_agent: ureq::Agent,
    retry_attempts: u32,
    backoff_base_ms: u64,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct ModelInfo {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

impl OllamaClient {
    #[inline]
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let base_url = config
            .ollama_url()
            .context("Failed to generate Ollama URL from config")?;

        Ok(Self {
            base_url,
            model: config.model.clone(),
            agent: build_agent(config.timeout()),
            probe_agent: build_agent(config.probe_timeout()),
            retry_attempts: config.retry_attempts.max(1),
            backoff_base_ms: 1000,
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = build_agent(timeout);
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Delay before the first retry; doubled on each following attempt
    #[inline]
    pub fn with_backoff(mut self, base: Duration) -> Self {
        self.backoff_base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[inline]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Check that the server answers within the probe timeout and serves the
    /// configured model. Probes are not retried.
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        debug!("Performing health check for Ollama at {}", self.base_url);

        let models = self.fetch_models(&self.probe_agent, 1)?;
        if !models.iter().any(|m| model_matches(&m.name, &self.model)) {
            let available: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
            warn!(
                "Model {} not found. Available models: {:?}",
                self.model, available
            );
            return Err(anyhow::anyhow!(
                "Model '{}' is not available. Available models: {:?}",
                self.model,
                available
            ));
        }

        info!(
            "Health check passed for Ollama server at {} with model {}",
            self.base_url, self.model
        );
        Ok(())
    }

    fn fetch_models(&self, agent: &ureq::Agent, attempts: u32) -> Result<Vec<ModelInfo>> {
        let url = self
            .base_url
            .join("/api/tags")
            .context("Failed to build models URL")?;

        debug!("Fetching available models from {}", url);

        let response_text = self
            .make_request_with_retry(attempts, || {
                agent
                    .get(url.as_str())
                    .call()
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to fetch models")?;

        let models_response: ModelsResponse =
            serde_json::from_str(&response_text).context("Failed to parse models response")?;

        debug!("Found {} models", models_response.models.len());
        Ok(models_response.models)
    }

    /// Embed a batch of texts with one `/api/embed` request
    #[inline]
    pub fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating embeddings for {} texts", texts.len());

        let request = EmbedRequest {
            model: &self.model,
            input: texts,
        };
        let url = self
            .base_url
            .join("/api/embed")
            .context("Failed to build embedding URL")?;
        let request_json =
            serde_json::to_string(&request).context("Failed to serialize embedding request")?;

        let response_text = self
            .make_request_with_retry(self.retry_attempts, || {
                self.agent
                    .post(url.as_str())
                    .header("Content-Type", "application/json")
                    .send(&request_json)
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to generate embeddings")?;

        let embeddings = parse_embed_response(&response_text)?;
        if embeddings.len() != texts.len() {
            return Err(anyhow::anyhow!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                embeddings.len()
            ));
        }

        Ok(embeddings)
    }

    fn make_request_with_retry<F>(&self, attempts: u32, mut request_fn: F) -> Result<String>
    where
        F: FnMut() -> Result<String, ureq::Error>,
    {
        let mut last_error = None;

        for attempt in 1..=attempts {
            debug!("HTTP request attempt {}/{}", attempt, attempts);

            match request_fn() {
                Ok(response_text) => return Ok(response_text),
                Err(error) => {
                    let should_retry = match &error {
                        ureq::Error::StatusCode(status) => {
                            if *status >= 500 {
                                warn!(
                                    "Server error (status {}), attempt {}/{}",
                                    status, attempt, attempts
                                );
                                true
                            } else {
                                warn!("Client error (status {}), not retrying", status);
                                return Err(anyhow::anyhow!("Client error: HTTP {}", status));
                            }
                        }
                        ureq::Error::ConnectionFailed
                        | ureq::Error::HostNotFound
                        | ureq::Error::Timeout(_)
                        | ureq::Error::Io(_) => {
                            warn!(
                                "Transport error: {}, attempt {}/{}",
                                error, attempt, attempts
                            );
                            true
                        }
                        _ => false,
                    };

                    if !should_retry {
                        return Err(anyhow::anyhow!("Non-retryable error: {}", error));
                    }

                    last_error = Some(anyhow::anyhow!("Request error: {}", error));

                    if attempt < attempts {
                        let delay = Duration::from_millis(
                            EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1) * self.backoff_base_ms,
                        );
                        debug!("Waiting {:?} before retry", delay);
                        std::thread::sleep(delay);
                    }
                }
            }
        }

        error!("All retry attempts failed for request to {}", self.base_url);

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Request failed after retries")))
    }
}

/// `nomic-embed-text` is served as `nomic-embed-text:latest`
fn model_matches(available: &str, wanted: &str) -> bool {
    available == wanted
        || available
            .strip_suffix(":latest")
            .is_some_and(|base| base == wanted)
        || wanted
            .strip_suffix(":latest")
            .is_some_and(|base| base == available)
}

/// Extract `embeddings` from an `/api/embed` response, rejecting anything
/// that is not an array of numeric arrays.
fn parse_embed_response(body: &str) -> Result<Vec<Vec<f32>>> {
    let value: serde_json::Value =
        serde_json::from_str(body).context("Failed to parse embedding response")?;

    let embeddings = value
        .get("embeddings")
        .ok_or_else(|| anyhow::anyhow!("Embedding response has no 'embeddings' field"))?
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("Embedding response 'embeddings' is not an array"))?;

    embeddings
        .iter()
        .enumerate()
        .map(|(i, embedding)| {
            let values = embedding
                .as_array()
                .ok_or_else(|| anyhow::anyhow!("Embedding {} is not an array", i))?;
            values
                .iter()
                .map(|v| {
                    v.as_f64()
                        .map(|f| f as f32)
                        .ok_or_else(|| anyhow::anyhow!("Embedding {} has a non-numeric value", i))
                })
                .collect()
        })
        .collect()
}

/// Embedding provider backed by an Ollama server. The vector width is
/// learned from the first response and enforced on every later one.
#[derive(Debug)]
pub struct RemoteEmbeddingProvider {
    client: Arc<OllamaClient>,
    name: String,
    dimensions: AtomicUsize,
}

impl RemoteEmbeddingProvider {
    #[inline]
    pub fn new(config: &OllamaConfig) -> crate::Result<Self> {
        let client = OllamaClient::new(config).map_err(|e| RagError::Config(format!("{:#}", e)))?;
        Ok(Self::from_client(client))
    }

    #[inline]
    pub fn from_client(client: OllamaClient) -> Self {
        Self {
            name: format!("ollama/{}", client.model()),
            client: Arc::new(client),
            dimensions: AtomicUsize::new(0),
        }
    }

    /// Probe the server and model with the short probe timeout
    #[inline]
    pub async fn check_available(&self) -> crate::Result<()> {
        let client = Arc::clone(&self.client);
        tokio::task::spawn_blocking(move || client.health_check())
            .await
            .map_err(|e| RagError::Network(format!("Health check task failed: {}", e)))?
            .map_err(|e| RagError::Network(format!("{:#}", e)))
    }

    fn record_dimensions(&self, embeddings: &[Vec<f32>]) -> crate::Result<()> {
        for embedding in embeddings {
            let len = embedding.len();
            if len == 0 {
                return Err(RagError::Embedding(
                    "Remote provider returned an empty embedding".to_string(),
                ));
            }

            match self
                .dimensions
                .compare_exchange(0, len, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => info!("Detected {}d embeddings from {}", len, self.name),
                Err(known) if known == len => {}
                Err(known) => {
                    return Err(RagError::Embedding(format!(
                        "Embedding dimension changed: expected {}d, got {}d from {}",
                        known, len, self.name
                    )));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbeddingProvider {
    #[inline]
    fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    fn dimensions(&self) -> usize {
        self.dimensions.load(Ordering::SeqCst)
    }

    #[inline]
    async fn embed(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());

        for batch in texts.chunks(EMBED_BATCH_SIZE) {
            let client = Arc::clone(&self.client);
            let batch = batch.to_vec();
            let batch_embeddings = tokio::task::spawn_blocking(move || client.embed_batch(&batch))
                .await
                .map_err(|e| RagError::Embedding(format!("Embedding task failed: {}", e)))?
                .map_err(|e| RagError::Embedding(format!("{:#}", e)))?;

            self.record_dimensions(&batch_embeddings)?;
            embeddings.extend(batch_embeddings);
        }

        debug!("Generated {} embeddings total", embeddings.len());
        Ok(embeddings)
    }

    #[inline]
    async fn embed_single(&self, text: &str) -> crate::Result<Vec<f32>> {
        self.embed(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| RagError::Embedding("Remote provider returned no embedding".to_string()))
    }
}

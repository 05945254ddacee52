
use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::HarvesterError;
use crate::config::EmbeddingConfig;

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const EXPONENTIAL_BACKOFF_BASE: u64 = 2;

/// Embedding generator backed by an Ollama-compatible endpoint.
///
/// When no endpoint is configured, or the endpoint fails, it falls back
/// to a unit-normalized random vector so the pipeline always produces an
/// embedding of the configured dimension. Fallback vectors carry no
/// semantic signal; similarity search over them is effectively random.
#[derive(Debug, Clone)]
pub struct EmbeddingProvider {
    endpoint: Option<String>,
    model: String,
    dimension: usize,
    batch_size: usize,
    agent: ureq::Agent,
    retry_attempts: u32,
}

#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl EmbeddingProvider {
    pub fn new(config: &EmbeddingConfig) -> Self {
        let endpoint = if config.endpoint.is_empty() {
            None
        } else {
            Some(config.endpoint.trim_end_matches('/').to_string())
        };

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)))
            .build()
            .into();

        Self {
            endpoint,
            model: config.model.clone(),
            dimension: config.dimension as usize,
            batch_size: config.batch_size.max(1) as usize,
            agent,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        }
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn has_remote_backend(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Generate an embedding for a single text. Never fails: remote errors
    /// degrade to the random fallback.
    pub fn embed(&self, text: &str) -> Vec<f32> {
        if self.endpoint.is_some() {
            match self.embed_remote(std::slice::from_ref(&text.to_string())) {
                Ok(mut vectors) if vectors.len() == 1 => return vectors.remove(0),
                Ok(vectors) => {
                    warn!(
                        "Embedding endpoint returned {} vectors for 1 input, using fallback",
                        vectors.len()
                    );
                }
                Err(e) => {
                    warn!("Embedding request failed ({}), using fallback", e);
                }
            }
        }

        random_unit_vector(self.dimension)
    }

    /// Generate embeddings for many texts, batched against the endpoint.
    /// Output order matches input order.
    pub fn embed_batch(&self, texts: &[String]) -> Vec<Vec<f32>> {
        if texts.is_empty() {
            return Vec::new();
        }

        if self.endpoint.is_some() {
            let mut results = Vec::with_capacity(texts.len());
            let mut remote_ok = true;

            for batch in texts.chunks(self.batch_size) {
                match self.embed_remote(batch) {
                    Ok(vectors) if vectors.len() == batch.len() => results.extend(vectors),
                    Ok(vectors) => {
                        warn!(
                            "Embedding endpoint returned {} vectors for {} inputs",
                            vectors.len(),
                            batch.len()
                        );
                        remote_ok = false;
                        break;
                    }
                    Err(e) => {
                        warn!("Embedding batch failed ({}), using fallback", e);
                        remote_ok = false;
                        break;
                    }
                }
            }

            if remote_ok {
                return results;
            }
        }

        texts
            .iter()
            .map(|_| random_unit_vector(self.dimension))
            .collect()
    }

    fn embed_remote(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let endpoint = self
            .endpoint
            .as_deref()
            .context("No embedding endpoint configured")?;
        let url = format!("{endpoint}/api/embed");

        let request = EmbedRequest {
            model: self.model.clone(),
            input: texts.to_vec(),
        };
        let request_json =
            serde_json::to_string(&request).context("Failed to serialize embedding request")?;

        let response_text = self
            .make_request_with_retry(|| {
                self.agent
                    .post(url.as_str())
                    .header("Content-Type", "application/json")
                    .send(&request_json)
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .map_err(|e| HarvesterError::Embedding(format!("Failed to generate embeddings: {e}")))?;

        let response: EmbedResponse = serde_json::from_str(&response_text)
            .map_err(|e| HarvesterError::Embedding(format!("Unexpected embedding response: {e}")))?;

        Ok(response.embeddings)
    }

    fn make_request_with_retry<F>(&self, mut request_fn: F) -> Result<String>
    where
        F: FnMut() -> Result<String, ureq::Error>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            match request_fn() {
                Ok(response_text) => return Ok(response_text),
                Err(error) => {
                    let should_retry = match &error {
                        ureq::Error::StatusCode(status) => {
                            if *status >= 500 {
                                warn!(
                                    "Embedding server error (status {}), attempt {}/{}",
                                    status, attempt, self.retry_attempts
                                );
                                true
                            } else {
                                return Err(anyhow::anyhow!("Client error: HTTP {}", status));
                            }
                        }
                        ureq::Error::ConnectionFailed
                        | ureq::Error::HostNotFound
                        | ureq::Error::Timeout(_)
                        | ureq::Error::Io(_) => {
                            warn!(
                                "Embedding transport error: {}, attempt {}/{}",
                                error, attempt, self.retry_attempts
                            );
                            true
                        }
                        _ => {
                            warn!("Non-retryable embedding error: {}", error);
                            false
                        }
                    };

                    if !should_retry {
                        return Err(anyhow::anyhow!("Non-retryable error: {}", error));
                    }

                    last_error = Some(anyhow::anyhow!("Request error: {}", error));

                    if attempt < self.retry_attempts {
                        let delay_ms = EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1) * 1000;
                        debug!("Waiting {}ms before embedding retry", delay_ms);
                        std::thread::sleep(Duration::from_millis(delay_ms));
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Request failed after retries")))
    }
}

/// Uniform random direction on the unit sphere of the given dimension.
pub fn random_unit_vector(dimension: usize) -> Vec<f32> {
    let mut rng = rand::thread_rng();
    let mut vector: Vec<f32> = (0..dimension).map(|_| rng.gen_range(-1.0..1.0)).collect();

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in &mut vector {
            *v /= norm;
        }
    } else if dimension > 0 {
        vector[0] = 1.0;
    }

    vector
}

/// Cosine similarity in [-1, 1]. Zero-norm or mismatched inputs yield 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();

    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Rank candidates by similarity to the query, keeping the `top_k` most
/// similar that clear `threshold`. Returns (candidate index, similarity).
pub fn find_similar(
    query: &[f32],
    candidates: &[Vec<f32>],
    top_k: usize,
    threshold: f32,
) -> Vec<(usize, f32)> {
    let mut scored: Vec<(usize, f32)> = candidates
        .iter()
        .enumerate()
        .map(|(i, candidate)| (i, cosine_similarity(query, candidate)))
        .filter(|(_, score)| *score >= threshold)
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(top_k);
    scored
}

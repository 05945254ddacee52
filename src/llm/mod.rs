
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::HarvesterError;
use crate::config::{LlmConfig, LlmProviderKind};
use crate::database::queries::SettingsQueries;
use crate::processing::classifier::LensType;

const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const EXPONENTIAL_BACKOFF_BASE: u64 = 2;
const CACHE_MAX_ENTRIES: usize = 100;
const CACHE_KEY_PROMPT_PREFIX: usize = 200;

/// Settings keys that override the file configuration at runtime.
pub const SETTING_LLM_PROVIDER: &str = "llm_provider";
pub const SETTING_LLM_MODEL: &str = "llm_model";

/// Distinct call sites, each with its own cache lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LlmTask {
    Classify,
    EntityExtraction,
    Generate,
}

impl LlmTask {
    #[inline]
    fn ttl(&self) -> Duration {
        match *self {
            LlmTask::Classify | LlmTask::EntityExtraction => Duration::from_secs(300),
            LlmTask::Generate => Duration::from_secs(600),
        }
    }

    #[inline]
    fn as_str(&self) -> &'static str {
        match *self {
            LlmTask::Classify => "classify",
            LlmTask::EntityExtraction => "entity_extraction",
            LlmTask::Generate => "generate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStatus {
    pub provider: String,
    pub model: String,
    pub valid: bool,
    pub available_models: Vec<String>,
    pub error: Option<String>,
}

/// Entities and relationships pulled out of one text.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EntityExtraction {
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub relationships: Vec<EntityRelationship>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRelationship {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub relation: String,
}

/// Generation knobs passed through to the provider. Defaults leave every
/// knob at the provider's own default.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GenerateOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub json_mode: bool,
}

struct CacheEntry {
    response: String,
    inserted: Instant,
    ttl: Duration,
}

#[derive(Default)]
struct ResponseCache {
    entries: HashMap<String, CacheEntry>,
    insertion_order: VecDeque<String>,
}

impl ResponseCache {
    fn get(&mut self, key: &str) -> Option<String> {
        match self.entries.get(key) {
            Some(entry) if entry.inserted.elapsed() < entry.ttl => Some(entry.response.clone()),
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn insert(&mut self, key: String, response: String, ttl: Duration) {
        // Re-inserting a key (after expiry or to refresh) must not leave a
        // stale occurrence in the order queue, or eviction would pop it and
        // drop the fresh entry ahead of its turn.
        self.insertion_order.retain(|existing| *existing != key);

        while self.entries.len() >= CACHE_MAX_ENTRIES {
            let Some(oldest) = self.insertion_order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
        }

        self.insertion_order.push_back(key.clone());
        self.entries.insert(
            key,
            CacheEntry {
                response,
                inserted: Instant::now(),
                ttl,
            },
        );
    }
}

#[derive(Debug, Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
struct OllamaTagsResponse {
    #[serde(default)]
    models: Vec<OllamaModel>,
}

#[derive(Debug, Deserialize)]
struct OllamaModel {
    name: String,
}

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct OpenAiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    content: String,
}

/// Synchronous LLM client shared by the classifier, entity extractor, and
/// wiki generator. The provider is resolved once at construction from the
/// file config plus any runtime overrides stored in `app_settings`; it
/// never changes for the lifetime of the service.
pub struct LlmService {
    provider: LlmProviderKind,
    model: String,
    ollama_url: String,
    openai_api_key: Option<String>,
    agent: ureq::Agent,
    retry_attempts: u32,
    cache: Mutex<ResponseCache>,
}

impl LlmService {
    /// Resolve the effective provider and model, preferring `app_settings`
    /// overrides over the file configuration.
    pub async fn resolve(config: &LlmConfig, pool: &SqlitePool) -> Result<Self> {
        let mut provider = config.provider;
        let mut model = config.model.clone();

        if let Some(value) = SettingsQueries::get(pool, SETTING_LLM_PROVIDER).await? {
            match value.as_str() {
                "ollama" => provider = LlmProviderKind::Ollama,
                "openai" => provider = LlmProviderKind::OpenAi,
                "none" => provider = LlmProviderKind::None,
                other => warn!("Ignoring unknown llm_provider setting: {}", other),
            }
        }

        if let Some(value) = SettingsQueries::get(pool, SETTING_LLM_MODEL).await? {
            model = value;
        }

        debug!("Resolved LLM provider {:?} with model {}", provider, model);
        Ok(Self::with_provider(config, provider, model))
    }

    pub fn with_provider(config: &LlmConfig, provider: LlmProviderKind, model: String) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_seconds)))
            .build()
            .into();

        Self {
            provider,
            model,
            ollama_url: config.ollama_url.trim_end_matches('/').to_string(),
            openai_api_key: config.openai_api_key.clone(),
            agent,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            cache: Mutex::new(ResponseCache::default()),
        }
    }

    #[inline]
    pub fn provider(&self) -> LlmProviderKind {
        self.provider
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn classify(&self, prompt: &str) -> Result<String> {
        self.complete(prompt, LlmTask::Classify, GenerateOptions::default())
    }

    pub fn generate(&self, prompt: &str) -> Result<String> {
        self.generate_with(prompt, GenerateOptions::default())
    }

    pub fn generate_with(&self, prompt: &str, options: GenerateOptions) -> Result<String> {
        self.complete(prompt, LlmTask::Generate, options)
    }

    /// Extract named entities and their relationships from a text, guided
    /// by an entity-type schema. Parse failures surface as errors for the
    /// caller to swallow.
    pub fn extract_entities(
        &self,
        text: &str,
        schema: &[&str],
        lens_hint: Option<LensType>,
    ) -> Result<EntityExtraction> {
        let excerpt: String = text.chars().take(1000).collect();
        let hint = lens_hint.map_or_else(String::new, |lens| {
            format!(" The text is {} content: {}.", lens, lens.description())
        });

        let prompt = format!(
            "Extract the named entities from the following text. Focus on these entity types: \
             {}.{hint}\n\nText:\n{excerpt}\n\n\
             Respond with a JSON object of the form \
             {{\"entities\": [\"name\", ...], \"relationships\": \
             [{{\"source\": \"a\", \"target\": \"b\", \"type\": \"relates_to\"}}, ...]}}\n",
            schema.join(", ")
        );

        let response = self.complete(
            &prompt,
            LlmTask::EntityExtraction,
            GenerateOptions {
                json_mode: true,
                ..Default::default()
            },
        )?;
        parse_extraction_response(&response)
    }

    /// Probe the configured provider without caching the result.
    pub fn validate_connection(&self) -> ConnectionStatus {
        let provider_name = match self.provider {
            LlmProviderKind::Ollama => "ollama",
            LlmProviderKind::OpenAi => "openai",
            LlmProviderKind::None => "none",
        };

        let result = match self.provider {
            LlmProviderKind::Ollama => self
                .agent
                .get(format!("{}/api/tags", self.ollama_url))
                .call()
                .map_err(|e| e.to_string())
                .and_then(|mut resp| {
                    resp.body_mut().read_to_string().map_err(|e| e.to_string())
                })
                .and_then(|body| {
                    serde_json::from_str::<OllamaTagsResponse>(&body)
                        .map(|tags| tags.models.into_iter().map(|m| m.name).collect())
                        .map_err(|e| format!("Unexpected tags response: {e}"))
                }),
            LlmProviderKind::OpenAi => {
                if self.openai_api_key.is_some() {
                    Ok(Vec::new())
                } else {
                    Err("No API key configured".to_string())
                }
            }
            LlmProviderKind::None => Err("No LLM provider configured".to_string()),
        };

        match result {
            Ok(available_models) => ConnectionStatus {
                provider: provider_name.to_string(),
                model: self.model.clone(),
                valid: true,
                available_models,
                error: None,
            },
            Err(error) => ConnectionStatus {
                provider: provider_name.to_string(),
                model: self.model.clone(),
                valid: false,
                available_models: Vec::new(),
                error: Some(error),
            },
        }
    }

    fn complete(&self, prompt: &str, task: LlmTask, options: GenerateOptions) -> Result<String> {
        if self.provider == LlmProviderKind::None {
            return Err(HarvesterError::Llm("No LLM provider configured".to_string()).into());
        }

        let key = cache_key(prompt, &self.model, task);
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(cached) = cache.get(&key) {
                debug!("LLM cache hit for {} task", task.as_str());
                return Ok(cached);
            }
        }

        let response = match self.provider {
            LlmProviderKind::Ollama => self.complete_ollama(prompt, options)?,
            LlmProviderKind::OpenAi => self.complete_openai(prompt, options)?,
            LlmProviderKind::None => unreachable!(),
        };

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, response.clone(), task.ttl());
        }

        Ok(response)
    }

    fn complete_ollama(&self, prompt: &str, options: GenerateOptions) -> Result<String> {
        let url = format!("{}/api/generate", self.ollama_url);
        let knobs = (options.temperature.is_some() || options.max_tokens.is_some()).then(|| {
            OllamaOptions {
                temperature: options.temperature,
                num_predict: options.max_tokens,
            }
        });
        let request = OllamaGenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            format: options.json_mode.then_some("json"),
            options: knobs,
        };
        let request_json =
            serde_json::to_string(&request).context("Failed to serialize generate request")?;

        let response_text = self
            .make_request_with_retry(|| {
                self.agent
                    .post(url.as_str())
                    .header("Content-Type", "application/json")
                    .send(&request_json)
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to call Ollama generate API")?;

        let response: OllamaGenerateResponse =
            serde_json::from_str(&response_text).context("Failed to parse Ollama response")?;

        Ok(response.response)
    }

    fn complete_openai(&self, prompt: &str, options: GenerateOptions) -> Result<String> {
        let api_key = self
            .openai_api_key
            .as_deref()
            .context("OpenAI provider selected but no API key configured")?;

        let request = OpenAiRequest {
            model: &self.model,
            messages: vec![OpenAiMessage {
                role: "user",
                content: prompt,
            }],
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            response_format: options
                .json_mode
                .then(|| serde_json::json!({ "type": "json_object" })),
        };
        let request_json =
            serde_json::to_string(&request).context("Failed to serialize chat request")?;

        let response_text = self
            .make_request_with_retry(|| {
                self.agent
                    .post("https://api.openai.com/v1/chat/completions")
                    .header("Content-Type", "application/json")
                    .header("Authorization", format!("Bearer {api_key}"))
                    .send(&request_json)
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to call OpenAI chat API")?;

        let response: OpenAiResponse =
            serde_json::from_str(&response_text).context("Failed to parse OpenAI response")?;

        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .context("OpenAI response contained no choices")
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
                            if *status >= 500 || *status == 429 {
                                warn!(
                                    "LLM server error (status {}), attempt {}/{}",
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
                                "LLM transport error: {}, attempt {}/{}",
                                error, attempt, self.retry_attempts
                            );
                            true
                        }
                        _ => {
                            warn!("Non-retryable LLM error: {}", error);
                            false
                        }
                    };

                    if !should_retry {
                        return Err(anyhow::anyhow!("Non-retryable error: {}", error));
                    }

                    last_error = Some(anyhow::anyhow!("Request error: {}", error));

                    if attempt < self.retry_attempts {
                        let delay_ms = EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1) * 1000;
                        std::thread::sleep(Duration::from_millis(delay_ms));
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Request failed after retries")))
    }
}

/// Entity types the extractor looks for, by lens. Every lens shares the
/// base document vocabulary plus domain-specific types.
pub fn entity_schema(lens_type: Option<LensType>) -> Vec<&'static str> {
    let mut schema = vec!["Document", "Section", "Concept"];

    match lens_type {
        Some(LensType::Logic) => schema.extend(["BusinessRule", "Process", "Decision"]),
        Some(LensType::Sop) => schema.extend(["Procedure", "Checklist", "Policy"]),
        Some(LensType::Gtm) => schema.extend(["Product", "Market", "Strategy"]),
        Some(LensType::Cl) => schema.extend(["Equipment", "Route", "Facility"]),
        None => schema.extend(["Entity", "Topic", "Reference"]),
    }

    schema
}

fn cache_key(prompt: &str, model: &str, task: LlmTask) -> String {
    let prefix: String = prompt.chars().take(CACHE_KEY_PROMPT_PREFIX).collect();

    let mut hasher = Sha256::new();
    hasher.update(prefix.as_bytes());
    hasher.update(model.as_bytes());
    hasher.update(task.as_str().as_bytes());
    format!("{:x}", hasher.finalize())
}

fn parse_extraction_response(response: &str) -> Result<EntityExtraction> {
    // Models sometimes wrap the JSON in prose or code fences; find the
    // outermost braces before parsing. Some models ignore the object shape
    // and answer with a bare entity array, which is accepted too.
    let trimmed = response.trim();

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            let mut extraction: EntityExtraction = serde_json::from_str(&trimmed[start..=end])
                .context("Failed to parse entity extraction object")?;
            extraction.entities = clean_names(extraction.entities);
            extraction
                .relationships
                .retain(|r| !r.source.is_empty() && !r.target.is_empty());
            return Ok(extraction);
        }
    }

    let start = trimmed.find('[').context("No JSON in entity response")?;
    let end = trimmed.rfind(']').context("No closing bracket in response")?;
    anyhow::ensure!(start < end, "Malformed entity response");

    let entities: Vec<String> =
        serde_json::from_str(&trimmed[start..=end]).context("Failed to parse entity array")?;

    Ok(EntityExtraction {
        entities: clean_names(entities),
        relationships: Vec::new(),
    })
}

fn clean_names(names: Vec<String>) -> Vec<String> {
    names
        .into_iter()
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .collect()
}

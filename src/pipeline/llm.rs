//! Model backend: an opaque text/vision completion service.
//!
//! Everything that talks to a language model goes through
//! [`CompletionBackend`]. The production implementation, [`LlmBackend`],
//! wraps an `edgequake_llm` provider and adds retry with exponential
//! backoff. Tests substitute a scripted fake.
//!
//! Prompt wording lives in [`crate::prompts`]; this module only moves
//! messages and handles failures.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors are transient and frequent under concurrent load,
//! which the map phase produces. The wait before retry `n` is
//! `retry_delay_ms * 2^(n-1)`: with 1000 ms and 3 retries, 1 s → 2 s → 4 s.

use crate::config::ConversionConfig;
use crate::error::BackendError;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// One chat-completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    /// Attached images; non-empty makes this a vision call.
    pub images: Vec<ImageData>,
    pub temperature: f32,
    pub max_tokens: Option<usize>,
}

impl CompletionRequest {
    pub fn text(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            images: Vec::new(),
            temperature: 0.2,
            max_tokens: None,
        }
    }

    pub fn with_images(mut self, images: Vec<ImageData>) -> Self {
        self.images = images;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// A chat-completion call that accepts text and optionally images.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Identifier of the model answering; part of every cache key.
    fn model_id(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<String, BackendError>;
}

/// [`CompletionBackend`] over an `edgequake_llm` provider.
pub struct LlmBackend {
    provider: Arc<dyn LLMProvider>,
    model_id: String,
    max_retries: u32,
    retry_delay_ms: u64,
}

impl LlmBackend {
    pub fn new(provider: Arc<dyn LLMProvider>, model_id: impl Into<String>) -> Self {
        Self {
            provider,
            model_id: model_id.into(),
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }

    pub fn with_retries(mut self, max_retries: u32, retry_delay_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_delay_ms = retry_delay_ms;
        self
    }
}

impl std::fmt::Debug for LlmBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmBackend")
            .field("model_id", &self.model_id)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

#[async_trait]
impl CompletionBackend for LlmBackend {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, BackendError> {
        let start = Instant::now();
        let messages = build_messages(request);
        let options = build_options(request);

        let mut last_err: Option<String> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = backoff_ms(self.retry_delay_ms, attempt);
                warn!(
                    "Completion retry {}/{} after {}ms",
                    attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match self.provider.chat(&messages, Some(&options)).await {
                Ok(response) => {
                    debug!(
                        "{} input tokens, {} output tokens, {} image(s), {:?}",
                        response.prompt_tokens,
                        response.completion_tokens,
                        request.images.len(),
                        start.elapsed()
                    );
                    if response.content.trim().is_empty() {
                        return Err(BackendError::EmptyResponse);
                    }
                    return Ok(response.content);
                }
                Err(e) => {
                    let err_msg = format!("{}", e);
                    warn!("Completion attempt {} failed: {}", attempt + 1, err_msg);
                    last_err = Some(err_msg);
                }
            }
        }

        Err(BackendError::RequestFailed {
            attempts: self.max_retries + 1,
            detail: last_err.unwrap_or_else(|| "Unknown error".to_string()),
        })
    }
}

fn build_messages(request: &CompletionRequest) -> Vec<ChatMessage> {
    let user = if request.images.is_empty() {
        ChatMessage::user(&request.user)
    } else {
        ChatMessage::user_with_images(&request.user, request.images.clone())
    };
    vec![ChatMessage::system(&request.system), user]
}

fn build_options(request: &CompletionRequest) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(request.temperature),
        max_tokens: request.max_tokens,
        ..Default::default()
    }
}

fn backoff_ms(base: u64, attempt: u32) -> u64 {
    base.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
}

// ── Provider resolution ──────────────────────────────────────────────────

const DEFAULT_MODEL: &str = "gpt-4.1-nano";

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, BackendError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        BackendError::NotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the model backend, from most-specific to least-specific:
///
/// 1. `config.provider`, used as-is;
/// 2. `config.provider_name` + `config.model`;
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` when both are set;
/// 4. OpenAI when `OPENAI_API_KEY` is set;
/// 5. whatever `ProviderFactory::from_env` detects.
///
/// An error here means no credential is configured; the orchestrator then
/// runs the rule-based path.
pub fn resolve_backend(config: &ConversionConfig) -> Result<Arc<dyn CompletionBackend>, BackendError> {
    let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
    let wrap = |provider: Arc<dyn LLMProvider>, model: &str| -> Arc<dyn CompletionBackend> {
        Arc::new(
            LlmBackend::new(provider, model).with_retries(config.max_retries, config.retry_delay_ms),
        )
    };

    if let Some(ref provider) = config.provider {
        return Ok(wrap(Arc::clone(provider), model));
    }

    if let Some(ref name) = config.provider_name {
        return Ok(wrap(create_provider(name, model)?, model));
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return Ok(wrap(create_provider(&prov, &env_model)?, &env_model));
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return Ok(wrap(create_provider("openai", model)?, model));
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| BackendError::NotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;
    info!("Auto-detected LLM provider");
    Ok(wrap(llm_provider, model))
}

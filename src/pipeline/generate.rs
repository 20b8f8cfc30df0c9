//! Direct single-shot diagram generation.
//!
//! Small documents go through here in one model call; the map-reduce
//! processor reuses it for the final synthesis. Every call is memoised via
//! [`CacheManager::cache_llm_call`] and its output cleaned by
//! [`postprocess::clean_mermaid`].

use crate::cache::{digest, CacheManager};
use crate::config::{ChartType, ConversionConfig, Direction};
use crate::error::BackendError;
use crate::pipeline::llm::{CompletionBackend, CompletionRequest};
use crate::pipeline::postprocess;
use crate::prompts;
use edgequake_llm::ImageData;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Options that, together with the prompt and model id, identify a call.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CallKey<'a> {
    kind: &'a str,
    direction: Direction,
    chart_type: ChartType,
    max_nodes: usize,
    temperature: f32,
    max_tokens: usize,
    /// SHA-256 of each attached image, in order.
    images: Vec<String>,
}

/// Text and vision diagram generation against one backend.
#[derive(Clone)]
pub struct DiagramGenerator {
    backend: Arc<dyn CompletionBackend>,
    cache: Arc<CacheManager>,
    max_text_chars: usize,
    temperature: f32,
    max_tokens: usize,
}

impl std::fmt::Debug for DiagramGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagramGenerator")
            .field("model", &self.backend.model_id())
            .field("max_text_chars", &self.max_text_chars)
            .finish()
    }
}

impl DiagramGenerator {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        cache: Arc<CacheManager>,
        config: &ConversionConfig,
    ) -> Self {
        Self {
            backend,
            cache,
            max_text_chars: config.max_text_chars,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    pub fn backend(&self) -> &Arc<dyn CompletionBackend> {
        &self.backend
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    /// Generate a diagram from text alone. The text is cut to
    /// `max_text_chars` characters first.
    pub async fn from_text(
        &self,
        text: &str,
        direction: Direction,
        chart_type: ChartType,
        max_nodes: usize,
    ) -> Result<String, BackendError> {
        let content = truncate_chars(text, self.max_text_chars);
        let request = CompletionRequest::text(
            prompts::diagram_system_prompt(chart_type, direction, max_nodes),
            prompts::diagram_user_prompt(chart_type, direction, content),
        )
        .with_temperature(self.temperature)
        .with_max_tokens(self.max_tokens);

        let key = self.call_key("text", direction, chart_type, max_nodes, &[]);
        let raw = self.complete_cached(request, &key).await?;
        Ok(postprocess::clean_mermaid(&raw, direction, chart_type))
    }

    /// Generate a diagram from page images plus (possibly empty) text.
    pub async fn from_images(
        &self,
        text: &str,
        images: &[ImageData],
        direction: Direction,
        chart_type: ChartType,
        max_nodes: usize,
    ) -> Result<String, BackendError> {
        let content = truncate_chars(text, self.max_text_chars);
        let request = CompletionRequest::text(
            prompts::vision_system_prompt(chart_type, direction, max_nodes),
            prompts::vision_user_prompt(chart_type, direction, content),
        )
        .with_images(images.to_vec())
        .with_temperature(self.temperature)
        .with_max_tokens(self.max_tokens);

        let key = self.call_key("vision", direction, chart_type, max_nodes, images);
        let raw = self.complete_cached(request, &key).await?;
        Ok(postprocess::clean_mermaid(&raw, direction, chart_type))
    }

    /// Send `request` through the LLM cache. `options` completes the key.
    pub async fn complete_cached<O>(
        &self,
        request: CompletionRequest,
        options: &O,
    ) -> Result<String, BackendError>
    where
        O: Serialize + ?Sized,
    {
        let prompt = format!("{}\n\n{}", request.system, request.user);
        let backend = Arc::clone(&self.backend);
        self.cache
            .cache_llm_call(&prompt, self.backend.model_id(), options, || async move {
                debug!(
                    "Model call: {} prompt chars, {} image(s)",
                    request.system.len() + request.user.len(),
                    request.images.len()
                );
                backend.complete(&request).await
            })
            .await
    }

    fn call_key<'a>(
        &self,
        kind: &'a str,
        direction: Direction,
        chart_type: ChartType,
        max_nodes: usize,
        images: &[ImageData],
    ) -> CallKey<'a> {
        CallKey {
            kind,
            direction,
            chart_type,
            max_nodes,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            images: images.iter().map(|i| digest(i.data.as_bytes())).collect(),
        }
    }
}

/// The first `max` characters of `text`.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((byte, _)) => &text[..byte],
        None => text,
    }
}

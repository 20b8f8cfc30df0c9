//! Configuration types for PDF-to-diagram conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. Component-specific knobs live in
//! nested, serialisable sub-configs ([`RoutingConfig`], [`MapReduceConfig`],
//! [`CacheConfig`]) so each component can be constructed from exactly the
//! slice it needs.
//!
//! Nothing in the pipeline reads the environment directly. The only place
//! environment variables are consulted is [`ConversionConfig::from_env`],
//! which the binary calls once at start-up.

use crate::error::ConvertError;
use crate::progress::ProgressCallback;
use crate::routing::Strategy;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for a conversion service instance.
///
/// # Example
/// ```rust
/// use pdf2mermaid::ConversionConfig;
///
/// let config = ConversionConfig::builder()
///     .max_pages(50)
///     .chunk_size(1500)
///     .cache_enabled(true)
///     .build()
///     .unwrap();
/// assert_eq!(config.chunk_overlap, 200);
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Upload size cap in megabytes. Default: 50.
    pub max_file_size_mb: u64,

    /// Page-count cap. Default: 100.
    pub max_pages: usize,

    /// Target chunk size for map-reduce, in characters. Default: 2000.
    pub chunk_size: usize,

    /// Characters of context repeated at the start of the next chunk. Default: 200.
    pub chunk_overlap: usize,

    /// Node cap for the final diagram. Default: 60.
    ///
    /// In map-reduce mode each chunk gets `max_nodes / chunk_count` so the
    /// merged diagram stays within the same cap.
    pub max_nodes: usize,

    /// Text length (characters) above which `mapReduce=auto` picks map-reduce. Default: 10 000.
    pub map_reduce_char_threshold: usize,

    /// Page count above which `mapReduce=auto` picks map-reduce. Default: 20.
    pub map_reduce_page_threshold: usize,

    /// Protective truncation applied to any text sent in one model call. Default: 20 000.
    pub max_text_chars: usize,

    /// Maximum number of pages rasterised for the multimodal strategy. Default: 10.
    pub max_vision_pages: usize,

    /// Rasterisation options for the multimodal strategy.
    pub render: RenderOptions,

    /// Complexity thresholds and strategy names.
    pub routing: RoutingConfig,

    /// Map-phase batching and summary settings.
    pub map_reduce: MapReduceConfig,

    /// Cache enable flag, TTLs and capacity.
    pub cache: CacheConfig,

    /// LLM model identifier. If None, the provider default is used.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for diagram generation. Default: 0.2.
    pub temperature: f32,

    /// Maximum tokens for a diagram-generation call. Default: 4000.
    pub max_tokens: usize,

    /// Maximum tokens for a chunk-summary call. Default: 1000.
    pub summary_max_tokens: usize,

    /// Retry attempts on a failed model call. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds; doubles per attempt. Default: 1000.
    pub retry_delay_ms: u64,

    /// Allow the rule-based heuristic as the last fallback. Default: true.
    ///
    /// When false, a model failure with no model-based fallback left is
    /// reported to the caller instead of degrading to the heuristic.
    pub enable_fallback: bool,

    /// Caller-level timeout for a whole conversion request. Default: 300.
    pub request_timeout_secs: u64,

    /// Map-phase progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: 50,
            max_pages: 100,
            chunk_size: 2000,
            chunk_overlap: 200,
            max_nodes: 60,
            map_reduce_char_threshold: 10_000,
            map_reduce_page_threshold: 20,
            max_text_chars: 20_000,
            max_vision_pages: 10,
            render: RenderOptions::default(),
            routing: RoutingConfig::default(),
            map_reduce: MapReduceConfig::default(),
            cache: CacheConfig::default(),
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.2,
            max_tokens: 4000,
            summary_max_tokens: 1000,
            max_retries: 3,
            retry_delay_ms: 1000,
            enable_fallback: true,
            request_timeout_secs: 300,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("max_file_size_mb", &self.max_file_size_mb)
            .field("max_pages", &self.max_pages)
            .field("chunk_size", &self.chunk_size)
            .field("chunk_overlap", &self.chunk_overlap)
            .field("max_nodes", &self.max_nodes)
            .field("render", &self.render)
            .field("routing", &self.routing)
            .field("map_reduce", &self.map_reduce)
            .field("cache", &self.cache)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_retries", &self.max_retries)
            .field("enable_fallback", &self.enable_fallback)
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Defaults overlaid with `MAX_PDF_PAGES`, `MAX_FILE_SIZE_MB`,
    /// `CACHE_ENABLED` and `DEFAULT_LLM_MODEL` from the environment.
    ///
    /// Unparseable numeric values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(pages) = env_parse::<usize>("MAX_PDF_PAGES") {
            config.max_pages = pages;
        }
        if let Some(mb) = env_parse::<u64>("MAX_FILE_SIZE_MB") {
            config.max_file_size_mb = mb;
        }
        if let Ok(v) = std::env::var("CACHE_ENABLED") {
            config.cache.enabled = v == "true";
        }
        if let Ok(model) = std::env::var("DEFAULT_LLM_MODEL") {
            if !model.is_empty() {
                config.model = Some(model);
            }
        }
        config
    }

    /// A builder starting from this configuration.
    pub fn into_builder(self) -> ConversionConfigBuilder {
        ConversionConfigBuilder { config: self }
    }

    /// Upload size cap in bytes.
    pub fn max_file_size_bytes(&self) -> usize {
        (self.max_file_size_mb as usize).saturating_mul(1024 * 1024)
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring {}={:?}: not a valid number", key, raw);
            None
        }
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn max_file_size_mb(mut self, mb: u64) -> Self {
        self.config.max_file_size_mb = mb;
        self
    }

    pub fn max_pages(mut self, n: usize) -> Self {
        self.config.max_pages = n;
        self
    }

    pub fn chunk_size(mut self, n: usize) -> Self {
        self.config.chunk_size = n.max(1);
        self
    }

    pub fn chunk_overlap(mut self, n: usize) -> Self {
        self.config.chunk_overlap = n;
        self
    }

    pub fn max_nodes(mut self, n: usize) -> Self {
        self.config.max_nodes = n.max(1);
        self
    }

    pub fn map_reduce_thresholds(mut self, chars: usize, pages: usize) -> Self {
        self.config.map_reduce_char_threshold = chars;
        self.config.map_reduce_page_threshold = pages;
        self
    }

    pub fn max_text_chars(mut self, n: usize) -> Self {
        self.config.max_text_chars = n;
        self
    }

    pub fn max_vision_pages(mut self, n: usize) -> Self {
        self.config.max_vision_pages = n;
        self
    }

    pub fn render(mut self, options: RenderOptions) -> Self {
        self.config.render = options;
        self
    }

    pub fn routing(mut self, routing: RoutingConfig) -> Self {
        self.config.routing = routing;
        self
    }

    pub fn map_reduce(mut self, map_reduce: MapReduceConfig) -> Self {
        self.config.map_reduce = map_reduce;
        self
    }

    pub fn enable_parallel(mut self, v: bool) -> Self {
        self.config.map_reduce.enable_parallel = v;
        self
    }

    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.config.cache = cache;
        self
    }

    pub fn cache_enabled(mut self, v: bool) -> Self {
        self.config.cache.enabled = v;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry_delay_ms = ms;
        self
    }

    pub fn enable_fallback(mut self, v: bool) -> Self {
        self.config.enable_fallback = v;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, ConvertError> {
        let c = &self.config;
        if c.max_pages == 0 {
            return Err(ConvertError::InvalidConfig("max_pages must be ≥ 1".into()));
        }
        if c.max_file_size_mb == 0 {
            return Err(ConvertError::InvalidConfig(
                "max_file_size_mb must be ≥ 1".into(),
            ));
        }
        if c.chunk_overlap >= c.chunk_size {
            return Err(ConvertError::InvalidConfig(
                "chunk_overlap must be smaller than chunk_size".into(),
            ));
        }
        if c.map_reduce.max_chunks_per_batch == 0 {
            return Err(ConvertError::InvalidConfig(
                "max_chunks_per_batch must be ≥ 1".into(),
            ));
        }
        if c.cache.enabled && c.cache.max_size == 0 {
            return Err(ConvertError::InvalidConfig(
                "cache max_size must be ≥ 1 when the cache is enabled".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Component configs ────────────────────────────────────────────────────

/// Complexity thresholds plus the strategy names the router hands out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingConfig {
    pub thresholds: ComplexityThresholds,
    /// Strategy for units scoring below 2. Default: fast.
    pub simple: Strategy,
    /// Strategy for units scoring 2 or more. Default: multimodal.
    pub complex: Strategy,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            thresholds: ComplexityThresholds::default(),
            simple: Strategy::Fast,
            complex: Strategy::Multimodal,
        }
    }
}

/// A factor triggers when the measured value is strictly above its threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplexityThresholds {
    pub text_density: f64,
    pub image_count: usize,
    pub table_count: usize,
}

impl Default for ComplexityThresholds {
    fn default() -> Self {
        Self {
            text_density: 0.3,
            image_count: 2,
            table_count: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapReduceConfig {
    /// Chunks summarised concurrently per batch. Default: 5.
    pub max_chunks_per_batch: usize,
    /// Summary length cap given to the model, in characters. Default: 500.
    pub summary_length: usize,
    /// Batched concurrent map phase; false processes chunks one by one. Default: true.
    pub enable_parallel: bool,
}

impl Default for MapReduceConfig {
    fn default() -> Self {
        Self {
            max_chunks_per_batch: 5,
            summary_length: 500,
            enable_parallel: true,
        }
    }
}

/// Cache settings. Per-operation TTLs reflect how reusable each result is:
/// a parsed PDF rarely changes, a model answer drifts with prompts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    /// Process-wide switch. Default: false.
    pub enabled: bool,
    /// Fallback TTL. Default: 1 hour.
    pub ttl: Duration,
    /// Entry cap; the oldest insertion is evicted first. Default: 100.
    pub max_size: usize,
    /// Period of the background purge of expired entries. Default: 5 minutes.
    pub sweep_interval: Duration,
    pub pdf_ttl: Duration,
    pub image_ttl: Duration,
    pub llm_ttl: Duration,
    pub complexity_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl: Duration::from_secs(3600),
            max_size: 100,
            sweep_interval: Duration::from_secs(300),
            pdf_ttl: Duration::from_secs(7200),
            image_ttl: Duration::from_secs(3600),
            llm_ttl: Duration::from_secs(1800),
            complexity_ttl: Duration::from_secs(3600),
        }
    }
}

/// Page rasterisation options for the multimodal strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderOptions {
    /// Nominal density in DPI. Part of the cache key.
    pub density: u32,
    /// Target width in pixels; height follows the page aspect ratio.
    pub width: u32,
    pub format: ImageFormat,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            density: 144,
            width: 1024,
            format: ImageFormat::Png,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
}

impl ImageFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }
}

// ── Request options ──────────────────────────────────────────────────────

/// Diagram layout direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Direction {
    /// Top to bottom (default).
    #[default]
    TB,
    /// Left to right.
    LR,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::TB => "TB",
            Direction::LR => "LR",
        }
    }

    /// Lenient parse: `LR` in any case is left-to-right, anything else is `TB`.
    pub fn parse_lenient(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("LR") {
            Direction::LR
        } else {
            Direction::TB
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the multimodal strategy may rasterise pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisionMode {
    #[default]
    On,
    Off,
}

impl VisionMode {
    /// `off` (any case) disables vision; anything else enables it.
    pub fn parse_lenient(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("off") {
            VisionMode::Off
        } else {
            VisionMode::On
        }
    }
}

/// Map-reduce selection for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MapReduceMode {
    /// Use map-reduce when the document exceeds the size thresholds (default).
    #[default]
    Auto,
    On,
    Off,
}

impl MapReduceMode {
    /// `on`/`off` (any case) are explicit; anything else is `auto`.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "on" => MapReduceMode::On,
            "off" => MapReduceMode::Off,
            _ => MapReduceMode::Auto,
        }
    }
}

/// Kind of diagram the model is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    /// Mermaid flowchart (`graph TB|LR`). Also accepted as "mermaid".
    #[default]
    #[serde(alias = "mermaid")]
    Flowchart,
    Mindmap,
    Timeline,
    Gantt,
    #[serde(rename = "orgchart")]
    OrgChart,
    Network,
}

impl ChartType {
    /// Unknown names fall back to a flowchart.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "mindmap" => ChartType::Mindmap,
            "timeline" => ChartType::Timeline,
            "gantt" => ChartType::Gantt,
            "orgchart" => ChartType::OrgChart,
            "network" => ChartType::Network,
            _ => ChartType::Flowchart,
        }
    }

    /// Chart types rendered with `graph` syntax.
    pub fn is_graph(&self) -> bool {
        matches!(
            self,
            ChartType::Flowchart | ChartType::OrgChart | ChartType::Network
        )
    }
}

/// Per-request options of the document entry point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertOptions {
    pub direction: Direction,
    pub vision: VisionMode,
    pub map_reduce: MapReduceMode,
}

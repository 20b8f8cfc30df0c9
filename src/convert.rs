//! Conversion orchestration: the composition root.
//!
//! [`ConversionOrchestrator`] sequences validation, extraction, strategy
//! planning and generation, and applies the fallback chain:
//!
//! ```text
//!              ┌─ no backend ───────────────▶ rule-based
//! plan ────────┼─ map-reduce ──(fails)──▶ ai-fallback ──(fails)──▶ rule-fallback
//!              └─ routed: fast | multimodal ──(fails)─────────────▶ rule-fallback
//!                           multimodal: vision ──(fails)──▶ text-only
//! ```
//!
//! Downgrades that change the reported strategy are gated by
//! `enable_fallback`; with it off the underlying error is returned.

use crate::cache::CacheManager;
use crate::config::{ChartType, ConversionConfig, ConvertOptions, Direction, VisionMode};
use crate::error::{BackendError, ConvertError};
use crate::map_reduce::{MapReduceOptions, MapReduceProcessor};
use crate::output::{
    word_count, CacheSummary, ConversionOutput, ConversionStats, ImageConversionOutput, ImageStats,
    RoutingStats,
};
use crate::pipeline::encode::{self, round2};
use crate::pipeline::extract::{DocumentExtractor, ParsedDocument, PdfiumExtractor, RenderedPage};
use crate::pipeline::generate::{truncate_chars, DiagramGenerator};
use crate::pipeline::llm::{self, CompletionBackend};
use crate::pipeline::{input, rules};
use crate::routing::{plan_strategy, Plan, PlanInputs, Router, Strategy};
use edgequake_llm::ImageData;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How the diagram was produced.
struct Outcome {
    mermaid: String,
    strategy: Strategy,
    used_ai: bool,
    used_vision: bool,
    used_map_reduce: bool,
    routing: Option<RoutingStats>,
}

impl Outcome {
    fn rules(mermaid: String, strategy: Strategy) -> Self {
        Self {
            mermaid,
            strategy,
            used_ai: false,
            used_vision: false,
            used_map_reduce: false,
            routing: None,
        }
    }
}

/// Runs conversions against one configuration, cache, extractor and backend.
///
/// The cache is the only state shared between requests; the orchestrator
/// itself is immutable and can be shared behind an `Arc`.
pub struct ConversionOrchestrator {
    config: ConversionConfig,
    cache: Arc<CacheManager>,
    extractor: Arc<dyn DocumentExtractor>,
    backend: Option<Arc<dyn CompletionBackend>>,
    router: Router,
}

impl std::fmt::Debug for ConversionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionOrchestrator")
            .field("config", &self.config)
            .field("backend", &self.backend.as_ref().map(|b| b.model_id().to_string()))
            .finish()
    }
}

impl ConversionOrchestrator {
    /// `backend = None` means no model credential: every document takes the
    /// rule-based path and the image entry point is unavailable.
    pub fn new(
        config: ConversionConfig,
        cache: Arc<CacheManager>,
        extractor: Arc<dyn DocumentExtractor>,
        backend: Option<Arc<dyn CompletionBackend>>,
    ) -> Self {
        let router = Router::new(config.routing.clone());
        Self {
            config,
            cache,
            extractor,
            backend,
            router,
        }
    }

    /// Production wiring: pdfium extractor, a fresh cache and whatever model
    /// backend [`llm::resolve_backend`] finds.
    pub fn from_config(config: ConversionConfig) -> Self {
        let cache = Arc::new(CacheManager::new(config.cache.clone()));
        let backend = match llm::resolve_backend(&config) {
            Ok(b) => {
                info!("Using model backend '{}'", b.model_id());
                Some(b)
            }
            Err(e) => {
                warn!("No model backend, diagrams will be rule-based: {}", e);
                None
            }
        };
        Self::new(config, cache, Arc::new(PdfiumExtractor::from_env()), backend)
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    /// Convert PDF bytes to a diagram.
    ///
    /// # Errors
    /// Validation errors (missing payload, oversized, not a PDF, too many
    /// pages) are returned before any model call. Pipeline errors are
    /// returned only when no fallback is left.
    pub async fn convert(
        &self,
        pdf: &[u8],
        options: ConvertOptions,
    ) -> Result<ConversionOutput, ConvertError> {
        let start = Instant::now();

        // ── Step 1: Validate payload ─────────────────────────────────────
        if pdf.is_empty() {
            return Err(ConvertError::MissingFile);
        }
        let size_mb = pdf.len() as f64 / (1024.0 * 1024.0);
        if pdf.len() > self.config.max_file_size_bytes() {
            return Err(ConvertError::FileTooLarge {
                size_mb,
                max_mb: self.config.max_file_size_mb,
            });
        }
        input::check_pdf_magic(pdf)?;

        // ── Step 2: Parse ────────────────────────────────────────────────
        let parsed: ParsedDocument = self
            .cache
            .cache_pdf_parsing(pdf, "text+images", || self.extractor.parse(pdf))
            .await?;
        if parsed.page_count > self.config.max_pages {
            return Err(ConvertError::TooManyPages {
                pages: parsed.page_count,
                max: self.config.max_pages,
            });
        }
        let characters = parsed.text.chars().count();
        info!(
            "Parsed {} pages, {} characters ({:.2} MB)",
            parsed.page_count, characters, size_mb
        );

        // ── Step 3: Plan and generate ────────────────────────────────────
        let plan = plan_strategy(&PlanInputs {
            text_chars: characters,
            page_count: parsed.page_count,
            map_reduce: options.map_reduce,
            has_backend: self.backend.is_some(),
            char_threshold: self.config.map_reduce_char_threshold,
            page_threshold: self.config.map_reduce_page_threshold,
        });
        debug!("Plan: {:?}", plan);

        let outcome = match (plan, &self.backend) {
            (Plan::MapReduce, Some(backend)) => {
                self.run_map_reduce(backend, &parsed.text, options.direction)
                    .await?
            }
            (Plan::Routed, Some(backend)) => {
                match self.run_routed(backend, pdf, &parsed, options).await {
                    Ok(outcome) => outcome,
                    Err(e) => self.rule_fallback(&parsed.text, options.direction, e)?,
                }
            }
            _ => Outcome::rules(
                rules::text_to_mermaid(&parsed.text, options.direction, self.config.max_nodes),
                Strategy::RuleBased,
            ),
        };

        // ── Step 4: Stats ────────────────────────────────────────────────
        let stats = ConversionStats {
            pages: parsed.page_count,
            words: word_count(&parsed.text),
            characters,
            file_size_mb: round2(size_mb),
            processing_time_ms: start.elapsed().as_millis() as u64,
            processing_strategy: outcome.strategy,
            used_ai: outcome.used_ai,
            used_vision: outcome.used_vision,
            used_map_reduce: outcome.used_map_reduce,
            routing: outcome.routing,
            cache: self.cache_summary(),
        };
        info!(
            "Conversion complete: strategy={}, {}ms",
            stats.processing_strategy, stats.processing_time_ms
        );

        Ok(ConversionOutput {
            mermaid: outcome.mermaid,
            stats,
        })
    }

    /// Resolve a path or URL to bytes, then [`convert`](Self::convert).
    pub async fn convert_input(
        &self,
        input_str: &str,
        options: ConvertOptions,
    ) -> Result<ConversionOutput, ConvertError> {
        let bytes = input::resolve_input(input_str, self.config.request_timeout_secs).await?;
        self.convert(&bytes, options).await
    }

    /// Convert and write the diagram to `output_path` atomically.
    pub async fn convert_to_file(
        &self,
        input_str: &str,
        output_path: impl AsRef<Path>,
        options: ConvertOptions,
    ) -> Result<ConversionStats, ConvertError> {
        let output = self.convert_input(input_str, options).await?;
        write_output(output_path.as_ref(), &output.mermaid).await?;
        Ok(output.stats)
    }

    /// Generate a diagram from one `data:image/...;base64,...` URI.
    ///
    /// There is no text to fall back on, so a backend failure is returned.
    pub async fn convert_image(
        &self,
        image_data_url: &str,
        direction: Direction,
        chart_type: ChartType,
    ) -> Result<ImageConversionOutput, ConvertError> {
        let start = Instant::now();
        let image = encode::parse_image_data_url(image_data_url)?;
        let backend = self.backend.as_ref().ok_or_else(|| BackendError::NotConfigured {
            provider: "none".to_string(),
            hint: "Image conversion needs a vision-capable model; set OPENAI_API_KEY or configure a provider."
                .to_string(),
        })?;

        let mermaid = self
            .generator(backend)
            .from_images("", &[image], direction, chart_type, self.config.max_nodes)
            .await?;

        Ok(ImageConversionOutput {
            mermaid,
            stats: ImageStats {
                source: "image".to_string(),
                file_size_mb: encode::approx_data_url_size_mb(image_data_url),
                processing_time_ms: start.elapsed().as_millis() as u64,
                processing_strategy: "image-vision".to_string(),
                used_ai: true,
                used_vision: true,
                used_map_reduce: false,
            },
        })
    }

    // ── Strategies ───────────────────────────────────────────────────────

    fn generator(&self, backend: &Arc<dyn CompletionBackend>) -> DiagramGenerator {
        DiagramGenerator::new(Arc::clone(backend), Arc::clone(&self.cache), &self.config)
    }

    async fn run_map_reduce(
        &self,
        backend: &Arc<dyn CompletionBackend>,
        text: &str,
        direction: Direction,
    ) -> Result<Outcome, ConvertError> {
        let processor = MapReduceProcessor::new(self.generator(backend), &self.config);
        let options = MapReduceOptions::from_config(&self.config);

        let err = match processor.process_large_document(text, direction, &options).await {
            Ok(out) => {
                return Ok(Outcome {
                    mermaid: out.mermaid,
                    strategy: Strategy::MapReduce,
                    used_ai: true,
                    used_vision: false,
                    used_map_reduce: true,
                    routing: Some(RoutingStats::MapReduce(out.stats)),
                })
            }
            Err(e) => e,
        };

        if !self.config.enable_fallback {
            return Err(err);
        }
        warn!("Map-reduce failed, falling back to a single model call: {}", err);
        let truncated = truncate_chars(text, self.config.max_text_chars);
        match self
            .generator(backend)
            .from_text(truncated, direction, ChartType::Flowchart, self.config.max_nodes)
            .await
        {
            Ok(mermaid) => Ok(Outcome {
                mermaid,
                strategy: Strategy::AiFallback,
                used_ai: true,
                used_vision: false,
                used_map_reduce: false,
                routing: None,
            }),
            Err(e) => self.rule_fallback(text, direction, e.into()),
        }
    }

    async fn run_routed(
        &self,
        backend: &Arc<dyn CompletionBackend>,
        pdf: &[u8],
        parsed: &ParsedDocument,
        options: ConvertOptions,
    ) -> Result<Outcome, ConvertError> {
        let unit = parsed.document_unit();
        let complexity = self.cache.cache_complexity_analysis(
            &unit,
            &self.config.routing.thresholds,
            || self.router.analyzer().analyze(&unit),
        );
        let decision = self.router.decide(complexity);
        let page_stats = self
            .router
            .processing_stats(&self.router.route_pages(&parsed.page_units()));
        info!("Routing: {} ({})", decision.strategy, decision.reason);

        let generator = self.generator(backend);
        let direction = options.direction;
        let max_nodes = self.config.max_nodes;
        let chart = ChartType::Flowchart;

        let wants_vision = options.vision == VisionMode::On
            && decision.strategy == self.config.routing.complex
            && decision.strategy != self.config.routing.simple;
        let images = if wants_vision {
            self.render_for_vision(pdf, parsed.page_count).await
        } else {
            Vec::new()
        };

        let (mermaid, used_vision) = if images.is_empty() {
            if wants_vision {
                warn!("No page images available, using text only");
            }
            (generator.from_text(&parsed.text, direction, chart, max_nodes).await?, false)
        } else {
            match generator
                .from_images(&parsed.text, &images, direction, chart, max_nodes)
                .await
            {
                Ok(m) => (m, true),
                Err(e) => {
                    warn!("Vision call failed, retrying with text only: {}", e);
                    (generator.from_text(&parsed.text, direction, chart, max_nodes).await?, false)
                }
            }
        };

        Ok(Outcome {
            mermaid,
            strategy: decision.strategy,
            used_ai: true,
            used_vision,
            used_map_reduce: false,
            routing: Some(RoutingStats::Decision {
                strategy: decision.strategy,
                complexity: decision.complexity,
                reason: decision.reason,
                pages: page_stats,
            }),
        })
    }

    /// Rasterise the first `max_vision_pages` pages. Failures yield no images.
    async fn render_for_vision(&self, pdf: &[u8], page_count: usize) -> Vec<ImageData> {
        let pages: Vec<usize> = (1..=page_count.min(self.config.max_vision_pages)).collect();
        let render = &self.config.render;
        let rendered: Result<Vec<RenderedPage>, ConvertError> = self
            .cache
            .cache_image_rendering(pdf, &pages, render, || {
                self.extractor.render_pages(pdf, &pages, render)
            })
            .await;
        match rendered {
            Ok(pages) => {
                debug!("Rendered {} page(s) for vision", pages.len());
                pages.into_iter().map(|p| p.image).collect()
            }
            Err(e) => {
                warn!("Page rendering failed: {}", e);
                Vec::new()
            }
        }
    }

    fn rule_fallback(
        &self,
        text: &str,
        direction: Direction,
        err: ConvertError,
    ) -> Result<Outcome, ConvertError> {
        if !self.config.enable_fallback {
            return Err(err);
        }
        warn!("Falling back to rule-based diagram: {}", err);
        Ok(Outcome::rules(
            rules::text_to_mermaid(text, direction, self.config.max_nodes),
            Strategy::RuleFallback,
        ))
    }

    fn cache_summary(&self) -> CacheSummary {
        let stats = self.cache.stats();
        CacheSummary {
            hit_rate: stats.hit_rate,
            enabled: stats.enabled,
        }
    }
}

/// Bound `fut` by a caller-level timeout.
pub async fn with_timeout<T, F>(secs: u64, fut: F) -> Result<T, ConvertError>
where
    F: Future<Output = Result<T, ConvertError>>,
{
    match tokio::time::timeout(Duration::from_secs(secs), fut).await {
        Ok(result) => result,
        Err(_) => Err(ConvertError::Timeout { secs }),
    }
}

/// Write `contents` to `path` via a temporary file and a rename, so readers
/// never see a partial file.
pub async fn write_output(path: &Path, contents: &str) -> Result<(), ConvertError> {
    let write_err = |source| ConvertError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = std::path::PathBuf::from(tmp_name);

    tokio::fs::write(&tmp_path, contents).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    Ok(())
}

//! # pdf2mermaid
//!
//! Turn PDF documents into Mermaid diagrams.
//!
//! A document is scored for complexity and routed to the cheapest path that
//! can handle it: a text-only model call for simple documents, page rasters
//! plus text for complex ones, chunk-and-summarise for long ones, and a
//! deterministic heuristic when no model is configured or every model path
//! failed. Results of expensive stages are cached in memory.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Validate  size cap, %PDF magic, page cap
//!  ├─ 2. Extract   page text + image counts via pdfium (spawn_blocking)
//!  ├─ 3. Plan      rule-based | map-reduce | routed (fast / multimodal)
//!  ├─ 4. Generate  model call(s), cached and retried
//!  ├─ 5. Clean     strip fences, force the diagram header
//!  └─ 6. Output    diagram + stats (strategy, flags, cache hit rate)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf2mermaid::{ConversionConfig, ConversionOrchestrator, ConvertOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let orchestrator = ConversionOrchestrator::from_config(ConversionConfig::from_env());
//!     let output = orchestrator
//!         .convert_input("document.pdf", ConvertOptions::default())
//!         .await?;
//!     println!("{}", output.mermaid);
//!     eprintln!("strategy: {}", output.stats.processing_strategy);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `cli`    | on      | The `pdf2mermaid` binary (clap + anyhow + indicatif + tracing-subscriber) |
//! | `server` | on      | The axum HTTP boundary in [`server`] |
//!
//! Library-only use:
//! ```toml
//! pdf2mermaid = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cache;
pub mod chunker;
pub mod config;
pub mod convert;
pub mod error;
pub mod map_reduce;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod routing;
#[cfg(feature = "server")]
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cache::{CacheManager, CacheStats};
pub use chunker::{chunk, Chunk, ChunkKind, ChunkOptions};
pub use config::{
    CacheConfig, ChartType, ComplexityThresholds, ConversionConfig, ConversionConfigBuilder,
    ConvertOptions, Direction, ImageFormat, MapReduceConfig, MapReduceMode, RenderOptions,
    RoutingConfig, VisionMode,
};
pub use convert::{with_timeout, write_output, ConversionOrchestrator};
pub use error::{BackendError, ChunkError, ConvertError};
pub use map_reduce::{MapReduceOptions, MapReduceOutput, MapReduceProcessor, MapReduceStats, MapResult};
pub use output::{
    CacheSummary, ConversionOutput, ConversionStats, ImageConversionOutput, ImageStats, RoutingStats,
};
pub use pipeline::extract::{
    DocumentExtractor, DocumentInfo, PageContent, ParsedDocument, PdfiumExtractor, RenderedPage,
};
pub use pipeline::generate::DiagramGenerator;
pub use pipeline::llm::{CompletionBackend, CompletionRequest, LlmBackend};
pub use pipeline::rules::text_to_mermaid;
pub use progress::{MapProgressCallback, NoopProgressCallback, ProgressCallback};
pub use routing::{
    plan_strategy, ComplexityAnalyzer, ComplexityFactor, ComplexityScore, ContentUnit, ImageRef,
    Plan, PlanInputs, ProcessingStats, Router, RoutingDecision, Strategy,
};

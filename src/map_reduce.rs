//! Map-reduce processing for documents too large for one model call.
//!
//! ## Map phase
//!
//! The text is cut into chunks ([`crate::chunker`]) and each chunk is
//! summarised independently. Every chunk gets a node budget of
//! `max_nodes / chunk_count` (floor) so the merged diagram stays within the
//! overall cap however many chunks there are.
//!
//! * **Parallel** (default): chunks are grouped into batches of
//!   `max_chunks_per_batch`. A batch runs concurrently with all-settle
//!   semantics (`join_all`): one failure never cancels its siblings.
//!   Batches run one after another to bound load on the backend.
//! * **Sequential**: one chunk at a time, in order. A failed chunk becomes
//!   an error-carrying [`MapResult`] and processing moves on.
//!
//! ## Reduce phase
//!
//! Valid summaries are labelled `Part N: ...` and handed to the same
//! single-shot path small documents use. If that call fails, a placeholder
//! diagram with one node per valid chunk is returned instead, so once one
//! chunk succeeded the processor always yields a diagram. With no valid
//! chunk at all it fails with [`ConvertError::NoValidChunks`].

use crate::chunker::{self, Chunk, ChunkOptions};
use crate::config::{ChartType, ConversionConfig, Direction, MapReduceConfig};
use crate::error::{ChunkError, ConvertError};
use crate::pipeline::generate::DiagramGenerator;
use crate::pipeline::llm::CompletionRequest;
use crate::pipeline::rules;
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::prompts;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Characters of a summary kept as a placeholder node label.
const FALLBACK_LABEL_CHARS: usize = 50;

/// Outcome of summarising one chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapResult {
    /// 0-based index of the chunk this result belongs to.
    pub chunk_index: usize,
    pub summary: String,
    /// Node budget the chunk was summarised for.
    pub node_budget: usize,
    pub error: Option<ChunkError>,
}

impl MapResult {
    /// True when the chunk produced a usable summary.
    pub fn is_valid(&self) -> bool {
        self.error.is_none() && !self.summary.trim().is_empty()
    }
}

/// Per-call options of [`MapReduceProcessor::process_large_document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapReduceOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub max_nodes: usize,
    pub enable_parallel: bool,
}

impl MapReduceOptions {
    pub fn from_config(config: &ConversionConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
            max_nodes: config.max_nodes,
            enable_parallel: config.map_reduce.enable_parallel,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapReduceStats {
    pub total_chunks: usize,
    pub valid_chunks: usize,
    pub failed_chunks: usize,
    pub node_budget_per_chunk: usize,
    pub parallel: bool,
    /// The synthesis call failed and the placeholder diagram was returned.
    pub used_synthesis_fallback: bool,
    pub map_duration_ms: u64,
    pub reduce_duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct MapReduceOutput {
    pub mermaid: String,
    pub stats: MapReduceStats,
    /// One result per chunk, in chunk order.
    pub results: Vec<MapResult>,
}

/// Cache-key options of a chunk summary call.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SummaryKey {
    kind: &'static str,
    summary_length: usize,
    node_budget: usize,
    max_tokens: usize,
}

/// Chunked summarise-then-synthesise processor.
pub struct MapReduceProcessor {
    generator: DiagramGenerator,
    config: MapReduceConfig,
    temperature: f32,
    summary_max_tokens: usize,
    progress: ProgressCallback,
}

impl MapReduceProcessor {
    pub fn new(generator: DiagramGenerator, config: &ConversionConfig) -> Self {
        Self {
            generator,
            config: config.map_reduce.clone(),
            temperature: config.temperature,
            summary_max_tokens: config.summary_max_tokens,
            progress: config
                .progress_callback
                .clone()
                .unwrap_or_else(|| Arc::new(NoopProgressCallback)),
        }
    }

    /// Summarise `text` chunk by chunk and synthesise one diagram.
    pub async fn process_large_document(
        &self,
        text: &str,
        direction: Direction,
        options: &MapReduceOptions,
    ) -> Result<MapReduceOutput, ConvertError> {
        let chunks = chunker::chunk(
            text,
            &ChunkOptions {
                chunk_size: options.chunk_size,
                chunk_overlap: options.chunk_overlap,
                preserve_structure: true,
            },
        );
        let total = chunks.len();
        let node_budget = if total == 0 { 0 } else { options.max_nodes / total };
        info!(
            "Map-reduce: {} chunks, {} nodes per chunk, {}",
            total,
            node_budget,
            if options.enable_parallel { "parallel" } else { "sequential" }
        );

        // ── Map ──────────────────────────────────────────────────────────
        let map_start = Instant::now();
        self.progress.on_map_start(total);
        let mut results = if options.enable_parallel {
            self.map_parallel(&chunks, node_budget).await
        } else {
            self.map_sequential(&chunks, node_budget).await
        };
        results.sort_by_key(|r| r.chunk_index);
        let map_duration_ms = map_start.elapsed().as_millis() as u64;

        let valid: Vec<&MapResult> = results.iter().filter(|r| r.is_valid()).collect();
        self.progress.on_map_complete(total, valid.len());

        if valid.is_empty() {
            let first_error = results
                .iter()
                .find_map(|r| r.error.as_ref())
                .map(|e| e.to_string())
                .unwrap_or_else(|| "document produced no chunks".to_string());
            return Err(ConvertError::NoValidChunks { total, first_error });
        }

        // ── Reduce ───────────────────────────────────────────────────────
        let reduce_start = Instant::now();
        let combined = prompts::combine_summaries(valid.iter().map(|r| r.summary.as_str()));
        let (mermaid, used_synthesis_fallback) = match self
            .generator
            .from_text(&combined, direction, ChartType::Flowchart, options.max_nodes)
            .await
        {
            Ok(code) => (code, false),
            Err(e) => {
                warn!("Synthesis failed, using per-chunk placeholder diagram: {}", e);
                (synthesis_fallback(&valid, direction), true)
            }
        };

        let stats = MapReduceStats {
            total_chunks: total,
            valid_chunks: valid.len(),
            failed_chunks: total - valid.len(),
            node_budget_per_chunk: node_budget,
            parallel: options.enable_parallel,
            used_synthesis_fallback,
            map_duration_ms,
            reduce_duration_ms: reduce_start.elapsed().as_millis() as u64,
        };
        info!(
            "Map-reduce complete: {}/{} chunks valid",
            stats.valid_chunks, stats.total_chunks
        );

        Ok(MapReduceOutput {
            mermaid,
            stats,
            results,
        })
    }

    async fn map_parallel(&self, chunks: &[Chunk], node_budget: usize) -> Vec<MapResult> {
        let total = chunks.len();
        let batch_size = self.config.max_chunks_per_batch.max(1);
        let mut results = Vec::with_capacity(total);

        for (batch_no, batch) in chunks.chunks(batch_size).enumerate() {
            let offset = batch_no * batch_size;
            debug!("Map batch {}: chunks {}..{}", batch_no + 1, offset, offset + batch.len());
            let outcomes = join_all(
                batch
                    .iter()
                    .enumerate()
                    .map(|(i, c)| self.map_chunk(offset + i, total, c, node_budget)),
            )
            .await;
            results.extend(outcomes);
        }
        results
    }

    async fn map_sequential(&self, chunks: &[Chunk], node_budget: usize) -> Vec<MapResult> {
        let total = chunks.len();
        let mut results = Vec::with_capacity(total);
        for (index, c) in chunks.iter().enumerate() {
            results.push(self.map_chunk(index, total, c, node_budget).await);
        }
        results
    }

    async fn map_chunk(&self, index: usize, total: usize, chunk: &Chunk, node_budget: usize) -> MapResult {
        self.progress.on_chunk_start(index, total);

        let request = CompletionRequest::text(
            prompts::chunk_summary_system_prompt(self.config.summary_length, node_budget.max(1)),
            prompts::chunk_summary_user_prompt(index, &chunk.content),
        )
        .with_temperature(self.temperature)
        .with_max_tokens(self.summary_max_tokens);
        let key = SummaryKey {
            kind: "chunk-summary",
            summary_length: self.config.summary_length,
            node_budget,
            max_tokens: self.summary_max_tokens,
        };

        let (summary, error) = match self.generator.complete_cached(request, &key).await {
            Ok(s) if !s.trim().is_empty() => (s.trim().to_string(), None),
            Ok(_) => (String::new(), Some(ChunkError::EmptySummary { chunk: index })),
            Err(e) => (
                String::new(),
                Some(ChunkError::SummaryFailed {
                    chunk: index,
                    detail: e.to_string(),
                }),
            ),
        };

        match &error {
            None => self.progress.on_chunk_complete(index, total, summary.chars().count()),
            Some(e) => {
                warn!("{}", e);
                self.progress.on_chunk_error(index, total, &e.to_string());
            }
        }

        MapResult {
            chunk_index: index,
            summary,
            node_budget,
            error,
        }
    }
}

/// One node per valid chunk, labelled with the start of its summary.
fn synthesis_fallback(valid: &[&MapResult], direction: Direction) -> String {
    let labels: Vec<String> = valid
        .iter()
        .map(|r| {
            let head: String = r
                .summary
                .chars()
                .take(FALLBACK_LABEL_CHARS)
                .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
                .collect();
            format!("{}...", head.trim_end())
        })
        .collect();
    rules::chain_diagram(direction, "C", &labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheManager;
    use crate::error::BackendError;
    use crate::pipeline::llm::CompletionBackend;
    use crate::progress::MapProgressCallback;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Summaries echo the fragment; fragments containing "FAIL" error out.
    /// Synthesis answers `synthesis` or fails when it is None.
    struct Scripted {
        synthesis: Option<&'static str>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(synthesis: Option<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                synthesis,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl CompletionBackend for Scripted {
        fn model_id(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: &CompletionRequest) -> Result<String, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if let Some(fragment) = request.user.strip_prefix("Document fragment ") {
                if fragment.contains("FAIL") {
                    return Err(BackendError::RequestFailed {
                        attempts: 1,
                        detail: "HTTP 503".into(),
                    });
                }
                let body = fragment.split_once("\n\n").map(|(_, b)| b).unwrap_or("");
                return Ok(format!("summary of {}", body.trim()));
            }
            match self.synthesis {
                Some(code) => Ok(code.to_string()),
                None => Err(BackendError::EmptyResponse),
            }
        }
    }

    #[derive(Default)]
    struct Counting {
        started: AtomicUsize,
        completed: AtomicUsize,
        failed: AtomicUsize,
        valid_at_end: AtomicUsize,
    }

    impl MapProgressCallback for Counting {
        fn on_chunk_start(&self, _: usize, _: usize) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }
        fn on_chunk_complete(&self, _: usize, _: usize, _: usize) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
        fn on_chunk_error(&self, _: usize, _: usize, _: &str) {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
        fn on_map_complete(&self, _: usize, valid: usize) {
            self.valid_at_end.store(valid, Ordering::SeqCst);
        }
    }

    fn processor(backend: Arc<Scripted>, batch: usize, progress: Option<Arc<Counting>>) -> MapReduceProcessor {
        let mut builder = ConversionConfig::builder().map_reduce(MapReduceConfig {
            max_chunks_per_batch: batch,
            ..Default::default()
        });
        if let Some(p) = progress {
            builder = builder.progress_callback(p);
        }
        let config = builder.build().unwrap();
        let generator = DiagramGenerator::new(backend, Arc::new(CacheManager::disabled()), &config);
        MapReduceProcessor::new(generator, &config)
    }

    /// One paragraph per chunk with these options.
    fn opts(parallel: bool) -> MapReduceOptions {
        MapReduceOptions {
            chunk_size: 20,
            chunk_overlap: 0,
            max_nodes: 60,
            enable_parallel: parallel,
        }
    }

    fn doc(paragraphs: &[&str]) -> String {
        paragraphs.join("\n\n")
    }

    #[tokio::test(start_paused = true)]
    async fn all_chunks_succeed() {
        let backend = Scripted::new(Some("graph TB\n  A --> B"));
        let out = processor(backend.clone(), 5, None)
            .process_large_document(
                &doc(&["alpha paragraph", "beta paragraph", "gamma paragraph"]),
                Direction::TB,
                &opts(true),
            )
            .await
            .unwrap();
        assert_eq!(out.mermaid, "graph TB\n  A --> B\n");
        assert_eq!(out.stats.total_chunks, 3);
        assert_eq!(out.stats.valid_chunks, 3);
        assert_eq!(out.stats.node_budget_per_chunk, 20);
        assert!(!out.stats.used_synthesis_fallback);
        assert_eq!(out.results[1].summary, "summary of beta paragraph");
        // 3 summaries + 1 synthesis.
        assert_eq!(backend.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn every_chunk_failing_is_fatal() {
        let backend = Scripted::new(Some("graph TB\n  A"));
        for parallel in [true, false] {
            let err = processor(backend.clone(), 2, None)
                .process_large_document(&doc(&["FAIL one here", "FAIL two here"]), Direction::TB, &opts(parallel))
                .await
                .unwrap_err();
            match err {
                ConvertError::NoValidChunks { total, first_error } => {
                    assert_eq!(total, 2);
                    assert!(first_error.contains("HTTP 503"), "{first_error}");
                }
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_synthesis_yields_one_node_per_valid_chunk() {
        let backend = Scripted::new(None);
        let out = processor(backend, 5, None)
            .process_large_document(
                &doc(&["alpha paragraph", "FAIL paragraph", "gamma paragraph"]),
                Direction::LR,
                &opts(true),
            )
            .await
            .unwrap();
        assert!(out.stats.used_synthesis_fallback);
        assert_eq!(out.stats.valid_chunks, 2);
        assert_eq!(out.stats.failed_chunks, 1);
        assert_eq!(
            out.mermaid,
            "graph LR\n  C1[\"summary of alpha paragraph...\"]\n  C2[\"summary of gamma paragraph...\"]\n  C1 --> C2\n"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_mode_continues_after_a_failure() {
        let progress = Arc::new(Counting::default());
        let backend = Scripted::new(Some("graph TB\n  X"));
        let out = processor(backend.clone(), 5, Some(progress.clone()))
            .process_large_document(
                &doc(&["FAIL paragraph1", "beta paragraph", "gamma paragraph"]),
                Direction::TB,
                &opts(false),
            )
            .await
            .unwrap();
        let indices: Vec<usize> = out.results.iter().map(|r| r.chunk_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(matches!(out.results[0].error, Some(ChunkError::SummaryFailed { chunk: 0, .. })));
        assert!(out.results[2].is_valid());
        assert_eq!(backend.peak.load(Ordering::SeqCst), 1);
        assert_eq!(progress.started.load(Ordering::SeqCst), 3);
        assert_eq!(progress.completed.load(Ordering::SeqCst), 2);
        assert_eq!(progress.failed.load(Ordering::SeqCst), 1);
        assert_eq!(progress.valid_at_end.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn batches_bound_concurrency_and_keep_order() {
        let backend = Scripted::new(Some("graph TB\n  X"));
        let paragraphs: Vec<String> = (0..7).map(|i| format!("paragraph no {i:02}")).collect();
        let refs: Vec<&str> = paragraphs.iter().map(String::as_str).collect();
        let out = processor(backend.clone(), 3, None)
            .process_large_document(&doc(&refs), Direction::TB, &opts(true))
            .await
            .unwrap();
        assert_eq!(out.stats.total_chunks, 7);
        assert_eq!(backend.peak.load(Ordering::SeqCst), 3);
        for (i, r) in out.results.iter().enumerate() {
            assert_eq!(r.chunk_index, i);
            assert_eq!(r.summary, format!("summary of paragraph no {i:02}"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn node_budget_is_floored() {
        let backend = Scripted::new(Some("graph TB\n  X"));
        let mut o = opts(true);
        o.max_nodes = 10;
        let out = processor(backend, 5, None)
            .process_large_document(
                &doc(&["alpha paragraph", "beta paragraph", "gamma paragraph"]),
                Direction::TB,
                &o,
            )
            .await
            .unwrap();
        assert_eq!(out.stats.node_budget_per_chunk, 3);
        assert!(out.results.iter().all(|r| r.node_budget == 3));
    }

    #[test]
    fn fallback_labels_flatten_newlines() {
        let r = MapResult {
            chunk_index: 0,
            summary: "line one\nline two".into(),
            node_budget: 5,
            error: None,
        };
        let out = synthesis_fallback(&[&r], Direction::TB);
        assert_eq!(out, "graph TB\n  C1[\"line one line two...\"]\n");
    }
}

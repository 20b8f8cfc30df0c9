//! Orchestrator scenarios against a fake PDF extractor and a scripted model.
//!
//! No pdfium library and no network are needed: the extractor hands back
//! fixed pages and the backend answers from a script.

use async_trait::async_trait;
use edgequake_llm::ImageData;
use pdf2mermaid::pipeline::encode;
use pdf2mermaid::{
    BackendError, CacheManager, ChartType, CompletionBackend, CompletionRequest, ConversionConfig,
    ConversionOrchestrator, ConvertError, ConvertOptions, Direction, DocumentExtractor,
    DocumentInfo, MapReduceMode, PageContent, ParsedDocument, RenderOptions, RenderedPage,
    RoutingConfig, RoutingStats, Strategy, VisionMode,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// ── Fakes ────────────────────────────────────────────────────────────────

struct FakeExtractor {
    pages: Vec<PageContent>,
    render_fails: bool,
    render_calls: AtomicUsize,
}

impl FakeExtractor {
    fn new(pages: Vec<PageContent>) -> Self {
        Self {
            pages,
            render_fails: false,
            render_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl DocumentExtractor for FakeExtractor {
    async fn parse(&self, _pdf: &[u8]) -> Result<ParsedDocument, ConvertError> {
        Ok(ParsedDocument::from_pages(
            self.pages.clone(),
            DocumentInfo::default(),
        ))
    }

    async fn render_pages(
        &self,
        _pdf: &[u8],
        pages: &[usize],
        _options: &RenderOptions,
    ) -> Result<Vec<RenderedPage>, ConvertError> {
        self.render_calls.fetch_add(1, Ordering::SeqCst);
        if self.render_fails {
            return Err(ConvertError::Internal("renderer unavailable".to_string()));
        }
        Ok(pages
            .iter()
            .map(|&page_num| RenderedPage {
                page_num,
                width: 10,
                height: 10,
                image: ImageData::new("aGVsbG8=".to_string(), "image/png".to_string()),
            })
            .collect())
    }
}

/// Vision calls, chunk summaries and text calls can each be made to fail.
#[derive(Default)]
struct ScriptedBackend {
    fail_text: bool,
    fail_vision: bool,
    fail_summaries: bool,
    text_calls: AtomicUsize,
    vision_calls: AtomicUsize,
    summary_calls: AtomicUsize,
}

impl ScriptedBackend {
    fn total_calls(&self) -> usize {
        self.text_calls.load(Ordering::SeqCst)
            + self.vision_calls.load(Ordering::SeqCst)
            + self.summary_calls.load(Ordering::SeqCst)
    }
}

fn scripted_failure() -> BackendError {
    BackendError::RequestFailed {
        attempts: 1,
        detail: "scripted failure".to_string(),
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    fn model_id(&self) -> &str {
        "scripted-model"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, BackendError> {
        if !request.images.is_empty() {
            self.vision_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_vision {
                return Err(scripted_failure());
            }
            return Ok("```mermaid\ngraph TB\n  V1[\"From pages\"] --> V2[\"Figures\"]\n```".to_string());
        }
        if request.user.starts_with("Document fragment ") {
            self.summary_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_summaries {
                return Err(scripted_failure());
            }
            let label = request.user.lines().next().unwrap_or_default();
            return Ok(format!("Summary of {label}"));
        }
        self.text_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_text {
            return Err(scripted_failure());
        }
        Ok("graph TB\n  T1[\"From text\"] --> T2[\"Done\"]".to_string())
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn pdf_bytes() -> Vec<u8> {
    b"%PDF-1.7\n% fake body\n".to_vec()
}

fn page(text: &str, image_count: usize) -> PageContent {
    PageContent {
        text: text.to_string(),
        image_count,
        width: 612.0,
        height: 792.0,
    }
}

fn simple_pages() -> Vec<PageContent> {
    vec![
        page("Widget assembly overview", 0),
        page("The frame is cut and welded before painting", 0),
        page("Finished widgets are packed and shipped", 0),
    ]
}

/// A page whose three embedded images make the document complex.
fn complex_pages() -> Vec<PageContent> {
    vec![page("Architecture figure with three panels", 3)]
}

/// About 16 000 characters over five pages.
fn long_pages() -> Vec<PageContent> {
    (0..5)
        .map(|p| {
            let text = (0..40)
                .map(|i| {
                    format!(
                        "Paragraph {} of page {} describes one assembly step in enough words to matter.",
                        i, p
                    )
                })
                .collect::<Vec<_>>()
                .join("\n\n");
            page(&text, 0)
        })
        .collect()
}

fn orchestrator(
    config: ConversionConfig,
    extractor: FakeExtractor,
    backend: Option<Arc<ScriptedBackend>>,
) -> ConversionOrchestrator {
    let cache = Arc::new(CacheManager::new(config.cache.clone()));
    ConversionOrchestrator::new(
        config,
        cache,
        Arc::new(extractor),
        backend.map(|b| b as Arc<dyn CompletionBackend>),
    )
}

fn config() -> ConversionConfig {
    ConversionConfig::builder().build().unwrap()
}

fn png_data_url() -> String {
    let img = image::DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
        4,
        4,
        image::Rgba([0, 0, 255, 255]),
    ));
    let mut buf = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    encode::image_bytes_to_data_url(&buf).unwrap()
}

// ── Planning ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn without_backend_every_document_is_rule_based() {
    let o = orchestrator(config(), FakeExtractor::new(long_pages()), None);
    let out = o
        .convert(
            &pdf_bytes(),
            ConvertOptions {
                direction: Direction::LR,
                map_reduce: MapReduceMode::On,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(out.mermaid.starts_with("graph LR\n"), "{}", out.mermaid);
    assert_eq!(out.stats.processing_strategy, Strategy::RuleBased);
    assert!(!out.stats.used_ai);
    assert!(!out.stats.used_vision);
    assert!(!out.stats.used_map_reduce);
    assert!(out.stats.routing.is_none());
}

#[tokio::test]
async fn simple_document_takes_the_fast_path() {
    let backend = Arc::new(ScriptedBackend::default());
    let o = orchestrator(
        config(),
        FakeExtractor::new(simple_pages()),
        Some(Arc::clone(&backend)),
    );
    let out = o.convert(&pdf_bytes(), ConvertOptions::default()).await.unwrap();

    assert_eq!(out.mermaid, "graph TB\n  T1[\"From text\"] --> T2[\"Done\"]\n");
    assert_eq!(out.stats.processing_strategy, Strategy::Fast);
    assert!(out.stats.used_ai);
    assert!(!out.stats.used_vision);
    assert!(!out.stats.used_map_reduce);
    assert_eq!(out.stats.pages, 3);
    assert_eq!(backend.vision_calls.load(Ordering::SeqCst), 0);

    match out.stats.routing {
        Some(RoutingStats::Decision {
            strategy, pages, ..
        }) => {
            assert_eq!(strategy, Strategy::Fast);
            assert_eq!(pages.total_pages, 3);
            assert_eq!(pages.fast_pages, 3);
        }
        other => panic!("expected a routing decision, got {other:?}"),
    }
}

#[tokio::test]
async fn long_document_is_map_reduced() {
    let backend = Arc::new(ScriptedBackend::default());
    let o = orchestrator(
        config(),
        FakeExtractor::new(long_pages()),
        Some(Arc::clone(&backend)),
    );
    let out = o.convert(&pdf_bytes(), ConvertOptions::default()).await.unwrap();

    assert!(out.stats.characters > 10_000);
    assert_eq!(out.stats.processing_strategy, Strategy::MapReduce);
    assert!(out.stats.used_ai);
    assert!(out.stats.used_map_reduce);
    assert!(!out.stats.used_vision);

    let Some(RoutingStats::MapReduce(stats)) = out.stats.routing else {
        panic!("expected map-reduce stats");
    };
    assert!(stats.total_chunks > 1);
    assert_eq!(stats.valid_chunks, stats.total_chunks);
    assert_eq!(stats.node_budget_per_chunk, 60 / stats.total_chunks);
    assert!(!stats.used_synthesis_fallback);
    assert_eq!(backend.summary_calls.load(Ordering::SeqCst), stats.total_chunks);
    assert_eq!(backend.text_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn map_reduce_off_routes_even_long_documents() {
    let backend = Arc::new(ScriptedBackend::default());
    let o = orchestrator(
        config(),
        FakeExtractor::new(long_pages()),
        Some(Arc::clone(&backend)),
    );
    let out = o
        .convert(
            &pdf_bytes(),
            ConvertOptions {
                map_reduce: MapReduceMode::Off,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(!out.stats.used_map_reduce);
    assert_eq!(backend.summary_calls.load(Ordering::SeqCst), 0);
}

// ── Multimodal ───────────────────────────────────────────────────────────

#[tokio::test]
async fn complex_document_uses_page_images() {
    let backend = Arc::new(ScriptedBackend::default());
    let o = orchestrator(
        config(),
        FakeExtractor::new(complex_pages()),
        Some(Arc::clone(&backend)),
    );
    let out = o.convert(&pdf_bytes(), ConvertOptions::default()).await.unwrap();

    assert_eq!(out.stats.processing_strategy, Strategy::Multimodal);
    assert!(out.stats.used_vision);
    assert!(out.mermaid.contains("V1[\"From pages\"]"));
    assert!(!out.mermaid.contains("```"));
    assert_eq!(backend.vision_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn vision_off_keeps_the_multimodal_label_but_sends_text() {
    let backend = Arc::new(ScriptedBackend::default());
    let extractor = FakeExtractor::new(complex_pages());
    let o = orchestrator(config(), extractor, Some(Arc::clone(&backend)));
    let out = o
        .convert(
            &pdf_bytes(),
            ConvertOptions {
                vision: VisionMode::Off,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(out.stats.processing_strategy, Strategy::Multimodal);
    assert!(!out.stats.used_vision);
    assert_eq!(backend.vision_calls.load(Ordering::SeqCst), 0);
    assert_eq!(backend.text_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn vision_follows_the_configured_complex_strategy() {
    let swapped = || {
        ConversionConfig::builder()
            .routing(RoutingConfig {
                simple: Strategy::Multimodal,
                complex: Strategy::Fast,
                ..Default::default()
            })
            .build()
            .unwrap()
    };

    let backend = Arc::new(ScriptedBackend::default());
    let o = orchestrator(
        swapped(),
        FakeExtractor::new(complex_pages()),
        Some(Arc::clone(&backend)),
    );
    let out = o.convert(&pdf_bytes(), ConvertOptions::default()).await.unwrap();
    assert_eq!(out.stats.processing_strategy, Strategy::Fast);
    assert!(out.stats.used_vision);
    assert_eq!(backend.vision_calls.load(Ordering::SeqCst), 1);

    let backend = Arc::new(ScriptedBackend::default());
    let o = orchestrator(
        swapped(),
        FakeExtractor::new(simple_pages()),
        Some(Arc::clone(&backend)),
    );
    let out = o.convert(&pdf_bytes(), ConvertOptions::default()).await.unwrap();
    assert_eq!(out.stats.processing_strategy, Strategy::Multimodal);
    assert!(!out.stats.used_vision);
    assert_eq!(backend.vision_calls.load(Ordering::SeqCst), 0);
    assert_eq!(backend.text_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_vision_call_retries_with_text() {
    let backend = Arc::new(ScriptedBackend {
        fail_vision: true,
        ..Default::default()
    });
    let o = orchestrator(
        config(),
        FakeExtractor::new(complex_pages()),
        Some(Arc::clone(&backend)),
    );
    let out = o.convert(&pdf_bytes(), ConvertOptions::default()).await.unwrap();

    assert_eq!(out.stats.processing_strategy, Strategy::Multimodal);
    assert!(!out.stats.used_vision);
    assert!(out.mermaid.contains("From text"));
    assert_eq!(backend.vision_calls.load(Ordering::SeqCst), 1);
    assert_eq!(backend.text_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn render_failure_falls_back_to_text() {
    let backend = Arc::new(ScriptedBackend::default());
    let mut extractor = FakeExtractor::new(complex_pages());
    extractor.render_fails = true;
    let o = orchestrator(config(), extractor, Some(Arc::clone(&backend)));
    let out = o.convert(&pdf_bytes(), ConvertOptions::default()).await.unwrap();

    assert!(!out.stats.used_vision);
    assert_eq!(backend.vision_calls.load(Ordering::SeqCst), 0);
    assert!(out.mermaid.contains("From text"));
}

// ── Fallback chain ───────────────────────────────────────────────────────

#[tokio::test]
async fn routed_failure_degrades_to_rules() {
    let backend = Arc::new(ScriptedBackend {
        fail_text: true,
        ..Default::default()
    });
    let o = orchestrator(
        config(),
        FakeExtractor::new(simple_pages()),
        Some(Arc::clone(&backend)),
    );
    let out = o.convert(&pdf_bytes(), ConvertOptions::default()).await.unwrap();

    assert_eq!(out.stats.processing_strategy, Strategy::RuleFallback);
    assert!(!out.stats.used_ai);
    assert!(out.mermaid.starts_with("graph TB\n"));
    assert!(out.mermaid.contains("Widget assembly overview"));
}

#[tokio::test]
async fn disabled_fallback_surfaces_the_backend_error() {
    let backend = Arc::new(ScriptedBackend {
        fail_text: true,
        ..Default::default()
    });
    let cfg = ConversionConfig::builder()
        .enable_fallback(false)
        .build()
        .unwrap();
    let o = orchestrator(cfg, FakeExtractor::new(simple_pages()), Some(backend));
    let err = o
        .convert(&pdf_bytes(), ConvertOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, ConvertError::Backend(_)), "{err:?}");
    assert!(!err.is_validation());
}

#[tokio::test]
async fn failed_map_phase_uses_a_single_model_call() {
    let backend = Arc::new(ScriptedBackend {
        fail_summaries: true,
        ..Default::default()
    });
    let o = orchestrator(
        config(),
        FakeExtractor::new(long_pages()),
        Some(Arc::clone(&backend)),
    );
    let out = o.convert(&pdf_bytes(), ConvertOptions::default()).await.unwrap();

    assert_eq!(out.stats.processing_strategy, Strategy::AiFallback);
    assert!(out.stats.used_ai);
    assert!(!out.stats.used_map_reduce);
    assert!(out.mermaid.contains("From text"));
}

#[tokio::test]
async fn failed_map_phase_and_text_call_end_in_rules() {
    let backend = Arc::new(ScriptedBackend {
        fail_summaries: true,
        fail_text: true,
        ..Default::default()
    });
    let o = orchestrator(config(), FakeExtractor::new(long_pages()), Some(backend));
    let out = o.convert(&pdf_bytes(), ConvertOptions::default()).await.unwrap();

    assert_eq!(out.stats.processing_strategy, Strategy::RuleFallback);
    assert!(!out.stats.used_ai);
}

#[tokio::test]
async fn failed_map_phase_without_fallback_is_an_error() {
    let backend = Arc::new(ScriptedBackend {
        fail_summaries: true,
        ..Default::default()
    });
    let cfg = ConversionConfig::builder()
        .enable_fallback(false)
        .build()
        .unwrap();
    let o = orchestrator(cfg, FakeExtractor::new(long_pages()), Some(backend));
    let err = o
        .convert(&pdf_bytes(), ConvertOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ConvertError::NoValidChunks { .. }), "{err:?}");
}

#[tokio::test]
async fn failed_synthesis_keeps_map_reduce_with_chunk_chain() {
    let backend = Arc::new(ScriptedBackend {
        fail_text: true,
        ..Default::default()
    });
    let o = orchestrator(config(), FakeExtractor::new(long_pages()), Some(backend));
    let out = o.convert(&pdf_bytes(), ConvertOptions::default()).await.unwrap();

    assert_eq!(out.stats.processing_strategy, Strategy::MapReduce);
    let Some(RoutingStats::MapReduce(stats)) = out.stats.routing else {
        panic!("expected map-reduce stats");
    };
    assert!(stats.used_synthesis_fallback);
    assert!(out.mermaid.contains("C1[\"Summary of Document fragment 1:..."));
    assert!(out.mermaid.contains("C1 --> C2"));
}

// ── Validation ───────────────────────────────────────────────────────────

#[tokio::test]
async fn validation_errors_come_before_any_model_call() {
    let backend = Arc::new(ScriptedBackend::default());
    let cfg = ConversionConfig::builder()
        .max_pages(2)
        .max_file_size_mb(1)
        .build()
        .unwrap();
    let o = orchestrator(
        cfg,
        FakeExtractor::new(simple_pages()),
        Some(Arc::clone(&backend)),
    );

    let err = o.convert(&[], ConvertOptions::default()).await.unwrap_err();
    assert!(matches!(err, ConvertError::MissingFile));

    let mut big = pdf_bytes();
    big.resize(2 * 1024 * 1024, b' ');
    let err = o.convert(&big, ConvertOptions::default()).await.unwrap_err();
    assert!(matches!(err, ConvertError::FileTooLarge { max_mb: 1, .. }), "{err:?}");

    let err = o
        .convert(b"hello world", ConvertOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ConvertError::NotAPdf { .. }));

    let err = o
        .convert(&pdf_bytes(), ConvertOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ConvertError::TooManyPages { pages: 3, max: 2 }), "{err:?}");

    for e in [
        ConvertError::MissingFile,
        ConvertError::TooManyPages { pages: 3, max: 2 },
    ] {
        assert!(e.is_validation());
    }
    assert_eq!(backend.total_calls(), 0);
}

// ── Stats and cache ──────────────────────────────────────────────────────

#[tokio::test]
async fn stats_count_words_and_characters() {
    let o = orchestrator(config(), FakeExtractor::new(simple_pages()), None);
    let out = o.convert(&pdf_bytes(), ConvertOptions::default()).await.unwrap();

    let text = "Widget assembly overview\n\nThe frame is cut and welded before painting\n\nFinished widgets are packed and shipped";
    assert_eq!(out.stats.characters, text.chars().count());
    assert_eq!(out.stats.words, 17);
    assert_eq!(out.stats.file_size_mb, 0.0);
    assert!(!out.stats.cache.enabled);
    assert_eq!(out.stats.cache.hit_rate, 0.0);

    let json = serde_json::to_value(&out).unwrap();
    assert_eq!(json["stats"]["processingStrategy"], "rule-based");
    assert_eq!(json["stats"]["usedAI"], false);
    assert!(json["stats"].get("fileSizeMB").is_some());
}

#[tokio::test]
async fn repeated_conversion_is_served_from_cache() {
    let backend = Arc::new(ScriptedBackend::default());
    let cfg = ConversionConfig::builder()
        .cache_enabled(true)
        .build()
        .unwrap();
    let o = orchestrator(
        cfg,
        FakeExtractor::new(simple_pages()),
        Some(Arc::clone(&backend)),
    );

    let first = o.convert(&pdf_bytes(), ConvertOptions::default()).await.unwrap();
    let second = o.convert(&pdf_bytes(), ConvertOptions::default()).await.unwrap();

    assert_eq!(first.mermaid, second.mermaid);
    assert_eq!(backend.text_calls.load(Ordering::SeqCst), 1);
    assert!(second.stats.cache.enabled);
    assert!(second.stats.cache.hit_rate > first.stats.cache.hit_rate);
    assert_eq!(second.stats.cache.hit_rate, 0.5);
}

#[tokio::test]
async fn direction_changes_bypass_the_cached_diagram() {
    let backend = Arc::new(ScriptedBackend::default());
    let cfg = ConversionConfig::builder()
        .cache_enabled(true)
        .build()
        .unwrap();
    let o = orchestrator(
        cfg,
        FakeExtractor::new(simple_pages()),
        Some(Arc::clone(&backend)),
    );

    o.convert(&pdf_bytes(), ConvertOptions::default()).await.unwrap();
    o.convert(
        &pdf_bytes(),
        ConvertOptions {
            direction: Direction::LR,
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(backend.text_calls.load(Ordering::SeqCst), 2);
}

// ── Image entry point ────────────────────────────────────────────────────

#[tokio::test]
async fn image_conversion_uses_vision() {
    let backend = Arc::new(ScriptedBackend::default());
    let o = orchestrator(
        config(),
        FakeExtractor::new(Vec::new()),
        Some(Arc::clone(&backend)),
    );
    let out = o
        .convert_image(&png_data_url(), Direction::TB, ChartType::Flowchart)
        .await
        .unwrap();

    assert!(out.mermaid.starts_with("graph TB\n"));
    assert!(out.mermaid.contains("From pages"));
    assert_eq!(out.stats.source, "image");
    assert_eq!(out.stats.processing_strategy, "image-vision");
    assert!(out.stats.used_ai);
    assert!(out.stats.used_vision);
    assert!(!out.stats.used_map_reduce);
    assert_eq!(backend.vision_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn image_conversion_needs_a_backend_and_a_data_url() {
    let o = orchestrator(config(), FakeExtractor::new(Vec::new()), None);
    let err = o
        .convert_image(&png_data_url(), Direction::TB, ChartType::Mindmap)
        .await
        .unwrap_err();
    assert!(
        matches!(err, ConvertError::Backend(BackendError::NotConfigured { .. })),
        "{err:?}"
    );

    let backend = Arc::new(ScriptedBackend::default());
    let o = orchestrator(config(), FakeExtractor::new(Vec::new()), Some(backend));
    let err = o
        .convert_image("not a data url", Direction::TB, ChartType::Flowchart)
        .await
        .unwrap_err();
    assert!(matches!(err, ConvertError::InvalidImage { .. }), "{err:?}");
    assert!(err.is_validation());
}

#[tokio::test]
async fn failed_image_call_is_not_masked() {
    let backend = Arc::new(ScriptedBackend {
        fail_vision: true,
        ..Default::default()
    });
    let o = orchestrator(config(), FakeExtractor::new(Vec::new()), Some(backend));
    let err = o
        .convert_image(&png_data_url(), Direction::LR, ChartType::Flowchart)
        .await
        .unwrap_err();
    assert!(matches!(err, ConvertError::Backend(_)));
}

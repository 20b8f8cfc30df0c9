//! Complexity scoring and strategy routing.
//!
//! Three layers, each a pure function of its inputs:
//!
//! 1. [`ComplexityAnalyzer::analyze`] scores a [`ContentUnit`].
//! 2. [`Router::decide`] maps a score to the simple or complex strategy.
//! 3. [`plan_strategy`] runs *before* the router and decides whether
//!    document-level signals (no backend credential, oversized text) bypass
//!    per-unit routing altogether.
//!
//! Keeping the upstream decision as a plain function of a [`PlanInputs`]
//! value means no process-wide flag influences routing; tests can cover every
//! branch without touching the environment.

use crate::config::{ComplexityThresholds, MapReduceMode, RoutingConfig};
use once_cell::sync::Lazy;
use regex::{Regex, RegexSet};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// ── Data model ───────────────────────────────────────────────────────────

/// A reference to an image belonging to a content unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ImageRef {
    /// An image object embedded in a PDF page (not yet rasterised).
    Embedded { page: usize, index: usize },
    /// Raw encoded image bytes.
    Bytes(Vec<u8>),
    /// A URI, typically a `data:` URI.
    Uri(String),
}

/// A page or a whole document: text plus its images. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentUnit {
    pub text: String,
    pub images: Vec<ImageRef>,
    pub page_count: usize,
    /// Area estimate used for text density. Values ≤ 0 are treated as 1.
    pub page_area: f64,
}

impl ContentUnit {
    pub fn new(text: impl Into<String>, page_count: usize, page_area: f64) -> Self {
        Self {
            text: text.into(),
            images: Vec::new(),
            page_count,
            page_area,
        }
    }

    pub fn with_images(mut self, images: Vec<ImageRef>) -> Self {
        self.images = images;
        self
    }
}

/// Named complexity factor. Diagnostics only; the score is computed from
/// the rule weights, not from this set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityFactor {
    HighTextDensity,
    MultipleImages,
    MultipleTables,
    MathematicalFormulas,
    ComplexLayout,
}

impl ComplexityFactor {
    /// Contribution of this factor to the score.
    pub fn weight(&self) -> u32 {
        match self {
            ComplexityFactor::HighTextDensity => 1,
            ComplexityFactor::MultipleImages => 2,
            ComplexityFactor::MultipleTables => 2,
            ComplexityFactor::MathematicalFormulas => 1,
            ComplexityFactor::ComplexLayout => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ComplexityFactor::HighTextDensity => "high_text_density",
            ComplexityFactor::MultipleImages => "multiple_images",
            ComplexityFactor::MultipleTables => "multiple_tables",
            ComplexityFactor::MathematicalFormulas => "mathematical_formulas",
            ComplexityFactor::ComplexLayout => "complex_layout",
        }
    }
}

impl fmt::Display for ComplexityFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplexityScore {
    pub text_density: f64,
    pub image_count: usize,
    pub table_count: usize,
    pub score: u32,
    pub factors: BTreeSet<ComplexityFactor>,
}

/// Named processing path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    Fast,
    Multimodal,
    MapReduce,
    RuleBased,
    AiFallback,
    RuleFallback,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Fast => "fast",
            Strategy::Multimodal => "multimodal",
            Strategy::MapReduce => "map-reduce",
            Strategy::RuleBased => "rule-based",
            Strategy::AiFallback => "ai-fallback",
            Strategy::RuleFallback => "rule-fallback",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingDecision {
    pub strategy: Strategy,
    pub complexity: ComplexityScore,
    /// User-visible diagnostic citing the score and the triggered factors.
    pub reason: String,
}

// ── ComplexityAnalyzer ───────────────────────────────────────────────────

static FORMULA_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"\$[^$]+\$",             // inline math
        r"\$\$[^$]+\$\$",         // display math
        r"\\[a-zA-Z]+\{",         // backslash commands
        r"[∑∏∫∂∇±×÷≤≥≠≈∞]",       // math symbols
    ])
    .unwrap()
});

static LAYOUT_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"\t{2,}",                    // tab-aligned columns
        r"\n\s*\n\s*\n",              // multi-blank-line section breaks
        r"(?m)^\s*[•·▪▫◦‣⁃]\s+",      // bullet lines
        r"(?m)^\s*\d+\.\s+",          // numbered-list lines
    ])
    .unwrap()
});

static RE_TABLE_ROW: Lazy<Regex> = Lazy::new(|| Regex::new(r"\|.*\|").unwrap());

/// Number of pipe-delimited rows in `text`, the table heuristic used for routing.
pub fn count_table_rows(text: &str) -> usize {
    RE_TABLE_ROW.find_iter(text).count()
}

/// True if `text` contains inline/display math, backslash commands or math symbols.
pub fn has_formulas(text: &str) -> bool {
    FORMULA_PATTERNS.is_match(text)
}

/// True if `text` contains column tabs, section breaks, bullets or numbered lists.
pub fn has_complex_layout(text: &str) -> bool {
    LAYOUT_PATTERNS.is_match(text)
}

/// Scores a [`ContentUnit`] for structural complexity. Pure, no I/O.
#[derive(Debug, Clone, Default)]
pub struct ComplexityAnalyzer {
    thresholds: ComplexityThresholds,
}

impl ComplexityAnalyzer {
    pub fn new(thresholds: ComplexityThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &ComplexityThresholds {
        &self.thresholds
    }

    pub fn analyze(&self, unit: &ContentUnit) -> ComplexityScore {
        let area = if unit.page_area > 1.0 {
            unit.page_area
        } else {
            1.0
        };
        let text_density = unit.text.chars().count() as f64 / area;
        let image_count = unit.images.len();
        let table_count = count_table_rows(&unit.text);

        let mut factors = BTreeSet::new();
        if text_density > self.thresholds.text_density {
            factors.insert(ComplexityFactor::HighTextDensity);
        }
        if image_count > self.thresholds.image_count {
            factors.insert(ComplexityFactor::MultipleImages);
        }
        if table_count > self.thresholds.table_count {
            factors.insert(ComplexityFactor::MultipleTables);
        }
        if has_formulas(&unit.text) {
            factors.insert(ComplexityFactor::MathematicalFormulas);
        }
        if has_complex_layout(&unit.text) {
            factors.insert(ComplexityFactor::ComplexLayout);
        }

        let score = factors.iter().map(ComplexityFactor::weight).sum();

        ComplexityScore {
            text_density,
            image_count,
            table_count,
            score,
            factors,
        }
    }
}

// ── Router ───────────────────────────────────────────────────────────────

/// Score at or above which the complex strategy is chosen.
pub const COMPLEX_SCORE: u32 = 2;

/// Maps complexity to the configured simple/complex strategy.
#[derive(Debug, Clone, Default)]
pub struct Router {
    config: RoutingConfig,
    analyzer: ComplexityAnalyzer,
}

impl Router {
    pub fn new(config: RoutingConfig) -> Self {
        let analyzer = ComplexityAnalyzer::new(config.thresholds.clone());
        Self { config, analyzer }
    }

    pub fn analyzer(&self) -> &ComplexityAnalyzer {
        &self.analyzer
    }

    /// Analyse and decide in one step.
    pub fn route(&self, unit: &ContentUnit) -> RoutingDecision {
        self.decide(self.analyzer.analyze(unit))
    }

    /// Decide from an already computed score. Depends only on `score.score`.
    pub fn decide(&self, complexity: ComplexityScore) -> RoutingDecision {
        if complexity.score >= COMPLEX_SCORE {
            let factors: Vec<&str> = complexity.factors.iter().map(|f| f.as_str()).collect();
            RoutingDecision {
                strategy: self.config.complex,
                reason: format!(
                    "High complexity (score: {}), factors: {}",
                    complexity.score,
                    factors.join(", ")
                ),
                complexity,
            }
        } else {
            RoutingDecision {
                strategy: self.config.simple,
                reason: format!(
                    "Low complexity (score: {}), using fast parsing",
                    complexity.score
                ),
                complexity,
            }
        }
    }

    /// Route each unit independently; decisions keep input order.
    pub fn route_pages(&self, units: &[ContentUnit]) -> Vec<RoutingDecision> {
        units.iter().map(|u| self.route(u)).collect()
    }

    /// Aggregate statistics over a batch of decisions.
    ///
    /// Pages are counted against the configured simple and complex names;
    /// when both names are equal every page counts as simple.
    pub fn processing_stats(&self, decisions: &[RoutingDecision]) -> ProcessingStats {
        let total_pages = decisions.len();
        let fast_pages = decisions
            .iter()
            .filter(|d| d.strategy == self.config.simple)
            .count();
        let multimodal_pages = decisions
            .iter()
            .filter(|d| d.strategy == self.config.complex && d.strategy != self.config.simple)
            .count();

        let mut complexity_distribution = BTreeMap::new();
        for d in decisions {
            *complexity_distribution.entry(d.complexity.score).or_insert(0) += 1;
        }

        let ratio = |n: usize| {
            if total_pages == 0 {
                0.0
            } else {
                n as f64 / total_pages as f64
            }
        };

        ProcessingStats {
            total_pages,
            fast_pages,
            multimodal_pages,
            fast_ratio: ratio(fast_pages),
            multimodal_ratio: ratio(multimodal_pages),
            complexity_distribution,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStats {
    pub total_pages: usize,
    pub fast_pages: usize,
    pub multimodal_pages: usize,
    pub fast_ratio: f64,
    pub multimodal_ratio: f64,
    /// Score → number of units with that score.
    pub complexity_distribution: BTreeMap<u32, usize>,
}

// ── Upstream strategy planning ───────────────────────────────────────────

/// Document-level signals consulted before per-unit routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanInputs {
    pub text_chars: usize,
    pub page_count: usize,
    pub map_reduce: MapReduceMode,
    pub has_backend: bool,
    pub char_threshold: usize,
    pub page_threshold: usize,
}

/// Outcome of [`plan_strategy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    /// No model backend: rule-based heuristic regardless of anything else.
    RuleBased,
    /// Chunk, summarise and synthesise.
    MapReduce,
    /// Consult the [`Router`] for fast vs. multimodal.
    Routed,
}

/// Decide which top-level path a document takes.
///
/// Precedence: a missing backend forces rules; `mapReduce=on`, or `auto`
/// with text longer than `char_threshold` or more than `page_threshold`
/// pages, forces map-reduce; otherwise the router decides.
pub fn plan_strategy(inputs: &PlanInputs) -> Plan {
    if !inputs.has_backend {
        return Plan::RuleBased;
    }
    let oversized =
        inputs.text_chars > inputs.char_threshold || inputs.page_count > inputs.page_threshold;
    match inputs.map_reduce {
        MapReduceMode::On => Plan::MapReduce,
        MapReduceMode::Auto if oversized => Plan::MapReduce,
        _ => Plan::Routed,
    }
}

//! Result types returned by the conversion entry points.
//!
//! Field names serialise in camelCase; this is the JSON body of the HTTP
//! boundary and of `pdf2mermaid convert --json`.

use crate::map_reduce::MapReduceStats;
use crate::routing::{ComplexityScore, ProcessingStats, Strategy};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Result of a document conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionOutput {
    pub mermaid: String,
    pub stats: ConversionStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionStats {
    pub pages: usize,
    /// Whitespace-separated tokens in the extracted text.
    pub words: usize,
    /// Characters in the extracted text.
    pub characters: usize,
    #[serde(rename = "fileSizeMB")]
    pub file_size_mb: f64,
    pub processing_time_ms: u64,
    pub processing_strategy: Strategy,
    #[serde(rename = "usedAI")]
    pub used_ai: bool,
    pub used_vision: bool,
    pub used_map_reduce: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routing: Option<RoutingStats>,
    pub cache: CacheSummary,
}

/// Diagnostics of whichever path produced the diagram.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RoutingStats {
    /// Router decision for the whole document plus per-page aggregates.
    #[serde(rename_all = "camelCase")]
    Decision {
        strategy: Strategy,
        complexity: ComplexityScore,
        reason: String,
        pages: ProcessingStats,
    },
    MapReduce(MapReduceStats),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSummary {
    pub hit_rate: f64,
    pub enabled: bool,
}

/// Result of the image-only entry point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConversionOutput {
    pub mermaid: String,
    pub stats: ImageStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageStats {
    /// Always `"image"`.
    pub source: String,
    #[serde(rename = "fileSizeMB")]
    pub file_size_mb: f64,
    pub processing_time_ms: u64,
    /// Always `"image-vision"`.
    pub processing_strategy: String,
    #[serde(rename = "usedAI")]
    pub used_ai: bool,
    pub used_vision: bool,
    pub used_map_reduce: bool,
}

static RE_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\S+").unwrap());

/// Number of whitespace-separated tokens.
pub fn word_count(text: &str) -> usize {
    RE_WORD.find_iter(text).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_are_whitespace_runs() {
        assert_eq!(word_count(""), 0);
        assert_eq!(word_count("  one\ttwo\n\nthree "), 3);
        assert_eq!(word_count("中文 text"), 2);
    }

    #[test]
    fn stats_serialise_with_wire_names() {
        let stats = ConversionStats {
            pages: 2,
            words: 10,
            characters: 50,
            file_size_mb: 0.01,
            processing_time_ms: 12,
            processing_strategy: Strategy::RuleBased,
            used_ai: false,
            used_vision: false,
            used_map_reduce: false,
            routing: None,
            cache: CacheSummary {
                hit_rate: 0.0,
                enabled: false,
            },
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["processingStrategy"], "rule-based");
        assert_eq!(json["fileSizeMB"], 0.01);
        assert_eq!(json["usedAI"], false);
        assert_eq!(json["cache"]["hitRate"], 0.0);
        assert!(json.get("routing").is_none());
    }
}

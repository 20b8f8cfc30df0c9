//! Rule-based text → flowchart heuristic.
//!
//! Used when no model backend is configured and as the last fallback when
//! model calls fail. Deterministic: the same text always yields the same
//! diagram.
//!
//! Each kept line becomes one node; nodes are chained in document order.

use crate::config::{ChartType, Direction};
use crate::prompts::placeholder_diagram;
use once_cell::sync::Lazy;
use regex::Regex;

/// Longest label kept, in characters (including the ellipsis).
pub const MAX_LABEL_CHARS: usize = 60;

/// Lines this short (after cleanup) are treated as noise unless they are
/// chapter headings.
const MIN_LINE_CHARS: usize = 5;

static RE_MARKERS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\u{2022}\u{25CF}\-•·*>#]+").unwrap());
static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static RE_TOC: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^(contents|table of contents|目录)$").unwrap());
static RE_CHAPTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(第[一二三四五六七八九十百千]+章|chapter\s+\d+)").unwrap());

/// Build a flowchart from `text` with at most `max_nodes` nodes.
pub fn text_to_mermaid(text: &str, direction: Direction, max_nodes: usize) -> String {
    let labels: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !RE_TOC.is_match(l))
        .map(sanitize_line)
        .filter(|l| is_heading(l) || l.chars().count() > MIN_LINE_CHARS)
        .take(max_nodes)
        .map(|l| truncate_label(&l, MAX_LABEL_CHARS))
        .collect();

    if labels.is_empty() {
        return placeholder_diagram(ChartType::Flowchart, direction);
    }
    chain_diagram(direction, "N", &labels)
}

/// A `graph <dir>` diagram with one node per label, linked in order.
///
/// Node ids are `<prefix>1`, `<prefix>2`, ...; labels are quoted with
/// brackets and double quotes removed.
pub fn chain_diagram(direction: Direction, prefix: &str, labels: &[String]) -> String {
    let mut code = format!("graph {}\n", direction);
    for (i, label) in labels.iter().enumerate() {
        code.push_str(&format!("  {}{}[\"{}\"]\n", prefix, i + 1, escape_label(label)));
    }
    for i in 1..labels.len() {
        code.push_str(&format!("  {}{} --> {}{}\n", prefix, i, prefix, i + 1));
    }
    code
}

fn is_heading(line: &str) -> bool {
    RE_CHAPTER.is_match(line)
}

/// Replace bullet glyphs and markdown markers with spaces, collapse runs of
/// whitespace.
fn sanitize_line(line: &str) -> String {
    let s = RE_MARKERS.replace_all(line, " ");
    RE_WHITESPACE.replace_all(&s, " ").trim().to_string()
}

/// Cut `text` to `max` characters, the last one being `…`.
pub fn truncate_label(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

fn escape_label(label: &str) -> String {
    label.replace(['[', ']'], "").replace('"', "'")
}

//! Post-processing: deterministic cleanup of model-generated diagram code.
//!
//! Even well-prompted models wrap their answer in ```` ```mermaid ```` fences,
//! prepend a sentence of commentary, emit CRLF line endings or forget the
//! `graph TB` header. These rules fix such quirks without touching the
//! diagram itself. Each rule is a pure `&str → String` function.
//!
//! ## Rule Order
//!
//! Fence extraction runs first so later rules see only diagram code; the
//! header check runs after whitespace cleanup so leading blank lines do not
//! hide an existing header.

use crate::config::{ChartType, Direction};
use crate::prompts::{graph_header, placeholder_diagram};
use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all cleanup rules to raw model output.
///
/// Rules (applied in order):
/// 1. Extract the first fenced code block, if any
/// 2. Normalise line endings (CRLF → LF)
/// 3. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 4. Trim trailing whitespace per line and leading blank lines
/// 5. Collapse 3+ consecutive blank lines down to 1
/// 6. Empty output → placeholder diagram
/// 7. Ensure the chart header (`graph <dir>`, `mindmap`, `timeline`, `gantt`)
/// 8. Ensure the code ends with exactly one newline
pub fn clean_mermaid(input: &str, direction: Direction, chart_type: ChartType) -> String {
    let s = extract_fenced_block(input);
    let s = normalise_line_endings(&s);
    let s = remove_invisible_chars(&s);
    let s = trim_whitespace(&s);
    let s = collapse_blank_lines(&s);
    if s.trim().is_empty() {
        return placeholder_diagram(chart_type, direction);
    }
    let s = ensure_header(&s, direction, chart_type);
    ensure_final_newline(&s)
}

// ── Rule 1: Extract fenced block ────────────────────────────────────────────

static RE_FENCED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[ \t]*(?:mermaid)?[ \t]*\r?\n(.*?)\r?\n[ \t]*```").unwrap());

fn extract_fenced_block(input: &str) -> String {
    match RE_FENCED.captures(input) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Rule 2: Normalise line endings ──────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 4: Trim whitespace ─────────────────────────────────────────────────

fn trim_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .skip_while(|line| line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 5: Collapse blank lines ────────────────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

// ── Rule 7: Ensure chart header ─────────────────────────────────────────────

static RE_GRAPH_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(graph|flowchart)\s+(TB|TD|LR|BT|RL)\b").unwrap());

/// True if `code` already starts with a header valid for `chart_type`.
pub fn has_header(code: &str, chart_type: ChartType) -> bool {
    if chart_type.is_graph() {
        return RE_GRAPH_HEADER.is_match(code);
    }
    let keyword = match chart_type {
        ChartType::Mindmap => "mindmap",
        ChartType::Timeline => "timeline",
        _ => "gantt",
    };
    code.trim_start()
        .split_whitespace()
        .next()
        .is_some_and(|first| first.eq_ignore_ascii_case(keyword))
}

fn ensure_header(input: &str, direction: Direction, chart_type: ChartType) -> String {
    if has_header(input, chart_type) {
        return input.to_string();
    }
    let header = match chart_type {
        ChartType::Mindmap => "mindmap".to_string(),
        ChartType::Timeline => "timeline".to_string(),
        ChartType::Gantt => "gantt".to_string(),
        _ => graph_header(chart_type, direction),
    };
    format!("{}\n{}", header, input.trim())
}

// ── Rule 8: Ensure final newline ────────────────────────────────────────────

fn ensure_final_newline(input: &str) -> String {
    format!("{}\n", input.trim_end())
}

//! Prompts for diagram generation and chunk summarisation.
//!
//! Every string sent to the model is built here, so prompt changes never
//! touch retry, caching or fallback logic, and tests can inspect prompts
//! without a model.

use crate::config::{ChartType, Direction};

/// Label used when there is nothing to draw.
pub const EMPTY_DIAGRAM_LABEL: &str = "No usable text extracted from the PDF";

/// The diagram returned for empty input or empty model output.
pub fn placeholder_diagram(chart_type: ChartType, direction: Direction) -> String {
    match chart_type {
        ChartType::Mindmap => format!("mindmap\n  root(({}))\n", EMPTY_DIAGRAM_LABEL),
        ChartType::Timeline => format!("timeline\n  title {}\n", EMPTY_DIAGRAM_LABEL),
        ChartType::Gantt => format!("gantt\n  title {}\n", EMPTY_DIAGRAM_LABEL),
        _ => format!(
            "{}\n  A[{}]\n",
            graph_header(chart_type, direction),
            EMPTY_DIAGRAM_LABEL
        ),
    }
}

/// `graph <dir>` header for graph-like charts. Org charts are always
/// top-down and network diagrams left-to-right.
pub fn graph_header(chart_type: ChartType, direction: Direction) -> String {
    let dir = match chart_type {
        ChartType::OrgChart => Direction::TB,
        ChartType::Network => Direction::LR,
        _ => direction,
    };
    format!("graph {}", dir)
}

/// System prompt for a diagram-generation call.
pub fn diagram_system_prompt(chart_type: ChartType, direction: Direction, max_nodes: usize) -> String {
    let empty = placeholder_diagram(chart_type, direction);
    let empty = empty.trim_end().replace('\n', "\\n");
    match chart_type {
        ChartType::Mindmap => format!(
            "You distil documents into Mermaid mind maps. Follow these rules strictly:\n\
             - Output only mind map code: no explanations, no code fences.\n\
             - Start with the `mindmap` keyword.\n\
             - Use at most {max_nodes} nodes; keep the central theme and key branches.\n\
             - Write the central theme as root((theme)); express levels by indentation.\n\
             - If there is no content, output: {empty}"
        ),
        ChartType::Timeline => format!(
            "You distil documents into Mermaid timelines. Follow these rules strictly:\n\
             - Output only timeline code: no explanations, no code fences.\n\
             - Start with the `timeline` keyword, then a `title` line.\n\
             - Use at most {max_nodes} events, in chronological order.\n\
             - If there is no content, output: {empty}"
        ),
        ChartType::Gantt => format!(
            "You distil documents into Mermaid Gantt charts. Follow these rules strictly:\n\
             - Output only Gantt code: no explanations, no code fences.\n\
             - Start with the `gantt` keyword, then `title` and `section` lines.\n\
             - Use at most {max_nodes} tasks, each with timing information \
               (`Task name :status, id, start, duration`).\n\
             - If there is no content, output: {empty}"
        ),
        ChartType::OrgChart => format!(
            "You distil documents into organisation charts. Follow these rules strictly:\n\
             - Output only Mermaid code: no explanations, no code fences.\n\
             - Start with `graph TB`.\n\
             - Use at most {max_nodes} nodes that reflect the reporting hierarchy.\n\
             - Connect superiors to subordinates with -->.\n\
             - If there is no content, output: {empty}"
        ),
        ChartType::Network => format!(
            "You distil documents into network topology diagrams. Follow these rules strictly:\n\
             - Output only Mermaid code: no explanations, no code fences.\n\
             - Start with `graph LR`.\n\
             - Use at most {max_nodes} nodes that reflect how components connect.\n\
             - Connect network nodes with ---.\n\
             - If there is no content, output: {empty}"
        ),
        ChartType::Flowchart => format!(
            "You distil documents into Mermaid flowcharts. Follow these rules strictly:\n\
             - Output only Mermaid code: no explanations, no code fences.\n\
             - Use direction `graph {direction}`.\n\
             - Use at most {max_nodes} nodes; keep headings and key points first.\n\
             - Keep node labels short (at most 60 characters) without brackets or stray punctuation.\n\
             - Connect sequential steps with -->; express parent/child with --> and keep siblings in order.\n\
             - If there is no content, output: {empty}"
        ),
    }
}

/// User prompt carrying the document text for a diagram-generation call.
pub fn diagram_user_prompt(chart_type: ChartType, direction: Direction, content: &str) -> String {
    let (name, hint) = match chart_type {
        ChartType::Flowchart => ("a Mermaid flowchart", format!(" (starting with graph {direction})")),
        ChartType::Mindmap => ("a mind map", String::new()),
        ChartType::Timeline => ("a timeline", String::new()),
        ChartType::Gantt => ("a Gantt chart", String::new()),
        ChartType::OrgChart => ("an organisation chart", String::new()),
        ChartType::Network => ("a network topology diagram", String::new()),
    };
    format!(
        "The document content follows. Generate {name} code{hint} from it, following the rules above:\n\n{content}"
    )
}

/// System prompt for a vision call over page images plus extracted text.
pub fn vision_system_prompt(chart_type: ChartType, direction: Direction, max_nodes: usize) -> String {
    format!(
        "{}\n- You receive the extracted PDF text together with page images; use the images \
         to understand tables, layout and figures.",
        diagram_system_prompt(chart_type, direction, max_nodes)
    )
}

/// User prompt of a vision call. `content` may be empty (image-only input).
pub fn vision_user_prompt(chart_type: ChartType, direction: Direction, content: &str) -> String {
    let header = match chart_type {
        ChartType::Mindmap | ChartType::Timeline | ChartType::Gantt => String::new(),
        _ => format!(" (starting with {})", graph_header(chart_type, direction)),
    };
    if content.trim().is_empty() {
        format!("Generate the diagram{header} from the attached image(s).")
    } else {
        format!(
            "Extracted PDF text (truncated):\n\n{content}\n\n\
             Page images are attached for tables, layout and figures. \
             Combine both and generate the diagram{header}."
        )
    }
}

/// System prompt for summarising one map-phase chunk.
pub fn chunk_summary_system_prompt(summary_length: usize, node_budget: usize) -> String {
    format!(
        "You are a document analyst. Analyse the following document fragment, extract the key \
         information and write a concise summary.\n\n\
         Requirements:\n\
         1. Keep the summary within {summary_length} characters.\n\
         2. Preserve important structure and key concepts; it will become at most \
            {node_budget} diagram nodes.\n\
         3. If the fragment describes a process or steps, list them explicitly.\n\
         4. Ignore headers, footers and other boilerplate."
    )
}

/// User prompt for one map-phase chunk. `index` is 0-based.
pub fn chunk_summary_user_prompt(index: usize, content: &str) -> String {
    format!("Document fragment {}:\n\n{}", index + 1, content)
}

/// Labelled sections handed to the reduce-phase synthesis call.
pub fn combine_summaries<'a>(summaries: impl IntoIterator<Item = &'a str>) -> String {
    summaries
        .into_iter()
        .enumerate()
        .map(|(i, s)| format!("Part {}: {}", i + 1, s.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flowchart_prompt_names_direction_and_budget() {
        let p = diagram_system_prompt(ChartType::Flowchart, Direction::LR, 42);
        assert!(p.contains("graph LR"));
        assert!(p.contains("at most 42 nodes"));
        assert!(p.contains(EMPTY_DIAGRAM_LABEL));
    }

    #[test]
    fn each_chart_type_has_its_own_prompt() {
        let types = [
            ChartType::Flowchart,
            ChartType::Mindmap,
            ChartType::Timeline,
            ChartType::Gantt,
            ChartType::OrgChart,
            ChartType::Network,
        ];
        let prompts: std::collections::HashSet<String> = types
            .iter()
            .map(|t| diagram_system_prompt(*t, Direction::TB, 60))
            .collect();
        assert_eq!(prompts.len(), types.len());
        assert!(diagram_system_prompt(ChartType::Mindmap, Direction::TB, 60).contains("mindmap"));
    }

    #[test]
    fn placeholders_start_with_chart_header() {
        assert!(placeholder_diagram(ChartType::Flowchart, Direction::LR).starts_with("graph LR\n"));
        assert!(placeholder_diagram(ChartType::Network, Direction::TB).starts_with("graph LR\n"));
        assert!(placeholder_diagram(ChartType::OrgChart, Direction::LR).starts_with("graph TB\n"));
        assert!(placeholder_diagram(ChartType::Gantt, Direction::TB).starts_with("gantt\n"));
    }

    #[test]
    fn summaries_are_labelled_in_order() {
        let combined = combine_summaries(["alpha ", "beta"]);
        assert_eq!(combined, "Part 1: alpha\n\nPart 2: beta");
    }

    #[test]
    fn chunk_prompts() {
        assert!(chunk_summary_system_prompt(500, 12).contains("500 characters"));
        assert!(chunk_summary_user_prompt(0, "text").starts_with("Document fragment 1:"));
    }

    #[test]
    fn image_only_vision_prompt() {
        let p = vision_user_prompt(ChartType::Flowchart, Direction::TB, "  ");
        assert!(p.contains("attached image"));
        assert!(p.contains("graph TB"));
    }
}

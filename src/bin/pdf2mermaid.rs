//! CLI binary for pdf2mermaid.
//!
//! A thin shim over the library crate: maps flags onto `ConversionConfig`,
//! runs one conversion (or the HTTP server) and prints the result.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use pdf2mermaid::{
    pipeline::encode, server, write_output, ChartType, ConversionConfig, ConversionOrchestrator,
    ConvertOptions, Direction, MapProgressCallback, MapReduceMode, ProgressCallback, VisionMode,
};
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ─────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── Map-phase progress bar ──────────────────────────────────────────────────

/// Progress bar over map-reduce chunks. Hidden until the map phase starts,
/// so routed conversions never draw it.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            bar: ProgressBar::hidden(),
        })
    }
}

impl MapProgressCallback for CliProgressCallback {
    fn on_map_start(&self, total_chunks: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} chunks  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ");
        self.bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        self.bar.set_length(total_chunks as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Summarising");
        self.bar.enable_steady_tick(Duration::from_millis(80));
    }

    fn on_chunk_complete(&self, chunk: usize, total: usize, summary_len: usize) {
        self.bar.println(format!(
            "  {} Chunk {:>3}/{:<3}  {}",
            green("✓"),
            chunk + 1,
            total,
            dim(&format!("{summary_len:>5} chars")),
        ));
        self.bar.inc(1);
    }

    fn on_chunk_error(&self, chunk: usize, total: usize, error: &str) {
        let msg: String = if error.chars().count() > 80 {
            format!("{}…", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Chunk {:>3}/{:<3}  {}",
            red("✗"),
            chunk + 1,
            total,
            red(&msg)
        ));
        self.bar.inc(1);
    }

    fn on_map_complete(&self, total_chunks: usize, valid_chunks: usize) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {}/{} chunks summarised",
            if valid_chunks == total_chunks { green("✔") } else { red("⚠") },
            bold(&valid_chunks.to_string()),
            total_chunks
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Diagram to stdout
  pdf2mermaid convert report.pdf

  # Left-to-right, written to a file
  pdf2mermaid convert report.pdf --direction lr -o report.mmd

  # Force map-reduce on a long document, JSON with stats
  pdf2mermaid convert book.pdf --map-reduce on --json

  # Diagram from a whiteboard photo
  pdf2mermaid image board.jpg --chart-type mindmap

  # HTTP service
  pdf2mermaid serve --addr 0.0.0.0:3000

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key (no key: rule-based diagrams)
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  DEFAULT_LLM_MODEL       Model used when --model is not given
  MAX_PDF_PAGES           Page cap (default 100)
  MAX_FILE_SIZE_MB        Upload cap in MB (default 50)
  CACHE_ENABLED           "true" enables the result cache
  PDFIUM_LIB_PATH         Directory containing libpdfium
"#;

/// Turn PDF documents into Mermaid diagrams.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2mermaid",
    version,
    about = "Turn PDF documents into Mermaid diagrams",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    global: GlobalArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert a PDF file or URL.
    Convert {
        /// Local PDF file path or HTTP/HTTPS URL.
        input: String,

        #[command(flatten)]
        out: OutputArgs,

        /// Direction of the diagram.
        #[arg(long, value_enum, default_value = "tb")]
        direction: DirectionArg,

        /// Allow rasterising pages for complex documents.
        #[arg(long, value_enum, default_value = "on")]
        vision: Switch,

        /// Chunk-and-summarise mode for long documents.
        #[arg(long, value_enum, default_value = "auto")]
        map_reduce: MapReduceArg,

        /// Disable the chunk progress bar.
        #[arg(long, env = "PDF2MERMAID_NO_PROGRESS")]
        no_progress: bool,
    },

    /// Generate a diagram from an image file (needs a vision model).
    Image {
        /// PNG or JPEG file.
        file: PathBuf,

        #[command(flatten)]
        out: OutputArgs,

        #[arg(long, value_enum, default_value = "tb")]
        direction: DirectionArg,

        /// Kind of diagram.
        #[arg(long, value_enum, default_value = "flowchart")]
        chart_type: ChartTypeArg,
    },

    /// Serve the HTTP API.
    Serve {
        /// Listen address.
        #[arg(long, env = "PDF2MERMAID_ADDR", default_value = "127.0.0.1:3000")]
        addr: SocketAddr,
    },
}

#[derive(Args, Debug)]
struct OutputArgs {
    /// Write the diagram to this file instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print the full result (diagram plus stats) as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// LLM model ID.
    #[arg(long, global = true, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, global = true, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Page cap.
    #[arg(long, global = true)]
    max_pages: Option<usize>,

    /// Upload size cap in MB.
    #[arg(long, global = true)]
    max_file_size_mb: Option<u64>,

    /// Map-reduce chunk size in characters.
    #[arg(long, global = true)]
    chunk_size: Option<usize>,

    /// Characters repeated between consecutive chunks. Must be below the chunk size.
    #[arg(long, global = true)]
    chunk_overlap: Option<usize>,

    /// Node cap of the final diagram.
    #[arg(long, global = true)]
    max_nodes: Option<usize>,

    /// Summarise chunks one at a time.
    #[arg(long, global = true)]
    sequential: bool,

    /// Enable the in-memory result cache.
    #[arg(long, global = true)]
    cache: bool,

    /// Report model failures instead of degrading to rule-based output.
    #[arg(long, global = true)]
    no_fallback: bool,

    /// Retries per model call.
    #[arg(long, global = true)]
    max_retries: Option<u32>,

    /// Whole-request timeout in seconds.
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PDF2MERMAID_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PDF2MERMAID_QUIET")]
    quiet: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum DirectionArg {
    Tb,
    Lr,
}

impl From<DirectionArg> for Direction {
    fn from(v: DirectionArg) -> Self {
        match v {
            DirectionArg::Tb => Direction::TB,
            DirectionArg::Lr => Direction::LR,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Switch {
    On,
    Off,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum MapReduceArg {
    Auto,
    On,
    Off,
}

impl From<MapReduceArg> for MapReduceMode {
    fn from(v: MapReduceArg) -> Self {
        match v {
            MapReduceArg::Auto => MapReduceMode::Auto,
            MapReduceArg::On => MapReduceMode::On,
            MapReduceArg::Off => MapReduceMode::Off,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ChartTypeArg {
    Flowchart,
    Mindmap,
    Timeline,
    Gantt,
    Orgchart,
    Network,
}

impl From<ChartTypeArg> for ChartType {
    fn from(v: ChartTypeArg) -> Self {
        match v {
            ChartTypeArg::Flowchart => ChartType::Flowchart,
            ChartTypeArg::Mindmap => ChartType::Mindmap,
            ChartTypeArg::Timeline => ChartType::Timeline,
            ChartTypeArg::Gantt => ChartType::Gantt,
            ChartTypeArg::Orgchart => ChartType::OrgChart,
            ChartTypeArg::Network => ChartType::Network,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let g = &cli.global;

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if g.verbose {
        "debug"
    } else if g.quiet {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress: Option<ProgressCallback> = match &cli.command {
        Command::Convert {
            no_progress,
            out,
            ..
        } if !g.quiet && !*no_progress && !out.json => {
            Some(CliProgressCallback::new() as Arc<dyn MapProgressCallback>)
        }
        _ => None,
    };
    let config = build_config(g, progress)?;
    let timeout_secs = config.request_timeout_secs;
    let orchestrator = Arc::new(ConversionOrchestrator::from_config(config));

    match cli.command {
        Command::Convert {
            input,
            out,
            direction,
            vision,
            map_reduce,
            ..
        } => {
            let options = ConvertOptions {
                direction: direction.into(),
                vision: match vision {
                    Switch::On => VisionMode::On,
                    Switch::Off => VisionMode::Off,
                },
                map_reduce: map_reduce.into(),
            };
            let output = pdf2mermaid::with_timeout(
                timeout_secs,
                orchestrator.convert_input(&input, options),
            )
            .await
            .context("Conversion failed")?;

            let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
            emit(&out, &output.mermaid, &json).await?;
            if !g.quiet && !out.json {
                eprintln!(
                    "{}  {} pages  {}  {}ms",
                    green("✔"),
                    output.stats.pages,
                    bold(output.stats.processing_strategy.as_str()),
                    output.stats.processing_time_ms
                );
            }
        }

        Command::Image {
            file,
            out,
            direction,
            chart_type,
        } => {
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read image {:?}", file))?;
            let data_url = encode::image_bytes_to_data_url(&bytes)?;
            let output = pdf2mermaid::with_timeout(
                timeout_secs,
                orchestrator.convert_image(&data_url, direction.into(), chart_type.into()),
            )
            .await
            .context("Image conversion failed")?;

            let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
            emit(&out, &output.mermaid, &json).await?;
        }

        Command::Serve { addr } => {
            server::serve(Arc::clone(&orchestrator), addr)
                .await
                .context("HTTP server failed")?;
        }
    }

    orchestrator.cache().shutdown();
    Ok(())
}

/// Write the diagram (or the JSON result) to the output file or stdout.
async fn emit(out: &OutputArgs, mermaid: &str, json: &str) -> Result<()> {
    let body = if out.json { json } else { mermaid };
    match out.output {
        Some(ref path) => {
            write_output(path, body).await?;
            eprintln!("→ {}", bold(&path.display().to_string()));
        }
        None => write_body(io::stdout().lock(), body)?,
    }
    Ok(())
}

/// Write `body` followed by a newline unless it already ends with one.
fn write_body(mut w: impl Write, body: &str) -> Result<()> {
    w.write_all(body.as_bytes())
        .context("Failed to write to stdout")?;
    if !body.ends_with('\n') {
        w.write_all(b"\n").context("Failed to write to stdout")?;
    }
    w.flush().context("Failed to write to stdout")?;
    Ok(())
}

/// Environment defaults overlaid with CLI flags.
fn build_config(g: &GlobalArgs, progress: Option<ProgressCallback>) -> Result<ConversionConfig> {
    let base = ConversionConfig::from_env();
    let mut builder = base.into_builder();

    if let Some(n) = g.max_pages {
        builder = builder.max_pages(n);
    }
    if let Some(mb) = g.max_file_size_mb {
        builder = builder.max_file_size_mb(mb);
    }
    if let Some(n) = g.chunk_size {
        builder = builder.chunk_size(n);
    }
    if let Some(n) = g.chunk_overlap {
        builder = builder.chunk_overlap(n);
    }
    if let Some(n) = g.max_nodes {
        builder = builder.max_nodes(n);
    }
    if let Some(n) = g.max_retries {
        builder = builder.max_retries(n);
    }
    if let Some(secs) = g.timeout {
        builder = builder.request_timeout_secs(secs);
    }
    if let Some(ref model) = g.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = g.provider {
        builder = builder.provider_name(provider.clone());
    }
    if g.sequential {
        builder = builder.enable_parallel(false);
    }
    if g.cache {
        builder = builder.cache_enabled(true);
    }
    if g.no_fallback {
        builder = builder.enable_fallback(false);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

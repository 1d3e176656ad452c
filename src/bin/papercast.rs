//! CLI binary for papercast.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig` + registered stages and prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use papercast::config::GIB;
use papercast::pipeline::input::{load_document, RawDocument};
use papercast::pipeline::llm::{LlmStage, ProviderSource};
use papercast::{
    trim_back_matter, LifecycleConfig, LoadMode, ModelLifecycleManager,
    NormalizeOptions, PipelineConfig, PipelineOrchestrator, PipelineRequest, PipelineResult,
    ProgressCallback, StageDescriptor, StageKind, StageProgressCallback, TextNormalizer,
};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar over the pipeline's stages plus a
/// log line per finished, skipped or failed stage.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:30.green/238}] {pos}/{len} stages  {msg}  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        bar.set_style(style);
        bar.set_prefix("Narrating");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl StageProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_stages: usize, input_len: usize) {
        self.bar.set_length(total_stages as u64);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Running {total_stages} stages on {input_len} chars…"))
        ));
    }

    fn on_stage_start(&self, stage: &str, _ordinal: usize, _total: usize) {
        self.bar.set_message(stage.to_string());
    }

    fn on_stage_skipped(&self, stage: &str, ordinal: usize, total: usize) {
        self.bar.println(format!(
            "  {} Stage {}/{}  {:<16}  {}",
            dim("–"),
            ordinal,
            total,
            stage,
            dim("skipped")
        ));
        self.bar.inc(1);
    }

    fn on_stage_complete(
        &self,
        stage: &str,
        ordinal: usize,
        total: usize,
        output_len: usize,
        elapsed_ms: u64,
    ) {
        self.bar.println(format!(
            "  {} Stage {}/{}  {:<16}  {:<12}  {}",
            green("✓"),
            ordinal,
            total,
            stage,
            dim(&format!("{output_len:>7} chars")),
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
        ));
        self.bar.inc(1);
    }

    fn on_stage_error(&self, stage: &str, ordinal: usize, total: usize, error: &str) {
        let first_line = error.lines().next().unwrap_or(error);
        let msg = if first_line.chars().count() > 80 {
            let cut: String = first_line.chars().take(79).collect();
            format!("{cut}\u{2026}")
        } else {
            first_line.to_string()
        };
        self.bar.println(format!(
            "  {} Stage {}/{}  {:<16}  {}",
            red("✗"),
            ordinal,
            total,
            stage,
            red(&msg)
        ));
        self.bar.finish_and_clear();
    }

    fn on_run_complete(&self, total_elapsed_ms: u64, output_len: usize) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {} chars of narration in {:.1}s",
            green("✔"),
            bold(&output_len.to_string()),
            total_elapsed_ms as f64 / 1000.0
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Deterministic normalization only (no model, no API key)
  papercast normalize paper.txt

  # Full cleanup → reorganization run, narration to a file
  papercast process paper.json -o narration.txt

  # Skip the cleanup stage; its input passes straight to reorganization
  papercast process --skip-cleanup paper.txt

  # Local models that do not fit together: load one stage at a time
  papercast process --provider ollama --cleanup-model llama3.1:8b \
      --reorganize-model qwen2.5:32b --on-demand --memory-budget-gb 35 paper.txt

  # JSON result with per-stage outputs and timings
  papercast process --json paper.txt > result.json

INPUT FORMATS:
  .txt    extracted UTF-8 text
  .json   {"text": "...", "metadata": {...}} or {"pages": ["...", ...]}
  URL     http(s):// serving either of the above

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Provider used when --provider is not given
  EDGEQUAKE_MODEL         Model used with EDGEQUAKE_LLM_PROVIDER
  RUST_LOG                Log filter (overrides --verbose / --quiet)
"#;

/// Turn extracted scientific-paper text into speech-ready narration.
#[derive(Parser, Debug)]
#[command(
    name = "papercast",
    version,
    about = "Turn extracted scientific-paper text into speech-ready narration",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PAPERCAST_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PAPERCAST_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply the deterministic normalizer only.
    Normalize(NormalizeArgs),
    /// Run the cleanup and reorganization stages.
    Process(ProcessArgs),
}

#[derive(Args, Debug)]
struct InputArgs {
    /// Local .txt / .json file or HTTP/HTTPS URL.
    input: String,

    /// Write the result to this file instead of stdout.
    #[arg(short, long, env = "PAPERCAST_OUTPUT")]
    output: Option<PathBuf>,

    /// Cut the text at the first references / appendix heading.
    #[arg(long, env = "PAPERCAST_TRIM_BACK_MATTER")]
    trim_back_matter: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PAPERCAST_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,
}

#[derive(Args, Debug)]
struct NormalizeArgs {
    #[command(flatten)]
    input: InputArgs,

    /// Keep citations instead of removing them.
    #[arg(long, env = "PAPERCAST_KEEP_CITATIONS")]
    keep_citations: bool,

    /// Outputs shorter than this many characters are an error.
    #[arg(long, env = "PAPERCAST_MIN_OUTPUT_CHARS", default_value_t = 3)]
    min_output_chars: usize,
}

#[derive(Args, Debug)]
struct ProcessArgs {
    #[command(flatten)]
    input: InputArgs,

    /// LLM provider: openai, anthropic, gemini, ollama, ...
    #[arg(
        long,
        env = "PAPERCAST_PROVIDER",
        long_help = "LLM provider for both stages. Auto-detected from API key env vars if not set."
    )]
    provider: Option<String>,

    /// Model for both stages unless a per-stage model is given.
    #[arg(long, env = "PAPERCAST_MODEL")]
    model: Option<String>,

    /// Model for the cleanup stage.
    #[arg(long, env = "PAPERCAST_CLEANUP_MODEL")]
    cleanup_model: Option<String>,

    /// Model for the reorganization stage.
    #[arg(long, env = "PAPERCAST_REORGANIZE_MODEL")]
    reorganize_model: Option<String>,

    /// Pass the input through the cleanup stage unchanged.
    #[arg(long, env = "PAPERCAST_SKIP_CLEANUP")]
    skip_cleanup: bool,

    /// Pass the cleanup output through the reorganization stage unchanged.
    #[arg(long, env = "PAPERCAST_SKIP_REORGANIZE")]
    skip_reorganize: bool,

    /// Load each stage just before it runs and unload it afterwards.
    #[arg(long, env = "PAPERCAST_ON_DEMAND")]
    on_demand: bool,

    /// Maximum combined size of loaded stage models, in GiB.
    #[arg(long, env = "PAPERCAST_MEMORY_BUDGET_GB")]
    memory_budget_gb: Option<f64>,

    /// Declared size of the cleanup model, in GiB.
    #[arg(long, env = "PAPERCAST_CLEANUP_MEMORY_GB", default_value_t = 10.0)]
    cleanup_memory_gb: f64,

    /// Declared size of the reorganization model, in GiB.
    #[arg(long, env = "PAPERCAST_REORGANIZE_MEMORY_GB", default_value_t = 28.0)]
    reorganize_memory_gb: f64,

    /// Do not normalize the input before the first stage.
    #[arg(long, env = "PAPERCAST_NO_NORMALIZE")]
    no_normalize: bool,

    /// LLM temperature for both stages (0.0–2.0).
    #[arg(long, env = "PAPERCAST_TEMPERATURE")]
    temperature: Option<f32>,

    /// Max completion tokens per stage.
    #[arg(long, env = "PAPERCAST_MAX_TOKENS", default_value_t = 32_768)]
    max_tokens: usize,

    /// Retries per stage on timeouts and rate limits.
    #[arg(long, env = "PAPERCAST_MAX_RETRIES", default_value_t = 0)]
    max_retries: u32,

    /// Output the structured result as JSON instead of plain text.
    #[arg(long, env = "PAPERCAST_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PAPERCAST_NO_PROGRESS")]
    no_progress: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs when it is active.
    let show_progress = match &cli.command {
        Command::Process(p) => !cli.quiet && !p.no_progress && !p.json,
        Command::Normalize(_) => false,
    };
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
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

    match &cli.command {
        Command::Normalize(args) => normalize(args, cli.quiet).await,
        Command::Process(args) => process(args, cli.quiet, show_progress).await,
    }
}

async fn read_input(args: &InputArgs) -> Result<RawDocument> {
    load_document(&args.input, args.download_timeout)
        .await
        .with_context(|| format!("Failed to load '{}'", args.input))
}

fn write_output(path: Option<&Path>, text: &str) -> Result<()> {
    match path {
        Some(path) => std::fs::write(path, text)
            .with_context(|| format!("Failed to write {}", path.display())),
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(text.as_bytes())
                .context("Failed to write to stdout")?;
            if !text.ends_with('\n') {
                handle.write_all(b"\n").ok();
            }
            Ok(())
        }
    }
}

// ── normalize ────────────────────────────────────────────────────────────────

async fn normalize(args: &NormalizeArgs, quiet: bool) -> Result<()> {
    let doc = read_input(&args.input).await?;
    let full = doc.text();
    let text = if args.input.trim_back_matter {
        trim_back_matter(&full)
    } else {
        full.as_str()
    };

    let options = NormalizeOptions {
        remove_citations: !args.keep_citations,
        min_output_chars: args.min_output_chars,
    };
    let normalized = TextNormalizer::default()
        .normalize(text, &options)
        .context("Normalization failed")?;

    write_output(args.input.output.as_deref(), normalized.as_str())?;
    if !quiet {
        eprintln!(
            "{} {} → {} chars",
            green("✔"),
            normalized.original_len(),
            normalized.len()
        );
    }
    Ok(())
}

// ── process ──────────────────────────────────────────────────────────────────

async fn process(args: &ProcessArgs, quiet: bool, show_progress: bool) -> Result<()> {
    let doc = read_input(&args.input).await?;

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn StageProgressCallback>)
    } else {
        None
    };
    let config = build_config(args, progress)?;
    let lifecycle = build_lifecycle(args, &config)?;
    let orchestrator = PipelineOrchestrator::new(Arc::new(lifecycle), config);

    let mut request = PipelineRequest::new(doc.text())
        .metadata(doc.metadata.clone())
        .normalize_input(!args.no_normalize)
        .trim_back_matter(args.input.trim_back_matter);
    if args.skip_cleanup {
        request = request.skip(StageKind::Cleanup.default_name());
    }
    if args.skip_reorganize {
        request = request.skip(StageKind::Reorganization.default_name());
    }

    let result = if args.on_demand {
        orchestrator.run_swapping(&request).await
    } else {
        // A stage that fails here stays unloaded; the run reports it as not
        // ready unless the request skips it.
        if let Err(e) = orchestrator.lifecycle().startup().await {
            warn!("Startup incomplete: {e}");
        }
        orchestrator.run(&request).await
    };
    orchestrator.lifecycle().shutdown().await;
    let result = result.context("Pipeline failed")?;

    if args.json {
        let json = serde_json::to_string_pretty(&result).context("Failed to serialise result")?;
        write_output(args.input.output.as_deref(), &json)?;
    } else {
        write_output(args.input.output.as_deref(), &result.final_output)?;
    }

    if !quiet {
        print_summary(&result, args.input.output.as_deref(), show_progress);
    }
    Ok(())
}

fn print_summary(result: &PipelineResult, output: Option<&Path>, show_progress: bool) {
    if !show_progress {
        let ran = result.stages.iter().filter(|s| !s.skipped).count();
        eprintln!(
            "Ran {}/{} stages in {}ms",
            ran,
            result.stages.len(),
            result.total_elapsed_ms
        );
    }
    eprintln!(
        "   {} tokens in  /  {} tokens out{}",
        dim(&result.total_input_tokens().to_string()),
        dim(&result.total_output_tokens().to_string()),
        output
            .map(|p| format!("  →  {}", bold(&p.display().to_string())))
            .unwrap_or_default()
    );
}

/// Map CLI args to `PipelineConfig`.
fn build_config(args: &ProcessArgs, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut lifecycle = if args.on_demand {
        LifecycleConfig::on_demand()
    } else {
        LifecycleConfig::eager()
    };
    if let Some(gb) = args.memory_budget_gb {
        if gb.is_nan() || gb <= 0.0 {
            anyhow::bail!("--memory-budget-gb must be positive (got {gb})");
        }
        lifecycle = lifecycle.with_budget(gib_to_bytes(gb));
    }

    let mut builder = PipelineConfig::builder()
        .lifecycle(lifecycle)
        .max_tokens(args.max_tokens)
        .max_retries(args.max_retries);
    if let Some(t) = args.temperature {
        builder = builder.temperature(t);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    builder.build().context("Invalid configuration")
}

/// Register the cleanup and reorganization stages.
fn build_lifecycle(args: &ProcessArgs, config: &PipelineConfig) -> Result<ModelLifecycleManager> {
    let source_for = |stage_model: &Option<String>| {
        let model = stage_model.clone().or_else(|| args.model.clone());
        match &args.provider {
            Some(provider) => ProviderSource::named(provider.clone(), model),
            None => ProviderSource::Env { model },
        }
    };

    let cleanup = LlmStage::cleanup(source_for(&args.cleanup_model), config.cleanup.clone());
    let reorganization = LlmStage::reorganization(
        source_for(&args.reorganize_model),
        config.reorganization.clone(),
    );

    let manager = ModelLifecycleManager::new(config.lifecycle)
        .with_stage(
            StageDescriptor::new(StageKind::Cleanup, 1)
                .memory_bytes(gib_to_bytes(args.cleanup_memory_gb)),
            Box::new(cleanup),
        )?
        .with_stage(
            StageDescriptor::new(StageKind::Reorganization, 2)
                .memory_bytes(gib_to_bytes(args.reorganize_memory_gb)),
            Box::new(reorganization),
        )?;

    if manager.mode() == LoadMode::OnDemand {
        tracing::debug!("Stages load on demand, one at a time");
    }
    Ok(manager)
}

fn gib_to_bytes(gb: f64) -> u64 {
    (gb.max(0.0) * GIB as f64) as u64
}

//! CLI binary for edgequake-scan2sheet.
//!
//! A thin shim over the library crate: maps CLI flags to `SessionConfig`,
//! runs ingest → extract → reconcile → export, and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_scan2sheet::pipeline::input::resolve_inputs;
use edgequake_scan2sheet::{
    combined_csv, export_to_path, master_csv, BatchReport, ExportMode, ExportOutcome,
    ExtractOutcome, ExtractionProgressCallback, Ingestor, Orchestrator, PageId, PageRecord, PageStatus,
    PageSummary, PdfiumRasterizer, PreprocessFilters, ProgressCallback, Rotation, SessionConfig,
    SessionStore,
};
use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
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

/// Live progress bar plus one log line per settled page. Pages settle out of
/// order, so start times are keyed by page id.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<PageId, Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading files…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn elapsed_secs(&self, id: PageId) -> f64 {
        self.start_times
            .lock()
            .unwrap()
            .remove(&id)
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, page_count: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(page_count as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Extracting");
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Extracting {page_count} pages…"))
        ));
    }

    fn on_page_start(&self, id: PageId, name: &str) {
        self.start_times.lock().unwrap().insert(id, Instant::now());
        self.bar.set_message(name.to_string());
    }

    fn on_page_complete(&self, id: PageId, name: &str, row_count: usize) {
        let secs = self.elapsed_secs(id);
        self.bar.println(format!(
            "  {} {:<40}  {:<10}  {}",
            green("✓"),
            name,
            dim(&format!("{row_count:>4} rows")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, id: PageId, name: &str, error: &str) {
        let secs = self.elapsed_secs(id);

        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(['\u{2026}']).collect()
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} {:<40}  {}  {}",
            red("✗"),
            name,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, launched: usize, succeeded: usize, warnings: usize) {
        let failed = launched.saturating_sub(succeeded);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} pages extracted",
                green("✔"),
                bold(&succeeded.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} pages extracted  ({} failed)",
                if failed == launched { red("✘") } else { cyan("⚠") },
                bold(&succeeded.to_string()),
                launched,
                red(&failed.to_string()),
            );
        }
        if warnings > 0 {
            eprintln!(
                "{} {} page(s) disagree with the batch row count",
                yellow("⚠"),
                bold(&warnings.to_string())
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Scanned register → CSV on stdout
  scan2sheet register.pdf

  # Several uploads into one master sheet with page/source columns
  scan2sheet form1.jpg form2.jpg batch.pdf --mode master -o all.csv

  # One CSV per page into a directory
  scan2sheet ledger.pdf --mode per-page -o ledger_pages/

  # Clean up faint phone photos before extraction
  scan2sheet --grayscale --contrast 60 --threshold 140 --rotate 90 photo.jpg

  # Use a specific model
  scan2sheet --provider anthropic --model claude-sonnet-4-20250514 invoice.png

  # Full session (pages, rows, errors, warnings) as JSON
  scan2sheet --json register.pdf > session.json

OUTPUT MODES:
  combined   all pages' rows stacked under the union of their columns
  master     as combined, with "Page Number" and "Source File" first
  per-page   one CSV per page; -o names a directory

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)
"#;

/// Digitise scanned forms and PDFs into spreadsheet rows using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "scan2sheet",
    version,
    about = "Digitise scanned forms and PDFs into spreadsheet rows using Vision LLMs",
    long_about = "Extract table and form data from scanned images and PDF pages (local files \
or URLs) into CSV using Vision Language Models. Pages are extracted concurrently, checked \
against each other for consistent columns and row counts, and exported as one sheet or \
one file per page.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local files (PDF or image) or HTTP/HTTPS URLs.
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Write CSV here instead of stdout (a directory for --mode per-page).
    #[arg(short, long, env = "SCAN2SHEET_OUTPUT")]
    output: Option<PathBuf>,

    /// Sheet layout: combined, master or per-page.
    #[arg(long, env = "SCAN2SHEET_MODE", value_enum, default_value = "combined")]
    mode: ModeArg,

    /// LLM model ID (e.g. gpt-4.1-mini, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "SCAN2SHEET_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(
        long,
        env = "SCAN2SHEET_PROVIDER",
        long_help = "LLM provider. Auto-detected from API key env vars if not set.\n\
          Supported: openai, anthropic, gemini, azure, ollama, or any OpenAI-compatible URL."
    )]
    provider: Option<String>,

    /// PDF rendering DPI (72–400).
    #[arg(long, env = "SCAN2SHEET_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Brightness offset (−255–255).
    #[arg(long, env = "SCAN2SHEET_BRIGHTNESS", default_value_t = 0, allow_hyphen_values = true,
          value_parser = clap::value_parser!(i32).range(-255..=255))]
    brightness: i32,

    /// Contrast adjustment (−255–255).
    #[arg(long, env = "SCAN2SHEET_CONTRAST", default_value_t = 0, allow_hyphen_values = true,
          value_parser = clap::value_parser!(i32).range(-255..=255))]
    contrast: i32,

    /// Binarisation cutoff (1–255); 0 disables.
    #[arg(long, env = "SCAN2SHEET_THRESHOLD", default_value_t = 0)]
    threshold: u8,

    /// Convert pages to grayscale before extraction.
    #[arg(long, env = "SCAN2SHEET_GRAYSCALE")]
    grayscale: bool,

    /// Clockwise rotation in degrees: 0, 90, 180 or 270.
    #[arg(long, env = "SCAN2SHEET_ROTATE", default_value_t = 0,
          value_parser = parse_rotation)]
    rotate: u32,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "SCAN2SHEET_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Max LLM output tokens per page.
    #[arg(long, env = "SCAN2SHEET_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "SCAN2SHEET_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Per-page LLM call timeout in seconds.
    #[arg(long, env = "SCAN2SHEET_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "SCAN2SHEET_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Print the session (report + pages) as JSON on stdout.
    #[arg(long, env = "SCAN2SHEET_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "SCAN2SHEET_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "SCAN2SHEET_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "SCAN2SHEET_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Combined,
    Master,
    PerPage,
}

impl From<ModeArg> for ExportMode {
    fn from(v: ModeArg) -> Self {
        match v {
            ModeArg::Combined => ExportMode::Combined,
            ModeArg::Master => ExportMode::Master,
            ModeArg::PerPage => ExportMode::PerPage,
        }
    }
}

fn parse_rotation(s: &str) -> Result<u32, String> {
    let degrees: u32 = s.trim().parse().map_err(|_| format!("not a number: '{s}'"))?;
    Rotation::from_degrees(degrees)
        .map(Rotation::degrees)
        .ok_or_else(|| format!("rotation must be 0, 90, 180 or 270 (got {degrees})"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; --verbose always wins.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
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

    let mode = ExportMode::from(cli.mode);
    if mode == ExportMode::PerPage && cli.output.is_none() {
        anyhow::bail!("--mode per-page needs -o <directory>");
    }

    let progress_cb: Option<Arc<CliProgressCallback>> =
        show_progress.then(CliProgressCallback::new);
    let config = build_config(
        &cli,
        progress_cb
            .clone()
            .map(|cb| cb as Arc<dyn ExtractionProgressCallback>),
    )
    .await?;
    let filters = build_filters(&cli)?;

    // ── Ingest ───────────────────────────────────────────────────────────
    let (files, unreadable) = resolve_inputs(&cli.inputs, config.download_timeout_secs).await;

    let store = Arc::new(SessionStore::new());
    let ingestor = Ingestor::new(
        Arc::clone(&store),
        Arc::new(PdfiumRasterizer::from_config(&config)),
    );
    let mut skipped = unreadable;
    skipped.extend(ingestor.ingest(files).await.skipped);

    if !cli.quiet {
        for skip in &skipped {
            let line = format!("{} skipped {}", yellow("⚠"), skip);
            match progress_cb {
                Some(ref cb) => cb.bar.println(line),
                None => eprintln!("{line}"),
            }
        }
    }
    if store.is_empty() {
        if let Some(ref cb) = progress_cb {
            cb.bar.finish_and_clear();
        }
        anyhow::bail!("No pages to extract: none of the inputs is a readable PDF or image");
    }

    // ── Extract + reconcile ──────────────────────────────────────────────
    let orchestrator = Orchestrator::from_config(Arc::clone(&store), &config)
        .context("Failed to set up the extraction service")?;

    let report = if filters.is_identity() {
        orchestrator.extract_all().await
    } else {
        preprocess_and_extract(&orchestrator, filters, config.progress_callback.as_ref()).await?
    };

    let pages = store.pages();
    if !cli.quiet && !cli.json {
        print_page_issues(&pages);
    }

    // ── Output ───────────────────────────────────────────────────────────
    if cli.json {
        let session = serde_json::json!({
            "report": report,
            "skipped": skipped,
            "pages": PageSummary::from_records(&pages),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&session).context("Failed to serialise session")?
        );
    }

    if let Some(ref output_path) = cli.output {
        let outcome = export_to_path(&pages, mode, output_path)
            .await
            .context("Export failed")?;
        match outcome {
            ExportOutcome::Written { paths, rows } if !cli.quiet => {
                eprintln!(
                    "{}  {}/{} pages  {} rows  {}ms  →  {}",
                    if report.all_completed() { green("✔") } else { cyan("⚠") },
                    report.completed,
                    report.launched,
                    rows,
                    report.duration_ms,
                    bold(&output_path.display().to_string()),
                );
                if paths.len() > 1 {
                    eprintln!("   {}", dim(&format!("{} files written", paths.len())));
                }
            }
            ExportOutcome::Written { .. } => {}
            ExportOutcome::NothingToExport => nothing_to_export(),
        }
    } else if !cli.json {
        let csv = match mode {
            ExportMode::Master => master_csv(&pages)?,
            _ => combined_csv(&pages)?,
        };
        match csv {
            Some(csv) => {
                let stdout = io::stdout();
                let mut handle = stdout.lock();
                handle
                    .write_all(csv.as_bytes())
                    .context("Failed to write to stdout")?;
            }
            None => nothing_to_export(),
        }

        if !cli.quiet && !show_progress {
            eprintln!(
                "Extracted {}/{} pages in {}ms",
                report.completed, report.launched, report.duration_ms
            );
        }
    }

    Ok(())
}

fn nothing_to_export() {
    eprintln!(
        "{} Nothing to export: no page was extracted successfully",
        yellow("⚠")
    );
}

/// Run filters + extraction on every page concurrently, then reconcile.
async fn preprocess_and_extract(
    orchestrator: &Orchestrator,
    filters: PreprocessFilters,
    progress: Option<&ProgressCallback>,
) -> Result<BatchReport> {
    let start = Instant::now();
    let ids = orchestrator.store().page_ids();
    if let Some(cb) = progress {
        cb.on_batch_start(ids.len());
    }

    let outcomes = join_all(
        ids.iter()
            .map(|&id| orchestrator.apply_preprocessing(id, filters)),
    )
    .await;

    let mut report = BatchReport {
        launched: ids.len(),
        ..Default::default()
    };
    for outcome in outcomes {
        match outcome.context("Pre-processing failed")? {
            ExtractOutcome::Completed { .. } => report.completed += 1,
            ExtractOutcome::Failed { .. } => report.failed += 1,
            ExtractOutcome::Discarded | ExtractOutcome::Missing => report.discarded += 1,
        }
    }

    let plan = orchestrator.reconcile();
    report.warnings = plan.warning_count();
    report.columns = plan.columns;
    report.mode_row_count = plan.mode_row_count;
    report.duration_ms = start.elapsed().as_millis() as u64;

    if let Some(cb) = progress {
        cb.on_batch_complete(report.launched, report.completed, report.warnings);
    }
    Ok(report)
}

/// List failed pages and consistency warnings on stderr.
fn print_page_issues(pages: &[PageRecord]) {
    for page in pages {
        match page.status() {
            PageStatus::Error => eprintln!(
                "  {} {}: {}",
                red("✗"),
                page.name(),
                page.error_message().unwrap_or_default()
            ),
            PageStatus::Complete => {
                if let Some(warning) = page.consistency_warning() {
                    eprintln!("  {} {}: {}", yellow("⚠"), page.name(), warning);
                }
            }
            PageStatus::Idle | PageStatus::Extracting => {}
        }
    }
}

fn build_filters(cli: &Cli) -> Result<PreprocessFilters> {
    let filters = PreprocessFilters {
        brightness: cli.brightness,
        contrast: cli.contrast,
        threshold: cli.threshold,
        grayscale: cli.grayscale,
        rotation: Rotation::from_degrees(cli.rotate).unwrap_or_default(),
    };
    filters.validate().context("Invalid pre-processing filters")?;
    Ok(filters)
}

/// Map CLI args to `SessionConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<SessionConfig> {
    let mut builder = SessionConfig::builder()
        .dpi(cli.dpi)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout);

    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

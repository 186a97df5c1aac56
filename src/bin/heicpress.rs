//! CLI binary for heicpress.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ConversionConfig`, writes artifacts into a directory and renders one
//! progress bar per file from the registry event stream.

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use heicpress::{
    registry_events, ConversionConfig, Converter, DirectorySink, FileId, FitMode, MergeMode,
    OutputKind, PageSizing, PaperSize, Registry, RegistryEvent,
};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
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

const AFTER_HELP: &str = r#"EXAMPLES:
  # One JPEG per photo, into ./out
  heicpress IMG_*.HEIC -o out

  # Shrink to fit 1600x1600, keep EXIF
  heicpress --width 1600 --height 1600 --keep-metadata IMG_0001.HEIC

  # Square thumbnails
  heicpress --width 256 --height 256 --fit crop *.heic -o thumbs

  # One PDF per photo on A4 pages
  heicpress --to document --page-size a4 *.heic -o pdfs

  # All photos merged into one PDF, in the order given
  heicpress --to document --merge scan_1.heic scan_2.heic scan_3.heic

  # Machine-readable summary
  heicpress --json --no-progress *.heic > report.json

DECODING:
  HEIC/HEIF decoding needs the system libheif and a build with
  `--features heif`. Without it only containers the `image` crate reads
  (PNG, JPEG) decode, real HEIC files fail with "unsupported image format",
  and a notice is printed at startup.

ENVIRONMENT VARIABLES:
  Every flag can also be set through HEICPRESS_<FLAG>, e.g.
  HEICPRESS_OUTPUT=out HEICPRESS_QUALITY=85 heicpress *.heic
  RUST_LOG overrides the log filter (e.g. RUST_LOG=heicpress=debug).
"#;

/// Convert HEIC/HEIF photos to JPEG images or PDF documents.
#[derive(Parser, Debug)]
#[command(
    name = "heicpress",
    version,
    about = "Convert HEIC/HEIF photos to JPEG images or PDF documents",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Source files (.heic / .heif).
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Directory to write artifacts into (created if missing).
    #[arg(short, long, env = "HEICPRESS_OUTPUT", default_value = ".")]
    output: PathBuf,

    /// Output kind for every file.
    #[arg(long, env = "HEICPRESS_TO", value_enum, default_value = "raster")]
    to: OutputArg,

    /// Merge all document outputs into one PDF (needs at least two files).
    #[arg(long, env = "HEICPRESS_MERGE")]
    merge: bool,

    /// Target width in pixels.
    #[arg(long, env = "HEICPRESS_WIDTH",
          value_parser = clap::value_parser!(u32).range(1..))]
    width: Option<u32>,

    /// Target height in pixels.
    #[arg(long, env = "HEICPRESS_HEIGHT",
          value_parser = clap::value_parser!(u32).range(1..))]
    height: Option<u32>,

    /// How the image maps into the target box.
    #[arg(long, env = "HEICPRESS_FIT", value_enum, default_value = "bound")]
    fit: FitArg,

    /// Keep EXIF metadata in JPEG outputs.
    #[arg(long, env = "HEICPRESS_KEEP_METADATA")]
    keep_metadata: bool,

    /// PDF page size.
    #[arg(long, env = "HEICPRESS_PAGE_SIZE", value_enum, default_value = "content")]
    page_size: PageSizeArg,

    /// JPEG quality (1–100).
    #[arg(long, env = "HEICPRESS_QUALITY", default_value_t = 92,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: u8,

    /// Reject sources larger than this many MiB.
    #[arg(long, env = "HEICPRESS_MAX_SIZE_MB", default_value_t = 10,
          value_parser = clap::value_parser!(u64).range(1..))]
    max_size_mb: u64,

    /// Files converted concurrently per chunk.
    #[arg(long, env = "HEICPRESS_BATCH_SIZE", default_value_t = 3)]
    batch_size: usize,

    /// Print the batch report as JSON on stdout.
    #[arg(long, env = "HEICPRESS_JSON")]
    json: bool,

    /// Disable progress bars.
    #[arg(long, env = "HEICPRESS_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "HEICPRESS_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "HEICPRESS_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum OutputArg {
    Raster,
    Document,
}

impl From<OutputArg> for OutputKind {
    fn from(v: OutputArg) -> Self {
        match v {
            OutputArg::Raster => OutputKind::Raster,
            OutputArg::Document => OutputKind::Document,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FitArg {
    Bound,
    Crop,
    Stretch,
}

impl From<FitArg> for FitMode {
    fn from(v: FitArg) -> Self {
        match v {
            FitArg::Bound => FitMode::Bound,
            FitArg::Crop => FitMode::Crop,
            FitArg::Stretch => FitMode::Stretch,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum PageSizeArg {
    Content,
    A4,
    Letter,
}

impl From<PageSizeArg> for PageSizing {
    fn from(v: PageSizeArg) -> Self {
        match v {
            PageSizeArg::Content => PageSizing::ContentSized,
            PageSizeArg::A4 => PageSizing::Standard(PaperSize::A4),
            PageSizeArg::Letter => PageSizing::Standard(PaperSize::Letter),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bars are active;
    // the bars provide all the feedback that matters to the user.
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

    if let Some(notice) = decoder_notice().filter(|_| !cli.quiet) {
        eprintln!("{} {}", cyan("⚠"), notice);
    }

    // ── Build converter ──────────────────────────────────────────────────
    let config = build_config(&cli)?;
    let converter = Converter::builder()
        .config(config)
        .sink(Arc::new(DirectorySink::new(&cli.output)))
        .build();

    // ── Ingest ───────────────────────────────────────────────────────────
    let mut accepted = 0;
    for (path, result) in cli.inputs.iter().zip(converter.add_paths(&cli.inputs).await) {
        match result {
            Ok(_) => accepted += 1,
            Err(e) if !cli.quiet => {
                eprintln!("{} {}  {}", red("✗"), path.display(), red(&e.to_string()))
            }
            Err(_) => {}
        }
    }
    if accepted == 0 {
        anyhow::bail!("No acceptable source files");
    }
    if cli.merge && !converter.merge_available() && !cli.quiet {
        eprintln!("{} --merge needs at least two document files; writing separate PDFs", cyan("⚠"));
    }

    // ── Run ──────────────────────────────────────────────────────────────
    let progress = show_progress.then(|| spawn_progress(converter.registry()));

    let report = converter.run_batch().await.context("Conversion failed")?;

    if let Some(handle) = progress {
        handle.await.context("Progress renderer failed")?;
    }

    // ── Report ───────────────────────────────────────────────────────────
    if cli.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialise report")?;
        println!("{json}");
    } else if !cli.quiet {
        let total = report.succeeded + report.failed;
        eprintln!(
            "{}  {}/{} files  {}ms  →  {}",
            if report.failed == 0 { green("✔") } else { cyan("⚠") },
            report.succeeded,
            total,
            report.duration_ms,
            bold(&cli.output.display().to_string()),
        );
        for name in &report.artifacts {
            eprintln!("   {}", dim(name));
        }
        if let Some(err) = converter.registry().last_error().filter(|_| report.failed > 0) {
            eprintln!("   last error: {}", red(&err));
        }
    }

    if report.succeeded == 0 {
        anyhow::bail!("All {} files failed", report.failed);
    }
    Ok(())
}

/// Startup notice for builds that cannot decode HEIC.
fn decoder_notice() -> Option<&'static str> {
    (!cfg!(feature = "heif")).then_some(
        "built without the `heif` feature; HEIC files will not decode \
         (rebuild with `--features heif`)",
    )
}

/// Map CLI args to `ConversionConfig`.
fn build_config(cli: &Cli) -> Result<ConversionConfig> {
    let mut builder = ConversionConfig::builder()
        .output_kind(cli.to.into())
        .merge_mode(if cli.merge {
            MergeMode::Merge
        } else {
            MergeMode::Separate
        })
        .fit_mode(cli.fit.into())
        .strip_metadata(!cli.keep_metadata)
        .page_sizing(cli.page_size.into())
        .jpeg_quality(cli.quality)
        .max_file_bytes(cli.max_size_mb * 1024 * 1024)
        .raster_batch_size(cli.batch_size)
        .document_batch_size(cli.batch_size);
    if let Some(w) = cli.width {
        builder = builder.target_width(w);
    }
    if let Some(h) = cli.height {
        builder = builder.target_height(h);
    }
    builder.build().context("Invalid configuration")
}

/// Render one bar per registered file until the batch finishes.
fn spawn_progress(registry: &Registry) -> JoinHandle<()> {
    let multi = MultiProgress::new();
    let style = ProgressStyle::with_template(
        "{spinner:.cyan} {prefix:<28.bold} [{bar:32.green/238}] {pos:>3}%  {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("█▉▊▋▌▍▎▏  ")
    .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

    let mut bars: HashMap<FileId, ProgressBar> = registry
        .entries()
        .into_iter()
        .filter(|e| !e.is_settled())
        .map(|e| {
            let bar = multi.add(ProgressBar::new(100));
            bar.set_style(style.clone());
            bar.set_prefix(e.name);
            (e.id, bar)
        })
        .collect();

    let mut events = registry_events(registry);
    tokio::spawn(async move {
        while let Some(ev) = events.next().await {
            match ev {
                RegistryEvent::Progress { id, percent } => {
                    if let Some(bar) = bars.get(&id) {
                        bar.set_position(percent as u64);
                    }
                }
                RegistryEvent::TaskFailed { id: Some(id), message } => {
                    if let Some(bar) = bars.remove(&id) {
                        bar.abandon_with_message(red(&format!("✗ {message}")));
                    }
                }
                RegistryEvent::TaskFailed { id: None, message } => {
                    let _ = multi.println(format!("{} {}", red("✗"), red(&message)));
                }
                RegistryEvent::ArtifactEmitted { name, sources, .. } => {
                    for id in sources {
                        if let Some(bar) = bars.remove(&id) {
                            bar.finish_with_message(green(&format!("✓ {name}")));
                        }
                    }
                }
                RegistryEvent::BatchFinished { .. } => break,
                _ => {}
            }
        }
        for bar in bars.into_values() {
            bar.abandon();
        }
    })
}

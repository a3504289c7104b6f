//! CLI entry point for `mbox2pdf`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{CommandFactory, Parser, Subcommand};
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};

use mbox2pdf::config::{self, parse_byte_size, ConvertOptions};
use mbox2pdf::export::font::Font;
use mbox2pdf::export::layout::PageSize;
use mbox2pdf::run::{self, Progress, RunReport};

/// Convert MBOX mail archives into one PDF per message.
///
/// INPUT may be a single archive or a directory; with a directory every
/// archive matching --glob is converted into its own subdirectory.
#[derive(Parser)]
#[command(
    name = "mbox2pdf",
    version,
    args_conflicts_with_subcommands = true,
    subcommand_negates_reqs = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// MBOX file, or a directory of archives (batch mode)
    #[arg(value_name = "INPUT", required = true)]
    input: Option<PathBuf>,

    /// Output directory (created if missing)
    #[arg(value_name = "OUTPUT", required = true)]
    output: Option<PathBuf>,

    /// Do not write attachments; list them as "not extracted"
    #[arg(long)]
    no_attachments: bool,

    /// Directory for attachments (default: OUTPUT/attachments)
    #[arg(long, value_name = "DIR")]
    attachments_dir: Option<PathBuf>,

    /// Skip attachments larger than this (e.g. 512K, 25M, 1G)
    #[arg(long, value_name = "SIZE", value_parser = parse_byte_size)]
    max_attachment_size: Option<u64>,

    /// Archive pattern in batch mode (e.g. "*.mbox", "**/*.mbox")
    #[arg(long, value_name = "PATTERN")]
    glob: Option<String>,

    /// Abort an archive after this many consecutive PDF failures
    #[arg(long, value_name = "N")]
    max_failures: Option<u32>,

    /// Page size: letter or a4
    #[arg(long, value_name = "SIZE")]
    page_size: Option<String>,

    /// TrueType font to embed (default: bundled DejaVu Sans Mono)
    #[arg(long, value_name = "TTF")]
    font: Option<PathBuf>,

    /// Hide the progress bar
    #[arg(short, long)]
    quiet: bool,

    /// Print the run report(s) as JSON
    #[arg(long)]
    json: bool,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = config::load_config();

    // Configure logging: stderr + optional log file
    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match &cli.command {
        Some(Commands::Completions { shell }) => cmd_completions(*shell),
        Some(Commands::Manpage) => cmd_manpage(),
        None => {
            let (Some(input), Some(output)) = (cli.input.clone(), cli.output.clone()) else {
                anyhow::bail!("INPUT and OUTPUT are required");
            };
            let options = build_options(&cli, &config)?;
            let quiet = cli.quiet || config.general.quiet;
            cmd_convert(&input, &output, &options, quiet, cli.json)
        }
    }
}

/// Merge config file values with command-line overrides.
fn build_options(cli: &Cli, config: &config::Config) -> anyhow::Result<ConvertOptions> {
    let mut options = ConvertOptions::from_config(config);
    if cli.no_attachments {
        options.skip_attachments = true;
    }
    if let Some(dir) = &cli.attachments_dir {
        options.attachments_dir = Some(dir.clone());
    }
    if let Some(size) = cli.max_attachment_size {
        options.size_ceiling = size;
    }
    if let Some(pattern) = &cli.glob {
        options.glob_pattern = pattern.clone();
    }
    if let Some(n) = cli.max_failures {
        options.max_consecutive_failures = n.max(1);
    }
    if let Some(name) = &cli.page_size {
        options.pdf.page_size = PageSize::from_name(name)
            .ok_or_else(|| anyhow::anyhow!("Unknown page size '{name}'. Supported: letter, a4"))?;
    }
    if let Some(path) = &cli.font {
        options.pdf.font = Arc::new(Font::load(path)?);
    }
    Ok(options)
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &config::Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    // Try to set up file logging
    let log_dir = config::log_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "mbox2pdf.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        // Fall back to stderr only
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mbox2pdf", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}

/// Progress bar fed by the orchestrator, one archive at a time.
struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    fn new(quiet: bool) -> Self {
        if quiet {
            return Self {
                bar: ProgressBar::hidden(),
            };
        }
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} Converting {msg} [{bar:40.cyan/blue}] {pos}/{len}")
                .expect("valid template")
                .progress_chars("#>-"),
        );
        Self { bar }
    }
}

impl Progress for BarProgress {
    fn start(&self, label: &str, total: u64) {
        self.bar.reset();
        self.bar.set_length(total);
        self.bar.set_message(label.to_string());
    }

    fn advance(&self, done: u64, total: u64) {
        self.bar.set_length(total.max(done));
        self.bar.set_position(done);
    }

    fn finish(&self, _report: &RunReport) {
        self.bar.finish_and_clear();
    }
}

/// Convert one archive, or every matching archive of a directory.
fn cmd_convert(
    input: &Path,
    output: &Path,
    options: &ConvertOptions,
    quiet: bool,
    json: bool,
) -> anyhow::Result<()> {
    if !input.exists() {
        anyhow::bail!("File not found: {}", input.display());
    }

    let progress = BarProgress::new(quiet || json);
    let start = Instant::now();

    let reports = if input.is_dir() {
        let reports = run::convert_batch(input, output, options, &progress)?;
        if reports.is_empty() && !json {
            println!(
                "  No archives matching '{}' in {}",
                options.glob_pattern,
                input.display()
            );
        }
        reports
    } else {
        vec![run::convert_single(input, output, options, &progress)?]
    };
    let elapsed = start.elapsed();

    if json {
        if input.is_dir() {
            println!("{}", serde_json::to_string_pretty(&reports)?);
        } else if let Some(report) = reports.first() {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
    } else {
        for report in &reports {
            print_report(report, options);
        }
        if reports.len() > 1 {
            print_batch_totals(&reports, elapsed);
        } else {
            println!("  {:<25} {:.2}s", "Elapsed", elapsed.as_secs_f64());
            println!();
        }
    }

    let incomplete = reports.iter().filter(|r| !r.is_success()).count();
    if incomplete > 0 {
        anyhow::bail!(
            "{incomplete} archive(s) did not complete; see {}",
            output.join(mbox2pdf::naming::RUN_LOG_NAME).display()
        );
    }
    Ok(())
}

/// Print one run report as a human-readable table.
fn print_report(report: &RunReport, options: &ConvertOptions) {
    let archive_size = std::fs::metadata(&report.archive)
        .map(|m| m.len())
        .unwrap_or(0);

    println!();
    println!("  {}", report.archive.display());
    println!("  {:<25} {}", "State", report.state.as_str());
    println!("  {:<25} {}", "Archive size", format_size(archive_size, BINARY));
    println!("  {:<25} {}", "Messages", report.messages);
    println!("  {:<25} {}", "Converted", report.processed);
    println!("  {:<25} {}", "Failed", report.failed);
    if report.not_processed > 0 {
        println!("  {:<25} {}", "Not processed", report.not_processed);
    }
    println!("  {:<25} {}", "Attachments saved", report.attachments_saved);
    println!(
        "  {:<25} {} (limit {})",
        "Attachments skipped",
        report.attachments_skipped,
        format_size(options.size_ceiling, BINARY)
    );
    if report.attachments_failed > 0 {
        println!("  {:<25} {}", "Attachments failed", report.attachments_failed);
    }
    println!("  {:<25} {}", "PDFs", report.pdf_dir.display());
    if let Some(error) = &report.error {
        println!("  {:<25} {}", "Error", error);
    }
}

fn print_batch_totals(reports: &[RunReport], elapsed: Duration) {
    let messages: u64 = reports.iter().map(|r| r.messages).sum();
    let processed: u64 = reports.iter().map(|r| r.processed).sum();
    let failed: u64 = reports.iter().map(|r| r.failed).sum();
    let complete = reports.iter().filter(|r| r.is_success()).count();

    println!();
    println!("  Batch complete:");
    println!("  {:<25} {}/{}", "Archives completed", complete, reports.len());
    println!("  {:<25} {}", "Messages", messages);
    println!("  {:<25} {}", "Converted", processed);
    println!("  {:<25} {}", "Failed", failed);
    println!("  {:<25} {:.2}s", "Elapsed", elapsed.as_secs_f64());
    println!();
}

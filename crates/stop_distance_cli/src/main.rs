use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing::info;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use stop_distance_core::{
    compute_batch, DistanceSettings, NoOpProgressHandler, NoticeSeverity, PatternResult,
    ProgressHandler, RoutePattern,
};

#[derive(Debug, Parser)]
#[command(name = "stop-distances")]
#[command(about = "Assign distances along route lines to the stops of route patterns")]
struct Args {
    /// JSON array of route patterns
    #[arg(short = 'i', long = "input")]
    input: PathBuf,

    /// Report path; stdout when omitted
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// JSON file with distance settings; missing fields use the geographic defaults
    #[arg(short = 's', long = "settings")]
    settings: Option<PathBuf>,

    /// Treat coordinates as planar units instead of (lon, lat) degrees
    #[arg(long = "planar", conflicts_with = "settings")]
    planar: bool,

    #[arg(long = "threads")]
    threads: Option<usize>,

    #[arg(short = 'p', long = "pretty")]
    pretty: bool,

    #[arg(long = "no-progress", alias = "no_progress")]
    no_progress: bool,

    /// Log strategy selection and search statistics
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

#[derive(Debug, Serialize)]
struct BatchReport<'a> {
    summary: BatchSummary,
    settings: &'a DistanceSettings,
    results: &'a [PatternResult],
}

#[derive(Debug, Serialize)]
struct BatchSummary {
    patterns: usize,
    failed_patterns: usize,
    strategies: BTreeMap<String, usize>,
    errors: usize,
    warnings: usize,
    infos: usize,
    elapsed_seconds: f64,
    threads: usize,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    if let Some(threads) = args.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("configure worker threads")?;
    }

    let settings = load_settings(&args)?;
    let patterns = load_patterns(&args.input)?;
    info!("{} route patterns loaded from {}", patterns.len(), args.input.display());

    let started_at = Instant::now();
    let results = if args.no_progress {
        compute_batch(&patterns, &settings, &NoOpProgressHandler)
    } else {
        let progress = IndicatifHandler::new();
        let results = compute_batch(&patterns, &settings, &progress);
        progress.finish();
        results
    };
    let elapsed = started_at.elapsed();

    let summary = summarize(&results, elapsed.as_secs_f64());
    info!(
        "{} patterns in {:.2}s ({} failed, {} warnings)",
        summary.patterns, summary.elapsed_seconds, summary.failed_patterns, summary.warnings
    );
    let report = BatchReport {
        summary,
        settings: &settings,
        results: &results,
    };
    write_report(&args, &report)
}

fn load_settings(args: &Args) -> anyhow::Result<DistanceSettings> {
    match &args.settings {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("read settings {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("parse settings {}", path.display()))
        }
        None if args.planar => Ok(DistanceSettings::planar()),
        None => Ok(DistanceSettings::geographic()),
    }
}

fn load_patterns(path: &Path) -> anyhow::Result<Vec<RoutePattern>> {
    let file =
        std::fs::File::open(path).with_context(|| format!("open input {}", path.display()))?;
    serde_json::from_reader(std::io::BufReader::new(file))
        .with_context(|| format!("parse route patterns from {}", path.display()))
}

fn summarize(results: &[PatternResult], elapsed_seconds: f64) -> BatchSummary {
    let mut strategies = BTreeMap::new();
    let (mut errors, mut warnings, mut infos) = (0, 0, 0);
    for result in results {
        if let Some(outcome) = &result.outcome {
            let name = serde_json::to_value(outcome.strategy)
                .ok()
                .and_then(|value| value.as_str().map(str::to_string))
                .unwrap_or_else(|| format!("{:?}", outcome.strategy));
            *strategies.entry(name).or_insert(0) += 1;
        }
        errors += result.notices.count(NoticeSeverity::Error);
        warnings += result.notices.count(NoticeSeverity::Warning);
        infos += result.notices.count(NoticeSeverity::Info);
    }
    BatchSummary {
        patterns: results.len(),
        failed_patterns: results.iter().filter(|result| result.outcome.is_none()).count(),
        strategies,
        errors,
        warnings,
        infos,
        elapsed_seconds,
        threads: rayon::current_num_threads(),
    }
}

fn write_report(args: &Args, report: &BatchReport<'_>) -> anyhow::Result<()> {
    let json = if args.pretty {
        serde_json::to_string_pretty(report)
    } else {
        serde_json::to_string(report)
    }
    .context("serialize report")?;

    match &args.output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create output dir {}", parent.display()))?;
            }
            std::fs::write(path, format!("{}\n", json))
                .with_context(|| format!("write {}", path.display()))?;
            info!("report written to {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

use indicatif::{ProgressBar, ProgressStyle};

struct IndicatifHandler {
    pb: ProgressBar,
}

impl IndicatifHandler {
    fn new() -> Self {
        let pb = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}",
        ) {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb.set_message("Waiting for patterns...");
        Self { pb }
    }

    fn finish(&self) {
        self.pb.finish_with_message("done");
    }
}

impl ProgressHandler for IndicatifHandler {
    fn set_total_patterns(&self, count: usize) {
        self.pb.set_length(count as u64);
        self.pb.set_message("Computing distances...");
    }

    fn on_start_pattern(&self, pattern_id: &str) {
        self.pb.set_message(pattern_id.to_string());
    }

    fn on_finish_pattern(&self, _pattern_id: &str) {
        self.pb.inc(1);
    }
}

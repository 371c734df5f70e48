//! Aptamyx: aptamer candidate generation and ranking.
//! Entry point for the command-line binary.

mod config;

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use aptamyx_molecules::pipeline::{
    AptamerPipeline, PipelineProgress, PipelineReport, PipelineRequest,
};
use aptamyx_molecules::table::CandidateRecord;

/// Aptamyx - aptamer candidate generator
#[derive(Parser, Debug)]
#[command(name = "aptamyx")]
#[command(
    author,
    version,
    about = "Generate, fold, dock and rank aptamer candidates",
    long_about = None
)]
struct Cli {
    /// Target protein structure (PDB)
    #[arg(short, long)]
    target: PathBuf,

    /// Sequence length (defaults to generation.default_length)
    #[arg(short, long)]
    length: Option<usize>,

    /// Number of candidates (defaults to generation.default_count)
    #[arg(short = 'n', long)]
    count: Option<usize>,

    /// Skip affinity estimation
    #[arg(long)]
    no_docking: bool,

    /// Build 3-D models with SimRNA (synthetic helix on failure)
    #[arg(long = "detailed-3d")]
    detailed_3d: bool,

    /// CSV output path
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// JSON run report path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Config file (overrides APTAMYX_CONFIG and ./aptamyx.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Random seed for candidate generation
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("aptamyx=debug,aptamyx_molecules=debug,info")),
        )
        .init();

    let cli = Cli::parse();
    info!("Aptamyx {}", env!("CARGO_PKG_VERSION"));

    let mut config = config::Config::load(cli.config.as_deref())?;
    if cli.seed.is_some() {
        config.pipeline.generation.seed = cli.seed;
    }
    let output = cli.output.clone().unwrap_or_else(|| config.output.csv_path.clone());
    let report_path = cli.report.clone().or_else(|| config.output.report_path.clone());

    let request = PipelineRequest {
        target: cli.target.clone(),
        length: cli.length.unwrap_or(config.pipeline.generation.default_length),
        count: cli.count.unwrap_or(config.pipeline.generation.default_count),
        docking: !cli.no_docking,
        detailed_3d: cli.detailed_3d,
    };

    let pipeline = AptamerPipeline::new(config.pipeline.clone())
        .context("invalid pipeline configuration")?;
    info!(folding = pipeline.predictor().engine_name(), "Pipeline ready");

    let (progress_tx, progress_rx) = broadcast::channel(256);
    let progress_task = tokio::spawn(log_progress(progress_rx));

    let result = pipeline.run(&request, Some(progress_tx)).await;
    // sender is dropped with the run, which ends the logger
    let _ = progress_task.await;
    let report = result.context("pipeline run rejected")?;

    summarize(&report, config.output.top_n);

    report
        .table
        .write_csv(&output)
        .with_context(|| format!("writing {}", output.display()))?;
    info!(path = %output.display(), rows = report.table.len(), "Candidates exported");

    if let Some(path) = report_path {
        std::fs::write(&path, report.to_json()?)
            .with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), "Run report written");
    }

    Ok(())
}

async fn log_progress(mut rx: broadcast::Receiver<PipelineProgress>) {
    loop {
        match rx.recv().await {
            Ok(event) => debug!(
                stage = ?event.stage,
                completed = event.completed,
                total = event.total,
                "{}",
                event.message
            ),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "Progress logger lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn summarize(report: &PipelineReport, top_n: usize) {
    info!(
        run_id = %report.run_id,
        status = ?report.status,
        duration_ms = report.duration_ms,
        "Run finished"
    );
    for stage in report.degraded_stages() {
        warn!(
            stage = ?stage.stage,
            status = ?stage.status,
            "{}",
            stage.message.as_deref().unwrap_or("")
        );
    }
    for diagnostic in &report.diagnostics {
        info!(
            sequence = %diagnostic.sequence,
            dir = %diagnostic.path.display(),
            files = ?diagnostic.files,
            "Simulation work directory"
        );
    }

    println!("Top {} candidates:", top_n.min(report.table.len()));
    println!(
        "{:<4} {:<42} {:>8} {:>9} {:>8}",
        "rank", "sequence", "mfe", "affinity", "score"
    );
    for (rank, row) in report.table.top(top_n).iter().enumerate() {
        println!("{}", format_row(rank + 1, row));
    }
}

fn format_row(rank: usize, row: &CandidateRecord) -> String {
    let num = |value: Option<f64>| value.map(|v| format!("{v:.2}")).unwrap_or_else(|| "-".into());
    format!(
        "{:<4} {:<42} {:>8} {:>9} {:>8}",
        rank,
        row.sequence.as_str(),
        num(row.mfe),
        num(row.affinity),
        num(row.score)
    )
}

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Result, anyhow};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use titan_nrl::config::{PipelineConfig, Task, parse_years};
use titan_nrl::metrics::HoldoutMetrics;
use titan_nrl::pipeline::{Mode, RunSummary, run};

/// Rugby league match/player reconciliation and feature build
#[derive(Parser)]
#[command(name = "titan")]
#[command(about = "Flatten season JSON, build team-round features, fit impact and prediction forests")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write flattened match and player CSVs
    Flatten(RunArgs),
    /// Build the training table and per-statistic impact scores
    Impact(RunArgs),
    /// Impact run plus predictions for fixtures without scores
    Predict(RunArgs),
}

#[derive(Args, Clone)]
struct RunArgs {
    /// Root of `<COMP>/<year>/` input folders
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Output directory
    #[arg(long)]
    out_dir: Option<PathBuf>,
    #[arg(long)]
    competition: Option<String>,
    /// `2024`, `2019-2025`, or `2019,2021,2024`
    #[arg(long)]
    years: Option<String>,
    /// Replace non-empty output files
    #[arg(long)]
    overwrite: bool,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    trees: Option<usize>,
    /// Drop statistic columns missing from more than this share of rows
    #[arg(long)]
    missing_threshold: Option<f64>,
    /// `regression` (margin) or `classification` (home win)
    #[arg(long)]
    task: Option<String>,
}

impl RunArgs {
    fn apply(self, cfg: &mut PipelineConfig) -> Result<()> {
        if let Some(dir) = self.data_dir {
            cfg.data_dir = dir;
        }
        if let Some(dir) = self.out_dir {
            cfg.out_dir = dir;
        }
        if let Some(comp) = self.competition {
            cfg.competition = comp;
        }
        if let Some(raw) = self.years {
            let years = parse_years(&raw);
            if years.is_empty() {
                return Err(anyhow!("could not parse --years {raw:?}"));
            }
            cfg.years = years;
        }
        if self.overwrite {
            cfg.overwrite = true;
        }
        if let Some(seed) = self.seed {
            cfg.seed = seed;
        }
        if let Some(trees) = self.trees {
            cfg.forest.trees = trees;
        }
        if let Some(threshold) = self.missing_threshold {
            cfg.missing_threshold = threshold;
        }
        if let Some(raw) = self.task {
            cfg.task = Task::parse(&raw).ok_or_else(|| anyhow!("unknown --task {raw:?}"))?;
        }
        Ok(())
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    match run_cli(Cli::parse()) {
        Ok(summary) => {
            print_summary(&summary);
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("[ERROR] {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run_cli(cli: Cli) -> Result<RunSummary> {
    let (mode, args, default_task) = match cli.command {
        Commands::Flatten(args) => (Mode::Flatten, args, Task::Regression),
        Commands::Impact(args) => (Mode::Impact, args, Task::Regression),
        Commands::Predict(args) => (Mode::Predict, args, Task::Classification),
    };
    let mut cfg = PipelineConfig::from_env_with_task(default_task);
    args.apply(&mut cfg)?;
    run(&cfg, mode)
}

fn print_summary(summary: &RunSummary) {
    println!("== titan {} ==", summary.mode.label());
    for stage in &summary.stages {
        println!(
            "{:<18} processed={:<6} flagged={:<6} dropped={}",
            stage.stage, stage.processed, stage.flagged, stage.dropped
        );
    }
    if let Some(est) = &summary.estimate {
        println!(
            "task={} seed={} trees={} train={} test={}",
            est.task.label(),
            est.seed,
            est.forest.n_trees(),
            est.train_size,
            est.test_size
        );
        match est.metrics {
            Some(HoldoutMetrics::Regression(m)) => {
                println!("held-out R2={:.4} MAE={:.2} RMSE={:.2}", m.r2, m.mae, m.rmse)
            }
            Some(HoldoutMetrics::Classification(m)) => println!(
                "held-out accuracy={:.4} precision={:.4} recall={:.4}",
                m.accuracy, m.precision, m.recall
            ),
            None => println!("held-out metrics unavailable (too few rows)"),
        }
        let mut ranked = est.impact.clone();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        for score in ranked.iter().take(10) {
            println!("  {:<28} {:.4}", score.stat, score.score);
        }
    }
    if !summary.predictions.is_empty() {
        println!("predicted {} fixtures", summary.predictions.len());
    }
    for export in &summary.exports {
        println!("wrote {} rows -> {}", export.rows, export.path.display());
    }
}

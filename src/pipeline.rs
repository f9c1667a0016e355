use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::aggregate::{AggregateTable, DroppedColumn, aggregate_players};
use crate::config::{PipelineConfig, Task};
use crate::error::PipelineError;
use crate::estimate::{Estimate, FeatureQuality, ImpactScore, Prediction, fit_estimator, predict_fixtures};
use crate::export::{
    ExportPlan, ExportReport, commit_all, impact_table, match_table, plan_csv, plan_json,
    player_table, prediction_table, training_table,
};
use crate::ingest::{IngestSummary, ingest_all};
use crate::join::{TrainingRow, join_matches};
use crate::metrics::HoldoutMetrics;
use crate::normalize::{MatchRecord, PlayerStatRow, normalize_matches, normalize_players};
use crate::report::StageReport;

pub const MANIFEST_VERSION: u32 = 1;
pub const MANIFEST_FILE: &str = "run_manifest.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Flattened match and player CSVs only.
    Flatten,
    /// Training table, impact scores, manifest.
    Impact,
    /// Everything `Impact` writes plus fixture predictions.
    Predict,
}

impl Mode {
    pub fn label(self) -> &'static str {
        match self {
            Mode::Flatten => "flatten",
            Mode::Impact => "impact",
            Mode::Predict => "predict",
        }
    }
}

/// Normalized inputs, kept apart from the model stages so tests can build a
/// training table from in-memory records.
#[derive(Debug, Clone)]
pub struct Flattened {
    pub matches: Vec<MatchRecord>,
    pub players: Vec<PlayerStatRow>,
    pub reports: Vec<StageReport>,
}

#[derive(Debug, Clone)]
pub struct TrainingTable {
    pub aggregates: AggregateTable,
    pub rows: Vec<TrainingRow>,
    pub reports: Vec<StageReport>,
}

pub fn flatten(ingested: &IngestSummary, cfg: &PipelineConfig) -> Flattened {
    let ingest_report = ingested.report();
    ingest_report.log();
    let (matches, match_report) = normalize_matches(&ingested.matches);
    let (players, player_report) = normalize_players(&ingested.players, cfg);
    match_report.log();
    player_report.log();
    Flattened {
        matches,
        players,
        reports: vec![ingest_report, match_report, player_report],
    }
}

pub fn build_training_table(
    matches: &[MatchRecord],
    players: &[PlayerStatRow],
    missing_threshold: f64,
) -> TrainingTable {
    let (aggregates, agg_report) = aggregate_players(players, missing_threshold);
    agg_report.log();
    let (rows, join_report) = join_matches(matches, &aggregates);
    join_report.log();
    TrainingTable {
        aggregates,
        rows,
        reports: vec![agg_report, join_report],
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunManifest {
    pub version: u32,
    pub generated_at: String,
    pub mode: String,
    pub competition: String,
    pub years: Vec<i32>,
    pub task: Task,
    pub seed: u64,
    pub trees: usize,
    pub missing_threshold: f64,
    pub test_fraction: f64,
    pub train_size: usize,
    pub test_size: usize,
    pub metrics: Option<HoldoutMetrics>,
    pub retained_columns: Vec<String>,
    pub dropped_columns: Vec<DroppedColumn>,
    pub impact_scores: Vec<ImpactScore>,
    pub feature_quality: FeatureQuality,
    pub stages: Vec<StageReport>,
    pub ingest_errors: Vec<String>,
    pub outputs: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub mode: Mode,
    pub stages: Vec<StageReport>,
    pub exports: Vec<ExportReport>,
    pub estimate: Option<Estimate>,
    pub predictions: Vec<Prediction>,
}

fn output_path(cfg: &PipelineConfig, stem: &str) -> PathBuf {
    cfg.out_dir.join(format!("{stem}_{}.csv", cfg.year_span_label()))
}

/// Runs every stage the mode needs, renders all outputs, then commits them
/// together so a refused overwrite leaves nothing half-written.
pub fn run(cfg: &PipelineConfig, mode: Mode) -> Result<RunSummary> {
    cfg.validate()?;
    info!(
        mode = mode.label(),
        competition = %cfg.competition,
        years = ?cfg.years,
        data_dir = %cfg.data_dir.display(),
        out_dir = %cfg.out_dir.display(),
        "pipeline start"
    );

    let ingested = ingest_all(cfg).context("ingest season files")?;
    let flat = flatten(&ingested, cfg);
    if flat.matches.is_empty() && flat.players.is_empty() {
        return Err(PipelineError::NoData {
            years: cfg.years.clone(),
        }
        .into());
    }
    let mut stages = flat.reports.clone();
    let mut plans: Vec<ExportPlan> = vec![
        plan_csv(&output_path(cfg, "all_matches"), &match_table(&flat.matches))?,
        plan_csv(&output_path(cfg, "all_players"), &player_table(&flat.players))?,
    ];

    if mode == Mode::Flatten {
        let exports = commit_all(&plans, cfg.overwrite)?;
        return Ok(RunSummary {
            mode,
            stages,
            exports,
            estimate: None,
            predictions: Vec::new(),
        });
    }

    let training = build_training_table(&flat.matches, &flat.players, cfg.missing_threshold);
    stages.extend(training.reports.iter().cloned());
    plans.push(plan_csv(
        &output_path(cfg, "training_table"),
        &training_table(&training.rows, &training.aggregates.columns),
    )?);

    let estimate = fit_estimator(&training.rows, &training.aggregates, cfg).context("estimate impact")?;
    plans.push(plan_csv(
        &output_path(cfg, "player_impact_scores"),
        &impact_table(&estimate.impact),
    )?);

    let mut predictions = Vec::new();
    if mode == Mode::Predict {
        let (preds, report) = predict_fixtures(&estimate, &training.rows, &training.aggregates);
        report.log();
        stages.push(report);
        plans.push(plan_csv(&output_path(cfg, "predictions"), &prediction_table(&preds))?);
        predictions = preds;
    }

    let mut outputs: Vec<PathBuf> = plans.iter().map(|p| p.path.clone()).collect();
    let manifest_path = cfg.out_dir.join(MANIFEST_FILE);
    outputs.push(manifest_path.clone());
    let manifest = RunManifest {
        version: MANIFEST_VERSION,
        generated_at: chrono::Utc::now().to_rfc3339(),
        mode: mode.label().to_string(),
        competition: cfg.competition.clone(),
        years: cfg.years.clone(),
        task: estimate.task,
        seed: estimate.seed,
        trees: estimate.forest.n_trees(),
        missing_threshold: cfg.missing_threshold,
        test_fraction: cfg.test_fraction,
        train_size: estimate.train_size,
        test_size: estimate.test_size,
        metrics: estimate.metrics,
        retained_columns: training.aggregates.columns.clone(),
        dropped_columns: training.aggregates.dropped_columns.clone(),
        impact_scores: estimate.impact.clone(),
        feature_quality: estimate.quality.clone(),
        stages: stages.clone(),
        ingest_errors: ingested.errors.clone(),
        outputs,
    };
    plans.push(plan_json(&manifest_path, &manifest)?);

    let exports = commit_all(&plans, cfg.overwrite)?;
    Ok(RunSummary {
        mode,
        stages,
        exports,
        estimate: Some(estimate),
        predictions,
    })
}

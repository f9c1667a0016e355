use std::collections::BTreeMap;

use anyhow::{Context, Result};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::Serialize;
use tracing::{info, warn};

use crate::aggregate::{AggregateTable, TeamRoundAggregate};
use crate::config::{PipelineConfig, Task};
use crate::error::PipelineError;
use crate::forest::RandomForest;
use crate::join::TrainingRow;
use crate::metrics::{HoldoutMetrics, evaluate_classification, evaluate_regression, predicts_home_win};
use crate::report::StageReport;

pub const HOME_PREFIX: &str = "Home_";
pub const AWAY_PREFIX: &str = "Away_";

#[derive(Debug, Clone, Serialize)]
pub struct ZeroFill {
    pub column: String,
    pub cells: usize,
}

/// Cells that were unobserved upstream and zero-filled for fitting.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FeatureQuality {
    pub rows: usize,
    pub zero_filled_cells: usize,
    pub columns: Vec<ZeroFill>,
}

impl FeatureQuality {
    pub fn notes(&self) -> Vec<String> {
        self.columns
            .iter()
            .map(|z| {
                format!(
                    "{}: {} of {} cells unobserved, filled with 0",
                    z.column, z.cells, self.rows
                )
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct DesignMatrix {
    /// Base statistic names; the matrix has `Home_` then `Away_` copies.
    pub stats: Vec<String>,
    pub feature_names: Vec<String>,
    pub x: Vec<Vec<f64>>,
    pub margins: Vec<f64>,
    pub home_wins: Vec<bool>,
    /// Index into the training rows each matrix row came from.
    pub source_rows: Vec<usize>,
    pub quality: FeatureQuality,
}

impl DesignMatrix {
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn targets(&self, task: Task) -> Vec<f64> {
        match task {
            Task::Regression => self.margins.clone(),
            Task::Classification => self
                .home_wins
                .iter()
                .map(|w| if *w { 1.0 } else { 0.0 })
                .collect(),
        }
    }
}

pub fn feature_names(stats: &[String]) -> Vec<String> {
    stats
        .iter()
        .map(|s| format!("{HOME_PREFIX}{s}"))
        .chain(stats.iter().map(|s| format!("{AWAY_PREFIX}{s}")))
        .collect()
}

/// Home values then away values; the second item lists zero-filled positions.
pub fn feature_vector(home: &TeamRoundAggregate, away: &TeamRoundAggregate) -> (Vec<f64>, Vec<usize>) {
    let mut filled = Vec::new();
    let values = home
        .values
        .iter()
        .chain(away.values.iter())
        .enumerate()
        .map(|(i, v)| {
            v.unwrap_or_else(|| {
                filled.push(i);
                0.0
            })
        })
        .collect();
    (values, filled)
}

/// Eligible rows only. Missing cells become 0 here and nowhere earlier.
pub fn build_design_matrix(rows: &[TrainingRow], table: &AggregateTable) -> Result<DesignMatrix> {
    let eligible: Vec<(usize, &TrainingRow)> =
        rows.iter().enumerate().filter(|(_, r)| r.is_eligible()).collect();
    if eligible.is_empty() {
        let incomplete = rows.iter().filter(|r| r.join_incomplete).count();
        let fixtures = rows.iter().filter(|r| r.margin().is_none()).count();
        return Err(PipelineError::NoTrainingData(format!(
            "0 of {} joined matches are completed with both sides resolved \
             ({incomplete} join-incomplete, {fixtures} without scores)",
            rows.len()
        ))
        .into());
    }
    if table.columns.is_empty() {
        return Err(PipelineError::NoFeatureColumns.into());
    }

    let stats = table.columns.clone();
    let names = feature_names(&stats);
    let mut fill_counts = vec![0usize; names.len()];
    let mut dm = DesignMatrix {
        stats,
        feature_names: names,
        x: Vec::with_capacity(eligible.len()),
        margins: Vec::with_capacity(eligible.len()),
        home_wins: Vec::with_capacity(eligible.len()),
        source_rows: Vec::with_capacity(eligible.len()),
        quality: FeatureQuality::default(),
    };

    for (idx, row) in eligible {
        let (Some(home), Some(away), Some(margin)) = (&row.home, &row.away, row.margin()) else {
            continue;
        };
        let (values, filled) = feature_vector(home, away);
        for i in filled {
            fill_counts[i] += 1;
        }
        dm.x.push(values);
        dm.margins.push(f64::from(margin));
        dm.home_wins.push(margin > 0);
        dm.source_rows.push(idx);
    }

    dm.quality.rows = dm.x.len();
    dm.quality.zero_filled_cells = fill_counts.iter().sum();
    dm.quality.columns = dm
        .feature_names
        .iter()
        .zip(&fill_counts)
        .filter(|(_, n)| **n > 0)
        .map(|(name, n)| ZeroFill {
            column: name.clone(),
            cells: *n,
        })
        .collect();
    Ok(dm)
}

/// Seeded shuffle, then `ceil(n * test_fraction)` rows held out, always
/// leaving at least one training row.
pub fn split_holdout(n: usize, test_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut order: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    order.shuffle(&mut rng);
    let test = ((n as f64) * test_fraction).ceil() as usize;
    let test = test.min(n.saturating_sub(1));
    let held = order.split_off(n - test);
    (order, held)
}

#[derive(Debug, Clone, Serialize)]
pub struct ImpactScore {
    pub stat: String,
    pub score: f64,
    pub home_importance: f64,
    pub away_importance: f64,
}

/// Mean of each statistic's home and away importance.
pub fn impact_scores(stats: &[String], importances: &[f64]) -> Vec<ImpactScore> {
    let n = stats.len();
    stats
        .iter()
        .enumerate()
        .map(|(i, stat)| {
            let home = importances.get(i).copied().unwrap_or(0.0);
            let away = importances.get(i + n).copied().unwrap_or(0.0);
            ImpactScore {
                stat: stat.clone(),
                score: (home + away) / 2.0,
                home_importance: home,
                away_importance: away,
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct Estimate {
    pub task: Task,
    pub seed: u64,
    pub forest: RandomForest,
    pub train_size: usize,
    pub test_size: usize,
    pub metrics: Option<HoldoutMetrics>,
    pub impact: Vec<ImpactScore>,
    pub quality: FeatureQuality,
    pub stats: Vec<String>,
}

pub fn fit_estimator(rows: &[TrainingRow], table: &AggregateTable, cfg: &PipelineConfig) -> Result<Estimate> {
    let dm = build_design_matrix(rows, table)?;
    let y = dm.targets(cfg.task);
    let (train, test) = split_holdout(dm.len(), cfg.test_fraction, cfg.seed);

    let train_x: Vec<Vec<f64>> = train.iter().map(|&i| dm.x[i].clone()).collect();
    let train_y: Vec<f64> = train.iter().map(|&i| y[i]).collect();
    info!(
        task = cfg.task.label(),
        seed = cfg.seed,
        trees = cfg.forest.trees,
        features = dm.feature_names.len(),
        train = train.len(),
        test = test.len(),
        "fitting forest"
    );
    let forest = RandomForest::fit(&train_x, &train_y, cfg.task, &cfg.forest, cfg.seed)
        .context("fit random forest")?;

    let metrics = if test.is_empty() {
        warn!("no held-out rows; skipping goodness-of-fit");
        None
    } else {
        let preds: Vec<f64> = test.iter().map(|&i| forest.predict(&dm.x[i])).collect();
        Some(match cfg.task {
            Task::Regression => {
                let actual: Vec<f64> = test.iter().map(|&i| y[i]).collect();
                HoldoutMetrics::Regression(evaluate_regression(&actual, &preds))
            }
            Task::Classification => {
                let actual: Vec<bool> = test.iter().map(|&i| dm.home_wins[i]).collect();
                HoldoutMetrics::Classification(evaluate_classification(&actual, &preds))
            }
        })
    };
    match &metrics {
        Some(HoldoutMetrics::Regression(m)) => {
            info!(r2 = m.r2, mae = m.mae, rmse = m.rmse, samples = m.samples, "held-out fit")
        }
        Some(HoldoutMetrics::Classification(m)) => info!(
            accuracy = m.accuracy,
            precision = m.precision,
            recall = m.recall,
            samples = m.samples,
            "held-out fit"
        ),
        None => {}
    }
    for note in dm.quality.notes().iter().take(8) {
        warn!("feature quality: {note}");
    }

    let impact = impact_scores(&dm.stats, forest.feature_importances());
    Ok(Estimate {
        task: cfg.task,
        seed: cfg.seed,
        forest,
        train_size: train.len(),
        test_size: test.len(),
        metrics,
        impact,
        quality: dm.quality,
        stats: dm.stats,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FeatureSource {
    SameRound,
    LatestPrior,
}

impl FeatureSource {
    pub fn label(self) -> &'static str {
        match self {
            FeatureSource::SameRound => "SameRound",
            FeatureSource::LatestPrior => "LatestPrior",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub season: i32,
    pub round: u32,
    pub home_team: String,
    pub away_team: String,
    pub predicted_winner: String,
    pub confidence: f64,
    pub predicted_margin: Option<f64>,
    pub source: FeatureSource,
}

/// Predicts every joined row without scores.
pub fn predict_fixtures(
    estimate: &Estimate,
    rows: &[TrainingRow],
    table: &AggregateTable,
) -> (Vec<Prediction>, StageReport) {
    let mut report = StageReport::new("predict");
    let mut out = Vec::new();
    let mut filled_by_fixture: BTreeMap<String, usize> = BTreeMap::new();

    for row in rows.iter().filter(|r| r.margin().is_none()) {
        report.processed += 1;
        let rec = &row.record;
        let mut source = FeatureSource::SameRound;
        let mut side = |joined: &Option<TeamRoundAggregate>, key: String| {
            joined.clone().or_else(|| {
                let prior = table.latest_before(rec.season, rec.round, &key).cloned();
                if prior.is_some() {
                    source = FeatureSource::LatestPrior;
                }
                prior
            })
        };
        let home = side(&row.home, rec.home_key());
        let away = side(&row.away, rec.away_key());
        let (Some(home), Some(away)) = (home, away) else {
            report.drop_row(format!(
                "{} r{} {} v {}: no aggregate available for one side",
                rec.season, rec.round, rec.home_team, rec.away_team
            ));
            continue;
        };

        let (features, filled) = feature_vector(&home, &away);
        if !filled.is_empty() {
            filled_by_fixture.insert(
                format!("{} r{} {} v {}", rec.season, rec.round, rec.home_team, rec.away_team),
                filled.len(),
            );
        }

        let (home_wins, confidence, predicted_margin) = match estimate.task {
            Task::Classification => {
                let p = estimate.forest.predict(&features);
                (predicts_home_win(p), p.max(1.0 - p), None)
            }
            Task::Regression => {
                let trees = estimate.forest.tree_predictions(&features);
                let margin = trees.iter().sum::<f64>() / trees.len().max(1) as f64;
                let agree = trees.iter().filter(|t| (**t >= 0.0) == (margin >= 0.0)).count();
                (margin > 0.0, agree as f64 / trees.len().max(1) as f64, Some(margin))
            }
        };
        let predicted_winner = if home_wins { &rec.home_team } else { &rec.away_team };

        out.push(Prediction {
            season: rec.season,
            round: rec.round,
            home_team: rec.home_team.clone(),
            away_team: rec.away_team.clone(),
            predicted_winner: predicted_winner.clone(),
            confidence,
            predicted_margin,
            source,
        });
    }

    for (fixture, cells) in filled_by_fixture {
        report.flag(format!("{fixture}: {cells} unobserved feature cells filled with 0"));
    }
    (out, report)
}

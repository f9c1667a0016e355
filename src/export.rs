use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tracing::{info, warn};

use crate::aggregate::TeamRoundAggregate;
use crate::error::PipelineError;
use crate::estimate::{ImpactScore, Prediction, feature_names};
use crate::join::TrainingRow;
use crate::normalize::{MatchRecord, PlayerStatRow};

/// A fully rendered output file that has not been written yet.
#[derive(Debug, Clone)]
pub struct ExportPlan {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
    pub rows: usize,
    /// Size of whatever is already at `path`.
    pub existing_bytes: Option<u64>,
}

impl ExportPlan {
    pub fn overwrites_data(&self) -> bool {
        self.existing_bytes.is_some_and(|b| b > 0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportReport {
    pub path: PathBuf,
    pub rows: usize,
    pub bytes: usize,
    pub overwrote: bool,
}

/// Tabular output: header plus string cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub header: Vec<String>,
    pub records: Vec<Vec<String>>,
}

pub fn plan_csv(path: &Path, table: &Table) -> Result<ExportPlan> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.write_record(&table.header)
        .with_context(|| format!("render header for {}", path.display()))?;
    for record in &table.records {
        wtr.write_record(record)
            .with_context(|| format!("render row for {}", path.display()))?;
    }
    let bytes = wtr
        .into_inner()
        .map_err(|err| anyhow!("flush csv for {}: {}", path.display(), err.error()))?;
    Ok(ExportPlan {
        path: path.to_path_buf(),
        bytes,
        rows: table.records.len(),
        existing_bytes: existing_size(path),
    })
}

pub fn plan_json<T: Serialize>(path: &Path, value: &T) -> Result<ExportPlan> {
    let bytes = serde_json::to_vec_pretty(value)
        .with_context(|| format!("serialize {}", path.display()))?;
    Ok(ExportPlan {
        path: path.to_path_buf(),
        bytes,
        rows: 1,
        existing_bytes: existing_size(path),
    })
}

fn existing_size(path: &Path) -> Option<u64> {
    fs::metadata(path).ok().map(|m| m.len())
}

/// Refuses every plan if any would clobber data without `overwrite`; only
/// then writes each one through a temp file and rename.
pub fn commit_all(plans: &[ExportPlan], overwrite: bool) -> Result<Vec<ExportReport>> {
    if !overwrite && let Some(plan) = plans.iter().find(|p| p.overwrites_data()) {
        return Err(PipelineError::DestinationExists {
            path: plan.path.clone(),
            bytes: plan.existing_bytes.unwrap_or(0),
        }
        .into());
    }
    plans.iter().map(|plan| commit(plan, overwrite)).collect()
}

pub fn commit(plan: &ExportPlan, overwrite: bool) -> Result<ExportReport> {
    let overwrote = plan.overwrites_data();
    if overwrote {
        if !overwrite {
            return Err(PipelineError::DestinationExists {
                path: plan.path.clone(),
                bytes: plan.existing_bytes.unwrap_or(0),
            }
            .into());
        }
        warn!(
            path = %plan.path.display(),
            existing_bytes = plan.existing_bytes.unwrap_or(0),
            "overwriting existing output"
        );
    }

    if let Some(parent) = plan.path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("create output dir {}", parent.display()))?;
    }
    let mut tmp = plan.path.clone().into_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, &plan.bytes).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, &plan.path).with_context(|| format!("swap {}", plan.path.display()))?;

    info!(path = %plan.path.display(), rows = plan.rows, bytes = plan.bytes.len(), "wrote output");
    Ok(ExportReport {
        path: plan.path.clone(),
        rows: plan.rows,
        bytes: plan.bytes.len(),
        overwrote,
    })
}

fn cell<T: ToString>(v: Option<T>) -> String {
    v.map(|v| v.to_string()).unwrap_or_default()
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

pub fn match_table(matches: &[MatchRecord]) -> Table {
    let header = strings(&[
        "Year",
        "Round",
        "HomeTeam",
        "HomeScore",
        "AwayTeam",
        "AwayScore",
        "Venue",
        "Date",
        "MatchCentreURL",
        "data_issues",
    ]);
    let records = matches
        .iter()
        .map(|m| {
            vec![
                m.season.to_string(),
                m.round.to_string(),
                m.home_team.clone(),
                cell(m.home_score),
                m.away_team.clone(),
                cell(m.away_score),
                m.venue.clone().unwrap_or_default(),
                m.date.clone().unwrap_or_default(),
                m.url.clone().unwrap_or_default(),
                m.data_issues.join("; "),
            ]
        })
        .collect();
    Table { header, records }
}

/// One column per statistic seen on any row, first-seen order; absent cells
/// stay empty.
pub fn player_table(players: &[PlayerStatRow]) -> Table {
    let mut stat_cols: Vec<String> = Vec::new();
    for p in players {
        for (name, _) in &p.stats {
            if !stat_cols.contains(name) {
                stat_cols.push(name.clone());
            }
        }
    }

    let mut header = strings(&["Year", "Round", "MatchKey", "Team", "Player", "Number", "Position"]);
    header.extend(stat_cols.iter().cloned());
    header.push("data_issues".to_string());

    let records = players
        .iter()
        .map(|p| {
            let mut rec = vec![
                p.season.to_string(),
                p.round.to_string(),
                p.match_key.clone(),
                p.team.clone().unwrap_or_default(),
                p.player.clone(),
                cell(p.number),
                p.position.clone().unwrap_or_default(),
            ];
            rec.extend(stat_cols.iter().map(|c| cell(p.stat(c))));
            rec.push(p.data_issues.join("; "));
            rec
        })
        .collect();
    Table { header, records }
}

fn side_cells(agg: Option<&TeamRoundAggregate>, width: usize) -> Vec<String> {
    match agg {
        Some(a) => a.values.iter().map(|v| cell(*v)).collect(),
        None => vec![String::new(); width],
    }
}

pub fn training_table(rows: &[TrainingRow], stats: &[String]) -> Table {
    let mut header = strings(&[
        "Year",
        "Round",
        "HomeTeam",
        "AwayTeam",
        "HomeScore",
        "AwayScore",
        "Margin",
        "JoinIncomplete",
        "HomePlayers",
        "AwayPlayers",
    ]);
    header.extend(feature_names(stats));
    header.push("data_issues".to_string());

    let records = rows
        .iter()
        .map(|r| {
            let m = &r.record;
            let mut rec = vec![
                m.season.to_string(),
                m.round.to_string(),
                m.home_team.clone(),
                m.away_team.clone(),
                cell(m.home_score),
                cell(m.away_score),
                cell(r.margin()),
                r.join_incomplete.to_string(),
                cell(r.home.as_ref().map(|a| a.player_count)),
                cell(r.away.as_ref().map(|a| a.player_count)),
            ];
            // A half-joined row has no usable features.
            let (home, away) = if r.join_incomplete {
                (None, None)
            } else {
                (r.home.as_ref(), r.away.as_ref())
            };
            rec.extend(side_cells(home, stats.len()));
            rec.extend(side_cells(away, stats.len()));
            rec.push(r.data_issues.join("; "));
            rec
        })
        .collect();
    Table { header, records }
}

pub fn impact_table(scores: &[ImpactScore]) -> Table {
    Table {
        header: strings(&["Stat", "ImpactScore"]),
        records: scores
            .iter()
            .map(|s| vec![s.stat.clone(), s.score.to_string()])
            .collect(),
    }
}

pub fn prediction_table(predictions: &[Prediction]) -> Table {
    let header = strings(&[
        "Year",
        "Round",
        "HomeTeam",
        "AwayTeam",
        "PredictedWinner",
        "Confidence",
        "PredictedMargin",
        "FeatureSource",
    ]);
    let records = predictions
        .iter()
        .map(|p| {
            vec![
                p.season.to_string(),
                p.round.to_string(),
                p.home_team.clone(),
                p.away_team.clone(),
                p.predicted_winner.clone(),
                format!("{:.4}", p.confidence),
                p.predicted_margin.map(|m| format!("{m:.2}")).unwrap_or_default(),
                p.source.label().to_string(),
            ]
        })
        .collect();
    Table { header, records }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny() -> Table {
        Table {
            header: strings(&["Stat", "ImpactScore"]),
            records: vec![vec!["Tackles".into(), "0.5".into()]],
        }
    }

    #[test]
    fn plan_renders_csv_without_touching_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/impact.csv");
        let plan = plan_csv(&path, &tiny()).unwrap();
        assert_eq!(String::from_utf8(plan.bytes.clone()).unwrap(), "Stat,ImpactScore\nTackles,0.5\n");
        assert_eq!(plan.existing_bytes, None);
        assert!(!path.exists());

        let report = commit(&plan, false).unwrap();
        assert_eq!(report.rows, 1);
        assert!(!report.overwrote);
        assert!(path.exists());
    }

    #[test]
    fn incomplete_join_exports_no_feature_values() {
        use crate::aggregate::aggregate_players;
        use crate::join::join_matches;

        let player = PlayerStatRow {
            season: 2024,
            round: 1,
            match_key: String::new(),
            team: Some("Broncos".into()),
            player: "p".into(),
            number: None,
            position: None,
            stats: vec![("Tackles".into(), 30.0)],
            data_issues: Vec::new(),
        };
        let record = MatchRecord {
            season: 2024,
            round: 1,
            home_team: "Broncos".into(),
            away_team: "Storm".into(),
            home_score: Some(18),
            away_score: Some(12),
            venue: None,
            date: None,
            url: None,
            data_issues: Vec::new(),
        };
        let (aggs, _) = aggregate_players(&[player], 0.8);
        let (rows, _) = join_matches(&[record], &aggs);
        assert!(rows[0].join_incomplete);

        let table = training_table(&rows, &aggs.columns);
        let home_col = table.header.iter().position(|h| h == "Home_Tackles").unwrap();
        let away_col = table.header.iter().position(|h| h == "Away_Tackles").unwrap();
        assert_eq!(table.records[0][home_col], "");
        assert_eq!(table.records[0][away_col], "");
        assert_eq!(table.records[0][7], "true");
    }

    #[test]
    fn non_empty_destination_needs_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("impact.csv");
        fs::write(&path, "old data").unwrap();

        let plan = plan_csv(&path, &tiny()).unwrap();
        assert!(plan.overwrites_data());
        let err = commit_all(std::slice::from_ref(&plan), false).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::DestinationExists { bytes: 8, .. })
        ));
        assert_eq!(fs::read_to_string(&path).unwrap(), "old data");

        let reports = commit_all(&[plan], true).unwrap();
        assert!(reports[0].overwrote);
        assert!(fs::read_to_string(&path).unwrap().starts_with("Stat,ImpactScore"));
    }

    #[test]
    fn empty_destination_is_not_an_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        fs::write(&path, "").unwrap();
        let plan = plan_csv(&path, &tiny()).unwrap();
        assert!(!plan.overwrites_data());
        assert!(commit(&plan, false).is_ok());
    }

    #[test]
    fn player_table_leaves_missing_cells_empty() {
        let row = |stats: Vec<(String, f64)>| PlayerStatRow {
            season: 2024,
            round: 1,
            match_key: "k".into(),
            team: Some("Storm".into()),
            player: "p".into(),
            number: Some(9),
            position: None,
            stats,
            data_issues: Vec::new(),
        };
        let table = player_table(&[
            row(vec![("Tackles".into(), 0.0)]),
            row(vec![("Tries".into(), 2.0)]),
        ]);
        assert_eq!(table.header[7..9], ["Tackles".to_string(), "Tries".to_string()]);
        assert_eq!(table.records[0][7], "0");
        assert_eq!(table.records[0][8], "");
        assert_eq!(table.records[1][7], "");
    }
}

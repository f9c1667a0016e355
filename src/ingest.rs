use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::report::StageReport;

pub const PLAYER_STATS_ROOT: &str = "PlayerStats";

const HOME_TEAM: &[&str] = &["Home", "HomeTeam", "home_team", "Home_Team"];
const AWAY_TEAM: &[&str] = &["Away", "AwayTeam", "away_team", "Away_Team"];
const HOME_SCORE: &[&str] = &["Home_Score", "HomeScore", "home_score"];
const AWAY_SCORE: &[&str] = &["Away_Score", "AwayScore", "away_score"];
const VENUE: &[&str] = &["Venue", "venue"];
const DATE: &[&str] = &["Date", "date"];
const URL: &[&str] = &["Match_Centre_URL", "MatchCentreURL", "match_centre_url"];
const ROUND: &[&str] = &["Round", "round", "RoundNumber"];

const PLAYER_NAME: &[&str] = &["Name", "Player", "player_name"];
const PLAYER_NUMBER: &[&str] = &["Number", "Jersey", "player_number"];
const PLAYER_POSITION: &[&str] = &["Position", "position"];
const PLAYER_TEAM: &[&str] = &["Team", "team", "TeamName"];

/// Where a round number might be recovered from, in priority order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoundHint {
    /// The nested round key the record was found under.
    pub key: Option<String>,
    /// An inner `Round` field on the record itself.
    pub field: Option<String>,
}

/// A match dict with its aliased fields resolved to one shape; values are
/// still raw and are parsed by the normalizer.
#[derive(Debug, Clone, Default)]
pub struct RawMatch {
    pub season: i32,
    pub round: RoundHint,
    pub home_team: Option<String>,
    pub away_team: Option<String>,
    pub home_score: Option<Value>,
    pub away_score: Option<Value>,
    pub venue: Option<String>,
    pub date: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RawPlayerRow {
    pub season: i32,
    pub round: RoundHint,
    pub match_key: String,
    pub team: Option<String>,
    pub name: Option<String>,
    pub number: Option<Value>,
    pub position: Option<String>,
    /// Every remaining scalar field, in document key order.
    pub stats: Vec<(String, Value)>,
}

#[derive(Debug, Clone, Default)]
pub struct IngestSummary {
    pub matches: Vec<RawMatch>,
    pub players: Vec<RawPlayerRow>,
    pub match_files_read: usize,
    pub player_files_read: usize,
    pub errors: Vec<String>,
}

impl IngestSummary {
    /// Skipped files count as dropped.
    pub fn report(&self) -> StageReport {
        let mut report = StageReport::new("ingest");
        report.processed = self.matches.len() + self.players.len();
        for err in &self.errors {
            report.drop_row(err.clone());
        }
        report
    }
}

pub fn match_file_path(cfg: &PipelineConfig, year: i32) -> PathBuf {
    let comp = &cfg.competition;
    cfg.data_dir
        .join(comp)
        .join(year.to_string())
        .join(format!("{comp}_data_{year}.json"))
}

pub fn player_file_path(cfg: &PipelineConfig, year: i32) -> PathBuf {
    let comp = &cfg.competition;
    cfg.data_dir
        .join(comp)
        .join(year.to_string())
        .join(format!("{comp}_player_statistics_{year}.json"))
}

/// Reads every requested year. A missing or malformed file only skips that
/// file; having nothing at all for any year is fatal.
pub fn ingest_all(cfg: &PipelineConfig) -> Result<IngestSummary> {
    let mut summary = IngestSummary::default();

    for &year in &cfg.years {
        let path = match_file_path(cfg, year);
        match read_document(&path) {
            Ok(Some(raw)) => match parse_match_document(&raw, &cfg.competition, year) {
                Ok(rows) => {
                    info!(year, rows = rows.len(), path = %path.display(), "matches ingested");
                    summary.match_files_read += 1;
                    summary.matches.extend(rows);
                }
                Err(err) => {
                    let err = PipelineError::parse(&path, format!("{err:#}"));
                    warn!("{err}; skipping");
                    summary.errors.push(err.to_string());
                }
            },
            Ok(None) => warn!(year, path = %path.display(), "no match data file"),
            Err(err) => {
                warn!("{err:#}; skipping");
                summary.errors.push(format!("{err:#}"));
            }
        }

        let path = player_file_path(cfg, year);
        match read_document(&path) {
            Ok(Some(raw)) => match parse_player_document(&raw, year) {
                Ok(rows) => {
                    info!(year, rows = rows.len(), path = %path.display(), "player stats ingested");
                    summary.player_files_read += 1;
                    summary.players.extend(rows);
                }
                Err(err) => {
                    let err = PipelineError::parse(&path, format!("{err:#}"));
                    warn!("{err}; skipping");
                    summary.errors.push(err.to_string());
                }
            },
            Ok(None) => warn!(year, path = %path.display(), "no player statistics file"),
            Err(err) => {
                warn!("{err:#}; skipping");
                summary.errors.push(format!("{err:#}"));
            }
        }
    }

    if summary.matches.is_empty() && summary.players.is_empty() {
        return Err(PipelineError::NoData {
            years: cfg.years.clone(),
        }
        .into());
    }
    Ok(summary)
}

fn read_document(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    fs::read_to_string(path)
        .map(Some)
        .map_err(|err| PipelineError::parse(path, format!("read failed: {err}")).into())
}

/// Walks `{COMP: [{year: [{round: [match, ...]}, ...]}]}` or the unwrapped
/// `{year: [...]}` form.
pub fn parse_match_document(raw: &str, competition: &str, year: i32) -> Result<Vec<RawMatch>> {
    let doc: Value = serde_json::from_str(raw.trim())?;
    let seasons = season_blocks(&doc, competition, year)
        .ok_or_else(|| anyhow::anyhow!("no {competition} season block for {year}"))?;

    let mut out = Vec::new();
    for (season, rounds) in seasons {
        for (round_key, entries) in round_blocks(rounds) {
            let Some(entries) = entries.as_array() else {
                debug!(season, round_key = ?round_key, "round block is not a list");
                continue;
            };
            for entry in entries {
                let Some(obj) = entry.as_object() else {
                    continue;
                };
                out.push(raw_match(obj, season, round_key.clone()));
            }
        }
    }
    Ok(out)
}

/// Walks `{PlayerStats: [{year: [{round: [{match_key: [player, ...]}]}]}]}`.
pub fn parse_player_document(raw: &str, year: i32) -> Result<Vec<RawPlayerRow>> {
    let doc: Value = serde_json::from_str(raw.trim())?;
    let seasons = season_blocks(&doc, PLAYER_STATS_ROOT, year)
        .ok_or_else(|| anyhow::anyhow!("no {PLAYER_STATS_ROOT} season block for {year}"))?;

    let mut out = Vec::new();
    for (season, rounds) in seasons {
        for (round_key, matches) in round_blocks(rounds) {
            for (match_key, players) in match_blocks(matches) {
                let Some(players) = players.as_array() else {
                    continue;
                };
                for player in players {
                    let Some(obj) = player.as_object() else {
                        continue;
                    };
                    out.push(raw_player(obj, season, round_key.clone(), &match_key));
                }
            }
        }
    }
    Ok(out)
}

fn season_blocks<'a>(doc: &'a Value, root: &str, year: i32) -> Option<Vec<(i32, &'a Value)>> {
    let containers: Vec<&Map<String, Value>> = match doc.get(root) {
        Some(Value::Array(list)) => list.iter().filter_map(|v| v.as_object()).collect(),
        Some(Value::Object(map)) => vec![map],
        _ => doc.as_object().into_iter().collect(),
    };

    let mut out = Vec::new();
    for container in containers {
        for (key, rounds) in container {
            let season = leading_int(key).unwrap_or(year);
            if season != year {
                debug!(key = %key, year, "season key differs from file year");
            }
            out.push((season, rounds));
        }
    }
    if out.is_empty() { None } else { Some(out) }
}

/// `[{"1": [...]}, {"2": [...]}]` or `{"1": [...], "2": [...]}`.
fn round_blocks(rounds: &Value) -> Vec<(Option<String>, &Value)> {
    match rounds {
        Value::Array(groups) => groups
            .iter()
            .flat_map(|group| match group {
                Value::Object(map) => map
                    .iter()
                    .map(|(k, v)| (Some(k.clone()), v))
                    .collect::<Vec<_>>(),
                Value::Array(_) => vec![(None, group)],
                _ => Vec::new(),
            })
            .collect(),
        Value::Object(map) => map.iter().map(|(k, v)| (Some(k.clone()), v)).collect(),
        _ => Vec::new(),
    }
}

fn match_blocks(matches: &Value) -> Vec<(String, &Value)> {
    match matches {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.as_object())
            .flat_map(|map| map.iter().map(|(k, v)| (k.clone(), v)))
            .collect(),
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
        _ => Vec::new(),
    }
}

fn raw_match(obj: &Map<String, Value>, season: i32, round_key: Option<String>) -> RawMatch {
    RawMatch {
        season,
        round: RoundHint {
            key: round_key,
            field: lookup(obj, ROUND).and_then(scalar_text),
        },
        home_team: lookup(obj, HOME_TEAM).and_then(scalar_text),
        away_team: lookup(obj, AWAY_TEAM).and_then(scalar_text),
        home_score: lookup(obj, HOME_SCORE).cloned(),
        away_score: lookup(obj, AWAY_SCORE).cloned(),
        venue: lookup(obj, VENUE).and_then(scalar_text),
        date: lookup(obj, DATE).and_then(scalar_text),
        url: lookup(obj, URL).and_then(scalar_text),
    }
}

fn raw_player(
    obj: &Map<String, Value>,
    season: i32,
    round_key: Option<String>,
    match_key: &str,
) -> RawPlayerRow {
    let identity: [&[&str]; 5] = [PLAYER_NAME, PLAYER_NUMBER, PLAYER_POSITION, PLAYER_TEAM, ROUND];
    let stats = obj
        .iter()
        .filter(|(k, _)| !identity.iter().any(|aliases| aliases.contains(&k.as_str())))
        .filter(|(_, v)| !v.is_object() && !v.is_array())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    RawPlayerRow {
        season,
        round: RoundHint {
            key: round_key,
            field: lookup(obj, ROUND).and_then(scalar_text),
        },
        match_key: match_key.to_string(),
        team: lookup(obj, PLAYER_TEAM).and_then(scalar_text),
        name: lookup(obj, PLAYER_NAME).and_then(scalar_text),
        number: lookup(obj, PLAYER_NUMBER).cloned(),
        position: lookup(obj, PLAYER_POSITION).and_then(scalar_text),
        stats,
    }
}

/// First alias present wins.
fn lookup<'a>(obj: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    aliases.iter().find_map(|k| obj.get(*k))
}

fn scalar_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() { None } else { Some(s.to_string()) }
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn leading_int(raw: &str) -> Option<i32> {
    raw.trim().parse::<i32>().ok()
}

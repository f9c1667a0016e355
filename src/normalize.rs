use serde_json::Value;

use crate::config::PipelineConfig;
use crate::ingest::{RawMatch, RawPlayerRow, RoundHint};
use crate::report::StageReport;

const PLACEHOLDERS: &[&str] = &["-", "--", "n/a", "na", "null", "none"];
const MATCH_KEY_SEPARATORS: &[&str] = &["-vs-", "-v-", " vs ", " v "];

/// One fixture, completed or scheduled. Scores are both present or both absent.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchRecord {
    pub season: i32,
    pub round: u32,
    pub home_team: String,
    pub away_team: String,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
    pub venue: Option<String>,
    pub date: Option<String>,
    pub url: Option<String>,
    pub data_issues: Vec<String>,
}

impl MatchRecord {
    pub fn home_key(&self) -> String {
        normalize_team_name(&self.home_team)
    }

    pub fn away_key(&self) -> String {
        normalize_team_name(&self.away_team)
    }

    pub fn margin(&self) -> Option<i32> {
        Some(self.home_score? - self.away_score?)
    }

    pub fn is_completed(&self) -> bool {
        self.margin().is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerStatRow {
    pub season: i32,
    pub round: u32,
    pub match_key: String,
    /// `None` when neither the source nor jersey inference could place the player.
    pub team: Option<String>,
    pub player: String,
    pub number: Option<u32>,
    pub position: Option<String>,
    /// Statistics actually present on the source row.
    pub stats: Vec<(String, f64)>,
    pub data_issues: Vec<String>,
}

impl PlayerStatRow {
    pub fn team_key(&self) -> Option<String> {
        self.team
            .as_deref()
            .map(normalize_team_name)
            .filter(|k| !k.is_empty())
    }

    pub fn stat(&self, name: &str) -> Option<f64> {
        self.stats.iter().find(|(k, _)| k == name).map(|(_, v)| *v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Home,
    Away,
}

/// Result of coercing one raw statistic cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StatCell {
    Value(f64),
    /// `"-"`, `""`, `"N/A"`, `"null"` and friends: zero by definition.
    Placeholder,
    /// JSON `null`: the statistic was not recorded.
    Missing,
    /// Text that is not a number; counted as zero and flagged.
    Unparseable,
}

impl StatCell {
    pub fn value(self) -> Option<f64> {
        match self {
            StatCell::Value(v) => Some(v),
            StatCell::Placeholder | StatCell::Unparseable => Some(0.0),
            StatCell::Missing => None,
        }
    }
}

/// Trim, lower-case, and drop whitespace, hyphens, and periods.
pub fn normalize_team_name(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .filter(|ch| !ch.is_whitespace() && *ch != '-' && *ch != '.')
        .collect()
}

pub fn coerce_stat(v: &Value) -> StatCell {
    match v {
        Value::Null => StatCell::Missing,
        Value::Bool(b) => StatCell::Value(if *b { 1.0 } else { 0.0 }),
        Value::Number(n) => n
            .as_f64()
            .filter(|x| x.is_finite())
            .map(StatCell::Value)
            .unwrap_or(StatCell::Unparseable),
        Value::String(s) => coerce_stat_text(s),
        Value::Array(_) | Value::Object(_) => StatCell::Unparseable,
    }
}

pub fn coerce_stat_text(raw: &str) -> StatCell {
    let s = raw.trim();
    if is_placeholder_text(s) {
        return StatCell::Placeholder;
    }
    if let Some((mins, secs)) = s.split_once(':') {
        return match (mins.trim().parse::<f64>(), secs.trim().parse::<f64>()) {
            (Ok(m), Ok(sec)) if m.is_finite() && sec.is_finite() => {
                StatCell::Value(m + sec / 60.0)
            }
            _ => StatCell::Unparseable,
        };
    }
    let cleaned = s.trim_end_matches('%').replace(',', "");
    match cleaned.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => StatCell::Value(v),
        _ => StatCell::Unparseable,
    }
}

/// First run of ASCII digits, if it is at least 1.
pub fn parse_round(raw: &str) -> Option<u32> {
    let digits: String = raw
        .chars()
        .skip_while(|ch| !ch.is_ascii_digit())
        .take_while(|ch| ch.is_ascii_digit())
        .collect();
    digits.parse::<u32>().ok().filter(|r| *r >= 1)
}

/// Nested key first, then the inner `Round` field.
pub fn resolve_round(hint: &RoundHint) -> Option<u32> {
    hint.key
        .as_deref()
        .and_then(parse_round)
        .or_else(|| hint.field.as_deref().and_then(parse_round))
}

/// Recovers `(home, away)` from keys like `2024-1-Broncos-v-Storm` or
/// `2024-round-1-sea-eagles-v-wests-tigers`.
pub fn parse_match_key_teams(key: &str) -> Option<(String, String)> {
    let lower = key.to_ascii_lowercase();
    let (pos, sep) = MATCH_KEY_SEPARATORS
        .iter()
        .filter_map(|sep| lower.find(sep).map(|pos| (pos, *sep)))
        .min_by_key(|(pos, _)| *pos)?;

    let left = &key[..pos];
    let right = key[pos + sep.len()..].trim_matches(|c: char| c == '-' || c.is_whitespace());

    let segments: Vec<&str> = left.split('-').collect();
    let start = segments
        .iter()
        .position(|seg| {
            let seg = seg.trim();
            !seg.is_empty() && !seg.chars().all(|c| c.is_ascii_digit()) && !is_round_word(seg)
        })
        .unwrap_or(segments.len());
    let home = segments[start..].join("-");
    let home = home.trim();

    if home.is_empty() || right.is_empty() {
        return None;
    }
    Some((home.to_string(), right.to_string()))
}

fn is_round_word(seg: &str) -> bool {
    let lower = seg.to_ascii_lowercase();
    lower == "round"
        || lower == "rnd"
        || (lower.starts_with('r') && lower.len() > 1 && lower[1..].chars().all(|c| c.is_ascii_digit()))
}

pub fn jersey_side(number: u32, cfg: &PipelineConfig) -> Option<Side> {
    if cfg.home_jerseys.contains(&number) {
        Some(Side::Home)
    } else if cfg.away_jerseys.contains(&number) {
        Some(Side::Away)
    } else {
        None
    }
}

fn as_i64_any(v: &Value) -> Option<i64> {
    if let Some(n) = v.as_i64() {
        return Some(n);
    }
    if let Some(f) = v.as_f64() {
        return (f.fract() == 0.0 && f.is_finite()).then_some(f as i64);
    }
    let s = v.as_str()?.trim();
    s.parse::<i64>()
        .ok()
        .or_else(|| s.parse::<f64>().ok().filter(|f| f.fract() == 0.0).map(|f| f as i64))
}

fn is_placeholder_text(raw: &str) -> bool {
    let s = raw.trim();
    s.is_empty() || PLACEHOLDERS.contains(&s.to_ascii_lowercase().as_str())
}

fn is_placeholder(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => is_placeholder_text(s),
        _ => false,
    }
}

/// `Ok(None)` for an absent or placeholder score, `Err` for garbage.
fn parse_score(v: Option<&Value>) -> Result<Option<i32>, String> {
    let Some(v) = v else {
        return Ok(None);
    };
    if is_placeholder(v) {
        return Ok(None);
    }
    as_i64_any(v)
        .and_then(|n| i32::try_from(n).ok())
        .filter(|n| *n >= 0)
        .map(Some)
        .ok_or_else(|| format!("unparseable score {v}"))
}

fn parse_jersey(v: &Value) -> Option<u32> {
    as_i64_any(v).and_then(|n| u32::try_from(n).ok())
}

pub fn normalize_matches(raw: &[RawMatch]) -> (Vec<MatchRecord>, StageReport) {
    let mut report = StageReport::new("normalize_matches");
    let mut out = Vec::with_capacity(raw.len());

    for (idx, m) in raw.iter().enumerate() {
        report.processed += 1;
        let home_team = m.home_team.clone().unwrap_or_default();
        let away_team = m.away_team.clone().unwrap_or_default();

        let Some(round) = resolve_round(&m.round) else {
            report.drop_row(format!(
                "match #{idx} {} {home_team} v {away_team}: no round in key {:?} or field {:?}",
                m.season, m.round.key, m.round.field
            ));
            continue;
        };

        let mut issues = Vec::new();
        if home_team.is_empty() {
            issues.push("missing home team".to_string());
        }
        if away_team.is_empty() {
            issues.push("missing away team".to_string());
        }

        let mut home_score = parse_score(m.home_score.as_ref()).unwrap_or_else(|err| {
            issues.push(format!("home {err}"));
            None
        });
        let mut away_score = parse_score(m.away_score.as_ref()).unwrap_or_else(|err| {
            issues.push(format!("away {err}"));
            None
        });
        if home_score.is_some() != away_score.is_some() {
            issues.push("partial score".to_string());
            home_score = None;
            away_score = None;
        }

        if !issues.is_empty() {
            report.flag(format!(
                "{} r{round} {home_team} v {away_team}: {}",
                m.season,
                issues.join("; ")
            ));
        }

        out.push(MatchRecord {
            season: m.season,
            round,
            home_team,
            away_team,
            home_score,
            away_score,
            venue: m.venue.clone(),
            date: m.date.clone(),
            url: m.url.clone(),
            data_issues: issues,
        });
    }

    (out, report)
}

pub fn normalize_players(
    raw: &[RawPlayerRow],
    cfg: &PipelineConfig,
) -> (Vec<PlayerStatRow>, StageReport) {
    let mut report = StageReport::new("normalize_players");
    let mut out = Vec::with_capacity(raw.len());

    for (idx, p) in raw.iter().enumerate() {
        report.processed += 1;
        let player = p.name.clone().unwrap_or_default();

        let Some(round) = resolve_round(&p.round) else {
            report.drop_row(format!(
                "player #{idx} {player} ({}): no round in key {:?} or field {:?}",
                p.match_key, p.round.key, p.round.field
            ));
            continue;
        };

        let mut issues = Vec::new();
        if player.is_empty() {
            issues.push("missing player name".to_string());
        }
        let number = p.number.as_ref().and_then(parse_jersey);

        let source_team = p.team.as_deref().map(str::trim).filter(|t| {
            let real = !is_placeholder_text(t) && !normalize_team_name(t).is_empty();
            if !real {
                issues.push(format!("placeholder team {t:?}"));
            }
            real
        });
        let team = match source_team {
            Some(team) => Some(team.to_string()),
            None => match infer_team(&p.match_key, number, cfg) {
                Some(team) => {
                    if let Some(n) = number {
                        issues.push(format!("team inferred from jersey {n}"));
                    }
                    Some(team)
                }
                None => {
                    issues.push("team unresolved".to_string());
                    None
                }
            },
        };

        let mut stats = Vec::with_capacity(p.stats.len());
        for (name, value) in &p.stats {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let cell = coerce_stat(value);
            if cell == StatCell::Unparseable {
                issues.push(format!("unparseable {name}: {value}"));
            }
            if let Some(v) = cell.value() {
                stats.push((name.to_string(), v));
            }
        }

        if !issues.is_empty() {
            report.flag(format!(
                "{} r{round} {} {player}: {}",
                p.season,
                p.match_key,
                issues.join("; ")
            ));
        }

        out.push(PlayerStatRow {
            season: p.season,
            round,
            match_key: p.match_key.clone(),
            team,
            player,
            number,
            position: p.position.clone(),
            stats,
            data_issues: issues,
        });
    }

    (out, report)
}

fn infer_team(match_key: &str, number: Option<u32>, cfg: &PipelineConfig) -> Option<String> {
    let (home, away) = parse_match_key_teams(match_key)?;
    match jersey_side(number?, cfg)? {
        Side::Home => Some(home),
        Side::Away => Some(away),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn team_names_collapse_to_one_key() {
        let a = normalize_team_name("St. George Illawarra");
        assert_eq!(a, "stgeorgeillawarra");
        assert_eq!(normalize_team_name("st george illawarra"), a);
        assert_eq!(normalize_team_name("St-George-Illawarra"), a);
        assert_eq!(normalize_team_name("  St.\tGeorge  "), "stgeorge");
    }

    #[test]
    fn normalization_is_idempotent() {
        for raw in ["Sea Eagles", " a\t. b-", "Wests-Tigers.", "", "ÉELS"] {
            let once = normalize_team_name(raw);
            assert_eq!(normalize_team_name(&once), once, "{raw:?}");
        }
    }

    #[test]
    fn coerce_handles_legacy_tokens() {
        assert_eq!(coerce_stat(&json!("1,234")), StatCell::Value(1234.0));
        assert_eq!(coerce_stat(&json!("58%")), StatCell::Value(58.0));
        assert_eq!(coerce_stat(&json!("12:30")), StatCell::Value(12.5));
        assert_eq!(coerce_stat(&json!(7)), StatCell::Value(7.0));
        assert_eq!(coerce_stat(&json!(true)), StatCell::Value(1.0));
        for token in ["-", "", " N/A ", "null"] {
            assert_eq!(coerce_stat(&json!(token)), StatCell::Placeholder);
        }
        assert_eq!(coerce_stat(&Value::Null), StatCell::Missing);
        assert_eq!(coerce_stat(&json!("fast")), StatCell::Unparseable);
        assert_eq!(coerce_stat(&json!("nan")), StatCell::Unparseable);
        assert_eq!(StatCell::Placeholder.value(), Some(0.0));
        assert_eq!(StatCell::Missing.value(), None);
    }

    #[test]
    fn round_takes_first_digit_run() {
        assert_eq!(parse_round("3"), Some(3));
        assert_eq!(parse_round("Round 12"), Some(12));
        assert_eq!(parse_round("R7-finals 2"), Some(7));
        assert_eq!(parse_round("Finals"), None);
        assert_eq!(parse_round("0"), None);
    }

    #[test]
    fn round_prefers_nested_key() {
        let hint = RoundHint {
            key: Some("4".into()),
            field: Some("Round 9".into()),
        };
        assert_eq!(resolve_round(&hint), Some(4));
        let hint = RoundHint {
            key: Some("Grand Final".into()),
            field: Some("Round 9".into()),
        };
        assert_eq!(resolve_round(&hint), Some(9));
        assert_eq!(resolve_round(&RoundHint::default()), None);
    }

    #[test]
    fn match_key_teams_strip_prefix() {
        assert_eq!(
            parse_match_key_teams("2024-1-Broncos-v-Storm"),
            Some(("Broncos".into(), "Storm".into()))
        );
        assert_eq!(
            parse_match_key_teams("2024-round-1-sea-eagles-v-wests-tigers"),
            Some(("sea-eagles".into(), "wests-tigers".into()))
        );
        assert_eq!(
            parse_match_key_teams("2023-R5-Eels-vs-Sharks"),
            Some(("Eels".into(), "Sharks".into()))
        );
        assert_eq!(parse_match_key_teams("2024-1-v-Storm"), None);
        assert_eq!(parse_match_key_teams("no separator"), None);
    }

    #[test]
    fn partial_score_is_treated_as_absent() {
        let raw = RawMatch {
            season: 2024,
            round: RoundHint {
                key: Some("2".into()),
                field: None,
            },
            home_team: Some("Eels".into()),
            away_team: Some("Sharks".into()),
            home_score: Some(json!(20)),
            away_score: Some(json!("-")),
            ..Default::default()
        };
        let (rows, report) = normalize_matches(&[raw]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].home_score, None);
        assert_eq!(rows[0].margin(), None);
        assert!(rows[0].data_issues.iter().any(|i| i == "partial score"));
        assert_eq!(report.flagged, 1);
    }

    #[test]
    fn match_without_round_is_dropped() {
        let raw = RawMatch {
            season: 2024,
            home_team: Some("Eels".into()),
            away_team: Some("Sharks".into()),
            ..Default::default()
        };
        let (rows, report) = normalize_matches(&[raw]);
        assert!(rows.is_empty());
        assert_eq!(report.dropped, 1);
    }

    #[test]
    fn jersey_inference_assigns_sides() {
        let cfg = PipelineConfig::default();
        let row = |number: Value| RawPlayerRow {
            season: 2024,
            round: RoundHint {
                key: Some("1".into()),
                field: None,
            },
            match_key: "2024-1-Broncos-v-Storm".into(),
            name: Some("X".into()),
            number: Some(number),
            stats: vec![("Tackles".into(), json!("-")), ("Errors".into(), Value::Null)],
            ..Default::default()
        };
        let (rows, report) = normalize_players(&[row(json!(7)), row(json!("17")), row(json!(30))], &cfg);
        assert_eq!(rows[0].team.as_deref(), Some("Broncos"));
        assert_eq!(rows[1].team.as_deref(), Some("Storm"));
        assert_eq!(rows[2].team, None);
        assert!(rows[2].data_issues.iter().any(|i| i == "team unresolved"));
        assert!(rows[0].data_issues[0].starts_with("team inferred from jersey"));
        assert_eq!(rows[0].stat("Tackles"), Some(0.0));
        assert_eq!(rows[0].stat("Errors"), None);
        assert_eq!(report.flagged, 3);
    }

    #[test]
    fn placeholder_team_falls_back_to_jersey() {
        let cfg = PipelineConfig::default();
        let row = |team: &str, number: u32| RawPlayerRow {
            season: 2024,
            round: RoundHint {
                key: Some("1".into()),
                field: None,
            },
            match_key: "2024-1-Broncos-v-Storm".into(),
            team: Some(team.into()),
            name: Some("X".into()),
            number: Some(json!(number)),
            stats: vec![("Tackles".into(), json!(12))],
            ..Default::default()
        };
        let raw = [row("N/A", 3), row("-", 16), row("none", 30)];
        let (rows, report) = normalize_players(&raw, &cfg);

        assert_eq!(rows[0].team.as_deref(), Some("Broncos"));
        assert_eq!(rows[1].team.as_deref(), Some("Storm"));
        assert_eq!(rows[2].team, None);
        assert!(rows[0].data_issues.iter().any(|i| i == "placeholder team \"N/A\""));
        assert!(rows[1].data_issues.iter().any(|i| i == "team inferred from jersey 16"));
        assert!(rows[2].data_issues.iter().any(|i| i == "team unresolved"));
        assert_eq!(report.flagged, 3);

        let (table, _) = crate::aggregate::aggregate_players(&rows, 0.8);
        assert!(table.lookup(2024, 1, "n/a").is_none());
        assert!(table.lookup(2024, 1, "broncos").is_some());
        assert!(table.lookup(2024, 1, "storm").is_some());
    }
}

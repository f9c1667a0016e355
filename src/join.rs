use std::collections::HashSet;

use tracing::warn;

use crate::aggregate::{AggregateTable, TeamRoundAggregate};
use crate::normalize::MatchRecord;
use crate::report::StageReport;

/// A match with whatever aggregates could be found for each side.
#[derive(Debug, Clone)]
pub struct TrainingRow {
    pub record: MatchRecord,
    pub home: Option<TeamRoundAggregate>,
    pub away: Option<TeamRoundAggregate>,
    pub join_incomplete: bool,
    /// Match-level issues followed by join issues.
    pub data_issues: Vec<String>,
}

impl TrainingRow {
    pub fn margin(&self) -> Option<i32> {
        self.record.margin()
    }

    pub fn home_win(&self) -> Option<bool> {
        self.margin().map(|m| m > 0)
    }

    /// Both sides joined and both scores present.
    pub fn is_eligible(&self) -> bool {
        !self.join_incomplete && self.margin().is_some()
    }
}

/// Joins every match onto the aggregate table. Duplicate
/// `(season, round, home, away)` entries keep the first one seen.
pub fn join_matches(matches: &[MatchRecord], table: &AggregateTable) -> (Vec<TrainingRow>, StageReport) {
    let mut report = StageReport::new("join");
    let mut seen: HashSet<(i32, u32, String, String)> = HashSet::new();
    let mut out = Vec::with_capacity(matches.len());

    for record in matches {
        report.processed += 1;
        let home_key = record.home_key();
        let away_key = record.away_key();

        if !seen.insert((record.season, record.round, home_key.clone(), away_key.clone())) {
            warn!(
                season = record.season,
                round = record.round,
                home = %record.home_team,
                away = %record.away_team,
                "duplicate match entry discarded"
            );
            report.drop_row(format!(
                "{} r{} {} v {}: duplicate match entry",
                record.season, record.round, record.home_team, record.away_team
            ));
            continue;
        }

        let home = table.lookup(record.season, record.round, &home_key).cloned();
        let away = table.lookup(record.season, record.round, &away_key).cloned();

        let mut data_issues = record.data_issues.clone();
        if home.is_none() {
            data_issues.push(format!("no aggregate for home side {}", record.home_team));
        }
        if away.is_none() {
            data_issues.push(format!("no aggregate for away side {}", record.away_team));
        }
        let join_incomplete = home.is_none() || away.is_none();
        if join_incomplete {
            report.flag(format!(
                "{} r{} {} v {}: join incomplete",
                record.season, record.round, record.home_team, record.away_team
            ));
        }

        out.push(TrainingRow {
            record: record.clone(),
            home,
            away,
            join_incomplete,
            data_issues,
        });
    }

    (out, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate_players;
    use crate::normalize::PlayerStatRow;

    fn record(round: u32, home: &str, away: &str, scores: Option<(i32, i32)>) -> MatchRecord {
        MatchRecord {
            season: 2024,
            round,
            home_team: home.into(),
            away_team: away.into(),
            home_score: scores.map(|s| s.0),
            away_score: scores.map(|s| s.1),
            venue: None,
            date: None,
            url: None,
            data_issues: Vec::new(),
        }
    }

    fn player(round: u32, team: &str, tackles: f64) -> PlayerStatRow {
        PlayerStatRow {
            season: 2024,
            round,
            match_key: String::new(),
            team: Some(team.into()),
            player: "p".into(),
            number: None,
            position: None,
            stats: vec![("Tackles".into(), tackles)],
            data_issues: Vec::new(),
        }
    }

    #[test]
    fn margin_and_features_follow_aggregates() {
        let (table, _) = aggregate_players(&[player(1, "Broncos", 30.0), player(1, "Storm", 25.0)], 0.8);
        let (rows, report) = join_matches(&[record(1, "Broncos", "Storm", Some((18, 12)))], &table);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].margin(), Some(6));
        assert!(rows[0].is_eligible());
        assert_eq!(rows[0].home.as_ref().unwrap().values, vec![Some(30.0)]);
        assert_eq!(report.flagged, 0);
    }

    #[test]
    fn missing_side_marks_join_incomplete() {
        let (table, _) = aggregate_players(&[player(1, "Broncos", 30.0)], 0.8);
        let (rows, report) = join_matches(&[record(1, "Broncos", "Storm", Some((18, 12)))], &table);
        assert!(rows[0].join_incomplete);
        assert!(rows[0].away.is_none());
        assert!(!rows[0].is_eligible());
        assert_eq!(report.flagged, 1);
    }

    #[test]
    fn duplicates_keep_first_seen() {
        let (table, _) = aggregate_players(&[player(5, "Eels", 1.0), player(5, "Sharks", 2.0)], 0.8);
        let matches = [
            record(5, "Eels", "Sharks", Some((20, 10))),
            record(5, "eels", "Sharks ", Some((0, 0))),
        ];
        let (rows, report) = join_matches(&matches, &table);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].margin(), Some(10));
        assert_eq!(report.dropped, 1);
        assert_eq!(report.reasons, vec!["2024 r5 eels v Sharks : duplicate match entry".to_string()]);
    }

    #[test]
    fn fixtures_are_kept_but_ineligible() {
        let (table, _) = aggregate_players(&[player(9, "Eels", 1.0), player(9, "Sharks", 2.0)], 0.8);
        let (rows, _) = join_matches(&[record(9, "Eels", "Sharks", None)], &table);
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].join_incomplete);
        assert!(!rows[0].is_eligible());
    }
}

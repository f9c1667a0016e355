use std::collections::BTreeMap;

use serde::Serialize;

use crate::normalize::PlayerStatRow;
use crate::report::StageReport;

type GroupKey = (i32, u32, String);

/// Summed statistics for one team in one round of one season.
#[derive(Debug, Clone, PartialEq)]
pub struct TeamRoundAggregate {
    pub season: i32,
    pub round: u32,
    pub team_key: String,
    /// First raw spelling seen for this key.
    pub team_display: String,
    pub player_count: usize,
    /// Aligned with `AggregateTable::columns`; `None` when no constituent row
    /// carried the column.
    pub values: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DroppedColumn {
    pub column: String,
    pub missing_ratio: f64,
}

#[derive(Debug, Clone, Default)]
pub struct AggregateTable {
    pub columns: Vec<String>,
    pub dropped_columns: Vec<DroppedColumn>,
    pub rows: Vec<TeamRoundAggregate>,
    index: BTreeMap<GroupKey, usize>,
}

impl AggregateTable {
    pub fn lookup(&self, season: i32, round: u32, team_key: &str) -> Option<&TeamRoundAggregate> {
        self.index
            .get(&(season, round, team_key.to_string()))
            .map(|&i| &self.rows[i])
    }

    /// Latest aggregate for the team strictly before `(season, round)`.
    pub fn latest_before(
        &self,
        season: i32,
        round: u32,
        team_key: &str,
    ) -> Option<&TeamRoundAggregate> {
        self.rows
            .iter()
            .filter(|a| a.team_key == team_key && (a.season, a.round) < (season, round))
            .max_by_key(|a| (a.season, a.round))
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Columns in first-seen order with the share of rows that lack each one.
pub fn column_missingness(rows: &[PlayerStatRow]) -> Vec<(String, f64)> {
    let mut order: Vec<String> = Vec::new();
    let mut present: BTreeMap<String, usize> = BTreeMap::new();
    for row in rows {
        for (name, _) in &row.stats {
            let count = present.entry(name.clone()).or_insert(0);
            if *count == 0 {
                order.push(name.clone());
            }
            *count += 1;
        }
    }
    let total = rows.len().max(1) as f64;
    order
        .into_iter()
        .map(|name| {
            let seen = present.get(&name).copied().unwrap_or(0) as f64;
            (name, 1.0 - seen / total)
        })
        .collect()
}

/// Groups rows by `(season, round, team_key)` and sums every column whose
/// missingness does not exceed `missing_threshold`.
pub fn aggregate_players(
    rows: &[PlayerStatRow],
    missing_threshold: f64,
) -> (AggregateTable, StageReport) {
    let mut report = StageReport::new("aggregate");
    let mut table = AggregateTable::default();

    for (name, ratio) in column_missingness(rows) {
        if ratio > missing_threshold {
            report.flag(format!(
                "column {name} dropped: {:.1}% missing",
                ratio * 100.0
            ));
            table.dropped_columns.push(DroppedColumn {
                column: name,
                missing_ratio: ratio,
            });
        } else {
            table.columns.push(name);
        }
    }
    let col_index: BTreeMap<&str, usize> = table
        .columns
        .iter()
        .enumerate()
        .map(|(i, c)| (c.as_str(), i))
        .collect();

    let mut groups: BTreeMap<GroupKey, TeamRoundAggregate> = BTreeMap::new();
    for row in rows {
        report.processed += 1;
        let Some(team_key) = row.team_key() else {
            report.drop_row(format!(
                "{} r{} {} {}: no team, excluded from aggregation",
                row.season, row.round, row.match_key, row.player
            ));
            continue;
        };

        let agg = groups
            .entry((row.season, row.round, team_key.clone()))
            .or_insert_with(|| TeamRoundAggregate {
                season: row.season,
                round: row.round,
                team_key,
                team_display: row.team.clone().unwrap_or_default(),
                player_count: 0,
                values: vec![None; col_index.len()],
            });
        agg.player_count += 1;
        for (name, value) in &row.stats {
            if let Some(&i) = col_index.get(name.as_str()) {
                *agg.values[i].get_or_insert(0.0) += value;
            }
        }
    }

    for (key, agg) in groups {
        table.index.insert(key, table.rows.len());
        table.rows.push(agg);
    }
    (table, report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(team: Option<&str>, round: u32, stats: &[(&str, f64)]) -> PlayerStatRow {
        PlayerStatRow {
            season: 2024,
            round,
            match_key: "2024-1-Broncos-v-Storm".into(),
            team: team.map(str::to_string),
            player: "p".into(),
            number: None,
            position: None,
            stats: stats.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            data_issues: Vec::new(),
        }
    }

    #[test]
    fn sums_per_team_round() {
        let rows = vec![
            row(Some("Broncos"), 1, &[("Tackles", 20.0), ("Tries", 1.0)]),
            row(Some("broncos"), 1, &[("Tackles", 15.0), ("Tries", 0.0)]),
            row(Some("Storm"), 1, &[("Tackles", 30.0), ("Tries", 2.0)]),
        ];
        let (table, report) = aggregate_players(&rows, 0.8);
        assert_eq!(table.columns, vec!["Tackles", "Tries"]);
        assert_eq!(table.len(), 2);
        let broncos = table.lookup(2024, 1, "broncos").unwrap();
        assert_eq!(broncos.player_count, 2);
        assert_eq!(broncos.values, vec![Some(35.0), Some(1.0)]);
        assert_eq!(broncos.team_display, "Broncos");
        assert_eq!(report.dropped, 0);
    }

    #[test]
    fn sparse_columns_are_dropped_not_zero_filled() {
        let mut rows: Vec<PlayerStatRow> = (0..9)
            .map(|_| row(Some("Eels"), 2, &[("Tackles", 1.0)]))
            .collect();
        rows.push(row(Some("Eels"), 2, &[("Tackles", 1.0), ("Kick Metres", 40.0)]));
        let (table, report) = aggregate_players(&rows, 0.8);
        assert_eq!(table.columns, vec!["Tackles"]);
        assert_eq!(table.dropped_columns[0].column, "Kick Metres");
        assert!((table.dropped_columns[0].missing_ratio - 0.9).abs() < 1e-12);
        assert_eq!(report.flagged, 1);
    }

    #[test]
    fn column_absent_from_a_group_stays_none() {
        let rows = vec![
            row(Some("Eels"), 3, &[("Tackles", 5.0), ("Errors", 1.0)]),
            row(Some("Sharks"), 3, &[("Tackles", 7.0)]),
        ];
        let (table, _) = aggregate_players(&rows, 0.8);
        let sharks = table.lookup(2024, 3, "sharks").unwrap();
        assert_eq!(sharks.values, vec![Some(7.0), None]);
    }

    #[test]
    fn unresolved_team_rows_are_excluded() {
        let rows = vec![
            row(None, 1, &[("Tackles", 9.0)]),
            row(Some("Storm"), 1, &[("Tackles", 3.0)]),
        ];
        let (table, report) = aggregate_players(&rows, 0.8);
        assert_eq!(table.len(), 1);
        assert_eq!(report.dropped, 1);
        assert!(table.lookup(2024, 2, "storm").is_none());
    }

    #[test]
    fn latest_before_walks_back_across_rounds() {
        let rows = vec![
            row(Some("Storm"), 1, &[("Tackles", 3.0)]),
            row(Some("Storm"), 4, &[("Tackles", 6.0)]),
            row(Some("Eels"), 5, &[("Tackles", 8.0)]),
        ];
        let (table, _) = aggregate_players(&rows, 0.8);
        assert_eq!(table.latest_before(2024, 6, "storm").unwrap().round, 4);
        assert_eq!(table.latest_before(2024, 4, "storm").unwrap().round, 1);
        assert!(table.latest_before(2024, 1, "storm").is_none());
    }
}

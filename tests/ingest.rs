use std::fs;
use std::path::{Path, PathBuf};

use titan_nrl::config::PipelineConfig;
use titan_nrl::ingest::{ingest_all, match_file_path, player_file_path};
use titan_nrl::normalize::normalize_matches;

fn fixture_root() -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path
}

fn write(path: &Path, body: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("mkdir");
    }
    fs::write(path, body).expect("write fixture");
}

#[test]
fn reads_fixture_season_from_conventional_paths() {
    let cfg = PipelineConfig {
        data_dir: fixture_root(),
        years: vec![2024],
        ..PipelineConfig::default()
    };
    assert!(match_file_path(&cfg, 2024).ends_with("NRL/2024/NRL_data_2024.json"));
    assert!(player_file_path(&cfg, 2024).ends_with("NRL/2024/NRL_player_statistics_2024.json"));

    let summary = ingest_all(&cfg).expect("fixture should ingest");
    assert_eq!(summary.match_files_read, 1);
    assert_eq!(summary.player_files_read, 1);
    assert_eq!(summary.matches.len(), 7);
    assert_eq!(summary.players.len(), 11);
    assert!(summary.errors.is_empty());

    let storm_home = summary
        .matches
        .iter()
        .find(|m| m.home_team.as_deref() == Some("Storm") && m.away_team.as_deref() == Some("Broncos"))
        .expect("aliased HomeTeam/AwayTeam match");
    assert_eq!(storm_home.home_score, Some(serde_json::json!(30)));
    assert!(storm_home.url.is_some());
}

#[test]
fn malformed_year_is_skipped_with_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = PipelineConfig {
        data_dir: dir.path().to_path_buf(),
        years: vec![2023, 2024],
        ..PipelineConfig::default()
    };
    write(&match_file_path(&cfg, 2023), "{ this is not json");
    write(
        &match_file_path(&cfg, 2024),
        r#"{"2024": [{"3": [{"Home": "Raiders", "HomeScore": 14, "Away": "Roosters", "AwayScore": 16}]}]}"#,
    );

    let summary = ingest_all(&cfg).expect("one good year is enough");
    assert_eq!(summary.match_files_read, 1);
    assert_eq!(summary.errors.len(), 1);
    assert!(summary.errors[0].starts_with("parse error in"));
    assert!(summary.errors[0].contains("NRL_data_2023.json"));

    let (matches, _) = normalize_matches(&summary.matches);
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].round, 3);
    assert_eq!(matches[0].margin(), Some(-2));
}

#[test]
fn round_recovered_from_inner_field_when_key_has_none() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = PipelineConfig {
        data_dir: dir.path().to_path_buf(),
        years: vec![2022],
        ..PipelineConfig::default()
    };
    write(
        &match_file_path(&cfg, 2022),
        r#"{"NRL": [{"2022": {
            "Qualifying Final": [{"Home": "Panthers", "Away": "Eels", "Home_Score": 27, "Away_Score": 8, "Round": "Round 26"}],
            "Elimination Final": [{"Home": "Roosters", "Away": "Rabbitohs", "Home_Score": 14, "Away_Score": 30}]
        }}]}"#,
    );

    let summary = ingest_all(&cfg).expect("ingest");
    let (matches, report) = normalize_matches(&summary.matches);
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].round, 26);
    assert_eq!(report.dropped, 1);
    assert!(report.reasons[0].contains("no round"));
}

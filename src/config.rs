use std::env;
use std::ops::RangeInclusive;
use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

pub const DEFAULT_COMPETITION: &str = "NRL";
pub const DEFAULT_FIRST_YEAR: i32 = 2019;
pub const DEFAULT_LAST_YEAR: i32 = 2025;
pub const DEFAULT_MISSING_THRESHOLD: f64 = 0.8;
pub const DEFAULT_SEED: u64 = 42;
pub const DEFAULT_TREES: usize = 100;
pub const DEFAULT_TEST_FRACTION: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    /// Margin regression.
    Regression,
    /// Home win / loss classification.
    Classification,
}

impl Task {
    pub fn label(self) -> &'static str {
        match self {
            Task::Regression => "regression",
            Task::Classification => "classification",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "regression" | "reg" | "margin" => Some(Task::Regression),
            "classification" | "class" | "win" => Some(Task::Classification),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestSettings {
    pub trees: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

impl Default for ForestSettings {
    fn default() -> Self {
        Self {
            trees: DEFAULT_TREES,
            max_depth: 24,
            min_samples_split: 2,
            min_samples_leaf: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub data_dir: PathBuf,
    pub out_dir: PathBuf,
    pub competition: String,
    pub years: Vec<i32>,
    /// Columns missing from more than this share of player rows are dropped.
    pub missing_threshold: f64,
    pub seed: u64,
    pub test_fraction: f64,
    pub task: Task,
    pub forest: ForestSettings,
    pub home_jerseys: RangeInclusive<u32>,
    pub away_jerseys: RangeInclusive<u32>,
    pub overwrite: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            out_dir: PathBuf::from("outputs"),
            competition: DEFAULT_COMPETITION.to_string(),
            years: (DEFAULT_FIRST_YEAR..=DEFAULT_LAST_YEAR).collect(),
            missing_threshold: DEFAULT_MISSING_THRESHOLD,
            seed: DEFAULT_SEED,
            test_fraction: DEFAULT_TEST_FRACTION,
            task: Task::Regression,
            forest: ForestSettings::default(),
            home_jerseys: 1..=13,
            away_jerseys: 14..=24,
            overwrite: false,
        }
    }
}

impl PipelineConfig {
    /// Defaults overlaid with `.env.local`, `.env`, and `TITAN_*` variables.
    pub fn from_env() -> Self {
        Self::from_env_with_task(Task::Regression)
    }

    /// Like [`PipelineConfig::from_env`], with `task` used only when
    /// `TITAN_TASK` is unset or unrecognized.
    pub fn from_env_with_task(task: Task) -> Self {
        let _ = dotenvy::from_filename(".env.local");
        let _ = dotenvy::from_filename(".env");

        let mut cfg = Self::default();
        if let Some(dir) = env_string("TITAN_DATA_DIR") {
            cfg.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env_string("TITAN_OUT_DIR") {
            cfg.out_dir = PathBuf::from(dir);
        }
        if let Some(comp) = env_string("TITAN_COMPETITION") {
            cfg.competition = comp;
        }
        if let Some(years) = env_string("TITAN_YEARS").map(|raw| parse_years(&raw))
            && !years.is_empty()
        {
            cfg.years = years;
        }
        cfg.missing_threshold = env_parse("TITAN_MISSING_THRESHOLD").unwrap_or(cfg.missing_threshold);
        cfg.seed = env_parse("TITAN_SEED").unwrap_or(cfg.seed);
        cfg.forest.trees = env_parse("TITAN_TREES").unwrap_or(cfg.forest.trees);
        cfg.test_fraction = env_parse("TITAN_TEST_FRACTION").unwrap_or(cfg.test_fraction);
        cfg.task = task_or(env_string("TITAN_TASK").as_deref(), task);
        if let Some(raw) = env_string("TITAN_OVERWRITE") {
            cfg.overwrite = truthy(&raw);
        }
        cfg
    }

    pub fn validate(&self) -> Result<()> {
        if self.years.is_empty() {
            return Err(PipelineError::config("no years requested").into());
        }
        if self.competition.trim().is_empty() {
            return Err(PipelineError::config("competition name is empty").into());
        }
        if !(0.0..=1.0).contains(&self.missing_threshold) {
            return Err(PipelineError::config(format!(
                "missing threshold {} outside [0, 1]",
                self.missing_threshold
            ))
            .into());
        }
        if !(0.0..=0.9).contains(&self.test_fraction) {
            return Err(PipelineError::config(format!(
                "test fraction {} outside [0, 0.9]",
                self.test_fraction
            ))
            .into());
        }
        if self.forest.trees == 0 {
            return Err(PipelineError::config("tree count must be at least 1").into());
        }
        if self.home_jerseys.is_empty() || self.away_jerseys.is_empty() {
            return Err(PipelineError::config("jersey ranges must not be empty").into());
        }
        Ok(())
    }

    /// `"2019_2025"` for a span, `"2024"` for a single year.
    pub fn year_span_label(&self) -> String {
        let first = self.years.iter().min().copied().unwrap_or(DEFAULT_FIRST_YEAR);
        let last = self.years.iter().max().copied().unwrap_or(DEFAULT_LAST_YEAR);
        if first == last {
            first.to_string()
        } else {
            format!("{first}_{last}")
        }
    }
}

/// Accepts `2024`, `2019-2025`, or `2019,2021 2024`; result is sorted and deduplicated.
pub fn parse_years(raw: &str) -> Vec<i32> {
    let mut out = Vec::new();
    for part in raw.split([',', ';', ' ']) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((start, end)) = part.split_once('-') {
            let (Ok(start), Ok(end)) = (start.trim().parse::<i32>(), end.trim().parse::<i32>())
            else {
                continue;
            };
            if start <= end {
                out.extend(start..=end);
            }
        } else if let Ok(year) = part.parse::<i32>() {
            out.push(year);
        }
    }
    out.sort_unstable();
    out.dedup();
    out
}

fn task_or(raw: Option<&str>, fallback: Task) -> Task {
    raw.and_then(Task::parse).unwrap_or(fallback)
}

fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|raw| raw.parse::<T>().ok())
}

fn truthy(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_years_handles_ranges_and_lists() {
        assert_eq!(parse_years("2024"), vec![2024]);
        assert_eq!(parse_years("2019-2021"), vec![2019, 2020, 2021]);
        assert_eq!(parse_years("2025, 2019;2019"), vec![2019, 2025]);
        assert!(parse_years("abc").is_empty());
        assert!(parse_years("2025-2019").is_empty());
    }

    #[test]
    fn defaults_match_legacy_pipeline() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.competition, "NRL");
        assert_eq!(cfg.year_span_label(), "2019_2025");
        assert_eq!(cfg.seed, 42);
        assert_eq!(cfg.forest.trees, 100);
        assert!((cfg.missing_threshold - 0.8).abs() < 1e-12);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_threshold() {
        let cfg = PipelineConfig {
            missing_threshold: 1.5,
            ..PipelineConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::Config(_))
        ));
    }

    #[test]
    fn task_parse_accepts_aliases() {
        assert_eq!(Task::parse("Margin"), Some(Task::Regression));
        assert_eq!(Task::parse(" classification "), Some(Task::Classification));
        assert_eq!(Task::parse("tree"), None);
    }

    #[test]
    fn env_task_wins_over_mode_default() {
        assert_eq!(task_or(Some("regression"), Task::Classification), Task::Regression);
        assert_eq!(task_or(None, Task::Classification), Task::Classification);
        assert_eq!(task_or(Some("tree"), Task::Classification), Task::Classification);
    }
}

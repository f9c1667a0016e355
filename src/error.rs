use std::path::PathBuf;

use thiserror::Error;

/// Conditions a caller can tell apart from ordinary I/O failures.
///
/// These travel inside `anyhow::Error`; use `downcast_ref::<PipelineError>()`
/// to inspect them.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no match or player data found for any requested year {years:?}")]
    NoData { years: Vec<i32> },

    #[error("no training data: {0}")]
    NoTrainingData(String),

    #[error("no numeric statistic columns survived aggregation")]
    NoFeatureColumns,

    #[error(
        "refusing to overwrite non-empty {} ({bytes} bytes); pass --overwrite to replace it",
        path.display()
    )]
    DestinationExists { path: PathBuf, bytes: u64 },

    #[error("parse error in {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

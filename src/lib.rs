//! Reconciliation and feature build for rugby league season data.
//!
//! Stages run one way: [`ingest`] → [`normalize`] → [`aggregate`] → [`join`]
//! → [`estimate`] → [`export`], orchestrated by [`pipeline`].

pub mod aggregate;
pub mod config;
pub mod error;
pub mod estimate;
pub mod export;
pub mod forest;
pub mod ingest;
pub mod join;
pub mod metrics;
pub mod normalize;
pub mod pipeline;
pub mod report;

pub use config::{PipelineConfig, Task};
pub use error::PipelineError;
pub use pipeline::{Mode, run};

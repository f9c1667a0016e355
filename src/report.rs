use serde::Serialize;
use tracing::{info, warn};

const LOGGED_REASONS: usize = 8;

/// Row accounting for one pipeline stage.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StageReport {
    pub stage: String,
    pub processed: usize,
    pub flagged: usize,
    pub dropped: usize,
    pub reasons: Vec<String>,
}

impl StageReport {
    pub fn new(stage: &str) -> Self {
        Self {
            stage: stage.to_string(),
            ..Default::default()
        }
    }

    pub fn flag(&mut self, reason: impl Into<String>) {
        self.flagged += 1;
        self.reasons.push(reason.into());
    }

    pub fn drop_row(&mut self, reason: impl Into<String>) {
        self.dropped += 1;
        self.reasons.push(reason.into());
    }

    /// One summary line, then a capped sample of reasons.
    pub fn log(&self) {
        info!(
            stage = %self.stage,
            processed = self.processed,
            flagged = self.flagged,
            dropped = self.dropped,
            "stage complete"
        );
        for reason in self.reasons.iter().take(LOGGED_REASONS) {
            warn!(stage = %self.stage, "{reason}");
        }
        if self.reasons.len() > LOGGED_REASONS {
            warn!(
                stage = %self.stage,
                "... {} more reasons in the run manifest",
                self.reasons.len() - LOGGED_REASONS
            );
        }
    }
}

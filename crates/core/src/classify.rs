use std::fmt;

use serde::{Deserialize, Serialize};

pub const UNKNOWN_LABEL: &str = "unknown";

const SUCCESS_TOKEN: &str = "SUCCESS";
const FAILURE_TOKENS: &[&str] = &["FAILED", "ERROR"];
const DRIVE_LABEL_MARKER: &str = "Drive Label:";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IngestOutcome {
    Success,
    Error,
    #[default]
    Unknown,
}

impl fmt::Display for IngestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Unknown => "unknown",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogClassification {
    pub outcome: IngestOutcome,
    pub drive_label: String,
}

impl Default for LogClassification {
    fn default() -> Self {
        Self {
            outcome: IngestOutcome::Unknown,
            drive_label: UNKNOWN_LABEL.to_string(),
        }
    }
}

/// Token heuristics over free-form ingest log text. `SUCCESS` anywhere wins
/// over any failure token.
pub fn classify_log(text: &str) -> LogClassification {
    LogClassification {
        outcome: classify_outcome(text),
        drive_label: extract_drive_label(text).unwrap_or_else(|| UNKNOWN_LABEL.to_string()),
    }
}

pub fn classify_outcome(text: &str) -> IngestOutcome {
    if text.contains(SUCCESS_TOKEN) {
        IngestOutcome::Success
    } else if FAILURE_TOKENS.iter().any(|token| text.contains(token)) {
        IngestOutcome::Error
    } else {
        IngestOutcome::Unknown
    }
}

/// Trimmed remainder after the marker on the last line that carries it.
pub fn extract_drive_label(text: &str) -> Option<String> {
    text.lines()
        .filter_map(|line| {
            line.split_once(DRIVE_LABEL_MARKER)
                .map(|(_, rest)| rest.trim().to_string())
        })
        .last()
}

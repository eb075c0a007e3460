use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Failure classes that read operations absorb into degraded results.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// A status record, ingest root, session folder or log artifact is absent.
    MissingResource,
    /// A status record or device-topology payload could not be parsed.
    MalformedData,
    /// A single file inside a walk could not be read.
    PartialIo,
    /// An external program exited non-zero or could not be started.
    ExternalProcess,
    /// A caller supplied a missing or unusable argument.
    InvalidInput,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::MissingResource => "missing_resource",
            Self::MalformedData => "malformed_data",
            Self::PartialIo => "partial_io",
            Self::ExternalProcess => "external_process",
            Self::InvalidInput => "invalid_input",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Issue {
    pub kind: IssueKind,
    pub detail: String,
}

impl Issue {
    /// Builds an issue and logs it where it happened.
    pub fn record(kind: IssueKind, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        warn!(kind = %kind, "{detail}");
        Self { kind, detail }
    }

    /// Same as [`Issue::record`] for conditions that are part of normal
    /// operation, such as an idle pipeline with no status record yet.
    pub fn routine(kind: IssueKind, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        debug!(kind = %kind, "{detail}");
        Self { kind, detail }
    }
}

/// A value that is always usable, plus whatever went wrong while producing it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Observed<T> {
    pub value: T,
    pub issues: Vec<Issue>,
}

impl<T> Observed<T> {
    pub fn clean(value: T) -> Self {
        Self {
            value,
            issues: Vec::new(),
        }
    }

    pub fn with_issues(value: T, issues: Vec<Issue>) -> Self {
        Self { value, issues }
    }

    pub fn has_issue(&self, kind: IssueKind) -> bool {
        self.issues.iter().any(|issue| issue.kind == kind)
    }

    pub fn into_value(self) -> T {
        self.value
    }
}

use std::cmp::Reverse;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use walkdir::WalkDir;

use crate::classify::{classify_log, IngestOutcome, LogClassification};
use crate::config::MonitorConfig;
use crate::error::LookupError;
use crate::issue::{Issue, IssueKind, Observed};
use crate::size::format_size;

pub const LOG_PREFIX: &str = "ingest_log";
pub const CHECKSUM_PREFIX: &str = "checksums";

/// Summary of one session folder under the ingest root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestSession {
    /// Folder name; the pipeline names folders after the ingest date.
    #[serde(rename = "date")]
    pub name: String,
    pub timestamp: String,
    pub file_count: u64,
    pub total_size: String,
    pub total_size_bytes: u64,
    pub status: IngestOutcome,
    pub drive_label: String,
    pub log_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFolder {
    pub name: String,
    pub path: PathBuf,
    pub modified: SystemTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionLog {
    pub session: String,
    pub log_file: String,
    pub log: String,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct FolderTotals {
    file_count: u64,
    total_size_bytes: u64,
}

pub fn is_reserved_artifact(file_name: &str) -> bool {
    file_name.starts_with(LOG_PREFIX) || file_name.starts_with(CHECKSUM_PREFIX)
}

/// Most recent sessions first, at most `limit` of them. Ranking happens
/// before any folder is walked, so cost is bounded by `limit`.
pub fn list_recent(config: &MonitorConfig, limit: usize) -> Observed<Vec<IngestSession>> {
    let mut issues = Vec::new();
    let folders = match enumerate_session_folders(&config.ingest_root, &mut issues) {
        Some(folders) => folders,
        None => return Observed::with_issues(Vec::new(), issues),
    };

    let retained = rank_sessions(folders, limit);
    let sessions = retained
        .iter()
        .map(|folder| summarize_session(folder, &mut issues))
        .collect::<Vec<_>>();

    info!(
        root = %config.ingest_root.display(),
        sessions = sessions.len(),
        issues = issues.len(),
        "ingest history aggregated"
    );
    Observed::with_issues(sessions, issues)
}

pub fn rank_sessions(mut folders: Vec<SessionFolder>, limit: usize) -> Vec<SessionFolder> {
    folders.sort_by_key(|folder| Reverse(folder.modified));
    folders.truncate(limit);
    folders
}

/// `None` means the root itself could not be listed.
fn enumerate_session_folders(root: &Path, issues: &mut Vec<Issue>) -> Option<Vec<SessionFolder>> {
    let reader = match fs::read_dir(root) {
        Ok(reader) => reader,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            issues.push(Issue::routine(
                IssueKind::MissingResource,
                format!("ingest root not found: {}", root.display()),
            ));
            return None;
        }
        Err(err) => {
            issues.push(Issue::record(
                IssueKind::PartialIo,
                format!("failed to list ingest root {}: {err}", root.display()),
            ));
            return None;
        }
    };

    let mut folders = Vec::new();
    for item in reader {
        let entry = match item {
            Ok(entry) => entry,
            Err(err) => {
                issues.push(Issue::record(
                    IssueKind::PartialIo,
                    format!("directory entry under {} unreadable: {err}", root.display()),
                ));
                continue;
            }
        };
        let path = entry.path();
        // Follows symlinks so linked session folders still count.
        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(err) => {
                issues.push(Issue::record(
                    IssueKind::PartialIo,
                    format!("metadata read failed for {}: {err}", path.display()),
                ));
                continue;
            }
        };
        if !metadata.is_dir() {
            continue;
        }
        let modified = match metadata.modified() {
            Ok(modified) => modified,
            Err(err) => {
                issues.push(Issue::record(
                    IssueKind::PartialIo,
                    format!("modification time unavailable for {}: {err}", path.display()),
                ));
                SystemTime::UNIX_EPOCH
            }
        };
        folders.push(SessionFolder {
            name: entry.file_name().to_string_lossy().to_string(),
            path,
            modified,
        });
    }
    Some(folders)
}

fn summarize_session(folder: &SessionFolder, issues: &mut Vec<Issue>) -> IngestSession {
    let totals = folder_totals(&folder.path, issues);
    let log_file = find_log_artifact(&folder.path, issues);

    let classification = match &log_file {
        Some(name) => match fs::read(folder.path.join(name)) {
            Ok(bytes) => classify_log(&String::from_utf8_lossy(&bytes)),
            Err(err) => {
                issues.push(Issue::record(
                    IssueKind::PartialIo,
                    format!(
                        "log artifact {} unreadable: {err}",
                        folder.path.join(name).display()
                    ),
                ));
                LogClassification::default()
            }
        },
        None => LogClassification::default(),
    };

    IngestSession {
        name: folder.name.clone(),
        timestamp: DateTime::<Utc>::from(folder.modified)
            .to_rfc3339_opts(SecondsFormat::Secs, true),
        file_count: totals.file_count,
        total_size: format_size(totals.total_size_bytes),
        total_size_bytes: totals.total_size_bytes,
        status: classification.outcome,
        drive_label: classification.drive_label,
        log_file,
    }
}

fn folder_totals(folder: &Path, issues: &mut Vec<Issue>) -> FolderTotals {
    let mut totals = FolderTotals::default();
    for item in WalkDir::new(folder).follow_links(false) {
        let entry = match item {
            Ok(entry) => entry,
            Err(err) => {
                issues.push(Issue::record(
                    IssueKind::PartialIo,
                    format!("walk error under {}: {err}", folder.display()),
                ));
                continue;
            }
        };
        if entry.file_type().is_dir() {
            continue;
        }
        if is_reserved_artifact(&entry.file_name().to_string_lossy()) {
            continue;
        }
        // A file removed mid-walk is skipped rather than failing the session.
        let size = match entry.metadata() {
            Ok(metadata) => metadata.len(),
            Err(err) => {
                issues.push(Issue::record(
                    IssueKind::PartialIo,
                    format!("metadata read failed for {}: {err}", entry.path().display()),
                ));
                continue;
            }
        };
        totals.file_count += 1;
        totals.total_size_bytes = totals.total_size_bytes.saturating_add(size);
    }
    totals
}

/// Picks the log artifact directly inside `folder`. Directory order differs
/// between filesystems, so the smallest matching name is chosen; more than
/// one candidate is reported as an issue.
pub fn find_log_artifact(folder: &Path, issues: &mut Vec<Issue>) -> Option<String> {
    let reader = match fs::read_dir(folder) {
        Ok(reader) => reader,
        Err(err) => {
            issues.push(Issue::record(
                IssueKind::PartialIo,
                format!("failed to list {}: {err}", folder.display()),
            ));
            return None;
        }
    };

    let mut candidates = reader
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_file())
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .filter(|name| name.starts_with(LOG_PREFIX))
        .collect::<Vec<_>>();
    candidates.sort();

    if candidates.len() > 1 {
        issues.push(Issue::record(
            IssueKind::MalformedData,
            format!(
                "{} holds {} log artifacts ({}); using {}",
                folder.display(),
                candidates.len(),
                candidates.join(", "),
                candidates[0]
            ),
        ));
    }
    candidates.into_iter().next()
}

/// Full log text of one named session.
pub fn read_session_log(config: &MonitorConfig, session: &str) -> Result<SessionLog, LookupError> {
    if !is_plain_folder_name(session) {
        return Err(LookupError::NotFound("folder"));
    }
    let folder = config.ingest_root.join(session);
    if !folder.is_dir() {
        return Err(LookupError::NotFound("folder"));
    }

    let mut issues = Vec::new();
    let log_file = find_log_artifact(&folder, &mut issues).ok_or(LookupError::NotFound("log"))?;
    let path = folder.join(&log_file);
    let bytes = fs::read(&path).map_err(|source| LookupError::Io {
        what: path.display().to_string(),
        source,
    })?;

    Ok(SessionLog {
        session: session.to_string(),
        log_file,
        log: String::from_utf8_lossy(&bytes).to_string(),
    })
}

/// Exactly one normal path component: no separators, `.` or `..`.
pub fn is_plain_folder_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(['/', '\\'])
}

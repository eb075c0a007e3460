use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::config::MonitorConfig;
use crate::issue::{Issue, IssueKind, Observed};

pub const IDLE_MESSAGE: &str = "Ready for drive";

/// Pipeline state as written by the ingest process. Unrecognised values are
/// kept verbatim so newer pipeline states still round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PipelineState {
    #[default]
    Idle,
    Running,
    Error,
    Other(String),
}

impl From<String> for PipelineState {
    fn from(value: String) -> Self {
        match value.as_str() {
            "idle" => Self::Idle,
            "running" => Self::Running,
            "error" => Self::Error,
            _ => Self::Other(value),
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Running => f.write_str("running"),
            Self::Error => f.write_str("error"),
            Self::Other(value) => f.write_str(value),
        }
    }
}

impl Serialize for PipelineState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatusSnapshot {
    pub status: PipelineState,
    pub message: String,
    #[serde(serialize_with = "serialize_progress")]
    pub progress: f64,
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub device: String,
    pub drive_label: String,
    pub total_files: u64,
    pub total_size: String,
    pub transferred_files: u64,
    pub current_file: String,
    pub dest_folder: String,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            status: PipelineState::Idle,
            message: IDLE_MESSAGE.to_string(),
            progress: 0.0,
            timestamp: Utc::now(),
            device: "none".to_string(),
            drive_label: "none".to_string(),
            total_files: 0,
            total_size: "0".to_string(),
            transferred_files: 0,
            current_file: String::new(),
            dest_folder: String::new(),
        }
    }
}

fn serialize_timestamp<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Secs, true))
}

// Whole percentages go out as integers, the way the pipeline writes them.
fn serialize_progress<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.fract() == 0.0 && (0.0..=u32::MAX as f64).contains(value) {
        serializer.serialize_u64(*value as u64)
    } else {
        serializer.serialize_f64(*value)
    }
}

/// Reads the current-operation record. Never fails: an absent or corrupt
/// record yields the idle snapshot plus the issue that caused it.
pub fn read_status(config: &MonitorConfig) -> Observed<StatusSnapshot> {
    read_status_file(&config.status_file)
}

pub fn read_status_file(path: &Path) -> Observed<StatusSnapshot> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            // No record simply means the pipeline has not run yet.
            return Observed::with_issues(
                StatusSnapshot::default(),
                vec![Issue::routine(
                    IssueKind::MissingResource,
                    format!("status record not found: {}", path.display()),
                )],
            );
        }
        Err(err) => {
            let issue = Issue::record(
                IssueKind::PartialIo,
                format!("status record unreadable at {}: {err}", path.display()),
            );
            return Observed::with_issues(StatusSnapshot::default(), vec![issue]);
        }
    };

    let record = match serde_json::from_str::<Value>(&data) {
        Ok(Value::Object(record)) => record,
        Ok(other) => {
            let issue = Issue::record(
                IssueKind::MalformedData,
                format!(
                    "status record at {} is not an object: {}",
                    path.display(),
                    json_type(&other)
                ),
            );
            return Observed::with_issues(StatusSnapshot::default(), vec![issue]);
        }
        Err(err) => {
            let issue = Issue::record(
                IssueKind::MalformedData,
                format!("status record at {} did not parse: {err}", path.display()),
            );
            return Observed::with_issues(StatusSnapshot::default(), vec![issue]);
        }
    };

    let mut fields = RecordFields {
        record: &record,
        path,
        issues: Vec::new(),
    };
    let defaults = StatusSnapshot::default();
    let snapshot = StatusSnapshot {
        status: fields
            .take("status", |value| value.as_str().map(|s| PipelineState::from(s.to_string())))
            .unwrap_or(defaults.status),
        message: fields.take("message", text).unwrap_or(defaults.message),
        progress: fields.take("progress", number).unwrap_or(defaults.progress),
        timestamp: fields.take("timestamp", timestamp).unwrap_or(defaults.timestamp),
        device: fields.take("device", text).unwrap_or(defaults.device),
        drive_label: fields.take("drive_label", text).unwrap_or(defaults.drive_label),
        total_files: fields.take("total_files", count).unwrap_or(defaults.total_files),
        total_size: fields.take("total_size", text).unwrap_or(defaults.total_size),
        transferred_files: fields
            .take("transferred_files", count)
            .unwrap_or(defaults.transferred_files),
        current_file: fields.take("current_file", text).unwrap_or(defaults.current_file),
        dest_folder: fields.take("dest_folder", text).unwrap_or(defaults.dest_folder),
    };
    Observed::with_issues(snapshot, fields.issues)
}

/// Field-at-a-time access to the raw record. A field that is present but
/// does not convert falls back to its default and leaves an issue behind.
struct RecordFields<'a> {
    record: &'a Map<String, Value>,
    path: &'a Path,
    issues: Vec<Issue>,
}

impl RecordFields<'_> {
    fn take<T>(&mut self, name: &str, convert: impl Fn(&Value) -> Option<T>) -> Option<T> {
        let value = match self.record.get(name) {
            None | Some(Value::Null) => return None,
            Some(value) => value,
        };
        let converted = convert(value);
        if converted.is_none() {
            self.issues.push(Issue::record(
                IssueKind::MalformedData,
                format!(
                    "status field {name} in {} has unusable value {value}",
                    self.path.display()
                ),
            ));
        }
        converted
    }
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn number(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().trim_end_matches('%').trim().parse::<f64>().ok(),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}

fn count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64().or_else(|| {
            number
                .as_f64()
                .filter(|float| *float >= 0.0 && float.fract() == 0.0 && *float <= u64::MAX as f64)
                .map(|float| float as u64)
        }),
        Value::String(text) => text.trim().parse::<u64>().ok(),
        _ => None,
    }
}

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

// The pipeline is a shell script; offset-qualified, naive UTC and epoch stamps all occur.
fn timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(raw) => {
            let raw = raw.trim();
            if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
                return Some(parsed.with_timezone(&Utc));
            }
            NAIVE_FORMATS
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
                .map(|naive| naive.and_utc())
        }
        Value::Number(number) => number
            .as_i64()
            .and_then(|seconds| DateTime::<Utc>::from_timestamp(seconds, 0)),
        _ => None,
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

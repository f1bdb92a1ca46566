use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// How a build finished, derived from the callback payload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BuildOutcome {
    /// Compiled fine and merged every test-merge without conflicts.
    CleanSuccess,
    /// Compiled fine but some test-merges conflicted.
    Success,
    Failure,
    Cancelled,
}

impl BuildOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildOutcome::CleanSuccess => "clean_success",
            BuildOutcome::Success => "success",
            BuildOutcome::Failure => "failure",
            BuildOutcome::Cancelled => "cancelled",
        }
    }
}

/// The CI service reports errors either as a flag or as the error text itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ErrorIndicator {
    Flag(bool),
    Text(String),
}

impl Default for ErrorIndicator {
    fn default() -> Self {
        ErrorIndicator::Flag(false)
    }
}

impl ErrorIndicator {
    pub fn is_error(&self) -> bool {
        match self {
            ErrorIndicator::Flag(flag) => *flag,
            ErrorIndicator::Text(text) => !text.is_empty(),
        }
    }

    /// Error text if the CI service sent one.
    pub fn text(&self) -> Option<&str> {
        match self {
            ErrorIndicator::Text(text) => Some(text.as_str()),
            ErrorIndicator::Flag(_) => None,
        }
    }

    /// Text shown for error-only callbacks.
    pub fn describe(&self) -> String {
        match self {
            ErrorIndicator::Flag(true) => "unknown error".to_string(),
            ErrorIndicator::Flag(false) => "false".to_string(),
            ErrorIndicator::Text(text) => text.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MergeConflict {
    #[serde(rename = "prId")]
    pub pr_id: serde_json::Value,
    #[serde(default)]
    pub files: serde_json::Value,
}

impl MergeConflict {
    pub fn pr_label(&self) -> String {
        value_label(&self.pr_id)
    }

    pub fn files_label(&self) -> String {
        match &self.files {
            serde_json::Value::Array(items) => items
                .iter()
                .map(value_label)
                .collect::<Vec<_>>()
                .join(", "),
            other => value_label(other),
        }
    }
}

fn value_label(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// One build-completion notification from a build worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildEvent {
    pub server: String,
    pub commit: String,
    pub branch: String,
    pub author: String,
    pub message: String,
    pub compile_log: String,
    pub error: ErrorIndicator,
    pub cancelled: bool,
    pub merge_conflicts: Vec<MergeConflict>,
}

impl BuildEvent {
    pub fn outcome(&self) -> BuildOutcome {
        if self.cancelled {
            BuildOutcome::Cancelled
        } else if self.error.is_error() {
            BuildOutcome::Failure
        } else if self.merge_conflicts.is_empty() {
            BuildOutcome::CleanSuccess
        } else {
            BuildOutcome::Success
        }
    }

    pub fn short_commit(&self) -> &str {
        short_hash(&self.commit)
    }

    /// First line of the commit message.
    pub fn subject(&self) -> &str {
        self.message.split('\n').next().unwrap_or_default()
    }
}

pub fn short_hash(commit: &str) -> &str {
    match commit.char_indices().nth(7) {
        Some((idx, _)) => &commit[..idx],
        None => commit,
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("build callback is missing field `{0}`")]
    MissingField(&'static str),
}

/// Raw JSON body posted by the CI service when a build ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildFinishedPayload {
    pub api_key: String,
    pub server: String,
    #[serde(default)]
    pub last_compile: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub commit: Option<String>,
    #[serde(default)]
    pub cancelled: Option<bool>,
    #[serde(default)]
    pub error: ErrorIndicator,
    #[serde(default, rename = "mapSwitch")]
    pub map_switch: Option<i64>,
    #[serde(default, rename = "mergeConflicts")]
    pub merge_conflicts: Option<Vec<MergeConflict>>,
}

/// A callback is either a finished build or a bare error report without commit data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundBuild {
    Finished(BuildEvent),
    Errored { server: String, error: ErrorIndicator },
}

impl BuildFinishedPayload {
    pub fn into_inbound(self) -> Result<InboundBuild, EventError> {
        let server = self.server.trim().to_string();
        let Some(message) = self.message else {
            return Ok(InboundBuild::Errored {
                server,
                error: self.error,
            });
        };
        let required = |value: Option<String>, name: &'static str| {
            value
                .map(|v| v.trim().to_string())
                .ok_or(EventError::MissingField(name))
        };
        Ok(InboundBuild::Finished(BuildEvent {
            server,
            commit: required(self.commit, "commit")?,
            branch: required(self.branch, "branch")?,
            author: required(self.author, "author")?,
            message: message.trim().to_string(),
            compile_log: required(self.last_compile, "last_compile")?,
            error: self.error,
            cancelled: self.cancelled.unwrap_or(false),
            merge_conflicts: self.merge_conflicts.unwrap_or_default(),
        }))
    }
}

/// One active test-merge as reported by the CI service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestMergeRecord {
    #[serde(rename = "PR")]
    pub pr: i64,
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default)]
    pub requester: Option<String>,
    #[serde(default)]
    pub updater: Option<String>,
    #[serde(default, deserialize_with = "deserialize_iso_datetime")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_iso_datetime")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub commit: Option<String>,
}

/// Accepts RFC 3339 timestamps as well as naive ISO timestamps (assumed UTC).
fn deserialize_iso_datetime<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    let Some(raw) = raw.filter(|s| !s.trim().is_empty()) else {
        return Ok(None);
    };
    parse_iso_datetime(&raw)
        .map(Some)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
}

pub fn parse_iso_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// A game server known to the fleet directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ServerInfo {
    pub id: String,
    pub short_name: String,
    /// Identity the CI service uses for this server's builds.
    pub tgs: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
}

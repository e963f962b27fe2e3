//! Data models for alignment jobs.
//!
//! Defines the job record, its status state machine, and sequence references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Status of an alignment job.
///
/// Transitions only move forward through
/// `created → getfiles → waiting → started → indexing → terminal`,
/// and `error` can be reached from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    Created,
    #[serde(rename = "getfiles")]
    GetFiles,
    Waiting,
    Started,
    Indexing,
    Success, // terminal
    NoMatch, // terminal
    Error,   // terminal
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Created => "created",
            JobStatus::GetFiles => "getfiles",
            JobStatus::Waiting => "waiting",
            JobStatus::Started => "started",
            JobStatus::Indexing => "indexing",
            JobStatus::Success => "success",
            JobStatus::NoMatch => "no-match",
            JobStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(JobStatus::Created),
            "getfiles" => Some(JobStatus::GetFiles),
            "waiting" => Some(JobStatus::Waiting),
            "started" => Some(JobStatus::Started),
            "indexing" => Some(JobStatus::Indexing),
            "success" => Some(JobStatus::Success),
            "no-match" => Some(JobStatus::NoMatch),
            "error" => Some(JobStatus::Error),
            _ => None,
        }
    }

    /// Returns true for `success`, `no-match` and `error`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::NoMatch | JobStatus::Error
        )
    }

    fn rank(&self) -> u8 {
        match self {
            JobStatus::Created => 0,
            JobStatus::GetFiles => 1,
            JobStatus::Waiting => 2,
            JobStatus::Started => 3,
            JobStatus::Indexing => 4,
            JobStatus::Success | JobStatus::NoMatch | JobStatus::Error => 5,
        }
    }

    /// Whether the state graph allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            JobStatus::Error => true,
            // the aligner decides no-match right after it exits
            JobStatus::NoMatch => *self == JobStatus::Started,
            JobStatus::Success => *self == JobStatus::Indexing,
            _ => next.rank() > self.rank(),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a sequence file comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SequenceKind {
    /// Already staged on the local filesystem (e.g. an upload).
    Local,
    /// To be downloaded from an `http(s)` or `ftp` URL.
    Remote,
}

/// Which side of the comparison a sequence plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceRole {
    Query,
    Target,
}

impl SequenceRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SequenceRole::Query => "query",
            SequenceRole::Target => "target",
        }
    }

    /// Name of the hidden marker file recording the resolved path.
    pub fn marker_file_name(&self) -> String {
        format!(".{}", self.as_str())
    }
}

/// A pointer to a target or query sequence file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceReference {
    pub name: String,
    pub location: String,
    pub kind: SequenceKind,
}

impl SequenceReference {
    pub fn local(location: impl Into<String>) -> Self {
        let location = location.into();
        let name = display_name(file_name_of(&location));
        Self {
            name,
            location,
            kind: SequenceKind::Local,
        }
    }

    pub fn remote(url: impl Into<String>) -> Self {
        let location = url.into();
        let name = display_name(location.rsplit('/').next().unwrap_or(&location));
        Self {
            name,
            location,
            kind: SequenceKind::Remote,
        }
    }

    /// Builds a reference from user input: URLs are remote, anything else local.
    pub fn from_input(input: &str) -> Self {
        if is_remote_location(input) {
            Self::remote(input)
        } else {
            Self::local(input)
        }
    }

    /// Rebuilds a reference from the contents of a `.query`/`.target` marker file.
    ///
    /// The marker holds the job-owned path (`<dir>/<role>_<file>`), so the role
    /// prefix is dropped when deriving the display name.
    pub fn from_marker(contents: &str) -> Self {
        let location = contents.lines().next().unwrap_or("").trim().to_string();
        let file_name = file_name_of(&location);
        let unprefixed = file_name
            .split_once('_')
            .map(|(_, rest)| rest)
            .unwrap_or(file_name);
        Self {
            name: display_name(unprefixed),
            location,
            kind: SequenceKind::Local,
        }
    }
}

pub fn is_remote_location(location: &str) -> bool {
    ["http://", "https://", "ftp://"]
        .iter()
        .any(|scheme| location.starts_with(scheme))
}

fn file_name_of(location: &str) -> &str {
    Path::new(location)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(location)
}

/// Display name of a sequence file: compression suffix and extension stripped.
pub fn display_name(file_name: &str) -> String {
    let without_gz = file_name.replace(".gz", "");
    match without_gz.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => without_gz,
    }
}

/// Persistent job record.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: String,
    pub email: Option<String>,
    pub batch_type: String,
    pub status: JobStatus,
    pub error: Option<String>,
    pub process_id: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub query: Option<SequenceReference>,
    pub target: Option<SequenceReference>,
}

impl Job {
    pub fn new(id: impl Into<String>, batch_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
            batch_type: batch_type.into(),
            status: JobStatus::Created,
            error: None,
            process_id: None,
            created_at: Utc::now(),
            query: None,
            target: None,
        }
    }

    /// True when no query was given and the target is compared against itself.
    pub fn is_all_vs_all(&self) -> bool {
        self.query.is_none()
    }
}

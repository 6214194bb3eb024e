//! Task identity bound to repository state.
//!
//! A task id has the form `<check>[#<issue>]@<fingerprint>`. The fingerprint
//! ties the id to the commit and working tree it was derived from, so an id
//! minted before the repository changed is rejected instead of acted on.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::core::types::{CheckResult, CheckStatus, Priority};

/// Maximum tasks listed per check.
pub const MAX_TASKS_PER_CHECK: usize = 10;
/// Byte budget for a task summary.
pub const SUMMARY_LIMIT_BYTES: usize = 200;
/// Byte budget for a task rationale.
pub const REASON_LIMIT_BYTES: usize = 160;
/// Hex characters kept from the state digest.
pub const FINGERPRINT_LEN: usize = 12;

const ELLIPSIS: &str = "...";

/// Digest of `HEAD` plus `git status --porcelain` output.
pub fn fingerprint_digest(head: &str, status: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(head.trim().as_bytes());
    hasher.update(status.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..FINGERPRINT_LEN].to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskRefError {
    #[error("invalid task id '{id}': expected <check>[#<issue>]@<fingerprint>")]
    MissingFingerprint { id: String },
    #[error("invalid task id '{id}': more than one '@'")]
    MultipleAt { id: String },
    #[error("invalid task id '{id}': empty check id")]
    EmptyCheck { id: String },
    #[error("invalid task id '{id}': empty fingerprint")]
    EmptyFingerprint { id: String },
    #[error("invalid task id '{id}': issue index must be a positive integer (got '{index}')")]
    InvalidIssueIndex { id: String, index: String },
}

/// Task id minted against a repository state that no longer exists.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "stale task id '{task_id}': repository state changed (task fingerprint {task_fingerprint}, current {current}); run `dun tasks` to get fresh ids"
)]
pub struct StaleTaskError {
    pub task_id: String,
    pub task_fingerprint: String,
    pub current: String,
}

/// Parsed reference to a whole check or one of its issues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRef {
    pub check_id: String,
    /// 1-based; `None` addresses the whole check.
    pub issue_index: Option<usize>,
    pub fingerprint: String,
}

impl TaskRef {
    pub fn whole_check(check_id: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        Self {
            check_id: check_id.into(),
            issue_index: None,
            fingerprint: fingerprint.into(),
        }
    }

    pub fn issue(
        check_id: impl Into<String>,
        issue_index: usize,
        fingerprint: impl Into<String>,
    ) -> Self {
        Self {
            check_id: check_id.into(),
            issue_index: Some(issue_index),
            fingerprint: fingerprint.into(),
        }
    }

    /// Accept the reference only while it matches the live fingerprint.
    pub fn validate(&self, current: &str) -> Result<(), StaleTaskError> {
        if self.fingerprint == current {
            return Ok(());
        }
        Err(StaleTaskError {
            task_id: self.to_string(),
            task_fingerprint: self.fingerprint.clone(),
            current: if current.is_empty() {
                "unknown".to_string()
            } else {
                current.to_string()
            },
        })
    }
}

impl fmt::Display for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.issue_index {
            Some(index) => write!(f, "{}#{}@{}", self.check_id, index, self.fingerprint),
            None => write!(f, "{}@{}", self.check_id, self.fingerprint),
        }
    }
}

impl FromStr for TaskRef {
    type Err = TaskRefError;

    fn from_str(id: &str) -> Result<Self, Self::Err> {
        parse_task_ref(id)
    }
}

pub fn parse_task_ref(id: &str) -> Result<TaskRef, TaskRefError> {
    let trimmed = id.trim();
    let owned = || trimmed.to_string();
    let (head, fingerprint) = trimmed
        .split_once('@')
        .ok_or_else(|| TaskRefError::MissingFingerprint { id: owned() })?;
    if fingerprint.contains('@') {
        return Err(TaskRefError::MultipleAt { id: owned() });
    }
    if fingerprint.is_empty() {
        return Err(TaskRefError::EmptyFingerprint { id: owned() });
    }

    let (check_id, issue_index) = match head.split_once('#') {
        Some((check_id, index)) => {
            let parsed = index
                .parse::<usize>()
                .ok()
                .filter(|value| *value > 0)
                .ok_or_else(|| TaskRefError::InvalidIssueIndex {
                    id: owned(),
                    index: index.to_string(),
                })?;
            (check_id, Some(parsed))
        }
        None => (head, None),
    };
    if check_id.is_empty() {
        return Err(TaskRefError::EmptyCheck { id: owned() });
    }

    Ok(TaskRef {
        check_id: check_id.to_string(),
        issue_index,
        fingerprint: fingerprint.to_string(),
    })
}

/// One addressable unit of work, trimmed for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskItem {
    pub id: String,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Bounded task listing for a single check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskGroup {
    pub check_id: String,
    pub status: CheckStatus,
    pub priority: Priority,
    pub signal: String,
    pub tasks: Vec<TaskItem>,
    /// Issues omitted beyond [`MAX_TASKS_PER_CHECK`].
    pub omitted: usize,
}

/// Group a check's findings into tasks bound to `fingerprint`.
pub fn build_task_group(check: &CheckResult, fingerprint: &str) -> TaskGroup {
    let reason = check
        .detail
        .as_deref()
        .map(|detail| truncate(detail.trim(), REASON_LIMIT_BYTES))
        .filter(|detail| !detail.is_empty());

    let (tasks, omitted) = if let Some(envelope) = &check.prompt {
        let summary = envelope.summary.as_deref().unwrap_or(&check.signal);
        let task = TaskItem {
            id: TaskRef::whole_check(&check.id, fingerprint).to_string(),
            summary: truncate(summary, SUMMARY_LIMIT_BYTES),
            reason,
            path: None,
        };
        (vec![task], 0)
    } else if !check.issues.is_empty() {
        let tasks = check
            .issues
            .iter()
            .take(MAX_TASKS_PER_CHECK)
            .enumerate()
            .map(|(idx, issue)| TaskItem {
                id: TaskRef::issue(&check.id, idx + 1, fingerprint).to_string(),
                summary: truncate(&issue.summary, SUMMARY_LIMIT_BYTES),
                reason: reason.clone(),
                path: issue.path.clone(),
            })
            .collect();
        (
            tasks,
            check.issues.len().saturating_sub(MAX_TASKS_PER_CHECK),
        )
    } else {
        let task = TaskItem {
            id: TaskRef::whole_check(&check.id, fingerprint).to_string(),
            summary: truncate(&check.signal, SUMMARY_LIMIT_BYTES),
            reason,
            path: None,
        };
        (vec![task], 0)
    };

    TaskGroup {
        check_id: check.id.clone(),
        status: check.status,
        priority: check.priority(),
        signal: check.signal.clone(),
        tasks,
        omitted,
    }
}

/// Cut `text` to at most `limit` bytes, ending in `...` whenever it cuts.
pub fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    if limit <= ELLIPSIS.len() {
        return ELLIPSIS[..limit].to_string();
    }
    let mut end = limit - ELLIPSIS.len();
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{ELLIPSIS}", text[..end].trim_end())
}

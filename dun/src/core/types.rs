//! Shared deterministic types for check results and work items.
//!
//! Check results are produced once per engine run and never mutated afterwards.
//! Issue order is owned by the producing engine; nothing in the core reorders it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Outcome class of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Fail,
    Warn,
    Error,
    Skip,
    Action,
    Prompt,
    Info,
}

impl CheckStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckStatus::Pass => "pass",
            CheckStatus::Fail => "fail",
            CheckStatus::Warn => "warn",
            CheckStatus::Error => "error",
            CheckStatus::Skip => "skip",
            CheckStatus::Action => "action",
            CheckStatus::Prompt => "prompt",
            CheckStatus::Info => "info",
        }
    }

    /// Anything other than `pass` still needs attention.
    pub fn is_actionable(self) -> bool {
        self != CheckStatus::Pass
    }

    pub fn priority(self) -> Priority {
        match self {
            CheckStatus::Error | CheckStatus::Fail => Priority::High,
            CheckStatus::Warn => Priority::Medium,
            CheckStatus::Skip => Priority::Low,
            _ => Priority::Medium,
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pass" => Ok(CheckStatus::Pass),
            "fail" => Ok(CheckStatus::Fail),
            "warn" => Ok(CheckStatus::Warn),
            "error" => Ok(CheckStatus::Error),
            "skip" => Ok(CheckStatus::Skip),
            "action" => Ok(CheckStatus::Action),
            "prompt" => Ok(CheckStatus::Prompt),
            "info" => Ok(CheckStatus::Info),
            other => Err(format!("unknown check status '{other}'")),
        }
    }
}

/// Display priority derived from a check status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "HIGH",
            Priority::Medium => "MEDIUM",
            Priority::Low => "LOW",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single finding reported by a check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Issue {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            path: None,
            id: None,
        }
    }

    pub fn at(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// Free text a check wants handed to an agent verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub prompt: String,
}

/// Result of evaluating one check against the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub id: String,
    pub status: CheckStatus,
    pub signal: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<Issue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<PromptEnvelope>,
}

impl CheckResult {
    pub fn new(id: impl Into<String>, status: CheckStatus, signal: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status,
            signal: signal.into(),
            detail: None,
            issues: Vec::new(),
            prompt: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_issues(mut self, issues: Vec<Issue>) -> Self {
        self.issues = issues;
        self
    }

    pub fn with_prompt(mut self, prompt: PromptEnvelope) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn priority(&self) -> Priority {
        self.status.priority()
    }
}

/// Filter checks that still need work, preserving engine order.
pub fn actionable(checks: &[CheckResult]) -> Vec<&CheckResult> {
    checks
        .iter()
        .filter(|check| check.status.is_actionable())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_labels_follow_status() {
        assert_eq!(CheckStatus::Error.priority(), Priority::High);
        assert_eq!(CheckStatus::Fail.priority(), Priority::High);
        assert_eq!(CheckStatus::Warn.priority(), Priority::Medium);
        assert_eq!(CheckStatus::Skip.priority(), Priority::Low);
        assert_eq!(CheckStatus::Prompt.priority(), Priority::Medium);
        assert_eq!(CheckStatus::Info.priority(), Priority::Medium);
    }

    #[test]
    fn only_pass_is_not_actionable() {
        let checks = vec![
            CheckResult::new("a", CheckStatus::Pass, "ok"),
            CheckResult::new("b", CheckStatus::Info, "note"),
            CheckResult::new("c", CheckStatus::Fail, "broken"),
            CheckResult::new("d", CheckStatus::Pass, "ok"),
        ];
        let ids: Vec<&str> = actionable(&checks)
            .iter()
            .map(|check| check.id.as_str())
            .collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn status_parses_lowercase_names() {
        assert_eq!("skip".parse::<CheckStatus>(), Ok(CheckStatus::Skip));
        assert!("PASS".parse::<CheckStatus>().is_err());
    }
}

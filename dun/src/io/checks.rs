//! Check engine adapter.
//!
//! The [`CheckEngine`] trait is the seam between orchestration and whatever
//! decides what "passing" means. [`CommandCheckEngine`] runs the commands
//! configured under `[[checks]]` and turns their output into [`CheckResult`]s.

use std::path::Path;
use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Result;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::types::{CheckResult, CheckStatus, Issue};
use crate::io::config::{CheckConfig, ConfigError};
use crate::io::process::{CapturedOutput, ProcessLimits, last_lines, run_with_limits};

/// Lines of command output kept as a failing check's detail.
const DETAIL_TAIL_LINES: usize = 20;

/// Context attached when the check engine itself could not produce results.
#[derive(Debug, Clone, Copy, Error)]
#[error("check engine could not be run")]
pub struct EngineError;

/// Produces check results for a repository, in a stable order.
pub trait CheckEngine {
    fn evaluate(&self, root: &Path) -> Result<Vec<CheckResult>>;
}

impl<T: CheckEngine + ?Sized> CheckEngine for &T {
    fn evaluate(&self, root: &Path) -> Result<Vec<CheckResult>> {
        (**self).evaluate(root)
    }
}

/// Engine backed by external commands (linters, test runners, scripts).
#[derive(Debug, Clone)]
pub struct CommandCheckEngine {
    checks: Vec<CheckConfig>,
}

impl CommandCheckEngine {
    pub fn new(checks: Vec<CheckConfig>) -> Self {
        Self { checks }
    }

    #[instrument(skip_all, fields(check = %check.id))]
    fn run_check(&self, root: &Path, check: &CheckConfig) -> CheckResult {
        let limits = ProcessLimits {
            timeout: Duration::from_secs(check.timeout_secs),
            output_limit_bytes: check.output_limit_bytes,
        };
        let Some((program, args)) = check.command.split_first() else {
            warn!("check has an empty command");
            return CheckResult::new(&check.id, CheckStatus::Error, "check has no command");
        };
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(root);

        let output = match run_with_limits(cmd, None, limits) {
            Ok(output) => output,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "check command could not run");
                return CheckResult::new(
                    &check.id,
                    CheckStatus::Error,
                    "check command could not run",
                )
                .with_detail(format!("{err:#}"));
            }
        };
        classify(check, &output, &limits)
    }
}

impl CheckEngine for CommandCheckEngine {
    fn evaluate(&self, root: &Path) -> Result<Vec<CheckResult>> {
        if self.checks.is_empty() {
            return Err(ConfigError::msg(
                "no checks configured; add [[checks]] entries to .dun/config.toml",
            )
            .into());
        }
        let results: Vec<CheckResult> = self
            .checks
            .iter()
            .map(|check| self.run_check(root, check))
            .collect();
        info!(
            checks = results.len(),
            actionable = results.iter().filter(|r| r.status.is_actionable()).count(),
            "checks evaluated"
        );
        Ok(results)
    }
}

fn classify(check: &CheckConfig, output: &CapturedOutput, limits: &ProcessLimits) -> CheckResult {
    let label = check.description.as_deref().unwrap_or(&check.id);
    if output.timed_out {
        return CheckResult::new(
            &check.id,
            CheckStatus::Error,
            format!("{label} timed out after {}s", limits.timeout.as_secs()),
        );
    }
    if output.status.success() {
        return CheckResult::new(&check.id, CheckStatus::Pass, format!("{label} passed"));
    }

    let text = output.combined_text();
    let issues = parse_issues(&text);
    debug!(issues = issues.len(), exit_code = ?output.status.code(), "check failed");
    let signal = match issues.len() {
        0 => format!("{label} failed ({})", exit_label(output)),
        1 => format!("{label} reported 1 issue"),
        n => format!("{label} reported {n} issues"),
    };
    let mut result = CheckResult::new(&check.id, CheckStatus::Fail, signal).with_issues(issues);
    let tail = last_lines(&text, DETAIL_TAIL_LINES);
    if !tail.is_empty() {
        result = result.with_detail(tail);
    }
    result
}

fn exit_label(output: &CapturedOutput) -> String {
    output
        .status
        .code()
        .map_or_else(|| "killed by signal".to_string(), |code| format!("exit status {code}"))
}

static LOCATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:-->\s*)?(?P<path>[^\s:][^:]*):(?P<line>\d+)(?::(?P<col>\d+))?:\s*(?P<msg>\S.*)$",
    )
    .expect("location regex should be valid")
});

/// Extract `path:line[:col]: message` findings in output order.
///
/// Exact duplicates are reported once; everything else is kept as emitted.
pub fn parse_issues(text: &str) -> Vec<Issue> {
    let mut issues: Vec<Issue> = Vec::new();
    for line in text.lines() {
        let Some(caps) = LOCATION_RE.captures(line) else {
            continue;
        };
        let path = caps["path"].trim();
        let location = match caps.name("col") {
            Some(col) => format!("{path}:{}:{}", &caps["line"], col.as_str()),
            None => format!("{path}:{}", &caps["line"]),
        };
        let issue = Issue {
            summary: format!("{location}: {}", caps["msg"].trim()),
            path: Some(path.to_string()),
            id: Some(location),
        };
        if !issues.contains(&issue) {
            issues.push(issue);
        }
    }
    issues
}

//! Test-only helpers: scripted harnesses and check engines, temp git repos.

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::core::harness::{AutomationMode, Harness, HarnessError};
use crate::core::status::{STATUS_BEGIN, STATUS_END};
use crate::core::types::{CheckResult, CheckStatus, Issue};
use crate::io::checks::CheckEngine;
use crate::io::git::fingerprint;
use crate::io::harness::HarnessCaller;

/// A recorded harness invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessCall {
    pub harness: String,
    pub prompt: String,
    pub mode: AutomationMode,
}

#[derive(Debug, Clone)]
struct ScriptedReply {
    result: Result<String, String>,
    delay: Duration,
}

/// Harness caller that replays scripted replies per harness name.
///
/// Each harness has a queue; the last reply repeats once the queue is drained.
/// Unknown names fail the way the real gateway does; known but unscripted
/// harnesses fail with an execution error.
#[derive(Debug, Default)]
pub struct ScriptedHarness {
    replies: Mutex<BTreeMap<String, VecDeque<ScriptedReply>>>,
    calls: Mutex<Vec<HarnessCall>>,
}

impl ScriptedHarness {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, harness: &str, result: Result<String, String>, delay: Duration) -> Self {
        if let Ok(mut replies) = self.replies.lock() {
            replies
                .entry(harness.to_string())
                .or_default()
                .push_back(ScriptedReply { result, delay });
        }
        self
    }

    pub fn respond(self, harness: &str, text: impl Into<String>) -> Self {
        self.push(harness, Ok(text.into()), Duration::ZERO)
    }

    pub fn respond_after(self, harness: &str, text: impl Into<String>, delay_ms: u64) -> Self {
        self.push(harness, Ok(text.into()), Duration::from_millis(delay_ms))
    }

    pub fn fail(self, harness: &str, message: impl Into<String>) -> Self {
        self.push(harness, Err(message.into()), Duration::ZERO)
    }

    pub fn calls(&self) -> Vec<HarnessCall> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    pub fn call_names(&self) -> Vec<String> {
        self.calls().into_iter().map(|call| call.harness).collect()
    }

    fn next_reply(&self, harness: &str) -> Option<ScriptedReply> {
        let mut replies = self.replies.lock().ok()?;
        let queue = replies.get_mut(harness)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

impl HarnessCaller for ScriptedHarness {
    fn call(
        &self,
        harness: &str,
        prompt: &str,
        mode: AutomationMode,
    ) -> Result<String, HarnessError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(HarnessCall {
                harness: harness.to_string(),
                prompt: prompt.to_string(),
                mode,
            });
        }
        if harness.parse::<Harness>().is_err() {
            return Err(HarnessError::Unknown {
                name: harness.to_string(),
            });
        }
        let reply = self
            .next_reply(harness)
            .ok_or_else(|| HarnessError::execution(harness, "no scripted reply"))?;
        if !reply.delay.is_zero() {
            thread::sleep(reply.delay);
        }
        reply
            .result
            .map_err(|message| HarnessError::execution(harness, message))
    }
}

/// Check engine that replays scripted evaluations; the last one repeats.
#[derive(Debug, Default)]
pub struct ScriptedCheckEngine {
    evaluations: Mutex<VecDeque<Result<Vec<CheckResult>, String>>>,
    runs: Mutex<usize>,
}

impl ScriptedCheckEngine {
    pub fn new(evaluations: Vec<Vec<CheckResult>>) -> Self {
        Self {
            evaluations: Mutex::new(evaluations.into_iter().map(Ok).collect()),
            runs: Mutex::new(0),
        }
    }

    /// Engine whose every evaluation fails with `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            evaluations: Mutex::new(VecDeque::from([Err(message.to_string())])),
            runs: Mutex::new(0),
        }
    }

    pub fn runs(&self) -> usize {
        self.runs.lock().map(|runs| *runs).unwrap_or_default()
    }
}

impl CheckEngine for ScriptedCheckEngine {
    fn evaluate(&self, _root: &Path) -> Result<Vec<CheckResult>> {
        if let Ok(mut runs) = self.runs.lock() {
            *runs += 1;
        }
        let mut evaluations = self
            .evaluations
            .lock()
            .map_err(|_| anyhow!("scripted engine poisoned"))?;
        let next = if evaluations.len() > 1 {
            evaluations.pop_front()
        } else {
            evaluations.front().cloned()
        };
        match next {
            Some(Ok(results)) => Ok(results),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(Vec::new()),
        }
    }
}

/// A passing check.
pub fn passing(id: &str) -> CheckResult {
    CheckResult::new(id, CheckStatus::Pass, format!("{id} passed"))
}

/// A failing check with one issue per summary.
pub fn failing(id: &str, issues: &[&str]) -> CheckResult {
    CheckResult::new(id, CheckStatus::Fail, format!("{id} failed")).with_issues(
        issues
            .iter()
            .map(|summary| Issue::new(*summary))
            .collect(),
    )
}

/// Harness reply carrying a status block with the given exit signal.
pub fn reply(text: &str, exit_signal: bool) -> String {
    format!("{text}\n{STATUS_BEGIN}\nSTATUS: {text}\nEXIT_SIGNAL: {exit_signal}\n{STATUS_END}\n")
}

/// Temporary git repository with one commit.
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create tempdir")?;
        let repo = Self { dir };
        repo.git(&["init", "-q"])?;
        repo.git(&["config", "user.name", "Dun Test"])?;
        repo.git(&["config", "user.email", "dun-test@local.invalid"])?;
        repo.git(&["config", "commit.gpgsign", "false"])?;
        repo.write("README.md", "# fixture\n")?;
        repo.commit("init")?;
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, rel: &str, contents: &str) -> Result<()> {
        let path = self.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))
    }

    pub fn commit(&self, message: &str) -> Result<()> {
        self.git(&["add", "-A"])?;
        self.git(&["commit", "-q", "--allow-empty", "-m", message])
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(self.path())
    }

    fn git(&self, args: &[&str]) -> Result<()> {
        let status = Command::new("git")
            .args(args)
            .current_dir(self.path())
            .status()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !status.success() {
            return Err(anyhow!("git {} failed with {status}", args.join(" ")));
        }
        Ok(())
    }
}

//! Prompt rendering for loop iterations and single tasks.

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::core::status::protocol_instructions;
use crate::core::task::{TaskGroup, TaskItem, build_task_group, truncate};
use crate::core::types::{CheckResult, PromptEnvelope};

const ITERATION_TEMPLATE: &str = include_str!("prompts/iteration.md");
const TASK_TEMPLATE: &str = include_str!("prompts/task.md");

/// Byte budget for one check's detail inside a prompt.
pub const DETAIL_LIMIT_BYTES: usize = 4_000;

/// Check as seen by the templates.
#[derive(Debug, Clone, Serialize)]
struct CheckContext<'a> {
    id: &'a str,
    status: &'static str,
    priority: &'static str,
    signal: &'a str,
    detail: Option<String>,
    prompt: Option<&'a PromptEnvelope>,
    tasks: Vec<TaskItem>,
    omitted: usize,
}

impl<'a> CheckContext<'a> {
    fn new(check: &'a CheckResult, group: TaskGroup) -> Self {
        Self {
            id: &check.id,
            status: check.status.as_str(),
            priority: check.priority().as_str(),
            signal: &check.signal,
            detail: check
                .detail
                .as_deref()
                .map(str::trim)
                .filter(|detail| !detail.is_empty())
                .map(|detail| truncate(detail, DETAIL_LIMIT_BYTES)),
            prompt: check.prompt.as_ref(),
            tasks: group.tasks,
            omitted: group.omitted,
        }
    }
}

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("iteration", ITERATION_TEMPLATE)
            .expect("iteration template should be valid");
        env.add_template("task", TASK_TEMPLATE)
            .expect("task template should be valid");
        Self { env }
    }

    fn render_iteration(&self, checks: &[&CheckResult], fingerprint: &str) -> Result<String> {
        let contexts: Vec<CheckContext<'_>> = checks
            .iter()
            .map(|check| CheckContext::new(check, build_task_group(check, fingerprint)))
            .collect();
        let template = self.env.get_template("iteration")?;
        let rendered = template.render(context! {
            fingerprint => fingerprint,
            checks => contexts,
            protocol => protocol_instructions(),
        })?;
        Ok(rendered)
    }

    fn render_task(
        &self,
        check: &CheckResult,
        task: &TaskItem,
        fingerprint: &str,
    ) -> Result<String> {
        let group = build_task_group(check, fingerprint);
        let template = self.env.get_template("task")?;
        let rendered = template.render(context! {
            check => CheckContext::new(check, group),
            task => task,
            prompt => check.prompt.as_ref(),
            protocol => protocol_instructions(),
        })?;
        Ok(rendered)
    }
}

/// Prompt asking a harness to fix every actionable check, in engine order.
pub fn render_iteration_prompt(checks: &[&CheckResult], fingerprint: &str) -> Result<String> {
    let prompt = PromptEngine::new().render_iteration(checks, fingerprint)?;
    debug!(
        checks = checks.len(),
        prompt_bytes = prompt.len(),
        "rendered iteration prompt"
    );
    Ok(prompt)
}

/// Prompt for one task minted from `check`.
pub fn render_task_prompt(
    check: &CheckResult,
    task: &TaskItem,
    fingerprint: &str,
) -> Result<String> {
    let prompt = PromptEngine::new().render_task(check, task, fingerprint)?;
    debug!(task = %task.id, prompt_bytes = prompt.len(), "rendered task prompt");
    Ok(prompt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::status::{STATUS_BEGIN, parse_exit_signal};
    use crate::core::types::{CheckStatus, Issue};

    fn lint() -> CheckResult {
        CheckResult::new("lint", CheckStatus::Fail, "lint reported 2 issues")
            .with_detail("src/a.rs:1: bad\nsrc/b.rs:2: worse")
            .with_issues(vec![
                Issue::new("src/a.rs:1: bad").at("src/a.rs"),
                Issue::new("src/b.rs:2: worse").at("src/b.rs"),
            ])
    }

    #[test]
    fn iteration_prompt_lists_checks_tasks_and_protocol() {
        let warn = CheckResult::new("docs", CheckStatus::Warn, "README is stale");
        let checks = [lint(), warn];
        let refs: Vec<&CheckResult> = checks.iter().collect();
        let prompt = render_iteration_prompt(&refs, "abc123abc123").expect("render");

        let lint_pos = prompt.find("[HIGH] lint (fail)").expect("lint heading");
        let docs_pos = prompt.find("[MEDIUM] docs (warn)").expect("docs heading");
        assert!(lint_pos < docs_pos);
        assert!(prompt.contains("`lint#2@abc123abc123` src/b.rs:2: worse (src/b.rs)"));
        assert!(prompt.contains("`docs@abc123abc123` README is stale"));
        assert!(prompt.contains(STATUS_BEGIN));
        assert!(!parse_exit_signal(&prompt));
    }

    #[test]
    fn iteration_prompt_inlines_prompt_envelopes() {
        let check = CheckResult::new("review", CheckStatus::Prompt, "design review").with_prompt(
            PromptEnvelope {
                summary: Some("Review the design".to_string()),
                prompt: "Read DESIGN.md and list gaps.".to_string(),
            },
        );
        let prompt = render_iteration_prompt(&[&check], "").expect("render");
        assert!(prompt.contains("Repository state: unknown"));
        assert!(prompt.contains("Review the design\n\nRead DESIGN.md and list gaps."));
        assert!(!prompt.contains("Tasks:"));
    }

    #[test]
    fn iteration_prompt_bounds_check_detail() {
        let check = CheckResult::new("tests", CheckStatus::Fail, "tests failed")
            .with_detail("y".repeat(DETAIL_LIMIT_BYTES * 10));
        let prompt = render_iteration_prompt(&[&check], "fp").expect("render");
        assert!(prompt.len() < DETAIL_LIMIT_BYTES * 2);
        assert!(prompt.contains("y..."));
        assert!(prompt.contains(STATUS_BEGIN));
    }

    #[test]
    fn task_prompt_targets_one_issue() {
        let check = lint();
        let group = build_task_group(&check, "fp");
        let prompt = render_task_prompt(&check, &group.tasks[0], "fp").expect("render");
        assert!(prompt.contains("Task: lint#1@fp"));
        assert!(prompt.contains("src/a.rs:1: bad"));
        assert!(prompt.contains("File: src/a.rs"));
        assert!(prompt.contains(STATUS_BEGIN));
    }
}

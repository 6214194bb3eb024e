//! Task listing and lookup for `dun tasks` and `dun task`.
//!
//! Task ids embed the repository fingerprint, so a lookup is validated against
//! the live repository before the check engine is consulted.

use std::path::Path;

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::core::task::{
    REASON_LIMIT_BYTES, SUMMARY_LIMIT_BYTES, TaskGroup, TaskItem, TaskRef, build_task_group,
    parse_task_ref, truncate,
};
use crate::core::types::{CheckResult, actionable};
use crate::io::checks::{CheckEngine, EngineError};
use crate::io::git::fingerprint;
use crate::io::prompt::render_task_prompt;

/// Tasks for every actionable check, bound to one repository state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskListing {
    pub fingerprint: String,
    pub groups: Vec<TaskGroup>,
}

/// A well-formed, current task id that names nothing actionable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("task '{task_id}' not found: {reason}")]
pub struct TaskNotFoundError {
    pub task_id: String,
    pub reason: String,
}

/// A task id resolved against the live repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTask {
    pub task_ref: TaskRef,
    pub check: CheckResult,
    pub task: TaskItem,
}

impl ResolvedTask {
    pub fn prompt(&self) -> Result<String> {
        render_task_prompt(&self.check, &self.task, &self.task_ref.fingerprint)
    }
}

#[instrument(skip_all, fields(root = %root.display()))]
pub fn list_tasks<E: CheckEngine>(root: &Path, engine: &E) -> Result<TaskListing> {
    let checks = engine.evaluate(root).context(EngineError)?;
    // Checks may leave artifacts behind; mint ids for the state they leave.
    let fingerprint = fingerprint(root);
    let groups: Vec<TaskGroup> = actionable(&checks)
        .into_iter()
        .map(|check| build_task_group(check, &fingerprint))
        .collect();
    debug!(groups = groups.len(), fingerprint = %fingerprint, "listed tasks");
    Ok(TaskListing {
        fingerprint,
        groups,
    })
}

/// Parse `id`, reject it if stale, then find the task it names.
#[instrument(skip_all, fields(root = %root.display(), id = %id))]
pub fn resolve_task<E: CheckEngine>(root: &Path, engine: &E, id: &str) -> Result<ResolvedTask> {
    let task_ref = parse_task_ref(id)?;
    task_ref.validate(&fingerprint(root))?;

    let checks = engine.evaluate(root).context(EngineError)?;
    let not_found = |reason: String| TaskNotFoundError {
        task_id: task_ref.to_string(),
        reason,
    };
    let check = checks
        .into_iter()
        .find(|check| check.id == task_ref.check_id)
        .ok_or_else(|| not_found(format!("no check named '{}'", task_ref.check_id)))?;
    if !check.status.is_actionable() {
        return Err(not_found(format!("check '{}' is passing", check.id)).into());
    }

    let task_id = task_ref.to_string();
    let group = build_task_group(&check, &task_ref.fingerprint);
    let listed = group.tasks.len();
    let task = match group.tasks.into_iter().find(|task| task.id == task_id) {
        Some(task) => task,
        None if task_ref.issue_index.is_none() => whole_check_task(&check, &task_id),
        None => {
            return Err(not_found(format!(
                "check '{}' lists {listed} task(s)",
                check.id
            ))
            .into());
        }
    };

    Ok(ResolvedTask {
        task_ref,
        check,
        task,
    })
}

/// Whole-check task for a check whose listing is split per issue.
fn whole_check_task(check: &CheckResult, task_id: &str) -> TaskItem {
    TaskItem {
        id: task_id.to_string(),
        summary: truncate(&check.signal, SUMMARY_LIMIT_BYTES),
        reason: check
            .detail
            .as_deref()
            .map(|detail| truncate(detail.trim(), REASON_LIMIT_BYTES))
            .filter(|detail| !detail.is_empty()),
        path: None,
    }
}

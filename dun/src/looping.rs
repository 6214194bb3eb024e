//! Iteration controller for `dun loop`.
//!
//! Each iteration evaluates the checks, renders a prompt for whatever is still
//! actionable, and hands it to a single harness or a quorum round. The loop
//! stops when every check passes, a harness reports `EXIT_SIGNAL: true`, or
//! the iteration cap is reached.
//!
//! Running two loops against the same repository at once is unsupported;
//! nothing here takes a lock.

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::core::harness::{AutomationMode, Harness};
use crate::core::quorum::{QuorumConfig, QuorumNotice};
use crate::core::status::parse_status_block;
use crate::core::types::actionable;
use crate::io::checks::{CheckEngine, EngineError};
use crate::io::config::ConfigError;
use crate::io::git::fingerprint;
use crate::io::harness::HarnessCaller;
use crate::io::prompt::render_iteration_prompt;
use crate::quorum;

/// Who answers each iteration's prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Single(String),
    Quorum(QuorumConfig),
}

impl Dispatch {
    pub fn harnesses(&self) -> Vec<String> {
        match self {
            Dispatch::Single(name) => vec![name.clone()],
            Dispatch::Quorum(cfg) => cfg.harnesses.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    pub max_iterations: u32,
    /// Render the first prompt and stop without calling any harness.
    pub dry_run: bool,
    pub automation: AutomationMode,
    pub dispatch: Dispatch,
}

impl LoopConfig {
    /// Dry runs never reach a harness, so only the iteration cap is checked.
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(ConfigError::msg("max iterations must be >= 1").into());
        }
        if self.dry_run {
            return Ok(());
        }
        match &self.dispatch {
            Dispatch::Single(name) => {
                name.parse::<Harness>().map_err(ConfigError::msg)?;
            }
            Dispatch::Quorum(cfg) => cfg.validate().map_err(ConfigError)?,
        }
        Ok(())
    }
}

/// Reason why `run_loop` stopped. None of these is a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    AllChecksPass,
    ExitSignal,
    MaxIterations(u32),
    DryRun,
}

impl fmt::Display for LoopStop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopStop::AllChecksPass => f.write_str("all checks pass"),
            LoopStop::ExitSignal => f.write_str("exit signal received"),
            LoopStop::MaxIterations(max) => write!(f, "max iterations ({max}) reached"),
            LoopStop::DryRun => f.write_str("dry run"),
        }
    }
}

/// Progress reported while the loop runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopEvent {
    Evaluated {
        iteration: u32,
        total: usize,
        actionable: usize,
    },
    Dispatching {
        iteration: u32,
        harnesses: Vec<String>,
    },
    Quorum(QuorumNotice),
    Responded {
        iteration: u32,
        harness: String,
        exit_signal: bool,
        /// The harness's own `STATUS:` line, when it sent one.
        status: Option<String>,
    },
    /// The round produced no usable answer; the loop carries on.
    NoUsableSignal { iteration: u32, error: String },
}

impl fmt::Display for LoopEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopEvent::Evaluated {
                iteration,
                total,
                actionable,
            } => write!(
                f,
                "[{iteration}] {actionable} of {total} checks need attention"
            ),
            LoopEvent::Dispatching {
                iteration,
                harnesses,
            } => write!(f, "[{iteration}] asking {}", harnesses.join(", ")),
            LoopEvent::Quorum(notice) => write!(f, "{notice}"),
            LoopEvent::Responded {
                iteration,
                harness,
                exit_signal,
                status,
            } => {
                write!(f, "[{iteration}] {harness} replied (exit signal: {exit_signal})")?;
                match status {
                    Some(status) => write!(f, ": {status}"),
                    None => Ok(()),
                }
            }
            LoopEvent::NoUsableSignal { iteration, error } => {
                write!(f, "[{iteration}] no usable answer: {error}")
            }
        }
    }
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    /// Harness rounds dispatched.
    pub iterations: u32,
    /// Check engine evaluations performed.
    pub evaluations: u32,
    pub stop: LoopStop,
    /// The rendered prompt, kept for dry runs.
    pub prompt: Option<String>,
}

/// Drive the repository toward passing checks.
///
/// Engine failures end the run with an error carrying [`EngineError`] context.
/// Harness and consensus failures are reported as events and the loop moves on.
#[instrument(skip_all, fields(root = %root.display(), max_iterations = cfg.max_iterations, dry_run = cfg.dry_run))]
pub fn run_loop<E: CheckEngine, H: HarnessCaller, F: FnMut(&LoopEvent)>(
    root: &Path,
    engine: &E,
    caller: &H,
    cfg: &LoopConfig,
    mut on_event: F,
) -> Result<LoopOutcome> {
    cfg.validate()?;

    let mut iterations = 0u32;
    let mut evaluations = 0u32;
    loop {
        let iteration = iterations + 1;
        let checks = engine.evaluate(root).context(EngineError)?;
        evaluations += 1;
        let pending = actionable(&checks);
        on_event(&LoopEvent::Evaluated {
            iteration,
            total: checks.len(),
            actionable: pending.len(),
        });

        if pending.is_empty() {
            info!(iterations, "all checks pass");
            return Ok(LoopOutcome {
                iterations,
                evaluations,
                stop: LoopStop::AllChecksPass,
                prompt: None,
            });
        }

        let prompt = render_iteration_prompt(&pending, &fingerprint(root))?;
        if cfg.dry_run {
            return Ok(LoopOutcome {
                iterations,
                evaluations,
                stop: LoopStop::DryRun,
                prompt: Some(prompt),
            });
        }

        on_event(&LoopEvent::Dispatching {
            iteration,
            harnesses: cfg.dispatch.harnesses(),
        });
        let answer = dispatch(caller, cfg, &prompt, &mut on_event);
        iterations += 1;

        match answer {
            Ok((harness, response)) => {
                let block = parse_status_block(&response).unwrap_or_default();
                let exit_signal = block.exit_signal;
                on_event(&LoopEvent::Responded {
                    iteration,
                    harness,
                    exit_signal,
                    status: block.status,
                });
                if exit_signal {
                    info!(iterations, "exit signal received");
                    return Ok(LoopOutcome {
                        iterations,
                        evaluations,
                        stop: LoopStop::ExitSignal,
                        prompt: None,
                    });
                }
            }
            Err(error) => {
                warn!(iteration, err = %error, "no usable answer this iteration");
                on_event(&LoopEvent::NoUsableSignal { iteration, error });
            }
        }

        if iterations >= cfg.max_iterations {
            info!(iterations, "max iterations reached");
            return Ok(LoopOutcome {
                iterations,
                evaluations,
                stop: LoopStop::MaxIterations(cfg.max_iterations),
                prompt: None,
            });
        }
    }
}

/// One round: the answering harness and its raw response, or why there is none.
fn dispatch<H: HarnessCaller, F: FnMut(&LoopEvent)>(
    caller: &H,
    cfg: &LoopConfig,
    prompt: &str,
    on_event: &mut F,
) -> Result<(String, String), String> {
    match &cfg.dispatch {
        Dispatch::Single(harness) => caller
            .call(harness, prompt, cfg.automation)
            .map(|response| (harness.clone(), response))
            .map_err(|err| err.to_string()),
        Dispatch::Quorum(quorum_cfg) => {
            quorum::evaluate(caller, quorum_cfg, prompt, cfg.automation, |notice| {
                on_event(&LoopEvent::Quorum(notice.clone()));
            })
            .map(|decision| (decision.harness, decision.response))
            .map_err(|err| err.to_string())
        }
    }
}

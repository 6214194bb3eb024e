//! Quorum dispatch: ask several harnesses the same question and reconcile.
//!
//! Dispatch (sequential or scoped-thread parallel) lives here; the arithmetic
//! and conflict policy live in [`crate::core::quorum::resolve`].

use std::thread;

use tracing::{debug, info, instrument, warn};

use crate::core::harness::{AutomationMode, HarnessError};
use crate::core::quorum::{
    DispatchMode, HarnessCallOutcome, QuorumConfig, QuorumDecision, QuorumError, QuorumNotice,
    resolve,
};
use crate::io::harness::HarnessCaller;

/// Run one quorum round and resolve it.
///
/// Notices (harness failures, conflicts, escalation) are reported through
/// `on_notice` as they are decided.
#[instrument(skip_all, fields(harnesses = cfg.harnesses.len(), mode = ?cfg.mode, strategy = cfg.strategy_name()))]
pub fn evaluate<H: HarnessCaller, F: FnMut(&QuorumNotice)>(
    caller: &H,
    cfg: &QuorumConfig,
    prompt: &str,
    mode: AutomationMode,
    mut on_notice: F,
) -> Result<QuorumDecision, QuorumError> {
    if cfg.harnesses.is_empty() {
        return Err(QuorumError::NoHarnessesConfigured);
    }

    let outcomes = match cfg.mode {
        DispatchMode::Sequential => dispatch_sequential(caller, &cfg.harnesses, prompt, mode),
        DispatchMode::Parallel => dispatch_parallel(caller, &cfg.harnesses, prompt, mode),
    };

    let result = resolve(cfg, &outcomes, |notice| {
        warn!(notice = %notice, "quorum notice");
        on_notice(notice);
    });
    match &result {
        Ok(decision) => info!(
            chosen = %decision.harness,
            successes = decision.successes,
            total = decision.total,
            "quorum reached"
        ),
        Err(err) => warn!(err = %err, "quorum round failed"),
    }
    result
}

fn call_one<H: HarnessCaller>(
    caller: &H,
    harness: &str,
    prompt: &str,
    mode: AutomationMode,
) -> HarnessCallOutcome {
    let outcome = HarnessCallOutcome {
        harness: harness.to_string(),
        result: caller.call(harness, prompt, mode),
    };
    debug!(harness, success = outcome.is_success(), "harness returned");
    outcome
}

fn dispatch_sequential<H: HarnessCaller>(
    caller: &H,
    harnesses: &[String],
    prompt: &str,
    mode: AutomationMode,
) -> Vec<HarnessCallOutcome> {
    harnesses
        .iter()
        .map(|harness| call_one(caller, harness, prompt, mode))
        .collect()
}

/// One scoped thread per harness; outcomes land in their configured slot.
fn dispatch_parallel<H: HarnessCaller>(
    caller: &H,
    harnesses: &[String],
    prompt: &str,
    mode: AutomationMode,
) -> Vec<HarnessCallOutcome> {
    let mut slots: Vec<Option<HarnessCallOutcome>> = vec![None; harnesses.len()];

    thread::scope(|scope| {
        let handles: Vec<_> = harnesses
            .iter()
            .map(|harness| scope.spawn(move || call_one(caller, harness, prompt, mode)))
            .collect();
        for (idx, handle) in handles.into_iter().enumerate() {
            match handle.join() {
                Ok(outcome) => slots[idx] = Some(outcome),
                Err(_) => warn!(harness = %harnesses[idx], "harness call panicked"),
            }
        }
    });

    slots
        .into_iter()
        .zip(harnesses)
        .map(|(slot, harness)| {
            slot.unwrap_or_else(|| {
                HarnessCallOutcome::failure(
                    harness.as_str(),
                    HarnessError::execution(harness.as_str(), "harness call panicked"),
                )
            })
        })
        .collect()
}

//! Quorum arithmetic and conflict resolution over harness outcomes.
//!
//! Everything here is pure: dispatch happens in [`crate::quorum`], which hands
//! the outcomes (always in configured harness order) to [`resolve`].

use std::fmt;
use std::str::FromStr;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::harness::{Harness, HarnessError};
use crate::core::status::parse_exit_signal;

/// How a quorum round reaches its harnesses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    #[default]
    Sequential,
    Parallel,
}

impl FromStr for DispatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "sequential" => Ok(DispatchMode::Sequential),
            "parallel" => Ok(DispatchMode::Parallel),
            other => Err(format!(
                "unknown dispatch mode '{other}' (expected sequential or parallel)"
            )),
        }
    }
}

/// Named quorum strategy as configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Majority,
    Threshold,
    Any,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Majority => "majority",
            Strategy::Threshold => "threshold",
            Strategy::Any => "any",
        }
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "majority" => Ok(Strategy::Majority),
            "threshold" => Ok(Strategy::Threshold),
            "any" => Ok(Strategy::Any),
            other => Err(format!(
                "unknown quorum strategy '{other}' (expected majority, threshold, or any)"
            )),
        }
    }
}

/// Effective rule evaluated against the configured harness count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuorumRule {
    Any,
    Majority,
    Threshold(usize),
}

impl QuorumRule {
    /// `total` is the configured harness count, not the number that replied.
    pub fn is_met(self, successes: usize, total: usize) -> bool {
        match self {
            QuorumRule::Any => successes >= 1,
            QuorumRule::Majority => successes > total / 2,
            QuorumRule::Threshold(n) => successes >= n,
        }
    }
}

/// Settings for one quorum round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuorumConfig {
    /// Harness names in precedence order.
    pub harnesses: Vec<String>,
    pub mode: DispatchMode,
    /// `None` means the unset ("default") strategy.
    pub strategy: Option<Strategy>,
    pub threshold: usize,
    pub prefer: Option<String>,
    pub escalate: bool,
}

impl QuorumConfig {
    pub fn new<I, S>(harnesses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            harnesses: harnesses.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.map_or("default", Strategy::as_str)
    }

    // An unset strategy defers to a positive threshold, otherwise behaves as `any`.
    pub fn rule(&self) -> QuorumRule {
        match self.strategy {
            Some(Strategy::Majority) => QuorumRule::Majority,
            Some(Strategy::Any) => QuorumRule::Any,
            Some(Strategy::Threshold) if self.threshold > 0 => {
                QuorumRule::Threshold(self.threshold)
            }
            Some(Strategy::Threshold) => QuorumRule::Threshold(self.harnesses.len()),
            None if self.threshold > 0 => QuorumRule::Threshold(self.threshold),
            None => QuorumRule::Any,
        }
    }

    /// Reject configurations that can never be satisfied or name unknown harnesses.
    pub fn validate(&self) -> Result<()> {
        if self.harnesses.is_empty() {
            return Err(anyhow!("quorum requires at least one harness"));
        }
        let mut seen = Vec::with_capacity(self.harnesses.len());
        for name in &self.harnesses {
            let harness: Harness = name.parse().map_err(|err: String| anyhow!(err))?;
            if seen.contains(&harness) {
                return Err(anyhow!("harness '{harness}' listed more than once"));
            }
            seen.push(harness);
        }
        if self.strategy == Some(Strategy::Threshold) && self.threshold == 0 {
            return Err(anyhow!("threshold strategy requires a threshold > 0"));
        }
        if self.threshold > self.harnesses.len() {
            return Err(anyhow!(
                "threshold {} exceeds the {} configured harnesses",
                self.threshold,
                self.harnesses.len()
            ));
        }
        if let Some(prefer) = &self.prefer
            && !self.harnesses.iter().any(|name| name == prefer)
        {
            return Err(anyhow!(
                "preferred harness '{prefer}' is not in the quorum list"
            ));
        }
        Ok(())
    }
}

/// Result of calling one harness during a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessCallOutcome {
    pub harness: String,
    pub result: Result<String, HarnessError>,
}

impl HarnessCallOutcome {
    pub fn success(harness: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            harness: harness.into(),
            result: Ok(response.into()),
        }
    }

    pub fn failure(harness: impl Into<String>, error: HarnessError) -> Self {
        Self {
            harness: harness.into(),
            result: Err(error),
        }
    }

    /// Raw response text; empty on failure.
    pub fn response(&self) -> &str {
        self.result.as_deref().unwrap_or("")
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Exit signal reported by one successful harness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessSignal {
    pub harness: String,
    pub exit_signal: bool,
}

/// Events surfaced to the caller while a round is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuorumNotice {
    HarnessFailed { harness: String, error: String },
    ConflictDetected { signals: Vec<HarnessSignal> },
    Escalating { signals: Vec<HarnessSignal> },
    PreferredOverride { harness: String },
}

impl fmt::Display for QuorumNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuorumNotice::HarnessFailed { harness, error } => {
                write!(f, "harness {harness} failed: {error}")
            }
            QuorumNotice::ConflictDetected { signals } => {
                write!(f, "Conflict detected: {}", format_signals(signals))
            }
            QuorumNotice::Escalating { signals } => write!(
                f,
                "Escalating conflict for human review: {}",
                format_signals(signals)
            ),
            QuorumNotice::PreferredOverride { harness } => {
                write!(f, "Conflict resolved by preferred harness {harness}")
            }
        }
    }
}

/// Classified failure of a quorum round.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuorumError {
    #[error("no harnesses configured for quorum")]
    NoHarnessesConfigured,
    #[error("all {attempted} harnesses failed")]
    AllHarnessesFailed { attempted: usize },
    #[error("quorum not met: {successes}/{total} harnesses succeeded (strategy: {strategy})")]
    QuorumNotMet {
        strategy: &'static str,
        successes: usize,
        total: usize,
    },
    #[error("conflicting exit signals escalated for human review ({signals})")]
    ConflictEscalated { signals: String },
    #[error("conflicting exit signals could not be resolved ({signals})")]
    ConflictUnresolved { signals: String },
}

/// The response a round settled on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuorumDecision {
    pub harness: String,
    pub response: String,
    pub successes: usize,
    pub total: usize,
}

/// Apply the quorum strategy and conflict policy to a completed round.
///
/// `outcomes` must be in configured harness order. Conflict resolution runs
/// before the quorum-met check can fail the round, so a preferred harness can
/// settle a conflicting round under any strategy.
pub fn resolve<F: FnMut(&QuorumNotice)>(
    cfg: &QuorumConfig,
    outcomes: &[HarnessCallOutcome],
    mut on_notice: F,
) -> Result<QuorumDecision, QuorumError> {
    let total = cfg.harnesses.len();
    if total == 0 {
        return Err(QuorumError::NoHarnessesConfigured);
    }

    let mut successes: Vec<(&str, &str)> = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        match &outcome.result {
            Ok(response) => successes.push((outcome.harness.as_str(), response.as_str())),
            Err(err) => on_notice(&QuorumNotice::HarnessFailed {
                harness: outcome.harness.clone(),
                error: err.to_string(),
            }),
        }
    }
    if successes.is_empty() {
        return Err(QuorumError::AllHarnessesFailed {
            attempted: outcomes.len(),
        });
    }

    let met = cfg.rule().is_met(successes.len(), total);
    let preferred = cfg
        .prefer
        .as_deref()
        .and_then(|prefer| successes.iter().find(|(name, _)| *name == prefer))
        .copied();
    let decision = |(harness, response): (&str, &str)| QuorumDecision {
        harness: harness.to_string(),
        response: response.to_string(),
        successes: successes.len(),
        total,
    };

    let signals: Vec<HarnessSignal> = successes
        .iter()
        .map(|(harness, response)| HarnessSignal {
            harness: harness.to_string(),
            exit_signal: parse_exit_signal(response),
        })
        .collect();
    let conflict = signals.len() > 1
        && signals
            .iter()
            .any(|signal| signal.exit_signal != signals[0].exit_signal);

    if conflict {
        if let Some(chosen) = preferred {
            on_notice(&QuorumNotice::PreferredOverride {
                harness: chosen.0.to_string(),
            });
            return Ok(decision(chosen));
        }
        let summary = format_signals(&signals);
        if cfg.escalate {
            on_notice(&QuorumNotice::Escalating { signals });
            return Err(QuorumError::ConflictEscalated { signals: summary });
        }
        on_notice(&QuorumNotice::ConflictDetected { signals });
        return Err(QuorumError::ConflictUnresolved { signals: summary });
    }

    if !met {
        return Err(QuorumError::QuorumNotMet {
            strategy: cfg.strategy_name(),
            successes: successes.len(),
            total,
        });
    }

    Ok(decision(preferred.unwrap_or(successes[0])))
}

fn format_signals(signals: &[HarnessSignal]) -> String {
    signals
        .iter()
        .map(|signal| format!("{}={}", signal.harness, signal.exit_signal))
        .collect::<Vec<_>>()
        .join(", ")
}

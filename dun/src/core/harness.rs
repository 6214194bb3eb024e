//! Registry of known harnesses and automation modes.
//!
//! The harness set is part of the external contract, so it is a closed enum
//! rather than an open map. `PREFERENCE_ORDER` drives auto-selection when no
//! explicit harness list is given.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An external coding-agent CLI invoked as a subprocess.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Harness {
    Codex,
    Claude,
    Gemini,
    Opencode,
    Cursor,
    Pi,
}

/// Auto-selection order; also the order `dun harnesses` reports in.
pub const PREFERENCE_ORDER: [Harness; 6] = [
    Harness::Codex,
    Harness::Claude,
    Harness::Gemini,
    Harness::Opencode,
    Harness::Cursor,
    Harness::Pi,
];

/// How the prompt reaches the harness process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptDelivery {
    Stdin,
    Argument,
}

impl Harness {
    pub fn name(self) -> &'static str {
        match self {
            Harness::Codex => "codex",
            Harness::Claude => "claude",
            Harness::Gemini => "gemini",
            Harness::Opencode => "opencode",
            Harness::Cursor => "cursor",
            Harness::Pi => "pi",
        }
    }

    /// Executable looked up on `PATH`.
    pub fn binary(self) -> &'static str {
        match self {
            Harness::Cursor => "cursor-agent",
            other => other.name(),
        }
    }

    pub fn prompt_delivery(self) -> PromptDelivery {
        match self {
            Harness::Codex | Harness::Claude | Harness::Gemini => PromptDelivery::Stdin,
            Harness::Opencode | Harness::Cursor | Harness::Pi => PromptDelivery::Argument,
        }
    }

    /// Arguments placed before the prompt (or before stdin is read).
    pub fn args(self, mode: AutomationMode, model: Option<&str>) -> Vec<String> {
        let args: Vec<&str> = match self {
            Harness::Codex => {
                let mut base = vec!["exec", "--skip-git-repo-check"];
                match mode {
                    AutomationMode::Yolo => {
                        base.push("--dangerously-bypass-approvals-and-sandbox");
                    }
                    AutomationMode::Auto => base.push("--full-auto"),
                    AutomationMode::Plan | AutomationMode::Manual => {
                        base.extend(["--sandbox", "read-only"]);
                    }
                }
                base
            }
            Harness::Claude => {
                let mut base = vec!["-p"];
                match mode {
                    AutomationMode::Yolo => base.push("--dangerously-skip-permissions"),
                    AutomationMode::Auto => base.extend(["--permission-mode", "acceptEdits"]),
                    AutomationMode::Plan => base.extend(["--permission-mode", "plan"]),
                    AutomationMode::Manual => {}
                }
                base
            }
            Harness::Gemini => match mode {
                AutomationMode::Yolo => vec!["--yolo"],
                AutomationMode::Auto => vec!["--approval-mode", "auto_edit"],
                AutomationMode::Plan | AutomationMode::Manual => Vec::new(),
            },
            Harness::Opencode => vec!["run"],
            Harness::Cursor => match mode {
                AutomationMode::Yolo | AutomationMode::Auto => vec!["-p", "--force"],
                AutomationMode::Plan | AutomationMode::Manual => vec!["-p"],
            },
            Harness::Pi => vec!["-p"],
        };
        let mut owned: Vec<String> = args.into_iter().map(str::to_string).collect();
        if let Some(model) = model {
            owned.push("--model".to_string());
            owned.push(model.to_string());
        }
        if self == Harness::Codex {
            // codex reads the prompt from stdin when given `-`.
            owned.push("-".to_string());
        }
        owned
    }

    pub fn known_names() -> String {
        PREFERENCE_ORDER
            .iter()
            .map(|harness| harness.name())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Harness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Harness {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PREFERENCE_ORDER
            .iter()
            .copied()
            .find(|harness| harness.name() == s.trim())
            .ok_or_else(|| {
                format!(
                    "unknown harness '{}' (known: {})",
                    s.trim(),
                    Harness::known_names()
                )
            })
    }
}

/// Failure of a single harness call.
///
/// Callers only learn *that* a harness failed; the message is for humans.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HarnessError {
    #[error("unknown harness '{name}' (known: {known})", known = Harness::known_names())]
    Unknown { name: String },
    #[error("{harness} failed: {message}")]
    Execution { harness: String, message: String },
}

impl HarnessError {
    pub fn execution(harness: impl Into<String>, message: impl Into<String>) -> Self {
        HarnessError::Execution {
            harness: harness.into(),
            message: message.into(),
        }
    }
}

/// How much autonomy a harness is granted for edits and commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutomationMode {
    Manual,
    Plan,
    #[default]
    Auto,
    Yolo,
}

impl AutomationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AutomationMode::Manual => "manual",
            AutomationMode::Plan => "plan",
            AutomationMode::Auto => "auto",
            AutomationMode::Yolo => "yolo",
        }
    }
}

impl fmt::Display for AutomationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AutomationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "manual" => Ok(AutomationMode::Manual),
            "plan" => Ok(AutomationMode::Plan),
            "auto" => Ok(AutomationMode::Auto),
            "yolo" => Ok(AutomationMode::Yolo),
            other => Err(format!(
                "unknown automation mode '{other}' (expected manual, plan, auto, or yolo)"
            )),
        }
    }
}

//! Harness gateway: one prompt in, raw text out.
//!
//! The [`HarnessCaller`] trait decouples orchestration from subprocesses.
//! [`CommandHarnessCaller`] spawns the real CLIs; tests inject scripted callers.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::core::harness::{AutomationMode, Harness, HarnessError, PromptDelivery};
use crate::io::process::{ProcessLimits, run_with_limits};

/// Largest prompt passed as a single argv element (Linux `MAX_ARG_STRLEN` less the NUL).
const ARGUMENT_PROMPT_LIMIT_BYTES: usize = 128 * 1024 - 1;

/// Uniform call contract over every harness.
///
/// `Sync` so a single caller can serve a parallel quorum round.
pub trait HarnessCaller: Sync {
    fn call(&self, harness: &str, prompt: &str, mode: AutomationMode)
    -> Result<String, HarnessError>;
}

impl<T: HarnessCaller + ?Sized> HarnessCaller for &T {
    fn call(
        &self,
        harness: &str,
        prompt: &str,
        mode: AutomationMode,
    ) -> Result<String, HarnessError> {
        (**self).call(harness, prompt, mode)
    }
}

/// Caller that runs harness binaries found on `PATH`.
#[derive(Debug, Clone)]
pub struct CommandHarnessCaller {
    workdir: PathBuf,
    limits: ProcessLimits,
    models: BTreeMap<String, String>,
}

impl CommandHarnessCaller {
    pub fn new(workdir: impl Into<PathBuf>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            workdir: workdir.into(),
            limits: ProcessLimits {
                timeout,
                output_limit_bytes,
            },
            models: BTreeMap::new(),
        }
    }

    /// Per-harness `--model` overrides, keyed by harness name.
    pub fn with_models(mut self, models: BTreeMap<String, String>) -> Self {
        self.models = models;
        self
    }

    fn command(&self, harness: Harness, prompt: &str, mode: AutomationMode) -> Command {
        let model = self.models.get(harness.name()).map(String::as_str);
        let mut cmd = Command::new(harness.binary());
        cmd.args(harness.args(mode, model)).current_dir(&self.workdir);
        if harness.prompt_delivery() == PromptDelivery::Argument {
            cmd.arg(prompt);
        }
        cmd
    }
}

impl HarnessCaller for CommandHarnessCaller {
    #[instrument(skip_all, fields(harness = %name, mode = %mode, prompt_bytes = prompt.len()))]
    fn call(&self, name: &str, prompt: &str, mode: AutomationMode) -> Result<String, HarnessError> {
        let harness: Harness = name.parse().map_err(|_| HarnessError::Unknown {
            name: name.trim().to_string(),
        })?;
        if harness.prompt_delivery() == PromptDelivery::Argument
            && prompt.len() > ARGUMENT_PROMPT_LIMIT_BYTES
        {
            return Err(HarnessError::execution(
                harness.name(),
                format!(
                    "prompt is {} bytes; {} takes it as an argument, limit {ARGUMENT_PROMPT_LIMIT_BYTES}",
                    prompt.len(),
                    harness.binary()
                ),
            ));
        }
        let cmd = self.command(harness, prompt, mode);
        let stdin = match harness.prompt_delivery() {
            PromptDelivery::Stdin => Some(prompt.as_bytes()),
            PromptDelivery::Argument => None,
        };

        let output = run_with_limits(cmd, stdin, self.limits)
            .map_err(|err| HarnessError::execution(harness.name(), format!("{err:#}")))?;
        if !output.success() {
            let reason = output.failure_reason(&self.limits);
            warn!(reason = %reason, "harness call failed");
            return Err(HarnessError::execution(harness.name(), reason));
        }

        debug!(
            stdout_bytes = output.stdout.len(),
            stdout_dropped = output.stdout_dropped,
            "harness call completed"
        );
        Ok(output.stdout_text())
    }
}

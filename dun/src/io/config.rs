//! Repository configuration stored under `.dun/config.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::harness::{AutomationMode, Harness};
use crate::core::quorum::{DispatchMode, QuorumConfig, Strategy};

pub const DUN_DIR: &str = ".dun";
pub const CONFIG_FILE: &str = "config.toml";

/// Configuration could not be loaded or is unusable.
///
/// Wraps the underlying cause so the CLI can map it to its own exit code.
#[derive(Debug, Error)]
#[error("configuration error: {0:#}")]
pub struct ConfigError(pub anyhow::Error);

impl ConfigError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self(anyhow!(message.into()))
    }
}

/// dun configuration (TOML).
///
/// Every field is optional in the file; CLI flags override what is loaded here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DunConfig {
    /// Iteration cap for `dun loop`.
    pub max_iterations: u32,

    pub automation: AutomationMode,

    /// Default harness list. More than one entry means a quorum round.
    pub harnesses: Vec<String>,

    /// Wall-clock limit for a single harness call.
    pub harness_timeout_secs: u64,

    /// Stdout kept per harness call; the remainder is dropped.
    pub harness_output_limit_bytes: usize,

    /// Per-harness model overrides.
    pub models: BTreeMap<String, String>,

    pub quorum: QuorumSettings,

    pub checks: Vec<CheckConfig>,
}

impl Default for DunConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            automation: AutomationMode::default(),
            harnesses: Vec::new(),
            harness_timeout_secs: 30 * 60,
            harness_output_limit_bytes: 1_000_000,
            models: BTreeMap::new(),
            quorum: QuorumSettings::default(),
            checks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QuorumSettings {
    pub mode: DispatchMode,
    pub strategy: Option<Strategy>,
    pub threshold: usize,
    pub prefer: Option<String>,
    pub escalate: bool,
}

impl QuorumSettings {
    pub fn to_quorum_config(&self, harnesses: Vec<String>) -> QuorumConfig {
        QuorumConfig {
            harnesses,
            mode: self.mode,
            strategy: self.strategy,
            threshold: self.threshold,
            prefer: self.prefer.clone(),
            escalate: self.escalate,
        }
    }
}

/// One command-backed check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckConfig {
    pub id: String,
    /// Argv, e.g. `["cargo", "clippy", "--quiet"]`.
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_check_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_check_output_limit_bytes")]
    pub output_limit_bytes: usize,
}

fn default_check_timeout_secs() -> u64 {
    600
}

fn default_check_output_limit_bytes() -> usize {
    200_000
}

impl DunConfig {
    pub fn harness_timeout(&self) -> Duration {
        Duration::from_secs(self.harness_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be >= 1"));
        }
        if self.harness_timeout_secs == 0 {
            return Err(anyhow!("harness_timeout_secs must be > 0"));
        }
        if self.harness_output_limit_bytes == 0 {
            return Err(anyhow!("harness_output_limit_bytes must be > 0"));
        }
        for name in self.harnesses.iter().chain(self.models.keys()) {
            name.parse::<Harness>().map_err(|err| anyhow!(err))?;
        }
        let mut seen: Vec<&str> = Vec::new();
        for check in &self.checks {
            if check.id.trim().is_empty() {
                return Err(anyhow!("checks[].id must be non-empty"));
            }
            if check.id.contains(['#', '@']) {
                return Err(anyhow!("check id '{}' must not contain '#' or '@'", check.id));
            }
            if seen.contains(&check.id.as_str()) {
                return Err(anyhow!("check id '{}' is defined more than once", check.id));
            }
            seen.push(&check.id);
            if check.command.is_empty() || check.command[0].trim().is_empty() {
                return Err(anyhow!(
                    "check '{}': command must be a non-empty array",
                    check.id
                ));
            }
            if check.timeout_secs == 0 || check.output_limit_bytes == 0 {
                return Err(anyhow!(
                    "check '{}': timeout_secs and output_limit_bytes must be > 0",
                    check.id
                ));
            }
        }
        if self.harnesses.len() > 1 {
            self.quorum
                .to_quorum_config(self.harnesses.clone())
                .validate()
                .context("quorum")?;
        }
        Ok(())
    }
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(DUN_DIR).join(CONFIG_FILE)
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `DunConfig::default()`.
pub fn load_config(path: &Path) -> Result<DunConfig> {
    if !path.exists() {
        return Ok(DunConfig::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: DunConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &DunConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    fs::write(&tmp_path, contents).with_context(|| format!("write temp {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, DunConfig::default());
        assert_eq!(cfg.max_iterations, 10);
        assert_eq!(cfg.automation, AutomationMode::Auto);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = config_path(temp.path());
        let cfg = DunConfig {
            harnesses: vec!["codex".to_string(), "claude".to_string()],
            checks: vec![CheckConfig {
                id: "clippy".to_string(),
                command: vec!["cargo".to_string(), "clippy".to_string()],
                description: None,
                timeout_secs: 60,
                output_limit_bytes: 4096,
            }],
            ..DunConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        assert_eq!(load_config(&path).expect("load"), cfg);
        assert!(!path.with_file_name("config.toml.tmp").exists());
    }

    #[test]
    fn parses_partial_file_with_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            r#"
automation = "plan"
harnesses = ["codex", "claude", "gemini"]

[models]
claude = "opus"

[quorum]
mode = "parallel"
strategy = "majority"
prefer = "claude"

[[checks]]
id = "tests"
command = ["cargo", "test"]
"#,
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.automation, AutomationMode::Plan);
        assert_eq!(cfg.quorum.mode, DispatchMode::Parallel);
        assert_eq!(cfg.quorum.strategy, Some(Strategy::Majority));
        assert_eq!(cfg.checks[0].timeout_secs, 600);
        let quorum = cfg.quorum.to_quorum_config(cfg.harnesses.clone());
        assert_eq!(quorum.prefer.as_deref(), Some("claude"));
    }

    #[test]
    fn rejects_invalid_values() {
        let cfg = DunConfig {
            max_iterations: 0,
            ..DunConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = DunConfig {
            models: BTreeMap::from([("copilot".to_string(), "x".to_string())]),
            ..DunConfig::default()
        };
        assert!(cfg.validate().is_err());

        let check = CheckConfig {
            id: "lint@v2".to_string(),
            command: vec!["true".to_string()],
            description: None,
            timeout_secs: 1,
            output_limit_bytes: 1,
        };
        let cfg = DunConfig {
            checks: vec![check],
            ..DunConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn quorum_settings_are_validated_with_the_harness_list() {
        let cfg = DunConfig {
            harnesses: vec!["codex".to_string(), "claude".to_string()],
            quorum: QuorumSettings {
                prefer: Some("gemini".to_string()),
                ..QuorumSettings::default()
            },
            ..DunConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(format!("{err:#}").contains("preferred harness 'gemini'"));
    }
}

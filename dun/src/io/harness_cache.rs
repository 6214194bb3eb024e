//! Cached harness discovery under `.dun/harnesses.json`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::core::harness::{Harness, PREFERENCE_ORDER};
use crate::io::config::{DUN_DIR, DunConfig, write_atomic};

pub const HARNESS_CACHE_FILE: &str = "harnesses.json";

/// Harnesses whose binaries were found on `PATH`, in preference order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HarnessCache {
    #[serde(default)]
    pub available: Vec<Harness>,
}

impl HarnessCache {
    /// First available harness in preference order.
    pub fn preferred(&self) -> Option<Harness> {
        PREFERENCE_ORDER
            .iter()
            .copied()
            .find(|harness| self.available.contains(harness))
    }
}

pub fn harness_cache_path(root: &Path) -> PathBuf {
    root.join(DUN_DIR).join(HARNESS_CACHE_FILE)
}

/// Probe `PATH` for every known harness binary.
#[instrument]
pub fn discover() -> HarnessCache {
    let available = PREFERENCE_ORDER
        .iter()
        .copied()
        .filter(|harness| match which::which(harness.binary()) {
            Ok(path) => {
                debug!(harness = %harness, path = %path.display(), "harness found");
                true
            }
            Err(_) => false,
        })
        .collect();
    HarnessCache { available }
}

pub fn load_cache(path: &Path) -> Result<Option<HarnessCache>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cache = serde_json::from_str(&contents)
        .with_context(|| format!("parse {}", path.display()))?;
    Ok(Some(cache))
}

pub fn write_cache(path: &Path, cache: &HarnessCache) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(cache).context("serialize harness cache")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Re-probe `PATH` and persist the result.
pub fn refresh(root: &Path) -> Result<HarnessCache> {
    let cache = discover();
    write_cache(&harness_cache_path(root), &cache)?;
    info!(available = cache.available.len(), "harness cache refreshed");
    Ok(cache)
}

/// Cached discovery result, probing and persisting on first use.
pub fn load_or_discover(root: &Path) -> Result<HarnessCache> {
    match load_cache(&harness_cache_path(root))? {
        Some(cache) => Ok(cache),
        None => refresh(root),
    }
}

/// Harness list for a run: explicit flag, then config, then first available.
///
/// An empty result means nothing is configured and nothing was discovered.
pub fn select_harnesses(
    explicit: &[String],
    config: &DunConfig,
    cache: impl FnOnce() -> Result<HarnessCache>,
) -> Result<Vec<String>> {
    if !explicit.is_empty() {
        return Ok(explicit.to_vec());
    }
    if !config.harnesses.is_empty() {
        return Ok(config.harnesses.clone());
    }
    let cache = cache()?;
    Ok(cache
        .preferred()
        .map(|harness| vec![harness.name().to_string()])
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(available: &[Harness]) -> HarnessCache {
        HarnessCache {
            available: available.to_vec(),
        }
    }

    #[test]
    fn preferred_follows_preference_order() {
        assert_eq!(
            cache(&[Harness::Pi, Harness::Claude]).preferred(),
            Some(Harness::Claude)
        );
        assert_eq!(cache(&[]).preferred(), None);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = harness_cache_path(temp.path());
        assert_eq!(load_cache(&path).expect("load"), None);
        let written = cache(&[Harness::Codex, Harness::Gemini]);
        write_cache(&path, &written).expect("write");
        let raw = fs::read_to_string(&path).expect("read");
        assert!(raw.contains("\"codex\""));
        assert_eq!(load_cache(&path).expect("load"), Some(written));
    }

    #[test]
    fn load_or_discover_prefers_existing_cache() {
        let temp = tempfile::tempdir().expect("tempdir");
        let written = cache(&[Harness::Opencode]);
        write_cache(&harness_cache_path(temp.path()), &written).expect("write");
        assert_eq!(load_or_discover(temp.path()).expect("load"), written);
    }

    #[test]
    fn selection_precedence() {
        let config = DunConfig {
            harnesses: vec!["gemini".to_string()],
            ..DunConfig::default()
        };
        let explicit = vec!["claude".to_string()];
        let cached = || Ok(cache(&[Harness::Codex]));

        assert_eq!(
            select_harnesses(&explicit, &config, cached).expect("select"),
            vec!["claude"]
        );
        assert_eq!(
            select_harnesses(&[], &config, cached).expect("select"),
            vec!["gemini"]
        );
        assert_eq!(
            select_harnesses(&[], &DunConfig::default(), cached).expect("select"),
            vec!["codex"]
        );
        let empty = || Ok(HarnessCache::default());
        assert!(
            select_harnesses(&[], &DunConfig::default(), empty)
                .expect("select")
                .is_empty()
        );
    }
}

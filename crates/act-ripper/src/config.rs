//! Run configuration: defaults, then environment overrides, then explicit
//! values set by the caller.

use crate::event::DEFAULT_ACCEPTED_PREFIXES;
use std::path::PathBuf;
use tracing::warn;

pub const ENV_CONCURRENCY: &str = "ACT_RIPPER_CONCURRENCY";
pub const ENV_TIMEOUT_MS: &str = "ACT_RIPPER_TIMEOUT_MS";
pub const ENV_SETTLE_MS: &str = "ACT_RIPPER_SETTLE_MS";
pub const ENV_OUT_DIR: &str = "ACT_RIPPER_OUT_DIR";

/// Settings shared by the pipeline, the host and the fetcher.
#[derive(Debug, Clone, PartialEq)]
pub struct RipperConfig {
    /// Page URL prefixes a run accepts.
    pub accepted_prefixes: Vec<String>,
    /// Maximum number of fetches in flight.
    pub fetch_concurrency: usize,
    /// Per-request timeout.
    pub fetch_timeout_ms: u64,
    /// How long to wait for the page to report readiness.
    pub ready_timeout_ms: u64,
    /// Quiet period after `load` before the page is considered ready.
    pub settle_ms: u64,
    /// Where archives are written.
    pub output_dir: PathBuf,
    /// Show the browser window.
    pub headful: bool,
}

impl Default for RipperConfig {
    fn default() -> Self {
        Self {
            accepted_prefixes: DEFAULT_ACCEPTED_PREFIXES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            fetch_concurrency: 128,
            fetch_timeout_ms: 30_000,
            ready_timeout_ms: 30_000,
            settle_ms: 2_000,
            output_dir: PathBuf::from("."),
            headful: false,
        }
    }
}

impl RipperConfig {
    /// Defaults with `ACT_RIPPER_*` environment overrides applied.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`. Unparseable values are logged and
    /// ignored.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(n) = parse_var::<usize>(&lookup, ENV_CONCURRENCY) {
            self.fetch_concurrency = n.max(1);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, ENV_TIMEOUT_MS) {
            self.fetch_timeout_ms = ms;
            self.ready_timeout_ms = ms;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, ENV_SETTLE_MS) {
            self.settle_ms = ms;
        }
        if let Some(dir) = lookup(ENV_OUT_DIR).filter(|d| !d.is_empty()) {
            self.output_dir = PathBuf::from(dir);
        }
        self
    }

    /// Where the archive for `file_name` lands.
    pub fn archive_path(&self, file_name: &str) -> PathBuf {
        self.output_dir.join(file_name)
    }
}

fn parse_var<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("ignoring {key}={raw:?}: not a number");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = RipperConfig::default();
        assert_eq!(config.fetch_concurrency, 128);
        assert_eq!(config.settle_ms, 2_000);
        assert_eq!(config.accepted_prefixes, vec!["https://act.hoyoverse.com/"]);
        assert!(!config.headful);
    }

    #[test]
    fn test_env_overrides() {
        let vars = env(&[
            (ENV_CONCURRENCY, "16"),
            (ENV_TIMEOUT_MS, "5000"),
            (ENV_OUT_DIR, "/tmp/rips"),
        ]);
        let config = RipperConfig::default().with_overrides(|k| vars.get(k).cloned());
        assert_eq!(config.fetch_concurrency, 16);
        assert_eq!(config.fetch_timeout_ms, 5000);
        assert_eq!(config.ready_timeout_ms, 5000);
        assert_eq!(config.settle_ms, 2_000);
        assert_eq!(
            config.archive_path("e1.zip"),
            PathBuf::from("/tmp/rips/e1.zip")
        );
    }

    #[test]
    fn test_bad_values_are_ignored() {
        let vars = env(&[(ENV_CONCURRENCY, "lots"), (ENV_SETTLE_MS, " 250 ")]);
        let config = RipperConfig::default().with_overrides(|k| vars.get(k).cloned());
        assert_eq!(config.fetch_concurrency, 128);
        assert_eq!(config.settle_ms, 250);
    }

    #[test]
    fn test_zero_concurrency_is_clamped() {
        let vars = env(&[(ENV_CONCURRENCY, "0")]);
        let config = RipperConfig::default().with_overrides(|k| vars.get(k).cloned());
        assert_eq!(config.fetch_concurrency, 1);
    }
}

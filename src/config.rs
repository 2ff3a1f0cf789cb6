//! Daemon configuration.
//!
//! Everything is optional: without any configuration the daemon serves the
//! built-in toolchains with default limits. A JSON document can be passed via
//! the `POLYEXEC_CONFIG` environment variable, and extra toolchain
//! descriptors can be dropped into a directory as `*.json` files.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::governor::ResourceLimits;
use crate::registry::LanguageRegistry;
use crate::toolchain::ToolchainDescriptor;

/// Top-level configuration for the daemon.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Toolchains added to (or replacing) the built-in ones.
    #[serde(default)]
    pub toolchains: Vec<ToolchainDescriptor>,

    /// Resource limits for guest processes.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Where per-request workspaces are created.
    #[serde(default)]
    pub workspace: WorkspaceConfig,
}

/// Resource limits (as read from JSON).
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Wall-clock limit for the run stage, in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Virtual-memory ceiling for the run stage. `null` disables it.
    #[serde(default = "default_memory")]
    pub memory_mb: Option<u64>,

    /// Wall-clock limit for the compile stage. Unbounded when absent.
    #[serde(default)]
    pub compile_timeout_seconds: Option<u64>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout(),
            memory_mb: default_memory(),
            compile_timeout_seconds: None,
        }
    }
}

/// Workspace location.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkspaceConfig {
    /// Directory under which workspaces are created.
    #[serde(default)]
    pub root: Option<PathBuf>,
}

const fn default_timeout() -> u64 {
    10
}

#[allow(clippy::unnecessary_wraps)]
const fn default_memory() -> Option<u64> {
    Some(512)
}

impl Config {
    /// Load configuration from the environment.
    ///
    /// `POLYEXEC_CONFIG` holds the JSON document (defaults when unset);
    /// `POLYEXEC_TIMEOUT` and `POLYEXEC_MEMORY_MB` override the limits.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("POLYEXEC_CONFIG") {
            Ok(json) => {
                serde_json::from_str(&json).context("Failed to parse POLYEXEC_CONFIG")?
            }
            Err(_) => {
                debug!("POLYEXEC_CONFIG not set, using defaults");
                Self::default()
            }
        };

        config.apply_overrides(
            parse_env_u64("POLYEXEC_TIMEOUT")?,
            parse_env_u64("POLYEXEC_MEMORY_MB")?,
        );

        Ok(config)
    }

    /// Override the run-stage limits; `None` keeps the current value.
    pub fn apply_overrides(&mut self, timeout_seconds: Option<u64>, memory_mb: Option<u64>) {
        if let Some(secs) = timeout_seconds {
            self.limits.timeout_seconds = secs;
        }
        if let Some(mb) = memory_mb {
            self.limits.memory_mb = Some(mb);
        }
    }

    /// Resolve the workspace root.
    ///
    /// Priority: `POLYEXEC_WORKSPACE_ROOT` env var > config > system temp dir.
    pub fn resolved_workspace_root(&self) -> PathBuf {
        if let Ok(dir) = std::env::var("POLYEXEC_WORKSPACE_ROOT") {
            let path = PathBuf::from(&dir);
            if path.is_dir() {
                return path;
            }
            warn!(path = %dir, "POLYEXEC_WORKSPACE_ROOT is not a directory, ignoring");
        }
        self.workspace
            .root
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Run-stage limits.
    pub fn run_limits(&self) -> ResourceLimits {
        ResourceLimits::new(
            Duration::from_secs(self.limits.timeout_seconds),
            self.limits.memory_mb,
        )
    }

    /// Compile-stage timeout, if any.
    pub fn compile_timeout(&self) -> Option<Duration> {
        self.limits.compile_timeout_seconds.map(Duration::from_secs)
    }

    /// Build the language registry: built-ins plus configured toolchains.
    pub fn build_registry(&self) -> LanguageRegistry {
        LanguageRegistry::with_overrides(self.toolchains.iter().cloned())
    }

    /// Scan a directory for toolchain descriptors.
    ///
    /// Every `*.json` file is parsed as one descriptor. Invalid entries are
    /// logged and skipped.
    pub fn scan_toolchain_dir(dir: &Path) -> Vec<ToolchainDescriptor> {
        let mut found = Vec::new();

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(path = %dir.display(), error = %e, "Cannot read toolchain directory");
                return found;
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "Error reading toolchain directory entry");
                    continue;
                }
            };

            let path = entry.path();
            if !path.is_file() || path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }

            let text = match std::fs::read_to_string(&path) {
                Ok(s) => s,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping toolchain: cannot read file");
                    continue;
                }
            };

            let desc: ToolchainDescriptor = match serde_json::from_str(&text) {
                Ok(d) => d,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping toolchain: invalid descriptor");
                    continue;
                }
            };

            if desc.run.is_empty() {
                warn!(language = %desc.language, path = %path.display(), "Skipping toolchain: empty run command");
                continue;
            }

            info!(language = %desc.language, path = %path.display(), "Discovered toolchain");
            found.push(desc);
        }

        found
    }

    /// Merge discovered toolchains into the config.
    ///
    /// Later descriptors override earlier ones with the same language id.
    pub fn merge_toolchains(&mut self, extra: Vec<ToolchainDescriptor>) {
        for desc in extra {
            if let Some(existing) = self
                .toolchains
                .iter_mut()
                .find(|d| d.language == desc.language)
            {
                info!(language = %desc.language, "Discovered toolchain overrides configured one");
                *existing = desc;
            } else {
                self.toolchains.push(desc);
            }
        }
    }

    /// Create a config from a JSON string (for testing).
    #[cfg(test)]
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Failed to parse JSON")?;
        Ok(config)
    }
}

fn parse_env_u64(name: &str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{name} must be a non-negative integer, got '{value}'")),
        Err(_) => Ok(None),
    }
}

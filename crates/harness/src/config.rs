//! Harness configuration threaded through every session.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// The default name for the kiln configuration file.
pub const KILN_CONFIG_FILENAME: &str = "Kiln.toml";

/// Build profile used when none is configured.
pub const DEFAULT_PROFILE: &str = "default";

/// Seconds of compiler silence before a progress notice is emitted.
pub const DEFAULT_PROGRESS_INTERVAL_SECS: u64 = 15;

/// Settings shared by compilation and node management.
///
/// Nothing here is read from process-wide state: the only implicit default is
/// the sandbox root, which falls back to `<system temp dir>/kiln`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Directory holding the `forge` and `anvil` binaries.
    ///
    /// When unset, binaries are resolved through `PATH`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub foundry_bin: Option<PathBuf>,
    /// Name of the active build profile, exported as `FOUNDRY_PROFILE`.
    pub profile: String,
    /// Root under which sandboxed compilations create their directories.
    pub temp_root: PathBuf,
    /// Seconds without compiler output before progress is reported.
    pub progress_interval_secs: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            foundry_bin: None,
            profile: DEFAULT_PROFILE.to_string(),
            temp_root: std::env::temp_dir().join("kiln"),
            progress_interval_secs: DEFAULT_PROGRESS_INTERVAL_SECS,
        }
    }
}

impl HarnessConfig {
    /// Path of the `forge` build tool.
    pub fn forge(&self) -> PathBuf {
        self.foundry_binary("forge")
    }

    /// Path of the `anvil` node.
    pub fn anvil(&self) -> PathBuf {
        self.foundry_binary("anvil")
    }

    fn foundry_binary(&self, name: &str) -> PathBuf {
        match &self.foundry_bin {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        }
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }

    /// Save the configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize harness config to TOML")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Load the configuration from a TOML file or a directory containing `Kiln.toml`.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!(
                "Configuration file or directory not found: {}",
                path.display()
            );
        }

        let config_path = if path.is_dir() {
            path.join(KILN_CONFIG_FILENAME)
        } else {
            path.to_path_buf()
        };

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config from {}", config_path.display()))?;
        let config: Self =
            toml::from_str(&content).context("Failed to parse config file as TOML")?;
        tracing::info!(path = %config_path.display(), "Configuration loaded");
        Ok(config)
    }
}

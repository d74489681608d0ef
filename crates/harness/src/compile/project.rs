//! Context of an existing forge project.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::{BuildOutput, cmd::ForgeCmdBuilder, execute_build, forge_runner};
use crate::{config::HarnessConfig, process::ProcessRunner};

/// Layout of a forge project as reported by `forge config --json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Project {
    #[serde(skip)]
    pub root: PathBuf,
    pub src: PathBuf,
    pub test: PathBuf,
    pub out: PathBuf,
    pub libs: Vec<PathBuf>,
    pub remappings: Vec<String>,
}

impl Default for Project {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            src: PathBuf::from("src"),
            test: PathBuf::from("test"),
            out: PathBuf::from("out"),
            libs: vec![PathBuf::from("lib")],
            remappings: Vec::new(),
        }
    }
}

impl Project {
    /// Read the project layout rooted at `root`.
    pub async fn load(config: &HarnessConfig, root: impl AsRef<Path>) -> Result<Self> {
        let root = std::path::absolute(root.as_ref())
            .with_context(|| format!("Failed to resolve project root {}", root.as_ref().display()))?;

        let mut project: Project = ProcessRunner::new(config.forge())
            .args(ForgeCmdBuilder::config(&root).build())
            .env("FOUNDRY_PROFILE", &config.profile)
            .run_json()
            .await
            .with_context(|| format!("Failed to read forge config of {}", root.display()))?;
        project.root = root;

        tracing::debug!(
            root = %project.root.display(),
            remappings = project.remappings.len(),
            "Loaded project context"
        );
        Ok(project)
    }

    /// Resolve a project-relative path.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Remappings rewritten to absolute targets, followed by the implicit
    /// `src/` and `test/` remappings of the project itself.
    pub fn absolute_remappings(&self) -> Vec<String> {
        let mut remappings: Vec<String> = self
            .remappings
            .iter()
            .map(|remapping| match remapping.split_once('=') {
                Some((prefix, target)) => format!("{prefix}={}", self.absolute_target(target)),
                None => remapping.clone(),
            })
            .collect();

        remappings.push(format!("src/={}/", trimmed(&self.resolve(&self.src))));
        remappings.push(format!("test/={}/", trimmed(&self.resolve(&self.test))));
        remappings
    }

    fn absolute_target(&self, target: &str) -> String {
        let resolved = trimmed(&self.resolve(target));
        if target.ends_with('/') {
            format!("{resolved}/")
        } else {
            resolved
        }
    }

    /// Directory holding the project's build artifacts.
    pub fn out_dir(&self) -> PathBuf {
        self.resolve(&self.out)
    }

    /// Build the whole project.
    pub async fn build(&self, config: &HarnessConfig) -> Result<BuildOutput> {
        tracing::info!(root = %self.root.display(), "Building project");
        let runner = forge_runner(config, ForgeCmdBuilder::build_project(&self.root).build());
        execute_build(&runner)
            .await
            .with_context(|| format!("Failed to build project {}", self.root.display()))
    }
}

fn trimmed(path: &Path) -> String {
    path.display().to_string().trim_end_matches('/').to_string()
}

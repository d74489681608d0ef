//! Command builder for forge.

use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ForgeSubcommand {
    Build,
    Config,
}

/// Builder for forge commands.
#[derive(Debug, Clone)]
pub struct ForgeCmdBuilder {
    subcommand: ForgeSubcommand,
    root: String,
    config_path: Option<String>,
    no_cache: bool,
    force: bool,
}

impl ForgeCmdBuilder {
    /// `forge build --format-json` rooted at `root`.
    pub fn build_project(root: impl AsRef<Path>) -> Self {
        Self::new(ForgeSubcommand::Build, root)
    }

    /// `forge config --json` rooted at `root`.
    pub fn config(root: impl AsRef<Path>) -> Self {
        Self::new(ForgeSubcommand::Config, root)
    }

    fn new(subcommand: ForgeSubcommand, root: impl AsRef<Path>) -> Self {
        Self {
            subcommand,
            root: root.as_ref().display().to_string(),
            config_path: None,
            no_cache: false,
            force: false,
        }
    }

    /// Read settings from an explicit profile file.
    pub fn config_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config_path = Some(path.as_ref().display().to_string());
        self
    }

    /// Skip the compilation cache.
    pub fn no_cache(mut self, no_cache: bool) -> Self {
        self.no_cache = no_cache;
        self
    }

    /// Recompile even when sources are unchanged.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Build the command as a vector of strings.
    pub fn build(self) -> Vec<String> {
        let mut cmd = match self.subcommand {
            ForgeSubcommand::Build => vec![
                "build".to_string(),
                "--format-json".to_string(),
                "--root".to_string(),
                self.root,
            ],
            ForgeSubcommand::Config => vec![
                "config".to_string(),
                "--root".to_string(),
                self.root,
                "--json".to_string(),
            ],
        };

        if self.no_cache {
            cmd.push("--no-cache".to_string());
        }

        if self.force {
            cmd.push("--force".to_string());
        }

        if let Some(config_path) = self.config_path {
            cmd.push("--config-path".to_string());
            cmd.push(config_path);
        }

        cmd
    }
}

//! Build-profile file handed to forge through `--config-path`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use toml::{Table, Value};

use super::{CompileOptions, project::Project};

/// File name of the generated profile inside a sandbox.
pub const PROFILE_FILENAME: &str = "foundry.toml";

/// Clamp an unsigned value into the signed range TOML integers can hold.
pub fn clamp_integer(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// One `[profile.<name>]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildProfile {
    name: String,
    src: String,
    out: String,
    libs: Vec<PathBuf>,
    remappings: Vec<String>,
    allow_paths: Vec<PathBuf>,
    optimizer: Option<bool>,
    optimizer_runs: Option<u64>,
    solc_version: Option<String>,
    evm_version: Option<String>,
    via_ir: Option<bool>,
}

impl BuildProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            src: "src".to_string(),
            out: "out".to_string(),
            libs: Vec::new(),
            remappings: Vec::new(),
            allow_paths: Vec::new(),
            optimizer: None,
            optimizer_runs: None,
            solc_version: None,
            evm_version: None,
            via_ir: None,
        }
    }

    /// Apply compiler overrides.
    ///
    /// Setting optimizer runs turns the optimizer on unless it was explicitly disabled.
    pub fn with_options(mut self, options: &CompileOptions) -> Self {
        self.optimizer = match (options.optimize, options.optimizer_runs) {
            (Some(enabled), _) => Some(enabled),
            (None, Some(_)) => Some(true),
            (None, None) => None,
        };
        self.optimizer_runs = options.optimizer_runs;
        self.solc_version = options.solc_version.clone();
        self.evm_version = options.evm_version.clone();
        self.via_ir = options.via_ir;
        self
    }

    /// Resolve imports against an existing project.
    pub fn with_project(mut self, project: &Project) -> Self {
        self.remappings = project.absolute_remappings();
        self.libs = project.libs.iter().map(|lib| project.resolve(lib)).collect();
        self.allow_paths = vec![project.root.clone()];
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn to_table(&self) -> Table {
        let mut section = Table::new();
        section.insert("src".into(), Value::String(self.src.clone()));
        section.insert("out".into(), Value::String(self.out.clone()));

        if !self.libs.is_empty() {
            section.insert("libs".into(), path_array(&self.libs));
        }
        if !self.remappings.is_empty() {
            section.insert(
                "remappings".into(),
                Value::Array(self.remappings.iter().cloned().map(Value::String).collect()),
            );
        }
        if !self.allow_paths.is_empty() {
            section.insert("allow_paths".into(), path_array(&self.allow_paths));
        }
        if let Some(optimizer) = self.optimizer {
            section.insert("optimizer".into(), Value::Boolean(optimizer));
        }
        if let Some(runs) = self.optimizer_runs {
            section.insert("optimizer_runs".into(), Value::Integer(clamp_integer(runs)));
        }
        if let Some(solc) = &self.solc_version {
            section.insert("solc_version".into(), Value::String(solc.clone()));
        }
        if let Some(evm) = &self.evm_version {
            section.insert("evm_version".into(), Value::String(evm.clone()));
        }
        if let Some(via_ir) = self.via_ir {
            section.insert("via_ir".into(), Value::Boolean(via_ir));
        }

        let mut profiles = Table::new();
        profiles.insert(self.name.clone(), Value::Table(section));

        let mut root = Table::new();
        root.insert("profile".into(), Value::Table(profiles));
        root
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string(&self.to_table())
            .with_context(|| format!("Failed to serialize build profile '{}'", self.name))
    }
}

fn path_array(paths: &[PathBuf]) -> Value {
    Value::Array(
        paths
            .iter()
            .map(|p| Value::String(p.display().to_string()))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn test_clamp_integer() {
        assert_eq!(clamp_integer(200), 200);
        assert_eq!(clamp_integer(u64::MAX), i64::MAX);
    }

    #[test]
    fn test_profile_with_options() {
        let options = CompileOptions {
            optimizer_runs: Some(u64::MAX),
            solc_version: Some("0.8.26".to_string()),
            via_ir: Some(true),
            ..Default::default()
        };
        let profile = BuildProfile::new("default").with_options(&options);

        let parsed: Table = toml::from_str(&profile.to_toml().unwrap()).unwrap();
        let section = parsed["profile"]["default"].as_table().unwrap();

        assert_eq!(section["src"].as_str(), Some("src"));
        assert_eq!(section["optimizer"].as_bool(), Some(true));
        assert_eq!(section["optimizer_runs"].as_integer(), Some(i64::MAX));
        assert_eq!(section["solc_version"].as_str(), Some("0.8.26"));
        assert_eq!(section["via_ir"].as_bool(), Some(true));
        assert!(section.get("evm_version").is_none());
        assert!(section.get("remappings").is_none());
    }

    #[test]
    fn test_optimizer_explicitly_disabled() {
        let options = CompileOptions {
            optimize: Some(false),
            optimizer_runs: Some(10),
            ..Default::default()
        };
        let table = BuildProfile::new("ci").with_options(&options).to_table();
        assert_eq!(table["profile"]["ci"]["optimizer"].as_bool(), Some(false));
    }

    #[test]
    fn test_profile_with_project() {
        let project = Project {
            root: PathBuf::from("/work/app"),
            src: PathBuf::from("src"),
            test: PathBuf::from("test"),
            out: PathBuf::from("out"),
            libs: vec![PathBuf::from("lib")],
            remappings: vec!["forge-std/=lib/forge-std/src/".to_string()],
        };
        let table = BuildProfile::new("default").with_project(&project).to_table();
        let section = table["profile"]["default"].as_table().unwrap();

        let remappings: Vec<&str> = section["remappings"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert_eq!(
            remappings,
            vec![
                "forge-std/=/work/app/lib/forge-std/src/",
                "src/=/work/app/src/",
                "test/=/work/app/test/",
            ]
        );
        assert_eq!(section["libs"][0].as_str(), Some("/work/app/lib"));
        assert_eq!(
            section["allow_paths"][0].as_str().map(Path::new),
            Some(Path::new("/work/app"))
        );
    }
}

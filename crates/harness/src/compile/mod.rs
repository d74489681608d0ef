//! On-demand compilation of Solidity source inside isolated sandboxes.

pub mod cmd;
pub mod output;
pub mod profile;
pub mod project;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

pub use output::{BuildOutput, Diagnostic};
pub use project::Project;

use crate::{
    artifact::Artifact,
    config::HarnessConfig,
    error::HarnessError,
    fs::FsHandler,
    process::{ProcessRunner, ProgressFn},
};
use cmd::ForgeCmdBuilder;
use profile::{BuildProfile, PROFILE_FILENAME};

/// Pragma prepended to sources that declare none.
pub const DEFAULT_PRAGMA: &str = "pragma solidity ^0.8.0;";

/// License header prepended to sources that declare none.
pub const DEFAULT_LICENSE: &str = "// SPDX-License-Identifier: UNLICENSED";

/// Compiler overrides for a single compilation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileOptions {
    /// Contract to extract; inferred from the source when absent.
    pub contract_name: Option<String>,
    pub optimize: Option<bool>,
    pub optimizer_runs: Option<u64>,
    pub solc_version: Option<String>,
    pub evm_version: Option<String>,
    pub via_ir: Option<bool>,
    /// Existing project whose remappings the source may import through.
    pub project: Option<Project>,
}

impl CompileOptions {
    pub fn contract(mut self, name: impl Into<String>) -> Self {
        self.contract_name = Some(name.into());
        self
    }
}

/// Name of the first `contract` or `library` declared in `source`, ignoring comments.
pub fn extract_contract_name(source: &str) -> Option<String> {
    let code = strip_comments(source);
    let is_ident = |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '$';

    let mut rest = code.as_str();
    let mut prev: Option<char> = None;
    while !rest.is_empty() {
        let boundary = prev.is_none_or(|c| !is_ident(c));
        if boundary {
            for keyword in ["contract", "library"] {
                let Some(after) = rest.strip_prefix(keyword) else {
                    continue;
                };
                let name_start = after.trim_start();
                if name_start.len() == after.len() {
                    // Keyword not followed by whitespace, e.g. `contractFoo`.
                    continue;
                }
                let name: String = name_start.chars().take_while(|c| is_ident(*c)).collect();
                if !name.is_empty() && !name.starts_with(|c: char| c.is_ascii_digit()) {
                    return Some(name);
                }
            }
        }

        let mut chars = rest.chars();
        prev = chars.next();
        rest = chars.as_str();
    }
    None
}

/// Blank out `//` and `/* */` comments. String literals are kept intact.
fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    let mut in_string: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(quote) = in_string {
            out.push(c);
            if c == '\\' {
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            } else if c == quote {
                in_string = None;
            }
            continue;
        }

        match (c, chars.peek()) {
            ('/', Some('/')) => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut last = '\0';
                for skipped in chars.by_ref() {
                    if last == '*' && skipped == '/' {
                        break;
                    }
                    last = skipped;
                }
                out.push(' ');
            }
            ('"' | '\'', _) => {
                in_string = Some(c);
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

/// Prepend the license header and pragma when the source lacks them.
pub fn normalize_source(source: &str) -> String {
    let has_license = source.contains("SPDX-License-Identifier");
    let has_pragma = source
        .lines()
        .any(|line| line.trim_start().starts_with("pragma solidity"));

    let mut normalized = String::with_capacity(source.len() + 64);
    if !has_license {
        normalized.push_str(DEFAULT_LICENSE);
        normalized.push('\n');
    }
    if !has_pragma {
        normalized.push_str(DEFAULT_PRAGMA);
        normalized.push('\n');
    }
    normalized.push_str(source);
    normalized
}

/// A forge invocation with the active profile exported.
pub(crate) fn forge_runner(config: &HarnessConfig, args: Vec<String>) -> ProcessRunner {
    ProcessRunner::new(config.forge())
        .args(args)
        .env("FOUNDRY_PROFILE", &config.profile)
}

/// Run a `forge build --format-json` command and interpret its output.
///
/// Error diagnostics win over the exit code: forge exits non-zero on a failed
/// build but still prints the diagnostics.
pub(crate) async fn execute_build(runner: &ProcessRunner) -> Result<BuildOutput> {
    let output = runner.output().await?;

    let json_start = output.stdout.iter().position(|b| *b == b'{');
    let parsed = json_start
        .and_then(|start| serde_json::from_slice::<BuildOutput>(&output.stdout[start..]).ok());

    match parsed {
        Some(build) if build.has_errors() => Err(HarnessError::BuildFailed {
            diagnostics: build.errors,
        }
        .into()),
        _ if !output.success => Err(runner.failure(&output).into()),
        Some(build) => {
            for warning in build.errors.iter().filter(|d| !d.is_error()) {
                tracing::warn!(severity = %warning.severity, "{}", warning.message);
            }
            Ok(build)
        }
        None => anyhow::bail!(
            "forge produced no parsable JSON output: {}",
            String::from_utf8_lossy(&output.stdout).trim()
        ),
    }
}

/// Compiles single sources in content-addressed directories under the temp root.
#[derive(Clone)]
pub struct CompileSandbox {
    config: HarnessConfig,
    progress: ProgressFn,
}

impl std::fmt::Debug for CompileSandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompileSandbox")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CompileSandbox {
    pub fn new(config: HarnessConfig) -> Self {
        Self {
            config,
            progress: Arc::new(|elapsed| {
                tracing::info!(elapsed_secs = elapsed.as_secs(), "Still compiling...");
            }),
        }
    }

    /// Replace the callback fired while the compiler is silent.
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Directory used to compile `source`, derived from its content hash.
    pub fn sandbox_dir(&self, source: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(source.as_bytes()));
        self.config.temp_root.join(format!("sol-{digest}"))
    }

    /// Compile `source` and extract the requested contract.
    pub async fn compile(&self, source: &str, options: &CompileOptions) -> Result<Artifact> {
        let contract_name = match &options.contract_name {
            Some(name) => name.clone(),
            None => extract_contract_name(source).ok_or(HarnessError::MissingContractName)?,
        };

        let source = normalize_source(source);
        let root = self.sandbox_dir(&source);
        FsHandler::recreate_dir(&root).await?;

        let relative = Path::new("src").join(format!("{contract_name}.sol"));
        FsHandler::write_file(&root.join(&relative), &source).await?;

        let mut profile = BuildProfile::new(&self.config.profile).with_options(options);
        if let Some(project) = &options.project {
            profile = profile.with_project(project);
        }
        let profile_path = root.join(PROFILE_FILENAME);
        FsHandler::write_file(&profile_path, profile.to_toml()?).await?;

        tracing::debug!(
            contract = %contract_name,
            sandbox = %root.display(),
            profile = profile.name(),
            "Compiling source"
        );

        let args = ForgeCmdBuilder::build_project(&root)
            .no_cache(true)
            .force(true)
            .config_path(&profile_path)
            .build();
        let runner = forge_runner(&self.config, args)
            .progress(self.config.progress_interval(), self.progress.clone());

        let output = execute_build(&runner)
            .await
            .with_context(|| format!("Failed to compile contract {contract_name}"))?;

        let compiled = output
            .contract_at(&relative, &contract_name)
            .or_else(|| output.find_contract(&contract_name).map(|(_, c)| c))
            .ok_or_else(|| HarnessError::ContractNotFound {
                contract: contract_name.clone(),
                root: root.clone(),
            })?;

        let artifact = Artifact::from_compiled(
            &compiled.abi,
            &compiled.evm.bytecode,
            contract_name,
            format!("sol:{}", root.display()),
            Some(source),
        )?;

        tracing::info!(
            contract = %artifact.contract_name,
            links = artifact.links.len(),
            "Compiled contract"
        );
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use super::*;

    #[test]
    fn test_extract_contract_name() {
        assert_eq!(
            extract_contract_name("contract C { function f() public {} }"),
            Some("C".to_string())
        );
        assert_eq!(
            extract_contract_name("library MathLib {}\ncontract User {}"),
            Some("MathLib".to_string())
        );
        assert_eq!(
            extract_contract_name("abstract contract Base_1 {}"),
            Some("Base_1".to_string())
        );
        assert_eq!(
            extract_contract_name("// this contract does things\ncontract Real {}"),
            Some("Real".to_string())
        );
        assert_eq!(
            extract_contract_name("/* library Fake */ contract Real {}"),
            Some("Real".to_string())
        );
        assert_eq!(extract_contract_name("interface I {}"), None);
        assert_eq!(extract_contract_name("mycontract X {}"), None);
        assert_eq!(extract_contract_name("import \"./A.sol\";"), None);
    }

    #[test]
    fn test_normalize_source_inserts_headers_once() {
        let normalized = normalize_source("contract C {}");
        assert_eq!(normalized.matches("SPDX-License-Identifier").count(), 1);
        assert_eq!(normalized.matches("pragma solidity").count(), 1);
        assert!(normalized.starts_with(DEFAULT_LICENSE));
        assert!(normalized.ends_with("contract C {}"));

        // Already normalized sources are left alone.
        assert_eq!(normalize_source(&normalized), normalized);

        let with_pragma = "pragma solidity 0.8.20;\ncontract C {}";
        let normalized = normalize_source(with_pragma);
        assert_eq!(normalized.matches("pragma solidity").count(), 1);
        assert!(normalized.contains("0.8.20"));
        assert_eq!(normalized.matches("SPDX-License-Identifier").count(), 1);
    }

    #[test]
    fn test_sandbox_dir_is_content_addressed() {
        let sandbox = CompileSandbox::new(HarnessConfig {
            temp_root: PathBuf::from("/tmp/kiln-test"),
            ..Default::default()
        });

        let a = sandbox.sandbox_dir("contract A {}");
        let a_again = sandbox.sandbox_dir("contract A {}");
        let b = sandbox.sandbox_dir("contract B {}");

        assert_eq!(a, a_again);
        assert_ne!(a, b);
        assert!(a.starts_with("/tmp/kiln-test"));
    }

    #[tokio::test]
    async fn test_missing_contract_name() {
        let dir = TempDir::new("kiln-compile").unwrap();
        let sandbox = CompileSandbox::new(HarnessConfig {
            temp_root: dir.path().to_path_buf(),
            ..Default::default()
        });

        let err = sandbox
            .compile("interface I {}", &CompileOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HarnessError>(),
            Some(HarnessError::MissingContractName)
        ));
    }

    #[cfg(unix)]
    mod fake_forge {
        use std::os::unix::fs::PermissionsExt;

        use super::*;

        /// Install a `forge` script printing `stdout` and exiting with `code`.
        fn install(dir: &Path, stdout: &str, code: i32) -> HarnessConfig {
            let bin = dir.join("bin");
            std::fs::create_dir_all(&bin).unwrap();
            let script = format!("#!/bin/sh\ncat <<'JSON'\n{stdout}\nJSON\nexit {code}\n");
            let path = bin.join("forge");
            std::fs::write(&path, script).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

            HarnessConfig {
                foundry_bin: Some(bin),
                temp_root: dir.join("sandbox"),
                ..Default::default()
            }
        }

        #[tokio::test]
        async fn test_compile_extracts_contract() {
            let dir = TempDir::new("kiln-compile").unwrap();
            let output = serde_json::json!({
                "errors": [],
                "contracts": {
                    "src/C.sol": {
                        "C": [{
                            "contract": {
                                "abi": [
                                    { "type": "function", "name": "f", "inputs": [], "outputs": [{ "name": "", "type": "uint256", "internalType": "uint256" }], "stateMutability": "pure" },
                                    { "type": "function", "name": 5 }
                                ],
                                "evm": { "bytecode": { "object": "6080604052", "linkReferences": {} } }
                            }
                        }]
                    }
                }
            });
            let config = install(dir.path(), &output.to_string(), 0);
            let sandbox = CompileSandbox::new(config);

            let source = "contract C { function f() public pure returns (uint) { return 1; } }";
            let artifact = sandbox.compile(source, &CompileOptions::default()).await.unwrap();

            assert_eq!(artifact.contract_name, "C");
            assert_eq!(artifact.bytecode, "0x6080604052");
            assert_eq!(artifact.abi.functions().count(), 1);
            assert!(artifact.links.is_empty());

            let written = sandbox.sandbox_dir(artifact.source.as_deref().unwrap());
            assert!(written.join("src/C.sol").exists());
            assert!(written.join(PROFILE_FILENAME).exists());
        }

        #[tokio::test]
        async fn test_compile_reports_diagnostics() {
            let dir = TempDir::new("kiln-compile").unwrap();
            let output = serde_json::json!({
                "errors": [
                    { "severity": "warning", "message": "shadowing" },
                    { "severity": "error", "message": "Expected ';' but got '}'" }
                ],
                "contracts": {}
            });
            let sandbox = CompileSandbox::new(install(dir.path(), &output.to_string(), 1));

            let err = sandbox
                .compile("contract Broken { uint x }", &CompileOptions::default())
                .await
                .unwrap_err();

            match err.downcast_ref::<HarnessError>() {
                Some(HarnessError::BuildFailed { diagnostics }) => {
                    assert_eq!(diagnostics.len(), 2);
                    assert!(diagnostics[1].is_error());
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_compile_contract_not_found() {
            let dir = TempDir::new("kiln-compile").unwrap();
            let output = serde_json::json!({ "errors": [], "contracts": {} });
            let sandbox = CompileSandbox::new(install(dir.path(), &output.to_string(), 0));

            let err = sandbox
                .compile("contract C {}", &CompileOptions::default().contract("D"))
                .await
                .unwrap_err();
            assert!(matches!(
                err.downcast_ref::<HarnessError>(),
                Some(HarnessError::ContractNotFound { contract, .. }) if contract == "D"
            ));
        }
    }
}

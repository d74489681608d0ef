//! Uniform artifact records and the resolver producing them.

use std::path::{Path, PathBuf};

use alloy_core::json_abi::JsonAbi;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    abi::parse_abi_lenient,
    compile::{
        CompileOptions, CompileSandbox,
        output::{ArtifactFile, BytecodeOutput},
    },
    error::HarnessError,
    fs::FsHandler,
};

/// Contract name used for raw bytecode deployed without one.
pub const UNNAMED_CONTRACT: &str = "Unnamed";

/// Library placeholder inside linkable bytecode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryReference {
    /// Path segments of the declaring file, innermost first.
    pub qualified_path: Vec<String>,
    pub contract_name: String,
    /// Byte offsets of every 20-byte slot to patch.
    pub offsets: Vec<usize>,
}

impl LibraryReference {
    pub fn new(file: &str, contract_name: &str, offsets: Vec<usize>) -> Self {
        Self {
            qualified_path: file
                .split('/')
                .filter(|s| !s.is_empty())
                .rev()
                .map(str::to_string)
                .collect(),
            contract_name: contract_name.to_string(),
            offsets,
        }
    }

    /// Declaring file, outermost segment first.
    pub fn file(&self) -> String {
        let mut segments: Vec<&str> = self.qualified_path.iter().map(String::as_str).collect();
        segments.reverse();
        segments.join("/")
    }

    /// `path:Name`, or the bare name when the path is unknown.
    pub fn qualified_id(&self) -> String {
        if self.qualified_path.is_empty() {
            self.contract_name.clone()
        } else {
            format!("{}:{}", self.file(), self.contract_name)
        }
    }
}

/// Everything needed to deploy a contract.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub abi: JsonAbi,
    /// `0x`-prefixed creation bytecode, possibly with unlinked placeholders.
    pub bytecode: String,
    pub contract_name: String,
    /// Provenance tag such as `sol:<sandbox>` or `file:<path>`.
    pub origin: String,
    pub links: Vec<LibraryReference>,
    pub source: Option<String>,
}

impl Artifact {
    pub(crate) fn from_compiled(
        abi: &[Value],
        bytecode: &BytecodeOutput,
        contract_name: String,
        origin: String,
        source: Option<String>,
    ) -> Result<Self, HarnessError> {
        Ok(Self {
            abi: parse_abi_lenient(abi),
            bytecode: bytecode.hex(),
            contract_name,
            origin,
            links: bytecode.library_references()?,
            source,
        })
    }

    pub fn is_linked(&self) -> bool {
        self.links.is_empty()
    }
}

/// The shapes a deployable contract can be described in.
#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactDescriptor {
    /// Bytecode and ABI supplied directly.
    Bytecode {
        bytecode: String,
        abi: JsonAbi,
        contract_name: Option<String>,
        /// Library placeholders still present in `bytecode`.
        links: Vec<LibraryReference>,
    },
    /// A path resolvable through `import "<path>";`.
    Import {
        path: String,
        options: CompileOptions,
    },
    /// Inline Solidity source.
    Source {
        source: String,
        options: CompileOptions,
    },
    /// A source file of an already built project.
    ProjectFile {
        file: PathBuf,
        contract_name: Option<String>,
    },
}

impl ArtifactDescriptor {
    pub fn bytecode(bytecode: impl Into<String>, abi: JsonAbi) -> Self {
        Self::Bytecode {
            bytecode: bytecode.into(),
            abi,
            contract_name: None,
            links: Vec::new(),
        }
    }

    /// Declare library placeholders of a [`ArtifactDescriptor::Bytecode`].
    pub fn with_links(mut self, references: Vec<LibraryReference>) -> Self {
        if let Self::Bytecode { links, .. } = &mut self {
            *links = references;
        }
        self
    }

    pub fn source(source: impl Into<String>) -> Self {
        Self::Source {
            source: source.into(),
            options: CompileOptions::default(),
        }
    }

    pub fn import(path: impl Into<String>) -> Self {
        Self::Import {
            path: path.into(),
            options: CompileOptions::default(),
        }
    }

    pub fn project_file(file: impl Into<PathBuf>) -> Self {
        Self::ProjectFile {
            file: file.into(),
            contract_name: None,
        }
    }

    /// Select a contract by name.
    pub fn with_contract(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        match &mut self {
            Self::Bytecode { contract_name, .. } | Self::ProjectFile { contract_name, .. } => {
                *contract_name = Some(name);
            }
            Self::Import { options, .. } | Self::Source { options, .. } => {
                options.contract_name = Some(name);
            }
        }
        self
    }

    /// Contract name known before resolution, if any.
    pub fn contract_name(&self) -> Option<String> {
        match self {
            Self::Bytecode { contract_name, .. } => {
                Some(contract_name.clone().unwrap_or_else(|| UNNAMED_CONTRACT.to_string()))
            }
            Self::ProjectFile {
                file,
                contract_name,
            } => contract_name.clone().or_else(|| file_stem(file)),
            Self::Import { path, options } => options
                .contract_name
                .clone()
                .or_else(|| file_stem(Path::new(path))),
            Self::Source { source, options } => options
                .contract_name
                .clone()
                .or_else(|| crate::compile::extract_contract_name(source)),
        }
    }

    /// Classify loose JSON input.
    ///
    /// Recognized objects: `{bytecode, abi, contractName?, linkReferences?}`, `{import}`,
    /// `{source | sol, contractName?, optimize?, optimizerRuns?, solcVersion?,
    /// evmVersion?, viaIR?}` and `{file, contractName?}`.
    pub fn from_json(value: &Value) -> Result<Self, HarnessError> {
        let unknown = || HarnessError::UnknownArtifactDescriptor {
            input: value.to_string(),
        };
        let object = value.as_object().ok_or_else(unknown)?;
        let text = |key: &str| object.get(key).and_then(Value::as_str).map(str::to_string);
        let contract_name = text("contractName").or_else(|| text("contract"));

        if let (Some(bytecode), Some(abi)) = (text("bytecode"), object.get("abi")) {
            let fragments = abi.as_array().ok_or_else(unknown)?;
            let links = match object.get("linkReferences") {
                Some(references) => BytecodeOutput {
                    object: bytecode.clone(),
                    link_references: serde_json::from_value(references.clone())
                        .map_err(|_| unknown())?,
                }
                .library_references()?,
                None => Vec::new(),
            };
            return Ok(Self::Bytecode {
                bytecode,
                abi: parse_abi_lenient(fragments),
                contract_name,
                links,
            });
        }

        let options = CompileOptions {
            contract_name: contract_name.clone(),
            optimize: object.get("optimize").and_then(Value::as_bool),
            optimizer_runs: object.get("optimizerRuns").and_then(Value::as_u64),
            solc_version: text("solcVersion"),
            evm_version: text("evmVersion"),
            via_ir: object.get("viaIR").and_then(Value::as_bool),
            project: None,
        };

        if let Some(path) = text("import") {
            return Ok(Self::Import { path, options });
        }
        if let Some(source) = text("source").or_else(|| text("sol")) {
            return Ok(Self::Source { source, options });
        }
        if let Some(file) = text("file") {
            return Ok(Self::ProjectFile {
                file: PathBuf::from(file),
                contract_name,
            });
        }

        Err(unknown())
    }
}

fn file_stem(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
}

/// Turns any [`ArtifactDescriptor`] into an [`Artifact`].
#[derive(Debug, Clone)]
pub struct ArtifactResolver {
    sandbox: CompileSandbox,
}

impl ArtifactResolver {
    pub fn new(sandbox: CompileSandbox) -> Self {
        Self { sandbox }
    }

    pub fn sandbox(&self) -> &CompileSandbox {
        &self.sandbox
    }

    pub async fn resolve(&self, descriptor: ArtifactDescriptor) -> Result<Artifact> {
        match descriptor {
            ArtifactDescriptor::Bytecode {
                bytecode,
                abi,
                contract_name,
                links,
            } => {
                let bytecode = if bytecode.starts_with("0x") {
                    bytecode
                } else {
                    format!("0x{bytecode}")
                };
                Ok(Artifact {
                    abi,
                    bytecode,
                    contract_name: contract_name.unwrap_or_else(|| UNNAMED_CONTRACT.to_string()),
                    origin: "bytecode".to_string(),
                    links,
                    source: None,
                })
            }
            ArtifactDescriptor::Import { path, mut options } => {
                if options.contract_name.is_none() {
                    options.contract_name = file_stem(Path::new(&path));
                }
                let source = format!("import \"{path}\";\n");
                let mut artifact = self.sandbox.compile(&source, &options).await?;
                artifact.origin = format!("import:{path}");
                Ok(artifact)
            }
            ArtifactDescriptor::Source { source, options } => {
                self.sandbox.compile(&source, &options).await
            }
            ArtifactDescriptor::ProjectFile {
                file,
                contract_name,
            } => self.resolve_project_file(&file, contract_name).await,
        }
    }

    /// Find `out/<File>.sol/<Name>.json` in the nearest ancestor of the file.
    async fn resolve_project_file(
        &self,
        file: &Path,
        contract_name: Option<String>,
    ) -> Result<Artifact> {
        let contract_name = contract_name
            .or_else(|| file_stem(file))
            .ok_or(HarnessError::MissingContractName)?;
        let file_name = file
            .file_name()
            .with_context(|| format!("Invalid project file path {}", file.display()))?;

        let file = std::path::absolute(file)
            .with_context(|| format!("Failed to resolve {}", file.display()))?;
        let start = file.parent().unwrap_or(&file);
        let relative = Path::new("out")
            .join(file_name)
            .join(format!("{contract_name}.json"));

        let artifact_path = FsHandler::find_in_ancestors(start, &relative)
            .await
            .ok_or_else(|| HarnessError::ContractNotFound {
                contract: contract_name.clone(),
                root: start.to_path_buf(),
            })?;

        let content = tokio::fs::read_to_string(&artifact_path)
            .await
            .with_context(|| format!("Failed to read artifact {}", artifact_path.display()))?;
        let parsed: ArtifactFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse artifact {}", artifact_path.display()))?;

        tracing::debug!(
            contract = %contract_name,
            artifact = %artifact_path.display(),
            "Loaded project artifact"
        );

        Ok(Artifact::from_compiled(
            &parsed.abi,
            &parsed.bytecode,
            contract_name,
            format!("file:{}", artifact_path.display()),
            None,
        )?)
    }
}

//! JSON emitted by `forge build --format-json` and by forge artifact files.

use std::{collections::BTreeMap, fmt, path::Path};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{artifact::LibraryReference, error::HarnessError};

/// Width in bytes of an address slot inside linkable bytecode.
pub const ADDRESS_SLOT_BYTES: usize = 20;

/// A compiler diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub severity: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatted_message: Option<String>,
}

impl Diagnostic {
    pub fn is_error(&self) -> bool {
        self.severity.eq_ignore_ascii_case("error")
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.formatted_message {
            Some(formatted) => write!(f, "{}", formatted.trim_end()),
            None => write!(f, "{}: {}", self.severity, self.message),
        }
    }
}

/// Placement of one library slot: `{ "start": byte offset, "length": byte width }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct LinkSlot {
    pub start: usize,
    pub length: usize,
}

/// `linkReferences`: source file → library name → slots.
pub type LinkReferences = BTreeMap<String, BTreeMap<String, Vec<LinkSlot>>>;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BytecodeOutput {
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub link_references: LinkReferences,
}

impl BytecodeOutput {
    /// The bytecode object with a `0x` prefix.
    pub fn hex(&self) -> String {
        if self.object.starts_with("0x") {
            self.object.clone()
        } else {
            format!("0x{}", self.object)
        }
    }

    /// Unresolved library references, one per library, in file then name order.
    pub fn library_references(&self) -> Result<Vec<LibraryReference>, HarnessError> {
        let mut references = Vec::new();
        for (file, libraries) in &self.link_references {
            for (name, slots) in libraries {
                if let Some(bad) = slots.iter().find(|s| s.length != ADDRESS_SLOT_BYTES) {
                    return Err(HarnessError::MalformedLinkReference {
                        library: format!("{file}:{name}"),
                        offset: bad.start,
                        length: bad.length,
                    });
                }
                references.push(LibraryReference::new(
                    file,
                    name,
                    slots.iter().map(|s| s.start).collect(),
                ));
            }
        }
        Ok(references)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EvmOutput {
    #[serde(default)]
    pub bytecode: BytecodeOutput,
}

/// One compiled contract.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompiledContract {
    #[serde(default)]
    pub abi: Vec<Value>,
    #[serde(default)]
    pub evm: EvmOutput,
}

/// forge wraps each contract in `{ "contract": ..., "version": ... }`; older
/// releases emit the contract object directly.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ContractEntry {
    Versioned { contract: CompiledContract },
    Plain(CompiledContract),
}

impl ContractEntry {
    pub fn contract(&self) -> &CompiledContract {
        match self {
            Self::Versioned { contract } | Self::Plain(contract) => contract,
        }
    }
}

/// Output of `forge build --format-json`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BuildOutput {
    #[serde(default)]
    pub errors: Vec<Diagnostic>,
    #[serde(default)]
    pub contracts: BTreeMap<String, BTreeMap<String, Vec<ContractEntry>>>,
}

impl BuildOutput {
    pub fn has_errors(&self) -> bool {
        self.errors.iter().any(Diagnostic::is_error)
    }

    /// The contract `name` compiled from a file whose path ends with `file`.
    pub fn contract_at(&self, file: &Path, name: &str) -> Option<&CompiledContract> {
        self.contracts
            .iter()
            .filter(|(path, _)| Path::new(path).ends_with(file))
            .find_map(|(_, unit)| unit.get(name)?.first())
            .map(ContractEntry::contract)
    }

    /// The first compiled unit declaring a contract called `name`.
    pub fn find_contract(&self, name: &str) -> Option<(&str, &CompiledContract)> {
        self.contracts.iter().find_map(|(path, unit)| {
            let entry = unit.get(name)?.first()?;
            Some((path.as_str(), entry.contract()))
        })
    }
}

/// A per-contract artifact file written by forge under `out/<File>.sol/<Name>.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactFile {
    #[serde(default)]
    pub abi: Vec<Value>,
    #[serde(default)]
    pub bytecode: BytecodeOutput,
}

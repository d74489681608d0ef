//! Error taxonomy for the harness.

use std::path::PathBuf;

use serde_json::Value;

use crate::compile::Diagnostic;

/// Errors raised by the deployment engine.
///
/// Public operations return [`anyhow::Result`]; these values travel inside the
/// `anyhow::Error` and can be recovered with `downcast_ref::<HarnessError>()`.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// The node process failed or exited before printing its ready banner.
    #[error("node failed to launch: {message}")]
    LaunchFailed { message: String },

    /// The compiler reported at least one error-severity diagnostic.
    #[error("build failed with {} error(s):\n{}", .diagnostics.len(), format_diagnostics(.diagnostics))]
    BuildFailed { diagnostics: Vec<Diagnostic> },

    /// The compiled output does not contain the requested contract.
    #[error("contract '{contract}' not found in build output under {}", .root.display())]
    ContractNotFound { contract: String, root: PathBuf },

    /// No `contract` or `library` declaration was found in the source.
    #[error("contract name could not be inferred from source")]
    MissingContractName,

    /// The deploy/resolve input matches no known artifact shape.
    #[error("unknown artifact descriptor: {input}")]
    UnknownArtifactDescriptor { input: String },

    /// A library reference has no unique address to link against.
    #[error("unresolved library '{library}'")]
    UnresolvedLibrary { library: String },

    /// A link reference slot is not exactly 20 bytes wide.
    #[error("malformed link reference for '{library}' at offset {offset}: expected 20 bytes, got {length}")]
    MalformedLinkReference {
        library: String,
        offset: usize,
        length: usize,
    },

    /// The named or addressed wallet is not owned by this session.
    #[error("wallet '{wallet}' not found in session")]
    MissingWallet { wallet: String },

    /// An external tool exited with a non-zero code.
    #[error("`{command} {}` failed (exit code {}): {stderr}", .args.join(" "), .code.map_or_else(|| "none".to_string(), |c| c.to_string()))]
    Process {
        code: Option<i32>,
        stderr: String,
        command: String,
        args: Vec<String>,
    },

    /// The RPC endpoint answered with an error object.
    #[error("RPC error from {method} ({code}): {message}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
        data: Option<Value>,
    },

    /// A transaction or call reverted.
    #[error("execution reverted: {reason}")]
    Reverted { reason: String },

    /// The session has been shut down.
    #[error("session is shut down")]
    SessionClosed,

    /// The operation requires an ephemeral node.
    #[error("{operation} is not supported on a live network")]
    LiveTargetUnsupported { operation: String },
}

fn format_diagnostics(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

impl HarnessError {
    /// Revert data attached to an RPC error, if the endpoint supplied any.
    pub fn revert_data(&self) -> Option<Vec<u8>> {
        let Self::Rpc { data: Some(data), .. } = self else {
            return None;
        };

        // Endpoints either return the hex string directly or nest it under `data`.
        let hex_str = data
            .as_str()
            .or_else(|| data.get("data").and_then(Value::as_str))?;

        hex::decode(hex_str.trim_start_matches("0x")).ok()
    }
}

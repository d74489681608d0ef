//! kiln-harness - Solidity compile, deploy and decode harness.
//!
//! This crate compiles contracts with forge, runs them on an ephemeral anvil
//! node or a live network, and renders calls, events and reverts by name.

pub mod abi;
pub mod artifact;
pub mod compile;
pub mod config;
pub mod contract;
pub mod error;
mod fs;
pub mod linker;
pub mod node;
pub mod process;
pub mod rpc;
pub mod session;
pub mod store;
pub mod wallet;

pub use abi::{AbiRegistry, DecodedCall, DecodedError, DecodedLog};
pub use artifact::{Artifact, ArtifactDescriptor, ArtifactResolver, LibraryReference};
pub use compile::{CompileOptions, CompileSandbox};
pub use config::{HarnessConfig, KILN_CONFIG_FILENAME};
pub use contract::{Contract, DeployedContract, PendingTransaction, SessionId, WalletHandle};
pub use error::HarnessError;
pub use node::{LogSink, NodeConfig};
pub use rpc::{TransactionReceipt, TransactionRequest};
pub use session::{
    ConfirmReport, DeployRequest, LiveConfig, NodeSession, SendOptions, SessionBuilder,
    SessionEvent, SessionState,
};
pub use store::{DeploymentRecord, DeploymentStore};
pub use wallet::Wallet;

//! Deployment records for live networks.

use std::{
    collections::BTreeMap,
    io::Write,
    path::{Path, PathBuf},
};

use alloy_core::{
    json_abi::JsonAbi,
    primitives::{Address, Bytes},
};
use anyhow::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::rpc::TransactionReceipt;

/// Directory under the store root holding one subdirectory per chain id.
pub const DEPLOYMENTS_DIR: &str = "deployments";

/// What is remembered about a deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    pub name: String,
    pub address: Address,
    pub abi: JsonAbi,
    pub bytecode: String,
    #[serde(default)]
    pub links: BTreeMap<String, Address>,
    #[serde(default)]
    pub receipt: Option<TransactionReceipt>,
    /// ABI-encoded constructor arguments.
    #[serde(default)]
    pub constructor_args: Bytes,
    /// RFC 3339 timestamp of the deployment.
    #[serde(default)]
    pub deployed_at: String,
}

/// Deployment records keyed by chain id, name prefix and contract name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentStore {
    root: PathBuf,
}

impl DeploymentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/deployments/<chainId>/<prefix><name>.json`
    pub fn record_path(&self, chain_id: u64, prefix: &str, name: &str) -> PathBuf {
        self.root
            .join(DEPLOYMENTS_DIR)
            .join(chain_id.to_string())
            .join(format!("{prefix}{name}.json"))
    }

    /// Write a record, replacing any previous one for the same key.
    pub async fn save(&self, chain_id: u64, prefix: &str, record: &DeploymentRecord) -> Result<PathBuf> {
        let path = self.record_path(chain_id, prefix, &record.name);
        let content =
            serde_json::to_vec_pretty(record).context("Failed to serialize deployment record")?;

        let target = path.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory {}", parent.display()))?;
            }
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(false)
                .open(&target)
                .with_context(|| format!("Failed to open {}", target.display()))?;
            file.lock_exclusive()
                .with_context(|| format!("Failed to lock {}", target.display()))?;
            file.set_len(0)?;
            file.write_all(&content)
                .with_context(|| format!("Failed to write {}", target.display()))?;
            file.sync_all()?;
            Ok(())
        })
        .await
        .context("Deployment record writer panicked")??;

        tracing::info!(
            chain_id,
            contract = %record.name,
            address = %record.address,
            path = %path.display(),
            "Deployment recorded"
        );
        Ok(path)
    }

    /// Read a record. A missing or unreadable file means "not deployed yet".
    pub async fn load(&self, chain_id: u64, prefix: &str, name: &str) -> Option<DeploymentRecord> {
        let path = self.record_path(chain_id, prefix, name);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No deployment record");
                return None;
            }
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "Ignoring unreadable deployment record");
                return None;
            }
        };

        match serde_json::from_str(&content) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "Ignoring malformed deployment record");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use super::*;

    fn record(name: &str) -> DeploymentRecord {
        DeploymentRecord {
            name: name.to_string(),
            address: Address::repeat_byte(0x42),
            abi: JsonAbi::default(),
            bytecode: "0x6080".to_string(),
            links: BTreeMap::from([("src/L.sol:L".to_string(), Address::repeat_byte(1))]),
            receipt: None,
            constructor_args: Bytes::new(),
            deployed_at: "2026-01-01T00:00:00+00:00".to_string(),
        }
    }

    #[test]
    fn test_record_path() {
        let store = DeploymentStore::new("/data");
        assert_eq!(
            store.record_path(5, "v2_", "Token"),
            PathBuf::from("/data/deployments/5/v2_Token.json")
        );
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new("kiln-store").unwrap();
        let store = DeploymentStore::new(dir.path());

        let saved = store.save(5, "", &record("C")).await.unwrap();
        assert!(saved.exists());

        let loaded = store.load(5, "", "C").await.unwrap();
        assert_eq!(loaded, record("C"));

        // Different chain or prefix is a different key.
        assert!(store.load(1, "", "C").await.is_none());
        assert!(store.load(5, "x", "C").await.is_none());
    }

    #[tokio::test]
    async fn test_overwrite_shorter_record() {
        let dir = TempDir::new("kiln-store").unwrap();
        let store = DeploymentStore::new(dir.path());

        let mut long = record("C");
        long.bytecode = format!("0x{}", "ab".repeat(512));
        store.save(5, "", &long).await.unwrap();
        store.save(5, "", &record("C")).await.unwrap();

        assert_eq!(store.load(5, "", "C").await.unwrap(), record("C"));
    }

    #[tokio::test]
    async fn test_malformed_record_is_absent() {
        let dir = TempDir::new("kiln-store").unwrap();
        let store = DeploymentStore::new(dir.path());
        let path = store.record_path(5, "", "C");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();

        assert!(store.load(5, "", "C").await.is_none());
    }
}

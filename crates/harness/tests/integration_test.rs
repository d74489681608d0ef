//! Integration tests for kiln-harness.
//!
//! These tests need `forge` and `anvil` on PATH and are skipped otherwise.
//! Each test uses a random chain id and its own sandbox root so they can run in parallel.
//! Run with: cargo test --test integration_test

use std::{
    process::Command,
    sync::{Arc, Mutex},
    time::Duration,
};

use alloy_core::{dyn_abi::DynSolValue, dyn_abi::JsonAbiExt, primitives::U256};
use anyhow::{Context, Result};
use kiln_harness::{
    ArtifactDescriptor, DeployRequest, HarnessConfig, NodeConfig, NodeSession, SendOptions,
    SessionEvent, SessionState,
};
use rand::Rng;
use tempdir::TempDir;
use tokio::time::timeout;

const SESSION_TIMEOUT_SECS: u64 = 300;

const COUNTER: &str = r#"
contract C {
    event Set(uint256 value);

    uint256 public x;

    function f() public pure returns (uint256) {
        return 1;
    }

    function set(uint256 value) public {
        x = value;
        emit Set(value);
    }
}
"#;

fn foundry_available() -> bool {
    ["forge", "anvil"].iter().all(|tool| {
        Command::new(tool)
            .arg("--version")
            .output()
            .is_ok_and(|output| output.status.success())
    })
}

/// Test setup context holding the sandbox root and recorded events.
struct TestContext {
    _root: TempDir,
    harness: HarnessConfig,
    node: NodeConfig,
    events: Arc<Mutex<Vec<SessionEvent>>>,
}

impl TestContext {
    fn new(prefix: &str) -> Result<Self> {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let root = TempDir::new(prefix).context("Failed to create sandbox root")?;
        let harness = HarnessConfig {
            temp_root: root.path().to_path_buf(),
            ..Default::default()
        };
        let node = NodeConfig {
            chain_id: Some(rand::rng().random_range(100000..=999999)),
            ..Default::default()
        };

        Ok(Self {
            _root: root,
            harness,
            node,
            events: Arc::new(Mutex::new(Vec::new())),
        })
    }

    async fn launch(&self) -> Result<NodeSession> {
        let events = self.events.clone();
        let launch = NodeSession::builder(self.harness.clone())
            .observer(Arc::new(move |event: &SessionEvent| {
                events.lock().unwrap().push(event.clone());
            }))
            .launch(self.node.clone());

        timeout(Duration::from_secs(SESSION_TIMEOUT_SECS), launch)
            .await
            .context("Node launch timed out")?
    }

    fn wallets_created(&self, name: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| matches!(event, SessionEvent::WalletCreated { name: n, .. } if n == name))
            .count()
    }
}

#[tokio::test]
async fn test_deploy_call_and_decode() -> Result<()> {
    if !foundry_available() {
        eprintln!("forge/anvil not found, skipping");
        return Ok(());
    }

    let ctx = TestContext::new("kiln-e2e")?;
    let session = ctx.launch().await?;
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.chain_id().await?, ctx.node.chain_id.unwrap_or_default());
    assert!(session.automine().await?);

    let contract = timeout(
        Duration::from_secs(SESSION_TIMEOUT_SECS),
        session.deploy(DeployRequest::new(ArtifactDescriptor::source(COUNTER))),
    )
    .await
    .context("Deployment timed out")??;
    assert_eq!(contract.name, "C");

    let output = session.call(&contract, "f", &[]).await?;
    assert_eq!(output, vec![DynSolValue::Uint(U256::from(1), 256)]);

    let f = contract.abi.function("f").context("f missing")?.first().context("f missing")?;
    let calldata = f.abi_encode_input(&[])?;
    assert_eq!(
        session.decode_transaction(&calldata).context("f not decoded")?.to_string(),
        "C.f()"
    );

    let pending = session
        .send(&contract, "set", &[DynSolValue::from(U256::from(7))], SendOptions::default())
        .await?;
    let report = session.confirm(&pending).await?;
    assert_eq!(report.call.context("set not decoded")?.to_string(), "C.set(7)");
    assert_eq!(
        report.events.iter().map(ToString::to_string).collect::<Vec<_>>(),
        vec!["C.Set(7)".to_string()]
    );

    let x = session.call(&contract, "x", &[]).await?;
    assert_eq!(x, vec![DynSolValue::Uint(U256::from(7), 256)]);

    session.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_wallets_are_created_once() -> Result<()> {
    if !foundry_available() {
        eprintln!("forge/anvil not found, skipping");
        return Ok(());
    }

    let ctx = TestContext::new("kiln-wallets")?;
    let session = ctx.launch().await?;

    let first = session.ensure_wallet("alice").await?;
    let second = session.ensure_wallet("alice").await?;
    assert_eq!(first.address, second.address);
    assert_eq!(ctx.wallets_created("alice"), 1);

    // Configured wallets exist from the start and come first.
    assert_eq!(session.default_wallet()?.name, "admin");
    assert_eq!(ctx.wallets_created("admin"), 1);

    let fresh = session.create_wallet("user").await?;
    assert_eq!(fresh.name, "user0");
    assert_ne!(fresh.address, first.address);

    session.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_shutdown_is_idempotent() -> Result<()> {
    if !foundry_available() {
        eprintln!("forge/anvil not found, skipping");
        return Ok(());
    }

    let ctx = TestContext::new("kiln-shutdown")?;
    let session = ctx.launch().await?;

    let (first, second) = tokio::join!(session.shutdown(), session.shutdown());
    assert_eq!(first, second);
    assert_eq!(session.state(), SessionState::Stopped);
    assert_eq!(session.shutdown().await, first);

    let stops = ctx
        .events
        .lock()
        .unwrap()
        .iter()
        .filter(|event| matches!(event, SessionEvent::ShutDown { .. }))
        .count();
    assert_eq!(stops, 1);
    assert!(session.chain_id().await.is_err());
    Ok(())
}

//! Deployment sessions against an ephemeral node or a live network.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    path::PathBuf,
    sync::{
        Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use alloy_core::{
    dyn_abi::{DynSolValue, FunctionExt, JsonAbiExt},
    json_abi::JsonAbi,
    primitives::{Address, B256, Bytes, U256},
};
use anyhow::{Context, Result};
use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use serde::{Deserialize, Serialize};
use strum::Display;
use url::Url;

use crate::{
    abi::{AbiRegistry, DecodedCall, DecodedError, DecodedLog, find_function, merge_abi},
    artifact::{ArtifactDescriptor, ArtifactResolver},
    compile::CompileSandbox,
    config::HarnessConfig,
    contract::{
        Contract, DeployedContract, Owned, PendingTransaction, SessionId, WalletHandle,
        contract_display_name,
    },
    error::HarnessError,
    linker::link,
    node::{LogSink, LogSinks, NodeConfig, NodeProcess},
    rpc::{CachePolicy, Log, RpcClient, TransactionReceipt, TransactionRequest},
    store::{DeploymentRecord, DeploymentStore},
    wallet::Wallet,
};

/// Receives session lifecycle notifications.
pub type Observer = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// Shared handle to the shutdown of a session, resolving to the node's exit code.
pub type ShutdownFuture = Shared<BoxFuture<'static, Option<i32>>>;

fn bare_name(id: &str) -> &str {
    id.rsplit_once(':').map_or(id, |(_, name)| name)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SessionState {
    Launching,
    Ready,
    ShuttingDown,
    Stopped,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Launched {
        endpoint: Url,
        automine: bool,
    },
    WalletCreated {
        name: String,
        address: Address,
    },
    Deployed {
        name: String,
        address: Address,
        gas_used: U256,
        reused: bool,
    },
    Confirmed {
        hash: B256,
        gas_used: U256,
        call: Option<String>,
        events: Vec<String>,
    },
    ShutDown {
        code: Option<i32>,
    },
}

/// A persistent network whose deployments are remembered across runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveConfig {
    pub rpc_url: Url,
    /// Directory holding `deployments/<chainId>/`.
    pub deployments_root: PathBuf,
    /// Prepended to contract names in record file names.
    #[serde(default)]
    pub prefix: String,
    /// Senders whose keys the endpoint manages, by name. The first is the default.
    #[serde(default)]
    pub signers: Vec<(String, Address)>,
}

#[derive(Debug)]
enum Target {
    Ephemeral { wallet_balance: U256 },
    Live { store: DeploymentStore, prefix: String },
}

/// Entry in the session's account table.
#[derive(Debug, Clone, PartialEq)]
pub enum Account {
    Wallet(WalletHandle),
    Contract(DeployedContract),
}

impl Account {
    pub fn display_name(&self) -> &str {
        match self {
            Self::Wallet(wallet) => wallet.display_name(),
            Self::Contract(contract) => contract.display_name(),
        }
    }
}

/// Input of [`NodeSession::deploy`].
#[derive(Debug, Clone, PartialEq)]
pub struct DeployRequest {
    pub artifact: ArtifactDescriptor,
    /// Wallet name or address; the default wallet when absent.
    pub from: Option<String>,
    pub args: Vec<DynSolValue>,
    /// Library id (`path:Name` or `Name`) → address. Shadows session deployments of the same name.
    pub libraries: BTreeMap<String, Address>,
    /// Extra interfaces merged into the artifact's ABI.
    pub abis: Vec<JsonAbi>,
    pub value: Option<U256>,
}

impl DeployRequest {
    pub fn new(artifact: ArtifactDescriptor) -> Self {
        Self {
            artifact,
            from: None,
            args: Vec::new(),
            libraries: BTreeMap::new(),
            abis: Vec::new(),
            value: None,
        }
    }

    pub fn from(mut self, wallet: impl Into<String>) -> Self {
        self.from = Some(wallet.into());
        self
    }

    pub fn args(mut self, args: Vec<DynSolValue>) -> Self {
        self.args = args;
        self
    }

    pub fn library(mut self, id: impl Into<String>, address: Address) -> Self {
        self.libraries.insert(id.into(), address);
        self
    }

    pub fn abi(mut self, abi: JsonAbi) -> Self {
        self.abis.push(abi);
        self
    }

    pub fn value(mut self, value: U256) -> Self {
        self.value = Some(value);
        self
    }
}

/// Sender and value of a state-changing call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOptions {
    pub from: Option<String>,
    pub value: Option<U256>,
}

/// Outcome of [`NodeSession::confirm`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmReport {
    pub receipt: TransactionReceipt,
    pub call: Option<DecodedCall>,
    pub events: Vec<DecodedLog>,
}

/// Builds a [`NodeSession`].
#[derive(Clone)]
pub struct SessionBuilder {
    harness: HarnessConfig,
    sinks: LogSinks,
    observer: Option<Observer>,
}

impl SessionBuilder {
    pub fn new(harness: HarnessConfig) -> Self {
        Self {
            harness,
            sinks: LogSinks::default(),
            observer: None,
        }
    }

    /// Receive node diagnostics.
    pub fn node_log(mut self, sink: LogSink) -> Self {
        self.sinks.node = Some(sink);
        self
    }

    /// Receive contract `console.log` output.
    pub fn user_log(mut self, sink: LogSink) -> Self {
        self.sinks.user = Some(sink);
        self
    }

    pub fn observer(mut self, observer: Observer) -> Self {
        self.observer = Some(observer);
        self
    }

    fn into_session(self, target: Target, provider: RpcClient, node: Option<NodeProcess>) -> NodeSession {
        NodeSession {
            id: SessionId::next(),
            target,
            state: Arc::new(Mutex::new(SessionState::Launching)),
            provider: RwLock::new(Some(Arc::new(provider))),
            node: Mutex::new(node),
            resolver: ArtifactResolver::new(CompileSandbox::new(self.harness)),
            registry: Mutex::new(AbiRegistry::new()),
            wallets: Mutex::new(Vec::new()),
            accounts: Mutex::new(HashMap::new()),
            libraries: Mutex::new(Vec::new()),
            wallet_counter: AtomicU64::new(0),
            wallet_setup: tokio::sync::Mutex::new(()),
            observer: self.observer,
            shutdown: OnceLock::new(),
        }
    }

    /// Spawn an ephemeral node and fund its initial wallets.
    pub async fn launch(self, config: NodeConfig) -> Result<NodeSession> {
        let anvil = self.harness.anvil();
        let node = NodeProcess::launch(&anvil, &config, self.sinks.clone()).await?;
        let endpoint = node.endpoint().clone();

        let mut provider = RpcClient::new(endpoint.clone(), CachePolicy::default())?;
        let automine = provider
            .automine()
            .await
            .context("Failed to query automine mode")?;
        if automine {
            provider = provider.reconnect(CachePolicy::Forever);
        }

        let target = Target::Ephemeral {
            wallet_balance: config.wallet_balance(),
        };
        let session = self.into_session(target, provider, Some(node));

        for name in &config.wallets {
            session.ensure_wallet(name).await?;
        }

        session.set_state(SessionState::Ready);
        tracing::info!(session = %session.id, endpoint = %endpoint, automine, "Session ready");
        session.emit(SessionEvent::Launched { endpoint, automine });
        Ok(session)
    }

    /// Attach to a live network.
    pub async fn connect(self, config: LiveConfig) -> Result<NodeSession> {
        let provider = RpcClient::new(config.rpc_url.clone(), CachePolicy::default())?;
        let chain_id = provider
            .chain_id()
            .await
            .with_context(|| format!("Failed to reach {}", config.rpc_url))?;

        let target = Target::Live {
            store: DeploymentStore::new(config.deployments_root),
            prefix: config.prefix,
        };
        let session = self.into_session(target, provider, None);

        for (name, address) in &config.signers {
            session.register_signer(name, *address).await?;
        }

        session.set_state(SessionState::Ready);
        tracing::info!(session = %session.id, endpoint = %config.rpc_url, chain_id, "Connected to live network");
        session.emit(SessionEvent::Launched {
            endpoint: config.rpc_url,
            automine: false,
        });
        Ok(session)
    }
}

/// A node plus everything deployed and decoded through it.
pub struct NodeSession {
    id: SessionId,
    target: Target,
    state: Arc<Mutex<SessionState>>,
    provider: RwLock<Option<Arc<RpcClient>>>,
    node: Mutex<Option<NodeProcess>>,
    resolver: ArtifactResolver,
    registry: Mutex<AbiRegistry>,
    /// Registration order; the first wallet is the default sender.
    wallets: Mutex<Vec<WalletHandle>>,
    accounts: Mutex<HashMap<Address, Account>>,
    /// Name and address of every registered contract, in registration order.
    libraries: Mutex<Vec<(String, Address)>>,
    wallet_counter: AtomicU64,
    wallet_setup: tokio::sync::Mutex<()>,
    observer: Option<Observer>,
    shutdown: OnceLock<ShutdownFuture>,
}

impl std::fmt::Debug for NodeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeSession")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl NodeSession {
    pub fn builder(harness: HarnessConfig) -> SessionBuilder {
        SessionBuilder::new(harness)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    fn set_state(&self, state: SessionState) {
        *lock(&self.state) = state;
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(observer) = &self.observer {
            observer(&event);
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self.target, Target::Live { .. })
    }

    fn provider(&self) -> Result<Arc<RpcClient>> {
        self.provider
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| HarnessError::SessionClosed.into())
    }

    fn ephemeral_only(&self, operation: &str) -> Result<U256> {
        match &self.target {
            Target::Ephemeral { wallet_balance } => Ok(*wallet_balance),
            Target::Live { .. } => Err(HarnessError::LiveTargetUnsupported {
                operation: operation.to_string(),
            }
            .into()),
        }
    }

    pub fn endpoint(&self) -> Result<Url> {
        Ok(self.provider()?.endpoint().clone())
    }

    /// Response caching of the session's provider.
    pub fn cache_policy(&self) -> Result<CachePolicy> {
        Ok(self.provider()?.policy())
    }

    pub async fn chain_id(&self) -> Result<u64> {
        self.provider()?.chain_id().await
    }

    pub async fn automine(&self) -> Result<bool> {
        self.ephemeral_only("automine query")?;
        self.provider()?.automine().await
    }

    pub async fn mine(&self, blocks: u64) -> Result<()> {
        self.ephemeral_only("mining")?;
        self.provider()?.mine(blocks).await
    }

    pub async fn set_balance(&self, address: Address, balance: U256) -> Result<()> {
        self.ephemeral_only("setting balances")?;
        self.provider()?.set_balance(address, balance).await
    }

    pub async fn set_storage(&self, address: Address, slot: U256, value: B256) -> Result<()> {
        self.ephemeral_only("setting storage")?;
        self.provider()?.set_storage_at(address, slot, value).await
    }

    // ---- wallets ----

    fn find_wallet(&self, name: &str) -> Option<WalletHandle> {
        lock(&self.wallets).iter().find(|w| w.name == name).cloned()
    }

    fn register_wallet(&self, wallet: Wallet) -> WalletHandle {
        let display = wallet.name.clone();
        let handle = Owned::new(wallet, display, self.id);

        lock(&self.wallets).push(handle.clone());
        lock(&self.accounts).insert(handle.address, Account::Wallet(handle.clone()));
        handle
    }

    /// The wallet named `name`, derived and funded on first use.
    pub async fn ensure_wallet(&self, name: &str) -> Result<WalletHandle> {
        if let Some(wallet) = self.find_wallet(name) {
            return Ok(wallet);
        }

        let _setup = self.wallet_setup.lock().await;
        if let Some(wallet) = self.find_wallet(name) {
            return Ok(wallet);
        }

        let balance = self.ephemeral_only("funding wallets")?;
        let wallet = Wallet::derive(name)?;
        if lock(&self.accounts).contains_key(&wallet.address) {
            anyhow::bail!("Address {} of wallet '{name}' is already taken", wallet.address);
        }

        let provider = self.provider()?;
        provider
            .set_balance(wallet.address, balance)
            .await
            .with_context(|| format!("Failed to fund wallet '{name}'"))?;
        provider
            .impersonate(wallet.address)
            .await
            .with_context(|| format!("Failed to enable signing for wallet '{name}'"))?;

        let handle = self.register_wallet(wallet);
        tracing::info!(wallet = %name, address = %handle.address, "Wallet created");
        self.emit(SessionEvent::WalletCreated {
            name: name.to_string(),
            address: handle.address,
        });
        Ok(handle)
    }

    /// A fresh wallet named `<prefix><n>`.
    pub async fn create_wallet(&self, prefix: &str) -> Result<WalletHandle> {
        loop {
            let n = self.wallet_counter.fetch_add(1, Ordering::Relaxed);
            let name = format!("{prefix}{n}");
            if self.find_wallet(&name).is_none() {
                return self.ensure_wallet(&name).await;
            }
        }
    }

    /// Register a sender whose key is held by the endpoint.
    pub async fn register_signer(&self, name: &str, address: Address) -> Result<WalletHandle> {
        let _setup = self.wallet_setup.lock().await;
        if let Some(existing) = self.find_wallet(name) {
            if existing.address == address {
                return Ok(existing);
            }
            anyhow::bail!("Wallet '{name}' is already registered at {}", existing.address);
        }
        if lock(&self.accounts).contains_key(&address) {
            anyhow::bail!("Address {address} is already registered");
        }

        if !self.is_live() {
            self.provider()?.impersonate(address).await?;
        }
        let handle = self.register_wallet(Wallet::external(name, address));
        tracing::info!(wallet = %name, %address, "Signer registered");
        self.emit(SessionEvent::WalletCreated {
            name: name.to_string(),
            address,
        });
        Ok(handle)
    }

    pub fn wallet(&self, name: &str) -> Result<WalletHandle> {
        self.find_wallet(name).ok_or_else(|| {
            HarnessError::MissingWallet {
                wallet: name.to_string(),
            }
            .into()
        })
    }

    /// The first registered wallet.
    pub fn default_wallet(&self) -> Result<WalletHandle> {
        lock(&self.wallets).first().cloned().ok_or_else(|| {
            HarnessError::MissingWallet {
                wallet: "<default>".to_string(),
            }
            .into()
        })
    }

    pub fn wallets(&self) -> Vec<WalletHandle> {
        lock(&self.wallets).clone()
    }

    /// Resolve a wallet by name or address.
    fn sender(&self, from: Option<&str>) -> Result<WalletHandle> {
        let Some(from) = from else {
            return self.default_wallet();
        };
        if let Ok(address) = from.parse::<Address>() {
            return lock(&self.wallets)
                .iter()
                .find(|w| w.address == address)
                .cloned()
                .ok_or_else(|| {
                    HarnessError::MissingWallet {
                        wallet: from.to_string(),
                    }
                    .into()
                });
        }
        self.wallet(from)
    }

    // ---- accounts and decoding ----

    pub fn account(&self, address: &Address) -> Option<Account> {
        lock(&self.accounts).get(address).cloned()
    }

    /// Display name of an address, or its checksummed form when unknown.
    pub fn label(&self, address: &Address) -> String {
        self.account(address)
            .map(|account| account.display_name().to_string())
            .unwrap_or_else(|| address.to_string())
    }

    pub fn contracts(&self) -> Vec<DeployedContract> {
        lock(&self.accounts)
            .values()
            .filter_map(|account| match account {
                Account::Contract(contract) => Some(contract.clone()),
                Account::Wallet(_) => None,
            })
            .collect()
    }

    pub fn decode_transaction(&self, data: &[u8]) -> Option<DecodedCall> {
        lock(&self.registry).decode_transaction(data)
    }

    pub fn decode_error(&self, data: &[u8]) -> Option<DecodedError> {
        lock(&self.registry).decode_error(data)
    }

    pub fn decode_log(&self, log: &Log) -> Option<DecodedLog> {
        lock(&self.registry).decode_log(log)
    }

    /// Replace RPC errors carrying decodable revert data with [`HarnessError::Reverted`].
    fn map_revert(&self, err: anyhow::Error) -> anyhow::Error {
        let decoded = err
            .downcast_ref::<HarnessError>()
            .and_then(HarnessError::revert_data)
            .and_then(|data| self.decode_error(&data));
        match decoded {
            Some(reason) => HarnessError::Reverted {
                reason: reason.to_string(),
            }
            .into(),
            None => err,
        }
    }

    fn register_contract(&self, contract: Contract) -> DeployedContract {
        lock(&self.registry).index(&contract.name, &contract.abi);
        {
            let mut libraries = lock(&self.libraries);
            let entry = (contract.name.clone(), contract.address);
            if !libraries.contains(&entry) {
                libraries.push(entry);
            }
        }

        let display = contract_display_name(&contract.name, &contract.address);
        let handle = Owned::new(contract, display, self.id);
        lock(&self.accounts).insert(handle.address, Account::Contract(handle.clone()));
        handle
    }

    /// Track a contract that is already on chain.
    pub fn attach(&self, address: Address, name: &str, abi: JsonAbi) -> DeployedContract {
        let handle = self.register_contract(Contract {
            address,
            name: name.to_string(),
            abi,
            receipt: None,
            links: BTreeMap::new(),
        });
        tracing::debug!(contract = %handle, %address, "Attached contract");
        handle
    }

    // ---- deployment ----

    /// Explicit libraries followed by every registered contract whose name
    /// none of them already claims.
    fn link_candidates(&self, explicit: BTreeMap<String, Address>) -> Vec<(String, Address)> {
        let claimed: HashSet<String> = explicit.keys().map(|id| bare_name(id).to_string()).collect();
        let registered = lock(&self.libraries)
            .iter()
            .filter(|(name, _)| !claimed.contains(name.as_str()))
            .cloned()
            .collect::<Vec<_>>();
        explicit.into_iter().chain(registered).collect()
    }

    /// Resolve, link, submit and register a contract.
    ///
    /// On a live network an existing record for the same chain, prefix and
    /// name is reused instead of deploying again.
    pub async fn deploy(&self, request: DeployRequest) -> Result<DeployedContract> {
        let provider = self.provider()?;
        let wallet = self.sender(request.from.as_deref())?;

        let artifact = self.resolver.resolve(request.artifact).await?;
        let name = artifact.contract_name.clone();
        let abi = merge_abi(std::iter::once(&artifact.abi).chain(request.abis.iter()));

        if let Target::Live { store, prefix } = &self.target {
            let chain_id = provider.chain_id().await?;
            if let Some(record) = store.load(chain_id, prefix, &name).await {
                let handle = self.register_contract(Contract {
                    address: record.address,
                    name: name.clone(),
                    abi,
                    receipt: record.receipt,
                    links: record.links,
                });
                tracing::info!(contract = %handle, chain_id, "Reusing recorded deployment");
                self.emit(SessionEvent::Deployed {
                    name,
                    address: handle.address,
                    gas_used: U256::ZERO,
                    reused: true,
                });
                return Ok(handle);
            }
        }

        let libraries = self.link_candidates(request.libraries);
        let linked = link(&artifact.bytecode, &artifact.links, &libraries)?;

        let mut code = hex::decode(linked.bytecode.trim_start_matches("0x"))
            .with_context(|| format!("Bytecode of {name} is not valid hex"))?;
        let constructor_args = match &abi.constructor {
            Some(constructor) => constructor
                .abi_encode_input(&request.args)
                .with_context(|| format!("Invalid constructor arguments for {name}"))?,
            None if request.args.is_empty() => Vec::new(),
            None => anyhow::bail!("{name} has no constructor but arguments were given"),
        };
        code.extend_from_slice(&constructor_args);

        let tx = TransactionRequest {
            from: Some(wallet.address),
            data: Some(Bytes::from(code)),
            value: request.value,
            ..Default::default()
        };

        tracing::debug!(contract = %name, from = %wallet.display_name(), "Submitting deployment");
        let hash = provider
            .send_transaction(&tx)
            .await
            .map_err(|e| self.map_revert(e))
            .with_context(|| format!("Failed to deploy {name}"))?;
        let receipt = provider.wait_for_receipt(hash).await?;
        if !receipt.succeeded() {
            return Err(HarnessError::Reverted {
                reason: format!("deployment of {name} failed in transaction {hash}"),
            }
            .into());
        }
        let address = receipt
            .contract_address
            .with_context(|| format!("Receipt of {hash} has no contract address"))?;
        let gas_used = receipt.gas_used;

        let handle = self.register_contract(Contract {
            address,
            name: name.clone(),
            abi: abi.clone(),
            receipt: Some(receipt.clone()),
            links: linked.libraries.clone(),
        });

        if let Target::Live { store, prefix } = &self.target {
            let chain_id = provider.chain_id().await?;
            let record = DeploymentRecord {
                name: name.clone(),
                address,
                abi,
                bytecode: linked.bytecode,
                links: linked.libraries,
                receipt: Some(receipt),
                constructor_args: Bytes::from(constructor_args),
                deployed_at: chrono::Utc::now().to_rfc3339(),
            };
            store.save(chain_id, prefix, &record).await?;
        }

        tracing::info!(contract = %handle, %address, %gas_used, "Contract deployed");
        self.emit(SessionEvent::Deployed {
            name,
            address,
            gas_used,
            reused: false,
        });
        Ok(handle)
    }

    // ---- interaction ----

    /// Execute a function with `eth_call` and decode its outputs.
    pub async fn call(
        &self,
        contract: &DeployedContract,
        function: &str,
        args: &[DynSolValue],
    ) -> Result<Vec<DynSolValue>> {
        let function = find_function(&contract.abi, function, args.len())?;
        let data = function
            .abi_encode_input(args)
            .with_context(|| format!("Invalid arguments for {}", function.signature()))?;

        let tx = TransactionRequest {
            from: self.default_wallet().ok().map(|w| w.address),
            to: Some(contract.address),
            data: Some(Bytes::from(data)),
            ..Default::default()
        };
        let output = self
            .provider()?
            .call(&tx)
            .await
            .map_err(|e| self.map_revert(e))
            .with_context(|| format!("Call to {contract}.{} failed", function.name))?;

        function
            .abi_decode_output(&output, true)
            .with_context(|| format!("Failed to decode output of {}", function.signature()))
    }

    /// Submit a state-changing call.
    pub async fn send(
        &self,
        contract: &DeployedContract,
        function: &str,
        args: &[DynSolValue],
        options: SendOptions,
    ) -> Result<PendingTransaction> {
        let wallet = self.sender(options.from.as_deref())?;
        let function = find_function(&contract.abi, function, args.len())?;
        let data = function
            .abi_encode_input(args)
            .with_context(|| format!("Invalid arguments for {}", function.signature()))?;

        let request = TransactionRequest {
            from: Some(wallet.address),
            to: Some(contract.address),
            data: Some(Bytes::from(data)),
            value: options.value,
            ..Default::default()
        };
        let hash = self
            .provider()?
            .send_transaction(&request)
            .await
            .map_err(|e| self.map_revert(e))
            .with_context(|| format!("Transaction to {contract}.{} failed", function.name))?;

        tracing::debug!(tx = %hash, to = %contract, from = %wallet.display_name(), "Transaction sent");
        Ok(PendingTransaction { hash, request })
    }

    /// Wait for a transaction to be mined and decode it.
    pub async fn confirm(&self, pending: &PendingTransaction) -> Result<ConfirmReport> {
        let receipt = self.provider()?.wait_for_receipt(pending.hash).await?;

        let call = pending
            .request
            .data
            .as_ref()
            .and_then(|data| self.decode_transaction(data));
        let events = lock(&self.registry).decode_logs(&receipt.logs);

        if !receipt.succeeded() {
            return Err(HarnessError::Reverted {
                reason: match &call {
                    Some(call) => format!("{call} reverted"),
                    None => format!("transaction {} reverted", pending.hash),
                },
            }
            .into());
        }

        let summary = call.as_ref().map(ToString::to_string);
        tracing::info!(
            tx = %pending.hash,
            gas_used = %receipt.gas_used,
            call = summary.as_deref().unwrap_or("<unknown>"),
            events = events.len(),
            "Transaction confirmed"
        );
        self.emit(SessionEvent::Confirmed {
            hash: pending.hash,
            gas_used: receipt.gas_used,
            call: summary,
            events: events.iter().map(ToString::to_string).collect(),
        });

        Ok(ConfirmReport {
            receipt,
            call,
            events,
        })
    }

    // ---- shutdown ----

    /// Stop the session. Every call returns the same future.
    pub fn shutdown(&self) -> ShutdownFuture {
        self.shutdown
            .get_or_init(|| {
                self.set_state(SessionState::ShuttingDown);
                self.provider
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                let node = lock(&self.node).take();
                let state = self.state.clone();
                let observer = self.observer.clone();
                let id = self.id;

                async move {
                    let code = match node {
                        Some(node) => node.terminate().await,
                        None => None,
                    };
                    *lock(&state) = SessionState::Stopped;
                    tracing::info!(session = %id, ?code, "Session stopped");
                    if let Some(observer) = observer {
                        observer(&SessionEvent::ShutDown { code });
                    }
                    code
                }
                .boxed()
                .shared()
            })
            .clone()
    }
}

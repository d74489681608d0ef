//! Ephemeral anvil node process.

pub mod cmd;
pub mod logs;

use std::{path::Path, sync::Arc, time::Duration};

use alloy_core::primitives::U256;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncBufRead, Lines},
    process::Child,
    task::JoinHandle,
};
use url::Url;

use crate::{
    error::HarnessError,
    process::{LineStream, ProcessRunner, strip_ansi},
};
use cmd::AnvilCmdBuilder;
use logs::{LogClassifier, LogKind, parse_listening};

/// Receives routed node output, one line per call.
pub type LogSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Grace period for the log task to drain after the node exits.
const LOG_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Time the node gets to exit after SIGTERM before it is killed.
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Configuration of an ephemeral node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub host: String,
    /// 0 lets the node pick a free port.
    pub port: u16,
    pub chain_id: Option<u64>,
    /// Seconds between blocks; unset means a block per transaction.
    pub block_time: Option<u64>,
    pub gas_limit: Option<u64>,
    pub infinite_gas: bool,
    pub fork_url: Option<String>,
    pub fork_block_number: Option<u64>,
    /// Wallets funded as soon as the node is ready. The first is the default sender.
    pub wallets: Vec<String>,
    /// Balance given to every wallet, in ether.
    pub wallet_balance_eth: u64,
    pub launch_timeout_secs: u64,
    pub extra_args: Vec<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            chain_id: None,
            block_time: None,
            gas_limit: None,
            infinite_gas: false,
            fork_url: None,
            fork_block_number: None,
            wallets: vec!["admin".to_string()],
            wallet_balance_eth: 10_000,
            launch_timeout_secs: 15,
            extra_args: Vec::new(),
        }
    }
}

impl NodeConfig {
    pub fn to_args(&self) -> Vec<String> {
        AnvilCmdBuilder::new()
            .host(&self.host)
            .port(self.port)
            .chain_id(self.chain_id)
            .block_time(self.block_time)
            .gas_limit(self.gas_limit)
            .infinite_gas(self.infinite_gas)
            .fork_url(self.fork_url.clone())
            .fork_block_number(self.fork_block_number)
            .extra_args(self.extra_args.iter().cloned())
            .build()
    }

    pub fn wallet_balance(&self) -> U256 {
        let wei_per_ether = U256::from(10u64).pow(U256::from(18u64));
        U256::from(self.wallet_balance_eth).saturating_mul(wei_per_ether)
    }

    pub fn launch_timeout(&self) -> Duration {
        Duration::from_secs(self.launch_timeout_secs)
    }
}

/// Where routed node output goes besides `tracing`.
#[derive(Clone, Default)]
pub struct LogSinks {
    /// RPC echo, block summaries and anything unclassified.
    pub node: Option<LogSink>,
    /// `console.log` output of contracts.
    pub user: Option<LogSink>,
}

impl std::fmt::Debug for LogSinks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSinks")
            .field("node", &self.node.is_some())
            .field("user", &self.user.is_some())
            .finish()
    }
}

/// A running anvil process that has printed its ready banner.
#[derive(Debug)]
pub struct NodeProcess {
    child: Child,
    endpoint: Url,
    log_task: JoinHandle<()>,
}

impl NodeProcess {
    /// Spawn anvil and wait for `Listening on <host:port>`.
    ///
    /// Anything written to stderr before the banner, an early exit, or a
    /// timeout fails with [`HarnessError::LaunchFailed`].
    pub async fn launch(anvil: &Path, config: &NodeConfig, sinks: LogSinks) -> Result<Self> {
        let args = config.to_args();
        tracing::debug!(program = %anvil.display(), ?args, "Launching node");

        let LineStream {
            mut child,
            stdout: mut lines,
            mut stderr,
        } = ProcessRunner::new(anvil)
            .args(args)
            .spawn_lines()
            .map_err(|e| HarnessError::LaunchFailed {
                message: format!("{e:#}"),
            })?;

        let deadline = tokio::time::sleep(config.launch_timeout());
        tokio::pin!(deadline);

        let mut preamble = Vec::new();
        let mut stderr_open = true;

        let listening = loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line.context("Failed to read node stdout")? {
                        Some(line) => {
                            if let Some(endpoint) = parse_listening(&line) {
                                break endpoint.to_string();
                            }
                            tracing::trace!(line = %line, "Node preamble");
                            preamble.push(line);
                        }
                        None => {
                            let status = child.wait().await.ok();
                            return Err(HarnessError::LaunchFailed {
                                message: format!(
                                    "node exited before it was ready ({}): {}",
                                    status.map_or_else(|| "unknown status".to_string(), |s| s.to_string()),
                                    preamble.join("\n").trim()
                                ),
                            }
                            .into());
                        }
                    }
                }
                line = stderr.next_line(), if stderr_open => {
                    match line.context("Failed to read node stderr")? {
                        None => stderr_open = false,
                        Some(line) => {
                            return Err(HarnessError::LaunchFailed {
                                message: strip_ansi(&line).trim().to_string(),
                            }
                            .into());
                        }
                    }
                }
                _ = &mut deadline => {
                    return Err(HarnessError::LaunchFailed {
                        message: format!(
                            "no ready banner within {}s",
                            config.launch_timeout_secs
                        ),
                    }
                    .into());
                }
            }
        };

        let endpoint = endpoint_url(&listening)?;
        tracing::info!(endpoint = %endpoint, pid = ?child.id(), "Node is listening");

        let log_task = tokio::spawn(route_logs(lines, stderr, sinks));

        Ok(Self {
            child,
            endpoint,
            log_task,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Stop the process and wait for it to exit. Returns its exit code, if any.
    ///
    /// The node is asked to stop with SIGTERM and killed if it is still
    /// running after [`TERMINATE_GRACE`].
    pub async fn terminate(mut self) -> Option<i32> {
        let exited = match self.child.id() {
            Some(pid) => {
                send_sigterm(pid).await;
                tokio::time::timeout(TERMINATE_GRACE, self.child.wait())
                    .await
                    .is_ok()
            }
            None => true,
        };
        if !exited {
            tracing::warn!(grace = ?TERMINATE_GRACE, "Node ignored SIGTERM, killing it");
            if let Err(e) = self.child.start_kill() {
                tracing::debug!(error = %e, "Node already exited");
            }
        }

        let status = match self.child.wait().await {
            Ok(status) => Some(status),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to wait for node exit");
                None
            }
        };

        if tokio::time::timeout(LOG_DRAIN_TIMEOUT, &mut self.log_task)
            .await
            .is_err()
        {
            self.log_task.abort();
        }

        tracing::info!(?status, "Node stopped");
        status.and_then(|s| s.code())
    }
}

#[cfg(unix)]
async fn send_sigterm(pid: u32) {
    let kill = ProcessRunner::new("kill").args(["-TERM".to_string(), pid.to_string()]);
    match kill.output().await {
        Ok(output) if output.success => tracing::debug!(pid, "Sent SIGTERM to node"),
        Ok(output) => tracing::debug!(pid, stderr = %output.stderr_text(), "SIGTERM not delivered"),
        Err(e) => tracing::warn!(pid, error = %e, "Failed to send SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn send_sigterm(pid: u32) {
    tracing::debug!(pid, "SIGTERM unsupported on this platform");
}

/// Turn a banner endpoint into an HTTP URL, reaching wildcard binds through loopback.
fn endpoint_url(listening: &str) -> Result<Url> {
    let (host, port) = listening
        .rsplit_once(':')
        .with_context(|| format!("Malformed listening address {listening}"))?;
    let host = match host {
        "0.0.0.0" => "127.0.0.1",
        "[::]" | "::" => "[::1]",
        other => other,
    };
    Url::parse(&format!("http://{host}:{port}"))
        .with_context(|| format!("Invalid node endpoint {listening}"))
}

async fn route_logs<O, E>(mut stdout: Lines<O>, mut stderr: Lines<E>, sinks: LogSinks)
where
    O: AsyncBufRead + Unpin,
    E: AsyncBufRead + Unpin,
{
    let mut classifier = LogClassifier::new();
    let (mut stdout_open, mut stderr_open) = (true, true);

    while stdout_open || stderr_open {
        tokio::select! {
            line = stdout.next_line(), if stdout_open => match line {
                Ok(Some(line)) => route_line(&mut classifier, &line, &sinks),
                Ok(None) => stdout_open = false,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read node stdout");
                    stdout_open = false;
                }
            },
            line = stderr.next_line(), if stderr_open => match line {
                Ok(Some(line)) => {
                    let line = strip_ansi(&line);
                    tracing::warn!(target: "kiln::node", "{}", line.trim_end());
                    if let Some(sink) = &sinks.node {
                        sink(&line);
                    }
                }
                Ok(None) => stderr_open = false,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read node stderr");
                    stderr_open = false;
                }
            },
        }
    }
}

fn route_line(classifier: &mut LogClassifier, line: &str, sinks: &LogSinks) {
    match classifier.classify(line) {
        None => {}
        Some(LogKind::UserLog) => {
            let text = line.trim();
            tracing::info!(target: "kiln::console", "{text}");
            if let Some(sink) = &sinks.user {
                sink(text);
            }
        }
        Some(kind) => {
            tracing::debug!(target: "kiln::node", %kind, "{}", line.trim_end());
            if let Some(sink) = &sinks.node {
                sink(line);
            }
        }
    }
}

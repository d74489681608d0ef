//! kiln is a CLI tool to compile, deploy and inspect Solidity contracts.

mod cli;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use alloy_core::json_abi::JsonAbi;
use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::Table;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use cli::{Cli, Command, CompileArgs, DeployArgs, SourceArgs};
use kiln_harness::{
    ArtifactDescriptor, ArtifactResolver, CompileSandbox, DeployRequest, DeployedContract,
    HarnessConfig, KILN_CONFIG_FILENAME, LiveConfig, NodeConfig, NodeSession, abi::coerce_args,
};

/// Settings layered from defaults, `Kiln.toml` and `KILN_*` variables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
struct KilnConfig {
    harness: HarnessConfig,
    node: NodeConfig,
}

/// `./Kiln.toml`, else `<config dir>/kiln/Kiln.toml`, if either exists.
fn default_config_path() -> Option<PathBuf> {
    let local = PathBuf::from(KILN_CONFIG_FILENAME);
    if local.exists() {
        return Some(local);
    }
    dirs::config_dir()
        .map(|dir| dir.join("kiln").join(KILN_CONFIG_FILENAME))
        .filter(|path| path.exists())
}

fn load_config(path: Option<&Path>) -> Result<KilnConfig> {
    let mut figment = Figment::from(Serialized::defaults(KilnConfig::default()));
    if let Some(path) = path.map(Path::to_path_buf).or_else(default_config_path) {
        tracing::debug!(path = %path.display(), "Loading configuration");
        figment = figment.merge(Toml::file(path));
    }
    figment
        .merge(Env::prefixed("KILN_").split("__"))
        .extract()
        .context("Invalid kiln configuration")
}

async fn descriptor(source: &SourceArgs) -> Result<ArtifactDescriptor> {
    let text = tokio::fs::read_to_string(&source.file)
        .await
        .with_context(|| format!("Failed to read {}", source.file.display()))?;
    let descriptor = ArtifactDescriptor::source(text);
    Ok(match &source.contract {
        Some(name) => descriptor.with_contract(name),
        None => descriptor,
    })
}

fn interface_table(abi: &JsonAbi) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["Kind", "Signature", "Selector", "Mutability"]);
    for function in abi.functions() {
        table.add_row(vec![
            "function".to_string(),
            function.signature(),
            function.selector().to_string(),
            format!("{:?}", function.state_mutability).to_lowercase(),
        ]);
    }
    for event in abi.events() {
        table.add_row(vec![
            "event".to_string(),
            event.signature(),
            event.selector().to_string(),
            String::new(),
        ]);
    }
    for error in abi.errors() {
        table.add_row(vec![
            "error".to_string(),
            error.signature(),
            error.selector().to_string(),
            String::new(),
        ]);
    }
    table
}

fn deployment_table(contract: &DeployedContract, chain_id: u64) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["Contract", "Address", "Chain", "Gas used", "Transaction"]);
    let receipt = contract.receipt.as_ref();
    table.add_row(vec![
        contract.display_name().to_string(),
        contract.address.to_string(),
        chain_id.to_string(),
        receipt.map(|r| r.gas_used.to_string()).unwrap_or_default(),
        receipt
            .map(|r| r.transaction_hash.to_string())
            .unwrap_or_default(),
    ]);
    for (library, address) in &contract.links {
        table.add_row(vec![
            format!("  linked {library}"),
            address.to_string(),
            String::new(),
            String::new(),
            String::new(),
        ]);
    }
    table
}

async fn compile(config: KilnConfig, args: CompileArgs) -> Result<()> {
    let resolver = ArtifactResolver::new(CompileSandbox::new(config.harness));
    let artifact = resolver.resolve(descriptor(&args.source).await?).await?;

    tracing::info!(
        contract = %artifact.contract_name,
        bytecode_size = artifact.bytecode.len().saturating_sub(2) / 2,
        libraries = artifact.links.len(),
        "Compiled"
    );
    println!("{}", interface_table(&artifact.abi));
    Ok(())
}

async fn deploy(config: KilnConfig, args: DeployArgs) -> Result<()> {
    let descriptor = descriptor(&args.source).await?;

    let constructor_args = if args.args.is_empty() {
        Vec::new()
    } else {
        let resolver = ArtifactResolver::new(CompileSandbox::new(config.harness.clone()));
        let artifact = resolver.resolve(descriptor.clone()).await?;
        let params = artifact
            .abi
            .constructor
            .as_ref()
            .map(|c| c.inputs.as_slice())
            .unwrap_or_default();
        coerce_args(params, &args.args).context("Invalid constructor arguments")?
    };

    let builder = NodeSession::builder(config.harness)
        .user_log(Arc::new(|line: &str| println!("{line}")));
    let session = match args.rpc_url {
        Some(rpc_url) => {
            builder
                .connect(LiveConfig {
                    rpc_url,
                    deployments_root: args.deployments,
                    prefix: args.prefix,
                    signers: args.signers,
                })
                .await?
        }
        None => builder.launch(config.node).await?,
    };

    let mut request = DeployRequest::new(descriptor).args(constructor_args);
    if let Some(from) = args.from {
        request = request.from(from);
    }
    for (library, address) in args.libraries {
        request = request.library(library, address);
    }

    let result = session.deploy(request).await;
    let contract = match result {
        Ok(contract) => contract,
        Err(e) => {
            session.shutdown().await;
            return Err(e);
        }
    };
    println!("{}", deployment_table(&contract, session.chain_id().await?));

    if !session.is_live() && !args.no_wait {
        let endpoint = session.endpoint()?;
        tracing::info!(%endpoint, "Node running, press Ctrl+C to stop");
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl+C")?;
    }

    let code = session.shutdown().await;
    tracing::debug!(?code, "Node stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Compile(args) => compile(config, args).await,
        Command::Deploy(args) => deploy(config, args).await,
    }
}

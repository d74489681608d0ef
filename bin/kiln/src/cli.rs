use std::path::PathBuf;

use alloy_core::primitives::Address;
use clap::{Args, Parser, Subcommand};
use tracing::level_filters::LevelFilter;
use url::Url;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(author, version, about = "Compile, deploy and inspect Solidity contracts")]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, global = true, env = "KILN_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to a Kiln.toml configuration file.
    ///
    /// Defaults to ./Kiln.toml, then to the user configuration directory.
    #[arg(long, global = true, env = "KILN_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Compile a Solidity file and print its interface.
    Compile(CompileArgs),
    /// Compile and deploy a contract.
    Deploy(DeployArgs),
}

#[derive(Debug, Clone, Args)]
pub struct SourceArgs {
    /// The Solidity source file.
    pub file: PathBuf,

    /// The contract to select when the file declares several.
    #[arg(short, long)]
    pub contract: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct CompileArgs {
    #[command(flatten)]
    pub source: SourceArgs,
}

#[derive(Debug, Clone, Args)]
pub struct DeployArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Constructor arguments, in declaration order. Put negative numbers after `--`.
    pub args: Vec<String>,

    /// Sending wallet, by name or address.
    #[arg(long)]
    pub from: Option<String>,

    /// Library addresses as `Name=0x...` or `path/File.sol:Name=0x...`.
    #[arg(long = "library", value_parser = parse_named_address)]
    pub libraries: Vec<(String, Address)>,

    /// Deploy to a live network instead of an ephemeral node.
    #[arg(long, env = "KILN_RPC_URL")]
    pub rpc_url: Option<Url>,

    /// Directory holding deployment records of live networks.
    #[arg(long, env = "KILN_DEPLOYMENTS", default_value = ".")]
    pub deployments: PathBuf,

    /// Prefix of deployment record names on live networks.
    #[arg(long, env = "KILN_PREFIX", default_value = "")]
    pub prefix: String,

    /// Endpoint-managed signers of a live network as `name=0x...`.
    #[arg(long = "signer", value_parser = parse_named_address)]
    pub signers: Vec<(String, Address)>,

    /// Shut the ephemeral node down right after deploying.
    #[arg(long)]
    pub no_wait: bool,
}

fn parse_named_address(input: &str) -> Result<(String, Address), String> {
    let (name, address) = input
        .rsplit_once('=')
        .ok_or_else(|| format!("expected NAME=ADDRESS, got '{input}'"))?;
    if name.is_empty() {
        return Err(format!("missing name in '{input}'"));
    }
    let address = address
        .parse()
        .map_err(|e| format!("invalid address '{address}': {e}"))?;
    Ok((name.to_string(), address))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_named_address() {
        let (name, address) =
            parse_named_address("src/Math.sol:Math=0x5FbDB2315678afecb367f032d93F642f64180aa3")
                .unwrap();
        assert_eq!(name, "src/Math.sol:Math");
        assert_eq!(
            address,
            "0x5FbDB2315678afecb367f032d93F642f64180aa3".parse::<Address>().unwrap()
        );

        assert!(parse_named_address("Math").is_err());
        assert!(parse_named_address("=0x5FbDB2315678afecb367f032d93F642f64180aa3").is_err());
        assert!(parse_named_address("Math=0x12").is_err());
    }

    #[test]
    fn test_deploy_args() {
        let cli = Cli::parse_from([
            "kiln",
            "deploy",
            "Token.sol",
            "Kiln",
            "1000",
            "--contract",
            "Token",
            "--signer",
            "deployer=0x5FbDB2315678afecb367f032d93F642f64180aa3",
        ]);

        let Command::Deploy(args) = cli.command else {
            panic!("expected deploy");
        };
        assert_eq!(args.source.file, PathBuf::from("Token.sol"));
        assert_eq!(args.source.contract.as_deref(), Some("Token"));
        assert_eq!(args.args, vec!["Kiln", "1000"]);
        assert_eq!(args.signers.len(), 1);
        assert!(args.rpc_url.is_none());
    }
}

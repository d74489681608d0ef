//! Command builder for Anvil.

/// Builder for Anvil commands.
#[derive(Debug, Clone)]
pub struct AnvilCmdBuilder {
    host: String,
    port: u16,
    chain_id: Option<u64>,
    block_time: Option<u64>,
    gas_limit: Option<u64>,
    infinite_gas: bool,
    fork_url: Option<String>,
    fork_block_number: Option<u64>,
    extra_args: Vec<String>,
}

impl AnvilCmdBuilder {
    /// Create a new Anvil command builder. Port 0 lets the node pick one.
    pub fn new() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            chain_id: None,
            block_time: None,
            gas_limit: None,
            infinite_gas: false,
            fork_url: None,
            fork_block_number: None,
            extra_args: Vec::new(),
        }
    }

    /// Set the host address.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn chain_id(mut self, chain_id: Option<u64>) -> Self {
        self.chain_id = chain_id;
        self
    }

    /// Set the block time in seconds. Unset means automine.
    pub fn block_time(mut self, block_time: Option<u64>) -> Self {
        self.block_time = block_time;
        self
    }

    pub fn gas_limit(mut self, gas_limit: Option<u64>) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    /// Disable the block gas limit. Takes precedence over [`Self::gas_limit`].
    pub fn infinite_gas(mut self, infinite_gas: bool) -> Self {
        self.infinite_gas = infinite_gas;
        self
    }

    /// Set the fork URL.
    pub fn fork_url(mut self, url: Option<String>) -> Self {
        self.fork_url = url;
        self
    }

    /// Set the fork block number.
    pub fn fork_block_number(mut self, block_number: Option<u64>) -> Self {
        self.fork_block_number = block_number;
        self
    }

    /// Add extra arguments.
    pub fn extra_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.extra_args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    /// Build the command as a vector of strings.
    pub fn build(self) -> Vec<String> {
        // Accounts are created on demand, never pre-funded by the node.
        let mut cmd = vec![
            "--host".to_string(),
            self.host,
            "--port".to_string(),
            self.port.to_string(),
            "--accounts".to_string(),
            "0".to_string(),
        ];

        if let Some(chain_id) = self.chain_id {
            cmd.push("--chain-id".to_string());
            cmd.push(chain_id.to_string());
        }

        if let Some(block_time) = self.block_time {
            cmd.push("--block-time".to_string());
            cmd.push(block_time.to_string());
        }

        if self.infinite_gas {
            cmd.push("--disable-block-gas-limit".to_string());
        } else if let Some(gas_limit) = self.gas_limit {
            cmd.push("--gas-limit".to_string());
            cmd.push(gas_limit.to_string());
        }

        if let Some(fork_url) = self.fork_url {
            cmd.push("--fork-url".to_string());
            cmd.push(fork_url);
        }

        if let Some(fork_block_number) = self.fork_block_number {
            cmd.push("--fork-block-number".to_string());
            cmd.push(fork_block_number.to_string());
        }

        cmd.extend(self.extra_args);

        cmd
    }
}

impl Default for AnvilCmdBuilder {
    fn default() -> Self {
        Self::new()
    }
}

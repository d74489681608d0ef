//! Classification of node stdout lines.

use strum::Display;

/// Line emitted repeatedly while wallets estimate gas.
const NOISY_LINE: &str = "eth_estimateGas";

/// RPC namespaces the node echoes method names for.
const RPC_NAMESPACES: [&str; 10] = [
    "eth_", "anvil_", "net_", "web3_", "evm_", "debug_", "trace_", "txpool_", "ots_", "hardhat_",
];

/// Prefixes of the node's transaction and block summaries.
const NODE_PREFIXES: [&str; 8] = [
    "Transaction:",
    "Contract created:",
    "Gas used:",
    "Block Number:",
    "Block Hash:",
    "Block Time:",
    "Error:",
    "Warning:",
];

const CONSOLE_HEADER: &str = "console.log:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum LogKind {
    /// Output of `console.log` inside a contract.
    UserLog,
    /// RPC echo and transaction/block summaries.
    Node,
    Other,
}

/// Stateful classifier: `console.log` output spans the indented lines
/// following its header.
#[derive(Debug, Default)]
pub struct LogClassifier {
    in_console_block: bool,
    last_was_noisy: bool,
}

impl LogClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify one line, or return `None` when it is suppressed as noise.
    pub fn classify(&mut self, line: &str) -> Option<LogKind> {
        let trimmed = line.trim();

        if trimmed == NOISY_LINE {
            if self.last_was_noisy {
                return None;
            }
            self.last_was_noisy = true;
            self.in_console_block = false;
            return Some(LogKind::Node);
        }
        self.last_was_noisy = false;

        if trimmed == CONSOLE_HEADER {
            self.in_console_block = true;
            return Some(LogKind::Other);
        }

        if self.in_console_block {
            if !trimmed.is_empty() && line.starts_with(char::is_whitespace) {
                return Some(LogKind::UserLog);
            }
            self.in_console_block = false;
        }

        if is_rpc_method(trimmed) || NODE_PREFIXES.iter().any(|p| trimmed.starts_with(p)) {
            return Some(LogKind::Node);
        }

        Some(LogKind::Other)
    }
}

fn is_rpc_method(line: &str) -> bool {
    RPC_NAMESPACES.iter().any(|ns| {
        line.strip_prefix(ns).is_some_and(|rest| {
            !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
    })
}

/// Extract `host:port` from the node's ready banner.
pub fn parse_listening(line: &str) -> Option<&str> {
    let rest = line.trim().strip_prefix("Listening on ")?;
    let endpoint = rest.split_whitespace().next()?;
    endpoint.contains(':').then_some(endpoint)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_listening() {
        assert_eq!(parse_listening("Listening on 127.0.0.1:8545"), Some("127.0.0.1:8545"));
        assert_eq!(parse_listening("  Listening on 0.0.0.0:39211\n"), Some("0.0.0.0:39211"));
        assert_eq!(parse_listening("Listening on nothing"), None);
        assert_eq!(parse_listening("Available Accounts"), None);
    }

    #[test]
    fn test_classify_node_lines() {
        let mut classifier = LogClassifier::new();
        assert_eq!(classifier.classify("eth_sendTransaction"), Some(LogKind::Node));
        assert_eq!(classifier.classify("anvil_setBalance"), Some(LogKind::Node));
        assert_eq!(classifier.classify("    Transaction: 0xabc"), Some(LogKind::Node));
        assert_eq!(classifier.classify("    Gas used: 21000"), Some(LogKind::Node));
        assert_eq!(classifier.classify(""), Some(LogKind::Other));
        assert_eq!(classifier.classify("eth_ not a method"), Some(LogKind::Other));
    }

    #[test]
    fn test_console_block() {
        let mut classifier = LogClassifier::new();
        assert_eq!(classifier.classify("console.log:"), Some(LogKind::Other));
        assert_eq!(classifier.classify("  hello"), Some(LogKind::UserLog));
        assert_eq!(classifier.classify("  world 42"), Some(LogKind::UserLog));
        assert_eq!(classifier.classify(""), Some(LogKind::Other));
        assert_eq!(classifier.classify("  indented again"), Some(LogKind::Other));
    }

    #[test]
    fn test_repeated_gas_estimation_is_suppressed() {
        let mut classifier = LogClassifier::new();
        assert_eq!(classifier.classify("eth_estimateGas"), Some(LogKind::Node));
        assert_eq!(classifier.classify("eth_estimateGas"), None);
        assert_eq!(classifier.classify("eth_estimateGas"), None);
        assert_eq!(classifier.classify("eth_sendTransaction"), Some(LogKind::Node));
        assert_eq!(classifier.classify("eth_estimateGas"), Some(LogKind::Node));
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(LogKind::UserLog.to_string(), "user_log");
    }
}

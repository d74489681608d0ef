//! Handles returned to callers of a session.

use std::{
    collections::BTreeMap,
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use alloy_core::{
    json_abi::JsonAbi,
    primitives::{Address, B256},
};
use derive_more::{Deref, Display};

use crate::{
    rpc::{TransactionReceipt, TransactionRequest},
    wallet::Wallet,
};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one session, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[display("session-{_0}")]
pub struct SessionId(u64);

impl SessionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A value owned by a session, with the name it is displayed under.
#[derive(Debug, Clone, PartialEq, Deref)]
pub struct Owned<T> {
    #[deref]
    inner: T,
    display_name: String,
    owner: SessionId,
}

impl<T> Owned<T> {
    pub(crate) fn new(inner: T, display_name: String, owner: SessionId) -> Self {
        Self {
            inner,
            display_name,
            owner,
        }
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn owner(&self) -> SessionId {
        self.owner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T> fmt::Display for Owned<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name)
    }
}

/// First four hex digits of an address.
pub fn short_hash(address: &Address) -> String {
    hex::encode(&address.as_slice()[..2])
}

/// `Name<abcd>`.
pub fn contract_display_name(name: &str, address: &Address) -> String {
    format!("{name}<{}>", short_hash(address))
}

/// A contract living at an address.
#[derive(Debug, Clone, PartialEq)]
pub struct Contract {
    pub address: Address,
    pub name: String,
    pub abi: JsonAbi,
    /// Absent for attached contracts.
    pub receipt: Option<TransactionReceipt>,
    /// Library id → address linked into the deployed bytecode.
    pub links: BTreeMap<String, Address>,
}

pub type DeployedContract = Owned<Contract>;

pub type WalletHandle = Owned<Wallet>;

/// A submitted transaction awaiting confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransaction {
    pub hash: B256,
    pub request: TransactionRequest,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name() {
        let address: Address = "0x5FbDB2315678afecb367f032d93F642f64180aa3".parse().unwrap();
        assert_eq!(short_hash(&address), "5fbd");
        assert_eq!(contract_display_name("Counter", &address), "Counter<5fbd>");
    }

    #[test]
    fn test_owned_derefs_to_inner() {
        let id = SessionId::next();
        let owned = Owned::new(
            Wallet::external("bob", Address::repeat_byte(2)),
            "bob".to_string(),
            id,
        );

        assert_eq!(owned.name, "bob");
        assert_eq!(owned.owner(), id);
        assert_eq!(owned.to_string(), "bob");
        assert!(id.to_string().starts_with("session-"));
        assert_ne!(SessionId::next(), id);
    }
}

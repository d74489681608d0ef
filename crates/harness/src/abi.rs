//! ABI merging and the selector-indexed decoding registry.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::Arc,
};

use alloy_core::{
    dyn_abi::{DynSolValue, EventExt, JsonAbiExt, Specifier},
    json_abi::{Error, Event, Function, JsonAbi, Param, StateMutability},
    primitives::{B256, Selector, keccak256},
    sol_types::decode_revert_reason,
};
use anyhow::{Context, Result};
use serde_json::Value;

use crate::rpc::Log;

/// Parse ABI fragments one by one, dropping those that do not parse.
pub fn parse_abi_lenient(fragments: &[Value]) -> JsonAbi {
    let mut abi = JsonAbi::default();
    for fragment in fragments {
        match serde_json::from_value::<JsonAbi>(Value::Array(vec![fragment.clone()])) {
            Ok(parsed) => absorb(&mut abi, parsed),
            Err(e) => tracing::trace!(error = %e, %fragment, "Dropping unparsable ABI fragment"),
        }
    }
    abi
}

fn absorb(into: &mut JsonAbi, from: JsonAbi) {
    if into.constructor.is_none() {
        into.constructor = from.constructor;
    }
    if into.fallback.is_none() {
        into.fallback = from.fallback;
    }
    if into.receive.is_none() {
        into.receive = from.receive;
    }
    for (name, items) in from.functions {
        into.functions.entry(name).or_default().extend(items);
    }
    for (name, items) in from.events {
        into.events.entry(name).or_default().extend(items);
    }
    for (name, items) in from.errors {
        into.errors.entry(name).or_default().extend(items);
    }
}

/// Union of several ABIs.
///
/// Functions, events and errors are deduplicated by kind and full signature,
/// first occurrence wins. Constructor, fallback and receive come from the
/// first ABI only.
pub fn merge_abi<'a>(sources: impl IntoIterator<Item = &'a JsonAbi>) -> JsonAbi {
    let mut merged = JsonAbi::default();
    let mut seen: HashSet<(&'static str, String)> = HashSet::new();

    for (position, abi) in sources.into_iter().enumerate() {
        if position == 0 {
            merged.constructor = abi.constructor.clone();
            merged.fallback = abi.fallback.clone();
            merged.receive = abi.receive.clone();
        }
        for function in abi.functions() {
            if seen.insert(("function", function.full_signature())) {
                merged
                    .functions
                    .entry(function.name.clone())
                    .or_default()
                    .push(function.clone());
            }
        }
        for event in abi.events() {
            if seen.insert(("event", event.full_signature())) {
                merged
                    .events
                    .entry(event.name.clone())
                    .or_default()
                    .push(event.clone());
            }
        }
        for error in abi.errors() {
            if seen.insert(("error", error.signature())) {
                merged
                    .errors
                    .entry(error.name.clone())
                    .or_default()
                    .push(error.clone());
            }
        }
    }
    merged
}

/// Look a function up by full signature (`transfer(address,uint256)`) or by
/// name, using the argument count to pick between overloads.
pub fn find_function<'a>(abi: &'a JsonAbi, name: &str, arity: usize) -> Result<&'a Function> {
    if name.contains('(') {
        return abi
            .functions()
            .find(|f| f.signature() == name)
            .with_context(|| format!("No function with signature {name}"));
    }

    let overloads = abi
        .function(name)
        .with_context(|| format!("No function named {name}"))?;
    let mut matching = overloads.iter().filter(|f| f.inputs.len() == arity);
    match (matching.next(), matching.next()) {
        (Some(function), None) => Ok(function),
        (Some(_), Some(_)) => anyhow::bail!(
            "Function {name} is overloaded with {arity} argument(s); use its full signature"
        ),
        (None, _) => anyhow::bail!("Function {name} takes no {arity} argument overload"),
    }
}

/// Parse textual arguments into values of the given parameter types.
pub fn coerce_args(params: &[Param], raw: &[String]) -> Result<Vec<DynSolValue>> {
    if params.len() != raw.len() {
        anyhow::bail!("Expected {} argument(s), got {}", params.len(), raw.len());
    }
    params
        .iter()
        .zip(raw)
        .map(|(param, text)| {
            let ty = param
                .resolve()
                .with_context(|| format!("Unsupported parameter type {}", param.ty))?;
            ty.coerce_str(text)
                .with_context(|| format!("Invalid {} argument: {text}", param.ty))
        })
        .collect()
}

/// Render a decoded value the way it reads in Solidity.
pub fn format_value(value: &DynSolValue) -> String {
    match value {
        DynSolValue::Bool(b) => b.to_string(),
        DynSolValue::Int(i, _) => i.to_string(),
        DynSolValue::Uint(u, _) => u.to_string(),
        DynSolValue::FixedBytes(word, size) => format!("0x{}", hex::encode(&word[..*size])),
        DynSolValue::Address(address) => address.to_string(),
        DynSolValue::Function(function) => function.to_string(),
        DynSolValue::Bytes(bytes) => format!("0x{}", hex::encode(bytes)),
        DynSolValue::String(s) => format!("{s:?}"),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) => {
            format!("[{}]", format_values(items))
        }
        DynSolValue::Tuple(items) => format!("({})", format_values(items)),
        #[allow(unreachable_patterns)]
        other => format!("{other:?}"),
    }
}

fn format_values(values: &[DynSolValue]) -> String {
    values.iter().map(format_value).collect::<Vec<_>>().join(", ")
}

/// An ABI registered under the contract name it was deployed as.
#[derive(Debug, Clone, PartialEq)]
pub struct Interface {
    pub name: String,
    pub abi: JsonAbi,
}

/// Candidates sharing one selector, keyed by full-signature hash in insertion order.
type SelectorBucket = Vec<(B256, Arc<Interface>)>;

fn bucket_insert(bucket: &mut SelectorBucket, key: B256, interface: &Arc<Interface>) {
    match bucket.iter_mut().find(|(existing, _)| *existing == key) {
        Some(slot) => slot.1 = interface.clone(),
        None => bucket.push((key, interface.clone())),
    }
}

/// A decoded state-changing call.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedCall {
    pub contract: String,
    pub function: Function,
    pub args: Vec<DynSolValue>,
}

impl fmt::Display for DecodedCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}({})", self.contract, self.function.name, format_values(&self.args))
    }
}

/// A decoded revert.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedError {
    Custom {
        contract: String,
        error: Error,
        args: Vec<DynSolValue>,
    },
    /// `Error(string)`, `Panic(uint256)` or other generic reasons.
    Reason(String),
}

impl fmt::Display for DecodedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Custom {
                contract,
                error,
                args,
            } => write!(f, "{contract}.{}({})", error.name, format_values(args)),
            Self::Reason(reason) => f.write_str(reason),
        }
    }
}

/// A decoded event log.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedLog {
    pub contract: String,
    pub event: Event,
    /// Values in declaration order, indexed and non-indexed interleaved.
    pub args: Vec<DynSolValue>,
}

impl fmt::Display for DecodedLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}({})", self.contract, self.event.name, format_values(&self.args))
    }
}

/// Decoding tables over every ABI a session knows about.
///
/// State-changing functions are tried first; view and pure functions live in
/// a separate table consulted only when no state-changing candidate decodes.
#[derive(Debug, Default)]
pub struct AbiRegistry {
    functions: HashMap<Selector, SelectorBucket>,
    read_only: HashMap<Selector, SelectorBucket>,
    errors: HashMap<Selector, SelectorBucket>,
    events: HashMap<B256, Arc<Interface>>,
}

impl AbiRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the state-changing functions, events and errors of `abi`.
    pub fn index(&mut self, name: &str, abi: &JsonAbi) {
        let interface = Arc::new(Interface {
            name: name.to_string(),
            abi: abi.clone(),
        });

        for function in abi.functions() {
            let table = if matches!(
                function.state_mutability,
                StateMutability::View | StateMutability::Pure
            ) {
                &mut self.read_only
            } else {
                &mut self.functions
            };
            let key = keccak256(function.full_signature());
            bucket_insert(table.entry(function.selector()).or_default(), key, &interface);
        }

        for error in abi.errors() {
            let key = keccak256(error.signature());
            bucket_insert(
                self.errors.entry(error.selector()).or_default(),
                key,
                &interface,
            );
        }

        for event in abi.events().filter(|e| !e.anonymous) {
            self.events.insert(event.selector(), interface.clone());
        }

        tracing::trace!(
            contract = name,
            functions = self.functions.len(),
            errors = self.errors.len(),
            events = self.events.len(),
            "Indexed ABI"
        );
    }

    /// Attribute calldata to the first registered interface that decodes it.
    pub fn decode_transaction(&self, data: &[u8]) -> Option<DecodedCall> {
        let selector = Selector::try_from(data.get(..4)?).ok()?;
        [&self.functions, &self.read_only]
            .into_iter()
            .filter_map(|table| table.get(&selector))
            .find_map(|bucket| Self::decode_with_bucket(bucket, selector, data))
    }

    fn decode_with_bucket(bucket: &SelectorBucket, selector: Selector, data: &[u8]) -> Option<DecodedCall> {
        bucket.iter().find_map(|(_, interface)| {
            let function = interface
                .abi
                .functions()
                .find(|f| f.selector() == selector)?;
            let args = function.abi_decode_input(&data[4..], true).ok()?;
            Some(DecodedCall {
                contract: interface.name.clone(),
                function: function.clone(),
                args,
            })
        })
    }

    /// Decode revert data, falling back to the generic reasons.
    pub fn decode_error(&self, data: &[u8]) -> Option<DecodedError> {
        let custom = data
            .get(..4)
            .and_then(|prefix| Selector::try_from(prefix).ok())
            .and_then(|selector| {
                self.errors.get(&selector)?.iter().find_map(|(_, interface)| {
                    let error = interface.abi.errors().find(|e| e.selector() == selector)?;
                    let args = error.abi_decode_input(&data[4..], true).ok()?;
                    Some(DecodedError::Custom {
                        contract: interface.name.clone(),
                        error: error.clone(),
                        args,
                    })
                })
            });

        custom.or_else(|| {
            decode_revert_reason(data)
                .filter(|reason| !reason.is_empty())
                .map(DecodedError::Reason)
        })
    }

    /// Decode a log through the interface registered for its first topic.
    pub fn decode_log(&self, log: &Log) -> Option<DecodedLog> {
        let topic = log.topics.first()?;
        let interface = self.events.get(topic)?;
        let event = interface.abi.events().find(|e| e.selector() == *topic)?;
        let decoded = event
            .decode_log_parts(log.topics.iter().copied(), &log.data, true)
            .ok()?;

        let mut indexed = decoded.indexed.into_iter();
        let mut body = decoded.body.into_iter();
        let args = event
            .inputs
            .iter()
            .map(|input| if input.indexed { indexed.next() } else { body.next() })
            .collect::<Option<Vec<_>>>()?;

        Some(DecodedLog {
            contract: interface.name.clone(),
            event: event.clone(),
            args,
        })
    }

    /// Decode every log that matches a registered event.
    pub fn decode_logs<'a>(&self, logs: impl IntoIterator<Item = &'a Log>) -> Vec<DecodedLog> {
        logs.into_iter().filter_map(|log| self.decode_log(log)).collect()
    }
}

#[cfg(test)]
mod tests {
    use alloy_core::primitives::{Address, Bytes, U256};
    use serde_json::json;

    use super::*;

    fn abi(fragments: Value) -> JsonAbi {
        parse_abi_lenient(fragments.as_array().unwrap())
    }

    fn counter_abi() -> JsonAbi {
        abi(json!([
            { "type": "constructor", "inputs": [{ "name": "start", "type": "uint256" }], "stateMutability": "nonpayable" },
            { "type": "function", "name": "set", "inputs": [{ "name": "v", "type": "uint256" }], "outputs": [], "stateMutability": "nonpayable" },
            { "type": "function", "name": "get", "inputs": [], "outputs": [{ "name": "", "type": "uint256" }], "stateMutability": "view" },
            { "type": "event", "name": "Set", "inputs": [
                { "name": "who", "type": "address", "indexed": true },
                { "name": "v", "type": "uint256", "indexed": false }
            ], "anonymous": false },
            { "type": "error", "name": "TooLarge", "inputs": [{ "name": "v", "type": "uint256" }] }
        ]))
    }

    #[test]
    fn test_parse_abi_lenient_drops_bad_fragments() {
        let parsed = abi(json!([
            { "type": "function", "name": "ok", "inputs": [], "outputs": [], "stateMutability": "nonpayable" },
            { "type": "function", "name": 5 },
            "not even an object"
        ]));
        assert_eq!(parsed.functions().count(), 1);
        assert!(parsed.function("ok").is_some());
    }

    #[test]
    fn test_merge_abi_dedups_shared_function() {
        let first = abi(json!([
            { "type": "constructor", "inputs": [], "stateMutability": "nonpayable" },
            { "type": "function", "name": "f", "inputs": [], "outputs": [], "stateMutability": "nonpayable" },
            { "type": "event", "name": "A", "inputs": [], "anonymous": false },
            { "type": "error", "name": "Denied", "inputs": [{ "name": "code", "type": "uint256" }] }
        ]));
        let second = abi(json!([
            { "type": "constructor", "inputs": [{ "name": "x", "type": "uint256" }], "stateMutability": "nonpayable" },
            { "type": "function", "name": "f", "inputs": [], "outputs": [], "stateMutability": "nonpayable" },
            { "type": "event", "name": "B", "inputs": [], "anonymous": false },
            { "type": "error", "name": "Denied", "inputs": [{ "name": "reason", "type": "uint256" }] },
            { "type": "error", "name": "Denied", "inputs": [{ "name": "reason", "type": "string" }] }
        ]));

        let merged = merge_abi([&first, &second]);
        assert_eq!(merged.functions().count(), 1);
        assert_eq!(merged.events().count(), 2);
        // Errors are keyed by signature, so only the overload is added.
        assert_eq!(merged.errors().count(), 2);
        assert_eq!(merged.constructor, first.constructor);
    }

    #[test]
    fn test_find_function() {
        let abi = abi(json!([
            { "type": "function", "name": "mint", "inputs": [], "outputs": [], "stateMutability": "nonpayable" },
            { "type": "function", "name": "mint", "inputs": [{ "name": "to", "type": "address" }], "outputs": [], "stateMutability": "nonpayable" }
        ]));

        assert_eq!(find_function(&abi, "mint", 1).unwrap().inputs.len(), 1);
        assert_eq!(find_function(&abi, "mint", 0).unwrap().inputs.len(), 0);
        assert!(find_function(&abi, "mint", 2).is_err());
        assert_eq!(find_function(&abi, "mint(address)", 0).unwrap().inputs.len(), 1);
        assert!(find_function(&abi, "burn", 0).is_err());
    }

    #[test]
    fn test_coerce_args() {
        let abi = counter_abi();
        let set = abi.function("set").unwrap().first().unwrap();
        let values = coerce_args(&set.inputs, &["42".to_string()]).unwrap();
        assert_eq!(values, vec![DynSolValue::Uint(U256::from(42), 256)]);
        assert!(coerce_args(&set.inputs, &[]).is_err());
    }

    #[test]
    fn test_decode_transaction() {
        let mut registry = AbiRegistry::new();
        let abi = counter_abi();
        registry.index("Counter", &abi);

        let set = abi.function("set").unwrap().first().unwrap();
        let data = set.abi_encode_input(&[DynSolValue::from(U256::from(7))]).unwrap();
        let decoded = registry.decode_transaction(&data).unwrap();
        assert_eq!(decoded.to_string(), "Counter.set(7)");

        // View functions decode through the read-only table.
        let get = abi.function("get").unwrap().first().unwrap();
        let data = get.abi_encode_input(&[]).unwrap();
        assert_eq!(registry.decode_transaction(&data).unwrap().to_string(), "Counter.get()");

        assert!(registry.decode_transaction(&[0x01, 0x02]).is_none());
    }

    #[test]
    fn test_colliding_selector_tries_each_candidate() {
        let mut registry = AbiRegistry::new();
        // Same selector, different output types: both land in one bucket.
        let a = abi(json!([
            { "type": "function", "name": "f", "inputs": [{ "name": "x", "type": "uint8" }], "outputs": [], "stateMutability": "nonpayable" }
        ]));
        let b = abi(json!([
            { "type": "function", "name": "f", "inputs": [{ "name": "x", "type": "uint8" }], "outputs": [{ "name": "", "type": "bool" }], "stateMutability": "nonpayable" }
        ]));
        registry.index("A", &a);
        registry.index("B", &b);

        let f = a.function("f").unwrap().first().unwrap();
        let data = f.abi_encode_input(&[DynSolValue::Uint(U256::from(1), 8)]).unwrap();
        assert_eq!(registry.decode_transaction(&data).unwrap().contract, "A");

        // Known selector but truncated arguments: no candidate decodes.
        assert!(registry.decode_transaction(&data[..4]).is_none());
    }

    #[test]
    fn test_state_changing_candidate_wins() {
        let mut registry = AbiRegistry::new();
        let viewer = abi(json!([
            { "type": "function", "name": "f", "inputs": [], "outputs": [], "stateMutability": "view" }
        ]));
        let writer = abi(json!([
            { "type": "function", "name": "f", "inputs": [], "outputs": [], "stateMutability": "nonpayable" }
        ]));
        registry.index("Viewer", &viewer);
        registry.index("Writer", &writer);

        let f = writer.function("f").unwrap().first().unwrap();
        let data = f.abi_encode_input(&[]).unwrap();
        assert_eq!(registry.decode_transaction(&data).unwrap().contract, "Writer");
    }

    #[test]
    fn test_decode_error() {
        let mut registry = AbiRegistry::new();
        let abi = counter_abi();
        registry.index("Counter", &abi);

        let error = abi.error("TooLarge").unwrap().first().unwrap();
        let data = error.abi_encode_input(&[DynSolValue::from(U256::from(99))]).unwrap();
        let decoded = registry.decode_error(&data).unwrap();
        assert_eq!(decoded.to_string(), "Counter.TooLarge(99)");

        // Error(string) falls back to the generic decoder.
        let mut revert = hex::decode("08c379a0").unwrap();
        revert.extend(DynSolValue::Tuple(vec![DynSolValue::from("nope".to_string())]).abi_encode_params());
        match registry.decode_error(&revert) {
            Some(DecodedError::Reason(reason)) => assert!(reason.contains("nope")),
            other => panic!("unexpected decoding: {other:?}"),
        }

        assert!(registry.decode_error(&[]).is_none());
    }

    #[test]
    fn test_decode_log() {
        let mut registry = AbiRegistry::new();
        let abi = counter_abi();
        registry.index("Counter", &abi);

        let event = abi.event("Set").unwrap().first().unwrap();
        let who = Address::repeat_byte(0x11);
        let log = Log {
            address: Address::ZERO,
            topics: vec![event.selector(), who.into_word()],
            data: Bytes::from(U256::from(5).to_be_bytes::<32>().to_vec()),
            log_index: None,
        };

        let decoded = registry.decode_log(&log).unwrap();
        assert_eq!(decoded.contract, "Counter");
        assert_eq!(decoded.args, vec![DynSolValue::Address(who), DynSolValue::Uint(U256::from(5), 256)]);

        let unknown = Log {
            topics: vec![B256::repeat_byte(0x22)],
            ..log
        };
        assert!(registry.decode_log(&unknown).is_none());
        assert_eq!(registry.decode_logs([&unknown]).len(), 0);
    }
}

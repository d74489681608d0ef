//! Library linking.

use std::collections::{BTreeMap, HashMap};

use alloy_core::primitives::Address;

use crate::{artifact::LibraryReference, compile::output::ADDRESS_SLOT_BYTES, error::HarnessError};

/// Split `path/to/File.sol:Name` into reversed path segments and the bare name.
fn split_qualified(id: &str) -> (Vec<String>, &str) {
    match id.rsplit_once(':') {
        Some((path, name)) => (
            path.split('/')
                .filter(|s| !s.is_empty())
                .rev()
                .map(str::to_string)
                .collect(),
            name,
        ),
        None => (Vec::new(), id),
    }
}

/// Values indexed by contract name, disambiguated by path suffix.
#[derive(Debug, Clone)]
pub struct ContractMap<T> {
    entries: HashMap<String, Vec<(Vec<String>, T)>>,
}

impl<T> Default for ContractMap<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<T> ContractMap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert under a qualified id (`path:Name`) or a bare name.
    pub fn insert(&mut self, id: &str, value: T) {
        let (path, name) = split_qualified(id);
        self.entries
            .entry(name.to_string())
            .or_default()
            .push((path, value));
    }

    /// Resolve an id to its unique entry.
    ///
    /// Candidates sharing the bare name are narrowed by comparing path
    /// segments innermost first, one at a time, stopping as soon as exactly
    /// one remains. Returns `None` when nothing matches or the query path runs
    /// out while several candidates remain.
    pub fn find(&self, id: &str) -> Option<&T> {
        let (path, name) = split_qualified(id);
        let mut candidates: Vec<&(Vec<String>, T)> = self.entries.get(name)?.iter().collect();

        for depth in 0..=path.len() {
            match candidates.len() {
                0 => return None,
                1 => return Some(&candidates[0].1),
                _ => {}
            }
            let segment = path.get(depth)?;
            candidates.retain(|(candidate, _)| candidate.get(depth) == Some(segment));
        }
        None
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Patched bytecode and the address chosen for every library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOutput {
    pub bytecode: String,
    /// Qualified library id → address written into the bytecode.
    pub libraries: BTreeMap<String, Address>,
}

/// Hex character range of the address slot at byte `offset`, `None` on overflow.
fn slot_range(offset: usize) -> Option<std::ops::Range<usize>> {
    let start = offset.checked_mul(2)?.checked_add(2)?;
    let end = start.checked_add(2 * ADDRESS_SLOT_BYTES)?;
    Some(start..end)
}

/// Write library addresses into every placeholder of `bytecode`.
///
/// `libraries` ids are qualified (`path:Name`) or bare names. Every entry is
/// kept, so libraries sharing a name resolve only when their ids differ.
/// Slot `k` (a byte offset) occupies hex characters `[2 + 2k, 2 + 2k + 40)` of
/// the `0x`-prefixed bytecode.
pub fn link(
    bytecode: &str,
    references: &[LibraryReference],
    libraries: &[(String, Address)],
) -> Result<LinkOutput, HarnessError> {
    let mut map = ContractMap::new();
    for (id, address) in libraries {
        map.insert(id, *address);
    }

    let mut patched = bytecode.to_string();
    let mut resolved = BTreeMap::new();

    for reference in references {
        let id = reference.qualified_id();
        let address = *map
            .find(&id)
            .ok_or_else(|| HarnessError::UnresolvedLibrary {
                library: id.clone(),
            })?;
        let digits = hex::encode(address.as_slice());

        for &offset in &reference.offsets {
            let slot = slot_range(offset)
                .filter(|range| range.end <= patched.len())
                .filter(|range| patched.is_char_boundary(range.start) && patched.is_char_boundary(range.end));
            let Some(range) = slot else {
                return Err(HarnessError::MalformedLinkReference {
                    library: id,
                    offset,
                    length: offset
                        .checked_mul(2)
                        .and_then(|hex| hex.checked_add(2))
                        .map(|start| patched.len().saturating_sub(start) / 2)
                        .unwrap_or_default(),
                });
            };
            patched.replace_range(range, &digits);
        }

        tracing::debug!(library = %id, address = %address, "Linked library");
        resolved.insert(id, address);
    }

    Ok(LinkOutput {
        bytecode: patched,
        libraries: resolved,
    })
}

#[cfg(test)]
mod tests {
    use rand::Rng;

    use super::*;

    #[test]
    fn test_find_distinct_names() {
        let mut map = ContractMap::new();
        map.insert("src/A.sol:A", 1);
        map.insert("B", 2);

        assert_eq!(map.find("A"), Some(&1));
        assert_eq!(map.find("src/A.sol:A"), Some(&1));
        assert_eq!(map.find("lib/B.sol:B"), Some(&2));
        assert_eq!(map.find("C"), None);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_find_needs_one_disambiguating_segment() {
        let mut map = ContractMap::new();
        map.insert("a/L.sol:L", 1);
        map.insert("b/L.sol:L", 2);

        // The bare name and the shared file name both leave two candidates.
        assert_eq!(map.find("L"), None);
        assert_eq!(map.find("L.sol:L"), None);

        // One more segment converges.
        assert_eq!(map.find("a/L.sol:L"), Some(&1));
        assert_eq!(map.find("x/b/L.sol:L"), Some(&2));
        assert_eq!(map.find("c/L.sol:L"), None);
    }

    #[test]
    fn test_identical_paths_stay_ambiguous() {
        let mut map = ContractMap::new();
        map.insert("src/L.sol:L", 1);
        map.insert("src/L.sol:L", 2);

        assert_eq!(map.find("src/L.sol:L"), None);
        assert_eq!(map.find("root/src/L.sol:L"), None);
    }

    #[test]
    fn test_link_patches_only_the_slot() {
        let mut rng = rand::rng();
        let body: String = (0..60).map(|_| format!("{:02x}", rng.random::<u8>())).collect();
        let bytecode = format!("0x{body}");
        let offset = 7;

        let address = Address::repeat_byte(0xab);
        let reference = LibraryReference::new("src/Math.sol", "Math", vec![offset]);
        let libraries = vec![("Math".to_string(), address)];

        let out = link(&bytecode, &[reference], &libraries).unwrap();

        let start = 2 + 2 * offset;
        assert_eq!(out.bytecode.len(), bytecode.len());
        assert_eq!(&out.bytecode[..start], &bytecode[..start]);
        assert_eq!(&out.bytecode[start..start + 40], "ab".repeat(20));
        assert_eq!(&out.bytecode[start + 40..], &bytecode[start + 40..]);
        assert_eq!(out.libraries.get("src/Math.sol:Math"), Some(&address));
    }

    #[test]
    fn test_link_unresolved_library() {
        let reference = LibraryReference::new("src/Math.sol", "Math", vec![0]);
        let err = link(&format!("0x{}", "00".repeat(32)), &[reference], &[]).unwrap_err();
        assert!(matches!(err, HarnessError::UnresolvedLibrary { library } if library == "src/Math.sol:Math"));
    }

    #[test]
    fn test_link_slot_out_of_range() {
        let reference = LibraryReference::new("src/Math.sol", "Math", vec![10]);
        let libraries = vec![("Math".to_string(), Address::ZERO)];
        let err = link(&format!("0x{}", "00".repeat(16)), &[reference], &libraries).unwrap_err();
        assert!(matches!(err, HarnessError::MalformedLinkReference { offset: 10, .. }));
    }

    #[test]
    fn test_link_same_named_libraries_are_ambiguous() {
        let bytecode = format!("0x{}", "00".repeat(32));
        let libraries = vec![
            ("L".to_string(), Address::repeat_byte(0xa1)),
            ("L".to_string(), Address::repeat_byte(0xa2)),
        ];

        let reference = LibraryReference::new("a/L.sol", "L", vec![0]);
        let err = link(&bytecode, &[reference], &libraries).unwrap_err();
        assert!(matches!(err, HarnessError::UnresolvedLibrary { library } if library == "a/L.sol:L"));

        // Qualified entries still tell them apart.
        let libraries = vec![
            ("a/L.sol:L".to_string(), Address::repeat_byte(0xa1)),
            ("b/L.sol:L".to_string(), Address::repeat_byte(0xa2)),
        ];
        let reference = LibraryReference::new("a/L.sol", "L", vec![0]);
        let out = link(&bytecode, &[reference], &libraries).unwrap();
        assert_eq!(out.libraries.get("a/L.sol:L"), Some(&Address::repeat_byte(0xa1)));
    }

    #[test]
    fn test_link_offset_overflow_is_malformed() {
        let reference = LibraryReference::new("src/Math.sol", "Math", vec![usize::MAX / 2]);
        let libraries = vec![("Math".to_string(), Address::ZERO)];
        let err = link(&format!("0x{}", "00".repeat(32)), &[reference], &libraries).unwrap_err();
        assert!(matches!(
            err,
            HarnessError::MalformedLinkReference { offset, length: 0, .. } if offset == usize::MAX / 2
        ));
    }
}

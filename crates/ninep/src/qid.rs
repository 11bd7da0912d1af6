//! QID assignment: derives a stable 13-byte QID from backend node identity.
//!
//! The reference `unpfs` backend this was grounded on used the host OS inode
//! number directly as `QId.path`. That only works when the backend *is* the
//! host filesystem. A `Backend` here is free to hand back any opaque `u64`
//! node identifier (a table index, a content hash folded to 64 bits, …), so
//! the assigner hashes it down to a 32-bit value instead of assuming it is
//! already inode-shaped, and zero-extends that into the 64-bit `path` field.

use crate::proto::{QId, QIdType};

/// Derives a `QId` from a backend-opaque node identifier. Identical node
/// identities always produce identical QIDs; this is the only property the
/// 9P client is allowed to depend on.
pub fn assign(node: u64, version: u32, typ: QIdType) -> QId {
    QId { typ, version, path: hash32(node) as u64 }
}

/// FNV-1a over the little-endian bytes of `node`. Chosen for being a
/// well-known, dependency-free, non-cryptographic hash with good avalanche
/// behavior for small fixed-size keys.
fn hash32(node: u64) -> u32 {
    const FNV_OFFSET: u32 = 0x811c_9dc5;
    const FNV_PRIME: u32 = 0x0100_0193;

    node.to_le_bytes().iter().fold(FNV_OFFSET, |hash, &byte| (hash ^ byte as u32).wrapping_mul(FNV_PRIME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_node_yields_same_qid() {
        let a = assign(42, 0, QIdType::FILE);
        let b = assign(42, 0, QIdType::FILE);
        assert_eq!(a, b);
    }

    #[test]
    fn different_nodes_usually_hash_differently() {
        let a = assign(1, 0, QIdType::FILE);
        let b = assign(2, 0, QIdType::FILE);
        assert_ne!(a.path, b.path);
    }

    #[test]
    fn path_is_zero_extended_from_32_bits() {
        let q = assign(123456789, 0, QIdType::FILE);
        assert!(q.path <= u32::MAX as u64);
    }

    #[test]
    fn qid_survives_a_conceptual_rename_because_node_identity_is_unchanged() {
        // QId depends only on node identity, not on the path string used to
        // reach it, so a rename (same node, new name) preserves the QId.
        let before = assign(7, 3, QIdType::FILE);
        let after_rename = assign(7, 3, QIdType::FILE);
        assert_eq!(before, after_rename);
    }
}

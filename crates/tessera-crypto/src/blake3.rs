//! Domain-separated BLAKE3 for off-chain identifiers.
//!
//! Order ids, fill ids, escrow ids, address derivation and sponsored
//! transaction digests are derived with BLAKE3's key-derivation mode. Each use
//! has its own registered context string, so an identifier of one kind can
//! never collide with another.
//!
//! Commitment hashing (leaves, Merkle nodes, nullifiers) does NOT live here: it
//! must match on-chain verifiers and uses [`crate::keccak`].

/// Registered BLAKE3 context strings. Using an unregistered context is a
/// protocol violation.
pub mod contexts {
    pub const ORDER_ID: &str = "Tessera v1 order-id";
    pub const FILL_ID: &str = "Tessera v1 fill-id";
    pub const ESCROW_ID: &str = "Tessera v1 escrow-id";
    pub const ADDRESS: &str = "Tessera v1 address";
    pub const SPONSORED_TX_DIGEST: &str = "Tessera v1 sponsored-tx-digest";

    /// All registered context strings. Used for validation.
    pub const ALL_CONTEXTS: &[&str] = &[
        ORDER_ID,
        FILL_ID,
        ESCROW_ID,
        ADDRESS,
        SPONSORED_TX_DIGEST,
    ];
}

/// Derive a 32-byte value using BLAKE3's key derivation mode.
///
/// # Arguments
///
/// * `context` - A registered context string from [`contexts`]
/// * `key_material` - The input material
pub fn derive_key(context: &str, key_material: &[u8]) -> [u8; 32] {
    debug_assert!(is_registered_context(context), "unregistered context {context}");
    let mut hasher = ::blake3::Hasher::new_derive_key(context);
    hasher.update(key_material);
    *hasher.finalize().as_bytes()
}

/// Encode multiple fields with 4-byte little-endian length prefixes.
///
/// Used as key material when an identifier covers several variable-length
/// fields, so that `("ab", "c")` and `("a", "bc")` encode differently.
pub fn encode_multi_field(fields: &[&[u8]]) -> Vec<u8> {
    let total: usize = fields.iter().map(|f| 4 + f.len()).sum();
    let mut out = Vec::with_capacity(total);
    for field in fields {
        out.extend_from_slice(&(field.len() as u32).to_le_bytes());
        out.extend_from_slice(field);
    }
    out
}

/// Check whether a context string is registered.
pub fn is_registered_context(context: &str) -> bool {
    contexts::ALL_CONTEXTS.contains(&context)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contexts_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for ctx in contexts::ALL_CONTEXTS {
            assert!(seen.insert(*ctx), "duplicate context {ctx}");
            assert!(ctx.starts_with("Tessera v1 "));
        }
    }

    #[test]
    fn test_domain_separation() {
        let material = b"same input";
        let a = derive_key(contexts::ORDER_ID, material);
        let b = derive_key(contexts::ESCROW_ID, material);
        assert_ne!(a, b);
        assert_ne!(a, *::blake3::hash(material).as_bytes());
    }

    #[test]
    fn test_multi_field_is_unambiguous() {
        let a = encode_multi_field(&[b"ab".as_slice(), b"c".as_slice()]);
        let b = encode_multi_field(&[b"a".as_slice(), b"bc".as_slice()]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_registered_context() {
        assert!(is_registered_context(contexts::FILL_ID));
        assert!(!is_registered_context("Tessera v1 unknown"));
    }
}

//! keccak-256 hashing.
//!
//! This is the original Keccak padding (as used by the EVM), not NIST SHA3-256.
//! Leaves, inner Merkle nodes and nullifiers all use it so that a commitment
//! built off-chain verifies identically inside any escrow deployment.

use sha3::{Digest, Keccak256};

use crate::Hash;

/// Compute keccak-256 of `data`.
pub fn keccak256(data: &[u8]) -> Hash {
    Keccak256::digest(data).into()
}

/// Compute keccak-256 over the concatenation of `parts` without allocating.
pub fn keccak256_concat(parts: &[&[u8]]) -> Hash {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_empty_input_vector() {
        assert_eq!(
            keccak256(b""),
            hex!("c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470")
        );
    }

    #[test]
    fn test_abc_vector() {
        assert_eq!(
            keccak256(b"abc"),
            hex!("4e03657aea45a94fc7d47ba826c8d667c0d1e6e33a64a036ec44f58fa12d6c45")
        );
    }

    #[test]
    fn test_concat_matches_single_buffer() {
        let a = [0x11u8; 32];
        let b = [0x22u8; 32];
        let mut joined = Vec::with_capacity(64);
        joined.extend_from_slice(&a);
        joined.extend_from_slice(&b);
        assert_eq!(keccak256_concat(&[a.as_slice(), b.as_slice()]), keccak256(&joined));
    }
}

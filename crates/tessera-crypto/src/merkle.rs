//! Commutative-pair Merkle commitment over secret-derived leaves.
//!
//! ## Construction
//!
//! ```text
//! combine(a, b) = keccak256(min(a, b) || max(a, b))     (raw byte order)
//! ```
//!
//! - Leaves are **never sorted**. Tree shape follows insertion order: secret
//!   index `i` sits at leaf position `i - 1`.
//! - Only sibling *pairs* are value-ordered inside [`combine`], so a verifier
//!   does not need left/right flags and proofs are plain sibling lists.
//! - An odd trailing node is promoted unchanged to the next level; its proof
//!   simply has no element for that level.
//! - A single leaf is its own root with an empty proof.
//!
//! Because pair hashing is commutative, a proof does not bind the leaf's
//! position. Escrows bind positions through the relayer-signed index range in
//! the authorization grant, not through the proof.

use crate::keccak::keccak256_concat;
use crate::secret::Secret;
use crate::{CryptoError, Hash, Result};

/// Combine two sibling nodes into their parent.
pub fn combine(a: &Hash, b: &Hash) -> Hash {
    if a <= b {
        keccak256_concat(&[a.as_slice(), b.as_slice()])
    } else {
        keccak256_concat(&[b.as_slice(), a.as_slice()])
    }
}

/// A fully materialized Merkle tree, keeping every level for proof extraction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MerkleTree {
    /// `levels[0]` are the leaves, the last level holds the root.
    levels: Vec<Vec<Hash>>,
}

impl MerkleTree {
    /// Build a tree over `leaves` in the given order.
    ///
    /// # Errors
    ///
    /// - [`CryptoError::EmptyTree`] if `leaves` is empty
    pub fn build(leaves: &[Hash]) -> Result<Self> {
        if leaves.is_empty() {
            return Err(CryptoError::EmptyTree);
        }

        let mut levels = vec![leaves.to_vec()];
        while let Some(level) = levels.last() {
            if level.len() == 1 {
                break;
            }
            let next: Vec<Hash> = level
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => combine(left, right),
                    // `chunks(2)` only yields a single node for the odd tail.
                    _ => pair[0],
                })
                .collect();
            levels.push(next);
        }

        Ok(Self { levels })
    }

    /// Build a tree over the leaves of `secrets`.
    pub fn from_secrets(secrets: &[Secret]) -> Result<Self> {
        Self::build(&leaves_for_secrets(secrets))
    }

    /// The committed root.
    pub fn root(&self) -> Hash {
        // `build` guarantees at least one level with at least one node.
        self.levels
            .last()
            .and_then(|level| level.first())
            .copied()
            .unwrap_or_default()
    }

    /// The leaves in insertion order.
    pub fn leaves(&self) -> &[Hash] {
        &self.levels[0]
    }

    /// Number of leaves.
    pub fn leaf_count(&self) -> usize {
        self.levels[0].len()
    }

    /// Number of levels above the leaves.
    pub fn depth(&self) -> usize {
        self.levels.len() - 1
    }

    /// Extract the sibling path for the leaf at `position` (0-based).
    ///
    /// # Errors
    ///
    /// - [`CryptoError::LeafOutOfRange`] if `position >= leaf_count`
    pub fn prove(&self, position: usize) -> Result<Vec<Hash>> {
        let leaf_count = self.leaf_count();
        if position >= leaf_count {
            return Err(CryptoError::LeafOutOfRange {
                position,
                leaf_count,
            });
        }

        let mut proof = Vec::with_capacity(self.depth());
        let mut pos = position;
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = pos ^ 1;
            if let Some(node) = level.get(sibling) {
                proof.push(*node);
            }
            pos /= 2;
        }
        Ok(proof)
    }
}

/// The leaf committed for a single secret.
pub fn leaf_for_secret(secret: &Secret) -> Hash {
    secret.leaf()
}

/// Compute the leaf for each secret, preserving order.
pub fn leaves_for_secrets(secrets: &[Secret]) -> Vec<Hash> {
    secrets.iter().map(leaf_for_secret).collect()
}

/// Compute the root over `leaves`.
pub fn build_root(leaves: &[Hash]) -> Result<Hash> {
    Ok(MerkleTree::build(leaves)?.root())
}

/// Extract the proof for `position` in a tree over `leaves`.
pub fn prove(leaves: &[Hash], position: usize) -> Result<Vec<Hash>> {
    MerkleTree::build(leaves)?.prove(position)
}

/// Verify that `leaf` is committed under `root` with the given sibling path.
pub fn verify(root: &Hash, leaf: &Hash, proof: &[Hash]) -> bool {
    let computed = proof
        .iter()
        .fold(*leaf, |node, sibling| combine(&node, sibling));
    computed == *root
}

/// One position of a partially disclosed leaf set: either the secret itself
/// or only its committed hash.
#[derive(Clone, Debug)]
pub enum DisclosedLeaf<'a> {
    /// The secret was revealed; its leaf is recomputed.
    Revealed(&'a Secret),
    /// Only the leaf hash was provided.
    Hashed(Hash),
}

impl DisclosedLeaf<'_> {
    /// The leaf value at this position.
    pub fn leaf(&self) -> Hash {
        match self {
            Self::Revealed(secret) => secret.leaf(),
            Self::Hashed(hash) => *hash,
        }
    }
}

/// Rebuild the root from a mix of revealed secrets and provided leaf hashes,
/// in insertion order.
pub fn reconstruct_root(disclosure: &[DisclosedLeaf<'_>]) -> Result<Hash> {
    let leaves: Vec<Hash> = disclosure.iter().map(DisclosedLeaf::leaf).collect();
    build_root(&leaves)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keccak::keccak256;
    use hex_literal::hex;

    fn leaf_set(count: u8) -> Vec<Hash> {
        (1..=count).map(|i| keccak256(&[i; 32])).collect()
    }

    #[test]
    fn test_combine_is_commutative() {
        let a = [0x01u8; 32];
        let b = [0x02u8; 32];
        assert_eq!(combine(&a, &b), combine(&b, &a));
        assert_eq!(combine(&a, &b), keccak256_concat(&[a.as_slice(), b.as_slice()]));
    }

    #[test]
    fn test_fixed_root_vectors() {
        // Pinned vectors: any change here breaks verification on deployed escrows.
        assert_eq!(
            build_root(&leaf_set(3)).expect("root"),
            hex!("239aa26bdcc73d2d6467f450859b9a5852d73700add5e4696e2a45ac64059b3f")
        );
        assert_eq!(
            build_root(&leaf_set(5)).expect("root"),
            hex!("13bf87d2910e2a3df6032397a3a2403ffb2de8d7afb1733bf9aad334d487d1ac")
        );
    }

    #[test]
    fn test_single_leaf_is_root() {
        let leaves = leaf_set(1);
        let tree = MerkleTree::build(&leaves).expect("build");
        assert_eq!(tree.root(), leaves[0]);
        assert!(tree.prove(0).expect("proof").is_empty());
        assert!(verify(&tree.root(), &leaves[0], &[]));
    }

    #[test]
    fn test_empty_tree_rejected() {
        assert_eq!(MerkleTree::build(&[]), Err(CryptoError::EmptyTree));
    }

    #[test]
    fn test_roundtrip_all_sizes_and_positions() {
        for count in 1..=21u8 {
            let leaves = leaf_set(count);
            let tree = MerkleTree::build(&leaves).expect("build");
            for (position, leaf) in leaves.iter().enumerate() {
                let proof = tree.prove(position).expect("proof");
                assert!(
                    verify(&tree.root(), leaf, &proof),
                    "count {count} position {position}"
                );
            }
        }
    }

    #[test]
    fn test_insertion_order_matters() {
        let leaves = leaf_set(4);
        let mut reordered = leaves.clone();
        reordered.swap(0, 2);
        assert_ne!(
            build_root(&leaves).expect("root"),
            build_root(&reordered).expect("root")
        );
    }

    #[test]
    fn test_tampered_proof_or_leaf_fails() {
        let leaves = leaf_set(11);
        let tree = MerkleTree::build(&leaves).expect("build");
        let proof = tree.prove(4).expect("proof");
        let root = tree.root();

        for element in 0..proof.len() {
            for byte in [0usize, 17, 31] {
                let mut tampered = proof.clone();
                tampered[element][byte] ^= 0x01;
                assert!(!verify(&root, &leaves[4], &tampered));
            }
        }

        let mut bad_leaf = leaves[4];
        bad_leaf[0] ^= 0x80;
        assert!(!verify(&root, &bad_leaf, &proof));
    }

    #[test]
    fn test_prove_out_of_range() {
        let tree = MerkleTree::build(&leaf_set(3)).expect("build");
        assert_eq!(
            tree.prove(3),
            Err(CryptoError::LeafOutOfRange {
                position: 3,
                leaf_count: 3
            })
        );
    }

    #[test]
    fn test_promoted_node_shortens_proof() {
        let tree = MerkleTree::build(&leaf_set(5)).expect("build");
        // Leaf 4 is promoted twice before meeting the rest of the tree.
        assert_eq!(tree.prove(4).expect("proof").len(), 1);
        assert_eq!(tree.prove(0).expect("proof").len(), 3);
    }

    #[test]
    fn test_reconstruct_from_partial_disclosure() {
        let secrets: Vec<Secret> = (1..=10u8).map(|i| Secret::from_bytes([i; 32])).collect();
        let root = MerkleTree::from_secrets(&secrets).expect("build").root();

        let mut disclosure: Vec<DisclosedLeaf<'_>> = secrets[..5]
            .iter()
            .map(DisclosedLeaf::Revealed)
            .collect();
        disclosure.extend(secrets[5..].iter().map(|s| DisclosedLeaf::Hashed(s.leaf())));
        assert_eq!(reconstruct_root(&disclosure).expect("root"), root);

        let mut corrupted = disclosure.clone();
        if let DisclosedLeaf::Hashed(hash) = &mut corrupted[7] {
            hash[3] ^= 0xFF;
        }
        assert_ne!(reconstruct_root(&corrupted).expect("root"), root);
    }
}

//! Merkle tree over transaction identifiers.

use crate::hash::{sha256_bytes, sha256_hex};
use crate::transaction::Transaction;

/// Sentinel hashed for blocks with no transactions.
const EMPTY_BLOCK_TAG: &[u8] = b"empty_block";

/// Decode a transaction id into its leaf bytes.
///
/// Ordinary ids are 64-char hex digests and decode directly. Coinbase ids are
/// literal tags (`coinbase_<n>`), so they are hashed instead of decoded.
fn leaf_bytes(id: &str) -> Vec<u8> {
    match hex::decode(id) {
        Ok(bytes) if bytes.len() == 32 => bytes,
        _ => sha256_bytes(id.as_bytes()).to_vec(),
    }
}

/// Compute the merkle root of a transaction list as a hex digest.
///
/// An empty list yields `SHA-256("empty_block")`. At each level an odd node
/// count duplicates the last element; pairs are concatenated and hashed until
/// a single node remains.
pub fn merkle_root(transactions: &[Transaction]) -> String {
    if transactions.is_empty() {
        return sha256_hex(EMPTY_BLOCK_TAG);
    }

    let mut level: Vec<Vec<u8>> = transactions.iter().map(|tx| leaf_bytes(&tx.id)).collect();

    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let (left, right) = match pair {
                [left, right] => (left, right),
                // Odd count: pair the last element with itself
                [only] => (only, only),
                _ => unreachable!("chunks(2) yields one or two elements"),
            };
            let mut combined = Vec::with_capacity(left.len() + right.len());
            combined.extend_from_slice(left);
            combined.extend_from_slice(right);
            next.push(sha256_bytes(&combined).to_vec());
        }
        level = next;
    }

    hex::encode(&level[0])
}

/// A fully materialized merkle tree, kept for explorer-style inspection of a
/// block's transaction set and for membership proofs.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    /// All levels, leaves first.
    levels: Vec<Vec<Vec<u8>>>,
}

/// A membership proof for a single leaf.
#[derive(Debug, Clone)]
pub struct MerkleProof {
    /// The leaf being proven.
    pub leaf: Vec<u8>,
    /// Sibling hashes from leaf to root.
    pub siblings: Vec<Vec<u8>>,
    /// Direction for each sibling (true = sibling is on the right).
    pub directions: Vec<bool>,
}

impl MerkleTree {
    /// Build a tree from a transaction list.
    pub fn new(transactions: &[Transaction]) -> Self {
        if transactions.is_empty() {
            return Self {
                levels: vec![vec![sha256_bytes(EMPTY_BLOCK_TAG).to_vec()]],
            };
        }

        let mut levels = vec![transactions
            .iter()
            .map(|tx| leaf_bytes(&tx.id))
            .collect::<Vec<_>>()];

        while levels.last().map(Vec::len).unwrap_or(0) > 1 {
            let current = levels.last().expect("levels is non-empty");
            let mut next = Vec::with_capacity(current.len().div_ceil(2));
            for pair in current.chunks(2) {
                let left = &pair[0];
                let right = pair.get(1).unwrap_or(left);
                let mut combined = Vec::with_capacity(left.len() + right.len());
                combined.extend_from_slice(left);
                combined.extend_from_slice(right);
                next.push(sha256_bytes(&combined).to_vec());
            }
            levels.push(next);
        }

        Self { levels }
    }

    /// The hex root of the tree.
    pub fn root(&self) -> String {
        hex::encode(
            self.levels
                .last()
                .and_then(|l| l.first())
                .expect("tree always has a root"),
        )
    }

    /// The number of leaves.
    pub fn leaf_count(&self) -> usize {
        self.levels.first().map(Vec::len).unwrap_or(0)
    }

    /// The tree depth, counting the leaf level.
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Generate a proof for the leaf at the given index.
    pub fn proof(&self, index: usize) -> Option<MerkleProof> {
        if index >= self.leaf_count() {
            return None;
        }

        let leaf = self.levels[0][index].clone();
        let mut siblings = Vec::new();
        let mut directions = Vec::new();
        let mut idx = index;

        for level in &self.levels[..self.levels.len() - 1] {
            let sibling_idx = if idx % 2 == 0 { idx + 1 } else { idx - 1 };
            let is_right = idx % 2 == 0;

            let sibling = if sibling_idx < level.len() {
                level[sibling_idx].clone()
            } else {
                // Odd node count: the last node pairs with itself
                level[idx].clone()
            };

            siblings.push(sibling);
            directions.push(is_right);
            idx /= 2;
        }

        Some(MerkleProof {
            leaf,
            siblings,
            directions,
        })
    }

    /// Verify a proof against this tree's root.
    pub fn verify_proof(&self, proof: &MerkleProof) -> bool {
        verify_proof(&self.root(), proof)
    }
}

/// Verify a membership proof against a hex root.
pub fn verify_proof(root: &str, proof: &MerkleProof) -> bool {
    let mut current = proof.leaf.clone();

    for (sibling, is_right) in proof.siblings.iter().zip(proof.directions.iter()) {
        let mut combined = Vec::with_capacity(current.len() + sibling.len());
        if *is_right {
            combined.extend_from_slice(&current);
            combined.extend_from_slice(sibling);
        } else {
            combined.extend_from_slice(sibling);
            combined.extend_from_slice(&current);
        }
        current = sha256_bytes(&combined).to_vec();
    }

    hex::encode(current) == root
}

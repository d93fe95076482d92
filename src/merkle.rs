//! Incremental Merkle tree for the membership registry.
//!
//! The tree has a fixed depth and a fixed zero value for unfilled leaves.
//! Nodes are hashed with `Poseidon(left, right)`. Leaves are appended in
//! order; a leaf can be overwritten in place, which is how removal works, so
//! indices never shift.

use crate::error::{Result, RlnError};
use crate::utils::{field_to_hex, poseidon_hash2};
use ark_bn254::Fr;
use std::fmt;

/// Smallest supported tree depth.
pub const MIN_DEPTH: usize = 16;
/// Largest supported tree depth.
pub const MAX_DEPTH: usize = 32;

#[inline]
fn hash_pair(left: Fr, right: Fr) -> Fr {
    poseidon_hash2(left, right)
}

/// A Merkle proof for leaf inclusion.
///
/// `path_indices[i]` is 0 when the running node is the left child at level
/// `i` and 1 when it is the right child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleProof {
    pub root: Fr,
    pub leaf: Fr,
    pub siblings: Vec<Fr>,
    pub path_indices: Vec<u8>,
}

impl MerkleProof {
    /// Folds the leaf up the path and returns the resulting root.
    #[must_use]
    pub fn compute_root(&self) -> Fr {
        self.siblings
            .iter()
            .zip(&self.path_indices)
            .fold(self.leaf, |node, (sibling, index)| {
                if *index == 0 {
                    hash_pair(node, *sibling)
                } else {
                    hash_pair(*sibling, node)
                }
            })
    }

    /// The leaf index encoded by the path bits.
    #[must_use]
    pub fn leaf_index(&self) -> u64 {
        self.path_indices
            .iter()
            .enumerate()
            .fold(0u64, |acc, (level, bit)| acc | (u64::from(*bit) << level))
    }
}

impl fmt::Display for MerkleProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MerkleProof:\n  Leaf: {}\n  Root: {}\n  Index: {}\n  Siblings: {}",
            field_to_hex(&self.leaf),
            field_to_hex(&self.root),
            self.leaf_index(),
            self.siblings.len()
        )
    }
}

/// A fixed-depth, append-only binary Merkle tree with in-place updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncrementalMerkleTree {
    depth: usize,
    zero_value: Fr,
    /// `zeroes[level]` is the root of an empty subtree of height `level`.
    zeroes: Vec<Fr>,
    /// `nodes[0]` holds the leaves, `nodes[depth]` at most the root.
    nodes: Vec<Vec<Fr>>,
}

impl IncrementalMerkleTree {
    /// Creates an empty tree.
    ///
    /// # Errors
    /// Returns `InvalidInput` if `depth` is outside `MIN_DEPTH..=MAX_DEPTH`.
    pub fn new(depth: usize, zero_value: Fr) -> Result<Self> {
        if !(MIN_DEPTH..=MAX_DEPTH).contains(&depth) {
            return Err(RlnError::InvalidInput(format!(
                "tree depth must be between {MIN_DEPTH} and {MAX_DEPTH}, got {depth}"
            )));
        }

        let mut zeroes = Vec::with_capacity(depth + 1);
        zeroes.push(zero_value);
        for level in 0..depth {
            let below = zeroes[level];
            zeroes.push(hash_pair(below, below));
        }

        Ok(Self {
            depth,
            zero_value,
            zeroes,
            nodes: vec![Vec::new(); depth + 1],
        })
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    #[must_use]
    pub fn zero_value(&self) -> Fr {
        self.zero_value
    }

    #[must_use]
    pub fn capacity(&self) -> u64 {
        1u64 << self.depth
    }

    #[must_use]
    pub fn root(&self) -> Fr {
        self.nodes[self.depth]
            .first()
            .copied()
            .unwrap_or(self.zeroes[self.depth])
    }

    /// All leaves in index order, including zeroed ones.
    #[must_use]
    pub fn leaves(&self) -> &[Fr] {
        &self.nodes[0]
    }

    /// Index of the first leaf equal to `leaf`.
    #[must_use]
    pub fn index_of(&self, leaf: &Fr) -> Option<usize> {
        self.nodes[0].iter().position(|value| value == leaf)
    }

    fn node(&self, level: usize, index: usize) -> Fr {
        self.nodes[level]
            .get(index)
            .copied()
            .unwrap_or(self.zeroes[level])
    }

    fn recompute_path(&mut self, leaf_index: usize) {
        let mut index = leaf_index;
        let mut node = self.nodes[0][index];
        for level in 0..self.depth {
            let sibling = self.node(level, index ^ 1);
            node = if index & 1 == 0 {
                hash_pair(node, sibling)
            } else {
                hash_pair(sibling, node)
            };
            index >>= 1;
            let parents = &mut self.nodes[level + 1];
            if index < parents.len() {
                parents[index] = node;
            } else {
                parents.push(node);
            }
        }
    }

    /// Appends a leaf and returns its index.
    ///
    /// # Errors
    /// Returns `InvalidInput` if the tree is full.
    pub fn insert(&mut self, leaf: Fr) -> Result<usize> {
        let index = self.nodes[0].len();
        if index as u64 >= self.capacity() {
            return Err(RlnError::InvalidInput(format!(
                "tree of depth {} is full",
                self.depth
            )));
        }
        self.nodes[0].push(leaf);
        self.recompute_path(index);
        Ok(index)
    }

    /// Overwrites the leaf at `index`.
    ///
    /// # Errors
    /// Returns `InvalidInput` if `index` has not been filled yet.
    pub fn update(&mut self, index: usize, leaf: Fr) -> Result<()> {
        if index >= self.nodes[0].len() {
            return Err(RlnError::InvalidInput(format!(
                "leaf index {index} is out of range ({} leaves)",
                self.nodes[0].len()
            )));
        }
        self.nodes[0][index] = leaf;
        self.recompute_path(index);
        Ok(())
    }

    /// Replaces the leaf at `index` with the zero value.
    pub fn delete(&mut self, index: usize) -> Result<()> {
        self.update(index, self.zero_value)
    }

    /// Generates a Merkle proof for the leaf at `index`.
    ///
    /// # Errors
    /// Returns `InvalidInput` if `index` has not been filled yet.
    pub fn generate_proof(&self, index: usize) -> Result<MerkleProof> {
        if index >= self.nodes[0].len() {
            return Err(RlnError::InvalidInput(format!(
                "leaf index {index} is out of range ({} leaves)",
                self.nodes[0].len()
            )));
        }

        let mut siblings = Vec::with_capacity(self.depth);
        let mut path_indices = Vec::with_capacity(self.depth);
        let mut position = index;
        for level in 0..self.depth {
            path_indices.push((position & 1) as u8);
            siblings.push(self.node(level, position ^ 1));
            position >>= 1;
        }

        Ok(MerkleProof {
            root: self.root(),
            leaf: self.nodes[0][index],
            siblings,
            path_indices,
        })
    }

    /// Verify a Merkle proof against this tree's root.
    #[must_use]
    pub fn verify_proof(&self, proof: &MerkleProof) -> bool {
        proof.root == self.root()
            && proof.siblings.len() == self.depth
            && proof.path_indices.len() == self.depth
            && proof.compute_root() == self.root()
    }
}

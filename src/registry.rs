//! Membership registry: active and slashed identity commitments.
//!
//! The registry owns two Merkle trees and enforces that a commitment is never
//! present in both. Removal zeroes a leaf in place, so the index of every
//! other member is stable.

use crate::error::{Result, RlnError};
use crate::merkle::{IncrementalMerkleTree, MerkleProof};
use crate::types::ScalarKey;
use crate::utils::{field_to_decimal, field_to_hex, parse_field};
use ark_bn254::Fr;
use ark_ff::Zero;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default depth of both registry trees.
pub const DEFAULT_TREE_DEPTH: usize = 20;

/// Serialized registry state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryDocument {
    pub tree_depth: usize,
    pub zero_value: String,
    /// Active leaves in index order, zeroed leaves included.
    pub members: Vec<String>,
    /// Slashed leaves in index order, zeroed leaves included.
    pub slashed_members: Vec<String>,
}

#[derive(Debug, Clone)]
struct IndexedTree {
    tree: IncrementalMerkleTree,
    positions: HashMap<ScalarKey, usize>,
}

impl IndexedTree {
    fn new(depth: usize, zero_value: Fr) -> Result<Self> {
        Ok(Self {
            tree: IncrementalMerkleTree::new(depth, zero_value)?,
            positions: HashMap::new(),
        })
    }

    fn contains(&self, commitment: &Fr) -> bool {
        self.positions.contains_key(&ScalarKey::from(commitment))
    }

    fn index_of(&self, commitment: &Fr) -> Option<usize> {
        self.positions.get(&ScalarKey::from(commitment)).copied()
    }

    fn insert(&mut self, commitment: Fr) -> Result<usize> {
        let index = self.tree.insert(commitment)?;
        if commitment != self.tree.zero_value() {
            self.positions.insert(ScalarKey::from(commitment), index);
        }
        Ok(index)
    }

    fn delete(&mut self, commitment: &Fr) -> Option<usize> {
        let index = self.positions.remove(&ScalarKey::from(commitment))?;
        // Index came from a successful insert, so the leaf exists.
        self.tree.delete(index).ok()?;
        Some(index)
    }

    fn members(&self) -> Vec<Fr> {
        let zero = self.tree.zero_value();
        self.tree
            .leaves()
            .iter()
            .copied()
            .filter(|leaf| *leaf != zero)
            .collect()
    }
}

/// Active and slashed membership sets backed by incremental Merkle trees.
#[derive(Debug, Clone)]
pub struct Registry {
    active: IndexedTree,
    slashed: IndexedTree,
}

impl Registry {
    /// Creates an empty registry.
    ///
    /// # Errors
    /// Returns `InvalidInput` if `depth` is outside the supported range.
    pub fn new(depth: usize, zero_value: Fr) -> Result<Self> {
        Ok(Self {
            active: IndexedTree::new(depth, zero_value)?,
            slashed: IndexedTree::new(depth, zero_value)?,
        })
    }

    /// Creates an empty registry with the default depth and a zero value of 0.
    pub fn with_default_depth() -> Result<Self> {
        Self::new(DEFAULT_TREE_DEPTH, Fr::zero())
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.active.tree.depth()
    }

    #[must_use]
    pub fn zero_value(&self) -> Fr {
        self.active.tree.zero_value()
    }

    #[must_use]
    pub fn root(&self) -> Fr {
        self.active.tree.root()
    }

    #[must_use]
    pub fn slashed_root(&self) -> Fr {
        self.slashed.tree.root()
    }

    /// Active members in index order.
    #[must_use]
    pub fn members(&self) -> Vec<Fr> {
        self.active.members()
    }

    #[must_use]
    pub fn slashed_members(&self) -> Vec<Fr> {
        self.slashed.members()
    }

    #[must_use]
    pub fn member_count(&self) -> usize {
        self.active.positions.len()
    }

    #[must_use]
    pub fn is_member(&self, commitment: &Fr) -> bool {
        self.active.contains(commitment)
    }

    #[must_use]
    pub fn is_slashed(&self, commitment: &Fr) -> bool {
        self.slashed.contains(commitment)
    }

    /// Leaf index of an active member, or `None`.
    #[must_use]
    pub fn index_of(&self, commitment: &Fr) -> Option<usize> {
        self.active.index_of(commitment)
    }

    fn check_commitment(&self, commitment: &Fr) -> Result<()> {
        if *commitment == self.zero_value() {
            return Err(RlnError::InvalidInput(
                "the tree zero value cannot be used as a commitment".to_string(),
            ));
        }
        Ok(())
    }

    /// Appends a commitment to the active tree and returns its index.
    ///
    /// # Errors
    /// `AlreadySlashed` if the commitment was slashed, `AlreadyRegistered` if
    /// it is already active, `InvalidInput` for the zero value or a full tree.
    pub fn add_member(&mut self, commitment: Fr) -> Result<usize> {
        self.check_commitment(&commitment)?;
        if self.slashed.contains(&commitment) {
            return Err(RlnError::AlreadySlashed(field_to_hex(&commitment)));
        }
        if self.active.contains(&commitment) {
            return Err(RlnError::AlreadyRegistered(field_to_hex(&commitment)));
        }
        let index = self.active.insert(commitment)?;
        info!("Registered member {} at index {index}", field_to_hex(&commitment));
        Ok(index)
    }

    /// Adds each commitment in order. Earlier insertions are kept when a later one fails.
    pub fn add_members(&mut self, commitments: &[Fr]) -> Vec<Result<usize>> {
        commitments
            .iter()
            .map(|commitment| self.add_member(*commitment))
            .collect()
    }

    /// Records a commitment directly in the slashed tree.
    ///
    /// # Errors
    /// `AlreadyRegistered` if the commitment is an active member,
    /// `AlreadySlashed` if it is already slashed.
    pub fn add_slashed_member(&mut self, commitment: Fr) -> Result<usize> {
        self.check_commitment(&commitment)?;
        if self.active.contains(&commitment) {
            return Err(RlnError::AlreadyRegistered(field_to_hex(&commitment)));
        }
        if self.slashed.contains(&commitment) {
            return Err(RlnError::AlreadySlashed(field_to_hex(&commitment)));
        }
        let index = self.slashed.insert(commitment)?;
        debug!("Recorded slashed commitment {}", field_to_hex(&commitment));
        Ok(index)
    }

    pub fn add_slashed_members(&mut self, commitments: &[Fr]) -> Vec<Result<usize>> {
        commitments
            .iter()
            .map(|commitment| self.add_slashed_member(*commitment))
            .collect()
    }

    /// Moves an active member to the slashed tree.
    ///
    /// # Errors
    /// `NotAMember` if the commitment is not active. On any error neither
    /// tree is modified.
    pub fn slash_member(&mut self, commitment: Fr) -> Result<usize> {
        if !self.active.contains(&commitment) {
            return Err(RlnError::NotAMember(field_to_hex(&commitment)));
        }
        if self.slashed.tree.leaves().len() as u64 >= self.slashed.tree.capacity() {
            return Err(RlnError::InvalidInput("slashed tree is full".to_string()));
        }
        self.active
            .delete(&commitment)
            .ok_or_else(|| RlnError::NotAMember(field_to_hex(&commitment)))?;
        let index = self.slashed.insert(commitment)?;
        info!("Slashed member {}", field_to_hex(&commitment));
        Ok(index)
    }

    /// Withdraws an active member without marking it slashed.
    pub fn remove_member(&mut self, commitment: Fr) -> Result<usize> {
        let index = self
            .active
            .delete(&commitment)
            .ok_or_else(|| RlnError::NotAMember(field_to_hex(&commitment)))?;
        info!("Removed member {} from index {index}", field_to_hex(&commitment));
        Ok(index)
    }

    /// Membership proof for an active commitment.
    ///
    /// # Errors
    /// `MemberNotFound` if the commitment is not active. The zero value is
    /// never a member.
    pub fn generate_merkle_proof(&self, commitment: Fr) -> Result<MerkleProof> {
        if commitment == self.zero_value() {
            return Err(RlnError::MemberNotFound(
                "the tree zero value is never a member".to_string(),
            ));
        }
        let index = self
            .active
            .index_of(&commitment)
            .ok_or_else(|| RlnError::MemberNotFound(field_to_hex(&commitment)))?;
        self.active.tree.generate_proof(index)
    }

    #[must_use]
    pub fn verify_merkle_proof(&self, proof: &MerkleProof) -> bool {
        self.active.tree.verify_proof(proof)
    }

    #[must_use]
    pub fn to_document(&self) -> RegistryDocument {
        RegistryDocument {
            tree_depth: self.depth(),
            zero_value: field_to_decimal(&self.zero_value()),
            members: self.active.tree.leaves().iter().map(field_to_decimal).collect(),
            slashed_members: self
                .slashed
                .tree
                .leaves()
                .iter()
                .map(field_to_decimal)
                .collect(),
        }
    }

    /// Rebuilds a registry from its document, reproducing both roots exactly.
    ///
    /// # Errors
    /// `MalformedRegistry` on any structural problem.
    pub fn from_document(document: &RegistryDocument) -> Result<Self> {
        let malformed = |e: RlnError| RlnError::MalformedRegistry(e.to_string());

        let zero_value = parse_field(&document.zero_value).map_err(malformed)?;
        let mut registry = Self::new(document.tree_depth, zero_value).map_err(malformed)?;

        let parse_all = |values: &[String]| -> Result<Vec<Fr>> {
            values
                .iter()
                .map(|value| parse_field(value).map_err(malformed))
                .collect()
        };
        let capacity = registry.active.tree.capacity();
        let lists = [
            ("members", &document.members),
            ("slashedMembers", &document.slashed_members),
        ];
        for (name, list) in lists {
            if list.len() as u64 > capacity {
                return Err(RlnError::MalformedRegistry(format!(
                    "{} {name} exceed tree capacity {capacity}",
                    list.len()
                )));
            }
        }
        let members = parse_all(&document.members)?;
        let slashed = parse_all(&document.slashed_members)?;

        for commitment in slashed {
            if commitment != zero_value && registry.slashed.contains(&commitment) {
                return Err(RlnError::MalformedRegistry(format!(
                    "duplicate slashed commitment {}",
                    field_to_hex(&commitment)
                )));
            }
            registry.slashed.insert(commitment).map_err(malformed)?;
        }
        for commitment in members {
            if commitment != zero_value {
                if registry.slashed.contains(&commitment) {
                    return Err(RlnError::MalformedRegistry(format!(
                        "commitment {} is both active and slashed",
                        field_to_hex(&commitment)
                    )));
                }
                if registry.active.contains(&commitment) {
                    return Err(RlnError::MalformedRegistry(format!(
                        "duplicate member {}",
                        field_to_hex(&commitment)
                    )));
                }
            }
            registry.active.insert(commitment).map_err(malformed)?;
        }

        debug!(
            "Imported registry with {} members and {} slashed",
            registry.member_count(),
            registry.slashed.positions.len()
        );
        Ok(registry)
    }

    /// Serializes the registry to JSON.
    pub fn export_json(&self) -> Result<String> {
        serde_json::to_string(&self.to_document())
            .map_err(|e| RlnError::MalformedRegistry(e.to_string()))
    }

    pub fn import_json(json: &str) -> Result<Self> {
        let document: RegistryDocument =
            serde_json::from_str(json).map_err(|e| RlnError::MalformedRegistry(e.to_string()))?;
        Self::from_document(&document)
    }
}

/// One-shot membership proof over an ad-hoc leaf list.
///
/// # Errors
/// `MemberNotFound` if `leaf` is the zero value or absent from `leaves`.
pub fn generate_merkle_proof_for(
    depth: usize,
    zero_value: Fr,
    leaves: &[Fr],
    leaf: Fr,
) -> Result<MerkleProof> {
    if leaf == zero_value {
        return Err(RlnError::MemberNotFound(
            "the tree zero value is never a member".to_string(),
        ));
    }
    let mut tree = IncrementalMerkleTree::new(depth, zero_value)?;
    for value in leaves {
        tree.insert(*value)?;
    }
    let index = tree
        .index_of(&leaf)
        .ok_or_else(|| RlnError::MemberNotFound(field_to_hex(&leaf)))?;
    tree.generate_proof(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEPTH: usize = 16;

    fn registry() -> Registry {
        Registry::new(DEPTH, Fr::zero()).unwrap()
    }

    #[test]
    fn test_add_member_assigns_sequential_indices() {
        let mut registry = registry();
        assert_eq!(registry.add_member(Fr::from(10u64)).unwrap(), 0);
        assert_eq!(registry.add_member(Fr::from(11u64)).unwrap(), 1);
        assert_eq!(registry.index_of(&Fr::from(11u64)), Some(1));
        assert_eq!(registry.index_of(&Fr::from(12u64)), None);
    }

    #[test]
    fn test_slashed_then_add_fails() {
        let mut registry = registry();
        registry.add_slashed_member(Fr::from(5u64)).unwrap();
        assert!(matches!(
            registry.add_member(Fr::from(5u64)),
            Err(RlnError::AlreadySlashed(_))
        ));
    }

    #[test]
    fn test_add_then_slashed_fails() {
        let mut registry = registry();
        registry.add_member(Fr::from(5u64)).unwrap();
        assert!(matches!(
            registry.add_slashed_member(Fr::from(5u64)),
            Err(RlnError::AlreadyRegistered(_))
        ));
    }

    #[test]
    fn test_duplicate_member_rejected() {
        let mut registry = registry();
        registry.add_member(Fr::from(5u64)).unwrap();
        assert!(matches!(
            registry.add_member(Fr::from(5u64)),
            Err(RlnError::AlreadyRegistered(_))
        ));
    }

    #[test]
    fn test_add_members_partial_failure_keeps_prior_insertions() {
        let mut registry = registry();
        registry.add_slashed_member(Fr::from(2u64)).unwrap();
        let results = registry.add_members(&[Fr::from(1u64), Fr::from(2u64), Fr::from(3u64)]);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(RlnError::AlreadySlashed(_))));
        assert!(results[2].is_ok());
        assert_eq!(registry.members(), vec![Fr::from(1u64), Fr::from(3u64)]);
    }

    #[test]
    fn test_slash_member_moves_commitment() {
        let mut registry = registry();
        registry.add_member(Fr::from(1u64)).unwrap();
        registry.add_member(Fr::from(2u64)).unwrap();
        registry.add_member(Fr::from(3u64)).unwrap();
        let root_before = registry.root();
        let slashed_root_before = registry.slashed_root();

        registry.slash_member(Fr::from(2u64)).unwrap();

        assert_ne!(registry.root(), root_before);
        assert_ne!(registry.slashed_root(), slashed_root_before);
        assert!(registry.is_slashed(&Fr::from(2u64)));
        assert!(!registry.is_member(&Fr::from(2u64)));
        assert_eq!(registry.index_of(&Fr::from(3u64)), Some(2));
        assert!(matches!(
            registry.add_member(Fr::from(2u64)),
            Err(RlnError::AlreadySlashed(_))
        ));
    }

    #[test]
    fn test_slash_non_member_fails() {
        let mut registry = registry();
        assert!(matches!(
            registry.slash_member(Fr::from(9u64)),
            Err(RlnError::NotAMember(_))
        ));
        assert!(registry.slashed_members().is_empty());
    }

    #[test]
    fn test_remove_member_zeroes_leaf() {
        let mut registry = registry();
        registry.add_member(Fr::from(1u64)).unwrap();
        registry.add_member(Fr::from(2u64)).unwrap();
        assert_eq!(registry.remove_member(Fr::from(1u64)).unwrap(), 0);
        assert!(!registry.is_slashed(&Fr::from(1u64)));
        assert_eq!(registry.index_of(&Fr::from(2u64)), Some(1));
        assert!(matches!(
            registry.remove_member(Fr::from(1u64)),
            Err(RlnError::NotAMember(_))
        ));
    }

    #[test]
    fn test_merkle_proof_for_member() {
        let mut registry = registry();
        for value in [100u64, 101, 102] {
            registry.add_member(Fr::from(value)).unwrap();
        }
        let proof = registry.generate_merkle_proof(Fr::from(101u64)).unwrap();
        assert_eq!(proof.root, registry.root());
        assert_eq!(proof.compute_root(), registry.root());
        assert!(registry.verify_merkle_proof(&proof));
    }

    #[test]
    fn test_merkle_proof_rejects_zero_and_absent() {
        let mut registry = registry();
        registry.add_member(Fr::from(1u64)).unwrap();
        registry.remove_member(Fr::from(1u64)).unwrap();
        assert!(matches!(
            registry.generate_merkle_proof(Fr::zero()),
            Err(RlnError::MemberNotFound(_))
        ));
        assert!(matches!(
            registry.generate_merkle_proof(Fr::from(1u64)),
            Err(RlnError::MemberNotFound(_))
        ));
        assert!(matches!(
            registry.add_member(Fr::zero()),
            Err(RlnError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_one_shot_proof_matches_registry() {
        let mut registry = registry();
        let leaves = [Fr::from(7u64), Fr::from(8u64), Fr::from(9u64)];
        for leaf in leaves {
            registry.add_member(leaf).unwrap();
        }
        let one_shot =
            generate_merkle_proof_for(DEPTH, Fr::zero(), &leaves, Fr::from(9u64)).unwrap();
        assert_eq!(one_shot, registry.generate_merkle_proof(Fr::from(9u64)).unwrap());
        assert!(generate_merkle_proof_for(DEPTH, Fr::zero(), &leaves, Fr::zero()).is_err());
    }

    #[test]
    fn test_export_import_reproduces_roots() {
        let mut registry = registry();
        for value in 1u64..=5 {
            registry.add_member(Fr::from(value)).unwrap();
        }
        registry.slash_member(Fr::from(3u64)).unwrap();
        registry.remove_member(Fr::from(4u64)).unwrap();
        registry.add_slashed_member(Fr::from(42u64)).unwrap();

        let json = registry.export_json().unwrap();
        let imported = Registry::import_json(&json).unwrap();

        assert_eq!(imported.root(), registry.root());
        assert_eq!(imported.slashed_root(), registry.slashed_root());
        assert_eq!(imported.members(), registry.members());
        assert_eq!(imported.index_of(&Fr::from(5u64)), Some(4));
        assert_eq!(imported.to_document(), registry.to_document());
    }

    #[test]
    fn test_import_rejects_overlap_and_bad_depth() {
        let overlapping = RegistryDocument {
            tree_depth: DEPTH,
            zero_value: "0".to_string(),
            members: vec!["5".to_string()],
            slashed_members: vec!["5".to_string()],
        };
        assert!(matches!(
            Registry::from_document(&overlapping),
            Err(RlnError::MalformedRegistry(_))
        ));

        let shallow = RegistryDocument {
            tree_depth: 4,
            zero_value: "0".to_string(),
            members: vec![],
            slashed_members: vec![],
        };
        assert!(matches!(
            Registry::from_document(&shallow),
            Err(RlnError::MalformedRegistry(_))
        ));

        assert!(matches!(
            Registry::import_json("{\"treeDepth\": 20}"),
            Err(RlnError::MalformedRegistry(_))
        ));
    }

    #[test]
    fn test_import_rejects_capacity_overflow() {
        let overflowing = RegistryDocument {
            tree_depth: DEPTH,
            zero_value: "0".to_string(),
            members: vec!["0".to_string(); (1 << DEPTH) + 1],
            slashed_members: vec![],
        };
        assert!(matches!(
            Registry::from_document(&overflowing),
            Err(RlnError::MalformedRegistry(_))
        ));

        let overflowing_slashed = RegistryDocument {
            members: vec![],
            slashed_members: vec!["0".to_string(); (1 << DEPTH) + 1],
            ..overflowing
        };
        assert!(matches!(
            Registry::from_document(&overflowing_slashed),
            Err(RlnError::MalformedRegistry(_))
        ));
    }

    #[test]
    fn test_add_slashed_members_reports_each_result() {
        let mut registry = registry();
        registry.add_member(Fr::from(2u64)).unwrap();
        let results =
            registry.add_slashed_members(&[Fr::from(1u64), Fr::from(2u64), Fr::from(1u64)]);
        assert_eq!(results[0].as_ref().unwrap(), &0);
        assert!(matches!(results[1], Err(RlnError::AlreadyRegistered(_))));
        assert!(matches!(results[2], Err(RlnError::AlreadySlashed(_))));
        assert_eq!(registry.slashed_members(), vec![Fr::from(1u64)]);
        assert!(registry.is_member(&Fr::from(2u64)));
    }
}

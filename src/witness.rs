//! RLN output computation and witness assembly.
//!
//! For a fixed identity and epoch the circuit evaluates the line
//! `y = a1 * x + secret`, where `x` is the signal hash. One signal per epoch
//! reveals a single point; two different signals reveal two points on the
//! same line and therefore the secret.

use crate::merkle::MerkleProof;
use crate::types::PublicSignals;
use crate::utils::{
    external_nullifier, field_from_be_bytes_reduced, gen_signal_hash, poseidon_hash2,
    serde_field, serde_field_vec,
};
use ark_bn254::Fr;
use serde::{Deserialize, Serialize};

/// Public share and nullifier for one signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RlnOutput {
    pub y_share: Fr,
    pub internal_nullifier: Fr,
}

/// Internal nullifier: `Poseidon(a1, rln_identifier)`.
#[inline]
#[must_use]
pub fn gen_nullifier(a1: Fr, rln_identifier: Fr) -> Fr {
    poseidon_hash2(a1, rln_identifier)
}

/// Computes the share `y = a1 * x + secret` and the nullifier for a signal hash.
#[must_use]
pub fn calculate_output(
    identity_secret: Fr,
    epoch: Fr,
    rln_identifier: Fr,
    signal_hash: Fr,
) -> RlnOutput {
    let a1 = poseidon_hash2(identity_secret, external_nullifier(epoch, rln_identifier));
    RlnOutput {
        y_share: a1 * signal_hash + identity_secret,
        internal_nullifier: gen_nullifier(a1, rln_identifier),
    }
}

/// Full private and public input set consumed by the prover.
///
/// Serializes to the JSON object expected by circom witness calculators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RlnWitness {
    #[serde(with = "serde_field")]
    pub identity_secret: Fr,
    #[serde(with = "serde_field_vec")]
    pub path_elements: Vec<Fr>,
    pub identity_path_index: Vec<u8>,
    #[serde(with = "serde_field")]
    pub x: Fr,
    #[serde(with = "serde_field")]
    pub epoch: Fr,
    #[serde(with = "serde_field")]
    pub rln_identifier: Fr,
}

impl RlnWitness {
    /// The public signals a correct prover outputs for this witness.
    #[must_use]
    pub fn public_signals(&self, merkle_root: Fr) -> PublicSignals {
        let output =
            calculate_output(self.identity_secret, self.epoch, self.rln_identifier, self.x);
        PublicSignals {
            y_share: output.y_share,
            merkle_root,
            internal_nullifier: output.internal_nullifier,
            signal_hash: self.x,
            epoch: self.epoch,
            rln_identifier: self.rln_identifier,
        }
    }
}

/// Assembles a witness.
///
/// With `should_hash` the signal is hashed with [`gen_signal_hash`];
/// otherwise it is read as a big-endian integer and reduced modulo the field.
#[must_use]
pub fn gen_witness(
    identity_secret: Fr,
    merkle_proof: &MerkleProof,
    epoch: Fr,
    rln_identifier: Fr,
    signal: &[u8],
    should_hash: bool,
) -> RlnWitness {
    let x = if should_hash {
        gen_signal_hash(signal)
    } else {
        field_from_be_bytes_reduced(signal)
    };
    RlnWitness {
        identity_secret,
        path_elements: merkle_proof.siblings.clone(),
        identity_path_index: merkle_proof.path_indices.clone(),
        x,
        epoch,
        rln_identifier,
    }
}

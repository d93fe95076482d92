//! Type definitions for the RLN protocol core.

use crate::codec;
use crate::utils::{field_to_bytes_be, identity_commitment, serde_field};
use ark_bn254::{Bn254, Fr, G1Affine, G2Affine};
use ark_ff::PrimeField;
use ark_std::UniformRand;
use rand::{CryptoRng, RngCore};
use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A participant's identity: a secret scalar and its commitment `Poseidon(secret)`.
///
/// Only the commitment is ever published; it is the registry leaf.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    secret: Fr,
    commitment: Fr,
}

impl Identity {
    /// Creates a fresh identity from a cryptographically secure RNG.
    pub fn new<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self::from_secret(Fr::rand(rng))
    }

    #[must_use]
    pub fn from_secret(secret: Fr) -> Self {
        Self {
            secret,
            commitment: identity_commitment(secret),
        }
    }

    #[must_use]
    pub fn secret(&self) -> Fr {
        self.secret
    }

    #[must_use]
    pub fn commitment(&self) -> Fr {
        self.commitment
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("commitment", &self.commitment)
            .finish_non_exhaustive()
    }
}

/// Canonical fixed-width key for a scalar: its 32-byte big-endian encoding.
///
/// Ordering of keys equals numeric ordering of the scalars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScalarKey([u8; 32]);

impl ScalarKey {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    #[must_use]
    pub fn to_field(&self) -> Fr {
        Fr::from_be_bytes_mod_order(&self.0)
    }
}

impl From<Fr> for ScalarKey {
    fn from(value: Fr) -> Self {
        Self(field_to_bytes_be(&value))
    }
}

impl From<&Fr> for ScalarKey {
    fn from(value: &Fr) -> Self {
        Self(field_to_bytes_be(value))
    }
}

/// Public outputs of an RLN proof, in circuit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicSignals {
    #[serde(with = "serde_field")]
    pub y_share: Fr,
    #[serde(with = "serde_field")]
    pub merkle_root: Fr,
    #[serde(with = "serde_field")]
    pub internal_nullifier: Fr,
    #[serde(with = "serde_field")]
    pub signal_hash: Fr,
    #[serde(with = "serde_field")]
    pub epoch: Fr,
    #[serde(with = "serde_field")]
    pub rln_identifier: Fr,
}

impl PublicSignals {
    /// The signals as the ordered public-input vector fed to a verifier.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Fr> {
        vec![
            self.y_share,
            self.merkle_root,
            self.internal_nullifier,
            self.signal_hash,
            self.epoch,
            self.rln_identifier,
        ]
    }
}

/// Groth16 proof points over BN254.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnarkProof {
    pub a: G1Affine,
    pub b: G2Affine,
    pub c: G1Affine,
}

impl From<ark_groth16::Proof<Bn254>> for SnarkProof {
    fn from(proof: ark_groth16::Proof<Bn254>) -> Self {
        Self {
            a: proof.a,
            b: proof.b,
            c: proof.c,
        }
    }
}

impl From<SnarkProof> for ark_groth16::Proof<Bn254> {
    fn from(proof: SnarkProof) -> Self {
        ark_groth16::Proof {
            a: proof.a,
            b: proof.b,
            c: proof.c,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnarkProofJson {
    pi_a: String,
    pi_b: String,
    pi_c: String,
}

impl Serialize for SnarkProof {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        SnarkProofJson {
            pi_a: hex::encode(codec::compress_g1(&self.a)),
            pi_b: hex::encode(codec::compress_g2(&self.b)),
            pi_c: hex::encode(codec::compress_g1(&self.c)),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SnarkProof {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = SnarkProofJson::deserialize(deserializer)?;
        let decode = |name: &str, text: &str| {
            hex::decode(text).map_err(|e| D::Error::custom(format!("invalid {name} hex: {e}")))
        };
        let a = codec::decompress_g1(&decode("piA", &json.pi_a)?).map_err(D::Error::custom)?;
        let b = codec::decompress_g2(&decode("piB", &json.pi_b)?).map_err(D::Error::custom)?;
        let c = codec::decompress_g1(&decode("piC", &json.pi_c)?).map_err(D::Error::custom)?;
        Ok(Self { a, b, c })
    }
}

/// A complete RLN proof: the SNARK points plus the public signals they attest to.
///
/// This is the unit exchanged between peers and stored in the breach cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RlnFullProof {
    pub snark_proof: SnarkProof,
    pub public_signals: PublicSignals,
}

impl RlnFullProof {
    #[must_use]
    pub fn epoch(&self) -> Fr {
        self.public_signals.epoch
    }

    #[must_use]
    pub fn internal_nullifier(&self) -> Fr {
        self.public_signals.internal_nullifier
    }

    #[must_use]
    pub fn rln_identifier(&self) -> Fr {
        self.public_signals.rln_identifier
    }

    /// The share `(x, y)` this proof publishes.
    #[must_use]
    pub fn share(&self) -> (Fr, Fr) {
        (
            self.public_signals.signal_hash,
            self.public_signals.y_share,
        )
    }
}

//! Rate-Limiting Nullifier protocol core
//!
//! Members of a group register an identity commitment in a Merkle tree and
//! may publish one signal per epoch. Each signal carries a point on a line
//! whose intercept is the member's secret, so a second signal in the same
//! epoch reveals the secret and lets anyone slash the member.
//!
//! # Components
//!
//! - [`Registry`]: active and slashed membership trees
//! - [`witness`]: outputs, nullifiers and prover witnesses
//! - [`Cache`]: per-epoch breach detection
//! - [`recovery`]: Shamir recovery of the secret from two shares
//! - [`codec`]: 320-byte compressed wire format for full proofs
//! - [`Rln`]: one identity's view of a deployment with pluggable backends
//!
//! # Example
//!
//! ```no_run
//! use rln_core::{Identity, Registry};
//!
//! let identity = Identity::new(&mut rand::thread_rng());
//! let mut registry = Registry::with_default_depth().unwrap();
//! registry.add_member(identity.commitment()).unwrap();
//! ```

pub mod backend;
pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod merkle;
pub mod recovery;
pub mod registry;
pub mod rln;
pub mod types;
pub mod utils;
pub mod witness;


pub use backend::{Groth16Verifier, PendingProof, ProvingBackend, VerificationBackend};
pub use cache::{AddProofResult, Cache, ProofStatus};
pub use codec::{deserialize_proof, serialize_proof, FULL_PROOF_SIZE};
pub use error::{Result, RlnError};
pub use merkle::{IncrementalMerkleTree, MerkleProof};
pub use recovery::{retrieve_secret, shamir_recovery};
pub use registry::Registry;
pub use rln::Rln;
pub use types::{Identity, PublicSignals, RlnFullProof, SnarkProof};
pub use utils::{gen_signal_hash, poseidon_hash, poseidon_hash1, poseidon_hash2};
pub use witness::{calculate_output, gen_nullifier, gen_witness, RlnWitness};

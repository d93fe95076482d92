//! Seams to the external proving and verification backends.
//!
//! The core never proves anything itself. It hands an [`RlnWitness`] to a
//! [`ProvingBackend`] and a finished [`RlnFullProof`] to a
//! [`VerificationBackend`]. Proving is slow and CPU-bound, so
//! [`spawn_prove`] runs it on a dedicated thread and returns a handle that
//! is both awaitable and blockable.

use crate::error::{BackendError, Result, RlnError};
use crate::types::{RlnFullProof, SnarkProof};
use crate::witness::RlnWitness;
use ark_bn254::Bn254;
use ark_groth16::{prepare_verifying_key, Groth16, PreparedVerifyingKey, VerifyingKey};
use ark_serialize::CanonicalDeserialize;
use log::debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread;
use tokio::sync::oneshot::{self, error::TryRecvError};

/// Produces a Groth16 proof from a witness (e.g. a circom/zkey prover).
pub trait ProvingBackend: Send + Sync {
    fn prove(&self, witness: &RlnWitness) -> std::result::Result<SnarkProof, BackendError>;
}

/// Checks a full proof against a verification key.
pub trait VerificationBackend: Send + Sync {
    fn verify(&self, proof: &RlnFullProof) -> std::result::Result<bool, BackendError>;
}

/// Groth16 verification over BN254 with the public signals as public inputs.
#[derive(Clone)]
pub struct Groth16Verifier {
    pvk: Arc<PreparedVerifyingKey<Bn254>>,
}

impl Groth16Verifier {
    #[must_use]
    pub fn new(vk: &VerifyingKey<Bn254>) -> Self {
        Self {
            pvk: Arc::new(prepare_verifying_key(vk)),
        }
    }

    /// Loads a verifying key from its arkworks compressed encoding.
    ///
    /// # Errors
    /// `BackendFailure` if the key does not deserialize.
    pub fn from_compressed_bytes(bytes: &[u8]) -> Result<Self> {
        let vk = VerifyingKey::<Bn254>::deserialize_compressed(bytes)
            .map_err(|e| RlnError::BackendFailure(format!("invalid verifying key: {e}").into()))?;
        Ok(Self::new(&vk))
    }
}

impl VerificationBackend for Groth16Verifier {
    fn verify(&self, proof: &RlnFullProof) -> std::result::Result<bool, BackendError> {
        let inputs = proof.public_signals.to_vec();
        if inputs.len() + 1 != self.pvk.vk.gamma_abc_g1.len() {
            return Err(format!(
                "verifying key expects {} public inputs, proof carries {}",
                self.pvk.vk.gamma_abc_g1.len().saturating_sub(1),
                inputs.len()
            )
            .into());
        }
        let groth16_proof: ark_groth16::Proof<Bn254> = proof.snark_proof.into();
        let valid = Groth16::<Bn254>::verify_proof(&self.pvk, &groth16_proof, &inputs)
            .map_err(|e| format!("Groth16 verification error: {e}"))?;
        debug!("Groth16 verification result: {valid}");
        Ok(valid)
    }
}

/// Handle to a proof being generated on a worker thread.
///
/// Await it from async code, or call [`PendingProof::wait`] from a plain
/// thread.
pub struct PendingProof {
    receiver: oneshot::Receiver<Result<SnarkProof>>,
}

fn worker_exited() -> RlnError {
    RlnError::BackendFailure("proving worker exited without a result".into())
}

impl PendingProof {
    /// Blocks until the worker finishes. Must not be called inside an async runtime.
    pub fn wait(self) -> Result<SnarkProof> {
        self.receiver.blocking_recv().unwrap_or_else(|_| Err(worker_exited()))
    }

    /// Returns the result if the worker has finished, otherwise `None`.
    pub fn try_wait(&mut self) -> Option<Result<SnarkProof>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(worker_exited())),
        }
    }
}

impl Future for PendingProof {
    type Output = Result<SnarkProof>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(worker_exited())))
    }
}

/// Runs the backend on the calling thread and wraps its error.
pub fn prove(backend: &dyn ProvingBackend, witness: &RlnWitness) -> Result<SnarkProof> {
    backend.prove(witness).map_err(RlnError::BackendFailure)
}

/// Starts proving on a dedicated thread.
pub fn spawn_prove(backend: Arc<dyn ProvingBackend>, witness: RlnWitness) -> PendingProof {
    let (sender, receiver) = oneshot::channel();
    thread::spawn(move || {
        let result = prove(backend.as_ref(), &witness);
        // The caller may have dropped the handle.
        let _ = sender.send(result);
    });
    PendingProof { receiver }
}

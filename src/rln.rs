//! Per-identity RLN node tying the registry, cache and backends together.

use crate::backend::{self, Groth16Verifier, PendingProof, ProvingBackend, VerificationBackend};
use crate::cache::{AddProofResult, Cache};
use crate::config::{Config, DEFAULT_EPOCH_GRANULARITY_SECS};
use crate::error::{Result, RlnError};
use crate::registry::Registry;
use crate::types::{Identity, PublicSignals, RlnFullProof};
use crate::utils::{self, gen_signal_hash, identity_commitment};
use crate::witness::{self, RlnWitness};
use anyhow::Context;
use ark_bn254::Fr;
use log::{debug, info};
use parking_lot::{Mutex, MutexGuard};
use std::fs;
use std::sync::Arc;

pub struct Rln {
    identity: Identity,
    rln_identifier: Fr,
    registry: Mutex<Registry>,
    cache: Mutex<Cache>,
    epoch_granularity_secs: u64,
    prover: Option<Arc<dyn ProvingBackend>>,
    verifier: Option<Arc<dyn VerificationBackend>>,
}

impl Rln {
    pub fn new(
        identity: Identity,
        rln_identifier: Fr,
        registry: Registry,
        cache_length: usize,
    ) -> Self {
        Self {
            identity,
            rln_identifier,
            registry: Mutex::new(registry),
            cache: Mutex::new(Cache::new(rln_identifier, cache_length)),
            epoch_granularity_secs: DEFAULT_EPOCH_GRANULARITY_SECS,
            prover: None,
            verifier: None,
        }
    }

    /// Builds an instance with an empty registry shaped by `config`.
    ///
    /// When `keys.verification_key` is set, the arkworks-compressed key at
    /// that path becomes the verification backend.
    pub fn from_config(identity: Identity, config: &Config) -> anyhow::Result<Self> {
        config.validate()?;
        let registry = Registry::new(config.tree_depth(), config.zero_value()?)?;
        let mut rln = Self::new(
            identity,
            config.rln_identifier()?,
            registry,
            config.cache.cache_length,
        )
        .with_epoch_granularity(config.protocol.epoch_granularity_secs);

        if let Some(path) = &config.keys.verification_key {
            let bytes = fs::read(path).with_context(|| {
                format!("Failed to read verification key: {}", path.display())
            })?;
            let verifier = Groth16Verifier::from_compressed_bytes(&bytes).with_context(|| {
                format!("Invalid verification key: {}", path.display())
            })?;
            info!("Loaded verification key from {}", path.display());
            rln = rln.with_verifier(Arc::new(verifier));
        }
        Ok(rln)
    }

    /// Sets the epoch length used by [`Rln::current_epoch`]. Zero is rejected there.
    #[must_use]
    pub fn with_epoch_granularity(mut self, granularity_secs: u64) -> Self {
        self.epoch_granularity_secs = granularity_secs;
        self
    }

    #[must_use]
    pub fn with_prover(mut self, prover: Arc<dyn ProvingBackend>) -> Self {
        self.prover = Some(prover);
        self
    }

    #[must_use]
    pub fn with_verifier(mut self, verifier: Arc<dyn VerificationBackend>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    #[must_use]
    pub fn rln_identifier(&self) -> Fr {
        self.rln_identifier
    }

    #[must_use]
    pub fn epoch_granularity_secs(&self) -> u64 {
        self.epoch_granularity_secs
    }

    #[must_use]
    pub fn has_verifier(&self) -> bool {
        self.verifier.is_some()
    }

    /// Epoch containing the current system time.
    pub fn current_epoch(&self) -> Result<Fr> {
        utils::current_epoch(self.epoch_granularity_secs)
    }

    pub fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock()
    }

    pub fn cache(&self) -> MutexGuard<'_, Cache> {
        self.cache.lock()
    }

    /// Adds this node's own commitment to the registry.
    pub fn register(&self) -> Result<usize> {
        let index = self.registry.lock().add_member(self.identity.commitment())?;
        info!("Registered own commitment at index {index}");
        Ok(index)
    }

    pub fn gen_witness(&self, epoch: Fr, signal: &[u8]) -> Result<RlnWitness> {
        let merkle_proof = self
            .registry
            .lock()
            .generate_merkle_proof(self.identity.commitment())?;
        Ok(witness::gen_witness(
            self.identity.secret(),
            &merkle_proof,
            epoch,
            self.rln_identifier,
            signal,
            true,
        ))
    }

    /// Generates a proof on the calling thread.
    pub fn gen_proof(&self, epoch: Fr, signal: &[u8]) -> Result<RlnFullProof> {
        let prover = self.prover()?;
        let (witness, root) = self.witness_with_root(epoch, signal)?;
        let snark_proof = backend::prove(prover.as_ref(), &witness)?;
        Ok(RlnFullProof {
            snark_proof,
            public_signals: witness.public_signals(root),
        })
    }

    /// Generates a proof on a worker thread. The public signals are fixed
    /// against the registry root at call time.
    pub fn spawn_gen_proof(
        &self,
        epoch: Fr,
        signal: &[u8],
    ) -> Result<(PublicSignals, PendingProof)> {
        let prover = Arc::clone(self.prover()?);
        let (witness, root) = self.witness_with_root(epoch, signal)?;
        let public_signals = witness.public_signals(root);
        Ok((public_signals, backend::spawn_prove(prover, witness)))
    }

    /// Checks that `proof` was made for this deployment, this signal and the
    /// current registry root, then asks the verification backend.
    pub fn verify_proof(&self, proof: &RlnFullProof, signal: &[u8]) -> Result<bool> {
        let signals = &proof.public_signals;
        if signals.rln_identifier != self.rln_identifier {
            debug!("Proof rejected: foreign rate-limit identifier");
            return Ok(false);
        }
        if signals.signal_hash != gen_signal_hash(signal) {
            debug!("Proof rejected: signal hash does not match signal");
            return Ok(false);
        }
        if signals.merkle_root != self.registry.lock().root() {
            debug!("Proof rejected: stale or unknown merkle root");
            return Ok(false);
        }
        let verifier = self.verifier.as_ref().ok_or_else(|| {
            RlnError::BackendFailure("no verification backend configured".into())
        })?;
        verifier.verify(proof).map_err(RlnError::BackendFailure)
    }

    pub fn save_proof(&self, proof: &RlnFullProof) -> Result<AddProofResult> {
        self.cache.lock().add_proof(proof)
    }

    /// Moves the member behind `identity_secret` to the slashed tree.
    pub fn slash(&self, identity_secret: Fr) -> Result<usize> {
        self.registry
            .lock()
            .slash_member(identity_commitment(identity_secret))
    }

    fn prover(&self) -> Result<&Arc<dyn ProvingBackend>> {
        self.prover
            .as_ref()
            .ok_or_else(|| RlnError::BackendFailure("no proving backend configured".into()))
    }

    fn witness_with_root(&self, epoch: Fr, signal: &[u8]) -> Result<(RlnWitness, Fr)> {
        let registry = self.registry.lock();
        let merkle_proof = registry.generate_merkle_proof(self.identity.commitment())?;
        let witness = witness::gen_witness(
            self.identity.secret(),
            &merkle_proof,
            epoch,
            self.rln_identifier,
            signal,
            true,
        );
        Ok((witness, merkle_proof.root))
    }
}

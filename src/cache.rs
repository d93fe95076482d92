//! Epoch-partitioned breach-detection cache.
//!
//! Proofs are grouped by epoch, then by internal nullifier. Two proofs in one
//! bucket with different signal hashes are a rate-limit breach, and their
//! shares reveal the sender's identity secret. Epochs are retained in
//! insertion order and the oldest is evicted once more than `cache_length`
//! epochs are held.

use crate::error::{Result, RlnError};
use crate::recovery::retrieve_secret;
use crate::types::{RlnFullProof, ScalarKey};
use crate::utils::{field_to_decimal, field_to_hex, parse_field};
use ark_bn254::Fr;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

/// Default number of epochs retained.
pub const DEFAULT_CACHE_LENGTH: usize = 100;

type Partition = BTreeMap<ScalarKey, Vec<RlnFullProof>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProofStatus {
    /// First proof for this nullifier in this epoch.
    Added,
    /// Second distinct signal for this nullifier; the secret was recovered.
    Breach,
    /// Duplicate signal, or a proof for another deployment.
    Invalid,
}

impl fmt::Display for ProofStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ProofStatus::Added => "ADDED",
            ProofStatus::Breach => "BREACH",
            ProofStatus::Invalid => "INVALID",
        };
        f.write_str(text)
    }
}

/// Outcome of [`Cache::add_proof`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddProofResult {
    pub status: ProofStatus,
    pub nullifier: Fr,
    /// Recovered identity secret, set only for [`ProofStatus::Breach`].
    pub secret: Option<Fr>,
    pub msg: String,
}

/// Persisted form of a [`Cache`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheDocument {
    pub cache_length: usize,
    pub rln_identifier: String,
    pub epochs: Vec<String>,
    pub cache: BTreeMap<String, BTreeMap<String, Vec<RlnFullProof>>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cache {
    cache_length: usize,
    rln_identifier: Fr,
    epochs: VecDeque<ScalarKey>,
    partitions: BTreeMap<ScalarKey, Partition>,
}

impl Cache {
    /// Creates an empty cache. A `cache_length` of 0 disables eviction.
    #[must_use]
    pub fn new(rln_identifier: Fr, cache_length: usize) -> Self {
        Self {
            cache_length,
            rln_identifier,
            epochs: VecDeque::new(),
            partitions: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn cache_length(&self) -> usize {
        self.cache_length
    }

    #[must_use]
    pub fn rln_identifier(&self) -> Fr {
        self.rln_identifier
    }

    /// Retained epochs, oldest first.
    #[must_use]
    pub fn epochs(&self) -> Vec<Fr> {
        self.epochs.iter().map(ScalarKey::to_field).collect()
    }

    #[must_use]
    pub fn contains_epoch(&self, epoch: &Fr) -> bool {
        self.partitions.contains_key(&ScalarKey::from(epoch))
    }

    /// Proofs recorded for a nullifier within an epoch, in arrival order.
    #[must_use]
    pub fn proofs(&self, epoch: &Fr, nullifier: &Fr) -> &[RlnFullProof] {
        self.partitions
            .get(&ScalarKey::from(epoch))
            .and_then(|partition| partition.get(&ScalarKey::from(nullifier)))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    fn track_epoch(&mut self, epoch: ScalarKey) {
        if self.partitions.contains_key(&epoch) {
            return;
        }
        self.epochs.push_back(epoch);
        if self.cache_length > 0 && self.epochs.len() > self.cache_length {
            if let Some(oldest) = self.epochs.front().copied() {
                debug!("Evicting epoch {}", field_to_decimal(&oldest.to_field()));
                self.remove_epoch_key(&oldest);
            }
        }
        self.partitions.insert(epoch, Partition::new());
    }

    /// Adds a proof and classifies it.
    ///
    /// Every accepted proof is appended to its bucket, duplicates included.
    ///
    /// # Errors
    /// Propagates secret-recovery failures.
    pub fn add_proof(&mut self, proof: &RlnFullProof) -> Result<AddProofResult> {
        let signals = &proof.public_signals;
        let nullifier = signals.internal_nullifier;

        if signals.rln_identifier != self.rln_identifier {
            return Ok(AddProofResult {
                status: ProofStatus::Invalid,
                nullifier,
                secret: None,
                msg: format!(
                    "proof is for rln identifier {}, cache tracks {}",
                    field_to_decimal(&signals.rln_identifier),
                    field_to_decimal(&self.rln_identifier)
                ),
            });
        }

        let epoch_key = ScalarKey::from(signals.epoch);
        self.track_epoch(epoch_key);

        let bucket = self
            .partitions
            .entry(epoch_key)
            .or_default()
            .entry(ScalarKey::from(nullifier))
            .or_default();

        let duplicate = bucket
            .iter()
            .any(|seen| seen.public_signals.signal_hash == signals.signal_hash);
        let first = bucket.first().copied();
        bucket.push(*proof);

        if duplicate {
            debug!("Duplicate signal for nullifier {}", field_to_hex(&nullifier));
            return Ok(AddProofResult {
                status: ProofStatus::Invalid,
                nullifier,
                secret: None,
                msg: "duplicate proof for this signal".to_string(),
            });
        }

        match first {
            None => Ok(AddProofResult {
                status: ProofStatus::Added,
                nullifier,
                secret: None,
                msg: "proof added to cache".to_string(),
            }),
            Some(first) => {
                let secret = retrieve_secret(&first, proof)?;
                warn!(
                    "Rate limit breach for nullifier {} in epoch {}",
                    field_to_hex(&nullifier),
                    field_to_decimal(&signals.epoch)
                );
                Ok(AddProofResult {
                    status: ProofStatus::Breach,
                    nullifier,
                    secret: Some(secret),
                    msg: "rate limit breach, identity secret recovered".to_string(),
                })
            }
        }
    }

    fn remove_epoch_key(&mut self, epoch: &ScalarKey) {
        self.partitions.remove(epoch);
        self.epochs.retain(|key| key != epoch);
    }

    /// Drops an epoch's partition. Absent epochs are ignored.
    pub fn remove_epoch(&mut self, epoch: &Fr) {
        self.remove_epoch_key(&ScalarKey::from(epoch));
    }

    #[must_use]
    pub fn to_document(&self) -> CacheDocument {
        let cache = self
            .partitions
            .iter()
            .map(|(epoch, partition)| {
                let buckets = partition
                    .iter()
                    .map(|(nullifier, proofs)| {
                        (field_to_decimal(&nullifier.to_field()), proofs.clone())
                    })
                    .collect();
                (field_to_decimal(&epoch.to_field()), buckets)
            })
            .collect();

        CacheDocument {
            cache_length: self.cache_length,
            rln_identifier: field_to_decimal(&self.rln_identifier),
            epochs: self
                .epochs
                .iter()
                .map(|epoch| field_to_decimal(&epoch.to_field()))
                .collect(),
            cache,
        }
    }

    /// Rebuilds a cache from its document.
    ///
    /// # Errors
    /// `MalformedCache` if partitions and the epoch list disagree, an epoch
    /// repeats, the list exceeds `cacheLength`, or a stored proof does not
    /// belong to its bucket.
    pub fn from_document(document: &CacheDocument) -> Result<Self> {
        let malformed = |e: RlnError| RlnError::MalformedCache(e.to_string());
        let rln_identifier = parse_field(&document.rln_identifier).map_err(malformed)?;

        let mut epochs = VecDeque::with_capacity(document.epochs.len());
        let mut listed = BTreeSet::new();
        for text in &document.epochs {
            let key = ScalarKey::from(parse_field(text).map_err(malformed)?);
            if !listed.insert(key) {
                return Err(RlnError::MalformedCache(format!(
                    "epoch {text} is listed more than once"
                )));
            }
            epochs.push_back(key);
        }
        if document.cache_length > 0 && epochs.len() > document.cache_length {
            return Err(RlnError::MalformedCache(format!(
                "{} epochs retained but cacheLength is {}",
                epochs.len(),
                document.cache_length
            )));
        }

        let mut partitions = BTreeMap::new();
        for (epoch_text, buckets) in &document.cache {
            let epoch = parse_field(epoch_text).map_err(malformed)?;
            let epoch_key = ScalarKey::from(epoch);
            if !listed.contains(&epoch_key) {
                return Err(RlnError::MalformedCache(format!(
                    "partition {epoch_text} is missing from the epoch list"
                )));
            }

            let mut partition = Partition::new();
            for (nullifier_text, proofs) in buckets {
                let nullifier = parse_field(nullifier_text).map_err(malformed)?;
                for proof in proofs {
                    let signals = &proof.public_signals;
                    if signals.epoch != epoch
                        || signals.internal_nullifier != nullifier
                        || signals.rln_identifier != rln_identifier
                    {
                        return Err(RlnError::MalformedCache(format!(
                            "proof under epoch {epoch_text}, nullifier {nullifier_text} \
                             does not match its bucket"
                        )));
                    }
                }
                if partition
                    .insert(ScalarKey::from(nullifier), proofs.clone())
                    .is_some()
                {
                    return Err(RlnError::MalformedCache(format!(
                        "nullifier {nullifier_text} appears twice in epoch {epoch_text}"
                    )));
                }
            }

            if partitions.insert(epoch_key, partition).is_some() {
                return Err(RlnError::MalformedCache(format!(
                    "epoch {epoch_text} has two partitions"
                )));
            }
        }

        if let Some(orphan) = epochs.iter().find(|key| !partitions.contains_key(*key)) {
            return Err(RlnError::MalformedCache(format!(
                "epoch {} has no partition",
                field_to_decimal(&orphan.to_field())
            )));
        }

        info!(
            "Imported cache with {} epochs (cacheLength {})",
            epochs.len(),
            document.cache_length
        );
        Ok(Self {
            cache_length: document.cache_length,
            rln_identifier,
            epochs,
            partitions,
        })
    }

    pub fn export_json(&self) -> Result<String> {
        serde_json::to_string(&self.to_document())
            .map_err(|e| RlnError::MalformedCache(e.to_string()))
    }

    pub fn import_json(json: &str) -> Result<Self> {
        let document: CacheDocument =
            serde_json::from_str(json).map_err(|e| RlnError::MalformedCache(e.to_string()))?;
        Self::from_document(&document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PublicSignals, SnarkProof};
    use crate::utils::gen_signal_hash;
    use crate::witness::calculate_output;
    use ark_bn254::{G1Affine, G2Affine};

    const RLN_ID: u64 = 42;

    fn proof(secret: u64, epoch: u64, signal: &[u8]) -> RlnFullProof {
        let secret = Fr::from(secret);
        let epoch = Fr::from(epoch);
        let x = gen_signal_hash(signal);
        let output = calculate_output(secret, epoch, Fr::from(RLN_ID), x);
        RlnFullProof {
            snark_proof: SnarkProof {
                a: G1Affine::identity(),
                b: G2Affine::identity(),
                c: G1Affine::identity(),
            },
            public_signals: PublicSignals {
                y_share: output.y_share,
                merkle_root: Fr::from(1u64),
                internal_nullifier: output.internal_nullifier,
                signal_hash: x,
                epoch,
                rln_identifier: Fr::from(RLN_ID),
            },
        }
    }

    #[test]
    fn test_second_signal_is_breach() {
        let mut cache = Cache::new(Fr::from(RLN_ID), DEFAULT_CACHE_LENGTH);
        let first = cache.add_proof(&proof(31337, 1, b"hello")).unwrap();
        assert_eq!(first.status, ProofStatus::Added);
        assert_eq!(first.secret, None);

        let second = cache.add_proof(&proof(31337, 1, b"world")).unwrap();
        assert_eq!(second.status, ProofStatus::Breach);
        assert_eq!(second.secret, Some(Fr::from(31337u64)));
        assert_eq!(second.nullifier, first.nullifier);
    }

    #[test]
    fn test_duplicate_is_invalid_and_recorded() {
        let mut cache = Cache::new(Fr::from(RLN_ID), DEFAULT_CACHE_LENGTH);
        let p = proof(5, 1, b"hello");
        assert_eq!(cache.add_proof(&p).unwrap().status, ProofStatus::Added);
        let again = cache.add_proof(&p).unwrap();
        assert_eq!(again.status, ProofStatus::Invalid);
        assert_eq!(again.secret, None);
        assert_eq!(cache.proofs(&Fr::from(1u64), &p.internal_nullifier()).len(), 2);
    }

    #[test]
    fn test_breach_after_duplicate_still_recovers() {
        let mut cache = Cache::new(Fr::from(RLN_ID), DEFAULT_CACHE_LENGTH);
        cache.add_proof(&proof(5, 1, b"a")).unwrap();
        cache.add_proof(&proof(5, 1, b"a")).unwrap();
        let breach = cache.add_proof(&proof(5, 1, b"b")).unwrap();
        assert_eq!(breach.secret, Some(Fr::from(5u64)));
    }

    #[test]
    fn test_different_epochs_do_not_collide() {
        let mut cache = Cache::new(Fr::from(RLN_ID), DEFAULT_CACHE_LENGTH);
        assert_eq!(cache.add_proof(&proof(5, 1, b"a")).unwrap().status, ProofStatus::Added);
        assert_eq!(cache.add_proof(&proof(5, 2, b"b")).unwrap().status, ProofStatus::Added);
        assert_eq!(cache.add_proof(&proof(6, 1, b"b")).unwrap().status, ProofStatus::Added);
    }

    #[test]
    fn test_eviction_drops_oldest_epoch() {
        let mut cache = Cache::new(Fr::from(RLN_ID), 2);
        cache.add_proof(&proof(5, 1, b"a")).unwrap();
        cache.add_proof(&proof(5, 2, b"a")).unwrap();
        assert_eq!(cache.epochs(), vec![Fr::from(1u64), Fr::from(2u64)]);

        cache.add_proof(&proof(5, 3, b"a")).unwrap();
        assert!(!cache.contains_epoch(&Fr::from(1u64)));
        assert_eq!(cache.epochs(), vec![Fr::from(2u64), Fr::from(3u64)]);

        // The evicted epoch starts fresh.
        let again = cache.add_proof(&proof(5, 1, b"b")).unwrap();
        assert_eq!(again.status, ProofStatus::Added);
    }

    #[test]
    fn test_zero_length_disables_eviction() {
        let mut cache = Cache::new(Fr::from(RLN_ID), 0);
        for epoch in 0..10 {
            cache.add_proof(&proof(5, epoch, b"a")).unwrap();
        }
        assert_eq!(cache.epochs().len(), 10);
    }

    #[test]
    fn test_remove_epoch_is_idempotent() {
        let mut cache = Cache::new(Fr::from(RLN_ID), 0);
        cache.add_proof(&proof(5, 1, b"a")).unwrap();
        cache.remove_epoch(&Fr::from(1u64));
        cache.remove_epoch(&Fr::from(1u64));
        assert!(cache.epochs().is_empty());
        assert!(!cache.contains_epoch(&Fr::from(1u64)));
    }

    #[test]
    fn test_foreign_identifier_is_invalid_and_not_stored() {
        let mut cache = Cache::new(Fr::from(7u64), 0);
        let result = cache.add_proof(&proof(5, 1, b"a")).unwrap();
        assert_eq!(result.status, ProofStatus::Invalid);
        assert!(cache.epochs().is_empty());
    }

    #[test]
    fn test_export_import_roundtrip() {
        let mut cache = Cache::new(Fr::from(RLN_ID), 3);
        cache.add_proof(&proof(5, 2, b"a")).unwrap();
        cache.add_proof(&proof(5, 1, b"b")).unwrap();
        cache.add_proof(&proof(6, 1, b"c")).unwrap();

        let json = cache.export_json().unwrap();
        let imported = Cache::import_json(&json).unwrap();
        assert_eq!(imported, cache);
        assert_eq!(imported.epochs(), vec![Fr::from(2u64), Fr::from(1u64)]);
    }

    #[test]
    fn test_import_rejects_structural_mismatch() {
        let mut cache = Cache::new(Fr::from(RLN_ID), 3);
        cache.add_proof(&proof(5, 1, b"a")).unwrap();

        let mut missing_epoch = cache.to_document();
        missing_epoch.epochs.clear();
        assert!(matches!(
            Cache::from_document(&missing_epoch),
            Err(RlnError::MalformedCache(_))
        ));

        let mut orphan_epoch = cache.to_document();
        orphan_epoch.epochs.push("9".to_string());
        assert!(matches!(
            Cache::from_document(&orphan_epoch),
            Err(RlnError::MalformedCache(_))
        ));

        let mut repeated = cache.to_document();
        repeated.epochs.push("1".to_string());
        assert!(Cache::from_document(&repeated).is_err());

        let mut over_retained = cache.to_document();
        over_retained.cache_length = 0;
        assert!(Cache::from_document(&over_retained).is_ok());
        cache.add_proof(&proof(5, 2, b"a")).unwrap();
        let mut over_retained = cache.to_document();
        over_retained.cache_length = 1;
        assert!(matches!(
            Cache::from_document(&over_retained),
            Err(RlnError::MalformedCache(_))
        ));

        let mut wrong_bucket = cache.to_document();
        let partition = wrong_bucket.cache.remove("1").unwrap();
        wrong_bucket.cache.insert("2".to_string(), partition);
        wrong_bucket.epochs = vec!["2".to_string()];
        assert!(Cache::from_document(&wrong_bucket).is_err());

        assert!(matches!(
            Cache::import_json("not json"),
            Err(RlnError::MalformedCache(_))
        ));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ProofStatus::Added.to_string(), "ADDED");
        assert_eq!(ProofStatus::Breach.to_string(), "BREACH");
        assert_eq!(ProofStatus::Invalid.to_string(), "INVALID");
    }
}

//! Identity secret recovery from two shares on the same line.

use crate::error::{Result, RlnError};
use crate::types::RlnFullProof;
use crate::utils::field_to_hex;
use ark_bn254::Fr;
use ark_ff::Field;

/// Degree-1 Shamir reconstruction: the intercept of the line through
/// `(x1, y1)` and `(x2, y2)`.
///
/// `secret = (y1 * x2 - y2 * x1) / (x2 - x1)`
///
/// # Errors
/// `DegenerateRecovery` if `x1 == x2`.
pub fn shamir_recovery(x1: Fr, x2: Fr, y1: Fr, y2: Fr) -> Result<Fr> {
    let denominator = (x2 - x1)
        .inverse()
        .ok_or_else(|| RlnError::DegenerateRecovery(field_to_hex(&x1)))?;
    Ok((y1 * x2 - y2 * x1) * denominator)
}

/// Recovers the identity secret behind two proofs sharing a nullifier.
///
/// # Errors
/// `NullifierMismatch` if the proofs differ in internal nullifier, epoch or
/// rate-limit identifier; `DegenerateRecovery` if they carry the same signal
/// hash.
pub fn retrieve_secret(proof1: &RlnFullProof, proof2: &RlnFullProof) -> Result<Fr> {
    let first = &proof1.public_signals;
    let second = &proof2.public_signals;
    if first.internal_nullifier != second.internal_nullifier {
        return Err(RlnError::NullifierMismatch(format!(
            "{} != {}",
            field_to_hex(&first.internal_nullifier),
            field_to_hex(&second.internal_nullifier)
        )));
    }
    if first.epoch != second.epoch || first.rln_identifier != second.rln_identifier {
        return Err(RlnError::NullifierMismatch(
            "proofs belong to different epochs or deployments".to_string(),
        ));
    }
    let (x1, y1) = proof1.share();
    let (x2, y2) = proof2.share();
    shamir_recovery(x1, x2, y1, y2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PublicSignals, SnarkProof};
    use crate::witness::calculate_output;
    use ark_bn254::{G1Affine, G2Affine};
    use ark_std::{test_rng, UniformRand};

    fn proof_with(secret: Fr, epoch: Fr, rln_id: Fr, x: Fr) -> RlnFullProof {
        let output = calculate_output(secret, epoch, rln_id, x);
        RlnFullProof {
            snark_proof: SnarkProof {
                a: G1Affine::identity(),
                b: G2Affine::identity(),
                c: G1Affine::identity(),
            },
            public_signals: PublicSignals {
                y_share: output.y_share,
                merkle_root: Fr::from(0u64),
                internal_nullifier: output.internal_nullifier,
                signal_hash: x,
                epoch,
                rln_identifier: rln_id,
            },
        }
    }

    #[test]
    fn test_random_lines_recover_intercept() {
        let mut rng = test_rng();
        for _ in 0..32 {
            let secret = Fr::rand(&mut rng);
            let a1 = Fr::rand(&mut rng);
            let x1 = Fr::rand(&mut rng);
            let x2 = Fr::rand(&mut rng);
            if x1 == x2 {
                continue;
            }
            let y1 = a1 * x1 + secret;
            let y2 = a1 * x2 + secret;
            assert_eq!(shamir_recovery(x1, x2, y1, y2).unwrap(), secret);
        }
    }

    #[test]
    fn test_equal_x_is_degenerate() {
        let x = Fr::from(3u64);
        assert!(matches!(
            shamir_recovery(x, x, Fr::from(1u64), Fr::from(2u64)),
            Err(RlnError::DegenerateRecovery(_))
        ));
    }

    #[test]
    fn test_retrieve_secret_from_proofs() {
        let secret = Fr::from(987_654_321u64);
        let epoch = Fr::from(10u64);
        let rln_id = Fr::from(1u64);
        let first = proof_with(secret, epoch, rln_id, Fr::from(100u64));
        let second = proof_with(secret, epoch, rln_id, Fr::from(200u64));
        assert_eq!(retrieve_secret(&first, &second).unwrap(), secret);
    }

    #[test]
    fn test_retrieve_secret_rejects_different_nullifiers() {
        let secret = Fr::from(5u64);
        let rln_id = Fr::from(1u64);
        let first = proof_with(secret, Fr::from(10u64), rln_id, Fr::from(100u64));
        let second = proof_with(secret, Fr::from(11u64), rln_id, Fr::from(200u64));
        assert!(matches!(
            retrieve_secret(&first, &second),
            Err(RlnError::NullifierMismatch(_))
        ));
    }
}

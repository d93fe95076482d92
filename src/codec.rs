//! Canonical compact wire format for BN254 points and full RLN proofs.
//!
//! Every value is little-endian and fixed width:
//!
//! | item          | bytes |
//! |---------------|-------|
//! | field element | 32    |
//! | G1 point      | 32    |
//! | G2 point      | 64    |
//! | full proof    | 320   |
//!
//! A compressed point stores only its x-coordinate. The two high bits of the
//! final byte carry flags: bit 7 marks the point at infinity (all other bits
//! zero), bit 6 marks that y is the greater of the two square roots.
//! Coordinates of BN254 are below 2^254, so those bits are never part of the
//! x payload.

use crate::error::{Result, RlnError};
use crate::types::{PublicSignals, RlnFullProof, SnarkProof};
use crate::utils::{field_from_bytes_le, field_to_bytes_le, FIELD_SIZE};
use ark_bn254::{Fq, Fq2, Fr, G1Affine, G2Affine};
use ark_ec::short_weierstrass::{Affine, SWCurveConfig};
use ark_ff::{BigInt, BigInteger, Field, PrimeField, Zero};
use log::debug;

pub const G1_COMPRESSED_SIZE: usize = 32;
pub const G2_COMPRESSED_SIZE: usize = 64;
pub const PROOF_POINTS_SIZE: usize = 2 * G1_COMPRESSED_SIZE + G2_COMPRESSED_SIZE;
pub const PUBLIC_SIGNALS_COUNT: usize = 6;
pub const FULL_PROOF_SIZE: usize = PROOF_POINTS_SIZE + PUBLIC_SIGNALS_COUNT * FIELD_SIZE;

const INFINITY_FLAG: u8 = 1 << 7;
const GREATEST_FLAG: u8 = 1 << 6;
const FLAG_MASK: u8 = INFINITY_FLAG | GREATEST_FLAG;

/// A base field whose elements can be written as the x payload of a compressed point.
pub trait CompressedCoordinate: Field {
    /// Encoded width in bytes.
    const SIZE: usize;

    fn write_le(&self, out: &mut [u8]);

    /// Reads a canonical element; `None` if any component is not below the modulus.
    fn read_le(bytes: &[u8]) -> Option<Self>;

    /// True if `self` is numerically greater than `-self`.
    fn is_greatest_root(&self) -> bool;
}

fn fq_from_le(bytes: &[u8]) -> Option<Fq> {
    let mut limbs = [0u64; 4];
    for (limb, chunk) in limbs.iter_mut().zip(bytes.chunks_exact(8)) {
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        *limb = u64::from_le_bytes(word);
    }
    Fq::from_bigint(BigInt::new(limbs))
}

impl CompressedCoordinate for Fq {
    const SIZE: usize = 32;

    fn write_le(&self, out: &mut [u8]) {
        out[..Self::SIZE].copy_from_slice(&self.into_bigint().to_bytes_le());
    }

    fn read_le(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::SIZE {
            return None;
        }
        fq_from_le(bytes)
    }

    fn is_greatest_root(&self) -> bool {
        self.into_bigint() > (-*self).into_bigint()
    }
}

/// `Fq2` elements are ordered by `c1` first, then `c0`.
impl CompressedCoordinate for Fq2 {
    const SIZE: usize = 64;

    fn write_le(&self, out: &mut [u8]) {
        self.c0.write_le(&mut out[..32]);
        self.c1.write_le(&mut out[32..64]);
    }

    fn read_le(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::SIZE {
            return None;
        }
        let c0 = fq_from_le(&bytes[..32])?;
        let c1 = fq_from_le(&bytes[32..])?;
        Some(Fq2::new(c0, c1))
    }

    fn is_greatest_root(&self) -> bool {
        if self.c1.is_zero() {
            self.c0.is_greatest_root()
        } else {
            self.c1.is_greatest_root()
        }
    }
}

fn compress_point<P>(point: &Affine<P>) -> Vec<u8>
where
    P: SWCurveConfig,
    P::BaseField: CompressedCoordinate,
{
    let size = <P::BaseField as CompressedCoordinate>::SIZE;
    let mut out = vec![0u8; size];
    if point.infinity {
        out[size - 1] = INFINITY_FLAG;
        return out;
    }
    point.x.write_le(&mut out);
    if point.y.is_greatest_root() {
        out[size - 1] |= GREATEST_FLAG;
    }
    out
}

fn decompress_point<P>(bytes: &[u8]) -> Result<Affine<P>>
where
    P: SWCurveConfig,
    P::BaseField: CompressedCoordinate,
{
    let size = <P::BaseField as CompressedCoordinate>::SIZE;
    if bytes.len() != size {
        return Err(RlnError::InvalidCompression(format!(
            "expected {size} bytes, got {}",
            bytes.len()
        )));
    }

    let flags = bytes[size - 1] & FLAG_MASK;
    let mut payload = bytes.to_vec();
    payload[size - 1] &= !FLAG_MASK;

    if flags & INFINITY_FLAG != 0 {
        if flags & GREATEST_FLAG != 0 || payload.iter().any(|b| *b != 0) {
            return Err(RlnError::InvalidCompression(
                "infinity flag set together with coordinate data".to_string(),
            ));
        }
        return Ok(Affine::<P>::identity());
    }

    let x = <P::BaseField as CompressedCoordinate>::read_le(&payload).ok_or_else(|| {
        RlnError::InvalidCompression("x-coordinate is not a canonical field element".to_string())
    })?;

    let rhs = x.square() * x + P::COEFF_A * x + P::COEFF_B;
    let root = rhs.sqrt().ok_or_else(|| {
        RlnError::InvalidCompression("no point on the curve for this x-coordinate".to_string())
    })?;

    let want_greatest = flags & GREATEST_FLAG != 0;
    if want_greatest && root.is_zero() {
        return Err(RlnError::InvalidCompression(
            "greatest-root flag set for a point with y = 0".to_string(),
        ));
    }
    let y = if root.is_greatest_root() == want_greatest {
        root
    } else {
        -root
    };

    let point = Affine::<P>::new_unchecked(x, y);
    if !point.is_in_correct_subgroup_assuming_on_curve() {
        return Err(RlnError::InvalidCompression(
            "point is not in the prime-order subgroup".to_string(),
        ));
    }
    Ok(point)
}

#[must_use]
pub fn compress_g1(point: &G1Affine) -> [u8; G1_COMPRESSED_SIZE] {
    let mut out = [0u8; G1_COMPRESSED_SIZE];
    out.copy_from_slice(&compress_point(point));
    out
}

#[must_use]
pub fn compress_g2(point: &G2Affine) -> [u8; G2_COMPRESSED_SIZE] {
    let mut out = [0u8; G2_COMPRESSED_SIZE];
    out.copy_from_slice(&compress_point(point));
    out
}

pub fn decompress_g1(bytes: &[u8]) -> Result<G1Affine> {
    decompress_point(bytes)
}

pub fn decompress_g2(bytes: &[u8]) -> Result<G2Affine> {
    decompress_point(bytes)
}

#[must_use]
pub fn serialize_field(value: &Fr) -> [u8; FIELD_SIZE] {
    field_to_bytes_le(value)
}

/// Decodes a 32-byte little-endian field element; values at or above the modulus are rejected.
pub fn deserialize_field(bytes: &[u8]) -> Result<Fr> {
    let array: &[u8; FIELD_SIZE] = bytes.try_into().map_err(|_| {
        RlnError::InvalidCompression(format!(
            "field element must be {FIELD_SIZE} bytes, got {}",
            bytes.len()
        ))
    })?;
    field_from_bytes_le(array).ok_or_else(|| {
        RlnError::InvalidCompression("field element is not below the modulus".to_string())
    })
}

/// Serializes a full proof into its 320-byte wire form.
#[must_use]
pub fn serialize_proof(proof: &RlnFullProof) -> [u8; FULL_PROOF_SIZE] {
    let mut out = [0u8; FULL_PROOF_SIZE];
    let mut offset = 0;

    let mut put = |chunk: &[u8]| {
        out[offset..offset + chunk.len()].copy_from_slice(chunk);
        offset += chunk.len();
    };

    put(&compress_g1(&proof.snark_proof.a));
    put(&compress_g2(&proof.snark_proof.b));
    put(&compress_g1(&proof.snark_proof.c));
    for signal in proof.public_signals.to_vec() {
        put(&serialize_field(&signal));
    }
    out
}

/// Parses the 320-byte wire form. Nothing is returned unless every component decodes.
pub fn deserialize_proof(bytes: &[u8]) -> Result<RlnFullProof> {
    if bytes.len() != FULL_PROOF_SIZE {
        return Err(RlnError::InvalidCompression(format!(
            "proof must be {FULL_PROOF_SIZE} bytes, got {}",
            bytes.len()
        )));
    }
    debug!("Decoding {} byte RLN proof", bytes.len());

    let a_end = G1_COMPRESSED_SIZE;
    let b_end = a_end + G2_COMPRESSED_SIZE;
    let c_end = b_end + G1_COMPRESSED_SIZE;
    let snark_proof = SnarkProof {
        a: decompress_g1(&bytes[..a_end])?,
        b: decompress_g2(&bytes[a_end..b_end])?,
        c: decompress_g1(&bytes[b_end..c_end])?,
    };

    let mut signals = bytes[PROOF_POINTS_SIZE..]
        .chunks_exact(FIELD_SIZE)
        .map(deserialize_field);
    let mut next = || {
        signals
            .next()
            .unwrap_or_else(|| Err(RlnError::InvalidCompression("truncated signals".to_string())))
    };
    let public_signals = PublicSignals {
        y_share: next()?,
        merkle_root: next()?,
        internal_nullifier: next()?,
        signal_hash: next()?,
        epoch: next()?,
        rln_identifier: next()?,
    };

    Ok(RlnFullProof {
        snark_proof,
        public_signals,
    })
}

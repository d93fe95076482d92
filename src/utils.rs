//! Field and hash utilities shared by every other module.
//!
//! All scalars live in the BN254 scalar field [`Fr`]. Hashing uses the
//! circom-compatible Poseidon instance so that commitments, nullifiers and
//! Merkle roots match other implementations of the protocol.

use crate::error::{Result, RlnError};
use ark_bn254::Fr;
use ark_ff::{BigInt, BigInteger, PrimeField};
use light_poseidon::{Poseidon, PoseidonHasher};
use num_bigint::BigUint;
use sha3::{Digest, Keccak256};
use std::time::{SystemTime, UNIX_EPOCH};

/// Size in bytes of a serialized field element.
pub const FIELD_SIZE: usize = 32;

fn is_valid_hex_string(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_hexdigit())
}

fn strip_hex_prefix(input: &str) -> &str {
    input
        .trim()
        .strip_prefix("0x")
        .or_else(|| input.trim().strip_prefix("0X"))
        .unwrap_or_else(|| input.trim())
}

/// Validates and strips hex prefix from a string.
///
/// # Errors
/// Returns an error if the stripped string does not have `expected_len`
/// characters or contains non-hex characters.
///
/// # Examples
///
/// ```
/// use rln_core::utils::validate_and_strip_hex;
///
/// let result = validate_and_strip_hex("0x1234abcd", 8).unwrap();
/// assert_eq!(result, "1234abcd");
/// ```
pub fn validate_and_strip_hex(input: &str, expected_len: usize) -> Result<String> {
    let stripped = strip_hex_prefix(input);

    if stripped.len() != expected_len {
        return Err(RlnError::InvalidInput(format!(
            "Invalid hex string: must be {} characters (got {})",
            expected_len,
            stripped.len()
        )));
    }

    if !is_valid_hex_string(stripped) {
        return Err(RlnError::InvalidInput(
            "Invalid hex string: contains non-hex characters".to_string(),
        ));
    }

    Ok(stripped.to_string())
}

/// Returns true if the string is non-empty hex, with or without a `0x` prefix.
#[must_use]
pub fn validate_hex_string(input: &str) -> bool {
    let stripped = strip_hex_prefix(input);

    if stripped.is_empty() {
        return false;
    }

    is_valid_hex_string(stripped)
}

/// Poseidon hash (circom parameters, BN254) of 1 to 12 field elements.
///
/// # Errors
/// `InvalidInput` for an empty slice or more than 12 inputs.
///
/// # Example
///
/// ```
/// use rln_core::utils::poseidon_hash;
/// use ark_bn254::Fr;
///
/// let hash = poseidon_hash(&[Fr::from(1u64), Fr::from(2u64)]).unwrap();
/// assert_ne!(hash, Fr::from(0u64));
/// assert!(poseidon_hash(&[]).is_err());
/// ```
pub fn poseidon_hash(inputs: &[Fr]) -> Result<Fr> {
    Poseidon::<Fr>::new_circom(inputs.len())
        .and_then(|mut hasher| hasher.hash(inputs))
        .map_err(|e| {
            RlnError::InvalidInput(format!("Poseidon over {} inputs: {e}", inputs.len()))
        })
}

fn hash_fixed<const N: usize>(inputs: [Fr; N]) -> Fr {
    match poseidon_hash(&inputs) {
        Ok(hash) => hash,
        // Only instantiated with N = 1 and N = 2.
        Err(e) => unreachable!("{e}"),
    }
}

#[inline]
#[must_use]
pub fn poseidon_hash1(input: Fr) -> Fr {
    hash_fixed([input])
}

#[inline]
#[must_use]
pub fn poseidon_hash2(left: Fr, right: Fr) -> Fr {
    hash_fixed([left, right])
}

/// Hashes a raw signal into a field element.
///
/// The Keccak-256 digest is read as a big-endian integer and shifted right by
/// 8 bits, so the result always fits below the field modulus.
#[must_use]
pub fn gen_signal_hash(signal: &[u8]) -> Fr {
    let digest: [u8; 32] = Keccak256::digest(signal).into();
    Fr::from_be_bytes_mod_order(&digest[..31])
}

/// Identity commitment: `Poseidon(secret)`.
#[inline]
#[must_use]
pub fn identity_commitment(identity_secret: Fr) -> Fr {
    poseidon_hash1(identity_secret)
}

/// External nullifier binding an epoch to a deployment: `Poseidon(epoch, rln_identifier)`.
#[inline]
#[must_use]
pub fn external_nullifier(epoch: Fr, rln_identifier: Fr) -> Fr {
    poseidon_hash2(epoch, rln_identifier)
}

/// Reduces an arbitrary big-endian integer modulo the field.
#[inline]
#[must_use]
pub fn field_from_be_bytes_reduced(bytes: &[u8]) -> Fr {
    Fr::from_be_bytes_mod_order(bytes)
}

/// Canonical 32-byte little-endian encoding of a field element.
#[must_use]
pub fn field_to_bytes_le(value: &Fr) -> [u8; FIELD_SIZE] {
    let mut bytes = [0u8; FIELD_SIZE];
    bytes.copy_from_slice(&value.into_bigint().to_bytes_le());
    bytes
}

/// Decodes 32 little-endian bytes, returning `None` if the value is not below the modulus.
#[must_use]
pub fn field_from_bytes_le(bytes: &[u8; FIELD_SIZE]) -> Option<Fr> {
    let mut limbs = [0u64; 4];
    for (limb, chunk) in limbs.iter_mut().zip(bytes.chunks_exact(8)) {
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        *limb = u64::from_le_bytes(word);
    }
    Fr::from_bigint(BigInt::new(limbs))
}

/// Canonical 32-byte big-endian encoding; ordering of the bytes matches numeric ordering.
#[must_use]
pub fn field_to_bytes_be(value: &Fr) -> [u8; FIELD_SIZE] {
    let mut bytes = [0u8; FIELD_SIZE];
    bytes.copy_from_slice(&value.into_bigint().to_bytes_be());
    bytes
}

#[must_use]
pub fn field_to_decimal(value: &Fr) -> String {
    BigUint::from(value.into_bigint()).to_str_radix(10)
}

#[must_use]
pub fn field_to_hex(value: &Fr) -> String {
    format!("0x{}", hex::encode(field_to_bytes_be(value)))
}

fn parse_biguint(input: &str) -> Result<BigUint> {
    let trimmed = input.trim();
    let stripped = strip_hex_prefix(trimmed);
    let parsed = if stripped.len() != trimmed.len() {
        if !validate_hex_string(trimmed) {
            return Err(RlnError::InvalidInput(format!(
                "'{input}' is not a valid hex integer"
            )));
        }
        BigUint::parse_bytes(stripped.as_bytes(), 16)
    } else {
        BigUint::parse_bytes(trimmed.as_bytes(), 10)
    };
    parsed.ok_or_else(|| RlnError::InvalidInput(format!("'{input}' is not a valid integer")))
}

/// Parses a decimal or `0x`-prefixed hex integer and reduces it modulo the field.
pub fn field_from_decimal(input: &str) -> Result<Fr> {
    let value = parse_biguint(input)?;
    Ok(Fr::from_le_bytes_mod_order(&value.to_bytes_le()))
}

/// Parses a decimal or `0x`-prefixed hex integer, rejecting values at or above the modulus.
pub fn parse_field(input: &str) -> Result<Fr> {
    let value = parse_biguint(input)?;
    if value >= BigUint::from(Fr::MODULUS) {
        return Err(RlnError::InvalidInput(format!(
            "'{input}' is not below the field modulus"
        )));
    }
    Ok(Fr::from_le_bytes_mod_order(&value.to_bytes_le()))
}

/// Epoch for a Unix timestamp: the timestamp rounded down to `granularity_secs`.
pub fn epoch_from_unix_time(unix_secs: u64, granularity_secs: u64) -> Result<Fr> {
    if granularity_secs == 0 {
        return Err(RlnError::InvalidInput(
            "epoch granularity must be greater than zero".to_string(),
        ));
    }
    Ok(Fr::from(unix_secs - unix_secs % granularity_secs))
}

/// Epoch for the current system time.
pub fn current_epoch(granularity_secs: u64) -> Result<Fr> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| RlnError::InvalidInput(format!("System clock unavailable: {e}")))?;
    epoch_from_unix_time(now.as_secs(), granularity_secs)
}

/// Serde adapter writing a field element as a decimal string.
pub mod serde_field {
    use super::{field_to_decimal, parse_field};
    use ark_bn254::Fr;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Fr, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&field_to_decimal(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Fr, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse_field(&text).map_err(D::Error::custom)
    }
}

/// Serde adapter for a list of field elements as decimal strings.
pub mod serde_field_vec {
    use super::{field_to_decimal, parse_field};
    use ark_bn254::Fr;
    use serde::{de::Error, ser::SerializeSeq, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(values: &[Fr], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(values.len()))?;
        for value in values {
            seq.serialize_element(&field_to_decimal(value))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Fr>, D::Error> {
        let texts = Vec::<String>::deserialize(deserializer)?;
        texts
            .iter()
            .map(|text| parse_field(text).map_err(D::Error::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_and_strip_hex_valid() {
        let result = validate_and_strip_hex("0x1234abcd", 8);
        assert!(result.is_ok());
        assert_eq!(result.unwrap(), "1234abcd");
    }

    #[test]
    fn test_validate_and_strip_hex_with_whitespace() {
        let result = validate_and_strip_hex("  0X1234ABCD  ", 8);
        assert_eq!(result.unwrap(), "1234ABCD");
    }

    #[test]
    fn test_validate_and_strip_hex_wrong_length() {
        let result = validate_and_strip_hex("0x1234abcd", 10);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("must be 10 characters"));
    }

    #[test]
    fn test_validate_and_strip_hex_invalid_characters() {
        let result = validate_and_strip_hex("0x1234xyzw", 8);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("non-hex characters"));
    }

    #[test]
    fn test_validate_hex_string() {
        assert!(validate_hex_string("0x1234abcd"));
        assert!(validate_hex_string("1234abcd"));
        assert!(!validate_hex_string("0x1234xyzw"));
        assert!(!validate_hex_string(""));
    }

    #[test]
    fn test_poseidon_arity_out_of_range_is_an_error() {
        assert!(matches!(poseidon_hash(&[]), Err(RlnError::InvalidInput(_))));
        assert!(matches!(
            poseidon_hash(&[Fr::from(1u64); 13]),
            Err(RlnError::InvalidInput(_))
        ));
        assert!(poseidon_hash(&[Fr::from(1u64); 12]).is_ok());
    }

    #[test]
    fn test_fixed_arity_hashes_match_slice_form() {
        let a = Fr::from(3u64);
        let b = Fr::from(4u64);
        assert_eq!(poseidon_hash1(a), poseidon_hash(&[a]).unwrap());
        assert_eq!(poseidon_hash2(a, b), poseidon_hash(&[a, b]).unwrap());
        assert_eq!(identity_commitment(a), poseidon_hash1(a));
    }

    #[test]
    fn test_signal_hash_is_top_31_bytes_of_keccak() {
        let digest: [u8; 32] = Keccak256::digest(b"hello").into();
        let expected = BigUint::from_bytes_be(&digest) >> 8u32;
        let hash = gen_signal_hash(b"hello");
        assert_eq!(BigUint::from(hash.into_bigint()), expected);
        assert_ne!(gen_signal_hash(b"hello"), gen_signal_hash(b"world"));
    }

    #[test]
    fn test_field_bytes_le_roundtrip_and_canonicality() {
        let value = Fr::from(0x0102_0304_0506_0708u64);
        let bytes = field_to_bytes_le(&value);
        assert_eq!(bytes[0], 0x08);
        assert_eq!(field_from_bytes_le(&bytes), Some(value));

        assert_eq!(field_from_bytes_le(&[0xffu8; 32]), None);
    }

    #[test]
    fn test_decimal_and_hex_parsing() {
        assert_eq!(parse_field("42").unwrap(), Fr::from(42u64));
        assert_eq!(parse_field("0x2a").unwrap(), Fr::from(42u64));
        assert_eq!(field_to_decimal(&Fr::from(42u64)), "42");
        assert!(parse_field("not a number").is_err());
        assert!(parse_field("0xzz").is_err());

        let modulus = BigUint::from(Fr::MODULUS).to_str_radix(10);
        assert!(parse_field(&modulus).is_err());
        assert_eq!(field_from_decimal(&modulus).unwrap(), Fr::from(0u64));
    }

    #[test]
    fn test_reduction_is_deterministic() {
        let raw = [0xffu8; 40];
        assert_eq!(
            field_from_be_bytes_reduced(&raw),
            field_from_be_bytes_reduced(&raw)
        );
    }

    #[test]
    fn test_epoch_rounding() {
        assert_eq!(epoch_from_unix_time(1_000_017, 10).unwrap(), Fr::from(1_000_010u64));
        assert!(epoch_from_unix_time(1_000_017, 0).is_err());
        assert!(current_epoch(60).is_ok());
    }

    #[test]
    fn test_hex_is_big_endian() {
        assert_eq!(
            field_to_hex(&Fr::from(1u64)),
            format!("0x{}01", "00".repeat(31))
        );
    }
}

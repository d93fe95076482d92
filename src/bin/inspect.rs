use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info, warn};
use rln_core::cache::DEFAULT_CACHE_LENGTH;
use rln_core::utils::{field_to_decimal, validate_and_strip_hex};
use rln_core::{deserialize_proof, Cache, ProofStatus, RlnFullProof, FULL_PROOF_SIZE};
use std::fs;
use std::path::{Path, PathBuf};

/// Decode an RLN proof and check it against a breach cache
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Proof as 640 hex characters, with or without 0x
    #[arg(long, conflicts_with = "proof_file", required_unless_present = "proof_file")]
    proof: Option<String>,

    /// File holding the raw 320-byte proof or its hex encoding
    #[arg(short, long)]
    proof_file: Option<PathBuf>,

    /// Cache JSON to add the proof to; created if missing
    #[arg(short, long)]
    cache: Option<PathBuf>,

    /// Epochs retained when creating a new cache
    #[arg(long, default_value_t = DEFAULT_CACHE_LENGTH)]
    cache_length: usize,
}

fn decode_hex_proof(input: &str) -> Result<Vec<u8>> {
    let stripped = validate_and_strip_hex(input, FULL_PROOF_SIZE * 2)?;
    hex::decode(stripped).context("Failed to decode proof hex")
}

fn read_proof_bytes(args: &Args) -> Result<Vec<u8>> {
    if let Some(proof) = &args.proof {
        return decode_hex_proof(proof);
    }
    let path = args
        .proof_file
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("Either --proof or --proof-file is required"))?;
    info!("Loading proof from: {}", path.display());
    let bytes = fs::read(path)
        .with_context(|| format!("Failed to read proof file: {}", path.display()))?;
    debug!("Proof file size: {} bytes", bytes.len());
    if bytes.len() == FULL_PROOF_SIZE {
        return Ok(bytes);
    }
    let text = String::from_utf8(bytes).context("Proof file is neither raw bytes nor hex")?;
    decode_hex_proof(&text)
}

fn load_cache(path: &Path, proof: &RlnFullProof, cache_length: usize) -> Result<Cache> {
    if !path.exists() {
        info!("Creating new cache at {}", path.display());
        return Ok(Cache::new(proof.rln_identifier(), cache_length));
    }
    let json = fs::read_to_string(path)
        .with_context(|| format!("Failed to read cache file: {}", path.display()))?;
    Cache::import_json(&json).with_context(|| format!("Invalid cache file: {}", path.display()))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let bytes = read_proof_bytes(&args)?;
    let proof = deserialize_proof(&bytes).context("Failed to decode proof")?;

    let signals = &proof.public_signals;
    println!("Proof details:");
    println!("  y share: {}", field_to_decimal(&signals.y_share));
    println!("  Merkle root: {}", field_to_decimal(&signals.merkle_root));
    println!("  Nullifier: {}", field_to_decimal(&signals.internal_nullifier));
    println!("  Signal hash: {}", field_to_decimal(&signals.signal_hash));
    println!("  Epoch: {}", field_to_decimal(&signals.epoch));
    println!("  RLN identifier: {}", field_to_decimal(&signals.rln_identifier));

    let Some(cache_path) = &args.cache else {
        return Ok(());
    };

    let mut cache = load_cache(cache_path, &proof, args.cache_length)?;
    let result = cache.add_proof(&proof).context("Failed to add proof to cache")?;
    println!("Status: {}", result.status);
    println!("  {}", result.msg);
    if result.status == ProofStatus::Breach {
        if let Some(secret) = &result.secret {
            warn!("Rate limit breached, identity secret recovered");
            println!("  Recovered secret: {}", field_to_decimal(secret));
        }
    }

    let json = cache.export_json().context("Failed to export cache")?;
    fs::write(cache_path, json)
        .with_context(|| format!("Failed to write cache file: {}", cache_path.display()))?;
    info!("Cache saved to {}", cache_path.display());

    Ok(())
}

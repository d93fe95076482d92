use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info};
use rln_core::config::Config;
use rln_core::utils::field_to_decimal;
use rln_core::{Identity, Registry};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;

/// Generate RLN identities and a registry document
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of identities to generate
    #[arg(short = 'n', long, default_value_t = 10)]
    count: usize,

    /// Registry JSON output path
    #[arg(short, long, default_value = "registry.json")]
    output: PathBuf,

    /// Optional path for the generated identity secrets
    #[arg(short, long)]
    secrets: Option<PathBuf>,

    /// TOML config supplying tree depth and zero value
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IdentityRecord {
    identity_secret: String,
    identity_commitment: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::default(),
    };

    let mut registry = Registry::new(config.tree_depth(), config.zero_value()?)
        .context("Failed to create registry")?;
    if args.count as u64 > 1u64 << config.tree_depth() {
        return Err(anyhow::anyhow!(
            "Cannot fit {} identities in a tree of depth {}",
            args.count,
            config.tree_depth()
        ));
    }

    info!("Generating {} identities...", args.count);
    let mut rng = rand::thread_rng();
    let mut records = Vec::with_capacity(args.count);
    for _ in 0..args.count {
        let identity = Identity::new(&mut rng);
        registry
            .add_member(identity.commitment())
            .context("Failed to register generated identity")?;
        records.push(IdentityRecord {
            identity_secret: field_to_decimal(&identity.secret()),
            identity_commitment: field_to_decimal(&identity.commitment()),
        });
    }
    debug!("Registry root: {}", field_to_decimal(&registry.root()));

    let json = registry.export_json().context("Failed to export registry")?;
    fs::write(&args.output, json)
        .with_context(|| format!("Failed to write registry: {}", args.output.display()))?;
    println!("Wrote registry with {} members to {}", args.count, args.output.display());

    if let Some(path) = &args.secrets {
        let json = serde_json::to_string_pretty(&records).context("Failed to serialize secrets")?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write secrets: {}", path.display()))?;
        println!("Wrote identity secrets to {}", path.display());
    }

    println!("Merkle root: {}", field_to_decimal(&registry.root()));
    println!("First commitments:");
    for (i, record) in records.iter().take(5).enumerate() {
        println!("  {}: {}", i, record.identity_commitment);
    }

    Ok(())
}

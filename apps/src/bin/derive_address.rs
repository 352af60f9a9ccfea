use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use attestation_common::address::{address_from_spki_der, checksummed};

/// CLI to print the EVM address controlled by a custody public key.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Path to the DER-encoded SPKI public key (raw bytes or hex text).
    #[clap(long, value_name = "FILE")]
    pubkey: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let raw = fs::read(&args.pubkey)
        .with_context(|| format!("reading {}", args.pubkey.display()))?;
    let der = decode_contents(&raw);
    let address = address_from_spki_der(&der)?;
    println!("{}", checksummed(&address));

    Ok(())
}

/// Accept both raw DER bytes and hex text dumps of them.
fn decode_contents(raw: &[u8]) -> Vec<u8> {
    if let Ok(text) = std::str::from_utf8(raw) {
        let text = text.trim();
        if let Ok(bytes) = hex::decode(text.trim_start_matches("0x")) {
            return bytes;
        }
    }
    raw.to_vec()
}

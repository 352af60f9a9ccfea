use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use alloy_signer_local::PrivateKeySigner;
use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{debug, error, info};
use url::Url;

use attestation_common::assembler::{Assembler, AssemblyOptions, FailurePolicy, RetryPolicy};
use attestation_common::signer::{HttpCustodySigner, LocalKeySigner, RemoteSigner};
use attestation_common::verify::RpcVerifier;
use attestation_common::{PriceInput, SignerConfig, VerifyingContracts};

/// CLI to sign a normalized price for every configured chain and verifying
/// contract, and write the assembled attestation bundle as JSON.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Path to the signer config JSON (key id, signer address, providers).
    #[clap(long, env = "SIGNER_CONFIG", value_name = "FILE")]
    config: PathBuf,

    /// Path to the verifying-contracts JSON table.
    #[clap(long, env = "VERIFYING_CONTRACTS", value_name = "FILE")]
    contracts: PathBuf,

    /// Path to the price input JSON with `priceFloat` and `priceNormalized`.
    #[clap(long, value_name = "FILE")]
    price: PathBuf,

    /// Where to write the bundle JSON; stdout if omitted.
    #[clap(long, value_name = "FILE")]
    out: Option<PathBuf>,

    /// Base URL of the custody signing service.
    #[clap(long, env = "SIGNING_SERVICE_URL")]
    signing_url: Option<Url>,

    /// Local private key for development signing; bypasses custody.
    #[clap(long, env = "DEV_SIGNING_KEY", conflicts_with = "signing_url")]
    dev_key: Option<PrivateKeySigner>,

    /// Skip the on-chain verifyPrice check.
    #[clap(long)]
    skip_verify: bool,

    /// Keep pairs that succeeded instead of aborting on the first failure.
    #[clap(long)]
    allow_partial: bool,

    /// Chain/contract pairs signed concurrently.
    #[clap(long, default_value_t = 8)]
    concurrency: usize,

    /// Wall-clock budget for the whole bundle, in seconds.
    #[clap(long, default_value_t = 300)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    // Load environment variables if present
    match dotenvy::dotenv() {
        Ok(path) => debug!("Loaded environment variables from {:?}", path),
        Err(e) if e.not_found() => debug!("No .env file found"),
        Err(e) => bail!("failed to load .env file: {}", e),
    }

    let args = Args::parse();

    let config = SignerConfig::load(&args.config)?;
    let contracts = VerifyingContracts::load(&args.contracts)?;
    let price: PriceInput = serde_json::from_str(
        &fs::read_to_string(&args.price)
            .with_context(|| format!("reading {}", args.price.display()))?,
    )
    .context("price input is not valid JSON")?;

    let signer: Arc<dyn RemoteSigner> = match (args.signing_url.clone(), args.dev_key.clone()) {
        (Some(url), None) => Arc::new(HttpCustodySigner::new(url)),
        (None, Some(key)) => {
            info!("using local development key for {:#x}", key.address());
            Arc::new(LocalKeySigner::new(key))
        }
        _ => bail!("exactly one of --signing-url or --dev-key is required"),
    };

    let options = AssemblyOptions {
        verify_on_chain: !args.skip_verify,
        failure_policy: if args.allow_partial {
            FailurePolicy::Partial
        } else {
            FailurePolicy::Abort
        },
        concurrency: args.concurrency,
        timeout: Some(Duration::from_secs(args.timeout_secs)),
        retry: RetryPolicy::default(),
    };

    let assembler = Assembler::new(signer, Arc::new(RpcVerifier), options);
    let report = assembler.assemble(&config, &contracts, &price).await?;

    for failure in &report.failures {
        error!(
            chain = failure.chain_id,
            contract = %failure.contract,
            error = %failure.error,
            "pair not attested"
        );
    }

    let rendered = serde_json::to_string_pretty(&report.bundle)?;
    match &args.out {
        Some(path) => {
            fs::write(path, &rendered).with_context(|| format!("writing {}", path.display()))?;
            info!(
                records = report.bundle.record_count(),
                out = %path.display(),
                "bundle written"
            );
        }
        None => println!("{rendered}"),
    }

    if !report.failures.is_empty() {
        bail!("{} chain/contract pair(s) failed", report.failures.len());
    }
    Ok(())
}

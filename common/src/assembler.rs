use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use alloy_primitives::{Address, Bytes, Signature, B256, U256};
use futures_util::stream::{self, StreamExt};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use url::Url;

use crate::address;
use crate::config::{ContractEntry, SignerConfig, VerifyingContracts};
use crate::error::{Error, Result, VerifyRejection};
use crate::signer::RemoteSigner;
use crate::signing;
use crate::typed_data;
use crate::verify::ChainVerifier;
use crate::{AttestationBundle, PriceInput, SignatureRecord};

/// Seconds of validity granted to every record in a bundle. The deadline is
/// taken once per run, so all chains attest the same expiry.
pub const PRICE_DEADLINE_SECS: u64 = 3_600;

/// What to do when a single chain/contract pair cannot be completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Drop the whole bundle on the first pair failure.
    #[default]
    Abort,
    /// Keep the completed pairs and report the failed ones.
    Partial,
}

/// Retry budgets for one chain/contract pair.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Sign/verify cycles per pair; a clean contract rejection re-enters
    /// signing until this budget runs out.
    pub cycles: u32,
    /// Custody signing attempts per cycle.
    pub sign_attempts: u32,
    /// RPC attempts per verification.
    pub verify_attempts: u32,
    /// Base delay between attempts; doubles per retry.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            cycles: 3,
            sign_attempts: 3,
            verify_attempts: 3,
            backoff: Duration::from_millis(250),
        }
    }
}

/// Tuning for a whole assembly run.
#[derive(Debug, Clone, Copy)]
pub struct AssemblyOptions {
    /// Check each signature against its verifying contract before accepting
    /// the record.
    pub verify_on_chain: bool,
    pub failure_policy: FailurePolicy,
    /// Chain/contract pairs signed concurrently.
    pub concurrency: usize,
    /// Wall-clock budget for the whole bundle.
    pub timeout: Option<Duration>,
    pub retry: RetryPolicy,
}

impl Default for AssemblyOptions {
    fn default() -> Self {
        Self {
            verify_on_chain: true,
            failure_policy: FailurePolicy::default(),
            concurrency: 8,
            timeout: Some(Duration::from_secs(300)),
            retry: RetryPolicy::default(),
        }
    }
}

/// One pair that could not be completed, and the error that stopped it.
#[derive(Debug)]
pub struct PairFailure {
    pub chain_id: u64,
    pub contract: String,
    pub error: Error,
}

/// Outcome of an assembly run. Under `FailurePolicy::Partial` the bundle
/// holds every pair that succeeded and `failures` the rest; under `Abort`
/// a returned report never carries failures.
#[derive(Debug)]
pub struct AssemblyReport {
    pub bundle: AttestationBundle,
    pub failures: Vec<PairFailure>,
}

type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Drives the full pipeline for a price statement: typed-data digest per
/// pair, custody signing, canonicalization and recovery, optional
/// on-chain verification, bundle assembly under one shared deadline.
pub struct Assembler {
    signer: Arc<dyn RemoteSigner>,
    verifier: Arc<dyn ChainVerifier>,
    options: AssemblyOptions,
    clock: Clock,
}

struct PairJob {
    chain_id: u64,
    contract_key: String,
    entry: ContractEntry,
    endpoint: Option<Url>,
}

impl Assembler {
    pub fn new(
        signer: Arc<dyn RemoteSigner>,
        verifier: Arc<dyn ChainVerifier>,
        options: AssemblyOptions,
    ) -> Self {
        Self { signer, verifier, options, clock: Arc::new(unix_now) }
    }

    /// Replace the unix-time source used for the bundle deadline and the
    /// staleness check.
    pub fn with_clock(mut self, clock: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Assemble a signed bundle for `price` across every configured
    /// chain/contract pair.
    pub async fn assemble(
        &self,
        config: &SignerConfig,
        contracts: &VerifyingContracts,
        price: &PriceInput,
    ) -> Result<AssemblyReport> {
        match self.options.timeout {
            Some(budget) => timeout(budget, self.assemble_inner(config, contracts, price))
                .await
                .map_err(|_| Error::AssemblyTimeout(budget.as_secs()))?,
            None => self.assemble_inner(config, contracts, price).await,
        }
    }

    async fn assemble_inner(
        &self,
        config: &SignerConfig,
        contracts: &VerifyingContracts,
        price: &PriceInput,
    ) -> Result<AssemblyReport> {
        if contracts.is_empty() {
            return Err(Error::Config("verifying contract table is empty".into()));
        }
        let deadline = (self.clock)() + PRICE_DEADLINE_SECS;
        let signer_address = self.resolve_signer(config).await?;

        if self.options.verify_on_chain {
            for (chain_id, _, _) in contracts.pairs() {
                if config.provider(chain_id).is_none() {
                    return Err(Error::Config(format!(
                        "no provider configured for chain {chain_id}"
                    )));
                }
            }
        }

        info!(
            signer = %signer_address,
            deadline,
            pairs = contracts.pair_count(),
            "assembling price bundle"
        );

        let jobs: Vec<PairJob> = contracts
            .pairs()
            .map(|(chain_id, key, entry)| PairJob {
                chain_id,
                contract_key: key.to_string(),
                entry: entry.clone(),
                endpoint: config.provider(chain_id).cloned(),
            })
            .collect();

        let results: Vec<(PairJob, Result<SignatureRecord>)> = stream::iter(jobs)
            .map(|job| async move {
                let outcome = self
                    .sign_pair(&job, &config.signer_key_id, price, deadline, signer_address)
                    .await;
                (job, outcome)
            })
            .buffer_unordered(self.options.concurrency.max(1))
            .collect()
            .await;

        // Completion order is arbitrary; the bundle and the failure list are
        // rebuilt in sorted order so output is deterministic.
        let mut bundle = AttestationBundle::new(price, signer_address);
        let mut failures = Vec::new();
        for (job, outcome) in results {
            match outcome {
                Ok(record) => bundle.insert(job.chain_id, job.contract_key, record),
                Err(error) => failures.push(PairFailure {
                    chain_id: job.chain_id,
                    contract: job.contract_key,
                    error,
                }),
            }
        }
        failures.sort_by(|a, b| {
            (a.chain_id, a.contract.as_str()).cmp(&(b.chain_id, b.contract.as_str()))
        });
        for failure in &failures {
            warn!(
                chain = failure.chain_id,
                contract = %failure.contract,
                error = %failure.error,
                "pair failed"
            );
        }

        if self.options.failure_policy == FailurePolicy::Abort && !failures.is_empty() {
            let first = failures.remove(0);
            return Err(Error::for_pair(first.chain_id, first.contract, first.error));
        }

        Ok(AssemblyReport { bundle, failures })
    }

    /// Fetch the custody public key once and check it against the
    /// configured signer address. Every recovery downstream compares
    /// against this address.
    async fn resolve_signer(&self, config: &SignerConfig) -> Result<Address> {
        let spki = self.signer.public_key(&config.signer_key_id).await?;
        let derived = address::address_from_spki_der(&spki)?;
        if derived != config.signer_address {
            return Err(Error::SignerMismatch {
                derived,
                configured: config.signer_address,
            });
        }
        Ok(derived)
    }

    async fn sign_pair(
        &self,
        job: &PairJob,
        key_id: &str,
        price: &PriceInput,
        deadline: u64,
        signer_address: Address,
    ) -> Result<SignatureRecord> {
        let typed = typed_data::price_typed_data(
            &job.entry.spec,
            job.chain_id,
            job.entry.address,
            price.normalized,
            deadline,
        )?;
        let digest = typed_data::signing_digest(&typed)?;
        debug!(
            chain = job.chain_id,
            contract = %job.contract_key,
            digest = %digest,
            "signing digest"
        );

        let retry = self.options.retry;
        for cycle in 1..=retry.cycles {
            let der = self.sign_with_retry(key_id, digest, retry).await?;
            let signature = signing::signature_from_der(&der, digest, signer_address)?;

            if !self.options.verify_on_chain {
                return Ok(self.record(job, price, deadline, &signature));
            }

            if self.verify_with_retry(job, price, deadline, &signature, retry).await? {
                return Ok(self.record(job, price, deadline, &signature));
            }

            if (self.clock)() >= deadline {
                return Err(Error::VerificationFailed {
                    attempts: cycle,
                    reason: VerifyRejection::StaleDeadline,
                });
            }
            warn!(
                chain = job.chain_id,
                contract = %job.contract_key,
                cycle,
                "contract rejected signature, re-signing"
            );
            if cycle < retry.cycles {
                sleep(backoff_delay(retry.backoff, cycle)).await;
            }
        }
        Err(Error::VerificationFailed {
            attempts: retry.cycles,
            reason: VerifyRejection::Rejected,
        })
    }

    fn record(
        &self,
        job: &PairJob,
        price: &PriceInput,
        deadline: u64,
        signature: &Signature,
    ) -> SignatureRecord {
        SignatureRecord {
            chain_id: job.chain_id,
            token: address::checksummed(&job.entry.spec.token),
            price: price.normalized.to_string(),
            deadline: deadline.to_string(),
            signature: signing::signature_hex(signature),
        }
    }

    /// Custody signing with bounded retry and exponential backoff.
    /// Exhausting the budget converts the last error into
    /// `SigningUnavailable`.
    async fn sign_with_retry(
        &self,
        key_id: &str,
        digest: B256,
        retry: RetryPolicy,
    ) -> Result<Vec<u8>> {
        let mut last = None;
        for attempt in 1..=retry.sign_attempts {
            match self.signer.sign_digest(key_id, digest).await {
                Ok(der) => return Ok(der),
                Err(e) => {
                    warn!(attempt, error = %e, "custody signing attempt failed");
                    last = Some(e);
                    if attempt < retry.sign_attempts {
                        sleep(backoff_delay(retry.backoff, attempt)).await;
                    }
                }
            }
        }
        Err(Error::SigningUnavailable {
            attempts: retry.sign_attempts,
            last: last
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempts allowed".into()),
        })
    }

    /// On-chain check with bounded retry over transport failures. A clean
    /// accept or reject from the contract is returned as-is; a budget spent
    /// entirely on RPC failures surfaces the last RPC error.
    async fn verify_with_retry(
        &self,
        job: &PairJob,
        price: &PriceInput,
        deadline: u64,
        signature: &Signature,
        retry: RetryPolicy,
    ) -> Result<bool> {
        let endpoint = job.endpoint.as_ref().ok_or_else(|| {
            Error::Config(format!("no provider configured for chain {}", job.chain_id))
        })?;
        let signature_bytes = Bytes::from(signature.as_bytes().to_vec());
        let mut last = None;
        for attempt in 1..=retry.verify_attempts {
            match self
                .verifier
                .verify_price(
                    endpoint,
                    job.entry.address,
                    job.entry.spec.token,
                    price.normalized,
                    U256::from(deadline),
                    signature_bytes.clone(),
                )
                .await
            {
                Ok(accepted) => return Ok(accepted),
                Err(e) => {
                    warn!(
                        chain = job.chain_id,
                        attempt,
                        error = %e,
                        "verification rpc attempt failed"
                    );
                    last = Some(e);
                    if attempt < retry.verify_attempts {
                        sleep(backoff_delay(retry.backoff, attempt)).await;
                    }
                }
            }
        }
        Err(last.unwrap_or_else(|| Error::Rpc("no verification attempts allowed".into())))
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32 << (attempt - 1).min(8))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let base = Duration::from_millis(250);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(250));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(500));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(1000));
    }

    #[test]
    fn backoff_growth_is_capped() {
        let base = Duration::from_millis(250);
        assert_eq!(backoff_delay(base, 40), backoff_delay(base, 9));
    }

    #[test]
    fn abort_is_the_default_policy() {
        assert_eq!(AssemblyOptions::default().failure_policy, FailurePolicy::Abort);
    }

    #[test]
    fn deadline_offset_is_one_hour() {
        assert_eq!(PRICE_DEADLINE_SECS, 3_600);
    }
}

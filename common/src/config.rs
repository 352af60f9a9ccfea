use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use alloy_primitives::Address;
use serde::Deserialize;
use url::Url;

use crate::error::{Error, Result};

/// Runtime configuration for the signing side: which custody key to use,
/// which address it is expected to control, and one RPC provider per chain.
#[derive(Debug, Clone, Deserialize)]
pub struct SignerConfig {
    #[serde(rename = "signerKeyID")]
    pub signer_key_id: String,
    #[serde(rename = "signerAddress")]
    pub signer_address: Address,
    pub providers: BTreeMap<String, ProviderConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub url: Url,
}

impl SignerConfig {
    /// Read and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("read {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.signer_key_id.is_empty() {
            return Err(Error::Config("signerKeyID must not be empty".into()));
        }
        for chain in self.providers.keys() {
            parse_chain_id(chain)?;
        }
        Ok(())
    }

    /// RPC endpoint for a chain id, if one is configured.
    pub fn provider(&self, chain_id: u64) -> Option<&Url> {
        self.providers.get(&chain_id.to_string()).map(|p| &p.url)
    }
}

/// Per-contract attestation parameters: which token the price is for and
/// how the EIP-712 domain and message type are named.
#[derive(Debug, Clone, Deserialize)]
pub struct ContractSpec {
    pub token: Address,
    #[serde(rename = "domainName")]
    pub domain_name: String,
    #[serde(rename = "typeName")]
    pub type_name: String,
    pub version: String,
}

/// A verifying contract together with its parsed address. The original
/// config key string is kept alongside so bundle output reuses it verbatim.
#[derive(Debug, Clone)]
pub struct ContractEntry {
    pub address: Address,
    pub spec: ContractSpec,
}

/// The verifying-contract table: chain id to contract address to spec.
/// Chain keys in the JSON are decimal strings; they are normalized to u64
/// here so enumeration runs in ascending numeric order.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(try_from = "BTreeMap<String, BTreeMap<String, ContractSpec>>")]
pub struct VerifyingContracts {
    chains: BTreeMap<u64, BTreeMap<String, ContractEntry>>,
}

impl VerifyingContracts {
    /// Read and validate a JSON contract table.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("read {}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("parse {}: {e}", path.display())))
    }

    /// Add one contract under a chain. The key must parse as an address.
    pub fn insert(
        &mut self,
        chain_id: u64,
        contract: impl Into<String>,
        spec: ContractSpec,
    ) -> Result<()> {
        let key = contract.into();
        let address = parse_contract_key(chain_id, &key)?;
        self.chains
            .entry(chain_id)
            .or_default()
            .insert(key, ContractEntry { address, spec });
        Ok(())
    }

    /// Deterministic enumeration of every signable (chain, contract) pair,
    /// ascending by chain id and then by contract key.
    pub fn pairs(&self) -> impl Iterator<Item = (u64, &str, &ContractEntry)> + '_ {
        self.chains.iter().flat_map(|(chain_id, contracts)| {
            contracts
                .iter()
                .map(move |(key, entry)| (*chain_id, key.as_str(), entry))
        })
    }

    /// Total number of pairs across all chains.
    pub fn pair_count(&self) -> usize {
        self.chains.values().map(|m| m.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

impl TryFrom<BTreeMap<String, BTreeMap<String, ContractSpec>>> for VerifyingContracts {
    type Error = Error;

    fn try_from(raw: BTreeMap<String, BTreeMap<String, ContractSpec>>) -> Result<Self> {
        let mut table = Self::default();
        for (chain_key, contracts) in raw {
            let chain_id = parse_chain_id(&chain_key)?;
            for (contract_key, spec) in contracts {
                table.insert(chain_id, contract_key, spec)?;
            }
        }
        Ok(table)
    }
}

/// Parse a decimal chain-id key as stored in the config files.
pub fn parse_chain_id(key: &str) -> Result<u64> {
    key.parse::<u64>()
        .map_err(|_| Error::Config(format!("chain id key {key:?} is not a decimal integer")))
}

fn parse_contract_key(chain_id: u64, key: &str) -> Result<Address> {
    key.parse::<Address>().map_err(|_| {
        Error::Config(format!("contract key {key:?} on chain {chain_id} is not an address"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG_JSON: &str = r#"{
        "signerKeyID": "arn:aws:kms:us-east-1:111122223333:key/abcd",
        "signerAddress": "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf",
        "providers": {
            "1": { "url": "https://rpc.example/eth" },
            "137": { "url": "https://rpc.example/polygon" }
        }
    }"#;

    const CONTRACTS_JSON: &str = r#"{
        "137": {
            "0x0000000000000000000000000000000000000bbb": {
                "token": "0x0000000000000000000000000000000000000aaa",
                "domainName": "PriceOracle",
                "typeName": "PriceData",
                "version": "1"
            }
        },
        "1": {
            "0x0000000000000000000000000000000000000ccc": {
                "token": "0x0000000000000000000000000000000000000aaa",
                "domainName": "PriceOracle",
                "typeName": "PriceData",
                "version": "1"
            },
            "0x0000000000000000000000000000000000000ddd": {
                "token": "0x0000000000000000000000000000000000000aaa",
                "domainName": "PriceOracle",
                "typeName": "PriceData",
                "version": "2"
            }
        }
    }"#;

    #[test]
    fn parses_signer_config() {
        let config: SignerConfig = serde_json::from_str(CONFIG_JSON).unwrap();
        assert_eq!(config.signer_key_id, "arn:aws:kms:us-east-1:111122223333:key/abcd");
        assert!(config.provider(137).is_some());
        assert!(config.provider(42).is_none());
        config.validate().unwrap();
    }

    #[test]
    fn parses_contract_table_in_chain_order() {
        let table: VerifyingContracts = serde_json::from_str(CONTRACTS_JSON).unwrap();
        assert_eq!(table.pair_count(), 3);
        let chains: Vec<u64> = table.pairs().map(|(chain, _, _)| chain).collect();
        assert_eq!(chains, vec![1, 1, 137]);
    }

    #[test]
    fn contract_entries_carry_parsed_addresses() {
        let table: VerifyingContracts = serde_json::from_str(CONTRACTS_JSON).unwrap();
        let (chain, key, entry) = table.pairs().find(|(chain, _, _)| *chain == 137).unwrap();
        assert_eq!(chain, 137);
        assert_eq!(key, "0x0000000000000000000000000000000000000bbb");
        assert_eq!(
            entry.address,
            "0x0000000000000000000000000000000000000bbb".parse::<Address>().unwrap()
        );
        assert_eq!(entry.spec.domain_name, "PriceOracle");
    }

    #[test]
    fn default_table_is_empty() {
        assert!(VerifyingContracts::default().is_empty());
        let table: VerifyingContracts = serde_json::from_str(CONTRACTS_JSON).unwrap();
        assert!(!table.is_empty());
    }

    #[test]
    fn rejects_non_decimal_chain_key() {
        let raw = r#"{ "0x1": {} }"#;
        let err = serde_json::from_str::<VerifyingContracts>(raw).unwrap_err();
        assert!(err.to_string().contains("decimal"));
    }

    #[test]
    fn rejects_non_address_contract_key() {
        let raw = r#"{ "1": { "not-an-address": {
            "token": "0x0000000000000000000000000000000000000aaa",
            "domainName": "PriceOracle",
            "typeName": "PriceData",
            "version": "1"
        } } }"#;
        let err = serde_json::from_str::<VerifyingContracts>(raw).unwrap_err();
        assert!(err.to_string().contains("not an address"));
    }

    #[test]
    fn empty_key_id_fails_validation() {
        let mut config: SignerConfig = serde_json::from_str(CONFIG_JSON).unwrap();
        config.signer_key_id.clear();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}

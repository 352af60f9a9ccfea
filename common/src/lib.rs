pub mod address;
pub mod assembler;
pub mod config;
pub mod error;
pub mod signer;
pub mod signing;
pub mod typed_data;
pub mod verify;

use std::collections::BTreeMap;

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

pub use assembler::{
    Assembler, AssemblyOptions, AssemblyReport, FailurePolicy, PairFailure, RetryPolicy,
    PRICE_DEADLINE_SECS,
};
pub use config::{ContractSpec, SignerConfig, VerifyingContracts};
pub use error::{Error, Result};

/// Price input as produced by the upstream feed: the human-readable float
/// and the 18-decimal integer that actually gets signed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceInput {
    #[serde(rename = "priceFloat")]
    pub float: f64,
    #[serde(rename = "priceNormalized", with = "u256_decimal")]
    pub normalized: U256,
}

/// One signed price statement bound to a single chain and verifying
/// contract. `price` and `deadline` are decimal strings on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRecord {
    #[serde(rename = "chainID")]
    pub chain_id: u64,
    pub token: String,
    pub price: String,
    pub deadline: String,
    /// 0x-prefixed 65-byte r || s || v hex, v in {27, 28}.
    pub signature: String,
}

/// The published multi-chain attestation bundle. Chain keys are decimal
/// strings and contract keys are the configured address strings, matching
/// what downstream consumers index by.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttestationBundle {
    pub price: f64,
    pub price_normalized: String,
    pub signer: String,
    pub signatures: BTreeMap<String, BTreeMap<String, SignatureRecord>>,
}

impl AttestationBundle {
    /// Empty bundle carrying the price fields and the checksummed signer.
    pub fn new(price: &PriceInput, signer: Address) -> Self {
        Self {
            price: price.float,
            price_normalized: price.normalized.to_string(),
            signer: address::checksummed(&signer),
            signatures: BTreeMap::new(),
        }
    }

    /// File a record under its decimal chain id and contract key.
    pub fn insert(&mut self, chain_id: u64, contract: String, record: SignatureRecord) {
        self.signatures
            .entry(chain_id.to_string())
            .or_default()
            .insert(contract, record);
    }

    /// Total records across all chains.
    pub fn record_count(&self) -> usize {
        self.signatures.values().map(|m| m.len()).sum()
    }
}

mod u256_decimal {
    use alloy_primitives::U256;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Text(s) => s.parse::<U256>().map_err(de::Error::custom),
            Raw::Number(n) => Ok(U256::from(n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_input_accepts_string_normalized() {
        let input: PriceInput =
            serde_json::from_str(r#"{"priceFloat": 1.23, "priceNormalized": "1230000000000000000"}"#)
                .unwrap();
        assert_eq!(input.float, 1.23);
        assert_eq!(input.normalized.to_string(), "1230000000000000000");
    }

    #[test]
    fn price_input_accepts_integer_normalized() {
        let input: PriceInput =
            serde_json::from_str(r#"{"priceFloat": 1.23, "priceNormalized": 1230000000000000000}"#)
                .unwrap();
        assert_eq!(input.normalized.to_string(), "1230000000000000000");
    }

    #[test]
    fn bundle_serializes_with_wire_key_names() {
        let price: PriceInput = serde_json::from_str(
            r#"{"priceFloat": 1.23, "priceNormalized": "1230000000000000000"}"#,
        )
        .unwrap();
        let mut bundle = AttestationBundle::new(&price, Address::ZERO);
        bundle.insert(
            4,
            "0x0000000000000000000000000000000000000bbb".to_string(),
            SignatureRecord {
                chain_id: 4,
                token: "0x0000000000000000000000000000000000000aAa".to_string(),
                price: "1230000000000000000".to_string(),
                deadline: "1700003600".to_string(),
                signature: format!("0x{}", "ab".repeat(65)),
            },
        );

        let value = serde_json::to_value(&bundle).unwrap();
        assert_eq!(value["price"], 1.23);
        assert_eq!(value["price_normalized"], "1230000000000000000");
        assert!(value["signer"].is_string());
        let record = &value["signatures"]["4"]["0x0000000000000000000000000000000000000bbb"];
        assert_eq!(record["chainID"], 4);
        assert_eq!(record["price"], "1230000000000000000");
        assert_eq!(record["deadline"], "1700003600");
        assert_eq!(record["signature"].as_str().unwrap().len(), 132);
    }

    #[test]
    fn record_count_spans_chains() {
        let price: PriceInput = serde_json::from_str(
            r#"{"priceFloat": 2.0, "priceNormalized": "2000000000000000000"}"#,
        )
        .unwrap();
        let mut bundle = AttestationBundle::new(&price, Address::ZERO);
        let record = SignatureRecord {
            chain_id: 1,
            token: String::new(),
            price: String::new(),
            deadline: String::new(),
            signature: String::new(),
        };
        bundle.insert(1, "0xa".into(), record.clone());
        bundle.insert(1, "0xb".into(), record.clone());
        bundle.insert(137, "0xa".into(), SignatureRecord { chain_id: 137, ..record });
        assert_eq!(bundle.record_count(), 3);
    }
}

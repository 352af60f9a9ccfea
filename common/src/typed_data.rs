use alloy_dyn_abi::TypedData;
use alloy_primitives::{Address, B256, U256};
use serde_json::json;

use crate::config::ContractSpec;
use crate::error::{Error, Result};

/// Build the EIP-712 typed-data document for one price attestation.
/// The domain binds `chain_id` and `verifying_contract`, so the same price
/// yields a distinct digest on every chain and contract. The message carries
/// `(token, price, deadline)` under the configured primary type name.
pub fn price_typed_data(
    spec: &ContractSpec,
    chain_id: u64,
    verifying_contract: Address,
    price: U256,
    deadline: u64,
) -> Result<TypedData> {
    let mut types = serde_json::Map::new();
    types.insert(
        "EIP712Domain".to_string(),
        json!([
            { "name": "name", "type": "string" },
            { "name": "version", "type": "string" },
            { "name": "chainId", "type": "uint256" },
            { "name": "verifyingContract", "type": "address" },
        ]),
    );
    types.insert(
        spec.type_name.clone(),
        json!([
            { "name": "token", "type": "address" },
            { "name": "price", "type": "uint256" },
            { "name": "deadline", "type": "uint256" },
        ]),
    );

    let document = json!({
        "types": types,
        "primaryType": spec.type_name,
        "domain": {
            "name": spec.domain_name,
            "version": spec.version,
            "chainId": chain_id,
            "verifyingContract": verifying_contract,
        },
        "message": {
            "token": spec.token,
            "price": price.to_string(),
            "deadline": deadline.to_string(),
        },
    });

    serde_json::from_value(document).map_err(|e| Error::Schema(format!("invalid typed data: {e}")))
}

/// Compute the bytes32 signing digest for a typed-data document:
/// keccak256("\x19\x01" || domainSeparator || hashStruct(message)).
pub fn signing_digest(typed: &TypedData) -> Result<B256> {
    typed
        .eip712_signing_hash()
        .map_err(|e| Error::Schema(format!("failed computing EIP-712 digest: {e}")))
}

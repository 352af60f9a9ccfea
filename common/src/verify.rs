use alloy_primitives::{Address, Bytes, U256};
use alloy_provider::ProviderBuilder;
use alloy_sol_types::sol;
use async_trait::async_trait;
use url::Url;

use crate::error::{Error, Result};

sol! {
    #[sol(rpc)]
    interface IPriceVerifier {
        function verifyPrice(
            address token,
            uint256 price,
            uint256 deadline,
            bytes signature
        ) external view returns (bool);
    }
}

/// On-chain acceptance check for an assembled signature.
#[async_trait]
pub trait ChainVerifier: Send + Sync {
    /// Ask the verifying contract whether it accepts the signature.
    /// `Ok(false)` is a clean rejection by the contract; `Err` means the
    /// call itself failed (transport, node, revert).
    async fn verify_price(
        &self,
        endpoint: &Url,
        contract: Address,
        token: Address,
        price: U256,
        deadline: U256,
        signature: Bytes,
    ) -> Result<bool>;
}

/// Verifier backed by an `eth_call` to the target chain's JSON-RPC node.
#[derive(Debug, Clone, Copy, Default)]
pub struct RpcVerifier;

#[async_trait]
impl ChainVerifier for RpcVerifier {
    async fn verify_price(
        &self,
        endpoint: &Url,
        contract: Address,
        token: Address,
        price: U256,
        deadline: U256,
        signature: Bytes,
    ) -> Result<bool> {
        let provider = ProviderBuilder::new().connect_http(endpoint.clone());
        let verifier = IPriceVerifier::new(contract, provider);
        verifier
            .verifyPrice(token, price, deadline, signature)
            .call()
            .await
            .map_err(|e| Error::Rpc(format!("verifyPrice on {contract} failed: {e}")))
    }
}

use alloy_primitives::{Address, B256};
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use k256::pkcs8::EncodePublicKey;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

/// A custody service holding the signing key. The private key never leaves
/// the service; callers submit 32-byte digests and get back DER ECDSA
/// signatures, exactly as KMS-style HSM backends behave.
#[async_trait]
pub trait RemoteSigner: Send + Sync {
    /// DER-encoded SPKI public key for a custody key id.
    async fn public_key(&self, key_id: &str) -> Result<Vec<u8>>;

    /// Sign a precomputed 32-byte digest, returning the DER signature.
    async fn sign_digest(&self, key_id: &str, digest: B256) -> Result<Vec<u8>>;
}

/// Client for an HTTP custody service speaking hex-over-JSON.
///
/// `GET {base}/keys/{id}/public-key` returns `{"publicKey": "<hex DER>"}`;
/// `POST {base}/keys/{id}/sign` with `{"digest": "0x..."}` returns
/// `{"signature": "<hex DER>"}`.
#[derive(Debug, Clone)]
pub struct HttpCustodySigner {
    base_url: Url,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct SignRequest<'a> {
    digest: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignResponse {
    signature: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublicKeyResponse {
    public_key: String,
}

impl HttpCustodySigner {
    pub fn new(base_url: Url) -> Self {
        Self { base_url, client: reqwest::Client::new() }
    }

    fn endpoint(&self, key_id: &str, leaf: &str) -> Result<Url> {
        self.base_url
            .join(&format!("keys/{key_id}/{leaf}"))
            .map_err(|e| Error::Signing(format!("bad custody url: {e}")))
    }
}

#[async_trait]
impl RemoteSigner for HttpCustodySigner {
    async fn public_key(&self, key_id: &str) -> Result<Vec<u8>> {
        let url = self.endpoint(key_id, "public-key")?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Signing(format!("custody request failed: {e}")))?;
        let response = ok_or_status_error(response).await?;
        let body: PublicKeyResponse = response
            .json()
            .await
            .map_err(|e| Error::Signing(format!("custody response decode failed: {e}")))?;
        decode_hex_field("publicKey", &body.public_key)
    }

    async fn sign_digest(&self, key_id: &str, digest: B256) -> Result<Vec<u8>> {
        let url = self.endpoint(key_id, "sign")?;
        let digest_hex = format!("0x{}", hex::encode(digest));
        let response = self
            .client
            .post(url)
            .json(&SignRequest { digest: &digest_hex })
            .send()
            .await
            .map_err(|e| Error::Signing(format!("custody request failed: {e}")))?;
        let response = ok_or_status_error(response).await?;
        let body: SignResponse = response
            .json()
            .await
            .map_err(|e| Error::Signing(format!("custody response decode failed: {e}")))?;
        decode_hex_field("signature", &body.signature)
    }
}

async fn ok_or_status_error(response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(Error::Signing(format!("custody returned {status}: {body}")))
}

fn decode_hex_field(field: &str, value: &str) -> Result<Vec<u8>> {
    hex::decode(value.trim_start_matches("0x"))
        .map_err(|e| Error::Signing(format!("custody field {field} is not hex: {e}")))
}

/// In-process signer for development and tests. Holds a plain secp256k1
/// key and mimics the custody response shape, DER signatures included, so
/// the canonicalization and recovery path stays identical.
#[derive(Debug, Clone)]
pub struct LocalKeySigner {
    inner: PrivateKeySigner,
}

impl LocalKeySigner {
    pub fn new(inner: PrivateKeySigner) -> Self {
        Self { inner }
    }

    /// Address controlled by the held key.
    pub fn address(&self) -> Address {
        self.inner.address()
    }
}

#[async_trait]
impl RemoteSigner for LocalKeySigner {
    async fn public_key(&self, _key_id: &str) -> Result<Vec<u8>> {
        let der = self
            .inner
            .credential()
            .verifying_key()
            .to_public_key_der()
            .map_err(|e| Error::KeyFormat(format!("public key encode failed: {e}")))?;
        Ok(der.into_vec())
    }

    async fn sign_digest(&self, _key_id: &str, digest: B256) -> Result<Vec<u8>> {
        let (signature, _) = self
            .inner
            .credential()
            .sign_prehash_recoverable(digest.as_slice())
            .map_err(|e| Error::Signing(format!("local signing failed: {e}")))?;
        Ok(signature.to_der().as_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::address_from_spki_der;
    use crate::signing::signature_from_der;
    use alloy_primitives::keccak256;
    use k256::ecdsa::SigningKey;

    fn local_signer() -> LocalKeySigner {
        let mut secret = [0u8; 32];
        secret[31] = 42;
        LocalKeySigner::new(PrivateKeySigner::from_signing_key(
            SigningKey::from_slice(&secret).unwrap(),
        ))
    }

    #[tokio::test]
    async fn public_key_derives_the_signer_address() {
        let signer = local_signer();
        let spki = signer.public_key("any").await.unwrap();
        let derived = address_from_spki_der(&spki).unwrap();
        assert_eq!(derived, signer.address());
    }

    #[tokio::test]
    async fn signatures_recover_to_the_signer_address() {
        let signer = local_signer();
        let digest = keccak256(b"digest under test");
        let der = signer.sign_digest("any", digest).await.unwrap();
        let recovered = signature_from_der(&der, digest, signer.address()).unwrap();
        assert_eq!(
            recovered.recover_address_from_prehash(&digest).unwrap(),
            signer.address()
        );
    }
}

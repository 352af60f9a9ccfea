use alloy_primitives::{keccak256, Address};
use k256::ecdsa::VerifyingKey;
use k256::pkcs8::DecodePublicKey;

use crate::error::{Error, Result};

/// Derive the EVM address for a DER-encoded SPKI secp256k1 public key, as
/// returned by custody services. The address is the low 20 bytes of
/// keccak256 over the 64-byte uncompressed point (0x04 prefix stripped).
pub fn address_from_spki_der(der: &[u8]) -> Result<Address> {
    let key = VerifyingKey::from_public_key_der(der)
        .map_err(|e| Error::KeyFormat(format!("not a DER secp256k1 public key: {e}")))?;
    Ok(address_from_key(&key))
}

/// Address of an already-parsed secp256k1 public key.
pub fn address_from_key(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

/// EIP-55 checksummed string form of an address.
pub fn checksummed(address: &Address) -> String {
    address.to_checksum(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::SigningKey;
    use k256::pkcs8::EncodePublicKey;

    fn key_from_byte(last: u8) -> SigningKey {
        let mut secret = [0u8; 32];
        secret[31] = last;
        SigningKey::from_slice(&secret).unwrap()
    }

    #[test]
    fn derives_known_address() {
        // Private key 0x...01 controls this address.
        let der = key_from_byte(1).verifying_key().to_public_key_der().unwrap();
        let address = address_from_spki_der(der.as_bytes()).unwrap();
        assert_eq!(checksummed(&address), "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf");
    }

    #[test]
    fn distinct_keys_derive_distinct_addresses() {
        let a = address_from_key(key_from_byte(1).verifying_key());
        let b = address_from_key(key_from_byte(2).verifying_key());
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_garbage_der() {
        let err = address_from_spki_der(&[0u8; 16]).unwrap_err();
        assert!(matches!(err, Error::KeyFormat(_)));
    }

    #[test]
    fn checksum_mixes_case() {
        let address = address_from_key(key_from_byte(1).verifying_key());
        let rendered = checksummed(&address);
        assert!(rendered.starts_with("0x"));
        assert!(rendered.chars().any(|c| c.is_ascii_uppercase()));
        assert!(rendered.chars().any(|c| c.is_ascii_lowercase()));
    }
}

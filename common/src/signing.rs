use alloy_primitives::{Address, Signature, B256, U256};
use k256::ecdsa;

use crate::error::{Error, Result};

/// Decode a DER `SEQUENCE { r INTEGER, s INTEGER }` ECDSA signature and
/// canonicalize `s` to the low half of the curve order. Custody services
/// may return either `s` form; Ethereum contracts only accept low-s.
pub fn decode_der_signature(der: &[u8]) -> Result<(U256, U256)> {
    let mut sig = ecdsa::Signature::from_der(der)
        .map_err(|e| Error::SignatureFormat(format!("bad DER ECDSA signature: {e}")))?;
    if let Some(normalized) = sig.normalize_s() {
        sig = normalized;
    }
    let (r, s) = sig.split_bytes();
    Ok((U256::from_be_slice(r.as_slice()), U256::from_be_slice(s.as_slice())))
}

/// Search both recovery ids for the one that recovers `expected` from
/// `digest`. Returns the full signature; its 65-byte form carries
/// v = 27 or 28. Failing both candidates means the key behind the
/// signature is not the expected signer, so retrying cannot help.
pub fn recover_signature(r: U256, s: U256, digest: B256, expected: Address) -> Result<Signature> {
    for y_parity in [false, true] {
        let candidate = Signature::new(r, s, y_parity);
        match candidate.recover_address_from_prehash(&digest) {
            Ok(address) if address == expected => return Ok(candidate),
            Ok(_) | Err(_) => continue,
        }
    }
    Err(Error::NoValidRecoveryId { expected })
}

/// Full handling of one custody response: DER decode, low-s
/// canonicalization, recovery-id search against the expected signer.
pub fn signature_from_der(der: &[u8], digest: B256, expected: Address) -> Result<Signature> {
    let (r, s) = decode_der_signature(der)?;
    recover_signature(r, s, digest, expected)
}

/// 0x-prefixed lowercase hex of the 65-byte r || s || v form.
pub fn signature_hex(signature: &Signature) -> String {
    format!("0x{}", hex::encode(signature.as_bytes()))
}

//! ECDSA-P256 verification (spec.md §4.4's pluggable "concrete signature
//! suite"), grounded on the teacher's `rustBoot/src/crypto/signatures.rs`:
//! a SEC1-encoded public key, a raw `r || s` signature, verified against a
//! digest the caller has already computed.

use p256::ecdsa::signature::hazmat::PrehashVerifier;
use p256::ecdsa::{Signature, VerifyingKey};

use crate::config::ECC_SIGNATURE_SIZE;
use crate::{Error, Result};

/// Import a SEC1-encoded (compressed or uncompressed) P256 public key the
/// way the teacher's `import_pubkey` does, then verify `signature`
/// (`r || s`, big-endian, `ECC_SIGNATURE_SIZE` bytes) against `digest`.
pub fn verify_p256(key_bytes: &[u8], digest: &[u8], signature: &[u8]) -> Result<()> {
    if signature.len() != ECC_SIGNATURE_SIZE {
        return Err(Error::SignatureBad);
    }

    let verifying_key = VerifyingKey::from_sec1_bytes(key_bytes).map_err(|_| Error::KeyUnknown)?;
    let sig = Signature::try_from(signature).map_err(|_| Error::SignatureBad)?;

    verifying_key
        .verify_prehash(digest, &sig)
        .map_err(|_| Error::SignatureBad)
}

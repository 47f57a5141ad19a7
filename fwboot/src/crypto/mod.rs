//! Authentication layer above the image header (spec.md §4.4).
//!
//! `verify` is a pure predicate over a parsed [`ImageHeader`](crate::header::ImageHeader)
//! and the image payload: it recomputes the payload's SHA-256 digest,
//! checks it against the header's `SHA256` TLV, looks the header's
//! `PUBKEY_HINT` up in the compiled-in [`Keystore`], and checks the
//! `SIGNATURE` TLV against that key. The concrete signature suite is a
//! compile-time choice (spec.md §4.4); this build carries ECDSA-P256 the
//! way the teacher crate does, behind the `nistp256` feature.

#[cfg(feature = "nistp256")]
pub mod signatures;

use sha2::{Digest, Sha256};

use crate::config::{PUBKEY_HINT_SIZE, SHA256_DIGEST_SIZE};
use crate::header::ImageHeader;
use crate::{Error, Result};

/// One compiled-in authorised public key: a hint (conventionally the
/// SHA-256 of the encoded public key) paired with the key material itself,
/// in the encoding the active signature suite expects (SEC1 for P256).
pub struct KnownKey<'a> {
    pub hint: &'a [u8; PUBKEY_HINT_SIZE],
    pub key_bytes: &'a [u8],
}

/// The set of public keys this bootloader build trusts. Boards compile a
/// fixed keystore in; there is no runtime key provisioning (spec.md §1,
/// "keystore file generation" is explicitly out of scope here).
pub struct Keystore<'a> {
    keys: &'a [KnownKey<'a>],
}

impl<'a> Keystore<'a> {
    pub const fn new(keys: &'a [KnownKey<'a>]) -> Self {
        Keystore { keys }
    }

    fn find(&self, hint: &[u8; PUBKEY_HINT_SIZE]) -> Option<&KnownKey<'a>> {
        self.keys.iter().find(|k| k.hint == hint)
    }
}

/// Verify `header` against a precomputed payload digest: the digest must
/// match the header's `SHA256` TLV, and the signature must verify under a
/// key the keystore recognises by `PUBKEY_HINT`. Split out from [`verify`]
/// so a caller with the payload spread across flash sectors (the common
/// case for an image too large to hold in RAM at once) can stream the hash
/// itself instead of assembling a contiguous in-memory slice; see
/// `state_machine::hash_partition_payload`.
pub fn verify_digest(
    header: &ImageHeader<'_>,
    digest: &[u8; SHA256_DIGEST_SIZE],
    keystore: &Keystore<'_>,
) -> Result<()> {
    if digest != header.sha256 {
        return Err(Error::SignatureBad);
    }

    authenticate(header, digest, keystore)
}

/// Verify `header` against `payload` held entirely in memory. Convenience
/// wrapper over [`verify_digest`] for small test images and hosts that can
/// afford an in-memory payload.
pub fn verify(header: &ImageHeader<'_>, payload: &[u8], keystore: &Keystore<'_>) -> Result<()> {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    let digest: [u8; SHA256_DIGEST_SIZE] = hasher.finalize().into();
    verify_digest(header, &digest, keystore)
}

// `no-auth` always wins when both features are active: it exists purely
// so host-side tests of the trailer/selector/swap machinery don't need a
// real signing key or a populated keystore, and that should hold
// regardless of which other signature-suite features happen to be
// compiled in.
#[cfg(feature = "no-auth")]
fn authenticate(_header: &ImageHeader<'_>, _digest: &[u8; SHA256_DIGEST_SIZE], _keystore: &Keystore<'_>) -> Result<()> {
    Ok(())
}

#[cfg(all(feature = "nistp256", not(feature = "no-auth")))]
fn authenticate(header: &ImageHeader<'_>, digest: &[u8; SHA256_DIGEST_SIZE], keystore: &Keystore<'_>) -> Result<()> {
    let key = keystore.find(header.pubkey_hint).ok_or(Error::KeyUnknown)?;
    signatures::verify_p256(key.key_bytes, digest, header.signature)
}

#[cfg(not(any(feature = "nistp256", feature = "no-auth")))]
compile_error!("fwboot: enable the \"nistp256\" feature or, for test builds only, \"no-auth\"");

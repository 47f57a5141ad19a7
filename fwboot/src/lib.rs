//! Core of a secure, power-fail-safe A/B firmware update bootloader.
//!
//! This crate implements the durable state machine and non-volatile
//! metadata manager that a bootloader needs to survive arbitrary power loss
//! while swapping a `BOOT` and `UPDATE` partition: the partition trailer
//! codec, the NVM "fresh sector" selector, the authenticated image header
//! parser, the sector-granular swap engine and the top-level boot state
//! machine that ties them together.
//!
//! MCU-specific concerns (flash erase/write primitives, UART bootstrap,
//! ELF loading, transport of firmware chunks) are treated as external
//! collaborators behind the [`flash::Flash`] trait and are not part of this
//! crate.

#![cfg_attr(not(any(feature = "std", test)), no_std)]

pub mod config;
pub mod crypto;
pub mod flash;
pub mod header;
pub mod selector;
pub mod state_machine;
pub mod swap;
pub mod trailer;

use core::fmt;

/// Errors produced by any component in this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The underlying flash HAL refused a read, write or erase.
    HalIo,
    /// A trailer sector's magic word was neither `"BOOT"` nor all-`0xFF`.
    Corrupt,
    /// An operation is not permitted in the partition's current state.
    InvalidState,
    /// A sector-flag byte did not decode to one of the four known values.
    InvalidSectorFlag,
    /// The image header's magic word did not match.
    HeaderMalformed,
    /// A TLV's declared length runs past the end of the header.
    HeaderTruncated,
    /// A mandatory TLV tag is missing from the header.
    TlvNotFound,
    /// A mandatory TLV tag appeared more than once.
    DuplicateTlv,
    /// The image is larger than its partition can hold.
    SizeExceeded,
    /// Signature verification failed.
    SignatureBad,
    /// `PUBKEY_HINT` does not match any key in the keystore.
    KeyUnknown,
    /// A raw value (e.g. a TLV payload) had the wrong length for its field.
    InvalidValue,
}

pub type Result<T> = core::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::HalIo => write!(f, "flash HAL I/O failure"),
            Error::Corrupt => write!(f, "trailer sector is corrupt"),
            Error::InvalidState => write!(f, "operation not permitted in current state"),
            Error::InvalidSectorFlag => write!(f, "sector flag byte is invalid"),
            Error::HeaderMalformed => write!(f, "image header is malformed"),
            Error::HeaderTruncated => write!(f, "TLV field exceeds header bounds"),
            Error::TlvNotFound => write!(f, "mandatory TLV tag not found"),
            Error::DuplicateTlv => write!(f, "mandatory TLV tag appears more than once"),
            Error::SizeExceeded => write!(f, "image does not fit in partition"),
            Error::SignatureBad => write!(f, "signature verification failed"),
            Error::KeyUnknown => write!(f, "pubkey hint does not match any known key"),
            Error::InvalidValue => write!(f, "field has an invalid value"),
        }
    }
}

//! Target memory map and wire-format constants.
//!
//! Split the way the teacher crate splits it: board geometry
//! (`SECTOR_SIZE`, partition base addresses) in one place so a board port
//! only touches this module, and protocol constants (magic words, TLV tag
//! ids, header offsets) that never change across boards below.

/// Erase granularity of the flash device. Must be a power of two.
pub const SECTOR_SIZE: usize = 4096;

/// Size of each of the BOOT and UPDATE partitions, trailer pair included.
/// Must be a multiple of `SECTOR_SIZE` and hold at least three sectors (one
/// payload sector plus the two trailer sectors).
pub const PARTITION_SIZE: usize = 0x28000;

pub const BOOT_PARTITION_ADDRESS: usize = 0x2f000;
pub const SWAP_PARTITION_ADDRESS: usize = 0x57000;
pub const UPDATE_PARTITION_ADDRESS: usize = 0x58000;

/// Maximum number of per-sector flag nibbles tracked per partition. Bounds
/// the `heapless::Vec` used to hold a decoded trailer's sector-flag array;
/// must be >= `PARTITION_SIZE / SECTOR_SIZE - 2`.
pub const MAX_SECTORS: usize = 64;

/// Fixed length of the image header, magic + size + TLV stream + padding.
pub const IMAGE_HEADER_SIZE: usize = 256;

/// Image header magic word, `"WOLF"`.
pub const IMAGE_MAGIC: [u8; 4] = *b"WOLF";

/// Trailer magic word, `"BOOT"`, present iff a trailer sector is fresh.
pub const TRAILER_MAGIC: [u8; 4] = *b"BOOT";

/// Offset of the magic word, the state byte, the migration-epoch byte and
/// the reserved bytes from the *end* of a trailer sector (spec.md §6:
/// `P-4`, `P-5`, `P-8`).
pub const TRAILER_MAGIC_OFFSET: usize = 4;
pub const TRAILER_STATE_OFFSET: usize = 5;
/// Bumped by one on every `selector::migrate` commit, regardless of what
/// else changed in the trailer. The selector's bank tie-break compares this
/// before it compares per-sector flag progression, since a migration (e.g.
/// `swap::restage`) can legitimately *lower* flag progression; a byte that
/// only ever counts migrations upward cannot be fooled by that.
pub const TRAILER_EPOCH_OFFSET: usize = 6;
pub const TRAILER_RESERVED_OFFSET: usize = 8;
pub const TRAILER_RESERVED_LEN: usize = 2;
/// Sector flags begin immediately below the reserved bytes and grow toward
/// lower addresses, two nibbles (sectors) per byte.
pub const TRAILER_FLAGS_OFFSET: usize = 9;

/// TLV tag ids, like the rest of the header, little-endian on the wire
/// (spec.md §6).
pub const TAG_VERSION: u16 = 0x01;
pub const TAG_TIMESTAMP: u16 = 0x02;
pub const TAG_SHA256: u16 = 0x03;
pub const TAG_IMG_TYPE: u16 = 0x04;
pub const TAG_PUBKEY_HINT: u16 = 0x10;
pub const TAG_SIGNATURE: u16 = 0x20;

pub const SHA256_DIGEST_SIZE: usize = 32;
pub const PUBKEY_HINT_SIZE: usize = 32;
/// An ECDSA-P256 signature, `r || s`, each 32 bytes.
pub const ECC_SIGNATURE_SIZE: usize = 64;

/// App image type, the only `IMG_TYPE` this bootloader will boot.
pub const IMG_TYPE_APP: u16 = 0x0001;

/// Size of the key `set_encrypt_key` accepts (spec.md §6), a 256-bit key
/// for whatever at-rest cipher the board's flash driver applies.
pub const ENCRYPT_KEY_SIZE: usize = 32;

/// Number of payload sectors available in a partition of the given total
/// size: the two trailer sectors (spec.md §3 "trailer pair") are reserved.
pub const fn payload_sectors(partition_size: usize, sector_size: usize) -> usize {
    partition_size / sector_size - 2
}

/// A contiguous flash region (spec.md §3 "Partition" entity): base address
/// plus total size, trailer pair included. `BOOT` and `UPDATE` partitions
/// carry a trailer pair at their high end; `SWAP` is a single bare sector.
#[derive(Debug, Clone, Copy)]
pub struct Partition {
    pub base: usize,
    pub size: usize,
}

impl Partition {
    pub const fn new(base: usize, size: usize) -> Self {
        Partition { base, size }
    }

    /// Number of image payload sectors this partition holds.
    pub const fn num_sectors(&self, sector_size: usize) -> usize {
        payload_sectors(self.size, sector_size)
    }

    /// Base address of the payload region (the image header lives at the
    /// start of this).
    pub const fn payload_base(&self) -> usize {
        self.base
    }

    /// Base address of trailer bank 0 (nearer the partition's start, among
    /// the two trailer sectors), counted from the partition's end.
    pub const fn trailer_base(&self, sector_size: usize) -> usize {
        self.base + self.size - 2 * sector_size
    }
}

/// The three partitions this build's memory map defines, built from the
/// board addresses above.
pub const BOOT: Partition = Partition::new(BOOT_PARTITION_ADDRESS, PARTITION_SIZE);
pub const UPDATE: Partition = Partition::new(UPDATE_PARTITION_ADDRESS, PARTITION_SIZE);
/// The swap scratch region: exactly one sector, no trailer.
pub const SWAP: Partition = Partition::new(SWAP_PARTITION_ADDRESS, SECTOR_SIZE);

//! In-process simulated NOR flash.
//!
//! Backs `fwboot`'s unit tests and this workspace's integration tests.
//! Enforces write-once (bit-clear only) semantics the way real NOR flash
//! does, so invariants that depend on it (spec.md §3 invariants 2 and 4,
//! testable properties P2/P3) can be checked without real hardware — this
//! is the exact role `spec.md` §9 assigns to a "test double [that]
//! implement[s] the same capability over an in-process byte array".
//!
//! Grounded on the `simflash` crate in the sibling `mcu-tools-mcuboot-rs`
//! example (in-process byte buffer backing a flash device) and on the
//! `hal_flash_*` refcounted lock shape from the teacher's
//! `rustBoot-hal::FlashInterface`.

use std::vec;
use std::vec::Vec;

use fwboot::flash::Flash;
use fwboot::{Error, Result};

/// A simulated flash device with `SECTOR` byte erase granularity.
///
/// `SECTOR` is a const generic so tests can build a device whose erase
/// size matches `fwboot::config::SECTOR_SIZE` without carrying a runtime
/// parameter through every call site.
pub struct SimFlash<const SECTOR: usize> {
    data: Vec<u8>,
    write_size: usize,
    lock_depth: i32,
    /// Offsets passed to `erase`, in call order — lets a test assert which
    /// bank the selector erased (spec.md §8 scenario 3).
    pub erase_log: Vec<usize>,
}

/// Default backing-store size: large enough to hold BOOT, UPDATE and SWAP
/// partitions at the default `fwboot::config` addresses.
const DEFAULT_CAPACITY: usize = 0x10_0000;

impl<const SECTOR: usize> SimFlash<SECTOR> {
    pub fn new(write_size: usize) -> Self {
        Self::with_capacity(write_size, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(write_size: usize, capacity: usize) -> Self {
        SimFlash {
            data: vec![0xFF; capacity],
            write_size,
            lock_depth: 0,
            erase_log: Vec::new(),
        }
    }

    /// Direct read of the raw backing store, bypassing alignment checks —
    /// used by tests asserting exact byte contents (spec.md §8 scenario 1:
    /// "BOOT payload byte-for-byte equals the image").
    pub fn raw(&self) -> &[u8] {
        &self.data
    }

    /// Flip one pseudo-random bit of `data[offset]`, seeded so a test can
    /// reproduce the exact corruption it asserts about. Bypasses the
    /// write-once check [`Flash::write`] enforces — this models a genuine
    /// flash bit error, not an ordinary program operation, the same
    /// distinction `spec.md` §4.2 draws between `Corrupt` (bit damage) and
    /// an incomplete write sequence (`Blank`).
    #[cfg(test)]
    fn corrupt_bit(&mut self, offset: usize, seed: u64) {
        use rand::{Rng, SeedableRng};
        use rand_xoshiro::Xoshiro256Plus;
        let mut rng = Xoshiro256Plus::seed_from_u64(seed);
        let bit = 1u8 << rng.gen_range(0..8);
        self.data[offset] ^= bit;
    }
}

impl<const SECTOR: usize> Flash for SimFlash<SECTOR> {
    fn write_size(&self) -> usize {
        self.write_size
    }

    fn erase_size(&self) -> usize {
        SECTOR
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }

    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<()> {
        if offset + buf.len() > self.data.len() {
            return Err(Error::HalIo);
        }
        buf.copy_from_slice(&self.data[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: usize, buf: &[u8]) -> Result<()> {
        if self.lock_depth <= 0 {
            return Err(Error::HalIo);
        }
        if self.write_size != 0
            && (offset % self.write_size != 0 || buf.len() % self.write_size != 0)
        {
            return Err(Error::HalIo);
        }
        if offset + buf.len() > self.data.len() {
            return Err(Error::HalIo);
        }
        for (i, &byte) in buf.iter().enumerate() {
            let current = self.data[offset + i];
            // NOR flash can only clear bits; setting a `0` bit back to `1`
            // without an intervening erase is a HAL fault.
            if (byte & !current) != 0 {
                return Err(Error::HalIo);
            }
            self.data[offset + i] = byte;
        }
        Ok(())
    }

    fn erase(&mut self, offset: usize, len: usize) -> Result<()> {
        if self.lock_depth <= 0 {
            return Err(Error::HalIo);
        }
        if offset % SECTOR != 0 || len % SECTOR != 0 || offset + len > self.data.len() {
            return Err(Error::HalIo);
        }
        for b in &mut self.data[offset..offset + len] {
            *b = 0xFF;
        }
        self.erase_log.push(offset);
        Ok(())
    }

    fn unlock(&mut self) {
        self.lock_depth += 1;
    }

    fn lock(&mut self) {
        self.lock_depth -= 1;
    }

    fn reboot(&mut self) -> ! {
        panic!("fwboot_hal::sim::SimFlash::reboot — simulated MCU reset");
    }
}

//! The flash HAL contract (spec.md §4.1, §6).
//!
//! This crate treats the flash driver as an external collaborator: a MCU
//! port implements [`Flash`] once for its flash controller, and every other
//! component in this crate (trailer codec, selector, swap engine, boot
//! state machine) is generic over it. Test code implements the same trait
//! over an in-process byte array (see the `fwboot-hal` crate's `SimFlash`).

use crate::Result;

/// Narrow contract a concrete flash driver must uphold.
///
/// `read`/`write`/`erase` operate on a flat byte-offset address space; a
/// caller maps partition-relative offsets to absolute ones before calling
/// in. Write-once NOR semantics (`write` may only clear bits) are a
/// property of a correct implementation, not of this trait — test doubles
/// enforce it explicitly so properties that depend on it are checkable
/// without real hardware (spec.md §9).
pub trait Flash {
    /// Programming granule: `write` offsets and lengths must be multiples
    /// of this value.
    fn write_size(&self) -> usize;
    /// Erase granule: `erase` offsets and lengths must be multiples of
    /// this value.
    fn erase_size(&self) -> usize;
    /// Total addressable size of the device.
    fn capacity(&self) -> usize;

    /// Direct, unconditional read. Implementations may serve this from a
    /// memory-mapped region.
    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<()>;
    /// Write-once: may only clear bits that currently read `1`. A caller
    /// that tries to set a bit from `0` to `1` gets [`crate::Error::HalIo`].
    fn write(&mut self, offset: usize, buf: &[u8]) -> Result<()>;
    /// Erase a sector-aligned range back to all-`0xFF`.
    fn erase(&mut self, offset: usize, len: usize) -> Result<()>;

    /// Acquire the write-enable capability. Nested calls are refcounted by
    /// the implementation; the device is unlocked on the first call and
    /// stays unlocked until a matching number of [`Flash::lock`] calls.
    fn unlock(&mut self);
    /// Release one level of the write-enable capability.
    fn lock(&mut self);

    /// Reset the MCU. Never returns.
    fn reboot(&mut self) -> !;
}

/// RAII guard around the HAL's refcounted unlock/lock pair (spec.md §5):
/// acquired for the duration of a durable multi-step operation (a trailer
/// rewrite, one sector of a swap) and released at its boundary regardless
/// of how the scope exits.
pub struct CriticalSection<'a, F: Flash> {
    flash: &'a mut F,
}

impl<'a, F: Flash> CriticalSection<'a, F> {
    pub fn enter(flash: &'a mut F) -> Self {
        flash.unlock();
        CriticalSection { flash }
    }

    pub fn flash(&mut self) -> &mut F {
        self.flash
    }
}

impl<'a, F: Flash> Drop for CriticalSection<'a, F> {
    fn drop(&mut self) {
        self.flash.lock();
    }
}

//! Sector-granular A/B swap engine (spec.md §4.5, C5).
//!
//! Exchanges the BOOT and UPDATE partitions' payload sectors one at a time
//! using the single-sector SWAP partition as scratch. Per-sector progress
//! is tracked by a single flag, stored only in UPDATE's trailer — not a
//! pair split across both partitions' trailers. This is the teacher's own
//! design (`rustBoot/src/update/update_flash.rs`'s `rustboot_update`: one
//! `flag` local reloaded from `updt_part.get_flags(sector)`, never from
//! BOOT's trailer); BOOT carries no per-sector swap state at all, only the
//! partition-state byte `state_machine` drives independently.
//!
//! [`step`] inspects UPDATE's flag for the lowest sector not yet `UPDATED`
//! and performs exactly the one outstanding operation for it, so it is safe
//! to call after an arbitrary power loss as well as when nothing is
//! pending:
//!
//! - `NEW`: UPDATE's own (new-image) sector is stashed in SWAP, flag moves
//!   to `SWAPPING`.
//! - `SWAPPING`: BOOT's (old-image) sector overwrites UPDATE's — this is
//!   the backup of the image about to be displaced — flag moves to
//!   `BACKUP`.
//! - `BACKUP`: the sector stashed in SWAP lands in BOOT, completing the
//!   install for this sector, flag moves to `UPDATED`.
//!
//! Every one of those flag writes is an in-place nibble update via
//! [`trailer::set_flag`](crate::trailer::set_flag) that only clears bits
//! (spec.md §3 invariant 4: `NEW(0xF) → SWAPPING(0x7) → BACKUP(0x3) →
//! UPDATED(0x0)`), so none of it needs a bank migration.
//!
//! A *rollback* (spec.md §4.6 "TESTING" branch, GLOSSARY "Rollback") is not
//! a distinct per-sector diagram: it is a new swap episode over the same
//! two partitions, UPDATE's payload already holding the pre-update image as
//! the previous episode's backup. Since a fresh episode's flags (`NEW`) are
//! numerically *higher* than the just-finished episode's (`UPDATED`), they
//! cannot be written in place; [`restage`] performs the one operation
//! allowed to raise a nibble back up — migrate UPDATE's trailer to a freshly
//! erased bank via [`selector::migrate`] — before the ordinary forward
//! [`step`] runs again and moves UPDATE's current payload (the old image)
//! back into BOOT.

use crate::config::{Partition, SECTOR_SIZE};
use crate::flash::Flash;
use crate::selector;
use crate::trailer::{PartitionState, SectorFlag, Trailer, TrailerStatus};
use crate::{Error, Result};

/// True once every payload sector of `update` shows `UPDATED`: the swap
/// episode currently under way (forward install or rollback) has reached
/// its terminal per-sector state.
pub fn is_complete<F: Flash>(flash: &mut F, update: &Partition) -> Result<bool> {
    let update_trailer = fresh_trailer(flash, update)?;
    Ok(update_trailer.flags.iter().all(|f| *f == SectorFlag::Updated))
}

/// Reset UPDATE's trailer to the flags a fresh swap episode starts from
/// (all sectors `NEW`), preserving its current state byte. Must be called
/// once before the first [`step`] of a new episode — including a rollback,
/// which is simply another episode run with the same two partitions.
pub fn restage<F: Flash>(flash: &mut F, update: &Partition) -> Result<()> {
    let num_sectors = update.num_sectors(SECTOR_SIZE);
    let selection = selector::select_fresh(flash, update.trailer_base(SECTOR_SIZE), num_sectors)?;
    let state = match &selection.status {
        TrailerStatus::Valid(t) => t.state,
        _ => PartitionState::New,
    };
    let trailer = Trailer {
        state,
        ..Trailer::blank(num_sectors)?
    };
    selector::migrate(flash, update.trailer_base(SECTOR_SIZE), &selection, &trailer)?;
    Ok(())
}

/// Perform exactly one outstanding step of the swap between `boot` and
/// `update`, resuming at the lowest sector index whose flag (tracked only
/// on UPDATE's trailer) is not yet `UPDATED`. Returns `Ok(true)` if a step
/// was performed, `Ok(false)` if the swap was already complete.
pub fn step<F: Flash>(flash: &mut F, boot: &Partition, update: &Partition, swap: &Partition) -> Result<bool> {
    let update_select =
        selector::select_fresh(flash, update.trailer_base(SECTOR_SIZE), update.num_sectors(SECTOR_SIZE))?;
    let update_trailer = require_valid(update_select.status)?;

    let num_sectors = update.num_sectors(SECTOR_SIZE);
    let sector = match (0..num_sectors).find(|&i| update_trailer.flags[i] != SectorFlag::Updated) {
        Some(i) => i,
        None => return Ok(false),
    };

    let flag = update_trailer.flags[sector];
    let update_bank = update_select.bank.base(update.base);

    #[cfg(feature = "defmt-log")]
    defmt::debug!("swap step: sector {} flag {}", sector, flag as u8);

    match flag {
        // UPDATE's own (new-image) sector is stashed in SWAP before BOOT's
        // old sector overwrites it.
        SectorFlag::New => {
            copy_sector(flash, update.payload_base() + sector * SECTOR_SIZE, swap.base)?;
            crate::trailer::set_flag(flash, update_bank, sector, SectorFlag::Swapping)?;
        }
        // BOOT's (old-image) sector becomes UPDATE's backup of the image
        // it's about to lose.
        SectorFlag::Swapping => {
            copy_sector(
                flash,
                boot.payload_base() + sector * SECTOR_SIZE,
                update.payload_base() + sector * SECTOR_SIZE,
            )?;
            crate::trailer::set_flag(flash, update_bank, sector, SectorFlag::Backup)?;
        }
        // The sector stashed in SWAP lands in BOOT, completing the install.
        SectorFlag::Backup => {
            copy_sector(flash, swap.base, boot.payload_base() + sector * SECTOR_SIZE)?;
            crate::trailer::set_flag(flash, update_bank, sector, SectorFlag::Updated)?;
        }
        SectorFlag::Updated => return Err(Error::InvalidState),
    }
    Ok(true)
}

fn copy_sector<F: Flash>(flash: &mut F, src: usize, dst: usize) -> Result<()> {
    let mut buf = [0u8; SECTOR_SIZE];
    flash.read(src, &mut buf)?;
    let mut guard = crate::flash::CriticalSection::enter(flash);
    let flash = guard.flash();
    flash.erase(dst, SECTOR_SIZE)?;
    flash.write(dst, &buf)
}

fn fresh_trailer<F: Flash>(flash: &mut F, partition: &Partition) -> Result<Trailer> {
    let selection = selector::select_fresh(flash, partition.trailer_base(SECTOR_SIZE), partition.num_sectors(SECTOR_SIZE))?;
    require_valid(selection.status)
}

fn require_valid(status: TrailerStatus) -> Result<Trailer> {
    match status {
        TrailerStatus::Valid(t) => Ok(t),
        _ => Err(Error::Corrupt),
    }
}

//! NVM "fresh sector" selector (spec.md §4.3, C3).
//!
//! A partition that carries a trailer keeps two full-sector copies, one
//! sector below the other, written alternately so one is always "fresh"
//! durably across power loss. This module is the only writer of those two
//! banks: every state mutation a caller wants (a new `PartitionState`, a
//! sector flag update) goes through [`select_fresh`] to read, then through
//! [`migrate`] to commit the change into the *other* bank and lazily erase
//! the one that used to be fresh.

use crate::config::SECTOR_SIZE;
use crate::flash::Flash;
use crate::trailer::{self, Trailer, TrailerStatus};
use crate::Result;

/// Which of a partition's two trailer banks is currently fresh, and its
/// decoded contents (or lack thereof).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bank {
    Zero,
    One,
}

impl Bank {
    fn other(self) -> Bank {
        match self {
            Bank::Zero => Bank::One,
            Bank::One => Bank::Zero,
        }
    }

    pub(crate) fn base(self, partition_base: usize) -> usize {
        match self {
            Bank::Zero => partition_base,
            Bank::One => partition_base + SECTOR_SIZE,
        }
    }
}

/// Wraparound-aware "is `a` a more recent migration epoch than `b`"
/// comparison (spec.md §4.3 rule 2, as refined by this crate — see
/// DESIGN.md). Two epochs under comparison are always either equal or one
/// `migrate` apart in practice, far short of the `u8` range needed to
/// confuse this check.
fn epoch_is_newer(a: u8, b: u8) -> bool {
    (a.wrapping_sub(b) as i8) > 0
}

/// Outcome of [`select_fresh`]: which bank is fresh and what it decoded to.
pub struct Selection {
    pub bank: Bank,
    pub status: TrailerStatus,
}

/// Apply the selection rule of spec.md §4.3 to the two trailer banks
/// starting at `partition_base` (the lower of the two trailer sectors,
/// i.e. sector 0 counted from the partition's end).
pub fn select_fresh<F: Flash>(
    flash: &mut F,
    partition_base: usize,
    num_sectors: usize,
) -> Result<Selection> {
    let status0 = trailer::read(flash, Bank::Zero.base(partition_base), num_sectors)?;
    let status1 = trailer::read(flash, Bank::One.base(partition_base), num_sectors)?;

    let selection = match (&status0, &status1) {
        // Rule 1: exactly one has magic ("BOOT"), i.e. is `Valid`, and the
        // other is `Blank`.
        (TrailerStatus::Valid(_), TrailerStatus::Blank) => Bank::Zero,
        (TrailerStatus::Blank, TrailerStatus::Valid(_)) => Bank::One,

        // Rule 2: both valid. The migration epoch is the primary signal —
        // it only ever counts upward, one per `migrate` commit, so it
        // correctly identifies the fresher bank even when a migration
        // (e.g. `swap::restage`) intentionally lowers per-sector flag
        // progression. Per-sector progression and the partition-state
        // byte's progression are a defensive fallback for the case where
        // both banks happen to carry the same epoch.
        (TrailerStatus::Valid(t0), TrailerStatus::Valid(t1)) => {
            if t0.epoch != t1.epoch {
                if epoch_is_newer(t0.epoch, t1.epoch) {
                    Bank::Zero
                } else {
                    Bank::One
                }
            } else {
                match t0.flag_progression().cmp(&t1.flag_progression()) {
                    core::cmp::Ordering::Greater => Bank::Zero,
                    core::cmp::Ordering::Less => Bank::One,
                    core::cmp::Ordering::Equal => {
                        if t0.state.progression() >= t1.state.progression() {
                            Bank::Zero
                        } else {
                            Bank::One
                        }
                    }
                }
            }
        }

        // Rule 3: both blank.
        (TrailerStatus::Blank, TrailerStatus::Blank) => Bank::Zero,

        // Rule 4: one corrupt, select the other regardless of its status.
        (TrailerStatus::Corrupt, _) => Bank::One,
        (_, TrailerStatus::Corrupt) => Bank::Zero,
    };

    let status = match selection {
        Bank::Zero => status0,
        Bank::One => status1,
    };
    Ok(Selection {
        bank: selection,
        status,
    })
}

/// Commit `trailer` as the new fresh trailer for this partition: write it
/// into the bank that is *not* currently fresh, then lazily erase the
/// previously-fresh bank (spec.md §4.3, last paragraph — "the erase is
/// lazy: reads do not require it to complete").
///
/// `trailer.epoch` is overwritten here, not by the caller: every migration
/// commit bumps it by one past whatever `current` decoded to (or `0` if
/// `current` wasn't a valid trailer), which is what lets [`select_fresh`]
/// tell fresh from stale even when the rest of the trailer's content moved
/// "backward" (spec.md §4.3 rule 2; see DESIGN.md).
///
/// `current` is the [`Selection`] returned by a prior [`select_fresh`]
/// call; callers must not have performed any other write to either bank
/// in between.
pub fn migrate<F: Flash>(
    flash: &mut F,
    partition_base: usize,
    current: &Selection,
    trailer: &Trailer,
) -> Result<Bank> {
    let target = current.bank.other();
    let prior_epoch = match &current.status {
        TrailerStatus::Valid(t) => t.epoch,
        _ => 0u8.wrapping_sub(1), // so the first real migration lands on epoch 0
    };
    let mut trailer = trailer.clone();
    trailer.epoch = prior_epoch.wrapping_add(1);
    trailer::write(flash, target.base(partition_base), &trailer)?;

    // Lazy erase: failure here is not fatal to the migration that already
    // committed via the magic word in `target`; a future selection simply
    // finds the stale bank still wearing its old (now irrelevant) magic
    // and erases it again next time.
    let mut guard = crate::flash::CriticalSection::enter(flash);
    let _ = guard.flash().erase(current.bank.base(partition_base), SECTOR_SIZE);

    Ok(target)
}

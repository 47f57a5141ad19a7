//! Hardware abstraction layer for `fwboot`.
//!
//! A real board port implements [`fwboot::flash::Flash`] directly for its
//! flash controller (erase/write/lock primitives, MCU reset) the way the
//! teacher crate's board-specific `rustBoot-hal` implementations do for
//! `FlashInterface`. This crate instead provides [`sim::SimFlash`], an
//! in-process simulated NOR flash used by `fwboot`'s own test suite and by
//! integration tests that exercise the boot state machine end to end,
//! grounded on the `simflash` crate in the sibling `mcu-tools-mcuboot-rs`
//! example.

#![cfg_attr(not(any(feature = "std", test)), no_std)]

#[cfg(any(feature = "std", test))]
pub mod sim;

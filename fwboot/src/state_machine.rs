//! Top-level boot state machine.
//!
//! [`BootLoader::run`] is the algorithm executed on every reset; it is the
//! only place in this crate that ties the trailer codec, selector, header
//! parser, crypto layer and swap engine together. `update_trigger`,
//! `success`, `current_firmware_version` and `set_encrypt_key` are the only
//! calls the running application makes.

use sha2::{Digest, Sha256};

use crate::config::{Partition, ENCRYPT_KEY_SIZE, IMAGE_HEADER_SIZE, SECTOR_SIZE, SHA256_DIGEST_SIZE};
use crate::crypto::{self, Keystore};
use crate::flash::Flash;
use crate::header::{self, ImageHeader};
use crate::selector;
use crate::swap;
use crate::trailer::{PartitionState, Trailer, TrailerStatus};
use crate::{Error, Result};

/// Where control should be handed off to after [`BootLoader::run`]
/// returns. Jumping to `image_offset` (loading the reset vector there and
/// branching) is a board-specific leaf operation outside this crate's
/// scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootTarget {
    pub image_offset: usize,
}

/// Coordinates the durable firmware-update state machine over a concrete
/// [`Flash`] device and a fixed set of partitions.
pub struct BootLoader<'a, F: Flash> {
    flash: F,
    boot: Partition,
    update: Partition,
    swap: Partition,
    keystore: Keystore<'a>,
    encrypt_key: Option<[u8; ENCRYPT_KEY_SIZE]>,
}

impl<'a, F: Flash> BootLoader<'a, F> {
    pub fn new(flash: F, boot: Partition, update: Partition, swap: Partition, keystore: Keystore<'a>) -> Self {
        BootLoader {
            flash,
            boot,
            update,
            swap,
            keystore,
            encrypt_key: None,
        }
    }

    /// The underlying flash device, for board code that needs to hand off
    /// to it directly (e.g. to memory-map the image before jumping).
    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    /// Execute one full pass of the boot algorithm.
    pub fn run(&mut self) -> Result<BootTarget> {
        let boot = self.boot;
        let boot_trailer = self.read_trailer(&boot)?;

        match boot_trailer {
            TrailerStatus::Corrupt => Err(Error::Corrupt),

            TrailerStatus::Valid(t) if t.state == PartitionState::Testing => self.handle_testing(),

            TrailerStatus::Valid(t) if t.state == PartitionState::Updating => self.handle_resume_forward(),

            // `SUCCESS`, `NEW`, or no trailer at all: the clean-boot path,
            // which also checks whether a host-triggered update is
            // waiting in UPDATE.
            _ => self.handle_clean_boot(),
        }
    }

    fn handle_clean_boot(&mut self) -> Result<BootTarget> {
        let update = self.update;
        let boot = self.boot;
        if let Ok(TrailerStatus::Valid(update_trailer)) = self.read_trailer(&update) {
            if update_trailer.state == PartitionState::Updating {
                match self.verify_partition(&update) {
                    Ok(()) => return self.begin_forward_swap(),
                    // Reject the candidate, leave UPDATE as-is, fall
                    // through to booting the existing BOOT image.
                    Err(_) => {}
                }
            }
        }

        match self.verify_partition(&boot) {
            Ok(()) => Ok(self.boot_target()),
            Err(_) => self.handle_testing(),
        }
    }

    /// Stage a fresh swap episode into UPDATE's trailer, *then* commit
    /// BOOT's durable `Updating` state — in that order. `restage` has to
    /// land first: it is what resets UPDATE's per-sector flags from the
    /// previous episode's terminal `UPDATED` back to `NEW`, and until that
    /// commit lands, UPDATE's flags still read as "this episode is
    /// already finished". If BOOT were marked `Updating` first and power
    /// were lost before the restage commit, the next boot would resume via
    /// `handle_resume_forward`, see every UPDATE flag already `UPDATED`,
    /// drive zero swap steps, and mark BOOT `Testing` having moved nothing
    /// — silently skipping the whole swap (breaks P6). Restaging durably
    /// before the BOOT transition removes that window: once BOOT reads
    /// `Updating`, UPDATE is guaranteed to already be staged for this
    /// episode.
    fn begin_forward_swap(&mut self) -> Result<BootTarget> {
        #[cfg(feature = "defmt-log")]
        defmt::info!("beginning forward swap");
        swap::restage(&mut self.flash, &self.update)?;
        let boot = self.boot;
        self.migrate_state(&boot, PartitionState::Updating)?;
        self.drive_swap_to_completion()?;
        self.migrate_state(&boot, PartitionState::Testing)?;
        Ok(self.boot_target())
    }

    fn handle_resume_forward(&mut self) -> Result<BootTarget> {
        #[cfg(feature = "defmt-log")]
        defmt::info!("resuming forward swap after reset");
        self.drive_swap_to_completion()?;
        let boot = self.boot;
        self.migrate_state(&boot, PartitionState::Testing)?;
        Ok(self.boot_target())
    }

    /// BOOT is `TESTING` with no confirmation, or its image failed to
    /// verify: roll back to the image UPDATE is currently backing up.
    ///
    /// Restages UPDATE *before* moving BOOT to `Updating`, for the same
    /// reason [`Self::begin_forward_swap`] does — see its doc comment.
    /// Here it matters even more: a rollback always starts from UPDATE's
    /// flags already at the previous episode's terminal `UPDATED`, so
    /// there is no forgiving case (unlike a first-ever forward swap, whose
    /// blank UPDATE trailer already reads `New`) where skipping the
    /// restage happens to be harmless.
    fn handle_testing(&mut self) -> Result<BootTarget> {
        #[cfg(feature = "defmt-log")]
        defmt::warn!("unconfirmed image, rolling back");
        swap::restage(&mut self.flash, &self.update)?;
        let boot = self.boot;
        let update = self.update;
        self.migrate_state(&boot, PartitionState::Updating)?;
        self.drive_swap_to_completion()?;
        // The restored image was already proven; land directly on
        // `SUCCESS` rather than requiring a second confirmation.
        self.migrate_state(&boot, PartitionState::Success)?;
        self.migrate_state(&update, PartitionState::New)?;
        Ok(self.boot_target())
    }

    fn drive_swap_to_completion(&mut self) -> Result<()> {
        while swap::step(&mut self.flash, &self.boot, &self.update, &self.swap)? {}
        Ok(())
    }

    fn boot_target(&self) -> BootTarget {
        BootTarget {
            image_offset: self.boot.payload_base() + IMAGE_HEADER_SIZE,
        }
    }

    fn read_trailer(&mut self, partition: &Partition) -> Result<TrailerStatus> {
        let selection = selector::select_fresh(
            &mut self.flash,
            partition.trailer_base(SECTOR_SIZE),
            partition.num_sectors(SECTOR_SIZE),
        )?;
        Ok(selection.status)
    }

    fn migrate_state(&mut self, partition: &Partition, state: PartitionState) -> Result<()> {
        let num_sectors = partition.num_sectors(SECTOR_SIZE);
        let selection = selector::select_fresh(&mut self.flash, partition.trailer_base(SECTOR_SIZE), num_sectors)?;
        let mut trailer = match &selection.status {
            TrailerStatus::Valid(t) => t.clone(),
            _ => Trailer::blank(num_sectors)?,
        };
        trailer.state = state;
        selector::migrate(&mut self.flash, partition.trailer_base(SECTOR_SIZE), &selection, &trailer)?;
        Ok(())
    }

    fn read_header(&mut self, partition: &Partition) -> Result<[u8; IMAGE_HEADER_SIZE]> {
        let mut buf = [0u8; IMAGE_HEADER_SIZE];
        self.flash.read(partition.payload_base(), &mut buf)?;
        Ok(buf)
    }

    fn verify_partition(&mut self, partition: &Partition) -> Result<()> {
        let header_bytes = self.read_header(partition)?;
        let header = header::parse(&header_bytes)?;
        let digest = self.hash_partition_payload(partition, &header)?;
        let result = crypto::verify_digest(&header, &digest, &self.keystore);
        #[cfg(feature = "defmt-log")]
        if result.is_err() {
            defmt::warn!("image verification failed");
        }
        result
    }

    /// Hash an image's payload one sector at a time, without ever holding
    /// the whole image in memory — the realistic shape for firmware that
    /// can be megabytes against a few KB of RAM.
    fn hash_partition_payload(
        &mut self,
        partition: &Partition,
        header: &ImageHeader<'_>,
    ) -> Result<[u8; SHA256_DIGEST_SIZE]> {
        let payload_base = partition.payload_base() + IMAGE_HEADER_SIZE;
        let total = header.image_size as usize;
        if total + IMAGE_HEADER_SIZE > partition.size.saturating_sub(2 * SECTOR_SIZE) {
            return Err(Error::SizeExceeded);
        }

        let mut hasher = Sha256::new();
        let mut buf = [0u8; SECTOR_SIZE];
        let mut remaining = total;
        let mut offset = payload_base;
        while remaining > 0 {
            let chunk = remaining.min(SECTOR_SIZE);
            self.flash.read(offset, &mut buf[..chunk])?;
            hasher.update(&buf[..chunk]);
            offset += chunk;
            remaining -= chunk;
        }
        Ok(hasher.finalize().into())
    }

    /// Host API: arm a pending update. Assumes a valid image has already
    /// been placed in UPDATE's payload region.
    pub fn update_trigger(&mut self) -> Result<()> {
        let update = self.update;
        self.migrate_state(&update, PartitionState::Updating)
    }

    /// Host API: confirm a test-booted image. Only meaningful while BOOT
    /// is `TESTING`; atomically moves BOOT to `SUCCESS` and UPDATE to
    /// `NEW`, then best-effort erases UPDATE's payload in the background —
    /// non-durable; the next boot completes it if interrupted.
    pub fn success(&mut self) -> Result<()> {
        let boot = self.boot;
        let update = self.update;
        let boot_trailer = self.read_trailer(&boot)?;
        match boot_trailer {
            TrailerStatus::Valid(t) if t.state == PartitionState::Testing => {}
            _ => return Err(Error::InvalidState),
        }

        #[cfg(feature = "defmt-log")]
        defmt::info!("update confirmed");
        self.migrate_state(&boot, PartitionState::Success)?;
        self.migrate_state(&update, PartitionState::New)?;

        let num_payload_sectors = update.num_sectors(SECTOR_SIZE);
        for i in 0..num_payload_sectors {
            // Best-effort: a failure here just leaves stale bytes UPDATE
            // will overwrite on the next real update; it is not a durable
            // commitment the way trailer writes are.
            self.flash.unlock();
            let _ = self.flash.erase(update.payload_base() + i * SECTOR_SIZE, SECTOR_SIZE);
            self.flash.lock();
        }
        Ok(())
    }

    /// Host API: the version TLV of the image currently in BOOT.
    pub fn current_firmware_version(&mut self) -> Result<u32> {
        let boot = self.boot;
        let header_bytes = self.read_header(&boot)?;
        let header = header::parse(&header_bytes)?;
        Ok(header.version)
    }

    /// Host API: install the key used by a board whose flash driver
    /// performs transparent encryption at rest. This crate only validates
    /// and stores it; applying it to flash traffic is a HAL concern.
    pub fn set_encrypt_key(&mut self, key: &[u8]) -> Result<()> {
        let key: [u8; ENCRYPT_KEY_SIZE] = key.try_into().map_err(|_| Error::InvalidValue)?;
        self.encrypt_key = Some(key);
        Ok(())
    }
}

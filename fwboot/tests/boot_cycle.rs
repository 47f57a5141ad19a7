//! End-to-end boot-cycle tests against the public `BootLoader` API only
//! (no access to crate-internal helpers), the way `mcu-tools-mcuboot-rs`'s
//! `boot/tests/image.rs` drives its `Image` type from outside the crate.
//!
//! Run with `cargo test --features no-auth`: these exercise the full
//! algorithm without a real signing key, the same reason
//! `state_machine`'s own in-crate tests are gated the same way.
#![cfg(feature = "no-auth")]

use sha2::{Digest, Sha256};

use fwboot::config::{
    Partition, IMAGE_HEADER_SIZE, IMAGE_MAGIC, SECTOR_SIZE, TAG_IMG_TYPE, TAG_PUBKEY_HINT,
    TAG_SHA256, TAG_SIGNATURE, TAG_TIMESTAMP, TAG_VERSION,
};
use fwboot::crypto::Keystore;
use fwboot::state_machine::BootLoader;
use fwboot::trailer::{self, PartitionState, SectorFlag, Trailer};
use fwboot_hal::sim::SimFlash;

const NUM_SECTORS: usize = 3;
const PART_SIZE: usize = (NUM_SECTORS + 2) * SECTOR_SIZE;
const PAYLOAD_LEN: usize = SECTOR_SIZE * NUM_SECTORS - IMAGE_HEADER_SIZE;

fn tlv(out: &mut Vec<u8>, tag: u16, value: &[u8]) {
    out.extend_from_slice(&tag.to_le_bytes());
    out.extend_from_slice(&(value.len() as u16).to_le_bytes());
    out.extend_from_slice(value);
    while out.len() % 4 != 0 {
        out.push(0xFF);
    }
}

fn build_image(version: u32, payload: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    let digest: [u8; 32] = hasher.finalize().into();

    let mut header = Vec::new();
    header.extend_from_slice(&IMAGE_MAGIC);
    header.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    tlv(&mut header, TAG_VERSION, &version.to_le_bytes());
    tlv(&mut header, TAG_TIMESTAMP, &0u64.to_le_bytes());
    tlv(&mut header, TAG_IMG_TYPE, &fwboot::config::IMG_TYPE_APP.to_le_bytes());
    tlv(&mut header, TAG_SHA256, &digest);
    tlv(&mut header, TAG_PUBKEY_HINT, &[0u8; 32]);
    tlv(&mut header, TAG_SIGNATURE, &[0u8; 64]);
    header.resize(IMAGE_HEADER_SIZE, 0xFF);

    let mut image = header;
    image.extend_from_slice(payload);
    image
}

fn setup() -> (SimFlash<SECTOR_SIZE>, Partition, Partition, Partition) {
    let boot = Partition::new(0, PART_SIZE);
    let update = Partition::new(PART_SIZE, PART_SIZE);
    let swap = Partition::new(2 * PART_SIZE, SECTOR_SIZE);
    let flash = SimFlash::<SECTOR_SIZE>::with_capacity(1, 2 * PART_SIZE + SECTOR_SIZE);
    (flash, boot, update, swap)
}

fn write_image(flash: &mut SimFlash<SECTOR_SIZE>, partition: &Partition, image: &[u8]) {
    flash.unlock();
    let mut offset = partition.payload_base();
    for chunk in image.chunks(SECTOR_SIZE) {
        let mut buf = [0xFFu8; SECTOR_SIZE];
        buf[..chunk.len()].copy_from_slice(chunk);
        flash.erase(offset, SECTOR_SIZE).unwrap();
        flash.write(offset, &buf).unwrap();
        offset += SECTOR_SIZE;
    }
    flash.lock();
}

/// Write a trailer directly so a test can start from BOOT already holding
/// a confirmed image, without going through a full update cycle first.
fn confirm_boot(flash: &mut SimFlash<SECTOR_SIZE>, boot: &Partition) {
    let mut trailer = Trailer::blank(NUM_SECTORS).unwrap();
    trailer.state = PartitionState::Success;
    for f in trailer.flags.iter_mut() {
        *f = SectorFlag::Updated;
    }
    trailer::write(flash, boot.trailer_base(SECTOR_SIZE), &trailer).unwrap();
}

/// Scenario 1 (spec.md §8): fresh device, a valid signed image staged in
/// UPDATE and triggered. The first `run` lands BOOT in `TESTING` with the
/// new image in place; `success` confirms it.
#[test]
fn fresh_device_installs_and_confirms_update() {
    let (mut flash, boot, update, swap) = setup();
    let payload = [0x42u8; PAYLOAD_LEN];
    write_image(&mut flash, &update, &build_image(1, &payload));

    let mut loader = BootLoader::new(flash, boot, update, swap, Keystore::new(&[]));
    loader.update_trigger().unwrap();
    let target = loader.run().unwrap();
    assert_eq!(target.image_offset, boot.payload_base() + IMAGE_HEADER_SIZE);

    loader.success().unwrap();
    assert_eq!(loader.current_firmware_version().unwrap(), 1);
}

/// Scenario 5 (spec.md §8): a candidate update whose payload doesn't match
/// its own SHA256 TLV is rejected outright. UPDATE is left alone and the
/// device boots the already-confirmed BOOT image instead of the corrupt
/// candidate.
#[test]
fn corrupt_update_payload_is_rejected_and_existing_image_boots() {
    let (mut flash, boot, update, swap) = setup();

    let good_payload = [0x11u8; PAYLOAD_LEN];
    write_image(&mut flash, &boot, &build_image(1, &good_payload));
    confirm_boot(&mut flash, &boot);

    // Stage a candidate in UPDATE, then corrupt one payload byte after the
    // header's digest TLV was computed over the original bytes.
    let mut bad_image = build_image(2, &[0x22u8; PAYLOAD_LEN]);
    let last = bad_image.len() - 1;
    bad_image[last] ^= 0xFF;
    write_image(&mut flash, &update, &bad_image);

    let mut loader = BootLoader::new(flash, boot, update, swap, Keystore::new(&[]));
    loader.update_trigger().unwrap();
    let target = loader.run().unwrap();

    // Booted the existing, still-good BOOT image, not the corrupt one.
    assert_eq!(target.image_offset, boot.payload_base() + IMAGE_HEADER_SIZE);
    assert_eq!(loader.current_firmware_version().unwrap(), 1);
}

/// Scenario 4 (spec.md §8): power loss partway through the sector swap.
/// Drive the swap by hand to the point where sector 0 has been staged into
/// SWAP and BOOT's old sector 0 has landed in UPDATE as backup, but the
/// stashed bytes have not yet been copied into BOOT (`step`'s `Backup`
/// stage), simulating a reset there, then hand the same flash to a fresh
/// `BootLoader` the way a real reset would — BOOT's trailer still reads
/// `UPDATING`, so `run` must resume and reach the same final image as an
/// uninterrupted run.
#[test]
fn power_loss_mid_swap_resumes_to_same_result_as_uninterrupted_run() {
    let build = |seed: u8| {
        let (mut flash, boot, update, swap) = setup();
        write_image(&mut flash, &update, &build_image(1, &[seed; PAYLOAD_LEN]));
        (flash, boot, update, swap)
    };

    // Reference: uninterrupted.
    let (flash, boot, update, swap) = build(0x42);
    let mut reference = BootLoader::new(flash, boot, update, swap, Keystore::new(&[]));
    reference.update_trigger().unwrap();
    reference.run().unwrap();

    // Interrupted: arm the update, migrate BOOT to `Updating` and restage
    // UPDATE directly the way `begin_forward_swap` does internally, then
    // stop partway through sector 0's swap (`New` -> `Swapping` -> `Backup`,
    // short of the final `Updated` step) before ever building a
    // `BootLoader`.
    let (mut flash, boot, update, swap) = build(0x42);
    trailer::write(&mut flash, boot.trailer_base(SECTOR_SIZE), &{
        let mut t = Trailer::blank(NUM_SECTORS).unwrap();
        t.state = PartitionState::Updating;
        t
    })
    .unwrap();
    trailer::write(&mut flash, update.trailer_base(SECTOR_SIZE), &{
        let mut t = Trailer::blank(NUM_SECTORS).unwrap();
        t.state = PartitionState::Updating;
        t
    })
    .unwrap();
    fwboot::swap::restage(&mut flash, &update).unwrap();
    for _ in 0..2 {
        fwboot::swap::step(&mut flash, &boot, &update, &swap).unwrap();
    }

    // Simulated reset: a new `BootLoader` over the same surviving flash
    // contents, nothing else carried over from the interrupted run.
    let mut resumed = BootLoader::new(flash, boot, update, swap, Keystore::new(&[]));
    let target = resumed.run().unwrap();
    assert_eq!(target.image_offset, boot.payload_base() + IMAGE_HEADER_SIZE);

    assert_eq!(
        resumed.flash_mut().raw()[boot.payload_base()..boot.payload_base() + PART_SIZE - 2 * SECTOR_SIZE],
        reference.flash_mut().raw()[boot.payload_base()..boot.payload_base() + PART_SIZE - 2 * SECTOR_SIZE],
    );
}

/// Scenario 6 (spec.md §8): an update that is confirmed once, then a
/// second update that is never confirmed — the next boot must roll back
/// to the first (known-good) image rather than keep booting the
/// unconfirmed one.
#[test]
fn unconfirmed_second_update_rolls_back_to_prior_good_image() {
    let (mut flash, boot, update, swap) = setup();
    let first_payload = [0x11u8; PAYLOAD_LEN];
    let second_payload = [0x22u8; PAYLOAD_LEN];

    write_image(&mut flash, &update, &build_image(1, &first_payload));
    let mut loader = BootLoader::new(flash, boot, update, swap, Keystore::new(&[]));
    loader.update_trigger().unwrap();
    loader.run().unwrap();
    loader.success().unwrap();
    assert_eq!(loader.current_firmware_version().unwrap(), 1);

    write_image(loader.flash_mut(), &update, &build_image(2, &second_payload));
    loader.update_trigger().unwrap();
    loader.run().unwrap();
    // Reboot without confirming: this is the rollback pass.
    loader.run().unwrap();

    assert_eq!(loader.current_firmware_version().unwrap(), 1);

    // Rollback lands BOOT on `SUCCESS` directly, not `TESTING`, so a
    // further confirm has nothing to do.
    assert!(loader.success().is_err());
}

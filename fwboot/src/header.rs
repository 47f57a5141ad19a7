//! Authenticated image header parser (spec.md §4.4, §6, C4).
//!
//! The header is a fixed `IMAGE_HEADER_SIZE`-byte record: magic, image
//! size, then a TLV stream. TLV parsing uses `nom`, the same parser
//! combinator crate the teacher uses for its header walk
//! (`rustBoot/src/librustboot.rs`), but as a single generic loop over the
//! stream rather than the teacher's chain of tag-specific `extract_*`
//! combinators hard-coded to one fixed field order — TLVs unknown to this
//! parser are skipped and duplicate tags for mandatory fields are rejected,
//! which the teacher's fixed chain cannot express (spec.md §4.4).

use nom::bytes::complete::take;
use nom::number::complete::{le_u16, le_u32};
use nom::IResult;

use crate::config::{
    IMAGE_HEADER_SIZE, IMAGE_MAGIC, PUBKEY_HINT_SIZE, SHA256_DIGEST_SIZE, TAG_IMG_TYPE,
    TAG_PUBKEY_HINT, TAG_SHA256, TAG_SIGNATURE, TAG_TIMESTAMP, TAG_VERSION,
};
use crate::{Error, Result};

/// A parsed image header. Borrows from the header bytes it was parsed
/// from; the parser never copies the signature (variable length) or
/// digest fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader<'a> {
    pub image_size: u32,
    pub version: u32,
    pub timestamp: u64,
    pub sha256: &'a [u8; SHA256_DIGEST_SIZE],
    pub pubkey_hint: &'a [u8; PUBKEY_HINT_SIZE],
    pub signature: &'a [u8],
    pub img_type: u16,
}

#[derive(Default)]
struct RawFields<'a> {
    version: Option<u32>,
    timestamp: Option<u64>,
    sha256: Option<&'a [u8]>,
    pubkey_hint: Option<&'a [u8]>,
    signature: Option<&'a [u8]>,
    img_type: Option<u16>,
}

fn magic(input: &[u8]) -> IResult<&[u8], &[u8]> {
    take(4usize)(input)
}

/// Parse `bytes`, which must be exactly `IMAGE_HEADER_SIZE` long, into an
/// [`ImageHeader`]. Never reads past `IMAGE_HEADER_SIZE` (spec.md §4.4
/// post-condition): every TLV length is checked against the remaining
/// header bytes before the value is sliced out.
pub fn parse(bytes: &[u8]) -> Result<ImageHeader<'_>> {
    if bytes.len() != IMAGE_HEADER_SIZE {
        return Err(Error::HeaderMalformed);
    }

    let (rest, magic_bytes) = magic(bytes).map_err(|_| Error::HeaderMalformed)?;
    if magic_bytes != IMAGE_MAGIC {
        return Err(Error::HeaderMalformed);
    }
    let (mut tlv_stream, image_size) =
        le_u32::<_, nom::error::Error<&[u8]>>(rest).map_err(|_| Error::HeaderMalformed)?;

    let mut fields = RawFields::default();

    loop {
        if tlv_stream.len() < 4 {
            break;
        }
        // Padding (`0xFF`) fills out the rest of the header once the TLV
        // stream is exhausted.
        if tlv_stream[0] == 0xFF && tlv_stream[1] == 0xFF {
            break;
        }

        let (after_tag, tag) =
            le_u16::<_, nom::error::Error<&[u8]>>(tlv_stream).map_err(|_| Error::HeaderMalformed)?;
        let (after_len, len) =
            le_u16::<_, nom::error::Error<&[u8]>>(after_tag).map_err(|_| Error::HeaderMalformed)?;
        let len = len as usize;
        if len > after_len.len() {
            return Err(Error::HeaderTruncated);
        }
        let (tail, value) =
            take::<_, _, nom::error::Error<&[u8]>>(len)(after_len).map_err(|_| Error::HeaderTruncated)?;

        store_field(&mut fields, tag, value)?;

        // TLVs are padded to a 4-byte boundary (spec.md §6).
        let consumed = 4 + len;
        let padded = (consumed + 3) & !3;
        let pad = padded - consumed;
        if pad > tail.len() {
            return Err(Error::HeaderTruncated);
        }
        tlv_stream = &tail[pad..];
    }

    let version = fields.version.ok_or(Error::TlvNotFound)?;
    let timestamp = fields.timestamp.ok_or(Error::TlvNotFound)?;
    let sha256 = fields.sha256.ok_or(Error::TlvNotFound)?;
    let pubkey_hint = fields.pubkey_hint.ok_or(Error::TlvNotFound)?;
    let signature = fields.signature.ok_or(Error::TlvNotFound)?;
    let img_type = fields.img_type.ok_or(Error::TlvNotFound)?;

    let sha256: &[u8; SHA256_DIGEST_SIZE] = sha256.try_into().map_err(|_| Error::HeaderMalformed)?;
    let pubkey_hint: &[u8; PUBKEY_HINT_SIZE] =
        pubkey_hint.try_into().map_err(|_| Error::HeaderMalformed)?;

    Ok(ImageHeader {
        image_size,
        version,
        timestamp,
        sha256,
        pubkey_hint,
        signature,
        img_type,
    })
}

fn store_field<'a>(fields: &mut RawFields<'a>, tag: u16, value: &'a [u8]) -> Result<()> {
    let slot_taken = match tag {
        TAG_VERSION => fields.version.is_some(),
        TAG_TIMESTAMP => fields.timestamp.is_some(),
        TAG_SHA256 => fields.sha256.is_some(),
        TAG_PUBKEY_HINT => fields.pubkey_hint.is_some(),
        TAG_SIGNATURE => fields.signature.is_some(),
        TAG_IMG_TYPE => fields.img_type.is_some(),
        _ => return Ok(()), // unknown tags are skipped (spec.md §4.4)
    };
    if slot_taken {
        return Err(Error::DuplicateTlv);
    }

    match tag {
        TAG_VERSION => {
            fields.version = Some(u32::from_le_bytes(
                value.try_into().map_err(|_| Error::HeaderMalformed)?,
            ));
        }
        TAG_TIMESTAMP => {
            fields.timestamp = Some(u64::from_le_bytes(
                value.try_into().map_err(|_| Error::HeaderMalformed)?,
            ));
        }
        TAG_SHA256 => fields.sha256 = Some(value),
        TAG_PUBKEY_HINT => fields.pubkey_hint = Some(value),
        TAG_SIGNATURE => fields.signature = Some(value),
        TAG_IMG_TYPE => {
            fields.img_type = Some(u16::from_le_bytes(
                value.try_into().map_err(|_| Error::HeaderMalformed)?,
            ));
        }
        _ => unreachable!(),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tlv(tag: u16, value: &[u8]) -> std::vec::Vec<u8> {
        let mut out = std::vec::Vec::new();
        out.extend_from_slice(&tag.to_le_bytes());
        out.extend_from_slice(&(value.len() as u16).to_le_bytes());
        out.extend_from_slice(value);
        while out.len() % 4 != 0 {
            out.push(0xFF);
        }
        out
    }

    fn build_header(tlvs: &[std::vec::Vec<u8>]) -> std::vec::Vec<u8> {
        let mut out = std::vec::Vec::new();
        out.extend_from_slice(&IMAGE_MAGIC);
        out.extend_from_slice(&4096u32.to_le_bytes());
        for t in tlvs {
            out.extend_from_slice(t);
        }
        out.resize(IMAGE_HEADER_SIZE, 0xFF);
        out
    }

    fn mandatory_tlvs() -> std::vec::Vec<std::vec::Vec<u8>> {
        std::vec![
            tlv(TAG_VERSION, &1u32.to_le_bytes()),
            tlv(TAG_TIMESTAMP, &0u64.to_le_bytes()),
            tlv(TAG_IMG_TYPE, &1u16.to_le_bytes()),
            tlv(TAG_SHA256, &[0x11; 32]),
            tlv(TAG_PUBKEY_HINT, &[0x22; 32]),
            tlv(TAG_SIGNATURE, &[0x33; 64]),
        ]
    }

    #[test]
    fn parses_well_formed_header() {
        let bytes = build_header(&mandatory_tlvs());
        let header = parse(&bytes).unwrap();
        assert_eq!(header.image_size, 4096);
        assert_eq!(header.version, 1);
        assert_eq!(header.img_type, 1);
        assert_eq!(header.sha256, &[0x11; 32]);
        assert_eq!(header.signature, &[0x33; 64][..]);
    }

    #[test]
    fn unknown_tlv_is_skipped() {
        let mut tlvs = mandatory_tlvs();
        tlvs.push(tlv(0x9999, &[0xAA; 8]));
        let bytes = build_header(&tlvs);
        assert!(parse(&bytes).is_ok());
    }

    #[test]
    fn duplicate_mandatory_tag_is_rejected() {
        let mut tlvs = mandatory_tlvs();
        tlvs.push(tlv(TAG_VERSION, &2u32.to_le_bytes()));
        let bytes = build_header(&tlvs);
        assert_eq!(parse(&bytes), Err(Error::DuplicateTlv));
    }

    #[test]
    fn missing_mandatory_tag_is_rejected() {
        let tlvs: std::vec::Vec<_> = mandatory_tlvs().into_iter().skip(1).collect();
        let bytes = build_header(&tlvs);
        assert_eq!(parse(&bytes), Err(Error::TlvNotFound));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = build_header(&mandatory_tlvs());
        bytes[0] = b'X';
        assert_eq!(parse(&bytes), Err(Error::HeaderMalformed));
    }

    #[test]
    fn oversized_length_is_rejected() {
        let mut bytes = build_header(&[]);
        // Overwrite the first TLV slot with a length that claims more
        // bytes than remain in the header.
        bytes[8..12].copy_from_slice(&TAG_VERSION.to_le_bytes());
        bytes[10..12].copy_from_slice(&0xFFFFu16.to_le_bytes());
        assert_eq!(parse(&bytes), Err(Error::HeaderTruncated));
    }

    #[test]
    fn wrong_total_length_is_rejected() {
        let bytes = std::vec![0xFFu8; IMAGE_HEADER_SIZE - 1];
        assert_eq!(parse(&bytes), Err(Error::HeaderMalformed));
    }
}

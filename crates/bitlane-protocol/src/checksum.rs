//! CRC32 trailers for data integrity verification.

use bitlane_core::{ErrorKind, Result};
use crc32fast::Hasher;

/// Appends a CRC32 checksum to the serialized packet in place.
pub fn append_checksum_in_place(data: &mut Vec<u8>) {
    let mut hasher = Hasher::new();
    hasher.update(data);
    let checksum = hasher.finalize();
    data.extend_from_slice(&checksum.to_be_bytes());
}

/// Validates and strips the CRC32 trailer from packet data.
/// Returns the payload without the trailer if the checksum matches.
pub fn validate_and_strip_checksum(data: &[u8]) -> Result<&[u8]> {
    if data.len() < 4 {
        return Err(ErrorKind::PacketTooShort);
    }

    let (payload, checksum_bytes) = data.split_at(data.len() - 4);
    let received =
        u32::from_be_bytes([checksum_bytes[0], checksum_bytes[1], checksum_bytes[2], checksum_bytes[3]]);

    let mut hasher = Hasher::new();
    hasher.update(payload);
    if hasher.finalize() != received {
        return Err(ErrorKind::ChecksumFailed);
    }

    Ok(payload)
}

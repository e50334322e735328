// MIT License - Copyright (c) 2026 Peter Wright
// Foxtron DALI gateway driver

//! Foxtron frame encoding/decoding.
//!
//! Every message on the wire is the binary payload followed by a one-byte
//! checksum, hex-encoded as uppercase ASCII and wrapped in SOH/ETB:
//!
//! ```text
//! +-----+---------------------------------+-----+
//! | SOH | hex(payload || checksum)        | ETB |
//! +-----+---------------------------------+-----+
//! ```
//!
//! The checksum is the bitwise complement of the modulo-256 sum of the
//! payload bytes.

use crate::constants::{ETB, SOH};
use crate::error::FrameError;

/// Bitwise NOT of the modulo-256 sum of `payload`.
pub fn checksum(payload: &[u8]) -> u8 {
    !payload.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Build a complete, sendable frame from a binary payload.
pub fn build_frame(payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(payload.len() + 1);
    body.extend_from_slice(payload);
    body.push(checksum(payload));

    let hex = hex::encode_upper(&body);
    let mut frame = Vec::with_capacity(hex.len() + 2);
    frame.push(SOH);
    frame.extend_from_slice(hex.as_bytes());
    frame.push(ETB);
    frame
}

/// Decode and validate the ASCII-hex content found between SOH and ETB.
///
/// Returns the payload with the trailing checksum byte removed.
pub fn parse_frame_content(content: &[u8]) -> Result<Vec<u8>, FrameError> {
    let mut bytes = hex::decode(content).map_err(|_| FrameError::MalformedHex)?;
    if bytes.len() < 2 {
        return Err(FrameError::FrameTooShort { len: bytes.len() });
    }

    // len >= 2 checked above
    let received = bytes.pop().unwrap_or_default();
    let expected = checksum(&bytes);
    if received != expected {
        return Err(FrameError::ChecksumMismatch { expected, received });
    }
    Ok(bytes)
}

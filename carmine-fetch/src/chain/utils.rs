//! Parsing utilities for the Bitcoin wire format.

use crate::chain::error::ParseError;
use sha2::{Digest, Sha256};
use std::io::{Cursor, Read};

/// Used for decoding sequential byte structures into their concrete types.
pub trait ParseFromSlice: Sized {
    /// Reads data from a slice and returns the unread data along with the
    /// parsed object.
    fn parse_from_slice(data: &[u8]) -> Result<(&[u8], Self), ParseError>;
}

/// A Bitcoin variable-length integer (`CompactSize`).
///
/// Values below 0xfd are encoded in one byte; larger values carry a
/// 0xfd/0xfe/0xff marker followed by 2, 4, or 8 little-endian bytes.
pub struct CompactSize;

impl CompactSize {
    /// Reads a CompactSize from the cursor.
    pub fn read(cursor: &mut Cursor<&[u8]>) -> Result<u64, ParseError> {
        let marker = read_bytes(cursor, 1, "Error reading CompactSize marker")?[0];
        match marker {
            0..=0xfc => Ok(marker as u64),
            0xfd => {
                let bytes = read_bytes(cursor, 2, "Error reading CompactSize u16")?;
                Ok(u16::from_le_bytes([bytes[0], bytes[1]]) as u64)
            }
            0xfe => {
                let bytes = read_bytes(cursor, 4, "Error reading CompactSize u32")?;
                Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as u64)
            }
            0xff => {
                let bytes = read_bytes(cursor, 8, "Error reading CompactSize u64")?;
                let mut array = [0u8; 8];
                array.copy_from_slice(&bytes);
                Ok(u64::from_le_bytes(array))
            }
        }
    }

    /// Appends the CompactSize encoding of `value` to `buf`.
    pub fn write(buf: &mut Vec<u8>, value: u64) {
        match value {
            0..=0xfc => buf.push(value as u8),
            0xfd..=0xffff => {
                buf.push(0xfd);
                buf.extend_from_slice(&(value as u16).to_le_bytes());
            }
            0x10000..=0xffff_ffff => {
                buf.push(0xfe);
                buf.extend_from_slice(&(value as u32).to_le_bytes());
            }
            _ => {
                buf.push(0xff);
                buf.extend_from_slice(&value.to_le_bytes());
            }
        }
    }
}

/// Reads `n` bytes from the cursor, failing with `error_message` context.
pub(crate) fn read_bytes(
    cursor: &mut Cursor<&[u8]>,
    n: usize,
    error_message: &str,
) -> Result<Vec<u8>, ParseError> {
    let mut buf = vec![0u8; n];
    cursor
        .read_exact(&mut buf)
        .map_err(|_| ParseError::InvalidData(error_message.to_string()))?;
    Ok(buf)
}

/// Reads a 32-byte array from the cursor.
pub(crate) fn read_array32(
    cursor: &mut Cursor<&[u8]>,
    error_message: &str,
) -> Result<[u8; 32], ParseError> {
    let bytes = read_bytes(cursor, 32, error_message)?;
    let mut array = [0u8; 32];
    array.copy_from_slice(&bytes);
    Ok(array)
}

/// Reads a little-endian u32 from the cursor.
pub(crate) fn read_u32(cursor: &mut Cursor<&[u8]>, error_message: &str) -> Result<u32, ParseError> {
    let bytes = read_bytes(cursor, 4, error_message)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Reads a little-endian i32 from the cursor.
pub(crate) fn read_i32(cursor: &mut Cursor<&[u8]>, error_message: &str) -> Result<i32, ParseError> {
    let bytes = read_bytes(cursor, 4, error_message)?;
    Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Reads a little-endian u64 from the cursor.
pub(crate) fn read_u64(cursor: &mut Cursor<&[u8]>, error_message: &str) -> Result<u64, ParseError> {
    let bytes = read_bytes(cursor, 8, error_message)?;
    let mut array = [0u8; 8];
    array.copy_from_slice(&bytes);
    Ok(u64::from_le_bytes(array))
}

/// Skips `n` bytes, failing with `error_message` context.
pub(crate) fn skip_bytes(
    cursor: &mut Cursor<&[u8]>,
    n: usize,
    error_message: &str,
) -> Result<(), ParseError> {
    let remaining = cursor.get_ref().len() as u64 - cursor.position();
    if remaining < n as u64 {
        return Err(ParseError::InvalidData(error_message.to_string()));
    }
    cursor.set_position(cursor.position() + n as u64);
    Ok(())
}

/// SHA256d, the hash used for block hashes and transaction ids.
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut out = [0u8; 32];
    out.copy_from_slice(&second);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_size_round_trips() {
        for value in [0u64, 1, 0xfc, 0xfd, 0xffff, 0x10000, 0xffff_ffff, u64::MAX] {
            let mut buf = Vec::new();
            CompactSize::write(&mut buf, value);
            let mut cursor = Cursor::new(buf.as_slice());
            assert_eq!(CompactSize::read(&mut cursor).unwrap(), value);
            assert_eq!(cursor.position() as usize, buf.len());
        }
    }

    #[test]
    fn double_sha256_empty_input() {
        // SHA256d("") is a fixed constant.
        assert_eq!(
            hex::encode(double_sha256(b"")),
            "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456"
        );
    }
}

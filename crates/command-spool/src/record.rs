//! Binary record framing for the spool backing file.
//!
//! All records use little-endian byte order.

use crate::error::{SpoolError, SpoolResult};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// State byte: the record has not been consumed yet.
pub const RECORD_STATE_UNREAD: u8 = 0x01;

/// State byte: the record was consumed and only occupies dead space until
/// the next compaction or truncation.
pub const RECORD_STATE_CONSUMED: u8 = 0x02;

/// Flags bit: the payload is zlib-compressed.
pub const RECORD_FLAG_COMPRESSED: u8 = 0b0000_0001;

/// Size of the `total_len` prefix in bytes.
pub(crate) const LENGTH_PREFIX_SIZE: usize = 4;

/// Header size in bytes (state + flags + reserved + payload_len),
/// excluding the length prefix.
pub(crate) const RECORD_HEADER_SIZE: usize = 1 + 1 + 2 + 4;

/// Byte offset of the state byte from the start of an encoded record
/// (i.e. just past the length prefix).
pub(crate) const STATE_BYTE_OFFSET: u64 = LENGTH_PREFIX_SIZE as u64;

/// A single spool record.
///
/// Wire format:
/// ```text
/// [4: total_len][1: state][1: flags][2: reserved][4: payload_len][N: payload]
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpoolRecord {
    /// Consumed/unread state.
    pub state: u8,
    /// Flags (bit 0: compressed payload).
    pub flags: u8,
    /// The record payload as stored (compressed when the flag is set).
    pub payload: Vec<u8>,
}

impl SpoolRecord {
    /// Create a fresh unread record.
    pub fn unread(payload: Vec<u8>, compressed: bool) -> Self {
        Self {
            state: RECORD_STATE_UNREAD,
            flags: if compressed { RECORD_FLAG_COMPRESSED } else { 0 },
            payload,
        }
    }

    /// Whether this record has not been consumed.
    pub fn is_unread(&self) -> bool {
        self.state == RECORD_STATE_UNREAD
    }

    /// Whether the payload is compressed.
    pub fn is_compressed(&self) -> bool {
        self.flags & RECORD_FLAG_COMPRESSED != 0
    }

    /// Total encoded size in bytes, including the length prefix.
    pub fn encoded_len(&self) -> u64 {
        (LENGTH_PREFIX_SIZE + RECORD_HEADER_SIZE + self.payload.len()) as u64
    }

    /// Encode the record to bytes (including the length prefix).
    pub fn encode(&self) -> Vec<u8> {
        let payload_len = self.payload.len();
        let total_len = RECORD_HEADER_SIZE + payload_len;

        let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + total_len);

        // Length prefix (excludes itself)
        buf.extend_from_slice(&(total_len as u32).to_le_bytes());

        // State
        buf.push(self.state);

        // Flags
        buf.push(self.flags);

        // Reserved (2 bytes)
        buf.extend_from_slice(&[0u8, 0u8]);

        // Payload length
        buf.extend_from_slice(&(payload_len as u32).to_le_bytes());

        // Payload
        buf.extend_from_slice(&self.payload);

        buf
    }

    /// Decode a record from bytes (excluding the length prefix).
    ///
    /// The caller should first read the 4-byte length prefix, then read
    /// that many bytes and pass them to this function.
    pub fn decode(data: &[u8]) -> SpoolResult<Self> {
        if data.len() < RECORD_HEADER_SIZE {
            return Err(SpoolError::InvalidRecord(format!(
                "record too short: {} bytes, need at least {}",
                data.len(),
                RECORD_HEADER_SIZE
            )));
        }

        // State
        let state = data[0];
        if state != RECORD_STATE_UNREAD && state != RECORD_STATE_CONSUMED {
            return Err(SpoolError::InvalidRecord(format!(
                "unknown state byte: {:#04x}",
                state
            )));
        }

        // Flags
        let flags = data[1];

        // Reserved bytes at [2..4] are ignored

        // Payload length
        let payload_len = u32::from_le_bytes(
            data[4..8]
                .try_into()
                .map_err(|_| SpoolError::InvalidRecord("invalid payload_len".to_string()))?,
        ) as usize;

        // Validate payload length
        let expected_total = RECORD_HEADER_SIZE + payload_len;
        if data.len() != expected_total {
            return Err(SpoolError::InvalidRecord(format!(
                "record size mismatch: got {} bytes, expected {}",
                data.len(),
                expected_total
            )));
        }

        // Payload
        let payload = data[RECORD_HEADER_SIZE..].to_vec();

        Ok(Self {
            state,
            flags,
            payload,
        })
    }
}

/// Compress a payload with zlib.
pub(crate) fn compress(data: &[u8]) -> SpoolResult<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Decompress a zlib payload.
pub(crate) fn decompress(data: &[u8]) -> SpoolResult<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_roundtrip() {
        let record = SpoolRecord::unread(vec![1, 2, 3, 4, 5], false);
        let encoded = record.encode();

        // Length prefix matches the rest of the buffer
        let total_len = u32::from_le_bytes(encoded[0..4].try_into().unwrap()) as usize;
        assert_eq!(total_len, encoded.len() - LENGTH_PREFIX_SIZE);

        let decoded = SpoolRecord::decode(&encoded[LENGTH_PREFIX_SIZE..]).unwrap();
        assert_eq!(decoded, record);
        assert!(decoded.is_unread());
        assert!(!decoded.is_compressed());
    }

    #[test]
    fn test_empty_payload() {
        let record = SpoolRecord::unread(vec![], false);
        let encoded = record.encode();

        let decoded = SpoolRecord::decode(&encoded[LENGTH_PREFIX_SIZE..]).unwrap();
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn test_unknown_state_byte_rejected() {
        let record = SpoolRecord::unread(vec![9, 9], false);
        let mut encoded = record.encode();
        encoded[LENGTH_PREFIX_SIZE] = 0x7F;

        assert!(SpoolRecord::decode(&encoded[LENGTH_PREFIX_SIZE..]).is_err());
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let record = SpoolRecord::unread(vec![1, 2, 3], false);
        let encoded = record.encode();

        // Drop the last payload byte
        let truncated = &encoded[LENGTH_PREFIX_SIZE..encoded.len() - 1];
        assert!(SpoolRecord::decode(truncated).is_err());
    }

    #[test]
    fn test_compress_roundtrip() {
        let data = b"abcabcabcabcabcabcabcabcabcabc".to_vec();
        let compressed = compress(&data).unwrap();
        assert_eq!(decompress(&compressed).unwrap(), data);
    }
}

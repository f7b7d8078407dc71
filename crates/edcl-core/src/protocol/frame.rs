//! Request frame (host -> target).
//!
//! ```text
//! byte 0      bit7 start | bit6 write | bits5..0 word_count - 1
//! bytes 1..=4 address, big-endian
//! bytes 5..   data words, big-endian, write requests only
//! ```
//!
//! A resend after a NACK ORs `sequence << 2` into bytes 2..=3. Those bytes
//! also hold address bits 23..8, so the marker is only applied by the resend
//! path and never by [`Request::encode`].

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use std::io::Cursor;
use thiserror::Error;

use super::constants::*;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Length {length} is not a multiple of 4")]
    Unaligned { length: usize },

    #[error("Length {length} outside 4..={max} bytes")]
    Capacity { length: usize, max: usize },

    #[error("Frame missing start bit (flags=0x{flags:02X})")]
    MissingStart { flags: u8 },

    #[error("Incomplete frame: need {needed} more bytes")]
    Incomplete { needed: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Check a transfer length against a direction's capacity.
pub fn check_length(length: usize, max: usize) -> Result<(), FrameError> {
    if length == 0 || length > max {
        return Err(FrameError::Capacity { length, max });
    }
    if length % 4 != 0 {
        return Err(FrameError::Unaligned { length });
    }
    Ok(())
}

/// One outgoing EDCL request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Reserved; tracked but not framed.
    pub offset: u32,
    /// Session sequence number of this chunk.
    pub sequence: u32,
    address: u32,
    write: bool,
    length: usize,
    data: Vec<u32>,
}

impl Request {
    /// Build a write request carrying `words`.
    pub fn write(address: u32, words: &[u32]) -> Result<Self, FrameError> {
        check_length(words.len() * 4, MAX_SND_SZ)?;
        Ok(Self {
            offset: 0,
            sequence: 0,
            address,
            write: true,
            length: words.len() * 4,
            data: words.to_vec(),
        })
    }

    /// Build a read request for `length` bytes.
    pub fn read(address: u32, length: usize) -> Result<Self, FrameError> {
        check_length(length, MAX_RCV_SZ)?;
        Ok(Self {
            offset: 0,
            sequence: 0,
            address,
            write: false,
            length,
            data: Vec::new(),
        })
    }

    pub fn with_sequence(mut self, sequence: u32) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn address(&self) -> u32 {
        self.address
    }

    pub fn is_write(&self) -> bool {
        self.write
    }

    /// Transfer length in bytes.
    pub fn length(&self) -> usize {
        self.length
    }

    pub fn word_count(&self) -> usize {
        self.length / 4
    }

    pub fn data(&self) -> &[u32] {
        &self.data
    }

    /// Bytes this request occupies on the wire.
    pub fn wire_len(&self) -> usize {
        if self.write {
            REQUEST_HEADER_SIZE + self.length
        } else {
            REQUEST_HEADER_SIZE
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        debug_assert!(self.word_count() >= 1 && self.word_count() <= NWORD_MAX_SND);

        let mut buf = vec![0u8; self.wire_len()];
        buf[0] = FLAG_START | ((self.word_count() - 1) as u8 & LENGTH_MASK);
        if self.write {
            buf[0] |= FLAG_WRITE;
        }
        BigEndian::write_u32(&mut buf[1..REQUEST_HEADER_SIZE], self.address);
        if self.write {
            BigEndian::write_u32_into(&self.data, &mut buf[REQUEST_HEADER_SIZE..]);
        }
        buf
    }

    /// Encode for a resend, carrying the sequence echoed by the target.
    pub fn encode_with_sequence(&self, sequence: u16) -> Vec<u8> {
        let mut buf = self.encode();
        apply_sequence_marker(&mut buf, sequence);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < REQUEST_HEADER_SIZE {
            return Err(FrameError::Incomplete {
                needed: REQUEST_HEADER_SIZE - bytes.len(),
            });
        }
        let flags = bytes[0];
        if flags & FLAG_START == 0 {
            return Err(FrameError::MissingStart { flags });
        }
        let write = flags & FLAG_WRITE != 0;
        let words = (flags & LENGTH_MASK) as usize + 1;

        let mut cursor = Cursor::new(&bytes[1..]);
        let address = cursor.read_u32::<BigEndian>()?;

        if !write {
            check_length(words * 4, MAX_RCV_SZ)?;
            return Ok(Self {
                offset: 0,
                sequence: 0,
                address,
                write,
                length: words * 4,
                data: Vec::new(),
            });
        }

        let needed = REQUEST_HEADER_SIZE + words * 4;
        if bytes.len() < needed {
            return Err(FrameError::Incomplete {
                needed: needed - bytes.len(),
            });
        }
        let mut data = vec![0u32; words];
        cursor.read_u32_into::<BigEndian>(&mut data)?;

        Ok(Self {
            offset: 0,
            sequence: 0,
            address,
            write,
            length: words * 4,
            data,
        })
    }
}

/// OR the 14-bit sequence marker into bytes 2..=3 of an encoded request.
pub fn apply_sequence_marker(buf: &mut [u8], sequence: u16) {
    let marker = ((sequence as u32 & SEQUENCE_MASK) << SEQUENCE_MARKER_SHIFT) as u16;
    buf[2] |= (marker >> 8) as u8;
    buf[3] |= marker as u8;
}

/// The address bits (23..8) a resend marker for `sequence` sets.
pub fn sequence_marker_bits(sequence: u16) -> u32 {
    ((sequence as u32 & SEQUENCE_MASK) << SEQUENCE_MARKER_SHIFT) << 8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_request_layout() {
        let req = Request::write(0x4000_0000, &[0xDEADBEEF, 0x01020304]).unwrap();
        let bytes = req.encode();
        assert_eq!(bytes.len(), 13);
        // start | write | (2 words - 1)
        assert_eq!(bytes[0], 0xC1);
        assert_eq!(&bytes[1..5], &[0x40, 0x00, 0x00, 0x00]);
        assert_eq!(&bytes[5..9], &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(&bytes[9..13], &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_read_request_has_no_payload() {
        let req = Request::read(0x8000_0010, 4).unwrap();
        assert_eq!(req.encode(), vec![0x80, 0x80, 0x00, 0x00, 0x10]);
        assert_eq!(req.wire_len(), 5);
    }

    #[test]
    fn test_full_chunk_length_field() {
        let words = vec![0u32; NWORD_MAX_SND];
        let bytes = Request::write(0, &words).unwrap().encode();
        assert_eq!(bytes[0], 0xC0 | 0x3F);
        assert_eq!(bytes.len(), BUFSIZE_MAX_SND);
    }

    #[test]
    fn test_capacity_enforced_at_construction() {
        let words = vec![0u32; NWORD_MAX_SND + 1];
        assert!(matches!(
            Request::write(0, &words),
            Err(FrameError::Capacity { length: 260, .. })
        ));
        assert!(Request::write(0, &[]).is_err());
        assert!(matches!(
            Request::read(0, 6),
            Err(FrameError::Unaligned { length: 6 })
        ));
        assert!(Request::read(0, MAX_RCV_SZ + 4).is_err());
    }

    #[test]
    fn test_request_roundtrip() {
        let cases = [
            Request::write(0x1234_5678, &[1, 2, 3]).unwrap(),
            Request::write(0xFFFF_FFFC, &[u32::MAX]).unwrap(),
            Request::read(0x8000_0000, MAX_RCV_SZ).unwrap(),
        ];
        for req in cases {
            assert_eq!(Request::decode(&req.encode()).unwrap(), req);
        }
    }

    #[test]
    fn test_sequence_marker_only_touches_bytes_2_and_3() {
        let req = Request::write(0x4000_0000, &[0xAABBCCDD]).unwrap();
        let plain = req.encode();
        let marked = req.encode_with_sequence(0x0005);

        assert_eq!(plain.len(), marked.len());
        assert_eq!(marked[2], 0x00);
        assert_eq!(marked[3], 0x14);
        for i in (0..plain.len()).filter(|i| *i != 2 && *i != 3) {
            assert_eq!(plain[i], marked[i]);
        }

        let decoded = Request::decode(&marked).unwrap();
        assert_eq!(decoded.address(), 0x4000_0000 | sequence_marker_bits(5));
        assert_eq!(decoded.data(), req.data());
    }

    #[test]
    fn test_decode_rejects_bad_frames() {
        assert!(matches!(
            Request::decode(&[0x40, 0, 0, 0, 0]),
            Err(FrameError::MissingStart { flags: 0x40 })
        ));
        assert!(matches!(
            Request::decode(&[0xC1, 0, 0, 0, 0, 1, 2, 3, 4]),
            Err(FrameError::Incomplete { needed: 4 })
        ));
    }
}

//! Reply frame (target -> host).
//!
//! ```text
//! bytes 0..=1 offset (reserved), big-endian
//! bytes 2..=5 control word, big-endian
//!               bits 31..18 sequence
//!               bit  17     nack
//!               bits 16..7  length in bytes
//! bytes 6..=9 address, big-endian
//! bytes 10..  length / 4 data words, big-endian
//! ```

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use std::fmt;
use std::io::Cursor;

use super::constants::*;
use super::frame::{FrameError, check_length};

/// One incoming EDCL reply.
#[derive(Clone, PartialEq, Eq)]
pub struct Reply {
    pub offset: u16,
    /// 14-bit sequence echoed by the target.
    pub sequence: u16,
    /// Target rejected the request; resend without advancing.
    pub nack: bool,
    pub address: u32,
    pub data: Vec<u32>,
}

impl Reply {
    /// Positive acknowledgement, optionally carrying read data.
    pub fn ack(sequence: u16, address: u32, data: Vec<u32>) -> Self {
        Self {
            offset: 0,
            sequence: sequence & SEQUENCE_MASK as u16,
            nack: false,
            address,
            data,
        }
    }

    pub fn nack(sequence: u16, address: u32) -> Self {
        Self {
            offset: 0,
            sequence: sequence & SEQUENCE_MASK as u16,
            nack: true,
            address,
            data: Vec::new(),
        }
    }

    /// Payload length in bytes.
    pub fn length(&self) -> usize {
        self.data.len() * 4
    }

    /// Total bytes on the wire.
    pub fn msglen(&self) -> usize {
        REPLY_HEADER_SIZE + self.length()
    }

    pub fn encode(&self) -> Vec<u8> {
        debug_assert!(self.data.len() <= NWORD_MAX_RCV);

        let control = ((self.sequence as u32 & SEQUENCE_MASK) << SEQUENCE_SHIFT)
            | if self.nack { NACK_BIT } else { 0 }
            | ((self.length() as u32 & REPLY_LENGTH_MASK) << REPLY_LENGTH_SHIFT);

        let mut buf = vec![0u8; self.msglen()];
        BigEndian::write_u16(&mut buf[0..2], self.offset);
        BigEndian::write_u32(&mut buf[2..6], control);
        BigEndian::write_u32(&mut buf[6..10], self.address);
        BigEndian::write_u32_into(&self.data, &mut buf[REPLY_HEADER_SIZE..]);
        buf
    }

    /// Decode a reply from the front of `bytes`.
    ///
    /// Returns [`FrameError::Incomplete`] while the header or the announced
    /// payload has not fully arrived. Trailing bytes are ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < REPLY_HEADER_SIZE {
            return Err(FrameError::Incomplete {
                needed: REPLY_HEADER_SIZE - bytes.len(),
            });
        }
        let mut cursor = Cursor::new(bytes);
        let offset = cursor.read_u16::<BigEndian>()?;
        let control = cursor.read_u32::<BigEndian>()?;
        let address = cursor.read_u32::<BigEndian>()?;

        let sequence = ((control >> SEQUENCE_SHIFT) & SEQUENCE_MASK) as u16;
        let nack = control & NACK_BIT != 0;
        let length = ((control >> REPLY_LENGTH_SHIFT) & REPLY_LENGTH_MASK) as usize;

        if length > 0 {
            check_length(length, MAX_RCV_SZ)?;
        }
        let needed = REPLY_HEADER_SIZE + length;
        if bytes.len() < needed {
            return Err(FrameError::Incomplete {
                needed: needed - bytes.len(),
            });
        }
        let mut data = vec![0u32; length / 4];
        cursor.read_u32_into::<BigEndian>(&mut data)?;

        Ok(Self {
            offset,
            sequence,
            nack,
            address,
            data,
        })
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Reply({} seq={} addr={:08X} words={})",
            if self.nack { "NACK" } else { "ACK" },
            self.sequence,
            self.address,
            self.data.len()
        )
    }
}

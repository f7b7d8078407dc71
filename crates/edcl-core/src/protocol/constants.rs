//! Protocol constants for the serial EDCL link.
//!
//! Sizes are taken from the esplink reference transport.

use std::time::Duration;

// ============================================================================
// Transport Defaults
// ============================================================================

/// Default debug port device.
pub const DEFAULT_SERIAL_PORT: &str = "/dev/ttyUSB0";

/// Default line rate of the debug UART.
pub const DEFAULT_BAUD_RATE: u32 = 38_400;

/// Per-read timeout (VTIME = 1 decisecond).
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 100;

/// Sends of a single chunk before the session is abandoned.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Pause after each reset pulse. The target ignores shorter gaps.
pub const RESET_PULSE_DELAY: Duration = Duration::from_millis(500);

/// Value written to the reset register.
pub const RESET_PULSE_VALUE: u32 = 0x1;

// ============================================================================
// Request Frame (Host -> Target)
// ============================================================================

/// Flags byte plus 32-bit address.
pub const REQUEST_HEADER_SIZE: usize = 5;

/// Words carried by one write request. The 6-bit length field caps this.
pub const NWORD_MAX_SND: usize = 64;

/// Largest write chunk in bytes.
pub const MAX_SND_SZ: usize = 4 * NWORD_MAX_SND;

pub const BUFSIZE_MAX_SND: usize = REQUEST_HEADER_SIZE + MAX_SND_SZ;

pub const FLAG_START: u8 = 1 << 7;
pub const FLAG_WRITE: u8 = 1 << 6;
pub const LENGTH_MASK: u8 = 0x3F;

// ============================================================================
// Reply Frame (Target -> Host)
// ============================================================================

/// Offset (2) + control word (4) + address (4).
pub const REPLY_HEADER_SIZE: usize = 10;

/// Words carried by one read reply.
pub const NWORD_MAX_RCV: usize = 23;

/// Largest read chunk in bytes.
pub const MAX_RCV_SZ: usize = 4 * NWORD_MAX_RCV;

pub const BUFSIZE_MAX_RCV: usize = REPLY_HEADER_SIZE + MAX_RCV_SZ;

/// Control word: bits 31..18.
pub const SEQUENCE_SHIFT: u32 = 18;
pub const SEQUENCE_MASK: u32 = 0x3FFF;

/// Control word: bit 17.
pub const NACK_BIT: u32 = 1 << 17;

/// Control word: bits 16..7, byte count.
pub const REPLY_LENGTH_SHIFT: u32 = 7;
pub const REPLY_LENGTH_MASK: u32 = 0x3FF;

/// Sequence bits sit at bits 15..2 of frame bytes 2..=3 in both directions.
pub const SEQUENCE_MARKER_SHIFT: u32 = 2;

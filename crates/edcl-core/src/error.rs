//! Error types for EDCL operations.

use thiserror::Error;

use crate::protocol::FrameError;
use crate::transport::TransportError;

#[derive(Error, Debug)]
pub enum EdclError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// The target never acknowledged one chunk. Earlier chunks stay written.
    #[error("Handle EDCL message failed after {attempts} attempts (chunk at 0x{address:08X})")]
    ProtocolExhausted { address: u32, attempts: u32 },

    #[error("File error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Memory image line {line}: {message}")]
    ImageParse { line: usize, message: String },

    #[error("Invalid transfer size {size}: must be a non-zero multiple of 4")]
    InvalidSize { size: u64 },
}

pub type Result<T> = std::result::Result<T, EdclError>;

//! Event system for UI decoupling.
//!
//! Allows the CLI (or any other frontend) to follow transfers without
//! tight coupling to the protocol engine.

use std::fmt;

/// High-level operation an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    LoadText,
    DumpText,
    LoadBinary,
    DumpBinary,
    SetWord,
    GetWord,
    Reset,
    Listen,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::LoadText => write!(f, "loading memory"),
            Operation::DumpText => write!(f, "dumping memory"),
            Operation::LoadBinary => write!(f, "loading binary"),
            Operation::DumpBinary => write!(f, "dumping binary"),
            Operation::SetWord => write!(f, "set word"),
            Operation::GetWord => write!(f, "get word"),
            Operation::Reset => write!(f, "reset"),
            Operation::Listen => write!(f, "listen"),
        }
    }
}

/// Frame direction on the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    Tx, // Host -> Target
    Rx, // Target -> Host
}

impl fmt::Display for PacketDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketDirection::Tx => write!(f, "TX"),
            PacketDirection::Rx => write!(f, "RX"),
        }
    }
}

/// Events emitted by the link.
#[derive(Debug, Clone)]
pub enum EdclEvent {
    /// Channel opened.
    Connected { device: String },
    /// Request frame sent.
    ChunkSent {
        sequence: u32,
        address: u32,
        bytes: usize,
        attempt: u32,
    },
    /// Target acknowledged a chunk.
    ChunkAcked {
        sequence: u32,
        address: u32,
        bytes: usize,
    },
    /// Target asked for a resend.
    Nack { address: u32, echoed_sequence: u16 },
    /// No complete reply within the read window.
    ReplyTimeout { address: u32, attempt: u32 },
    /// Bytes transferred so far for a multi-chunk operation.
    Progress {
        operation: Operation,
        current: u64,
        total: u64,
    },
    /// Raw frame on the wire.
    Packet {
        direction: PacketDirection,
        length: usize,
        data: Vec<u8>,
    },
    /// Operation finished.
    Complete { operation: Operation },
}

/// Observer trait for receiving link events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait EdclObserver {
    /// Called when an event occurs.
    fn on_event(&self, event: &EdclEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl EdclObserver for NullObserver {
    fn on_event(&self, _event: &EdclEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl EdclObserver for TracingObserver {
    fn on_event(&self, event: &EdclEvent) {
        match event {
            EdclEvent::Connected { device } => {
                tracing::info!(device = %device, "Connected");
            }
            EdclEvent::ChunkSent {
                sequence,
                address,
                bytes,
                attempt,
            } => {
                tracing::trace!(
                    sequence,
                    address = %format!("{:08X}", address),
                    bytes,
                    attempt,
                    "Chunk sent"
                );
            }
            EdclEvent::ChunkAcked {
                sequence,
                address,
                bytes,
            } => {
                tracing::debug!(
                    sequence,
                    address = %format!("{:08X}", address),
                    bytes,
                    "Chunk acknowledged"
                );
            }
            EdclEvent::Nack {
                address,
                echoed_sequence,
            } => {
                tracing::warn!(
                    address = %format!("{:08X}", address),
                    sequence = echoed_sequence,
                    "NACK, resending"
                );
            }
            EdclEvent::ReplyTimeout { address, attempt } => {
                tracing::warn!(
                    address = %format!("{:08X}", address),
                    attempt,
                    "No reply, resending"
                );
            }
            EdclEvent::Progress {
                operation,
                current,
                total,
            } => {
                let pct = if *total > 0 {
                    (*current * 100) / *total
                } else {
                    0
                };
                tracing::debug!(operation = %operation, progress = %format!("{}%", pct), "Progress");
            }
            EdclEvent::Packet {
                direction,
                length,
                data,
            } => {
                tracing::trace!(dir = %direction, len = length, data = ?data, "Frame");
            }
            EdclEvent::Complete { operation } => {
                tracing::info!(operation = %operation, "Operation complete");
            }
        }
    }
}

impl<O: EdclObserver + ?Sized> EdclObserver for std::sync::Arc<O> {
    fn on_event(&self, event: &EdclEvent) {
        (**self).on_event(event)
    }
}

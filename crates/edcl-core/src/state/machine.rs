//! Exchange state machine and transfer session tracking.

use std::fmt;

/// State of a single request/reply exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExchangeState {
    /// Nothing in flight.
    #[default]
    Idle,
    /// Request sent, waiting for the target.
    AwaitingReply,
    /// Target acknowledged; terminal for this chunk.
    Acked,
    /// NACK, mismatch or timeout; the request will be sent again.
    NackRetry,
    /// Out of attempts.
    Failed,
}

impl fmt::Display for ExchangeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeState::Idle => write!(f, "IDLE"),
            ExchangeState::AwaitingReply => write!(f, "AWAITING_REPLY"),
            ExchangeState::Acked => write!(f, "ACKED"),
            ExchangeState::NackRetry => write!(f, "NACK_RETRY"),
            ExchangeState::Failed => write!(f, "FAILED"),
        }
    }
}

impl ExchangeState {
    /// Whether `next` is a legal successor of this state.
    pub fn can_transition(&self, next: ExchangeState) -> bool {
        use ExchangeState::*;
        matches!(
            (self, next),
            (Idle, AwaitingReply)
                | (AwaitingReply, Acked)
                | (AwaitingReply, NackRetry)
                | (NackRetry, AwaitingReply)
                | (NackRetry, Failed)
        )
    }

    /// Transition to a new state.
    pub fn goto(&mut self, next: ExchangeState) {
        debug_assert!(
            self.can_transition(next),
            "illegal exchange transition {} -> {}",
            self,
            next
        );
        tracing::trace!(from = %self, to = %next, "Exchange transition");
        *self = next;
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExchangeState::Acked | ExchangeState::Failed)
    }
}

/// Progress of one chunked read or write.
#[derive(Debug)]
pub struct TransferSession {
    /// First address of the transfer.
    pub start: u32,
    /// Total bytes to move.
    pub total: usize,
    /// Bytes not yet acknowledged.
    pub remaining: usize,
    /// Address of the next chunk.
    pub cursor: u32,
    /// Sequence number of the next chunk.
    pub sequence: u32,
    /// Sends of the current chunk so far.
    pub attempts: u32,
    /// Largest chunk for this direction.
    chunk_cap: usize,
    chunks: usize,
    retries: u32,
}

impl TransferSession {
    pub fn new(start: u32, total: usize, chunk_cap: usize, first_sequence: u32) -> Self {
        Self {
            start,
            total,
            remaining: total,
            cursor: start,
            sequence: first_sequence,
            attempts: 0,
            chunk_cap,
            chunks: 0,
            retries: 0,
        }
    }

    /// Length of the next chunk in bytes.
    pub fn next_chunk_len(&self) -> usize {
        self.remaining.min(self.chunk_cap)
    }

    /// Record a send of the current chunk; returns the attempt number.
    pub fn record_attempt(&mut self) -> u32 {
        self.attempts += 1;
        if self.attempts > 1 {
            self.retries += 1;
        }
        self.attempts
    }

    /// Move past an acknowledged chunk.
    pub fn advance(&mut self, chunk_len: usize) {
        self.cursor = self.cursor.wrapping_add(chunk_len as u32);
        self.remaining -= chunk_len;
        self.sequence = self.sequence.wrapping_add(1);
        self.attempts = 0;
        self.chunks += 1;
    }

    pub fn transferred(&self) -> usize {
        self.total - self.remaining
    }

    pub fn is_done(&self) -> bool {
        self.remaining == 0
    }

    pub fn report(&self) -> TransferReport {
        TransferReport {
            start: self.start,
            end: self.cursor,
            bytes: self.transferred(),
            chunks: self.chunks,
            retries: self.retries,
            next_sequence: self.sequence,
        }
    }
}

/// Summary of a finished transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferReport {
    pub start: u32,
    /// Cursor after the last chunk.
    pub end: u32,
    pub bytes: usize,
    pub chunks: usize,
    /// Resends across all chunks.
    pub retries: u32,
    pub next_sequence: u32,
}

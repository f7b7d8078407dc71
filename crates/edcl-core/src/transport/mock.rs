//! Mock debug link for testing.
//!
//! Runs in one of two modes:
//! - scripted: `receive` returns queued replies, an empty queue reads as a
//!   timeout;
//! - target: every sent request is decoded against a sparse word memory and
//!   answered like the hardware would, with injectable NACK/drop faults.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use super::traits::{Channel, TransportError};
use crate::protocol::{Reply, Request, sequence_marker_bits};

/// Fault applied to the next request seen by the simulated target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Reply with NACK and the expected sequence.
    Nack,
    /// Swallow the request; the host sees a timeout.
    Drop,
}

#[derive(Debug, Default)]
struct Target {
    memory: BTreeMap<u32, u32>,
    faults: VecDeque<Fault>,
    always_nack: bool,
    /// Sequence the target expects next, echoed in every reply.
    sequence: u16,
    /// Address of the last NACKed request, used to strip the resend marker.
    nacked: Option<u32>,
}

impl Target {
    fn handle(&mut self, frame: &[u8]) -> Option<Reply> {
        let request = Request::decode(frame).ok()?;
        let mut address = request.address();
        if let Some(original) = self.nacked
            && address == original | sequence_marker_bits(self.sequence)
        {
            address = original;
        }

        if self.always_nack {
            self.nacked = Some(address);
            return Some(Reply::nack(self.sequence, address));
        }
        match self.faults.pop_front() {
            Some(Fault::Nack) => {
                self.nacked = Some(address);
                return Some(Reply::nack(self.sequence, address));
            }
            Some(Fault::Drop) => return None,
            None => {}
        }

        self.nacked = None;
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1) & 0x3FFF;

        if request.is_write() {
            for (i, word) in request.data().iter().enumerate() {
                self.memory.insert(address.wrapping_add(4 * i as u32), *word);
            }
            Some(Reply::ack(sequence, address, Vec::new()))
        } else {
            let data = (0..request.word_count() as u32)
                .map(|i| {
                    self.memory
                        .get(&address.wrapping_add(4 * i))
                        .copied()
                        .unwrap_or(0)
                })
                .collect();
            Some(Reply::ack(sequence, address, data))
        }
    }
}

/// Mock channel; clones share state so tests can inspect after handing one off.
#[derive(Clone)]
pub struct MockTransport {
    /// Pending bytes for `receive`, one entry per delivery.
    rx_queue: Arc<Mutex<VecDeque<Vec<u8>>>>,
    /// Captured writes.
    write_log: Arc<Mutex<Vec<(Instant, Vec<u8>)>>>,
    /// Simulated target, if any.
    target: Arc<Mutex<Option<Target>>>,
}

impl MockTransport {
    /// Scripted mock with no target behind it.
    pub fn new() -> Self {
        Self {
            rx_queue: Arc::new(Mutex::new(VecDeque::new())),
            write_log: Arc::new(Mutex::new(Vec::new())),
            target: Arc::new(Mutex::new(None)),
        }
    }

    /// Mock backed by a simulated target with zeroed memory.
    pub fn with_target() -> Self {
        let mock = Self::new();
        *mock.target.lock().unwrap() = Some(Target::default());
        mock
    }

    /// Queue raw bytes to be returned on a later `receive`.
    pub fn queue_bytes(&self, bytes: &[u8]) {
        self.rx_queue.lock().unwrap().push_back(bytes.to_vec());
    }

    /// Queue an encoded reply.
    pub fn queue_reply(&self, reply: &Reply) {
        self.queue_bytes(&reply.encode());
    }

    /// Inject a fault for the next request the target sees.
    pub fn inject(&self, fault: Fault) {
        if let Some(target) = self.target.lock().unwrap().as_mut() {
            target.faults.push_back(fault);
        }
    }

    /// Make the target NACK every request.
    pub fn set_always_nack(&self, enabled: bool) {
        if let Some(target) = self.target.lock().unwrap().as_mut() {
            target.always_nack = enabled;
        }
    }

    /// Preload a word into target memory.
    pub fn poke(&self, address: u32, value: u32) {
        if let Some(target) = self.target.lock().unwrap().as_mut() {
            target.memory.insert(address, value);
        }
    }

    /// Read a word from target memory.
    pub fn peek(&self, address: u32) -> Option<u32> {
        self.target
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|t| t.memory.get(&address).copied())
    }

    /// Get all captured writes.
    pub fn get_writes(&self) -> Vec<Vec<u8>> {
        self.write_log
            .lock()
            .unwrap()
            .iter()
            .map(|(_, bytes)| bytes.clone())
            .collect()
    }

    /// Get the time each write was captured.
    pub fn get_write_times(&self) -> Vec<Instant> {
        self.write_log.lock().unwrap().iter().map(|(t, _)| *t).collect()
    }

    /// Get all captured writes decoded as requests.
    pub fn get_requests(&self) -> Vec<Request> {
        self.get_writes()
            .iter()
            .filter_map(|bytes| Request::decode(bytes).ok())
            .collect()
    }

    /// Clear captured writes.
    pub fn clear_writes(&self) {
        self.write_log.lock().unwrap().clear();
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Channel for MockTransport {
    fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        self.write_log
            .lock()
            .unwrap()
            .push((Instant::now(), data.to_vec()));

        let reply = self
            .target
            .lock()
            .unwrap()
            .as_mut()
            .and_then(|t| t.handle(data));
        if let Some(reply) = reply {
            self.queue_reply(&reply);
        }
        Ok(data.len())
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut queue = self.rx_queue.lock().unwrap();
        let Some(mut pending) = queue.pop_front() else {
            return Ok(0);
        };
        let n = pending.len().min(buf.len());
        buf[..n].copy_from_slice(&pending[..n]);
        if n < pending.len() {
            queue.push_front(pending.split_off(n));
        }
        Ok(n)
    }

    fn name(&self) -> &str {
        "mock"
    }
}

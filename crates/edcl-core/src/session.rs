//! EDCL link - chunked, acknowledged memory transfers.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::{EdclError, Result};
use crate::events::{EdclEvent, EdclObserver, Operation, PacketDirection, TracingObserver};
use crate::protocol::constants::*;
use crate::protocol::{FrameError, Reply, Request};
use crate::state::{ExchangeState, TransferReport, TransferSession};
use crate::transport::{Channel, SerialChannel};

/// Configuration for a debug link.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Serial device of the debug port.
    pub device: String,
    /// Line rate.
    pub baud_rate: u32,
    /// Per-read timeout in milliseconds.
    pub read_timeout_ms: u64,
    /// Sends of one chunk before giving up.
    pub max_attempts: u32,
    /// Pause after each reset pulse in milliseconds (at least 500).
    pub reset_delay_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            device: DEFAULT_SERIAL_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            reset_delay_ms: RESET_PULSE_DELAY.as_millis() as u64,
        }
    }
}

impl LinkConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: LinkConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Reset pause, never shorter than the target's minimum.
    pub fn reset_delay(&self) -> Duration {
        Duration::from_millis(self.reset_delay_ms).max(RESET_PULSE_DELAY)
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// An open debug link: the channel, its configuration and an observer.
///
/// The channel is owned for the lifetime of the link and closed on drop.
pub struct EdclLink<C: Channel, O: EdclObserver = TracingObserver> {
    pub(crate) channel: C,
    pub(crate) config: LinkConfig,
    pub(crate) observer: Arc<O>,
    /// Sequence for the next chunk of the current operation.
    pub(crate) sequence: u32,
}

impl EdclLink<SerialChannel, TracingObserver> {
    /// Open the serial debug port named in `config`.
    pub fn connect(config: LinkConfig) -> Result<Self> {
        Self::connect_with_observer(config, Arc::new(TracingObserver))
    }
}

impl<O: EdclObserver> EdclLink<SerialChannel, O> {
    /// Open the serial debug port with a custom observer.
    #[instrument(skip(config, observer), fields(device = %config.device))]
    pub fn connect_with_observer(config: LinkConfig, observer: Arc<O>) -> Result<Self> {
        info!("Connecting to serial port...");
        let channel = SerialChannel::open(&config)?;
        Ok(Self::with_channel(channel, config, observer))
    }
}

impl<C: Channel, O: EdclObserver> EdclLink<C, O> {
    /// Wrap an already open channel.
    pub fn with_channel(channel: C, config: LinkConfig, observer: Arc<O>) -> Self {
        observer.on_event(&EdclEvent::Connected {
            device: channel.name().to_string(),
        });
        Self {
            channel,
            config,
            observer,
            sequence: 0,
        }
    }

    /// Close the link, releasing the channel.
    pub fn disconnect(self) {
        debug!(device = %self.channel.name(), "Disconnecting");
    }

    pub(crate) fn emit(&self, event: EdclEvent) {
        self.observer.on_event(&event);
    }

    /// Start a new operation; sequence numbers restart at 0.
    pub(crate) fn begin_operation(&mut self) {
        self.sequence = 0;
    }

    /// Write `words` starting at `address` as one operation.
    pub fn write_words(&mut self, address: u32, words: &[u32]) -> Result<TransferReport> {
        self.begin_operation();
        self.write_session(address, words, None)
    }

    /// Read `size` bytes starting at `address` as one operation.
    pub fn read_words(&mut self, address: u32, size: usize) -> Result<Vec<u32>> {
        self.begin_operation();
        let mut words = Vec::with_capacity(size / 4);
        self.read_session(address, size, None, |_, chunk| {
            words.extend_from_slice(chunk);
            Ok(())
        })?;
        Ok(words)
    }

    /// Chunked write session over words already in memory.
    pub(crate) fn write_session(
        &mut self,
        address: u32,
        words: &[u32],
        progress: Option<Operation>,
    ) -> Result<TransferReport> {
        let mut offset = 0;
        self.write_session_with(address, words.len() * 4, progress, |chunk| {
            chunk.copy_from_slice(&words[offset..offset + chunk.len()]);
            offset += chunk.len();
            Ok(())
        })
    }

    /// Chunked write session of `total` bytes. `fill` supplies the words of
    /// each chunk once, before its first send. Continues the current
    /// operation's sequence.
    #[instrument(skip(self, fill), fields(address = %format!("{:08X}", address), bytes = total))]
    pub(crate) fn write_session_with<F>(
        &mut self,
        address: u32,
        total: usize,
        progress: Option<Operation>,
        mut fill: F,
    ) -> Result<TransferReport>
    where
        F: FnMut(&mut [u32]) -> Result<()>,
    {
        check_size(total as u64)?;

        let mut buf = [0u32; NWORD_MAX_SND];
        let mut session = TransferSession::new(address, total, MAX_SND_SZ, self.sequence);
        while !session.is_done() {
            let chunk = session.next_chunk_len();
            let words = &mut buf[..chunk / 4];
            fill(words)?;
            let request = Request::write(session.cursor, words)?.with_sequence(session.sequence);

            self.exchange(&request, &mut session)?;
            session.advance(chunk);
            self.report_progress(progress, &session);
        }

        self.sequence = session.sequence;
        debug!(chunks = session.report().chunks, "Write session complete");
        Ok(session.report())
    }

    /// Chunked read session. Each acknowledged chunk is handed to `sink`
    /// with its start address.
    #[instrument(skip(self, sink), fields(address = %format!("{:08X}", address), bytes = size))]
    pub(crate) fn read_session<F>(
        &mut self,
        address: u32,
        size: usize,
        progress: Option<Operation>,
        mut sink: F,
    ) -> Result<TransferReport>
    where
        F: FnMut(u32, &[u32]) -> Result<()>,
    {
        check_size(size as u64)?;

        let mut session = TransferSession::new(address, size, MAX_RCV_SZ, self.sequence);
        while !session.is_done() {
            let chunk = session.next_chunk_len();
            let request = Request::read(session.cursor, chunk)?.with_sequence(session.sequence);

            let reply = self.exchange(&request, &mut session)?;
            sink(session.cursor, &reply.data[..chunk / 4])?;
            session.advance(chunk);
            self.report_progress(progress, &session);
        }

        self.sequence = session.sequence;
        debug!(chunks = session.report().chunks, "Read session complete");
        Ok(session.report())
    }

    fn report_progress(&self, progress: Option<Operation>, session: &TransferSession) {
        if let Some(operation) = progress {
            self.emit(EdclEvent::Progress {
                operation,
                current: session.transferred() as u64,
                total: session.total as u64,
            });
        }
    }

    /// Send one request until the target acknowledges it.
    ///
    /// A NACK, a non-matching reply or silence all cause a resend of the
    /// same chunk. After a NACK the resend carries the sequence the target
    /// echoed.
    fn exchange(&mut self, request: &Request, session: &mut TransferSession) -> Result<Reply> {
        let mut state = ExchangeState::Idle;
        let mut frame = request.encode();
        let max_attempts = self.config.attempts();

        loop {
            let attempt = session.record_attempt();
            self.send_frame(&frame)?;
            state.goto(ExchangeState::AwaitingReply);
            self.emit(EdclEvent::ChunkSent {
                sequence: request.sequence,
                address: request.address(),
                bytes: request.length(),
                attempt,
            });

            match self.await_reply()? {
                Some(reply) if !reply.nack && reply_matches(request, &reply) => {
                    state.goto(ExchangeState::Acked);
                    self.emit(EdclEvent::ChunkAcked {
                        sequence: request.sequence,
                        address: request.address(),
                        bytes: request.length(),
                    });
                    return Ok(reply);
                }
                Some(reply) if reply.nack => {
                    self.emit(EdclEvent::Nack {
                        address: request.address(),
                        echoed_sequence: reply.sequence,
                    });
                    frame = request.encode_with_sequence(reply.sequence);
                }
                Some(reply) => {
                    warn!(
                        expected = %format!("{:08X}", request.address()),
                        reply = ?reply,
                        "Reply does not match request"
                    );
                }
                None => {
                    self.emit(EdclEvent::ReplyTimeout {
                        address: request.address(),
                        attempt,
                    });
                }
            }
            state.goto(ExchangeState::NackRetry);

            if attempt >= max_attempts {
                state.goto(ExchangeState::Failed);
                return Err(EdclError::ProtocolExhausted {
                    address: request.address(),
                    attempts: attempt,
                });
            }
        }
    }

    fn send_frame(&mut self, frame: &[u8]) -> Result<()> {
        let written = self.channel.send(frame)?;
        if written != frame.len() {
            return Err(crate::transport::TransportError::ShortWrite {
                written,
                expected: frame.len(),
            }
            .into());
        }
        self.emit(EdclEvent::Packet {
            direction: PacketDirection::Tx,
            length: frame.len(),
            data: frame.to_vec(),
        });
        Ok(())
    }

    /// Collect bytes until a full reply decodes. `None` on timeout or a
    /// malformed reply.
    fn await_reply(&mut self) -> Result<Option<Reply>> {
        let mut buf = [0u8; BUFSIZE_MAX_RCV];
        let mut filled = 0;

        while filled < buf.len() {
            let n = self.channel.receive(&mut buf[filled..])?;
            if n == 0 {
                if filled > 0 {
                    debug!(bytes = filled, "Partial reply discarded");
                }
                return Ok(None);
            }
            filled += n;

            match Reply::decode(&buf[..filled]) {
                Ok(reply) => {
                    let length = reply.msglen();
                    if filled > length {
                        debug!(bytes = filled - length, "Trailing bytes after reply dropped");
                    }
                    self.emit(EdclEvent::Packet {
                        direction: PacketDirection::Rx,
                        length,
                        data: buf[..length].to_vec(),
                    });
                    return Ok(Some(reply));
                }
                Err(FrameError::Incomplete { .. }) => continue,
                Err(e) => {
                    warn!(error = %e, "Malformed reply");
                    return Ok(None);
                }
            }
        }
        Ok(None)
    }
}

fn reply_matches(request: &Request, reply: &Reply) -> bool {
    reply.address == request.address()
        && (request.is_write() || reply.data.len() >= request.word_count())
}

pub(crate) fn check_size(size: u64) -> Result<()> {
    if size == 0 || size % 4 != 0 || size > u32::MAX as u64 {
        return Err(EdclError::InvalidSize { size });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullObserver;
    use crate::transport::{Fault, MockTransport};

    fn link(mock: &MockTransport) -> EdclLink<MockTransport, NullObserver> {
        EdclLink::with_channel(mock.clone(), LinkConfig::default(), Arc::new(NullObserver))
    }

    /// Records every event for later inspection.
    #[derive(Default)]
    struct EventLog(std::sync::Mutex<Vec<EdclEvent>>);

    impl EdclObserver for EventLog {
        fn on_event(&self, event: &EdclEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    fn logged_link(mock: &MockTransport) -> (EdclLink<MockTransport, EventLog>, Arc<EventLog>) {
        let log = Arc::new(EventLog::default());
        let link = EdclLink::with_channel(mock.clone(), LinkConfig::default(), log.clone());
        (link, log)
    }

    #[test]
    fn test_260_bytes_is_two_chunks() {
        let mock = MockTransport::with_target();
        let words: Vec<u32> = (0..65).collect();

        let report = link(&mock).write_words(0x4000_0000, &words).unwrap();

        let requests = mock.get_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].address(), 0x4000_0000);
        assert_eq!(requests[0].length(), 256);
        assert_eq!(requests[1].address(), 0x4000_0100);
        assert_eq!(requests[1].length(), 4);
        assert_eq!(requests[1].data(), &[64]);
        assert_eq!(report.end, 0x4000_0104);
        assert_eq!(report.bytes, 260);
    }

    #[test]
    fn test_chunking_completeness() {
        for words in [1usize, 22, 23, 24, 64, 65, 128, 300] {
            let mock = MockTransport::with_target();
            let data: Vec<u32> = (0..words as u32).collect();
            let mut link = link(&mock);

            let report = link.write_words(0x1000, &data).unwrap();
            let sent: usize = mock.get_requests().iter().map(|r| r.length()).sum();
            assert_eq!(sent, words * 4);
            assert_eq!(report.end, 0x1000 + (words * 4) as u32);

            mock.clear_writes();
            let read = link.read_words(0x1000, words * 4).unwrap();
            assert_eq!(read, data);
            let requests = mock.get_requests();
            assert!(requests.iter().all(|r| r.length() <= MAX_RCV_SZ));
            assert_eq!(requests.iter().map(|r| r.length()).sum::<usize>(), words * 4);
        }
    }

    #[test]
    fn test_sequence_monotonic_without_nacks() {
        let mock = MockTransport::with_target();
        let (mut link, log) = logged_link(&mock);

        let report = link.write_words(0, &[0u32; 64 * 3]).unwrap();
        assert_eq!(report.chunks, 3);
        assert_eq!(report.next_sequence, 3);
        assert_eq!(report.retries, 0);
        // New operation restarts at 0
        link.write_words(0x1000, &[1, 2]).unwrap();

        let events = log.0.lock().unwrap();
        let sent: Vec<(u32, u32)> = events
            .iter()
            .filter_map(|e| match e {
                EdclEvent::ChunkSent {
                    sequence, address, ..
                } => Some((*sequence, *address)),
                _ => None,
            })
            .collect();
        assert_eq!(sent, vec![(0, 0), (1, 0x100), (2, 0x200), (0, 0x1000)]);

        let acked: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                EdclEvent::ChunkAcked { sequence, .. } => Some(*sequence),
                _ => None,
            })
            .collect();
        assert_eq!(acked, vec![0, 1, 2, 0]);
    }

    #[test]
    fn test_always_nack_exhausts_after_ten_sends() {
        let mock = MockTransport::with_target();
        mock.set_always_nack(true);

        let err = link(&mock).write_words(0x4000_0000, &[1, 2]).unwrap_err();
        assert!(matches!(
            err,
            EdclError::ProtocolExhausted {
                address: 0x4000_0000,
                attempts: 10
            }
        ));

        let requests = mock.get_requests();
        assert_eq!(requests.len(), 10);
        assert!(requests.iter().all(|r| r.data() == [1, 2]));
    }

    #[test]
    fn test_exhaustion_does_not_advance_cursor() {
        // First chunk is acknowledged, the second never is.
        let mock = MockTransport::new();
        mock.queue_reply(&Reply::ack(0, 0x100, vec![]));

        let words = vec![7u32; 65];
        let err = link(&mock).write_words(0x100, &words).unwrap_err();
        assert!(matches!(
            err,
            EdclError::ProtocolExhausted {
                address: 0x200,
                attempts: 10
            }
        ));

        let requests = mock.get_requests();
        assert_eq!(requests.len(), 11);
        assert!(requests[1..].iter().all(|r| r.address() == 0x200 && r.length() == 4));
    }

    #[test]
    fn test_resend_after_nack_is_identical_except_sequence() {
        let mock = MockTransport::with_target();
        let mut link = link(&mock);
        // Advance the target's sequence so the echo is non-zero
        link.write_words(0x2000, &[0xAA]).unwrap();
        link.write_words(0x2000, &[0xBB]).unwrap();
        mock.clear_writes();

        mock.inject(Fault::Nack);
        link.write_words(0x4000_0000, &[0xDEAD_BEEF]).unwrap();

        let writes = mock.get_writes();
        assert_eq!(writes.len(), 2);
        let (first, resend) = (&writes[0], &writes[1]);
        assert_eq!(first.len(), resend.len());
        // target expected sequence 2 -> marker 0x0008 in bytes 2..=3
        assert_eq!(resend[2], first[2]);
        assert_eq!(resend[3], first[3] | 0x08);
        assert_eq!(&first[4..], &resend[4..]);
        assert_eq!(&first[..2], &resend[..2]);
        assert_eq!(mock.peek(0x4000_0000), Some(0xDEAD_BEEF));
    }

    #[test]
    fn test_timeout_then_ack() {
        let mock = MockTransport::with_target();
        mock.inject(Fault::Drop);
        mock.inject(Fault::Drop);

        let report = link(&mock).write_words(0x10, &[5]).unwrap();
        assert_eq!(report.retries, 2);
        assert_eq!(mock.get_writes().len(), 3);
        // timeouts resend the plain frame
        let writes = mock.get_writes();
        assert!(writes.iter().all(|w| *w == writes[0]));
        assert_eq!(mock.peek(0x10), Some(5));
    }

    #[test]
    fn test_mismatched_reply_is_retried() {
        let mock = MockTransport::new();
        mock.queue_reply(&Reply::ack(0, 0x9999, vec![]));
        mock.queue_reply(&Reply::ack(0, 0x40, vec![]));

        let report = link(&mock).write_words(0x40, &[1]).unwrap();
        assert_eq!(report.retries, 1);
    }

    #[test]
    fn test_short_read_reply_is_retried() {
        let mock = MockTransport::new();
        mock.queue_reply(&Reply::ack(0, 0x40, vec![1]));
        mock.queue_reply(&Reply::ack(0, 0x40, vec![1, 2]));

        let words = link(&mock).read_words(0x40, 8).unwrap();
        assert_eq!(words, vec![1, 2]);
    }

    #[test]
    fn test_reply_split_across_reads() {
        let mock = MockTransport::new();
        let bytes = Reply::ack(0, 0x80, vec![0x1234_5678]).encode();
        mock.queue_bytes(&bytes[..3]);
        mock.queue_bytes(&bytes[3..11]);
        mock.queue_bytes(&bytes[11..]);

        assert_eq!(link(&mock).read_words(0x80, 4).unwrap(), vec![0x1234_5678]);
    }

    #[test]
    fn test_trailing_bytes_after_reply_are_dropped() {
        let mock = MockTransport::new();
        let reply = Reply::ack(0, 0x80, vec![0xCAFE_F00D]);
        let mut bytes = reply.encode();
        bytes.extend_from_slice(&[0xEE; 6]);
        mock.queue_bytes(&bytes);

        let (mut link, log) = logged_link(&mock);
        assert_eq!(link.read_words(0x80, 4).unwrap(), vec![0xCAFE_F00D]);

        let events = log.0.lock().unwrap();
        let rx: Vec<&Vec<u8>> = events
            .iter()
            .filter_map(|e| match e {
                EdclEvent::Packet {
                    direction: PacketDirection::Rx,
                    length,
                    data,
                } => {
                    assert_eq!(*length, reply.msglen());
                    Some(data)
                }
                _ => None,
            })
            .collect();
        assert_eq!(rx, vec![&reply.encode()]);
    }

    #[test]
    fn test_invalid_sizes() {
        let mock = MockTransport::with_target();
        let mut link = link(&mock);
        assert!(matches!(
            link.read_words(0, 0),
            Err(EdclError::InvalidSize { size: 0 })
        ));
        assert!(matches!(
            link.read_words(0, 6),
            Err(EdclError::InvalidSize { size: 6 })
        ));
        assert!(matches!(
            link.write_words(0, &[]),
            Err(EdclError::InvalidSize { size: 0 })
        ));
        assert!(mock.get_writes().is_empty());
    }

    #[test]
    fn test_config_defaults_and_reset_floor() {
        let config = LinkConfig::default();
        assert_eq!(config.device, "/dev/ttyUSB0");
        assert_eq!(config.max_attempts, 10);
        assert_eq!(config.read_timeout(), Duration::from_millis(100));

        let short = LinkConfig {
            reset_delay_ms: 10,
            ..LinkConfig::default()
        };
        assert_eq!(short.reset_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let path = std::env::temp_dir().join(format!("edcl-config-{}.toml", std::process::id()));
        let config = LinkConfig {
            device: "/dev/ttyUSB3".into(),
            baud_rate: 115_200,
            ..LinkConfig::default()
        };
        config.save_to_file(&path).unwrap();
        let loaded = LinkConfig::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.device, "/dev/ttyUSB3");
        assert_eq!(loaded.baud_rate, 115_200);
        assert_eq!(loaded.max_attempts, config.max_attempts);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: LinkConfig = toml::from_str("device = \"/dev/ttyS1\"").unwrap();
        assert_eq!(config.device, "/dev/ttyS1");
        assert_eq!(config.baud_rate, DEFAULT_BAUD_RATE);
    }
}

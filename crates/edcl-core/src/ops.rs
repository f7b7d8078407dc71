//! High-level debug operations built on EDCL sessions.
//!
//! Every operation runs to completion or returns the first fatal error.
//! Chunks acknowledged before a failure stay written on the target.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::thread;

use tracing::{debug, info, instrument};

use crate::error::Result;
use crate::events::{EdclEvent, EdclObserver, Operation};
use crate::image::{
    group_words, parse_text_image, read_le_words, words_to_le_bytes, write_text_words,
};
use crate::protocol::constants::{BUFSIZE_MAX_RCV, RESET_PULSE_VALUE};
use crate::session::{EdclLink, check_size};
use crate::state::TransferReport;
use crate::transport::Channel;

impl<C: Channel, O: EdclObserver> EdclLink<C, O> {
    /// Load a text memory image. Returns the number of words written.
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub fn load_memory_text<P: AsRef<Path>>(&mut self, path: P) -> Result<usize> {
        let file = File::open(path.as_ref())?;
        let entries = parse_text_image(BufReader::new(file))?;
        let groups = group_words(&entries);

        self.begin_operation();
        for group in &groups {
            self.write_session(group.address, &group.words, None)?;
        }

        info!(words = entries.len(), groups = groups.len(), "Memory image loaded");
        self.emit(EdclEvent::Complete {
            operation: Operation::LoadText,
        });
        Ok(entries.len())
    }

    /// Dump `size` bytes at `address` as a text memory image.
    #[instrument(skip(self, path), fields(address = %format!("{:08X}", address), path = %path.as_ref().display()))]
    pub fn dump_memory_text<P: AsRef<Path>>(
        &mut self,
        address: u32,
        size: u32,
        path: P,
    ) -> Result<TransferReport> {
        check_size(size as u64)?;
        let mut out = BufWriter::new(File::create(path.as_ref())?);

        self.begin_operation();
        let report = self.read_session(address, size as usize, None, |chunk_addr, words| {
            write_text_words(&mut out, chunk_addr, words)
        })?;
        out.flush()?;

        self.emit(EdclEvent::Complete {
            operation: Operation::DumpText,
        });
        Ok(report)
    }

    /// Load a binary image of little-endian words at `address`, one
    /// chunk at a time.
    #[instrument(skip(self, path), fields(address = %format!("{:08X}", address), path = %path.as_ref().display()))]
    pub fn load_memory_binary<P: AsRef<Path>>(
        &mut self,
        address: u32,
        path: P,
    ) -> Result<TransferReport> {
        let file = File::open(path.as_ref())?;
        let size = file.metadata()?.len();
        info!(size, "File size: {} bytes", size);
        let padded = size.div_ceil(4) * 4;
        check_size(padded)?;

        let mut reader = BufReader::new(file);
        self.begin_operation();
        let report = self.write_session_with(
            address,
            padded as usize,
            Some(Operation::LoadBinary),
            |words| read_le_words(&mut reader, words).map(|_| ()),
        )?;

        debug!("Loaded {} Bytes at {:08x}", size, address);
        self.emit(EdclEvent::Complete {
            operation: Operation::LoadBinary,
        });
        Ok(report)
    }

    /// Dump `size` bytes at `address` to a binary file.
    #[instrument(skip(self, path), fields(address = %format!("{:08X}", address), path = %path.as_ref().display()))]
    pub fn dump_memory_binary<P: AsRef<Path>>(
        &mut self,
        address: u32,
        size: u32,
        path: P,
    ) -> Result<TransferReport> {
        check_size(size as u64)?;
        let mut out = BufWriter::new(File::create(path.as_ref())?);

        self.begin_operation();
        let report = self.read_session(
            address,
            size as usize,
            Some(Operation::DumpBinary),
            |_, words| {
                out.write_all(&words_to_le_bytes(words))?;
                Ok(())
            },
        )?;
        out.flush()?;

        debug!("Dumped {} Bytes starting at {:08x}", size, address);
        self.emit(EdclEvent::Complete {
            operation: Operation::DumpBinary,
        });
        Ok(report)
    }

    /// Write a single word.
    pub fn set_word(&mut self, address: u32, value: u32) -> Result<()> {
        self.begin_operation();
        self.write_session(address, &[value], None)?;
        debug!("Write {:08x} at {:08x}", value, address);
        self.emit(EdclEvent::Complete {
            operation: Operation::SetWord,
        });
        Ok(())
    }

    /// Read a single word.
    pub fn get_word(&mut self, address: u32) -> Result<u32> {
        self.begin_operation();
        let mut value = 0;
        self.read_session(address, 4, None, |_, words| {
            value = words[0];
            Ok(())
        })?;
        debug!("Read {:08x} at {:08x}", value, address);
        self.emit(EdclEvent::Complete {
            operation: Operation::GetWord,
        });
        Ok(value)
    }

    /// Pulse the reset register twice; the target needs both.
    #[instrument(skip(self), fields(address = %format!("{:08X}", address)))]
    pub fn reset_target(&mut self, address: u32) -> Result<()> {
        let delay = self.config.reset_delay();
        for _ in 0..2 {
            self.begin_operation();
            self.write_session(address, &[RESET_PULSE_VALUE], None)?;
            thread::sleep(delay);
        }
        debug!("Reset ESP processor cores");
        self.emit(EdclEvent::Complete {
            operation: Operation::Reset,
        });
        Ok(())
    }

    /// Block until the target sends anything and return those bytes.
    pub fn listen(&mut self) -> Result<Vec<u8>> {
        let mut buf = [0u8; BUFSIZE_MAX_RCV];
        loop {
            let n = self.channel.receive(&mut buf)?;
            if n > 0 {
                self.emit(EdclEvent::Complete {
                    operation: Operation::Listen,
                });
                return Ok(buf[..n].to_vec());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::events::NullObserver;
    use crate::protocol::Reply;
    use crate::session::LinkConfig;
    use crate::transport::MockTransport;

    fn link(mock: &MockTransport) -> EdclLink<MockTransport, NullObserver> {
        EdclLink::with_channel(mock.clone(), LinkConfig::default(), Arc::new(NullObserver))
    }

    #[test]
    fn test_get_word_single_read() {
        let mock = MockTransport::new();
        mock.queue_reply(&Reply::ack(0, 0x8000_0010, vec![0x1234_ABCD]));

        let value = link(&mock).get_word(0x8000_0010).unwrap();
        assert_eq!(value, 0x1234_ABCD);

        let requests = mock.get_requests();
        assert_eq!(requests.len(), 1);
        assert!(!requests[0].is_write());
        assert_eq!(requests[0].length(), 4);
        assert_eq!(requests[0].address(), 0x8000_0010);
    }

    #[test]
    fn test_set_word() {
        let mock = MockTransport::with_target();
        link(&mock).set_word(0x6000_0400, 0xFEED).unwrap();
        assert_eq!(mock.peek(0x6000_0400), Some(0xFEED));
    }

    #[test]
    fn test_reset_sends_two_pulses() {
        let mock = MockTransport::with_target();
        link(&mock).reset_target(0x8000_0000).unwrap();

        let requests = mock.get_requests();
        assert_eq!(requests.len(), 2);
        for req in &requests {
            assert!(req.is_write());
            assert_eq!(req.address(), 0x8000_0000);
            assert_eq!(req.data(), &[0x1]);
        }
        let times = mock.get_write_times();
        assert!(times[1].duration_since(times[0]) >= Duration::from_millis(500));
    }

    #[test]
    fn test_listen_returns_first_bytes() {
        let mock = MockTransport::new();
        mock.queue_bytes(b"boot ok");
        assert_eq!(link(&mock).listen().unwrap(), b"boot ok");
        assert!(mock.get_writes().is_empty());
    }
}

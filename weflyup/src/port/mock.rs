//! Scripted port for unit tests.
//!
//! Every write pops the next scripted reply and makes it readable; `None`
//! stands for a device that stays silent. A late reply shows up a fixed
//! time after a given write, outside any scripted window.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::port::Port;

/// Mock serial port with separate read/write buffers.
#[derive(Default)]
pub(crate) struct MockSerial {
    replies: VecDeque<Option<Vec<u8>>>,
    read_buf: VecDeque<u8>,
    /// Every write, one entry per `write` call.
    pub(crate) writes: Vec<Vec<u8>>,
    /// Number of input-buffer discards.
    pub(crate) input_clears: usize,
    timeout: Duration,
    late: Option<LateReply>,
}

/// Reply released `delay` after write number `after_write` (1-based).
struct LateReply {
    after_write: usize,
    delay: Duration,
    text: Vec<u8>,
    armed_at: Option<Instant>,
}

impl MockSerial {
    pub(crate) fn new() -> Self {
        Self {
            timeout: Duration::from_millis(1000),
            ..Self::default()
        }
    }

    /// Queue a textual reply to the next unanswered write.
    pub(crate) fn reply(mut self, text: &str) -> Self {
        self.replies
            .push_back(Some(text.as_bytes().to_vec()));
        self
    }

    /// Queue silence for the next unanswered write.
    pub(crate) fn silent(mut self) -> Self {
        self.replies.push_back(None);
        self
    }

    /// Release `text` once `delay` has passed since write number `after_write`.
    pub(crate) fn late_reply(mut self, after_write: usize, delay: Duration, text: &str) -> Self {
        self.late = Some(LateReply {
            after_write,
            delay,
            text: text.as_bytes().to_vec(),
            armed_at: None,
        });
        self
    }

    /// Make bytes readable right away, as if they arrived unprompted.
    pub(crate) fn preload(mut self, text: &str) -> Self {
        self.read_buf.extend(text.bytes());
        self
    }

    /// Writes rendered as text.
    pub(crate) fn written_text(&self) -> Vec<String> {
        self.writes
            .iter()
            .map(|w| String::from_utf8_lossy(w).into_owned())
            .collect()
    }
}

impl Read for MockSerial {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.read_buf.is_empty() {
            return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(self.read_buf.len());
        for (slot, byte) in buf.iter_mut().zip(self.read_buf.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockSerial {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.writes.push(buf.to_vec());
        if let Some(late) = self.late.as_mut() {
            if late.after_write == self.writes.len() {
                late.armed_at = Some(Instant::now());
            }
        }
        if let Some(Some(reply)) = self.replies.pop_front() {
            self.read_buf.extend(reply);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Port for MockSerial {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_baud_rate(&mut self, _baud_rate: u32) -> Result<()> {
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        super::DEFAULT_BAUD
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.read_buf.clear();
        Ok(())
    }

    fn clear_input(&mut self) -> Result<()> {
        self.input_clears += 1;
        self.read_buf.clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn set_dtr(&mut self, _level: bool) -> Result<()> {
        Ok(())
    }

    fn set_rts(&mut self, _level: bool) -> Result<()> {
        Ok(())
    }

    fn read_available(&mut self) -> Result<Vec<u8>> {
        let due = self.late.as_ref().is_some_and(|late| {
            late.armed_at
                .is_some_and(|at| at.elapsed() >= late.delay)
        });
        if due {
            if let Some(late) = self.late.take() {
                self.read_buf.extend(late.text);
            }
        }
        Ok(self.read_buf.drain(..).collect())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

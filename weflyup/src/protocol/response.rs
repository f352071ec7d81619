//! Reading and classifying device responses.
//!
//! Responses are short ASCII lines with no framing, so the end of a
//! response is inferred: a known marker, a quiet line after some text, or
//! the timeout.

use {
    crate::{error::Result, port::Port, protocol::TimingConfig},
    log::trace,
    std::{
        fmt, thread,
        time::{Duration, Instant},
    },
};

/// Substrings that mark a complete response (lowercase).
pub const MARKERS: [&str; 6] = [
    "received", "start ok", "stop ok", "tx_ver", "rx_ver", "error",
];

/// Device reply to one transmitted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum TransferOutcome {
    /// Frame accepted.
    Acknowledged,
    /// Device reported a checksum mismatch.
    ChecksumRejected,
    /// Text arrived but was not recognised.
    Garbled,
    /// Nothing arrived in time.
    TimedOut,
}

impl fmt::Display for TransferOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Acknowledged => f.write_str("acknowledged"),
            Self::ChecksumRejected => f.write_str("checksum rejected"),
            Self::Garbled => f.write_str("unrecognised response"),
            Self::TimedOut => f.write_str("no response"),
        }
    }
}

/// Classify the response to a frame.
///
/// The firmware misspells its checksum error as `cheksum error`; both
/// spellings are accepted.
pub fn classify_ack(response: &str) -> TransferOutcome {
    let text = response.to_ascii_lowercase();
    if text.contains("received") {
        TransferOutcome::Acknowledged
    } else if text.contains("cheksum error") || text.contains("checksum error") {
        TransferOutcome::ChecksumRejected
    } else if text.trim().is_empty() {
        TransferOutcome::TimedOut
    } else {
        TransferOutcome::Garbled
    }
}

fn contains_marker(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    MARKERS
        .iter()
        .any(|m| lower.contains(m))
}

/// Accumulates one response from a port.
pub struct ResponseReader<'a, P: Port> {
    port: &'a mut P,
    timing: &'a TimingConfig,
}

impl<'a, P: Port> ResponseReader<'a, P> {
    /// Create a reader over `port`.
    pub fn new(port: &'a mut P, timing: &'a TimingConfig) -> Self {
        Self { port, timing }
    }

    /// Read until a marker shows up, the line goes quiet, or `timeout` passes.
    ///
    /// Returns whatever was received, possibly nothing.
    pub fn read_within(&mut self, timeout: Duration) -> Result<String> {
        let deadline = Instant::now() + timeout;
        let mut text = String::new();
        let mut idle_polls = 0u32;

        while Instant::now() < deadline {
            let chunk = self.port.read_available()?;

            if chunk.is_empty() {
                if !text.is_empty() {
                    idle_polls += 1;
                    if idle_polls > self.timing.max_idle_polls {
                        trace!("Response ended by quiet line: {text:?}");
                        break;
                    }
                }
            } else {
                idle_polls = 0;
                text.push_str(&String::from_utf8_lossy(&chunk));

                if contains_marker(&text) {
                    thread::sleep(self.timing.marker_grace);
                    let tail = self.port.read_available()?;
                    text.push_str(&String::from_utf8_lossy(&tail));
                    trace!("Response ended by marker: {text:?}");
                    break;
                }
            }

            thread::sleep(self.timing.poll_interval);
        }

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::MockSerial;

    #[test]
    fn test_classify_ack() {
        assert_eq!(classify_ack("received 00\r\n"), TransferOutcome::Acknowledged);
        assert_eq!(classify_ack("RECEIVED"), TransferOutcome::Acknowledged);
        assert_eq!(classify_ack("\r\nreceived"), TransferOutcome::Acknowledged);
        assert_eq!(classify_ack("cheksum error"), TransferOutcome::ChecksumRejected);
        assert_eq!(classify_ack("Checksum Error"), TransferOutcome::ChecksumRejected);
        assert_eq!(classify_ack(""), TransferOutcome::TimedOut);
        assert_eq!(classify_ack(" \r\n"), TransferOutcome::TimedOut);
        assert_eq!(classify_ack("len error"), TransferOutcome::Garbled);
    }

    #[test]
    fn test_read_returns_on_marker() {
        let timing = TimingConfig {
            command_timeout: Duration::from_secs(2),
            ..TimingConfig::fast()
        };
        let mut port = MockSerial::new().preload("stop ok\r\n");

        let started = Instant::now();
        let text = ResponseReader::new(&mut port, &timing)
            .read_within(timing.command_timeout)
            .unwrap();

        assert_eq!(text, "stop ok\r\n");
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_read_returns_after_quiet_line() {
        let timing = TimingConfig::fast();
        let mut port = MockSerial::new().preload("hello");

        let started = Instant::now();
        let text = ResponseReader::new(&mut port, &timing)
            .read_within(Duration::from_secs(2))
            .unwrap();

        assert_eq!(text, "hello");
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_read_times_out_empty() {
        let timing = TimingConfig::fast();
        let mut port = MockSerial::new();

        let started = Instant::now();
        let text = ResponseReader::new(&mut port, &timing)
            .read_within(Duration::from_millis(15))
            .unwrap();

        assert!(text.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn test_marker_match_is_case_insensitive() {
        assert!(contains_marker("TX_VER_01_02"));
        assert!(contains_marker("Start OK"));
        assert!(!contains_marker("ready"));
    }
}

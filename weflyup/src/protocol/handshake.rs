//! Device identification and update bracketing.
//!
//! Devices in the field disagree on which line ending terminates a command,
//! so every command is tried with each ending in [`LINE_ENDINGS`] until the
//! device answers.

use {
    crate::{
        error::{Error, Result},
        port::Port,
        protocol::{ResponseReader, TimingConfig},
    },
    log::{debug, info, trace},
    std::{fmt, thread},
};

/// Version query command.
pub const VERSION_COMMAND: &str = "?version";

/// Command entering update mode.
pub const START_COMMAND: &str = "$update start";

/// Command leaving update mode.
pub const STOP_COMMAND: &str = "$update stop";

/// Line endings tried in order.
pub const LINE_ENDINGS: [&str; 4] = ["\n", "\r\n", "\r", ""];

/// Longest version string kept when the reply has no `NN?NN` pattern.
const MAX_RAW_VERSION_LEN: usize = 8;

/// Kind of device on the other end of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum DeviceKind {
    /// Transmitter (`tx_ver` reply).
    Transmitter,
    /// Receiver (`rx_ver` reply).
    Receiver,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transmitter => f.write_str("Transmitter"),
            Self::Receiver => f.write_str("Receiver"),
        }
    }
}

/// Identity of a connected device.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DeviceSession {
    /// Transmitter or receiver.
    pub kind: DeviceKind,
    /// Firmware version, normally `XX_YY`.
    pub version: String,
    /// Reply the version was parsed from.
    pub raw_response: String,
}

/// Extract the device kind and version from a version reply.
///
/// `tx_ver` takes precedence over `rx_ver`. Matching is case-insensitive.
pub fn parse_version(text: &str) -> Option<(DeviceKind, String)> {
    let text = text.trim();
    let lower = text.to_ascii_lowercase();

    let (kind, pos) = if let Some(pos) = lower.find("tx_ver") {
        (DeviceKind::Transmitter, pos)
    } else if let Some(pos) = lower.find("rx_ver") {
        (DeviceKind::Receiver, pos)
    } else {
        return None;
    };

    // Both prefixes are ASCII, so the byte offset is a char boundary in `text`.
    let rest = &text[pos + "tx_ver".len()..];
    Some((kind, version_suffix(rest)))
}

/// Format `NN?NN` as `NN_NN`, or fall back to the first characters of `rest`.
fn version_suffix(rest: &str) -> String {
    let chars: Vec<char> = rest.chars().collect();
    let digit = |i: usize| {
        chars
            .get(i)
            .is_some_and(char::is_ascii_digit)
    };

    for i in 0..chars.len() {
        if !(digit(i) && digit(i + 1)) {
            continue;
        }
        let minor_at = if digit(i + 2) && digit(i + 3) {
            i + 2
        } else if i + 2 < chars.len() && !digit(i + 2) && digit(i + 3) && digit(i + 4) {
            i + 3
        } else {
            continue;
        };
        let major: String = chars[i..i + 2].iter().collect();
        let minor: String = chars[minor_at..minor_at + 2].iter().collect();
        return format!("{major}_{minor}");
    }

    rest.trim()
        .chars()
        .take(MAX_RAW_VERSION_LEN)
        .collect()
}

/// Command exchange with a device.
pub struct Handshake<'a, P: Port> {
    port: &'a mut P,
    timing: &'a TimingConfig,
}

impl<'a, P: Port> Handshake<'a, P> {
    /// Create a handshake over `port`.
    pub fn new(port: &'a mut P, timing: &'a TimingConfig) -> Self {
        Self { port, timing }
    }

    fn read(&mut self, timeout: std::time::Duration) -> Result<String> {
        ResponseReader::new(self.port, self.timing).read_within(timeout)
    }

    /// Identify the device with `?version`.
    pub fn probe_version(&mut self) -> Result<DeviceSession> {
        let mut transcript = String::new();

        for (attempt, ending) in LINE_ENDINGS.iter().enumerate() {
            self.port.clear_input()?;
            self.port
                .write_all_bytes(format!("{VERSION_COMMAND}{ending}").as_bytes())?;

            let response = self.read(self.timing.command_timeout)?;
            trace!("Version probe {} ({ending:?}): {response:?}", attempt + 1);
            transcript.push_str(&response);
            transcript.push('\n');

            if let Some((kind, version)) = parse_version(&response) {
                info!("Detected {kind} firmware {version}");
                return Ok(DeviceSession {
                    kind,
                    version,
                    raw_response: response,
                });
            }

            thread::sleep(self.timing.version_probe_delay);
        }

        let late = self.read(self.timing.final_read_timeout)?;
        transcript.push_str(&late);

        match parse_version(&transcript) {
            Some((kind, version)) => {
                info!("Detected {kind} firmware {version} from late reply");
                Ok(DeviceSession {
                    kind,
                    version,
                    raw_response: transcript,
                })
            },
            None => Err(Error::HandshakeFailed(format!(
                "no version reply, received {:?}",
                transcript.trim()
            ))),
        }
    }

    /// Send `command` with each line ending until something non-blank comes back.
    ///
    /// Pending input is kept, so a confirmation that arrives after one
    /// attempt's window still counts for the next. Returns every response
    /// received, one per line.
    pub fn send_command_multi_endings(&mut self, command: &str) -> Result<String> {
        let mut transcript = String::new();

        for ending in LINE_ENDINGS {
            self.port
                .write_all_bytes(format!("{command}{ending}").as_bytes())?;

            let response = self.read(self.timing.command_timeout)?;
            transcript.push_str(&response);
            transcript.push('\n');

            if !response.trim().is_empty() {
                debug!("{command} ({ending:?}) answered {:?}", response.trim());
                break;
            }

            thread::sleep(self.timing.command_probe_delay);
        }

        Ok(transcript)
    }

    /// Put the device into update mode.
    pub fn start(&mut self) -> Result<()> {
        self.bracket(START_COMMAND, "start ok")
    }

    /// Leave update mode.
    pub fn stop(&mut self) -> Result<()> {
        self.bracket(STOP_COMMAND, "stop ok")
    }

    fn bracket(&mut self, command: &str, expected: &str) -> Result<()> {
        let transcript = self.send_command_multi_endings(command)?;
        if transcript
            .to_ascii_lowercase()
            .contains(expected)
        {
            Ok(())
        } else {
            Err(Error::HandshakeFailed(format!(
                "`{command}` not confirmed, received {:?}",
                transcript.trim()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::MockSerial;
    use std::time::Duration;

    #[test]
    fn test_parse_version_transmitter() {
        assert_eq!(
            parse_version("tx_ver0102"),
            Some((DeviceKind::Transmitter, "01_02".into()))
        );
        assert_eq!(
            parse_version("  TX_VER_01_02\r\n"),
            Some((DeviceKind::Transmitter, "01_02".into()))
        );
    }

    #[test]
    fn test_parse_version_receiver() {
        assert_eq!(
            parse_version("rx_ver:v03.14"),
            Some((DeviceKind::Receiver, "03_14".into()))
        );
    }

    #[test]
    fn test_parse_version_prefers_transmitter() {
        let (kind, _) = parse_version("rx_ver 0101 tx_ver 0202").unwrap();
        assert_eq!(kind, DeviceKind::Transmitter);
    }

    #[test]
    fn test_parse_version_fallback_truncates() {
        assert_eq!(
            parse_version("rx_ver beta-build-7"),
            Some((DeviceKind::Receiver, "beta-bui".into()))
        );
        assert_eq!(
            parse_version("tx_ver"),
            Some((DeviceKind::Transmitter, String::new()))
        );
    }

    #[test]
    fn test_parse_version_skips_lone_digits() {
        // "1" is not a two-digit group; the first match starts at "12".
        assert_eq!(
            parse_version("tx_ver 1 12.34"),
            Some((DeviceKind::Transmitter, "12_34".into()))
        );
        // Three separators between groups do not match.
        assert_eq!(
            parse_version("tx_ver 12--34"),
            Some((DeviceKind::Transmitter, "12--34".into()))
        );
    }

    #[test]
    fn test_parse_version_none() {
        assert_eq!(parse_version("ok"), None);
        assert_eq!(parse_version(""), None);
    }

    #[test]
    fn test_probe_only_third_ending_answers() {
        let timing = TimingConfig::fast();
        let mut port = MockSerial::new()
            .silent()
            .silent()
            .reply("tx_ver0102");

        let session = Handshake::new(&mut port, &timing)
            .probe_version()
            .unwrap();

        assert_eq!(session.kind, DeviceKind::Transmitter);
        assert_eq!(session.version, "01_02");
        assert_eq!(
            port.written_text(),
            vec!["?version\n", "?version\r\n", "?version\r"]
        );
        assert_eq!(port.input_clears, 3);
    }

    #[test]
    fn test_probe_fails_without_reply() {
        let timing = TimingConfig::fast();
        let mut port = MockSerial::new();

        let err = Handshake::new(&mut port, &timing)
            .probe_version()
            .unwrap_err();

        assert!(matches!(err, Error::HandshakeFailed(_)));
        assert_eq!(port.writes.len(), 4);
        assert_eq!(port.written_text()[3], "?version");
    }

    #[test]
    fn test_version_reply_in_final_read() {
        // Silent through all four windows; the answer lands during the
        // extra accumulated read.
        let timing = TimingConfig {
            command_timeout: Duration::from_millis(30),
            version_probe_delay: Duration::from_millis(100),
            final_read_timeout: Duration::from_millis(80),
            ..TimingConfig::fast()
        };
        let mut port =
            MockSerial::new().late_reply(4, Duration::from_millis(65), "rx_ver 03.07\r\n");

        let session = Handshake::new(&mut port, &timing)
            .probe_version()
            .unwrap();

        assert_eq!(session.kind, DeviceKind::Receiver);
        assert_eq!(session.version, "03_07");
        assert!(session.raw_response.contains("rx_ver 03.07"));
        assert_eq!(port.writes.len(), 4);
    }

    #[test]
    fn test_probe_ignores_unrelated_reply() {
        let timing = TimingConfig::fast();
        let mut port = MockSerial::new()
            .reply("hello")
            .reply("rx_ver_02_07\r\n");

        let session = Handshake::new(&mut port, &timing)
            .probe_version()
            .unwrap();

        assert_eq!(session.kind, DeviceKind::Receiver);
        assert_eq!(session.version, "02_07");
        assert_eq!(session.raw_response, "rx_ver_02_07\r\n");
    }

    #[test]
    fn test_start_stops_at_first_reply() {
        let timing = TimingConfig::fast();
        let mut port = MockSerial::new()
            .silent()
            .reply("Start OK\r\n");

        Handshake::new(&mut port, &timing)
            .start()
            .unwrap();

        assert_eq!(
            port.written_text(),
            vec!["$update start\n", "$update start\r\n"]
        );
    }

    #[test]
    fn test_start_keeps_confirmation_that_arrives_late() {
        // "start ok" misses the first window and is read by the second attempt.
        let timing = TimingConfig {
            command_timeout: Duration::from_millis(30),
            command_probe_delay: Duration::from_millis(100),
            ..TimingConfig::fast()
        };
        let mut port =
            MockSerial::new().late_reply(1, Duration::from_millis(65), "start ok\r\n");

        Handshake::new(&mut port, &timing)
            .start()
            .unwrap();

        assert_eq!(port.writes.len(), 2);
        assert_eq!(port.input_clears, 0);
    }

    #[test]
    fn test_start_rejected_reports_reply() {
        let timing = TimingConfig::fast();
        let mut port = MockSerial::new().reply("busy");

        let err = Handshake::new(&mut port, &timing)
            .start()
            .unwrap_err();

        // A non-blank reply ends probing even though it is a rejection.
        assert_eq!(port.writes.len(), 1);
        match err {
            Error::HandshakeFailed(msg) => assert!(msg.contains("busy"), "{msg}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_stop_without_reply_fails() {
        let timing = TimingConfig::fast();
        let mut port = MockSerial::new();

        let err = Handshake::new(&mut port, &timing)
            .stop()
            .unwrap_err();

        assert!(matches!(err, Error::HandshakeFailed(_)));
        assert_eq!(port.written_text()[3], "$update stop");
    }
}

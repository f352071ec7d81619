//! Wire protocol spoken with Wefly devices.
//!
//! The link is half-duplex: every command or frame sent by the host is
//! answered by a short ASCII response before the next one goes out.
//!
//! - [`frame`]: binary firmware frames and their checksum
//! - [`response`]: response accumulation and acknowledgement classification
//! - [`handshake`]: version probe and `$update start` / `$update stop`

pub mod frame;
pub mod handshake;
pub mod response;

use std::time::Duration;

// Re-export common types
pub use frame::{FRAME_MARKER, Frame, MAX_PAYLOAD, Target};
pub use handshake::{DeviceKind, DeviceSession, parse_version};
pub use response::{ResponseReader, TransferOutcome, classify_ack};

/// Timing of the protocol.
///
/// The defaults are calibrated against real device behaviour; callers other
/// than tests should not change them.
#[derive(Debug, Clone)]
pub struct TimingConfig {
    /// Wait for the answer to a handshake or start/stop command.
    pub command_timeout: Duration,
    /// Wait for the acknowledgement of one frame.
    pub frame_timeout: Duration,
    /// Pause between two polls of the port.
    pub poll_interval: Duration,
    /// Extra wait after a recognised marker before the final read.
    pub marker_grace: Duration,
    /// Consecutive empty polls that end a non-empty response.
    pub max_idle_polls: u32,
    /// Pause between two version probes.
    pub version_probe_delay: Duration,
    /// Pause between two start/stop command attempts.
    pub command_probe_delay: Duration,
    /// Last accumulated read after all version probes failed.
    pub final_read_timeout: Duration,
    /// Sends of one frame before giving up.
    pub max_frame_attempts: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_millis(1000),
            frame_timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(2),
            marker_grace: Duration::from_millis(5),
            max_idle_polls: 10,
            version_probe_delay: Duration::from_millis(50),
            command_probe_delay: Duration::from_millis(25),
            final_read_timeout: Duration::from_millis(100),
            max_frame_attempts: 3,
        }
    }
}

#[cfg(test)]
impl TimingConfig {
    /// Short timings for unit tests.
    pub(crate) fn fast() -> Self {
        Self {
            command_timeout: Duration::from_millis(60),
            frame_timeout: Duration::from_millis(20),
            poll_interval: Duration::from_millis(1),
            marker_grace: Duration::from_millis(1),
            max_idle_polls: 3,
            version_probe_delay: Duration::from_millis(1),
            command_probe_delay: Duration::from_millis(1),
            final_read_timeout: Duration::from_millis(5),
            max_frame_attempts: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timing_matches_device_calibration() {
        let timing = TimingConfig::default();
        assert_eq!(timing.command_timeout, Duration::from_millis(1000));
        assert_eq!(timing.frame_timeout, Duration::from_millis(200));
        assert_eq!(timing.max_frame_attempts, 3);
        assert_eq!(timing.max_idle_polls, 10);
        assert!(timing.frame_timeout < timing.command_timeout);
    }
}

//! Error types for weflyup.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::protocol::frame::Target;
use crate::updater::UpdatePhase;

/// Result type for weflyup operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for weflyup operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The serial port is held by another process.
    #[error("Serial port {0} is busy or access was denied")]
    PortBusy(String),

    /// Record file could not be read.
    #[error("Cannot read record file {}: {source}", path.display())]
    RecordFile {
        /// Path of the file.
        path: PathBuf,
        /// Underlying I/O failure.
        source: io::Error,
    },

    /// Version probe or start/stop command was not answered as expected.
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// A frame payload is empty or longer than the length field allows.
    #[error("{target} frame #{sequence} has {len} payload bytes, expected 1 to 256")]
    InvalidFrame {
        /// Image the frame belongs to.
        target: Target,
        /// Sequence number of the frame.
        sequence: u16,
        /// Payload length.
        len: usize,
    },

    /// A frame was not acknowledged within the retry budget.
    #[error("{target} frame #{sequence} not acknowledged after {attempts} attempts")]
    ResponseTimeout {
        /// Image the frame belongs to.
        target: Target,
        /// Sequence number of the frame.
        sequence: u16,
        /// Number of attempts made.
        attempts: u32,
    },

    /// A step of the update failed.
    #[error("{phase} failed: {source}")]
    Phase {
        /// The failing phase.
        phase: UpdatePhase,
        /// What went wrong.
        #[source]
        source: Box<Error>,
    },

    /// The operation was cancelled by the caller.
    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// Attach the phase an error occurred in.
    ///
    /// Errors that already carry a phase are returned unchanged.
    #[must_use]
    pub fn in_phase(self, phase: UpdatePhase) -> Self {
        match self {
            Self::Phase { .. } => self,
            other => Self::Phase {
                phase,
                source: Box::new(other),
            },
        }
    }

    /// The phase this error was raised in, if known.
    pub fn phase(&self) -> Option<UpdatePhase> {
        match self {
            Self::Phase { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// Strip phase wrapping and return the underlying error.
    pub fn root(&self) -> &Self {
        match self {
            Self::Phase { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether the error was caused by an unanswered or unrecognised device.
    pub fn is_device_unresponsive(&self) -> bool {
        matches!(
            self.root(),
            Self::HandshakeFailed(_) | Self::ResponseTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_phase_wraps_once() {
        let err = Error::Cancelled
            .in_phase(UpdatePhase::Fpga)
            .in_phase(UpdatePhase::Mcu);
        assert_eq!(err.phase(), Some(UpdatePhase::Fpga));
        assert!(matches!(err.root(), Error::Cancelled));
    }

    #[test]
    fn test_phase_message_names_phase() {
        let err = Error::ResponseTimeout {
            target: Target::Mcu,
            sequence: 7,
            attempts: 3,
        }
        .in_phase(UpdatePhase::Mcu);
        let msg = err.to_string();
        assert!(msg.contains("MCU transfer"), "{msg}");
        assert!(msg.contains("#7"), "{msg}");
        assert!(err.is_device_unresponsive());
    }

    #[test]
    fn test_record_file_message_has_path() {
        let err = Error::RecordFile {
            path: PathBuf::from("/tmp/missing.mcs"),
            source: io::Error::new(io::ErrorKind::NotFound, "gone"),
        };
        assert!(err.to_string().contains("missing.mcs"));
        assert!(!err.is_device_unresponsive());
    }
}

//! # weflyup
//!
//! A library for updating the firmware of Wefly radio-link devices.
//!
//! A Wefly transmitter or receiver carries two images, an FPGA bitstream
//! (`.mcs`) and MCU firmware (`.hex`). This crate talks to the device over a
//! serial link and provides:
//!
//! - Intel-HEX style record parsing into transfer frames
//! - The binary frame format and its checksum
//! - Device identification (`?version`) and update bracketing
//! - Acknowledged, retried frame transfer with progress events
//! - A simulated device for testing without hardware
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via `serialport`
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use weflyup::Updater;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     #[cfg(feature = "native")]
//!     {
//!         let mut updater = Updater::open("/dev/ttyUSB0", 921600)?;
//!
//!         let session = updater.identify()?;
//!         println!("{} firmware {}", session.kind, session.version);
//!
//!         updater.update("radio.mcs", "radio.hex", &mut |event| {
//!             println!("{event:?}");
//!         })?;
//!         updater.close()?;
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cancel;
pub mod error;
pub mod image;
pub mod port;
pub mod protocol;
pub mod updater;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    cancel::CancelToken,
    error::{Error, Result},
    image::{ImageSummary, parse_record_file, parse_records, summarize},
    port::{Port, PortEnumerator, PortInfo, SerialConfig, SimulatedDevice, SimulatedPort},
    protocol::{
        DeviceKind, DeviceSession, Frame, Target, TimingConfig, TransferOutcome, parse_version,
    },
    updater::{UpdateEvent, UpdateHandle, UpdatePhase, Updater, spawn_update},
};

//! Port abstraction for the serial link to the device.
//!
//! The protocol layer only talks to the [`Port`] trait, so it runs unchanged
//! against real hardware or the in-memory device simulator.
//!
//! ```text
//! +------------------------------+
//! |  Updater / handshake / codec |
//! +--------------+---------------+
//!                |
//!                v
//! +--------------+---------------+
//! |          Port trait          |
//! +-------+--------------+-------+
//!         |              |
//!         v              v
//! +-------+------+ +-----+---------+
//! |  NativePort  | | SimulatedPort |
//! | (serialport) | |  (in-memory)  |
//! +--------------+ +---------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use weflyup::port::Port;
//!
//! fn example<P: Port>(port: &mut P) -> weflyup::Result<()> {
//!     port.write_all_bytes(b"?version\n")?;
//!     let reply = port.read_available()?;
//!     println!("Received: {:?}", String::from_utf8_lossy(&reply));
//!     Ok(())
//! }
//! ```

#[cfg(test)]
pub(crate) mod mock;
#[cfg(feature = "native")]
pub mod native;
pub mod sim;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Baud rate used by Wefly devices.
pub const DEFAULT_BAUD: u32 = 921600;

/// Serial port configuration.
///
/// Wefly links always run 8N1 without flow control, so only the name, speed
/// and timeout are configurable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read/write timeout.
    pub timeout: Duration,
}

impl SerialConfig {
    /// Configuration for `port_name` at `baud_rate` with a one second timeout.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            timeout: Duration::from_secs(1),
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Serial port information.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
}

/// USB vendor ID of the WCH CH340/CH341 bridge shipped with Wefly cables.
pub const CH34X_VID: u16 = 0x1A86;

impl PortInfo {
    /// Whether this port sits behind the USB-serial bridge used by Wefly cables.
    pub fn is_wefly_adapter(&self) -> bool {
        self.vid == Some(CH34X_VID)
    }
}

/// Byte-stream transport to a device.
pub trait Port: Read + Write + Send {
    /// Set the read/write timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the current timeout.
    fn timeout(&self) -> Duration;

    /// Set the baud rate.
    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()>;

    /// Get the current baud rate.
    fn baud_rate(&self) -> u32;

    /// Discard both input and output buffers.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Discard pending input only.
    fn clear_input(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Set DTR (Data Terminal Ready) pin state.
    fn set_dtr(&mut self, level: bool) -> Result<()>;

    /// Set RTS (Request To Send) pin state.
    fn set_rts(&mut self, level: bool) -> Result<()>;

    /// Return the bytes already received, without blocking.
    ///
    /// An empty vector means nothing has arrived yet.
    fn read_available(&mut self) -> Result<Vec<u8>>;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }
}

/// Forwarding impl so a port can be chosen at runtime.
impl<P: Port + ?Sized> Port for Box<P> {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        (**self).set_timeout(timeout)
    }

    fn timeout(&self) -> Duration {
        (**self).timeout()
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        (**self).set_baud_rate(baud_rate)
    }

    fn baud_rate(&self) -> u32 {
        (**self).baud_rate()
    }

    fn clear_buffers(&mut self) -> Result<()> {
        (**self).clear_buffers()
    }

    fn clear_input(&mut self) -> Result<()> {
        (**self).clear_input()
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        (**self).set_dtr(level)
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        (**self).set_rts(level)
    }

    fn read_available(&mut self) -> Result<Vec<u8>> {
        (**self).read_available()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Trait for listing available serial ports.
pub trait PortEnumerator {
    /// List all available serial ports.
    fn list_ports() -> Result<Vec<PortInfo>>;
}

#[cfg(feature = "native")]
pub use native::{NativePort, NativePortEnumerator};
pub use sim::{SimulatedDevice, SimulatedPort};

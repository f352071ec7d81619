//! Native serial port implementation using the `serialport` crate.

use {
    crate::{
        error::{Error, Result},
        port::{Port, PortEnumerator, PortInfo, SerialConfig},
    },
    log::{debug, trace, warn},
    serialport::ClearBuffer,
    std::{
        io::{Read, Write},
        thread,
        time::Duration,
    },
};

/// Attempts made to open a port that reports busy.
const MAX_OPEN_ATTEMPTS: usize = 3;

/// Pause between open attempts on a busy port.
const OPEN_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Settle time after asserting the handshake lines and before closing.
const SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Native serial port implementation.
pub struct NativePort {
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
    timeout: Duration,
    baud_rate: u32,
}

impl NativePort {
    /// Open a serial port with the given configuration.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let port = serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.timeout)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .open()?;

        Ok(Self {
            port: Some(port),
            name: config.port_name.clone(),
            timeout: config.timeout,
            baud_rate: config.baud_rate,
        })
    }

    /// Open a port for a device session.
    ///
    /// A busy port is retried a few times before giving up; any other failure
    /// is returned at once. On success DTR and RTS are asserted and both
    /// buffers are discarded.
    pub fn open_exclusive(config: &SerialConfig) -> Result<Self> {
        let mut attempt = 1;
        let mut port = loop {
            match Self::open(config) {
                Ok(port) => break port,
                Err(e) if is_busy(&e) => {
                    if attempt >= MAX_OPEN_ATTEMPTS {
                        return Err(Error::PortBusy(config.port_name.clone()));
                    }
                    warn!(
                        "Port {} is busy, retrying ({attempt}/{MAX_OPEN_ATTEMPTS})",
                        config.port_name
                    );
                    attempt += 1;
                    thread::sleep(OPEN_RETRY_DELAY);
                },
                Err(e) => return Err(e),
            }
        };

        port.set_dtr(true)?;
        port.set_rts(true)?;
        port.clear_buffers()?;
        thread::sleep(SETTLE_DELAY);
        debug!("Opened {} at {} baud, DTR/RTS asserted", port.name, port.baud_rate);

        Ok(port)
    }

    /// The open port, or a `NotConnected` error once closed.
    fn connected(&mut self) -> std::io::Result<&mut Box<dyn serialport::SerialPort>> {
        match self.port.as_mut() {
            Some(port) => Ok(port),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                format!("{} is closed", self.name),
            )),
        }
    }
}

/// Whether an open failure means another process holds the port.
fn is_busy(err: &Error) -> bool {
    match err {
        Error::Serial(e) => match e.kind() {
            serialport::ErrorKind::Io(kind) => {
                kind == std::io::ErrorKind::PermissionDenied
                    || kind == std::io::ErrorKind::ResourceBusy
            },
            _ => {
                let text = e
                    .description
                    .to_ascii_lowercase();
                text.contains("busy") || text.contains("denied")
            },
        },
        Error::Io(e) => matches!(
            e.kind(),
            std::io::ErrorKind::PermissionDenied | std::io::ErrorKind::ResourceBusy
        ),
        _ => false,
    }
}

impl Port for NativePort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        if let Some(port) = self.port.as_mut() {
            port.set_timeout(timeout)?;
        }
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        if let Some(port) = self.port.as_mut() {
            port.set_baud_rate(baud_rate)?;
        }
        self.baud_rate = baud_rate;
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.connected()?.clear(ClearBuffer::All)?;
        Ok(())
    }

    fn clear_input(&mut self) -> Result<()> {
        self.connected()?.clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        trace!("{}: DTR {}", self.name, if level { "high" } else { "low" });
        self.connected()?.write_data_terminal_ready(level)?;
        Ok(())
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        trace!("{}: RTS {}", self.name, if level { "high" } else { "low" });
        self.connected()?.write_request_to_send(level)?;
        Ok(())
    }

    fn read_available(&mut self) -> Result<Vec<u8>> {
        let port = self.connected()?;
        let pending = usize::try_from(port.bytes_to_read()?).unwrap_or(usize::MAX);
        if pending == 0 {
            return Ok(Vec::new());
        }

        let mut buf = vec![0u8; pending];
        match port.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            },
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn close(&mut self) -> Result<()> {
        let Some(port) = self.port.take() else {
            return Ok(());
        };
        if let Err(e) = port.clear(ClearBuffer::All) {
            warn!("Failed to discard buffers of {}: {e}", self.name);
        }
        drop(port);
        thread::sleep(SETTLE_DELAY);
        debug!("Closed {}", self.name);
        Ok(())
    }
}

impl Drop for NativePort {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            debug!("Closing {} on drop failed: {e}", self.name);
        }
    }
}

impl Read for NativePort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.connected()?.read(buf)
    }
}

impl Write for NativePort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.connected()?.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.connected()?.flush()
    }
}

/// Native port enumerator.
pub struct NativePortEnumerator;

impl PortEnumerator for NativePortEnumerator {
    fn list_ports() -> Result<Vec<PortInfo>> {
        let ports = serialport::available_ports().map_err(Error::Serial)?;

        Ok(ports
            .into_iter()
            .map(|p| {
                let (vid, pid, manufacturer, product) = match &p.port_type {
                    serialport::SerialPortType::UsbPort(info) => (
                        Some(info.vid),
                        Some(info.pid),
                        info.manufacturer.clone(),
                        info.product.clone(),
                    ),
                    _ => (None, None, None, None),
                };

                PortInfo {
                    name: p.port_name,
                    vid,
                    pid,
                    manufacturer,
                    product,
                }
            })
            .collect())
    }
}

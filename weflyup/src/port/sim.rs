//! In-memory Wefly device.
//!
//! [`SimulatedPort`] answers the version probe and the start/stop commands,
//! checks the checksum of every frame it receives and keeps the accepted
//! frames for inspection. Faults can be injected per frame to exercise the
//! retry path.

use {
    crate::{
        error::Result,
        port::{DEFAULT_BAUD, Port},
        protocol::{
            DeviceKind, Frame, Target,
            frame::{FRAME_MARKER, MAX_PAYLOAD, decode_frame},
            handshake::{START_COMMAND, STOP_COMMAND, VERSION_COMMAND},
        },
    },
    log::trace,
    std::{
        collections::{HashMap, VecDeque},
        io::{Read, Write},
        time::Duration,
    },
};

/// Behaviour of the simulated device.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    /// Reported device kind.
    pub kind: DeviceKind,
    /// Reported version, as `XX_YY`.
    pub version: String,
    /// Only commands terminated by this ending are answered.
    pub line_ending: Option<String>,
    /// Answer `$update start` with a refusal.
    pub refuse_start: bool,
    rejected: HashMap<(Target, u16), u32>,
    ignored: HashMap<(Target, u16), u32>,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self {
            kind: DeviceKind::Transmitter,
            version: "01_02".to_string(),
            line_ending: None,
            refuse_start: false,
            rejected: HashMap::new(),
            ignored: HashMap::new(),
        }
    }
}

impl SimulatedDevice {
    /// A receiver reporting `version`.
    pub fn receiver(version: impl Into<String>) -> Self {
        Self {
            kind: DeviceKind::Receiver,
            version: version.into(),
            ..Self::default()
        }
    }

    /// Answer only commands ending in `ending`.
    #[must_use]
    pub fn answering_only(mut self, ending: &str) -> Self {
        self.line_ending = Some(ending.to_string());
        self
    }

    /// Refuse to enter update mode.
    #[must_use]
    pub fn refusing_start(mut self) -> Self {
        self.refuse_start = true;
        self
    }

    /// Report a checksum error for the next `times` sends of a frame.
    #[must_use]
    pub fn reject_frame(mut self, target: Target, sequence: u16, times: u32) -> Self {
        self.rejected.insert((target, sequence), times);
        self
    }

    /// Stay silent for the next `times` sends of a frame.
    #[must_use]
    pub fn ignore_frame(mut self, target: Target, sequence: u16, times: u32) -> Self {
        self.ignored.insert((target, sequence), times);
        self
    }

    fn version_reply(&self) -> String {
        let prefix = match self.kind {
            DeviceKind::Transmitter => "tx_ver",
            DeviceKind::Receiver => "rx_ver",
        };
        format!("{prefix}_{}\r\n", self.version)
    }
}

/// Consume one pending fault for `key`, if any.
fn take_fault(faults: &mut HashMap<(Target, u16), u32>, key: (Target, u16)) -> bool {
    match faults.get_mut(&key) {
        Some(left) if *left > 0 => {
            *left -= 1;
            true
        },
        _ => false,
    }
}

/// Port connected to a [`SimulatedDevice`].
pub struct SimulatedPort {
    device: SimulatedDevice,
    name: String,
    timeout: Duration,
    baud_rate: u32,
    pending: Vec<u8>,
    output: VecDeque<u8>,
    commands: Vec<String>,
    frames: Vec<Frame>,
    updating: bool,
    completed: bool,
    closed: bool,
}

impl SimulatedPort {
    /// Connect to `device`.
    pub fn new(device: SimulatedDevice) -> Self {
        Self {
            device,
            name: "simulated".to_string(),
            timeout: Duration::from_millis(1000),
            baud_rate: DEFAULT_BAUD,
            pending: Vec::new(),
            output: VecDeque::new(),
            commands: Vec::new(),
            frames: Vec::new(),
            updating: false,
            completed: false,
            closed: false,
        }
    }

    /// Every text command received, line ending included.
    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    /// Frames accepted for `target`, in arrival order.
    pub fn frames(&self, target: Target) -> Vec<&Frame> {
        self.frames
            .iter()
            .filter(|f| f.target == target)
            .collect()
    }

    /// Whether a full start/stop cycle was completed.
    pub fn update_completed(&self) -> bool {
        self.completed
    }

    /// Whether [`Port::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn respond(&mut self, text: &str) {
        trace!("Simulated device -> {text:?}");
        self.output.extend(text.bytes());
    }

    fn handle_command(&mut self, raw: &[u8]) {
        let raw = String::from_utf8_lossy(raw).into_owned();
        let command = raw.trim_end_matches(['\r', '\n']);
        let ending = &raw[command.len()..];
        self.commands.push(raw.clone());

        if let Some(expected) = &self.device.line_ending {
            if ending != expected {
                return;
            }
        }

        let reply = match command {
            VERSION_COMMAND => self.device.version_reply(),
            START_COMMAND if self.device.refuse_start => "start refused\r\n".to_string(),
            START_COMMAND => {
                self.updating = true;
                "start ok\r\n".to_string()
            },
            STOP_COMMAND => {
                self.completed = self.updating;
                self.updating = false;
                "stop ok\r\n".to_string()
            },
            _ => "unknown command\r\n".to_string(),
        };
        self.respond(&reply);
    }

    fn handle_frames(&mut self) {
        while let Some((decoded, used)) = decode_frame(&self.pending) {
            self.pending.drain(..used);
            let frame = decoded.frame.clone();
            let key = (frame.target, frame.sequence);

            if !decoded.checksum_ok() || take_fault(&mut self.device.rejected, key) {
                self.respond("cheksum error\r\n");
            } else if take_fault(&mut self.device.ignored, key) {
                trace!("Simulated device drops frame #{}", frame.sequence);
            } else if !self.updating {
                self.respond("not in update mode\r\n");
            } else {
                let reply = format!("received {:02X}\r\n", frame.sequence & 0xFF);
                self.frames.push(frame);
                self.respond(&reply);
            }
        }

        if !self.pending.is_empty() && !is_partial_frame(&self.pending) {
            trace!("Simulated device drops {} unframed bytes", self.pending.len());
            self.pending.clear();
        }
    }
}

/// Whether `data` can still become a frame once more bytes arrive.
fn is_partial_frame(data: &[u8]) -> bool {
    if data.first() != Some(&FRAME_MARKER) {
        return false;
    }
    match data.get(8..10) {
        Some(len) => {
            let len = usize::from(u16::from_be_bytes([len[0], len[1]]));
            (1..=MAX_PAYLOAD).contains(&len)
        },
        None => true,
    }
}

impl Read for SimulatedPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.output.is_empty() {
            return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(self.output.len());
        for (slot, byte) in buf.iter_mut().zip(self.output.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for SimulatedPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.closed {
            return Err(std::io::Error::new(std::io::ErrorKind::NotConnected, "port closed"));
        }
        if buf.first() == Some(&FRAME_MARKER) || !self.pending.is_empty() {
            self.pending.extend_from_slice(buf);
            self.handle_frames();
        } else {
            self.handle_command(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Port for SimulatedPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        self.baud_rate = baud_rate;
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.output.clear();
        self.pending.clear();
        Ok(())
    }

    fn clear_input(&mut self) -> Result<()> {
        self.output.clear();
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_dtr(&mut self, _level: bool) -> Result<()> {
        Ok(())
    }

    fn set_rts(&mut self, _level: bool) -> Result<()> {
        Ok(())
    }

    fn read_available(&mut self) -> Result<Vec<u8>> {
        Ok(self.output.drain(..).collect())
    }

    fn close(&mut self) -> Result<()> {
        self.clear_buffers()?;
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(port: &mut SimulatedPort) -> String {
        String::from_utf8(port.read_available().unwrap()).unwrap()
    }

    #[test]
    fn test_answers_version() {
        let mut port = SimulatedPort::new(SimulatedDevice::receiver("03_01"));
        port.write_all_bytes(b"?version\r\n").unwrap();
        assert_eq!(reply(&mut port), "rx_ver_03_01\r\n");
    }

    #[test]
    fn test_line_ending_filter() {
        let mut port = SimulatedPort::new(SimulatedDevice::default().answering_only("\r"));
        port.write_all_bytes(b"?version\n").unwrap();
        assert_eq!(reply(&mut port), "");
        port.write_all_bytes(b"?version\r").unwrap();
        assert!(reply(&mut port).starts_with("tx_ver"));
        assert_eq!(port.commands(), ["?version\n", "?version\r"]);
    }

    #[test]
    fn test_frame_acknowledged_in_update_mode() {
        let mut port = SimulatedPort::new(SimulatedDevice::default());
        let frame = Frame::new(Target::Fpga, 0x0105, 0, vec![1, 2, 3]);

        port.write_all_bytes(&frame.encode().unwrap()).unwrap();
        assert_eq!(reply(&mut port), "not in update mode\r\n");

        port.write_all_bytes(b"$update start\n").unwrap();
        assert_eq!(reply(&mut port), "start ok\r\n");
        port.write_all_bytes(&frame.encode().unwrap()).unwrap();
        assert_eq!(reply(&mut port), "received 05\r\n");
        assert_eq!(port.frames(Target::Fpga), vec![&frame]);
        assert!(port.frames(Target::Mcu).is_empty());
    }

    #[test]
    fn test_corrupted_frame_rejected() {
        let mut port = SimulatedPort::new(SimulatedDevice::default());
        port.write_all_bytes(b"$update start\n").unwrap();
        let _ = reply(&mut port);

        let mut data = Frame::new(Target::Mcu, 0, 0, vec![1, 2, 3]).encode().unwrap();
        let last = data.len() - 1;
        data[last] ^= 0xFF;
        port.write_all_bytes(&data).unwrap();

        assert_eq!(reply(&mut port), "cheksum error\r\n");
        assert!(port.frames(Target::Mcu).is_empty());
    }

    #[test]
    fn test_bad_length_field_does_not_block_commands() {
        let mut port = SimulatedPort::new(SimulatedDevice::default());
        port.write_all_bytes(b"$update start\n").unwrap();
        let _ = reply(&mut port);

        let mut data = Frame::new(Target::Mcu, 0, 0, vec![1, 2, 3]).encode().unwrap();
        data[8] = 0xFF;
        data[9] = 0xFF;
        port.write_all_bytes(&data).unwrap();
        assert_eq!(reply(&mut port), "");

        port.write_all_bytes(b"$update stop\n").unwrap();
        assert_eq!(reply(&mut port), "stop ok\r\n");
        assert!(port.update_completed());
    }

    #[test]
    fn test_split_frame_is_reassembled() {
        let mut port = SimulatedPort::new(SimulatedDevice::default());
        port.write_all_bytes(b"$update start\n").unwrap();
        let _ = reply(&mut port);

        let data = Frame::new(Target::Fpga, 3, 0, vec![7; 20]).encode().unwrap();
        port.write_all_bytes(&data[..6]).unwrap();
        assert_eq!(reply(&mut port), "");
        port.write_all_bytes(&data[6..]).unwrap();
        assert_eq!(reply(&mut port), "received 03\r\n");
    }

    #[test]
    fn test_injected_faults_are_consumed() {
        let device = SimulatedDevice::default()
            .reject_frame(Target::Mcu, 1, 1)
            .ignore_frame(Target::Mcu, 2, 1);
        let mut port = SimulatedPort::new(device);
        port.write_all_bytes(b"$update start\n").unwrap();
        let _ = reply(&mut port);

        let one = Frame::new(Target::Mcu, 1, 0, vec![1]).encode().unwrap();
        port.write_all_bytes(&one).unwrap();
        assert_eq!(reply(&mut port), "cheksum error\r\n");
        port.write_all_bytes(&one).unwrap();
        assert_eq!(reply(&mut port), "received 01\r\n");

        let two = Frame::new(Target::Mcu, 2, 0, vec![2]).encode().unwrap();
        port.write_all_bytes(&two).unwrap();
        assert_eq!(reply(&mut port), "");
        port.write_all_bytes(&two).unwrap();
        assert_eq!(reply(&mut port), "received 02\r\n");
    }

    #[test]
    fn test_start_stop_cycle() {
        let mut port = SimulatedPort::new(SimulatedDevice::default());
        port.write_all_bytes(b"$update stop\n").unwrap();
        assert!(!port.update_completed());

        port.write_all_bytes(b"$update start\n").unwrap();
        port.write_all_bytes(b"$update stop").unwrap();
        assert!(port.update_completed());

        port.close().unwrap();
        assert!(port.is_closed());
        assert!(port.write_all_bytes(b"?version\n").is_err());
    }
}

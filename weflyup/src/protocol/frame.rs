//! Firmware data frame and its wire encoding.
//!
//! ## Frame Format
//!
//! All multi-byte fields are big-endian.
//!
//! ```text
//! +--------+------+----------+-----------+--------+-----------+----------+
//! | Marker | Type | Sequence |  Address  | Length |  Payload  | Checksum |
//! +--------+------+----------+-----------+--------+-----------+----------+
//! |   1    |  1   |    2     |     4     |   2    | 1..=256   |    2     |
//! +--------+------+----------+-----------+--------+-----------+----------+
//! |  '#'   | b7=MCU|  u16    |   u32     |  N     |   data    |   sum    |
//! +--------+------+----------+-----------+--------+-----------+----------+
//! ```
//!
//! The checksum is the wrapping 16-bit sum of every byte from the type byte
//! through the last payload byte (marker excluded).

use {
    crate::error::{Error, Result},
    byteorder::{BigEndian, WriteBytesExt},
    std::fmt,
};

/// Leading marker byte of every frame.
pub const FRAME_MARKER: u8 = b'#';

/// Maximum number of payload bytes carried by one frame.
pub const MAX_PAYLOAD: usize = 256;

/// Bytes of framing around the payload (marker, type, seq, addr, len, checksum).
pub const FRAME_OVERHEAD: usize = 12;

/// Type byte flag selecting the MCU image.
const MCU_FLAG: u8 = 0x80;

/// Which sub-image of the device a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Target {
    /// FPGA configuration (`.mcs` file).
    Fpga,
    /// MCU firmware (`.hex` file).
    Mcu,
}

impl Target {
    /// Type byte sent on the wire. The low seven bits are reserved and zero.
    pub fn type_byte(self) -> u8 {
        match self {
            Self::Fpga => 0x00,
            Self::Mcu => MCU_FLAG,
        }
    }

    /// Decode a type byte. Reserved bits are ignored.
    pub fn from_type_byte(byte: u8) -> Self {
        if byte & MCU_FLAG == 0 {
            Self::Fpga
        } else {
            Self::Mcu
        }
    }

    /// Conventional file extension of images for this target.
    pub fn file_extension(self) -> &'static str {
        match self {
            Self::Fpga => "mcs",
            Self::Mcu => "hex",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fpga => f.write_str("FPGA"),
            Self::Mcu => f.write_str("MCU"),
        }
    }
}

/// One unit of transfer, acknowledged individually by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Image this frame belongs to.
    pub target: Target,
    /// Position within the image, starting at 0 for every file.
    pub sequence: u16,
    /// Absolute load address of the first payload byte.
    pub address: u32,
    /// Payload, 1 to [`MAX_PAYLOAD`] bytes.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a new frame.
    pub fn new(target: Target, sequence: u16, address: u32, payload: Vec<u8>) -> Self {
        debug_assert!(!payload.is_empty() && payload.len() <= MAX_PAYLOAD);
        Self {
            target,
            sequence,
            address,
            payload,
        }
    }

    /// Payload length as carried in the length field.
    ///
    /// Saturates for payloads too long to encode; [`encode`](Self::encode)
    /// rejects those.
    pub fn payload_len(&self) -> u16 {
        u16::try_from(self.payload.len()).unwrap_or(u16::MAX)
    }

    /// Whether the payload fits the length field the device accepts.
    pub fn is_encodable(&self) -> bool {
        (1..=MAX_PAYLOAD).contains(&self.payload.len())
    }

    /// Total encoded size in bytes.
    pub fn encoded_len(&self) -> usize {
        FRAME_OVERHEAD + self.payload.len()
    }

    /// Compute the frame checksum.
    pub fn checksum(&self) -> u16 {
        let header = std::iter::once(self.target.type_byte())
            .chain(self.sequence.to_be_bytes())
            .chain(self.address.to_be_bytes())
            .chain(self.payload_len().to_be_bytes());

        header
            .chain(self.payload.iter().copied())
            .fold(0u16, |sum, b| sum.wrapping_add(u16::from(b)))
    }

    /// Build the complete wire representation.
    ///
    /// Fails with [`Error::InvalidFrame`] unless the payload holds 1 to
    /// [`MAX_PAYLOAD`] bytes.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn encode(&self) -> Result<Vec<u8>> {
        if !self.is_encodable() {
            return Err(Error::InvalidFrame {
                target: self.target,
                sequence: self.sequence,
                len: self.payload.len(),
            });
        }

        let mut buf = Vec::with_capacity(self.encoded_len());

        buf.push(FRAME_MARKER);
        buf.push(self.target.type_byte());
        buf.write_u16::<BigEndian>(self.sequence).unwrap();
        buf.write_u32::<BigEndian>(self.address).unwrap();
        buf.write_u16::<BigEndian>(self.payload_len()).unwrap();
        buf.extend_from_slice(&self.payload);
        buf.write_u16::<BigEndian>(self.checksum()).unwrap();

        Ok(buf)
    }
}

/// Header fields recovered from an encoded frame.
///
/// The device side of the link uses this; the updater itself never parses
/// frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    /// The frame contents.
    pub frame: Frame,
    /// Checksum carried on the wire.
    pub wire_checksum: u16,
}

impl DecodedFrame {
    /// Whether the carried checksum matches the contents.
    pub fn checksum_ok(&self) -> bool {
        self.frame.checksum() == self.wire_checksum
    }
}

/// Parse one encoded frame from the start of `data`.
///
/// Returns the decoded frame and the number of bytes consumed, or `None` if
/// `data` does not start with a complete frame.
pub fn decode_frame(data: &[u8]) -> Option<(DecodedFrame, usize)> {
    if data.len() < FRAME_OVERHEAD || data[0] != FRAME_MARKER {
        return None;
    }

    let len = usize::from(u16::from_be_bytes([data[8], data[9]]));
    let total = FRAME_OVERHEAD + len;
    if data.len() < total {
        return None;
    }

    let frame = Frame {
        target: Target::from_type_byte(data[1]),
        sequence: u16::from_be_bytes([data[2], data[3]]),
        address: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
        payload: data[10..10 + len].to_vec(),
    };
    let wire_checksum = u16::from_be_bytes([data[10 + len], data[11 + len]]);

    Some((
        DecodedFrame {
            frame,
            wire_checksum,
        },
        total,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sum_fields(bytes: &[u8]) -> u16 {
        // Everything between the marker and the checksum.
        bytes[1..bytes.len() - 2]
            .iter()
            .fold(0u16, |acc, b| acc.wrapping_add(u16::from(*b)))
    }

    #[test]
    fn test_encode_layout() {
        let frame = Frame::new(Target::Mcu, 0x0102, 0x0800_1234, vec![0xAA, 0xBB, 0xCC]);
        let data = frame.encode().unwrap();

        assert_eq!(data.len(), 13 + 2);
        assert_eq!(data[0], b'#');
        assert_eq!(data[1], 0x80);
        assert_eq!(&data[2..4], &[0x01, 0x02]);
        assert_eq!(&data[4..8], &[0x08, 0x00, 0x12, 0x34]);
        assert_eq!(&data[8..10], &[0x00, 0x03]);
        assert_eq!(&data[10..13], &[0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn test_fpga_type_byte_is_zero() {
        let frame = Frame::new(Target::Fpga, 0, 0, vec![1]);
        assert_eq!(frame.encode().unwrap()[1], 0x00);
    }

    #[test]
    fn test_checksum_known_value() {
        // type 0x00, seq 00 01, addr 00 00 00 10, len 00 04, data 01 02 03 04
        let frame = Frame::new(Target::Fpga, 1, 0x10, vec![1, 2, 3, 4]);
        assert_eq!(frame.checksum(), 1 + 0x10 + 4 + 10);

        let data = frame.encode().unwrap();
        assert_eq!(&data[data.len() - 2..], &[0x00, 0x1F]);
    }

    #[test]
    fn test_checksum_includes_length_bytes() {
        // A 256-byte payload has length bytes 0x01 0x00; the high byte must count.
        let frame = Frame::new(Target::Fpga, 0, 0, vec![0; 256]);
        assert_eq!(frame.checksum(), 1);
    }

    #[test]
    fn test_checksum_matches_independent_sum() {
        for len in [1usize, 2, 17, 255, 256] {
            #[allow(clippy::cast_possible_truncation)]
            let payload: Vec<u8> = (0..len).map(|i| (i * 7 + 3) as u8).collect();
            let frame = Frame::new(Target::Mcu, 0xFFEE, 0xDEAD_BEEF, payload);
            let data = frame.encode().unwrap();
            let wire = u16::from_be_bytes([data[data.len() - 2], data[data.len() - 1]]);
            assert_eq!(wire, sum_fields(&data), "payload length {len}");
        }
    }

    #[test]
    fn test_checksum_wraps() {
        let frame = Frame::new(Target::Mcu, 0xFFFF, 0xFFFF_FFFF, vec![0xFF; 256]);
        let expected = (0x80u32 + 0xFF * 2 + 0xFF * 4 + 0x01 + 0xFF * 256) & 0xFFFF;
        assert_eq!(u32::from(frame.checksum()), expected);
    }

    #[test]
    fn test_decode_frame_reads_back_fields() {
        let frame = Frame::new(Target::Mcu, 42, 0x0001_0000, vec![9, 8, 7]);
        let mut data = frame.encode().unwrap();
        data.extend_from_slice(b"trailing");

        let (decoded, used) = decode_frame(&data).unwrap();
        assert_eq!(used, frame.encoded_len());
        assert_eq!(decoded.frame, frame);
        assert!(decoded.checksum_ok());
    }

    #[test]
    fn test_decode_frame_detects_corruption() {
        let frame = Frame::new(Target::Fpga, 3, 0x20, vec![1, 2, 3]);
        let mut data = frame.encode().unwrap();
        data[11] ^= 0x01;

        let (decoded, _) = decode_frame(&data).unwrap();
        assert!(!decoded.checksum_ok());
    }

    #[test]
    fn test_decode_frame_incomplete() {
        let data = Frame::new(Target::Fpga, 0, 0, vec![1; 10]).encode().unwrap();
        assert!(decode_frame(&data[..data.len() - 1]).is_none());
        assert!(decode_frame(b"?version\n").is_none());
    }

    #[test]
    fn test_oversized_payload_is_not_encoded() {
        // 65 539 bytes would wrap the length field to 0x0003.
        let mut frame = Frame::new(Target::Mcu, 4, 0, vec![1]);
        frame.payload = vec![0x55; 65_539];

        assert!(!frame.is_encodable());
        assert_eq!(frame.payload_len(), u16::MAX);
        assert!(matches!(
            frame.encode(),
            Err(Error::InvalidFrame {
                target: Target::Mcu,
                sequence: 4,
                len: 65_539
            })
        ));

        frame.payload = vec![0x55; MAX_PAYLOAD + 1];
        assert!(frame.encode().is_err());
        frame.payload.clear();
        assert!(frame.encode().is_err());
        frame.payload = vec![0x55; MAX_PAYLOAD];
        assert_eq!(frame.encode().unwrap().len(), FRAME_OVERHEAD + MAX_PAYLOAD);
    }

    #[test]
    fn test_target_display_and_extension() {
        assert_eq!(Target::Fpga.to_string(), "FPGA");
        assert_eq!(Target::Mcu.to_string(), "MCU");
        assert_eq!(Target::Fpga.file_extension(), "mcs");
        assert_eq!(Target::Mcu.file_extension(), "hex");
        assert_eq!(Target::from_type_byte(0x81), Target::Mcu);
        assert_eq!(Target::from_type_byte(0x7F), Target::Fpga);
    }
}

//! Intel-HEX style record file parser.
//!
//! Both image kinds shipped to Wefly devices use the same record syntax:
//! the FPGA bitstream comes as a Xilinx `.mcs` file and the MCU firmware as
//! an Intel `.hex` file. Only a subset of record types matters:
//!
//! | Type | Meaning                  | Handling                          |
//! |------|--------------------------|-----------------------------------|
//! | 00   | Data                     | emitted as one or more frames     |
//! | 01   | End of file              | stops parsing                     |
//! | 04   | Extended linear address  | sets the upper 16 address bits    |
//! | 05   | Start linear address     | ignored                           |
//! | *    | anything else            | ignored                           |
//!
//! The parser is tolerant: lines that are not records or that cannot be
//! decoded are skipped rather than failing the whole file. The per-record
//! checksum byte is not verified.

use {
    crate::{
        error::{Error, Result},
        protocol::frame::{Frame, MAX_PAYLOAD, Target},
    },
    log::{debug, trace},
    std::{fs, path::Path},
};

/// Record type: data.
pub const RECORD_DATA: u8 = 0x00;
/// Record type: end of file.
pub const RECORD_EOF: u8 = 0x01;
/// Record type: extended linear address.
pub const RECORD_EXTENDED_LINEAR: u8 = 0x04;
/// Record type: start linear address.
pub const RECORD_START_LINEAR: u8 = 0x05;

/// Minimum decoded length of a record (count, address, type, checksum).
const MIN_RECORD_LEN: usize = 5;

/// Accumulates frames for one image while records are fed in.
///
/// Holds the parse state (upper address half and next sequence number); a
/// builder is created per file and never shared between files.
#[derive(Debug)]
pub struct FrameBuilder {
    target: Target,
    high_offset: u16,
    next_sequence: u16,
    frames: Vec<Frame>,
}

impl FrameBuilder {
    /// Create an empty builder for the given image.
    pub fn new(target: Target) -> Self {
        Self {
            target,
            high_offset: 0,
            next_sequence: 0,
            frames: Vec::new(),
        }
    }

    /// Set the upper 16 bits used for subsequent data.
    pub fn set_high_offset(&mut self, offset: u16) {
        trace!("Extended linear address: 0x{offset:04X}");
        self.high_offset = offset;
    }

    /// Add the data of one record, splitting it into frames of at most
    /// [`MAX_PAYLOAD`] bytes.
    #[allow(clippy::cast_possible_truncation)] // chunk length <= MAX_PAYLOAD
    pub fn push_data(&mut self, address: u16, data: &[u8]) {
        let mut address = address;
        for chunk in data.chunks(MAX_PAYLOAD) {
            let full_address = (u32::from(self.high_offset) << 16) | u32::from(address);
            self.frames.push(Frame::new(
                self.target,
                self.next_sequence,
                full_address,
                chunk.to_vec(),
            ));
            self.next_sequence = self.next_sequence.wrapping_add(1);
            address = address.wrapping_add(chunk.len() as u16);
        }
    }

    /// Number of frames produced so far.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether no frame has been produced yet.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Finish and return the frames in order.
    pub fn finish(self) -> Vec<Frame> {
        self.frames
    }
}

/// Decode the hex digits of a record line (without the leading `:`).
///
/// An odd trailing digit is dropped. Returns `None` if a pair is not hex.
fn decode_hex(text: &str) -> Option<Vec<u8>> {
    let even = text.len() & !1;
    let digits = text.get(..even)?;

    digits
        .as_bytes()
        .chunks_exact(2)
        .map(|pair| {
            let pair = std::str::from_utf8(pair).ok()?;
            u8::from_str_radix(pair, 16).ok()
        })
        .collect()
}

/// Parse record text into frames for `target`.
pub fn parse_records(text: &str, target: Target) -> Vec<Frame> {
    let mut builder = FrameBuilder::new(target);

    for (line_no, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        let Some(hex) = line.strip_prefix(':') else {
            continue;
        };

        let Some(bytes) = decode_hex(hex) else {
            debug!("Line {}: invalid hex digits, skipped", line_no + 1);
            continue;
        };
        if bytes.len() < MIN_RECORD_LEN {
            debug!("Line {}: record too short, skipped", line_no + 1);
            continue;
        }

        let byte_count = usize::from(bytes[0]);
        let address = u16::from_be_bytes([bytes[1], bytes[2]]);
        let record_type = bytes[3];

        match record_type {
            RECORD_DATA => {
                let Some(data) = bytes.get(4..4 + byte_count) else {
                    debug!(
                        "Line {}: declares {byte_count} data bytes but carries fewer, skipped",
                        line_no + 1
                    );
                    continue;
                };
                if data.is_empty() {
                    continue;
                }
                builder.push_data(address, data);
            },
            RECORD_EXTENDED_LINEAR => {
                if let (true, Some(&[hi, lo])) = (byte_count >= 2, bytes.get(4..6)) {
                    builder.set_high_offset(u16::from_be_bytes([hi, lo]));
                }
            },
            RECORD_EOF => {
                trace!("End-of-file record at line {}", line_no + 1);
                break;
            },
            RECORD_START_LINEAR => {},
            other => {
                trace!("Line {}: ignoring record type 0x{other:02X}", line_no + 1);
            },
        }
    }

    builder.finish()
}

/// Parse a record file from disk into frames for `target`.
pub fn parse_record_file(path: impl AsRef<Path>, target: Target) -> Result<Vec<Frame>> {
    let path = path.as_ref();
    let raw = fs::read(path).map_err(|source| Error::RecordFile {
        path: path.to_path_buf(),
        source,
    })?;
    let text = String::from_utf8_lossy(&raw);

    let frames = parse_records(&text, target);
    debug!(
        "Parsed {} into {} {target} frames",
        path.display(),
        frames.len()
    );
    Ok(frames)
}

/// Aggregate figures about a parsed image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ImageSummary {
    /// Number of frames.
    pub frame_count: usize,
    /// Total payload bytes.
    pub payload_bytes: usize,
    /// Lowest frame address.
    pub start_address: u32,
    /// One past the highest payload byte.
    pub end_address: u64,
}

/// Summarise a frame list.
pub fn summarize(frames: &[Frame]) -> ImageSummary {
    let start_address = frames
        .iter()
        .map(|f| f.address)
        .min()
        .unwrap_or(0);
    let end_address = frames
        .iter()
        .map(|f| u64::from(f.address) + f.payload.len() as u64)
        .max()
        .unwrap_or(0);

    ImageSummary {
        frame_count: frames.len(),
        payload_bytes: frames
            .iter()
            .map(|f| f.payload.len())
            .sum(),
        start_address,
        end_address,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn test_single_data_record() {
        let frames = parse_records(":04000000010203047A\n", Target::Fpga);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].address, 0);
        assert_eq!(frames[0].sequence, 0);
        assert_eq!(frames[0].payload, vec![0x01, 0x02, 0x03, 0x04]);
        assert_eq!(frames[0].target, Target::Fpga);
    }

    #[test]
    fn test_extended_linear_address_sets_high_half() {
        let text = ":020000040800F2\n:0412340011223344D0\n";
        let frames = parse_records(text, Target::Mcu);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].address, 0x0800_1234);
        assert_eq!(frames[0].target, Target::Mcu);
    }

    #[test]
    fn test_high_offset_persists_until_next_update() {
        let text = "\
:020000040001F9
:02000000AABB99
:02000200CCDD53
:020000040002F8
:02000000EEFF11
";
        let frames = parse_records(text, Target::Fpga);
        let addrs: Vec<u32> = frames.iter().map(|f| f.address).collect();
        assert_eq!(addrs, vec![0x0001_0000, 0x0001_0002, 0x0002_0000]);
    }

    #[test]
    fn test_sequences_are_contiguous() {
        let text = "\
:0400000001020304F2
:0400040005060708E2
:020000040001F9
:0400000009101112C6
";
        let frames = parse_records(text, Target::Fpga);
        let seqs: Vec<u16> = frames.iter().map(|f| f.sequence).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn test_eof_stops_parsing() {
        let text = "\
:0400000001020304F2
:00000001FF
:0400040005060708E2
";
        let frames = parse_records(text, Target::Mcu);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_start_address_and_unknown_records_ignored() {
        let text = "\
:0400000508000131BD
:020000021000EC
:0400000001020304F2
";
        let frames = parse_records(text, Target::Mcu);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].sequence, 0);
    }

    #[test]
    fn test_non_record_lines_ignored() {
        let text = "\n# comment\n  \nrandom text\n  :0400000001020304F2  \r\n";
        let frames = parse_records(text, Target::Fpga);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_short_and_invalid_records_skipped() {
        let text = "\
:00000
:ZZ000000
:0400000001020304F2
";
        let frames = parse_records(text, Target::Fpga);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_odd_length_line_truncated() {
        // Trailing nibble is dropped; the record still decodes.
        let frames = parse_records(":0400000001020304F2A", Target::Fpga);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_record_checksum_not_verified() {
        let frames = parse_records(":040000000102030400", Target::Fpga);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_truncated_data_record_skipped() {
        // Declares 16 data bytes but carries 4.
        let frames = parse_records(":1000000001020304F2", Target::Fpga);
        assert!(frames.is_empty());
    }

    #[test]
    fn test_short_extended_address_keeps_offset() {
        let text = "\
:020000040001F9
:01000004FFFC
:0400000001020304F2
";
        let frames = parse_records(text, Target::Fpga);
        assert_eq!(frames[0].address, 0x0001_0000);
    }

    #[test]
    fn test_long_data_split_into_contiguous_frames() {
        let data: Vec<u8> = (0..700u32).map(|i| (i % 251) as u8).collect();
        let mut builder = FrameBuilder::new(Target::Fpga);
        builder.set_high_offset(0x0002);
        builder.push_data(0x1000, &data);
        let frames = builder.finish();

        assert_eq!(frames.len(), data.len().div_ceil(MAX_PAYLOAD));
        assert_eq!(
            frames.iter().map(|f| f.payload.len()).sum::<usize>(),
            data.len()
        );
        assert_eq!(frames[0].address, 0x0002_1000);
        for pair in frames.windows(2) {
            assert_eq!(
                pair[1].address,
                pair[0].address + pair[0].payload.len() as u32
            );
            assert_eq!(pair[1].sequence, pair[0].sequence + 1);
        }
        assert!(frames.iter().all(|f| f.payload.len() <= MAX_PAYLOAD));
    }

    #[test]
    fn test_exactly_max_payload_is_one_frame() {
        let mut builder = FrameBuilder::new(Target::Mcu);
        builder.push_data(0, &[0x55; MAX_PAYLOAD]);
        assert_eq!(builder.len(), 1);
    }

    #[test]
    fn test_parse_record_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, ":020000040800F2").unwrap();
        writeln!(file, ":0400000001020304F2").unwrap();
        writeln!(file, ":00000001FF").unwrap();

        let frames = parse_record_file(file.path(), Target::Mcu).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].address, 0x0800_0000);
    }

    #[test]
    fn test_parse_record_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.mcs");
        let err = parse_record_file(&missing, Target::Fpga).unwrap_err();
        assert!(matches!(err, Error::RecordFile { .. }));
    }

    #[test]
    fn test_summarize() {
        let text = "\
:020000040001F9
:0400000001020304F2
:0200100005061C
";
        let summary = summarize(&parse_records(text, Target::Fpga));
        assert_eq!(summary.frame_count, 2);
        assert_eq!(summary.payload_bytes, 6);
        assert_eq!(summary.start_address, 0x0001_0000);
        assert_eq!(summary.end_address, 0x0001_0012);
    }

    #[test]
    fn test_summarize_empty() {
        assert_eq!(summarize(&[]), ImageSummary::default());
    }
}

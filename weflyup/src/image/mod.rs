//! Firmware image files.

pub mod record;

pub use record::{FrameBuilder, ImageSummary, parse_record_file, parse_records, summarize};

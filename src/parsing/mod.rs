//! Frame extraction, integrity checks and payload decoding.
//!
//! - [`checksum`]: checksum and digest algorithms keyed by name
//! - [`decoder`]: text/byte conversions (plain, hex, base64, byte lists)
//! - [`frame`]: the [`Frame`] record and reader configuration
//! - [`frame_reader`]: the frame-boundary state machine

pub mod checksum;
pub mod decoder;
pub mod frame;
pub mod frame_reader;

pub use checksum::ChecksumAlgorithm;
pub use decoder::DecoderMethod;
pub use frame::{Frame, FrameDetection, FrameReaderConfig, FrameReaderConfigUpdate, OperationMode};
pub use frame_reader::{FrameReader, ReaderStats};

//! Byte storage used by the framing pipeline.
pub mod ring_buffer;

pub use ring_buffer::{BufferStats, CircularBuffer};

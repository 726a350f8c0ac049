//! Frame records and frame reader configuration.

use crate::error::{AppResult, FramerError};
use crate::parsing::checksum::ChecksumAlgorithm;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Default ring buffer capacity (10 MiB).
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 10 * 1024 * 1024;

/// Default bound on queued frames.
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

/// One complete message carved out of the byte stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    /// Process-wide unique identifier
    pub id: u64,
    /// Position in this reader's output, starting at 1 after each reset
    pub sequence: u64,
    /// Capture time
    pub timestamp: DateTime<Utc>,
    /// Payload with delimiters and checksum removed
    #[serde(with = "payload_text")]
    pub data: Bytes,
}

impl Frame {
    /// Payload as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

mod payload_text {
    use bytes::Bytes;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from_utf8_lossy(data))
    }
}

/// Top-level framing convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationMode {
    /// Any detection scheme, custom delimiters, optional checksum
    #[default]
    Configurable,
    /// Frames end at the earliest `\n`, `\r` or `\r\n`
    LineOriented,
    /// Frames are `{ ... }`, first `}` after a `{`
    BraceDelimited,
}

/// Boundary detection used in [`OperationMode::Configurable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrameDetection {
    /// Every delivered chunk is a frame
    Passthrough,
    /// Split on the finish sequence
    #[default]
    EndOnly,
    /// A frame runs from one start sequence to the next
    StartOnly,
    /// A frame needs both a start and a finish sequence
    StartAndEnd,
}

impl FromStr for OperationMode {
    type Err = FramerError;

    fn from_str(s: &str) -> AppResult<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "configurable" | "project-file" => Ok(OperationMode::Configurable),
            "line-oriented" | "lines" | "quick-plot" => Ok(OperationMode::LineOriented),
            "brace-delimited" | "json" | "device-sends-json" => Ok(OperationMode::BraceDelimited),
            _ => Err(FramerError::Configuration(format!(
                "Unknown operation mode '{}'. Must be one of: configurable, line-oriented, brace-delimited",
                s
            ))),
        }
    }
}

impl FromStr for FrameDetection {
    type Err = FramerError;

    fn from_str(s: &str) -> AppResult<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "passthrough" | "no-delimiters" => Ok(FrameDetection::Passthrough),
            "end-only" | "end-delimiter-only" => Ok(FrameDetection::EndOnly),
            "start-only" | "start-delimiter-only" => Ok(FrameDetection::StartOnly),
            "start-and-end" | "start-and-end-delimiter" => Ok(FrameDetection::StartAndEnd),
            _ => Err(FramerError::Configuration(format!(
                "Unknown frame detection '{}'. Must be one of: passthrough, end-only, start-only, start-and-end",
                s
            ))),
        }
    }
}

/// Frame reader settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameReaderConfig {
    /// Framing convention
    #[serde(default)]
    pub operation_mode: OperationMode,
    /// Boundary detection (configurable mode only)
    #[serde(default)]
    pub frame_detection: FrameDetection,
    /// Bytes that open a frame
    #[serde(default, with = "delimiter")]
    pub start_sequence: Vec<u8>,
    /// Bytes that close a frame
    #[serde(default = "default_finish_sequence", with = "delimiter")]
    pub finish_sequence: Vec<u8>,
    /// Checksum name; empty for none
    #[serde(default)]
    pub checksum_algorithm: String,
    /// Ring buffer capacity in bytes
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: usize,
    /// Frame queue bound
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_finish_sequence() -> Vec<u8> {
    b"\n".to_vec()
}

fn default_max_buffer_size() -> usize {
    DEFAULT_MAX_BUFFER_SIZE
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

impl Default for FrameReaderConfig {
    fn default() -> Self {
        Self {
            operation_mode: OperationMode::default(),
            frame_detection: FrameDetection::default(),
            start_sequence: Vec::new(),
            finish_sequence: default_finish_sequence(),
            checksum_algorithm: String::new(),
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl FrameReaderConfig {
    /// Check sizes, delimiters and the checksum name.
    pub fn validate(&self) -> AppResult<()> {
        if self.max_buffer_size == 0 {
            return Err(FramerError::Configuration(
                "max_buffer_size must be greater than zero".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(FramerError::Configuration(
                "queue_capacity must be greater than zero".to_string(),
            ));
        }
        ChecksumAlgorithm::from_name(&self.checksum_algorithm)?;

        if self.operation_mode != OperationMode::Configurable {
            return Ok(());
        }
        let needs_start = matches!(
            self.frame_detection,
            FrameDetection::StartOnly | FrameDetection::StartAndEnd
        );
        let needs_finish = matches!(
            self.frame_detection,
            FrameDetection::EndOnly | FrameDetection::StartAndEnd
        );
        if needs_start && self.start_sequence.is_empty() {
            return Err(FramerError::Configuration(format!(
                "{:?} detection requires a start_sequence",
                self.frame_detection
            )));
        }
        if needs_finish && self.finish_sequence.is_empty() {
            return Err(FramerError::Configuration(format!(
                "{:?} detection requires a finish_sequence",
                self.frame_detection
            )));
        }
        Ok(())
    }
}

/// Partial update applied by `FrameReader::update_config`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReaderConfigUpdate {
    /// New framing convention
    pub operation_mode: Option<OperationMode>,
    /// New boundary detection
    pub frame_detection: Option<FrameDetection>,
    /// New start sequence
    pub start_sequence: Option<Vec<u8>>,
    /// New finish sequence
    pub finish_sequence: Option<Vec<u8>>,
    /// New checksum name
    pub checksum_algorithm: Option<String>,
    /// New ring buffer capacity
    pub max_buffer_size: Option<usize>,
    /// New queue bound
    pub queue_capacity: Option<usize>,
}

/// Delimiters are written either as a string or as an array of byte values.
mod delimiter {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        Bytes(Vec<u8>),
    }

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        Ok(match Repr::deserialize(deserializer)? {
            Repr::Text(text) => text.into_bytes(),
            Repr::Bytes(bytes) => bytes,
        })
    }
}

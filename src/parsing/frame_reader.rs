//! Frame-boundary state machine.
//!
//! [`FrameReader`] turns an arbitrarily fragmented byte stream into an ordered
//! sequence of verified [`Frame`]s. Bytes are appended to a [`CircularBuffer`]
//! and an extraction pass runs after every delivery, repeatedly locating the
//! active delimiters until no further complete frame is present.
//!
//! # Detection rules
//!
//! | Mode                       | Frame payload                                   |
//! |----------------------------|-------------------------------------------------|
//! | configurable / passthrough | each delivered chunk, unbuffered                |
//! | configurable / end-only    | bytes before the finish sequence                |
//! | configurable / start-only  | bytes between consecutive start sequences, or   |
//! |                            | from the last start to the end of buffered data |
//! | configurable / start+end   | bytes between a start and the next finish       |
//! | line-oriented              | bytes before the earliest `\r\n`, `\n` or `\r`  |
//! | brace-delimited            | bytes between `{` and the first following `}`   |
//!
//! In the configurable mode a checksum may follow the frame: directly after the
//! finish sequence (end-only, start+end) or as the last bytes before the next
//! start sequence (start-only).
//!
//! # Failure handling
//!
//! Nothing here returns an error. A frame whose checksum bytes have not arrived
//! yet stays buffered until they do. Checksum mismatches, empty frames and a
//! finish sequence seen before any start sequence are dropped and only show up
//! in [`ReaderStats`]. When the queue is full the oldest queued frame is evicted.

use crate::data::ring_buffer::{BufferStats, CircularBuffer};
use crate::events::{Listeners, ReaderEvent};
use crate::parsing::checksum::ChecksumAlgorithm;
use crate::parsing::frame::{
    Frame, FrameDetection, FrameReaderConfig, FrameReaderConfigUpdate, OperationMode,
};
use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, warn};

static NEXT_FRAME_ID: AtomicU64 = AtomicU64::new(1);

/// Line terminators, longest first so `\r\n` wins a tie with `\r`.
const LINE_DELIMITERS: [&[u8]; 3] = [b"\r\n", b"\n", b"\r"];

const BRACE_OPEN: &[u8] = b"{";
const BRACE_CLOSE: &[u8] = b"}";

/// Counters describing what the reader has done with its input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReaderStats {
    /// Bytes handed to `process_data`
    pub bytes_received: u64,
    /// Frames that passed all checks and were queued
    pub frames_extracted: u64,
    /// Frames dropped because their checksum did not match
    pub checksum_failures: u64,
    /// Empty frames and finish sequences without a preceding start
    pub frames_discarded: u64,
    /// Queued frames dropped to make room for newer ones
    pub frames_evicted: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChecksumStatus {
    Valid,
    Incomplete,
    Mismatch,
}

/// Converts a raw byte stream into verified frames.
#[derive(Debug)]
pub struct FrameReader {
    config: FrameReaderConfig,
    checksum: Option<ChecksumAlgorithm>,
    buffer: CircularBuffer,
    queue: VecDeque<Frame>,
    sequence: u64,
    stats: ReaderStats,
    listeners: Listeners<ReaderEvent>,
}

impl FrameReader {
    /// Create a reader. An unrecognised checksum name means "no checksum".
    pub fn new(config: FrameReaderConfig) -> Self {
        let checksum = resolve_checksum(&config.checksum_algorithm);
        let buffer = CircularBuffer::new(config.max_buffer_size);
        Self {
            config,
            checksum,
            buffer,
            queue: VecDeque::new(),
            sequence: 0,
            stats: ReaderStats::default(),
            listeners: Listeners::new(),
        }
    }

    /// Current configuration.
    pub fn config(&self) -> &FrameReaderConfig {
        &self.config
    }

    /// Receive frame-extracted and ready-read notifications.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ReaderEvent> {
        self.listeners.subscribe()
    }

    /// Append `data` and extract every complete frame.
    ///
    /// Returns the number of frames queued by this call. A
    /// [`ReaderEvent::ReadyRead`] is emitted once the pass finishes.
    pub fn process_data(&mut self, data: &[u8]) -> usize {
        self.stats.bytes_received += data.len() as u64;
        let before = self.stats.frames_extracted;

        if self.is_passthrough() {
            if !data.is_empty() {
                self.enqueue(Bytes::copy_from_slice(data));
            }
        } else {
            if data.len() > self.buffer.free_space() {
                debug!(
                    incoming = data.len(),
                    free = self.buffer.free_space(),
                    "Ring buffer overflow, oldest bytes overwritten"
                );
            }
            self.buffer.append(data);
            self.extract_frames();
        }

        self.listeners.emit(ReaderEvent::ReadyRead);
        (self.stats.frames_extracted - before) as usize
    }

    /// [`process_data`](Self::process_data), then yield once so subscribers on
    /// the same runtime can drain the notifications it produced.
    pub async fn process_data_async(&mut self, data: &[u8]) -> usize {
        let extracted = self.process_data(data);
        tokio::task::yield_now().await;
        extracted
    }

    /// Pop the oldest queued frame.
    pub fn dequeue_frame(&mut self) -> Option<Frame> {
        self.queue.pop_front()
    }

    /// Pop every queued frame, oldest first.
    pub fn dequeue_all(&mut self) -> Vec<Frame> {
        self.queue.drain(..).collect()
    }

    /// Drop every queued frame.
    pub fn clear_queue(&mut self) {
        self.queue.clear();
    }

    /// Number of queued frames.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Ring buffer occupancy.
    pub fn buffer_stats(&self) -> BufferStats {
        self.buffer.stats()
    }

    /// Extraction counters since construction or the last reset.
    pub fn stats(&self) -> ReaderStats {
        self.stats
    }

    /// Drop buffered bytes, queued frames and counters. Configuration,
    /// subscribers and the sequence counter are kept.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.queue.clear();
        self.stats = ReaderStats::default();
    }

    /// Reset and disconnect every subscriber.
    pub fn destroy(&mut self) {
        self.reset();
        self.listeners.clear();
    }

    /// Switch the framing convention. Leaving the configurable mode clears the
    /// checksum algorithm.
    pub fn set_operation_mode(&mut self, mode: OperationMode) {
        self.config.operation_mode = mode;
        if mode != OperationMode::Configurable {
            self.config.checksum_algorithm.clear();
            self.checksum = None;
        }
    }

    /// Switch the boundary detection used in the configurable mode.
    pub fn set_frame_detection(&mut self, detection: FrameDetection) {
        self.config.frame_detection = detection;
    }

    /// Replace the start sequence.
    pub fn set_start_sequence(&mut self, sequence: impl Into<Vec<u8>>) {
        self.config.start_sequence = sequence.into();
    }

    /// Replace the finish sequence.
    pub fn set_finish_sequence(&mut self, sequence: impl Into<Vec<u8>>) {
        self.config.finish_sequence = sequence.into();
    }

    /// Select a checksum by name. Unknown names disable checksum validation.
    pub fn set_checksum_algorithm(&mut self, name: &str) {
        self.config.checksum_algorithm = name.to_string();
        self.checksum = resolve_checksum(name);
    }

    /// Reallocate the ring buffer. Buffered bytes are dropped.
    pub fn set_max_buffer_size(&mut self, size: usize) {
        self.config.max_buffer_size = size;
        self.buffer.set_capacity(size);
        debug!(capacity = self.buffer.capacity(), "Ring buffer reallocated");
    }

    /// Change the queue bound, evicting the oldest frames if it shrinks.
    pub fn set_queue_capacity(&mut self, capacity: usize) {
        self.config.queue_capacity = capacity.max(1);
        while self.queue.len() > self.config.queue_capacity {
            self.evict_oldest();
        }
    }

    /// Apply several settings at once. The operation mode is applied last, so
    /// leaving the configurable mode still clears a checksum set in the same
    /// update.
    pub fn update_config(&mut self, update: FrameReaderConfigUpdate) {
        if let Some(detection) = update.frame_detection {
            self.set_frame_detection(detection);
        }
        if let Some(start) = update.start_sequence {
            self.set_start_sequence(start);
        }
        if let Some(finish) = update.finish_sequence {
            self.set_finish_sequence(finish);
        }
        if let Some(size) = update.max_buffer_size {
            self.set_max_buffer_size(size);
        }
        if let Some(capacity) = update.queue_capacity {
            self.set_queue_capacity(capacity);
        }
        if let Some(name) = update.checksum_algorithm {
            self.set_checksum_algorithm(&name);
        }
        if let Some(mode) = update.operation_mode {
            self.set_operation_mode(mode);
        }
    }

    fn is_passthrough(&self) -> bool {
        self.config.operation_mode == OperationMode::Configurable
            && self.config.frame_detection == FrameDetection::Passthrough
    }

    fn active_checksum(&self) -> Option<ChecksumAlgorithm> {
        match self.config.operation_mode {
            OperationMode::Configurable => self.checksum,
            _ => None,
        }
    }

    fn checksum_len(&self) -> usize {
        self.active_checksum().map_or(0, ChecksumAlgorithm::output_len)
    }

    fn extract_frames(&mut self) {
        match self.config.operation_mode {
            OperationMode::LineOriented => self.read_end_delimited(&LINE_DELIMITERS),
            OperationMode::BraceDelimited => self.read_start_and_end(BRACE_OPEN, BRACE_CLOSE),
            OperationMode::Configurable => {
                let start = self.config.start_sequence.clone();
                let finish = self.config.finish_sequence.clone();
                match self.config.frame_detection {
                    FrameDetection::Passthrough => {}
                    FrameDetection::EndOnly => self.read_end_delimited(&[finish.as_slice()]),
                    FrameDetection::StartOnly => self.read_start_delimited(&start),
                    FrameDetection::StartAndEnd => self.read_start_and_end(&start, &finish),
                }
            }
        }
    }

    /// Earliest match among `delimiters`; on a tie the earlier entry wins.
    fn find_earliest(&self, delimiters: &[&[u8]]) -> Option<(usize, usize)> {
        delimiters
            .iter()
            .filter_map(|d| self.buffer.find_pattern_kmp(d, 0).map(|i| (i, d.len())))
            .fold(None, |best, candidate| match best {
                Some((index, _)) if index <= candidate.0 => best,
                _ => Some(candidate),
            })
    }

    fn read_end_delimited(&mut self, delimiters: &[&[u8]]) {
        while let Some((end, delimiter_len)) = self.find_earliest(delimiters) {
            let crc_position = end + delimiter_len;
            let frame_end = crc_position + self.checksum_len();

            if end == 0 {
                self.discard_malformed(frame_end);
                continue;
            }

            let payload = self.buffer.peek(end);
            match self.validate_checksum(&payload, crc_position) {
                ChecksumStatus::Incomplete => break,
                ChecksumStatus::Mismatch => {
                    self.buffer.discard(frame_end);
                }
                ChecksumStatus::Valid => {
                    self.buffer.discard(frame_end);
                    self.enqueue(Bytes::from(payload));
                }
            }
        }
    }

    fn read_start_delimited(&mut self, start: &[u8]) {
        while let Some(start_index) = self.buffer.find_pattern_kmp(start, 0) {
            let frame_start = start_index + start.len();
            let checksum_len = self.checksum_len();

            let frame_end = match self.buffer.find_pattern_kmp(start, frame_start) {
                Some(next_start) => next_start,
                // Trailing frame: wait until it holds more than a checksum
                None if self.buffer.len() - frame_start <= checksum_len => break,
                None => self.buffer.len(),
            };

            if frame_end < frame_start + checksum_len + 1 {
                self.discard_malformed(frame_end);
                continue;
            }

            let crc_position = frame_end - checksum_len;
            let payload = self
                .buffer
                .peek_range(frame_start, crc_position - frame_start);
            match self.validate_checksum(&payload, crc_position) {
                ChecksumStatus::Incomplete => break,
                ChecksumStatus::Mismatch => {
                    self.buffer.discard(frame_end);
                }
                ChecksumStatus::Valid => {
                    self.buffer.discard(frame_end);
                    self.enqueue(Bytes::from(payload));
                }
            }
        }
    }

    fn read_start_and_end(&mut self, start: &[u8], finish: &[u8]) {
        if start.is_empty() {
            return;
        }
        while let Some(finish_index) = self.buffer.find_pattern_kmp(finish, 0) {
            let crc_position = finish_index + finish.len();

            let start_index = match self.buffer.find_pattern_kmp(start, 0) {
                Some(index) if index < finish_index => index,
                // Finish sequence with no start before it
                _ => {
                    self.discard_malformed(crc_position);
                    continue;
                }
            };

            let frame_start = start_index + start.len();
            let frame_end = crc_position + self.checksum_len();
            if frame_start >= finish_index {
                self.discard_malformed(frame_end);
                continue;
            }

            let payload = self
                .buffer
                .peek_range(frame_start, finish_index - frame_start);
            match self.validate_checksum(&payload, crc_position) {
                ChecksumStatus::Incomplete => break,
                ChecksumStatus::Mismatch => {
                    self.buffer.discard(frame_end);
                }
                ChecksumStatus::Valid => {
                    self.buffer.discard(frame_end);
                    self.enqueue(Bytes::from(payload));
                }
            }
        }
    }

    fn validate_checksum(&mut self, payload: &[u8], crc_position: usize) -> ChecksumStatus {
        let Some(algorithm) = self.active_checksum() else {
            return ChecksumStatus::Valid;
        };
        let len = algorithm.output_len();
        if self.buffer.len() < crc_position + len {
            return ChecksumStatus::Incomplete;
        }

        let received = self.buffer.peek_range(crc_position, len);
        let calculated = algorithm.compute(payload);
        if received == calculated {
            return ChecksumStatus::Valid;
        }

        self.stats.checksum_failures += 1;
        warn!(
            algorithm = %algorithm,
            received = %hex::encode(&received),
            calculated = %hex::encode(&calculated),
            "Checksum mismatch, dropping frame"
        );
        ChecksumStatus::Mismatch
    }

    fn discard_malformed(&mut self, len: usize) {
        self.buffer.discard(len);
        self.stats.frames_discarded += 1;
    }

    fn evict_oldest(&mut self) {
        if let Some(frame) = self.queue.pop_front() {
            self.stats.frames_evicted += 1;
            debug!(sequence = frame.sequence, "Frame queue full, evicted oldest frame");
        }
    }

    fn enqueue(&mut self, data: Bytes) {
        self.sequence += 1;
        let frame = Frame {
            id: NEXT_FRAME_ID.fetch_add(1, Ordering::Relaxed),
            sequence: self.sequence,
            timestamp: Utc::now(),
            data,
        };

        while self.queue.len() >= self.config.queue_capacity.max(1) {
            self.evict_oldest();
        }
        self.queue.push_back(frame.clone());
        self.stats.frames_extracted += 1;
        self.listeners.emit(ReaderEvent::FrameExtracted(frame));
    }
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new(FrameReaderConfig::default())
    }
}

fn resolve_checksum(name: &str) -> Option<ChecksumAlgorithm> {
    ChecksumAlgorithm::from_name(name).ok().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(reader: &mut FrameReader) -> Vec<String> {
        reader.dequeue_all().iter().map(Frame::text).collect()
    }

    fn configurable(detection: FrameDetection, start: &[u8], finish: &[u8]) -> FrameReader {
        FrameReader::new(FrameReaderConfig {
            frame_detection: detection,
            start_sequence: start.to_vec(),
            finish_sequence: finish.to_vec(),
            ..Default::default()
        })
    }

    #[test]
    fn test_end_only_sequences() {
        let mut reader = configurable(FrameDetection::EndOnly, b"", b"\n");
        assert_eq!(reader.process_data(b"a\nb\nc\n"), 3);

        let frames = reader.dequeue_all();
        let seqs: Vec<u64> = frames.iter().map(|f| f.sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(frames[1].data.as_ref(), b"b");
        assert!(frames[0].id < frames[1].id);
    }

    #[test]
    fn test_fragmented_frame_waits_for_delimiter() {
        let mut reader = configurable(FrameDetection::EndOnly, b"", b";;");
        assert_eq!(reader.process_data(b"hel"), 0);
        assert_eq!(reader.process_data(b"lo;"), 0);
        assert_eq!(reader.process_data(b";wor"), 1);
        assert_eq!(texts(&mut reader), vec!["hello"]);
        assert_eq!(reader.buffer_stats().size, 3);
    }

    #[test]
    fn test_passthrough_queues_chunks() {
        let mut reader = configurable(FrameDetection::Passthrough, b"", b"");
        reader.process_data(b"raw\nbytes");
        reader.process_data(b"");
        assert_eq!(texts(&mut reader), vec!["raw\nbytes"]);
        assert_eq!(reader.buffer_stats().size, 0);
    }

    #[test]
    fn test_start_only() {
        let mut reader = configurable(FrameDetection::StartOnly, b"$", b"");
        reader.process_data(b"$a$b$c");
        assert_eq!(texts(&mut reader), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_start_only_waits_on_bare_start() {
        let mut reader = configurable(FrameDetection::StartOnly, b"$", b"");
        reader.process_data(b"$");
        assert_eq!(reader.queue_len(), 0);
        reader.process_data(b"xy$");
        assert_eq!(texts(&mut reader), vec!["xy"]);
    }

    #[test]
    fn test_start_and_end_discards_orphan_finish() {
        let mut reader = configurable(FrameDetection::StartAndEnd, b"<", b">");
        reader.process_data(b"junk><one><two>");
        assert_eq!(texts(&mut reader), vec!["one", "two"]);
        assert_eq!(reader.stats().frames_discarded, 1);
    }

    #[test]
    fn test_line_oriented_earliest_terminator() {
        let mut reader = FrameReader::new(FrameReaderConfig {
            operation_mode: OperationMode::LineOriented,
            ..Default::default()
        });
        reader.process_data(b"t=25.5\r\nh=60\rp=1\n");
        assert_eq!(texts(&mut reader), vec!["t=25.5", "h=60", "p=1"]);
        assert_eq!(reader.buffer_stats().size, 0);
    }

    #[test]
    fn test_brace_delimited_strips_braces() {
        let mut reader = FrameReader::new(FrameReaderConfig {
            operation_mode: OperationMode::BraceDelimited,
            ..Default::default()
        });
        reader.process_data(br#"{"temp":25.5,"hum":60.2}"#);
        assert_eq!(texts(&mut reader), vec![r#""temp":25.5,"hum":60.2"#]);
    }

    #[test]
    fn test_checksum_valid_and_corrupt() {
        let mut reader = configurable(FrameDetection::EndOnly, b"", b"\n");
        reader.set_checksum_algorithm("xor");

        let mut good = b"abc\n".to_vec();
        good.push(b'a' ^ b'b' ^ b'c');
        reader.process_data(&good);
        assert_eq!(texts(&mut reader), vec!["abc"]);

        let mut bad = b"abc\n".to_vec();
        bad.push(0);
        reader.process_data(&bad);
        assert_eq!(reader.queue_len(), 0);
        assert_eq!(reader.stats().checksum_failures, 1);
        assert_eq!(reader.buffer_stats().size, 0);
    }

    #[test]
    fn test_checksum_waits_for_trailing_bytes() {
        let mut reader = configurable(FrameDetection::EndOnly, b"", b"\n");
        reader.set_checksum_algorithm("CRC-16");
        let crc = ChecksumAlgorithm::Crc16.compute(b"data");

        reader.process_data(b"data\n");
        reader.process_data(&crc[..1]);
        assert_eq!(reader.queue_len(), 0);
        reader.process_data(&crc[1..]);
        assert_eq!(texts(&mut reader), vec!["data"]);
    }

    #[test]
    fn test_leaving_configurable_clears_checksum() {
        let mut reader = configurable(FrameDetection::EndOnly, b"", b"\n");
        reader.set_checksum_algorithm("crc32");
        reader.set_operation_mode(OperationMode::LineOriented);
        assert!(reader.config().checksum_algorithm.is_empty());

        reader.set_operation_mode(OperationMode::Configurable);
        reader.process_data(b"plain\n");
        assert_eq!(texts(&mut reader), vec!["plain"]);
    }

    #[test]
    fn test_queue_evicts_oldest() {
        let mut reader = configurable(FrameDetection::EndOnly, b"", b"\n");
        reader.set_queue_capacity(2);
        reader.process_data(b"1\n2\n3\n");

        assert_eq!(reader.queue_len(), 2);
        assert_eq!(reader.stats().frames_evicted, 1);
        assert_eq!(texts(&mut reader), vec!["2", "3"]);
    }

    #[test]
    fn test_reset_keeps_sequence_increasing() {
        let mut reader = configurable(FrameDetection::EndOnly, b"", b"\n");
        reader.process_data(b"a\nb\npartial");
        let before: Vec<u64> = reader.dequeue_all().iter().map(|f| f.sequence).collect();
        assert_eq!(before, vec![1, 2]);

        reader.process_data(b"more\n");
        reader.reset();
        assert_eq!(reader.queue_len(), 0);
        assert_eq!(reader.buffer_stats().size, 0);
        assert_eq!(reader.stats().frames_extracted, 0);

        reader.process_data(b"c\n");
        let after = reader.dequeue_frame().map(|f| f.sequence);
        assert_eq!(after, Some(4));
        assert!(after > before.last().copied());
    }

    #[test]
    fn test_update_config_applies_mode_last() {
        let mut reader = FrameReader::default();
        reader.update_config(FrameReaderConfigUpdate {
            operation_mode: Some(OperationMode::BraceDelimited),
            checksum_algorithm: Some("crc8".to_string()),
            max_buffer_size: Some(64),
            ..Default::default()
        });
        assert!(reader.config().checksum_algorithm.is_empty());
        assert_eq!(reader.buffer_stats().capacity, 64);
    }

    #[test]
    fn test_notifications() {
        let mut reader = configurable(FrameDetection::EndOnly, b"", b"\n");
        let mut rx = reader.subscribe();
        reader.process_data(b"x\n");

        match rx.try_recv().unwrap() {
            ReaderEvent::FrameExtracted(frame) => assert_eq!(frame.data.as_ref(), b"x"),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(rx.try_recv().unwrap(), ReaderEvent::ReadyRead);

        reader.destroy();
        assert!(rx.try_recv().is_err());
    }
}

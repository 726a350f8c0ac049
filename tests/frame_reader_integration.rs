//! End-to-end behaviour of the frame reader over fragmented streams.

use proptest::prelude::*;
use rust_framer::events::ReaderEvent;
use rust_framer::parsing::{
    ChecksumAlgorithm, FrameDetection, FrameReader, FrameReaderConfig, OperationMode,
};
use tracing_test::traced_test;

fn end_only(finish: &[u8]) -> FrameReader {
    FrameReader::new(FrameReaderConfig {
        frame_detection: FrameDetection::EndOnly,
        finish_sequence: finish.to_vec(),
        ..Default::default()
    })
}

fn payloads(reader: &mut FrameReader) -> Vec<Vec<u8>> {
    reader
        .dequeue_all()
        .into_iter()
        .map(|f| f.data.to_vec())
        .collect()
}

/// Feed `stream` split at the given chunk lengths (cycled).
fn feed_in_chunks(reader: &mut FrameReader, stream: &[u8], sizes: &[usize]) {
    let mut rest = stream;
    let mut sizes = sizes.iter().cycle();
    while !rest.is_empty() {
        let n = sizes.next().copied().unwrap_or(rest.len()).clamp(1, rest.len());
        reader.process_data(&rest[..n]);
        rest = &rest[n..];
    }
}

#[test]
fn test_three_lines_get_sequences_one_to_three() {
    let mut reader = end_only(b"\n");
    reader.process_data(b"a\nb\nc\n");

    let frames = reader.dequeue_all();
    let got: Vec<(u64, &[u8])> = frames
        .iter()
        .map(|f| (f.sequence, f.data.as_ref()))
        .collect();
    assert_eq!(
        got,
        vec![(1, &b"a"[..]), (2, &b"b"[..]), (3, &b"c"[..])]
    );
}

#[test]
fn test_crc16_frame_accepted_and_corruption_rejected() {
    let mut reader = end_only(b"\r\n");
    reader.set_checksum_algorithm("CRC-16");

    let payload = b"T=21.4;H=40";
    let mut frame = payload.to_vec();
    frame.extend_from_slice(b"\r\n");
    frame.extend(ChecksumAlgorithm::Crc16.compute(payload));

    reader.process_data(&frame);
    assert_eq!(payloads(&mut reader), vec![payload.to_vec()]);

    let last = frame.len() - 1;
    frame[last] ^= 0xFF;
    reader.process_data(&frame);
    assert_eq!(reader.queue_len(), 0);
    assert_eq!(reader.stats().checksum_failures, 1);
    assert_eq!(reader.buffer_stats().size, 0);
}

#[test]
#[traced_test]
fn test_checksum_mismatch_is_logged() {
    let mut reader = end_only(b"\n");
    reader.set_checksum_algorithm("xor");
    reader.process_data(b"ab\n\x00");

    assert!(logs_contain("Checksum mismatch"));
    assert!(logs_contain("calculated=03"));
}

#[test]
fn test_frame_straddling_ring_wrap_point() {
    let mut reader = FrameReader::new(FrameReaderConfig {
        frame_detection: FrameDetection::StartAndEnd,
        start_sequence: b"<<".to_vec(),
        finish_sequence: b">>".to_vec(),
        max_buffer_size: 16,
        ..Default::default()
    });

    // Advance the ring head so the next frame wraps
    reader.process_data(b"<<0123456>>");
    assert_eq!(payloads(&mut reader), vec![b"0123456".to_vec()]);

    reader.process_data(b"<<abc");
    reader.process_data(b"defg>");
    reader.process_data(b">");
    assert_eq!(payloads(&mut reader), vec![b"abcdefg".to_vec()]);
}

#[test]
fn test_start_and_end_with_checksum_waits_for_trailer() {
    let mut reader = FrameReader::new(FrameReaderConfig {
        frame_detection: FrameDetection::StartAndEnd,
        start_sequence: b"$".to_vec(),
        finish_sequence: b";".to_vec(),
        checksum_algorithm: "crc8".to_string(),
        ..Default::default()
    });
    let crc = ChecksumAlgorithm::Crc8.compute(b"42");

    reader.process_data(b"noise$42;");
    assert_eq!(reader.queue_len(), 0);
    reader.process_data(&crc);
    assert_eq!(payloads(&mut reader), vec![b"42".to_vec()]);
}

#[test]
fn test_start_only_with_checksum_before_next_start() {
    let mut reader = FrameReader::new(FrameReaderConfig {
        frame_detection: FrameDetection::StartOnly,
        start_sequence: b"#".to_vec(),
        checksum_algorithm: "XOR".to_string(),
        ..Default::default()
    });

    let mut stream = b"#ab".to_vec();
    stream.push(b'a' ^ b'b');
    stream.extend_from_slice(b"#cd");
    stream.push(0x00);
    stream.push(b'#');
    reader.process_data(&stream);

    assert_eq!(payloads(&mut reader), vec![b"ab".to_vec()]);
    assert_eq!(reader.stats().checksum_failures, 1);
}

#[test]
fn test_line_mode_ignores_checksum_and_mixed_terminators() {
    let mut reader = FrameReader::new(FrameReaderConfig {
        operation_mode: OperationMode::LineOriented,
        checksum_algorithm: "CRC-32".to_string(),
        ..Default::default()
    });
    reader.process_data(b"one\r");
    reader.process_data(b"\ntwo\nthree\r\n");
    assert_eq!(
        payloads(&mut reader),
        vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]
    );
}

#[test]
fn test_queue_burst_keeps_most_recent_frames() {
    let mut reader = end_only(b"\n");
    reader.set_queue_capacity(4);

    let burst: Vec<u8> = (0..10).flat_map(|i| format!("{}\n", i).into_bytes()).collect();
    assert_eq!(reader.process_data(&burst), 10);

    assert_eq!(reader.queue_len(), 4);
    let frames = reader.dequeue_all();
    let seqs: Vec<u64> = frames.iter().map(|f| f.sequence).collect();
    assert_eq!(seqs, vec![7, 8, 9, 10]);
    assert_eq!(reader.stats().frames_evicted, 6);
}

#[tokio::test]
async fn test_async_processing_delivers_notifications_in_order() {
    let mut reader = end_only(b"\n");
    let mut rx = reader.subscribe();

    let drain = tokio::spawn(async move {
        let mut seen = Vec::new();
        while let Some(event) = rx.recv().await {
            match event {
                ReaderEvent::FrameExtracted(frame) => seen.push(frame.text()),
                ReaderEvent::ReadyRead => seen.push("<ready>".to_string()),
            }
        }
        seen
    });

    assert_eq!(reader.process_data_async(b"x\ny").await, 1);
    assert_eq!(reader.process_data_async(b"\n").await, 1);
    reader.destroy();

    let seen = drain.await.unwrap();
    assert_eq!(seen, vec!["x", "<ready>", "y", "<ready>"]);
}

#[tokio::test]
async fn test_dropped_subscriber_does_not_block_others() {
    let mut reader = end_only(b"\n");
    let dropped = reader.subscribe();
    let mut kept = reader.subscribe();
    drop(dropped);

    reader.process_data_async(b"only\n").await;
    match kept.recv().await {
        Some(ReaderEvent::FrameExtracted(frame)) => assert_eq!(frame.text(), "only"),
        other => panic!("unexpected {other:?}"),
    }
}

proptest! {
    #[test]
    fn prop_fragmentation_does_not_change_frames(
        records in prop::collection::vec("[a-z0-9,.]{1,12}", 1..20),
        sizes in prop::collection::vec(1usize..9, 1..8)
    ) {
        let mut stream = Vec::new();
        for record in &records {
            stream.extend_from_slice(record.as_bytes());
            stream.extend_from_slice(b"\r\n");
        }

        let mut reader = end_only(b"\r\n");
        feed_in_chunks(&mut reader, &stream, &sizes);

        let expected: Vec<Vec<u8>> = records.iter().map(|r| r.as_bytes().to_vec()).collect();
        prop_assert_eq!(payloads(&mut reader), expected);
        prop_assert_eq!(reader.buffer_stats().size, 0);
    }

    #[test]
    fn prop_checksummed_frames_survive_fragmentation(
        records in prop::collection::vec(prop::collection::vec(1u8..=255, 1..16), 1..10),
        sizes in prop::collection::vec(1usize..7, 1..6)
    ) {
        // Payload bytes never contain the 0x00 delimiter
        let mut stream = Vec::new();
        for record in &records {
            stream.extend_from_slice(record);
            stream.push(0x00);
            stream.extend(ChecksumAlgorithm::Crc32.compute(record));
        }

        let mut reader = end_only(&[0x00]);
        reader.set_checksum_algorithm("crc32");
        feed_in_chunks(&mut reader, &stream, &sizes);

        prop_assert_eq!(payloads(&mut reader), records);
        prop_assert_eq!(reader.stats().checksum_failures, 0);
    }

    #[test]
    fn prop_queue_never_exceeds_capacity(
        capacity in 1usize..16,
        count in 0usize..64
    ) {
        let mut reader = end_only(b";");
        reader.set_queue_capacity(capacity);
        let burst = "f;".repeat(count);
        reader.process_data(burst.as_bytes());

        prop_assert!(reader.queue_len() <= capacity);
        prop_assert_eq!(reader.queue_len(), count.min(capacity));
        let seqs: Vec<u64> = reader.dequeue_all().iter().map(|f| f.sequence).collect();
        let expected: Vec<u64> = ((count.saturating_sub(capacity) + 1) as u64..=count as u64).collect();
        prop_assert_eq!(seqs, expected);
    }
}

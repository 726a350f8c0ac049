//! Property tests for the circular buffer against a `VecDeque` model.

use proptest::prelude::*;
use rust_framer::data::CircularBuffer;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
enum Op {
    Append(Vec<u8>),
    Read(usize),
    Discard(usize),
    Clear,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => prop::collection::vec(any::<u8>(), 0..48).prop_map(Op::Append),
        2 => (0usize..40).prop_map(Op::Read),
        2 => (0usize..40).prop_map(Op::Discard),
        1 => Just(Op::Clear),
    ]
}

/// Naive reference search over a plain slice.
fn reference_find(content: &[u8], pattern: &[u8], start: usize) -> Option<usize> {
    if pattern.is_empty() || start >= content.len() || pattern.len() > content.len() {
        return None;
    }
    content[start..]
        .windows(pattern.len())
        .position(|w| w == pattern)
        .map(|i| i + start)
}

/// Buffer whose logical content is `content`, with the head rotated by `shift`
/// so the content straddles the physical end of storage.
fn rotated(content: &[u8], capacity: usize, shift: usize) -> CircularBuffer {
    let mut buffer = CircularBuffer::new(capacity);
    let shift = shift % capacity;
    buffer.append(&vec![0u8; shift]);
    buffer.discard(shift);
    buffer.append(content);
    buffer
}

proptest! {
    #[test]
    fn prop_buffer_matches_deque_model(
        capacity in 1usize..64,
        ops in prop::collection::vec(arb_op(), 0..60)
    ) {
        let mut buffer = CircularBuffer::new(capacity);
        let mut model: VecDeque<u8> = VecDeque::new();

        for op in ops {
            match op {
                Op::Append(bytes) => {
                    buffer.append(&bytes);
                    model.extend(bytes);
                    while model.len() > capacity {
                        model.pop_front();
                    }
                }
                Op::Read(n) => {
                    let expected: Vec<u8> = model.drain(..n.min(model.len())).collect();
                    prop_assert_eq!(buffer.read(n), expected);
                }
                Op::Discard(n) => {
                    let expected = n.min(model.len());
                    model.drain(..expected);
                    prop_assert_eq!(buffer.discard(n), expected);
                }
                Op::Clear => {
                    buffer.clear();
                    model.clear();
                }
            }

            prop_assert_eq!(buffer.len(), model.len());
            prop_assert_eq!(buffer.free_space(), capacity - model.len());
            prop_assert!(buffer.len() <= buffer.capacity());

            let (front, back) = buffer.as_slices();
            let joined: Vec<u8> = front.iter().chain(back).copied().collect();
            let expected: Vec<u8> = model.iter().copied().collect();
            prop_assert_eq!(&joined, &expected);
            prop_assert_eq!(buffer.peek(buffer.len()), expected);
        }
    }

    #[test]
    fn prop_kmp_agrees_with_naive_across_wrap(
        content in prop::collection::vec(0u8..4, 1..64),
        pattern in prop::collection::vec(0u8..4, 1..6),
        shift in 0usize..64,
        start in 0usize..70
    ) {
        let buffer = rotated(&content, content.len(), shift);
        let expected = reference_find(&content, &pattern, start);

        prop_assert_eq!(buffer.find_pattern(&pattern, start), expected);
        prop_assert_eq!(buffer.find_pattern_kmp(&pattern, start), expected);
    }

    #[test]
    fn prop_find_all_lists_every_overlapping_match(
        content in prop::collection::vec(0u8..3, 0..48),
        pattern in prop::collection::vec(0u8..3, 1..4),
        shift in 0usize..48
    ) {
        let capacity = content.len().max(1) + 3;
        let buffer = rotated(&content, capacity, shift);

        let expected: Vec<usize> = if pattern.len() > content.len() {
            Vec::new()
        } else {
            content
                .windows(pattern.len())
                .enumerate()
                .filter(|(_, w)| *w == pattern.as_slice())
                .map(|(i, _)| i)
                .collect()
        };
        prop_assert_eq!(buffer.find_all(&pattern), expected);
    }

    #[test]
    fn prop_oversize_append_keeps_tail(
        capacity in 1usize..32,
        data in prop::collection::vec(any::<u8>(), 0..100)
    ) {
        let mut buffer = CircularBuffer::new(capacity);
        buffer.append(b"seed");
        buffer.append(&data);

        let mut all = b"seed".to_vec();
        all.extend_from_slice(&data);
        let keep = all.len().min(capacity);
        prop_assert_eq!(buffer.peek(capacity), all[all.len() - keep..].to_vec());
    }
}

#[test]
fn test_pattern_straddling_physical_end() {
    // Physical storage "c!ab" with head at 2: logical "abc!"
    let buffer = rotated(b"abc!", 4, 2);
    assert_eq!(buffer.find_pattern_kmp(b"bc", 0), Some(1));
    assert_eq!(buffer.find_pattern(b"c!", 0), Some(2));
    assert_eq!(buffer.peek_range(1, 2), b"bc");
}

#[test]
fn test_degenerate_searches_return_none() {
    let buffer = rotated(b"abc", 8, 0);
    assert_eq!(buffer.find_pattern(b"", 0), None);
    assert_eq!(buffer.find_pattern_kmp(b"abcd", 0), None);
    assert_eq!(buffer.find_pattern_kmp(b"a", 3), None);
    assert!(buffer.find_all(b"z").is_empty());
}

#[test]
fn test_stats_report_utilization() {
    let mut buffer = CircularBuffer::new(8);
    buffer.append(b"abcd");
    let stats = buffer.stats();
    assert_eq!(stats.size, 4);
    assert_eq!(stats.capacity, 8);
    assert_eq!(stats.free_space, 4);
    assert!((stats.utilization - 50.0).abs() < f64::EPSILON);
}

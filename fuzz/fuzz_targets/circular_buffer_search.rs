//! Fuzz target for CircularBuffer pattern search.
//!
//! Tests:
//! - KMP and naive search agree for every start offset
//! - Matches straddling the physical end of storage are found
//! - Content stays equal to a VecDeque model across appends and discards

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rust_framer::data::CircularBuffer;
use std::collections::VecDeque;

#[derive(Debug, Arbitrary)]
struct SearchInput {
    /// Buffer capacity (small to force wrap-around)
    capacity: u8,
    /// Operations applied before searching
    operations: Vec<BufferOp>,
    /// Pattern to look for
    pattern: Vec<u8>,
}

#[derive(Debug, Clone, Arbitrary)]
enum BufferOp {
    Append(Vec<u8>),
    Discard(u8),
}

fuzz_target!(|input: SearchInput| {
    let capacity = usize::from(input.capacity).max(1);
    let mut buffer = CircularBuffer::new(capacity);
    let mut model: VecDeque<u8> = VecDeque::new();

    for op in input.operations.iter().take(64) {
        match op {
            BufferOp::Append(bytes) => {
                buffer.append(bytes);
                model.extend(bytes.iter().copied());
                while model.len() > capacity {
                    model.pop_front();
                }
            }
            BufferOp::Discard(n) => {
                let n = usize::from(*n);
                buffer.discard(n);
                model.drain(..n.min(model.len()));
            }
        }
    }

    let content: Vec<u8> = model.iter().copied().collect();
    assert_eq!(buffer.peek(buffer.len()), content);

    let pattern = &input.pattern[..input.pattern.len().min(8)];
    for start in 0..=content.len() {
        let naive = buffer.find_pattern(pattern, start);
        let kmp = buffer.find_pattern_kmp(pattern, start);
        assert_eq!(naive, kmp, "start {}", start);

        let expected = if pattern.is_empty() || start >= content.len() {
            None
        } else {
            content[start..]
                .windows(pattern.len())
                .position(|w| w == pattern)
                .map(|i| i + start)
        };
        assert_eq!(kmp, expected, "start {}", start);
    }
});

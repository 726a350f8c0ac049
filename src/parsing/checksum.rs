//! Checksum and digest algorithms keyed by free-text names.
//!
//! Names are matched case-insensitively with `-`, `_` and whitespace ignored, so
//! `"CRC-8"`, `"crc8"` and `"CRC_8"` all select the same algorithm. An empty name
//! or `"none"` selects no checksum (zero-length output).
//!
//! | Algorithm   | Bytes | Definition                                        |
//! |-------------|-------|---------------------------------------------------|
//! | XOR         | 1     | running XOR of all bytes                          |
//! | CRC-8       | 1     | poly `0x07`, init `0x00`                          |
//! | CRC-16      | 2     | CCITT poly `0x1021`, init `0x0000`, big-endian    |
//! | CRC-32      | 4     | reflected poly `0xEDB88320`, init/xorout all ones |
//! | Fletcher-16 | 2     | byte sums mod 255, emitted `[sum2, sum1]`         |
//! | Fletcher-32 | 4     | big-endian word sums mod 65535, `[sum2, sum1]`    |
//! | MD5         | 16    |                                                   |
//! | SHA-1       | 20    |                                                   |
//! | SHA-256     | 32    |                                                   |
//!
//! CRC lookup tables are built on first use and shared for the life of the
//! process.

use crate::error::{AppResult, FramerError};
use md5::Md5;
use once_cell::sync::Lazy;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fmt;

/// A supported checksum or digest algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumAlgorithm {
    /// Running exclusive-or
    Xor,
    /// CRC-8, polynomial 0x07
    Crc8,
    /// CRC-16 CCITT (XMODEM parameters)
    Crc16,
    /// CRC-32 (zlib / ISO-HDLC parameters)
    Crc32,
    /// Fletcher-16
    Fletcher16,
    /// Fletcher-32 over big-endian 16-bit words
    Fletcher32,
    /// MD5 digest
    Md5,
    /// SHA-1 digest
    Sha1,
    /// SHA-256 digest
    Sha256,
}

impl ChecksumAlgorithm {
    /// Every supported algorithm, in display order.
    pub const ALL: [ChecksumAlgorithm; 9] = [
        ChecksumAlgorithm::Crc8,
        ChecksumAlgorithm::Crc16,
        ChecksumAlgorithm::Crc32,
        ChecksumAlgorithm::Md5,
        ChecksumAlgorithm::Sha1,
        ChecksumAlgorithm::Sha256,
        ChecksumAlgorithm::Xor,
        ChecksumAlgorithm::Fletcher16,
        ChecksumAlgorithm::Fletcher32,
    ];

    /// Canonical display name.
    pub fn name(self) -> &'static str {
        match self {
            ChecksumAlgorithm::Xor => "XOR",
            ChecksumAlgorithm::Crc8 => "CRC-8",
            ChecksumAlgorithm::Crc16 => "CRC-16",
            ChecksumAlgorithm::Crc32 => "CRC-32",
            ChecksumAlgorithm::Fletcher16 => "Fletcher-16",
            ChecksumAlgorithm::Fletcher32 => "Fletcher-32",
            ChecksumAlgorithm::Md5 => "MD5",
            ChecksumAlgorithm::Sha1 => "SHA-1",
            ChecksumAlgorithm::Sha256 => "SHA-256",
        }
    }

    /// Fixed output length in bytes.
    pub fn output_len(self) -> usize {
        match self {
            ChecksumAlgorithm::Xor | ChecksumAlgorithm::Crc8 => 1,
            ChecksumAlgorithm::Crc16 | ChecksumAlgorithm::Fletcher16 => 2,
            ChecksumAlgorithm::Crc32 | ChecksumAlgorithm::Fletcher32 => 4,
            ChecksumAlgorithm::Md5 => 16,
            ChecksumAlgorithm::Sha1 => 20,
            ChecksumAlgorithm::Sha256 => 32,
        }
    }

    /// Resolve a free-text name.
    ///
    /// Returns `Ok(None)` for an empty name or `"none"`, and
    /// [`FramerError::UnsupportedChecksum`] for anything unrecognised.
    pub fn from_name(name: &str) -> AppResult<Option<Self>> {
        let algorithm = match normalize(name).as_str() {
            "" | "NONE" => return Ok(None),
            "XOR" => ChecksumAlgorithm::Xor,
            "CRC8" => ChecksumAlgorithm::Crc8,
            "CRC16" => ChecksumAlgorithm::Crc16,
            "CRC32" => ChecksumAlgorithm::Crc32,
            "FLETCHER16" => ChecksumAlgorithm::Fletcher16,
            "FLETCHER32" => ChecksumAlgorithm::Fletcher32,
            "MD5" => ChecksumAlgorithm::Md5,
            "SHA1" => ChecksumAlgorithm::Sha1,
            "SHA256" => ChecksumAlgorithm::Sha256,
            _ => return Err(FramerError::UnsupportedChecksum(name.to_string())),
        };
        Ok(Some(algorithm))
    }

    /// Compute the checksum of `data`.
    pub fn compute(self, data: &[u8]) -> Vec<u8> {
        match self {
            ChecksumAlgorithm::Xor => vec![data.iter().fold(0u8, |acc, &b| acc ^ b)],
            ChecksumAlgorithm::Crc8 => vec![crc8(data)],
            ChecksumAlgorithm::Crc16 => crc16(data).to_be_bytes().to_vec(),
            ChecksumAlgorithm::Crc32 => crc32(data).to_be_bytes().to_vec(),
            ChecksumAlgorithm::Fletcher16 => fletcher16(data).to_vec(),
            ChecksumAlgorithm::Fletcher32 => fletcher32(data).to_vec(),
            ChecksumAlgorithm::Md5 => Md5::digest(data).to_vec(),
            ChecksumAlgorithm::Sha1 => Sha1::digest(data).to_vec(),
            ChecksumAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '-' | '_') && !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase()
}

/// Compute a checksum by algorithm name.
///
/// An empty name yields an empty checksum; an unknown name is an error.
pub fn calculate(algorithm: &str, data: &[u8]) -> AppResult<Vec<u8>> {
    Ok(ChecksumAlgorithm::from_name(algorithm)?
        .map(|alg| alg.compute(data))
        .unwrap_or_default())
}

/// Output length for an algorithm name, or 0 if the name is empty or unknown.
pub fn checksum_length(algorithm: &str) -> usize {
    match ChecksumAlgorithm::from_name(algorithm) {
        Ok(Some(alg)) => alg.output_len(),
        _ => 0,
    }
}

/// Recompute and compare. Any failure, including an unknown name, is `false`.
pub fn verify(algorithm: &str, data: &[u8], expected: &[u8]) -> bool {
    calculate(algorithm, data)
        .map(|actual| actual == expected)
        .unwrap_or(false)
}

/// Canonical names of every supported algorithm.
pub fn supported_algorithms() -> Vec<&'static str> {
    ChecksumAlgorithm::ALL.iter().map(|alg| alg.name()).collect()
}

/// True when `name` resolves to a concrete algorithm.
pub fn is_supported(name: &str) -> bool {
    matches!(ChecksumAlgorithm::from_name(name), Ok(Some(_)))
}

static CRC8_TABLE: Lazy<[u8; 256]> = Lazy::new(|| {
    let mut table = [0u8; 256];
    for (i, slot) in table.iter_mut().enumerate() {
        let mut crc = i as u8;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x07
            } else {
                crc << 1
            };
        }
        *slot = crc;
    }
    table
});

static CRC16_TABLE: Lazy<[u16; 256]> = Lazy::new(|| {
    let mut table = [0u16; 256];
    for (i, slot) in table.iter_mut().enumerate() {
        let mut crc = (i as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
        *slot = crc;
    }
    table
});

static CRC32_TABLE: Lazy<[u32; 256]> = Lazy::new(|| {
    let mut table = [0u32; 256];
    for (i, slot) in table.iter_mut().enumerate() {
        let mut crc = i as u32;
        for _ in 0..8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xEDB8_8320
            } else {
                crc >> 1
            };
        }
        *slot = crc;
    }
    table
});

fn crc8(data: &[u8]) -> u8 {
    let table = &*CRC8_TABLE;
    data.iter().fold(0u8, |crc, &b| table[(crc ^ b) as usize])
}

fn crc16(data: &[u8]) -> u16 {
    let table = &*CRC16_TABLE;
    data.iter().fold(0u16, |crc, &b| {
        (crc << 8) ^ table[((crc >> 8) as u8 ^ b) as usize]
    })
}

fn crc32(data: &[u8]) -> u32 {
    let table = &*CRC32_TABLE;
    !data.iter().fold(0xFFFF_FFFFu32, |crc, &b| {
        (crc >> 8) ^ table[((crc as u8) ^ b) as usize]
    })
}

fn fletcher16(data: &[u8]) -> [u8; 2] {
    let (mut sum1, mut sum2) = (0u16, 0u16);
    for &b in data {
        sum1 = (sum1 + u16::from(b)) % 255;
        sum2 = (sum2 + sum1) % 255;
    }
    [sum2 as u8, sum1 as u8]
}

fn fletcher32(data: &[u8]) -> [u8; 4] {
    let (mut sum1, mut sum2) = (0u32, 0u32);
    for chunk in data.chunks(2) {
        let hi = u32::from(chunk[0]);
        let lo = chunk.get(1).copied().map_or(0, u32::from);
        sum1 = (sum1 + ((hi << 8) | lo)) % 65535;
        sum2 = (sum2 + sum1) % 65535;
    }
    let [a, b] = (sum2 as u16).to_be_bytes();
    let [c, d] = (sum1 as u16).to_be_bytes();
    [a, b, c, d]
}

//! Text/byte conversions applied to frame payloads.
//!
//! Decoding never fails: input that cannot be interpreted under the requested
//! method falls back to a lossy UTF-8 reading of the raw bytes.

use crate::error::{AppResult, FramerError};
use base64::{
    alphabet,
    engine::{general_purpose, DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine as _,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a frame payload is turned into text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecoderMethod {
    /// UTF-8 text, passed through
    #[default]
    PlainText,
    /// Pairs of hex digits
    Hexadecimal,
    /// Standard-alphabet base64, padding optional
    Base64,
    /// Comma-separated decimal byte values
    Binary,
}

impl DecoderMethod {
    /// Canonical name, as accepted by [`FromStr`].
    pub fn name(self) -> &'static str {
        match self {
            DecoderMethod::PlainText => "plain-text",
            DecoderMethod::Hexadecimal => "hexadecimal",
            DecoderMethod::Base64 => "base64",
            DecoderMethod::Binary => "binary",
        }
    }
}

impl fmt::Display for DecoderMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DecoderMethod {
    type Err = FramerError;

    fn from_str(s: &str) -> AppResult<Self> {
        let key: String = s
            .chars()
            .filter(|c| !matches!(c, '-' | '_') && !c.is_whitespace())
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "plaintext" | "text" | "plain" => Ok(DecoderMethod::PlainText),
            "hexadecimal" | "hex" => Ok(DecoderMethod::Hexadecimal),
            "base64" => Ok(DecoderMethod::Base64),
            "binary" | "bin" => Ok(DecoderMethod::Binary),
            _ => Err(FramerError::UnsupportedDecoder(s.to_string())),
        }
    }
}

const TOLERANT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

static BASE64_SHAPE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9+/]*={0,2}$").ok());

/// Decode a payload into text.
pub fn decode(data: &[u8], method: DecoderMethod) -> String {
    match method {
        DecoderMethod::PlainText => String::from_utf8_lossy(data).into_owned(),
        DecoderMethod::Hexadecimal => decode_hex(data),
        DecoderMethod::Base64 => decode_base64(data),
        DecoderMethod::Binary => data
            .iter()
            .map(u8::to_string)
            .collect::<Vec<_>>()
            .join(","),
    }
}

fn decode_hex(data: &[u8]) -> String {
    let mut digits: String = data
        .iter()
        .filter(|b| b.is_ascii_hexdigit())
        .map(|&b| b as char)
        .collect();
    if digits.is_empty() {
        return String::from_utf8_lossy(data).into_owned();
    }
    if digits.len() % 2 == 1 {
        digits.insert(0, '0');
    }
    match hex::decode(&digits) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(_) => String::from_utf8_lossy(data).into_owned(),
    }
}

fn decode_base64(data: &[u8]) -> String {
    let compact: Vec<u8> = data
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    match TOLERANT_BASE64.decode(&compact) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(_) => String::from_utf8_lossy(data).into_owned(),
    }
}

/// Encode text into a payload; the inverse of [`decode`].
///
/// Binary encoding drops tokens that are not integers in `0..=255`.
pub fn encode(text: &str, method: DecoderMethod) -> Vec<u8> {
    match method {
        DecoderMethod::PlainText => text.as_bytes().to_vec(),
        DecoderMethod::Hexadecimal => hex::encode(text.as_bytes()).into_bytes(),
        DecoderMethod::Base64 => general_purpose::STANDARD.encode(text.as_bytes()).into_bytes(),
        DecoderMethod::Binary => text
            .split(',')
            .filter_map(|token| token.trim().parse::<i64>().ok())
            .filter_map(|value| u8::try_from(value).ok())
            .collect(),
    }
}

/// Guess which method produced `data`.
///
/// Checked in order: hexadecimal (at least 80% hex digits), base64 (alphabet,
/// padding and length rules), binary (comma-separated byte values), then plain
/// text. Empty input is plain text.
pub fn detect_format(data: &[u8]) -> DecoderMethod {
    let text = String::from_utf8_lossy(data);
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return DecoderMethod::PlainText;
    }

    let hex_digits = compact.chars().filter(char::is_ascii_hexdigit).count();
    if hex_digits * 5 >= compact.chars().count() * 4 {
        return DecoderMethod::Hexadecimal;
    }

    let base64_shaped = BASE64_SHAPE
        .as_ref()
        .is_some_and(|re| re.is_match(&compact));
    if base64_shaped && compact.len() % 4 == 0 {
        return DecoderMethod::Base64;
    }

    let tokens: Vec<&str> = text.trim().split(',').collect();
    if tokens.len() >= 2 && tokens.iter().all(|t| t.trim().parse::<u8>().is_ok()) {
        return DecoderMethod::Binary;
    }

    DecoderMethod::PlainText
}

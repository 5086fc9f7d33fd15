//! Command payloads supplied by callers.
//!
//! Payloads arrive either as a hex string (typed by a user) or as raw
//! bytes (produced by the encoder). Both are normalised to `Bytes` once,
//! at the API boundary.

use bytes::Bytes;

use crate::error::EpdError;

/// A caller-supplied payload before normalisation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Hex(String),
    Bytes(Bytes),
}

impl Payload {
    /// Normalise to raw bytes.
    ///
    /// Hex strings have all whitespace stripped; an odd number of digits
    /// is left-padded with a single `0`.
    pub fn into_bytes(self) -> Result<Bytes, EpdError> {
        match self {
            Payload::Bytes(b) => Ok(b),
            Payload::Hex(s) => parse_hex(&s),
        }
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Hex(s.to_owned())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Hex(s)
    }
}

impl From<Bytes> for Payload {
    fn from(b: Bytes) -> Self {
        Payload::Bytes(b)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(v: Vec<u8>) -> Self {
        Payload::Bytes(Bytes::from(v))
    }
}

impl From<&[u8]> for Payload {
    fn from(v: &[u8]) -> Self {
        Payload::Bytes(Bytes::copy_from_slice(v))
    }
}

pub fn parse_hex(input: &str) -> Result<Bytes, EpdError> {
    let mut digits: Vec<u8> = Vec::with_capacity(input.len() + 1);
    for c in input.chars().filter(|c| !c.is_whitespace()) {
        let nibble = c
            .to_digit(16)
            .ok_or_else(|| EpdError::InvalidHex(input.to_owned()))?;
        digits.push(nibble as u8);
    }
    if digits.len() % 2 == 1 {
        digits.insert(0, 0);
    }
    Ok(digits
        .chunks_exact(2)
        .map(|pair| (pair[0] << 4) | pair[1])
        .collect())
}

/// Lowercase hex rendering used in frame logs.
pub fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_strips_whitespace() {
        let b = Payload::from("01 02\n0a\tFF").into_bytes().unwrap();
        assert_eq!(b.as_ref(), &[0x01, 0x02, 0x0A, 0xFF]);
    }

    #[test]
    fn odd_length_left_padded() {
        assert_eq!(parse_hex("abc").unwrap().as_ref(), &[0x0A, 0xBC]);
        assert_eq!(parse_hex("5").unwrap().as_ref(), &[0x05]);
    }

    #[test]
    fn rejects_non_hex() {
        assert!(matches!(parse_hex("0g"), Err(EpdError::InvalidHex(_))));
        assert!(parse_hex("0x12").is_err());
    }

    #[test]
    fn empty_is_empty() {
        assert!(parse_hex("   ").unwrap().is_empty());
    }

    #[test]
    fn bytes_pass_through() {
        let p = Payload::from(vec![1u8, 2, 3]);
        assert_eq!(p.into_bytes().unwrap().as_ref(), &[1, 2, 3]);
    }

    #[test]
    fn renders_lowercase() {
        assert_eq!(to_hex(&[0x30, 0xAB, 0x00]), "30ab00");
    }
}

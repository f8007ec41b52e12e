//! Binary payload codec for encoded sub-commands
//!
//! Encoded sub-commands carry their instruction bytes as text using the
//! standard base64 alphabet:
//! ```text
//! b64:<A-Z a-z 0-9 + />...[=]
//! ```
//!
//! Decoding consumes 6 bits per symbol and emits a byte whenever 8 or more
//! bits are buffered. The first `=` ends the payload.
//!
//! The default [`Leniency::SkipInvalid`] mode skips symbols outside the
//! alphabet instead of failing; [`Leniency::Strict`] rejects them.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// The standard base64 alphabet
const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Terminates the payload; anything after it is ignored
const PAD: char = '=';

/// How the decoder treats symbols outside the alphabet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Leniency {
    /// Skip unknown symbols and keep decoding
    #[default]
    SkipInvalid,
    /// Fail on the first unknown symbol
    Strict,
}

/// Errors that can occur while decoding a payload
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("Invalid symbol {symbol:?} at offset {offset}")]
    InvalidSymbol { symbol: char, offset: usize },

    #[error("Payload decoded to zero bytes")]
    Empty,
}

fn symbol_value(c: char) -> Option<u32> {
    if !c.is_ascii() {
        return None;
    }
    ALPHABET
        .iter()
        .position(|&b| b == c as u8)
        .map(|i| i as u32)
}

/// Decode a payload, reporting why nothing usable came out
pub fn try_decode(encoded: &str, leniency: Leniency) -> Result<Bytes, CodecError> {
    let mut out = BytesMut::with_capacity(encoded.len() * 3 / 4 + 1);
    let mut acc: u32 = 0;
    let mut bits: i32 = -8;

    for (offset, c) in encoded.char_indices() {
        if c == PAD {
            break;
        }

        let value = match symbol_value(c) {
            Some(v) => v,
            None if leniency == Leniency::Strict => {
                return Err(CodecError::InvalidSymbol { symbol: c, offset });
            }
            None => continue,
        };

        acc = (acc << 6) | value;
        bits += 6;

        if bits >= 0 {
            out.put_u8(((acc >> bits) & 0xFF) as u8);
            bits -= 8;
        }
    }

    if out.is_empty() {
        return Err(CodecError::Empty);
    }

    Ok(out.freeze())
}

/// Decode a payload
///
/// Returns `None` when the output is empty (or, in strict mode, invalid);
/// callers treat that as "skip this sub-command".
pub fn decode(encoded: &str, leniency: Leniency) -> Option<Bytes> {
    try_decode(encoded, leniency).ok()
}

/// Encode bytes with the standard alphabet and `=` padding
pub fn encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_known_vector() {
        let decoded = decode("aGVsbG8=", Leniency::SkipInvalid).expect("should decode");
        assert_eq!(&decoded[..], b"hello");
    }

    #[test]
    fn test_decode_without_padding() {
        let decoded = decode("aGk", Leniency::SkipInvalid).expect("should decode");
        assert_eq!(&decoded[..], b"hi");
    }

    #[test]
    fn test_pad_terminates_payload() {
        // Everything after the first '=' is ignored
        let decoded = decode("aGk=aGVsbG8", Leniency::SkipInvalid).expect("should decode");
        assert_eq!(&decoded[..], b"hi");
    }

    #[test]
    fn test_lenient_skips_invalid_symbols() {
        let decoded = decode("aG!V*sb G8", Leniency::SkipInvalid).expect("should decode");
        assert_eq!(&decoded[..], b"hello");
    }

    #[test]
    fn test_strict_rejects_invalid_symbols() {
        let err = try_decode("aG!V", Leniency::Strict).unwrap_err();
        assert_eq!(err, CodecError::InvalidSymbol { symbol: '!', offset: 2 });
        assert!(decode("aG!V", Leniency::Strict).is_none());
    }

    #[test]
    fn test_all_invalid_decodes_to_nothing() {
        assert_eq!(try_decode("!!!", Leniency::SkipInvalid), Err(CodecError::Empty));
        assert!(decode("!!!", Leniency::SkipInvalid).is_none());
    }

    #[test]
    fn test_single_symbol_is_not_a_byte() {
        // 6 bits are not enough to emit a byte
        assert!(decode("Q", Leniency::SkipInvalid).is_none());
        assert!(decode("", Leniency::SkipInvalid).is_none());
    }

    #[test]
    fn test_signed_parameter_bytes_survive() {
        // Token 'I' followed by joint 0 at -30 degrees
        let raw = [b'I', 0, (-30i8) as u8];
        let text = encode(&raw);
        assert_eq!(text, "SQDi");

        let decoded = decode(&text, Leniency::Strict).expect("should decode");
        assert_eq!(&decoded[..], &raw);
    }

    #[test]
    fn test_encode_padding() {
        assert_eq!(encode(b"h"), "aA==");
        assert_eq!(encode(b"hi"), "aGk=");
        assert_eq!(encode(b"hello"), "aGVsbG8=");
    }

    #[test]
    fn test_encoder_output_decodes_strictly() {
        // Every byte value, at every padding length
        let all: Vec<u8> = (0..=255u8).collect();
        for len in [1, 2, 3, 254, 255, 256] {
            let text = encode(&all[..len]);
            let decoded = try_decode(&text, Leniency::Strict).expect("should decode");
            assert_eq!(&decoded[..], &all[..len], "length {len}");
        }
    }
}

//! Word-level codecs: register words to integers, floats and strings.
//!
//! The wire default is big-endian byte and word order. Swap flags correct
//! devices that deviate: `bytes` swaps within each 16-bit word, `words`
//! reverses the word order of the whole payload.

use crate::error::{DomainError, Result};
use crate::register::{DataType, SwapMode, TextEncoding};

/// Raw interpretation of a register payload before transforms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawNumber {
    Unsigned(u64),
    Signed(i64),
    Float(f64),
}

impl RawNumber {
    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Unsigned(v) => *v as f64,
            Self::Signed(v) => *v as f64,
            Self::Float(v) => *v,
        }
    }

    /// Bit pattern for bit operations and symbolic lookup; floats have none.
    pub fn bits(&self) -> Option<u64> {
        match self {
            Self::Unsigned(v) => Some(*v),
            Self::Signed(v) => Some(*v as u64),
            Self::Float(_) => None,
        }
    }
}

/// Arrange payload words into value byte order, honoring swap flags.
fn words_to_bytes(words: &[u16], swap: SwapMode) -> Vec<u8> {
    let mut ordered: Vec<u16> = words.to_vec();
    if swap.words {
        ordered.reverse();
    }
    let mut bytes = Vec::with_capacity(ordered.len() * 2);
    for w in ordered {
        let [hi, lo] = w.to_be_bytes();
        if swap.bytes {
            bytes.push(lo);
            bytes.push(hi);
        } else {
            bytes.push(hi);
            bytes.push(lo);
        }
    }
    bytes
}

/// Inverse of `words_to_bytes`: value bytes back to wire words.
fn bytes_to_words(bytes: &[u8], swap: SwapMode) -> Vec<u16> {
    let mut words: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| {
            if swap.bytes {
                u16::from_be_bytes([c[1], c[0]])
            } else {
                u16::from_be_bytes([c[0], c[1]])
            }
        })
        .collect();
    if swap.words {
        words.reverse();
    }
    words
}

fn take<const N: usize>(bytes: &[u8]) -> Result<[u8; N]> {
    bytes[..N]
        .try_into()
        .map_err(|_| DomainError::Protocol("truncated payload".into()))
}

/// Decode a numeric/bool payload. The slice may be longer than the type
/// needs (a group reply); only the leading words are consumed.
pub fn decode_raw(words: &[u16], data_type: DataType, swap: SwapMode) -> Result<RawNumber> {
    let needed = data_type.default_word_count() as usize;
    if words.len() < needed {
        return Err(DomainError::Protocol(format!(
            "short reply: got {} words, need {}",
            words.len(),
            needed
        )));
    }
    let bytes = words_to_bytes(&words[..needed], swap);
    let raw = match data_type {
        DataType::Uint16 => RawNumber::Unsigned(u16::from_be_bytes(take::<2>(&bytes)?) as u64),
        DataType::Int16 => RawNumber::Signed(i16::from_be_bytes(take::<2>(&bytes)?) as i64),
        DataType::Uint32 => RawNumber::Unsigned(u32::from_be_bytes(take::<4>(&bytes)?) as u64),
        DataType::Int32 => RawNumber::Signed(i32::from_be_bytes(take::<4>(&bytes)?) as i64),
        DataType::Uint64 => RawNumber::Unsigned(u64::from_be_bytes(take::<8>(&bytes)?)),
        DataType::Int64 => RawNumber::Signed(i64::from_be_bytes(take::<8>(&bytes)?)),
        DataType::Float32 => RawNumber::Float(f32::from_be_bytes(take::<4>(&bytes)?) as f64),
        DataType::Float64 => RawNumber::Float(f64::from_be_bytes(take::<8>(&bytes)?)),
        // Bool keeps the full word pattern; bit ops may still select a bit
        // before the truthiness collapse.
        DataType::Bool => RawNumber::Unsigned(u16::from_be_bytes(take::<2>(&bytes)?) as u64),
        DataType::String => {
            return Err(DomainError::Value("string payload has no numeric form".into()));
        }
    };
    Ok(raw)
}

/// Encode a raw (already inverse-transformed) numeric value into wire words.
pub fn encode_raw(raw: f64, data_type: DataType, swap: SwapMode) -> Result<Vec<u16>> {
    let bytes = match data_type {
        DataType::Uint16 => (int_in_range(raw, 0.0, u16::MAX as f64, data_type)? as u16)
            .to_be_bytes()
            .to_vec(),
        DataType::Int16 => (int_in_range(raw, i16::MIN as f64, i16::MAX as f64, data_type)? as i16)
            .to_be_bytes()
            .to_vec(),
        DataType::Uint32 => (int_in_range(raw, 0.0, u32::MAX as f64, data_type)? as u32)
            .to_be_bytes()
            .to_vec(),
        DataType::Int32 => (int_in_range(raw, i32::MIN as f64, i32::MAX as f64, data_type)? as i32)
            .to_be_bytes()
            .to_vec(),
        DataType::Uint64 => (int_in_range(raw, 0.0, u64::MAX as f64, data_type)? as u64)
            .to_be_bytes()
            .to_vec(),
        DataType::Int64 => (int_in_range(raw, i64::MIN as f64, i64::MAX as f64, data_type)? as i64)
            .to_be_bytes()
            .to_vec(),
        DataType::Float32 => (raw as f32).to_be_bytes().to_vec(),
        DataType::Float64 => raw.to_be_bytes().to_vec(),
        DataType::Bool => ((raw != 0.0) as u16).to_be_bytes().to_vec(),
        DataType::String => {
            return Err(DomainError::Value("string registers are read-only".into()));
        }
    };
    Ok(bytes_to_words(&bytes, swap))
}

fn int_in_range(raw: f64, min: f64, max: f64, data_type: DataType) -> Result<f64> {
    let rounded = raw.round();
    if !rounded.is_finite() || rounded < min || rounded > max {
        return Err(DomainError::Value(format!(
            "{raw} does not fit {data_type:?}"
        )));
    }
    Ok(rounded)
}

/// Decode a string payload with NUL padding and surrounding whitespace
/// trimmed.
pub fn decode_string(words: &[u16], swap: SwapMode, encoding: TextEncoding) -> String {
    let mut bytes = words_to_bytes(words, swap);
    if encoding == TextEncoding::Ascii {
        bytes.retain(|b| b.is_ascii());
    }
    String::from_utf8_lossy(&bytes)
        .trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uint16_identity() {
        let raw = decode_raw(&[0x1234], DataType::Uint16, SwapMode::default()).unwrap();
        assert_eq!(raw, RawNumber::Unsigned(0x1234));
    }

    #[test]
    fn test_int16_sign_extension() {
        let raw = decode_raw(&[0xFFFE], DataType::Int16, SwapMode::default()).unwrap();
        assert_eq!(raw, RawNumber::Signed(-2));
    }

    #[test]
    fn test_uint32_word_swap() {
        // Big-endian 0x00010002 arrives low word first on word-swapped devices.
        let raw = decode_raw(&[0x0002, 0x0001], DataType::Uint32, SwapMode::word()).unwrap();
        assert_eq!(raw, RawNumber::Unsigned(0x0001_0002));
    }

    #[test]
    fn test_byte_swap_within_words() {
        let raw = decode_raw(&[0x3412], DataType::Uint16, SwapMode::byte()).unwrap();
        assert_eq!(raw, RawNumber::Unsigned(0x1234));
    }

    #[test]
    fn test_float32_big_endian() {
        let words = {
            let b = 12.5f32.to_be_bytes();
            [u16::from_be_bytes([b[0], b[1]]), u16::from_be_bytes([b[2], b[3]])]
        };
        let raw = decode_raw(&words, DataType::Float32, SwapMode::default()).unwrap();
        assert_eq!(raw, RawNumber::Float(12.5));
    }

    #[test]
    fn test_short_reply_is_protocol_error() {
        let err = decode_raw(&[0x0001], DataType::Uint32, SwapMode::default()).unwrap_err();
        assert!(matches!(err, DomainError::Protocol(_)));
    }

    #[test]
    fn test_encode_range_check() {
        assert!(encode_raw(70000.0, DataType::Uint16, SwapMode::default()).is_err());
        assert!(encode_raw(-1.0, DataType::Uint16, SwapMode::default()).is_err());
        assert!(encode_raw(-1.0, DataType::Int16, SwapMode::default()).is_ok());
    }

    #[test]
    fn test_string_trims_nul_padding() {
        // "SH10RT" padded with NULs.
        let words = [0x5348, 0x3130, 0x5254, 0x0000, 0x0000];
        assert_eq!(
            decode_string(&words, SwapMode::default(), TextEncoding::Utf8),
            "SH10RT"
        );
    }

    #[test]
    fn test_ascii_encoding_drops_high_bytes() {
        // 0xFF41 = high byte + 'A'.
        let words = [0xFF41, 0x4200];
        assert_eq!(
            decode_string(&words, SwapMode::default(), TextEncoding::Ascii),
            "AB"
        );
    }

    #[test]
    fn test_roundtrip_with_swaps() {
        for swap in [
            SwapMode::default(),
            SwapMode::byte(),
            SwapMode::word(),
            SwapMode { bytes: true, words: true },
        ] {
            let words = encode_raw(-123456.0, DataType::Int32, swap).unwrap();
            let raw = decode_raw(&words, DataType::Int32, swap).unwrap();
            assert_eq!(raw, RawNumber::Signed(-123456), "swap {swap:?}");
        }
    }
}

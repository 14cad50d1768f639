// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the mbslave-api project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Conversion between stored values and Modbus words
//!
//! Every tag value is stored as an `f64`. On the wire it occupies one, two or four
//! 16-bit words depending on its [`DataType`]. Multi-word values are ordered low word
//! first; the byte order inside each word is big-endian and handled by the transport.
//!
//! | type      | words | encoding                                         |
//! |-----------|-------|--------------------------------------------------|
//! | `float32` | 2     | IEEE-754 single, low half first                  |
//! | `float64` | 4     | IEEE-754 double, four ascending 16-bit chunks    |
//! | `int16`   | 1     | truncated toward zero, two's-complement wrapped  |
//! | `uint16`  | 1     | truncated toward zero, wrapped to 16 bits        |
//! | `digital` | 1     | the value as a plain word                        |

use super::datatype::DataType;
use super::error::RegisterError;

/// Number of 16-bit words a value of `data_type` occupies
pub fn words_required(data_type: DataType) -> u16 {
    match data_type {
        DataType::Float32 => 2,
        DataType::Float64 => 4,
        DataType::Int16 | DataType::Uint16 | DataType::Digital => 1,
    }
}

/// Encode a stored value into its register words, low word first
pub fn encode(data_type: DataType, value: f64) -> Vec<u16> {
    match data_type {
        DataType::Float32 => {
            let bits = (value as f32).to_bits();
            vec![(bits & 0xFFFF) as u16, (bits >> 16) as u16]
        }
        DataType::Float64 => {
            let bits = value.to_bits();
            (0..4).map(|chunk| (bits >> (16 * chunk)) as u16).collect()
        }
        DataType::Int16 => vec![(value as i64) as i16 as u16],
        DataType::Uint16 | DataType::Digital => vec![(value as i64) as u16],
    }
}

/// Decode register words (low word first) into a stored value
///
/// Only the first [`words_required`] words are consumed.
///
/// # Errors
///
/// Returns [`RegisterError::WordsExhausted`] when fewer words are supplied than the
/// type needs.
pub fn decode(data_type: DataType, words: &[u16]) -> Result<f64, RegisterError> {
    let needed = words_required(data_type);
    if words.len() < needed as usize {
        return Err(RegisterError::WordsExhausted {
            needed,
            available: words.len(),
        });
    }

    let value = match data_type {
        DataType::Float32 => {
            let bits = u32::from(words[0]) | (u32::from(words[1]) << 16);
            f64::from(f32::from_bits(bits))
        }
        DataType::Float64 => {
            let bits = words[..4]
                .iter()
                .enumerate()
                .fold(0u64, |acc, (chunk, word)| {
                    acc | (u64::from(*word) << (16 * chunk))
                });
            f64::from_bits(bits)
        }
        DataType::Int16 => f64::from(words[0] as i16),
        DataType::Uint16 | DataType::Digital => f64::from(words[0]),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const ALL_TYPES: [DataType; 5] = [
        DataType::Float32,
        DataType::Float64,
        DataType::Int16,
        DataType::Uint16,
        DataType::Digital,
    ];

    #[test]
    fn test_encoded_width_matches_words_required() {
        for data_type in ALL_TYPES {
            for value in [0.0, 1.0, -1.0, 123.456, 65535.0] {
                assert_eq!(
                    encode(data_type, value).len(),
                    words_required(data_type) as usize,
                    "{data_type} width mismatch for {value}"
                );
            }
        }
    }

    #[test]
    fn test_float32_low_word_first() {
        // 100.0f32 == 0x42C8_0000
        assert_eq!(encode(DataType::Float32, 100.0), vec![0x0000, 0x42C8]);
        assert_eq!(decode(DataType::Float32, &[0x0000, 0x42C8]).unwrap(), 100.0);
    }

    #[test]
    fn test_float64_ascending_chunks() {
        // 1.0f64 == 0x3FF0_0000_0000_0000
        assert_eq!(
            encode(DataType::Float64, 1.0),
            vec![0x0000, 0x0000, 0x0000, 0x3FF0]
        );
    }

    #[test]
    fn test_float_round_trips() {
        for value in [0.0, 100.0, -3.5, 1123.4, 200.1234] {
            let words = encode(DataType::Float32, value);
            assert_relative_eq!(
                decode(DataType::Float32, &words).unwrap(),
                value,
                max_relative = 1e-6
            );

            let words = encode(DataType::Float64, value);
            assert_eq!(decode(DataType::Float64, &words).unwrap(), value);
        }
    }

    #[test]
    fn test_int16_round_trip_keeps_sign() {
        for value in [i16::MIN, -1, 0, 1, i16::MAX] {
            let words = encode(DataType::Int16, f64::from(value));
            assert_eq!(decode(DataType::Int16, &words).unwrap(), f64::from(value));
        }
        assert_eq!(encode(DataType::Int16, -1.0), vec![0xFFFF]);
    }

    #[test]
    fn test_uint16_round_trip() {
        for value in [0u16, 1, 4242, u16::MAX] {
            let words = encode(DataType::Uint16, f64::from(value));
            assert_eq!(decode(DataType::Uint16, &words).unwrap(), f64::from(value));
        }
    }

    #[test]
    fn test_integer_types_truncate() {
        assert_eq!(encode(DataType::Uint16, 12.9), vec![12]);
        assert_eq!(encode(DataType::Int16, -12.9), vec![(-12i16) as u16]);
        assert_eq!(encode(DataType::Uint16, 65536.0), vec![0]);
    }

    #[test]
    fn test_digital_is_plain_word() {
        assert_eq!(encode(DataType::Digital, 5.0), vec![5]);
        assert_eq!(decode(DataType::Digital, &[1]).unwrap(), 1.0);
    }

    #[test]
    fn test_decode_short_slice_fails() {
        assert!(matches!(
            decode(DataType::Float64, &[1, 2, 3]),
            Err(RegisterError::WordsExhausted {
                needed: 4,
                available: 3
            })
        ));
        assert!(decode(DataType::Uint16, &[]).is_err());
    }
}

//! Character encoding table shared by the machine and its surroundings.
//!
//! Every character literal, string-variable initializer, staged input byte,
//! and output-buffer entry goes through this table. The table is the identity
//! over Unicode scalar values: a character encodes to its code point, and a
//! code decodes back to the same character. The empty character literal `''`
//! encodes to [`EMPTY`].

use thiserror::Error;

/// Code produced by the empty character literal `''`.
pub const EMPTY: i32 = 0;

/// Encode a character to its integer code.
#[inline]
pub fn encode(c: char) -> i32 {
    c as i32
}

/// Decode an integer code back to its character.
///
/// Fails for codes no character carries (negative values, surrogates,
/// values past the last scalar value).
pub fn decode(code: i32) -> Result<char, CharsetError> {
    u32::try_from(code)
        .ok()
        .and_then(char::from_u32)
        .ok_or(CharsetError::InvalidCode(code))
}

/// Errors raised by the encoding table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CharsetError {
    #[error("no character has code {0}")]
    InvalidCode(i32),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_ascii_codes() {
        assert_eq!(encode('H'), 72);
        assert_eq!(encode('I'), 73);
        assert_eq!(decode(72).unwrap(), 'H');
    }

    #[test]
    fn test_empty_literal_code() {
        assert_eq!(EMPTY, 0);
        assert_eq!(decode(EMPTY).unwrap(), '\0');
    }

    #[test]
    fn test_invalid_codes() {
        assert_eq!(decode(-1), Err(CharsetError::InvalidCode(-1)));
        assert!(decode(0xD800).is_err());
        assert!(decode(0x110000).is_err());
    }

    proptest! {
        #[test]
        fn roundtrip_any_char(c in any::<char>()) {
            prop_assert_eq!(decode(encode(c)).unwrap(), c);
        }
    }
}

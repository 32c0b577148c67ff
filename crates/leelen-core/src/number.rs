//! LEELEN phone numbers: `BBBB-RRRR` (block-room) or `BBBB-RRRR-E` (with a
//! one-digit extension). Parsing accepts any non-digit separator and an
//! omitted block supplied by a *base* number; equality and canonical
//! rendering always use `-`.

use std::fmt;

/// A parsed LEELEN phone number, always held in normalised `block`/`room`
/// form plus an optional single-digit extension.
#[derive(Debug, Clone, Copy, Eq)]
pub struct LeelenNumber {
    block: u16,
    room: u16,
    extension: Option<u8>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone, Copy)]
pub enum NumberError {
    #[error("phone number is empty or does not start with a digit")]
    NotADigitStart,
    #[error("phone number has too many separators")]
    TooManySeparators,
    #[error("phone number ends with a separator")]
    TrailingSeparator,
    #[error("block or room part is longer than 4 digits")]
    PartTooLong,
    #[error("phone number needs a base number to resolve the block part")]
    MissingBase,
    #[error("phone number has an invalid length")]
    InvalidLength,
}

impl LeelenNumber {
    /// Parse a phone number. `base` supplies the block when `src` specifies
    /// only a room (and optional extension).
    pub fn parse(src: &str, base: Option<&LeelenNumber>) -> Result<Self, NumberError> {
        if src.is_empty() || !src.as_bytes()[0].is_ascii_digit() {
            return Err(NumberError::NotADigitStart);
        }

        let mut seps = Vec::with_capacity(2);
        for (i, c) in src.char_indices() {
            if !c.is_ascii_digit() {
                seps.push(i);
                if seps.len() > 2 {
                    return Err(NumberError::TooManySeparators);
                }
            }
        }
        if let Some(&last) = seps.last() {
            if last == src.len() - 1 {
                return Err(NumberError::TrailingSeparator);
            }
        }

        let (block_str, room_str, extension) = match seps.len() {
            2 => {
                let (s0, s1) = (seps[0], seps[1]);
                if s1 == s0 + 1 {
                    return Err(NumberError::InvalidLength);
                }
                if s1 + 2 != src.len() {
                    return Err(NumberError::InvalidLength);
                }
                let ext = src[s1 + 1..].chars().next().unwrap();
                let block = &src[..s0];
                let room = &src[s0 + 1..s1];
                if block.len() > 4 || room.len() > 4 {
                    return Err(NumberError::PartTooLong);
                }
                (block.to_string(), room.to_string(), Some(ext))
            }
            1 => {
                let s0 = seps[0];
                if s0 + 2 != src.len() {
                    // block-room, no extension
                    let block = &src[..s0];
                    let room = &src[s0 + 1..];
                    if block.len() > 4 || room.len() > 4 {
                        return Err(NumberError::PartTooLong);
                    }
                    (block.to_string(), room.to_string(), None)
                } else {
                    let ext = src[s0 + 1..].chars().next().unwrap();
                    let digits = &src[..s0];
                    return Self::from_digit_run(digits, Some(ext), base);
                }
            }
            0 => return Self::from_digit_run(src, None, base),
            _ => unreachable!("more than 2 separators already rejected"),
        };

        let block: u16 = block_str.parse().unwrap_or(0);
        let room: u16 = room_str.parse().unwrap_or(0);
        let extension = extension.map(|c| c as u8 - b'0');
        Ok(LeelenNumber {
            block,
            room,
            extension,
        })
    }

    /// Shared tail of `parse` for the unseparated-digits cases: `room`,
    /// `room+extension`, `blockroom` and `blockroom+extension`.
    fn from_digit_run(
        digits: &str,
        forced_ext: Option<char>,
        base: Option<&LeelenNumber>,
    ) -> Result<Self, NumberError> {
        let len = digits.len();
        let (block, room, extension) = match (len, forced_ext) {
            (1..=4, None) => {
                let base = base.ok_or(NumberError::MissingBase)?;
                (base.block, digits.parse().unwrap_or(0), None)
            }
            (1..=4, Some(ext)) => {
                let base = base.ok_or(NumberError::MissingBase)?;
                (base.block, digits.parse().unwrap_or(0), Some(ext))
            }
            (5, None) => {
                let base = base.ok_or(NumberError::MissingBase)?;
                let (room_digits, ext) = digits.split_at(4);
                (
                    base.block,
                    room_digits.parse().unwrap_or(0),
                    ext.chars().next(),
                )
            }
            (8, ext @ (None | Some(_))) => {
                let (block_digits, room_digits) = digits.split_at(4);
                (
                    block_digits.parse().unwrap_or(0),
                    room_digits.parse().unwrap_or(0),
                    ext,
                )
            }
            (9, None) => {
                let (block_digits, rest) = digits.split_at(4);
                let (room_digits, ext) = rest.split_at(4);
                (
                    block_digits.parse().unwrap_or(0),
                    room_digits.parse().unwrap_or(0),
                    ext.chars().next(),
                )
            }
            _ => return Err(NumberError::InvalidLength),
        };
        Ok(LeelenNumber {
            block,
            room,
            extension: extension.map(|c| c as u8 - b'0'),
        })
    }

    pub fn has_extension(&self) -> bool {
        self.extension.is_some()
    }

    pub fn extension(&self) -> Option<u8> {
        self.extension
    }

    pub fn block(&self) -> u16 {
        self.block
    }

    pub fn room(&self) -> u16 {
        self.room
    }

    /// `true` if `request`'s first 9 canonical characters match this
    /// number's — the "reply match" rule used by discovery.
    pub fn should_reply(&self, request: &str) -> bool {
        let canonical = self.to_string();
        let prefix_len = 9.min(canonical.len()).min(request.len());
        if canonical.len() < 9 || request.len() < 9 {
            return false;
        }
        canonical.as_bytes()[..prefix_len] == request.as_bytes()[..prefix_len]
    }

    /// Pack into the 32-bit integer form used internally (14 bits block, 14
    /// bits room, 4 bits extension; `0xf` marks "no extension").
    pub fn to_packed_u32(&self) -> u32 {
        let ext = self.extension.unwrap_or(0xf) as u32 & 0xf;
        (u32::from(self.block) & 0x3fff)
            | ((u32::from(self.room) & 0x3fff) << 14)
            | (ext << 28)
    }

    pub fn from_packed_u32(value: u32) -> Self {
        let block = (value & 0x3fff) as u16;
        let room = ((value >> 14) & 0x3fff) as u16;
        let ext = ((value >> 28) & 0xf) as u8;
        LeelenNumber {
            block,
            room,
            extension: if ext >= 10 { None } else { Some(ext) },
        }
    }
}

impl fmt::Display for LeelenNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:04}", self.block, self.room)?;
        if let Some(ext) = self.extension {
            write!(f, "-{}", ext)?;
        }
        Ok(())
    }
}

impl PartialEq for LeelenNumber {
    fn eq(&self, other: &Self) -> bool {
        self.block == other.block && self.room == other.room && self.extension == other.extension
    }
}

impl std::str::FromStr for LeelenNumber {
    type Err = NumberError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_block_room() {
        let n = LeelenNumber::parse("1001-0203", None).unwrap();
        assert_eq!(n.to_string(), "1001-0203");
        assert!(!n.has_extension());
    }

    #[test]
    fn parses_block_room_extension() {
        let n = LeelenNumber::parse("1001-0203-5", None).unwrap();
        assert_eq!(n.to_string(), "1001-0203-5");
        assert_eq!(n.extension(), Some(5));
    }

    #[test]
    fn parses_any_separator() {
        let n = LeelenNumber::parse("1001.0203", None).unwrap();
        assert_eq!(n.to_string(), "1001-0203");
        let n2 = LeelenNumber::parse("1001_0203", None).unwrap();
        assert_eq!(n, n2);
    }

    #[test]
    fn parses_room_only_with_base() {
        let base = LeelenNumber::parse("1001-0000", None).unwrap();
        let n = LeelenNumber::parse("203", Some(&base)).unwrap();
        assert_eq!(n.to_string(), "1001-0203");
    }

    #[test]
    fn room_only_requires_base() {
        let err = LeelenNumber::parse("203", None).unwrap_err();
        assert_eq!(err, NumberError::MissingBase);
    }

    #[test]
    fn parses_compact_blockroom() {
        let n = LeelenNumber::parse("10010203", None).unwrap();
        assert_eq!(n.to_string(), "1001-0203");
    }

    #[test]
    fn parses_compact_blockroom_extension() {
        let n = LeelenNumber::parse("100102035", None).unwrap();
        assert_eq!(n.extension(), Some(5));
        assert_eq!(n.to_string(), "1001-0203-5");
    }

    #[test]
    fn equality_ignores_separator_formatting() {
        let a = LeelenNumber::parse("1001-0203", None).unwrap();
        let b = LeelenNumber::parse("1001x0203", None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn should_reply_compares_first_nine_chars() {
        let n = LeelenNumber::parse("1001-0203", None).unwrap();
        assert!(n.should_reply("1001-0203"));
        assert!(n.should_reply("1001-0299"));
        assert!(!n.should_reply("1002-0000"));
    }

    #[test]
    fn rejects_trailing_separator() {
        assert_eq!(
            LeelenNumber::parse("1001-", None).unwrap_err(),
            NumberError::TrailingSeparator
        );
    }

    #[test]
    fn rejects_non_digit_start() {
        assert_eq!(
            LeelenNumber::parse("-1001-0203", None).unwrap_err(),
            NumberError::NotADigitStart
        );
    }

    #[test]
    fn packed_u32_round_trips() {
        let n = LeelenNumber::parse("1001-0203-5", None).unwrap();
        let packed = n.to_packed_u32();
        assert_eq!(LeelenNumber::from_packed_u32(packed), n);

        let no_ext = LeelenNumber::parse("1001-0203", None).unwrap();
        let packed2 = no_ext.to_packed_u32();
        assert_eq!(LeelenNumber::from_packed_u32(packed2), no_ext);
    }

    #[test]
    fn canonical_form_round_trips_through_parse() {
        for s in ["0001-0002", "9999-9999-9", "1234-5678-0"] {
            let n = LeelenNumber::parse(s, None).unwrap();
            let n2 = LeelenNumber::parse(&n.to_string(), None).unwrap();
            assert_eq!(n, n2);
        }
    }
}

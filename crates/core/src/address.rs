//! Hardware address parsing
//!
//! Scanners report addresses in whatever notation their platform prints.
//! Everything entering the engine is normalised to lowercase,
//! colon-separated octets so that hashing and matching agree.

use crate::error::{PresenceError, Result};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

static ADDRESS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9A-Fa-f]{2}([:-])[0-9A-Fa-f]{2}(?:[:-][0-9A-Fa-f]{2}){4}$")
        .expect("address pattern is valid")
});

/// A normalised 6-octet hardware address
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HardwareAddress(String);

impl HardwareAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HardwareAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for HardwareAddress {
    type Err = PresenceError;

    fn from_str(s: &str) -> Result<Self> {
        parse_address(s)
    }
}

/// Parse `AA:BB:CC:DD:EE:FF` or `aa-bb-cc-dd-ee-ff`. Mixed separators are
/// rejected.
pub fn parse_address(input: &str) -> Result<HardwareAddress> {
    let trimmed = input.trim();
    let caps = ADDRESS_PATTERN
        .captures(trimmed)
        .ok_or_else(|| PresenceError::invalid_address(input))?;

    let sep = &caps[1];
    if trimmed.matches(|c| c == ':' || c == '-').any(|s| s != sep) {
        return Err(PresenceError::invalid_address(input));
    }

    Ok(HardwareAddress(
        trimmed.to_ascii_lowercase().replace('-', ":"),
    ))
}

/// Split a scanner line into address tokens. Commas and whitespace both
/// separate entries.
pub fn split_batch(line: &str) -> impl Iterator<Item = &str> {
    line.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalises_case_and_separator() {
        let a = parse_address("AA-BB-CC-DD-EE-0F").unwrap();
        let b = parse_address(" aa:bb:cc:dd:ee:0f ").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "aa:bb:cc:dd:ee:0f");
    }

    #[test]
    fn test_rejects_malformed() {
        for input in [
            "",
            "aa:bb:cc:dd:ee",
            "aa:bb:cc:dd:ee:ff:00",
            "aa:bb:cc:dd:ee:gg",
            "aabbccddeeff",
            "aa:bb-cc:dd:ee:ff",
        ] {
            assert!(parse_address(input).is_err(), "accepted {:?}", input);
        }
    }

    #[test]
    fn test_split_batch() {
        let tokens: Vec<_> = split_batch("aa:aa:aa:aa:aa:aa, bb:bb:bb:bb:bb:bb\tcc").collect();
        assert_eq!(tokens, vec!["aa:aa:aa:aa:aa:aa", "bb:bb:bb:bb:bb:bb", "cc"]);
    }
}

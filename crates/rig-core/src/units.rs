//! Byte-size parsing and formatting.
//!
//! Rigfiles express sizes either as bare integers (bytes) or as strings
//! with a single-letter suffix (`K`, `M`, `G`, `T`, `P`, powers of 1024).

use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};

const UNITS: [(char, u64); 6] = [
    ('B', 1),
    ('K', 1 << 10),
    ('M', 1 << 20),
    ('G', 1 << 30),
    ('T', 1 << 40),
    ('P', 1 << 50),
];

/// A byte count parsed from a rigfile value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ByteSize(pub u64);

impl ByteSize {
    #[must_use]
    pub const fn bytes(&self) -> u64 {
        self.0
    }

    /// Parse a human-friendly size string such as `512K` or `2G`.
    pub fn parse(val: &str) -> Result<Self, String> {
        let trimmed = val.trim();
        if trimmed.is_empty() {
            return Err("empty size value".to_string());
        }
        if let Ok(n) = trimmed.parse::<u64>() {
            return Ok(Self(n));
        }
        let (num, unit) = trimmed.split_at(trimmed.len() - 1);
        let unit = unit.chars().next().unwrap().to_ascii_uppercase();
        let mult = UNITS
            .iter()
            .find(|(u, _)| *u == unit)
            .map(|(_, m)| *m)
            .ok_or_else(|| format!("unknown unit '{unit}' in size '{val}'"))?;
        let size: f64 = num
            .trim()
            .parse()
            .map_err(|_| format!("invalid size '{val}'"))?;
        if size < 0.0 {
            return Err(format!("negative size '{val}'"));
        }
        Ok(Self((size * mult as f64) as u64))
    }
}

/// Format a byte count with the largest fitting suffix, two decimals.
#[must_use]
pub fn to_human(size: u64) -> String {
    for (unit, base) in UNITS.iter().rev() {
        if size >= *base {
            let scaled = (size as f64 / *base as f64 * 100.0).round() / 100.0;
            return format!("{scaled}{unit}");
        }
    }
    format!("{size}B")
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&to_human(self.0))
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ByteSizeVisitor;

        impl Visitor<'_> for ByteSizeVisitor {
            type Value = ByteSize;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an integer byte count or a string with a K/M/G/T suffix")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<ByteSize, E> {
                Ok(ByteSize(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<ByteSize, E> {
                u64::try_from(v)
                    .map(ByteSize)
                    .map_err(|_| E::custom("size must be non-negative"))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<ByteSize, E> {
                ByteSize::parse(v).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(ByteSizeVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_suffixed_sizes() {
        assert_eq!(ByteSize::parse("512K").unwrap().bytes(), 512 * 1024);
        assert_eq!(ByteSize::parse("2G").unwrap().bytes(), 2 << 30);
        assert_eq!(ByteSize::parse("1m").unwrap().bytes(), 1 << 20);
        assert_eq!(ByteSize::parse("10").unwrap().bytes(), 10);
    }

    #[test]
    fn rejects_bad_units() {
        assert!(ByteSize::parse("10Q").is_err());
        assert!(ByteSize::parse("").is_err());
        assert!(ByteSize::parse("xK").is_err());
    }

    #[test]
    fn human_formatting_round_trips_magnitudes() {
        assert_eq!(to_human(1024), "1K");
        assert_eq!(to_human(2 << 20), "2M");
        assert_eq!(to_human(512), "512B");
    }

    #[test]
    fn deserializes_from_int_and_string() {
        let v: ByteSize = serde_yaml::from_str("1048576").unwrap();
        assert_eq!(v.bytes(), 1 << 20);
        let v: ByteSize = serde_yaml::from_str("\"1M\"").unwrap();
        assert_eq!(v.bytes(), 1 << 20);
    }
}

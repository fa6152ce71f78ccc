//! Human-readable byte sizes for configuration values

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const KIB: u64 = 1024;
const UNITS: [(&str, u64); 5] = [
    ("TB", KIB * KIB * KIB * KIB),
    ("GB", KIB * KIB * KIB),
    ("MB", KIB * KIB),
    ("KB", KIB),
    ("B", 1),
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Invalid size format: {0:?}")]
    InvalidFormat(String),

    #[error("Invalid unit: {0:?}")]
    InvalidUnit(String),

    #[error("Size out of range: {0:?}")]
    Overflow(String),
}

/// Byte count written as `"500MB"`, `"5GB"` or a plain integer.
///
/// Units are binary (1KB = 1024 bytes).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteSize(pub u64);

impl ByteSize {
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Largest unit that divides the value exactly, e.g. `5GB`, `1536KB`.
    pub fn to_human_readable(&self) -> String {
        if self.0 == 0 {
            return "0B".to_string();
        }

        UNITS
            .iter()
            .find(|(_, divisor)| self.0 % divisor == 0)
            .map(|(unit, divisor)| format!("{}{}", self.0 / divisor, unit))
            .unwrap_or_else(|| format!("{}B", self.0))
    }
}

impl FromStr for ByteSize {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(trimmed.len());
        let (digits, unit) = trimmed.split_at(split);

        if digits.is_empty() {
            return Err(ParseError::InvalidFormat(s.to_string()));
        }
        let value: u64 = digits
            .parse()
            .map_err(|_| ParseError::Overflow(s.to_string()))?;

        let multiplier = match unit.trim().to_ascii_uppercase().as_str() {
            "" | "B" => 1,
            "K" | "KB" | "KIB" => KIB,
            "M" | "MB" | "MIB" => KIB * KIB,
            "G" | "GB" | "GIB" => KIB * KIB * KIB,
            "T" | "TB" | "TIB" => KIB * KIB * KIB * KIB,
            other => return Err(ParseError::InvalidUnit(other.to_string())),
        };

        value
            .checked_mul(multiplier)
            .map(ByteSize)
            .ok_or_else(|| ParseError::Overflow(s.to_string()))
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_human_readable())
    }
}

impl Serialize for ByteSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_human_readable())
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ByteSizeVisitor;

        impl serde::de::Visitor<'_> for ByteSizeVisitor {
            type Value = ByteSize;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a byte size as string (e.g., \"500MB\", \"5GB\") or integer")
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(ByteSize(v))
            }

            // Environment overrides arrive as signed integers
            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Self::Value, E> {
                u64::try_from(v)
                    .map(ByteSize)
                    .map_err(|_| E::custom(format!("byte size cannot be negative: {v}")))
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
                v.parse::<ByteSize>().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(ByteSizeVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_and_units() {
        assert_eq!("1000".parse::<ByteSize>().unwrap().as_u64(), 1000);
        assert_eq!("1000B".parse::<ByteSize>().unwrap().as_u64(), 1000);
        assert_eq!("1KB".parse::<ByteSize>().unwrap().as_u64(), 1024);
        assert_eq!("500mb".parse::<ByteSize>().unwrap().as_u64(), 500 * 1024 * 1024);
        assert_eq!(" 5 GiB ".parse::<ByteSize>().unwrap().as_u64(), 5 * 1024 * 1024 * 1024);
        assert_eq!("1T".parse::<ByteSize>().unwrap().as_u64(), 1024 * 1024 * 1024 * 1024);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!("GB".parse::<ByteSize>(), Err(ParseError::InvalidFormat(_))));
        assert!(matches!("".parse::<ByteSize>(), Err(ParseError::InvalidFormat(_))));
        assert!(matches!("5PB".parse::<ByteSize>(), Err(ParseError::InvalidUnit(_))));
        assert!(matches!(
            "99999999999TB".parse::<ByteSize>(),
            Err(ParseError::Overflow(_))
        ));
    }

    #[test]
    fn test_to_human_readable() {
        assert_eq!(ByteSize(0).to_human_readable(), "0B");
        assert_eq!(ByteSize(1000).to_human_readable(), "1000B");
        assert_eq!(ByteSize(1536 * 1024).to_human_readable(), "1536KB");
        assert_eq!(ByteSize(5 * 1024 * 1024 * 1024).to_human_readable(), "5GB");
    }

    #[test]
    fn test_serde_round_trip_is_human_readable() {
        #[derive(Serialize, Deserialize)]
        struct Limits {
            size: ByteSize,
        }

        let json = serde_json::to_string(&Limits {
            size: ByteSize(500 * 1024 * 1024),
        })
        .unwrap();
        assert_eq!(json, r#"{"size":"500MB"}"#);

        let parsed: Limits = serde_json::from_str(r#"{"size": 4096}"#).unwrap();
        assert_eq!(parsed.size.as_u64(), 4096);
        assert!(serde_json::from_str::<Limits>(r#"{"size": -1}"#).is_err());
    }
}

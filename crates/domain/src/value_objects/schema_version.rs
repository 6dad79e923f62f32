//! Schema version of a persisted session record (`vMAJOR.MINOR`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::DomainError;

/// Ordered by `(major, minor)` numerically, so `v1.10` is newer than `v1.9`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SchemaVersion {
    pub major: u32,
    pub minor: u32,
}

impl SchemaVersion {
    /// Records written before versioning existed.
    pub const V1_0: SchemaVersion = SchemaVersion::new(1, 0);
    /// Choice ids are integers.
    pub const V1_1: SchemaVersion = SchemaVersion::new(1, 1);
    /// Every history entry carries a timestamp.
    pub const V1_2: SchemaVersion = SchemaVersion::new(1, 2);
    /// camelCase field names throughout.
    pub const V2_0: SchemaVersion = SchemaVersion::new(2, 0);

    pub const OLDEST: SchemaVersion = Self::V1_0;
    pub const CURRENT: SchemaVersion = Self::V2_0;

    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}", self.major, self.minor)
    }
}

impl FromStr for SchemaVersion {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || DomainError::parse(format!("Malformed schema version: {:?}", s));

        let rest = s.trim().strip_prefix('v').ok_or_else(malformed)?;
        let (major, minor) = rest.split_once('.').ok_or_else(malformed)?;
        let is_digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
        if !is_digits(major) || !is_digits(minor) {
            return Err(malformed());
        }

        Ok(Self {
            major: major.parse().map_err(|_| malformed())?,
            minor: minor.parse().map_err(|_| malformed())?,
        })
    }
}

impl TryFrom<String> for SchemaVersion {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SchemaVersion> for String {
    fn from(value: SchemaVersion) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_displays() {
        let version: SchemaVersion = "v1.2".parse().unwrap();
        assert_eq!(version, SchemaVersion::V1_2);
        assert_eq!(version.to_string(), "v1.2");
    }

    #[test]
    fn compares_numerically_not_lexically() {
        let nine: SchemaVersion = "v1.9".parse().unwrap();
        let ten: SchemaVersion = "v1.10".parse().unwrap();
        assert!(ten > nine);
        assert!(SchemaVersion::V2_0 > ten);
    }

    #[test]
    fn rejects_malformed() {
        for bad in ["1.2", "v1", "v1.", "v.2", "v1.2.3", "vx.y", "v-1.2", ""] {
            assert!(bad.parse::<SchemaVersion>().is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn serde_uses_string_form() {
        let json = serde_json::to_string(&SchemaVersion::V2_0).unwrap();
        assert_eq!(json, "\"v2.0\"");
        let back: SchemaVersion = serde_json::from_str(&json).unwrap();
        assert_eq!(back, SchemaVersion::V2_0);
        assert!(serde_json::from_str::<SchemaVersion>("\"2.0\"").is_err());
    }
}

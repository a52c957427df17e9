//! Dewey-decimal version numbers (`1.2.10`).

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid dewey-decimal version `{0}`")]
pub struct VersionParseError(pub String);

/// Version made of dot-separated non-negative integers.
///
/// Comparison pads the shorter version with zeros, so `1.2 == 1.2.0`.
#[derive(Debug, Clone)]
pub struct DeweyDecimal {
    components: Vec<u32>,
}

impl DeweyDecimal {
    pub fn components(&self) -> &[u32] {
        &self.components
    }

    /// Returns whether `self >= other`.
    pub fn is_at_least(&self, other: &DeweyDecimal) -> bool {
        self >= other
    }

    fn component(&self, index: usize) -> u32 {
        self.components.get(index).copied().unwrap_or(0)
    }
}

impl FromStr for DeweyDecimal {
    type Err = VersionParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(VersionParseError(value.to_string()));
        }
        let components = trimmed
            .split('.')
            .map(|part| part.parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| VersionParseError(value.to_string()))?;
        Ok(Self { components })
    }
}

impl Ord for DeweyDecimal {
    fn cmp(&self, other: &Self) -> Ordering {
        let width = self.components.len().max(other.components.len());
        (0..width)
            .map(|index| self.component(index).cmp(&other.component(index)))
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for DeweyDecimal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for DeweyDecimal {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other).is_eq()
    }
}

impl Eq for DeweyDecimal {}

impl Display for DeweyDecimal {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.components.iter().map(u32::to_string).collect();
        f.write_str(&parts.join("."))
    }
}

impl Serialize for DeweyDecimal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DeweyDecimal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::DeweyDecimal;

    fn v(value: &str) -> DeweyDecimal {
        value.parse().expect("version")
    }

    #[test]
    fn compares_numerically_with_padding() {
        assert!(v("1.10") > v("1.9"));
        assert_eq!(v("1.2"), v("1.2.0"));
        assert!(v("2").is_at_least(&v("1.99.99")));
    }

    #[test]
    fn rejects_non_numeric_parts() {
        assert!("1.x".parse::<DeweyDecimal>().is_err());
        assert!("".parse::<DeweyDecimal>().is_err());
        assert!("1..2".parse::<DeweyDecimal>().is_err());
    }
}

//! Common types for rivven-cosmos
//!
//! Feed ranges, container descriptors and the redacting `SensitiveString`
//! used for account keys.

use crate::error::CosmosError;
use schemars::JsonSchema;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lower bound of the effective partition key space
pub const KEY_SPACE_MIN: &str = "";

/// Upper bound (exclusive) of the effective partition key space
pub const KEY_SPACE_MAX: &str = "FF";

/// A contiguous, half-open interval `[min, max)` of a container's key space.
///
/// Boundaries are compared as strings. Ranges of one container always form a
/// complete, non-overlapping partition of `[KEY_SPACE_MIN, KEY_SPACE_MAX)`.
/// The textual form `[min,max)` is what gets persisted in partition keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FeedRange {
    min: String,
    max: String,
}

impl FeedRange {
    /// Create a range from its inclusive lower and exclusive upper bound
    pub fn new(min: impl Into<String>, max: impl Into<String>) -> Self {
        Self {
            min: min.into(),
            max: max.into(),
        }
    }

    /// The range covering the whole key space
    pub fn full() -> Self {
        Self::new(KEY_SPACE_MIN, KEY_SPACE_MAX)
    }

    pub fn min(&self) -> &str {
        &self.min
    }

    pub fn max(&self) -> &str {
        &self.max
    }

    /// Check whether the two half-open intervals share at least one key
    pub fn overlaps(&self, other: &FeedRange) -> bool {
        self.min < other.max && other.min < self.max
    }

    /// Check whether `other` lies entirely inside this range
    pub fn contains(&self, other: &FeedRange) -> bool {
        self.min <= other.min && other.max <= self.max
    }

    /// Check whether the union of `ranges` covers this range without gaps.
    ///
    /// Ranges that do not overlap `self` are ignored.
    pub fn is_covered_by<'a>(&self, ranges: impl IntoIterator<Item = &'a FeedRange>) -> bool {
        let mut relevant: Vec<&FeedRange> = ranges.into_iter().filter(|r| r.overlaps(self)).collect();
        relevant.sort();

        let mut cursor = self.min.as_str();
        for range in relevant {
            if range.min.as_str() > cursor {
                return false;
            }
            if range.max.as_str() > cursor {
                cursor = range.max.as_str();
            }
            if cursor >= self.max.as_str() {
                return true;
            }
        }
        cursor >= self.max.as_str()
    }
}

impl fmt::Display for FeedRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{})", self.min, self.max)
    }
}

impl FromStr for FeedRange {
    type Err = CosmosError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let inner = s
            .trim()
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or_else(|| CosmosError::state(format!("invalid feed range '{}'", s)))?;
        let (min, max) = inner
            .split_once(',')
            .ok_or_else(|| CosmosError::state(format!("invalid feed range '{}'", s)))?;
        if min > max {
            return Err(CosmosError::state(format!(
                "feed range '{}' has min greater than max",
                s
            )));
        }
        Ok(Self::new(min, max))
    }
}

impl TryFrom<String> for FeedRange {
    type Error = CosmosError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FeedRange> for String {
    fn from(range: FeedRange) -> Self {
        range.to_string()
    }
}

/// A container as reported by the inventory query
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerDescriptor {
    /// Container name (id)
    pub name: String,
    /// Resource id; changes when a container is deleted and re-created
    pub rid: String,
}

impl ContainerDescriptor {
    pub fn new(name: impl Into<String>, rid: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rid: rid.into(),
        }
    }
}

/// A wrapper around `SecretString` for account keys and other credentials.
///
/// Redacted in `Debug`, `Display` and serialized output.
#[derive(Clone)]
pub struct SensitiveString(SecretString);

impl SensitiveString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::new(value.into().into_boxed_str()))
    }

    /// Expose the secret value. Only call this when handing the key to a client.
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl fmt::Debug for SensitiveString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl fmt::Display for SensitiveString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl From<String> for SensitiveString {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for SensitiveString {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl Serialize for SensitiveString {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("***REDACTED***")
    }
}

impl<'de> Deserialize<'de> for SensitiveString {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Self::new(value))
    }
}

impl JsonSchema for SensitiveString {
    fn schema_name() -> String {
        "SensitiveString".to_string()
    }

    fn json_schema(gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        let mut schema = gen.subschema_for::<String>();
        if let schemars::schema::Schema::Object(obj) = &mut schema {
            obj.format = Some("password".to_string());
            obj.metadata().description =
                Some("Account key. Redacted in logs and config dumps.".to_string());
        }
        schema
    }
}

//! As-of version identifiers.
//!
//! An [`AsOfVersion`] is the UTC instant that identifies one immutable
//! snapshot of an `AS_OF` dataset. Its canonical string form
//! (`2023-01-01T120000+0000`) is the RFC 3339 instant with colons removed,
//! which makes it safe both as a filename fragment and as a hive partition
//! segment, and — because the offset is always `+0000` and every field is
//! zero-padded — lexicographic order over canonical strings equals instant
//! order.
//!
//! Both the canonical colon-free encoding and plain RFC 3339 decode to the
//! same identifier, so `decode(encode(x)) == x` and the two on-disk spellings
//! are interchangeable. Precision is whole seconds; constructing a version
//! from an instant with sub-second components is rejected rather than
//! silently truncated.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use snafu::{Backtrace, prelude::*};

/// Filename/partition-safe encoding pattern: RFC 3339 with colons removed.
const ENCODED_FORMAT: &str = "%Y-%m-%dT%H%M%S%z";

/// A UTC instant identifying one version of an `AS_OF` dataset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AsOfVersion(DateTime<Utc>);

impl AsOfVersion {
    /// Wrap a UTC instant as a version identifier.
    ///
    /// Fails if the instant carries sub-second precision, since the encoded
    /// form could not round-trip it exactly.
    pub fn new(instant: DateTime<Utc>) -> Result<Self, VersionError> {
        ensure!(
            instant.timestamp_subsec_nanos() == 0,
            SubSecondSnafu { instant }
        );
        Ok(AsOfVersion(instant))
    }

    /// The underlying UTC instant.
    pub fn instant(&self) -> DateTime<Utc> {
        self.0
    }

    /// Canonical colon-free string form, e.g. `2023-01-01T120000+0000`.
    pub fn encode(&self) -> String {
        self.0.format(ENCODED_FORMAT).to_string()
    }

    /// The RFC 3339 spelling of the same instant, e.g.
    /// `2023-01-01T12:00:00+00:00`.
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Secs, false)
    }

    /// Parse a version identifier from either the canonical colon-free form
    /// or RFC 3339. Offsets other than UTC are normalized to UTC.
    pub fn decode(value: &str) -> Result<Self, VersionError> {
        let parsed = DateTime::parse_from_str(value, ENCODED_FORMAT)
            .or_else(|_| DateTime::parse_from_rfc3339(value));

        let fixed = parsed.ok().context(ParseSnafu {
            value: value.to_string(),
        })?;

        AsOfVersion::new(fixed.with_timezone(&Utc))
    }
}

impl fmt::Display for AsOfVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl Serialize for AsOfVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for AsOfVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        AsOfVersion::decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Reserved selector string meaning "the maximum version".
pub const LATEST: &str = "latest";

/// Selects which version of a dataset a read should return.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VersionSelector {
    /// The maximum version by instant order; for unversioned datasets, the
    /// single current artifact.
    Latest,
    /// One exact as-of version.
    AsOf(AsOfVersion),
}

impl FromStr for VersionSelector {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case(LATEST) {
            Ok(VersionSelector::Latest)
        } else {
            Ok(VersionSelector::AsOf(AsOfVersion::decode(s)?))
        }
    }
}

impl fmt::Display for VersionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSelector::Latest => f.write_str(LATEST),
            VersionSelector::AsOf(v) => write!(f, "{v}"),
        }
    }
}

/// Errors raised while constructing or parsing version identifiers.
#[derive(Debug, Snafu)]
pub enum VersionError {
    /// The string matched neither the canonical nor the RFC 3339 form.
    #[snafu(display("Not a valid as-of version: '{value}'"))]
    Parse {
        /// The string that failed to parse.
        value: String,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// The instant carries sub-second precision the encoding cannot represent.
    #[snafu(display("As-of version must have whole-second precision, got {instant}"))]
    SubSecond {
        /// The offending instant.
        instant: DateTime<Utc>,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },
}

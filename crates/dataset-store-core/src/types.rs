//! The closed type system for datasets.
//!
//! A dataset's [`SeriesType`] is the pair of its [`Versioning`] (how updates
//! to the same logical data are represented over time) and its
//! [`Temporality`] (what real-world time a row's dates refer to). The type is
//! fixed at dataset creation and never changes in place; a write whose type
//! disagrees with the stored type fails with [`TypeError::TypeMismatch`] and
//! no coercion or migration is attempted.
//!
//! The canonical string form `<VERSIONING>_<TEMPORALITY>` (for example
//! `AS_OF_AT`) doubles as the type's directory / partition segment in both
//! physical layouts, so parsing is deliberately forgiving about case.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use snafu::{Backtrace, prelude::*};

/// How successive updates to the same logical dataset are identified.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Versioning {
    /// A single mutable version, overwritten wholesale on every write.
    None,
    /// An append-only sequence of immutable versions, each identified by a
    /// UTC instant.
    AsOf,
    /// Versions identified by free-text labels.
    ///
    /// Reserved in the type system; no physical layout realizes it and both
    /// handlers reject it.
    Named,
}

impl Versioning {
    fn as_str(&self) -> &'static str {
        match self {
            Versioning::None => "NONE",
            Versioning::AsOf => "AS_OF",
            Versioning::Named => "NAMED",
        }
    }
}

impl fmt::Display for Versioning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The time dimensionality of each data point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Temporality {
    /// Single points in time, expressed with exact `valid_at` dates.
    At,
    /// Duration periods, expressed with `valid_from` (inclusive) and
    /// `valid_to` (exclusive) dates.
    FromTo,
}

impl Temporality {
    /// The date column names this temporality requires of every payload.
    pub fn date_columns(&self) -> &'static [&'static str] {
        match self {
            Temporality::At => &["valid_at"],
            Temporality::FromTo => &["valid_from", "valid_to"],
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Temporality::At => "AT",
            Temporality::FromTo => "FROM_TO",
        }
    }
}

impl fmt::Display for Temporality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `(Versioning, Temporality)` pair that constitutes a dataset's type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SeriesType {
    /// How versions of this dataset are identified.
    pub versioning: Versioning,
    /// The time meaning of each row's date(s).
    pub temporality: Temporality,
}

impl SeriesType {
    /// `(NONE, AT)`: one mutable version of point-in-time rows.
    pub fn none_at() -> Self {
        SeriesType {
            versioning: Versioning::None,
            temporality: Temporality::At,
        }
    }

    /// `(NONE, FROM_TO)`: one mutable version of interval rows.
    pub fn none_from_to() -> Self {
        SeriesType {
            versioning: Versioning::None,
            temporality: Temporality::FromTo,
        }
    }

    /// `(AS_OF, AT)`: immutable as-of versions of point-in-time rows.
    pub fn as_of_at() -> Self {
        SeriesType {
            versioning: Versioning::AsOf,
            temporality: Temporality::At,
        }
    }

    /// `(AS_OF, FROM_TO)`: immutable as-of versions of interval rows.
    pub fn as_of_from_to() -> Self {
        SeriesType {
            versioning: Versioning::AsOf,
            temporality: Temporality::FromTo,
        }
    }

    /// The date column names a payload of this type must carry.
    pub fn date_columns(&self) -> &'static [&'static str] {
        self.temporality.date_columns()
    }

    /// Directory / partition segment form, e.g. `AS_OF_AT`.
    pub fn dir_name(&self) -> String {
        self.to_string()
    }

    /// Verify that this (incoming) type equals the `stored` type of an
    /// existing dataset.
    pub fn ensure_matches(&self, stored: &SeriesType, dataset: &str) -> Result<(), TypeError> {
        ensure!(
            self == stored,
            TypeMismatchSnafu {
                dataset: dataset.to_string(),
                stored: *stored,
                requested: *self,
            }
        );
        Ok(())
    }
}

impl fmt::Display for SeriesType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.versioning, self.temporality)
    }
}

impl FromStr for SeriesType {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let st = match s.to_ascii_uppercase().as_str() {
            "NONE_AT" => SeriesType::none_at(),
            "NONE_FROM_TO" => SeriesType::none_from_to(),
            "AS_OF_AT" => SeriesType::as_of_at(),
            "AS_OF_FROM_TO" => SeriesType::as_of_from_to(),
            "NAMED_AT" => SeriesType {
                versioning: Versioning::Named,
                temporality: Temporality::At,
            },
            "NAMED_FROM_TO" => SeriesType {
                versioning: Versioning::Named,
                temporality: Temporality::FromTo,
            },
            _ => {
                return UnknownSeriesTypeSnafu {
                    value: s.to_string(),
                }
                .fail()
            }
        };
        Ok(st)
    }
}

impl Serialize for SeriesType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SeriesType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Errors raised by the type system.
#[derive(Debug, Snafu)]
pub enum TypeError {
    /// The type of an incoming write disagrees with the stored dataset type.
    #[snafu(display(
        "Type mismatch for dataset '{dataset}': stored {stored}, write requested {requested}"
    ))]
    TypeMismatch {
        /// The dataset whose stored type disagrees.
        dataset: String,
        /// The type recorded for the existing dataset.
        stored: SeriesType,
        /// The type of the incoming write.
        requested: SeriesType,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// A string did not name any known series type.
    #[snafu(display("Unknown series type: '{value}'"))]
    UnknownSeriesType {
        /// The string that failed to parse.
        value: String,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },
}

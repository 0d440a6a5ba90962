//! The in-memory dataset model.
//!
//! A [`Dataset`] is a named collection of [`Series`] sharing one
//! [`SeriesType`] and one date axis. The axis shape follows the type's
//! temporality: `AT` rows carry one `valid_at` instant, `FROM_TO` rows carry
//! a `valid_from` (inclusive) / `valid_to` (exclusive) interval. Series
//! values are scalar `f64`, nullable, and aligned index-for-index with the
//! axis.
//!
//! Invariants enforced at construction and on every mutation:
//! - the axis temporality equals the dataset type's temporality,
//! - every series value column has exactly the axis length,
//! - series names are unique within the dataset,
//! - `FROM_TO` intervals satisfy `valid_from <= valid_to` per row.
//!
//! Arithmetic is exposed as explicit named operations (`add`, `subtract`,
//! `multiply`, `divide`, plus `_scalar` variants); combining two datasets
//! requires identical axes and identical series name sets.

use chrono::{DateTime, Utc};
use snafu::{Backtrace, prelude::*};

use crate::tags::TagMap;
use crate::types::{SeriesType, Temporality};

/// The shared date axis of a dataset.
#[derive(Clone, Debug, PartialEq)]
pub enum DateAxis {
    /// One `valid_at` instant per row.
    At(Vec<DateTime<Utc>>),
    /// One `valid_from`/`valid_to` interval per row (`valid_to` exclusive).
    FromTo {
        /// Inclusive interval starts, one per row.
        from: Vec<DateTime<Utc>>,
        /// Exclusive interval ends, one per row.
        to: Vec<DateTime<Utc>>,
    },
}

impl DateAxis {
    /// Number of rows on the axis.
    pub fn len(&self) -> usize {
        match self {
            DateAxis::At(dates) => dates.len(),
            DateAxis::FromTo { from, .. } => from.len(),
        }
    }

    /// Whether the axis has no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The temporality this axis shape corresponds to.
    pub fn temporality(&self) -> Temporality {
        match self {
            DateAxis::At(_) => Temporality::At,
            DateAxis::FromTo { .. } => Temporality::FromTo,
        }
    }

    /// First and last instants covered by the axis, if any rows exist.
    ///
    /// For `FROM_TO` axes this is the minimum `valid_from` and maximum
    /// `valid_to`.
    pub fn period(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        match self {
            DateAxis::At(dates) => {
                let min = dates.iter().min()?;
                let max = dates.iter().max()?;
                Some((*min, *max))
            }
            DateAxis::FromTo { from, to } => {
                let min = from.iter().min()?;
                let max = to.iter().max()?;
                Some((*min, *max))
            }
        }
    }

    fn validate(&self) -> Result<(), DatasetError> {
        if let DateAxis::FromTo { from, to } = self {
            ensure!(
                from.len() == to.len(),
                AxisShapeSnafu {
                    from_len: from.len(),
                    to_len: to.len(),
                }
            );
            for (i, (f, t)) in from.iter().zip(to.iter()).enumerate() {
                ensure!(
                    f <= t,
                    InvalidIntervalSnafu {
                        row: i,
                        from: *f,
                        to: *t,
                    }
                );
            }
        }
        Ok(())
    }
}

/// One named value column within a dataset.
#[derive(Clone, Debug, PartialEq)]
pub struct Series {
    /// Series name, unique within its dataset.
    pub name: String,
    /// Tags describing this series.
    pub tags: TagMap,
    /// Scalar values aligned to the dataset's date axis.
    pub values: Vec<Option<f64>>,
}

impl Series {
    /// Construct a series with empty tags.
    pub fn new(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        Series {
            name: name.into(),
            tags: TagMap::new(),
            values,
        }
    }

    /// Construct a series with tags.
    pub fn with_tags(name: impl Into<String>, tags: TagMap, values: Vec<Option<f64>>) -> Self {
        Series {
            name: name.into(),
            tags,
            values,
        }
    }
}

/// A named collection of series of one type sharing a date axis.
#[derive(Clone, Debug, PartialEq)]
pub struct Dataset {
    name: String,
    series_type: SeriesType,
    tags: TagMap,
    axis: DateAxis,
    series: Vec<Series>,
}

impl Dataset {
    /// Construct an empty dataset over `axis`.
    ///
    /// Fails if the axis shape does not match the type's temporality or the
    /// axis itself is malformed.
    pub fn new(
        name: impl Into<String>,
        series_type: SeriesType,
        axis: DateAxis,
    ) -> Result<Self, DatasetError> {
        let name = name.into();
        ensure!(
            axis.temporality() == series_type.temporality,
            TemporalityMismatchSnafu {
                dataset: name.clone(),
                series_type,
                axis: axis.temporality(),
            }
        );
        axis.validate()?;
        Ok(Dataset {
            name,
            series_type,
            tags: TagMap::new(),
            axis,
            series: Vec::new(),
        })
    }

    /// Replace the dataset-level tags. Builder-style.
    pub fn with_tags(mut self, tags: TagMap) -> Self {
        self.tags = tags;
        self
    }

    /// Add a series, validating alignment and name uniqueness. Builder-style.
    pub fn with_series(mut self, series: Series) -> Result<Self, DatasetError> {
        self.push_series(series)?;
        Ok(self)
    }

    /// Add a series, validating alignment and name uniqueness.
    pub fn push_series(&mut self, series: Series) -> Result<(), DatasetError> {
        ensure!(
            series.values.len() == self.axis.len(),
            LengthMismatchSnafu {
                dataset: self.name.clone(),
                series: series.name.clone(),
                axis_len: self.axis.len(),
                values_len: series.values.len(),
            }
        );
        ensure!(
            !self.series.iter().any(|s| s.name == series.name),
            DuplicateSeriesSnafu {
                dataset: self.name.clone(),
                series: series.name.clone(),
            }
        );
        self.series.push(series);
        Ok(())
    }

    /// Dataset name, globally unique within a repository.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The dataset's fixed type.
    pub fn series_type(&self) -> SeriesType {
        self.series_type
    }

    /// Dataset-level tags.
    pub fn tags(&self) -> &TagMap {
        &self.tags
    }

    /// Mutable access to dataset-level tags.
    pub fn tags_mut(&mut self) -> &mut TagMap {
        &mut self.tags
    }

    /// The shared date axis.
    pub fn axis(&self) -> &DateAxis {
        &self.axis
    }

    /// All series, in insertion order.
    pub fn series(&self) -> &[Series] {
        &self.series
    }

    /// Look up one series by name.
    pub fn series_named(&self, name: &str) -> Option<&Series> {
        self.series.iter().find(|s| s.name == name)
    }

    /// Mutable access to one series by name.
    pub fn series_named_mut(&mut self, name: &str) -> Option<&mut Series> {
        self.series.iter_mut().find(|s| s.name == name)
    }

    /// First and last instants covered by the axis, if the dataset has rows.
    pub fn period(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        self.axis.period()
    }

    /// Apply `f` to every present value, leaving nulls in place.
    fn map_values(&self, f: impl Fn(f64) -> f64) -> Dataset {
        let mut out = self.clone();
        for series in &mut out.series {
            for v in &mut series.values {
                *v = v.map(&f);
            }
        }
        out
    }

    /// Add a scalar to every value.
    pub fn add_scalar(&self, rhs: f64) -> Dataset {
        self.map_values(|v| v + rhs)
    }

    /// Subtract a scalar from every value.
    pub fn subtract_scalar(&self, rhs: f64) -> Dataset {
        self.map_values(|v| v - rhs)
    }

    /// Multiply every value by a scalar.
    pub fn multiply_scalar(&self, rhs: f64) -> Dataset {
        self.map_values(|v| v * rhs)
    }

    /// Divide every value by a scalar.
    pub fn divide_scalar(&self, rhs: f64) -> Dataset {
        self.map_values(|v| v / rhs)
    }

    /// Combine with another dataset elementwise.
    ///
    /// Both datasets must have identical axes and identical series name
    /// sets; a row where either side is null yields null. The result keeps
    /// the left operand's name, type, and tags.
    fn combine(&self, rhs: &Dataset, f: impl Fn(f64, f64) -> f64) -> Result<Dataset, DatasetError> {
        ensure!(
            self.axis == rhs.axis,
            AxisMismatchSnafu {
                left: self.name.clone(),
                right: rhs.name.clone(),
            }
        );

        let mut out = self.clone();
        for series in &mut out.series {
            let other = rhs
                .series_named(&series.name)
                .context(SeriesMismatchSnafu {
                    left: self.name.clone(),
                    right: rhs.name.clone(),
                    series: series.name.clone(),
                })?;
            for (v, w) in series.values.iter_mut().zip(other.values.iter()) {
                *v = match (*v, *w) {
                    (Some(a), Some(b)) => Some(f(a, b)),
                    _ => None,
                };
            }
        }

        // Series present only on the right have no left counterpart to
        // combine into; that asymmetry is an error, not a silent drop.
        if let Some(extra) = rhs.series.iter().find(|s| self.series_named(&s.name).is_none()) {
            return SeriesMismatchSnafu {
                left: self.name.clone(),
                right: rhs.name.clone(),
                series: extra.name.clone(),
            }
            .fail();
        }

        Ok(out)
    }

    /// Elementwise addition with another dataset.
    pub fn add(&self, rhs: &Dataset) -> Result<Dataset, DatasetError> {
        self.combine(rhs, |a, b| a + b)
    }

    /// Elementwise subtraction of another dataset.
    pub fn subtract(&self, rhs: &Dataset) -> Result<Dataset, DatasetError> {
        self.combine(rhs, |a, b| a - b)
    }

    /// Elementwise multiplication with another dataset.
    pub fn multiply(&self, rhs: &Dataset) -> Result<Dataset, DatasetError> {
        self.combine(rhs, |a, b| a * b)
    }

    /// Elementwise division by another dataset.
    pub fn divide(&self, rhs: &Dataset) -> Result<Dataset, DatasetError> {
        self.combine(rhs, |a, b| a / b)
    }
}

/// Errors raised by dataset construction and arithmetic.
#[derive(Debug, Snafu)]
pub enum DatasetError {
    /// The axis shape does not match the dataset type's temporality.
    #[snafu(display(
        "Dataset '{dataset}' has type {series_type} but a {axis} axis"
    ))]
    TemporalityMismatch {
        /// The dataset being constructed.
        dataset: String,
        /// The declared dataset type.
        series_type: SeriesType,
        /// The temporality implied by the axis shape.
        axis: Temporality,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// A from/to axis has differing column lengths.
    #[snafu(display(
        "from/to axis columns differ in length: valid_from has {from_len}, valid_to has {to_len}"
    ))]
    AxisShape {
        /// Length of the `valid_from` column.
        from_len: usize,
        /// Length of the `valid_to` column.
        to_len: usize,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// An interval row ends before it starts.
    #[snafu(display("Invalid interval at row {row}: valid_from {from} > valid_to {to}"))]
    InvalidInterval {
        /// Zero-based row index of the offending interval.
        row: usize,
        /// The interval's `valid_from`.
        from: DateTime<Utc>,
        /// The interval's `valid_to`.
        to: DateTime<Utc>,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// A series value column is not aligned with the axis.
    #[snafu(display(
        "Series '{series}' in dataset '{dataset}' has {values_len} values but the axis has {axis_len} rows"
    ))]
    LengthMismatch {
        /// The dataset being mutated.
        dataset: String,
        /// The offending series.
        series: String,
        /// Number of rows on the axis.
        axis_len: usize,
        /// Number of values in the series column.
        values_len: usize,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// A series name is already taken within the dataset.
    #[snafu(display("Series '{series}' already exists in dataset '{dataset}'"))]
    DuplicateSeries {
        /// The dataset being mutated.
        dataset: String,
        /// The duplicate series name.
        series: String,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// Two datasets being combined do not share a date axis.
    #[snafu(display("Datasets '{left}' and '{right}' do not share a date axis"))]
    AxisMismatch {
        /// The left operand.
        left: String,
        /// The right operand.
        right: String,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// Two datasets being combined do not have the same series names.
    #[snafu(display(
        "Series '{series}' is not present in both datasets '{left}' and '{right}'"
    ))]
    SeriesMismatch {
        /// The left operand.
        left: String,
        /// The right operand.
        right: String,
        /// The series missing from one side.
        series: String,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },
}

//! Dataset ⇄ Parquet encoding with self-describing embedded metadata.
//!
//! Both physical layouts store the same artifact content, produced here:
//! a wide Parquet file whose columns are the type's date column(s)
//! (`Timestamp(ns, UTC)`, non-null) followed by one nullable `Float64`
//! column per series, sorted by series name.
//!
//! The artifact is self-describing independently of its filename or
//! partition path: the dataset header (name, type, tags) is embedded as a
//! JSON document under the `"json"` key of the Arrow schema metadata, and
//! each series' tags under the `"json"` key of its field metadata. Losing
//! the catalog therefore loses no information — see
//! [`header_from_parquet_bytes`], which the re-index path uses to rebuild
//! catalog entries from data files alone.

use std::collections::HashMap;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float64Array, TimestampNanosecondArray};
use arrow::compute::concat_batches;
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};
use snafu::{Backtrace, prelude::*};

use crate::dataset::{DatasetError, DateAxis, Dataset, Series};
use crate::tags::TagMap;
use crate::types::SeriesType;

/// Metadata key under which embedded JSON documents are stored.
const META_KEY: &str = "json";

/// Timezone recorded on all date columns.
const TIMESTAMP_TZ: &str = "UTC";

/// The self-describing header embedded in every artifact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DatasetHeader {
    /// Dataset name.
    pub name: String,
    /// The dataset's fixed type.
    #[serde(rename = "type")]
    pub series_type: SeriesType,
    /// Dataset-level tags.
    pub tags: TagMap,
}

impl DatasetHeader {
    /// Build the header for a dataset.
    pub fn of(dataset: &Dataset) -> Self {
        DatasetHeader {
            name: dataset.name().to_string(),
            series_type: dataset.series_type(),
            tags: dataset.tags().clone(),
        }
    }
}

fn timestamp_field(name: &str) -> Field {
    Field::new(
        name,
        DataType::Timestamp(TimeUnit::Nanosecond, Some(TIMESTAMP_TZ.into())),
        false,
    )
}

fn to_nanos(dates: &[DateTime<Utc>]) -> Result<Vec<i64>, CodecError> {
    dates
        .iter()
        .map(|d| {
            d.timestamp_nanos_opt().context(TimestampRangeSnafu { instant: *d })
        })
        .collect()
}

fn date_arrays(axis: &DateAxis) -> Result<Vec<(Field, ArrayRef)>, CodecError> {
    let columns: Vec<(&str, &[DateTime<Utc>])> = match axis {
        DateAxis::At(dates) => vec![("valid_at", dates.as_slice())],
        DateAxis::FromTo { from, to } => {
            vec![("valid_from", from.as_slice()), ("valid_to", to.as_slice())]
        }
    };

    columns
        .into_iter()
        .map(|(name, dates)| {
            let array =
                TimestampNanosecondArray::from(to_nanos(dates)?).with_timezone(TIMESTAMP_TZ);
            Ok((timestamp_field(name), Arc::new(array) as ArrayRef))
        })
        .collect()
}

/// Serialize a dataset into Parquet bytes with embedded header metadata.
pub fn dataset_to_parquet_bytes(dataset: &Dataset) -> Result<Bytes, CodecError> {
    let mut columns = date_arrays(dataset.axis())?;

    let mut series: Vec<&Series> = dataset.series().iter().collect();
    series.sort_by(|a, b| a.name.cmp(&b.name));

    for s in series {
        let tags_json = serde_json::to_string(&s.tags).context(SeriesTagsSnafu {
            column: s.name.clone(),
        })?;
        let field = Field::new(&s.name, DataType::Float64, true)
            .with_metadata(HashMap::from([(META_KEY.to_string(), tags_json)]));
        let array = Float64Array::from(s.values.clone());
        columns.push((field, Arc::new(array) as ArrayRef));
    }

    let header = DatasetHeader::of(dataset);
    let header_json = serde_json::to_string(&header).context(HeaderSnafu)?;

    let (fields, arrays): (Vec<Field>, Vec<ArrayRef>) = columns.into_iter().unzip();
    let schema = Arc::new(Schema::new_with_metadata(
        fields,
        HashMap::from([(META_KEY.to_string(), header_json)]),
    ));

    let batch = RecordBatch::try_new(schema.clone(), arrays).context(ArrowSnafu)?;

    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, schema, None).context(ParquetSnafu)?;
    writer.write(&batch).context(ParquetSnafu)?;
    writer.close().context(ParquetSnafu)?;

    Ok(Bytes::from(buf))
}

/// Read only the embedded header from Parquet bytes.
///
/// Touches the footer metadata, not the data pages.
pub fn header_from_parquet_bytes(bytes: Bytes) -> Result<DatasetHeader, CodecError> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(bytes).context(ParquetSnafu)?;
    let header_json = builder
        .schema()
        .metadata()
        .get(META_KEY)
        .context(MissingHeaderSnafu)?;
    serde_json::from_str(header_json).context(HeaderSnafu)
}

fn timestamps_from_column(
    batch: &RecordBatch,
    column: &str,
) -> Result<Vec<DateTime<Utc>>, CodecError> {
    let index = batch
        .schema()
        .index_of(column)
        .ok()
        .context(MissingDateColumnSnafu { column })?;
    let array = batch
        .column(index)
        .as_any()
        .downcast_ref::<TimestampNanosecondArray>()
        .context(ColumnTypeSnafu {
            column,
            expected: "Timestamp(ns, UTC)",
            actual: batch.schema().field(index).data_type().to_string(),
        })?
        .clone();

    Ok(array
        .values()
        .iter()
        .map(|nanos| Utc.timestamp_nanos(*nanos))
        .collect())
}

/// Deserialize a dataset from Parquet bytes, reconstructing the axis, the
/// series columns, and all embedded tags.
pub fn dataset_from_parquet_bytes(bytes: Bytes) -> Result<Dataset, CodecError> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(bytes).context(ParquetSnafu)?;
    let schema = builder.schema().clone();

    let header_json = schema.metadata().get(META_KEY).context(MissingHeaderSnafu)?;
    let header: DatasetHeader = serde_json::from_str(header_json).context(HeaderSnafu)?;

    let reader = builder.build().context(ParquetSnafu)?;
    let batches: Vec<RecordBatch> = reader
        .collect::<Result<_, _>>()
        .context(ArrowSnafu)?;
    let batch = concat_batches(&schema, &batches).context(ArrowSnafu)?;

    let date_columns = header.series_type.date_columns();
    let axis = match date_columns {
        ["valid_at"] => DateAxis::At(timestamps_from_column(&batch, "valid_at")?),
        _ => DateAxis::FromTo {
            from: timestamps_from_column(&batch, "valid_from")?,
            to: timestamps_from_column(&batch, "valid_to")?,
        },
    };

    let mut dataset = Dataset::new(header.name, header.series_type, axis)
        .context(ModelSnafu)?
        .with_tags(header.tags);

    for (index, field) in schema.fields().iter().enumerate() {
        if date_columns.contains(&field.name().as_str()) {
            continue;
        }

        let array = batch
            .column(index)
            .as_any()
            .downcast_ref::<Float64Array>()
            .context(ColumnTypeSnafu {
                column: field.name().clone(),
                expected: "Float64",
                actual: field.data_type().to_string(),
            })?;
        let values: Vec<Option<f64>> = array.iter().collect();

        let tags: TagMap = match field.metadata().get(META_KEY) {
            Some(json) => serde_json::from_str(json).context(SeriesTagsSnafu {
                column: field.name().clone(),
            })?,
            None => TagMap::new(),
        };

        dataset
            .push_series(Series::with_tags(field.name().clone(), tags, values))
            .context(ModelSnafu)?;
    }

    Ok(dataset)
}

/// Errors raised while encoding or decoding artifacts.
#[derive(Debug, Snafu)]
pub enum CodecError {
    /// A Parquet read or write failed.
    #[snafu(display("Parquet error: {source}"))]
    Parquet {
        /// The underlying Parquet error.
        source: parquet::errors::ParquetError,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// An Arrow operation failed.
    #[snafu(display("Arrow error: {source}"))]
    Arrow {
        /// The underlying Arrow error.
        source: arrow::error::ArrowError,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// A date is outside the range representable as nanoseconds since epoch.
    #[snafu(display("Date {instant} is outside the representable timestamp range"))]
    TimestampRange {
        /// The offending instant.
        instant: DateTime<Utc>,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// The artifact carries no embedded dataset header.
    #[snafu(display("Artifact has no embedded dataset header"))]
    MissingHeader {
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// The embedded dataset header failed to (de)serialize.
    #[snafu(display("Invalid embedded dataset header: {source}"))]
    Header {
        /// The underlying JSON error.
        source: serde_json::Error,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// The embedded tags of one series column failed to (de)serialize.
    #[snafu(display("Invalid embedded tags for series column '{column}': {source}"))]
    SeriesTags {
        /// The series column with invalid tags.
        column: String,
        /// The underlying JSON error.
        source: serde_json::Error,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// A date column required by the dataset type is missing.
    #[snafu(display("Artifact is missing date column '{column}'"))]
    MissingDateColumn {
        /// The missing column name.
        column: String,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// A column has an unexpected Arrow type.
    #[snafu(display("Column '{column}' has type {actual}, expected {expected}"))]
    ColumnType {
        /// The offending column.
        column: String,
        /// The expected Arrow type.
        expected: String,
        /// The actual Arrow type found.
        actual: String,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// The decoded columns violate a dataset invariant.
    #[snafu(display("Decoded artifact violates a dataset invariant: {source}"))]
    Model {
        /// The underlying dataset error.
        source: DatasetError,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },
}

//! The physical storage handler protocol and its built-in strategies.
//!
//! A handler is one interchangeable strategy for laying a dataset out on the
//! storage medium. Every strategy implements the same protocol —
//! [`StorageHandler`] — so the I/O facade can treat them uniformly:
//!
//! - `write` persists one version of a dataset and embeds its tags in the
//!   artifact itself (the artifact stays self-describing even if the catalog
//!   is lost). Unversioned (`NONE`) writes replace the prior artifact
//!   atomically; `AS_OF` writes claim their version exactly once and fail
//!   with [`HandlerError::VersionConflict`] if it already exists.
//! - `read` returns the dataset for an exact version or the `latest`
//!   selector, failing with [`HandlerError::NotFound`] for missing datasets
//!   or versions.
//! - `list_versions` returns all as-of versions in ascending order (empty
//!   for unversioned datasets).
//! - `list_datasets` enumerates what physically exists, which is what makes
//!   catalog re-indexing possible without any catalog state.
//!
//! Two strategies are built in: [`simple::SimpleFileHandler`] (one file per
//! dataset version, version encoded in the filename) and
//! [`hive::HivePartitionHandler`] (one directory tree per dataset,
//! partitioned by type and version). Writing with one and reading with the
//! same one yields the same logical result for either choice.

pub mod hive;
pub mod simple;

use async_trait::async_trait;
use snafu::{Backtrace, prelude::*};

use crate::codec::CodecError;
use crate::dataset::Dataset;
use crate::storage::StorageError;
use crate::types::{SeriesType, Versioning};
use crate::version::{AsOfVersion, VersionSelector};

/// A dataset discovered in physical storage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatasetRef {
    /// The dataset name.
    pub name: String,
    /// The dataset type, as recorded in the physical layout.
    pub series_type: SeriesType,
    /// The dataset's physical location (directory), as a display string.
    pub locator: String,
}

/// The protocol all physical layout strategies implement.
#[async_trait]
pub trait StorageHandler: Send + Sync {
    /// The handler's registry name.
    fn name(&self) -> &'static str;

    /// Persist one version of `dataset`, returning the dataset's physical
    /// locator.
    ///
    /// `as_of` is required for `AS_OF` datasets and ignored otherwise.
    async fn write(
        &self,
        dataset: &Dataset,
        as_of: Option<&AsOfVersion>,
    ) -> Result<String, HandlerError>;

    /// Read one version of the dataset named `name` of type `series_type`.
    async fn read(
        &self,
        name: &str,
        series_type: SeriesType,
        selector: VersionSelector,
    ) -> Result<Dataset, HandlerError>;

    /// All as-of versions of the dataset, ascending. Empty for `NONE`.
    async fn list_versions(
        &self,
        name: &str,
        series_type: SeriesType,
    ) -> Result<Vec<AsOfVersion>, HandlerError>;

    /// Enumerate every dataset present in physical storage.
    async fn list_datasets(&self) -> Result<Vec<DatasetRef>, HandlerError>;
}

/// Errors raised by physical storage handlers.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum HandlerError {
    /// The dataset, or the requested version of it, does not exist.
    #[snafu(display("Dataset '{dataset}' not found{}", version.as_deref().map(|v| format!(" (version {v})")).unwrap_or_default()))]
    NotFound {
        /// The dataset that was requested.
        dataset: String,
        /// The specific version requested, if any.
        version: Option<String>,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// An `AS_OF` write targeted a version that already exists.
    #[snafu(display("Version {version} of dataset '{dataset}' already exists"))]
    VersionConflict {
        /// The dataset being written.
        dataset: String,
        /// The conflicting version.
        version: AsOfVersion,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// The dataset's versioning kind has no physical layout.
    #[snafu(display("Versioning {versioning} of dataset '{dataset}' has no physical layout"))]
    UnsupportedVersioning {
        /// The dataset in question.
        dataset: String,
        /// The unsupported versioning kind.
        versioning: Versioning,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// An `AS_OF` write was attempted without a version identifier.
    #[snafu(display("Dataset '{dataset}' is AS_OF versioned; a write requires an as-of version"))]
    MissingAsOf {
        /// The dataset being written.
        dataset: String,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// The storage medium failed.
    #[snafu(display("Storage failure: {source}"))]
    Storage {
        /// The underlying storage error.
        source: StorageError,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// Artifact (de)serialization failed.
    #[snafu(display("Artifact codec failure: {source}"))]
    Codec {
        /// The underlying codec error.
        source: CodecError,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },
}

/// Map a storage-layer read failure into the handler taxonomy, turning
/// `NotFound` into a dataset-scoped `NotFound`.
pub(crate) fn map_read_error(
    err: StorageError,
    dataset: &str,
    version: Option<String>,
) -> HandlerError {
    match err {
        StorageError::NotFound { .. } => HandlerError::NotFound {
            dataset: dataset.to_string(),
            version,
            backtrace: Backtrace::capture(),
        },
        other => HandlerError::Storage {
            source: other,
            backtrace: Backtrace::capture(),
        },
    }
}

/// Map an `AS_OF` create-new failure into the handler taxonomy, turning
/// `AlreadyExists` into `VersionConflict`.
pub(crate) fn map_version_write_error(
    err: StorageError,
    dataset: &str,
    version: &AsOfVersion,
) -> HandlerError {
    match err {
        StorageError::AlreadyExists { .. } => HandlerError::VersionConflict {
            dataset: dataset.to_string(),
            version: *version,
            backtrace: Backtrace::capture(),
        },
        other => HandlerError::Storage {
            source: other,
            backtrace: Backtrace::capture(),
        },
    }
}

/// Resolve the version a write must target, enforcing the per-versioning
/// rules shared by all layouts.
pub(crate) fn write_version<'a>(
    dataset: &Dataset,
    as_of: Option<&'a AsOfVersion>,
) -> Result<Option<&'a AsOfVersion>, HandlerError> {
    match dataset.series_type().versioning {
        Versioning::None => Ok(None),
        Versioning::AsOf => {
            let version = as_of.context(MissingAsOfSnafu {
                dataset: dataset.name().to_string(),
            })?;
            Ok(Some(version))
        }
        Versioning::Named => UnsupportedVersioningSnafu {
            dataset: dataset.name().to_string(),
            versioning: Versioning::Named,
        }
        .fail(),
    }
}

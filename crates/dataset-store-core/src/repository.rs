//! The I/O facade: one entry point per repository.
//!
//! A [`Repository`] binds an already-resolved [`RepositoryConfig`] to a live
//! handler (resolved once, through an injected [`HandlerRegistry`]) and to
//! the repository's [`FileCatalog`]. Every operation is a short, explicit
//! sequence:
//!
//! - `write`: validate type against the catalog → derive/validate the
//!   version → serialize via the handler → upsert the catalog. If the
//!   catalog upsert fails after the handler write succeeded, the data is
//!   durable but undiscoverable; that state surfaces as the recoverable
//!   [`IoError::CatalogSync`], repaired by [`Repository::reindex`].
//! - `read` / `list_versions`: resolve the dataset's type (catalog first,
//!   falling back to physical enumeration so reads survive a lost catalog)
//!   and delegate to the handler. Reads never mutate the catalog.
//! - `search`: evaluated entirely by the catalog.
//! - `persist`: copy the currently readable version to the archival
//!   location; additive only.
//!
//! There is no internal scheduler and no global state: operations are
//! invoked from a single caller thread of control, and cross-process safety
//! is exactly what the handlers' atomic rename / create-new primitives give.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use snafu::{Backtrace, prelude::*};
use tracing::{info, warn};

use crate::catalog::{CatalogEntry, CatalogError, CatalogQuery, FileCatalog};
use crate::codec;
use crate::dataset::Dataset;
use crate::handlers::{HandlerError, StorageHandler};
use crate::registry::{HandlerRegistry, RegistryError};
use crate::snapshot;
use crate::storage::RepoLocation;
use crate::types::SeriesType;
use crate::version::{AsOfVersion, VersionSelector};

/// Per-repository configuration, supplied by an external collaborator.
///
/// The core never loads configuration files itself; callers deserialize
/// this from wherever their configuration lives and hand it over.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Repository name.
    pub name: String,
    /// Root directory for data storage.
    pub directory: PathBuf,
    /// Directory holding the metadata catalog.
    pub catalog: PathBuf,
    /// Registry name of the data handler.
    pub data_handler: String,
    /// Root for archival snapshots, if persisting is configured.
    #[serde(default)]
    pub bucket: Option<PathBuf>,
    /// Whether this is the default repository.
    #[serde(default)]
    pub is_default: bool,
}

/// Receipt returned by a successful write.
#[derive(Clone, Debug)]
pub struct WriteReceipt {
    /// The dataset's physical locator.
    pub locator: String,
    /// The as-of version written, for `AS_OF` datasets.
    pub as_of: Option<AsOfVersion>,
}

/// The I/O facade for one repository.
pub struct Repository {
    config: RepositoryConfig,
    handler: Arc<dyn StorageHandler>,
    catalog: FileCatalog,
}

impl Repository {
    /// Bind a configuration to a handler resolved from `registry`.
    ///
    /// Handler resolution failure is fatal up front; no operation on a
    /// repository with an unresolvable handler can succeed.
    pub fn new(config: RepositoryConfig, registry: &HandlerRegistry) -> Result<Self, IoError> {
        let handler = registry
            .resolve(&config.data_handler, RepoLocation::local(&config.directory))
            .context(HandlerResolutionSnafu)?;
        let catalog = FileCatalog::new(RepoLocation::local(&config.catalog));
        Ok(Repository {
            config,
            handler,
            catalog,
        })
    }

    /// The repository's configuration.
    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// Resolve a dataset's type, preferring the catalog and falling back to
    /// physical enumeration so reads keep working with a lost catalog.
    async fn stored_type(&self, name: &str) -> Result<SeriesType, IoError> {
        match self.catalog.get(name).await {
            Ok(entry) => return Ok(entry.series_type),
            Err(CatalogError::EntryNotFound { .. }) => {}
            Err(source) => return Err(IoError::Catalog {
                source,
                backtrace: Backtrace::capture(),
            }),
        }

        let discovered = self
            .handler
            .list_datasets()
            .await
            .map_err(map_handler_error)?;
        discovered
            .into_iter()
            .find(|d| d.name == name)
            .map(|d| d.series_type)
            .context(NotFoundSnafu {
                dataset: name.to_string(),
                version: None::<String>,
            })
    }

    /// Write one version of `dataset`.
    ///
    /// `as_of` is required for `AS_OF` datasets and must be absent for
    /// unversioned ones.
    pub async fn write(
        &self,
        dataset: &Dataset,
        as_of: Option<AsOfVersion>,
    ) -> Result<WriteReceipt, IoError> {
        let name = dataset.name();

        // 1) Type validation against any existing catalog entry. No
        //    coercion: a disagreement is fatal.
        let existing = match self.catalog.get(name).await {
            Ok(entry) => Some(entry),
            Err(CatalogError::EntryNotFound { .. }) => None,
            Err(source) => {
                return Err(IoError::Catalog {
                    source,
                    backtrace: Backtrace::capture(),
                })
            }
        };
        if let Some(entry) = &existing {
            ensure!(
                dataset.series_type() == entry.series_type,
                TypeMismatchSnafu {
                    dataset: name.to_string(),
                    stored: entry.series_type,
                    requested: dataset.series_type(),
                }
            );
        }

        // 2) Version derivation per versioning kind.
        if dataset.series_type().versioning != crate::types::Versioning::AsOf {
            ensure!(
                as_of.is_none(),
                UnexpectedAsOfSnafu {
                    dataset: name.to_string(),
                }
            );
        }

        // 3) Serialize via the handler.
        let locator = self
            .handler
            .write(dataset, as_of.as_ref())
            .await
            .map_err(map_handler_error)?;

        // 4) Build the complete successor document and upsert it wholesale.
        let mut versions = existing.map(|e| e.versions).unwrap_or_default();
        if let Some(version) = as_of {
            versions.push(version);
            versions.sort();
            versions.dedup();
        }
        let entry = CatalogEntry {
            name: name.to_string(),
            series_type: dataset.series_type(),
            tags: dataset.tags().clone(),
            handler: self.handler.name().to_string(),
            locator: locator.clone(),
            versions,
        };

        if let Err(source) = self.catalog.upsert(&entry).await {
            // The artifact is durable; only discoverability is behind.
            warn!(
                dataset = name,
                locator = locator.as_str(),
                "data committed but catalog update failed; reindex to recover"
            );
            return Err(IoError::CatalogSync {
                dataset: name.to_string(),
                locator,
                source,
                backtrace: Backtrace::capture(),
            });
        }

        info!(dataset = name, repository = self.config.name.as_str(), "write committed");
        Ok(WriteReceipt { locator, as_of })
    }

    /// Read one version of the dataset named `name`.
    pub async fn read(&self, name: &str, selector: VersionSelector) -> Result<Dataset, IoError> {
        let series_type = self.stored_type(name).await?;
        self.handler
            .read(name, series_type, selector)
            .await
            .map_err(map_handler_error)
    }

    /// All as-of versions of the dataset, ascending; empty for unversioned.
    pub async fn list_versions(&self, name: &str) -> Result<Vec<AsOfVersion>, IoError> {
        let series_type = self.stored_type(name).await?;
        self.handler
            .list_versions(name, series_type)
            .await
            .map_err(map_handler_error)
    }

    /// Search the catalog. No data file is opened.
    pub async fn search(&self, query: &CatalogQuery) -> Result<Vec<CatalogEntry>, IoError> {
        self.catalog.search(query).await.context(CatalogSnafu)
    }

    /// Rebuild catalog entries from the tags embedded in the data files.
    ///
    /// This is the corrective path for [`IoError::CatalogSync`]: every
    /// physically present dataset gets a fresh document derived from its
    /// latest readable artifact. Returns the number of entries written.
    pub async fn reindex(&self) -> Result<usize, IoError> {
        let discovered = self
            .handler
            .list_datasets()
            .await
            .map_err(map_handler_error)?;

        let mut indexed = 0;
        for dataset_ref in discovered {
            let dataset = match self
                .handler
                .read(&dataset_ref.name, dataset_ref.series_type, VersionSelector::Latest)
                .await
            {
                Ok(dataset) => dataset,
                Err(HandlerError::NotFound { .. }) => {
                    // A dataset directory with no readable artifact yet.
                    warn!(dataset = %dataset_ref.name, "skipping dataset with no readable version");
                    continue;
                }
                Err(other) => return Err(map_handler_error(other)),
            };
            let versions = self
                .handler
                .list_versions(&dataset_ref.name, dataset_ref.series_type)
                .await
                .map_err(map_handler_error)?;

            let entry = CatalogEntry {
                name: dataset.name().to_string(),
                series_type: dataset.series_type(),
                tags: dataset.tags().clone(),
                handler: self.handler.name().to_string(),
                locator: dataset_ref.locator,
                versions,
            };
            self.catalog.upsert(&entry).await.context(CatalogSnafu)?;
            indexed += 1;
        }

        info!(
            repository = self.config.name.as_str(),
            entries = indexed,
            "catalog reindexed from embedded artifact tags"
        );
        Ok(indexed)
    }

    /// Copy the currently readable version of `name` to its archival
    /// location, and optionally to additional share roots.
    ///
    /// Additive only: every persist claims a fresh `_v<n>` file and existing
    /// archived files are never overwritten or deleted. Returns the primary
    /// archived path.
    pub async fn persist(
        &self,
        name: &str,
        process_stage: &str,
        product: &str,
        share: &[PathBuf],
    ) -> Result<PathBuf, IoError> {
        let bucket = self.config.bucket.as_ref().context(BucketNotConfiguredSnafu {
            repository: self.config.name.clone(),
        })?;

        let dataset = self.read(name, VersionSelector::Latest).await?;
        let versions = self.list_versions(name).await?;
        let as_of = versions.last().copied();

        let bytes = codec::dataset_to_parquet_bytes(&dataset).context(CodecSnafu)?;

        let directory = snapshot::resolve(bucket, process_stage, product, name);
        let next = snapshot::next_version_number(&directory)
            .await
            .context(SnapshotSnafu)?;
        let file_name = snapshot::snapshot_filename(name, dataset.period(), as_of.as_ref(), next);

        let archived = snapshot::write_archived(&directory, &file_name, &bytes)
            .await
            .context(SnapshotSnafu)?;

        for share_root in share {
            let share_dir = share_root.join(name);
            snapshot::write_archived(&share_dir, &file_name, &bytes)
                .await
                .context(SnapshotSnafu)?;
            info!(dataset = name, path = %share_dir.display(), "snapshot shared");
        }

        info!(dataset = name, path = %archived.display(), "snapshot persisted");
        Ok(archived)
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("config", &self.config)
            .field("handler", &self.handler.name())
            .finish()
    }
}

/// Lift handler failures into the facade taxonomy, preserving the variants
/// callers dispatch on.
fn map_handler_error(err: HandlerError) -> IoError {
    match err {
        HandlerError::NotFound {
            dataset, version, ..
        } => IoError::NotFound {
            dataset,
            version,
            backtrace: Backtrace::capture(),
        },
        HandlerError::VersionConflict {
            dataset, version, ..
        } => IoError::VersionConflict {
            dataset,
            version,
            backtrace: Backtrace::capture(),
        },
        other => IoError::Handler {
            source: other,
            backtrace: Backtrace::capture(),
        },
    }
}

/// The facade's error taxonomy.
#[derive(Debug, Snafu)]
pub enum IoError {
    /// The write's type disagrees with the stored dataset type. Fatal.
    #[snafu(display(
        "Type mismatch for dataset '{dataset}': stored {stored}, write requested {requested}"
    ))]
    TypeMismatch {
        /// The dataset being written.
        dataset: String,
        /// The type recorded for the existing dataset.
        stored: SeriesType,
        /// The type of the incoming write.
        requested: SeriesType,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// An `AS_OF` write targeted an existing version. Fatal; choose a new
    /// version.
    #[snafu(display("Version {version} of dataset '{dataset}' already exists"))]
    VersionConflict {
        /// The dataset being written.
        dataset: String,
        /// The conflicting version.
        version: AsOfVersion,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// The dataset or the requested version does not exist.
    #[snafu(display("Dataset '{dataset}' not found{}", version.as_deref().map(|v| format!(" (version {v})")).unwrap_or_default()))]
    NotFound {
        /// The dataset that was requested.
        dataset: String,
        /// The specific version requested, if any.
        version: Option<String>,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// Data committed durably but the catalog was not updated. Recoverable
    /// via [`Repository::reindex`]; not data loss.
    #[snafu(display(
        "Dataset '{dataset}' written to {locator} but the catalog update failed: {source}"
    ))]
    CatalogSync {
        /// The dataset that was written.
        dataset: String,
        /// Where the data was durably written.
        locator: String,
        /// The catalog failure.
        source: CatalogError,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// The configured handler name could not be resolved. Fatal at the
    /// start of the operation.
    #[snafu(display("Handler resolution failed: {source}"))]
    HandlerResolution {
        /// The underlying registry error.
        source: RegistryError,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// An unversioned write carried an as-of version.
    #[snafu(display("Dataset '{dataset}' is unversioned; a write must not carry an as-of version"))]
    UnexpectedAsOf {
        /// The dataset being written.
        dataset: String,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// Persisting requires a configured snapshot bucket.
    #[snafu(display("Repository '{repository}' has no snapshot bucket configured"))]
    BucketNotConfigured {
        /// The repository lacking a bucket.
        repository: String,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// A handler failure outside the named taxonomy.
    #[snafu(display("Handler failure: {source}"))]
    Handler {
        /// The underlying handler error.
        source: HandlerError,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// A catalog failure outside the write path.
    #[snafu(display("Catalog failure: {source}"))]
    Catalog {
        /// The underlying catalog error.
        source: CatalogError,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// Artifact (de)serialization failed on the persist path.
    #[snafu(display("Artifact codec failure: {source}"))]
    Codec {
        /// The underlying codec error.
        source: codec::CodecError,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// The persist path failed.
    #[snafu(display("Snapshot failure: {source}"))]
    Snapshot {
        /// The underlying snapshot error.
        source: snapshot::SnapshotError,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },
}

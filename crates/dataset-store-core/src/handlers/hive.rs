//! Partitioned-directory (hive-style) layout.
//!
//! One directory tree per dataset, partitioned by type and by version:
//!
//! ```text
//! <root>/
//! ├── data_type=AS_OF_AT/
//! │   └── dataset=prices_v/
//! │       ├── as_of=2023-01-01T000000+0000/
//! │       │   └── part-0.parquet
//! │       └── as_of=2023-02-01T000000+0000/
//! │           └── part-0.parquet
//! └── data_type=NONE_AT/
//!     └── dataset=energy_prices/
//!         └── as_of=__DEFAULT_PARTITION__/
//!             └── part-0.parquet
//! ```
//!
//! Unversioned datasets occupy the reserved `__DEFAULT_PARTITION__` sentinel,
//! so one external query over the whole tree can treat versioned and
//! unversioned data uniformly (the version is simply absent for sentinel
//! rows). The as-of instant lives only in the partition directory name; the
//! `part-0.parquet` payload is identical to what the single-file layout
//! writes, which is what makes the two strategies interchangeable.

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use snafu::prelude::*;
use tracing::{debug, info};

use crate::codec;
use crate::dataset::Dataset;
use crate::handlers::{
    map_read_error, map_version_write_error, write_version, CodecSnafu, DatasetRef, HandlerError,
    NotFoundSnafu, StorageHandler, StorageSnafu, UnsupportedVersioningSnafu,
};
use crate::storage::{self, EntryKind, RepoLocation};
use crate::types::{SeriesType, Versioning};
use crate::version::{AsOfVersion, VersionSelector};

/// Registry name of this handler.
pub const HANDLER_NAME: &str = "hive";

/// Reserved partition value occupied by unversioned datasets.
pub const DEFAULT_PARTITION: &str = "__DEFAULT_PARTITION__";

const TYPE_PREFIX: &str = "data_type=";
const SET_PREFIX: &str = "dataset=";
const AS_OF_PREFIX: &str = "as_of=";
const PART_FILE: &str = "part-0.parquet";

/// The partitioned-directory layout strategy.
#[derive(Clone, Debug)]
pub struct HivePartitionHandler {
    root: RepoLocation,
}

impl HivePartitionHandler {
    /// Create a handler rooted at a repository location.
    pub fn new(root: RepoLocation) -> Self {
        HivePartitionHandler { root }
    }

    fn set_dir(series_type: SeriesType, name: &str) -> PathBuf {
        PathBuf::from(format!("{TYPE_PREFIX}{}", series_type.dir_name()))
            .join(format!("{SET_PREFIX}{name}"))
    }

    fn partition_segment(as_of: Option<&AsOfVersion>) -> String {
        match as_of {
            Some(version) => format!("{AS_OF_PREFIX}{}", version.encode()),
            None => format!("{AS_OF_PREFIX}{DEFAULT_PARTITION}"),
        }
    }

    fn artifact_path(series_type: SeriesType, name: &str, as_of: Option<&AsOfVersion>) -> PathBuf {
        Self::set_dir(series_type, name)
            .join(Self::partition_segment(as_of))
            .join(PART_FILE)
    }

    async fn read_artifact(
        &self,
        name: &str,
        series_type: SeriesType,
        as_of: Option<&AsOfVersion>,
    ) -> Result<Dataset, HandlerError> {
        let rel = Self::artifact_path(series_type, name, as_of);
        let bytes = storage::read_all_bytes(&self.root, &rel)
            .await
            .map_err(|e| map_read_error(e, name, as_of.map(|v| v.encode())))?;
        codec::dataset_from_parquet_bytes(Bytes::from(bytes)).context(CodecSnafu)
    }
}

#[async_trait]
impl StorageHandler for HivePartitionHandler {
    fn name(&self) -> &'static str {
        HANDLER_NAME
    }

    async fn write(
        &self,
        dataset: &Dataset,
        as_of: Option<&AsOfVersion>,
    ) -> Result<String, HandlerError> {
        let version = write_version(dataset, as_of)?;
        let series_type = dataset.series_type();
        let rel = Self::artifact_path(series_type, dataset.name(), version);

        let bytes = codec::dataset_to_parquet_bytes(dataset).context(CodecSnafu)?;

        match version {
            None => {
                storage::write_atomic(&self.root, &rel, &bytes)
                    .await
                    .context(StorageSnafu)?;
            }
            Some(v) => {
                storage::write_new(&self.root, &rel, &bytes)
                    .await
                    .map_err(|e| map_version_write_error(e, dataset.name(), v))?;
            }
        }

        let locator = self
            .root
            .join(&Self::set_dir(series_type, dataset.name()))
            .display()
            .to_string();
        info!(
            dataset = dataset.name(),
            path = %self.root.join(&rel).display(),
            "wrote dataset partition"
        );
        Ok(locator)
    }

    async fn read(
        &self,
        name: &str,
        series_type: SeriesType,
        selector: VersionSelector,
    ) -> Result<Dataset, HandlerError> {
        match (series_type.versioning, selector) {
            (Versioning::None, VersionSelector::Latest) => {
                self.read_artifact(name, series_type, None).await
            }
            (Versioning::None, VersionSelector::AsOf(version)) => NotFoundSnafu {
                dataset: name.to_string(),
                version: Some(version.encode()),
            }
            .fail(),
            (Versioning::AsOf, VersionSelector::AsOf(version)) => {
                self.read_artifact(name, series_type, Some(&version)).await
            }
            (Versioning::AsOf, VersionSelector::Latest) => {
                let versions = self.list_versions(name, series_type).await?;
                let latest = versions.last().context(NotFoundSnafu {
                    dataset: name.to_string(),
                    version: None::<String>,
                })?;
                self.read_artifact(name, series_type, Some(latest)).await
            }
            (Versioning::Named, _) => UnsupportedVersioningSnafu {
                dataset: name.to_string(),
                versioning: Versioning::Named,
            }
            .fail(),
        }
    }

    async fn list_versions(
        &self,
        name: &str,
        series_type: SeriesType,
    ) -> Result<Vec<AsOfVersion>, HandlerError> {
        if series_type.versioning != Versioning::AsOf {
            return Ok(Vec::new());
        }

        let dir = Self::set_dir(series_type, name);
        let entries = storage::list_dir(&self.root, &dir)
            .await
            .context(StorageSnafu)?;

        let mut versions = Vec::new();
        for entry in entries {
            if entry.kind != EntryKind::Dir {
                continue;
            }
            let Some(encoded) = entry.name.strip_prefix(AS_OF_PREFIX) else {
                debug!(dir = %entry.name, "skipping non-partition directory");
                continue;
            };
            if encoded == DEFAULT_PARTITION {
                continue;
            }
            match AsOfVersion::decode(encoded) {
                Ok(version) => versions.push(version),
                Err(_) => debug!(dir = %entry.name, "skipping unparsable partition value"),
            }
        }

        versions.sort();
        Ok(versions)
    }

    async fn list_datasets(&self) -> Result<Vec<DatasetRef>, HandlerError> {
        let mut found = Vec::new();

        let type_dirs = storage::list_dir(&self.root, std::path::Path::new(""))
            .await
            .context(StorageSnafu)?;

        for type_dir in type_dirs {
            if type_dir.kind != EntryKind::Dir {
                continue;
            }
            let Some(series_type) = type_dir
                .name
                .strip_prefix(TYPE_PREFIX)
                .and_then(|v| v.parse::<SeriesType>().ok())
            else {
                debug!(dir = %type_dir.name, "skipping non-type partition");
                continue;
            };

            let sets = storage::list_dir(&self.root, std::path::Path::new(&type_dir.name))
                .await
                .context(StorageSnafu)?;
            for set in sets {
                if set.kind != EntryKind::Dir {
                    continue;
                }
                let Some(name) = set.name.strip_prefix(SET_PREFIX) else {
                    debug!(dir = %set.name, "skipping non-dataset partition");
                    continue;
                };
                let locator = self
                    .root
                    .join(&Self::set_dir(series_type, name))
                    .display()
                    .to_string();
                found.push(DatasetRef {
                    name: name.to_string(),
                    series_type,
                    locator,
                });
            }
        }

        Ok(found)
    }
}

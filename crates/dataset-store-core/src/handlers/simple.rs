//! Single-file-per-version layout.
//!
//! One Parquet file per `(dataset, version)`, the version encoded in the
//! filename:
//!
//! ```text
//! <root>/
//! ├── AS_OF_AT/
//! │   └── prices_v/
//! │       ├── prices_v-as_of_2023-01-01T000000+0000-data.parquet
//! │       └── prices_v-as_of_2023-02-01T000000+0000-data.parquet
//! └── NONE_AT/
//!     └── energy_prices/
//!         └── energy_prices-latest-data.parquet
//! ```
//!
//! Versioned and unversioned datasets live under separate type directories,
//! so the `latest` artifact of an unversioned dataset can never collide with
//! an as-of artifact. Unversioned writes replace the `latest` file via
//! temp-write-then-rename; versioned writes create their file with
//! create-new semantics so a duplicate version is rejected without touching
//! the existing artifact.

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
pub const HANDLER_NAME: &str = "simple";

const DATA_SUFFIX: &str = "-data.parquet";

/// The single-file-per-version layout strategy.
#[derive(Clone, Debug)]
pub struct SimpleFileHandler {
    root: RepoLocation,
}

impl SimpleFileHandler {
    /// Create a handler rooted at a repository location.
    pub fn new(root: RepoLocation) -> Self {
        SimpleFileHandler { root }
    }

    fn set_dir(series_type: SeriesType, name: &str) -> PathBuf {
        PathBuf::from(series_type.dir_name()).join(name)
    }

    fn file_name(name: &str, as_of: Option<&AsOfVersion>) -> String {
        match as_of {
            Some(version) => format!("{name}-as_of_{}{DATA_SUFFIX}", version.encode()),
            None => format!("{name}-latest{DATA_SUFFIX}"),
        }
    }

    fn artifact_path(series_type: SeriesType, name: &str, as_of: Option<&AsOfVersion>) -> PathBuf {
        Self::set_dir(series_type, name).join(Self::file_name(name, as_of))
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
impl StorageHandler for SimpleFileHandler {
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
            "wrote dataset artifact"
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
        let prefix = format!("{name}-as_of_");

        let entries = storage::list_dir(&self.root, &dir)
            .await
            .context(StorageSnafu)?;

        let mut versions = Vec::new();
        for entry in entries {
            if entry.kind != EntryKind::File {
                continue;
            }
            let Some(encoded) = entry
                .name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(DATA_SUFFIX))
            else {
                debug!(file = %entry.name, "skipping non-version file");
                continue;
            };
            match AsOfVersion::decode(encoded) {
                Ok(version) => versions.push(version),
                Err(_) => debug!(file = %entry.name, "skipping unparsable version marker"),
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
            let Ok(series_type) = type_dir.name.parse::<SeriesType>() else {
                debug!(dir = %type_dir.name, "skipping non-type directory");
                continue;
            };

            let sets = storage::list_dir(&self.root, std::path::Path::new(&type_dir.name))
                .await
                .context(StorageSnafu)?;
            for set in sets {
                if set.kind != EntryKind::Dir {
                    continue;
                }
                let locator = self
                    .root
                    .join(&Self::set_dir(series_type, &set.name))
                    .display()
                    .to_string();
                found.push(DatasetRef {
                    name: set.name,
                    series_type,
                    locator,
                });
            }
        }

        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{DateAxis, Series};
    use chrono::{DateTime, TimeZone, Utc};
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, d, 0, 0, 0).single().unwrap()
    }

    fn unversioned(values: &[f64]) -> Dataset {
        Dataset::new(
            "energy_prices",
            SeriesType::none_at(),
            DateAxis::At(vec![day(1), day(2), day(3)]),
        )
        .unwrap()
        .with_series(Series::new(
            "spot",
            values.iter().map(|v| Some(*v)).collect(),
        ))
        .unwrap()
    }

    fn versioned(value: f64) -> Dataset {
        Dataset::new(
            "prices_v",
            SeriesType::as_of_at(),
            DateAxis::At(vec![day(1)]),
        )
        .unwrap()
        .with_series(Series::new("spot", vec![Some(value)]))
        .unwrap()
    }

    fn as_of(month: u32) -> AsOfVersion {
        AsOfVersion::new(
            Utc.with_ymd_and_hms(2023, month, 1, 0, 0, 0).single().unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn unversioned_artifact_uses_latest_filename() -> TestResult {
        let tmp = TempDir::new()?;
        let handler = SimpleFileHandler::new(RepoLocation::local(tmp.path()));

        handler.write(&unversioned(&[1.0, 2.0, 3.0]), None).await?;

        let expected = tmp
            .path()
            .join("NONE_AT/energy_prices/energy_prices-latest-data.parquet");
        assert!(expected.exists());
        Ok(())
    }

    #[tokio::test]
    async fn versioned_artifact_embeds_version_in_filename() -> TestResult {
        let tmp = TempDir::new()?;
        let handler = SimpleFileHandler::new(RepoLocation::local(tmp.path()));

        handler.write(&versioned(10.0), Some(&as_of(1))).await?;

        let expected = tmp.path().join(
            "AS_OF_AT/prices_v/prices_v-as_of_2023-01-01T000000+0000-data.parquet",
        );
        assert!(expected.exists());
        Ok(())
    }

    #[tokio::test]
    async fn as_of_write_requires_version() -> TestResult {
        let tmp = TempDir::new()?;
        let handler = SimpleFileHandler::new(RepoLocation::local(tmp.path()));

        let err = handler.write(&versioned(10.0), None).await.unwrap_err();
        assert!(matches!(err, HandlerError::MissingAsOf { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_version_is_a_conflict_and_keeps_original() -> TestResult {
        let tmp = TempDir::new()?;
        let handler = SimpleFileHandler::new(RepoLocation::local(tmp.path()));

        handler.write(&versioned(10.0), Some(&as_of(1))).await?;
        let err = handler
            .write(&versioned(99.0), Some(&as_of(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::VersionConflict { .. }));

        let back = handler
            .read(
                "prices_v",
                SeriesType::as_of_at(),
                VersionSelector::AsOf(as_of(1)),
            )
            .await?;
        assert_eq!(back.series_named("spot").unwrap().values, vec![Some(10.0)]);
        Ok(())
    }

    #[tokio::test]
    async fn latest_reflects_second_overwrite() -> TestResult {
        let tmp = TempDir::new()?;
        let handler = SimpleFileHandler::new(RepoLocation::local(tmp.path()));

        handler.write(&unversioned(&[1.0, 2.0, 3.0]), None).await?;
        handler.write(&unversioned(&[4.0, 5.0, 6.0]), None).await?;

        let back = handler
            .read(
                "energy_prices",
                SeriesType::none_at(),
                VersionSelector::Latest,
            )
            .await?;
        assert_eq!(
            back.series_named("spot").unwrap().values,
            vec![Some(4.0), Some(5.0), Some(6.0)]
        );
        Ok(())
    }

    #[tokio::test]
    async fn list_versions_ascending_and_latest_wins() -> TestResult {
        let tmp = TempDir::new()?;
        let handler = SimpleFileHandler::new(RepoLocation::local(tmp.path()));

        // Write out of order; listing must still be ascending.
        handler.write(&versioned(20.0), Some(&as_of(2))).await?;
        handler.write(&versioned(10.0), Some(&as_of(1))).await?;

        let versions = handler
            .list_versions("prices_v", SeriesType::as_of_at())
            .await?;
        assert_eq!(versions, vec![as_of(1), as_of(2)]);

        let latest = handler
            .read("prices_v", SeriesType::as_of_at(), VersionSelector::Latest)
            .await?;
        assert_eq!(latest.series_named("spot").unwrap().values, vec![Some(20.0)]);
        Ok(())
    }

    #[tokio::test]
    async fn list_versions_empty_for_unversioned() -> TestResult {
        let tmp = TempDir::new()?;
        let handler = SimpleFileHandler::new(RepoLocation::local(tmp.path()));

        handler.write(&unversioned(&[1.0, 2.0, 3.0]), None).await?;

        let versions = handler
            .list_versions("energy_prices", SeriesType::none_at())
            .await?;
        assert!(versions.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn missing_dataset_reads_as_not_found() -> TestResult {
        let tmp = TempDir::new()?;
        let handler = SimpleFileHandler::new(RepoLocation::local(tmp.path()));

        let err = handler
            .read("nothing", SeriesType::none_at(), VersionSelector::Latest)
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::NotFound { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn list_datasets_discovers_both_kinds() -> TestResult {
        let tmp = TempDir::new()?;
        let handler = SimpleFileHandler::new(RepoLocation::local(tmp.path()));

        handler.write(&unversioned(&[1.0, 2.0, 3.0]), None).await?;
        handler.write(&versioned(10.0), Some(&as_of(1))).await?;

        let mut found = handler.list_datasets().await?;
        found.sort_by(|a, b| a.name.cmp(&b.name));

        assert_eq!(found.len(), 2);
        assert_eq!(found[0].name, "energy_prices");
        assert_eq!(found[0].series_type, SeriesType::none_at());
        assert_eq!(found[1].name, "prices_v");
        assert_eq!(found[1].series_type, SeriesType::as_of_at());
        Ok(())
    }
}

//! Snapshot path resolution and additive archival naming.
//!
//! [`resolve`] is the pure function computing where a dataset's archival
//! copies live: `<root>/<process stage>/<product>/<dataset name>`. Archived
//! files are never overwritten or deleted by this layer; each persist claims
//! the next `_v<n>` suffix, so repeated persists of the same dataset
//! accumulate side by side.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use snafu::{Backtrace, prelude::*};

use crate::storage::{self, EntryKind, RepoLocation, StorageError};
use crate::version::AsOfVersion;

const SNAPSHOT_EXT: &str = ".parquet";

/// Compute the archival directory for a dataset.
///
/// Pure concatenation of the four inputs as fixed ordered segments;
/// identical inputs always yield the identical path.
pub fn resolve(root: &Path, process_stage: &str, product: &str, dataset_name: &str) -> PathBuf {
    root.join(process_stage).join(product).join(dataset_name)
}

fn iso_no_colon(instant: &DateTime<Utc>) -> String {
    instant.format("%Y-%m-%dT%H%M%S%z").to_string()
}

/// Construct the archived snapshot filename.
///
/// `<set>_p<from>_p<to>[_v<as_of>]_v<n>.parquet`, all instants colon-free.
/// The period segments are omitted for an empty dataset.
pub fn snapshot_filename(
    dataset_name: &str,
    period: Option<(DateTime<Utc>, DateTime<Utc>)>,
    as_of: Option<&AsOfVersion>,
    next_version: u64,
) -> String {
    let mut name = dataset_name.to_string();
    if let Some((from, to)) = period {
        name.push_str(&format!("_p{}_p{}", iso_no_colon(&from), iso_no_colon(&to)));
    }
    if let Some(version) = as_of {
        name.push_str(&format!("_v{}", version.encode()));
    }
    name.push_str(&format!("_v{next_version}{SNAPSHOT_EXT}"));
    name
}

/// Extract the trailing `_v<n>` marker from an archived filename.
///
/// Instant markers also start with `_v`, so only the last marker before the
/// extension counts, and it must be purely numeric.
fn version_number_from_file_name(file_name: &str) -> Option<u64> {
    let stem = file_name.strip_suffix(SNAPSHOT_EXT)?;
    let (_, digits) = stem.rsplit_once("_v")?;
    digits.parse().ok()
}

/// The next free `_v<n>` number in an archival directory.
///
/// Returns 1 + the maximum existing number, or 1 for an empty (or absent)
/// directory.
pub async fn next_version_number(dir: &Path) -> Result<u64, SnapshotError> {
    let location = RepoLocation::local(dir);
    let entries = storage::list_dir(&location, Path::new(""))
        .await
        .context(StorageSnafu)?;

    let max = entries
        .iter()
        .filter(|e| e.kind == EntryKind::File)
        .filter_map(|e| version_number_from_file_name(&e.name))
        .max()
        .unwrap_or(0);

    Ok(max + 1)
}

/// Write `contents` as a brand-new archived file, refusing to overwrite.
pub async fn write_archived(
    dir: &Path,
    file_name: &str,
    contents: &[u8],
) -> Result<PathBuf, SnapshotError> {
    let location = RepoLocation::local(dir);
    storage::write_new(&location, Path::new(file_name), contents)
        .await
        .context(StorageSnafu)?;
    Ok(dir.join(file_name))
}

/// Errors raised on the persist path.
#[derive(Debug, Snafu)]
pub enum SnapshotError {
    /// The storage medium failed.
    #[snafu(display("Snapshot storage failure: {source}"))]
    Storage {
        /// The underlying storage error.
        source: StorageError,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn resolve_is_deterministic_segment_concatenation() {
        let a = resolve(Path::new("/bucket"), "statistikk", "p1", "energy_prices");
        let b = resolve(Path::new("/bucket"), "statistikk", "p1", "energy_prices");
        assert_eq!(a, b);
        assert_eq!(a, PathBuf::from("/bucket/statistikk/p1/energy_prices"));
    }

    #[test]
    fn filename_contains_period_version_and_counter() {
        let from = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).single().unwrap();
        let to = Utc.with_ymd_and_hms(2023, 1, 3, 0, 0, 0).single().unwrap();
        let as_of = AsOfVersion::new(
            Utc.with_ymd_and_hms(2023, 2, 1, 0, 0, 0).single().unwrap(),
        )
        .unwrap();

        let name = snapshot_filename("prices_v", Some((from, to)), Some(&as_of), 2);
        assert_eq!(
            name,
            "prices_v_p2023-01-01T000000+0000_p2023-01-03T000000+0000_v2023-02-01T000000+0000_v2.parquet"
        );
        assert!(!name.contains(':'));
    }

    #[test]
    fn filename_without_period_or_as_of() {
        assert_eq!(snapshot_filename("empty_set", None, None, 1), "empty_set_v1.parquet");
    }

    #[test]
    fn version_number_ignores_instant_markers() {
        assert_eq!(
            version_number_from_file_name(
                "prices_v_p2023-01-01T000000+0000_p2023-01-03T000000+0000_v2023-02-01T000000+0000_v7.parquet"
            ),
            Some(7)
        );
        assert_eq!(version_number_from_file_name("notes.txt"), None);
        // An instant directly before the extension is not a counter.
        assert_eq!(
            version_number_from_file_name("x_v2023-02-01T000000+0000.parquet"),
            None
        );
    }

    #[tokio::test]
    async fn next_version_number_increments_over_existing_files() -> TestResult {
        let tmp = TempDir::new()?;

        assert_eq!(next_version_number(tmp.path()).await?, 1);

        tokio::fs::write(tmp.path().join("set_v1.parquet"), b"a").await?;
        tokio::fs::write(tmp.path().join("set_v3.parquet"), b"b").await?;

        assert_eq!(next_version_number(tmp.path()).await?, 4);
        Ok(())
    }

    #[tokio::test]
    async fn write_archived_refuses_to_overwrite() -> TestResult {
        let tmp = TempDir::new()?;

        write_archived(tmp.path(), "set_v1.parquet", b"first").await?;
        let err = write_archived(tmp.path(), "set_v1.parquet", b"second")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SnapshotError::Storage {
                source: StorageError::AlreadyExists { .. },
                ..
            }
        ));

        let read_back = tokio::fs::read(tmp.path().join("set_v1.parquet")).await?;
        assert_eq!(read_back, b"first");
        Ok(())
    }
}

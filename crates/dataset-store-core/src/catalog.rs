//! The metadata catalog: a searchable index independent of the data files.
//!
//! Each dataset has one JSON document, `<catalog dir>/<name>-metadata.json`,
//! recording its name, type, tags, the handler that stores it, its physical
//! locator, and the as-of versions known at the last write. The document is
//! a point-in-time copy of the tags embedded in the data artifacts — the two
//! can transiently diverge when a write partially fails, which is exactly
//! what re-indexing repairs.
//!
//! `upsert` replaces a document wholesale via an atomic write; no
//! partial-field mutation exists. `search` evaluates its predicates over the
//! documents alone and never opens a data file.

use std::path::PathBuf;

use regex::Regex;
use serde::{Deserialize, Serialize};
use snafu::{Backtrace, prelude::*};
use tracing::debug;

use crate::storage::{self, EntryKind, RepoLocation, StorageError};
use crate::tags::{self, TagMap};
use crate::types::SeriesType;
use crate::version::AsOfVersion;

const METADATA_SUFFIX: &str = "-metadata.json";

/// One dataset's catalog document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Dataset name (the document key).
    pub name: String,
    /// The dataset's fixed type.
    #[serde(rename = "type")]
    pub series_type: SeriesType,
    /// Point-in-time copy of the dataset-level tags.
    pub tags: TagMap,
    /// Registry name of the handler storing the data.
    pub handler: String,
    /// Physical locator of the dataset's storage.
    pub locator: String,
    /// As-of versions known at the last catalog update, ascending.
    #[serde(default)]
    pub versions: Vec<AsOfVersion>,
}

/// Predicates evaluated by [`FileCatalog::search`].
///
/// All set predicates must hold (conjunction). Empty criteria match every
/// entry.
#[derive(Clone, Debug, Default)]
pub struct CatalogQuery {
    /// Exact dataset name.
    pub name_equals: Option<String>,
    /// Regular expression over the dataset name.
    pub name_regex: Option<String>,
    /// Tag criteria: every key present, every value contained.
    pub tags: TagMap,
}

impl CatalogQuery {
    /// Criteria matching every entry.
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to an exact dataset name.
    pub fn name_equals(mut self, name: impl Into<String>) -> Self {
        self.name_equals = Some(name.into());
        self
    }

    /// Restrict names to those matching a regular expression.
    pub fn name_matches(mut self, pattern: impl Into<String>) -> Self {
        self.name_regex = Some(pattern.into());
        self
    }

    /// Restrict to entries whose tags satisfy `criteria`.
    pub fn tags(mut self, criteria: TagMap) -> Self {
        self.tags = criteria;
        self
    }
}

/// File-based catalog rooted at a metadata directory.
#[derive(Clone, Debug)]
pub struct FileCatalog {
    dir: RepoLocation,
}

impl FileCatalog {
    /// Open a catalog rooted at `dir`.
    pub fn new(dir: RepoLocation) -> Self {
        FileCatalog { dir }
    }

    fn entry_path(name: &str) -> PathBuf {
        PathBuf::from(format!("{name}{METADATA_SUFFIX}"))
    }

    /// Replace (or create) the document for `entry.name` wholesale.
    pub async fn upsert(&self, entry: &CatalogEntry) -> Result<(), CatalogError> {
        let json = serde_json::to_vec_pretty(entry).context(SerializeSnafu {
            name: entry.name.clone(),
        })?;
        storage::write_atomic(&self.dir, &Self::entry_path(&entry.name), &json)
            .await
            .context(StorageSnafu)?;
        debug!(dataset = %entry.name, "catalog entry upserted");
        Ok(())
    }

    /// Fetch the document for `name`.
    pub async fn get(&self, name: &str) -> Result<CatalogEntry, CatalogError> {
        let path = Self::entry_path(name);
        let json = match storage::read_to_string(&self.dir, &path).await {
            Ok(json) => json,
            Err(StorageError::NotFound { .. }) => {
                return EntryNotFoundSnafu {
                    name: name.to_string(),
                }
                .fail()
            }
            Err(source) => return Err(source).context(StorageSnafu),
        };
        serde_json::from_str(&json).context(CorruptSnafu {
            path: path.display().to_string(),
        })
    }

    /// Evaluate `query` over all documents.
    ///
    /// Results are sorted by dataset name. Only the catalog directory is
    /// read; no data file is opened.
    pub async fn search(&self, query: &CatalogQuery) -> Result<Vec<CatalogEntry>, CatalogError> {
        let name_regex = match &query.name_regex {
            Some(pattern) => Some(Regex::new(pattern).context(InvalidPatternSnafu {
                pattern: pattern.clone(),
            })?),
            None => None,
        };

        let entries = storage::list_dir(&self.dir, std::path::Path::new(""))
            .await
            .context(StorageSnafu)?;

        let mut results = Vec::new();
        for file in entries {
            if file.kind != EntryKind::File || !file.name.ends_with(METADATA_SUFFIX) {
                continue;
            }

            let json = storage::read_to_string(&self.dir, std::path::Path::new(&file.name))
                .await
                .context(StorageSnafu)?;
            let entry: CatalogEntry = serde_json::from_str(&json).context(CorruptSnafu {
                path: file.name.clone(),
            })?;

            if let Some(wanted) = &query.name_equals {
                if &entry.name != wanted {
                    continue;
                }
            }
            if let Some(regex) = &name_regex {
                if !regex.is_match(&entry.name) {
                    continue;
                }
            }
            if !tags::matches(&entry.tags, &query.tags) {
                continue;
            }

            results.push(entry);
        }

        results.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(results)
    }
}

/// Errors raised by the catalog.
#[derive(Debug, Snafu)]
pub enum CatalogError {
    /// No document exists for the dataset.
    #[snafu(display("No catalog entry for dataset '{name}'"))]
    EntryNotFound {
        /// The dataset that has no entry.
        name: String,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// A catalog document could not be serialized.
    #[snafu(display("Failed to serialize catalog entry for '{name}': {source}"))]
    Serialize {
        /// The dataset whose entry failed to serialize.
        name: String,
        /// The underlying JSON error.
        source: serde_json::Error,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// A catalog document exists but is not valid JSON for an entry.
    #[snafu(display("Corrupt catalog document at {path}: {source}"))]
    Corrupt {
        /// The offending document path.
        path: String,
        /// The underlying JSON error.
        source: serde_json::Error,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// A name predicate is not a valid regular expression.
    #[snafu(display("Invalid name pattern '{pattern}': {source}"))]
    InvalidPattern {
        /// The pattern that failed to compile.
        pattern: String,
        /// The underlying regex error.
        source: regex::Error,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// The storage medium failed.
    #[snafu(display("Catalog storage failure: {source}"))]
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
    use crate::tags::{add_tag, TagValue};
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn entry(name: &str, unit: &str) -> CatalogEntry {
        let mut tags = TagMap::new();
        add_tag(&mut tags, "unit", unit);
        CatalogEntry {
            name: name.to_string(),
            series_type: SeriesType::none_at(),
            tags,
            handler: "simple".to_string(),
            locator: format!("/data/NONE_AT/{name}"),
            versions: Vec::new(),
        }
    }

    #[tokio::test]
    async fn upsert_then_get_round_trips() -> TestResult {
        let tmp = TempDir::new()?;
        let catalog = FileCatalog::new(RepoLocation::local(tmp.path()));

        let e = entry("energy_prices", "NOK");
        catalog.upsert(&e).await?;

        let back = catalog.get("energy_prices").await?;
        assert_eq!(back, e);
        Ok(())
    }

    #[tokio::test]
    async fn upsert_replaces_wholesale() -> TestResult {
        let tmp = TempDir::new()?;
        let catalog = FileCatalog::new(RepoLocation::local(tmp.path()));

        catalog.upsert(&entry("energy_prices", "NOK")).await?;
        let replacement = entry("energy_prices", "EUR");
        catalog.upsert(&replacement).await?;

        let back = catalog.get("energy_prices").await?;
        assert_eq!(back, replacement);
        Ok(())
    }

    #[tokio::test]
    async fn get_missing_entry_fails() -> TestResult {
        let tmp = TempDir::new()?;
        let catalog = FileCatalog::new(RepoLocation::local(tmp.path()));

        let err = catalog.get("nothing").await.unwrap_err();
        assert!(matches!(err, CatalogError::EntryNotFound { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn tag_search_returns_exactly_the_matching_set() -> TestResult {
        let tmp = TempDir::new()?;
        let catalog = FileCatalog::new(RepoLocation::local(tmp.path()));

        catalog.upsert(&entry("energy_prices", "NOK")).await?;
        catalog.upsert(&entry("gas_prices", "EUR")).await?;

        let mut both = entry("power_flows", "MWh");
        add_tag(&mut both.tags, "unit", "NOK");
        catalog.upsert(&both).await?;

        let mut criteria = TagMap::new();
        add_tag(&mut criteria, "unit", "NOK");

        let hits = catalog.search(&CatalogQuery::all().tags(criteria)).await?;
        let names: Vec<&str> = hits.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["energy_prices", "power_flows"]);
        Ok(())
    }

    #[tokio::test]
    async fn name_predicates_are_exact_or_regex() -> TestResult {
        let tmp = TempDir::new()?;
        let catalog = FileCatalog::new(RepoLocation::local(tmp.path()));

        catalog.upsert(&entry("energy_prices", "NOK")).await?;
        catalog.upsert(&entry("energy_volumes", "MWh")).await?;
        catalog.upsert(&entry("gas_prices", "EUR")).await?;

        let exact = catalog
            .search(&CatalogQuery::all().name_equals("gas_prices"))
            .await?;
        assert_eq!(exact.len(), 1);
        assert_eq!(exact[0].name, "gas_prices");

        let by_regex = catalog
            .search(&CatalogQuery::all().name_matches("^energy_"))
            .await?;
        let names: Vec<&str> = by_regex.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["energy_prices", "energy_volumes"]);
        Ok(())
    }

    #[tokio::test]
    async fn invalid_regex_is_rejected() -> TestResult {
        let tmp = TempDir::new()?;
        let catalog = FileCatalog::new(RepoLocation::local(tmp.path()));

        let err = catalog
            .search(&CatalogQuery::all().name_matches("("))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::InvalidPattern { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn empty_catalog_searches_empty() -> TestResult {
        let tmp = TempDir::new()?;
        let catalog = FileCatalog::new(RepoLocation::local(tmp.path()));

        let hits = catalog.search(&CatalogQuery::all()).await?;
        assert!(hits.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn list_tag_values_match_on_containment() -> TestResult {
        let tmp = TempDir::new()?;
        let catalog = FileCatalog::new(RepoLocation::local(tmp.path()));

        let mut e = entry("energy_prices", "NOK");
        e.tags.insert(
            "region".to_string(),
            TagValue::Many(vec!["NO1".into(), "NO2".into()]),
        );
        catalog.upsert(&e).await?;

        let mut criteria = TagMap::new();
        add_tag(&mut criteria, "region", "NO2");
        let hits = catalog.search(&CatalogQuery::all().tags(criteria)).await?;
        assert_eq!(hits.len(), 1);

        let mut missing = TagMap::new();
        add_tag(&mut missing, "region", "NO5");
        let none = catalog.search(&CatalogQuery::all().tags(missing)).await?;
        assert!(none.is_empty());
        Ok(())
    }
}

//! Shared builders for integration tests.
#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use dataset_store_core::dataset::{DateAxis, Dataset, Series};
use dataset_store_core::registry::HandlerRegistry;
use dataset_store_core::repository::{Repository, RepositoryConfig};
use dataset_store_core::tags::{add_tag, TagMap};
use dataset_store_core::types::SeriesType;
use dataset_store_core::version::AsOfVersion;

pub fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 1, d, 0, 0, 0).single().unwrap()
}

pub fn as_of(year: i32, month: u32) -> AsOfVersion {
    AsOfVersion::new(
        Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
            .single()
            .unwrap(),
    )
    .unwrap()
}

/// The spec's first scenario: `energy_prices`, `(NONE, AT)`, three dates with
/// the given values.
pub fn energy_prices(values: &[f64]) -> Dataset {
    let mut tags = TagMap::new();
    add_tag(&mut tags, "unit", "NOK");
    add_tag(&mut tags, "frequency", "daily");

    let mut spot_tags = TagMap::new();
    add_tag(&mut spot_tags, "region", "NO1");

    Dataset::new(
        "energy_prices",
        SeriesType::none_at(),
        DateAxis::At(vec![day(1), day(2), day(3)]),
    )
    .unwrap()
    .with_tags(tags)
    .with_series(Series::with_tags(
        "spot",
        spot_tags,
        values.iter().map(|v| Some(*v)).collect(),
    ))
    .unwrap()
}

/// The spec's second scenario: `prices_v`, `(AS_OF, AT)`, one date with one
/// value per version.
pub fn prices_v(value: f64) -> Dataset {
    let mut tags = TagMap::new();
    add_tag(&mut tags, "unit", "EUR");

    Dataset::new(
        "prices_v",
        SeriesType::as_of_at(),
        DateAxis::At(vec![day(1)]),
    )
    .unwrap()
    .with_tags(tags)
    .with_series(Series::new("spot", vec![Some(value)]))
    .unwrap()
}

/// A repository over fresh temp directories, wired to the given handler.
pub fn test_repository(handler: &str) -> (TempDir, Repository) {
    let tmp = TempDir::new().expect("create temp dir");
    let config = RepositoryConfig {
        name: "test".to_string(),
        directory: tmp.path().join("data"),
        catalog: tmp.path().join("metadata"),
        data_handler: handler.to_string(),
        bucket: Some(tmp.path().join("bucket")),
        is_default: true,
    };
    let registry = HandlerRegistry::with_builtins();
    let repository = Repository::new(config, &registry).expect("resolve handler");
    (tmp, repository)
}

/// Logical dataset equality: name, type, tags, axis, and per-series values
/// and tags, independent of series order.
pub fn assert_logical_eq(actual: &Dataset, expected: &Dataset) {
    assert_eq!(actual.name(), expected.name());
    assert_eq!(actual.series_type(), expected.series_type());
    assert_eq!(actual.tags(), expected.tags());
    assert_eq!(actual.axis(), expected.axis());
    assert_eq!(actual.series().len(), expected.series().len());
    for series in expected.series() {
        let found = actual
            .series_named(&series.name)
            .unwrap_or_else(|| panic!("series '{}' missing", series.name));
        assert_eq!(found.values, series.values, "values of '{}'", series.name);
        assert_eq!(found.tags, series.tags, "tags of '{}'", series.name);
    }
}

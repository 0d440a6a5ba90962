//! Round-trip and versioning properties, exercised per handler.

mod common;

use common::{as_of, assert_logical_eq, energy_prices, prices_v};
use tempfile::TempDir;

use dataset_store_core::handlers::hive::HivePartitionHandler;
use dataset_store_core::handlers::simple::SimpleFileHandler;
use dataset_store_core::handlers::{HandlerError, StorageHandler};
use dataset_store_core::storage::RepoLocation;
use dataset_store_core::types::SeriesType;
use dataset_store_core::version::VersionSelector;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn handlers(tmp: &TempDir) -> Vec<Box<dyn StorageHandler>> {
    vec![
        Box::new(SimpleFileHandler::new(RepoLocation::local(
            tmp.path().join("simple"),
        ))),
        Box::new(HivePartitionHandler::new(RepoLocation::local(
            tmp.path().join("hive"),
        ))),
    ]
}

#[tokio::test]
async fn write_then_read_round_trips_data_and_tags() -> TestResult {
    let tmp = TempDir::new()?;
    for handler in handlers(&tmp) {
        let ds = energy_prices(&[1.0, 2.0, 3.0]);
        handler.write(&ds, None).await?;

        let back = handler
            .read(
                "energy_prices",
                SeriesType::none_at(),
                VersionSelector::Latest,
            )
            .await?;
        assert_logical_eq(&back, &ds);
    }
    Ok(())
}

#[tokio::test]
async fn handlers_are_interchangeable_for_the_same_logical_write() -> TestResult {
    let tmp = TempDir::new()?;
    let ds = energy_prices(&[1.0, 2.0, 3.0]);

    let mut results = Vec::new();
    for handler in handlers(&tmp) {
        handler.write(&ds, None).await?;
        results.push(
            handler
                .read(
                    "energy_prices",
                    SeriesType::none_at(),
                    VersionSelector::Latest,
                )
                .await?,
        );
    }

    assert_logical_eq(&results[0], &results[1]);
    Ok(())
}

#[tokio::test]
async fn unversioned_overwrite_returns_exactly_the_second_payload() -> TestResult {
    let tmp = TempDir::new()?;
    for handler in handlers(&tmp) {
        handler.write(&energy_prices(&[1.0, 2.0, 3.0]), None).await?;
        let d2 = energy_prices(&[7.0, 8.0, 9.0]);
        handler.write(&d2, None).await?;

        let back = handler
            .read(
                "energy_prices",
                SeriesType::none_at(),
                VersionSelector::Latest,
            )
            .await?;
        assert_logical_eq(&back, &d2);
    }
    Ok(())
}

#[tokio::test]
async fn as_of_versions_list_ascending_regardless_of_write_order() -> TestResult {
    let tmp = TempDir::new()?;
    for handler in handlers(&tmp) {
        let (v1, v2, v3) = (as_of(2023, 1), as_of(2023, 2), as_of(2023, 3));

        handler.write(&prices_v(20.0), Some(&v2)).await?;
        handler.write(&prices_v(30.0), Some(&v3)).await?;
        handler.write(&prices_v(10.0), Some(&v1)).await?;

        let versions = handler
            .list_versions("prices_v", SeriesType::as_of_at())
            .await?;
        assert_eq!(versions, vec![v1, v2, v3]);

        let middle = handler
            .read(
                "prices_v",
                SeriesType::as_of_at(),
                VersionSelector::AsOf(v2),
            )
            .await?;
        assert_eq!(
            middle.series_named("spot").unwrap().values,
            vec![Some(20.0)]
        );

        let latest = handler
            .read("prices_v", SeriesType::as_of_at(), VersionSelector::Latest)
            .await?;
        assert_eq!(
            latest.series_named("spot").unwrap().values,
            vec![Some(30.0)]
        );
    }
    Ok(())
}

#[tokio::test]
async fn version_conflict_leaves_existing_artifact_intact() -> TestResult {
    let tmp = TempDir::new()?;
    for handler in handlers(&tmp) {
        let v1 = as_of(2023, 1);
        handler.write(&prices_v(10.0), Some(&v1)).await?;

        let err = handler
            .write(&prices_v(99.0), Some(&v1))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::VersionConflict { .. }));

        let back = handler
            .read(
                "prices_v",
                SeriesType::as_of_at(),
                VersionSelector::AsOf(v1),
            )
            .await?;
        assert_eq!(back.series_named("spot").unwrap().values, vec![Some(10.0)]);
    }
    Ok(())
}

#[tokio::test]
async fn spec_scenarios_round_trip_exactly() -> TestResult {
    let tmp = TempDir::new()?;
    for handler in handlers(&tmp) {
        // Scenario 1: energy_prices (NONE, AT), values [1.0, 2.0, 3.0].
        let ds = energy_prices(&[1.0, 2.0, 3.0]);
        handler.write(&ds, None).await?;
        let back = handler
            .read(
                "energy_prices",
                SeriesType::none_at(),
                VersionSelector::Latest,
            )
            .await?;
        let dates = match back.axis() {
            dataset_store_core::dataset::DateAxis::At(dates) => dates.clone(),
            other => panic!("unexpected axis {other:?}"),
        };
        assert_eq!(dates, vec![common::day(1), common::day(2), common::day(3)]);
        assert_eq!(
            back.series_named("spot").unwrap().values,
            vec![Some(1.0), Some(2.0), Some(3.0)]
        );

        // Scenario 2: prices_v (AS_OF, AT), versions 2023-01-01 and 2023-02-01.
        let (v1, v2) = (as_of(2023, 1), as_of(2023, 2));
        handler.write(&prices_v(10.0), Some(&v1)).await?;
        handler.write(&prices_v(20.0), Some(&v2)).await?;

        let versions = handler
            .list_versions("prices_v", SeriesType::as_of_at())
            .await?;
        assert_eq!(versions, vec![v1, v2]);

        let first = handler
            .read(
                "prices_v",
                SeriesType::as_of_at(),
                "2023-01-01T00:00:00+00:00".parse()?,
            )
            .await?;
        assert_eq!(first.series_named("spot").unwrap().values, vec![Some(10.0)]);

        let latest = handler
            .read("prices_v", SeriesType::as_of_at(), "latest".parse()?)
            .await?;
        assert_eq!(
            latest.series_named("spot").unwrap().values,
            vec![Some(20.0)]
        );
    }
    Ok(())
}
